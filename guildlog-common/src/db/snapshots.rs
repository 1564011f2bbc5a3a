//! Read-only snapshot loaders
//!
//! Each loader fetches exactly the rows one engine call needs; the engine
//! itself never touches the pool.

use crate::models::{
    CatalogSnapshot, DirectoryEntry, DirectorySnapshot, ResourceCatalogEntry, ResourceId,
    SessionId, SessionMember, SessionSnapshot, UserId, YieldRow,
};
use crate::tax::{TaxConfig, TaxPreference, TaxSnapshot};
use crate::Result;
use sqlx::SqlitePool;
use tracing::{debug, warn};

pub async fn load_catalog(pool: &SqlitePool) -> Result<CatalogSnapshot> {
    let rows = sqlx::query_as::<_, (i64, String, String, Option<i64>)>(
        "SELECT id, canonical_name, category, refined_into_id FROM resources ORDER BY id",
    )
    .fetch_all(pool)
    .await?;

    Ok(CatalogSnapshot::new(
        rows.into_iter()
            .map(|(id, canonical_name, category, refined)| ResourceCatalogEntry {
                id: ResourceId(id),
                canonical_name,
                category,
                refined_into_id: refined.map(ResourceId),
            })
            .collect(),
    ))
}

pub async fn load_directory(pool: &SqlitePool) -> Result<DirectorySnapshot> {
    let rows = sqlx::query_as::<_, (i64, Option<String>, String)>(
        "SELECT id, preferred_name, login_name FROM users ORDER BY id",
    )
    .fetch_all(pool)
    .await?;

    Ok(DirectorySnapshot::new(
        rows.into_iter()
            .map(|(id, preferred_name, login_name)| DirectoryEntry {
                id: UserId(id),
                preferred_name,
                login_name,
            })
            .collect(),
    ))
}

/// Membership and yield rows for the given sessions
pub async fn load_sessions(pool: &SqlitePool, session_ids: &[SessionId]) -> Result<SessionSnapshot> {
    if session_ids.is_empty() {
        return Ok(SessionSnapshot::default());
    }
    let placeholders = vec!["?"; session_ids.len()].join(", ");

    let members_sql = format!(
        "SELECT session_id, user_id FROM session_members WHERE session_id IN ({}) ORDER BY session_id, joined_at, user_id",
        placeholders
    );
    let mut members_query = sqlx::query_as::<_, (i64, i64)>(&members_sql);
    for id in session_ids {
        members_query = members_query.bind(id.0);
    }
    let members = members_query
        .fetch_all(pool)
        .await?
        .into_iter()
        .map(|(s, u)| SessionMember {
            session_id: SessionId(s),
            user_id: UserId(u),
        })
        .collect();

    let yields_sql = format!(
        "SELECT session_id, resource_id, logged_by, quantity FROM session_yields WHERE session_id IN ({}) ORDER BY id",
        placeholders
    );
    let mut yields_query = sqlx::query_as::<_, (i64, i64, Option<i64>, i64)>(&yields_sql);
    for id in session_ids {
        yields_query = yields_query.bind(id.0);
    }
    let yields: Vec<YieldRow> = yields_query
        .fetch_all(pool)
        .await?
        .into_iter()
        .map(|(s, r, by, q)| YieldRow {
            session_id: SessionId(s),
            resource_id: ResourceId(r),
            logged_by: by.map(UserId),
            quantity: q.max(0) as u64,
        })
        .collect();

    debug!(sessions = session_ids.len(), yields = yields.len(), "Loaded session snapshot");

    Ok(SessionSnapshot { members, yields })
}

pub async fn load_tax_snapshot(pool: &SqlitePool) -> Result<TaxSnapshot> {
    let enabled: Option<String> = sqlx::query_scalar::<_, Option<String>>("SELECT value FROM settings WHERE key = 'tax_enabled'")
        .fetch_optional(pool)
        .await?
        .flatten();
    let rate: Option<String> = sqlx::query_scalar::<_, Option<String>>("SELECT value FROM settings WHERE key = 'guild_tax_rate'")
        .fetch_optional(pool)
        .await?
        .flatten();

    let defaults = TaxConfig::default();
    let guild_default_rate = match rate.as_deref().map(str::parse::<f64>) {
        Some(Ok(r)) => r,
        Some(Err(_)) => {
            warn!("guild_tax_rate setting is not a number - using {}", defaults.guild_default_rate);
            defaults.guild_default_rate
        }
        None => defaults.guild_default_rate,
    };
    let config = TaxConfig {
        enabled: matches!(enabled.as_deref(), Some("true") | Some("1")),
        guild_default_rate,
    };

    let preferences = sqlx::query_as::<_, (i64, Option<f64>, i64)>(
        "SELECT user_id, personal_rate, opted_out FROM tax_preferences ORDER BY user_id",
    )
    .fetch_all(pool)
    .await?
    .into_iter()
    .map(|(user, personal_rate, opted_out)| {
        (
            UserId(user),
            TaxPreference {
                personal_rate,
                opted_out: opted_out != 0,
            },
        )
    })
    .collect();

    Ok(TaxSnapshot { config, preferences })
}
