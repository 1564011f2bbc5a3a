//! Catalog, roster and session writes
//!
//! Thin inserts used by the CLI and tests to populate a database; the web
//! front end has its own forms for these.

use crate::models::{ResourceId, SessionId, UserId};
use crate::tax::TaxPreference;
use crate::Result;
use sqlx::SqlitePool;
use tracing::info;

pub async fn add_resource(
    pool: &SqlitePool,
    canonical_name: &str,
    category: &str,
    refined_into: Option<ResourceId>,
) -> Result<ResourceId> {
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO resources (canonical_name, category, refined_into_id) VALUES (?, ?, ?) RETURNING id",
    )
    .bind(canonical_name)
    .bind(category)
    .bind(refined_into.map(|r| r.0))
    .fetch_one(pool)
    .await?;

    info!("Added resource '{}' (#{})", canonical_name, id);
    Ok(ResourceId(id))
}

pub async fn add_user(pool: &SqlitePool, login_name: &str, preferred_name: Option<&str>) -> Result<UserId> {
    let id: i64 = sqlx::query_scalar("INSERT INTO users (login_name, preferred_name) VALUES (?, ?) RETURNING id")
        .bind(login_name)
        .bind(preferred_name)
        .fetch_one(pool)
        .await?;

    info!("Added user '{}' (#{})", login_name, id);
    Ok(UserId(id))
}

pub async fn create_session(pool: &SqlitePool, name: &str, members: &[UserId]) -> Result<SessionId> {
    let mut tx = pool.begin().await?;

    let id: i64 = sqlx::query_scalar("INSERT INTO sessions (name) VALUES (?) RETURNING id")
        .bind(name)
        .fetch_one(&mut *tx)
        .await?;

    for user in members {
        sqlx::query("INSERT OR IGNORE INTO session_members (session_id, user_id) VALUES (?, ?)")
            .bind(id)
            .bind(user.0)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    info!("Created session '{}' (#{}) with {} member(s)", name, id, members.len());
    Ok(SessionId(id))
}

pub async fn add_session_member(pool: &SqlitePool, session: SessionId, user: UserId) -> Result<()> {
    sqlx::query("INSERT OR IGNORE INTO session_members (session_id, user_id) VALUES (?, ?)")
        .bind(session.0)
        .bind(user.0)
        .execute(pool)
        .await?;
    Ok(())
}

/// Record a collected quantity; `logged_by = None` for unattributed group logs
pub async fn log_yield(
    pool: &SqlitePool,
    session: SessionId,
    resource: ResourceId,
    logged_by: Option<UserId>,
    quantity: u64,
) -> Result<()> {
    let quantity = i64::try_from(quantity)
        .map_err(|_| crate::Error::InvalidInput(format!("Quantity {} too large", quantity)))?;
    sqlx::query("INSERT INTO session_yields (session_id, resource_id, logged_by, quantity) VALUES (?, ?, ?, ?)")
        .bind(session.0)
        .bind(resource.0)
        .bind(logged_by.map(|u| u.0))
        .bind(quantity)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn set_tax_preference(pool: &SqlitePool, user: UserId, preference: &TaxPreference) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO tax_preferences (user_id, personal_rate, opted_out) VALUES (?, ?, ?)
        ON CONFLICT(user_id) DO UPDATE SET personal_rate = excluded.personal_rate, opted_out = excluded.opted_out
        "#,
    )
    .bind(user.0)
    .bind(preference.personal_rate)
    .bind(preference.opted_out as i64)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn set_setting(pool: &SqlitePool, key: &str, value: &str) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO settings (key, value) VALUES (?, ?)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP
        "#,
    )
    .bind(key)
    .bind(value)
    .execute(pool)
    .await?;
    Ok(())
}
