//! Recording distributions
//!
//! Each write runs in a `BEGIN IMMEDIATE` transaction, so the writer lock is
//! taken before the duplicate check. A second writer for the same key waits
//! (up to the busy timeout) until the first commits, then sees its row and
//! gets [`Error::DuplicateDistribution`]. The unique index on
//! `distributions.dist_key` backs the check for writers outside this module.

use crate::db::models::{DistributionRecord, RecordedDistribution};
use crate::distribution::{DistributionKey, DistributionPlan};
use crate::{Error, Result};
use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{info, warn};
use uuid::Uuid;

fn to_db_int(value: u64, what: &str) -> Result<i64> {
    i64::try_from(value).map_err(|_| Error::InvalidInput(format!("{} {} out of range", what, value)))
}

fn duplicate_or(err: sqlx::Error, key: &DistributionKey) -> Error {
    match &err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => Error::DuplicateDistribution {
            key: key.to_string(),
        },
        _ => Error::Database(err),
    }
}

/// Persist a plan unless its key was already distributed
///
/// With `allow_override` an existing record (and its lines) is replaced in
/// the same transaction. A plan that distributes nothing is refused so it
/// cannot claim the key ahead of a real distribution.
pub async fn record_distribution(
    pool: &SqlitePool,
    plan: &DistributionPlan,
    allow_override: bool,
) -> Result<RecordedDistribution> {
    let key = plan.key.to_string();
    if plan.total_distributed == 0 {
        warn!("Refusing to record empty distribution for {}", key);
        return Err(Error::InvalidInput(format!("Nothing to distribute for {}", key)));
    }

    let mut conn = pool.acquire().await?;
    sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;

    match write_distribution(&mut conn, plan, &key, allow_override).await {
        Ok(recorded) => {
            sqlx::query("COMMIT")
                .execute(&mut *conn)
                .await
                .map_err(|e| duplicate_or(e, &plan.key))?;
            info!(
                guid = %recorded.guid,
                lines = recorded.lines_written,
                total = plan.total_distributed,
                "Recorded distribution {}",
                key
            );
            Ok(recorded)
        }
        Err(e) => {
            if let Err(rollback) = sqlx::query("ROLLBACK").execute(&mut *conn).await {
                warn!("Rollback failed, discarding connection: {}", rollback);
                conn.close().await.ok();
            }
            Err(e)
        }
    }
}

async fn write_distribution(
    conn: &mut SqliteConnection,
    plan: &DistributionPlan,
    key: &str,
    allow_override: bool,
) -> Result<RecordedDistribution> {
    let existing: Option<String> = sqlx::query_scalar("SELECT guid FROM distributions WHERE dist_key = ?")
        .bind(key)
        .fetch_optional(&mut *conn)
        .await?;

    let replaced = match existing {
        Some(_) if !allow_override => {
            warn!("Distribution already recorded for {}", key);
            return Err(Error::DuplicateDistribution { key: key.to_string() });
        }
        Some(old_guid) => {
            sqlx::query("DELETE FROM distribution_lines WHERE distribution_guid = ?")
                .bind(&old_guid)
                .execute(&mut *conn)
                .await?;
            sqlx::query("DELETE FROM distributions WHERE guid = ?")
                .bind(&old_guid)
                .execute(&mut *conn)
                .await?;
            warn!("Overriding distribution {} for {}", old_guid, key);
            true
        }
        None => false,
    };

    let guid = Uuid::new_v4().to_string();
    let session_ids = plan
        .key
        .session_ids()
        .iter()
        .map(|s| s.to_string())
        .collect::<Vec<_>>()
        .join(",");
    let plan_json = serde_json::to_string(plan)
        .map_err(|e| Error::InvalidInput(format!("Cannot serialize plan: {}", e)))?;
    let recorded_at = Utc::now().to_rfc3339();

    sqlx::query(
        r#"
        INSERT INTO distributions (
            guid, dist_key, output_resource_id, input_resource_id, session_ids, strategy,
            recipe, discounted, total_input, total_distributed, plan_json, recorded_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&guid)
    .bind(key)
    .bind(plan.key.output_resource_id().0)
    .bind(plan.input_resource.id.map(|r| r.0))
    .bind(&session_ids)
    .bind(plan.strategy_used.map(|s| s.to_string()))
    .bind(plan.recipe.as_deref())
    .bind(plan.discounted as i64)
    .bind(to_db_int(plan.total_input, "total_input")?)
    .bind(to_db_int(plan.total_distributed, "total_distributed")?)
    .bind(&plan_json)
    .bind(&recorded_at)
    .execute(&mut *conn)
    .await
    .map_err(|e| duplicate_or(e, &plan.key))?;

    for line in &plan.lines {
        sqlx::query(
            "INSERT INTO distribution_lines (distribution_guid, user_id, gross, tax, net) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&guid)
        .bind(line.user_id.0)
        .bind(to_db_int(line.gross, "gross")?)
        .bind(to_db_int(line.tax, "tax")?)
        .bind(to_db_int(line.net, "net")?)
        .execute(&mut *conn)
        .await?;
    }

    Ok(RecordedDistribution {
        guid,
        dist_key: key.to_string(),
        replaced,
        lines_written: plan.lines.len(),
    })
}

pub async fn distribution_exists(pool: &SqlitePool, key: &DistributionKey) -> Result<bool> {
    let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM distributions WHERE dist_key = ?)")
        .bind(key.to_string())
        .fetch_one(pool)
        .await?;
    Ok(exists)
}

pub async fn load_distribution(pool: &SqlitePool, key: &DistributionKey) -> Result<Option<DistributionRecord>> {
    let row = sqlx::query_as::<_, (String, String, i64, String, i64, String)>(
        r#"
        SELECT guid, dist_key, output_resource_id, session_ids, total_distributed, recorded_at
        FROM distributions WHERE dist_key = ?
        "#,
    )
    .bind(key.to_string())
    .fetch_optional(pool)
    .await?;

    Ok(row.map(
        |(guid, dist_key, output_resource_id, session_ids, total_distributed, recorded_at)| DistributionRecord {
            guid,
            dist_key,
            output_resource_id,
            session_ids,
            total_distributed,
            recorded_at,
        },
    ))
}

/// Recorded net amounts per user for one distribution, ordered by user id
pub async fn load_distribution_lines(pool: &SqlitePool, guid: &str) -> Result<Vec<(i64, i64, i64, i64)>> {
    let rows = sqlx::query_as::<_, (i64, i64, i64, i64)>(
        "SELECT user_id, gross, tax, net FROM distribution_lines WHERE distribution_guid = ? ORDER BY user_id",
    )
    .bind(guid)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
