//! Database schema migrations
//!
//! Versioned, idempotent upgrades for databases created by older builds.
//! Never modify an existing migration; add a new one and bump
//! `CURRENT_SCHEMA_VERSION`.

use crate::Result;
use sqlx::SqlitePool;
use tracing::{info, warn};

/// Current schema version
///
/// **IMPORTANT:** Increment this when adding new migrations
const CURRENT_SCHEMA_VERSION: i32 = 2;

/// Current schema version from the database, 0 if never migrated
pub async fn get_schema_version(pool: &SqlitePool) -> Result<i32> {
    let table_exists: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM sqlite_master
            WHERE type='table' AND name='schema_version'
        )
        "#,
    )
    .fetch_one(pool)
    .await?;

    if !table_exists {
        return Ok(0);
    }

    let version: Option<i32> =
        sqlx::query_scalar("SELECT version FROM schema_version ORDER BY version DESC LIMIT 1")
            .fetch_optional(pool)
            .await?;

    Ok(version.unwrap_or(0))
}

async fn set_schema_version(pool: &SqlitePool, version: i32) -> Result<()> {
    sqlx::query("INSERT OR IGNORE INTO schema_version (version) VALUES (?)")
        .bind(version)
        .execute(pool)
        .await?;

    Ok(())
}

/// Run all pending migrations
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    let current_version = get_schema_version(pool).await?;

    if current_version == CURRENT_SCHEMA_VERSION {
        info!("Database schema is up to date (v{})", current_version);
        return Ok(());
    }

    if current_version > CURRENT_SCHEMA_VERSION {
        warn!(
            "Database schema version ({}) is newer than code version ({})",
            current_version, CURRENT_SCHEMA_VERSION
        );
        return Ok(());
    }

    info!(
        "Running database migrations: v{} -> v{}",
        current_version, CURRENT_SCHEMA_VERSION
    );

    if current_version < 1 {
        migrate_v1(pool).await?;
        set_schema_version(pool, 1).await?;
        info!("✓ Migration v1 completed");
    }

    if current_version < 2 {
        migrate_v2(pool).await?;
        set_schema_version(pool, 2).await?;
        info!("✓ Migration v2 completed");
    }

    Ok(())
}

/// Migration v1: one distribution per (session set, output resource)
///
/// The unique index is what makes the duplicate check in
/// `record_distribution` hold under concurrent writers.
async fn migrate_v1(pool: &SqlitePool) -> Result<()> {
    info!("Running migration v1: unique distribution key");

    let duplicates: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM (SELECT dist_key FROM distributions GROUP BY dist_key HAVING COUNT(*) > 1)",
    )
    .fetch_one(pool)
    .await?;

    if duplicates > 0 {
        // Keep the earliest record of each key; later ones were double-applied
        warn!("  Removing {} duplicated distribution key(s)", duplicates);
        sqlx::query(
            r#"
            DELETE FROM distribution_lines WHERE distribution_guid IN (
                SELECT guid FROM distributions d
                WHERE EXISTS (
                    SELECT 1 FROM distributions e
                    WHERE e.dist_key = d.dist_key AND e.rowid < d.rowid
                )
            )
            "#,
        )
        .execute(pool)
        .await?;
        sqlx::query(
            r#"
            DELETE FROM distributions WHERE EXISTS (
                SELECT 1 FROM distributions e
                WHERE e.dist_key = distributions.dist_key AND e.rowid < distributions.rowid
            )
            "#,
        )
        .execute(pool)
        .await?;
    }

    sqlx::query("CREATE UNIQUE INDEX IF NOT EXISTS idx_distributions_key ON distributions(dist_key)")
        .execute(pool)
        .await?;

    info!("  ✓ Unique index on distributions.dist_key");
    Ok(())
}

/// Migration v2: per-member tax opt-out column
///
/// Early databases only stored a personal rate.
async fn migrate_v2(pool: &SqlitePool) -> Result<()> {
    info!("Running migration v2: tax_preferences.opted_out");

    let has_column: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM pragma_table_info('tax_preferences') WHERE name = 'opted_out'",
    )
    .fetch_one(pool)
    .await?;

    if has_column > 0 {
        info!("  opted_out column already exists - skipping");
        return Ok(());
    }

    match sqlx::query("ALTER TABLE tax_preferences ADD COLUMN opted_out INTEGER NOT NULL DEFAULT 0")
        .execute(pool)
        .await
    {
        Ok(_) => {
            info!("  ✓ Added opted_out column to tax_preferences");
            Ok(())
        }
        Err(sqlx::Error::Database(db_err)) if db_err.message().contains("duplicate column") => {
            info!("  opted_out column added by concurrent initializer - skipping");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
