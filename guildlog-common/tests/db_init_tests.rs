//! Database initialization, migrations and default settings

use guildlog_common::db::init::{init_database, BUSY_TIMEOUT};
use guildlog_common::db::migrations::{get_schema_version, run_migrations};
use guildlog_common::db::snapshots::load_tax_snapshot;
use guildlog_common::db::ledger::set_setting;

#[tokio::test]
async fn test_database_creation_when_missing() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("nested").join("guildlog.db");

    let result = init_database(&db_path).await;

    assert!(result.is_ok(), "Database initialization failed: {:?}", result.err());
    assert!(db_path.exists(), "Database file was not created");
}

#[tokio::test]
async fn test_database_opens_existing() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("guildlog.db");

    let pool1 = init_database(&db_path).await;
    assert!(pool1.is_ok());

    let pool2 = init_database(&db_path).await;
    assert!(pool2.is_ok(), "Failed to open existing database: {:?}", pool2.err());
}

#[tokio::test]
async fn test_all_tables_created() {
    let dir = tempfile::tempdir().unwrap();
    let pool = init_database(&dir.path().join("guildlog.db")).await.unwrap();

    for table in [
        "schema_version",
        "settings",
        "resources",
        "users",
        "sessions",
        "session_members",
        "session_yields",
        "tax_preferences",
        "distributions",
        "distribution_lines",
    ] {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name = ?)",
        )
        .bind(table)
        .fetch_one(&pool)
        .await
        .unwrap();
        assert!(exists, "table {} missing", table);
    }
}

#[tokio::test]
async fn test_default_settings_initialized() {
    let dir = tempfile::tempdir().unwrap();
    let pool = init_database(&dir.path().join("guildlog.db")).await.unwrap();

    let tax_enabled: String = sqlx::query_scalar("SELECT value FROM settings WHERE key = 'tax_enabled'")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(tax_enabled, "false");

    let snapshot = load_tax_snapshot(&pool).await.unwrap();
    assert!(!snapshot.config.enabled);
    assert!((snapshot.config.guild_default_rate - 0.10).abs() < 1e-12);
}

#[tokio::test]
async fn test_null_setting_is_repaired_on_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("guildlog.db");
    let pool = init_database(&db_path).await.unwrap();

    sqlx::query("UPDATE settings SET value = NULL WHERE key = 'guild_tax_rate'")
        .execute(&pool)
        .await
        .unwrap();
    pool.close().await;

    let pool = init_database(&db_path).await.unwrap();
    let rate: Option<String> = sqlx::query_scalar("SELECT value FROM settings WHERE key = 'guild_tax_rate'")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(rate.as_deref(), Some("0.10"));
}

#[tokio::test]
async fn test_existing_settings_preserved_on_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("guildlog.db");
    let pool = init_database(&db_path).await.unwrap();

    set_setting(&pool, "tax_enabled", "true").await.unwrap();
    set_setting(&pool, "guild_tax_rate", "0.25").await.unwrap();
    pool.close().await;

    let pool = init_database(&db_path).await.unwrap();
    let snapshot = load_tax_snapshot(&pool).await.unwrap();
    assert!(snapshot.config.enabled);
    assert!((snapshot.config.guild_default_rate - 0.25).abs() < 1e-12);
}

#[tokio::test]
async fn test_migrations_reach_current_version_and_are_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let pool = init_database(&dir.path().join("guildlog.db")).await.unwrap();

    let version = get_schema_version(&pool).await.unwrap();
    assert_eq!(version, 2);

    run_migrations(&pool).await.unwrap();
    assert_eq!(get_schema_version(&pool).await.unwrap(), 2);
}

#[tokio::test]
async fn test_unique_distribution_key_index_exists() {
    let dir = tempfile::tempdir().unwrap();
    let pool = init_database(&dir.path().join("guildlog.db")).await.unwrap();

    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='index' AND name='idx_distributions_key')",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert!(exists);
}

#[tokio::test]
async fn test_pragmas_apply_to_every_pooled_connection() {
    let dir = tempfile::tempdir().unwrap();
    let pool = init_database(&dir.path().join("guildlog.db")).await.unwrap();

    // Hold several at once so the pool has to open fresh connections
    let mut held = Vec::new();
    for _ in 0..3 {
        held.push(pool.acquire().await.unwrap());
    }

    for conn in held.iter_mut() {
        let journal: String = sqlx::query_scalar("PRAGMA journal_mode").fetch_one(&mut **conn).await.unwrap();
        assert_eq!(journal.to_lowercase(), "wal");

        let foreign_keys: i64 = sqlx::query_scalar("PRAGMA foreign_keys").fetch_one(&mut **conn).await.unwrap();
        assert_eq!(foreign_keys, 1);

        let busy_timeout: i64 = sqlx::query_scalar("PRAGMA busy_timeout").fetch_one(&mut **conn).await.unwrap();
        assert_eq!(busy_timeout, BUSY_TIMEOUT.as_millis() as i64);
    }
}
