//! Snapshot loaders, distribution planning against a real database, and the
//! duplicate-distribution guard

use guildlog_common::aggregation::Strategy;
use guildlog_common::db::distributions::{
    distribution_exists, load_distribution, load_distribution_lines, record_distribution,
};
use guildlog_common::db::init::init_database;
use guildlog_common::db::ledger::{
    add_resource, add_session_member, add_user, create_session, log_yield, set_setting, set_tax_preference,
};
use guildlog_common::db::snapshots::{load_catalog, load_directory, load_sessions, load_tax_snapshot};
use guildlog_common::distribution::{plan_distribution, DistributionKey, DistributionRequest, EngineContext};
use guildlog_common::models::{ResourceId, SessionId, UserId};
use guildlog_common::normalize::AliasRules;
use guildlog_common::refinery::RecipeBook;
use guildlog_common::tax::TaxPreference;
use guildlog_common::Error;
use sqlx::SqlitePool;
use tempfile::TempDir;

struct Seeded {
    _dir: TempDir,
    pool: SqlitePool,
    spice: ResourceId,
    melange: ResourceId,
    alice: UserId,
    bob: UserId,
    carol: UserId,
    s1: SessionId,
    s2: SessionId,
}

/// Two sessions: s1 = alice + bob, s2 = bob + carol
async fn seed() -> Seeded {
    let dir = tempfile::tempdir().unwrap();
    let pool = init_database(&dir.path().join("guildlog.db")).await.unwrap();

    let melange = add_resource(&pool, "melange", "refined", None).await.unwrap();
    let spice = add_resource(&pool, "spice", "raw", Some(melange)).await.unwrap();

    let alice = add_user(&pool, "alice", Some("Ali")).await.unwrap();
    let bob = add_user(&pool, "bob", None).await.unwrap();
    let carol = add_user(&pool, "carol", Some("  ")).await.unwrap();

    let s1 = create_session(&pool, "deep desert run", &[alice, bob]).await.unwrap();
    let s2 = create_session(&pool, "night harvest", &[bob]).await.unwrap();
    add_session_member(&pool, s2, carol).await.unwrap();
    // Re-adding a member is a no-op
    add_session_member(&pool, s2, carol).await.unwrap();

    log_yield(&pool, s1, spice, Some(alice), 1000).await.unwrap();
    log_yield(&pool, s1, spice, None, 500).await.unwrap();
    log_yield(&pool, s2, spice, Some(carol), 300).await.unwrap();

    Seeded {
        _dir: dir,
        pool,
        spice,
        melange,
        alice,
        bob,
        carol,
        s1,
        s2,
    }
}

async fn plan(
    seeded: &Seeded,
    strategy: Strategy,
    recipe: Option<&str>,
) -> guildlog_common::Result<guildlog_common::distribution::DistributionPlan> {
    let catalog = load_catalog(&seeded.pool).await?;
    let directory = load_directory(&seeded.pool).await?;
    let tax = load_tax_snapshot(&seeded.pool).await?;
    let aliases = AliasRules::builtin();
    let recipes = RecipeBook::builtin();
    let ctx = EngineContext {
        catalog: &catalog,
        directory: &directory,
        tax: &tax,
        aliases: &aliases,
        recipes: &recipes,
    };
    let request = DistributionRequest {
        session_ids: vec![seeded.s2, seeded.s1],
        resource: "Raw Spice".to_string(),
        strategy,
        recipe: recipe.map(str::to_string),
        discounted: false,
    };
    let sessions = load_sessions(&seeded.pool, &request.session_ids).await?;
    plan_distribution(&request, &sessions, &ctx)
}

#[tokio::test]
async fn test_snapshot_loaders_round_trip() {
    let seeded = seed().await;

    let catalog = load_catalog(&seeded.pool).await.unwrap();
    assert_eq!(catalog.entries.len(), 2);
    assert_eq!(catalog.get(seeded.spice).unwrap().refined_into_id, Some(seeded.melange));

    let directory = load_directory(&seeded.pool).await.unwrap();
    assert_eq!(directory.get(seeded.alice).unwrap().display_name(), "Ali");
    assert_eq!(directory.get(seeded.bob).unwrap().display_name(), "bob");
    assert_eq!(directory.get(seeded.carol).unwrap().display_name(), "carol");

    let sessions = load_sessions(&seeded.pool, &[seeded.s1, seeded.s2]).await.unwrap();
    assert_eq!(sessions.yields.len(), 3);
    assert_eq!(sessions.participants_of(seeded.s1), vec![seeded.alice, seeded.bob]);
    assert_eq!(sessions.participants_of(seeded.s2), vec![seeded.bob, seeded.carol]);

    let only_s2 = load_sessions(&seeded.pool, &[seeded.s2]).await.unwrap();
    assert_eq!(only_s2.yields.len(), 1);

    let none = load_sessions(&seeded.pool, &[]).await.unwrap();
    assert!(none.yields.is_empty() && none.members.is_empty());
}

#[tokio::test]
async fn test_tax_snapshot_reads_preferences() {
    let seeded = seed().await;
    set_tax_preference(
        &seeded.pool,
        seeded.bob,
        &TaxPreference {
            personal_rate: Some(0.2),
            opted_out: false,
        },
    )
    .await
    .unwrap();
    set_tax_preference(
        &seeded.pool,
        seeded.carol,
        &TaxPreference {
            personal_rate: None,
            opted_out: true,
        },
    )
    .await
    .unwrap();

    let snapshot = load_tax_snapshot(&seeded.pool).await.unwrap();
    assert_eq!(snapshot.preferences.len(), 2);
    assert_eq!(snapshot.preference_for(seeded.bob).unwrap().personal_rate, Some(0.2));
    assert!(snapshot.preference_for(seeded.carol).unwrap().opted_out);
    assert!(snapshot.preference_for(seeded.alice).is_none());
}

#[tokio::test]
async fn test_equal_plan_over_stored_sessions() {
    let seeded = seed().await;

    let plan = plan(&seeded, Strategy::EqualPerSession, None).await.unwrap();

    // s1: 1500 / 2, s2: 300 / 2
    assert_eq!(plan.total_input, 1800);
    assert_eq!(plan.total_distributed, 1800);
    let gross: Vec<(UserId, u64)> = plan.lines.iter().map(|l| (l.user_id, l.gross)).collect();
    assert!(gross.contains(&(seeded.alice, 750)));
    assert!(gross.contains(&(seeded.bob, 900)));
    assert!(gross.contains(&(seeded.carol, 150)));
    assert_eq!(plan.key, DistributionKey::new(&[seeded.s1, seeded.s2], seeded.spice));
}

#[tokio::test]
async fn test_weighted_plan_uses_logged_yields() {
    let seeded = seed().await;

    let plan = plan(&seeded, Strategy::WeightedAcrossSessions, None).await.unwrap();

    // Only attributed rows weigh: alice 1000, carol 300; the group row still counts toward the total
    assert_eq!(plan.strategy_used, Some(Strategy::WeightedAcrossSessions));
    assert_eq!(plan.total_distributed, 1800);
    let alice = plan.lines.iter().find(|l| l.user_id == seeded.alice).unwrap();
    let carol = plan.lines.iter().find(|l| l.user_id == seeded.carol).unwrap();
    assert_eq!(alice.gross + carol.gross, 1800);
    assert!(alice.gross > carol.gross);
    assert!(plan.lines.iter().all(|l| l.user_id != seeded.bob));
}

#[tokio::test]
async fn test_refined_plan_keys_on_output_resource() {
    let seeded = seed().await;

    let plan = plan(&seeded, Strategy::EqualPerSession, Some("melange")).await.unwrap();

    // 1800 spice is short of one 10000 batch
    assert_eq!(plan.key.output_resource_id(), seeded.melange);
    assert_eq!(plan.total_distributed, 0);
    assert_eq!(plan.leftover_input, 1800);
    assert!(plan.lines.iter().all(|l| l.gross == 0));
}

#[tokio::test]
async fn test_tax_applied_when_enabled() {
    let seeded = seed().await;
    set_setting(&seeded.pool, "tax_enabled", "true").await.unwrap();
    set_tax_preference(
        &seeded.pool,
        seeded.carol,
        &TaxPreference {
            personal_rate: None,
            opted_out: true,
        },
    )
    .await
    .unwrap();

    let plan = plan(&seeded, Strategy::EqualPerSession, None).await.unwrap();

    let alice = plan.lines.iter().find(|l| l.user_id == seeded.alice).unwrap();
    assert_eq!((alice.gross, alice.tax, alice.net), (750, 75, 675));
    let carol = plan.lines.iter().find(|l| l.user_id == seeded.carol).unwrap();
    assert_eq!((carol.gross, carol.tax, carol.net), (150, 0, 150));
    assert_eq!(plan.total_net() + plan.total_tax(), plan.total_distributed);
}

#[tokio::test]
async fn test_record_then_duplicate_is_rejected() {
    let seeded = seed().await;
    let plan = plan(&seeded, Strategy::EqualPerSession, None).await.unwrap();

    assert!(!distribution_exists(&seeded.pool, &plan.key).await.unwrap());

    let recorded = record_distribution(&seeded.pool, &plan, false).await.unwrap();
    assert!(!recorded.replaced);
    assert_eq!(recorded.lines_written, 3);
    assert!(distribution_exists(&seeded.pool, &plan.key).await.unwrap());

    let second = record_distribution(&seeded.pool, &plan, false).await;
    match second {
        Err(Error::DuplicateDistribution { key }) => assert_eq!(key, plan.key.to_string()),
        other => panic!("expected DuplicateDistribution, got {:?}", other),
    }

    // The rejected attempt wrote nothing
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM distributions")
        .fetch_one(&seeded.pool)
        .await
        .unwrap();
    assert_eq!(count, 1);
    let lines = load_distribution_lines(&seeded.pool, &recorded.guid).await.unwrap();
    assert_eq!(lines.len(), 3);
}

#[tokio::test]
async fn test_session_order_does_not_bypass_guard() {
    let seeded = seed().await;
    let plan = plan(&seeded, Strategy::EqualPerSession, None).await.unwrap();
    record_distribution(&seeded.pool, &plan, false).await.unwrap();

    let reordered = DistributionKey::new(&[seeded.s1, seeded.s2, seeded.s1], seeded.spice);
    assert!(distribution_exists(&seeded.pool, &reordered).await.unwrap());
}

#[tokio::test]
async fn test_override_replaces_existing_record() {
    let seeded = seed().await;
    let first = plan(&seeded, Strategy::EqualPerSession, None).await.unwrap();
    let original = record_distribution(&seeded.pool, &first, false).await.unwrap();

    let second = plan(&seeded, Strategy::WeightedAcrossSessions, None).await.unwrap();
    let replaced = record_distribution(&seeded.pool, &second, true).await.unwrap();

    assert!(replaced.replaced);
    assert_ne!(replaced.guid, original.guid);
    assert_eq!(replaced.dist_key, original.dist_key);

    let record = load_distribution(&seeded.pool, &second.key).await.unwrap().unwrap();
    assert_eq!(record.guid, replaced.guid);
    assert_eq!(record.total_distributed, 1800);
    assert_eq!(record.session_ids, format!("{},{}", seeded.s1, seeded.s2));

    let stale = load_distribution_lines(&seeded.pool, &original.guid).await.unwrap();
    assert!(stale.is_empty());
    let fresh = load_distribution_lines(&seeded.pool, &replaced.guid).await.unwrap();
    assert_eq!(fresh.len(), second.lines.len());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_records_leave_exactly_one() {
    let seeded = seed().await;
    let plan = plan(&seeded, Strategy::EqualPerSession, None).await.unwrap();
    // Separate pools so the writers contend for the SQLite lock, not a pool slot
    let other = init_database(&seeded._dir.path().join("guildlog.db")).await.unwrap();

    for round in 0..5 {
        let (a, b) = tokio::join!(
            record_distribution(&seeded.pool, &plan, false),
            record_distribution(&other, &plan, false)
        );

        let loser = match (a, b) {
            (Ok(_), Err(e)) | (Err(e), Ok(_)) => e,
            (a, b) => panic!("round {}: expected one winner, got {:?} / {:?}", round, a, b),
        };
        assert!(
            matches!(loser, Error::DuplicateDistribution { ref key } if *key == plan.key.to_string()),
            "round {}: loser got {:?}",
            round,
            loser
        );

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM distributions")
            .fetch_one(&seeded.pool)
            .await
            .unwrap();
        assert_eq!(count, 1);

        sqlx::query("DELETE FROM distribution_lines").execute(&seeded.pool).await.unwrap();
        sqlx::query("DELETE FROM distributions").execute(&seeded.pool).await.unwrap();
    }
}

#[tokio::test]
async fn test_zero_total_plan_is_not_recorded() {
    let seeded = seed().await;
    let empty = plan(&seeded, Strategy::EqualPerSession, Some("melange")).await.unwrap();
    assert_eq!(empty.total_distributed, 0);

    let err = record_distribution(&seeded.pool, &empty, false).await.unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)), "got {:?}", err);
    assert!(!distribution_exists(&seeded.pool, &empty.key).await.unwrap());

    let err = record_distribution(&seeded.pool, &empty, true).await.unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
}

#[tokio::test]
async fn test_unresolved_resource_is_reported() {
    let seeded = seed().await;
    let catalog = load_catalog(&seeded.pool).await.unwrap();
    let directory = load_directory(&seeded.pool).await.unwrap();
    let tax = load_tax_snapshot(&seeded.pool).await.unwrap();
    let aliases = AliasRules::builtin();
    let recipes = RecipeBook::builtin();
    let ctx = EngineContext {
        catalog: &catalog,
        directory: &directory,
        tax: &tax,
        aliases: &aliases,
        recipes: &recipes,
    };
    let request = DistributionRequest {
        session_ids: vec![seeded.s1],
        resource: "unobtainium".to_string(),
        strategy: Strategy::EqualPerSession,
        recipe: None,
        discounted: false,
    };
    let sessions = load_sessions(&seeded.pool, &request.session_ids).await.unwrap();

    let result = plan_distribution(&request, &sessions, &ctx);
    assert!(matches!(result, Err(Error::UnresolvedEntity { .. })));
}
