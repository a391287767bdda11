//! Integration tests for PgScoreStore.
//! Requires a Postgres instance. Set DATABASE_TEST_URL or these tests are skipped.
//!
//! Tests share one database, so each uses fresh user ids and geo identifiers
//! and only asserts on its own rows.

use std::collections::BTreeMap;

use chrono::{Duration, SubsecRound, Utc};
use uuid::Uuid;

use geoscore_common::{
    AggregateRow, GeoAddress, GeoLevel, GeoScoreError, NewUser, PartialScores, ScoreVector,
};
use geoscore_store::{PgScoreStore, ScoreStore, LEVEL_LOCK_NAMESPACE};

/// Get a migrated test store, or skip if no test DB is available.
async fn test_store() -> Option<PgScoreStore> {
    let url = std::env::var("DATABASE_TEST_URL").ok()?;
    let store = PgScoreStore::connect(&url, 4).await.ok()?;
    store.migrate().await.ok()?;
    Some(store)
}

fn unique(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4().simple())
}

fn new_user(pincode: &str) -> NewUser {
    NewUser {
        user_id: Uuid::new_v4(),
        address: GeoAddress {
            pincode: pincode.to_string(),
            city: unique("city"),
            district: unique("district"),
            state: unique("state"),
            country: unique("country"),
        },
    }
}

fn scores(pairs: &[(&str, f64)]) -> PartialScores {
    let map: BTreeMap<String, f64> = pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect();
    PartialScores::from_map(&map).unwrap()
}

fn row(identifier: &str, count: i64, courage: f64) -> AggregateRow {
    AggregateRow {
        geo_identifier: identifier.to_string(),
        total_entities_contributing: count,
        scores: ScoreVector::neutral().with("courage", courage).unwrap(),
    }
}

#[tokio::test]
async fn created_user_starts_neutral() {
    let Some(store) = test_store().await else {
        return;
    };

    let user = store.create_user(new_user(&unique("pin"))).await.unwrap();

    assert_eq!(user.total_observations, 0);
    assert_eq!(user.scores, ScoreVector::neutral());
}

#[tokio::test]
async fn observations_update_running_average() {
    let Some(store) = test_store().await else {
        return;
    };
    let user = store.create_user(new_user(&unique("pin"))).await.unwrap();

    for value in [0.2, 0.4, 0.9] {
        store
            .apply_observation(user.user_id, &scores(&[("courage", value)]), Utc::now())
            .await
            .unwrap();
    }

    let pairs = store.user_groups_by(GeoLevel::Pincode).await.unwrap();
    let mine = pairs
        .iter()
        .find(|p| p.geo_value == user.address.pincode)
        .unwrap();
    assert_eq!(mine.users, 1);
    assert!((mine.scores.get("courage").unwrap() - 0.5).abs() < 1e-9);
    assert_eq!(mine.scores.get("empathy"), Some(0.5));
}

#[tokio::test]
async fn second_registration_is_rejected_and_history_kept() {
    let Some(store) = test_store().await else {
        return;
    };
    let registration = new_user(&unique("pin"));
    store.create_user(registration.clone()).await.unwrap();
    store
        .apply_observation(registration.user_id, &scores(&[("courage", 0.9)]), Utc::now())
        .await
        .unwrap();

    let err = store.create_user(registration.clone()).await.unwrap_err();

    assert!(matches!(err, GeoScoreError::UserExists(u) if u == registration.user_id));
    let groups = store.user_groups_by(GeoLevel::Pincode).await.unwrap();
    let mine = groups
        .iter()
        .find(|g| g.geo_value == registration.address.pincode)
        .unwrap();
    assert_eq!(mine.users, 1);
    assert!((mine.scores.get("courage").unwrap() - 0.9).abs() < 1e-9);
}

#[tokio::test]
async fn user_groups_average_within_the_database() {
    let Some(store) = test_store().await else {
        return;
    };
    let pincode = unique("pin");
    for value in [0.2, 0.4, 0.6] {
        let user = store.create_user(new_user(&pincode)).await.unwrap();
        store
            .apply_observation(user.user_id, &scores(&[("courage", value)]), Utc::now())
            .await
            .unwrap();
    }

    let groups = store.user_groups_by(GeoLevel::Pincode).await.unwrap();
    let mine: Vec<_> = groups.iter().filter(|g| g.geo_value == pincode).collect();

    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].users, 3);
    assert!((mine[0].scores.get("courage").unwrap() - 0.4).abs() < 1e-9);
    assert_eq!(mine[0].scores.get("empathy"), Some(0.5));
}

#[tokio::test]
async fn observation_for_unknown_user_is_rejected() {
    let Some(store) = test_store().await else {
        return;
    };

    let err = store
        .apply_observation(Uuid::new_v4(), &scores(&[("courage", 0.1)]), Utc::now())
        .await
        .unwrap_err();

    assert!(matches!(err, GeoScoreError::UserNotFound(_)));
}

#[tokio::test]
async fn geo_pairs_count_users_per_pair() {
    let Some(store) = test_store().await else {
        return;
    };
    let pincode = unique("pin");
    let first = new_user(&pincode);
    let mut second = new_user(&pincode);
    second.address.city = first.address.city.clone();
    store.create_user(first.clone()).await.unwrap();
    store.create_user(second).await.unwrap();

    let pairs = store.geo_pairs(GeoLevel::Pincode).await.unwrap();
    let mine: Vec<_> = pairs.iter().filter(|p| p.lower == pincode).collect();

    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].upper, first.address.city);
    assert_eq!(mine[0].users, 2);
}

#[tokio::test]
async fn rewriting_same_snapshot_replaces_rows() {
    let Some(store) = test_store().await else {
        return;
    };
    let id = unique("district");
    let at = Utc::now().trunc_subsecs(6);

    store
        .write_batch(GeoLevel::District, at, &[row(&id, 3, 0.2)])
        .await
        .unwrap();
    store
        .write_batch(GeoLevel::District, at, &[row(&id, 4, 0.7)])
        .await
        .unwrap();

    let latest = store.latest_for(GeoLevel::District, &id).await.unwrap().unwrap();
    assert_eq!(latest.created_at, at);
    assert_eq!(latest.total_entities_contributing, 4);
    assert_eq!(latest.scores.get("courage"), Some(0.7));
}

#[tokio::test]
async fn latest_for_returns_newest_snapshot() {
    let Some(store) = test_store().await else {
        return;
    };
    let id = unique("state");
    let now = Utc::now().trunc_subsecs(6);

    store
        .write_batch(GeoLevel::State, now - Duration::hours(1), &[row(&id, 1, 0.1)])
        .await
        .unwrap();
    store
        .write_batch(GeoLevel::State, now, &[row(&id, 2, 0.3)])
        .await
        .unwrap();

    let latest = store.latest_for(GeoLevel::State, &id).await.unwrap().unwrap();
    assert_eq!(latest.created_at, now);
    assert_eq!(latest.total_entities_contributing, 2);
}

#[tokio::test]
async fn prune_removes_only_rows_older_than_cutoff() {
    let Some(store) = test_store().await else {
        return;
    };
    let id = unique("country");
    let now = Utc::now().trunc_subsecs(6);
    let old = now - Duration::days(30);

    store
        .write_batch(GeoLevel::Country, old, &[row(&id, 1, 0.1)])
        .await
        .unwrap();
    store
        .write_batch(GeoLevel::Country, now, &[row(&id, 1, 0.2)])
        .await
        .unwrap();

    let pruned = store
        .prune_older_than(GeoLevel::Country, now - Duration::days(29))
        .await
        .unwrap();

    assert!(pruned >= 1);
    let latest = store.latest_for(GeoLevel::Country, &id).await.unwrap().unwrap();
    assert_eq!(latest.created_at, now);
}

// Only this test writes city rows, so holding the city lock cannot block others.
#[tokio::test]
async fn write_is_refused_while_another_writer_holds_the_level() {
    let Some(store) = test_store().await else {
        return;
    };
    let Ok(url) = std::env::var("DATABASE_TEST_URL") else {
        return;
    };
    let other = sqlx::PgPool::connect(&url).await.unwrap();
    let id = unique("city");
    let first = Utc::now().trunc_subsecs(6);
    store
        .write_batch(GeoLevel::City, first, &[row(&id, 2, 0.3)])
        .await
        .unwrap();

    let mut holder = other.begin().await.unwrap();
    let (held,): (bool,) = sqlx::query_as("SELECT pg_try_advisory_xact_lock($1, $2)")
        .bind(LEVEL_LOCK_NAMESPACE)
        .bind(GeoLevel::City.index() as i32)
        .fetch_one(&mut *holder)
        .await
        .unwrap();
    assert!(held);

    let err = store
        .write_batch(GeoLevel::City, first + Duration::hours(1), &[row(&id, 5, 0.9)])
        .await
        .unwrap_err();

    assert!(matches!(err, GeoScoreError::LevelBusy(GeoLevel::City)));
    let latest = store.latest_for(GeoLevel::City, &id).await.unwrap().unwrap();
    assert_eq!(latest.created_at, first);
    assert_eq!(latest.total_entities_contributing, 2);

    holder.rollback().await.unwrap();
    let written = store
        .write_batch(GeoLevel::City, first + Duration::hours(1), &[row(&id, 5, 0.9)])
        .await
        .unwrap();
    assert_eq!(written, 1);
}
