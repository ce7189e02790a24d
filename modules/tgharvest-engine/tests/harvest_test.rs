//! End-to-end harvest passes over an on-disk group.
//!
//! Each test builds a group in a temp dir, scripts the platform with
//! `MockSource`, runs passes through `Harvester`, and inspects what landed
//! on disk: the group document, the profile cache and the member logs.

use std::path::Path;
use std::sync::Arc;

use chrono::TimeDelta;
use serde_json::{json, Value};
use tgharvest_common::FetchParams;
use tgharvest_engine::testing::{message, ManualClock, MockSource};
use tgharvest_engine::{
    Clock, Group, GroupHandle, GroupStore, Harvester, MemberOutcome, QuarantineEntry, SourceError,
    MESSAGE_FETCH, PROFILE_RESOLUTION,
};

// =========================================================================
// Helpers
// =========================================================================

fn create_group(dir: &Path, members: &[&str]) -> GroupStore {
    let store = GroupStore::new(dir);
    let params = FetchParams {
        reverse: Some(true),
        ..Default::default()
    };
    let group = Group::new("g", members.iter().map(|s| s.to_string()).collect(), params);
    store.create(&group).unwrap();
    store
}

fn lines(path: &Path) -> Vec<Value> {
    match std::fs::read_to_string(path) {
        Ok(content) => content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect(),
        Err(_) => Vec::new(),
    }
}

fn ids(path: &Path) -> Vec<i64> {
    lines(path).iter().map(|v| v["id"].as_i64().unwrap()).collect()
}

/// Ids of every line that parses, skipping torn fragments.
fn readable_ids(path: &Path) -> Vec<i64> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .filter_map(|l| serde_json::from_str::<Value>(l).ok())
        .map(|v| v["id"].as_i64().unwrap())
        .collect()
}

// =========================================================================
// Full pass
// =========================================================================

#[tokio::test]
async fn canonicalizes_quarantines_and_harvests_in_one_pass() {
    let dir = tempfile::tempdir().unwrap();
    let store = create_group(dir.path(), &["alice", "123"]);
    let source = Arc::new(
        MockSource::new()
            .on_entity(json!({"id": 555, "username": "alice", "first_name": "Alice"}))
            .on_resolve_error("123", SourceError::NotFound("USERNAME_NOT_OCCUPIED".into()))
            .on_messages(555, vec![message(1, "hello"), message(2, "world")]),
    );
    let harvester = Harvester::new(source.clone(), store.clone(), Arc::new(ManualClock::default()));

    let report = harvester.run_group("g").await.unwrap();

    let group = store.load("g").unwrap();
    assert_eq!(group.members(), ["555"]);
    assert_eq!(group.quarantined().len(), 1);
    let QuarantineEntry { member, reason } = &group.quarantined()[0];
    assert_eq!(member, "123");
    assert!(reason.contains("USERNAME_NOT_OCCUPIED"), "reason: {reason}");

    let profiles = lines(&store.profiles_path("g"));
    assert_eq!(profiles.len(), 1);
    assert_eq!(profiles[0]["id"], 555);
    assert_eq!(profiles[0]["username"], "alice");

    assert_eq!(ids(&store.member_log_path("g", "555")), vec![1, 2]);
    assert!(!store.member_log_path("g", "123").exists());
    assert_eq!(source.fetch_calls(), 1);

    assert_eq!(report.outcome("alice"), Some(&MemberOutcome::Harvested { records: 2 }));
    assert!(matches!(report.outcome("123"), Some(MemberOutcome::Quarantined { .. })));
    assert_eq!(report.records(), 2);
}

#[tokio::test]
async fn canonical_member_is_a_cache_hit_on_the_next_pass() {
    let dir = tempfile::tempdir().unwrap();
    let store = create_group(dir.path(), &["alice"]);
    let source = Arc::new(
        MockSource::new()
            .on_entity(json!({"id": 555, "username": "alice"}))
            .on_messages(555, vec![message(1, "a")]),
    );
    let harvester = Harvester::new(source.clone(), store.clone(), Arc::new(ManualClock::default()));

    harvester.run_group("g").await.unwrap();
    assert_eq!(store.load("g").unwrap().members(), ["555"]);

    harvester.run_group("g").await.unwrap();
    assert_eq!(source.resolve_calls(), 1);
}

#[tokio::test]
async fn later_passes_only_request_newer_records() {
    let dir = tempfile::tempdir().unwrap();
    let store = create_group(dir.path(), &["555"]);
    let log = store.member_log_path("g", "555");
    // left behind by an earlier run, including a torn last line
    std::fs::write(&log, "{\"id\":5}\n{\"id\":12}\n{\"id\":3}\n{\"id\":13,\"mes").unwrap();

    let source = Arc::new(
        MockSource::new()
            .on_entity(json!({"id": 555}))
            .on_messages(555, (1..=15).map(|i| message(i, "m")).collect()),
    );
    let harvester = Harvester::new(source.clone(), store.clone(), Arc::new(ManualClock::default()));

    let report = harvester.run_group("g").await.unwrap();
    assert_eq!(report.outcome("555"), Some(&MemberOutcome::Harvested { records: 3 }));
    assert_eq!(source.queries()[0].params.min_id, Some(12));
    assert_eq!(readable_ids(&log), vec![5, 12, 3, 13, 14, 15]);
}

#[tokio::test]
async fn record_after_a_torn_line_is_not_lost() {
    let dir = tempfile::tempdir().unwrap();
    let store = create_group(dir.path(), &["555"]);
    let log = store.member_log_path("g", "555");
    std::fs::write(&log, "{\"id\":1}\n{\"id\":2,\"mes").unwrap();

    let source = Arc::new(
        MockSource::new()
            .on_entity(json!({"id": 555}))
            .on_messages(555, vec![message(1, "a"), message(2, "b"), message(3, "c")]),
    );
    let harvester = Harvester::new(source.clone(), store.clone(), Arc::new(ManualClock::default()));

    let report = harvester.run_group("g").await.unwrap();
    assert_eq!(report.outcome("555"), Some(&MemberOutcome::Harvested { records: 2 }));
    assert_eq!(readable_ids(&log), vec![1, 2, 3]);

    // nothing is requested again once the log is whole
    harvester.run_group("g").await.unwrap();
    assert_eq!(source.queries()[1].params.min_id, Some(3));
    assert_eq!(readable_ids(&log), vec![1, 2, 3]);
}

#[tokio::test]
async fn configured_min_id_above_checkpoint_is_kept() {
    let dir = tempfile::tempdir().unwrap();
    let store = GroupStore::new(dir.path());
    let params = FetchParams {
        min_id: Some(100),
        reverse: Some(true),
        ..Default::default()
    };
    store
        .create(&Group::new("g", vec!["555".into()], params))
        .unwrap();
    std::fs::write(store.member_log_path("g", "555"), "{\"id\":7}\n").unwrap();

    let source = Arc::new(MockSource::new().on_entity(json!({"id": 555})));
    let harvester = Harvester::new(source.clone(), store, Arc::new(ManualClock::default()));
    harvester.run_group("g").await.unwrap();

    assert_eq!(source.queries()[0].params.min_id, Some(100));
}

// =========================================================================
// Cooldowns
// =========================================================================

#[tokio::test]
async fn resolution_cooldown_survives_restart_and_expires() {
    let dir = tempfile::tempdir().unwrap();
    let store = create_group(dir.path(), &["alice", "bob"]);
    let clock = Arc::new(ManualClock::default());
    let limited = Arc::new(
        MockSource::new().on_resolve_error("alice", SourceError::RateLimited { seconds: 60 }),
    );

    let report = Harvester::new(limited.clone(), store.clone(), clock.clone())
        .run_group("g")
        .await
        .unwrap();
    assert_eq!(
        report.outcome("alice"),
        Some(&MemberOutcome::Suspended { slot: PROFILE_RESOLUTION })
    );
    assert_eq!(
        report.outcome("bob"),
        Some(&MemberOutcome::Suspended { slot: PROFILE_RESOLUTION })
    );
    assert_eq!(limited.resolve_calls(), 1);

    // a fresh process sees the persisted window
    let reopened = GroupHandle::open(&store, "g", clock.clone()).unwrap();
    assert!(reopened.is_suspended(PROFILE_RESOLUTION));
    assert_eq!(store.load("g").unwrap().members(), ["alice", "bob"]);

    clock.advance(TimeDelta::seconds(61));
    let healthy = Arc::new(
        MockSource::new()
            .on_entity(json!({"id": 1, "username": "alice"}))
            .on_entity(json!({"id": 2, "username": "bob"})),
    );
    Harvester::new(healthy.clone(), store.clone(), clock)
        .run_group("g")
        .await
        .unwrap();
    assert_eq!(healthy.resolve_calls(), 2);
    assert_eq!(store.load("g").unwrap().members(), ["1", "2"]);
}

#[tokio::test]
async fn cached_members_are_harvested_during_resolution_cooldown() {
    let dir = tempfile::tempdir().unwrap();
    let store = create_group(dir.path(), &["555", "newcomer"]);
    std::fs::write(store.profiles_path("g"), "{\"id\":555,\"username\":\"alice\"}\n").unwrap();
    let clock = Arc::new(ManualClock::default());
    {
        let mut handle = GroupHandle::open(&store, "g", clock.clone()).unwrap();
        handle.set_cooldown(PROFILE_RESOLUTION, 600).unwrap();
    }

    let source = Arc::new(
        MockSource::new()
            .on_entity(json!({"id": 555, "username": "alice"}))
            .on_messages(555, vec![message(1, "a")]),
    );
    let report = Harvester::new(source.clone(), store, clock)
        .run_group("g")
        .await
        .unwrap();

    assert_eq!(report.outcome("555"), Some(&MemberOutcome::Harvested { records: 1 }));
    assert_eq!(
        report.outcome("newcomer"),
        Some(&MemberOutcome::Suspended { slot: PROFILE_RESOLUTION })
    );
    assert_eq!(source.resolve_calls(), 0);
}

#[tokio::test]
async fn fetch_cooldown_skips_members_until_it_expires() {
    let dir = tempfile::tempdir().unwrap();
    let store = create_group(dir.path(), &["555"]);
    let clock = Arc::new(ManualClock::default());
    let source = Arc::new(
        MockSource::new()
            .on_entity(json!({"id": 555}))
            .on_messages(555, vec![message(1, "a")]),
    );
    {
        let mut handle = GroupHandle::open(&store, "g", clock.clone()).unwrap();
        handle.set_cooldown(MESSAGE_FETCH, 30).unwrap();
    }
    let harvester = Harvester::new(source.clone(), store, clock.clone());

    let report = harvester.run_group("g").await.unwrap();
    assert_eq!(
        report.outcome("555"),
        Some(&MemberOutcome::Suspended { slot: MESSAGE_FETCH })
    );
    assert_eq!(source.fetch_calls(), 0);

    clock.advance(TimeDelta::seconds(31));
    let report = harvester.run_group("g").await.unwrap();
    assert_eq!(report.outcome("555"), Some(&MemberOutcome::Harvested { records: 1 }));
}

// =========================================================================
// Failure policy
// =========================================================================

#[tokio::test]
async fn deactivated_account_stops_everything() {
    let dir = tempfile::tempdir().unwrap();
    let store = create_group(dir.path(), &["555", "777"]);
    let source = Arc::new(
        MockSource::new()
            .on_entity(json!({"id": 555}))
            .on_entity(json!({"id": 777}))
            .on_messages(555, vec![message(1, "a"), message(2, "b")])
            .on_messages(777, vec![message(1, "z")])
            .on_stream_error(555, 1, SourceError::AccountDeactivated),
    );
    let harvester = Harvester::new(source.clone(), store.clone(), Arc::new(ManualClock::default()));

    let err = harvester.run_group("g").await.unwrap_err();
    assert!(err.is_account_fatal());
    assert_eq!(source.fetch_calls(), 1);
    assert_eq!(ids(&store.member_log_path("g", "555")), vec![1]);
    assert!(!store.member_log_path("g", "777").exists());
    assert_eq!(store.load("g").unwrap().members(), ["555", "777"]);
}

#[tokio::test]
async fn reset_returns_quarantined_members_to_the_next_pass() {
    let dir = tempfile::tempdir().unwrap();
    let store = create_group(dir.path(), &["gone"]);
    let clock = Arc::new(ManualClock::default());
    let missing = Arc::new(
        MockSource::new().on_resolve_error("gone", SourceError::Private("CHANNEL_PRIVATE".into())),
    );
    Harvester::new(missing, store.clone(), clock.clone())
        .run_group("g")
        .await
        .unwrap();
    assert!(store.load("g").unwrap().members().is_empty());

    let mut handle = GroupHandle::open(&store, "g", clock.clone()).unwrap();
    assert_eq!(handle.retry_all().unwrap(), 1);
    drop(handle);

    let back = Arc::new(MockSource::new().on_entity(json!({"id": 9, "username": "gone"})));
    let report = Harvester::new(back, store.clone(), clock)
        .run_group("g")
        .await
        .unwrap();
    assert_eq!(report.outcome("gone"), Some(&MemberOutcome::Harvested { records: 0 }));
    let group = store.load("g").unwrap();
    assert_eq!(group.members(), ["9"]);
    assert!(group.quarantined().is_empty());
}

#[tokio::test]
async fn unknown_group_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let harvester = Harvester::new(
        Arc::new(MockSource::new()),
        GroupStore::new(dir.path()),
        Arc::new(ManualClock::default()),
    );
    assert!(harvester.run_group("missing").await.is_err());
}

#[test]
fn renamed_document_cannot_overwrite_another_group() {
    let dir = tempfile::tempdir().unwrap();
    let store = GroupStore::new(dir.path());
    store
        .create(&Group::new("a", vec!["1".into()], FetchParams::default()))
        .unwrap();
    store
        .create(&Group::new("b", vec!["2".into()], FetchParams::default()))
        .unwrap();
    let path = store.document_path("a");
    let text = std::fs::read_to_string(&path).unwrap().replace("name = \"a\"", "name = \"b\"");
    std::fs::write(&path, text).unwrap();

    let opened = GroupHandle::open(&store, "a", Arc::new(ManualClock::default()));
    assert!(opened.is_err());
    let b = store.load("b").unwrap();
    assert_eq!(b.members(), ["2"]);
    assert!(b.cooldowns().is_empty());
}

#[test]
fn manual_clock_drives_cooldowns() {
    let dir = tempfile::tempdir().unwrap();
    let store = create_group(dir.path(), &["a"]);
    let clock = Arc::new(ManualClock::default());
    let start = clock.now();

    let mut handle = GroupHandle::open(&store, "g", clock.clone()).unwrap();
    handle.set_cooldown("slot", 60).unwrap();
    assert!(handle.is_suspended("slot"));
    clock.set(start + TimeDelta::seconds(60));
    assert!(handle.is_suspended("slot"));
    clock.set(start + TimeDelta::seconds(61));
    assert!(!handle.is_suspended("slot"));
}
