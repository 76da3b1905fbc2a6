#![allow(clippy::unwrap_used)]

mod common;

use std::sync::{Arc, Mutex};

use fluxsync_api::{Frame, Series};
use fluxsync_core::control::{State, Subject};
use fluxsync_core::model::PARENT_OF;
use fluxsync_core::{
    ALIASES, Alias, AliasKey, CONTROL_STATE_CHANNEL, ConnectionState, Multiplexer, OntologyId,
    RANGES, RELATIONSHIPS, Relationship, STATUSES, Scope, StateTracker, Status, SyncError,
    TrackerStatus, ValueStream, Variant,
};
use futures_util::StreamExt;
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tokio_test::assert_pending;
use uuid::Uuid;

use common::{MockTransport, eventually, settle, test_config, wait_for_state};

fn status_json(key: &str, variant: &str) -> Value {
    json!({ "key": key, "variant": variant, "message": format!("{key} is {variant}") })
}

fn control_frame(transfers: Value) -> Frame {
    Frame::single(
        CONTROL_STATE_CHANNEL,
        Series::from_json(&[json!({ "transfers": transfers })]),
    )
}

fn acquire(resource: u32, subject: &str) -> Value {
    json!({
        "to": {
            "subject": { "key": format!("{subject}-key"), "name": subject },
            "resource": resource,
            "authority": 200
        }
    })
}

// ── Resource channels ───────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_deletes_apply_before_sets_in_one_frame() {
    let mock = MockTransport::new();
    let mux = Multiplexer::new(mock.shared(), test_config());
    let mut state = mux.connection_state();

    let log = Arc::new(Mutex::new(Vec::new()));
    let (on_set_log, on_delete_log) = (Arc::clone(&log), Arc::clone(&log));
    let _set = STATUSES
        .on_set(&mux, move |s: &Status| {
            on_set_log.lock().unwrap().push(format!("set {}", s.key));
        })
        .unwrap();
    let _delete = STATUSES
        .on_delete(&mux, move |key: &String| {
            on_delete_log.lock().unwrap().push(format!("delete {key}"));
        })
        .unwrap();
    wait_for_state(&mut state, ConnectionState::Open).await;
    assert_eq!(
        mock.opened_with(),
        vec![vec!["sy_status_delete".to_string(), "sy_status_set".to_string()]]
    );

    let frame = Frame::new()
        .with("sy_status_set", Series::from_json(&[status_json("rack-1", "success")]))
        .with("sy_status_delete", Series::from_strings(["rack-1"]).unwrap());
    mock.push(frame);

    eventually("both applied", || log.lock().unwrap().len() == 2).await;
    assert_eq!(*log.lock().unwrap(), vec!["delete rack-1", "set rack-1"]);
}

#[tokio::test(start_paused = true)]
async fn test_status_set_decodes_resource() {
    let mock = MockTransport::new();
    let mux = Multiplexer::new(mock.shared(), test_config());
    let mut state = mux.connection_state();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let _sub = STATUSES
        .on_set(&mux, move |s: &Status| sink.lock().unwrap().push(s.clone()))
        .unwrap();
    wait_for_state(&mut state, ConnectionState::Open).await;

    mock.push(Frame::single(
        "sy_status_set",
        Series::from_json(&[status_json("pump", "warning")]),
    ));
    eventually("status delivered", || seen.lock().unwrap().len() == 1).await;

    let status = seen.lock().unwrap()[0].clone();
    assert_eq!(status.variant, Variant::Warning);
    assert_eq!(status.message, "pump is warning");
}

#[tokio::test(start_paused = true)]
async fn test_range_delete_keys_are_uuids() {
    let mock = MockTransport::new();
    let mux = Multiplexer::new(mock.shared(), test_config());
    let mut state = mux.connection_state();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let _sub = RANGES
        .on_delete(&mux, move |key: &Uuid| sink.lock().unwrap().push(*key))
        .unwrap();
    wait_for_state(&mut state, ConnectionState::Open).await;

    let key = Uuid::new_v4();
    mock.push(Frame::single("sy_range_delete", Series::from_uuids(&[key])));
    eventually("delete delivered", || seen.lock().unwrap().len() == 1).await;
    assert_eq!(seen.lock().unwrap()[0], key);
}

#[tokio::test(start_paused = true)]
async fn test_alias_set_and_delete() {
    let mock = MockTransport::new();
    let mux = Multiplexer::new(mock.shared(), test_config());
    let mut state = mux.connection_state();

    let aliases: Arc<Mutex<Vec<Alias>>> = Arc::new(Mutex::new(Vec::new()));
    let deleted: Arc<Mutex<Vec<AliasKey>>> = Arc::new(Mutex::new(Vec::new()));
    let (set_sink, delete_sink) = (Arc::clone(&aliases), Arc::clone(&deleted));
    let _set = ALIASES
        .on_set(&mux, move |a: &Alias| set_sink.lock().unwrap().push(a.clone()))
        .unwrap();
    let _delete = ALIASES
        .on_delete(&mux, move |k: &AliasKey| delete_sink.lock().unwrap().push(*k))
        .unwrap();
    wait_for_state(&mut state, ConnectionState::Open).await;

    let range = Uuid::new_v4();
    let frame = Frame::single(
        "sy_range_alias_set",
        Series::from_json(&[json!({ "range": range, "channel": 7, "alias": "tank_pressure" })]),
    )
    .with(
        "sy_range_alias_delete",
        Series::from_strings([format!("{range}---9")]).unwrap(),
    );
    mock.push(frame);

    eventually("alias set and delete delivered", || {
        aliases.lock().unwrap().len() == 1 && deleted.lock().unwrap().len() == 1
    })
    .await;
    assert_eq!(aliases.lock().unwrap()[0].alias, "tank_pressure");
    assert_eq!(deleted.lock().unwrap()[0], AliasKey { range, channel: 9 });
}

#[tokio::test(start_paused = true)]
async fn test_relationship_deletes_use_key_form() {
    let mock = MockTransport::new();
    let mux = Multiplexer::new(mock.shared(), test_config());
    let mut state = mux.connection_state();
    let mut errors = mux.errors();

    let removed: Arc<Mutex<Vec<Relationship>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&removed);
    let _delete = RELATIONSHIPS
        .on_delete(&mux, move |r: &Relationship| sink.lock().unwrap().push(r.clone()))
        .unwrap();
    wait_for_state(&mut state, ConnectionState::Open).await;

    mock.push(Frame::single(
        "sy_ontology_relationship_delete",
        Series::from_strings(["range:r1->parent->range:r2", "range:r1->broken"]).unwrap(),
    ));

    eventually("delete delivered", || removed.lock().unwrap().len() == 1).await;
    let edge = removed.lock().unwrap()[0].clone();
    assert!(edge.is_from(PARENT_OF, &OntologyId::new("range", "r1")));
    assert_eq!(edge.to, OntologyId::new("range", "r2"));

    let err = errors.recv().await.unwrap();
    assert!(
        matches!(&*err, SyncError::Decode { channel, .. } if channel == "sy_ontology_relationship_delete"),
        "unexpected error: {err:?}"
    );
}

// ── Scope ───────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_scope_rebind_replaces_without_churn() {
    let mock = MockTransport::new();
    let mux = Multiplexer::new(mock.shared(), test_config());
    let mut state = mux.connection_state();

    let calls = Arc::new(Mutex::new(Vec::new()));
    let mut scope = Scope::new();

    let first = Arc::clone(&calls);
    scope
        .bind("statuses", &mux, &STATUSES.set, move |_: &Status| {
            first.lock().unwrap().push("first");
        })
        .unwrap();
    wait_for_state(&mut state, ConnectionState::Open).await;

    let second = Arc::clone(&calls);
    scope
        .bind("statuses", &mux, &STATUSES.set, move |_: &Status| {
            second.lock().unwrap().push("second");
        })
        .unwrap();
    assert_eq!(scope.len(), 1);
    assert_eq!(mux.registry().listener_count("sy_status_set"), 1);

    mock.push(Frame::single(
        "sy_status_set",
        Series::from_json(&[status_json("a", "info")]),
    ));
    eventually("delivered", || !calls.lock().unwrap().is_empty()).await;
    settle().await;

    assert_eq!(*calls.lock().unwrap(), vec!["second"]);
    assert_eq!(mock.opens(), 1);
    assert_eq!(mock.closes(), 0);
    assert!(mock.updates().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_scope_drop_releases_everything() {
    let mock = MockTransport::new();
    let mux = Multiplexer::new(mock.shared(), test_config());
    let mut state = mux.connection_state();

    {
        let mut scope = Scope::new();
        scope.bind("set", &mux, &STATUSES.set, |_: &Status| {}).unwrap();
        scope.bind("delete", &mux, &STATUSES.delete, |_: &String| {}).unwrap();
        wait_for_state(&mut state, ConnectionState::Open).await;
        assert!(scope.contains("set"));
        assert!(scope.release("delete"));
        assert!(!scope.release("delete"));
    }

    wait_for_state(&mut state, ConnectionState::Idle).await;
    assert!(mux.registry().demand().is_empty());
    assert_eq!(mock.live(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_scope_clear() {
    let mock = MockTransport::new();
    let mux = Multiplexer::new(mock.shared(), test_config());

    let mut scope = Scope::new();
    scope.bind("a", &mux, &STATUSES.set, |_: &Status| {}).unwrap();
    scope.bind("b", &mux, &STATUSES.set, |_: &Status| {}).unwrap();
    assert_eq!(mux.registry().listener_count("sy_status_set"), 2);

    scope.clear();
    assert!(scope.is_empty());
    assert_eq!(mux.registry().live_listeners(), 0);
}

// ── ValueStream ─────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_value_stream_keeps_latest() {
    let mock = MockTransport::new();
    let mux = Multiplexer::new(mock.shared(), test_config());
    let mut state = mux.connection_state();

    let mut stream = ValueStream::open(&mux, &STATUSES.set).unwrap();
    assert!(stream.latest().is_none());
    assert_eq!(stream.channel(), "sy_status_set");
    wait_for_state(&mut state, ConnectionState::Open).await;

    {
        let mut changed = tokio_test::task::spawn(stream.changed());
        assert_pending!(changed.poll());
    }

    mock.push(Frame::single(
        "sy_status_set",
        Series::from_json(&[status_json("a", "info"), status_json("a", "success")]),
    ));
    let latest = stream.changed().await.unwrap();
    assert_eq!(latest.variant, Variant::Success);
    assert_eq!(stream.current().unwrap().variant, Variant::Success);

    let mut values = stream.into_stream();
    mock.push(Frame::single(
        "sy_status_set",
        Series::from_json(&[status_json("a", "error")]),
    ));
    let next = values.next().await.unwrap();
    assert_eq!(next.variant, Variant::Error);

    drop(values);
    wait_for_state(&mut state, ConnectionState::Idle).await;
}

// ── StateTracker ────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_tracker_applies_transfers() {
    let mock = MockTransport::new();
    let mux = Multiplexer::new(mock.shared(), test_config());
    let mut state = mux.connection_state();

    let tracker = StateTracker::open(&mux).unwrap();
    let mut states = tracker.subscribe();
    assert_eq!(tracker.status(), TrackerStatus::Pending);
    wait_for_state(&mut state, ConnectionState::Open).await;
    assert_eq!(mock.opened_with(), vec![vec![CONTROL_STATE_CHANNEL.to_string()]]);

    mock.push(control_frame(json!([acquire(1, "console"), acquire(2, "driver")])));
    states.changed().await.unwrap();
    assert_eq!(tracker.states().len(), 2);
    assert_eq!(tracker.status(), TrackerStatus::Live);

    mock.push(control_frame(json!([{
        "from": {
            "subject": { "key": "driver-key", "name": "driver" },
            "resource": 2,
            "authority": 200
        }
    }])));
    states.changed().await.unwrap();

    assert!(tracker.get(2).is_none());
    assert_eq!(
        tracker.get(1),
        Some(State {
            subject: Subject {
                key: "console-key".into(),
                name: "console".into(),
            },
            resource: 1,
            authority: 200,
        })
    );

    let mut status = tracker.watch_status();
    tracker.close().await;
    assert_eq!(*status.borrow_and_update(), TrackerStatus::Closed);
    wait_for_state(&mut state, ConnectionState::Idle).await;
}

#[tokio::test(start_paused = true)]
async fn test_tracker_reports_connection_loss() {
    let mock = MockTransport::new();
    let mux = Multiplexer::new(mock.shared(), test_config());
    let mut state = mux.connection_state();

    let tracker = StateTracker::open(&mux).unwrap();
    wait_for_state(&mut state, ConnectionState::Open).await;
    mock.push(control_frame(json!([acquire(1, "console")])));
    eventually("live", || tracker.status() == TrackerStatus::Live).await;

    mock.drop_stream();
    eventually("disconnected", || {
        matches!(tracker.status(), TrackerStatus::Disconnected { .. })
    })
    .await;
    assert!(tracker.status().is_stale());
    assert_eq!(tracker.states().len(), 1, "last known state is kept");

    wait_for_state(&mut state, ConnectionState::Open).await;
    eventually("pending after reopen", || tracker.status() == TrackerStatus::Pending).await;
    assert!(!tracker.status().is_stale());

    mock.push(control_frame(json!([acquire(3, "sequence")])));
    eventually("live again", || tracker.status() == TrackerStatus::Live).await;
    assert_eq!(tracker.states().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_tracker_opened_after_failure_is_failed() {
    let mock = MockTransport::new();
    mock.fail_next_opens(u32::MAX);
    let mux = Multiplexer::new(mock.shared(), test_config());
    let mut state = mux.connection_state();

    let first = StateTracker::open(&mux).unwrap();
    wait_for_state(&mut state, ConnectionState::Failed).await;
    assert!(matches!(first.status(), TrackerStatus::Failed { .. }));

    let second = StateTracker::open(&mux).unwrap();
    assert!(
        matches!(second.status(), TrackerStatus::Failed { .. }),
        "got {:?}",
        second.status()
    );
    assert!(second.status().is_stale());
}

#[tokio::test(start_paused = true)]
async fn test_tracker_opened_while_reconnecting_is_disconnected() {
    let mock = MockTransport::new();
    mock.fail_next_opens(1);
    let mux = Multiplexer::new(mock.shared(), test_config());
    let mut state = mux.connection_state();

    let _first = StateTracker::open(&mux).unwrap();
    wait_for_state(&mut state, ConnectionState::Reconnecting { attempt: 1 }).await;

    let second = StateTracker::open(&mux).unwrap();
    assert!(matches!(second.status(), TrackerStatus::Disconnected { .. }));

    wait_for_state(&mut state, ConnectionState::Open).await;
    eventually("pending once open", || second.status() == TrackerStatus::Pending).await;
    mock.push(control_frame(json!([acquire(2, "console")])));
    eventually("live", || second.status() == TrackerStatus::Live).await;
}

#[tokio::test(start_paused = true)]
async fn test_tracker_shares_the_multiplexed_subscription() {
    let mock = MockTransport::new();
    let mux = Multiplexer::new(mock.shared(), test_config());
    let mut state = mux.connection_state();

    let _statuses = STATUSES.on_set(&mux, |_: &Status| {}).unwrap();
    let tracker = StateTracker::open(&mux).unwrap();
    wait_for_state(&mut state, ConnectionState::Open).await;

    assert_eq!(mock.opens(), 1);
    assert_eq!(
        mock.opened_with()[0],
        vec!["sy_node_1_control".to_string(), "sy_status_set".to_string()]
    );

    tracker.close().await;
    eventually("retargeted", || mock.updates().len() == 1).await;
    assert_eq!(mock.updates()[0], vec!["sy_status_set".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_dedicated_tracker_owns_its_subscription() {
    let mock = MockTransport::new();
    let tracker = StateTracker::dedicated(mock.shared(), test_config()).unwrap();
    let mut state = tracker.multiplexer().unwrap().connection_state();

    wait_for_state(&mut state, ConnectionState::Open).await;
    assert_eq!(mock.opened_with(), vec![vec![CONTROL_STATE_CHANNEL.to_string()]]);

    mock.push(control_frame(json!([acquire(4, "console")])));
    eventually("state applied", || tracker.get(4).is_some()).await;

    tracker.close().await;
    assert_eq!(mock.live(), 0);
    assert_eq!(mock.closes(), 1);
}
