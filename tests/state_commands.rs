//! state-enter / state-leave over the socket, including broadcasts and the
//! implicit vacate on disconnect.

mod common;

use serde_json::json;

use common::start_daemon;

#[test]
fn state_lifecycle_and_broadcasts() {
    let daemon = start_daemon();

    let tree = tempfile::tempdir().unwrap();
    let root = tree.path().canonicalize().unwrap();
    let root_str = root.to_string_lossy().into_owned();

    let mut control = daemon.connect();
    let resp = control.request(json!(["watch", root_str]));
    assert!(resp.get("error").is_none());

    // An observer subscribed to the root sees state broadcasts.
    let mut observer = daemon.connect();
    let resp = observer.request(json!(["subscribe", root_str, "obs", {"fields": ["name"]}]));
    assert_eq!(resp.get("subscribe"), Some(&json!("obs")));
    // Initial result set establishes the baseline.
    let initial = observer.recv_until(|v| v.get("files").is_some());
    assert_eq!(initial.get("is_fresh_instance"), Some(&json!(true)));

    // Enter: synchronous ack first...
    let mut actor = daemon.connect();
    let resp = actor.request(json!([
        "state-enter", root_str,
        {"name": "mystate", "metadata": {"who": "tester"}}
    ]));
    assert_eq!(resp.get("state-enter"), Some(&json!("mystate")));
    assert_eq!(resp.get("root"), Some(&json!(root_str.clone())));

    // ...then the broadcast once the cookie has round-tripped.
    let enter = observer.recv_until(|v| v.get("state-enter").is_some());
    assert_eq!(enter.get("state-enter"), Some(&json!("mystate")));
    assert_eq!(enter.get("metadata"), Some(&json!({"who": "tester"})));
    assert!(
        enter
            .get("clock")
            .and_then(|c| c.as_str())
            .is_some_and(|c| c.starts_with("c:"))
    );
    assert!(enter.get("abandoned").is_none());

    // Same session: double enter is a synchronous error.
    let resp = actor.request(json!(["state-enter", root_str, "mystate"]));
    assert_eq!(
        resp.get("error"),
        Some(&json!("state mystate is already asserted"))
    );

    // Another session: the root-level FIFO rejects a live duplicate too.
    let mut intruder = daemon.connect();
    let resp = intruder.request(json!(["state-enter", root_str, "mystate"]));
    assert_eq!(
        resp.get("error"),
        Some(&json!("state mystate is already asserted"))
    );

    // Leaving a state we never entered fails.
    let resp = intruder.request(json!(["state-leave", root_str, "otherstate"]));
    assert_eq!(
        resp.get("error"),
        Some(&json!("state otherstate is not asserted"))
    );

    // Leave: ack then broadcast, no abandoned marker.
    let resp = actor.request(json!(["state-leave", root_str, "mystate"]));
    assert_eq!(resp.get("state-leave"), Some(&json!("mystate")));
    let leave = observer.recv_until(|v| v.get("state-leave").is_some());
    assert_eq!(leave.get("state-leave"), Some(&json!("mystate")));
    assert!(leave.get("abandoned").is_none());

    // Once the leave is fully done the name is free for another session.
    let resp = intruder.request(json!(["state-enter", root_str, "mystate"]));
    assert_eq!(resp.get("state-enter"), Some(&json!("mystate")));
    let enter = observer.recv_until(|v| v.get("state-enter").is_some());
    assert_eq!(enter.get("state-enter"), Some(&json!("mystate")));

    // Disconnecting with a state held vacates it with abandoned: true,
    // exactly once, with no cookie sync on the teardown path.
    drop(intruder);
    let abandoned = observer.recv_until(|v| v.get("state-leave").is_some());
    assert_eq!(abandoned.get("state-leave"), Some(&json!("mystate")));
    assert_eq!(abandoned.get("abandoned"), Some(&json!(true)));

    // The FIFO head advanced: the name can be asserted again.
    let resp = actor.request(json!(["state-enter", root_str, "mystate"]));
    assert_eq!(resp.get("state-enter"), Some(&json!("mystate")));

    daemon.shutdown();
}
