//! Trigger definitions and end-to-end firing on settle.

mod common;

use serde_json::json;

use common::{start_daemon, wait_for_file};

#[test]
fn triggers_fire_on_settle() {
    let daemon = start_daemon();

    let tree = tempfile::tempdir().unwrap();
    let root = tree.path().canonicalize().unwrap();
    let root_str = root.to_string_lossy().into_owned();

    let mut client = daemon.connect();
    let resp = client.request(json!(["watch", root_str]));
    assert!(resp.get("error").is_none());

    // A trigger that records matched names, one per line.
    let definition = json!({
        "name": "rebuild",
        "expression": ["suffix", "c"],
        "stdin": "NAME_PER_LINE",
        "command": ["sh", "-c", "cat >> log.out"],
    });
    let resp = client.request(json!(["trigger", root_str, definition]));
    assert_eq!(resp.get("triggerid"), Some(&json!("rebuild")));
    assert_eq!(resp.get("disposition"), Some(&json!("created")));

    // Re-sending the identical definition leaves it alone.
    let resp = client.request(json!(["trigger", root_str, definition]));
    assert_eq!(resp.get("disposition"), Some(&json!("already_defined")));

    // A second trigger that dumps its environment.
    let resp = client.request(json!(["trigger", root_str, {
        "name": "envdump",
        "expression": ["suffix", "rs"],
        "command": ["sh", "-c", "env > env.out"],
    }]));
    assert_eq!(resp.get("disposition"), Some(&json!("created")));

    // Definition validation errors are synchronous.
    let resp = client.request(json!(["trigger", root_str, {"name": "bad"}]));
    assert!(resp.get("error").is_some());
    let resp = client.request(json!(["trigger", root_str, {
        "name": "bad", "command": ["true"], "stdout": "no-redirect",
    }]));
    assert!(resp.get("error").is_some());

    // Matching changes settle and the child receives the names on stdin.
    std::fs::write(root.join("a.c"), b"x").unwrap();
    let log = wait_for_file(&root.join("log.out"), |s| s.contains("a.c"));
    assert_eq!(log, "a.c\n");

    // The next firing only sees what changed since the previous run.
    std::fs::write(root.join("b.c"), b"y").unwrap();
    let log = wait_for_file(&root.join("log.out"), |s| s.contains("b.c"));
    assert_eq!(log, "a.c\nb.c\n");

    // Trigger children get the standard environment.
    std::fs::write(root.join("lib.rs"), b"z").unwrap();
    let env = wait_for_file(&root.join("env.out"), |s| s.contains("WATCHMAN_TRIGGER"));
    assert!(env.contains(&format!("WATCHMAN_ROOT={root_str}")));
    assert!(env.contains("WATCHMAN_TRIGGER=envdump"));
    assert!(env.contains("WATCHMAN_FILES_OVERFLOW=false"));
    assert!(env.contains("WATCHMAN_CLOCK=c:"));
    assert!(env.contains("WATCHMAN_SOCK="));

    // List and delete.
    let resp = client.request(json!(["trigger-list", root_str]));
    let triggers = resp.get("triggers").unwrap().as_array().unwrap();
    assert_eq!(triggers.len(), 2);

    let resp = client.request(json!(["trigger-del", root_str, "rebuild"]));
    assert_eq!(resp.get("deleted"), Some(&json!(true)));
    let resp = client.request(json!(["trigger-del", root_str, "rebuild"]));
    assert_eq!(resp.get("deleted"), Some(&json!(false)));

    let resp = client.request(json!(["trigger-list", root_str]));
    let triggers = resp.get("triggers").unwrap().as_array().unwrap();
    assert_eq!(triggers.len(), 1);

    daemon.shutdown();
}
