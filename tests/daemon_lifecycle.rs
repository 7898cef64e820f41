//! Socket-level round trips: watch, clock, query, shutdown.

mod common;

use serde_json::json;

use common::start_daemon;

#[test]
fn daemon_round_trip() {
    let daemon = start_daemon();
    let mut client = daemon.connect();

    // version always answers and carries the crate version.
    let resp = client.request(json!(["version"]));
    assert_eq!(
        resp.get("version"),
        Some(&json!(env!("CARGO_PKG_VERSION")))
    );

    // Capability interrogation.
    let resp = client.request(json!([
        "version",
        {"optional": ["term-dirname", "term-frobnicate"], "required": ["cmd-query"]}
    ]));
    let caps = resp.get("capabilities").unwrap();
    assert_eq!(caps.get("term-dirname"), Some(&json!(true)));
    assert_eq!(caps.get("term-frobnicate"), Some(&json!(false)));
    assert_eq!(caps.get("cmd-query"), Some(&json!(true)));

    let resp = client.request(json!(["version", {"required": ["cmd-no-such"]}]));
    assert!(resp.get("error").is_some());

    let resp = client.request(json!(["list-capabilities"]));
    let caps: Vec<String> = resp
        .get("capabilities")
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap();
    assert!(caps.contains(&"cmd-watch".to_string()));
    let mut sorted = caps.clone();
    sorted.sort();
    assert_eq!(caps, sorted);

    // Unknown commands produce error PDUs, not disconnects.
    let resp = client.request(json!(["frobnicate"]));
    assert_eq!(resp.get("error"), Some(&json!("unknown command frobnicate")));

    // Commands against an unwatched root fail cleanly.
    let resp = client.request(json!(["clock", "/nope/definitely/missing"]));
    assert!(resp.get("error").is_some());

    // Watch a tree that already has content.
    let tree = tempfile::tempdir().unwrap();
    std::fs::write(tree.path().join("seed.txt"), b"seed").unwrap();
    std::fs::create_dir(tree.path().join("src")).unwrap();
    std::fs::write(tree.path().join("src/main.c"), b"int main;").unwrap();

    let root = tree.path().canonicalize().unwrap();
    let root_str = root.to_string_lossy().into_owned();
    let resp = client.request(json!(["watch", root_str]));
    assert_eq!(resp.get("watch"), Some(&json!(root_str.clone())));

    let resp = client.request(json!(["watch-list"]));
    assert_eq!(resp.get("roots"), Some(&json!([root_str.clone()])));

    // The clock is well-formed and advances between syncs.
    let resp = client.request(json!(["clock", root_str, {"sync_timeout": 5000}]));
    let clock1 = resp.get("clock").and_then(|c| c.as_str()).unwrap().to_string();
    assert!(clock1.starts_with("c:"));

    // The initial crawl is queryable.
    let resp = client.request(json!([
        "query", root_str,
        {"fields": ["name"], "sync_timeout": 0}
    ]));
    assert_eq!(resp.get("is_fresh_instance"), Some(&json!(true)));
    let files: Vec<String> =
        serde_json::from_value(resp.get("files").unwrap().clone()).unwrap();
    assert!(files.contains(&"seed.txt".to_string()));
    assert!(files.contains(&"src/main.c".to_string()));

    // An incremental query sees only what changed after the clock, and the
    // cookie sync guarantees the watcher has caught up.
    std::fs::write(root.join("hello.txt"), b"hi").unwrap();
    let resp = client.request(json!([
        "query", root_str,
        {"since": clock1, "fields": ["name"], "sync_timeout": 5000}
    ]));
    assert_eq!(resp.get("is_fresh_instance"), Some(&json!(false)));
    let files: Vec<String> =
        serde_json::from_value(resp.get("files").unwrap().clone()).unwrap();
    assert!(files.contains(&"hello.txt".to_string()));
    assert!(!files.contains(&"seed.txt".to_string()));

    // Clock monotonicity across queries.
    let resp = client.request(json!(["clock", root_str]));
    let clock2 = resp.get("clock").and_then(|c| c.as_str()).unwrap();
    let ticks = |c: &str| c.rsplit(':').next().unwrap().parse::<u64>().unwrap();
    assert!(ticks(clock2) >= ticks(&clock1));

    // find uses wholename wildcards; records carry the default field set.
    let resp = client.request(json!(["find", root_str, "src/*.c"]));
    let files = resp.get("files").unwrap().as_array().unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].get("name"), Some(&json!("src/main.c")));
    assert_eq!(files[0].get("exists"), Some(&json!(true)));

    // Dropping the watch makes the root unknown again.
    let resp = client.request(json!(["watch-del", root_str]));
    assert_eq!(resp.get("watch-del"), Some(&json!(true)));
    let resp = client.request(json!(["clock", root_str]));
    assert!(resp.get("error").is_some());

    daemon.shutdown();
}
