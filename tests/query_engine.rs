//! Query engine behavior against a deterministic fake-watcher root.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{Value, json};

use watchman::config::PublisherLimits;
use watchman::daemon::DaemonContext;
use watchman::daemon::root::{Root, RootSettings};
use watchman::query::{QueryExecError, TermRegistry, execute, parse_query};
use watchman::view::QueryableView;
use watchman::watcher::{ChangeMeta, FakeWatcher, FakeWatcherHandle, PendingChange};

struct Fixture {
    root: Arc<Root>,
    watcher: FakeWatcherHandle,
    dir: PathBuf,
    terms: TermRegistry,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap().keep();
    let (tx, rx) = crossbeam::channel::unbounded();
    let fake = FakeWatcher::new(tx);
    let watcher = fake.handle();
    let settings = RootSettings {
        settle: Duration::from_millis(20),
        default_sync_timeout: Duration::from_secs(2),
        age_out: None,
    };
    let context = Arc::new(DaemonContext {
        sock_path: dir.join("sock"),
        temp_dir: std::env::temp_dir(),
    });
    let root = Root::open_with_watcher(
        dir.clone(),
        settings,
        PublisherLimits::default(),
        context,
        Box::new(fake),
        rx,
        false,
    )
    .unwrap();
    Fixture {
        root,
        watcher,
        dir,
        terms: TermRegistry::with_default_terms(),
    }
}

impl Fixture {
    fn touch(&self, name: &str) {
        self.watcher.inject(vec![PendingChange {
            path: self.dir.join(name),
            exists: true,
            meta: Some(ChangeMeta {
                size: 1,
                mode: 0o100644,
                mtime: 1000,
                file_type: watchman::query::FileType::Regular,
            }),
        }]);
        self.wait_for(name);
    }

    // The worker applies batches asynchronously; wait until visible.
    fn wait_for(&self, name: &str) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !self.root.view().files_exist(&[name]) {
            assert!(Instant::now() < deadline, "change never applied: {name}");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    fn names(&self, spec: Value) -> Vec<String> {
        let query = parse_query(&self.terms, &spec, Duration::ZERO).unwrap();
        let res = execute(&query, &self.root).unwrap();
        res.results
            .iter()
            .map(|v| v.as_str().unwrap().to_string())
            .collect()
    }
}

#[test]
fn generators_and_expressions() {
    let fx = fixture();
    fx.touch("a.c");
    fx.touch("b.rs");
    fx.touch("src/c.c");
    fx.touch("src/sub/d.c");

    // All-files generator with a suffix filter.
    let names = fx.names(json!({"expression": ["suffix", "c"], "fields": ["name"]}));
    assert_eq!(names, vec!["a.c", "src/c.c", "src/sub/d.c"]);

    // dirname narrows to strict children; the depth bound prunes deeper
    // entries.
    let names = fx.names(json!({
        "expression": ["dirname", "src", ["depth", "eq", 0]],
        "fields": ["name"],
    }));
    assert_eq!(names, vec!["src/c.c"]);

    // Path generator.
    let names = fx.names(json!({"path": ["src"], "fields": ["name"]}));
    assert_eq!(names, vec!["src/c.c", "src/sub/d.c"]);

    // Glob generator.
    let names = fx.names(json!({"glob": ["src/*.c"], "fields": ["name"]}));
    assert_eq!(names, vec!["src/c.c"]);

    fx.root.stop();
}

#[test]
fn since_queries_resume_from_clock() {
    let fx = fixture();
    fx.touch("one.c");

    let query = parse_query(&fx.terms, &json!({"fields": ["name"]}), Duration::ZERO).unwrap();
    let first = execute(&query, &fx.root).unwrap();
    assert!(first.is_fresh_instance);
    let clock = first.clock_at_start_of_query;

    fx.touch("two.c");
    fx.touch("three.c");

    let spec = json!({"since": clock.to_clock_string(), "fields": ["name"]});
    let query = parse_query(&fx.terms, &spec, Duration::ZERO).unwrap();
    let second = execute(&query, &fx.root).unwrap();
    assert!(!second.is_fresh_instance);
    let names: Vec<&str> = second.results.iter().filter_map(Value::as_str).collect();
    assert_eq!(names, vec!["two.c", "three.c"]);

    // The sampled clock never runs backwards.
    assert!(second.clock_at_start_of_query.ticks >= clock.ticks);

    fx.root.stop();
}

#[test]
fn relative_root_scopes_and_strips_names() {
    let fx = fixture();
    fx.touch("src/a.c");
    fx.touch("src/deep/b.c");
    fx.touch("other/c.c");

    let names = fx.names(json!({"relative_root": "src", "fields": ["name"]}));
    assert_eq!(names, vec!["a.c", "deep/b.c"]);

    fx.root.stop();
}

#[test]
fn dedup_results_tracks_first_sight_order() {
    let fx = fixture();
    fx.touch("b.c");
    fx.touch("a.c");

    let spec = json!({"dedup_results": true, "fields": ["name"]});
    let query = parse_query(&fx.terms, &spec, Duration::ZERO).unwrap();
    let res = execute(&query, &fx.root).unwrap();
    assert_eq!(res.deduped_file_names, vec!["a.c", "b.c"]);

    fx.root.stop();
}

#[test]
fn sync_timeout_expires_without_an_observer() {
    let fx = fixture();
    fx.touch("a.c");

    // Nothing feeds the cookie back through the fake watcher, so the sync
    // cannot complete.
    let spec = json!({"fields": ["name"], "sync_timeout": 50});
    let query = parse_query(&fx.terms, &spec, Duration::ZERO).unwrap();
    let err = execute(&query, &fx.root).unwrap_err();
    assert!(matches!(err, QueryExecError::SyncTimeout(_)));

    fx.root.stop();
}

#[test]
fn deferred_enter_payload_broadcasts_when_head_advances() {
    use watchman::daemon::state::{ClientStateAssertion, ClientStateDisposition};

    let fx = fixture();
    let sub = fx.root.publisher().subscribe().unwrap();

    let first = ClientStateAssertion::new(&fx.root, "deploy".to_string());
    fx.root
        .asserted_states
        .lock()
        .unwrap()
        .queue_assertion(Arc::clone(&first))
        .unwrap();

    // The head finished its leave but has not been unlinked yet; a second
    // assertion of the same name queues behind it.
    first.set_disposition(ClientStateDisposition::Done);
    let second = ClientStateAssertion::new(&fx.root, "deploy".to_string());
    fx.root
        .asserted_states
        .lock()
        .unwrap()
        .queue_assertion(Arc::clone(&second))
        .unwrap();

    // Its cookie sync completed while it was not at the front, so its enter
    // broadcast was deferred.
    second.set_disposition(ClientStateDisposition::Asserted);
    second.set_enter_payload(json!({"state-enter": "deploy"}));
    assert_eq!(sub.drain_pending().len(), 0);

    // Unlinking the old head promotes the deferred payload, exactly once.
    fx.root.remove_assertion(&first);
    let items = sub.drain_pending();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].get("state-enter"), Some(&json!("deploy")));
    assert_eq!(sub.drain_pending().len(), 0);

    fx.root.stop();
}
