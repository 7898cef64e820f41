//! Shared scaffolding for the socket-level integration tests.
//!
//! Each test file runs in its own process, starts one daemon, and talks to
//! it over the real Unix socket.

#![allow(dead_code)]

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde_json::{Value, json};

pub struct TestDaemon {
    pub sock: PathBuf,
    _runtime: tempfile::TempDir,
    thread: Option<std::thread::JoinHandle<()>>,
}

/// Start a daemon with a private runtime dir and a fast settle period.
/// Must be called before any other threads exist in the test process.
pub fn start_daemon() -> TestDaemon {
    let runtime = tempfile::tempdir().unwrap();
    // SAFETY: the test process is single-threaded at this point.
    unsafe {
        std::env::set_var("WATCHMAN_RUNTIME_DIR", runtime.path());
    }

    let mut config = watchman::config::Config::default();
    config.settle_ms = 20;
    config.default_sync_timeout_ms = 5_000;

    let thread = std::thread::spawn(move || {
        let _ = watchman::daemon::run::run_daemon(config);
    });

    let sock = runtime.path().join("daemon.sock");
    let deadline = Instant::now() + Duration::from_secs(10);
    while !sock.exists() {
        assert!(Instant::now() < deadline, "daemon did not start");
        std::thread::sleep(Duration::from_millis(10));
    }

    TestDaemon {
        sock,
        _runtime: runtime,
        thread: Some(thread),
    }
}

impl TestDaemon {
    pub fn connect(&self) -> TestClient {
        TestClient::connect(&self.sock)
    }

    pub fn shutdown(mut self) {
        let mut client = self.connect();
        let resp = client.request(json!(["shutdown-server"]));
        assert_eq!(resp.get("shutdown-server"), Some(&json!(true)));
        if let Some(thread) = self.thread.take() {
            thread.join().unwrap();
        }
    }
}

pub struct TestClient {
    writer: UnixStream,
    reader: BufReader<UnixStream>,
}

impl TestClient {
    pub fn connect(sock: &Path) -> Self {
        let stream = UnixStream::connect(sock).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(10)))
            .unwrap();
        Self {
            reader: BufReader::new(stream.try_clone().unwrap()),
            writer: stream,
        }
    }

    pub fn send(&mut self, args: Value) {
        writeln!(self.writer, "{args}").unwrap();
        self.writer.flush().unwrap();
    }

    pub fn recv(&mut self) -> Value {
        let mut line = String::new();
        let n = self.reader.read_line(&mut line).unwrap();
        assert!(n > 0, "daemon closed the connection");
        serde_json::from_str(&line).unwrap()
    }

    pub fn request(&mut self, args: Value) -> Value {
        self.send(args);
        self.recv()
    }

    /// Read PDUs (skipping unrelated ones) until the predicate matches.
    pub fn recv_until(&mut self, pred: impl Fn(&Value) -> bool) -> Value {
        loop {
            let value = self.recv();
            if pred(&value) {
                return value;
            }
        }
    }
}

/// Poll until the file exists and its contents satisfy the predicate.
pub fn wait_for_file(path: &Path, pred: impl Fn(&str) -> bool) -> String {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        if let Ok(contents) = std::fs::read_to_string(path)
            && pred(&contents)
        {
            return contents;
        }
        assert!(
            Instant::now() < deadline,
            "timed out waiting for {}",
            path.display()
        );
        std::thread::sleep(Duration::from_millis(25));
    }
}
