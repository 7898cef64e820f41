//! Cookie sync: a write-then-observe barrier.
//!
//! `sync` drops a uniquely named sentinel file into the watched root and
//! returns a handle that resolves once the watcher has observed that file
//! come back through the notification pipeline. Observing the cookie proves
//! the view has caught up to everything written before it.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crossbeam::channel::{Receiver, RecvTimeoutError, Sender, bounded};
use rand::Rng;
use thiserror::Error;

pub const COOKIE_PREFIX: &str = ".watchman-cookie-";

#[derive(Error, Debug)]
pub enum CookieSyncError {
    #[error("sync timed out after {timeout:?}")]
    Timeout { timeout: Duration },
    #[error("cookie write failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("root is shutting down")]
    Abandoned,
}

pub struct CookieSync {
    dir: PathBuf,
    serial: AtomicU64,
    pending: Mutex<HashMap<String, Vec<Sender<()>>>>,
}

impl CookieSync {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            serial: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_cookie_name(name: &str) -> bool {
        name.starts_with(COOKIE_PREFIX)
    }

    /// Write a fresh cookie and register a completion for it.
    pub fn sync(&self) -> Result<SyncHandle, CookieSyncError> {
        let serial = self.serial.fetch_add(1, Ordering::Relaxed);
        let nonce: u32 = rand::rng().random();
        let name = format!("{COOKIE_PREFIX}{}-{serial}-{nonce:08x}", std::process::id());
        let (tx, rx) = bounded(1);
        {
            let mut pending = self.pending.lock().expect("cookie lock poisoned");
            pending.entry(name.clone()).or_default().push(tx);
        }
        if let Err(err) = std::fs::write(self.dir.join(&name), b"") {
            let mut pending = self.pending.lock().expect("cookie lock poisoned");
            pending.remove(&name);
            return Err(CookieSyncError::Io(err));
        }
        Ok(SyncHandle { rx })
    }

    /// Called by the root worker when the watcher reports a root-level file.
    /// Returns true when the file was a cookie (ours or stale) and must not
    /// enter the view.
    pub fn notify_cookie(&self, file_name: &str) -> bool {
        if !Self::is_cookie_name(file_name) {
            return false;
        }
        let senders = {
            let mut pending = self.pending.lock().expect("cookie lock poisoned");
            pending.remove(file_name)
        };
        if let Some(senders) = senders {
            for sender in senders {
                let _ = sender.send(());
            }
            let _ = std::fs::remove_file(self.dir.join(file_name));
        }
        true
    }

    /// Fail every outstanding sync; waiters observe `Abandoned`.
    pub fn abandon_all(&self) {
        self.pending.lock().expect("cookie lock poisoned").clear();
    }

    #[cfg(test)]
    pub fn pending_count(&self) -> usize {
        self.pending.lock().expect("cookie lock poisoned").len()
    }
}

pub struct SyncHandle {
    rx: Receiver<()>,
}

impl SyncHandle {
    pub fn wait(self, timeout: Duration) -> Result<(), CookieSyncError> {
        match self.rx.recv_timeout(timeout) {
            Ok(()) => Ok(()),
            Err(RecvTimeoutError::Timeout) => Err(CookieSyncError::Timeout { timeout }),
            Err(RecvTimeoutError::Disconnected) => Err(CookieSyncError::Abandoned),
        }
    }
}

/// Run `continuation` on a worker thread once the sync resolves (or fails).
/// The closure owns strong references to whatever it needs; nothing is
/// borrowed from the caller.
pub fn spawn_continuation<F>(handle: SyncHandle, timeout: Duration, continuation: F)
where
    F: FnOnce(Result<(), CookieSyncError>) + Send + 'static,
{
    std::thread::Builder::new()
        .name("cookie-sync".to_string())
        .spawn(move || continuation(handle.wait(timeout)))
        .map(|_| ())
        .unwrap_or_else(|err| {
            tracing::error!("failed to spawn cookie continuation: {err}");
        });
}
