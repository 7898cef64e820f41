//! Production watcher backend over the notify crate.

use std::path::PathBuf;

use crossbeam::channel::Sender;
use notify::{RecommendedWatcher, RecursiveMode, Watcher as _};

use super::{PendingChange, Watcher, WatcherError, stat_change};

pub struct NotifyWatcher {
    root: PathBuf,
    tx: Sender<Vec<PendingChange>>,
    inner: Option<RecommendedWatcher>,
}

impl NotifyWatcher {
    pub fn new(root: PathBuf, tx: Sender<Vec<PendingChange>>) -> Self {
        Self {
            root,
            tx,
            inner: None,
        }
    }
}

impl Watcher for NotifyWatcher {
    fn start(&mut self) -> Result<(), WatcherError> {
        let tx = self.tx.clone();
        let mut watcher =
            notify::recommended_watcher(move |res: Result<notify::Event, notify::Error>| {
                match res {
                    Ok(event) => {
                        let changes: Vec<PendingChange> =
                            event.paths.iter().map(|p| stat_change(p)).collect();
                        if !changes.is_empty() {
                            // Receiver gone means the root is shutting down.
                            let _ = tx.send(changes);
                        }
                    }
                    Err(err) => {
                        tracing::warn!("watcher backend error: {err}");
                    }
                }
            })?;
        watcher.watch(&self.root, RecursiveMode::Recursive)?;
        self.inner = Some(watcher);
        Ok(())
    }

    fn stop(&mut self) {
        self.inner = None;
    }
}
