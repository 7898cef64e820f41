//! Manual watcher backend for tests.

use crossbeam::channel::Sender;

use super::{PendingChange, Watcher, WatcherError};

/// A watcher that only reports what the test injects through its handle.
pub struct FakeWatcher {
    tx: Sender<Vec<PendingChange>>,
}

impl FakeWatcher {
    pub fn new(tx: Sender<Vec<PendingChange>>) -> Self {
        Self { tx }
    }

    pub fn handle(&self) -> FakeWatcherHandle {
        FakeWatcherHandle {
            tx: self.tx.clone(),
        }
    }
}

impl Watcher for FakeWatcher {
    fn start(&mut self) -> Result<(), WatcherError> {
        Ok(())
    }

    fn stop(&mut self) {}
}

#[derive(Clone)]
pub struct FakeWatcherHandle {
    tx: Sender<Vec<PendingChange>>,
}

impl FakeWatcherHandle {
    pub fn inject(&self, changes: Vec<PendingChange>) {
        let _ = self.tx.send(changes);
    }
}
