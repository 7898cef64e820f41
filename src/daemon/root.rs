//! A watched root: view, cookies, publisher, state FIFO, triggers.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam::channel::{Receiver, Sender, bounded, never, unbounded};
use serde_json::json;
use thiserror::Error;

use crate::config::{Config, PublisherLimits};
use crate::daemon::DaemonContext;
use crate::daemon::cookies::CookieSync;
use crate::daemon::publisher::UnilateralPublisher;
use crate::daemon::state::{AssertedStates, ClientStateAssertion, ClientStateDisposition};
use crate::daemon::trigger::TriggerCommand;
use crate::view::{InMemoryView, QueryableView};
use crate::watcher::{NotifyWatcher, PendingChange, Watcher, WatcherError, scan_tree};

#[derive(Debug, Clone, Copy)]
pub struct RootSettings {
    pub settle: Duration,
    pub default_sync_timeout: Duration,
    /// Age out stale deleted entries this long after their last change;
    /// `None` disables the sweep.
    pub age_out: Option<Duration>,
}

impl RootSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            settle: config.settle_period(),
            default_sync_timeout: config.default_sync_timeout(),
            age_out: (config.age_out_secs > 0)
                .then(|| Duration::from_secs(config.age_out_secs)),
        }
    }
}

#[derive(Error, Debug)]
pub enum RootError {
    #[error("unable to watch {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("{} is not a directory", .0.display())]
    NotADirectory(PathBuf),
    #[error(transparent)]
    Watcher(#[from] WatcherError),
}

pub struct Root {
    path: PathBuf,
    view: Arc<InMemoryView>,
    cookies: Arc<CookieSync>,
    unilateral: UnilateralPublisher,
    pub asserted_states: Mutex<AssertedStates>,
    pub triggers: Mutex<HashMap<String, Arc<TriggerCommand>>>,
    state_trans_count: AtomicU64,
    settings: RootSettings,
    context: Arc<DaemonContext>,
    stopping: Arc<AtomicBool>,
    stop_tx: Sender<()>,
    worker: Mutex<Option<JoinHandle<()>>>,
    watcher: Mutex<Option<Box<dyn Watcher>>>,
}

impl Root {
    /// Watch a directory with the production notification backend, seeding
    /// the view with an initial crawl.
    pub fn open(
        path: &Path,
        settings: RootSettings,
        limits: PublisherLimits,
        context: Arc<DaemonContext>,
    ) -> Result<Arc<Root>, RootError> {
        let path = path.canonicalize().map_err(|source| RootError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if !path.is_dir() {
            return Err(RootError::NotADirectory(path));
        }
        let (event_tx, event_rx) = unbounded();
        let watcher = Box::new(NotifyWatcher::new(path.clone(), event_tx));
        Self::open_with_watcher(path, settings, limits, context, watcher, event_rx, true)
    }

    /// Watch with an explicit backend. Tests substitute a fake watcher here.
    pub fn open_with_watcher(
        path: PathBuf,
        settings: RootSettings,
        limits: PublisherLimits,
        context: Arc<DaemonContext>,
        mut watcher: Box<dyn Watcher>,
        event_rx: Receiver<Vec<PendingChange>>,
        crawl: bool,
    ) -> Result<Arc<Root>, RootError> {
        let view = Arc::new(InMemoryView::new(path.clone()));
        // Watch before crawling: a change that lands mid-crawl is then
        // observed twice rather than not at all.
        watcher.start()?;
        if crawl {
            let seed = scan_tree(&path).map_err(|source| RootError::Io {
                path: path.clone(),
                source,
            })?;
            view.apply_changes(&seed);
        }

        let cookies = Arc::new(CookieSync::new(path.clone()));
        let unilateral = UnilateralPublisher::new(limits);
        let (stop_tx, stop_rx) = bounded(1);

        let worker = {
            let path = path.clone();
            let spawn_err_path = path.clone();
            let view = Arc::clone(&view);
            let cookies = Arc::clone(&cookies);
            let publisher = unilateral.clone();
            std::thread::Builder::new()
                .name(format!("root {}", path.display()))
                .spawn(move || {
                    run_worker(&path, &view, &cookies, &publisher, settings, event_rx, stop_rx)
                })
                .map_err(|source| RootError::Io {
                    path: spawn_err_path,
                    source,
                })?
        };

        Ok(Arc::new(Root {
            path,
            view,
            cookies,
            unilateral,
            asserted_states: Mutex::new(AssertedStates::default()),
            triggers: Mutex::new(HashMap::new()),
            state_trans_count: AtomicU64::new(0),
            settings,
            context,
            stopping: Arc::new(AtomicBool::new(false)),
            stop_tx,
            worker: Mutex::new(Some(worker)),
            watcher: Mutex::new(Some(watcher)),
        }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn view(&self) -> &InMemoryView {
        &self.view
    }

    pub fn cookies(&self) -> &CookieSync {
        &self.cookies
    }

    pub fn publisher(&self) -> &UnilateralPublisher {
        &self.unilateral
    }

    pub fn context(&self) -> &Arc<DaemonContext> {
        &self.context
    }

    pub fn default_sync_timeout(&self) -> Duration {
        self.settings.default_sync_timeout
    }

    pub fn state_trans_count(&self) -> u64 {
        self.state_trans_count.load(Ordering::Relaxed)
    }

    pub fn bump_state_trans_count(&self) {
        self.state_trans_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Unlink an assertion from the FIFO. If that promotes an `Asserted`
    /// entry with a deferred enter payload to the head, broadcast it now,
    /// still under the asserted-states lock.
    pub fn remove_assertion(&self, assertion: &Arc<ClientStateAssertion>) {
        let mut states = self.asserted_states.lock().expect("asserted states lock");
        let new_front = states.remove_assertion(assertion);
        self.bump_state_trans_count();
        if let Some(front) = new_front
            && front.disposition() == ClientStateDisposition::Asserted
            && let Some(payload) = front.take_enter_payload()
        {
            self.unilateral.publish(payload);
        }
    }

    /// Stop the worker, the watcher, and every trigger. Idempotent.
    pub fn stop(&self) {
        if self.stopping.swap(true, Ordering::SeqCst) {
            return;
        }
        let triggers: Vec<Arc<TriggerCommand>> = {
            let mut map = self.triggers.lock().expect("triggers lock");
            map.drain().map(|(_, cmd)| cmd).collect()
        };
        for trigger in triggers {
            trigger.stop();
        }
        let _ = self.stop_tx.send(());
        if let Some(worker) = self.worker.lock().expect("worker lock").take() {
            let _ = worker.join();
        }
        if let Some(mut watcher) = self.watcher.lock().expect("watcher lock").take() {
            watcher.stop();
        }
        self.cookies.abandon_all();
    }
}

fn run_worker(
    path: &Path,
    view: &InMemoryView,
    cookies: &CookieSync,
    publisher: &UnilateralPublisher,
    settings: RootSettings,
    event_rx: Receiver<Vec<PendingChange>>,
    stop_rx: Receiver<()>,
) {
    let settle = settings.settle;
    let mut settle_deadline: Option<Instant> = None;

    loop {
        let tick = match settle_deadline {
            Some(deadline) => {
                crossbeam::channel::after(deadline.saturating_duration_since(Instant::now()))
            }
            None => never(),
        };

        crossbeam::select! {
            recv(stop_rx) -> _ => break,

            recv(event_rx) -> msg => {
                let Ok(batch) = msg else { break };
                let changes: Vec<PendingChange> = batch
                    .into_iter()
                    .filter(|change| !absorb_cookie(path, cookies, change))
                    .collect();
                if !changes.is_empty() {
                    view.apply_changes(&changes);
                    settle_deadline = Some(Instant::now() + settle);
                }
            }

            recv(tick) -> _ => {
                settle_deadline = None;
                tracing::debug!(root = %path.display(), "settled");
                publisher.publish(json!({
                    "root": path.to_string_lossy(),
                    "settled": true,
                }));
                if let Some(min_age) = settings.age_out {
                    view.age_out(min_age);
                }
            }
        }
    }
}

/// Cookie files complete pending syncs and never enter the view.
fn absorb_cookie(root: &Path, cookies: &CookieSync, change: &PendingChange) -> bool {
    let Ok(rel) = change.path.strip_prefix(root) else {
        return false;
    };
    if rel.components().count() != 1 {
        return false;
    }
    let name = rel.to_string_lossy();
    if !CookieSync::is_cookie_name(&name) {
        return false;
    }
    if change.exists {
        cookies.notify_cookie(&name);
    }
    true
}

#[cfg(test)]
pub(crate) mod tests_support {
    use super::*;
    use crate::watcher::{FakeWatcher, FakeWatcherHandle};

    pub struct TestRootHandle {
        pub root: Arc<Root>,
        pub watcher: FakeWatcherHandle,
        pub dir: PathBuf,
    }

    /// A root over a throwaway directory with a manually driven watcher and
    /// a short settle period.
    pub fn fake_root() -> TestRootHandle {
        let dir = tempfile::tempdir().unwrap().keep();
        let (tx, rx) = unbounded();
        let fake = FakeWatcher::new(tx);
        let handle = fake.handle();
        let settings = RootSettings {
            settle: Duration::from_millis(20),
            default_sync_timeout: Duration::from_secs(5),
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
        TestRootHandle {
            root,
            watcher: handle,
            dir,
        }
    }

    pub fn test_root() -> Arc<Root> {
        fake_root().root
    }
}
