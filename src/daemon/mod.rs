//! The daemon: roots, command dispatch, client sessions, triggers.

pub mod commands;
pub mod cookies;
pub mod ipc;
pub mod publisher;
pub mod registry;
pub mod root;
pub mod run;
pub mod server;
pub mod state;
pub mod trigger;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use thiserror::Error;

use crate::config::Config;
use crate::query::{QueryExecError, QueryParseError, TermRegistry};

use registry::CommandRegistry;
use root::{Root, RootError, RootSettings};
use server::ClientSession;
use state::StateError;
use trigger::TriggerError;

/// Process-wide facts threaded explicitly into roots and triggers so tests
/// can substitute their own.
pub struct DaemonContext {
    pub sock_path: PathBuf,
    pub temp_dir: PathBuf,
}

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("{0}")]
    Validation(String),
    #[error("unable to resolve root {}: directory is not watched", .0.display())]
    NotWatched(PathBuf),
    #[error(transparent)]
    QueryParse(#[from] QueryParseError),
    #[error(transparent)]
    QueryExec(#[from] QueryExecError),
    #[error(transparent)]
    Trigger(#[from] TriggerError),
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Root(#[from] RootError),
}

impl CommandError {
    pub fn validation(msg: impl Into<String>) -> Self {
        CommandError::Validation(msg.into())
    }
}

/// Everything a command handler can reach.
pub struct CommandCtx<'a> {
    pub daemon: &'a Arc<Daemon>,
    pub session: &'a mut ClientSession,
}

pub struct Daemon {
    pub config: Config,
    pub context: Arc<DaemonContext>,
    pub terms: TermRegistry,
    pub registry: CommandRegistry,
    roots: Mutex<HashMap<PathBuf, Arc<Root>>>,
    stopping: AtomicBool,
}

impl Daemon {
    pub fn new(config: Config, context: Arc<DaemonContext>) -> Arc<Self> {
        let terms = TermRegistry::with_default_terms();
        let registry = commands::build_registry(&terms);
        Arc::new(Self {
            config,
            context,
            terms,
            registry,
            roots: Mutex::new(HashMap::new()),
            stopping: AtomicBool::new(false),
        })
    }

    /// Establish (or reuse) a watch on a directory.
    pub fn watch(&self, path: &Path) -> Result<Arc<Root>, CommandError> {
        let canonical = path.canonicalize().map_err(|source| {
            CommandError::Root(RootError::Io {
                path: path.to_path_buf(),
                source,
            })
        })?;
        let mut roots = self.roots.lock().expect("roots lock poisoned");
        if let Some(root) = roots.get(&canonical) {
            return Ok(Arc::clone(root));
        }
        let root = Root::open(
            &canonical,
            RootSettings::from_config(&self.config),
            self.config.publisher,
            Arc::clone(&self.context),
        )?;
        roots.insert(canonical, Arc::clone(&root));
        Ok(root)
    }

    /// Look up an established root by path.
    pub fn resolve_root(&self, path: &str) -> Result<Arc<Root>, CommandError> {
        let canonical = Path::new(path)
            .canonicalize()
            .unwrap_or_else(|_| PathBuf::from(path));
        self.roots
            .lock()
            .expect("roots lock poisoned")
            .get(&canonical)
            .cloned()
            .ok_or(CommandError::NotWatched(canonical))
    }

    /// Drop a watch, stopping its worker and triggers. Returns whether a
    /// root was removed.
    pub fn watch_del(&self, path: &str) -> bool {
        let canonical = Path::new(path)
            .canonicalize()
            .unwrap_or_else(|_| PathBuf::from(path));
        let root = self
            .roots
            .lock()
            .expect("roots lock poisoned")
            .remove(&canonical);
        match root {
            Some(root) => {
                root.stop();
                true
            }
            None => false,
        }
    }

    pub fn watch_list(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self
            .roots
            .lock()
            .expect("roots lock poisoned")
            .keys()
            .cloned()
            .collect();
        paths.sort();
        paths
    }

    pub fn begin_shutdown(&self) {
        self.stopping.store(true, Ordering::SeqCst);
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    /// Stop every root; used on daemon shutdown.
    pub fn stop_all_roots(&self) {
        let roots: Vec<Arc<Root>> = {
            let mut map = self.roots.lock().expect("roots lock poisoned");
            map.drain().map(|(_, root)| root).collect()
        };
        for root in roots {
            root.stop();
        }
    }
}
