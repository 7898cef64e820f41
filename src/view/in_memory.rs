//! In-memory file table fed by a watcher backend.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use globset::{GlobBuilder, GlobSetBuilder};

use crate::clock::{ClockPosition, ClockSpec, wall_now};
use crate::query::{
    FieldSet, FileResult, FileType, PathSpec, Query, QueryExecError,
};
use crate::watcher::PendingChange;

use super::QueryableView;

/// Everything the view knows about one wholename.
#[derive(Debug, Clone)]
pub struct FileState {
    pub exists: bool,
    pub size: u64,
    pub mode: u32,
    pub mtime: i64,
    pub file_type: FileType,
    /// Last observed change.
    pub otime: ClockPosition,
    /// First observed (re-)appearance.
    pub ctime: ClockPosition,
}

struct ViewState {
    ticks: u64,
    files: BTreeMap<String, FileState>,
    last_age_out_tick: u64,
    last_age_out_time: SystemTime,
}

pub struct InMemoryView {
    root_path: PathBuf,
    state: RwLock<ViewState>,
}

impl InMemoryView {
    pub fn new(root_path: PathBuf) -> Self {
        Self {
            root_path,
            state: RwLock::new(ViewState {
                ticks: 0,
                files: BTreeMap::new(),
                last_age_out_tick: 0,
                last_age_out_time: UNIX_EPOCH,
            }),
        }
    }

    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    /// Fold a batch of watcher observations into the table, advancing the
    /// tick once per observation.
    pub fn apply_changes(&self, changes: &[PendingChange]) {
        let mut state = self.state.write().expect("view lock poisoned");
        for change in changes {
            let Some(name) = self.relative_name(&change.path) else {
                continue;
            };
            if name.is_empty() {
                continue;
            }
            state.ticks += 1;
            let stamp = ClockPosition::new(state.ticks, wall_now());

            match state.files.get_mut(&name) {
                Some(entry) => {
                    if change.exists && !entry.exists {
                        // Re-created after a deletion: new birth stamp.
                        entry.ctime = stamp;
                    }
                    entry.exists = change.exists;
                    entry.otime = stamp;
                    if let Some(meta) = change.meta {
                        entry.size = meta.size;
                        entry.mode = meta.mode;
                        entry.mtime = meta.mtime;
                        entry.file_type = meta.file_type;
                    }
                }
                None => {
                    // A deletion for a file we never observed carries no
                    // queryable information.
                    if !change.exists {
                        continue;
                    }
                    let meta = change.meta.unwrap_or(crate::watcher::ChangeMeta {
                        size: 0,
                        mode: 0,
                        mtime: 0,
                        file_type: FileType::Other,
                    });
                    state.files.insert(
                        name,
                        FileState {
                            exists: true,
                            size: meta.size,
                            mode: meta.mode,
                            mtime: meta.mtime,
                            file_type: meta.file_type,
                            otime: stamp,
                            ctime: stamp,
                        },
                    );
                }
            }
        }
    }

    fn relative_name(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.root_path).ok()?;
        Some(rel.to_string_lossy().into_owned())
    }

    fn collect<F>(&self, mut want: F) -> Vec<Box<dyn FileResult + Send>>
    where
        F: FnMut(&str, &FileState) -> bool,
    {
        let state = self.state.read().expect("view lock poisoned");
        state
            .files
            .iter()
            .filter(|(name, file)| want(name, file))
            .map(|(name, file)| {
                Box::new(ViewFile {
                    name: name.clone(),
                    state: file.clone(),
                }) as Box<dyn FileResult + Send>
            })
            .collect()
    }

    #[cfg(test)]
    pub fn file_state(&self, name: &str) -> Option<FileState> {
        self.state
            .read()
            .expect("view lock poisoned")
            .files
            .get(name)
            .cloned()
    }
}

impl QueryableView for InMemoryView {
    fn time_generator(
        &self,
        query: &Query,
    ) -> Result<Vec<Box<dyn FileResult + Send>>, QueryExecError> {
        let spec = query
            .since_spec
            .ok_or_else(|| QueryExecError::Failed("time generator requires a since spec".into()))?;
        let now = wall_now();
        let mut entries = self.collect(|_, file| match spec {
            ClockSpec::Clock(pos) => file.otime.ticks > pos.ticks,
            ClockSpec::Relative { seconds } => file.otime.wall_time >= now - seconds as i64,
        });
        entries.sort_by_key(|f| f.otime().map(|p| p.ticks).unwrap_or(0));
        Ok(entries)
    }

    fn path_generator(
        &self,
        _query: &Query,
        paths: &[PathSpec],
    ) -> Result<Vec<Box<dyn FileResult + Send>>, QueryExecError> {
        Ok(self.collect(|name, _| {
            paths.iter().any(|spec| {
                if name == spec.name {
                    return true;
                }
                let Some(rest) = name
                    .strip_prefix(spec.name.as_str())
                    .and_then(|r| r.strip_prefix('/'))
                else {
                    return spec.name.is_empty()
                        && (spec.depth < 0
                            || name.matches('/').count() as i64 <= spec.depth);
                };
                spec.depth < 0 || rest.matches('/').count() as i64 <= spec.depth
            })
        }))
    }

    fn glob_generator(
        &self,
        _query: &Query,
        globs: &[String],
    ) -> Result<Vec<Box<dyn FileResult + Send>>, QueryExecError> {
        let mut builder = GlobSetBuilder::new();
        for pattern in globs {
            let glob = GlobBuilder::new(pattern)
                .literal_separator(true)
                .build()
                .map_err(|e| QueryExecError::Failed(format!("invalid glob '{pattern}': {e}")))?;
            builder.add(glob);
        }
        let set = builder
            .build()
            .map_err(|e| QueryExecError::Failed(format!("invalid glob set: {e}")))?;
        Ok(self.collect(|name, _| set.is_match(name)))
    }

    fn all_files_generator(
        &self,
        _query: &Query,
    ) -> Result<Vec<Box<dyn FileResult + Send>>, QueryExecError> {
        Ok(self.collect(|_, _| true))
    }

    fn current_clock(&self) -> ClockPosition {
        let state = self.state.read().expect("view lock poisoned");
        ClockPosition::new(state.ticks, wall_now())
    }

    fn last_age_out_tick(&self) -> u64 {
        self.state.read().expect("view lock poisoned").last_age_out_tick
    }

    fn last_age_out_timestamp(&self) -> SystemTime {
        self.state.read().expect("view lock poisoned").last_age_out_time
    }

    fn age_out(&self, min_age: Duration) {
        let mut state = self.state.write().expect("view lock poisoned");
        let cutoff = wall_now() - min_age.as_secs() as i64;
        state
            .files
            .retain(|_, file| file.exists || file.otime.wall_time > cutoff);
        state.last_age_out_tick = state.ticks;
        state.last_age_out_time = SystemTime::now();
    }

    fn files_exist(&self, names: &[&str]) -> bool {
        let state = self.state.read().expect("view lock poisoned");
        names
            .iter()
            .any(|name| state.files.get(*name).is_some_and(|f| f.exists))
    }
}

/// A loaded snapshot of one file, handed to the expression evaluator.
struct ViewFile {
    name: String,
    state: FileState,
}

impl FileResult for ViewFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn exists(&self) -> Option<bool> {
        Some(self.state.exists)
    }

    fn size(&self) -> Option<u64> {
        Some(self.state.size)
    }

    fn mode(&self) -> Option<u32> {
        Some(self.state.mode)
    }

    fn mtime(&self) -> Option<i64> {
        Some(self.state.mtime)
    }

    fn file_type(&self) -> Option<FileType> {
        Some(self.state.file_type)
    }

    fn otime(&self) -> Option<ClockPosition> {
        Some(self.state.otime)
    }

    fn ctime(&self) -> Option<ClockPosition> {
        Some(self.state.ctime)
    }

    fn fetch(&mut self, _fields: FieldSet) -> Result<(), QueryExecError> {
        Ok(())
    }
}
