//! Views over a watched tree.
//!
//! A view answers queries about the files the watcher has observed. The
//! trait mirrors the generator surface of the query engine; concrete views
//! implement only the generators they support, and the defaults report the
//! rest as unsupported.

mod in_memory;

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::clock::ClockPosition;
use crate::query::{FileResult, PathSpec, Query, QueryExecError};

pub use in_memory::{FileState, InMemoryView};

/// Lock files whose presence indicates a source-control operation is
/// rewriting the tree.
const VCS_LOCK_FILES: &[&str] = &[".hg/wlock", ".git/index.lock"];

pub trait QueryableView: Send + Sync {
    /// Emit candidates changed since the query's clock spec.
    fn time_generator(
        &self,
        _query: &Query,
    ) -> Result<Vec<Box<dyn FileResult + Send>>, QueryExecError> {
        Err(QueryExecError::GeneratorUnsupported("time generator"))
    }

    /// Walk files matching the supplied set of paths.
    fn path_generator(
        &self,
        _query: &Query,
        _paths: &[PathSpec],
    ) -> Result<Vec<Box<dyn FileResult + Send>>, QueryExecError> {
        Err(QueryExecError::GeneratorUnsupported("path generator"))
    }

    fn glob_generator(
        &self,
        _query: &Query,
        _globs: &[String],
    ) -> Result<Vec<Box<dyn FileResult + Send>>, QueryExecError> {
        Err(QueryExecError::GeneratorUnsupported("glob generator"))
    }

    fn all_files_generator(
        &self,
        _query: &Query,
    ) -> Result<Vec<Box<dyn FileResult + Send>>, QueryExecError> {
        Err(QueryExecError::GeneratorUnsupported("all files generator"))
    }

    fn current_clock(&self) -> ClockPosition;

    fn current_clock_string(&self) -> String {
        self.current_clock().to_clock_string()
    }

    fn last_age_out_tick(&self) -> u64 {
        0
    }

    fn last_age_out_timestamp(&self) -> SystemTime {
        UNIX_EPOCH
    }

    fn age_out(&self, _min_age: Duration) {}

    /// True if any of the named files currently exist in the view.
    fn files_exist(&self, names: &[&str]) -> bool;

    fn is_vcs_operation_in_progress(&self) -> bool {
        self.files_exist(VCS_LOCK_FILES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BareView;

    impl QueryableView for BareView {
        fn current_clock(&self) -> ClockPosition {
            ClockPosition::new(0, 0)
        }

        fn files_exist(&self, _names: &[&str]) -> bool {
            false
        }
    }

    #[test]
    fn default_generators_are_unsupported() {
        let view = BareView;
        let query = crate::query::tests_support::empty_query();
        for result in [
            view.time_generator(&query).err(),
            view.path_generator(&query, &[]).err(),
            view.glob_generator(&query, &[]).err(),
            view.all_files_generator(&query).err(),
        ] {
            let err = result.expect("default generator should fail");
            assert!(matches!(err, QueryExecError::GeneratorUnsupported(_)));
            assert!(err.to_string().contains("not implemented"));
        }
    }

    #[test]
    fn default_age_out_state() {
        let view = BareView;
        assert_eq!(view.last_age_out_tick(), 0);
        assert_eq!(view.last_age_out_timestamp(), UNIX_EPOCH);
        view.age_out(Duration::from_secs(60));
    }
}
