//! Query model: parsed queries, candidate files, and results.
//!
//! A query pairs a boolean expression tree with a generator choice and a
//! projection. Expressions are evaluated per candidate file and may report
//! that they need file metadata that has not been loaded yet; the engine
//! fetches and re-evaluates.

mod dirname;
mod eval;
mod expr;
mod fields;
mod glob;
mod intcompare;
mod parse;
mod terms;

use std::time::Duration;

use thiserror::Error;

use crate::clock::{ClockPosition, ClockSpec, ClockSpecParseError};
use crate::daemon::cookies::CookieSyncError;

pub use eval::execute;
pub use expr::{EvaluateResult, QueryExpr, TermRegistry};
pub use fields::{KNOWN_FIELDS, render_fields};
pub use parse::{parse_field_list, parse_query};

/// Parsed query, ready for repeated execution.
#[derive(Debug)]
pub struct Query {
    pub expression: Option<Box<dyn QueryExpr>>,
    pub paths: Option<Vec<PathSpec>>,
    pub globs: Option<Vec<String>>,
    pub field_list: Vec<String>,
    pub relative_root: Option<String>,
    pub since_spec: Option<ClockSpec>,
    pub dedup_results: bool,
    pub sync_timeout: Duration,
}

/// One entry of the `path` generator list: a directory name plus a depth
/// bound (negative means unlimited).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathSpec {
    pub name: String,
    pub depth: i64,
}

/// Result of one query execution.
#[derive(Debug)]
pub struct QueryResult {
    /// Per-file records, shaped by the query's field list.
    pub results: Vec<serde_json::Value>,
    /// Sampled before any generator iterated, so it is safe to use as the
    /// `since` of the next query without losing updates.
    pub clock_at_start_of_query: ClockPosition,
    /// Unique wholenames in order of first sight; populated when
    /// `dedup_results` is set.
    pub deduped_file_names: Vec<String>,
    pub is_fresh_instance: bool,
}

/// Per-evaluation state shared by all terms.
pub struct QueryContext<'a> {
    pub query: &'a Query,
    pub clock_at_start: ClockPosition,
    /// Lower tick bound resolved from the since spec; `None` for a fresh
    /// instance.
    pub since_ticks: Option<u64>,
    /// Wholename of the current candidate, relative to the query's
    /// relative root.
    pub whole_name: String,
}

impl<'a> QueryContext<'a> {
    pub fn whole_name(&self) -> &str {
        &self.whole_name
    }
}

/// Bit set naming the file metadata a term asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FieldSet(u16);

impl FieldSet {
    pub const EXISTS: FieldSet = FieldSet(1 << 0);
    pub const SIZE: FieldSet = FieldSet(1 << 1);
    pub const MODE: FieldSet = FieldSet(1 << 2);
    pub const MTIME: FieldSet = FieldSet(1 << 3);
    pub const TYPE: FieldSet = FieldSet(1 << 4);
    pub const OTIME: FieldSet = FieldSet(1 << 5);
    pub const CTIME: FieldSet = FieldSet(1 << 6);

    pub fn empty() -> FieldSet {
        FieldSet(0)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn union(self, other: FieldSet) -> FieldSet {
        FieldSet(self.0 | other.0)
    }

    pub fn contains(self, other: FieldSet) -> bool {
        self.0 & other.0 == other.0
    }
}

/// Kind of filesystem entry, as reported in the `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Regular,
    Dir,
    Symlink,
    Other,
}

impl FileType {
    pub fn type_char(self) -> char {
        match self {
            FileType::Regular => 'f',
            FileType::Dir => 'd',
            FileType::Symlink => 'l',
            FileType::Other => '?',
        }
    }

    pub fn from_type_char(c: char) -> Option<FileType> {
        match c {
            'f' => Some(FileType::Regular),
            'd' => Some(FileType::Dir),
            'l' => Some(FileType::Symlink),
            '?' => Some(FileType::Other),
            _ => None,
        }
    }
}

/// A candidate file as seen by the expression evaluator.
///
/// Accessors return `None` when the backing view has not loaded that datum;
/// the engine responds to `EvaluateResult::NeedsData` by calling `fetch`
/// and evaluating again.
pub trait FileResult {
    /// Wholename relative to the watched root.
    fn name(&self) -> &str;
    fn exists(&self) -> Option<bool>;
    fn size(&self) -> Option<u64>;
    fn mode(&self) -> Option<u32>;
    fn mtime(&self) -> Option<i64>;
    fn file_type(&self) -> Option<FileType>;
    /// Last-observed-change position.
    fn otime(&self) -> Option<ClockPosition>;
    /// First-observed position.
    fn ctime(&self) -> Option<ClockPosition>;
    /// Load the named fields so the accessors above return `Some`.
    fn fetch(&mut self, fields: FieldSet) -> Result<(), QueryExecError>;
}

#[derive(Error, Debug)]
pub enum QueryParseError {
    #[error("{0}")]
    Generic(String),
    #[error("unknown expression term '{0}'")]
    UnknownTerm(String),
    #[error(transparent)]
    Clock(#[from] ClockSpecParseError),
}

impl QueryParseError {
    pub fn new(msg: impl Into<String>) -> Self {
        QueryParseError::Generic(msg.into())
    }
}

#[derive(Error, Debug)]
pub enum QueryExecError {
    #[error("{0} not implemented")]
    GeneratorUnsupported(&'static str),
    #[error("{0}")]
    Failed(String),
    #[error(transparent)]
    SyncTimeout(#[from] QuerySyncTimeout),
    #[error("synchronization failed: {0}")]
    Sync(#[from] CookieSyncError),
}

/// The query could not observe a consistent view within its sync timeout.
#[derive(Error, Debug)]
#[error("sync_timeout expired after {timeout:?}")]
pub struct QuerySyncTimeout {
    pub timeout: Duration,
}
