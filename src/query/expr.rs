//! Expression trait and the term parser registry.

use std::collections::HashMap;

use serde_json::Value;

use super::{FieldSet, FileResult, QueryContext, QueryParseError};

/// Tri-valued outcome of evaluating a term against one candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvaluateResult {
    Match,
    NoMatch,
    /// The term needs metadata that has not been loaded; the engine fetches
    /// the named fields and evaluates again.
    NeedsData(FieldSet),
}

impl From<bool> for EvaluateResult {
    fn from(b: bool) -> Self {
        if b {
            EvaluateResult::Match
        } else {
            EvaluateResult::NoMatch
        }
    }
}

/// One node of a parsed expression tree.
pub trait QueryExpr: Send + Sync {
    fn evaluate(&self, ctx: &QueryContext<'_>, file: &dyn FileResult) -> EvaluateResult;
}

impl std::fmt::Debug for dyn QueryExpr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("<query expr>")
    }
}

pub type TermParser =
    fn(&TermRegistry, &Value) -> Result<Box<dyn QueryExpr>, QueryParseError>;

/// Maps term names to their parsers. Built explicitly at startup; duplicate
/// registration is a programmer error and aborts.
pub struct TermRegistry {
    parsers: HashMap<&'static str, TermParser>,
}

impl TermRegistry {
    pub fn new() -> Self {
        Self {
            parsers: HashMap::new(),
        }
    }

    pub fn register(&mut self, name: &'static str, parser: TermParser) {
        if self.parsers.insert(name, parser).is_some() {
            panic!("duplicate registration of expression term '{name}'");
        }
    }

    /// All built-in terms.
    pub fn with_default_terms() -> Self {
        let mut reg = Self::new();
        super::dirname::register(&mut reg);
        super::glob::register(&mut reg);
        super::terms::register(&mut reg);
        reg
    }

    /// Parse one term: either a bare name (`"exists"`) or an array whose
    /// first element is the term name.
    pub fn parse_term(&self, term: &Value) -> Result<Box<dyn QueryExpr>, QueryParseError> {
        let name = match term {
            Value::String(name) => name.as_str(),
            Value::Array(arr) => arr
                .first()
                .and_then(Value::as_str)
                .ok_or_else(|| QueryParseError::new("expected array with term name"))?,
            _ => {
                return Err(QueryParseError::new(
                    "expected array with term name or string",
                ));
            }
        };
        let parser = self
            .parsers
            .get(name)
            .ok_or_else(|| QueryParseError::UnknownTerm(name.to_string()))?;
        parser(self, term)
    }

    pub fn term_names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.parsers.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

impl Default for TermRegistry {
    fn default() -> Self {
        Self::with_default_terms()
    }
}
