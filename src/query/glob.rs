//! The `match` / `imatch` wildcard terms, backed by globset.

use globset::{GlobBuilder, GlobMatcher};
use serde_json::Value;

use super::expr::{EvaluateResult, QueryExpr, TermRegistry};
use super::{FileResult, QueryContext, QueryParseError};

struct WildMatchExpr {
    matcher: GlobMatcher,
    wholename: bool,
    include_dotfiles: bool,
}

fn basename(whole: &str) -> &str {
    whole.rsplit('/').next().unwrap_or(whole)
}

impl QueryExpr for WildMatchExpr {
    fn evaluate(&self, ctx: &QueryContext<'_>, _file: &dyn FileResult) -> EvaluateResult {
        let subject = if self.wholename {
            ctx.whole_name()
        } else {
            basename(ctx.whole_name())
        };
        if !self.include_dotfiles && basename(subject).starts_with('.') {
            return EvaluateResult::NoMatch;
        }
        self.matcher.is_match(subject).into()
    }
}

fn parse(
    term: &Value,
    which: &'static str,
    case_sensitive: bool,
) -> Result<Box<dyn QueryExpr>, QueryParseError> {
    let arr = term
        .as_array()
        .filter(|a| (2..=4).contains(&a.len()))
        .ok_or_else(|| {
            QueryParseError::new(format!("Expected array for '{which}' term"))
        })?;

    let pattern = arr[1].as_str().ok_or_else(|| {
        QueryParseError::new(format!(
            "First parameter to \"{which}\" term must be a pattern string"
        ))
    })?;

    let scope = match arr.get(2) {
        None => "basename",
        Some(Value::String(s)) => s.as_str(),
        Some(_) => {
            return Err(QueryParseError::new(format!(
                "Second parameter to \"{which}\" term must be an optional scope string"
            )));
        }
    };
    if scope != "basename" && scope != "wholename" {
        return Err(QueryParseError::new(format!(
            "Invalid scope '{scope}' for {which} expression"
        )));
    }
    let wholename = scope == "wholename";

    let mut noescape = false;
    let mut include_dotfiles = false;
    if let Some(opts) = arr.get(3) {
        let opts = opts.as_object().ok_or_else(|| {
            QueryParseError::new(format!(
                "Third parameter to \"{which}\" term must be an optional object"
            ))
        })?;
        if let Some(v) = opts.get("noescape") {
            noescape = v.as_bool().ok_or_else(|| {
                QueryParseError::new(format!(
                    "noescape option for \"{which}\" term must be a boolean"
                ))
            })?;
        }
        if let Some(v) = opts.get("includedotfiles") {
            include_dotfiles = v.as_bool().ok_or_else(|| {
                QueryParseError::new(format!(
                    "includedotfiles option for \"{which}\" term must be a boolean"
                ))
            })?;
        }
    }

    let glob = GlobBuilder::new(pattern)
        .case_insensitive(!case_sensitive)
        .literal_separator(wholename)
        .backslash_escape(!noescape)
        .build()
        .map_err(|e| QueryParseError::new(format!("invalid pattern for '{which}': {e}")))?;

    Ok(Box::new(WildMatchExpr {
        matcher: glob.compile_matcher(),
        wholename,
        include_dotfiles,
    }))
}

fn parse_match(_reg: &TermRegistry, term: &Value) -> Result<Box<dyn QueryExpr>, QueryParseError> {
    parse(term, "match", true)
}

fn parse_imatch(_reg: &TermRegistry, term: &Value) -> Result<Box<dyn QueryExpr>, QueryParseError> {
    parse(term, "imatch", false)
}

pub(super) fn register(reg: &mut TermRegistry) {
    reg.register("match", parse_match);
    reg.register("imatch", parse_imatch);
}

#[cfg(test)]
mod tests {
    use super::super::tests_support::{StubFile, empty_query, test_ctx};
    use super::*;
    use serde_json::json;

    fn eval(term: Value, whole_name: &str) -> EvaluateResult {
        let reg = TermRegistry::with_default_terms();
        let expr = reg.parse_term(&term).unwrap();
        let query = empty_query();
        let ctx = test_ctx(&query, whole_name);
        expr.evaluate(&ctx, &StubFile::existing(whole_name))
    }

    #[test]
    fn basename_scope_by_default() {
        assert_eq!(eval(json!(["match", "*.c"]), "src/main.c"), EvaluateResult::Match);
        assert_eq!(eval(json!(["match", "*.h"]), "src/main.c"), EvaluateResult::NoMatch);
    }

    #[test]
    fn wholename_scope_respects_separators() {
        assert_eq!(
            eval(json!(["match", "src/*.c", "wholename"]), "src/main.c"),
            EvaluateResult::Match
        );
        // `*` must not cross a directory boundary in wholename scope.
        assert_eq!(
            eval(json!(["match", "src/*.c", "wholename"]), "src/sub/main.c"),
            EvaluateResult::NoMatch
        );
        assert_eq!(
            eval(json!(["match", "src/**/*.c", "wholename"]), "src/sub/main.c"),
            EvaluateResult::Match
        );
    }

    #[test]
    fn imatch_folds_case() {
        assert_eq!(eval(json!(["imatch", "*.C"]), "src/main.c"), EvaluateResult::Match);
        assert_eq!(eval(json!(["match", "*.C"]), "src/main.c"), EvaluateResult::NoMatch);
    }

    #[test]
    fn dotfiles_excluded_unless_requested() {
        assert_eq!(eval(json!(["match", "*"]), ".hidden"), EvaluateResult::NoMatch);
        assert_eq!(
            eval(json!(["match", "*", "basename", {"includedotfiles": true}]), ".hidden"),
            EvaluateResult::Match
        );
    }

    #[test]
    fn parse_errors() {
        let reg = TermRegistry::with_default_terms();
        assert!(reg.parse_term(&json!(["match", 42])).is_err());
        assert!(reg.parse_term(&json!(["match", "*", "dirname"])).is_err());
        assert!(
            reg.parse_term(&json!(["match", "*", "basename", {"noescape": "yes"}]))
                .is_err()
        );
        assert!(reg.parse_term(&json!(["match", "*", "basename", {}, 5])).is_err());
    }
}
