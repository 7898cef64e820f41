//! The `dirname` / `idirname` terms: match files under a directory, with an
//! optional relational depth constraint.

use serde_json::Value;

use super::expr::{EvaluateResult, QueryExpr, TermRegistry};
use super::intcompare::{CompareOp, IntCompare};
use super::{FileResult, QueryContext, QueryParseError};

fn is_dir_sep(c: u8) -> bool {
    c == b'/' || c == b'\\'
}

struct DirNameExpr {
    dirname: String,
    depth: IntCompare,
    case_sensitive: bool,
}

impl DirNameExpr {
    fn starts_with(&self, name: &str) -> bool {
        if self.case_sensitive {
            name.starts_with(&self.dirname)
        } else {
            name.len() >= self.dirname.len()
                && name.as_bytes()[..self.dirname.len()]
                    .eq_ignore_ascii_case(self.dirname.as_bytes())
        }
    }
}

impl QueryExpr for DirNameExpr {
    fn evaluate(&self, ctx: &QueryContext<'_>, _file: &dyn FileResult) -> EvaluateResult {
        let name = ctx.whole_name();

        if name.len() <= self.dirname.len() {
            // Either it doesn't prefix match, or the file name equals the
            // operand. A dirname only matches strict children, so the
            // wholename must be longer than the operand.
            return EvaluateResult::NoMatch;
        }

        // The wholename must be a child of dirname, so expect a separator
        // right after the prefix. dirname == "" (the root) has no separator
        // in position 0.
        if !self.dirname.is_empty() && !is_dir_sep(name.as_bytes()[self.dirname.len()]) {
            // Common prefix, but not a child of dirname.
            return EvaluateResult::NoMatch;
        }

        if !self.starts_with(name) {
            return EvaluateResult::NoMatch;
        }

        // Depth of the file below dirname, counted in directory separators
        // not including the one checked above.
        let start = if self.dirname.is_empty() {
            0
        } else {
            self.dirname.len() + 1
        };
        let actual_depth = name.as_bytes()[start..]
            .iter()
            .filter(|&&c| is_dir_sep(c))
            .count() as i64;

        self.depth.eval(actual_depth).into()
    }
}

fn parse(
    term: &Value,
    which: &'static str,
    case_sensitive: bool,
) -> Result<Box<dyn QueryExpr>, QueryParseError> {
    let arr = term
        .as_array()
        .ok_or_else(|| QueryParseError::new(format!("Expected array for '{which}' term")))?;

    if arr.len() < 2 || arr.len() > 3 {
        return Err(QueryParseError::new(format!(
            "Invalid number of arguments for '{which}' term"
        )));
    }

    let dirname = arr[1]
        .as_str()
        .ok_or_else(|| {
            QueryParseError::new(format!("Argument 2 to '{which}' must be a string"))
        })?
        .to_string();

    let depth = if arr.len() == 3 {
        let depth_term = &arr[2];
        if !depth_term.is_array() {
            return Err(QueryParseError::new(format!(
                "Invalid number of arguments for '{which}' term"
            )));
        }
        let cmp = IntCompare::parse(depth_term)?;
        let label = depth_term
            .as_array()
            .and_then(|a| a.first())
            .and_then(Value::as_str);
        if label != Some("depth") {
            return Err(QueryParseError::new(format!(
                "Third parameter to '{which}' should be a relational depth term"
            )));
        }
        cmp
    } else {
        // ["dirname", "foo"] -> ["dirname", "foo", ["depth", "ge", 0]]
        IntCompare {
            op: CompareOp::Ge,
            operand: 0,
        }
    };

    Ok(Box::new(DirNameExpr {
        dirname,
        depth,
        case_sensitive,
    }))
}

fn parse_dirname(
    _reg: &TermRegistry,
    term: &Value,
) -> Result<Box<dyn QueryExpr>, QueryParseError> {
    parse(term, "dirname", true)
}

fn parse_idirname(
    _reg: &TermRegistry,
    term: &Value,
) -> Result<Box<dyn QueryExpr>, QueryParseError> {
    parse(term, "idirname", false)
}

pub(super) fn register(reg: &mut TermRegistry) {
    reg.register("dirname", parse_dirname);
    reg.register("idirname", parse_idirname);
}
