//! Core boolean and metadata terms.

use serde_json::Value;

use crate::clock::{ClockSpec, wall_now};

use super::expr::{EvaluateResult, QueryExpr, TermRegistry};
use super::{FieldSet, FileResult, FileType, QueryContext, QueryParseError};

// --- true / false ---

struct ConstExpr(bool);

impl QueryExpr for ConstExpr {
    fn evaluate(&self, _ctx: &QueryContext<'_>, _file: &dyn FileResult) -> EvaluateResult {
        self.0.into()
    }
}

fn parse_true(_reg: &TermRegistry, _term: &Value) -> Result<Box<dyn QueryExpr>, QueryParseError> {
    Ok(Box::new(ConstExpr(true)))
}

fn parse_false(_reg: &TermRegistry, _term: &Value) -> Result<Box<dyn QueryExpr>, QueryParseError> {
    Ok(Box::new(ConstExpr(false)))
}

// --- not / allof / anyof ---

struct NotExpr(Box<dyn QueryExpr>);

impl QueryExpr for NotExpr {
    fn evaluate(&self, ctx: &QueryContext<'_>, file: &dyn FileResult) -> EvaluateResult {
        match self.0.evaluate(ctx, file) {
            EvaluateResult::Match => EvaluateResult::NoMatch,
            EvaluateResult::NoMatch => EvaluateResult::Match,
            needs => needs,
        }
    }
}

fn parse_not(reg: &TermRegistry, term: &Value) -> Result<Box<dyn QueryExpr>, QueryParseError> {
    let arr = term.as_array().filter(|a| a.len() == 2).ok_or_else(|| {
        QueryParseError::new("must use [\"not\", expr]")
    })?;
    Ok(Box::new(NotExpr(reg.parse_term(&arr[1])?)))
}

struct ListExpr {
    all: bool,
    children: Vec<Box<dyn QueryExpr>>,
}

impl QueryExpr for ListExpr {
    fn evaluate(&self, ctx: &QueryContext<'_>, file: &dyn FileResult) -> EvaluateResult {
        let mut needed = FieldSet::empty();
        for child in &self.children {
            match child.evaluate(ctx, file) {
                EvaluateResult::Match if !self.all => return EvaluateResult::Match,
                EvaluateResult::NoMatch if self.all => return EvaluateResult::NoMatch,
                EvaluateResult::NeedsData(fields) => needed = needed.union(fields),
                EvaluateResult::Match | EvaluateResult::NoMatch => {}
            }
        }
        if !needed.is_empty() {
            EvaluateResult::NeedsData(needed)
        } else {
            self.all.into()
        }
    }
}

fn parse_listy(
    reg: &TermRegistry,
    term: &Value,
    which: &str,
    all: bool,
) -> Result<Box<dyn QueryExpr>, QueryParseError> {
    let arr = term.as_array().filter(|a| a.len() >= 2).ok_or_else(|| {
        QueryParseError::new(format!("must use [\"{which}\", expr...]"))
    })?;
    let children = arr[1..]
        .iter()
        .map(|t| reg.parse_term(t))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Box::new(ListExpr { all, children }))
}

fn parse_allof(reg: &TermRegistry, term: &Value) -> Result<Box<dyn QueryExpr>, QueryParseError> {
    parse_listy(reg, term, "allof", true)
}

fn parse_anyof(reg: &TermRegistry, term: &Value) -> Result<Box<dyn QueryExpr>, QueryParseError> {
    parse_listy(reg, term, "anyof", false)
}

// --- name / iname ---

#[derive(Clone, Copy, PartialEq, Eq)]
enum NameScope {
    Basename,
    Wholename,
}

struct NameExpr {
    names: Vec<String>,
    scope: NameScope,
    case_sensitive: bool,
}

fn basename(whole: &str) -> &str {
    whole
        .rsplit(|c| c == '/' || c == '\\')
        .next()
        .unwrap_or(whole)
}

impl QueryExpr for NameExpr {
    fn evaluate(&self, ctx: &QueryContext<'_>, _file: &dyn FileResult) -> EvaluateResult {
        let subject = match self.scope {
            NameScope::Wholename => ctx.whole_name(),
            NameScope::Basename => basename(ctx.whole_name()),
        };
        let matched = if self.case_sensitive {
            self.names.iter().any(|n| n == subject)
        } else {
            self.names.iter().any(|n| n.eq_ignore_ascii_case(subject))
        };
        matched.into()
    }
}

fn parse_name_term(
    term: &Value,
    which: &str,
    case_sensitive: bool,
) -> Result<Box<dyn QueryExpr>, QueryParseError> {
    let arr = term
        .as_array()
        .filter(|a| a.len() == 2 || a.len() == 3)
        .ok_or_else(|| {
            QueryParseError::new(format!("Expected 1 or 2 arguments to '{which}'"))
        })?;

    let names = match &arr[1] {
        Value::String(s) => vec![s.clone()],
        Value::Array(list) => list
            .iter()
            .map(|v| {
                v.as_str().map(str::to_string).ok_or_else(|| {
                    QueryParseError::new(format!(
                        "Argument 2 to '{which}' must be either a string or an array of string"
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()?,
        _ => {
            return Err(QueryParseError::new(format!(
                "Argument 2 to '{which}' must be either a string or an array of string"
            )));
        }
    };

    let scope = match arr.get(2) {
        None => NameScope::Basename,
        Some(Value::String(s)) if s == "basename" => NameScope::Basename,
        Some(Value::String(s)) if s == "wholename" => NameScope::Wholename,
        _ => {
            return Err(QueryParseError::new(format!(
                "Invalid scope for '{which}', must be \"basename\" or \"wholename\""
            )));
        }
    };

    Ok(Box::new(NameExpr {
        names,
        scope,
        case_sensitive,
    }))
}

fn parse_name(_reg: &TermRegistry, term: &Value) -> Result<Box<dyn QueryExpr>, QueryParseError> {
    parse_name_term(term, "name", true)
}

fn parse_iname(_reg: &TermRegistry, term: &Value) -> Result<Box<dyn QueryExpr>, QueryParseError> {
    parse_name_term(term, "iname", false)
}

// --- suffix ---

struct SuffixExpr {
    suffixes: Vec<String>,
}

impl QueryExpr for SuffixExpr {
    fn evaluate(&self, ctx: &QueryContext<'_>, _file: &dyn FileResult) -> EvaluateResult {
        let base = basename(ctx.whole_name());
        let Some((_, ext)) = base.rsplit_once('.') else {
            return EvaluateResult::NoMatch;
        };
        self.suffixes
            .iter()
            .any(|s| s.eq_ignore_ascii_case(ext))
            .into()
    }
}

fn parse_suffix(_reg: &TermRegistry, term: &Value) -> Result<Box<dyn QueryExpr>, QueryParseError> {
    let arr = term.as_array().filter(|a| a.len() == 2).ok_or_else(|| {
        QueryParseError::new("must use [\"suffix\", string | [string...]]")
    })?;
    let suffixes = match &arr[1] {
        Value::String(s) => vec![s.to_ascii_lowercase()],
        Value::Array(list) => list
            .iter()
            .map(|v| {
                v.as_str().map(str::to_ascii_lowercase).ok_or_else(|| {
                    QueryParseError::new("all suffixes must be strings")
                })
            })
            .collect::<Result<Vec<_>, _>>()?,
        _ => return Err(QueryParseError::new("must use [\"suffix\", string | [string...]]")),
    };
    Ok(Box::new(SuffixExpr { suffixes }))
}

// --- type ---

struct TypeExpr {
    wanted: FileType,
}

impl QueryExpr for TypeExpr {
    fn evaluate(&self, _ctx: &QueryContext<'_>, file: &dyn FileResult) -> EvaluateResult {
        match file.file_type() {
            Some(t) => (t == self.wanted).into(),
            None => EvaluateResult::NeedsData(FieldSet::TYPE),
        }
    }
}

fn parse_type(_reg: &TermRegistry, term: &Value) -> Result<Box<dyn QueryExpr>, QueryParseError> {
    let arr = term.as_array().filter(|a| a.len() == 2).ok_or_else(|| {
        QueryParseError::new("must use [\"type\", \"typestr\"]")
    })?;
    let s = arr[1]
        .as_str()
        .filter(|s| s.chars().count() == 1)
        .ok_or_else(|| QueryParseError::new("must use [\"type\", \"typestr\"]"))?;
    let c = s.chars().next().unwrap_or('?');
    let wanted = FileType::from_type_char(c)
        .ok_or_else(|| QueryParseError::new(format!("invalid type string '{s}'")))?;
    Ok(Box::new(TypeExpr { wanted }))
}

// --- exists / empty ---

struct ExistsExpr;

impl QueryExpr for ExistsExpr {
    fn evaluate(&self, _ctx: &QueryContext<'_>, file: &dyn FileResult) -> EvaluateResult {
        match file.exists() {
            Some(exists) => exists.into(),
            None => EvaluateResult::NeedsData(FieldSet::EXISTS),
        }
    }
}

fn parse_exists(_reg: &TermRegistry, _term: &Value) -> Result<Box<dyn QueryExpr>, QueryParseError> {
    Ok(Box::new(ExistsExpr))
}

struct EmptyExpr;

impl QueryExpr for EmptyExpr {
    fn evaluate(&self, _ctx: &QueryContext<'_>, file: &dyn FileResult) -> EvaluateResult {
        let mut needed = FieldSet::empty();
        let exists = match file.exists() {
            Some(e) => e,
            None => {
                needed = needed.union(FieldSet::EXISTS);
                false
            }
        };
        let size = match file.size() {
            Some(s) => s,
            None => {
                needed = needed.union(FieldSet::SIZE);
                0
            }
        };
        if !needed.is_empty() {
            return EvaluateResult::NeedsData(needed);
        }
        (exists && size == 0).into()
    }
}

fn parse_empty(_reg: &TermRegistry, _term: &Value) -> Result<Box<dyn QueryExpr>, QueryParseError> {
    Ok(Box::new(EmptyExpr))
}

// --- since ---

#[derive(Clone, Copy)]
enum SinceField {
    Oclock,
    Cclock,
    Mtime,
}

struct SinceExpr {
    spec: ClockSpec,
    field: SinceField,
}

impl QueryExpr for SinceExpr {
    fn evaluate(&self, _ctx: &QueryContext<'_>, file: &dyn FileResult) -> EvaluateResult {
        match self.field {
            SinceField::Oclock | SinceField::Cclock => {
                let stamp = match self.field {
                    SinceField::Oclock => file.otime(),
                    _ => file.ctime(),
                };
                let Some(stamp) = stamp else {
                    return EvaluateResult::NeedsData(match self.field {
                        SinceField::Oclock => FieldSet::OTIME,
                        _ => FieldSet::CTIME,
                    });
                };
                match self.spec {
                    ClockSpec::Clock(pos) => (stamp.ticks > pos.ticks).into(),
                    ClockSpec::Relative { seconds } => {
                        (stamp.wall_time >= wall_now() - seconds as i64).into()
                    }
                }
            }
            SinceField::Mtime => {
                let Some(mtime) = file.mtime() else {
                    return EvaluateResult::NeedsData(FieldSet::MTIME);
                };
                let threshold = match self.spec {
                    ClockSpec::Clock(pos) => pos.wall_time,
                    ClockSpec::Relative { seconds } => wall_now() - seconds as i64,
                };
                (mtime >= threshold).into()
            }
        }
    }
}

fn parse_since(_reg: &TermRegistry, term: &Value) -> Result<Box<dyn QueryExpr>, QueryParseError> {
    let arr = term
        .as_array()
        .filter(|a| a.len() == 2 || a.len() == 3)
        .ok_or_else(|| QueryParseError::new("\"since\" requires 1 or 2 arguments"))?;
    let spec = ClockSpec::parse(&arr[1])?;
    let field = match arr.get(2) {
        None => SinceField::Oclock,
        Some(Value::String(s)) if s == "oclock" => SinceField::Oclock,
        Some(Value::String(s)) if s == "cclock" => SinceField::Cclock,
        Some(Value::String(s)) if s == "mtime" => SinceField::Mtime,
        _ => {
            return Err(QueryParseError::new(
                "invalid field name for \"since\" term",
            ));
        }
    };
    Ok(Box::new(SinceExpr { spec, field }))
}

pub(super) fn register(reg: &mut TermRegistry) {
    reg.register("true", parse_true);
    reg.register("false", parse_false);
    reg.register("not", parse_not);
    reg.register("allof", parse_allof);
    reg.register("anyof", parse_anyof);
    reg.register("name", parse_name);
    reg.register("iname", parse_iname);
    reg.register("suffix", parse_suffix);
    reg.register("type", parse_type);
    reg.register("exists", parse_exists);
    reg.register("empty", parse_empty);
    reg.register("since", parse_since);
}

#[cfg(test)]
mod tests {
    use super::super::tests_support::{StubFile, empty_query, test_ctx};
    use super::*;
    use serde_json::json;

    fn eval_with(term: Value, file: &StubFile) -> EvaluateResult {
        let reg = TermRegistry::with_default_terms();
        let expr = reg.parse_term(&term).unwrap();
        let query = empty_query();
        let ctx = test_ctx(&query, &file.name.clone());
        expr.evaluate(&ctx, file)
    }

    #[test]
    fn const_terms() {
        let file = StubFile::existing("a");
        assert_eq!(eval_with(json!("true"), &file), EvaluateResult::Match);
        assert_eq!(eval_with(json!("false"), &file), EvaluateResult::NoMatch);
    }

    #[test]
    fn not_inverts() {
        let file = StubFile::existing("a");
        assert_eq!(eval_with(json!(["not", "false"]), &file), EvaluateResult::Match);
        assert_eq!(eval_with(json!(["not", "true"]), &file), EvaluateResult::NoMatch);
    }

    #[test]
    fn allof_anyof() {
        let file = StubFile::existing("a.c");
        assert_eq!(
            eval_with(json!(["allof", "true", ["suffix", "c"]]), &file),
            EvaluateResult::Match
        );
        assert_eq!(
            eval_with(json!(["allof", "false", "true"]), &file),
            EvaluateResult::NoMatch
        );
        assert_eq!(
            eval_with(json!(["anyof", "false", ["suffix", "c"]]), &file),
            EvaluateResult::Match
        );
        assert_eq!(
            eval_with(json!(["anyof", "false", "false"]), &file),
            EvaluateResult::NoMatch
        );
    }

    #[test]
    fn name_scopes() {
        let file = StubFile::existing("src/main.c");
        assert_eq!(
            eval_with(json!(["name", "main.c"]), &file),
            EvaluateResult::Match
        );
        assert_eq!(
            eval_with(json!(["name", "src/main.c", "wholename"]), &file),
            EvaluateResult::Match
        );
        assert_eq!(
            eval_with(json!(["name", "main.c", "wholename"]), &file),
            EvaluateResult::NoMatch
        );
        assert_eq!(
            eval_with(json!(["iname", "MAIN.C"]), &file),
            EvaluateResult::Match
        );
        assert_eq!(
            eval_with(json!(["name", ["other.c", "main.c"]]), &file),
            EvaluateResult::Match
        );
    }

    #[test]
    fn suffix_matches_extension() {
        let file = StubFile::existing("src/main.PHP");
        assert_eq!(eval_with(json!(["suffix", "php"]), &file), EvaluateResult::Match);
        assert_eq!(eval_with(json!(["suffix", "c"]), &file), EvaluateResult::NoMatch);
        let bare = StubFile::existing("Makefile");
        assert_eq!(eval_with(json!(["suffix", "mk"]), &bare), EvaluateResult::NoMatch);
    }

    #[test]
    fn exists_and_empty() {
        let live = StubFile::existing("a");
        let dead = StubFile::deleted("a");
        assert_eq!(eval_with(json!("exists"), &live), EvaluateResult::Match);
        assert_eq!(eval_with(json!("exists"), &dead), EvaluateResult::NoMatch);
        assert_eq!(eval_with(json!("empty"), &live), EvaluateResult::Match);
        let mut fat = StubFile::existing("a");
        fat.size = 10;
        assert_eq!(eval_with(json!("empty"), &fat), EvaluateResult::NoMatch);
    }

    #[test]
    fn lazy_file_reports_needed_fields() {
        let lazy = StubFile::lazy("a");
        match eval_with(json!("exists"), &lazy) {
            EvaluateResult::NeedsData(fields) => assert!(fields.contains(FieldSet::EXISTS)),
            other => panic!("expected NeedsData, got {other:?}"),
        }
    }

    #[test]
    fn type_term() {
        let file = StubFile::existing("a");
        assert_eq!(eval_with(json!(["type", "f"]), &file), EvaluateResult::Match);
        assert_eq!(eval_with(json!(["type", "d"]), &file), EvaluateResult::NoMatch);
        let reg = TermRegistry::with_default_terms();
        assert!(reg.parse_term(&json!(["type", "x"])).is_err());
    }

    #[test]
    fn since_by_ticks() {
        let mut file = StubFile::existing("a");
        file.otime = crate::clock::ClockPosition::new(10, 0);
        assert_eq!(
            eval_with(json!(["since", "c:0:5"]), &file),
            EvaluateResult::Match
        );
        assert_eq!(
            eval_with(json!(["since", "c:0:10"]), &file),
            EvaluateResult::NoMatch
        );
    }
}
