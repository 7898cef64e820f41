//! Relational comparisons used by depth and size terms.

use serde_json::Value;

use super::QueryParseError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl CompareOp {
    pub fn parse(name: &str) -> Option<CompareOp> {
        match name {
            "eq" => Some(CompareOp::Eq),
            "ne" => Some(CompareOp::Ne),
            "gt" => Some(CompareOp::Gt),
            "ge" => Some(CompareOp::Ge),
            "lt" => Some(CompareOp::Lt),
            "le" => Some(CompareOp::Le),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntCompare {
    pub op: CompareOp,
    pub operand: i64,
}

impl IntCompare {
    pub fn eval(&self, value: i64) -> bool {
        match self.op {
            CompareOp::Eq => value == self.operand,
            CompareOp::Ne => value != self.operand,
            CompareOp::Gt => value > self.operand,
            CompareOp::Ge => value >= self.operand,
            CompareOp::Lt => value < self.operand,
            CompareOp::Le => value <= self.operand,
        }
    }

    /// Parse the trailing `[<label>, cmp, k]` triple of a relational term.
    /// The caller validates the label in position 0.
    pub fn parse(term: &Value) -> Result<IntCompare, QueryParseError> {
        let arr = term
            .as_array()
            .ok_or_else(|| QueryParseError::new("relational term must be an array"))?;
        if arr.len() != 3 {
            return Err(QueryParseError::new(
                "relational term requires [field, operator, operand]",
            ));
        }
        let op_name = arr[1]
            .as_str()
            .ok_or_else(|| QueryParseError::new("relational operator must be a string"))?;
        let op = CompareOp::parse(op_name).ok_or_else(|| {
            QueryParseError::new(format!(
                "invalid relational operator '{op_name}'; allowed: eq, ne, gt, ge, lt, le"
            ))
        })?;
        let operand = arr[2]
            .as_i64()
            .ok_or_else(|| QueryParseError::new("relational operand must be an integer"))?;
        Ok(IntCompare { op, operand })
    }
}
