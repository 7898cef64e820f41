//! Projection of file metadata into result records.

use serde_json::{Value, json};

use super::{FieldSet, FileResult, QueryExecError};

/// Field names accepted in a query's `fields` list.
pub const KNOWN_FIELDS: &[&str] = &[
    "name", "exists", "new", "size", "mode", "mtime", "oclock", "cclock",
];

fn field_set_for(name: &str) -> FieldSet {
    match name {
        "exists" | "new" => FieldSet::EXISTS,
        "size" => FieldSet::SIZE,
        "mode" => FieldSet::MODE,
        "mtime" => FieldSet::MTIME,
        "oclock" => FieldSet::OTIME,
        "cclock" => FieldSet::CTIME,
        _ => FieldSet::empty(),
    }
}

/// Render one candidate into the query's output shape.
///
/// A single-field list projects the bare value; anything longer produces a
/// field-name → value record.
pub fn render_fields(
    field_list: &[String],
    file: &mut dyn FileResult,
    whole_name: &str,
    since_ticks: Option<u64>,
) -> Result<Value, QueryExecError> {
    let mut needed = FieldSet::empty();
    for field in field_list {
        needed = needed.union(field_set_for(field));
        if field == "new" {
            needed = needed.union(FieldSet::CTIME);
        }
    }
    if !needed.is_empty() {
        file.fetch(needed)?;
    }

    if field_list.len() == 1 {
        return render_one(&field_list[0], file, whole_name, since_ticks);
    }

    let mut record = serde_json::Map::with_capacity(field_list.len());
    for field in field_list {
        record.insert(
            field.clone(),
            render_one(field, file, whole_name, since_ticks)?,
        );
    }
    Ok(Value::Object(record))
}

fn render_one(
    field: &str,
    file: &dyn FileResult,
    whole_name: &str,
    since_ticks: Option<u64>,
) -> Result<Value, QueryExecError> {
    let value = match field {
        "name" => json!(whole_name),
        "exists" => json!(file.exists().unwrap_or(false)),
        "new" => {
            // A file is new when it appeared after the since position; on a
            // fresh instance everything is new.
            let is_new = match since_ticks {
                Some(ticks) => file.ctime().map(|c| c.ticks > ticks).unwrap_or(false),
                None => true,
            };
            json!(is_new)
        }
        "size" => json!(file.size().unwrap_or(0)),
        "mode" => json!(file.mode().unwrap_or(0)),
        "mtime" => json!(file.mtime().unwrap_or(0)),
        "oclock" => match file.otime() {
            Some(pos) => json!(pos.to_clock_string()),
            None => Value::Null,
        },
        "cclock" => match file.ctime() {
            Some(pos) => json!(pos.to_clock_string()),
            None => Value::Null,
        },
        other => {
            return Err(QueryExecError::Failed(format!(
                "unknown field name '{other}'"
            )));
        }
    };
    Ok(value)
}
