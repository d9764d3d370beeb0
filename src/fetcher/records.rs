use polars::prelude::*;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::IngestionError;

/// Renders a JSON scalar the way the relational sources print it.
fn cell_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(i.to_string())
            } else if let Some(f) = n.as_f64() {
                if f.fract() == 0.0 && f.abs() < 1e15 {
                    Some(format!("{}", f as i64))
                } else {
                    Some(f.to_string())
                }
            } else {
                Some(n.to_string())
            }
        }
        nested => Some(nested.to_string()),
    }
}

/// `{"col": {"0": v, "1": v}, ...}`: every value is an object keyed by row position.
fn is_columnar(object: &Map<String, Value>) -> bool {
    !object.is_empty()
        && object.values().all(|column| match column {
            Value::Object(cells) => cells.keys().all(|k| k.parse::<usize>().is_ok()),
            _ => false,
        })
}

/// Collects columns in first-seen order.
fn push_column(columns: &mut Vec<String>, name: &str) {
    if !columns.iter().any(|c| c == name) {
        columns.push(name.to_string());
    }
}

fn rows_to_frame(
    columns: &[String],
    rows: &[&Map<String, Value>],
) -> Result<DataFrame, IngestionError> {
    let series: Vec<Column> = columns
        .iter()
        .map(|name| {
            let values: Vec<Option<String>> = rows
                .iter()
                .map(|row| row.get(name).and_then(cell_text))
                .collect();
            Series::new(name.as_str().into(), values).into_column()
        })
        .collect();
    Ok(DataFrame::new(series)?)
}

fn columnar_to_frame(object: &Map<String, Value>) -> Result<DataFrame, IngestionError> {
    let mut positions: Vec<usize> = object
        .values()
        .filter_map(|column| column.as_object())
        .flat_map(|cells| cells.keys().filter_map(|k| k.parse::<usize>().ok()))
        .collect();
    positions.sort_unstable();
    positions.dedup();

    let series: Vec<Column> = object
        .iter()
        .map(|(name, column)| {
            let cells = column.as_object();
            let values: Vec<Option<String>> = positions
                .iter()
                .map(|position| {
                    cells
                        .and_then(|c| c.get(&position.to_string()))
                        .and_then(cell_text)
                })
                .collect();
            Series::new(name.as_str().into(), values).into_column()
        })
        .collect();
    Ok(DataFrame::new(series)?)
}

/// Flattens a JSON payload into an all-text frame.
///
/// Accepts an array of records, a single record, or a column-oriented object.
pub fn records_to_frame(payload: &Value, source_id: &str) -> Result<DataFrame, IngestionError> {
    let frame = match payload {
        Value::Array(items) => {
            let mut columns = Vec::new();
            let mut rows = Vec::with_capacity(items.len());
            let mut skipped = 0;
            for item in items {
                match item.as_object() {
                    Some(row) => {
                        row.keys().for_each(|k| push_column(&mut columns, k));
                        rows.push(row);
                    }
                    None => skipped += 1,
                }
            }
            if skipped > 0 {
                warn!("Skipped {} non-object entries in {}", skipped, source_id);
            }
            rows_to_frame(&columns, &rows)?
        }
        Value::Object(object) if is_columnar(object) => columnar_to_frame(object)?,
        Value::Object(object) => {
            let columns: Vec<String> = object.keys().cloned().collect();
            rows_to_frame(&columns, &[object])?
        }
        other => {
            return Err(IngestionError::Parse {
                source_id: source_id.to_string(),
                reason: format!("expected records, found {}", json_kind(other)),
            });
        }
    };

    if frame.height() == 0 || frame.width() == 0 {
        return Err(IngestionError::Empty(source_id.to_string()));
    }

    debug!(
        "Flattened {} rows x {} columns from {}",
        frame.height(),
        frame.width(),
        source_id
    );
    Ok(frame)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
