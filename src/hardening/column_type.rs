use polars::prelude::*;
use std::fmt;

use crate::error::WarehouseError;
use crate::processor::dates::parse_date;

/// Column types the hardening casts can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Text,
    VarChar(u16),
    SmallInt,
    Float,
    Bool,
    Date,
    Uuid,
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::Text => write!(f, "TEXT"),
            ColumnType::VarChar(len) => write!(f, "VARCHAR({})", len),
            ColumnType::SmallInt => write!(f, "SMALLINT"),
            ColumnType::Float => write!(f, "FLOAT"),
            ColumnType::Bool => write!(f, "BOOL"),
            ColumnType::Date => write!(f, "DATE"),
            ColumnType::Uuid => write!(f, "UUID"),
        }
    }
}

impl ColumnType {
    pub fn dtype(self) -> DataType {
        match self {
            ColumnType::Text | ColumnType::VarChar(_) | ColumnType::Uuid => DataType::String,
            ColumnType::SmallInt => DataType::Int16,
            ColumnType::Float => DataType::Float64,
            ColumnType::Bool => DataType::Boolean,
            ColumnType::Date => DataType::Date,
        }
    }

    pub fn is_textual(self) -> bool {
        matches!(self, ColumnType::Text | ColumnType::VarChar(_))
    }

    /// Longest value the type admits, for string types with a bound.
    pub fn max_len(self) -> Option<usize> {
        match self {
            ColumnType::VarChar(len) => Some(len as usize),
            _ => None,
        }
    }

    /// Whether a foreign key of this type may reference a key of `other`.
    pub fn can_reference(self, other: ColumnType) -> bool {
        (self.is_textual() && other.is_textual()) || self == other
    }

    /// Converts one text cell, or `None` when the value has no representation in this type.
    pub fn convert(self, raw: &str) -> Option<Cell> {
        match self {
            ColumnType::Text => Some(Cell::Text(raw.to_string())),
            ColumnType::VarChar(len) => (raw.chars().count() <= len as usize)
                .then(|| Cell::Text(raw.to_string())),
            ColumnType::Uuid => uuid::Uuid::parse_str(raw.trim())
                .ok()
                .map(|id| Cell::Text(id.hyphenated().to_string())),
            ColumnType::SmallInt => raw.trim().parse::<i16>().ok().map(Cell::SmallInt),
            ColumnType::Float => raw
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|v| !v.is_nan())
                .map(Cell::Float),
            ColumnType::Bool => parse_bool(raw).map(Cell::Bool),
            ColumnType::Date => parse_date(raw).map(Cell::Date),
        }
    }

    /// Casts a whole column. The first value that does not convert fails the cast.
    pub fn cast_values(
        self,
        table: &str,
        column: &str,
        values: &[Option<String>],
    ) -> Result<Series, WarehouseError> {
        let mut cells = Vec::with_capacity(values.len());
        for (row, value) in values.iter().enumerate() {
            let cell = match value {
                None => None,
                Some(raw) => Some(self.convert(raw).ok_or_else(|| WarehouseError::CastFailed {
                    table: table.to_string(),
                    column: column.to_string(),
                    target: self,
                    value: raw.clone(),
                    row,
                })?),
            };
            cells.push(cell);
        }
        Ok(self.build_series(column, cells))
    }

    fn build_series(self, column: &str, cells: Vec<Option<Cell>>) -> Series {
        let name = column.into();
        match self {
            ColumnType::Text | ColumnType::VarChar(_) | ColumnType::Uuid => {
                let values: Vec<Option<String>> = cells
                    .into_iter()
                    .map(|cell| match cell {
                        Some(Cell::Text(s)) => Some(s),
                        _ => None,
                    })
                    .collect();
                Series::new(name, values)
            }
            ColumnType::SmallInt => {
                let values: Vec<Option<i16>> = cells
                    .into_iter()
                    .map(|cell| match cell {
                        Some(Cell::SmallInt(v)) => Some(v),
                        _ => None,
                    })
                    .collect();
                Series::new(name, values)
            }
            ColumnType::Float => {
                let values: Vec<Option<f64>> = cells
                    .into_iter()
                    .map(|cell| match cell {
                        Some(Cell::Float(v)) => Some(v),
                        _ => None,
                    })
                    .collect();
                Series::new(name, values)
            }
            ColumnType::Bool => {
                let values: Vec<Option<bool>> = cells
                    .into_iter()
                    .map(|cell| match cell {
                        Some(Cell::Bool(v)) => Some(v),
                        _ => None,
                    })
                    .collect();
                Series::new(name, values)
            }
            ColumnType::Date => {
                let values: Vec<Option<chrono::NaiveDate>> = cells
                    .into_iter()
                    .map(|cell| match cell {
                        Some(Cell::Date(v)) => Some(v),
                        _ => None,
                    })
                    .collect();
                Series::new(name, values)
            }
        }
    }
}

/// A single converted value.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Text(String),
    SmallInt(i16),
    Float(f64),
    Bool(bool),
    Date(chrono::NaiveDate),
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "t" | "yes" | "y" | "on" | "1" => Some(true),
        "false" | "f" | "no" | "n" | "off" | "0" => Some(false),
        _ => None,
    }
}
