use regex::Regex;
use std::fmt;

use super::ColumnType;
use crate::error::HardeningError;

/// Value shapes checked by the sanitation and deletion directives.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueShape {
    Uuid,
    IsoDate,
    /// Unsigned number with an optional fractional part ("12", "12.5", "12.").
    Decimal,
    Digits,
    SignedDecimal,
    Pattern(String),
}

impl ValueShape {
    pub fn pattern(&self) -> &str {
        match self {
            ValueShape::Uuid => {
                r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$"
            }
            ValueShape::IsoDate => r"^\d{4}-\d{2}-\d{2}$",
            ValueShape::Decimal => r"^\d+\.?\d*$",
            ValueShape::Digits => r"^[0-9]+$",
            ValueShape::SignedDecimal => r"^-?\d+(\.\d+)?$",
            ValueShape::Pattern(pattern) => pattern.as_str(),
        }
    }

    pub fn compile(&self) -> Result<Regex, HardeningError> {
        Regex::new(self.pattern()).map_err(|e| HardeningError::InvalidPattern {
            pattern: self.pattern().to_string(),
            reason: e.to_string(),
        })
    }
}

impl fmt::Display for ValueShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueShape::Uuid => write!(f, "uuid"),
            ValueShape::IsoDate => write!(f, "iso date"),
            ValueShape::Decimal => write!(f, "decimal"),
            ValueShape::Digits => write!(f, "digits"),
            ValueShape::SignedDecimal => write!(f, "signed decimal"),
            ValueShape::Pattern(p) => write!(f, "/{}/", p),
        }
    }
}

/// One upper-exclusive band of a bucketing directive.
#[derive(Debug, Clone, PartialEq)]
pub struct Band {
    pub below: f64,
    pub label: String,
}

impl Band {
    pub fn new(below: f64, label: &str) -> Self {
        Band {
            below,
            label: label.to_string(),
        }
    }
}

/// Execution phase. A directive sequence always runs phase by phase, keeping the
/// given order within a phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Sanitize,
    Structural,
    Delete,
    Coerce,
}

/// A single atomic mutation of a persisted table.
#[derive(Debug, Clone, PartialEq)]
pub enum Directive {
    /// Nulls values equal (trimmed, case-insensitive) to a sentinel. Empty strings always count.
    NullSentinels { column: String, sentinels: Vec<String> },
    TrimWhitespace { column: String },
    NullUnlessShape { column: String, shape: ValueShape },
    /// Rewrites values laid out as `from_format` to ISO `YYYY-MM-DD`; other values are left alone.
    ReformatDates { column: String, from_format: String },
    RenameColumn { from: String, to: String },
    /// Maps categorical labels. Labels are compared lowercased with `_` read as a space;
    /// unknown labels get `default`, values already equal to a target are kept.
    MapLabels {
        column: String,
        mapping: Vec<(String, String)>,
        default: String,
    },
    /// Derives a label column from a numeric one. Missing numbers give a missing label.
    Bucketize {
        source: String,
        target: String,
        bands: Vec<Band>,
        overflow: String,
    },
    /// Deletes rows whose value fails the shape. Missing values are kept.
    DeleteUnlessShape { column: String, shape: ValueShape },
    /// Deletes rows whose value has no representation in `to`. Missing values are kept.
    DeleteUnconvertible { column: String, to: ColumnType },
    Cast { column: String, to: ColumnType },
}

impl Directive {
    pub fn null_sentinels(column: &str, sentinels: &[&str]) -> Self {
        Directive::NullSentinels {
            column: column.to_string(),
            sentinels: sentinels.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn trim(column: &str) -> Self {
        Directive::TrimWhitespace {
            column: column.to_string(),
        }
    }

    pub fn null_unless(column: &str, shape: ValueShape) -> Self {
        Directive::NullUnlessShape {
            column: column.to_string(),
            shape,
        }
    }

    pub fn reformat_dates(column: &str, from_format: &str) -> Self {
        Directive::ReformatDates {
            column: column.to_string(),
            from_format: from_format.to_string(),
        }
    }

    pub fn rename(from: &str, to: &str) -> Self {
        Directive::RenameColumn {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    pub fn map_labels(column: &str, mapping: &[(&str, &str)], default: &str) -> Self {
        Directive::MapLabels {
            column: column.to_string(),
            mapping: mapping
                .iter()
                .map(|(from, to)| (from.to_string(), to.to_string()))
                .collect(),
            default: default.to_string(),
        }
    }

    pub fn bucketize(source: &str, target: &str, bands: Vec<Band>, overflow: &str) -> Self {
        Directive::Bucketize {
            source: source.to_string(),
            target: target.to_string(),
            bands,
            overflow: overflow.to_string(),
        }
    }

    pub fn delete_unless(column: &str, shape: ValueShape) -> Self {
        Directive::DeleteUnlessShape {
            column: column.to_string(),
            shape,
        }
    }

    pub fn delete_unconvertible(column: &str, to: ColumnType) -> Self {
        Directive::DeleteUnconvertible {
            column: column.to_string(),
            to,
        }
    }

    pub fn cast(column: &str, to: ColumnType) -> Self {
        Directive::Cast {
            column: column.to_string(),
            to,
        }
    }

    pub fn phase(&self) -> Phase {
        match self {
            Directive::NullSentinels { .. }
            | Directive::TrimWhitespace { .. }
            | Directive::NullUnlessShape { .. }
            | Directive::ReformatDates { .. } => Phase::Sanitize,
            Directive::RenameColumn { .. }
            | Directive::MapLabels { .. }
            | Directive::Bucketize { .. } => Phase::Structural,
            Directive::DeleteUnlessShape { .. } | Directive::DeleteUnconvertible { .. } => {
                Phase::Delete
            }
            Directive::Cast { .. } => Phase::Coerce,
        }
    }

    /// The column whose values the directive changes.
    pub fn target_column(&self) -> &str {
        match self {
            Directive::NullSentinels { column, .. }
            | Directive::TrimWhitespace { column }
            | Directive::NullUnlessShape { column, .. }
            | Directive::ReformatDates { column, .. }
            | Directive::MapLabels { column, .. }
            | Directive::DeleteUnlessShape { column, .. }
            | Directive::DeleteUnconvertible { column, .. }
            | Directive::Cast { column, .. } => column,
            Directive::RenameColumn { to, .. } => to,
            Directive::Bucketize { target, .. } => target,
        }
    }
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Directive::NullSentinels { column, sentinels } => {
                write!(f, "null {:?} in {}", sentinels, column)
            }
            Directive::TrimWhitespace { column } => write!(f, "trim {}", column),
            Directive::NullUnlessShape { column, shape } => {
                write!(f, "null {} values that are not {}", column, shape)
            }
            Directive::ReformatDates {
                column,
                from_format,
            } => write!(f, "reformat {} dates from {}", column, from_format),
            Directive::RenameColumn { from, to } => write!(f, "rename {} to {}", from, to),
            Directive::MapLabels { column, .. } => write!(f, "map labels of {}", column),
            Directive::Bucketize { source, target, .. } => {
                write!(f, "bucketize {} into {}", source, target)
            }
            Directive::DeleteUnlessShape { column, shape } => {
                write!(f, "delete rows whose {} is not {}", column, shape)
            }
            Directive::DeleteUnconvertible { column, to } => {
                write!(f, "delete rows whose {} is not a valid {}", column, to)
            }
            Directive::Cast { column, to } => write!(f, "cast {} to {}", column, to),
        }
    }
}

/// Orders a directive sequence by phase, keeping each directive's position in the
/// caller's sequence.
pub fn in_phase_order(directives: &[Directive]) -> Vec<(usize, &Directive)> {
    let mut ordered: Vec<(usize, &Directive)> = directives.iter().enumerate().collect();
    ordered.sort_by_key(|(_, directive)| directive.phase());
    ordered
}
