use polars::prelude::PolarsError;
use std::fmt;
use thiserror::Error;

use crate::hardening::ColumnType;

/// Failure to obtain a raw table from an upstream source.
#[derive(Error, Debug)]
pub enum IngestionError {
    #[error("request to {url} failed: {reason}")]
    Transport { url: String, reason: String },

    #[error("{url} answered HTTP {status}")]
    Http { url: String, status: u16 },

    #[error("could not parse payload from {source_id}: {reason}")]
    Parse { source_id: String, reason: String },

    #[error("object storage error for {location}: {reason}")]
    Storage { location: String, reason: String },

    #[error("unsupported source format: {0}")]
    UnsupportedFormat(String),

    #[error("invalid source identifier {0:?}")]
    InvalidSource(String),

    #[error("source {0} returned no rows")]
    Empty(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame construction failed: {0}")]
    Frame(#[from] PolarsError),
}

/// Structural problems a cleaner cannot degrade to a missing value.
#[derive(Error, Debug)]
pub enum CleaningError {
    #[error("{entity} table is missing required column `{column}`")]
    MissingColumn { entity: &'static str, column: String },

    #[error("invalid cleaning pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("frame operation failed: {0}")]
    Frame(#[from] PolarsError),
}

/// Errors raised by the destination store.
#[derive(Error, Debug)]
pub enum WarehouseError {
    #[error("table `{0}` does not exist")]
    TableNotFound(String),

    #[error("column `{column}` not found in table `{table}`")]
    ColumnNotFound { table: String, column: String },

    #[error("append to `{table}` rejected: expected columns {expected:?}, found {found:?}")]
    ColumnMismatch {
        table: String,
        expected: Vec<String>,
        found: Vec<String>,
    },

    #[error(
        "cannot convert `{table}.{column}` to {target}: value {value:?} at row {row} is not convertible"
    )]
    CastFailed {
        table: String,
        column: String,
        target: ColumnType,
        value: String,
        row: usize,
    },

    #[error("write to `{table}` violates constraint on `{column}`: {reason}")]
    ConstraintViolation {
        table: String,
        column: String,
        reason: String,
    },

    #[error("frame operation failed: {0}")]
    Frame(#[from] PolarsError),
}

/// The specific primary-key precondition found violated by the post-check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPrecondition {
    NullKeys(usize),
    DuplicateKeys(usize),
}

impl fmt::Display for KeyPrecondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyPrecondition::NullKeys(count) => write!(f, "{} null key value(s) remain", count),
            KeyPrecondition::DuplicateKeys(count) => {
                write!(f, "{} duplicated key value(s) remain", count)
            }
        }
    }
}

#[derive(Error, Debug)]
pub enum HardeningError {
    #[error(transparent)]
    Store(#[from] WarehouseError),

    #[error("invalid shape pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("directive #{index} ({directive}) on `{table}` failed: {source}")]
    Directive {
        table: String,
        index: usize,
        directive: String,
        #[source]
        source: Box<HardeningError>,
    },

    #[error("primary key not installed on `{table}.{column}`: {precondition}")]
    PreconditionFailed {
        table: String,
        column: String,
        precondition: KeyPrecondition,
    },

    #[error("cannot drop primary key of `{table}`: it is referenced by `{referencing}`")]
    DependentForeignKey { table: String, referencing: String },

    #[error("`{table}` has no primary key on `{column}`")]
    MissingPrimaryKey { table: String, column: String },

    #[error(
        "`{fact_table}.{column}` ({fact_type}) is incompatible with `{dimension}.{dimension_column}` ({dimension_type})"
    )]
    TypeMismatch {
        fact_table: String,
        column: String,
        fact_type: ColumnType,
        dimension: String,
        dimension_column: String,
        dimension_type: ColumnType,
    },

    #[error("cannot back-fill `{dimension}`: column `{column}` is NOT NULL")]
    StubViolatesNotNull { dimension: String, column: String },

    #[error(
        "`{fact_table}.{column}` has {count} value(s) missing from `{dimension}` (e.g. {sample:?})"
    )]
    OrphanedReferences {
        fact_table: String,
        column: String,
        dimension: String,
        count: usize,
        sample: String,
    },

    #[error("frame operation failed: {0}")]
    Frame(#[from] PolarsError),
}
