use polars::prelude::*;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::{debug, info};

use crate::error::WarehouseError;
use crate::hardening::ColumnType;
use crate::processor::frame_ops::{column_names, is_missing, text_values};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    Replace,
    Append,
}

/// An installed foreign-key constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyConstraint {
    pub name: String,
    pub column: String,
    pub references_table: String,
    pub references_column: String,
}

/// Declared column types and constraints of a stored table.
/// Columns without a declared type are TEXT.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableSchema {
    pub column_types: BTreeMap<String, ColumnType>,
    pub not_null: BTreeSet<String>,
    pub primary_key: Option<String>,
    pub foreign_keys: Vec<ForeignKeyConstraint>,
}

impl TableSchema {
    pub fn column_type(&self, column: &str) -> ColumnType {
        self.column_types
            .get(column)
            .copied()
            .unwrap_or(ColumnType::Text)
    }

    /// True when the column takes part in a key constraint.
    pub fn is_key_column(&self, column: &str) -> bool {
        self.primary_key.as_deref() == Some(column)
            || self.foreign_keys.iter().any(|fk| fk.column == column)
    }
}

#[derive(Debug, Clone)]
pub struct StoredTable {
    pub frame: DataFrame,
    pub schema: TableSchema,
}

impl StoredTable {
    fn loose(frame: DataFrame) -> Self {
        StoredTable {
            frame,
            schema: TableSchema::default(),
        }
    }
}

/// Destination for cleaned tables.
pub trait LoadSink {
    /// Persists `frame` as `destination`, returning the number of rows written.
    fn write_table(
        &mut self,
        frame: &DataFrame,
        destination: &str,
        mode: WriteMode,
    ) -> Result<usize, WarehouseError>;
}

/// In-memory relational store the hardening engine operates on.
#[derive(Debug, Clone, Default)]
pub struct Warehouse {
    tables: BTreeMap<String, StoredTable>,
}

impl Warehouse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables.keys().cloned().collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    pub fn table(&self, name: &str) -> Result<&StoredTable, WarehouseError> {
        self.tables
            .get(name)
            .ok_or_else(|| WarehouseError::TableNotFound(name.to_string()))
    }

    pub fn table_mut(&mut self, name: &str) -> Result<&mut StoredTable, WarehouseError> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| WarehouseError::TableNotFound(name.to_string()))
    }

    pub fn read_table(&self, name: &str) -> Result<DataFrame, WarehouseError> {
        Ok(self.table(name)?.frame.clone())
    }

    pub fn schema(&self, name: &str) -> Result<&TableSchema, WarehouseError> {
        Ok(&self.table(name)?.schema)
    }

    /// Tables with a foreign key pointing at `name`.
    pub fn referencing_tables(&self, name: &str) -> Vec<String> {
        self.tables
            .iter()
            .filter(|(_, table)| {
                table
                    .schema
                    .foreign_keys
                    .iter()
                    .any(|fk| fk.references_table == name)
            })
            .map(|(table_name, _)| table_name.clone())
            .collect()
    }

    /// Runs `change` against one table; on error the table is restored untouched.
    pub fn atomically<T, E>(
        &mut self,
        name: &str,
        change: impl FnOnce(&mut StoredTable) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<WarehouseError>,
    {
        let table = self.table_mut(name)?;
        let snapshot = table.clone();
        match change(&mut *table) {
            Ok(value) => Ok(value),
            Err(e) => {
                *table = snapshot;
                Err(e)
            }
        }
    }

    /// Runs `change` against the whole store; on error every table is restored.
    pub fn atomically_all<T, E>(
        &mut self,
        change: impl FnOnce(&mut Warehouse) -> Result<T, E>,
    ) -> Result<T, E> {
        let snapshot = self.tables.clone();
        match change(self) {
            Ok(value) => Ok(value),
            Err(e) => {
                self.tables = snapshot;
                Err(e)
            }
        }
    }

    fn append(&mut self, frame: &DataFrame, destination: &str) -> Result<usize, WarehouseError> {
        let incoming = stringify(frame)?;
        let existing = self.table(destination)?;

        let expected = column_names(&existing.frame);
        let found = column_names(&incoming);
        let expected_set: BTreeSet<&String> = expected.iter().collect();
        let found_set: BTreeSet<&String> = found.iter().collect();
        if expected_set != found_set {
            return Err(WarehouseError::ColumnMismatch {
                table: destination.to_string(),
                expected,
                found,
            });
        }

        let schema = existing.schema.clone();
        let mut typed = Vec::with_capacity(expected.len());
        for column in &expected {
            let values = text_values(&incoming, column)?;

            if schema.not_null.contains(column) && values.iter().any(Option::is_none) {
                return Err(WarehouseError::ConstraintViolation {
                    table: destination.to_string(),
                    column: column.clone(),
                    reason: "null value in NOT NULL column".to_string(),
                });
            }

            let series = schema
                .column_type(column)
                .cast_values(destination, column, &values)?;
            typed.push(series.into_column());
        }
        let incoming = DataFrame::new(typed)?;

        if let Some(key) = &schema.primary_key {
            self.check_appended_keys(destination, key, &incoming)?;
        }
        for fk in &schema.foreign_keys {
            self.check_appended_references(destination, fk, &incoming)?;
        }

        let rows = incoming.height();
        let table = self.table_mut(destination)?;
        table.frame.vstack_mut(&incoming)?;
        debug!("Appended {} rows to {}", rows, destination);
        Ok(rows)
    }

    fn check_appended_keys(
        &self,
        destination: &str,
        key: &str,
        incoming: &DataFrame,
    ) -> Result<(), WarehouseError> {
        let current = text_values(&self.table(destination)?.frame, key)?;
        let mut seen: HashSet<String> = current.into_iter().flatten().collect();

        for value in text_values(incoming, key)? {
            let value = match value {
                Some(v) if !is_missing(Some(&v)) => v,
                _ => {
                    return Err(WarehouseError::ConstraintViolation {
                        table: destination.to_string(),
                        column: key.to_string(),
                        reason: "null primary key value".to_string(),
                    });
                }
            };
            if !seen.insert(value.clone()) {
                return Err(WarehouseError::ConstraintViolation {
                    table: destination.to_string(),
                    column: key.to_string(),
                    reason: format!("duplicate primary key value {:?}", value),
                });
            }
        }
        Ok(())
    }

    fn check_appended_references(
        &self,
        destination: &str,
        fk: &ForeignKeyConstraint,
        incoming: &DataFrame,
    ) -> Result<(), WarehouseError> {
        let dimension = self.table(&fk.references_table)?;
        let known: HashSet<String> = text_values(&dimension.frame, &fk.references_column)?
            .into_iter()
            .flatten()
            .collect();

        let orphan = text_values(incoming, &fk.column)?
            .into_iter()
            .flatten()
            .find(|value| !known.contains(value));

        match orphan {
            Some(value) => Err(WarehouseError::ConstraintViolation {
                table: destination.to_string(),
                column: fk.column.clone(),
                reason: format!(
                    "{:?} is not present in {}.{}",
                    value, fk.references_table, fk.references_column
                ),
            }),
            None => Ok(()),
        }
    }
}

impl LoadSink for Warehouse {
    fn write_table(
        &mut self,
        frame: &DataFrame,
        destination: &str,
        mode: WriteMode,
    ) -> Result<usize, WarehouseError> {
        if mode == WriteMode::Append && self.contains(destination) {
            return self.append(frame, destination);
        }

        if let Some(referencing) = self.referencing_tables(destination).first() {
            return Err(WarehouseError::ConstraintViolation {
                table: destination.to_string(),
                column: self
                    .schema(destination)?
                    .primary_key
                    .clone()
                    .unwrap_or_default(),
                reason: format!("table is referenced by {}", referencing),
            });
        }

        let loose = stringify(frame)?;
        let rows = loose.height();
        self.tables
            .insert(destination.to_string(), StoredTable::loose(loose));
        info!("Loaded {} rows into {}", rows, destination);
        Ok(rows)
    }
}

/// Renders every column as text, the way a freshly loaded table looks.
pub fn stringify(frame: &DataFrame) -> Result<DataFrame, WarehouseError> {
    let columns = column_names(frame)
        .iter()
        .map(|name| {
            let values = text_values(frame, name)?;
            Ok(Series::new(name.as_str().into(), values).into_column())
        })
        .collect::<PolarsResult<Vec<Column>>>()?;
    Ok(DataFrame::new(columns)?)
}
