use polars::prelude::*;
use std::collections::{HashMap, HashSet};
use tracing::{info, warn};
use uuid::Uuid;

use super::ColumnType;
use crate::error::{HardeningError, KeyPrecondition, WarehouseError};
use crate::processor::frame_ops::{column_names, has_column, text_values};
use crate::storage::{ForeignKeyConstraint, Warehouse};

/// One fact-table reference to install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeySpec {
    pub column: String,
    pub references_table: String,
    pub references_column: String,
    /// Insert stub dimension rows for referenced values the dimension lacks.
    pub backfill_missing: bool,
}

impl ForeignKeySpec {
    pub fn new(column: &str, references_table: &str, references_column: &str) -> Self {
        ForeignKeySpec {
            column: column.to_string(),
            references_table: references_table.to_string(),
            references_column: references_column.to_string(),
            backfill_missing: false,
        }
    }

    pub fn backfilled(mut self) -> Self {
        self.backfill_missing = true;
        self
    }

    pub fn constraint_name(&self) -> String {
        format!("fk_{}", self.column)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimaryKeyReport {
    pub table: String,
    pub column: String,
    pub filled_nulls: usize,
    pub renamed_duplicates: usize,
    /// The key was already in place and valid; nothing changed.
    pub already_installed: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForeignKeyReport {
    pub installed: Vec<String>,
    /// Stub rows inserted per dimension table.
    pub backfilled: Vec<(String, usize)>,
}

pub(crate) fn is_null_key(value: Option<&str>) -> bool {
    match value {
        None => true,
        Some(v) => {
            let v = v.trim();
            v.is_empty() || v.eq_ignore_ascii_case("null")
        }
    }
}

/// The first violated key precondition, if any.
pub(crate) fn key_violation(values: &[Option<String>]) -> Option<KeyPrecondition> {
    let nulls = values.iter().filter(|v| is_null_key(v.as_deref())).count();
    if nulls > 0 {
        return Some(KeyPrecondition::NullKeys(nulls));
    }

    let mut counts: HashMap<&str, usize> = HashMap::new();
    for value in values.iter().flatten() {
        *counts.entry(value.as_str()).or_default() += 1;
    }
    let duplicated = counts.values().filter(|&&count| count > 1).count();
    (duplicated > 0).then_some(KeyPrecondition::DuplicateKeys(duplicated))
}

fn fresh_key(column_type: ColumnType) -> Option<String> {
    let key = Uuid::new_v4().to_string();
    match column_type {
        ColumnType::Text | ColumnType::Uuid => Some(key),
        ColumnType::VarChar(_) => column_type
            .max_len()
            .filter(|&max| key.len() <= max)
            .map(|_| key),
        _ => None,
    }
}

fn derived_key(original: &str, column_type: ColumnType) -> Option<String> {
    match column_type {
        ColumnType::Uuid => Some(Uuid::new_v4().to_string()),
        ColumnType::Text | ColumnType::VarChar(_) => {
            let suffix: String = Uuid::new_v4().simple().to_string().chars().take(8).collect();
            let key = format!("{}_{}", original, suffix);
            match column_type.max_len() {
                Some(max) if key.chars().count() > max => None,
                _ => Some(key),
            }
        }
        _ => None,
    }
}

/// Installs `column` as the primary key of `table`, repairing null and duplicate keys
/// first. The table is left untouched unless the key ends up installed.
pub fn install_primary_key(
    warehouse: &mut Warehouse,
    table: &str,
    column: &str,
) -> Result<PrimaryKeyReport, HardeningError> {
    let stored = warehouse.table(table)?;
    if !has_column(&stored.frame, column) {
        return Err(WarehouseError::ColumnNotFound {
            table: table.to_string(),
            column: column.to_string(),
        }
        .into());
    }

    if stored.schema.primary_key.as_deref() == Some(column)
        && key_violation(&text_values(&stored.frame, column)?).is_none()
    {
        info!("Primary key already set on {}({})", table, column);
        return Ok(PrimaryKeyReport {
            table: table.to_string(),
            column: column.to_string(),
            filled_nulls: 0,
            renamed_duplicates: 0,
            already_installed: true,
        });
    }

    if let Some(referencing) = warehouse.referencing_tables(table).into_iter().next() {
        return Err(HardeningError::DependentForeignKey {
            table: table.to_string(),
            referencing,
        });
    }

    warehouse.atomically(table, |stored| -> Result<PrimaryKeyReport, HardeningError> {
        stored.schema.primary_key = None;

        let column_type = stored.schema.column_type(column);
        let mut values = text_values(&stored.frame, column)?;

        let mut filled_nulls = 0;
        for value in values.iter_mut() {
            if is_null_key(value.as_deref()) {
                if let Some(key) = fresh_key(column_type) {
                    *value = Some(key);
                    filled_nulls += 1;
                }
            }
        }

        let mut renamed_duplicates = 0;
        let mut seen: HashSet<String> = HashSet::with_capacity(values.len());
        for value in values.iter_mut() {
            let Some(key) = value.clone() else { continue };
            if seen.insert(key.clone()) {
                continue;
            }
            if let Some(derived) = derived_key(&key, column_type) {
                seen.insert(derived.clone());
                *value = Some(derived);
                renamed_duplicates += 1;
            }
        }

        if let Some(precondition) = key_violation(&values) {
            warn!(
                "Cannot set primary key on {}({}): {}",
                table, column, precondition
            );
            return Err(HardeningError::PreconditionFailed {
                table: table.to_string(),
                column: column.to_string(),
                precondition,
            });
        }

        let series = column_type.cast_values(table, column, &values)?;
        stored.frame.with_column(series)?;
        stored.schema.not_null.insert(column.to_string());
        stored.schema.primary_key = Some(column.to_string());

        info!(
            "Primary key set on {}({}): {} null key(s) filled, {} duplicate(s) renamed",
            table, column, filled_nulls, renamed_duplicates
        );
        Ok(PrimaryKeyReport {
            table: table.to_string(),
            column: column.to_string(),
            filled_nulls,
            renamed_duplicates,
            already_installed: false,
        })
    })
}

/// Installs every reference of `fact_table` at once, or none of them.
pub fn install_foreign_keys(
    warehouse: &mut Warehouse,
    fact_table: &str,
    specs: &[ForeignKeySpec],
) -> Result<ForeignKeyReport, HardeningError> {
    warehouse.atomically_all(|warehouse| -> Result<ForeignKeyReport, HardeningError> {
        for spec in specs {
            check_dimension_key(warehouse, fact_table, spec)?;
        }

        let mut report = ForeignKeyReport::default();
        for spec in specs.iter().filter(|spec| spec.backfill_missing) {
            let inserted = backfill_dimension(warehouse, fact_table, spec)?;
            report
                .backfilled
                .push((spec.references_table.clone(), inserted));
        }

        for spec in specs {
            check_references(
                warehouse,
                fact_table,
                &spec.column,
                &spec.references_table,
                &spec.references_column,
            )?;
        }

        let fact = warehouse.table_mut(fact_table)?;
        for spec in specs {
            let constraint = ForeignKeyConstraint {
                name: spec.constraint_name(),
                column: spec.column.clone(),
                references_table: spec.references_table.clone(),
                references_column: spec.references_column.clone(),
            };
            fact.schema.foreign_keys.retain(|fk| fk.name != constraint.name);
            fact.schema.foreign_keys.push(constraint);
            report.installed.push(spec.constraint_name());
        }

        info!(
            "Foreign keys set on {}: {}",
            fact_table,
            report.installed.join(", ")
        );
        Ok(report)
    })
}

fn check_dimension_key(
    warehouse: &Warehouse,
    fact_table: &str,
    spec: &ForeignKeySpec,
) -> Result<(), HardeningError> {
    let fact = warehouse.table(fact_table)?;
    if !has_column(&fact.frame, &spec.column) {
        return Err(WarehouseError::ColumnNotFound {
            table: fact_table.to_string(),
            column: spec.column.clone(),
        }
        .into());
    }

    let dimension = warehouse.table(&spec.references_table)?;
    if dimension.schema.primary_key.as_deref() != Some(spec.references_column.as_str()) {
        return Err(HardeningError::MissingPrimaryKey {
            table: spec.references_table.clone(),
            column: spec.references_column.clone(),
        });
    }

    check_types(
        warehouse,
        fact_table,
        &spec.column,
        &spec.references_table,
        &spec.references_column,
    )
}

fn check_types(
    warehouse: &Warehouse,
    fact_table: &str,
    column: &str,
    dimension: &str,
    dimension_column: &str,
) -> Result<(), HardeningError> {
    let fact_type = warehouse.schema(fact_table)?.column_type(column);
    let dimension_type = warehouse.schema(dimension)?.column_type(dimension_column);

    if fact_type.can_reference(dimension_type) {
        Ok(())
    } else {
        Err(HardeningError::TypeMismatch {
            fact_table: fact_table.to_string(),
            column: column.to_string(),
            fact_type,
            dimension: dimension.to_string(),
            dimension_column: dimension_column.to_string(),
            dimension_type,
        })
    }
}

/// Referenced values missing from the dimension, in order of first appearance.
fn missing_references(
    warehouse: &Warehouse,
    fact_table: &str,
    column: &str,
    dimension: &str,
    dimension_column: &str,
) -> Result<Vec<String>, HardeningError> {
    let known: HashSet<String> =
        text_values(&warehouse.table(dimension)?.frame, dimension_column)?
            .into_iter()
            .flatten()
            .collect();

    let mut reported = HashSet::new();
    Ok(text_values(&warehouse.table(fact_table)?.frame, column)?
        .into_iter()
        .flatten()
        .filter(|value| !known.contains(value) && reported.insert(value.clone()))
        .collect())
}

fn backfill_dimension(
    warehouse: &mut Warehouse,
    fact_table: &str,
    spec: &ForeignKeySpec,
) -> Result<usize, HardeningError> {
    let missing = missing_references(
        warehouse,
        fact_table,
        &spec.column,
        &spec.references_table,
        &spec.references_column,
    )?;
    if missing.is_empty() {
        return Ok(0);
    }

    let dimension_name = spec.references_table.as_str();
    let dimension = warehouse.table_mut(dimension_name)?;
    if let Some(column) = dimension
        .schema
        .not_null
        .iter()
        .find(|column| **column != spec.references_column)
    {
        return Err(HardeningError::StubViolatesNotNull {
            dimension: dimension_name.to_string(),
            column: column.clone(),
        });
    }

    let keys: Vec<Option<String>> = missing.iter().cloned().map(Some).collect();
    let mut stub_columns = Vec::new();
    for name in column_names(&dimension.frame) {
        let series = if name == spec.references_column {
            dimension
                .schema
                .column_type(&name)
                .cast_values(dimension_name, &name, &keys)?
        } else {
            let dtype = dimension.frame.column(&name)?.dtype().clone();
            Series::full_null(name.as_str().into(), keys.len(), &dtype)
        };
        stub_columns.push(series.into_column());
    }
    let stubs = DataFrame::new(stub_columns)?;
    dimension.frame.vstack_mut(&stubs)?;

    info!(
        "Back-filled {} missing {} value(s) into {}",
        missing.len(),
        spec.references_column,
        dimension_name
    );
    Ok(missing.len())
}

fn check_references(
    warehouse: &Warehouse,
    fact_table: &str,
    column: &str,
    dimension: &str,
    dimension_column: &str,
) -> Result<(), HardeningError> {
    let orphans = missing_references(warehouse, fact_table, column, dimension, dimension_column)?;
    match orphans.first() {
        None => Ok(()),
        Some(sample) => Err(HardeningError::OrphanedReferences {
            fact_table: fact_table.to_string(),
            column: column.to_string(),
            dimension: dimension.to_string(),
            count: orphans.len(),
            sample: sample.clone(),
        }),
    }
}

/// Re-checks every constraint touching `table` after its data changed.
pub(crate) fn verify_constraints(warehouse: &Warehouse, table: &str) -> Result<(), HardeningError> {
    let stored = warehouse.table(table)?;

    for column in &stored.schema.not_null {
        if text_values(&stored.frame, column)?.iter().any(Option::is_none) {
            return Err(WarehouseError::ConstraintViolation {
                table: table.to_string(),
                column: column.clone(),
                reason: "null value in NOT NULL column".to_string(),
            }
            .into());
        }
    }

    if let Some(key) = &stored.schema.primary_key {
        if let Some(precondition) = key_violation(&text_values(&stored.frame, key)?) {
            return Err(WarehouseError::ConstraintViolation {
                table: table.to_string(),
                column: key.clone(),
                reason: precondition.to_string(),
            }
            .into());
        }
    }

    for fk in &stored.schema.foreign_keys {
        check_types(warehouse, table, &fk.column, &fk.references_table, &fk.references_column)?;
        check_references(warehouse, table, &fk.column, &fk.references_table, &fk.references_column)?;
    }

    for referencing in warehouse.referencing_tables(table) {
        let fact = warehouse.table(&referencing)?;
        for fk in fact.schema.foreign_keys.iter().filter(|fk| fk.references_table == table) {
            check_types(warehouse, &referencing, &fk.column, table, &fk.references_column)?;
            check_references(warehouse, &referencing, &fk.column, table, &fk.references_column)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{LoadSink, WriteMode};

    fn load(warehouse: &mut Warehouse, name: &str, frame: DataFrame) {
        warehouse.write_table(&frame, name, WriteMode::Replace).unwrap();
    }

    fn keys_of(warehouse: &Warehouse, table: &str, column: &str) -> Vec<Option<String>> {
        text_values(&warehouse.read_table(table).unwrap(), column).unwrap()
    }

    #[test]
    fn test_store_keys_are_repaired_then_installed() {
        let mut warehouse = Warehouse::new();
        load(
            &mut warehouse,
            "dim_store_details",
            df!("store_code" => &[None, Some("S1"), Some("S1")]).unwrap(),
        );

        let report = install_primary_key(&mut warehouse, "dim_store_details", "store_code").unwrap();
        assert_eq!(report.filled_nulls, 1);
        assert_eq!(report.renamed_duplicates, 1);

        let codes = keys_of(&warehouse, "dim_store_details", "store_code");
        assert!(Uuid::parse_str(codes[0].as_deref().unwrap()).is_ok());
        assert_eq!(codes[1].as_deref(), Some("S1"));
        let derived = codes[2].as_deref().unwrap();
        assert!(derived.starts_with("S1_"));
        assert_eq!(derived.len(), "S1_".len() + 8);

        let schema = warehouse.schema("dim_store_details").unwrap();
        assert_eq!(schema.primary_key.as_deref(), Some("store_code"));
        assert!(schema.not_null.contains("store_code"));
    }

    #[test]
    fn test_every_null_key_gets_its_own_value() {
        let mut warehouse = Warehouse::new();
        load(
            &mut warehouse,
            "dim_store_details",
            df!("store_code" => &[None, Some(" "), Some("NULL"), Some("S1")]).unwrap(),
        );

        let report = install_primary_key(&mut warehouse, "dim_store_details", "store_code").unwrap();
        assert_eq!(report.filled_nulls, 3);
        assert_eq!(report.renamed_duplicates, 0);
    }

    #[test]
    fn test_primary_key_installation_is_idempotent() {
        let mut warehouse = Warehouse::new();
        load(
            &mut warehouse,
            "dim_users",
            df!("user_uuid" => &["a", "b"]).unwrap(),
        );

        install_primary_key(&mut warehouse, "dim_users", "user_uuid").unwrap();
        let before = warehouse.read_table("dim_users").unwrap();
        let again = install_primary_key(&mut warehouse, "dim_users", "user_uuid").unwrap();

        assert!(again.already_installed);
        assert!(warehouse.read_table("dim_users").unwrap().equals_missing(&before));
    }

    #[test]
    fn test_unrepairable_duplicates_abort_without_changes() {
        let mut warehouse = Warehouse::new();
        load(
            &mut warehouse,
            "dim_card_details",
            df!("card_number" => &[Some("12"), Some("12"), None]).unwrap(),
        );
        warehouse
            .table_mut("dim_card_details")
            .unwrap()
            .schema
            .column_types
            .insert("card_number".to_string(), ColumnType::VarChar(2));

        let err = install_primary_key(&mut warehouse, "dim_card_details", "card_number").unwrap_err();
        assert!(matches!(
            err,
            HardeningError::PreconditionFailed {
                precondition: KeyPrecondition::NullKeys(1),
                ..
            }
        ));

        let schema = warehouse.schema("dim_card_details").unwrap();
        assert!(schema.primary_key.is_none());
        assert!(schema.not_null.is_empty());
        assert_eq!(
            keys_of(&warehouse, "dim_card_details", "card_number"),
            vec![Some("12".to_string()), Some("12".to_string()), None]
        );
    }

    #[test]
    fn test_duplicates_remaining_report_duplicate_precondition() {
        let mut warehouse = Warehouse::new();
        load(
            &mut warehouse,
            "orders_table",
            df!("product_quantity" => &["1", "1", "2"]).unwrap(),
        );
        {
            let table = warehouse.table_mut("orders_table").unwrap();
            let typed = ColumnType::SmallInt
                .cast_values(
                    "orders_table",
                    "product_quantity",
                    &text_values(&table.frame, "product_quantity").unwrap(),
                )
                .unwrap();
            table.frame.with_column(typed).unwrap();
            table
                .schema
                .column_types
                .insert("product_quantity".to_string(), ColumnType::SmallInt);
        }

        let err = install_primary_key(&mut warehouse, "orders_table", "product_quantity").unwrap_err();
        assert!(matches!(
            err,
            HardeningError::PreconditionFailed {
                precondition: KeyPrecondition::DuplicateKeys(1),
                ..
            }
        ));
        assert!(warehouse.schema("orders_table").unwrap().primary_key.is_none());
    }

    fn star(warehouse: &mut Warehouse) {
        load(warehouse, "dim_card_details", df!("card_number" => &["111", "222"], "expiry_date" => &["09/26", "10/27"]).unwrap());
        load(warehouse, "dim_users", df!("user_uuid" => &["u1", "u2"]).unwrap());
        load(
            warehouse,
            "orders_table",
            df!(
                "card_number" => &["111", "333", "333"],
                "user_uuid" => &["u1", "u2", "u1"]
            )
            .unwrap(),
        );
    }

    fn specs() -> Vec<ForeignKeySpec> {
        vec![
            ForeignKeySpec::new("card_number", "dim_card_details", "card_number").backfilled(),
            ForeignKeySpec::new("user_uuid", "dim_users", "user_uuid"),
        ]
    }

    #[test]
    fn test_foreign_keys_need_every_dimension_key() {
        let mut warehouse = Warehouse::new();
        star(&mut warehouse);
        install_primary_key(&mut warehouse, "dim_card_details", "card_number").unwrap();

        let err = install_foreign_keys(&mut warehouse, "orders_table", &specs()).unwrap_err();
        assert!(matches!(err, HardeningError::MissingPrimaryKey { ref table, .. } if table == "dim_users"));

        // Nothing was back-filled and no constraint exists
        assert_eq!(warehouse.read_table("dim_card_details").unwrap().height(), 2);
        assert!(warehouse.schema("orders_table").unwrap().foreign_keys.is_empty());
    }

    #[test]
    fn test_card_references_are_backfilled() {
        let mut warehouse = Warehouse::new();
        star(&mut warehouse);
        install_primary_key(&mut warehouse, "dim_card_details", "card_number").unwrap();
        install_primary_key(&mut warehouse, "dim_users", "user_uuid").unwrap();

        let report = install_foreign_keys(&mut warehouse, "orders_table", &specs()).unwrap();
        assert_eq!(report.installed, vec!["fk_card_number", "fk_user_uuid"]);
        assert_eq!(report.backfilled, vec![("dim_card_details".to_string(), 1)]);

        let cards = warehouse.read_table("dim_card_details").unwrap();
        assert_eq!(cards.height(), 3);
        assert_eq!(text_values(&cards, "expiry_date").unwrap()[2], None);

        // Re-running installs the same constraints once
        install_foreign_keys(&mut warehouse, "orders_table", &specs()).unwrap();
        assert_eq!(warehouse.schema("orders_table").unwrap().foreign_keys.len(), 2);
    }

    #[test]
    fn test_orphans_without_backfill_fail() {
        let mut warehouse = Warehouse::new();
        star(&mut warehouse);
        install_primary_key(&mut warehouse, "dim_card_details", "card_number").unwrap();
        install_primary_key(&mut warehouse, "dim_users", "user_uuid").unwrap();

        let specs = vec![ForeignKeySpec::new("card_number", "dim_card_details", "card_number")];
        let err = install_foreign_keys(&mut warehouse, "orders_table", &specs).unwrap_err();

        assert!(matches!(
            err,
            HardeningError::OrphanedReferences { count: 1, ref sample, .. } if sample == "333"
        ));
    }

    #[test]
    fn test_referenced_primary_key_cannot_be_dropped() {
        let mut warehouse = Warehouse::new();
        star(&mut warehouse);
        install_primary_key(&mut warehouse, "dim_card_details", "card_number").unwrap();
        install_primary_key(&mut warehouse, "dim_users", "user_uuid").unwrap();
        install_foreign_keys(&mut warehouse, "orders_table", &specs()).unwrap();

        assert!(matches!(
            install_primary_key(&mut warehouse, "dim_card_details", "expiry_date"),
            Err(HardeningError::DependentForeignKey { .. })
        ));
    }
}
