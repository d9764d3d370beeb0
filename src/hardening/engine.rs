use chrono::NaiveDate;
use std::collections::HashSet;
use tracing::{debug, info};

use super::directive::{in_phase_order, Band, Directive};
use super::keys::verify_constraints;
use crate::error::{HardeningError, WarehouseError};
use crate::processor::frame_ops::{has_column, retain_rows, text_values};
use crate::storage::{StoredTable, Warehouse};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectiveOutcome {
    /// Position of the directive in the sequence it was given in.
    pub index: usize,
    pub directive: String,
    pub affected_rows: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HardeningReport {
    pub table: String,
    pub outcomes: Vec<DirectiveOutcome>,
}

impl HardeningReport {
    pub fn affected_rows(&self) -> usize {
        self.outcomes.iter().map(|o| o.affected_rows).sum()
    }
}

/// Applies `directives` to `table` in phase order. Each directive commits on its own;
/// the first failure stops the sequence and leaves earlier directives applied.
pub fn harden_schema(
    warehouse: &mut Warehouse,
    table: &str,
    directives: &[Directive],
) -> Result<HardeningReport, HardeningError> {
    warehouse.table(table)?;

    let mut outcomes = Vec::with_capacity(directives.len());
    for (index, directive) in in_phase_order(directives) {
        let affected_rows = warehouse
            .atomically_all(|warehouse| -> Result<usize, HardeningError> {
                let affected = apply(warehouse.table_mut(table)?, table, directive)?;
                verify_constraints(warehouse, table)?;
                Ok(affected)
            })
            .map_err(|source| HardeningError::Directive {
                table: table.to_string(),
                index,
                directive: directive.to_string(),
                source: Box::new(source),
            })?;

        debug!("{} on {}: {} row(s) affected", directive, table, affected_rows);
        outcomes.push(DirectiveOutcome {
            index,
            directive: directive.to_string(),
            affected_rows,
        });
    }

    let report = HardeningReport {
        table: table.to_string(),
        outcomes,
    };
    info!(
        "Hardened {}: {} directive(s), {} row change(s)",
        table,
        report.outcomes.len(),
        report.affected_rows()
    );
    Ok(report)
}

fn apply(
    stored: &mut StoredTable,
    table: &str,
    directive: &Directive,
) -> Result<usize, HardeningError> {
    match directive {
        Directive::NullSentinels { column, sentinels } => {
            let sentinels: HashSet<String> =
                sentinels.iter().map(|s| s.trim().to_lowercase()).collect();
            rewrite(stored, table, column, |value| {
                value.filter(|v| {
                    let v = v.trim().to_lowercase();
                    !v.is_empty() && !sentinels.contains(&v)
                })
                .map(str::to_string)
            })
        }
        Directive::TrimWhitespace { column } => {
            rewrite(stored, table, column, |value| value.map(|v| v.trim().to_string()))
        }
        Directive::NullUnlessShape { column, shape } => {
            let shape = shape.compile()?;
            rewrite(stored, table, column, |value| {
                value.filter(|v| shape.is_match(v)).map(str::to_string)
            })
        }
        Directive::ReformatDates {
            column,
            from_format,
        } => rewrite(stored, table, column, |value| {
            value.map(|v| match NaiveDate::parse_from_str(v.trim(), from_format) {
                Ok(date) => date.format("%Y-%m-%d").to_string(),
                Err(_) => v.to_string(),
            })
        }),
        Directive::RenameColumn { from, to } => rename_column(stored, table, from, to),
        Directive::MapLabels {
            column,
            mapping,
            default,
        } => {
            let normalized: Vec<(String, &String)> = mapping
                .iter()
                .map(|(from, to)| (normalize_label(from), to))
                .collect();
            let targets: HashSet<String> = mapping
                .iter()
                .map(|(_, to)| normalize_label(to))
                .chain(std::iter::once(normalize_label(default)))
                .collect();

            rewrite(stored, table, column, |value| {
                let label = value.map(normalize_label).unwrap_or_default();
                let mapped = normalized
                    .iter()
                    .find(|(from, _)| *from == label)
                    .map(|(_, to)| (*to).clone());
                match (mapped, value) {
                    (Some(to), _) => Some(to),
                    (None, Some(v)) if targets.contains(&label) => Some(v.to_string()),
                    _ => Some(default.clone()),
                }
            })
        }
        Directive::Bucketize {
            source,
            target,
            bands,
            overflow,
        } => bucketize(stored, table, source, target, bands, overflow),
        Directive::DeleteUnlessShape { column, shape } => {
            let shape = shape.compile()?;
            let values = column_values(stored, table, column)?;
            let keep: Vec<bool> = values
                .iter()
                .map(|value| value.as_deref().map(|v| shape.is_match(v)).unwrap_or(true))
                .collect();
            let (frame, deleted) = retain_rows(&stored.frame, &keep)?;
            stored.frame = frame;
            Ok(deleted)
        }
        Directive::DeleteUnconvertible { column, to } => {
            let values = column_values(stored, table, column)?;
            let keep: Vec<bool> = values
                .iter()
                .map(|value| value.as_deref().map(|v| to.convert(v).is_some()).unwrap_or(true))
                .collect();
            let (frame, deleted) = retain_rows(&stored.frame, &keep)?;
            stored.frame = frame;
            Ok(deleted)
        }
        Directive::Cast { column, to } => {
            let values = column_values(stored, table, column)?;
            let series = to.cast_values(table, column, &values)?;
            stored.frame.with_column(series)?;
            stored.schema.column_types.insert(column.clone(), *to);
            Ok(values.iter().filter(|v| v.is_some()).count())
        }
    }
}

fn normalize_label(label: &str) -> String {
    label.trim().to_lowercase().replace('_', " ")
}

fn column_values(
    stored: &StoredTable,
    table: &str,
    column: &str,
) -> Result<Vec<Option<String>>, HardeningError> {
    if !has_column(&stored.frame, column) {
        return Err(WarehouseError::ColumnNotFound {
            table: table.to_string(),
            column: column.to_string(),
        }
        .into());
    }
    Ok(text_values(&stored.frame, column)?)
}

/// Rewrites a column cell by cell and stores it back under its declared type.
/// Returns how many cells changed.
fn rewrite(
    stored: &mut StoredTable,
    table: &str,
    column: &str,
    change: impl Fn(Option<&str>) -> Option<String>,
) -> Result<usize, HardeningError> {
    let values = column_values(stored, table, column)?;
    let rewritten: Vec<Option<String>> = values.iter().map(|v| change(v.as_deref())).collect();
    let changed = values
        .iter()
        .zip(&rewritten)
        .filter(|(before, after)| before != after)
        .count();

    if changed > 0 {
        store_values(stored, table, column, &rewritten)?;
    }
    Ok(changed)
}

fn store_values(
    stored: &mut StoredTable,
    table: &str,
    column: &str,
    values: &[Option<String>],
) -> Result<(), HardeningError> {
    let series = stored
        .schema
        .column_type(column)
        .cast_values(table, column, values)?;
    stored.frame.with_column(series)?;
    Ok(())
}

fn rename_column(
    stored: &mut StoredTable,
    table: &str,
    from: &str,
    to: &str,
) -> Result<usize, HardeningError> {
    let has_from = has_column(&stored.frame, from);
    let has_to = has_column(&stored.frame, to);

    match (has_from, has_to) {
        (false, true) => return Ok(0),
        (false, false) => {
            return Err(WarehouseError::ColumnNotFound {
                table: table.to_string(),
                column: from.to_string(),
            }
            .into());
        }
        (true, true) => {
            return Err(WarehouseError::ConstraintViolation {
                table: table.to_string(),
                column: to.to_string(),
                reason: "column already exists".to_string(),
            }
            .into());
        }
        (true, false) => {}
    }

    if stored.schema.is_key_column(from) {
        return Err(WarehouseError::ConstraintViolation {
            table: table.to_string(),
            column: from.to_string(),
            reason: "key columns cannot be renamed".to_string(),
        }
        .into());
    }

    stored.frame.rename(from, to.into())?;
    if let Some(column_type) = stored.schema.column_types.remove(from) {
        stored.schema.column_types.insert(to.to_string(), column_type);
    }
    if stored.schema.not_null.remove(from) {
        stored.schema.not_null.insert(to.to_string());
    }
    Ok(stored.frame.height())
}

fn bucketize(
    stored: &mut StoredTable,
    table: &str,
    source: &str,
    target: &str,
    bands: &[Band],
    overflow: &str,
) -> Result<usize, HardeningError> {
    let amounts = column_values(stored, table, source)?;
    let labels: Vec<Option<String>> = amounts
        .iter()
        .map(|amount| {
            let amount = amount.as_deref()?.trim().parse::<f64>().ok()?;
            let label = bands
                .iter()
                .find(|band| amount < band.below)
                .map(|band| band.label.as_str())
                .unwrap_or(overflow);
            Some(label.to_string())
        })
        .collect();

    let previous = if has_column(&stored.frame, target) {
        text_values(&stored.frame, target)?
    } else {
        vec![None; labels.len()]
    };
    let changed = previous
        .iter()
        .zip(&labels)
        .filter(|(before, after)| before != after)
        .count();

    store_values(stored, table, target, &labels)?;
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardening::{ColumnType, ValueShape};
    use crate::storage::{LoadSink, WriteMode};
    use polars::prelude::*;

    fn warehouse_with(name: &str, frame: DataFrame) -> Warehouse {
        let mut warehouse = Warehouse::new();
        warehouse.write_table(&frame, name, WriteMode::Replace).unwrap();
        warehouse
    }

    fn column(warehouse: &Warehouse, table: &str, name: &str) -> Vec<Option<String>> {
        text_values(&warehouse.read_table(table).unwrap(), name).unwrap()
    }

    fn strings(values: &[Option<&str>]) -> Vec<Option<String>> {
        values.iter().map(|v| v.map(str::to_string)).collect()
    }

    #[test]
    fn test_card_dates_are_sanitized_then_cast() {
        let mut warehouse = warehouse_with(
            "dim_card_details",
            df!("date_payment_confirmed" => &[Some(" 21/03/2019 "), Some("NULL"), Some("2015-11-25"), Some("GTC9KBWJO9"), None]).unwrap(),
        );
        let directives = vec![
            Directive::cast("date_payment_confirmed", ColumnType::Date),
            Directive::trim("date_payment_confirmed"),
            Directive::null_sentinels("date_payment_confirmed", &["null", "n/a", "na"]),
            Directive::reformat_dates("date_payment_confirmed", "%d/%m/%Y"),
            Directive::null_unless("date_payment_confirmed", ValueShape::IsoDate),
        ];

        let report = harden_schema(&mut warehouse, "dim_card_details", &directives).unwrap();

        // The cast is listed first but runs last
        assert_eq!(report.outcomes.last().unwrap().index, 0);
        assert_eq!(
            column(&warehouse, "dim_card_details", "date_payment_confirmed"),
            strings(&[Some("2019-03-21"), None, Some("2015-11-25"), None, None])
        );
        assert_eq!(
            warehouse
                .read_table("dim_card_details")
                .unwrap()
                .column("date_payment_confirmed")
                .unwrap()
                .dtype(),
            &DataType::Date
        );
    }

    #[test]
    fn test_directives_can_be_rerun() {
        let mut warehouse = warehouse_with(
            "dim_products",
            df!(
                "removed" => &[Some("Still_avaliable"), Some("Removed"), Some("gibberish"), None],
                "weight" => &["1.6", "0.25", "45", "150"]
            )
            .unwrap(),
        );
        let directives = vec![
            Directive::rename("removed", "still_available"),
            Directive::map_labels(
                "still_available",
                &[
                    ("still_avaliable", "true"),
                    ("not removed", "true"),
                    ("unavailable", "false"),
                    ("removed", "false"),
                ],
                "false",
            ),
            Directive::bucketize(
                "weight",
                "weight_class",
                vec![
                    Band::new(2.0, "Light"),
                    Band::new(40.0, "Mid_Sized"),
                    Band::new(140.0, "Heavy"),
                ],
                "Truck_Required",
            ),
            Directive::cast("still_available", ColumnType::Bool),
            Directive::cast("weight", ColumnType::Float),
            Directive::cast("weight_class", ColumnType::VarChar(50)),
        ];

        harden_schema(&mut warehouse, "dim_products", &directives).unwrap();
        let first = warehouse.read_table("dim_products").unwrap();
        let rerun = harden_schema(&mut warehouse, "dim_products", &directives).unwrap();
        let second = warehouse.read_table("dim_products").unwrap();

        assert!(first.equals_missing(&second));
        assert_eq!(
            column(&warehouse, "dim_products", "still_available"),
            strings(&[Some("true"), Some("false"), Some("false"), Some("false")])
        );
        assert_eq!(
            column(&warehouse, "dim_products", "weight_class"),
            strings(&[Some("Light"), Some("Light"), Some("Heavy"), Some("Truck_Required")])
        );
        assert!(rerun
            .outcomes
            .iter()
            .filter(|o| !o.directive.starts_with("cast"))
            .all(|o| o.affected_rows == 0));
    }

    #[test]
    fn test_store_rows_with_bad_staff_numbers_are_deleted() {
        let mut warehouse = warehouse_with(
            "dim_store_details",
            df!(
                "staff_numbers" => &[Some("12"), Some("J78"), Some("3n9"), None, Some("N/A")],
                "latitude" => &[Some("51.5"), Some("N/A"), Some("-0.12"), Some("52"), Some("1")]
            )
            .unwrap(),
        );
        let directives = vec![
            Directive::null_sentinels("staff_numbers", &["null", "n/a", "J78"]),
            Directive::null_sentinels("latitude", &["n/a", "null"]),
            Directive::delete_unless("staff_numbers", ValueShape::Digits),
            Directive::delete_unless("latitude", ValueShape::SignedDecimal),
            Directive::cast("staff_numbers", ColumnType::SmallInt),
            Directive::cast("latitude", ColumnType::Float),
        ];

        let report = harden_schema(&mut warehouse, "dim_store_details", &directives).unwrap();
        let deleted: usize = report
            .outcomes
            .iter()
            .filter(|o| o.directive.starts_with("delete"))
            .map(|o| o.affected_rows)
            .sum();

        assert_eq!(deleted, 1);
        assert_eq!(
            column(&warehouse, "dim_store_details", "staff_numbers"),
            strings(&[Some("12"), None, None, None])
        );
    }

    #[test]
    fn test_out_of_range_staff_numbers_are_deleted_not_fatal() {
        let mut warehouse = warehouse_with(
            "dim_store_details",
            df!(
                "longitude" => &["-0.1", "7.95"],
                "latitude" => &["51.5", "47.56"],
                "locality" => &["High Wycombe", "Bad Säckingen"],
                "store_code" => &["WEB-1388012W", "BL-8387506C"],
                "country_code" => &["GB", "DE"],
                "staff_numbers" => &["40000", "12"],
                "store_type" => &["Local", "Super Store"],
                "continent" => &["Europe", "Europe"],
                "opening_date" => &["2006-10-04", "2002-11-08"]
            )
            .unwrap(),
        );
        let plan = crate::hardening::StarSchemaPlan::standard();
        let directives = &plan
            .table(crate::models::EntityKind::Stores)
            .unwrap()
            .directives;

        harden_schema(&mut warehouse, "dim_store_details", directives).unwrap();

        let stores = warehouse.read_table("dim_store_details").unwrap();
        assert_eq!(stores.height(), 1);
        assert_eq!(stores.column("staff_numbers").unwrap().dtype(), &DataType::Int16);
        assert_eq!(stores.column("opening_date").unwrap().dtype(), &DataType::Date);
        assert_eq!(
            column(&warehouse, "dim_store_details", "store_code"),
            strings(&[Some("BL-8387506C")])
        );
    }

    #[test]
    fn test_unconvertible_values_are_deleted() {
        let long = "x".repeat(300);
        let mut warehouse = warehouse_with(
            "dim_users",
            df!("first_name" => &[Some("Guy"), Some(long.as_str()), None]).unwrap(),
        );
        let report = harden_schema(
            &mut warehouse,
            "dim_users",
            &[
                Directive::cast("first_name", ColumnType::VarChar(255)),
                Directive::delete_unconvertible("first_name", ColumnType::VarChar(255)),
            ],
        )
        .unwrap();

        assert_eq!(report.outcomes[0].affected_rows, 1);
        assert_eq!(
            column(&warehouse, "dim_users", "first_name"),
            strings(&[Some("Guy"), None])
        );
    }

    #[test]
    fn test_failed_directive_leaves_table_untouched() {
        let mut warehouse = warehouse_with(
            "orders_table",
            df!("product_quantity" => &["1", "2", "many"], "note" => &[" a ", "b", "c"]).unwrap(),
        );
        let directives = vec![
            Directive::trim("note"),
            Directive::cast("product_quantity", ColumnType::SmallInt),
        ];

        let err = harden_schema(&mut warehouse, "orders_table", &directives).unwrap_err();
        match err {
            HardeningError::Directive { index, source, .. } => {
                assert_eq!(index, 1);
                assert!(matches!(
                    *source,
                    HardeningError::Store(WarehouseError::CastFailed { row: 2, .. })
                ));
            }
            other => panic!("unexpected error: {other}"),
        }

        // The trim committed; the cast did not
        assert_eq!(column(&warehouse, "orders_table", "note")[0].as_deref(), Some("a"));
        assert_eq!(
            warehouse.schema("orders_table").unwrap().column_type("product_quantity"),
            ColumnType::Text
        );
    }

    #[test]
    fn test_unknown_table_and_column() {
        let mut warehouse = warehouse_with("dim_users", df!("user_uuid" => &["x"]).unwrap());

        assert!(matches!(
            harden_schema(&mut warehouse, "nope", &[]),
            Err(HardeningError::Store(WarehouseError::TableNotFound(_)))
        ));
        assert!(matches!(
            harden_schema(&mut warehouse, "dim_users", &[Directive::trim("missing")]),
            Err(HardeningError::Directive { .. })
        ));
    }
}
