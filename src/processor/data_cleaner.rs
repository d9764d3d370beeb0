use chrono::NaiveDate;
use polars::prelude::*;
use tracing::{debug, info};

use super::dates::{parse_date, sentinel_epoch};
use super::frame_ops::{
    drop_columns, drop_duplicate_rows, drop_empty_rows, drop_incomplete_rows, fill_missing,
    find_column, has_column, renumber_index, replace_text_column, retain_rows, text_values,
};
use super::unit_converter::UnitConverter;
use crate::error::CleaningError;

const CARD_NUMBER_COLUMNS: &[&str] = &["card_number", "Card Number"];
const TRANSACTION_AMOUNT_COLUMNS: &[&str] = &["transaction_amount", "Transaction Amount"];
const CARD_DATE_COLUMN: &str = "Date";
const ORDER_JOIN_ARTIFACTS: &[&str] = &["first_name", "last_name", "1"];

/// Business constants the cleaners apply. Passed in explicitly so nothing is process-wide.
#[derive(Debug, Clone)]
pub struct CleaningRules {
    pub sentinel_date: NaiveDate,
    pub allowed_country_codes: Vec<String>,
    pub unknown_store_name: String,
    pub default_staff_numbers: String,
    /// Date columns the generic cleaner parses, defaulting failures to `sentinel_date`.
    pub date_columns: Vec<String>,
    pub max_transaction_amount: f64,
    pub currency_symbol: String,
}

impl Default for CleaningRules {
    fn default() -> Self {
        Self {
            sentinel_date: sentinel_epoch(),
            allowed_country_codes: vec!["GB".to_string(), "US".to_string(), "DE".to_string()],
            unknown_store_name: "Unknown".to_string(),
            default_staff_numbers: "0".to_string(),
            date_columns: vec![
                "opening_date".to_string(),
                "date_of_birth".to_string(),
                "join_date".to_string(),
            ],
            max_transaction_amount: 10_000.0,
            currency_symbol: "£".to_string(),
        }
    }
}

/// A cleaned table plus the number of input rows the cleaner removed.
#[derive(Debug, Clone)]
pub struct CleanOutcome {
    pub frame: DataFrame,
    pub rejected: usize,
}

impl CleanOutcome {
    pub(crate) fn new(raw: &DataFrame, frame: DataFrame) -> Self {
        let rejected = raw.height().saturating_sub(frame.height());
        Self { frame, rejected }
    }
}

/// Per-entity cleaning transforms. Every `clean_*` borrows its input and returns a new frame.
pub struct DataCleaner {
    pub(crate) rules: CleaningRules,
    pub(crate) converter: UnitConverter,
}

impl DataCleaner {
    pub fn new(rules: CleaningRules) -> Result<Self, CleaningError> {
        Ok(DataCleaner {
            rules,
            converter: UnitConverter::new()?,
        })
    }

    pub fn rules(&self) -> &CleaningRules {
        &self.rules
    }

    /// Generic cleaner used for users (and any loosely structured legacy table).
    pub fn clean_users(&self, raw: &DataFrame) -> Result<CleanOutcome, CleaningError> {
        let (mut df, empty_rows) = drop_empty_rows(raw)?;
        debug!("Dropped {} fully empty rows", empty_rows);

        fill_missing(&mut df, "store_name", &self.rules.unknown_store_name)?;
        fill_missing(&mut df, "staff_numbers", &self.rules.default_staff_numbers)?;

        for column in &self.rules.date_columns {
            let defaulted = self.parse_date_column(&mut df, column, Some(self.rules.sentinel_date))?;
            if defaulted > 0 {
                debug!("Defaulted {} unparseable values in {}", defaulted, column);
            }
        }

        let (mut df, duplicates) = drop_duplicate_rows(&df)?;
        renumber_index(&mut df)?;

        let outcome = CleanOutcome::new(raw, df);
        info!(
            "Cleaned users: {} rows in, {} kept, {} rejected ({} duplicates)",
            raw.height(),
            outcome.frame.height(),
            outcome.rejected,
            duplicates
        );
        Ok(outcome)
    }

    pub fn clean_cards(&self, raw: &DataFrame) -> Result<CleanOutcome, CleaningError> {
        let card_column = find_column(raw, CARD_NUMBER_COLUMNS).ok_or_else(|| {
            CleaningError::MissingColumn {
                entity: "card",
                column: CARD_NUMBER_COLUMNS[0].to_string(),
            }
        })?;

        let (df, incomplete) = drop_incomplete_rows(raw)?;
        let (mut df, duplicates) = drop_duplicate_rows(&df)?;

        if has_column(&df, CARD_DATE_COLUMN) {
            self.parse_date_column(&mut df, CARD_DATE_COLUMN, None)?;
        }

        let card_numbers = text_values(&df, card_column)?;
        let all_digits: Vec<bool> = card_numbers
            .iter()
            .map(|value| {
                value
                    .as_deref()
                    .map(|s| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()))
                    .unwrap_or(false)
            })
            .collect();
        let (mut df, bad_numbers) = retain_rows(&df, &all_digits)?;

        if let Some(amount_column) = find_column(&df, TRANSACTION_AMOUNT_COLUMNS) {
            let limit = self.rules.max_transaction_amount;
            let in_range: Vec<bool> = text_values(&df, amount_column)?
                .iter()
                .map(|value| {
                    value
                        .as_deref()
                        .and_then(|s| s.trim().parse::<f64>().ok())
                        .map(|amount| amount > 0.0 && amount < limit)
                        .unwrap_or(false)
                })
                .collect();
            let (filtered, out_of_range) = retain_rows(&df, &in_range)?;
            debug!("Dropped {} out-of-range transactions", out_of_range);
            df = filtered;
        }

        renumber_index(&mut df)?;

        let outcome = CleanOutcome::new(raw, df);
        info!(
            "Cleaned cards: {} rows in, {} kept ({} incomplete, {} duplicates, {} non-numeric card numbers)",
            raw.height(),
            outcome.frame.height(),
            incomplete,
            duplicates,
            bad_numbers
        );
        Ok(outcome)
    }

    pub fn clean_stores(&self, raw: &DataFrame) -> Result<CleanOutcome, CleaningError> {
        let mut df = raw.clone();

        if has_column(&df, "opening_date") {
            self.parse_date_column(&mut df, "opening_date", Some(self.rules.sentinel_date))?;
        }

        if has_column(&df, "address") {
            let addresses: Vec<Option<String>> = text_values(&df, "address")?
                .into_iter()
                .map(|value| value.map(|s| normalize_address(&s)))
                .collect();
            replace_text_column(&mut df, "address", addresses)?;
        }

        let mut foreign = 0;
        if has_column(&df, "country_code") {
            let allowed: Vec<bool> = text_values(&df, "country_code")?
                .iter()
                .map(|value| {
                    value
                        .as_deref()
                        .map(|code| {
                            self.rules
                                .allowed_country_codes
                                .iter()
                                .any(|allowed| allowed == code.trim())
                        })
                        .unwrap_or(false)
                })
                .collect();
            let (filtered, dropped) = retain_rows(&df, &allowed)?;
            df = filtered;
            foreign = dropped;
        }

        let (mut df, duplicates) = drop_duplicate_rows(&df)?;
        renumber_index(&mut df)?;

        let outcome = CleanOutcome::new(raw, df);
        info!(
            "Cleaned stores: {} rows in, {} kept ({} outside allowed countries, {} duplicates)",
            raw.height(),
            outcome.frame.height(),
            foreign,
            duplicates
        );
        Ok(outcome)
    }

    /// Removes the name/positional columns the upstream join leaves behind.
    pub fn clean_orders(&self, raw: &DataFrame) -> Result<CleanOutcome, CleaningError> {
        let mut df = drop_columns(raw, ORDER_JOIN_ARTIFACTS)?;
        renumber_index(&mut df)?;

        info!(
            "Cleaned orders: {} rows, {} columns kept",
            df.height(),
            df.width()
        );
        Ok(CleanOutcome::new(raw, df))
    }

    /// Rewrites `column` as a Date column. Returns how many values did not parse;
    /// those become `fallback` (or null when no fallback is given).
    pub(crate) fn parse_date_column(
        &self,
        df: &mut DataFrame,
        column: &str,
        fallback: Option<NaiveDate>,
    ) -> Result<usize, CleaningError> {
        if !has_column(df, column) {
            return Ok(0);
        }

        let mut unparsed = 0;
        let dates: Vec<Option<NaiveDate>> = text_values(df, column)?
            .iter()
            .map(|value| match value.as_deref().and_then(parse_date) {
                Some(date) => Some(date),
                None => {
                    unparsed += 1;
                    fallback
                }
            })
            .collect();

        df.with_column(Series::new(column.into(), dates))?;
        Ok(unparsed)
    }
}

fn normalize_address(address: &str) -> String {
    address.replace('\n', " ").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cleaner() -> DataCleaner {
        DataCleaner::new(CleaningRules::default()).unwrap()
    }

    fn texts(df: &DataFrame, column: &str) -> Vec<Option<String>> {
        text_values(df, column).unwrap()
    }

    #[test]
    fn test_user_cleaning_fills_parses_and_dedups() {
        let raw = df!(
            "index" => &[Some("0"), Some("1"), Some("2"), None, Some("4")],
            "first_name" => &[Some("Sophia"), Some("Sophia"), Some("Emma"), None, Some("Liam")],
            "store_name" => &[Some("Bath"), Some("Bath"), None, None, Some("Leeds")],
            "join_date" => &[Some("2018 October 16"), Some("2018 October 16"), Some("bogus"), None, Some("2020-01-02")]
        )
        .unwrap();

        let outcome = cleaner().clean_users(&raw).unwrap();
        let df = &outcome.frame;

        // One fully empty row and one exact duplicate are gone
        assert_eq!(df.height(), 3);
        assert_eq!(outcome.rejected, 2);
        assert_eq!(
            texts(df, "store_name"),
            vec![
                Some("Bath".to_string()),
                Some("Unknown".to_string()),
                Some("Leeds".to_string())
            ]
        );
        assert_eq!(
            texts(df, "join_date"),
            vec![
                Some("2018-10-16".to_string()),
                Some("1900-01-01".to_string()),
                Some("2020-01-02".to_string())
            ]
        );
        assert_eq!(
            texts(df, "index"),
            vec![Some("0".to_string()), Some("1".to_string()), Some("2".to_string())]
        );
    }

    #[test]
    fn test_user_cleaning_does_not_touch_input() {
        let raw = df!("store_name" => &[None::<&str>, Some("Bath")]).unwrap();
        let _ = cleaner().clean_users(&raw).unwrap();
        assert_eq!(texts(&raw, "store_name"), vec![None, Some("Bath".to_string())]);
    }

    #[test]
    fn test_card_numbers_are_digits_only() {
        let raw = df!(
            "card_number" => &[Some("4971858637664481"), Some("?4971858637664481"), Some("NULL"), Some("30060773296197"), None],
            "expiry_date" => &[Some("09/26"), Some("10/23"), Some("NULL"), Some("09/26"), Some("01/25")],
            "card_provider" => &[Some("VISA 16 digit"), Some("VISA 16 digit"), Some("NULL"), Some("Diners Club"), Some("JCB")]
        )
        .unwrap();

        let outcome = cleaner().clean_cards(&raw).unwrap();
        let numbers = texts(&outcome.frame, "card_number");

        assert_eq!(numbers.len(), 2);
        assert!(numbers.iter().all(|n| {
            n.as_deref()
                .map(|s| s.chars().all(|c| c.is_ascii_digit()))
                .unwrap_or(false)
        }));
        assert_eq!(outcome.rejected, 3);
    }

    #[test]
    fn test_card_transaction_amount_window() {
        let raw = df!(
            "Card Number" => &["1", "2", "3", "4"],
            "Transaction Amount" => &["0", "25.50", "10000", "abc"],
            "Date" => &["2021-03-04", "nonsense", "2021-03-04", "2021-03-04"]
        )
        .unwrap();

        let outcome = cleaner().clean_cards(&raw).unwrap();
        assert_eq!(texts(&outcome.frame, "Card Number"), vec![Some("2".to_string())]);
        assert_eq!(texts(&outcome.frame, "Date"), vec![None]);
    }

    #[test]
    fn test_cards_require_card_number() {
        let raw = df!("expiry_date" => &["09/26"]).unwrap();
        assert!(matches!(
            cleaner().clean_cards(&raw),
            Err(CleaningError::MissingColumn { .. })
        ));
    }

    #[test]
    fn test_store_country_allow_list_and_dates() {
        let raw = df!(
            "store_code" => &["BA-1", "LE-2", "XX-3", "BA-1"],
            "country_code" => &["GB", "DE", "QMAVR5H3LD", "GB"],
            "opening_date" => &["2006-03-23", "May 2003 27", "2010-01-01", "2006-03-23"],
            "address" => &["1 High St\nBath", "Hauptstr. 2", "?", "1 High St\nBath"]
        )
        .unwrap();

        let outcome = cleaner().clean_stores(&raw).unwrap();
        let df = &outcome.frame;

        assert_eq!(df.height(), 2);
        assert_eq!(
            texts(df, "country_code"),
            vec![Some("GB".to_string()), Some("DE".to_string())]
        );
        assert_eq!(
            texts(df, "opening_date"),
            vec![Some("2006-03-23".to_string()), Some("2003-05-27".to_string())]
        );
        assert_eq!(texts(df, "address")[0].as_deref(), Some("1 High St Bath"));
    }

    #[test]
    fn test_store_without_country_column_keeps_rows() {
        let raw = df!("store_code" => &["A", "B"], "opening_date" => &["??", "2001-01-01"]).unwrap();
        let outcome = cleaner().clean_stores(&raw).unwrap();

        assert_eq!(outcome.frame.height(), 2);
        assert_eq!(
            texts(&outcome.frame, "opening_date")[0].as_deref(),
            Some("1900-01-01")
        );
    }

    #[test]
    fn test_orders_drop_join_artifacts() {
        let raw = df!(
            "index" => &["0"],
            "first_name" => &["Ann"],
            "last_name" => &["Lee"],
            "1" => &["x"],
            "card_number" => &["4971858637664481"],
            "product_quantity" => &["3"]
        )
        .unwrap();

        let outcome = cleaner().clean_orders(&raw).unwrap();
        let mut names = crate::processor::frame_ops::column_names(&outcome.frame);
        names.sort();

        assert_eq!(names, vec!["card_number", "index", "product_quantity"]);
        assert_eq!(outcome.rejected, 0);
    }
}
