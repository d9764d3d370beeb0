use polars::prelude::*;
use tracing::{debug, info};

use super::data_cleaner::{CleanOutcome, DataCleaner};
use super::frame_ops::{
    drop_duplicate_rows, drop_missing_in, has_column, renumber_index, retain_rows,
    text_values, trim_text_columns,
};
use crate::error::CleaningError;

const WEIGHT: &str = "weight";
const PRICE: &str = "product_price";
const NAME: &str = "product_name";

impl DataCleaner {
    /// Normalizes weights to kilograms and prices to plain numbers, dropping rows where
    /// either is unusable.
    pub fn clean_products(&self, raw: &DataFrame) -> Result<CleanOutcome, CleaningError> {
        for column in [WEIGHT, PRICE, NAME] {
            if !has_column(raw, column) {
                return Err(CleaningError::MissingColumn {
                    entity: "product",
                    column: column.to_string(),
                });
            }
        }

        let mut df = raw.clone();

        let weights: Vec<Option<f64>> = text_values(&df, WEIGHT)?
            .iter()
            .map(|label| label.as_deref().and_then(|s| self.converter.convert(s)))
            .collect();
        let positive: Vec<bool> = weights
            .iter()
            .map(|w| w.map(|kg| kg > 0.0).unwrap_or(false))
            .collect();
        df.with_column(Series::new(WEIGHT.into(), weights))?;
        let (df, bad_weights) = retain_rows(&df, &positive)?;
        debug!("Dropped {} products without a usable weight", bad_weights);

        let mut df = df;
        let prices: Vec<Option<f64>> = text_values(&df, PRICE)?
            .iter()
            .map(|value| value.as_deref().and_then(|s| self.parse_price(s)))
            .collect();
        let priced: Vec<bool> = prices.iter().map(Option::is_some).collect();
        df.with_column(Series::new(PRICE.into(), prices))?;
        let (df, bad_prices) = retain_rows(&df, &priced)?;

        let (mut df, duplicates) = drop_duplicate_rows(&df)?;
        trim_text_columns(&mut df)?;
        let (mut df, unnamed) = drop_missing_in(&df, NAME)?;
        renumber_index(&mut df)?;

        let outcome = CleanOutcome::new(raw, df);
        info!(
            "Cleaned products: {} rows in, {} kept ({} bad weights, {} bad prices, {} duplicates, {} unnamed)",
            raw.height(),
            outcome.frame.height(),
            bad_weights,
            bad_prices,
            duplicates,
            unnamed
        );
        Ok(outcome)
    }

    fn parse_price(&self, raw: &str) -> Option<f64> {
        raw.replace(self.rules.currency_symbol.as_str(), "")
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|price| price.is_finite())
    }
}
