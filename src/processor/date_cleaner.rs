use chrono::NaiveDate;
use polars::prelude::*;
use tracing::info;

use super::data_cleaner::{CleanOutcome, DataCleaner};
use super::dates::{parse_time_of_day, parse_whole_number};
use super::frame_ops::{has_column, renumber_index, replace_text_column, retain_rows, text_values};
use crate::error::CleaningError;

const REQUIRED: [&str; 4] = ["timestamp", "year", "month", "day"];

impl DataCleaner {
    /// Normalizes sale-event date parts and derives a combined `date` column.
    /// Rows without a valid date or time of day are dropped.
    pub fn clean_date_times(&self, raw: &DataFrame) -> Result<CleanOutcome, CleaningError> {
        for column in REQUIRED {
            if !has_column(raw, column) {
                return Err(CleaningError::MissingColumn {
                    entity: "date_time",
                    column: column.to_string(),
                });
            }
        }

        let mut df = raw.clone();

        let timestamps: Vec<Option<String>> = text_values(&df, "timestamp")?
            .iter()
            .map(|value| {
                value
                    .as_deref()
                    .and_then(parse_time_of_day)
                    .map(|time| time.format("%H:%M:%S").to_string())
            })
            .collect();

        let years = whole_numbers(&df, "year")?;
        let months = whole_numbers(&df, "month")?;
        let days = whole_numbers(&df, "day")?;

        let dates: Vec<Option<NaiveDate>> = years
            .iter()
            .zip(&months)
            .zip(&days)
            .map(|((year, month), day)| {
                let month = u32::try_from((*month)?).ok()?;
                let day = u32::try_from((*day)?).ok()?;
                NaiveDate::from_ymd_opt((*year)?, month, day)
            })
            .collect();

        let keep: Vec<bool> = timestamps
            .iter()
            .zip(&dates)
            .map(|(time, date)| time.is_some() && date.is_some())
            .collect();

        replace_text_column(&mut df, "timestamp", timestamps)?;
        df.with_column(Series::new("year".into(), years))?;
        df.with_column(Series::new("month".into(), months))?;
        df.with_column(Series::new("day".into(), days))?;
        df.with_column(Series::new("date".into(), dates))?;

        let (mut df, dropped) = retain_rows(&df, &keep)?;
        renumber_index(&mut df)?;

        info!(
            "Cleaned date_times: {} rows in, {} kept, {} without a valid date or time",
            raw.height(),
            df.height(),
            dropped
        );
        Ok(CleanOutcome::new(raw, df))
    }
}

fn whole_numbers(df: &DataFrame, column: &str) -> PolarsResult<Vec<Option<i32>>> {
    Ok(text_values(df, column)?
        .iter()
        .map(|value| value.as_deref().and_then(parse_whole_number))
        .collect())
}
