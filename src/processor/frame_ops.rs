use polars::prelude::*;
use std::collections::HashSet;

/// Name of the positional column some relational exports carry along.
pub const INDEX_COLUMN: &str = "index";

pub fn column_names(df: &DataFrame) -> Vec<String> {
    df.get_column_names()
        .iter()
        .map(|s| s.to_string())
        .collect()
}

pub fn has_column(df: &DataFrame, name: &str) -> bool {
    df.column(name).is_ok()
}

/// Returns the first of `candidates` present in the frame.
pub fn find_column<'a>(df: &DataFrame, candidates: &[&'a str]) -> Option<&'a str> {
    candidates.iter().copied().find(|name| has_column(df, name))
}

/// Reads any column as optional text, whatever its physical type.
pub fn text_values(df: &DataFrame, name: &str) -> PolarsResult<Vec<Option<String>>> {
    let column = df.column(name)?;
    let as_text = if column.dtype() == &DataType::String {
        column.clone()
    } else {
        column.cast(&DataType::String)?
    };

    Ok(as_text
        .str()?
        .into_iter()
        .map(|value| value.map(|s| s.to_string()))
        .collect())
}

pub fn replace_text_column(
    df: &mut DataFrame,
    name: &str,
    values: Vec<Option<String>>,
) -> PolarsResult<()> {
    df.with_column(Series::new(name.into(), values))?;
    Ok(())
}

/// A cell is missing when it is null or holds only whitespace.
pub fn is_missing(value: Option<&str>) -> bool {
    value.map(|s| s.trim().is_empty()).unwrap_or(true)
}

/// Keeps the rows flagged `true`, returning the filtered frame and how many were dropped.
pub fn retain_rows(df: &DataFrame, keep: &[bool]) -> PolarsResult<(DataFrame, usize)> {
    let mask = BooleanChunked::new("keep".into(), keep);
    let filtered = df.filter(&mask)?;
    let dropped = df.height() - filtered.height();
    Ok((filtered, dropped))
}

/// Collects every data column as text, column-major. The positional index is not data.
pub fn text_columns(df: &DataFrame) -> PolarsResult<Vec<Vec<Option<String>>>> {
    column_names(df)
        .iter()
        .filter(|name| name.as_str() != INDEX_COLUMN)
        .map(|name| text_values(df, name))
        .collect()
}

/// Flags the first occurrence of every distinct row.
pub fn first_occurrence_mask(df: &DataFrame) -> PolarsResult<Vec<bool>> {
    let columns = text_columns(df)?;
    let mut seen: HashSet<Vec<Option<String>>> = HashSet::with_capacity(df.height());

    Ok((0..df.height())
        .map(|row| {
            let key: Vec<Option<String>> = columns.iter().map(|col| col[row].clone()).collect();
            seen.insert(key)
        })
        .collect())
}

pub fn drop_duplicate_rows(df: &DataFrame) -> PolarsResult<(DataFrame, usize)> {
    let keep = first_occurrence_mask(df)?;
    retain_rows(df, &keep)
}

/// Drops rows where every field is missing.
pub fn drop_empty_rows(df: &DataFrame) -> PolarsResult<(DataFrame, usize)> {
    let columns = text_columns(df)?;
    let keep: Vec<bool> = (0..df.height())
        .map(|row| {
            columns
                .iter()
                .any(|col| !is_missing(col[row].as_deref()))
        })
        .collect();
    retain_rows(df, &keep)
}

/// Drops rows holding a missing value in any column.
pub fn drop_incomplete_rows(df: &DataFrame) -> PolarsResult<(DataFrame, usize)> {
    let columns = text_columns(df)?;
    let keep: Vec<bool> = (0..df.height())
        .map(|row| {
            columns
                .iter()
                .all(|col| !is_missing(col[row].as_deref()))
        })
        .collect();
    retain_rows(df, &keep)
}

/// Drops rows whose `column` value is missing.
pub fn drop_missing_in(df: &DataFrame, column: &str) -> PolarsResult<(DataFrame, usize)> {
    let values = text_values(df, column)?;
    let keep: Vec<bool> = values.iter().map(|v| !is_missing(v.as_deref())).collect();
    retain_rows(df, &keep)
}

/// Fills missing cells of a text column with a constant.
pub fn fill_missing(df: &mut DataFrame, column: &str, fill: &str) -> PolarsResult<usize> {
    if !has_column(df, column) {
        return Ok(0);
    }

    let mut filled = 0;
    let values: Vec<Option<String>> = text_values(df, column)?
        .into_iter()
        .map(|value| {
            if is_missing(value.as_deref()) {
                filled += 1;
                Some(fill.to_string())
            } else {
                value
            }
        })
        .collect();

    replace_text_column(df, column, values)?;
    Ok(filled)
}

/// Trims surrounding whitespace in every text column.
pub fn trim_text_columns(df: &mut DataFrame) -> PolarsResult<()> {
    for name in column_names(df) {
        if df.column(&name)?.dtype() != &DataType::String {
            continue;
        }
        let trimmed: Vec<Option<String>> = text_values(df, &name)?
            .into_iter()
            .map(|value| value.map(|s| s.trim().to_string()))
            .collect();
        replace_text_column(df, &name, trimmed)?;
    }
    Ok(())
}

pub fn drop_columns(df: &DataFrame, columns: &[&str]) -> PolarsResult<DataFrame> {
    let mut out = df.clone();
    for name in columns {
        if has_column(&out, name) {
            out = out.drop(name)?;
        }
    }
    Ok(out)
}

/// Renumbers a carried-over positional column from 0 after rows were removed.
pub fn renumber_index(df: &mut DataFrame) -> PolarsResult<()> {
    if has_column(df, INDEX_COLUMN) {
        let positions: Vec<i64> = (0..df.height() as i64).collect();
        df.with_column(Series::new(INDEX_COLUMN.into(), positions))?;
    }
    Ok(())
}
