use async_trait::async_trait;
use polars::prelude::*;
use std::io::Cursor;
use std::path::PathBuf;
use tracing::info;

use super::TableReader;
use crate::error::IngestionError;

/// Parses CSV bytes with a header row. Every column is read as text.
pub fn parse_csv_bytes(bytes: Vec<u8>, source_id: &str) -> Result<DataFrame, IngestionError> {
    let frame = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(0))
        .into_reader_with_file_handle(Cursor::new(bytes))
        .finish()
        .map_err(|e| IngestionError::Parse {
            source_id: source_id.to_string(),
            reason: e.to_string(),
        })?;

    if frame.height() == 0 {
        return Err(IngestionError::Empty(source_id.to_string()));
    }
    Ok(frame)
}

/// Local CSV exports: relational dumps and tables extracted from PDF documents.
pub struct CsvFileReader {
    base_dir: Option<PathBuf>,
}

impl CsvFileReader {
    pub fn new() -> Self {
        CsvFileReader { base_dir: None }
    }

    /// Resolves relative sources against `base_dir`.
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        CsvFileReader {
            base_dir: Some(base_dir.into()),
        }
    }

    fn resolve(&self, source: &str) -> PathBuf {
        let path = PathBuf::from(source);
        match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path,
        }
    }
}

impl Default for CsvFileReader {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TableReader for CsvFileReader {
    async fn read_table(&self, source: &str) -> Result<DataFrame, IngestionError> {
        let path = self.resolve(source);
        info!("Reading CSV export {}", path.display());

        let bytes = tokio::fs::read(&path).await?;
        let frame = parse_csv_bytes(bytes, source)?;

        info!("Read {} rows from {}", frame.height(), path.display());
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_numbers_stay_text() {
        let csv = b"card_number,expiry_date\n4971858637664481,09/26\n180036921556789,10/23\n";
        let df = parse_csv_bytes(csv.to_vec(), "cards.csv").unwrap();

        assert_eq!(df.height(), 2);
        assert_eq!(df.column("card_number").unwrap().dtype(), &DataType::String);
        assert_eq!(
            df.column("card_number").unwrap().str().unwrap().get(0),
            Some("4971858637664481")
        );
    }

    #[test]
    fn test_header_only_is_rejected() {
        let result = parse_csv_bytes(b"a,b\n".to_vec(), "empty.csv");
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_reads_relative_to_base_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = std::fs::File::create(dir.path().join("orders.csv")).unwrap();
        writeln!(file, "index,product_quantity").unwrap();
        writeln!(file, "0,3").unwrap();

        let reader = CsvFileReader::with_base_dir(dir.path());
        let df = reader.read_table("orders.csv").await.unwrap();
        assert_eq!(df.height(), 1);
    }

    #[tokio::test]
    async fn test_missing_file_is_io_error() {
        let reader = CsvFileReader::new();
        let result = reader.read_table("/nonexistent/dir/users.csv").await;
        assert!(matches!(result, Err(IngestionError::Io(_))));
    }
}
