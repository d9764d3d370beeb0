pub mod csv_reader;
pub mod http_fetcher;
pub mod records;
pub mod s3_reader;
pub mod store_api;

use async_trait::async_trait;
use polars::prelude::DataFrame;
use tracing::debug;

use crate::error::IngestionError;

pub use csv_reader::CsvFileReader;
pub use http_fetcher::JsonFeedReader;
pub use records::records_to_frame;
pub use s3_reader::S3TableReader;
pub use store_api::{RetryPolicy, StoreApiFetcher};

/// Identifier that routes to the store API instead of naming a location.
pub const STORE_API_SOURCE: &str = "api://stores";

/// Fetches one raw table. Every column of the returned frame is text.
#[async_trait]
pub trait TableReader: Send + Sync {
    async fn read_table(&self, source: &str) -> Result<DataFrame, IngestionError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    CsvFile,
    S3Object,
    JsonFeed,
    StoreApi,
}

impl SourceKind {
    pub fn classify(source: &str) -> SourceKind {
        if source == STORE_API_SOURCE {
            SourceKind::StoreApi
        } else if source.starts_with("s3://") {
            SourceKind::S3Object
        } else if source.starts_with("http://") || source.starts_with("https://") {
            SourceKind::JsonFeed
        } else {
            SourceKind::CsvFile
        }
    }
}

/// Dispatches a source identifier to the reader for its kind.
pub struct SourceRouter {
    csv: CsvFileReader,
    s3: Option<S3TableReader>,
    json: Option<JsonFeedReader>,
    stores: Option<StoreApiFetcher>,
}

impl SourceRouter {
    pub fn new(csv: CsvFileReader) -> Self {
        SourceRouter {
            csv,
            s3: None,
            json: None,
            stores: None,
        }
    }

    pub fn with_s3(mut self, reader: S3TableReader) -> Self {
        self.s3 = Some(reader);
        self
    }

    pub fn with_json_feed(mut self, reader: JsonFeedReader) -> Self {
        self.json = Some(reader);
        self
    }

    pub fn with_store_api(mut self, fetcher: StoreApiFetcher) -> Self {
        self.stores = Some(fetcher);
        self
    }

    fn reader_for(&self, source: &str) -> Result<&dyn TableReader, IngestionError> {
        let kind = SourceKind::classify(source);
        debug!("Routing {} as {:?}", source, kind);

        let reader: Option<&dyn TableReader> = match kind {
            SourceKind::CsvFile => Some(&self.csv),
            SourceKind::S3Object => self.s3.as_ref().map(|r| r as &dyn TableReader),
            SourceKind::JsonFeed => self.json.as_ref().map(|r| r as &dyn TableReader),
            SourceKind::StoreApi => self.stores.as_ref().map(|r| r as &dyn TableReader),
        };
        reader.ok_or_else(|| IngestionError::InvalidSource(format!("no reader configured for {}", source)))
    }
}

#[async_trait]
impl TableReader for SourceRouter {
    async fn read_table(&self, source: &str) -> Result<DataFrame, IngestionError> {
        self.reader_for(source)?.read_table(source).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_sources() {
        assert_eq!(SourceKind::classify("exports/legacy_users.csv"), SourceKind::CsvFile);
        assert_eq!(
            SourceKind::classify("s3://data-handling-public/products.csv"),
            SourceKind::S3Object
        );
        assert_eq!(
            SourceKind::classify("https://example.com/date_details.json"),
            SourceKind::JsonFeed
        );
        assert_eq!(SourceKind::classify(STORE_API_SOURCE), SourceKind::StoreApi);
    }

    #[tokio::test]
    async fn test_unconfigured_reader_is_rejected() {
        let router = SourceRouter::new(CsvFileReader::new());
        let result = router.read_table("s3://bucket/products.csv").await;
        assert!(matches!(result, Err(IngestionError::InvalidSource(_))));
    }
}
