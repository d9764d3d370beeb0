use async_trait::async_trait;
use polars::prelude::DataFrame;
use s3::bucket::Bucket;
use s3::creds::Credentials;
use s3::region::Region;
use tracing::info;

use super::TableReader;
use super::csv_reader::parse_csv_bytes;
use super::records::records_to_frame;
use crate::error::IngestionError;

/// Splits `s3://bucket/key` into its bucket and key.
pub fn parse_s3_url(source: &str) -> Result<(&str, &str), IngestionError> {
    let rest = source
        .strip_prefix("s3://")
        .ok_or_else(|| IngestionError::InvalidSource(source.to_string()))?;
    match rest.split_once('/') {
        Some((bucket, key)) if !bucket.is_empty() && !key.is_empty() => Ok((bucket, key)),
        _ => Err(IngestionError::InvalidSource(source.to_string())),
    }
}

/// Turns a downloaded object into a frame according to its key's extension.
pub fn decode_object(key: &str, bytes: Vec<u8>, source: &str) -> Result<DataFrame, IngestionError> {
    let extension = key
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "csv" => parse_csv_bytes(bytes, source),
        "json" => {
            let payload: serde_json::Value =
                serde_json::from_slice(&bytes).map_err(|e| IngestionError::Parse {
                    source_id: source.to_string(),
                    reason: e.to_string(),
                })?;
            records_to_frame(&payload, source)
        }
        _ => Err(IngestionError::UnsupportedFormat(key.to_string())),
    }
}

/// Objects addressed as `s3://bucket/key`.
pub struct S3TableReader {
    region: Region,
    credentials: Credentials,
    path_style: bool,
}

impl S3TableReader {
    pub fn new(region: Region, credentials: Credentials, path_style: bool) -> Self {
        S3TableReader {
            region,
            credentials,
            path_style,
        }
    }

    fn bucket(&self, name: &str, source: &str) -> Result<Box<Bucket>, IngestionError> {
        let bucket = Bucket::new(name, self.region.clone(), self.credentials.clone()).map_err(
            |e| IngestionError::Storage {
                location: source.to_string(),
                reason: e.to_string(),
            },
        )?;
        Ok(if self.path_style {
            bucket.with_path_style()
        } else {
            bucket
        })
    }
}

#[async_trait]
impl TableReader for S3TableReader {
    async fn read_table(&self, source: &str) -> Result<DataFrame, IngestionError> {
        let (bucket_name, key) = parse_s3_url(source)?;
        let bucket = self.bucket(bucket_name, source)?;

        info!("Downloading {} from bucket {}", key, bucket_name);
        let response = bucket
            .get_object(key)
            .await
            .map_err(|e| IngestionError::Storage {
                location: source.to_string(),
                reason: e.to_string(),
            })?;

        if response.status_code() != 200 {
            return Err(IngestionError::Storage {
                location: source.to_string(),
                reason: format!("HTTP {}", response.status_code()),
            });
        }

        let frame = decode_object(key, response.bytes().to_vec(), source)?;
        info!("Read {} rows from {}", frame.height(), source);
        Ok(frame)
    }
}
