use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use polars::prelude::*;
use s3::bucket::Bucket;
use s3::creds::Credentials;
use s3::region::Region;
use std::io::Cursor;
use tracing::info;

use crate::config::ObjectStoreConfig;
use crate::fetcher::S3TableReader;

/// Region and credentials resolved from configuration.
pub fn connection(config: &ObjectStoreConfig) -> Result<(Region, Credentials)> {
    let region = Region::Custom {
        region: config.get_region().to_owned(),
        endpoint: config.get_endpoint(),
    };

    let credentials = match config.credentials()? {
        Some((access_key, secret_key)) => Credentials::new(
            Some(access_key.as_str()),
            Some(secret_key.as_str()),
            None, // security_token
            None, // session_token
            None, // expiration
        )?,
        None => Credentials::anonymous()?,
    };

    Ok((region, credentials))
}

/// Reader for `s3://` sources sharing the object store's connection settings.
pub fn table_reader(config: &ObjectStoreConfig) -> Result<S3TableReader> {
    let (region, credentials) = connection(config)?;
    Ok(S3TableReader::new(region, credentials, config.is_path_style()))
}

/// Archive key of a cleaned table: `clean/<table>/<YYYYMMDD>-<HHMMSS>.parquet`.
pub fn archive_key(table: &str, at: DateTime<Utc>) -> String {
    format!(
        "clean/{}/{}-{}.parquet",
        table,
        at.format("%Y%m%d"),
        at.format("%H%M%S")
    )
}

pub fn parquet_bytes(frame: &DataFrame) -> Result<Vec<u8>> {
    let mut buffer = Cursor::new(Vec::new());
    let mut frame = frame.clone();
    ParquetWriter::new(&mut buffer).finish(&mut frame)?;
    Ok(buffer.into_inner())
}

/// Bucket used to archive hardened tables.
pub struct ObjectStore {
    bucket: Bucket,
}

impl ObjectStore {
    pub fn from_config(config: &ObjectStoreConfig, bucket_name: &str) -> Result<Self> {
        if bucket_name.is_empty() {
            return Err(anyhow!("Bucket name cannot be empty"));
        }
        let (region, credentials) = connection(config)?;
        let bucket = Bucket::new(bucket_name, region, credentials)?;

        let bucket = if config.is_path_style() {
            *bucket.with_path_style()
        } else {
            *bucket
        };

        Ok(ObjectStore { bucket })
    }

    pub async fn put_object(&self, key: &str, data: &[u8]) -> Result<()> {
        let response = self.bucket.put_object(key, data).await?;

        if response.status_code() == 200 {
            Ok(())
        } else {
            Err(anyhow!(
                "Failed to store object {}: HTTP {}",
                key,
                response.status_code()
            ))
        }
    }

    pub async fn get_object(&self, key: &str) -> Result<Vec<u8>> {
        let response = self.bucket.get_object(key).await?;

        if response.status_code() == 200 {
            Ok(response.bytes().to_vec())
        } else {
            Err(anyhow!(
                "Failed to get object {}: HTTP {}",
                key,
                response.status_code()
            ))
        }
    }

    pub async fn store_parquet(&self, table: &str, data: &[u8]) -> Result<String> {
        let key = archive_key(table, Utc::now());
        self.put_object(&key, data).await?;
        info!("Stored Parquet file: {}/{}", self.bucket.name, key);
        Ok(key)
    }
}
