use async_trait::async_trait;
use polars::prelude::DataFrame;
use serde_json::Value;
use tracing::{error, info};
use wreq::Client;
use wreq_util::Emulation;

use super::TableReader;
use super::records::records_to_frame;
use crate::error::IngestionError;

/// Builds the browser-emulating client shared by the HTTP sources.
pub fn build_client() -> Result<Client, IngestionError> {
    Client::builder()
        .emulation(Emulation::Firefox136)
        .build()
        .map_err(|e| IngestionError::Transport {
            url: String::new(),
            reason: e.to_string(),
        })
}

/// A JSON document served over HTTP(S), such as the date events feed.
pub struct JsonFeedReader {
    client: Client,
}

impl JsonFeedReader {
    pub fn new() -> Result<Self, IngestionError> {
        Ok(JsonFeedReader {
            client: build_client()?,
        })
    }

    pub async fn fetch_json(&self, url: &str) -> Result<Value, IngestionError> {
        let response = self
            .client
            .get(url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| IngestionError::Transport {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            error!("HTTP error from {}: {}", url, status);
            return Err(IngestionError::Http {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        response.json().await.map_err(|e| IngestionError::Parse {
            source_id: url.to_string(),
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl TableReader for JsonFeedReader {
    async fn read_table(&self, source: &str) -> Result<DataFrame, IngestionError> {
        info!("Fetching JSON feed {}", source);
        let payload = self.fetch_json(source).await?;
        let frame = records_to_frame(&payload, source)?;
        info!("Fetched {} rows from {}", frame.height(), source);
        Ok(frame)
    }
}
