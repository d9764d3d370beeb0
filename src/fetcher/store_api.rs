use async_trait::async_trait;
use polars::prelude::DataFrame;
use serde_json::Value;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};
use wreq::Client;

use super::TableReader;
use super::http_fetcher::build_client;
use super::records::records_to_frame;
use crate::config::StoreApiConfig;
use crate::error::IngestionError;

const API_KEY_HEADER: &str = "x-api-key";
const STORE_NUMBER_PLACEHOLDER: &str = "{store_number}";

/// Fixed-delay retry for server-side failures.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    /// Pause before the next attempt, or `None` once `attempt` was the last one.
    pub fn pause_after(&self, attempt: u32) -> Option<Duration> {
        (attempt < self.max_attempts).then_some(self.delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            delay: Duration::from_secs(2),
        }
    }
}

/// What to do with a store detail response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusAction {
    Accept,
    Retry,
    Skip,
}

/// Reads the `number_stores` field; counts beyond `u32` are rejected.
pub fn store_count(body: &Value) -> Option<u32> {
    body.get("number_stores")
        .and_then(Value::as_u64)
        .and_then(|n| u32::try_from(n).ok())
}

pub fn classify_status(status: u16) -> StatusAction {
    match status {
        200 => StatusAction::Accept,
        s if s >= 500 => StatusAction::Retry,
        _ => StatusAction::Skip,
    }
}

/// Reads the store count, then every store's details one request at a time.
pub struct StoreApiFetcher {
    client: Client,
    number_stores_url: String,
    store_details_url: String,
    api_key: String,
    retry: RetryPolicy,
}

impl StoreApiFetcher {
    pub fn new(config: &StoreApiConfig, api_key: String) -> Result<Self, IngestionError> {
        Ok(StoreApiFetcher {
            client: build_client()?,
            number_stores_url: config.number_stores_url.clone(),
            store_details_url: config.store_details_url.clone(),
            api_key,
            retry: config.retry_policy(),
        })
    }

    pub fn store_url(&self, store_number: u32) -> String {
        self.store_details_url
            .replace(STORE_NUMBER_PLACEHOLDER, &store_number.to_string())
    }

    async fn get(&self, url: &str) -> Result<wreq::Response, IngestionError> {
        self.client
            .get(url)
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await
            .map_err(|e| IngestionError::Transport {
                url: url.to_string(),
                reason: e.to_string(),
            })
    }

    async fn json_body(response: wreq::Response, url: &str) -> Result<Value, IngestionError> {
        response.json().await.map_err(|e| IngestionError::Parse {
            source_id: url.to_string(),
            reason: e.to_string(),
        })
    }

    pub async fn number_of_stores(&self) -> Result<u32, IngestionError> {
        let url = &self.number_stores_url;
        let response = self.get(url).await?;
        let status = response.status().as_u16();
        if status != 200 {
            return Err(IngestionError::Http {
                url: url.clone(),
                status,
            });
        }

        let body = Self::json_body(response, url).await?;
        store_count(&body).ok_or_else(|| IngestionError::Parse {
            source_id: url.clone(),
            reason: "missing or out-of-range `number_stores`".to_string(),
        })
    }

    /// One store's details. `None` when the store is skipped or retries run out.
    pub async fn fetch_store(&self, store_number: u32) -> Result<Option<Value>, IngestionError> {
        let url = self.store_url(store_number);

        for attempt in 1..=self.retry.max_attempts {
            let response = match self.get(&url).await {
                Ok(response) => response,
                Err(e) => {
                    warn!(
                        "Request for store {} failed (attempt {} of {}): {}",
                        store_number, attempt, self.retry.max_attempts, e
                    );
                    if let Some(pause) = self.retry.pause_after(attempt) {
                        sleep(pause).await;
                    }
                    continue;
                }
            };

            let status = response.status().as_u16();
            match classify_status(status) {
                StatusAction::Accept => return Ok(Some(Self::json_body(response, &url).await?)),
                StatusAction::Retry => {
                    warn!(
                        "Server error {} for store {} (attempt {} of {}), retrying",
                        status, store_number, attempt, self.retry.max_attempts
                    );
                    if let Some(pause) = self.retry.pause_after(attempt) {
                        sleep(pause).await;
                    }
                }
                StatusAction::Skip => {
                    error!("Failed to retrieve store {}: HTTP {}", store_number, status);
                    return Ok(None);
                }
            }
        }

        error!(
            "Giving up on store {} after {} attempts",
            store_number, self.retry.max_attempts
        );
        Ok(None)
    }

    pub async fn fetch_all_stores(&self) -> Result<Vec<Value>, IngestionError> {
        let total = self.number_of_stores().await?;
        info!("Store API reports {} stores", total);

        let mut stores = Vec::with_capacity(total as usize);
        let mut skipped = 0;
        for store_number in 0..total {
            match self.fetch_store(store_number).await? {
                Some(store) => stores.push(store),
                None => skipped += 1,
            }
        }

        info!("Retrieved {} stores, skipped {}", stores.len(), skipped);
        Ok(stores)
    }
}

#[async_trait]
impl TableReader for StoreApiFetcher {
    /// The source identifier is ignored; the endpoints come from configuration.
    async fn read_table(&self, _source: &str) -> Result<DataFrame, IngestionError> {
        let stores = self.fetch_all_stores().await?;
        records_to_frame(&Value::Array(stores), &self.number_stores_url)
    }
}
