use anyhow::{Context, Result, anyhow};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::fetcher::RetryPolicy;
use crate::models::EntityKind;
use crate::processor::CleaningRules;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub sources: SourcesConfig,
    pub store_api: Option<StoreApiConfig>,
    #[serde(default)]
    pub object_store: ObjectStoreConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub cleaning: CleaningSection,
}

/// Where each entity's raw table comes from: a CSV path, an `s3://` URL, an HTTP(S)
/// JSON feed or `api://stores`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourcesConfig {
    pub users: Option<String>,
    pub cards: Option<String>,
    pub stores: Option<String>,
    pub products: Option<String>,
    pub orders: Option<String>,
    pub date_times: Option<String>,
    /// Relative CSV paths resolve against this directory.
    pub base_dir: Option<PathBuf>,
}

impl SourcesConfig {
    pub fn get(&self, entity: EntityKind) -> Option<&str> {
        let source = match entity {
            EntityKind::Users => &self.users,
            EntityKind::Cards => &self.cards,
            EntityKind::Stores => &self.stores,
            EntityKind::Products => &self.products,
            EntityKind::Orders => &self.orders,
            EntityKind::DateTimes => &self.date_times,
        };
        source.as_deref()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreApiConfig {
    pub number_stores_url: String,
    /// Detail endpoint with a `{store_number}` placeholder.
    pub store_details_url: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
}

fn default_api_key_env() -> String {
    "STORE_API_KEY".to_string()
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_delay_secs() -> u64 {
    2
}

impl StoreApiConfig {
    pub fn api_key(&self) -> Result<String> {
        env::var(&self.api_key_env)
            .with_context(|| format!("Missing environment variable: {}", self.api_key_env))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            delay: Duration::from_secs(self.retry_delay_secs),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectStoreConfig {
    pub region: Option<String>,
    /// Custom endpoint (MinIO and friends). Defaults to the AWS endpoint of `region`.
    pub endpoint: Option<String>,
    pub path_style: Option<bool>,
    pub env_access_key: Option<String>,
    pub env_secret_key: Option<String>,
    /// Cleaned tables are uploaded here when set.
    pub archive_bucket: Option<String>,
}

impl Default for ObjectStoreConfig {
    fn default() -> Self {
        Self {
            region: Some("eu-west-1".to_string()),
            endpoint: None,
            path_style: None,
            env_access_key: None,
            env_secret_key: None,
            archive_bucket: None,
        }
    }
}

impl ObjectStoreConfig {
    pub fn get_region(&self) -> &str {
        self.region.as_deref().unwrap_or("eu-west-1")
    }

    pub fn get_endpoint(&self) -> String {
        match &self.endpoint {
            Some(endpoint) => endpoint.clone(),
            None => format!("https://s3.{}.amazonaws.com", self.get_region()),
        }
    }

    /// Path-style addressing is the default only for custom endpoints.
    pub fn is_path_style(&self) -> bool {
        self.path_style.unwrap_or(self.endpoint.is_some())
    }

    /// Access and secret key from the environment. `None` means anonymous access;
    /// setting only one of the two is an error.
    pub fn credentials(&self) -> Result<Option<(String, String)>> {
        let access_key_var = self.env_access_key.as_deref().unwrap_or("AWS_ACCESS_KEY_ID");
        let secret_key_var = self
            .env_secret_key
            .as_deref()
            .unwrap_or("AWS_SECRET_ACCESS_KEY");

        match (env::var(access_key_var), env::var(secret_key_var)) {
            (Ok(access), Ok(secret)) => Ok(Some((access, secret))),
            (Err(_), Err(_)) => Ok(None),
            (Ok(_), Err(_)) => Err(anyhow!("Missing environment variable: {}", secret_key_var)),
            (Err(_), Ok(_)) => Err(anyhow!("Missing environment variable: {}", access_key_var)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    pub parquet_dir: PathBuf,
    pub sql_script: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            parquet_dir: PathBuf::from("output"),
            sql_script: PathBuf::from("output/harden_star_schema.sql"),
        }
    }
}

/// Overrides for the cleaning constants. Anything left out keeps its default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CleaningSection {
    pub sentinel_date: Option<String>,
    pub allowed_country_codes: Option<Vec<String>>,
    pub unknown_store_name: Option<String>,
    pub default_staff_numbers: Option<String>,
    pub date_columns: Option<Vec<String>>,
    pub max_transaction_amount: Option<f64>,
    pub currency_symbol: Option<String>,
}

impl CleaningSection {
    pub fn to_rules(&self) -> Result<CleaningRules> {
        let mut rules = CleaningRules::default();

        if let Some(sentinel) = &self.sentinel_date {
            rules.sentinel_date = NaiveDate::parse_from_str(sentinel, "%Y-%m-%d")
                .with_context(|| format!("Invalid sentinel_date: {}", sentinel))?;
        }
        if let Some(codes) = &self.allowed_country_codes {
            rules.allowed_country_codes = codes.clone();
        }
        if let Some(name) = &self.unknown_store_name {
            rules.unknown_store_name = name.clone();
        }
        if let Some(staff) = &self.default_staff_numbers {
            rules.default_staff_numbers = staff.clone();
        }
        if let Some(columns) = &self.date_columns {
            rules.date_columns = columns.clone();
        }
        if let Some(limit) = self.max_transaction_amount {
            if limit <= 0.0 {
                return Err(anyhow!("max_transaction_amount must be positive, got {}", limit));
            }
            rules.max_transaction_amount = limit;
        }
        if let Some(symbol) = &self.currency_symbol {
            rules.currency_symbol = symbol.clone();
        }

        Ok(rules)
    }
}

impl PipelineConfig {
    pub fn from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read pipeline config file: {}", path))?;
        Self::from_toml(&content)
            .with_context(|| format!("Failed to parse pipeline config file: {}", path))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: PipelineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(api) = &self.store_api {
            if !api.store_details_url.contains("{store_number}") {
                return Err(anyhow!(
                    "store_details_url must contain a {{store_number}} placeholder"
                ));
            }
        }
        if let Some(bucket) = &self.object_store.archive_bucket {
            if bucket.is_empty() {
                return Err(anyhow!("archive_bucket cannot be empty"));
            }
        }
        self.cleaning.to_rules()?;
        Ok(())
    }

    pub fn cleaning_rules(&self) -> Result<CleaningRules> {
        self.cleaning.to_rules()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[sources]
users = "exports/legacy_users.csv"
stores = "api://stores"
products = "s3://data-handling-public/products.csv"

[store_api]
number_stores_url = "https://api.example.com/prod/number_stores"
store_details_url = "https://api.example.com/prod/store_details/{store_number}"

[object_store]
region = "eu-west-1"

[cleaning]
sentinel_date = "1970-01-01"
allowed_country_codes = ["GB", "DE"]
"#;

    #[test]
    fn test_parse_sample_config() {
        let config = PipelineConfig::from_toml(SAMPLE).unwrap();

        assert_eq!(config.sources.get(EntityKind::Stores), Some("api://stores"));
        assert_eq!(config.sources.get(EntityKind::Orders), None);

        let api = config.store_api.as_ref().unwrap();
        assert_eq!(api.api_key_env, "STORE_API_KEY");
        assert_eq!(api.retry_policy(), RetryPolicy::default());

        let rules = config.cleaning_rules().unwrap();
        assert_eq!(rules.sentinel_date, NaiveDate::from_ymd_opt(1970, 1, 1).unwrap());
        assert_eq!(rules.allowed_country_codes, vec!["GB", "DE"]);
        assert_eq!(rules.unknown_store_name, "Unknown");
    }

    #[test]
    fn test_default_object_store_uses_aws_endpoint() {
        let config = ObjectStoreConfig::default();
        assert_eq!(config.get_endpoint(), "https://s3.eu-west-1.amazonaws.com");
        assert!(!config.is_path_style());

        let minio = ObjectStoreConfig {
            endpoint: Some("http://localhost:9000".to_string()),
            ..ObjectStoreConfig::default()
        };
        assert!(minio.is_path_style());
    }

    #[test]
    fn test_store_url_needs_placeholder() {
        let broken = SAMPLE.replace("{store_number}", "1");
        assert!(PipelineConfig::from_toml(&broken).is_err());
    }

    #[test]
    fn test_invalid_sentinel_date() {
        let section = CleaningSection {
            sentinel_date: Some("01/01/1900".to_string()),
            ..CleaningSection::default()
        };
        assert!(section.to_rules().is_err());
    }

    #[test]
    fn test_credentials_from_environment() {
        let config = ObjectStoreConfig {
            env_access_key: Some("RETAIL_ETL_TEST_ACCESS".to_string()),
            env_secret_key: Some("RETAIL_ETL_TEST_SECRET".to_string()),
            ..ObjectStoreConfig::default()
        };
        assert!(config.credentials().unwrap().is_none());

        unsafe {
            env::set_var("RETAIL_ETL_TEST_ACCESS", "access");
            env::set_var("RETAIL_ETL_TEST_SECRET", "secret");
        }
        assert_eq!(
            config.credentials().unwrap(),
            Some(("access".to_string(), "secret".to_string()))
        );

        unsafe {
            env::remove_var("RETAIL_ETL_TEST_SECRET");
        }
        assert!(config.credentials().is_err());

        unsafe {
            env::remove_var("RETAIL_ETL_TEST_ACCESS");
        }
    }
}
