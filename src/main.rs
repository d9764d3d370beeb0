use anyhow::{Context, Result};
use std::env;
use tracing::{error, info, warn};

use retail_etl::config::PipelineConfig;
use retail_etl::fetcher::{
    CsvFileReader, JsonFeedReader, STORE_API_SOURCE, SourceRouter, StoreApiFetcher,
};
use retail_etl::hardening::StarSchemaPlan;
use retail_etl::hardening::sql::render_plan;
use retail_etl::pipeline::Pipeline;
use retail_etl::processor::DataCleaner;
use retail_etl::storage::ObjectStore;
use retail_etl::storage::object_store::{parquet_bytes, table_reader};

const DEFAULT_CONFIG: &str = "src/configs/pipeline.toml";

fn build_router(config: &PipelineConfig) -> Result<SourceRouter> {
    let csv = match &config.sources.base_dir {
        Some(dir) => CsvFileReader::with_base_dir(dir),
        None => CsvFileReader::new(),
    };

    let mut router = SourceRouter::new(csv)
        .with_json_feed(JsonFeedReader::new().context("Failed to build HTTP client")?)
        .with_s3(table_reader(&config.object_store).context("Failed to set up S3 access")?);

    let wants_store_api = config.sources.stores.as_deref() == Some(STORE_API_SOURCE);
    match &config.store_api {
        Some(api) if wants_store_api => {
            let key = api.api_key()?;
            router = router.with_store_api(
                StoreApiFetcher::new(api, key).context("Failed to build store API client")?,
            );
        }
        None if wants_store_api => {
            warn!("Stores are sourced from the API but [store_api] is not configured");
        }
        _ => {}
    }

    Ok(router)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    // Load environment variables
    dotenv::dotenv().ok();

    let config_path = env::args()
        .skip(1)
        .find(|arg| !arg.starts_with('-'))
        .unwrap_or_else(|| DEFAULT_CONFIG.to_string());
    let skip_archive = env::args().any(|arg| arg == "--skip-archive");

    info!("🚀 Starting retail star schema pipeline ({})", config_path);

    let config = PipelineConfig::from_file(&config_path)
        .context("Failed to load pipeline configuration")?;
    let cleaner = DataCleaner::new(config.cleaning_rules()?)
        .context("Failed to initialize data cleaner")?;
    let router = build_router(&config)?;

    let mut pipeline = Pipeline::new(Box::new(router), cleaner);

    let loads = pipeline.load_all(&config.sources).await;
    let loaded = loads.iter().filter(|load| load.result.is_ok()).count();

    let plan = StarSchemaPlan::standard();
    let summary = pipeline.harden(&plan);

    let sql_path = &config.output.sql_script;
    if let Some(parent) = sql_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(sql_path, render_plan(&plan))
        .with_context(|| format!("Failed to write SQL script {}", sql_path.display()))?;
    info!("📝 Wrote hardening script to {}", sql_path.display());

    pipeline
        .export_parquet(&config.output.parquet_dir)
        .context("Failed to export hardened tables")?;

    match &config.object_store.archive_bucket {
        Some(bucket) if !skip_archive => {
            let store = ObjectStore::from_config(&config.object_store, bucket)
                .context("Failed to initialize object storage")?;
            for table in pipeline.warehouse().table_names() {
                let frame = pipeline.warehouse().read_table(&table)?;
                let bytes = parquet_bytes(&frame)?;
                if let Err(e) = store.store_parquet(&table, &bytes).await {
                    error!("❌ Failed to archive {}: {:#}", table, e);
                }
            }
        }
        _ => info!("Archive upload skipped"),
    }

    info!("\n=== Pipeline Summary ===");
    info!("✅ Loaded {} out of {} configured entities", loaded, loads.len());
    for load in loads.iter().filter(|load| load.result.is_err()) {
        if let Err(e) = &load.result {
            warn!("⚠️ {}: {:#}", load.entity, e);
        }
    }
    for step in summary.failures() {
        if let Err(e) = &step.result {
            warn!("⚠️ {} {}: {}", step.table, step.kind, e);
        }
    }

    if summary.is_clean() && loaded == loads.len() {
        info!("🎉 Star schema hardened successfully!");
    } else {
        warn!(
            "⚠️ Pipeline finished with {} hardening failure(s)",
            summary.failures().count()
        );
    }

    Ok(())
}
