use anyhow::{Context, Result};
use polars::prelude::DataFrame;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use crate::config::SourcesConfig;
use crate::error::{CleaningError, HardeningError, WarehouseError};
use crate::fetcher::TableReader;
use crate::hardening::{
    StarSchemaPlan, harden_schema, install_foreign_keys, install_primary_key,
};
use crate::models::EntityKind;
use crate::processor::{CleanOutcome, DataCleaner};
use crate::storage::object_store::parquet_bytes;
use crate::storage::{LoadSink, Warehouse, WriteMode};

/// Result of moving one entity from its source into the warehouse.
#[derive(Debug)]
pub struct EntityLoad {
    pub entity: EntityKind,
    pub result: Result<LoadedTable>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedTable {
    pub table: String,
    pub raw_rows: usize,
    pub rows: usize,
    pub rejected: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    Directives,
    PrimaryKey,
    ForeignKeys,
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepKind::Directives => write!(f, "directives"),
            StepKind::PrimaryKey => write!(f, "primary key"),
            StepKind::ForeignKeys => write!(f, "foreign keys"),
        }
    }
}

/// Outcome of one hardening step; on success, a short description of what changed.
#[derive(Debug)]
pub struct StepOutcome {
    pub kind: StepKind,
    pub table: String,
    pub result: Result<String, HardeningError>,
}

#[derive(Debug, Default)]
pub struct HardeningSummary {
    pub steps: Vec<StepOutcome>,
}

impl HardeningSummary {
    pub fn failures(&self) -> impl Iterator<Item = &StepOutcome> {
        self.steps.iter().filter(|step| step.result.is_err())
    }

    pub fn is_clean(&self) -> bool {
        self.failures().next().is_none()
    }
}

/// Ingest, clean, load and harden, one entity and one step at a time. A failure is
/// recorded and the run moves on to the next entity or step.
pub struct Pipeline {
    reader: Box<dyn TableReader>,
    cleaner: DataCleaner,
    warehouse: Warehouse,
}

impl Pipeline {
    pub fn new(reader: Box<dyn TableReader>, cleaner: DataCleaner) -> Self {
        Pipeline {
            reader,
            cleaner,
            warehouse: Warehouse::new(),
        }
    }

    pub fn warehouse(&self) -> &Warehouse {
        &self.warehouse
    }

    pub fn warehouse_mut(&mut self) -> &mut Warehouse {
        &mut self.warehouse
    }

    pub fn clean(&self, entity: EntityKind, raw: &DataFrame) -> Result<CleanOutcome, CleaningError> {
        match entity {
            EntityKind::Users => self.cleaner.clean_users(raw),
            EntityKind::Cards => self.cleaner.clean_cards(raw),
            EntityKind::Stores => self.cleaner.clean_stores(raw),
            EntityKind::Products => self.cleaner.clean_products(raw),
            EntityKind::Orders => self.cleaner.clean_orders(raw),
            EntityKind::DateTimes => self.cleaner.clean_date_times(raw),
        }
    }

    /// Cleans `raw` and replaces the entity's table with the result.
    pub fn load_frame(&mut self, entity: EntityKind, raw: &DataFrame) -> Result<LoadedTable> {
        let outcome = self
            .clean(entity, raw)
            .with_context(|| format!("Failed to clean {}", entity))?;

        let table = entity.table_name();
        let rows = self
            .warehouse
            .write_table(&outcome.frame, table, WriteMode::Replace)
            .with_context(|| format!("Failed to write {}", table))?;

        Ok(LoadedTable {
            table: table.to_string(),
            raw_rows: raw.height(),
            rows,
            rejected: outcome.rejected,
        })
    }

    pub async fn run_entity(&mut self, entity: EntityKind, source: &str) -> Result<LoadedTable> {
        let raw = self
            .reader
            .read_table(source)
            .await
            .with_context(|| format!("Failed to read {} from {}", entity, source))?;
        self.load_frame(entity, &raw)
    }

    /// Loads every configured entity in load order.
    pub async fn load_all(&mut self, sources: &SourcesConfig) -> Vec<EntityLoad> {
        let mut loads = Vec::new();

        for entity in EntityKind::ALL {
            let Some(source) = sources.get(entity) else {
                warn!("No source configured for {}, skipping", entity);
                continue;
            };

            info!("=== Loading {} from {} ===", entity, source);
            let result = self.run_entity(entity, source).await;
            match &result {
                Ok(loaded) => info!(
                    "✅ {}: {} raw rows, {} loaded, {} rejected",
                    loaded.table, loaded.raw_rows, loaded.rows, loaded.rejected
                ),
                Err(e) => error!("❌ {} not loaded: {:#}", entity, e),
            }
            loads.push(EntityLoad { entity, result });
        }

        loads
    }

    /// Applies the plan: every table's directives, then every primary key, then the
    /// fact table's foreign keys.
    pub fn harden(&mut self, plan: &StarSchemaPlan) -> HardeningSummary {
        let mut summary = HardeningSummary::default();

        for table_plan in &plan.tables {
            let table = table_plan.table();
            let result = harden_schema(&mut self.warehouse, table, &table_plan.directives).map(
                |report| {
                    format!(
                        "{} directive(s), {} row change(s)",
                        report.outcomes.len(),
                        report.affected_rows()
                    )
                },
            );
            summary.record(StepKind::Directives, table, result);
        }

        for (table, key) in plan.keyed_tables() {
            let result = install_primary_key(&mut self.warehouse, table, key).map(|report| {
                if report.already_installed {
                    format!("{} already keyed", report.column)
                } else {
                    format!(
                        "{} keyed ({} null(s) filled, {} duplicate(s) renamed)",
                        report.column, report.filled_nulls, report.renamed_duplicates
                    )
                }
            });
            summary.record(StepKind::PrimaryKey, table, result);
        }

        let fact = plan.fact.table_name();
        let result = if self.warehouse.contains(fact) {
            install_foreign_keys(&mut self.warehouse, fact, &plan.foreign_keys).map(|report| {
                let stubs: usize = report.backfilled.iter().map(|(_, n)| n).sum();
                format!(
                    "{} constraint(s), {} stub row(s) back-filled",
                    report.installed.len(),
                    stubs
                )
            })
        } else {
            Err(WarehouseError::TableNotFound(fact.to_string()).into())
        };
        summary.record(StepKind::ForeignKeys, fact, result);

        summary
    }

    /// Writes every stored table to `<dir>/<table>.parquet`.
    pub fn export_parquet(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create output directory {}", dir.display()))?;

        let mut written = Vec::new();
        for table in self.warehouse.table_names() {
            let frame = self.warehouse.read_table(&table)?;
            let bytes = parquet_bytes(&frame)
                .with_context(|| format!("Failed to encode {} as Parquet", table))?;
            let path = dir.join(format!("{}.parquet", table));
            std::fs::write(&path, bytes)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!("💾 Wrote {} rows to {}", frame.height(), path.display());
            written.push(path);
        }
        Ok(written)
    }
}

impl HardeningSummary {
    fn record(&mut self, kind: StepKind, table: &str, result: Result<String, HardeningError>) {
        match &result {
            Ok(detail) => info!("✅ {} {}: {}", table, kind, detail),
            Err(e) => error!("❌ {} {} failed: {}", table, kind, e),
        }
        self.steps.push(StepOutcome {
            kind,
            table: table.to_string(),
            result,
        });
    }
}
