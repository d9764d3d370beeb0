pub mod config;
pub mod error;
pub mod fetcher;
pub mod hardening;
pub mod models;
pub mod pipeline;
pub mod processor;
pub mod storage;

pub use error::{CleaningError, HardeningError, IngestionError, WarehouseError};
pub use pipeline::Pipeline;
