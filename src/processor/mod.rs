pub mod data_cleaner;
pub mod date_cleaner;
pub mod dates;
pub mod frame_ops;
pub mod product_cleaner;
pub mod unit_converter;

pub use data_cleaner::{CleanOutcome, CleaningRules, DataCleaner};
pub use unit_converter::{MassUnit, UnitConverter};
