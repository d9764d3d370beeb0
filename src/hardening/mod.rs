pub mod column_type;
pub mod directive;
pub mod engine;
pub mod keys;
pub mod sql;
pub mod star_schema;

pub use column_type::ColumnType;
pub use directive::{Band, Directive, Phase, ValueShape};
pub use engine::{harden_schema, DirectiveOutcome, HardeningReport};
pub use keys::{
    install_foreign_keys, install_primary_key, ForeignKeyReport, ForeignKeySpec,
    PrimaryKeyReport,
};
pub use star_schema::{StarSchemaPlan, TablePlan};
