pub mod object_store;
pub mod warehouse;

pub use object_store::ObjectStore;
pub use warehouse::{
    ForeignKeyConstraint, LoadSink, StoredTable, TableSchema, Warehouse, WriteMode, stringify,
};
