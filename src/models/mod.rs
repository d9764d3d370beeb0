pub mod entity;

pub use entity::{EntityKind, TableRole};
