use serde::{Deserialize, Serialize};
use std::fmt;

/// The six retail entities the pipeline moves into the star schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Users,
    Cards,
    Stores,
    Products,
    Orders,
    DateTimes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableRole {
    Dimension,
    Fact,
}

impl EntityKind {
    /// Load order: dimensions first, the fact table last.
    pub const ALL: [EntityKind; 6] = [
        EntityKind::Users,
        EntityKind::Cards,
        EntityKind::Stores,
        EntityKind::Products,
        EntityKind::DateTimes,
        EntityKind::Orders,
    ];

    pub fn table_name(self) -> &'static str {
        match self {
            EntityKind::Users => "dim_users",
            EntityKind::Cards => "dim_card_details",
            EntityKind::Stores => "dim_store_details",
            EntityKind::Products => "dim_products",
            EntityKind::Orders => "orders_table",
            EntityKind::DateTimes => "dim_date_times",
        }
    }

    pub fn role(self) -> TableRole {
        match self {
            EntityKind::Orders => TableRole::Fact,
            _ => TableRole::Dimension,
        }
    }

    /// Primary key column of a dimension table.
    pub fn key_column(self) -> Option<&'static str> {
        match self {
            EntityKind::Users => Some("user_uuid"),
            EntityKind::Cards => Some("card_number"),
            EntityKind::Stores => Some("store_code"),
            EntityKind::Products => Some("product_code"),
            EntityKind::DateTimes => Some("date_uuid"),
            EntityKind::Orders => None,
        }
    }

    pub fn from_table_name(name: &str) -> Option<EntityKind> {
        EntityKind::ALL
            .into_iter()
            .find(|kind| kind.table_name() == name)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            EntityKind::Users => "users",
            EntityKind::Cards => "cards",
            EntityKind::Stores => "stores",
            EntityKind::Products => "products",
            EntityKind::Orders => "orders",
            EntityKind::DateTimes => "date_times",
        };
        write!(f, "{}", label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fact_table_loads_last() {
        assert_eq!(EntityKind::ALL.last(), Some(&EntityKind::Orders));
        assert_eq!(EntityKind::Orders.role(), TableRole::Fact);
        assert!(EntityKind::Orders.key_column().is_none());
    }

    #[test]
    fn test_table_name_lookup() {
        assert_eq!(
            EntityKind::from_table_name("dim_store_details"),
            Some(EntityKind::Stores)
        );
        assert_eq!(EntityKind::from_table_name("legacy_users"), None);
    }

    #[test]
    fn test_entity_names_deserialize_from_config() {
        let kind: EntityKind = toml::from_str::<std::collections::HashMap<String, EntityKind>>(
            "entity = \"date_times\"",
        )
        .unwrap()["entity"];
        assert_eq!(kind, EntityKind::DateTimes);
    }
}
