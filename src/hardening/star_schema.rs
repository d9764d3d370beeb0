use super::directive::{in_phase_order, Band, Directive, ValueShape};
use super::keys::ForeignKeySpec;
use super::ColumnType;
use crate::models::EntityKind;

/// Directives and key of one persisted table.
#[derive(Debug, Clone, PartialEq)]
pub struct TablePlan {
    pub entity: EntityKind,
    pub directives: Vec<Directive>,
    pub primary_key: Option<String>,
}

impl TablePlan {
    pub fn table(&self) -> &'static str {
        self.entity.table_name()
    }
}

/// The whole hardening protocol for the retail star schema: per-table directives,
/// then dimension primary keys, then the fact table's foreign keys.
#[derive(Debug, Clone, PartialEq)]
pub struct StarSchemaPlan {
    pub tables: Vec<TablePlan>,
    pub fact: EntityKind,
    pub foreign_keys: Vec<ForeignKeySpec>,
}

impl StarSchemaPlan {
    pub fn standard() -> Self {
        let tables = EntityKind::ALL
            .into_iter()
            .map(|entity| TablePlan {
                entity,
                directives: directives_for(entity),
                primary_key: entity.key_column().map(str::to_string),
            })
            .collect();

        let foreign_key = |entity: EntityKind| {
            let column = entity.key_column().unwrap_or_default();
            ForeignKeySpec::new(column, entity.table_name(), column)
        };

        StarSchemaPlan {
            tables,
            fact: EntityKind::Orders,
            foreign_keys: vec![
                foreign_key(EntityKind::DateTimes),
                foreign_key(EntityKind::Users),
                foreign_key(EntityKind::Cards).backfilled(),
                foreign_key(EntityKind::Stores),
                foreign_key(EntityKind::Products),
            ],
        }
    }

    pub fn table(&self, entity: EntityKind) -> Option<&TablePlan> {
        self.tables.iter().find(|plan| plan.entity == entity)
    }

    /// Tables that get a primary key, in installation order.
    pub fn keyed_tables(&self) -> impl Iterator<Item = (&'static str, &str)> {
        self.tables.iter().filter_map(|plan| {
            plan.primary_key
                .as_deref()
                .map(|key| (plan.table(), key))
        })
    }
}

/// Product weight bands in kilograms.
pub fn weight_bands() -> Vec<Band> {
    vec![
        Band::new(2.0, "Light"),
        Band::new(40.0, "Mid_Sized"),
        Band::new(140.0, "Heavy"),
    ]
}

/// Appends, for each cast, a deletion of the rows the cast could not convert and
/// then the cast itself.
fn with_casts(mut directives: Vec<Directive>, casts: &[(&str, ColumnType)]) -> Vec<Directive> {
    for &(column, to) in casts {
        if to != ColumnType::Text {
            directives.push(Directive::delete_unconvertible(column, to));
        }
        directives.push(Directive::cast(column, to));
    }
    directives
}

fn directives_for(entity: EntityKind) -> Vec<Directive> {
    match entity {
        EntityKind::Users => with_casts(
            vec![Directive::delete_unless("user_uuid", ValueShape::Uuid)],
            &[
                ("user_uuid", ColumnType::Uuid),
                ("first_name", ColumnType::VarChar(255)),
                ("last_name", ColumnType::VarChar(255)),
                ("country_code", ColumnType::VarChar(255)),
                ("date_of_birth", ColumnType::Date),
                ("join_date", ColumnType::Date),
            ],
        ),
        EntityKind::Cards => with_casts(
            vec![
                Directive::trim("date_payment_confirmed"),
                Directive::null_sentinels("date_payment_confirmed", &["null", "n/a", "na"]),
                Directive::reformat_dates("date_payment_confirmed", "%d/%m/%Y"),
                Directive::null_unless("date_payment_confirmed", ValueShape::IsoDate),
            ],
            &[
                ("card_number", ColumnType::VarChar(50)),
                ("expiry_date", ColumnType::VarChar(50)),
                ("date_payment_confirmed", ColumnType::Date),
            ],
        ),
        EntityKind::Stores => with_casts(
            vec![
                Directive::null_sentinels("staff_numbers", &["null", "n/a", "J78"]),
                Directive::null_sentinels("longitude", &["n/a", "null"]),
                Directive::null_sentinels("latitude", &["n/a", "null"]),
                Directive::delete_unless("staff_numbers", ValueShape::Digits),
                Directive::delete_unless("longitude", ValueShape::SignedDecimal),
                Directive::delete_unless("latitude", ValueShape::SignedDecimal),
            ],
            &[
                ("longitude", ColumnType::Float),
                ("latitude", ColumnType::Float),
                ("locality", ColumnType::VarChar(255)),
                ("store_code", ColumnType::VarChar(50)),
                ("country_code", ColumnType::VarChar(255)),
                ("staff_numbers", ColumnType::SmallInt),
                ("store_type", ColumnType::VarChar(255)),
                ("continent", ColumnType::VarChar(255)),
                ("opening_date", ColumnType::Date),
            ],
        ),
        EntityKind::Products => with_casts(
            vec![
                Directive::rename("removed", "still_available"),
                Directive::map_labels(
                    "still_available",
                    &[
                        ("still_avaliable", "true"),
                        ("not removed", "true"),
                        ("unavailable", "false"),
                        ("removed", "false"),
                    ],
                    "false",
                ),
                Directive::bucketize("weight", "weight_class", weight_bands(), "Truck_Required"),
                Directive::null_unless("product_price", ValueShape::Decimal),
                Directive::null_unless("date_added", ValueShape::IsoDate),
                Directive::null_unless("uuid", ValueShape::Uuid),
            ],
            &[
                ("product_price", ColumnType::Float),
                ("weight", ColumnType::Float),
                ("EAN", ColumnType::VarChar(50)),
                ("product_code", ColumnType::VarChar(50)),
                ("date_added", ColumnType::Date),
                ("uuid", ColumnType::Uuid),
                ("still_available", ColumnType::Bool),
                ("weight_class", ColumnType::VarChar(50)),
            ],
        ),
        EntityKind::DateTimes => with_casts(
            vec![Directive::null_unless("date_uuid", ValueShape::Uuid)],
            &[
                ("month", ColumnType::VarChar(50)),
                ("year", ColumnType::VarChar(50)),
                ("day", ColumnType::VarChar(50)),
                ("time_period", ColumnType::VarChar(50)),
                ("date", ColumnType::Date),
                ("date_uuid", ColumnType::Uuid),
            ],
        ),
        EntityKind::Orders => with_casts(
            Vec::new(),
            &[
                ("date_uuid", ColumnType::Uuid),
                ("user_uuid", ColumnType::Uuid),
                ("card_number", ColumnType::VarChar(50)),
                ("store_code", ColumnType::VarChar(50)),
                ("product_code", ColumnType::VarChar(50)),
                ("product_quantity", ColumnType::SmallInt),
            ],
        ),
    }
}
