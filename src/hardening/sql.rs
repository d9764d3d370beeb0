//! PostgreSQL rendering of hardening steps, for running the same protocol against a
//! live relational store.

use super::directive::{Band, Directive};
use super::keys::ForeignKeySpec;
use super::star_schema::StarSchemaPlan;
use super::ColumnType;

/// Double-quotes an identifier, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn postgres_type(to: ColumnType) -> String {
    match to {
        ColumnType::Text => "text".to_string(),
        ColumnType::VarChar(len) => format!("varchar({})", len),
        ColumnType::SmallInt => "smallint".to_string(),
        ColumnType::Float => "double precision".to_string(),
        ColumnType::Bool => "boolean".to_string(),
        ColumnType::Date => "date".to_string(),
        ColumnType::Uuid => "uuid".to_string(),
    }
}

fn using_expression(column: &str, to: ColumnType) -> String {
    format!("{}::{}", quote_ident(column), postgres_type(to))
}

fn normalized_label(label: &str) -> String {
    label.trim().to_lowercase().replace('_', " ")
}

/// Translates a chrono date layout into a `TO_DATE` template and a matching regex.
fn postgres_date_format(format: &str) -> (String, String) {
    let mut template = String::new();
    let mut pattern = String::from("^");
    let mut chars = format.chars();

    while let Some(c) = chars.next() {
        if c != '%' {
            template.push(c);
            pattern.push_str(&regex::escape(&c.to_string()));
            continue;
        }
        match chars.next() {
            Some('d') => {
                template.push_str("DD");
                pattern.push_str(r"\d{2}");
            }
            Some('m') => {
                template.push_str("MM");
                pattern.push_str(r"\d{2}");
            }
            Some('Y') => {
                template.push_str("YYYY");
                pattern.push_str(r"\d{4}");
            }
            Some('y') => {
                template.push_str("YY");
                pattern.push_str(r"\d{2}");
            }
            Some(other) => {
                template.push(other);
                pattern.push_str(&regex::escape(&other.to_string()));
            }
            None => {}
        }
    }
    pattern.push('$');
    (template, pattern)
}

fn bucket_case(source: &str, bands: &[Band], overflow: &str) -> String {
    let amount = format!("{}::double precision", quote_ident(source));
    let mut case = format!("CASE WHEN {} IS NULL THEN NULL", quote_ident(source));
    for band in bands {
        case.push_str(&format!(
            " WHEN {} < {} THEN {}",
            amount,
            band.below,
            quote_literal(&band.label)
        ));
    }
    case.push_str(&format!(" ELSE {} END", quote_literal(overflow)));
    case
}

/// Statements carrying out one directive.
pub fn render_directive(table: &str, directive: &Directive) -> Vec<String> {
    let t = quote_ident(table);
    match directive {
        Directive::NullSentinels { column, sentinels } => {
            let c = quote_ident(column);
            let listed: Vec<String> = sentinels
                .iter()
                .map(|s| quote_literal(&s.trim().to_lowercase()))
                .collect();
            let mut condition = format!("TRIM({}) = ''", c);
            if !listed.is_empty() {
                condition.push_str(&format!(
                    " OR LOWER(TRIM({})) IN ({})",
                    c,
                    listed.join(", ")
                ));
            }
            vec![format!("UPDATE {} SET {} = NULL WHERE {};", t, c, condition)]
        }
        Directive::TrimWhitespace { column } => {
            let c = quote_ident(column);
            vec![format!(
                "UPDATE {} SET {c} = TRIM({c}) WHERE {c} <> TRIM({c});",
                t,
                c = c
            )]
        }
        Directive::NullUnlessShape { column, shape } => {
            let c = quote_ident(column);
            vec![format!(
                "UPDATE {} SET {c} = NULL WHERE {c}::text !~ {};",
                t,
                quote_literal(shape.pattern()),
                c = c
            )]
        }
        Directive::ReformatDates {
            column,
            from_format,
        } => {
            let c = quote_ident(column);
            let (template, pattern) = postgres_date_format(from_format);
            vec![format!(
                "UPDATE {} SET {c} = TO_CHAR(TO_DATE(TRIM({c}), {}), 'YYYY-MM-DD') WHERE TRIM({c}) ~ {};",
                t,
                quote_literal(&template),
                quote_literal(&pattern),
                c = c
            )]
        }
        Directive::RenameColumn { from, to } => vec![format!(
            "DO $$ BEGIN IF EXISTS (SELECT 1 FROM information_schema.columns WHERE table_name = {} AND column_name = {}) THEN ALTER TABLE {} RENAME COLUMN {} TO {}; END IF; END $$;",
            quote_literal(table),
            quote_literal(from),
            t,
            quote_ident(from),
            quote_ident(to)
        )],
        Directive::MapLabels {
            column,
            mapping,
            default,
        } => {
            let c = quote_ident(column);
            let label = format!("REPLACE(LOWER(TRIM({})), '_', ' ')", c);
            let mut case = String::from("CASE");
            for (from, to) in mapping {
                case.push_str(&format!(
                    " WHEN {} = {} THEN {}",
                    label,
                    quote_literal(&normalized_label(from)),
                    quote_literal(to)
                ));
            }
            let mut targets: Vec<String> = Vec::new();
            for target in mapping.iter().map(|(_, to)| to).chain(std::iter::once(default)) {
                let target = quote_literal(&normalized_label(target));
                if !targets.contains(&target) {
                    targets.push(target);
                }
            }
            case.push_str(&format!(" WHEN {} IN ({}) THEN {}", label, targets.join(", "), c));
            case.push_str(&format!(" ELSE {} END", quote_literal(default)));
            vec![format!("UPDATE {} SET {} = {};", t, c, case)]
        }
        Directive::Bucketize {
            source,
            target,
            bands,
            overflow,
        } => vec![
            format!(
                "ALTER TABLE {} ADD COLUMN IF NOT EXISTS {} TEXT;",
                t,
                quote_ident(target)
            ),
            format!(
                "UPDATE {} SET {} = {};",
                t,
                quote_ident(target),
                bucket_case(source, bands, overflow)
            ),
        ],
        Directive::DeleteUnlessShape { column, shape } => vec![format!(
            "DELETE FROM {} WHERE {}::text !~ {};",
            t,
            quote_ident(column),
            quote_literal(shape.pattern())
        )],
        Directive::DeleteUnconvertible { column, to } => vec![format!(
            "DELETE FROM {} WHERE {c} IS NOT NULL AND NOT pg_input_is_valid(TRIM({c}::text), {});",
            t,
            quote_literal(&postgres_type(*to)),
            c = quote_ident(column)
        )],
        Directive::Cast { column, to } => vec![format!(
            "ALTER TABLE {} ALTER COLUMN {} TYPE {} USING {};",
            t,
            quote_ident(column),
            to,
            using_expression(column, *to)
        )],
    }
}

/// The repair-then-install sequence for a primary key, as one transaction.
pub fn render_primary_key(table: &str, column: &str, column_type: ColumnType) -> Vec<String> {
    let t = quote_ident(table);
    let c = quote_ident(column);
    let (null_condition, fresh, derived) = if column_type == ColumnType::Uuid {
        (
            format!("{} IS NULL", c),
            "gen_random_uuid()".to_string(),
            "gen_random_uuid()".to_string(),
        )
    } else {
        (
            format!("{c} IS NULL OR TRIM({c}) = '' OR LOWER({c}) = 'null'", c = c),
            "gen_random_uuid()::text".to_string(),
            format!("{} || '_' || LEFT(md5(random()::text), 8)", c),
        )
    };

    vec![
        "BEGIN;".to_string(),
        format!(
            "ALTER TABLE {} DROP CONSTRAINT IF EXISTS {};",
            t,
            quote_ident(&format!("{}_pkey", table))
        ),
        format!("UPDATE {} SET {} = {} WHERE {};", t, c, fresh, null_condition),
        format!(
            "UPDATE {t} SET {c} = {derived} WHERE ctid IN (SELECT ctid FROM (SELECT ctid, ROW_NUMBER() OVER (PARTITION BY {c}) AS occurrence FROM {t}) ranked WHERE ranked.occurrence > 1);",
            t = t,
            c = c,
            derived = derived
        ),
        format!(
            "DO $$ BEGIN IF EXISTS (SELECT 1 FROM {t} WHERE {c} IS NULL) THEN RAISE EXCEPTION {nulls}; END IF; IF EXISTS (SELECT 1 FROM {t} GROUP BY {c} HAVING COUNT(*) > 1) THEN RAISE EXCEPTION {duplicates}; END IF; END $$;",
            t = t,
            c = c,
            nulls = quote_literal(&format!("null keys remain in {}.{}", table, column)),
            duplicates = quote_literal(&format!("duplicate keys remain in {}.{}", table, column))
        ),
        format!("ALTER TABLE {} ALTER COLUMN {} SET NOT NULL;", t, c),
        format!("ALTER TABLE {} ADD PRIMARY KEY ({});", t, c),
        "COMMIT;".to_string(),
    ]
}

/// Back-fills and constraints for a fact table, as one transaction.
pub fn render_foreign_keys(fact_table: &str, specs: &[ForeignKeySpec]) -> Vec<String> {
    let fact = quote_ident(fact_table);
    let mut statements = vec!["BEGIN;".to_string()];

    for spec in specs.iter().filter(|spec| spec.backfill_missing) {
        let dimension = quote_ident(&spec.references_table);
        let key = quote_ident(&spec.references_column);
        let column = quote_ident(&spec.column);
        statements.push(format!(
            "INSERT INTO {dimension} ({key}) SELECT DISTINCT {column} FROM {fact} WHERE {column} IS NOT NULL AND {column} NOT IN (SELECT {key} FROM {dimension});",
            dimension = dimension,
            key = key,
            column = column,
            fact = fact
        ));
    }

    for spec in specs {
        statements.push(format!(
            "ALTER TABLE {} DROP CONSTRAINT IF EXISTS {};",
            fact,
            quote_ident(&spec.constraint_name())
        ));
        statements.push(format!(
            "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({});",
            fact,
            quote_ident(&spec.constraint_name()),
            quote_ident(&spec.column),
            quote_ident(&spec.references_table),
            quote_ident(&spec.references_column)
        ));
    }

    statements.push("COMMIT;".to_string());
    statements
}

fn declared_type(plan: &StarSchemaPlan, table: &str, column: &str) -> ColumnType {
    plan.tables
        .iter()
        .filter(|t| t.table() == table)
        .flat_map(|t| t.directives.iter())
        .find_map(|d| match d {
            Directive::Cast { column: c, to } if c == column => Some(*to),
            _ => None,
        })
        .unwrap_or(ColumnType::Text)
}

/// The full hardening script for a plan: directives per table in phase order,
/// then primary keys, then foreign keys.
pub fn render_plan(plan: &StarSchemaPlan) -> String {
    let mut lines = Vec::new();

    for table in &plan.tables {
        lines.push(format!("-- {}", table.table()));
        for (_, directive) in super::directive::in_phase_order(&table.directives) {
            lines.extend(render_directive(table.table(), directive));
        }
        lines.push(String::new());
    }

    lines.push("-- primary keys".to_string());
    // Re-keying a dimension needs the constraints that reference it out of the way
    for spec in &plan.foreign_keys {
        lines.push(format!(
            "ALTER TABLE {} DROP CONSTRAINT IF EXISTS {};",
            quote_ident(plan.fact.table_name()),
            quote_ident(&spec.constraint_name())
        ));
    }
    for (table, key) in plan.keyed_tables() {
        lines.extend(render_primary_key(table, key, declared_type(plan, table, key)));
    }
    lines.push(String::new());

    lines.push("-- foreign keys".to_string());
    lines.extend(render_foreign_keys(plan.fact.table_name(), &plan.foreign_keys));

    lines.join("\n") + "\n"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardening::ValueShape;

    #[test]
    fn test_identifiers_and_literals_are_quoted() {
        assert_eq!(quote_ident("EAN"), "\"EAN\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(quote_literal("it's"), "'it''s'");
    }

    #[test]
    fn test_cast_uses_explicit_conversion() {
        let sql = render_directive(
            "dim_store_details",
            &Directive::cast("staff_numbers", ColumnType::SmallInt),
        );
        assert_eq!(
            sql,
            vec![
                "ALTER TABLE \"dim_store_details\" ALTER COLUMN \"staff_numbers\" TYPE SMALLINT USING \"staff_numbers\"::smallint;"
            ]
        );
    }

    #[test]
    fn test_date_reformat_translates_layout() {
        let (template, pattern) = postgres_date_format("%d/%m/%Y");
        assert_eq!(template, "DD/MM/YYYY");
        assert_eq!(pattern, r"^\d{2}/\d{2}/\d{4}$");
    }

    #[test]
    fn test_deletion_keeps_nulls() {
        let sql = render_directive(
            "dim_users",
            &Directive::delete_unless("user_uuid", ValueShape::Digits),
        );
        assert_eq!(
            sql[0],
            "DELETE FROM \"dim_users\" WHERE \"user_uuid\"::text !~ '^[0-9]+$';"
        );
    }

    #[test]
    fn test_plan_script_orders_keys_last() {
        let script = render_plan(&StarSchemaPlan::standard());
        let first_pk = script.find("ADD PRIMARY KEY").unwrap();
        let first_fk = script.find("FOREIGN KEY").unwrap();
        let last_cast = script.rfind("ALTER COLUMN \"product_quantity\" TYPE").unwrap();

        assert!(last_cast < first_pk);
        assert!(first_pk < first_fk);
        assert!(script.contains("INSERT INTO \"dim_card_details\""));
        assert!(script.contains("CONSTRAINT \"fk_store_code\""));

        // foreign keys are released before any primary key is dropped and rebuilt
        let first_fk_drop = script.find("DROP CONSTRAINT IF EXISTS \"fk_").unwrap();
        let first_pk_drop = script.find("_pkey\"").unwrap();
        assert!(first_fk_drop < first_pk_drop);
    }

    #[test]
    fn test_label_mapping_keeps_canonical_labels() {
        let sql = render_directive(
            "dim_products",
            &Directive::map_labels(
                "still_available",
                &[("still_avaliable", "true"), ("removed", "false")],
                "false",
            ),
        );
        let keep = "WHEN REPLACE(LOWER(TRIM(\"still_available\")), '_', ' ') IN ('true', 'false') THEN \"still_available\"";
        let keep_at = sql[0].find(keep).unwrap();
        assert!(keep_at < sql[0].find("ELSE 'false'").unwrap());
    }

    #[test]
    fn test_rerunnable_rename_and_foreign_keys() {
        let rename = render_directive(
            "dim_products",
            &Directive::rename("removed", "still_available"),
        );
        assert!(rename[0].starts_with("DO $$ BEGIN IF EXISTS (SELECT 1 FROM information_schema.columns WHERE table_name = 'dim_products' AND column_name = 'removed')"));

        let plan = StarSchemaPlan::standard();
        let statements = render_foreign_keys("orders_table", &plan.foreign_keys);
        for spec in &plan.foreign_keys {
            let name = quote_ident(&spec.constraint_name());
            let drop = statements
                .iter()
                .position(|s| s == &format!("ALTER TABLE \"orders_table\" DROP CONSTRAINT IF EXISTS {};", name))
                .unwrap();
            let add = statements
                .iter()
                .position(|s| s.contains(&format!("ADD CONSTRAINT {}", name)))
                .unwrap();
            assert!(drop < add);
        }
    }

    #[test]
    fn test_primary_key_is_checked_before_install() {
        let statements = render_primary_key("dim_users", "user_uuid", ColumnType::Uuid);
        let check = statements
            .iter()
            .position(|s| s.contains("RAISE EXCEPTION 'null keys remain in dim_users.user_uuid'"))
            .unwrap();
        assert!(statements[check].contains("RAISE EXCEPTION 'duplicate keys remain in dim_users.user_uuid'"));
        let install = statements
            .iter()
            .position(|s| s.ends_with("ADD PRIMARY KEY (\"user_uuid\");"))
            .unwrap();
        assert!(check < install);
    }

    #[test]
    fn test_unconvertible_rows_are_deleted_by_type() {
        let sql = render_directive(
            "dim_store_details",
            &Directive::delete_unconvertible("staff_numbers", ColumnType::SmallInt),
        );
        assert_eq!(
            sql[0],
            "DELETE FROM \"dim_store_details\" WHERE \"staff_numbers\" IS NOT NULL AND NOT pg_input_is_valid(TRIM(\"staff_numbers\"::text), 'smallint');"
        );
    }
}
