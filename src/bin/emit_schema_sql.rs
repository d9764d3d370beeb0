use retail_etl::hardening::StarSchemaPlan;
use retail_etl::hardening::sql::render_plan;

/// Prints the PostgreSQL script that hardens the retail star schema.
fn main() {
    print!("{}", render_plan(&StarSchemaPlan::standard()));
}
