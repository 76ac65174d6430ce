//! SQL text for the destination store.
//! SQLite-first; table and column names come from user files, so every
//! identifier goes through [`quote_ident`].

use super::models::ParsedTable;

/// User tables only; `sqlite_%` entries are engine internals.
pub const LIST_TABLES: &str = r#"
SELECT name FROM sqlite_master
WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
ORDER BY name
"#;

pub const TABLE_EXISTS: &str =
    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?";

pub const TABLE_DDL: &str = "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?";

/// Double-quote an identifier, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub fn drop_table_sql(table: &str) -> String {
    format!("DROP TABLE IF EXISTS {}", quote_ident(table))
}

pub fn create_table_sql(table: &ParsedTable) -> String {
    let columns = table
        .columns
        .iter()
        .map(|c| format!("{} {}", quote_ident(&c.name), c.column_type.sql_name()))
        .collect::<Vec<_>>()
        .join(", ");
    format!("CREATE TABLE {} ({})", quote_ident(&table.name), columns)
}

pub fn insert_row_sql(table: &ParsedTable) -> String {
    let placeholders = vec!["?"; table.columns.len()].join(", ");
    format!(
        "INSERT INTO {} VALUES ({})",
        quote_ident(&table.name),
        placeholders
    )
}

pub fn sample_rows_sql(table: &str, limit: usize) -> String {
    format!("SELECT * FROM {} LIMIT {}", quote_ident(table), limit)
}
