use role_harvest::{Column, ColumnType, TableSchema};
use rusqlite_migration::{M, Migrations};

/// Bookkeeping table holding one row per completed harvest pass.
pub const HARVEST_LOG_TABLE: &str = "harvests";

pub fn migrations() -> Migrations<'static> {
    Migrations::new(vec![M::up(
        "CREATE TABLE harvests (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            destination     TEXT NOT NULL,
            completed_at    INTEGER NOT NULL,
            role_count      INTEGER NOT NULL
        );

        CREATE INDEX idx_harvests_destination ON harvests(destination, completed_at);",
    )])
}

/// SQLite storage type for a logical column. Repeated columns hold a JSON
/// array; booleans are stored as 0/1.
pub fn sql_type(column: &Column) -> &'static str {
    if column.repeated {
        return "TEXT";
    }
    match column.column_type {
        ColumnType::String => "TEXT",
        ColumnType::Boolean => "INTEGER",
    }
}

fn sql_default(column: &Column) -> &'static str {
    if column.repeated {
        return "'[]'";
    }
    match column.column_type {
        ColumnType::String => "''",
        ColumnType::Boolean => "0",
    }
}

/// `CREATE TABLE IF NOT EXISTS` statement for `schema` under `table`.
pub fn create_table_sql(table: &str, schema: &TableSchema) -> String {
    let columns: Vec<String> = schema
        .columns
        .iter()
        .map(|column| {
            if column.name == schema.merge_key {
                format!("{} {} NOT NULL PRIMARY KEY", column.name, sql_type(column))
            } else {
                format!(
                    "{} {} NOT NULL DEFAULT {}",
                    column.name,
                    sql_type(column),
                    sql_default(column)
                )
            }
        })
        .collect();

    format!(
        "CREATE TABLE IF NOT EXISTS \"{table}\" (\n    {}\n)",
        columns.join(",\n    ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_valid() {
        assert!(migrations().validate().is_ok());
    }

    #[test]
    fn create_sql_keys_on_name() {
        let sql = create_table_sql("roles", &TableSchema::roles());
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS \"roles\""));
        assert!(sql.contains("name TEXT NOT NULL PRIMARY KEY"));
        assert!(sql.contains("deleted INTEGER NOT NULL DEFAULT 0"));
        assert!(sql.contains("included_permissions TEXT NOT NULL DEFAULT '[]'"));
    }
}
