use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use role_harvest::{RawRole, RoleName, RoleRecord, SinkError, TableSchema, TableSink};
use rusqlite::ErrorCode;
use rusqlite::types::Value;

use crate::schema::{self, HARVEST_LOG_TABLE};

/// Threshold in days before the last harvest is considered stale.
const STALE_THRESHOLD_DAYS: u64 = 7;

/// How long a write waits on a locked database before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Rows per INSERT statement. A batch larger than this is split across
/// several statements inside one transaction.
const ROWS_PER_STATEMENT: usize = 1000;

const COLUMNS: &str = "name, title, description, deleted, etag, included_permissions, stage";

/// When the destination last completed a harvest pass.
#[derive(Debug, Clone, PartialEq)]
pub enum HarvestStatus {
    NeverHarvested,
    Stale { days_old: u64, roles: u64 },
    Fresh { days_old: u64, roles: u64 },
}

/// A role table inside a SQLite-backed dataset.
///
/// Each dataset is one database file; the table lives inside it next to a
/// small log of completed passes.
pub struct RoleTable {
    conn: Mutex<rusqlite::Connection>,
    dataset: String,
    table: String,
}

impl RoleTable {
    /// Open `<warehouse_dir>/<dataset>.db`, creating the directory and file
    /// as needed.
    pub fn open(
        warehouse_dir: &Path,
        dataset: impl Into<String>,
        table: impl Into<String>,
    ) -> Result<Self, StoreError> {
        let dataset = dataset.into();
        let table = table.into();
        validate_names(&dataset, &table)?;

        std::fs::create_dir_all(warehouse_dir).map_err(|e| {
            StoreError::Io(format!(
                "failed to create warehouse directory {}: {e}",
                warehouse_dir.display()
            ))
        })?;

        let path = warehouse_dir.join(format!("{dataset}.db"));
        let conn = rusqlite::Connection::open(&path)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Self::init(conn, dataset, table)
    }

    /// Open a table backed by an in-memory database.
    pub fn open_in_memory(
        dataset: impl Into<String>,
        table: impl Into<String>,
    ) -> Result<Self, StoreError> {
        let dataset = dataset.into();
        let table = table.into();
        validate_names(&dataset, &table)?;

        let conn = rusqlite::Connection::open_in_memory()
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Self::init(conn, dataset, table)
    }

    fn init(
        mut conn: rusqlite::Connection,
        dataset: String,
        table: String,
    ) -> Result<Self, StoreError> {
        conn.busy_timeout(BUSY_TIMEOUT)
            .map_err(|e| StoreError::Database(e.to_string()))?;
        schema::migrations()
            .to_latest(&mut conn)
            .map_err(|e| StoreError::Migration(e.to_string()))?;

        Ok(Self {
            conn: Mutex::new(conn),
            dataset,
            table,
        })
    }

    fn lock(&self) -> MutexGuard<'_, rusqlite::Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn dataset(&self) -> &str {
        &self.dataset
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Look up one stored role by name.
    pub fn get_role(&self, name: &RoleName) -> Result<Option<RoleRecord>, StoreError> {
        let conn = self.lock();
        let sql = format!("SELECT {COLUMNS} FROM \"{}\" WHERE name = ?1", self.table);

        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| StoreError::Database(e.to_string()))?;
        let mut rows = stmt
            .query_map([name.as_str()], row_to_raw)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        match rows.next() {
            Some(row) => {
                let raw = row.map_err(|e| StoreError::Database(e.to_string()))?;
                raw_to_record(raw).map(Some)
            }
            None => Ok(None),
        }
    }

    /// Every stored role, ordered by name.
    pub fn list_roles(&self) -> Result<Vec<RoleRecord>, StoreError> {
        let conn = self.lock();
        let sql = format!("SELECT {COLUMNS} FROM \"{}\" ORDER BY name", self.table);

        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| StoreError::Database(e.to_string()))?;
        let raws = stmt
            .query_map([], row_to_raw)
            .map_err(|e| StoreError::Database(e.to_string()))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoreError::Database(e.to_string()))?;

        raws.into_iter().map(raw_to_record).collect()
    }

    pub fn count(&self) -> Result<u64, StoreError> {
        let conn = self.lock();
        let sql = format!("SELECT COUNT(*) FROM \"{}\"", self.table);
        let count: i64 = conn
            .query_row(&sql, [], |row| row.get(0))
            .map_err(|e| StoreError::Database(e.to_string()))?;
        to_u64(count)
    }

    /// Log a completed pass for this destination.
    pub fn record_harvest(&self, roles: u64) -> Result<(), StoreError> {
        self.record_harvest_at(now_epoch_secs(), roles)
    }

    /// Log a completed pass with an explicit timestamp (for testing staleness).
    pub fn record_harvest_at(&self, epoch_secs: u64, roles: u64) -> Result<(), StoreError> {
        let completed_at = to_i64(epoch_secs)?;
        let roles = to_i64(roles)?;

        let conn = self.lock();
        conn.execute(
            "INSERT INTO harvests (destination, completed_at, role_count)
             VALUES (?1, ?2, ?3)",
            rusqlite::params![self.destination(), completed_at, roles],
        )
        .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(())
    }

    /// How recently this destination completed a pass.
    pub fn last_harvest(&self) -> Result<HarvestStatus, StoreError> {
        let conn = self.lock();

        let result = conn.query_row(
            "SELECT completed_at, role_count FROM harvests
             WHERE destination = ?1
             ORDER BY completed_at DESC, id DESC
             LIMIT 1",
            [self.destination()],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
        );

        match result {
            Ok((completed_at, roles)) => {
                let days_old = days_since(to_u64(completed_at)?);
                let roles = to_u64(roles)?;
                if days_old >= STALE_THRESHOLD_DAYS {
                    Ok(HarvestStatus::Stale { days_old, roles })
                } else {
                    Ok(HarvestStatus::Fresh { days_old, roles })
                }
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(HarvestStatus::NeverHarvested),
            Err(e) => Err(StoreError::Database(e.to_string())),
        }
    }

    fn existing_columns(
        conn: &rusqlite::Connection,
        table: &str,
    ) -> Result<Vec<ExistingColumn>, SinkError> {
        let sql = format!("PRAGMA table_info(\"{table}\")");
        let mut stmt = conn.prepare(&sql).map_err(sink_error)?;
        stmt.query_map([], |row| {
            Ok(ExistingColumn {
                name: row.get(1)?,
                declared_type: row.get(2)?,
                not_null: row.get::<_, i64>(3)? != 0,
                has_default: row.get::<_, Value>(4)? != Value::Null,
                primary_key: row.get::<_, i64>(5)? > 0,
            })
        })
        .map_err(sink_error)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(sink_error)
    }
}

/// One row of `PRAGMA table_info`.
struct ExistingColumn {
    name: String,
    declared_type: String,
    not_null: bool,
    has_default: bool,
    primary_key: bool,
}

#[async_trait::async_trait]
impl TableSink for RoleTable {
    fn destination(&self) -> String {
        format!("{}.{}", self.dataset, self.table)
    }

    async fn ensure_table(&self, schema: &TableSchema) -> Result<(), SinkError> {
        let conn = self.lock();
        let existing = Self::existing_columns(&conn, &self.table)?;

        if existing.is_empty() {
            conn.execute_batch(&schema::create_table_sql(&self.table, schema))
                .map_err(sink_error)?;
            tracing::info!(destination = %self.destination(), "created role table");
            return Ok(());
        }

        let problems = schema_problems(schema, &existing);
        if !problems.is_empty() {
            return Err(SinkError::SchemaMismatch(format!(
                "{}: {}",
                self.destination(),
                problems.join("; ")
            )));
        }

        Ok(())
    }

    async fn upsert(&self, records: &[RoleRecord]) -> Result<(), SinkError> {
        if records.is_empty() {
            return Ok(());
        }

        let mut conn = self.lock();
        let tx = conn.transaction().map_err(sink_error)?;

        for chunk in records.chunks(ROWS_PER_STATEMENT) {
            let values = chunk
                .iter()
                .map(record_values)
                .collect::<Result<Vec<_>, _>>()?
                .into_iter()
                .flatten();

            tx.execute(&upsert_sql(&self.table, chunk.len()), rusqlite::params_from_iter(values))
                .map_err(sink_error)?;
        }

        tx.commit().map_err(sink_error)?;
        tracing::debug!(
            destination = %self.destination(),
            rows = records.len(),
            "merged role batch"
        );
        Ok(())
    }
}

/// Multi-row merge keyed on `name`. Every non-key column takes the
/// incoming value on conflict.
fn upsert_sql(table: &str, rows: usize) -> String {
    let placeholders: Vec<String> = (0..rows)
        .map(|row| {
            let base = row * 7;
            let params: Vec<String> = (1..=7).map(|i| format!("?{}", base + i)).collect();
            format!("({})", params.join(", "))
        })
        .collect();

    format!(
        "INSERT INTO \"{table}\" ({COLUMNS})
         VALUES {}
         ON CONFLICT(name) DO UPDATE SET
            title = excluded.title,
            description = excluded.description,
            deleted = excluded.deleted,
            etag = excluded.etag,
            included_permissions = excluded.included_permissions,
            stage = excluded.stage",
        placeholders.join(", ")
    )
}

fn record_values(record: &RoleRecord) -> Result<[Value; 7], SinkError> {
    let permissions = serde_json::to_string(record.included_permissions())
        .map_err(|e| SinkError::WriteRejected(format!("{}: {e}", record.name())))?;

    Ok([
        Value::Text(record.name().as_str().to_owned()),
        Value::Text(record.title().to_owned()),
        Value::Text(record.description().to_owned()),
        Value::Integer(i64::from(record.deleted())),
        Value::Text(record.etag().to_owned()),
        Value::Text(permissions),
        Value::Text(record.stage().to_owned()),
    ])
}

fn schema_problems(schema: &TableSchema, existing: &[ExistingColumn]) -> Vec<String> {
    let mut problems = Vec::new();

    for column in &schema.columns {
        let expected = schema::sql_type(column);
        match existing.iter().find(|c| c.name == column.name) {
            None => problems.push(format!("missing column {}", column.name)),
            Some(c) if !c.declared_type.eq_ignore_ascii_case(expected) => {
                problems.push(format!(
                    "column {} is {}, expected {expected}",
                    column.name, c.declared_type
                ));
            }
            Some(c) if column.name == schema.merge_key && !c.primary_key => {
                problems.push(format!("column {} is not the primary key", column.name));
            }
            Some(_) => {}
        }
    }

    // The merge targets a key of exactly the merge column.
    for c in existing
        .iter()
        .filter(|c| c.primary_key && c.name != schema.merge_key)
    {
        problems.push(format!(
            "column {} is part of the primary key, expected only {}",
            c.name, schema.merge_key
        ));
    }

    // Inserts never name columns outside the schema.
    for c in existing.iter().filter(|c| {
        schema.column(&c.name).is_none() && !c.primary_key && c.not_null && !c.has_default
    }) {
        problems.push(format!("column {} is NOT NULL without a default", c.name));
    }

    problems
}

fn row_to_raw(row: &rusqlite::Row) -> rusqlite::Result<RawRole> {
    let permissions_json: String = row.get(5)?;
    let permissions: Vec<String> = serde_json::from_str(&permissions_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(RawRole {
        name: Some(row.get(0)?),
        title: Some(row.get(1)?),
        description: Some(row.get(2)?),
        deleted: Some(row.get(3)?),
        etag: Some(row.get(4)?),
        included_permissions: Some(permissions),
        stage: Some(row.get(6)?),
    })
}

fn raw_to_record(raw: RawRole) -> Result<RoleRecord, StoreError> {
    raw.into_record()
        .map_err(|e| StoreError::Database(format!("corrupt role row: {e}")))
}

fn sink_error(e: rusqlite::Error) -> SinkError {
    match e.sqlite_error_code() {
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => {
            SinkError::Timeout(e.to_string())
        }
        _ => SinkError::WriteRejected(e.to_string()),
    }
}

/// Dataset and table names are spliced into SQL and file paths, so only
/// plain identifiers are accepted.
fn validate_names(dataset: &str, table: &str) -> Result<(), StoreError> {
    for (kind, name) in [("dataset", dataset), ("table", table)] {
        let valid = !name.is_empty()
            && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
            && !name.starts_with(|c: char| c.is_ascii_digit());
        if !valid {
            return Err(StoreError::InvalidName(format!("{kind} name {name:?}")));
        }
    }

    if table == HARVEST_LOG_TABLE {
        return Err(StoreError::InvalidName(format!(
            "table name {table:?} is reserved"
        )));
    }

    Ok(())
}

/// Errors specific to store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),

    #[error("migration error: {0}")]
    Migration(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("invalid {0}")]
    InvalidName(String),
}

// SQLite integers are signed.
fn to_i64(value: u64) -> Result<i64, StoreError> {
    i64::try_from(value).map_err(|_| StoreError::Database(format!("{value} exceeds INTEGER range")))
}

fn to_u64(value: i64) -> Result<u64, StoreError> {
    u64::try_from(value).map_err(|_| StoreError::Database(format!("unexpected negative value {value}")))
}

fn now_epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn days_since(epoch_secs: u64) -> u64 {
    now_epoch_secs().saturating_sub(epoch_secs) / 86400
}
