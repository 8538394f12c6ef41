use std::fmt;
use std::sync::Arc;

use crate::role::RoleRecord;

/// Column types understood by a destination table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    String,
    Boolean,
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String => write!(f, "STRING"),
            Self::Boolean => write!(f, "BOOLEAN"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: &'static str,
    pub column_type: ColumnType,
    pub repeated: bool,
}

impl Column {
    const fn scalar(name: &'static str, column_type: ColumnType) -> Self {
        Self {
            name,
            column_type,
            repeated: false,
        }
    }

    const fn repeated(name: &'static str, column_type: ColumnType) -> Self {
        Self {
            name,
            column_type,
            repeated: true,
        }
    }
}

/// Shape of the destination table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub columns: Vec<Column>,
    /// Column used to match incoming records against existing rows.
    pub merge_key: &'static str,
}

impl TableSchema {
    /// The fixed seven-column layout mirroring `RoleRecord`.
    pub fn roles() -> Self {
        Self {
            columns: vec![
                Column::scalar("name", ColumnType::String),
                Column::scalar("title", ColumnType::String),
                Column::scalar("description", ColumnType::String),
                Column::scalar("deleted", ColumnType::Boolean),
                Column::scalar("etag", ColumnType::String),
                Column::repeated("included_permissions", ColumnType::String),
                Column::scalar("stage", ColumnType::String),
            ],
            merge_key: "name",
        }
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// Errors reported by a destination table. None are retried.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("write rejected: {0}")]
    WriteRejected(String),

    #[error("timed out: {0}")]
    Timeout(String),
}

/// A persistent table that role records are merged into.
#[async_trait::async_trait]
pub trait TableSink: Send + Sync {
    /// Fully qualified destination, e.g. `iam_roles.roles`.
    fn destination(&self) -> String;

    /// Create the table if it is absent. An existing compatible table is
    /// left exactly as it is.
    async fn ensure_table(&self, schema: &TableSchema) -> Result<(), SinkError>;

    /// Merge a batch keyed on role name as one atomic write: matching rows
    /// are overwritten column by column, new names are inserted, and rows
    /// outside the batch are untouched.
    async fn upsert(&self, records: &[RoleRecord]) -> Result<(), SinkError>;
}

#[async_trait::async_trait]
impl<T: TableSink + ?Sized> TableSink for Arc<T> {
    fn destination(&self) -> String {
        (**self).destination()
    }

    async fn ensure_table(&self, schema: &TableSchema) -> Result<(), SinkError> {
        (**self).ensure_table(schema).await
    }

    async fn upsert(&self, records: &[RoleRecord]) -> Result<(), SinkError> {
        (**self).upsert(records).await
    }
}
