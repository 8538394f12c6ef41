pub mod feedback;
pub mod role;
pub mod sink;
pub mod source;
pub mod sync;

pub use feedback::Feedback;
pub use role::{RawRole, RoleName, RolePage, RoleRecord, RoleSummary};
pub use sink::{Column, ColumnType, SinkError, TableSchema, TableSink};
pub use source::{RoleSource, SourceError, collect_summaries, list_summaries};
pub use sync::{
    DEFAULT_BATCH_SIZE, ErrorKind, Progress, ProgressFn, SyncError, SyncFailure, SyncPhase,
    SyncReport, Synchronizer,
};

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
