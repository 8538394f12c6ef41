use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};

use crate::feedback::Feedback;
use crate::role::{RoleName, RoleRecord, RoleSummary};
use crate::sink::{SinkError, TableSchema, TableSink};
use crate::source::{RoleSource, SourceError, collect_summaries};

/// Upper bound on records handed to a single `upsert` call.
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// Where a harvest pass currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Idle,
    Listing,
    Enriching,
    Upserting,
    Done,
    Failed,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Idle => "idle",
            Self::Listing => "listing",
            Self::Enriching => "enriching",
            Self::Upserting => "upserting",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Progress events emitted while a pass runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    Phase(SyncPhase),
    Enriched(RoleName),
    Skipped(RoleName),
}

pub type ProgressFn = Box<dyn Fn(&Progress) + Send + Sync>;

/// Coarse classification of a pass failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    AuthFailure,
    RemoteUnavailable,
    NotFound,
    Malformed,
    SchemaMismatch,
    WriteRejected,
    Timeout,
}

impl SourceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Auth(_) => ErrorKind::AuthFailure,
            Self::Unavailable(_) => ErrorKind::RemoteUnavailable,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Parse(_) => ErrorKind::Malformed,
        }
    }
}

impl SinkError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::SchemaMismatch(_) => ErrorKind::SchemaMismatch,
            Self::WriteRejected(_) => ErrorKind::WriteRejected,
            Self::Timeout(_) => ErrorKind::Timeout,
        }
    }
}

/// The error that ended a harvest pass.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("listing roles failed: {0}")]
    Listing(SourceError),

    #[error("fetching role {name} failed: {error}")]
    Enriching { name: RoleName, error: SourceError },

    #[error("preparing destination table failed: {0}")]
    EnsureTable(SinkError),

    #[error("writing roles failed: {0}")]
    Upsert(SinkError),

    #[error("harvest pass exceeded its deadline of {0:?}")]
    Deadline(Duration),
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Listing(e) | Self::Enriching { error: e, .. } => e.kind(),
            Self::EnsureTable(e) | Self::Upsert(e) => e.kind(),
            Self::Deadline(_) => ErrorKind::Timeout,
        }
    }
}

/// A pass that ended in `Failed`. `enriched` is diagnostic only.
#[derive(Debug, thiserror::Error)]
#[error("harvest failed while {phase} ({enriched} roles enriched): {error}")]
pub struct SyncFailure {
    pub phase: SyncPhase,
    pub enriched: usize,
    pub error: SyncError,
}

/// Summary of a pass that reached `Done`.
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub processed: u64,
    pub skipped: u64,
    pub feedback: Vec<Feedback>,
}

struct Pass {
    phase: SyncPhase,
    enriched: usize,
}

/// Drives one list → enrich → upsert pass from a role source into a table.
///
/// A pass is all-or-nothing with respect to the remote side: any lookup
/// failure other than a vanished role aborts before the table is touched.
pub struct Synchronizer {
    source: Arc<dyn RoleSource>,
    sink: Arc<dyn TableSink>,
    concurrency: usize,
    batch_size: usize,
    deadline: Option<Duration>,
    progress: Option<ProgressFn>,
}

impl Synchronizer {
    pub fn new(source: Arc<dyn RoleSource>, sink: Arc<dyn TableSink>) -> Self {
        Self {
            source,
            sink,
            concurrency: 1,
            batch_size: DEFAULT_BATCH_SIZE,
            deadline: None,
            progress: None,
        }
    }

    /// Maximum number of detail lookups in flight at once.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Fail the pass with `SyncError::Deadline` if it runs longer than this.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Run one complete harvest pass.
    pub async fn run(&self) -> Result<SyncReport, SyncFailure> {
        let mut pass = Pass {
            phase: SyncPhase::Idle,
            enriched: 0,
        };

        let outcome = match self.deadline {
            Some(deadline) => {
                match tokio::time::timeout(deadline, self.execute(&mut pass)).await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(SyncError::Deadline(deadline)),
                }
            }
            None => self.execute(&mut pass).await,
        };

        match outcome {
            Ok(report) => {
                self.enter(&mut pass, SyncPhase::Done);
                tracing::info!(
                    source = self.source.label(),
                    destination = %self.sink.destination(),
                    processed = report.processed,
                    skipped = report.skipped,
                    "harvest pass complete"
                );
                Ok(report)
            }
            Err(error) => {
                let phase = pass.phase;
                self.enter(&mut pass, SyncPhase::Failed);
                tracing::error!(
                    source = self.source.label(),
                    %phase,
                    enriched = pass.enriched,
                    kind = ?error.kind(),
                    %error,
                    "harvest pass failed"
                );
                Err(SyncFailure {
                    phase,
                    enriched: pass.enriched,
                    error,
                })
            }
        }
    }

    async fn execute(&self, pass: &mut Pass) -> Result<SyncReport, SyncError> {
        let mut feedback = Vec::new();

        self.enter(pass, SyncPhase::Listing);
        let summaries = collect_summaries(self.source.as_ref())
            .await
            .map_err(SyncError::Listing)?;
        let summaries = dedupe(summaries, &mut feedback);
        tracing::info!(
            source = self.source.label(),
            roles = summaries.len(),
            "listed roles"
        );
        feedback.push(Feedback::info(format!(
            "listed {} roles from {}",
            summaries.len(),
            self.source.label()
        )));

        self.enter(pass, SyncPhase::Enriching);
        let (records, skipped) = self.enrich(summaries, pass, &mut feedback).await?;

        self.enter(pass, SyncPhase::Upserting);
        self.sink
            .ensure_table(&TableSchema::roles())
            .await
            .map_err(SyncError::EnsureTable)?;

        for batch in records.chunks(self.batch_size) {
            self.sink.upsert(batch).await.map_err(SyncError::Upsert)?;
            tracing::debug!(
                destination = %self.sink.destination(),
                rows = batch.len(),
                "upserted batch"
            );
        }

        Ok(SyncReport {
            processed: records.len() as u64,
            skipped,
            feedback,
        })
    }

    /// Look up every listed role. Results are consumed in listing order
    /// even when lookups overlap.
    async fn enrich(
        &self,
        summaries: Vec<RoleSummary>,
        pass: &mut Pass,
        feedback: &mut Vec<Feedback>,
    ) -> Result<(Vec<RoleRecord>, u64), SyncError> {
        let source = self.source.as_ref();
        let mut records = Vec::with_capacity(summaries.len());
        let mut skipped = 0u64;

        let mut lookups = stream::iter(summaries)
            .map(move |summary| async move {
                let result = source.get_detail(&summary.name).await;
                (summary.name, result)
            })
            .buffered(self.concurrency);

        while let Some((name, result)) = lookups.next().await {
            match result {
                Ok(record) if record.name() != &name => {
                    let error = SourceError::Parse(format!(
                        "lookup returned role {} instead",
                        record.name()
                    ));
                    return Err(SyncError::Enriching { name, error });
                }
                Ok(record) => {
                    pass.enriched += 1;
                    self.notify(&Progress::Enriched(name));
                    records.push(record);
                }
                Err(error) if error.is_skippable() => {
                    tracing::warn!(role = %name, "role vanished before lookup, skipping");
                    feedback.push(Feedback::warning(format!("skipping {name}: {error}")));
                    self.notify(&Progress::Skipped(name));
                    skipped += 1;
                }
                Err(error) => return Err(SyncError::Enriching { name, error }),
            }
        }

        Ok((records, skipped))
    }

    fn enter(&self, pass: &mut Pass, phase: SyncPhase) {
        pass.phase = phase;
        tracing::debug!(%phase, "harvest phase");
        self.notify(&Progress::Phase(phase));
    }

    fn notify(&self, progress: &Progress) {
        if let Some(callback) = &self.progress {
            callback(progress);
        }
    }
}

/// Keep the first occurrence of each name.
fn dedupe(summaries: Vec<RoleSummary>, feedback: &mut Vec<Feedback>) -> Vec<RoleSummary> {
    let mut seen = HashSet::with_capacity(summaries.len());
    summaries
        .into_iter()
        .filter(|summary| {
            if seen.insert(summary.name.clone()) {
                return true;
            }
            tracing::warn!(role = %summary.name, "role listed more than once");
            feedback.push(Feedback::warning(format!(
                "{} listed more than once, keeping the first",
                summary.name
            )));
            false
        })
        .collect()
}
