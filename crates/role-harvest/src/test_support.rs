use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::{
    RawRole, RoleName, RolePage, RoleRecord, RoleSource, RoleSummary, SinkError, SourceError,
    TableSchema, TableSink,
};

type DetailFailure = fn(&RoleName) -> SourceError;

/// Build a record with only a name and title set.
pub fn role(name: &str, title: &str) -> RoleRecord {
    raw_role(name, title)
        .into_record()
        .unwrap_or_else(|e| panic!("invalid test role {name}: {e}"))
}

pub fn raw_role(name: &str, title: &str) -> RawRole {
    RawRole {
        name: Some(name.to_owned()),
        title: Some(title.to_owned()),
        ..Default::default()
    }
}

/// In-memory role catalog served in fixed-size pages.
///
/// Page cursors are stringified page indexes. Failures can be injected per
/// page and per role.
pub struct InMemoryRoleSource {
    label: String,
    page_size: usize,
    order: Vec<RoleName>,
    records: HashMap<RoleName, RoleRecord>,
    page_failures: HashMap<usize, fn() -> SourceError>,
    detail_failures: HashMap<RoleName, DetailFailure>,
    detail_delay: Option<Duration>,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub list_calls: AtomicUsize,
    pub detail_calls: AtomicUsize,
}

impl InMemoryRoleSource {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            page_size: 2,
            order: Vec::new(),
            records: HashMap::new(),
            page_failures: HashMap::new(),
            detail_failures: HashMap::new(),
            detail_delay: None,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            list_calls: AtomicUsize::new(0),
            detail_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_detail_delay(mut self, delay: Duration) -> Self {
        self.detail_delay = Some(delay);
        self
    }

    /// Add a role to both the listing and the detail lookup. A record with
    /// an already-known name replaces the stored detail.
    pub fn add(&mut self, record: RoleRecord) {
        if !self.records.contains_key(record.name()) {
            self.order.push(record.name().clone());
        }
        self.records.insert(record.name().clone(), record);
    }

    pub fn add_named(&mut self, name: &str) {
        self.add(role(name, ""));
    }

    /// List a name without any detail behind it, as if the role was
    /// deleted right after the listing.
    pub fn add_vanished(&mut self, name: &str) {
        let name = RoleName::new(name);
        self.order.push(name.clone());
        self.detail_failures
            .insert(name, |n| SourceError::NotFound(n.clone()));
    }

    /// List the same name again, as a misbehaving API might.
    pub fn add_duplicate_listing(&mut self, name: &str) {
        self.order.push(RoleName::new(name));
    }

    pub fn fail_page(&mut self, page: usize, failure: fn() -> SourceError) {
        self.page_failures.insert(page, failure);
    }

    pub fn fail_detail(&mut self, name: &str, failure: DetailFailure) {
        self.detail_failures.insert(RoleName::new(name), failure);
    }
}

#[async_trait::async_trait]
impl RoleSource for InMemoryRoleSource {
    fn label(&self) -> &str {
        &self.label
    }

    async fn list_page(&self, cursor: Option<&str>) -> Result<RolePage, SourceError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);

        let page: usize = match cursor {
            None => 0,
            Some(token) => token
                .parse()
                .map_err(|_| SourceError::Parse(format!("bad cursor: {token}")))?,
        };

        if let Some(failure) = self.page_failures.get(&page) {
            return Err(failure());
        }

        let start = page * self.page_size;
        let roles = self
            .order
            .iter()
            .skip(start)
            .take(self.page_size)
            .map(|name| RoleSummary { name: name.clone() })
            .collect();

        let next_page_token =
            (start + self.page_size < self.order.len()).then(|| (page + 1).to_string());

        Ok(RolePage {
            roles,
            next_page_token,
        })
    }

    async fn get_detail(&self, name: &RoleName) -> Result<RoleRecord, SourceError> {
        self.detail_calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        match self.detail_delay {
            Some(delay) => tokio::time::sleep(delay).await,
            None => tokio::task::yield_now().await,
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if let Some(failure) = self.detail_failures.get(name) {
            return Err(failure(name));
        }

        self.records
            .get(name)
            .cloned()
            .ok_or_else(|| SourceError::NotFound(name.clone()))
    }
}

/// Table double that applies merge semantics in memory and records every
/// call made against it.
#[derive(Default)]
pub struct RecordingSink {
    rows: Mutex<BTreeMap<RoleName, RoleRecord>>,
    batches: Mutex<Vec<Vec<RoleRecord>>>,
    ensure_failure: Option<fn() -> SinkError>,
    upsert_failure: Option<fn() -> SinkError>,
    pub ensure_calls: AtomicUsize,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_ensure(failure: fn() -> SinkError) -> Self {
        Self {
            ensure_failure: Some(failure),
            ..Self::default()
        }
    }

    pub fn failing_upsert(failure: fn() -> SinkError) -> Self {
        Self {
            upsert_failure: Some(failure),
            ..Self::default()
        }
    }

    /// Current table contents ordered by name.
    pub fn rows(&self) -> Vec<RoleRecord> {
        self.rows
            .lock()
            .unwrap()
            .values()
            .cloned()
            .collect()
    }

    /// Every batch handed to `upsert`, in call order.
    pub fn batches(&self) -> Vec<Vec<RoleRecord>> {
        self.batches.lock().unwrap().clone()
    }

    pub fn upsert_calls(&self) -> usize {
        self.batches.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl TableSink for RecordingSink {
    fn destination(&self) -> String {
        "memory.roles".to_owned()
    }

    async fn ensure_table(&self, _schema: &TableSchema) -> Result<(), SinkError> {
        self.ensure_calls.fetch_add(1, Ordering::SeqCst);
        match self.ensure_failure {
            Some(failure) => Err(failure()),
            None => Ok(()),
        }
    }

    async fn upsert(&self, records: &[RoleRecord]) -> Result<(), SinkError> {
        self.batches.lock().unwrap().push(records.to_vec());
        if let Some(failure) = self.upsert_failure {
            return Err(failure());
        }

        let mut rows = self.rows.lock().unwrap();
        for record in records {
            rows.insert(record.name().clone(), record.clone());
        }
        Ok(())
    }
}
