//! In-memory [`CaseLogStore`] with fault injection.
//!
//! Mirrors the PostgreSQL table closely enough to exercise the archiver:
//! one row per external id, the same conflict behaviour for both policies,
//! whole-batch atomicity for [`StoreSession::write_all`], and the table's
//! non-blank `name` check. Used by the test suites and for running the API
//! without a database.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::caselog::{CaseLogRecord, ConflictPolicy};
use crate::error::StorageError;
use crate::store::{CaseLogStore, StoreSession};
use crate::types::{DbId, Timestamp};

/// A row as the in-memory table holds it.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredCaseLog {
    pub id: DbId,
    pub external_id: String,
    pub case_id: Option<String>,
    pub name: String,
    pub comments: Option<String>,
    pub status: Option<String>,
    pub created_at: Option<Timestamp>,
    pub modified_at: Option<Timestamp>,
    /// Number of merges applied since insert.
    pub revision: u32,
}

#[derive(Default)]
struct State {
    rows: BTreeMap<String, StoredCaseLog>,
    last_id: DbId,
    unavailable: bool,
    failing_sessions: VecDeque<StorageError>,
    failing_writes: VecDeque<StorageError>,
    failing_ids: HashMap<String, StorageError>,
    delayed_writes: VecDeque<Duration>,
    session_requests: u32,
    write_calls: u32,
}

impl State {
    /// Apply one record to `rows`, returning the affected row count.
    fn apply(
        rows: &mut BTreeMap<String, StoredCaseLog>,
        last_id: &mut DbId,
        record: &CaseLogRecord,
        policy: ConflictPolicy,
    ) -> Result<u64, StorageError> {
        let Some(external_id) = record.external_id() else {
            return Err(StorageError::permanent(
                "null value in column \"external_id\" violates not-null constraint",
            ));
        };
        if record.name.trim().is_empty() {
            return Err(StorageError::permanent(
                "new row violates check constraint \"ck_caselog_archive_name_not_blank\"",
            ));
        }

        match rows.get_mut(external_id) {
            None => {
                *last_id += 1;
                rows.insert(
                    external_id.to_string(),
                    StoredCaseLog {
                        id: *last_id,
                        external_id: external_id.to_string(),
                        case_id: record.case_id.clone(),
                        name: record.name.clone(),
                        comments: record.comments.clone(),
                        status: record.status.clone(),
                        created_at: record.created_at,
                        modified_at: record.modified_at,
                        revision: 0,
                    },
                );
                Ok(1)
            }
            Some(_) if policy == ConflictPolicy::Skip => Ok(0),
            Some(row) => {
                row.case_id = record.case_id.clone();
                row.name = record.name.clone();
                row.comments = record.comments.clone();
                row.revision += 1;
                Ok(1)
            }
        }
    }

    fn injected_write_failure(&mut self, records: &[&CaseLogRecord]) -> Option<StorageError> {
        if let Some(err) = self.failing_writes.pop_front() {
            return Some(err);
        }
        records
            .iter()
            .filter_map(|r| r.external_id())
            .find_map(|id| self.failing_ids.get(id).cloned())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryCaseLogStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryCaseLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` session acquisitions fail with `err`.
    pub async fn fail_next_sessions(&self, count: usize, err: StorageError) {
        let mut state = self.state.lock().await;
        state.failing_sessions.extend(std::iter::repeat(err).take(count));
    }

    /// Make the next `count` write calls fail with `err` before touching rows.
    pub async fn fail_next_writes(&self, count: usize, err: StorageError) {
        let mut state = self.state.lock().await;
        state.failing_writes.extend(std::iter::repeat(err).take(count));
    }

    /// Make every write that includes `external_id` fail with `err`.
    pub async fn fail_writes_for(&self, external_id: impl Into<String>, err: StorageError) {
        let mut state = self.state.lock().await;
        state.failing_ids.insert(external_id.into(), err);
    }

    /// Make the next `count` write calls stall for `delay` before they run.
    pub async fn delay_next_writes(&self, count: usize, delay: Duration) {
        let mut state = self.state.lock().await;
        state.delayed_writes.extend(std::iter::repeat(delay).take(count));
    }

    /// Simulate the database going away (or coming back).
    pub async fn set_available(&self, available: bool) {
        self.state.lock().await.unavailable = !available;
    }

    /// Session acquisitions requested so far, failed ones included.
    pub async fn session_requests(&self) -> u32 {
        self.state.lock().await.session_requests
    }

    pub async fn write_calls(&self) -> u32 {
        self.state.lock().await.write_calls
    }

    pub async fn get(&self, external_id: &str) -> Option<StoredCaseLog> {
        self.state.lock().await.rows.get(external_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.rows.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl CaseLogStore for InMemoryCaseLogStore {
    async fn open_session(&self) -> Result<Box<dyn StoreSession>, StorageError> {
        let mut state = self.state.lock().await;
        state.session_requests += 1;
        if state.unavailable {
            return Err(StorageError::transient("connection refused"));
        }
        if let Some(err) = state.failing_sessions.pop_front() {
            return Err(err);
        }
        Ok(Box::new(MemorySession {
            state: Arc::clone(&self.state),
        }))
    }

    async fn ping(&self) -> Result<(), StorageError> {
        if self.state.lock().await.unavailable {
            return Err(StorageError::transient("connection refused"));
        }
        Ok(())
    }
}

struct MemorySession {
    state: Arc<Mutex<State>>,
}

impl MemorySession {
    /// Count the call and serve any injected latency. The lock is not held
    /// while stalling, so a write abandoned mid-delay leaves rows untouched.
    async fn begin_write(&self) {
        let delay = {
            let mut state = self.state.lock().await;
            state.write_calls += 1;
            state.delayed_writes.pop_front()
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl StoreSession for MemorySession {
    async fn write_all(
        &mut self,
        records: &[CaseLogRecord],
        policy: ConflictPolicy,
    ) -> Result<u64, StorageError> {
        self.begin_write().await;
        let mut state = self.state.lock().await;
        let refs: Vec<&CaseLogRecord> = records.iter().collect();
        if let Some(err) = state.injected_write_failure(&refs) {
            return Err(err);
        }

        // Stage on a copy so a failure part-way leaves nothing behind.
        let mut staged = state.rows.clone();
        let mut last_id = state.last_id;
        let mut affected = 0;
        for record in records {
            affected += State::apply(&mut staged, &mut last_id, record, policy)?;
        }

        state.rows = staged;
        state.last_id = last_id;
        Ok(affected)
    }

    async fn write_one(
        &mut self,
        record: &CaseLogRecord,
        policy: ConflictPolicy,
    ) -> Result<u64, StorageError> {
        self.begin_write().await;
        let mut state = self.state.lock().await;
        if let Some(err) = state.injected_write_failure(&[record]) {
            return Err(err);
        }
        let State { rows, last_id, .. } = &mut *state;
        State::apply(rows, last_id, record, policy)
    }
}
