//! The case-log archiver: validate, write idempotently, report.
//!
//! One call acquires one storage session, writes the batch according to the
//! [`WriteMode`], and drops the session before returning. Validation runs
//! first and never reaches the retry loop. Storage attempts are wrapped in
//! the configured [`RetryPolicy`]; re-running a whole batch is safe because
//! every write is idempotent on the external id under either
//! [`ConflictPolicy`].

use std::future::Future;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::caselog::{
    collapse_duplicates, ensure_not_empty, validate_batch, CaseLogRecord, ConflictPolicy,
    RecordFailure, WriteMode, WriteResult, WriteTimings,
};
use crate::error::{CoreError, StorageError};
use crate::retry::RetryPolicy;
use crate::store::{CaseLogStore, StoreSession};

/// Default bound on a single storage round trip.
pub const DEFAULT_STORAGE_TIMEOUT: Duration = Duration::from_secs(30);

/// Immutable archiver settings, fixed at construction.
#[derive(Debug, Clone, PartialEq)]
pub struct ArchiverConfig {
    pub policy: ConflictPolicy,
    pub retry: RetryPolicy,
    /// Bound on each session acquisition and each write; expiry is transient.
    pub storage_timeout: Duration,
    /// Report `total_time_ms` / `db_time_ms` / `cpu_time_ms` with results.
    pub instrumentation: bool,
}

impl Default for ArchiverConfig {
    fn default() -> Self {
        Self {
            policy: ConflictPolicy::default(),
            retry: RetryPolicy::default(),
            storage_timeout: DEFAULT_STORAGE_TIMEOUT,
            instrumentation: true,
        }
    }
}

/// Accumulates time spent waiting on storage across attempts.
#[derive(Default)]
struct DbClock(AtomicU64);

impl DbClock {
    fn add(&self, elapsed: Duration) {
        self.0.fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
    }

    fn total(&self) -> Duration {
        Duration::from_nanos(self.0.load(Ordering::Relaxed))
    }
}

pub struct Archiver {
    store: Arc<dyn CaseLogStore>,
    config: ArchiverConfig,
}

impl Archiver {
    pub fn new(store: Arc<dyn CaseLogStore>, config: ArchiverConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &ArchiverConfig {
        &self.config
    }

    /// Whether storage answers within the storage timeout.
    pub async fn ping(&self) -> bool {
        match tokio::time::timeout(self.config.storage_timeout, self.store.ping()).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Storage ping failed");
                false
            }
            Err(_) => {
                tracing::warn!("Storage ping timed out");
                false
            }
        }
    }

    /// Archive `batch` under the configured conflict policy.
    ///
    /// Returns [`CoreError::Validation`] for caller mistakes (nothing is
    /// written), [`CoreError::Storage`] once retries are exhausted or on a
    /// permanent failure in all-or-nothing mode. In per-record mode permanent
    /// record failures land in [`WriteResult::failed`] instead.
    pub async fn write(
        &self,
        batch: &[CaseLogRecord],
        mode: WriteMode,
    ) -> Result<WriteResult, CoreError> {
        let started = Instant::now();
        let clock = DbClock::default();
        let attempts = AtomicU32::new(0);

        tracing::debug!(
            received = batch.len(),
            mode = %mode,
            policy = %self.config.policy,
            "Archiving case-log batch",
        );

        let mut result = match mode {
            WriteMode::AllOrNothing => self.write_all_or_nothing(batch, &clock, &attempts).await,
            WriteMode::PerRecord => self.write_per_record(batch, &clock, &attempts).await,
        }
        .inspect_err(|e| match e {
            CoreError::Validation(msg) => {
                tracing::info!(mode = %mode, error = %msg, "Rejected case-log batch")
            }
            other => tracing::error!(mode = %mode, error = %other, "Case-log batch failed"),
        })?;

        result.attempts = attempts.load(Ordering::Relaxed);
        if self.config.instrumentation {
            result.timings = Some(WriteTimings::from_durations(started.elapsed(), clock.total()));
        }

        tracing::info!(
            mode = %mode,
            received = result.received,
            inserted = result.inserted,
            failed = result.failed.len(),
            attempts = result.attempts,
            "Archived case-log batch",
        );
        Ok(result)
    }

    async fn write_all_or_nothing(
        &self,
        batch: &[CaseLogRecord],
        clock: &DbClock,
        attempts: &AtomicU32,
    ) -> Result<WriteResult, CoreError> {
        validate_batch(batch).map_err(CoreError::Validation)?;

        let collapsed = collapse_duplicates(batch, self.config.policy);
        let records = collapsed.as_slice();
        let rows_affected = self
            .config
            .retry
            .run(
                move |attempt| {
                    attempts.store(attempt, Ordering::Relaxed);
                    async move { self.attempt_all(records, clock).await }
                },
                StorageError::is_transient,
            )
            .await?;

        Ok(WriteResult {
            received: batch.len(),
            inserted: batch.len(),
            rows_affected: Some(rows_affected),
            failed: Vec::new(),
            attempts: 0,
            timings: None,
        })
    }

    async fn write_per_record(
        &self,
        batch: &[CaseLogRecord],
        clock: &DbClock,
        attempts: &AtomicU32,
    ) -> Result<WriteResult, CoreError> {
        ensure_not_empty(batch).map_err(CoreError::Validation)?;

        let mut failed = Vec::new();
        let mut valid: Vec<&CaseLogRecord> = Vec::with_capacity(batch.len());
        for record in batch {
            match record.check() {
                Ok(()) => valid.push(record),
                Err(msg) => {
                    tracing::warn!(
                        external_id = record.external_id().unwrap_or_default(),
                        error = %msg,
                        "Case-log record rejected",
                    );
                    failed.push(RecordFailure {
                        external_id: record.external_id.clone(),
                        error: msg,
                    });
                }
            }
        }

        if !valid.is_empty() {
            let records = valid.as_slice();
            let write_failures = self
                .config
                .retry
                .run(
                    move |attempt| {
                        attempts.store(attempt, Ordering::Relaxed);
                        async move { self.attempt_each(records, clock).await }
                    },
                    StorageError::is_transient,
                )
                .await?;
            failed.extend(write_failures);
        }

        Ok(WriteResult {
            received: batch.len(),
            inserted: batch.len() - failed.len(),
            rows_affected: None,
            failed,
            attempts: 0,
            timings: None,
        })
    }

    /// One whole-batch attempt: session, single transaction, release.
    async fn attempt_all(
        &self,
        records: &[CaseLogRecord],
        clock: &DbClock,
    ) -> Result<u64, StorageError> {
        let mut session = self.open_session(clock).await?;
        self.timed(clock, session.write_all(records, self.config.policy))
            .await
    }

    /// One per-record attempt. Permanent record errors are collected; a
    /// transient one abandons the attempt so the whole call is retried on a
    /// fresh session. Records already committed are rewritten idempotently.
    async fn attempt_each(
        &self,
        records: &[&CaseLogRecord],
        clock: &DbClock,
    ) -> Result<Vec<RecordFailure>, StorageError> {
        let mut session = self.open_session(clock).await?;
        let mut failures = Vec::new();
        for &record in records {
            if let Err(e) = self
                .timed(clock, session.write_one(record, self.config.policy))
                .await
            {
                if e.is_transient() {
                    tracing::warn!(
                        external_id = record.external_id().unwrap_or_default(),
                        error = %e.message,
                        "Transient failure mid-batch, abandoning attempt",
                    );
                    return Err(e);
                }
                tracing::warn!(
                    external_id = record.external_id().unwrap_or_default(),
                    kind = %e.kind,
                    error = %e.message,
                    "Case-log record failed",
                );
                failures.push(RecordFailure {
                    external_id: record.external_id.clone(),
                    error: e.to_string(),
                });
            }
        }
        Ok(failures)
    }

    async fn open_session(&self, clock: &DbClock) -> Result<Box<dyn StoreSession>, StorageError> {
        self.timed(clock, self.store.open_session()).await
    }

    /// Run one storage round trip under the storage timeout, charging the
    /// elapsed time to `clock`.
    async fn timed<T>(
        &self,
        clock: &DbClock,
        fut: impl Future<Output = Result<T, StorageError>>,
    ) -> Result<T, StorageError> {
        let started = Instant::now();
        let outcome = tokio::time::timeout(self.config.storage_timeout, fut).await;
        clock.add(started.elapsed());
        outcome.unwrap_or_else(|_| {
            Err(StorageError::transient(format!(
                "storage round trip timed out after {} ms",
                self.config.storage_timeout.as_millis()
            )))
        })
    }
}
