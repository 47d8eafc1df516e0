//! Case-log records, reconciliation policies, and write results.
//!
//! This module is pure: no I/O, no async. It owns the wire shape of a
//! case-log record, the minimal validation applied before anything touches
//! storage, and the in-batch duplicate collapsing that keeps a single bulk
//! statement from touching the same row twice.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError, ValidationErrors};

use crate::types::Timestamp;

// ---------------------------------------------------------------------------
// Record
// ---------------------------------------------------------------------------

/// One case-log entry to archive.
///
/// Accepts both the camelCase names used by current callers and the
/// snake_case names emitted by the upstream export (`sf_id`, `case_id`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CaseLogRecord {
    /// Stable upstream identity; the conflict key.
    #[serde(default, alias = "external_id", alias = "sf_id")]
    #[validate(
        required(message = "externalId is required"),
        custom(function = "not_blank")
    )]
    pub external_id: Option<String>,

    #[serde(default, alias = "case_id")]
    pub case_id: Option<String>,

    #[serde(default)]
    #[validate(custom(function = "not_blank"))]
    pub name: String,

    #[serde(default)]
    pub comments: Option<String>,

    /// Archival metadata below is write-once: a merge never changes it.
    #[serde(default)]
    pub status: Option<String>,

    #[serde(default, alias = "createdDate", alias = "created_date")]
    pub created_at: Option<Timestamp>,

    #[serde(default, alias = "lastModifiedDate", alias = "last_modified_date")]
    pub modified_at: Option<Timestamp>,
}

fn not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        let mut err = ValidationError::new("blank");
        err.message = Some("must not be blank".into());
        return Err(err);
    }
    Ok(())
}

impl CaseLogRecord {
    pub fn new(external_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            external_id: Some(external_id.into()),
            case_id: None,
            name: name.into(),
            comments: None,
            status: None,
            created_at: None,
            modified_at: None,
        }
    }

    pub fn with_case_id(mut self, case_id: impl Into<String>) -> Self {
        self.case_id = Some(case_id.into());
        self
    }

    pub fn with_comments(mut self, comments: impl Into<String>) -> Self {
        self.comments = Some(comments.into());
        self
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn external_id(&self) -> Option<&str> {
        self.external_id.as_deref()
    }

    /// Check the required fields, returning a readable description of every
    /// problem found.
    pub fn check(&self) -> Result<(), String> {
        self.validate().map_err(|errors| describe(&errors))
    }

    /// Apply a later submission of the same record under last-write-wins.
    ///
    /// Only the mutable fields move; identity and archival metadata stay.
    fn merge_from(&mut self, later: &CaseLogRecord) {
        self.case_id = later.case_id.clone();
        self.name = later.name.clone();
        self.comments = later.comments.clone();
    }
}

/// Flatten validator output into `field: message; field: message`, sorted so
/// the text is stable across runs.
fn describe(errors: &ValidationErrors) -> String {
    let mut parts: Vec<String> = errors
        .field_errors()
        .into_iter()
        .flat_map(|(field, errs)| {
            errs.iter().map(move |e| {
                let message = e
                    .message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| e.code.to_string());
                format!("{field}: {message}")
            })
        })
        .collect();
    parts.sort();
    parts.join("; ")
}

/// Validate a batch for the all-or-nothing path.
///
/// An empty batch is rejected: callers are told explicitly instead of
/// getting a silent success. The first invalid record fails the batch.
pub fn validate_batch(batch: &[CaseLogRecord]) -> Result<(), String> {
    ensure_not_empty(batch)?;
    for (index, record) in batch.iter().enumerate() {
        record
            .check()
            .map_err(|msg| format!("record {index}: {msg}"))?;
    }
    Ok(())
}

pub fn ensure_not_empty(batch: &[CaseLogRecord]) -> Result<(), String> {
    if batch.is_empty() {
        return Err("batch must contain at least one case-log record".to_string());
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Policies
// ---------------------------------------------------------------------------

/// How a write reconciles with an existing row carrying the same external id.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// First write wins; later writes are no-ops.
    #[default]
    Skip,
    /// Last write wins on `case_id`, `name`, `comments`.
    Merge,
}

impl ConflictPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Skip => "skip",
            Self::Merge => "merge",
        }
    }

    pub fn from_str_value(s: &str) -> Result<Self, String> {
        match s.trim().to_ascii_lowercase().as_str() {
            "skip" | "skip_on_conflict" | "ignore" => Ok(Self::Skip),
            "merge" | "merge_on_conflict" | "upsert" => Ok(Self::Merge),
            other => Err(format!(
                "Invalid conflict policy '{other}'. Must be one of: skip, merge"
            )),
        }
    }
}

impl fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How failures inside one batch are reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// One transaction for the whole batch.
    AllOrNothing,
    /// One transaction per record; failures are collected.
    PerRecord,
}

impl WriteMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AllOrNothing => "all_or_nothing",
            Self::PerRecord => "per_record",
        }
    }
}

impl fmt::Display for WriteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Collapse records sharing an external id so a single statement never
/// touches the same row twice.
///
/// The result matches writing the records one after another: under
/// [`ConflictPolicy::Skip`] the first occurrence survives; under
/// [`ConflictPolicy::Merge`] the first occurrence keeps its position and
/// write-once fields while taking the mutable fields of the last one.
pub fn collapse_duplicates(records: &[CaseLogRecord], policy: ConflictPolicy) -> Vec<CaseLogRecord> {
    let mut positions: HashMap<&str, usize> = HashMap::with_capacity(records.len());
    let mut out: Vec<CaseLogRecord> = Vec::with_capacity(records.len());

    for record in records {
        let Some(key) = record.external_id() else {
            out.push(record.clone());
            continue;
        };
        match positions.get(key) {
            None => {
                positions.insert(key, out.len());
                out.push(record.clone());
            }
            Some(&idx) => {
                if policy == ConflictPolicy::Merge {
                    out[idx].merge_from(record);
                }
            }
        }
    }

    out
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// One record that could not be written in per-record mode.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordFailure {
    pub external_id: Option<String>,
    pub error: String,
}

/// Where the time of one archive call went. Informational only.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct WriteTimings {
    pub total_time_ms: f64,
    pub db_time_ms: f64,
    pub cpu_time_ms: f64,
}

impl WriteTimings {
    pub fn from_durations(total: Duration, db: Duration) -> Self {
        let db = db.min(total);
        Self {
            total_time_ms: millis(total),
            db_time_ms: millis(db),
            cpu_time_ms: millis(total - db),
        }
    }
}

fn millis(d: Duration) -> f64 {
    (d.as_secs_f64() * 1_000_000.0).round() / 1_000.0
}

/// Outcome of one archive call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WriteResult {
    pub received: usize,
    /// Records committed without error (skipped duplicates included).
    pub inserted: usize,
    /// Rows the bulk statement actually inserted or updated (all-or-nothing only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows_affected: Option<u64>,
    pub failed: Vec<RecordFailure>,
    /// Storage attempts made, retries included.
    pub attempts: u32,
    #[serde(flatten)]
    pub timings: Option<WriteTimings>,
}

impl WriteResult {
    pub fn is_partial(&self) -> bool {
        !self.failed.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
