//! Handlers for the case-log archive endpoints.
//!
//! Both endpoints take a JSON array of case-log records. They differ only in
//! the [`WriteMode`] handed to the archiver.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use caselog_core::caselog::{CaseLogRecord, WriteMode, WriteResult};
use serde::Serialize;

use crate::error::AppResult;
use crate::state::AppState;

/// Success body: a status tag plus the write result's fields.
#[derive(Debug, Serialize)]
pub struct ArchiveResponse {
    /// `ok`, or `partial` when some records failed.
    pub status: &'static str,
    #[serde(flatten)]
    pub result: WriteResult,
}

impl From<WriteResult> for ArchiveResponse {
    fn from(result: WriteResult) -> Self {
        let status = if result.is_partial() { "partial" } else { "ok" };
        Self { status, result }
    }
}

/// POST /archive
///
/// Archive the whole batch in one transaction, or nothing at all.
pub async fn archive_batch(
    State(state): State<AppState>,
    payload: Result<Json<Vec<CaseLogRecord>>, JsonRejection>,
) -> AppResult<Json<ArchiveResponse>> {
    archive(&state, payload, WriteMode::AllOrNothing).await
}

/// POST /archive/case-logs
///
/// Archive each record independently and report the ones that failed.
pub async fn archive_case_logs(
    State(state): State<AppState>,
    payload: Result<Json<Vec<CaseLogRecord>>, JsonRejection>,
) -> AppResult<Json<ArchiveResponse>> {
    archive(&state, payload, WriteMode::PerRecord).await
}

async fn archive(
    state: &AppState,
    payload: Result<Json<Vec<CaseLogRecord>>, JsonRejection>,
    mode: WriteMode,
) -> AppResult<Json<ArchiveResponse>> {
    let Json(records) = payload.inspect_err(|rejection| {
        tracing::info!(mode = %mode, error = %rejection.body_text(), "Rejected archive payload");
    })?;

    let result = state.archiver.write(&records, mode).await?;

    Ok(Json(result.into()))
}
