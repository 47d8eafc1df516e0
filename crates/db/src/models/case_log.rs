//! Row model for the `caselog_archive` table.

use caselog_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `caselog_archive` table.
///
/// `external_id` is unique; `archived_at` is set on insert and never
/// changes, `updated_at` moves with every merge.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct CaseLogRow {
    pub id: DbId,
    pub external_id: String,
    pub case_id: Option<String>,
    pub name: String,
    pub comments: Option<String>,
    pub status: Option<String>,
    pub created_date: Option<Timestamp>,
    pub last_modified_date: Option<Timestamp>,
    pub archived_at: Timestamp,
    pub updated_at: Timestamp,
}
