//! Repository for the `caselog_archive` table.
//!
//! Writes take a `&mut PgConnection` so the caller decides the transaction
//! boundary; reads take the pool.

use caselog_core::caselog::{CaseLogRecord, ConflictPolicy};
use caselog_core::types::Timestamp;
use sqlx::{PgConnection, PgPool};

use crate::models::case_log::CaseLogRow;

/// Column list for `caselog_archive` queries.
const COLUMNS: &str = "\
    id, external_id, case_id, name, comments, status, \
    created_date, last_modified_date, archived_at, updated_at";

/// Columns supplied by the caller on insert.
const INSERT_COLUMNS: &str = "\
    external_id, case_id, name, comments, status, created_date, last_modified_date";

/// The reconciliation clause for `policy`.
///
/// Merge only moves the mutable fields; `status` and the upstream
/// timestamps are write-once.
fn conflict_clause(policy: ConflictPolicy) -> &'static str {
    match policy {
        ConflictPolicy::Skip => "ON CONFLICT (external_id) DO NOTHING",
        ConflictPolicy::Merge => {
            "ON CONFLICT (external_id) DO UPDATE SET \
                 case_id    = EXCLUDED.case_id, \
                 name       = EXCLUDED.name, \
                 comments   = EXCLUDED.comments, \
                 updated_at = NOW()"
        }
    }
}

pub struct CaseLogRepo;

impl CaseLogRepo {
    /// Write `records` with one bulk `INSERT ... SELECT FROM UNNEST`.
    ///
    /// The statement must not see the same external id twice under merge
    /// (PostgreSQL refuses to update a row twice in one command), so callers
    /// collapse duplicates first. Returns rows inserted or updated.
    pub async fn upsert_batch(
        conn: &mut PgConnection,
        records: &[CaseLogRecord],
        policy: ConflictPolicy,
    ) -> Result<u64, sqlx::Error> {
        if records.is_empty() {
            return Ok(0);
        }

        let n = records.len();
        let mut external_ids: Vec<Option<String>> = Vec::with_capacity(n);
        let mut case_ids: Vec<Option<String>> = Vec::with_capacity(n);
        let mut names: Vec<String> = Vec::with_capacity(n);
        let mut comments: Vec<Option<String>> = Vec::with_capacity(n);
        let mut statuses: Vec<Option<String>> = Vec::with_capacity(n);
        let mut created: Vec<Option<Timestamp>> = Vec::with_capacity(n);
        let mut modified: Vec<Option<Timestamp>> = Vec::with_capacity(n);

        for r in records {
            external_ids.push(r.external_id.clone());
            case_ids.push(r.case_id.clone());
            names.push(r.name.clone());
            comments.push(r.comments.clone());
            statuses.push(r.status.clone());
            created.push(r.created_at);
            modified.push(r.modified_at);
        }

        let query = format!(
            "INSERT INTO caselog_archive ({INSERT_COLUMNS}) \
             SELECT * FROM UNNEST(\
                 $1::text[], $2::text[], $3::text[], $4::text[], $5::text[], \
                 $6::timestamptz[], $7::timestamptz[]) \
             {}",
            conflict_clause(policy)
        );
        let result = sqlx::query(&query)
            .bind(external_ids)
            .bind(case_ids)
            .bind(names)
            .bind(comments)
            .bind(statuses)
            .bind(created)
            .bind(modified)
            .execute(&mut *conn)
            .await?;

        tracing::debug!(
            records = n,
            rows_affected = result.rows_affected(),
            policy = %policy,
            "Bulk case-log upsert executed",
        );
        Ok(result.rows_affected())
    }

    /// Write a single record. Returns 1 when a row was inserted or updated,
    /// 0 when skip-on-conflict left an existing row alone.
    pub async fn upsert_one(
        conn: &mut PgConnection,
        record: &CaseLogRecord,
        policy: ConflictPolicy,
    ) -> Result<u64, sqlx::Error> {
        let query = format!(
            "INSERT INTO caselog_archive ({INSERT_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             {}",
            conflict_clause(policy)
        );
        let result = sqlx::query(&query)
            .bind(&record.external_id)
            .bind(&record.case_id)
            .bind(&record.name)
            .bind(&record.comments)
            .bind(&record.status)
            .bind(record.created_at)
            .bind(record.modified_at)
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected())
    }

    /// Find an archived row by its external id.
    pub async fn find_by_external_id(
        pool: &PgPool,
        external_id: &str,
    ) -> Result<Option<CaseLogRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM caselog_archive WHERE external_id = $1");
        sqlx::query_as::<_, CaseLogRow>(&query)
            .bind(external_id)
            .fetch_optional(pool)
            .await
    }

    /// Total number of archived rows.
    pub async fn count(pool: &PgPool) -> Result<i64, sqlx::Error> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM caselog_archive")
            .fetch_one(pool)
            .await?;
        Ok(count)
    }
}
