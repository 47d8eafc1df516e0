//! Map sqlx errors onto the archive's transient/permanent split.
//!
//! This is the only place driver errors are inspected; everything above the
//! adapter sees a [`StorageError`].

use caselog_core::error::{StorageError, StorageErrorKind};

/// Classify a PostgreSQL SQLSTATE code.
///
/// Connection exceptions (class `08`), serialization failures, deadlocks,
/// lock timeouts, cancelled statements, and server shutdown/startup states
/// are transient. Everything else, integrity (`23`) and data (`22`)
/// violations included, is permanent.
pub fn classify_sqlstate(code: &str) -> StorageErrorKind {
    match code {
        "40001" | "40P01" | "53300" | "55P03" | "57014" | "57P01" | "57P02" | "57P03" => {
            StorageErrorKind::Transient
        }
        c if c.starts_with("08") => StorageErrorKind::Transient,
        _ => StorageErrorKind::Permanent,
    }
}

pub fn classify_sqlx_error(err: &sqlx::Error) -> StorageError {
    let kind = match err {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => StorageErrorKind::Transient,
        sqlx::Error::Database(db_err) => db_err
            .code()
            .as_deref()
            .map(classify_sqlstate)
            .unwrap_or(StorageErrorKind::Permanent),
        _ => StorageErrorKind::Permanent,
    };
    StorageError {
        kind,
        message: err.to_string(),
    }
}

/// `map_err` adapter.
pub fn storage_err(err: sqlx::Error) -> StorageError {
    classify_sqlx_error(&err)
}
