//! Storage seam between the archiver and a concrete database.
//!
//! A [`CaseLogStore`] hands out short-lived [`StoreSession`]s. A session owns
//! whatever connection it was built on and gives it back when dropped, so
//! release happens on every exit path without the archiver having to ask.
//! Adapters classify their driver errors into [`StorageError`] before
//! returning them.

use async_trait::async_trait;

use crate::caselog::{CaseLogRecord, ConflictPolicy};
use crate::error::StorageError;

#[async_trait]
pub trait CaseLogStore: Send + Sync {
    /// Acquire one session for the duration of a single archive call.
    async fn open_session(&self) -> Result<Box<dyn StoreSession>, StorageError>;

    /// Cheap reachability check for readiness.
    async fn ping(&self) -> Result<(), StorageError>;
}

#[async_trait]
pub trait StoreSession: Send {
    /// Write every record inside one transaction, applying `policy` on
    /// external-id conflicts. Commits on success; nothing is visible on
    /// error. Returns the number of rows inserted or updated.
    ///
    /// Callers collapse duplicate external ids beforehand.
    async fn write_all(
        &mut self,
        records: &[CaseLogRecord],
        policy: ConflictPolicy,
    ) -> Result<u64, StorageError>;

    /// Write a single record in its own transaction.
    async fn write_one(
        &mut self,
        record: &CaseLogRecord,
        policy: ConflictPolicy,
    ) -> Result<u64, StorageError>;
}
