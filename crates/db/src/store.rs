//! [`CaseLogStore`] backed by a PostgreSQL pool.

use async_trait::async_trait;
use caselog_core::caselog::{CaseLogRecord, ConflictPolicy};
use caselog_core::error::StorageError;
use caselog_core::store::{CaseLogStore, StoreSession};
use sqlx::pool::PoolConnection;
use sqlx::{Connection, Postgres, Transaction};

use crate::classify::storage_err;
use crate::repositories::CaseLogRepo;
use crate::DbPool;

pub struct PgCaseLogStore {
    pool: DbPool,
}

impl PgCaseLogStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait]
impl CaseLogStore for PgCaseLogStore {
    async fn open_session(&self) -> Result<Box<dyn StoreSession>, StorageError> {
        let conn = self.pool.acquire().await.map_err(storage_err)?;
        Ok(Box::new(PgSession { conn }))
    }

    async fn ping(&self) -> Result<(), StorageError> {
        crate::health_check(&self.pool).await.map_err(storage_err)
    }
}

/// One pooled connection, returned to the pool on drop.
struct PgSession {
    conn: PoolConnection<Postgres>,
}

/// Commit on success, roll back explicitly on failure.
async fn finish<T>(
    tx: Transaction<'_, Postgres>,
    outcome: Result<T, sqlx::Error>,
) -> Result<T, StorageError> {
    match outcome {
        Ok(value) => {
            tx.commit().await.map_err(storage_err)?;
            Ok(value)
        }
        Err(e) => {
            let err = storage_err(e);
            if let Err(rollback_err) = tx.rollback().await {
                tracing::warn!(error = %rollback_err, "Rollback failed after write error");
            }
            Err(err)
        }
    }
}

#[async_trait]
impl StoreSession for PgSession {
    async fn write_all(
        &mut self,
        records: &[CaseLogRecord],
        policy: ConflictPolicy,
    ) -> Result<u64, StorageError> {
        let mut tx = self.conn.begin().await.map_err(storage_err)?;
        let outcome = CaseLogRepo::upsert_batch(&mut *tx, records, policy).await;
        finish(tx, outcome).await
    }

    async fn write_one(
        &mut self,
        record: &CaseLogRecord,
        policy: ConflictPolicy,
    ) -> Result<u64, StorageError> {
        let mut tx = self.conn.begin().await.map_err(storage_err)?;
        let outcome = CaseLogRepo::upsert_one(&mut *tx, record, policy).await;
        finish(tx, outcome).await
    }
}
