//! Case-log archive domain: records, reconciliation policies, the error
//! taxonomy, retry, and the [`archiver::Archiver`] write path.
//!
//! Nothing in this crate speaks SQL. Storage is reached through the
//! [`store::CaseLogStore`] seam; `caselog-db` provides the PostgreSQL
//! implementation and [`memory`] an in-process one.

pub mod archiver;
pub mod caselog;
pub mod error;
pub mod memory;
pub mod retry;
pub mod store;
pub mod types;
