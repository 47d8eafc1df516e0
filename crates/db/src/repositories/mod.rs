pub mod case_log_repo;

pub use case_log_repo::CaseLogRepo;
