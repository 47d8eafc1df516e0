pub mod case_log;
