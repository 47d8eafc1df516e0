/// Archive rows use a PostgreSQL BIGSERIAL surrogate key.
pub type DbId = i64;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
