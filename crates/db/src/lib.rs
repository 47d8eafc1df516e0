//! PostgreSQL adapter for the case-log archive.

use std::fmt;
use std::time::Duration;

use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};

pub mod classify;
pub mod models;
pub mod repositories;
pub mod store;

pub use store::PgCaseLogStore;

pub type DbPool = sqlx::PgPool;

/// Connection settings, resolved once at startup.
///
/// When `url` is set it wins over the individual parts; `require_tls` is
/// still applied on top of it.
#[derive(Clone)]
pub struct DbConfig {
    pub url: Option<String>,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    pub require_tls: bool,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: "localhost".into(),
            port: 5432,
            database: "caselog_archive".into(),
            user: "postgres".into(),
            password: String::new(),
            require_tls: false,
            max_connections: 10,
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

// Hand-written so the password never reaches the logs.
impl fmt::Debug for DbConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbConfig")
            .field("url", &self.url.as_ref().map(|_| "<redacted>"))
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("require_tls", &self.require_tls)
            .field("max_connections", &self.max_connections)
            .field("acquire_timeout", &self.acquire_timeout)
            .finish()
    }
}

impl DbConfig {
    pub fn connect_options(&self) -> Result<PgConnectOptions, sqlx::Error> {
        let options = match &self.url {
            Some(url) => url.parse::<PgConnectOptions>()?,
            None => PgConnectOptions::new()
                .host(&self.host)
                .port(self.port)
                .database(&self.database)
                .username(&self.user)
                .password(&self.password),
        };

        let options = if self.require_tls {
            options.ssl_mode(PgSslMode::Require)
        } else if self.url.is_none() {
            options.ssl_mode(PgSslMode::Prefer)
        } else {
            options
        };
        Ok(options)
    }
}

/// Create a connection pool.
///
/// Connections are opened lazily, so the process starts (and answers its
/// liveness check) even while the database is unreachable.
pub fn create_pool(config: &DbConfig) -> Result<DbPool, sqlx::Error> {
    let options = config.connect_options()?;
    Ok(PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout)
        .connect_lazy_with(options))
}

/// Round-trip a trivial query.
pub async fn health_check(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}
