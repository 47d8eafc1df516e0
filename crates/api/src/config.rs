use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use axum::http::HeaderValue;
use caselog_core::archiver::ArchiverConfig;
use caselog_core::caselog::ConflictPolicy;
use caselog_core::retry::RetryPolicy;
use caselog_db::DbConfig;

/// A configuration value that could not be used.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var}={value:?} is invalid: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    fn invalid(var: &'static str, value: &str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            var,
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

/// Log output format for the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("expected 'pretty' or 'json', got '{other}'")),
        }
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<HeaderValue>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    pub log_format: LogFormat,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3000,
            cors_origins: vec![HeaderValue::from_static("http://localhost:5173")],
            request_timeout_secs: 30,
            log_format: LogFormat::Pretty,
        }
    }
}

/// Everything the service reads from its environment.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub db: DbConfig,
    pub archiver: ArchiverConfig,
}

impl AppConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                        | Default                    |
    /// |--------------------------------|----------------------------|
    /// | `HOST`                         | `0.0.0.0`                  |
    /// | `PORT`                         | `3000`                     |
    /// | `CORS_ORIGINS`                 | `http://localhost:5173`    |
    /// | `REQUEST_TIMEOUT_SECS`         | `30`                       |
    /// | `LOG_FORMAT`                   | `pretty`                   |
    /// | `DATABASE_URL`                 | unset                      |
    /// | `DB_HOST`                      | `localhost`                |
    /// | `DB_PORT`                      | `5432`                     |
    /// | `DB_NAME`                      | `caselog_archive`          |
    /// | `DB_USER`                      | `postgres`                 |
    /// | `DB_PASSWORD`                  | empty                      |
    /// | `DB_REQUIRE_TLS`               | `false`                    |
    /// | `DB_MAX_CONNECTIONS`           | `10`                       |
    /// | `DB_ACQUIRE_TIMEOUT_SECS`      | `5`                        |
    /// | `ARCHIVE_CONFLICT_POLICY`      | `skip`                     |
    /// | `ARCHIVE_RETRY_ENABLED`        | `true`                     |
    /// | `ARCHIVE_RETRY_MAX_ATTEMPTS`   | `3`                        |
    /// | `ARCHIVE_RETRY_DELAY_MS`       | `2000`                     |
    /// | `ARCHIVE_STORAGE_TIMEOUT_SECS` | `30`                       |
    /// | `ARCHIVE_INSTRUMENTATION`      | `true`                     |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`AppConfig::from_env`], reading values through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };
        let server = ServerConfig {
            host: env.string("HOST", "0.0.0.0"),
            port: env.parse("PORT", 3000)?,
            cors_origins: env.origins("CORS_ORIGINS", "http://localhost:5173")?,
            request_timeout_secs: env.positive("REQUEST_TIMEOUT_SECS", 30)?,
            log_format: env.parse("LOG_FORMAT", LogFormat::Pretty)?,
        };

        let db_defaults = DbConfig::default();
        let db = DbConfig {
            url: env.get("DATABASE_URL").filter(|u| !u.trim().is_empty()),
            host: env.string("DB_HOST", &db_defaults.host),
            port: env.parse("DB_PORT", db_defaults.port)?,
            database: env.string("DB_NAME", &db_defaults.database),
            user: env.string("DB_USER", &db_defaults.user),
            password: env.string("DB_PASSWORD", ""),
            require_tls: env.flag("DB_REQUIRE_TLS", false)?,
            max_connections: env.positive("DB_MAX_CONNECTIONS", db_defaults.max_connections)?,
            acquire_timeout: Duration::from_secs(env.positive(
                "DB_ACQUIRE_TIMEOUT_SECS",
                db_defaults.acquire_timeout.as_secs(),
            )?),
        };

        let retry = if env.flag("ARCHIVE_RETRY_ENABLED", true)? {
            RetryPolicy::new(
                env.positive("ARCHIVE_RETRY_MAX_ATTEMPTS", 3)?,
                Duration::from_millis(env.parse("ARCHIVE_RETRY_DELAY_MS", 2000)?),
            )
        } else {
            RetryPolicy::disabled()
        };

        let archiver = ArchiverConfig {
            policy: env.policy("ARCHIVE_CONFLICT_POLICY")?,
            retry,
            storage_timeout: Duration::from_secs(env.positive("ARCHIVE_STORAGE_TIMEOUT_SECS", 30)?),
            instrumentation: env.flag("ARCHIVE_INSTRUMENTATION", true)?,
        };

        Ok(Self {
            server,
            db,
            archiver,
        })
    }
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, var: &str) -> Option<String> {
        (self.lookup)(var)
    }

    fn string(&self, var: &str, default: &str) -> String {
        self.get(var).unwrap_or_else(|| default.to_string())
    }

    fn parse<T>(&self, var: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.get(var) {
            None => Ok(default),
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|e: T::Err| ConfigError::invalid(var, &raw, e.to_string())),
        }
    }

    fn positive<T>(&self, var: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr + PartialEq + Default,
        T::Err: Display,
    {
        let value = self.parse(var, default)?;
        if value == T::default() {
            let raw = self.get(var).unwrap_or_default();
            return Err(ConfigError::invalid(var, &raw, "must be greater than zero"));
        }
        Ok(value)
    }

    fn flag(&self, var: &'static str, default: bool) -> Result<bool, ConfigError> {
        let Some(raw) = self.get(var) else {
            return Ok(default);
        };
        match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::invalid(var, &raw, "expected true or false")),
        }
    }

    fn policy(&self, var: &'static str) -> Result<ConflictPolicy, ConfigError> {
        match self.get(var) {
            None => Ok(ConflictPolicy::default()),
            Some(raw) => {
                ConflictPolicy::from_str_value(&raw).map_err(|e| ConfigError::invalid(var, &raw, e))
            }
        }
    }

    fn origins(&self, var: &'static str, default: &str) -> Result<Vec<HeaderValue>, ConfigError> {
        self.string(var, default)
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|origin| {
                HeaderValue::from_str(origin)
                    .map_err(|e| ConfigError::invalid(var, origin, e.to_string()))
            })
            .collect()
    }
}
