use std::fmt;

/// Whether retrying a failed storage operation can be expected to help.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageErrorKind {
    /// Connection refused/dropped, timeouts, serialization or lock conflicts.
    Transient,
    /// Constraint violations, malformed data, schema mismatches.
    Permanent,
}

impl StorageErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::Permanent => "permanent",
        }
    }
}

impl fmt::Display for StorageErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A storage-layer failure, already classified by the adapter that produced it.
///
/// Retry logic only ever looks at [`StorageError::kind`]; adapters are
/// responsible for mapping driver errors onto it before they leave the
/// adapter boundary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind} storage error: {message}")]
pub struct StorageError {
    pub kind: StorageErrorKind,
    pub message: String,
}

impl StorageError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: StorageErrorKind::Transient,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: StorageErrorKind::Permanent,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind == StorageErrorKind::Transient
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// The caller sent something unusable. Never retried.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Storage kept failing (transient, after retries) or failed permanently.
    #[error(transparent)]
    Storage(#[from] StorageError),
}
