use thiserror::Error;

use crate::capacity::GrowStep;

pub type Result<T> = std::result::Result<T, VaultError>;

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("backup already exists in the journal: '{0}'")]
    DuplicateBackup(String),

    #[error("backup is not recorded in the journal: '{0}'")]
    UnknownBackup(String),

    #[error("backup not found: '{0}'")]
    BackupNotFound(String),

    #[error("failed to grow storage ({step}): {source}")]
    CapacityGrowth {
        step: GrowStep,
        #[source]
        source: Box<VaultError>,
    },

    #[error("refusing to shrink backing store '{path}' by {bytes} bytes")]
    NegativeGrowth { path: String, bytes: i64 },

    #[error("`{0}` is not found in PATH")]
    GatewayUnavailable(String),

    #[error("{operation} failed for '{path}': {detail}")]
    GatewayFailed {
        operation: String,
        path: String,
        detail: String,
    },

    #[error("{operation} did not respond within {secs} seconds")]
    GatewayTimeout { operation: String, secs: u64 },

    #[error("journal '{path}' is corrupt: {detail}")]
    DataIntegrity { path: String, detail: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("volume is locked by another process (lock: {0})")]
    Locked(String),

    #[error("hook error: {0}")]
    Hook(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl VaultError {
    pub(crate) fn gateway_failed(
        operation: impl Into<String>,
        path: impl AsRef<std::path::Path>,
        detail: impl Into<String>,
    ) -> Self {
        VaultError::GatewayFailed {
            operation: operation.into(),
            path: path.as_ref().display().to_string(),
            detail: detail.into(),
        }
    }
}
