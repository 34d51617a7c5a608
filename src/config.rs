use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PersistenceContext, Result};

/// What an update should do when its target id matches no row.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingRowPolicy {
    /// Report `ChangelogError::NotFound`.
    #[default]
    NotFound,
    /// Treat zero affected rows as success.
    Ignore,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Database file. `None` opens a private in-memory database.
    pub path: Option<PathBuf>,
    pub pool_size: u32,
    pub connection_timeout_ms: u64,
    pub busy_timeout_ms: u64,
    /// Default deadline for every store operation. A `CallContext` deadline
    /// that is earlier wins.
    pub statement_timeout_ms: Option<u64>,
    pub missing_row_policy: MissingRowPolicy,
    /// Only allow PENDING -> DONE and PENDING -> FAILED status changes.
    pub enforce_status_transitions: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: None,
            pool_size: 4,
            connection_timeout_ms: 30_000,
            busy_timeout_ms: 5_000,
            statement_timeout_ms: None,
            missing_row_policy: MissingRowPolicy::NotFound,
            enforce_status_transitions: false,
        }
    }
}

impl StoreConfig {
    pub fn memory() -> Self {
        Self::default()
    }

    pub fn file<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::default()
        }
    }

    /// Parses a config from JSON. Missing keys take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).persistence("parse store config")
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    pub fn statement_timeout(&self) -> Option<Duration> {
        self.statement_timeout_ms.map(Duration::from_millis)
    }
}
