use std::time::Duration;

use serde::Deserialize;

use crate::{Error, error::Result, lifecycle::LifecyclePolicy};

/// Deadline applied to every driver call.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// A named MongoDB connection.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct ConnectorOptions {
    pub name: String,
    pub uri: String,
    pub database: String,
}

impl ConnectorOptions {
    pub fn new(
        name: impl Into<String>,
        uri: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            uri: uri.into(),
            database: database.into(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.database.is_empty() {
            return Err(Error::MissingDatabase(self.name.clone()));
        }
        if !(self.uri.starts_with("mongodb://") || self.uri.starts_with("mongodb+srv://")) {
            return Err(Error::InvalidConnectionUri(self.uri.clone()));
        }
        Ok(())
    }
}

/// Per-repository settings: lifecycle toggles and the driver deadline.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RepositoryOptions {
    pub created: bool,
    pub modified: bool,
    pub deleted: bool,
    pub timeout: Duration,
}

impl Default for RepositoryOptions {
    fn default() -> Self {
        Self {
            created: false,
            modified: false,
            deleted: false,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl RepositoryOptions {
    pub fn new(created: bool, modified: bool, deleted: bool) -> Self {
        Self {
            created,
            modified,
            deleted,
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn policy(&self) -> LifecyclePolicy {
        LifecyclePolicy::new(self.created, self.modified, self.deleted)
    }
}
