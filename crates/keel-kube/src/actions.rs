//! Options for the install-or-upgrade workflow

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default time allowed for apply plus readiness
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);

/// What to do when the release already has history
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExistingReleasePolicy {
    /// Leave the deployed release untouched
    #[default]
    NoOp,

    /// Render and apply a new revision over the previous one
    Upgrade,
}

/// Options for install and upgrade
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InstallOptions {
    /// Roll back everything applied when the operation fails or is cancelled
    pub atomic: bool,

    /// Create the target namespace if it doesn't exist
    pub create_namespace: bool,

    /// Wait for applied resources to become ready
    pub wait: bool,

    /// Deadline for apply and wait
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Delay between readiness checks
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,

    /// Revisions kept in the history store after a successful operation
    pub history_max: usize,

    pub existing_release: ExistingReleasePolicy,
}

impl Default for InstallOptions {
    fn default() -> Self {
        Self {
            atomic: true,
            create_namespace: true,
            wait: true,
            timeout: DEFAULT_TIMEOUT,
            poll_interval: Duration::from_secs(2),
            history_max: 1,
            existing_release: ExistingReleasePolicy::NoOp,
        }
    }
}

impl InstallOptions {
    /// Upgrade existing releases instead of leaving them alone
    pub fn with_upgrade(mut self) -> Self {
        self.existing_release = ExistingReleasePolicy::Upgrade;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_wait(mut self, wait: bool) -> Self {
        self.wait = wait;
        self
    }

    pub fn with_atomic(mut self, atomic: bool) -> Self {
        self.atomic = atomic;
        self
    }
}
