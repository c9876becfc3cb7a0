//! Replacement requests — what to replace and how aggressively.

use std::time::Duration;

use fleetroll_core::config::{DEFAULT_POLL_INTERVAL, DEFAULT_WAIT_TIMEOUT};
use fleetroll_core::{GroupName, InstanceId};
use fleetroll_health::WaitConfig;

use crate::classify::ClassifyPolicy;

/// Which members a replacement targets.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ReplaceMode {
    /// Every member not on the current configuration.
    All,
    /// Only the named instances. Ids not in the group are ignored.
    Instances(Vec<InstanceId>),
}

/// Configuration for rolling replacement.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RollingConfig {
    /// Old members terminated per batch; also the temporary capacity bump.
    pub batch_size: u32,
    /// Classify by launch configuration (`true`) or by membership in the
    /// session's initial snapshot (`false`).
    pub lc_check: bool,
    /// Deadline for every individual convergence wait.
    pub wait_timeout: Duration,
    /// Sleep between polls.
    pub poll_interval: Duration,
}

impl Default for RollingConfig {
    fn default() -> Self {
        Self {
            batch_size: 1,
            lc_check: true,
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl RollingConfig {
    pub fn policy(&self) -> ClassifyPolicy {
        ClassifyPolicy::from_lc_check(self.lc_check)
    }

    pub fn wait(&self) -> WaitConfig {
        WaitConfig {
            interval: self.poll_interval,
            timeout: self.wait_timeout,
        }
    }
}

/// A rolling replacement of one group.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ReplaceRequest {
    pub group: GroupName,
    /// Configuration the group should run. Submitted first when it differs
    /// from the group's current one.
    pub launch_config: Option<String>,
    pub mode: ReplaceMode,
    pub rolling: RollingConfig,
}

impl ReplaceRequest {
    pub fn all(group: &str) -> Self {
        Self {
            group: group.to_string(),
            launch_config: None,
            mode: ReplaceMode::All,
            rolling: RollingConfig::default(),
        }
    }

    pub fn instances(group: &str, ids: Vec<InstanceId>) -> Self {
        Self {
            mode: ReplaceMode::Instances(ids),
            ..Self::all(group)
        }
    }

    pub fn with_rolling(mut self, rolling: RollingConfig) -> Self {
        self.rolling = rolling;
        self
    }

    pub fn with_launch_config(mut self, launch_config: &str) -> Self {
        self.launch_config = Some(launch_config.to_string());
        self
    }
}
