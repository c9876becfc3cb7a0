//! fleetroll.toml configuration parser.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default pause between control-plane polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Default deadline for every wait.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    pub replace: ReplaceConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplaceConfig {
    pub batch_size: Option<u32>,
    pub lc_check: Option<bool>,
    pub wait_timeout: Option<String>,
    pub poll_interval: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `text` or `json`.
    pub format: Option<String>,
    /// An `EnvFilter` directive string.
    pub filter: Option<String>,
}

impl FleetConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let config: FleetConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    fn validate(&self) -> anyhow::Result<()> {
        self.wait_timeout()?;
        self.poll_interval()?;
        if self.replace.batch_size == Some(0) {
            anyhow::bail!("replace.batch_size must be at least 1");
        }
        if let Some(format) = &self.logging.format
            && format != "text"
            && format != "json"
        {
            anyhow::bail!("logging.format must be \"text\" or \"json\", got {format:?}");
        }
        Ok(())
    }

    pub fn batch_size(&self) -> u32 {
        self.replace.batch_size.unwrap_or(1)
    }

    pub fn lc_check(&self) -> bool {
        self.replace.lc_check.unwrap_or(true)
    }

    pub fn wait_timeout(&self) -> anyhow::Result<Duration> {
        match &self.replace.wait_timeout {
            Some(s) => parse_duration(s),
            None => Ok(DEFAULT_WAIT_TIMEOUT),
        }
    }

    pub fn poll_interval(&self) -> anyhow::Result<Duration> {
        match &self.replace.poll_interval {
            Some(s) => parse_duration(s),
            None => Ok(DEFAULT_POLL_INTERVAL),
        }
    }
}

/// Parse a duration string like "5s", "500ms", "2m", or plain seconds.
pub fn parse_duration(s: &str) -> anyhow::Result<Duration> {
    let s = s.trim();
    let parsed = if let Some(ms) = s.strip_suffix("ms") {
        ms.parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    };
    parsed.ok_or_else(|| anyhow::anyhow!("invalid duration: {s:?}"))
}
