//! Subscriber setup for the binary.

use std::str::FromStr;

use fleetroll_core::config::LoggingConfig;
use tracing_subscriber::EnvFilter;

/// Filter used when neither `RUST_LOG` nor the config file sets one.
pub const DEFAULT_FILTER: &str = "info,fleetroll=debug";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => anyhow::bail!("unknown log format: {other:?}"),
        }
    }
}

impl LogFormat {
    /// The flag wins over the config file, which wins over text.
    pub fn resolve(flag: Option<LogFormat>, config: &LoggingConfig) -> anyhow::Result<Self> {
        match (flag, config.format.as_deref()) {
            (Some(format), _) => Ok(format),
            (None, Some(format)) => format.parse(),
            (None, None) => Ok(Self::Text),
        }
    }
}

/// `RUST_LOG` if set, else the config filter, else [`DEFAULT_FILTER`].
pub fn filter(config: &LoggingConfig) -> anyhow::Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    let directives = config.filter.as_deref().unwrap_or(DEFAULT_FILTER);
    Ok(EnvFilter::try_new(directives)?)
}

/// Install the global subscriber. Logs go to stderr; stdout carries the
/// JSON report.
pub fn init(flag: Option<LogFormat>, config: &LoggingConfig) -> anyhow::Result<()> {
    let format = LogFormat::resolve(flag, config)?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter(config)?)
        .with_writer(std::io::stderr);

    let installed = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|e| anyhow::anyhow!("installing log subscriber: {e}"))
}
