pub mod group;
pub mod replace;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use serde::Serialize;
use tokio::sync::watch;
use tracing::info;

use fleetroll_core::{ControlPlane, FleetConfig, FleetError, FleetResult, Group};
use fleetroll_health::{WaitConfig, Waiter};
use fleetroll_sim::{FleetState, SimFleet};

/// Arguments every command takes.
#[derive(Debug, Clone, clap::Args)]
pub struct Target {
    /// Fleet file holding the simulated control plane
    #[arg(long, value_name = "FILE")]
    pub fleet: PathBuf,
    /// Group to operate on
    #[arg(long, value_name = "NAME")]
    pub group: String,
}

/// Shared by every command invocation.
pub struct Context {
    pub config: FleetConfig,
    pub shutdown: watch::Receiver<bool>,
}

impl Context {
    /// Waiter for lifecycle flows, timed from the config file.
    pub fn waiter(&self) -> anyhow::Result<Waiter> {
        let config = WaitConfig {
            interval: self.config.poll_interval()?,
            timeout: self.config.wait_timeout()?,
        };
        Ok(Waiter::new(config).with_shutdown(self.shutdown.clone()))
    }
}

/// Printed on success.
#[derive(Debug, Serialize)]
pub struct Report {
    pub changed: bool,
    /// Absent after a delete.
    pub group: Option<Group>,
}

/// A failed command, with whether anything was mutated before it failed.
#[derive(Debug)]
pub struct Failure {
    pub changed: bool,
    pub error: anyhow::Error,
}

impl Failure {
    pub fn new(changed: bool, error: impl Into<anyhow::Error>) -> Self {
        Self {
            changed,
            error: error.into(),
        }
    }

    /// The taxonomy kind for fleet errors, `error` for everything else.
    pub fn kind(&self) -> &'static str {
        self.error
            .downcast_ref::<FleetError>()
            .map_or("error", FleetError::kind)
    }

    pub fn message(&self) -> String {
        format!("{:#}", self.error)
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "changed": self.changed,
            "error": {
                "kind": self.kind(),
                "message": self.message(),
            },
        })
    }
}

impl From<anyhow::Error> for Failure {
    fn from(error: anyhow::Error) -> Self {
        Self::new(false, error)
    }
}

impl From<FleetError> for Failure {
    fn from(error: FleetError) -> Self {
        Self::new(false, error)
    }
}

/// Pair a command result with the fleet file save. `changed` survives
/// either failing, and a failed save wraps the command error.
pub fn settle<T>(
    result: FleetResult<T>,
    saved: anyhow::Result<()>,
    changed: bool,
) -> Result<T, Failure> {
    match (result, saved) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(save)) => Err(Failure::new(changed, save)),
        (Err(error), Ok(())) => Err(Failure::new(changed, error)),
        (Err(error), Err(save)) => Err(Failure::new(changed, save.context(error))),
    }
}

/// Bad user input, reported under the `invalid_request` kind.
pub fn invalid(error: anyhow::Error) -> FleetError {
    FleetError::InvalidRequest(format!("{error:#}"))
}

/// A fleet file loaded into a simulated control plane.
pub struct FleetFile {
    path: PathBuf,
    fleet: Arc<SimFleet>,
}

impl FleetFile {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let fleet = SimFleet::load(path)
            .with_context(|| format!("loading fleet file {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            fleet: Arc::new(fleet),
        })
    }

    /// Like [`FleetFile::open`], but a missing file starts an empty fleet.
    pub fn open_or_create(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            return Self::open(path);
        }
        info!(path = %path.display(), "starting a new fleet file");
        Ok(Self {
            path: path.to_path_buf(),
            fleet: Arc::new(SimFleet::new(FleetState::default())),
        })
    }

    pub fn plane(&self) -> ControlPlane {
        ControlPlane::from_shared(self.fleet.clone())
    }

    /// Group record without advancing the simulation.
    pub async fn peek(&self, name: &str) -> Option<Group> {
        self.fleet.peek(name).await
    }

    /// Whether any mutating call succeeded since the file was loaded.
    pub async fn mutated(&self) -> bool {
        self.fleet.applied_mutations().await > 0
    }

    pub async fn save(&self) -> anyhow::Result<()> {
        self.fleet
            .save(&self.path)
            .await
            .with_context(|| format!("saving fleet file {}", self.path.display()))
    }
}
