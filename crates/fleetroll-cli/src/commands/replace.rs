use tracing::info;

use fleetroll_core::config::parse_duration;
use fleetroll_core::{FleetConfig, FleetError, FleetResult};
use fleetroll_rollout::{Orchestrator, ReplaceMode, ReplaceOutcome, ReplaceRequest, RollingConfig};

use super::{Context, Failure, FleetFile, Report, Target, invalid, settle};

#[derive(Debug, Clone, clap::Args)]
pub struct ReplaceArgs {
    #[command(flatten)]
    pub target: Target,
    /// Launch configuration the group should run; switched to first
    #[arg(long, value_name = "REF")]
    pub launch_config: Option<String>,
    /// Replace every member not on the current launch configuration
    #[arg(long, conflicts_with = "instances")]
    pub all: bool,
    /// Replace only this instance (repeatable)
    #[arg(long = "instance", value_name = "ID")]
    pub instances: Vec<String>,
    /// Members terminated per batch [config: replace.batch_size]
    #[arg(long)]
    pub batch_size: Option<u32>,
    /// Treat every member present at start as old, whatever its configuration
    #[arg(long)]
    pub no_lc_check: bool,
    /// Deadline for each wait, e.g. "300s" or "5m" [config: replace.wait_timeout]
    #[arg(long, value_name = "DUR")]
    pub wait_timeout: Option<String>,
    /// Pause between polls [config: replace.poll_interval]
    #[arg(long, value_name = "DUR")]
    pub poll_interval: Option<String>,
}

impl ReplaceArgs {
    /// `None` when neither `--all` nor `--instance` was given.
    pub fn mode(&self) -> Option<ReplaceMode> {
        if self.all {
            Some(ReplaceMode::All)
        } else if !self.instances.is_empty() {
            Some(ReplaceMode::Instances(self.instances.clone()))
        } else {
            None
        }
    }

    /// Flags over config file over defaults.
    pub fn rolling(&self, config: &FleetConfig) -> anyhow::Result<RollingConfig> {
        let wait_timeout = match &self.wait_timeout {
            Some(s) => parse_duration(s)?,
            None => config.wait_timeout()?,
        };
        let poll_interval = match &self.poll_interval {
            Some(s) => parse_duration(s)?,
            None => config.poll_interval()?,
        };
        Ok(RollingConfig {
            batch_size: self.batch_size.unwrap_or_else(|| config.batch_size()),
            lc_check: !self.no_lc_check && config.lc_check(),
            wait_timeout,
            poll_interval,
        })
    }
}

pub async fn run(ctx: &Context, args: &ReplaceArgs) -> Result<Report, Failure> {
    let name = args.target.group.as_str();
    let fleet = FleetFile::open(&args.target.fleet)?;

    let Some(mode) = args.mode() else {
        info!(group = %name, "no members selected, nothing to replace");
        let group = fleet
            .peek(name)
            .await
            .ok_or_else(|| FleetError::NotFound(name.to_string()))?;
        return Ok(Report {
            changed: false,
            group: Some(group),
        });
    };

    let request = ReplaceRequest {
        group: name.to_string(),
        launch_config: args.launch_config.clone(),
        mode,
        rolling: args.rolling(&ctx.config).map_err(invalid)?,
    };

    let orchestrator = Orchestrator::new(fleet.plane()).with_shutdown(ctx.shutdown.clone());
    let result = orchestrator.replace(&request).await;
    let saved = fleet.save().await;
    report(result, saved, orchestrator.changed())
}

/// Fold the session result and the fleet file save into one report.
fn report(
    result: FleetResult<ReplaceOutcome>,
    saved: anyhow::Result<()>,
    changed: bool,
) -> Result<Report, Failure> {
    let outcome = settle(result, saved, changed)?;
    Ok(Report {
        changed: outcome.changed,
        group: Some(outcome.group),
    })
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::time::Duration;

    use fleetroll_sim::FleetState;

    use super::*;
    use crate::commands::testing::*;

    fn args(fleet: &Path) -> ReplaceArgs {
        ReplaceArgs {
            target: Target {
                fleet: fleet.to_path_buf(),
                group: "web".to_string(),
            },
            launch_config: None,
            all: false,
            instances: Vec::new(),
            batch_size: None,
            no_lc_check: false,
            wait_timeout: None,
            poll_interval: None,
        }
    }

    #[test]
    fn flags_override_config_file() {
        let config = FleetConfig::from_toml(
            "[replace]\nbatch_size = 3\nlc_check = true\nwait_timeout = \"1m\"\n",
        )
        .unwrap();
        let from_file = args(Path::new("f.json")).rolling(&config).unwrap();
        assert_eq!(from_file.batch_size, 3);
        assert!(from_file.lc_check);
        assert_eq!(from_file.wait_timeout, Duration::from_secs(60));
        assert_eq!(from_file.poll_interval, Duration::from_secs(10));

        let flagged = ReplaceArgs {
            batch_size: Some(2),
            no_lc_check: true,
            wait_timeout: Some("5s".to_string()),
            ..args(Path::new("f.json"))
        };
        let rolling = flagged.rolling(&config).unwrap();
        assert_eq!(rolling.batch_size, 2);
        assert!(!rolling.lc_check);
        assert_eq!(rolling.wait_timeout, Duration::from_secs(5));
    }

    #[test]
    fn failed_save_keeps_the_session_error_and_changed() {
        let timeout = FleetError::Timeout {
            what: "i-1 to leave the load balancers of web".to_string(),
            waited: Duration::from_secs(1),
            at: "2026-01-01T00:00:00Z".to_string(),
        };
        let failure = report(Err(timeout), Err(anyhow::anyhow!("disk full")), true).unwrap_err();
        assert!(failure.changed);
        assert_eq!(failure.kind(), "timeout");
        assert!(failure.message().contains("disk full"));

        let failure = report(
            Err(FleetError::NotFound("web".to_string())),
            Ok(()),
            false,
        )
        .unwrap_err();
        assert!(!failure.changed);
        assert_eq!(failure.kind(), "not_found");
    }

    #[tokio::test]
    async fn failed_save_after_success_reports_the_change() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fleet.json");
        write_fleet(&path, FleetState::default().with_group(mixed_group())).await;
        let fleet = FleetFile::open(&path).unwrap();
        let outcome = Orchestrator::new(fleet.plane())
            .replace(&ReplaceRequest::all("web").with_rolling(RollingConfig {
                poll_interval: Duration::from_millis(1),
                wait_timeout: Duration::from_secs(2),
                ..Default::default()
            }))
            .await;
        assert!(outcome.is_ok());

        let failure = report(outcome, Err(anyhow::anyhow!("disk full")), true).unwrap_err();
        assert!(failure.changed);
        assert_eq!(failure.kind(), "error");
    }

    #[tokio::test]
    async fn bad_duration_flag_is_an_invalid_request() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fleet.json");
        write_fleet(&path, FleetState::default().with_group(mixed_group())).await;

        let bad = ReplaceArgs {
            all: true,
            poll_interval: Some("often".to_string()),
            ..args(&path)
        };
        let failure = run(&context(), &bad).await.unwrap_err();
        assert_eq!(failure.kind(), "invalid_request");
        assert!(!failure.changed);
    }

    #[tokio::test]
    async fn nothing_selected_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fleet.json");
        write_fleet(&path, FleetState::default().with_group(mixed_group())).await;
        let before = std::fs::read_to_string(&path).unwrap();

        let report = run(&context(), &args(&path)).await.unwrap();
        assert!(!report.changed);
        assert_eq!(report.group.unwrap().members.len(), 3);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), before);
    }

    #[tokio::test]
    async fn replace_all_rewrites_the_fleet_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fleet.json");
        write_fleet(&path, FleetState::default().with_group(mixed_group())).await;

        let report = run(&context(), &ReplaceArgs { all: true, ..args(&path) })
            .await
            .unwrap();
        assert!(report.changed);

        let saved = read_group(&path, "web").unwrap();
        assert_eq!(saved.capacity(), mixed_group().capacity());
        assert!(
            saved
                .members
                .iter()
                .all(|m| m.launch_config.as_deref() == Some("lc-2"))
        );
        assert!(saved.members.iter().all(|m| m.instance_id != "i-1"));
    }

    #[tokio::test]
    async fn explicit_instances_are_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fleet.json");
        write_fleet(&path, FleetState::default().with_group(mixed_group())).await;

        let only_one = ReplaceArgs {
            instances: vec!["i-2".to_string()],
            ..args(&path)
        };
        let report = run(&context(), &only_one).await.unwrap();
        assert!(report.changed);

        let saved = read_group(&path, "web").unwrap();
        let ids = saved.member_ids();
        assert!(ids.contains(&"i-3".to_string()));
        assert!(!ids.contains(&"i-2".to_string()));
    }

    #[tokio::test]
    async fn unknown_group_reports_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fleet.json");
        write_fleet(&path, FleetState::default()).await;

        let failure = run(&context(), &ReplaceArgs { all: true, ..args(&path) })
            .await
            .unwrap_err();
        assert_eq!(failure.kind(), "not_found");
        assert!(!failure.changed);
    }
}
