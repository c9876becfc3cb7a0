use std::collections::BTreeSet;

use fleetroll_core::HealthCheckType;
use fleetroll_rollout::{GroupSpec, Lifecycle};

use super::{Context, Failure, FleetFile, Report, Target, settle};

#[derive(Debug, Clone, clap::Args)]
pub struct EnsureArgs {
    #[command(flatten)]
    pub target: Target,
    #[arg(long, value_name = "REF")]
    pub launch_config: String,
    #[arg(long, value_name = "N")]
    pub min: u32,
    #[arg(long, value_name = "N")]
    pub max: u32,
    /// Defaults to --min for a new group, unchanged otherwise
    #[arg(long, value_name = "N")]
    pub desired: Option<u32>,
    /// Attach this classic load balancer (repeatable)
    #[arg(long = "load-balancer", value_name = "NAME")]
    pub load_balancers: Vec<String>,
    /// Attach this target group (repeatable)
    #[arg(long = "target-group", value_name = "ARN")]
    pub target_groups: Vec<String>,
    /// instance or load_balancer
    #[arg(long)]
    pub health_check_type: Option<HealthCheckType>,
    /// Return without waiting for members to come up
    #[arg(long)]
    pub no_wait: bool,
}

impl EnsureArgs {
    /// Attachment lists left empty keep whatever the group has.
    pub fn spec(&self) -> GroupSpec {
        fn listed(names: &[String]) -> Option<BTreeSet<String>> {
            (!names.is_empty()).then(|| names.iter().cloned().collect())
        }

        GroupSpec {
            name: self.target.group.clone(),
            launch_config: self.launch_config.clone(),
            min_size: self.min,
            max_size: self.max,
            desired_capacity: self.desired,
            load_balancers: listed(&self.load_balancers),
            target_groups: listed(&self.target_groups),
            health_check_type: self.health_check_type,
            wait_for_instances: !self.no_wait,
            ..Default::default()
        }
    }
}

pub async fn ensure(ctx: &Context, args: &EnsureArgs) -> Result<Report, Failure> {
    let fleet = FleetFile::open_or_create(&args.target.fleet)?;
    let lifecycle = Lifecycle::new(fleet.plane(), ctx.waiter()?);
    let result = lifecycle.ensure(&args.spec()).await;
    let saved = fleet.save().await;
    let outcome = settle(result, saved, fleet.mutated().await)?;
    Ok(Report {
        changed: outcome.changed,
        group: Some(outcome.group),
    })
}

pub async fn delete(ctx: &Context, target: &Target) -> Result<Report, Failure> {
    let fleet = FleetFile::open(&target.fleet)?;
    let lifecycle = Lifecycle::new(fleet.plane(), ctx.waiter()?);
    let result = lifecycle.delete(&target.group).await;
    let saved = fleet.save().await;
    let changed = settle(result, saved, fleet.mutated().await)?;
    Ok(Report {
        changed,
        group: None,
    })
}

/// Describe a group. Like any describe, this advances the simulation one
/// tick, and the advanced state is saved.
pub async fn show(target: &Target) -> Result<Report, Failure> {
    let fleet = FleetFile::open(&target.fleet)?;
    let group = fleet.plane().read_group(&target.group).await?;
    fleet.save().await?;
    Ok(Report {
        changed: false,
        group: Some(group),
    })
}
