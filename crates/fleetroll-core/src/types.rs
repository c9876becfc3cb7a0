//! Domain types for compute groups and their members.
//!
//! These mirror what the group control plane reports on every describe
//! call. Nothing here is cached: callers re-read a fresh [`Group`] before
//! each decision.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Name of a compute group.
pub type GroupName = String;

/// Identifier of a compute instance.
pub type InstanceId = String;

// ── Group ─────────────────────────────────────────────────────────

/// Snapshot of a managed compute group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Group {
    pub name: GroupName,
    pub min_size: u32,
    pub max_size: u32,
    pub desired_capacity: u32,
    /// Configuration new members are launched from.
    pub launch_config: String,
    /// Attached classic load balancers.
    #[serde(default)]
    pub load_balancers: BTreeSet<String>,
    /// Attached target groups.
    #[serde(default)]
    pub target_groups: BTreeSet<String>,
    #[serde(default)]
    pub health_check_type: HealthCheckType,
    #[serde(default = "default_grace_period")]
    pub health_check_grace_period: u32,
    #[serde(default = "default_cooldown")]
    pub default_cooldown: u32,
    #[serde(default)]
    pub availability_zones: BTreeSet<String>,
    #[serde(default)]
    pub vpc_subnets: BTreeSet<String>,
    /// Ordered: the first matching policy wins on scale-in.
    #[serde(default = "default_termination_policies")]
    pub termination_policies: Vec<String>,
    /// Members in discovery order.
    #[serde(default)]
    pub members: Vec<Member>,
}

fn default_grace_period() -> u32 {
    300
}

fn default_cooldown() -> u32 {
    300
}

fn default_termination_policies() -> Vec<String> {
    vec!["Default".to_string()]
}

impl Group {
    /// Current `(min, max, desired)` bounds.
    pub fn capacity(&self) -> Capacity {
        Capacity {
            min_size: self.min_size,
            max_size: self.max_size,
            desired_capacity: self.desired_capacity,
        }
    }

    /// Whether health is judged by attached load balancers.
    ///
    /// True only when the health-check mode is load-balancer based *and*
    /// at least one balancer or target group is attached.
    pub fn uses_load_balancer_health(&self) -> bool {
        self.health_check_type == HealthCheckType::LoadBalancer
            && (!self.load_balancers.is_empty() || !self.target_groups.is_empty())
    }

    /// Look up a member by instance id.
    pub fn member(&self, instance_id: &str) -> Option<&Member> {
        self.members.iter().find(|m| m.instance_id == instance_id)
    }

    /// Instance ids of all members, in discovery order.
    pub fn member_ids(&self) -> Vec<InstanceId> {
        self.members.iter().map(|m| m.instance_id.clone()).collect()
    }

    /// Number of members that are in service and healthy.
    pub fn viable_count(&self) -> u32 {
        self.members.iter().filter(|m| m.is_viable()).count() as u32
    }

    /// Whether a member runs the group's current configuration.
    pub fn is_current(&self, member: &Member) -> bool {
        member.launch_config.as_deref() == Some(self.launch_config.as_str())
    }
}

/// Size bounds of a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capacity {
    pub min_size: u32,
    pub max_size: u32,
    pub desired_capacity: u32,
}

impl Capacity {
    pub fn new(min_size: u32, max_size: u32, desired_capacity: u32) -> Self {
        Self {
            min_size,
            max_size,
            desired_capacity,
        }
    }

    /// Desired capacity pulled into `[min, max]`.
    ///
    /// When `min > max` the range is empty; desired is left at `max` and
    /// [`Capacity::is_consistent`] reports false.
    pub fn clamped(self) -> Self {
        let mut desired = self.desired_capacity;
        if desired < self.min_size {
            desired = self.min_size;
        }
        if desired > self.max_size {
            desired = self.max_size;
        }
        Self {
            desired_capacity: desired,
            ..self
        }
    }

    /// All three bounds raised by `n`.
    pub fn bumped(self, n: u32) -> Self {
        Self {
            min_size: self.min_size + n,
            max_size: self.max_size + n,
            desired_capacity: self.desired_capacity + n,
        }
    }

    /// `min ≤ desired ≤ max`.
    pub fn is_consistent(&self) -> bool {
        self.min_size <= self.desired_capacity && self.desired_capacity <= self.max_size
    }
}

impl fmt::Display for Capacity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "min={} max={} desired={}",
            self.min_size, self.max_size, self.desired_capacity
        )
    }
}

/// Where the group takes member health from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthCheckType {
    /// The instance's own lifecycle/status checks.
    #[default]
    Instance,
    /// Attached load balancers and target groups.
    LoadBalancer,
}

impl std::str::FromStr for HealthCheckType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "instance" | "ec2" => Ok(Self::Instance),
            "load_balancer" | "load-balancer" | "elb" => Ok(Self::LoadBalancer),
            other => Err(format!("unknown health check type: {other}")),
        }
    }
}

// ── Member ────────────────────────────────────────────────────────

/// One instance belonging to a group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Member {
    pub instance_id: InstanceId,
    pub lifecycle_state: LifecycleState,
    pub health_status: HealthStatus,
    /// Absent when the instance was not launched from a named configuration.
    #[serde(default)]
    pub launch_config: Option<String>,
}

impl Member {
    /// In service and healthy.
    pub fn is_viable(&self) -> bool {
        self.lifecycle_state == LifecycleState::InService
            && self.health_status == HealthStatus::Healthy
    }

    /// Still terminating or reported unhealthy.
    pub fn is_settling(&self) -> bool {
        self.lifecycle_state == LifecycleState::Terminating
            || self.health_status == HealthStatus::Unhealthy
    }
}

/// Lifecycle state of a member.
///
/// States the orchestrator does not reason about are carried through
/// verbatim in [`LifecycleState::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum LifecycleState {
    Pending,
    InService,
    Terminating,
    Terminated,
    Other(String),
}

impl LifecycleState {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Pending => "Pending",
            Self::InService => "InService",
            Self::Terminating => "Terminating",
            Self::Terminated => "Terminated",
            Self::Other(s) => s,
        }
    }
}

impl From<String> for LifecycleState {
    fn from(s: String) -> Self {
        match s.as_str() {
            "Pending" => Self::Pending,
            "InService" => Self::InService,
            "Terminating" => Self::Terminating,
            "Terminated" => Self::Terminated,
            _ => Self::Other(s),
        }
    }
}

impl From<LifecycleState> for String {
    fn from(state: LifecycleState) -> Self {
        state.as_str().to_string()
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Health as reported by the group itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

// ── Load balancer health ──────────────────────────────────────────

/// Per-instance state reported by a classic load balancer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceHealth {
    pub instance_id: InstanceId,
    /// `InService`, `OutOfService`, or `Unknown`.
    pub state: String,
}

impl InstanceHealth {
    pub fn in_service(&self) -> bool {
        self.state == "InService"
    }
}

/// Per-target state reported by a target group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetHealth {
    pub target_id: InstanceId,
    /// `initial`, `healthy`, `unhealthy`, `unused`, `draining`, ...
    pub state: String,
}

impl TargetHealth {
    pub fn healthy(&self) -> bool {
        self.state == "healthy"
    }
}
