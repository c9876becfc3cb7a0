//! `SimFleet` — the control-plane traits over a shared [`FleetState`].

use std::path::Path;

use tokio::sync::Mutex;
use tracing::debug;

use fleetroll_core::*;

use crate::state::{Call, FleetState};

/// In-memory control plane. Every group describe advances time by one tick.
pub struct SimFleet {
    state: Mutex<FleetState>,
}

impl SimFleet {
    pub fn new(state: FleetState) -> Self {
        Self {
            state: Mutex::new(state),
        }
    }

    /// Load a fleet file written by [`SimFleet::save`].
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let state: FleetState = serde_json::from_str(&content)?;
        Ok(Self::new(state))
    }

    pub async fn save(&self, path: &Path) -> anyhow::Result<()> {
        let state = self.state.lock().await;
        let json = serde_json::to_string_pretty(&*state)?;
        std::fs::write(path, json)?;
        debug!(path = ?path, "fleet state saved");
        Ok(())
    }

    /// Copy of the current state (call log included).
    pub async fn snapshot(&self) -> FleetState {
        self.state.lock().await.clone()
    }

    /// Group record without advancing time.
    pub async fn peek(&self, name: &str) -> Option<Group> {
        self.state.lock().await.group(name).cloned()
    }

    pub async fn calls(&self) -> Vec<Call> {
        self.state.lock().await.calls.clone()
    }

    /// Only the calls that changed remote state.
    pub async fn mutations(&self) -> Vec<Call> {
        self.state
            .lock()
            .await
            .calls
            .iter()
            .filter(|c| c.is_mutation())
            .cloned()
            .collect()
    }

    /// Force a balancer or target group to report everything unhealthy.
    pub async fn set_faulted(&self, resource: &str, faulted: bool) {
        let mut state = self.state.lock().await;
        if let Some(regs) = state.load_balancers.get_mut(resource) {
            regs.faulted = faulted;
        }
        if let Some(regs) = state.target_groups.get_mut(resource) {
            regs.faulted = faulted;
        }
    }

    /// Number of mutating calls that succeeded. Rejected calls stay in
    /// the call log but are not counted here.
    pub async fn applied_mutations(&self) -> u32 {
        self.state.lock().await.applied
    }

    /// Run `f` against the state under the lock, recording `call` first.
    async fn with_state<T>(
        &self,
        call: Call,
        f: impl FnOnce(&mut FleetState) -> ApiResult<T>,
    ) -> ApiResult<T> {
        let mut state = self.state.lock().await;
        let mutation = call.is_mutation();
        state.calls.push(call);
        let result = f(&mut state);
        if mutation && result.is_ok() {
            state.applied += 1;
        }
        result
    }
}

impl GroupApi for SimFleet {
    fn describe_group<'a>(&'a self, name: &'a str) -> ApiFuture<'a, Option<Group>> {
        Box::pin(async move {
            self.with_state(Call::DescribeGroup(name.to_string()), |s| Ok(s.tick(name)))
                .await
        })
    }

    fn create_group<'a>(&'a self, group: &'a Group) -> ApiFuture<'a, ()> {
        Box::pin(async move {
            self.with_state(Call::CreateGroup(group.name.clone()), |s| {
                s.create_group(group)
            })
            .await
        })
    }

    fn update_group<'a>(&'a self, update: &'a GroupUpdate) -> ApiFuture<'a, ()> {
        Box::pin(async move {
            self.with_state(Call::UpdateGroup(update.clone()), |s| s.update_group(update))
                .await
        })
    }

    fn terminate_member<'a>(
        &'a self,
        instance_id: &'a str,
        decrement_desired_capacity: bool,
    ) -> ApiFuture<'a, ()> {
        Box::pin(async move {
            let call = Call::TerminateMember {
                instance_id: instance_id.to_string(),
                decrement: decrement_desired_capacity,
            };
            self.with_state(call, |s| {
                s.terminate_member(instance_id, decrement_desired_capacity)
            })
            .await
        })
    }

    fn delete_group<'a>(&'a self, name: &'a str) -> ApiFuture<'a, ()> {
        Box::pin(async move {
            self.with_state(Call::DeleteGroup(name.to_string()), |s| s.delete_group(name))
                .await
        })
    }
}

impl LoadBalancerApi for SimFleet {
    fn describe_instance_health<'a>(
        &'a self,
        load_balancer: &'a str,
        instance_ids: Option<&'a [String]>,
    ) -> ApiFuture<'a, Vec<InstanceHealth>> {
        Box::pin(async move {
            let call = Call::DescribeInstanceHealth {
                load_balancer: load_balancer.to_string(),
            };
            self.with_state(call, |s| s.instance_health(load_balancer, instance_ids))
                .await
        })
    }

    fn deregister_instances<'a>(
        &'a self,
        load_balancer: &'a str,
        instance_ids: &'a [String],
    ) -> ApiFuture<'a, ()> {
        Box::pin(async move {
            let call = Call::DeregisterInstances {
                load_balancer: load_balancer.to_string(),
                instance_ids: instance_ids.to_vec(),
            };
            self.with_state(call, |s| s.deregister_instances(load_balancer, instance_ids))
                .await
        })
    }

    fn describe_target_health<'a>(
        &'a self,
        target_group: &'a str,
        target_ids: Option<&'a [String]>,
    ) -> ApiFuture<'a, Vec<TargetHealth>> {
        Box::pin(async move {
            let call = Call::DescribeTargetHealth {
                target_group: target_group.to_string(),
            };
            self.with_state(call, |s| s.target_health(target_group, target_ids))
                .await
        })
    }

    fn deregister_targets<'a>(
        &'a self,
        target_group: &'a str,
        target_ids: &'a [String],
    ) -> ApiFuture<'a, ()> {
        Box::pin(async move {
            let call = Call::DeregisterTargets {
                target_group: target_group.to_string(),
                target_ids: target_ids.to_vec(),
            };
            self.with_state(call, |s| s.deregister_targets(target_group, target_ids))
                .await
        })
    }
}
