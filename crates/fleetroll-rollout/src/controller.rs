//! Rolling-replacement orchestrator — drives the replacement state machine.
//!
//! ```text
//! Init ──▶ ScaleUp ──▶ AwaitNewHealthy ──▶ SelectBatch ◀────────────────┐
//!  │                                          │                         │
//!  │ (enough new already)                     ▼                         │
//!  │                              Deregister ─▶ Terminate               │
//!  │                                          │                         │
//!  │                                          ▼                         │
//!  │                 AwaitTermination ─▶ AwaitReplacementHealthy ───────┘
//!  │                                          │ (last batch / enough new)
//!  ▼                                          ▼
//! Done ◀──────────────────────────────────  Restore
//! ```
//!
//! The group is re-read before every decision. Any failed wait or rejected
//! call ends the session where it stands: original capacity is *not*
//! restored, and [`Orchestrator::changed`] reports whether anything was
//! mutated before the failure.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use tokio::sync::watch;
use tracing::{debug, info, warn};

use fleetroll_capacity::CapacityController;
use fleetroll_core::*;
use fleetroll_health::{
    Waiter, deregister, wait_for_lb_health, wait_for_terminated, wait_for_viable,
};

use crate::classify::{ClassifyPolicy, classify, purgeable};
use crate::strategy::{ReplaceMode, ReplaceRequest};

/// Current phase of a replacement session.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum RolloutPhase {
    /// Reading and classifying the group.
    Init,
    /// Raising all three bounds by the batch size.
    ScaleUp { capacity: Capacity },
    /// Waiting for the extra members to become viable and healthy.
    AwaitNewHealthy,
    /// Processing batch N of M.
    SelectBatch { current: u32, total: u32 },
    Deregister { instance_id: InstanceId },
    Terminate { instance_id: InstanceId, decrement: bool },
    AwaitTermination,
    AwaitReplacementHealthy,
    /// Putting the original bounds back.
    Restore,
    Done,
}

/// Receives every phase transition along with the group name.
pub type PhaseObserver = Arc<dyn Fn(&str, &RolloutPhase) + Send + Sync>;

/// Result of a completed replacement.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ReplaceOutcome {
    /// Whether any mutating call succeeded.
    pub changed: bool,
    /// Group as observed at the end.
    pub group: Group,
    pub batches: u32,
    pub terminated: Vec<InstanceId>,
}

/// State fixed at the start of a session.
struct Session<'a> {
    request: &'a ReplaceRequest,
    policy: ClassifyPolicy,
    waiter: Waiter,
    original: Capacity,
    /// Member ids at session start, or the named instances.
    initial: BTreeSet<InstanceId>,
    /// Configuration new members must run to count towards balancer health.
    required_config: Option<String>,
}

impl Session<'_> {
    fn group(&self) -> &str {
        &self.request.group
    }
}

/// What one batch did.
struct BatchResult {
    terminated: Vec<InstanceId>,
    /// The batch brought the new count up to the original desired capacity.
    satisfied: bool,
    /// Viable count to wait for once the batch has terminated.
    viable_target: u32,
}

/// Replaces group members a batch at a time.
pub struct Orchestrator {
    plane: ControlPlane,
    capacity: CapacityController,
    shutdown: Option<watch::Receiver<bool>>,
    observer: Option<PhaseObserver>,
    mutations: AtomicU32,
}

impl Orchestrator {
    pub fn new(plane: ControlPlane) -> Self {
        let capacity = CapacityController::new(&plane);
        Self {
            plane,
            capacity,
            shutdown: None,
            observer: None,
            mutations: AtomicU32::new(0),
        }
    }

    /// Abort in-flight waits once `shutdown` flips to `true`.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn with_observer(mut self, observer: PhaseObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Mutating calls that succeeded during the last [`Orchestrator::replace`].
    pub fn mutations(&self) -> u32 {
        self.mutations.load(Ordering::SeqCst)
    }

    /// Whether the last session changed anything, including one that failed.
    pub fn changed(&self) -> bool {
        self.mutations() > 0
    }

    /// Run a full replacement session.
    pub async fn replace(&self, request: &ReplaceRequest) -> FleetResult<ReplaceOutcome> {
        self.mutations.store(0, Ordering::SeqCst);
        let rolling = &request.rolling;
        if rolling.batch_size == 0 {
            return Err(FleetError::InvalidRequest(
                "batch size must be at least 1".to_string(),
            ));
        }

        let mut waiter = Waiter::new(rolling.wait());
        if let Some(rx) = &self.shutdown {
            waiter = waiter.with_shutdown(rx.clone());
        }
        let name = request.group.as_str();

        // ── Init ──────────────────────────────────────────────────
        self.enter(name, RolloutPhase::Init);
        let mut group = self.plane.read_group(name).await?;

        if let Some(wanted) = &request.launch_config
            && *wanted != group.launch_config
        {
            info!(group = %name, from = %group.launch_config, to = %wanted, "switching launch configuration");
            let update = GroupUpdate {
                launch_config: Some(wanted.clone()),
                ..GroupUpdate::named(name)
            };
            self.capacity.apply_update(&group, &update).await?;
            self.record(1);
        }

        wait_for_viable(&self.plane, &waiter, name, group.min_size).await?;
        group = self.plane.read_group(name).await?;

        let policy = rolling.policy();
        let initial: BTreeSet<InstanceId> = match &request.mode {
            ReplaceMode::All => group.member_ids().into_iter().collect(),
            ReplaceMode::Instances(ids) => ids.iter().cloned().collect(),
        };
        let required_config = request
            .launch_config
            .clone()
            .or_else(|| rolling.lc_check.then(|| group.launch_config.clone()));
        let session = Session {
            request,
            policy,
            waiter,
            original: group.capacity(),
            initial,
            required_config,
        };

        let partition = classify(&group, policy, &session.initial);
        let stale = scoped(&partition.old, &request.mode);
        let needed = i64::from(session.original.desired_capacity) - partition.new.len() as i64;
        info!(
            group = %name,
            new = partition.new.len(),
            old = partition.old.len(),
            stale = stale.len(),
            needed,
            "classified members"
        );

        if stale.is_empty() {
            info!(group = %name, "nothing to replace");
            return self.finish(&session, 0, Vec::new()).await;
        }

        if needed <= 0 {
            info!(group = %name, count = stale.len(), "enough new members already, removing the rest");
            self.enter(name, RolloutPhase::SelectBatch { current: 1, total: 1 });
            self.terminate_all(&session, &stale, false).await?;
            self.enter(name, RolloutPhase::AwaitTermination);
            wait_for_terminated(&self.plane, &session.waiter, name, &stale).await?;
            return self.finish(&session, 1, stale).await;
        }

        let mut batch_size = rolling.batch_size;
        if needed < i64::from(batch_size) {
            debug!(group = %name, from = batch_size, to = needed, "overriding batch size");
            batch_size = needed as u32;
        }

        // ── ScaleUp ───────────────────────────────────────────────
        let bumped = session.original.bumped(batch_size);
        self.enter(name, RolloutPhase::ScaleUp { capacity: bumped });
        let applied = self.capacity.apply(name, bumped).await?;
        self.record(1);

        self.enter(name, RolloutPhase::AwaitNewHealthy);
        let mut minimal = partition.new.len() as u32 + batch_size;
        wait_for_viable(&self.plane, &session.waiter, name, applied.min_size).await?;
        wait_for_lb_health(
            &self.plane,
            &session.waiter,
            name,
            session.required_config.as_deref(),
            minimal,
        )
        .await?;

        // ── Batch loop ────────────────────────────────────────────
        let candidates = match &request.mode {
            ReplaceMode::All => {
                let group = self.plane.read_group(name).await?;
                classify(&group, policy, &session.initial).old
            }
            ReplaceMode::Instances(ids) => ids.clone(),
        };
        let total = candidates.len().div_ceil(batch_size as usize) as u32;
        let mut batches = 0;
        let mut terminated = Vec::new();

        for (idx, chunk) in candidates.chunks(batch_size as usize).enumerate() {
            batches += 1;
            self.enter(
                name,
                RolloutPhase::SelectBatch {
                    current: idx as u32 + 1,
                    total,
                },
            );
            let batch = self
                .terminate_batch(&session, chunk, &candidates, batch_size)
                .await?;
            if !batch.satisfied {
                minimal += batch.terminated.len() as u32;
            }

            self.enter(name, RolloutPhase::AwaitTermination);
            wait_for_terminated(&self.plane, &session.waiter, name, &batch.terminated).await?;

            self.enter(name, RolloutPhase::AwaitReplacementHealthy);
            wait_for_viable(&self.plane, &session.waiter, name, batch.viable_target).await?;
            wait_for_lb_health(
                &self.plane,
                &session.waiter,
                name,
                session.required_config.as_deref(),
                minimal,
            )
            .await?;

            terminated.extend(batch.terminated);
            if batch.satisfied {
                debug!(group = %name, batch = batches, "enough new members, leaving batch loop");
                break;
            }
        }

        // ── Restore ───────────────────────────────────────────────
        self.enter(name, RolloutPhase::Restore);
        self.capacity.apply(name, session.original).await?;
        self.record(1);

        self.finish(&session, batches, terminated).await
    }

    /// Select and terminate one batch from `chunk`.
    async fn terminate_batch(
        &self,
        session: &Session<'_>,
        chunk: &[InstanceId],
        candidates: &[InstanceId],
        batch_size: u32,
    ) -> FleetResult<BatchResult> {
        let name = session.group();
        let group = self.plane.read_group(name).await?;
        let partition = classify(&group, session.policy, &session.initial);
        let needed = i64::from(session.original.desired_capacity) - partition.new.len() as i64;
        let mut targets = purgeable(&group, session.policy, chunk, &session.initial);

        if needed <= 0 {
            if group.min_size != session.original.min_size {
                info!(group = %name, min = session.original.min_size, "restoring original min size");
                let capacity = Capacity {
                    min_size: session.original.min_size,
                    ..group.capacity()
                };
                self.capacity.apply(name, capacity).await?;
                self.record(1);
            }
            let targets = scoped(&partition.old, &ReplaceMode::Instances(candidates.to_vec()));
            self.terminate_all(session, &targets, true).await?;
            return Ok(BatchResult {
                terminated: targets,
                satisfied: true,
                viable_target: session.original.min_size,
            });
        }

        if needed < i64::from(batch_size) && targets.len() as i64 > needed {
            debug!(group = %name, needed, "only terminating as many as still needed");
            targets.truncate(needed as usize);
        }

        self.terminate_all(session, &targets, false).await?;
        Ok(BatchResult {
            terminated: targets,
            satisfied: false,
            viable_target: group.min_size,
        })
    }

    /// Deregister then terminate each instance, in order.
    ///
    /// With `decrement`, desired capacity is shed one per termination while
    /// it stays above the original desired capacity; past that point the
    /// group is left to replace the member.
    async fn terminate_all(
        &self,
        session: &Session<'_>,
        targets: &[InstanceId],
        decrement: bool,
    ) -> FleetResult<()> {
        let name = session.group();
        let mut desired = if decrement {
            self.plane.read_group(name).await?.desired_capacity
        } else {
            0
        };

        for instance_id in targets {
            self.enter(
                name,
                RolloutPhase::Deregister {
                    instance_id: instance_id.clone(),
                },
            );
            let calls = deregister(&self.plane, &session.waiter, name, instance_id).await?;
            self.record(calls as u32);

            let shed = decrement && desired > session.original.desired_capacity;
            if decrement && !shed {
                warn!(group = %name, %instance_id, "desired capacity already at original, not decrementing");
            }
            self.enter(
                name,
                RolloutPhase::Terminate {
                    instance_id: instance_id.clone(),
                    decrement: shed,
                },
            );
            self.plane.groups.terminate_member(instance_id, shed).await?;
            self.record(1);
            if shed {
                desired -= 1;
            }
        }
        Ok(())
    }

    async fn finish(
        &self,
        session: &Session<'_>,
        batches: u32,
        terminated: Vec<InstanceId>,
    ) -> FleetResult<ReplaceOutcome> {
        let group = self.plane.read_group(session.group()).await?;
        self.enter(session.group(), RolloutPhase::Done);
        info!(
            group = %session.group(),
            batches,
            terminated = terminated.len(),
            changed = self.changed(),
            "replacement finished"
        );
        Ok(ReplaceOutcome {
            changed: self.changed(),
            group,
            batches,
            terminated,
        })
    }

    fn enter(&self, group: &str, phase: RolloutPhase) {
        debug!(%group, ?phase, "entering phase");
        if let Some(observer) = &self.observer {
            observer(group, &phase);
        }
    }

    fn record(&self, calls: u32) {
        self.mutations.fetch_add(calls, Ordering::SeqCst);
    }
}

/// Old members restricted to what the request names.
fn scoped(old: &[InstanceId], mode: &ReplaceMode) -> Vec<InstanceId> {
    match mode {
        ReplaceMode::All => old.to_vec(),
        ReplaceMode::Instances(ids) => old.iter().filter(|id| ids.contains(id)).cloned().collect(),
    }
}
