//! End-to-end replacement sessions against the simulated fleet.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;

use fleetroll_core::*;
use fleetroll_rollout::*;
use fleetroll_sim::{Call, FleetState, SimFleet, SimTuning};

// ── Fixtures ──────────────────────────────────────────────────────

fn member(id: &str, config: &str) -> Member {
    Member {
        instance_id: id.to_string(),
        lifecycle_state: LifecycleState::InService,
        health_status: HealthStatus::Healthy,
        launch_config: Some(config.to_string()),
    }
}

fn group(min: u32, max: u32, desired: u32, members: Vec<Member>) -> Group {
    Group {
        name: "web".to_string(),
        min_size: min,
        max_size: max,
        desired_capacity: desired,
        launch_config: "lc-2".to_string(),
        load_balancers: BTreeSet::new(),
        target_groups: BTreeSet::new(),
        health_check_type: HealthCheckType::Instance,
        health_check_grace_period: 300,
        default_cooldown: 300,
        availability_zones: BTreeSet::new(),
        vpc_subnets: BTreeSet::new(),
        termination_policies: vec!["Default".to_string()],
        members,
    }
}

fn behind_balancers(mut g: Group) -> Group {
    g.health_check_type = HealthCheckType::LoadBalancer;
    g.load_balancers = ["lb-a".to_string()].into();
    g.target_groups = ["tg-1".to_string()].into();
    g
}

fn old(ids: &[&str]) -> Vec<Member> {
    ids.iter().map(|id| member(id, "lc-1")).collect()
}

fn new(ids: &[&str]) -> Vec<Member> {
    ids.iter().map(|id| member(id, "lc-2")).collect()
}

fn rolling(batch_size: u32) -> RollingConfig {
    RollingConfig {
        batch_size,
        lc_check: true,
        wait_timeout: Duration::from_secs(2),
        poll_interval: Duration::from_millis(1),
    }
}

struct Harness {
    fleet: Arc<SimFleet>,
    orchestrator: Orchestrator,
    phases: Arc<Mutex<Vec<RolloutPhase>>>,
}

impl Harness {
    fn new(state: FleetState) -> Self {
        let fleet = Arc::new(SimFleet::new(state));
        let plane = ControlPlane::from_shared(fleet.clone());
        Self::on_plane(fleet, plane)
    }

    /// Drive `plane`, which must be backed by `fleet`.
    fn on_plane(fleet: Arc<SimFleet>, plane: ControlPlane) -> Self {
        let phases = Arc::new(Mutex::new(Vec::new()));
        let seen = phases.clone();
        let orchestrator = Orchestrator::new(plane)
            .with_observer(Arc::new(move |_: &str, phase: &RolloutPhase| {
                seen.lock().unwrap().push(phase.clone());
            }));
        Self {
            fleet,
            orchestrator,
            phases,
        }
    }

    fn with_group(g: Group) -> Self {
        Self::new(FleetState::default().with_group(g))
    }

    fn phases(&self) -> Vec<RolloutPhase> {
        self.phases.lock().unwrap().clone()
    }

    async fn terminations(&self) -> Vec<(String, bool)> {
        self.fleet
            .mutations()
            .await
            .into_iter()
            .filter_map(|c| match c {
                Call::TerminateMember {
                    instance_id,
                    decrement,
                } => Some((instance_id, decrement)),
                _ => None,
            })
            .collect()
    }

    /// Every size update submitted, in order.
    async fn capacities(&self) -> Vec<Capacity> {
        self.fleet
            .mutations()
            .await
            .into_iter()
            .filter_map(|c| match c {
                Call::UpdateGroup(u) => Some(Capacity::new(
                    u.min_size?,
                    u.max_size?,
                    u.desired_capacity?,
                )),
                _ => None,
            })
            .collect()
    }

    async fn final_group(&self) -> Group {
        self.fleet.peek("web").await.unwrap()
    }
}

/// Classic balancers that keep reporting an instance in service after it
/// was deregistered. The first `honoured` deregistrations behave normally.
struct StickyBalancer {
    inner: Arc<SimFleet>,
    honoured: usize,
    seen: Mutex<usize>,
    stuck: Mutex<BTreeSet<String>>,
}

impl StickyBalancer {
    fn plane(fleet: &Arc<SimFleet>, honoured: usize) -> ControlPlane {
        let balancer = StickyBalancer {
            inner: fleet.clone(),
            honoured,
            seen: Mutex::new(0),
            stuck: Mutex::new(BTreeSet::new()),
        };
        ControlPlane::new(fleet.clone(), Arc::new(balancer))
    }
}

impl LoadBalancerApi for StickyBalancer {
    fn describe_instance_health<'a>(
        &'a self,
        load_balancer: &'a str,
        instance_ids: Option<&'a [String]>,
    ) -> ApiFuture<'a, Vec<InstanceHealth>> {
        Box::pin(async move {
            let mut states = self
                .inner
                .describe_instance_health(load_balancer, instance_ids)
                .await?;
            let stuck = self.stuck.lock().unwrap().clone();
            states.retain(|s| !stuck.contains(&s.instance_id));
            states.extend(stuck.into_iter().map(|instance_id| InstanceHealth {
                instance_id,
                state: "InService".to_string(),
            }));
            Ok(states)
        })
    }

    fn deregister_instances<'a>(
        &'a self,
        load_balancer: &'a str,
        instance_ids: &'a [String],
    ) -> ApiFuture<'a, ()> {
        Box::pin(async move {
            {
                let mut seen = self.seen.lock().unwrap();
                *seen += 1;
                if *seen > self.honoured {
                    self.stuck.lock().unwrap().extend(instance_ids.iter().cloned());
                }
            }
            self.inner.deregister_instances(load_balancer, instance_ids).await
        })
    }

    fn describe_target_health<'a>(
        &'a self,
        target_group: &'a str,
        target_ids: Option<&'a [String]>,
    ) -> ApiFuture<'a, Vec<TargetHealth>> {
        self.inner.describe_target_health(target_group, target_ids)
    }

    fn deregister_targets<'a>(
        &'a self,
        target_group: &'a str,
        target_ids: &'a [String],
    ) -> ApiFuture<'a, ()> {
        self.inner.deregister_targets(target_group, target_ids)
    }
}

fn terms(list: &[(&str, bool)]) -> Vec<(String, bool)> {
    list.iter().map(|(id, d)| (id.to_string(), *d)).collect()
}

// ── Scenarios ─────────────────────────────────────────────────────

#[tokio::test]
async fn full_group_of_old_members_is_replaced_one_at_a_time() {
    let h = Harness::with_group(group(5, 5, 5, old(&["o-1", "o-2", "o-3", "o-4", "o-5"])));

    let out = h
        .orchestrator
        .replace(&ReplaceRequest::all("web").with_rolling(rolling(1)))
        .await
        .unwrap();

    assert!(out.changed);
    assert_eq!(out.batches, 5);
    assert_eq!(
        h.terminations().await,
        terms(&[
            ("o-1", false),
            ("o-2", false),
            ("o-3", false),
            ("o-4", false),
            ("o-5", true),
        ])
    );

    let sizes = h.capacities().await;
    assert_eq!(sizes.first(), Some(&Capacity::new(6, 6, 6)));
    assert_eq!(sizes.last(), Some(&Capacity::new(5, 5, 5)));
    assert!(sizes.iter().all(|c| c.desired_capacity <= 6 && c.is_consistent()));

    let g = h.final_group().await;
    assert_eq!(g.capacity(), Capacity::new(5, 5, 5));
    assert_eq!(g.members.len(), 5);
    assert!(g.members.iter().all(|m| g.is_current(m)));
}

#[tokio::test]
async fn decrement_waits_for_the_batch_that_satisfies_capacity() {
    let mut members = new(&["n-1", "n-2", "n-3"]);
    members.extend(old(&["o-1", "o-2"]));
    let h = Harness::with_group(group(5, 5, 5, members));

    let out = h
        .orchestrator
        .replace(&ReplaceRequest::all("web").with_rolling(rolling(1)))
        .await
        .unwrap();

    assert_eq!(out.batches, 2);
    assert_eq!(
        h.terminations().await,
        terms(&[("o-1", false), ("o-2", true)])
    );
    assert!(
        h.capacities()
            .await
            .iter()
            .all(|c| c.max_size <= 6 && c.desired_capacity <= 6)
    );
    assert_eq!(h.final_group().await.capacity(), Capacity::new(5, 5, 5));
}

#[tokio::test]
async fn unknown_ids_in_an_explicit_list_are_dropped() {
    let h = Harness::with_group(group(1, 3, 2, new(&["i-a", "i-b"])));
    let request = ReplaceRequest::instances("web", vec!["i-a".to_string(), "i-missing".to_string()])
        .with_rolling(RollingConfig {
            lc_check: false,
            ..rolling(1)
        });

    let out = h.orchestrator.replace(&request).await.unwrap();

    assert!(out.changed);
    assert_eq!(out.terminated, vec!["i-a".to_string()]);
    let terminations = h.terminations().await;
    assert_eq!(terminations.len(), 1);
    assert_eq!(terminations[0].0, "i-a");

    let g = h.final_group().await;
    assert!(g.member("i-a").is_none());
    assert!(g.member("i-b").is_some());
    assert_eq!(g.capacity(), Capacity::new(1, 3, 2));
}

#[tokio::test]
async fn balancer_health_timeout_stops_before_any_termination() {
    let g = behind_balancers(group(2, 4, 2, old(&["o-1", "o-2"])));
    let h = Harness::with_group(g);
    h.fleet.set_faulted("lb-a", true).await;

    let request = ReplaceRequest::all("web").with_rolling(RollingConfig {
        wait_timeout: Duration::from_millis(50),
        ..rolling(1)
    });
    let err = h.orchestrator.replace(&request).await.unwrap_err();

    assert_eq!(err.kind(), "timeout");
    assert!(err.to_string().contains("load balancers of web"));
    assert!(h.terminations().await.is_empty());
    // Scaled up, never restored.
    assert_eq!(h.capacities().await, vec![Capacity::new(3, 5, 3)]);
    assert!(h.orchestrator.changed());
    assert!(!h.phases().contains(&RolloutPhase::Restore));
    assert!(!h.phases().contains(&RolloutPhase::Done));
}

#[tokio::test]
async fn stuck_deregistration_never_terminates() {
    let g = behind_balancers(group(2, 4, 2, old(&["o-1", "o-2"])));
    let fleet = Arc::new(SimFleet::new(FleetState::default().with_group(g)));
    let h = Harness::on_plane(fleet.clone(), StickyBalancer::plane(&fleet, 0));

    let request = ReplaceRequest::all("web").with_rolling(RollingConfig {
        wait_timeout: Duration::from_millis(200),
        ..rolling(1)
    });
    let err = h.orchestrator.replace(&request).await.unwrap_err();

    assert_eq!(err.kind(), "timeout");
    assert!(err.to_string().contains("o-1 to leave the load balancers of web"));
    assert!(h.terminations().await.is_empty());
    assert!(h.orchestrator.changed());
    assert!(!h.phases().contains(&RolloutPhase::Restore));
}

#[tokio::test]
async fn stuck_deregistration_mid_loop_stops_the_next_batch() {
    let g = behind_balancers(group(2, 4, 2, old(&["o-1", "o-2"])));
    let fleet = Arc::new(SimFleet::new(FleetState::default().with_group(g)));
    let h = Harness::on_plane(fleet.clone(), StickyBalancer::plane(&fleet, 1));

    let request = ReplaceRequest::all("web").with_rolling(RollingConfig {
        wait_timeout: Duration::from_millis(200),
        ..rolling(1)
    });
    let err = h.orchestrator.replace(&request).await.unwrap_err();

    assert_eq!(err.kind(), "timeout");
    assert!(err.to_string().contains("o-2 to leave the load balancers of web"));
    assert_eq!(h.terminations().await, terms(&[("o-1", false)]));
    assert!(h.orchestrator.changed());
    assert!(!h.phases().contains(&RolloutPhase::Restore));
    assert!(!h.phases().contains(&RolloutPhase::Done));
}

#[tokio::test]
async fn homogeneous_group_is_left_untouched() {
    let h = Harness::with_group(group(2, 4, 2, new(&["n-1", "n-2"])));

    let out = h
        .orchestrator
        .replace(
            &ReplaceRequest::all("web")
                .with_launch_config("lc-2")
                .with_rolling(rolling(3)),
        )
        .await
        .unwrap();

    assert!(!out.changed);
    assert_eq!(out.batches, 0);
    assert!(h.fleet.mutations().await.is_empty());
    assert_eq!(h.orchestrator.mutations(), 0);
}

#[tokio::test]
async fn batch_size_shrinks_to_what_is_still_needed() {
    let mut members = new(&["n-1", "n-2", "n-3"]);
    members.extend(old(&["o-1"]));
    let h = Harness::with_group(group(4, 6, 4, members));

    let out = h
        .orchestrator
        .replace(&ReplaceRequest::all("web").with_rolling(rolling(3)))
        .await
        .unwrap();

    assert_eq!(out.batches, 1);
    assert_eq!(h.capacities().await.first(), Some(&Capacity::new(5, 7, 5)));
    assert!(h.phases().contains(&RolloutPhase::ScaleUp {
        capacity: Capacity::new(5, 7, 5)
    }));
    assert!(h.phases().contains(&RolloutPhase::SelectBatch {
        current: 1,
        total: 1
    }));
    assert_eq!(h.terminations().await, terms(&[("o-1", true)]));
    assert_eq!(h.final_group().await.capacity(), Capacity::new(4, 6, 4));
}

#[tokio::test]
async fn uneven_batches_never_decrement_below_original_desired() {
    let h = Harness::with_group(group(3, 3, 3, old(&["o-1", "o-2", "o-3"])));

    let out = h
        .orchestrator
        .replace(&ReplaceRequest::all("web").with_rolling(rolling(2)))
        .await
        .unwrap();

    assert_eq!(out.batches, 2);
    assert_eq!(
        h.terminations().await,
        terms(&[("o-1", false), ("o-2", true), ("o-3", true)])
    );

    let g = h.final_group().await;
    assert_eq!(g.capacity(), Capacity::new(3, 3, 3));
    assert_eq!(g.members.len(), 3);
    assert!(g.members.iter().all(|m| g.is_current(m)));
}

#[tokio::test]
async fn enough_new_members_removes_leftovers_without_decrement() {
    let mut members = new(&["n-1", "n-2"]);
    members.extend(old(&["o-1"]));
    // A surplus member only survives while the group is not scaling in.
    let h = Harness::new(
        FleetState::default()
            .with_tuning(SimTuning {
                suspend_scale_in: true,
                ..Default::default()
            })
            .with_group(group(1, 4, 2, members)),
    );

    let out = h
        .orchestrator
        .replace(&ReplaceRequest::all("web").with_rolling(rolling(1)))
        .await
        .unwrap();

    assert!(out.changed);
    assert_eq!(h.terminations().await, terms(&[("o-1", false)]));
    // No scale-up, no restore.
    assert!(h.capacities().await.is_empty());
    assert!(!h.phases().contains(&RolloutPhase::Restore));
}

#[tokio::test]
async fn members_leave_balancers_before_termination() {
    let g = behind_balancers(group(2, 4, 2, old(&["o-1", "o-2"])));
    let state = FleetState::default()
        .with_tuning(SimTuning {
            register_lag_ticks: 2,
            ..Default::default()
        })
        .with_group(g);
    let h = Harness::new(state);

    h.orchestrator
        .replace(&ReplaceRequest::all("web").with_rolling(rolling(1)))
        .await
        .unwrap();

    let calls = h.fleet.mutations().await;
    for id in ["o-1", "o-2"] {
        let terminated_at = calls
            .iter()
            .position(|c| matches!(c, Call::TerminateMember { instance_id, .. } if instance_id == id))
            .unwrap();
        let classic = calls.iter().position(|c| {
            matches!(c, Call::DeregisterInstances { instance_ids, .. } if instance_ids.iter().any(|i| i == id))
        });
        let target = calls.iter().position(|c| {
            matches!(c, Call::DeregisterTargets { target_ids, .. } if target_ids.iter().any(|i| i == id))
        });
        assert!(classic.unwrap() < terminated_at, "{id} left lb-a late");
        assert!(target.unwrap() < terminated_at, "{id} left tg-1 late");
    }

    let g = h.final_group().await;
    assert_eq!(g.capacity(), Capacity::new(2, 4, 2));
    assert!(g.members.iter().all(|m| g.is_current(m)));
}

#[tokio::test]
async fn launch_configuration_switch_comes_first() {
    let mut g = group(2, 2, 2, old(&["o-1", "o-2"]));
    g.launch_config = "lc-1".to_string();
    let h = Harness::with_group(g);

    h.orchestrator
        .replace(
            &ReplaceRequest::all("web")
                .with_launch_config("lc-2")
                .with_rolling(rolling(1)),
        )
        .await
        .unwrap();

    match h.fleet.mutations().await.first() {
        Some(Call::UpdateGroup(update)) => {
            assert_eq!(update.launch_config.as_deref(), Some("lc-2"));
            assert!(update.min_size.is_none());
        }
        other => panic!("expected launch configuration update, got {other:?}"),
    }
    let g = h.final_group().await;
    assert_eq!(g.launch_config, "lc-2");
    assert!(g.members.iter().all(|m| g.is_current(m)));
}

#[tokio::test]
async fn phases_follow_the_state_machine() {
    let h = Harness::with_group(group(1, 2, 1, old(&["o-1"])));

    h.orchestrator
        .replace(&ReplaceRequest::all("web").with_rolling(rolling(1)))
        .await
        .unwrap();

    let phases = h.phases();
    let order: Vec<&str> = phases
        .iter()
        .map(|p| match p {
            RolloutPhase::Init => "init",
            RolloutPhase::ScaleUp { .. } => "scale_up",
            RolloutPhase::AwaitNewHealthy => "await_new",
            RolloutPhase::SelectBatch { .. } => "select",
            RolloutPhase::Deregister { .. } => "deregister",
            RolloutPhase::Terminate { .. } => "terminate",
            RolloutPhase::AwaitTermination => "await_term",
            RolloutPhase::AwaitReplacementHealthy => "await_replacement",
            RolloutPhase::Restore => "restore",
            RolloutPhase::Done => "done",
        })
        .collect();
    assert_eq!(
        order,
        vec![
            "init",
            "scale_up",
            "await_new",
            "select",
            "deregister",
            "terminate",
            "await_term",
            "await_replacement",
            "restore",
            "done",
        ]
    );
}

#[tokio::test]
async fn shutdown_signal_cancels_the_session() {
    let (tx, rx) = watch::channel(false);
    let fleet = Arc::new(SimFleet::new(
        FleetState::default().with_group(group(1, 2, 1, old(&["o-1"]))),
    ));
    let orchestrator =
        Orchestrator::new(ControlPlane::from_shared(fleet.clone())).with_shutdown(rx);
    tx.send(true).unwrap();

    let err = orchestrator
        .replace(&ReplaceRequest::all("web").with_rolling(rolling(1)))
        .await
        .unwrap_err();

    assert!(matches!(err, FleetError::Cancelled { .. }));
    assert!(!orchestrator.changed());
    assert!(fleet.mutations().await.is_empty());
}

#[tokio::test]
async fn zero_batch_size_is_rejected() {
    let h = Harness::with_group(group(1, 2, 1, old(&["o-1"])));
    let err = h
        .orchestrator
        .replace(&ReplaceRequest::all("web").with_rolling(rolling(0)))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "invalid_request");
    assert!(h.fleet.calls().await.is_empty());
}

#[tokio::test]
async fn missing_group_is_not_found() {
    let h = Harness::new(FleetState::default());
    let err = h
        .orchestrator
        .replace(&ReplaceRequest::all("web"))
        .await
        .unwrap_err();
    assert!(matches!(err, FleetError::NotFound(name) if name == "web"));
}
