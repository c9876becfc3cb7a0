//! Old/new classification of group members.
//!
//! Recomputed from a fresh snapshot at every decision point; membership
//! changes underneath the replacement loop all the time.

use std::collections::BTreeSet;

use fleetroll_core::{Group, InstanceId};

/// How a member is judged "new".
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ClassifyPolicy {
    /// New iff launched from the group's current configuration.
    ConfigurationMatch,
    /// New iff absent from the session's initial snapshot. Lets callers
    /// force replacement of members already on the current configuration.
    Identity,
}

impl ClassifyPolicy {
    pub fn from_lc_check(lc_check: bool) -> Self {
        if lc_check {
            Self::ConfigurationMatch
        } else {
            Self::Identity
        }
    }
}

/// Disjoint split of a group's members, in discovery order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Partition {
    pub new: Vec<InstanceId>,
    pub old: Vec<InstanceId>,
}

/// Split every member of `group` into new and old.
pub fn classify(group: &Group, policy: ClassifyPolicy, initial: &BTreeSet<InstanceId>) -> Partition {
    let mut partition = Partition::default();
    for member in &group.members {
        let is_new = match policy {
            ClassifyPolicy::ConfigurationMatch => group.is_current(member),
            ClassifyPolicy::Identity => !initial.contains(&member.instance_id),
        };
        let id = member.instance_id.clone();
        if is_new {
            partition.new.push(id);
        } else {
            partition.old.push(id);
        }
    }
    partition
}

/// The subset of `requested` that may be terminated right now: still a
/// member of the group, and still old under `policy`. Keeps request order.
pub fn purgeable(
    group: &Group,
    policy: ClassifyPolicy,
    requested: &[InstanceId],
    initial: &BTreeSet<InstanceId>,
) -> Vec<InstanceId> {
    requested
        .iter()
        .filter(|id| {
            group.member(id).is_some_and(|m| match policy {
                ClassifyPolicy::ConfigurationMatch => !group.is_current(m),
                ClassifyPolicy::Identity => initial.contains(&m.instance_id),
            })
        })
        .cloned()
        .collect()
}
