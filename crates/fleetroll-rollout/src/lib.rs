//! fleetroll rolling replacement — classification, batch orchestration,
//! group lifecycle.
//!
//! This crate provides the state machine that swaps out members of a
//! group running a stale configuration, a batch at a time, without
//! dropping below the group's minimum healthy capacity.
//!
//! # Components
//!
//! - **`strategy`** — Replacement request and rolling configuration
//! - **`classify`** — Old/new partition (configuration match or identity)
//! - **`controller`** — Replacement state machine (scale up, batch, restore)
//! - **`lifecycle`** — Ensure and delete flows around the core

pub mod classify;
pub mod controller;
pub mod lifecycle;
pub mod strategy;

pub use classify::{ClassifyPolicy, Partition, classify, purgeable};
pub use controller::{Orchestrator, PhaseObserver, ReplaceOutcome, RolloutPhase};
pub use lifecycle::{EnsureOutcome, GroupSpec, Lifecycle};
pub use strategy::{ReplaceMode, ReplaceRequest, RollingConfig};
