//! fleetroll-sim — an in-memory control plane for dry runs and tests.
//!
//! Models just enough of a group manager and a load-balancing service to
//! exercise rolling replacement end to end:
//!
//! ```text
//! describe_group(name)          one tick:
//!   ├── Pending  → InService    after boot_ticks, then register with balancers
//!   ├── Terminating → gone      after drain_ticks, removed from balancers
//!   └── reconcile               launch / scale in toward desired capacity
//! ```
//!
//! The state serializes to JSON so the CLI can keep a fleet file between
//! runs.

pub mod fleet;
pub mod state;

pub use fleet::SimFleet;
pub use state::{Call, FleetState, Registrations, SimGroup, SimTuning};
