//! fleetroll-health — convergence checks against the group and its balancers.
//!
//! ```text
//! Waiter::until(what, probe)         deadline + interval + shutdown signal
//!   ├── wait_for_viable              group reports ≥ N viable members
//!   ├── wait_for_terminated          named members left the settling window
//!   └── wait_for_lb_health           healthy_count(...) ≥ N
//!                                      └── intersection over every balancer
//!                                          and target group
//! deregister(group, instance)        detach, then wait for in-service == 0
//! ```

pub mod aggregator;
pub mod converge;
pub mod deregister;
pub mod wait;

pub use aggregator::healthy_count;
pub use converge::{wait_for_lb_health, wait_for_terminated, wait_for_viable};
pub use deregister::deregister;
pub use wait::{WaitConfig, Waiter};
