//! fleetroll-capacity — group size changes with bounds enforcement.
//!
//! Every `(min, max, desired)` update issued during a replacement goes
//! through [`CapacityController`], which clamps desired capacity into the
//! effective bounds and submits only attributes from the updatable set
//! (see [`fleetroll_core::GroupUpdate`]).

pub mod controller;

pub use controller::{CapacityController, checked};
