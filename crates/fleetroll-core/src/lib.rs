//! fleetroll-core — shared types for rolling group replacement.
//!
//! Holds the group/member data model, the control-plane traits every
//! other crate talks through, the error taxonomy, and the
//! `fleetroll.toml` parser.

pub mod api;
pub mod config;
pub mod error;
pub mod types;

pub use api::{ApiFuture, ControlPlane, GroupApi, GroupUpdate, LoadBalancerApi};
pub use config::FleetConfig;
pub use error::{ApiError, ApiResult, FleetError, FleetResult};
pub use types::*;
