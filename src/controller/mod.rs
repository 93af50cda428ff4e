//! Controller module for APIService availability
//!
//! This module contains the controller loop, the `Available` condition
//! computation and the seams it runs through: cached lookups, the discovery
//! prober and the status publisher.

mod available;
#[cfg(test)]
mod available_test;
pub mod conditions;
pub mod discovery;
#[cfg(feature = "metrics")]
pub mod metrics;
mod reconciler;
pub mod status;
pub mod store;

pub use available::{address_count, AvailableConditionController, SyncOutcome, Unavailable};
pub use discovery::{DiscoveryProber, HttpDiscoveryProber, ProbeError, ProbeTarget, TrustRoots};
pub use reconciler::{referencing_apiservices, run_controller, ControllerState, CONTROLLER_NAME};
pub use status::{KubeStatusPublisher, StatusPublisher};
pub use store::{DeletedBackend, ObjectLookup, ObjectStores, ObjectTriggers};
