//! apiservice-availability: keeps the `Available` condition of aggregated
//! APIServices in step with the health of their backing services.
//!
//! Local APIServices are always available. Remote ones are checked in order:
//! the Service must exist and expose the referenced port, its Endpoints must
//! have at least one ready address, and the discovery document must answer
//! within the probe deadline.

pub mod config;
pub mod controller;
pub mod error;
pub mod telemetry;

#[cfg(feature = "rest-api")]
pub mod rest_api;

pub use crate::config::ControllerConfig;
pub use crate::error::{Error, Result};
