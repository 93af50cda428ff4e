//! Runtime configuration for the availability controller

use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Settings collected from command-line flags and environment variables
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerConfig {
    /// Deadline for a single discovery probe, in seconds
    pub probe_timeout_secs: u64,
    /// Interval between passes for an unchanged APIService, in seconds
    pub resync_interval_secs: u64,
    /// Address the HTTP server binds to
    pub http_addr: SocketAddr,
    /// Namespace holding the leader-election Lease
    pub lease_namespace: String,
    /// Whether to contend for leadership before reconciling
    pub leader_election: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            probe_timeout_secs: 5,
            resync_interval_secs: 30,
            http_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            lease_namespace: "default".to_string(),
            leader_election: true,
        }
    }
}

impl ControllerConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval_secs)
    }

    /// Reject settings the controller cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.probe_timeout_secs == 0 {
            return Err(Error::ConfigError(
                "probe timeout must be at least 1 second".to_string(),
            ));
        }
        if self.resync_interval_secs == 0 {
            return Err(Error::ConfigError(
                "resync interval must be at least 1 second".to_string(),
            ));
        }
        if self.lease_namespace.is_empty() {
            return Err(Error::ConfigError(
                "lease namespace must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
