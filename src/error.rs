//! Error types for the availability controller
//!
//! Everything the reconciler can determine about a backend is turned into an
//! `Available` condition. The variants here cover what is left: status writes,
//! API access, configuration and process setup.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    /// A status write lost an optimistic-concurrency race
    #[error("Conflict updating status: {0}")]
    Conflict(String),

    /// HTTP client error outside of a discovery probe
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Invalid or missing configuration
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Tracing exporter could not be installed
    #[error("Telemetry error: {0}")]
    TelemetryError(String),
}

impl Error {
    /// Whether the surrounding control loop should retry soon
    pub fn is_retriable(&self) -> bool {
        match self {
            Error::Conflict(_) | Error::HttpError(_) => true,
            Error::KubeError(kube::Error::Api(resp)) => {
                resp.code == 409 || resp.code == 429 || resp.code >= 500
            }
            Error::KubeError(_) => true,
            Error::SerializationError(_) | Error::ConfigError(_) | Error::TelemetryError(_) => {
                false
            }
        }
    }

    /// Short label used for the reconcile error counter
    pub fn metric_label(&self) -> &'static str {
        match self {
            Error::KubeError(_) => "kube",
            Error::Conflict(_) => "conflict",
            Error::HttpError(_) => "http",
            Error::SerializationError(_) => "serialization",
            Error::ConfigError(_) => "config",
            Error::TelemetryError(_) => "telemetry",
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
