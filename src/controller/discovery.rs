//! Discovery probe for remote APIService backends
//!
//! A remote APIService is only considered available once its backing service
//! answers an HTTPS request for `/apis`. The probe is bounded by a deadline so
//! a reconcile pass never hangs on an unresponsive backend.

use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::kube_aggregator::pkg::apis::apiregistration::v1::{
    APIServiceSpec, ServiceReference,
};
use reqwest::{Certificate, Client, StatusCode};
use thiserror::Error;
use tracing::debug;

/// Path requested on the backend
pub const DISCOVERY_PATH: &str = "/apis";

/// Port used when the service reference does not name one
pub const DEFAULT_SERVICE_PORT: i32 = 443;

/// Default probe deadline
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Why a discovery probe failed
#[derive(Error, Debug)]
pub enum ProbeError {
    /// No response arrived before the deadline
    #[error("deadline of {0:?} exceeded")]
    Timeout(Duration),

    /// Connection, TLS or protocol failure, rendered with its full cause chain
    #[error("{}", error_chain(.0))]
    Transport(#[from] reqwest::Error),

    /// The backend answered with a non-2xx status
    #[error("bad status {0}")]
    BadStatus(StatusCode),

    /// `spec.caBundle` is not a usable PEM certificate
    #[error("invalid CA bundle: {0}")]
    InvalidCaBundle(reqwest::Error),

    /// HTTP client could not be constructed
    #[error("failed to build HTTP client: {0}")]
    Client(reqwest::Error),

    /// The referenced port is not exposed by the service
    #[error("service/{name} in \"{namespace}\" has no port {port}")]
    MissingPort {
        namespace: String,
        name: String,
        port: i32,
    },
}

/// `reqwest` keeps the OS or TLS cause several `source()` levels down
fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        text.push_str(": ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    text
}

/// Which certificates a probe accepts from the backend
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TrustRoots<'a> {
    /// `insecureSkipTLSVerify`: no verification at all
    SkipVerify,
    /// `caBundle`: only the bundle, built-in roots disabled
    Pinned(&'a [u8]),
    /// Neither set: the platform roots
    BuiltIn,
}

/// Everything needed to probe one backend
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProbeTarget {
    pub url: String,
    pub ca_bundle: Option<Vec<u8>>,
    pub insecure_skip_tls_verify: bool,
}

impl ProbeTarget {
    /// Resolve the probe URL and TLS settings for a remote APIService.
    ///
    /// Host resolution:
    /// - `ExternalName` services use their external name
    /// - services with a cluster IP use that IP
    /// - headless services fall back to `<name>.<namespace>.svc`
    pub fn resolve(spec: &APIServiceSpec, reference: &ServiceReference, service: &Service) -> Self {
        let namespace = reference.namespace.as_deref().unwrap_or_default();
        let name = reference.name.as_deref().unwrap_or_default();
        let port = reference.port.unwrap_or(DEFAULT_SERVICE_PORT);
        let host = service_host(service, namespace, name);

        Self {
            url: format!("https://{host}:{port}{DISCOVERY_PATH}"),
            ca_bundle: spec
                .ca_bundle
                .as_ref()
                .map(|b| b.0.clone())
                .filter(|b| !b.is_empty()),
            insecure_skip_tls_verify: spec.insecure_skip_tls_verify.unwrap_or(false),
        }
    }

    pub fn trust_roots(&self) -> TrustRoots<'_> {
        match (&self.ca_bundle, self.insecure_skip_tls_verify) {
            (_, true) => TrustRoots::SkipVerify,
            (Some(pem), false) => TrustRoots::Pinned(pem),
            (None, false) => TrustRoots::BuiltIn,
        }
    }
}

fn service_host(service: &Service, namespace: &str, name: &str) -> String {
    let spec = service.spec.as_ref();

    if spec.and_then(|s| s.type_.as_deref()) == Some("ExternalName") {
        if let Some(external) = spec.and_then(|s| s.external_name.as_deref()) {
            return external.to_string();
        }
    }

    match spec.and_then(|s| s.cluster_ip.as_deref()) {
        Some(ip) if !ip.is_empty() && ip != "None" => {
            if ip.contains(':') {
                format!("[{ip}]")
            } else {
                ip.to_string()
            }
        }
        _ => format!("{name}.{namespace}.svc"),
    }
}

/// Verify the service exposes the referenced port.
///
/// Services that declare no ports, and `ExternalName` services, are accepted
/// as-is since the port cannot be checked against them.
pub fn ensure_service_port(reference: &ServiceReference, service: &Service) -> Result<(), ProbeError> {
    let Some(spec) = service.spec.as_ref() else {
        return Ok(());
    };
    if spec.type_.as_deref() == Some("ExternalName") {
        return Ok(());
    }

    let port = reference.port.unwrap_or(DEFAULT_SERVICE_PORT);
    match spec.ports.as_deref() {
        Some(ports) if !ports.is_empty() && !ports.iter().any(|p| p.port == port) => {
            Err(ProbeError::MissingPort {
                namespace: reference.namespace.clone().unwrap_or_default(),
                name: reference.name.clone().unwrap_or_default(),
                port,
            })
        }
        _ => Ok(()),
    }
}

/// Reachability check against a resolved backend
#[async_trait]
pub trait DiscoveryProber: Send + Sync {
    async fn probe(&self, target: &ProbeTarget, deadline: Duration) -> Result<(), ProbeError>;
}

/// Probes backends over HTTPS with `reqwest`
#[derive(Clone, Debug)]
pub struct HttpDiscoveryProber {
    user_agent: String,
}

impl Default for HttpDiscoveryProber {
    fn default() -> Self {
        Self {
            user_agent: format!("apiservice-availability/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl HttpDiscoveryProber {
    pub fn new() -> Self {
        Self::default()
    }

    fn client_for(&self, target: &ProbeTarget) -> Result<Client, ProbeError> {
        let builder = Client::builder().user_agent(self.user_agent.as_str());

        let builder = match target.trust_roots() {
            TrustRoots::SkipVerify => builder.danger_accept_invalid_certs(true),
            TrustRoots::Pinned(pem) => {
                let cert = Certificate::from_pem(pem).map_err(ProbeError::InvalidCaBundle)?;
                builder
                    .tls_built_in_root_certs(false)
                    .add_root_certificate(cert)
            }
            TrustRoots::BuiltIn => builder,
        };

        builder.build().map_err(ProbeError::Client)
    }
}

#[async_trait]
impl DiscoveryProber for HttpDiscoveryProber {
    async fn probe(&self, target: &ProbeTarget, deadline: Duration) -> Result<(), ProbeError> {
        let client = self.client_for(target)?;

        debug!("Probing discovery endpoint {}", target.url);

        let response = tokio::time::timeout(deadline, client.get(&target.url).send())
            .await
            .map_err(|_| ProbeError::Timeout(deadline))??;

        let status = response.status();
        if status.is_success() {
            debug!("Discovery endpoint {} answered {}", target.url, status);
            Ok(())
        } else {
            Err(ProbeError::BadStatus(status))
        }
    }
}
