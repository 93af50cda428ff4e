//! Availability reconciliation for APIService registrations
//!
//! Each pass recomputes the `Available` condition of one APIService from
//! scratch and publishes it only when it differs from what is already
//! recorded. The checks for a remote backend run in order and the first
//! failure decides the condition:
//!
//! 1. the referenced Service exists
//! 2. its Endpoints object exists
//! 3. the Endpoints carry at least one ready address
//! 4. the backend answers a discovery request before the deadline

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use k8s_openapi::api::core::v1::{Endpoints, Service};
use k8s_openapi::kube_aggregator::pkg::apis::apiregistration::v1::{
    APIService, APIServiceCondition, APIServiceSpec, ServiceReference,
};
use tracing::{debug, info, instrument};

use super::conditions::{
    apiservice_condition, available_condition, is_equivalent, set_apiservice_condition,
    CONDITION_TYPE_AVAILABLE, MESSAGE_LOCAL, MESSAGE_PASSED, REASON_ENDPOINTS_NOT_FOUND,
    REASON_FAILED_DISCOVERY_CHECK, REASON_LOCAL, REASON_MISSING_ENDPOINTS, REASON_PASSED,
    REASON_SERVICE_NOT_FOUND,
};
use super::discovery::{
    ensure_service_port, DiscoveryProber, ProbeError, ProbeTarget, DEFAULT_PROBE_TIMEOUT,
};
use super::status::StatusPublisher;
use super::store::ObjectLookup;
use crate::error::Result;

/// A remote backend that failed one of the availability checks
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Unavailable {
    pub reason: &'static str,
    pub message: String,
}

impl Unavailable {
    fn service_not_found(namespace: &str, name: &str) -> Self {
        Self {
            reason: REASON_SERVICE_NOT_FOUND,
            message: format!("service/{name} in \"{namespace}\" is not present"),
        }
    }

    fn endpoints_not_found(namespace: &str, name: &str) -> Self {
        Self {
            reason: REASON_ENDPOINTS_NOT_FOUND,
            message: format!("cannot find endpoints for service/{name} in \"{namespace}\""),
        }
    }

    fn missing_endpoints(namespace: &str, name: &str) -> Self {
        Self {
            reason: REASON_MISSING_ENDPOINTS,
            message: format!("endpoints for service/{name} in \"{namespace}\" have no addresses"),
        }
    }

    fn failed_discovery(url: &str, err: &ProbeError) -> Self {
        Self {
            reason: REASON_FAILED_DISCOVERY_CHECK,
            message: format!("no response from {url}: {err}"),
        }
    }

    fn into_condition(self) -> APIServiceCondition {
        available_condition(false, self.reason, &self.message)
    }
}

/// What a single `sync` pass did
#[derive(Clone, Debug, PartialEq)]
pub enum SyncOutcome {
    /// The APIService is gone; nothing was written
    Missing,
    /// The recorded condition already matched; nothing was written
    Unchanged(APIServiceCondition),
    /// A new condition was published
    Updated(APIServiceCondition),
}

/// Total ready addresses across all subsets
pub fn address_count(endpoints: &Endpoints) -> usize {
    endpoints
        .subsets
        .iter()
        .flatten()
        .map(|subset| subset.addresses.as_ref().map_or(0, Vec::len))
        .sum()
}

/// Computes and publishes the `Available` condition of APIServices
pub struct AvailableConditionController {
    apiservices: Arc<dyn ObjectLookup<APIService>>,
    services: Arc<dyn ObjectLookup<Service>>,
    endpoints: Arc<dyn ObjectLookup<Endpoints>>,
    prober: Arc<dyn DiscoveryProber>,
    publisher: Arc<dyn StatusPublisher>,
    probe_timeout: Duration,
}

impl AvailableConditionController {
    pub fn new(
        apiservices: Arc<dyn ObjectLookup<APIService>>,
        services: Arc<dyn ObjectLookup<Service>>,
        endpoints: Arc<dyn ObjectLookup<Endpoints>>,
        prober: Arc<dyn DiscoveryProber>,
        publisher: Arc<dyn StatusPublisher>,
    ) -> Self {
        Self {
            apiservices,
            services,
            endpoints,
            prober,
            publisher,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    /// Override the discovery probe deadline
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Reconcile the `Available` condition of the named APIService.
    ///
    /// Publishes at most once. The only error is a failed status write.
    #[instrument(skip(self))]
    pub async fn sync(&self, name: &str) -> Result<SyncOutcome> {
        let Some(original) = self.apiservices.lookup(None, name) else {
            debug!("APIService {} no longer exists, skipping", name);
            return Ok(SyncOutcome::Missing);
        };

        let desired = self.compute_condition(&original).await;

        if let Some(existing) = apiservice_condition(&original, CONDITION_TYPE_AVAILABLE) {
            if is_equivalent(existing, &desired) {
                debug!(
                    "APIService {} condition unchanged ({})",
                    name, desired.status
                );
                return Ok(SyncOutcome::Unchanged(existing.clone()));
            }
        }

        let mut updated = (*original).clone();
        set_apiservice_condition(&mut updated, desired, Utc::now());
        self.publisher.update_status(&updated).await?;

        let published = apiservice_condition(&updated, CONDITION_TYPE_AVAILABLE)
            .cloned()
            .unwrap_or_default();
        info!(
            "APIService {} Available={} ({})",
            name,
            published.status,
            published.reason.as_deref().unwrap_or_default()
        );
        Ok(SyncOutcome::Updated(published))
    }

    /// Compute the `Available` condition for an APIService without writing it
    pub async fn compute_condition(&self, apiservice: &APIService) -> APIServiceCondition {
        let spec = apiservice.spec.as_ref();
        let Some(reference) = spec.and_then(|s| s.service.as_ref()) else {
            return available_condition(true, REASON_LOCAL, MESSAGE_LOCAL);
        };

        let default_spec = APIServiceSpec::default();
        match self
            .check_remote(spec.unwrap_or(&default_spec), reference)
            .await
        {
            Ok(()) => available_condition(true, REASON_PASSED, MESSAGE_PASSED),
            Err(unavailable) => unavailable.into_condition(),
        }
    }

    async fn check_remote(
        &self,
        spec: &APIServiceSpec,
        reference: &ServiceReference,
    ) -> std::result::Result<(), Unavailable> {
        let namespace = reference.namespace.as_deref().unwrap_or_default();
        let name = reference.name.as_deref().unwrap_or_default();

        let service = self
            .services
            .lookup(Some(namespace), name)
            .ok_or_else(|| Unavailable::service_not_found(namespace, name))?;

        let endpoints = self
            .endpoints
            .lookup(Some(namespace), name)
            .ok_or_else(|| Unavailable::endpoints_not_found(namespace, name))?;

        if address_count(&endpoints) == 0 {
            return Err(Unavailable::missing_endpoints(namespace, name));
        }

        let target = ProbeTarget::resolve(spec, reference, &service);
        ensure_service_port(reference, &service)
            .map_err(|e| Unavailable::failed_discovery(&target.url, &e))?;

        self.prober
            .probe(&target, self.probe_timeout)
            .await
            .map_err(|e| Unavailable::failed_discovery(&target.url, &e))
    }
}
