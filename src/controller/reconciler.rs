//! Controller loop for APIService availability
//!
//! Implements the controller pattern using kube-rs runtime. The controller is
//! fed by the shared reflectors in `store`: APIServices trigger themselves,
//! and changes to Services and Endpoints requeue every APIService that points
//! at them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::{stream, StreamExt};
use k8s_openapi::api::core::v1::{Endpoints, Service};
use k8s_openapi::kube_aggregator::pkg::apis::apiregistration::v1::APIService;
use kube::{
    api::Api,
    client::Client,
    runtime::{
        controller::{Action, Controller},
        reflector::{ObjectRef, Store},
    },
    ResourceExt,
};
use tracing::{debug, error, info, instrument};

use super::available::{AvailableConditionController, SyncOutcome};
use super::discovery::HttpDiscoveryProber;
use super::status::KubeStatusPublisher;
use super::store::{DeletedBackend, ObjectLookup, ObjectStores, ObjectTriggers};
use crate::config::ControllerConfig;
use crate::error::{Error, Result};

/// Controller name used in logs and metric labels
pub const CONTROLLER_NAME: &str = "available";

/// Shared state for the controller
pub struct ControllerState {
    pub client: Client,
    pub stores: ObjectStores,
    pub available: AvailableConditionController,
    pub config: ControllerConfig,
    pub is_leader: Arc<AtomicBool>,
}

impl ControllerState {
    /// Wire the reconciler to the reflector stores and the API server
    pub fn new(
        client: Client,
        stores: ObjectStores,
        config: ControllerConfig,
        is_leader: Arc<AtomicBool>,
    ) -> Self {
        let available = AvailableConditionController::new(
            Arc::new(stores.apiservices.clone()),
            Arc::new(stores.services.clone()),
            Arc::new(stores.endpoints.clone()),
            Arc::new(HttpDiscoveryProber::new()),
            Arc::new(KubeStatusPublisher::new(client.clone())),
        )
        .with_probe_timeout(config.probe_timeout());

        Self {
            client,
            stores,
            available,
            config,
            is_leader,
        }
    }
}

/// APIServices whose backing service is `namespace/name`
pub fn referencing_apiservices(
    apiservices: &[Arc<APIService>],
    namespace: Option<&str>,
    name: &str,
) -> Vec<ObjectRef<APIService>> {
    apiservices
        .iter()
        .filter(|a| {
            a.spec
                .as_ref()
                .and_then(|s| s.service.as_ref())
                .is_some_and(|r| r.namespace.as_deref() == namespace && r.name.as_deref() == Some(name))
        })
        .map(|a| ObjectRef::from_obj(a.as_ref()))
        .collect()
}

fn requeue_referencing(
    store: &Store<APIService>,
    namespace: Option<String>,
    name: String,
) -> Vec<ObjectRef<APIService>> {
    let refs = referencing_apiservices(&store.list(), namespace.as_deref(), &name);
    if !refs.is_empty() {
        debug!(
            "{}/{} changed, requeueing {} APIService(s)",
            namespace.as_deref().unwrap_or_default(),
            name,
            refs.len()
        );
    }
    refs
}

/// Main entry point to start the controller
pub async fn run_controller(state: Arc<ControllerState>, triggers: ObjectTriggers) -> Result<()> {
    let apiservices: Api<APIService> = Api::all(state.client.clone());

    info!("Starting APIService availability controller");

    // Verify the aggregation API is served
    match apiservices.list(&Default::default()).await {
        Ok(list) => info!("Found {} APIServices", list.items.len()),
        Err(e) => {
            error!("Cannot list APIServices: {:?}", e);
            return Err(Error::ConfigError(
                "apiregistration.k8s.io/v1 APIService is not available".to_string(),
            ));
        }
    }

    // Reconciles wait for the caches; the triggers must be consumed meanwhile
    // or the reflectors stall on a full subscriber buffer.
    let stores = state.stores.clone();
    tokio::spawn(async move { stores.log_when_synced().await });

    let by_service = state.stores.apiservices.clone();
    let by_endpoints = state.stores.apiservices.clone();
    let by_deleted = state.stores.apiservices.clone();
    let deleted = triggers
        .deleted_backends
        .flat_map(move |DeletedBackend { namespace, name }| {
            stream::iter(requeue_referencing(&by_deleted, namespace, name))
        });

    Controller::for_shared_stream(triggers.apiservices, state.stores.apiservices.clone())
        .watches_shared_stream(triggers.services, move |svc: Arc<Service>| {
            requeue_referencing(&by_service, svc.namespace(), svc.name_any())
        })
        .watches_shared_stream(triggers.endpoints, move |ep: Arc<Endpoints>| {
            requeue_referencing(&by_endpoints, ep.namespace(), ep.name_any())
        })
        .reconcile_on(deleted)
        .shutdown_on_signal()
        .run(reconcile, error_policy, state)
        .for_each(|res| async move {
            match res {
                Ok(obj) => debug!("Reconciled: {:?}", obj),
                Err(kube::runtime::controller::Error::ObjectNotFound(obj)) => {
                    debug!("{} no longer exists", obj)
                }
                Err(e) => error!("Reconcile error: {:?}", e),
            }
        })
        .await;

    Ok(())
}

/// The main reconciliation function
///
/// This function is called whenever:
/// - An APIService is created or updated
/// - A Service or Endpoints referenced by an APIService changes or is deleted
/// - The resync timer expires
#[instrument(skip(obj, ctx), fields(name = %obj.name_any()))]
async fn reconcile(obj: Arc<APIService>, ctx: Arc<ControllerState>) -> Result<Action> {
    let resync = ctx.config.resync_interval();

    if !ctx.is_leader.load(Ordering::Relaxed) {
        debug!("Not the leader, skipping {}", obj.name_any());
        return Ok(Action::requeue(resync));
    }

    ctx.stores.wait_until_ready().await?;

    let name = obj.name_any();
    let started = Instant::now();
    let outcome = ctx.available.sync(&name).await;

    #[cfg(feature = "metrics")]
    {
        super::metrics::observe_reconcile_duration_seconds(
            CONTROLLER_NAME,
            started.elapsed().as_secs_f64(),
        );
        if let Ok(outcome) = &outcome {
            record_outcome(&name, outcome);
        }
    }
    #[cfg(not(feature = "metrics"))]
    let _ = started;

    match outcome? {
        SyncOutcome::Missing => Ok(Action::await_change()),
        SyncOutcome::Unchanged(_) | SyncOutcome::Updated(_) => Ok(Action::requeue(resync)),
    }
}

#[cfg(feature = "metrics")]
fn record_outcome(name: &str, outcome: &SyncOutcome) {
    use super::conditions::CONDITION_STATUS_TRUE;
    use super::metrics;

    match outcome {
        // Deletions are handled by the APIService reflector
        SyncOutcome::Missing => {}
        SyncOutcome::Unchanged(condition) => {
            metrics::set_apiservice_available(name, condition.status == CONDITION_STATUS_TRUE)
        }
        SyncOutcome::Updated(condition) => {
            let available = condition.status == CONDITION_STATUS_TRUE;
            metrics::set_apiservice_available(name, available);
            if !available {
                metrics::inc_unavailable_transition(
                    name,
                    condition.reason.as_deref().unwrap_or_default(),
                );
            }
        }
    }
}

/// Error policy for the controller
fn error_policy(apiservice: Arc<APIService>, error: &Error, _ctx: Arc<ControllerState>) -> Action {
    error!(
        "Reconciliation error for {}: {:?}",
        apiservice.name_any(),
        error
    );

    #[cfg(feature = "metrics")]
    super::metrics::inc_reconcile_error(CONTROLLER_NAME, error.metric_label());

    // Use shorter retry for retriable errors
    let retry_duration = if error.is_retriable() {
        Duration::from_secs(5)
    } else {
        Duration::from_secs(60)
    };

    Action::requeue(retry_duration)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::kube_aggregator::pkg::apis::apiregistration::v1::{
        APIServiceSpec, ServiceReference,
    };
    use kube::api::ObjectMeta;

    fn apiservice(name: &str, backend: Option<(&str, &str)>) -> Arc<APIService> {
        Arc::new(APIService {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec: Some(APIServiceSpec {
                service: backend.map(|(namespace, name)| ServiceReference {
                    namespace: Some(namespace.to_string()),
                    name: Some(name.to_string()),
                    port: None,
                }),
                ..Default::default()
            }),
            status: None,
        })
    }

    #[test]
    fn test_referencing_apiservices_matches_namespace_and_name() {
        let all = vec![
            apiservice("v1.local.group", None),
            apiservice("v1beta1.metrics.k8s.io", Some(("kube-system", "metrics-server"))),
            apiservice("v1beta2.metrics.k8s.io", Some(("kube-system", "metrics-server"))),
            apiservice("v1.other.group", Some(("monitoring", "metrics-server"))),
        ];

        let refs = referencing_apiservices(&all, Some("kube-system"), "metrics-server");
        let names: Vec<_> = refs.iter().map(|r| r.name.clone()).collect();
        assert_eq!(names, vec!["v1beta1.metrics.k8s.io", "v1beta2.metrics.k8s.io"]);
    }

    #[test]
    fn test_referencing_apiservices_none_match() {
        let all = vec![apiservice("v1.local.group", None)];
        assert!(referencing_apiservices(&all, Some("default"), "kubernetes").is_empty());
        assert!(referencing_apiservices(&[], Some("default"), "kubernetes").is_empty());
    }
}
