//! Read-only object lookups backed by reflector caches
//!
//! The availability check only needs "give me this object, if it exists".
//! `ObjectLookup` captures that so the reconciler runs the same against the
//! `kube` reflector stores and against in-memory fixtures.
//!
//! The reflectors are shared: the controller is triggered by their
//! subscribers, so an object is always in the cache before the reconcile it
//! causes reads it.

use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

use futures::channel::mpsc;
use futures::{future, Future, Stream, StreamExt};
use k8s_openapi::api::core::v1::{Endpoints, Service};
use k8s_openapi::kube_aggregator::pkg::apis::apiregistration::v1::APIService;
use kube::{
    api::Api,
    runtime::{
        reflector::{self, ObjectRef, ReflectHandle, Store},
        watcher, WatchStreamExt,
    },
    Client, Resource, ResourceExt,
};
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Changes a subscriber may lag behind before the reflector waits for it
const SUBSCRIBE_BUFFER_SIZE: usize = 256;

/// Namespace/name lookup of cached objects
pub trait ObjectLookup<K>: Send + Sync {
    /// Fetch an object. `None` means it is not present, which is not an error.
    fn lookup(&self, namespace: Option<&str>, name: &str) -> Option<Arc<K>>;

    /// Snapshot of every cached object
    fn list(&self) -> Vec<Arc<K>>;
}

impl<K> ObjectLookup<K> for Store<K>
where
    K: Resource + Clone + Send + Sync + 'static,
    K::DynamicType: Default + Eq + Hash + Clone + Send + Sync,
{
    fn lookup(&self, namespace: Option<&str>, name: &str) -> Option<Arc<K>> {
        let key = match namespace {
            Some(ns) => ObjectRef::new(name).within(ns),
            None => ObjectRef::new(name),
        };
        self.get(&key)
    }

    fn list(&self) -> Vec<Arc<K>> {
        self.state()
    }
}

/// A Service or Endpoints object that was removed from the cluster
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeletedBackend {
    pub namespace: Option<String>,
    pub name: String,
}

/// Caches for the three object kinds the controller reads
#[derive(Clone)]
pub struct ObjectStores {
    pub apiservices: Store<APIService>,
    pub services: Store<Service>,
    pub endpoints: Store<Endpoints>,
}

/// Change feeds of the shared reflectors, consumed by the controller
pub struct ObjectTriggers {
    pub apiservices: ReflectHandle<APIService>,
    pub services: ReflectHandle<Service>,
    pub endpoints: ReflectHandle<Endpoints>,
    /// Subscribers only see applied objects, so deletions arrive here
    pub deleted_backends: mpsc::UnboundedReceiver<DeletedBackend>,
}

impl ObjectStores {
    /// Start cluster-wide shared reflectors for APIServices, Services and Endpoints
    pub fn start(client: &Client) -> Result<(Self, ObjectTriggers)> {
        let (deleted_tx, deleted_backends) = mpsc::unbounded();
        let services_tx = deleted_tx.clone();

        let (apiservices, apiservice_events) = spawn_reflector(
            Api::<APIService>::all(client.clone()),
            "apiservices",
            forget_deleted_apiservice,
        )?;
        let (services, service_events) = spawn_reflector(
            Api::<Service>::all(client.clone()),
            "services",
            move |svc: &Service| notify_deleted(&services_tx, svc),
        )?;
        let (endpoints, endpoint_events) = spawn_reflector(
            Api::<Endpoints>::all(client.clone()),
            "endpoints",
            move |ep: &Endpoints| notify_deleted(&deleted_tx, ep),
        )?;

        Ok((
            Self {
                apiservices,
                services,
                endpoints,
            },
            ObjectTriggers {
                apiservices: apiservice_events,
                services: service_events,
                endpoints: endpoint_events,
                deleted_backends,
            },
        ))
    }

    /// Block until every cache has completed its initial list
    pub async fn wait_until_ready(&self) -> Result<()> {
        let not_ready = |kind: &str| Error::ConfigError(format!("{kind} reflector stopped before syncing"));

        self.apiservices
            .wait_until_ready()
            .await
            .map_err(|_| not_ready("apiservices"))?;
        self.services
            .wait_until_ready()
            .await
            .map_err(|_| not_ready("services"))?;
        self.endpoints
            .wait_until_ready()
            .await
            .map_err(|_| not_ready("endpoints"))?;
        Ok(())
    }

    /// Log cache sizes once the initial lists are in
    pub async fn log_when_synced(&self) {
        if self.wait_until_ready().await.is_ok() {
            info!(
                "Caches synced: {} apiservices, {} services, {} endpoints",
                self.apiservices.state().len(),
                self.services.state().len(),
                self.endpoints.state().len()
            );
        }
    }
}

fn forget_deleted_apiservice(apiservice: &APIService) {
    info!("APIService {} deleted", apiservice.name_any());
    #[cfg(feature = "metrics")]
    super::metrics::forget_apiservice(&apiservice.name_any());
}

fn notify_deleted<K: Resource>(tx: &mpsc::UnboundedSender<DeletedBackend>, obj: &K) {
    // A closed receiver means the controller has stopped
    let _ = tx.unbounded_send(DeletedBackend {
        namespace: obj.namespace(),
        name: obj.name_any(),
    });
}

fn handle_event<K, F>(kind: &str, event: watcher::Result<watcher::Event<K>>, on_delete: &F)
where
    K: Resource,
    F: Fn(&K),
{
    match event {
        Ok(watcher::Event::Apply(obj)) => debug!("{} cache updated: {:?}", kind, obj.meta().name),
        Ok(watcher::Event::Delete(obj)) => {
            debug!("{} cache removed: {:?}", kind, obj.meta().name);
            on_delete(&obj);
        }
        Ok(_) => {}
        Err(e) => warn!("{} watch error: {}", kind, e),
    }
}

/// Feed watch events into a shared store.
///
/// Returns the store, a subscriber that yields each object after the store
/// holds it, and the future that drives both.
fn shared_reflector<K, S, F>(
    events: S,
    kind: &'static str,
    on_delete: F,
) -> Result<(Store<K>, ReflectHandle<K>, impl Future<Output = ()> + Send)>
where
    K: Resource + Clone + Debug + Send + Sync + 'static,
    K::DynamicType: Default + Eq + Hash + Clone + Send + Sync,
    S: Stream<Item = watcher::Result<watcher::Event<K>>> + Send + 'static,
    F: Fn(&K) + Send + 'static,
{
    let (reader, writer) = reflector::store_shared(SUBSCRIBE_BUFFER_SIZE);
    let subscriber = writer
        .subscribe()
        .ok_or_else(|| Error::ConfigError(format!("{kind} store is not shared")))?;

    let driver = events.reflect_shared(writer).for_each(move |event| {
        handle_event(kind, event, &on_delete);
        future::ready(())
    });

    Ok((reader, subscriber, driver))
}

fn spawn_reflector<K, F>(
    api: Api<K>,
    kind: &'static str,
    on_delete: F,
) -> Result<(Store<K>, ReflectHandle<K>)>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    K::DynamicType: Default + Eq + Hash + Clone + Send + Sync,
    F: Fn(&K) + Send + 'static,
{
    let events = watcher(api, watcher::Config::default()).default_backoff();
    let (reader, subscriber, driver) = shared_reflector(events, kind, on_delete)?;
    tokio::spawn(driver);
    Ok((reader, subscriber))
}
