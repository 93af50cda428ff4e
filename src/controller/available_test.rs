//! Tests for the availability reconciler
//!
//! These tests drive `AvailableConditionController::sync` against in-memory
//! stores, a scripted prober and a recording publisher, and check:
//! - the condition published for each availability scenario
//! - exactly one write per changed pass, none per unchanged pass
//! - error propagation from the status write

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Utc;
    use k8s_openapi::api::core::v1::{
        EndpointAddress, EndpointSubset, Endpoints, Service, ServiceSpec,
    };
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use k8s_openapi::kube_aggregator::pkg::apis::apiregistration::v1::{
        APIService, APIServiceCondition, APIServiceSpec, APIServiceStatus, ServiceReference,
    };
    use kube::api::ObjectMeta;

    use super::super::available::{address_count, AvailableConditionController, SyncOutcome};
    use super::super::conditions::CONDITION_TYPE_AVAILABLE;
    use super::super::discovery::{DiscoveryProber, ProbeError, ProbeTarget};
    use super::super::status::StatusPublisher;
    use super::super::store::memory::InMemoryStore;
    use crate::error::{Error, Result};

    /// Prober that either passes or times out, recording probed URLs
    struct ScriptedProber {
        healthy: bool,
        probed: Mutex<Vec<String>>,
    }

    impl ScriptedProber {
        fn new(healthy: bool) -> Self {
            Self {
                healthy,
                probed: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.probed.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl DiscoveryProber for ScriptedProber {
        async fn probe(
            &self,
            target: &ProbeTarget,
            deadline: Duration,
        ) -> std::result::Result<(), ProbeError> {
            self.probed.lock().unwrap().push(target.url.clone());
            if self.healthy {
                Ok(())
            } else {
                Err(ProbeError::Timeout(deadline))
            }
        }
    }

    /// Publisher that records every write and feeds it back into the store
    struct RecordingPublisher {
        store: Arc<InMemoryStore<APIService>>,
        writes: Mutex<Vec<APIService>>,
        conflict: AtomicBool,
        attempts: AtomicUsize,
    }

    impl RecordingPublisher {
        fn new(store: Arc<InMemoryStore<APIService>>) -> Self {
            Self {
                store,
                writes: Mutex::new(Vec::new()),
                conflict: AtomicBool::new(false),
                attempts: AtomicUsize::new(0),
            }
        }

        fn writes(&self) -> Vec<APIService> {
            self.writes.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl StatusPublisher for RecordingPublisher {
        async fn update_status(&self, apiservice: &APIService) -> Result<APIService> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.conflict.load(Ordering::SeqCst) {
                return Err(Error::Conflict(
                    "the object has been modified".to_string(),
                ));
            }
            self.writes.lock().unwrap().push(apiservice.clone());
            self.store.insert(apiservice.clone());
            Ok(apiservice.clone())
        }
    }

    struct Fixture {
        controller: AvailableConditionController,
        prober: Arc<ScriptedProber>,
        publisher: Arc<RecordingPublisher>,
    }

    fn fixture(
        apiservices: Vec<APIService>,
        services: Vec<Service>,
        endpoints: Vec<Endpoints>,
        healthy: bool,
    ) -> Fixture {
        let apiservice_store = Arc::new(InMemoryStore::with(apiservices));
        let prober = Arc::new(ScriptedProber::new(healthy));
        let publisher = Arc::new(RecordingPublisher::new(apiservice_store.clone()));

        let controller = AvailableConditionController::new(
            apiservice_store,
            Arc::new(InMemoryStore::with(services)),
            Arc::new(InMemoryStore::with(endpoints)),
            prober.clone(),
            publisher.clone(),
        )
        .with_probe_timeout(Duration::from_secs(5));

        Fixture {
            controller,
            prober,
            publisher,
        }
    }

    fn meta(namespace: Option<&str>, name: &str) -> ObjectMeta {
        ObjectMeta {
            namespace: namespace.map(str::to_string),
            name: Some(name.to_string()),
            resource_version: Some("1".to_string()),
            ..Default::default()
        }
    }

    fn new_endpoints(namespace: &str, name: &str) -> Endpoints {
        Endpoints {
            metadata: meta(Some(namespace), name),
            subsets: None,
        }
    }

    fn new_endpoints_with_address(namespace: &str, name: &str) -> Endpoints {
        Endpoints {
            metadata: meta(Some(namespace), name),
            subsets: Some(vec![EndpointSubset {
                addresses: Some(vec![EndpointAddress {
                    ip: "10.244.0.7".to_string(),
                    ..Default::default()
                }]),
                ..Default::default()
            }]),
        }
    }

    fn new_service(namespace: &str, name: &str) -> Service {
        Service {
            metadata: meta(Some(namespace), name),
            spec: Some(ServiceSpec {
                type_: Some("ClusterIP".to_string()),
                ..Default::default()
            }),
            status: None,
        }
    }

    fn new_local_apiservice(name: &str) -> APIService {
        APIService {
            metadata: meta(None, name),
            spec: Some(APIServiceSpec::default()),
            status: None,
        }
    }

    fn new_remote_apiservice(name: &str) -> APIService {
        APIService {
            metadata: meta(None, name),
            spec: Some(APIServiceSpec {
                service: Some(ServiceReference {
                    namespace: Some("foo".to_string()),
                    name: Some("bar".to_string()),
                    port: None,
                }),
                ..Default::default()
            }),
            status: None,
        }
    }

    /// Single published condition of the single write
    fn only_written_condition(publisher: &RecordingPublisher) -> APIServiceCondition {
        let writes = publisher.writes();
        assert_eq!(writes.len(), 1, "expected exactly one write: {writes:?}");
        let conditions = writes[0]
            .status
            .as_ref()
            .and_then(|s| s.conditions.clone())
            .unwrap_or_default();
        assert_eq!(conditions.len(), 1, "expected one condition: {conditions:?}");
        conditions[0].clone()
    }

    fn assert_condition(condition: &APIServiceCondition, status: &str, reason: &str, message: &str) {
        assert_eq!(condition.type_, CONDITION_TYPE_AVAILABLE);
        assert_eq!(condition.status, status);
        assert_eq!(condition.reason.as_deref(), Some(reason));
        assert_eq!(condition.message.as_deref(), Some(message));
        assert!(condition.last_transition_time.is_some());
    }

    #[tokio::test]
    async fn test_local_apiservice_is_available() {
        let f = fixture(
            vec![new_local_apiservice("local.group")],
            vec![],
            vec![],
            false,
        );

        let outcome = f.controller.sync("local.group").await.unwrap();
        assert!(matches!(outcome, SyncOutcome::Updated(_)));

        let condition = only_written_condition(&f.publisher);
        assert_condition(
            &condition,
            "True",
            "Local",
            "Local APIServices are always available",
        );
        assert_eq!(f.prober.calls(), 0);
    }

    #[tokio::test]
    async fn test_local_ignores_services_and_endpoints() {
        let f = fixture(
            vec![new_local_apiservice("local.group")],
            vec![new_service("foo", "bar")],
            vec![new_endpoints("foo", "bar")],
            false,
        );

        f.controller.sync("local.group").await.unwrap();
        let condition = only_written_condition(&f.publisher);
        assert_eq!(condition.reason.as_deref(), Some("Local"));
    }

    #[tokio::test]
    async fn test_remote_without_service() {
        let f = fixture(
            vec![new_remote_apiservice("remote.group")],
            vec![new_service("foo", "not-bar")],
            vec![],
            true,
        );

        f.controller.sync("remote.group").await.unwrap();

        let condition = only_written_condition(&f.publisher);
        assert_condition(
            &condition,
            "False",
            "ServiceNotFound",
            r#"service/bar in "foo" is not present"#,
        );
        assert_eq!(f.prober.calls(), 0);
    }

    #[tokio::test]
    async fn test_remote_without_endpoints() {
        let f = fixture(
            vec![new_remote_apiservice("remote.group")],
            vec![new_service("foo", "bar")],
            vec![],
            true,
        );

        f.controller.sync("remote.group").await.unwrap();

        let condition = only_written_condition(&f.publisher);
        assert_condition(
            &condition,
            "False",
            "EndpointsNotFound",
            r#"cannot find endpoints for service/bar in "foo""#,
        );
    }

    #[tokio::test]
    async fn test_remote_with_empty_endpoints() {
        let f = fixture(
            vec![new_remote_apiservice("remote.group")],
            vec![new_service("foo", "bar")],
            vec![new_endpoints("foo", "bar")],
            true,
        );

        f.controller.sync("remote.group").await.unwrap();

        let condition = only_written_condition(&f.publisher);
        assert_condition(
            &condition,
            "False",
            "MissingEndpoints",
            r#"endpoints for service/bar in "foo" have no addresses"#,
        );
        assert_eq!(f.prober.calls(), 0);
    }

    #[tokio::test]
    async fn test_remote_not_ready_addresses_do_not_count() {
        let mut endpoints = new_endpoints("foo", "bar");
        endpoints.subsets = Some(vec![EndpointSubset {
            not_ready_addresses: Some(vec![EndpointAddress {
                ip: "10.244.0.9".to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        }]);
        assert_eq!(address_count(&endpoints), 0);

        let f = fixture(
            vec![new_remote_apiservice("remote.group")],
            vec![new_service("foo", "bar")],
            vec![endpoints],
            true,
        );

        f.controller.sync("remote.group").await.unwrap();
        let condition = only_written_condition(&f.publisher);
        assert_eq!(condition.reason.as_deref(), Some("MissingEndpoints"));
    }

    #[tokio::test]
    async fn test_remote_failed_discovery() {
        let f = fixture(
            vec![new_remote_apiservice("remote.group")],
            vec![new_service("foo", "bar")],
            vec![new_endpoints_with_address("foo", "bar")],
            false,
        );

        f.controller.sync("remote.group").await.unwrap();

        let condition = only_written_condition(&f.publisher);
        assert_condition(
            &condition,
            "False",
            "FailedDiscoveryCheck",
            "no response from https://bar.foo.svc:443/apis: deadline of 5s exceeded",
        );
        let message = condition.message.unwrap();
        assert!(message.contains("no response from"));
        assert_eq!(f.prober.calls(), 1);
    }

    #[tokio::test]
    async fn test_remote_passing_discovery() {
        let mut service = new_service("foo", "bar");
        if let Some(spec) = service.spec.as_mut() {
            spec.cluster_ip = Some("10.96.0.20".to_string());
        }
        let f = fixture(
            vec![new_remote_apiservice("remote.group")],
            vec![service],
            vec![new_endpoints_with_address("foo", "bar")],
            true,
        );

        f.controller.sync("remote.group").await.unwrap();

        let condition = only_written_condition(&f.publisher);
        assert_condition(&condition, "True", "Passed", "all checks passed");
        assert_eq!(
            f.prober.probed.lock().unwrap().as_slice(),
            ["https://10.96.0.20:443/apis".to_string()]
        );
    }

    #[tokio::test]
    async fn test_remote_port_not_exposed_fails_discovery() {
        let mut apiservice = new_remote_apiservice("remote.group");
        if let Some(reference) = apiservice.spec.as_mut().and_then(|s| s.service.as_mut()) {
            reference.port = Some(8443);
        }
        let mut service = new_service("foo", "bar");
        if let Some(spec) = service.spec.as_mut() {
            spec.cluster_ip = Some("10.96.0.20".to_string());
            spec.ports = Some(vec![k8s_openapi::api::core::v1::ServicePort {
                port: 443,
                ..Default::default()
            }]);
        }
        let f = fixture(
            vec![apiservice],
            vec![service],
            vec![new_endpoints_with_address("foo", "bar")],
            true,
        );

        f.controller.sync("remote.group").await.unwrap();

        let condition = only_written_condition(&f.publisher);
        assert_eq!(condition.reason.as_deref(), Some("FailedDiscoveryCheck"));
        assert_eq!(
            condition.message.as_deref(),
            Some(r#"no response from https://10.96.0.20:8443/apis: service/bar in "foo" has no port 8443"#)
        );
        assert_eq!(f.prober.calls(), 0);
    }

    #[tokio::test]
    async fn test_missing_apiservice_is_noop() {
        let f = fixture(vec![], vec![], vec![], true);

        let outcome = f.controller.sync("gone.group").await.unwrap();
        assert_eq!(outcome, SyncOutcome::Missing);
        assert!(f.publisher.writes().is_empty());
    }

    #[tokio::test]
    async fn test_second_pass_without_changes_does_not_write() {
        let f = fixture(
            vec![new_remote_apiservice("remote.group")],
            vec![new_service("foo", "bar")],
            vec![],
            true,
        );

        let first = f.controller.sync("remote.group").await.unwrap();
        assert!(matches!(first, SyncOutcome::Updated(_)));
        assert_eq!(f.publisher.writes().len(), 1);

        let second = f.controller.sync("remote.group").await.unwrap();
        assert!(matches!(second, SyncOutcome::Unchanged(_)));
        assert_eq!(f.publisher.writes().len(), 1);
    }

    #[tokio::test]
    async fn test_changed_condition_replaces_previous_and_keeps_others() {
        let earlier = Utc::now() - chrono::Duration::hours(1);
        let mut apiservice = new_remote_apiservice("remote.group");
        apiservice.status = Some(APIServiceStatus {
            conditions: Some(vec![
                APIServiceCondition {
                    type_: CONDITION_TYPE_AVAILABLE.to_string(),
                    status: "False".to_string(),
                    reason: Some("ServiceNotFound".to_string()),
                    message: Some(r#"service/bar in "foo" is not present"#.to_string()),
                    last_transition_time: Some(Time(earlier)),
                },
                APIServiceCondition {
                    type_: "Degraded".to_string(),
                    status: "False".to_string(),
                    ..Default::default()
                },
            ]),
        });

        let f = fixture(
            vec![apiservice],
            vec![new_service("foo", "bar")],
            vec![new_endpoints_with_address("foo", "bar")],
            true,
        );

        f.controller.sync("remote.group").await.unwrap();

        let writes = f.publisher.writes();
        assert_eq!(writes.len(), 1);
        let conditions = writes[0]
            .status
            .as_ref()
            .and_then(|s| s.conditions.clone())
            .unwrap();
        assert_eq!(conditions.len(), 2);

        let available: Vec<_> = conditions
            .iter()
            .filter(|c| c.type_ == CONDITION_TYPE_AVAILABLE)
            .collect();
        assert_eq!(available.len(), 1);
        assert_eq!(available[0].status, "True");
        assert_ne!(available[0].last_transition_time, Some(Time(earlier)));
        assert!(conditions.iter().any(|c| c.type_ == "Degraded"));
    }

    #[tokio::test]
    async fn test_publish_conflict_propagates() {
        let f = fixture(
            vec![new_local_apiservice("local.group")],
            vec![],
            vec![],
            true,
        );
        f.publisher.conflict.store(true, Ordering::SeqCst);

        let err = f.controller.sync("local.group").await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
        assert!(err.is_retriable());
        assert_eq!(f.publisher.attempts.load(Ordering::SeqCst), 1);
        assert!(f.publisher.writes().is_empty());
    }

    #[tokio::test]
    async fn test_compute_condition_does_not_write() {
        let f = fixture(vec![], vec![], vec![], true);

        let condition = f
            .controller
            .compute_condition(&new_remote_apiservice("remote.group"))
            .await;
        assert_eq!(condition.reason.as_deref(), Some("ServiceNotFound"));
        assert!(condition.last_transition_time.is_none());
        assert!(f.publisher.writes().is_empty());
    }
}
