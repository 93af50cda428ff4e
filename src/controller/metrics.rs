//! Prometheus metrics for the availability controller
//!
//! # Exported metrics
//! The `/metrics` endpoint (when built with `--features metrics`) exports:
//! - `apiservice_reconcile_duration_seconds` (histogram): reconcile duration labeled by controller.
//! - `apiservice_reconcile_errors_total` (counter): reconcile errors labeled by controller and kind.
//! - `aggregator_unavailable_apiservice` (gauge): 1 when an APIService is unavailable, labeled by name.
//! - `aggregator_unavailable_apiservice_transitions_total` (counter): transitions to
//!   unavailable, labeled by name and reason.

use std::sync::atomic::{AtomicI64, AtomicU64};

use once_cell::sync::Lazy;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;

/// Labels for operator reconcile metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ReconcileLabels {
    /// Controller name, e.g. "available"
    pub controller: String,
}

/// Labels for operator error metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ErrorLabels {
    pub controller: String,
    /// Error kind, see `Error::metric_label`
    pub kind: String,
}

/// Labels identifying an APIService
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ApiServiceLabels {
    pub name: String,
}

/// Labels for unavailability transitions
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct UnavailableLabels {
    pub name: String,
    pub reason: String,
}

/// Histogram tracking reconcile duration (seconds)
pub static RECONCILE_DURATION_SECONDS: Lazy<Family<ReconcileLabels, Histogram>> = Lazy::new(|| {
    fn reconcile_histogram() -> Histogram {
        // 1ms .. ~32s across 16 buckets; probes can take up to the deadline.
        Histogram::new(exponential_buckets(0.001, 2.0, 16))
    }

    Family::new_with_constructor(reconcile_histogram)
});

/// Counter tracking reconcile errors
pub static RECONCILE_ERRORS: Lazy<Family<ErrorLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

/// Gauge set to 1 while an APIService is unavailable
pub static UNAVAILABLE_APISERVICE: Lazy<Family<ApiServiceLabels, Gauge<i64, AtomicI64>>> =
    Lazy::new(Family::default);

/// Counter tracking published transitions to Available=False
pub static UNAVAILABLE_APISERVICE_TRANSITIONS: Lazy<
    Family<UnavailableLabels, Counter<u64, AtomicU64>>,
> = Lazy::new(Family::default);

/// Global metrics registry
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let mut registry = Registry::default();

    registry.register(
        "apiservice_reconcile_duration_seconds",
        "Duration of availability reconcile passes in seconds",
        RECONCILE_DURATION_SECONDS.clone(),
    );
    registry.register(
        "apiservice_reconcile_errors",
        "Total number of reconcile errors",
        RECONCILE_ERRORS.clone(),
    );
    registry.register(
        "aggregator_unavailable_apiservice",
        "Whether an APIService is currently unavailable (1) or available (0)",
        UNAVAILABLE_APISERVICE.clone(),
    );
    registry.register(
        "aggregator_unavailable_apiservice_transitions",
        "Number of times an APIService was marked unavailable",
        UNAVAILABLE_APISERVICE_TRANSITIONS.clone(),
    );

    registry
});

/// Observe a reconcile duration in seconds.
pub fn observe_reconcile_duration_seconds(controller: &str, seconds: f64) {
    let labels = ReconcileLabels {
        controller: controller.to_string(),
    };
    RECONCILE_DURATION_SECONDS
        .get_or_create(&labels)
        .observe(seconds);
}

/// Increment the reconcile error counter.
pub fn inc_reconcile_error(controller: &str, kind: &str) {
    let labels = ErrorLabels {
        controller: controller.to_string(),
        kind: kind.to_string(),
    };
    RECONCILE_ERRORS.get_or_create(&labels).inc();
}

/// Record the current availability of an APIService
pub fn set_apiservice_available(name: &str, available: bool) {
    let labels = ApiServiceLabels {
        name: name.to_string(),
    };
    UNAVAILABLE_APISERVICE
        .get_or_create(&labels)
        .set(if available { 0 } else { 1 });
}

/// Count a published transition to unavailable
pub fn inc_unavailable_transition(name: &str, reason: &str) {
    let labels = UnavailableLabels {
        name: name.to_string(),
        reason: reason.to_string(),
    };
    UNAVAILABLE_APISERVICE_TRANSITIONS
        .get_or_create(&labels)
        .inc();
}

/// Drop the availability series of a deleted APIService
pub fn forget_apiservice(name: &str) {
    let labels = ApiServiceLabels {
        name: name.to_string(),
    };
    UNAVAILABLE_APISERVICE.remove(&labels);
}
