//! Condition management helpers for APIService status
//!
//! An `APIService` carries at most one condition per type. The availability
//! controller only ever writes the `Available` type and leaves the rest of the
//! list untouched.

use chrono::{DateTime, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use k8s_openapi::kube_aggregator::pkg::apis::apiregistration::v1::{
    APIService, APIServiceCondition, APIServiceStatus,
};

/// Condition type published by the availability controller
pub const CONDITION_TYPE_AVAILABLE: &str = "Available";

/// Standard condition statuses
pub const CONDITION_STATUS_TRUE: &str = "True";
pub const CONDITION_STATUS_FALSE: &str = "False";
pub const CONDITION_STATUS_UNKNOWN: &str = "Unknown";

/// Reasons attached to the `Available` condition
pub const REASON_LOCAL: &str = "Local";
pub const REASON_PASSED: &str = "Passed";
pub const REASON_SERVICE_NOT_FOUND: &str = "ServiceNotFound";
pub const REASON_ENDPOINTS_NOT_FOUND: &str = "EndpointsNotFound";
pub const REASON_MISSING_ENDPOINTS: &str = "MissingEndpoints";
pub const REASON_FAILED_DISCOVERY_CHECK: &str = "FailedDiscoveryCheck";

pub const MESSAGE_LOCAL: &str = "Local APIServices are always available";
pub const MESSAGE_PASSED: &str = "all checks passed";

/// Build an `Available` condition without a transition time.
///
/// The time is stamped when the condition is written, so that freshly
/// computed conditions compare equal to the published ones.
pub fn available_condition(available: bool, reason: &str, message: &str) -> APIServiceCondition {
    APIServiceCondition {
        type_: CONDITION_TYPE_AVAILABLE.to_string(),
        status: if available {
            CONDITION_STATUS_TRUE
        } else {
            CONDITION_STATUS_FALSE
        }
        .to_string(),
        reason: Some(reason.to_string()),
        message: Some(message.to_string()),
        last_transition_time: None,
    }
}

/// Find a condition by type
pub fn find_condition<'a>(
    conditions: &'a [APIServiceCondition],
    type_: &str,
) -> Option<&'a APIServiceCondition> {
    conditions.iter().find(|c| c.type_ == type_)
}

/// Find a condition by type on an APIService
pub fn apiservice_condition<'a>(
    apiservice: &'a APIService,
    type_: &str,
) -> Option<&'a APIServiceCondition> {
    apiservice
        .status
        .as_ref()
        .and_then(|s| s.conditions.as_deref())
        .and_then(|c| find_condition(c, type_))
}

/// Two conditions are equivalent when type, status, reason and message match.
/// Transition times are ignored.
pub fn is_equivalent(a: &APIServiceCondition, b: &APIServiceCondition) -> bool {
    a.type_ == b.type_ && a.status == b.status && a.reason == b.reason && a.message == b.message
}

/// Replace the condition of the same type, or add it.
///
/// Any duplicate entries of that type are dropped so the list holds exactly
/// one. The transition time is set to `now`.
pub fn set_condition(
    conditions: &mut Vec<APIServiceCondition>,
    mut condition: APIServiceCondition,
    now: DateTime<Utc>,
) {
    condition.last_transition_time = Some(Time(now));

    match conditions.iter().position(|c| c.type_ == condition.type_) {
        Some(index) => {
            let type_ = condition.type_.clone();
            conditions[index] = condition;
            let mut seen = false;
            conditions.retain(|c| {
                if c.type_ != type_ {
                    return true;
                }
                let keep = !seen;
                seen = true;
                keep
            });
        }
        None => conditions.push(condition),
    }
}

/// Set a condition on an APIService, creating the status block if needed
pub fn set_apiservice_condition(
    apiservice: &mut APIService,
    condition: APIServiceCondition,
    now: DateTime<Utc>,
) {
    let status = apiservice.status.get_or_insert_with(APIServiceStatus::default);
    let conditions = status.conditions.get_or_insert_with(Vec::new);
    set_condition(conditions, condition, now);
}
