//! Response bodies for the REST API

use k8s_openapi::kube_aggregator::pkg::apis::apiregistration::v1::APIService;
use kube::ResourceExt;
use serde::{Deserialize, Serialize};

use crate::controller::conditions::{
    apiservice_condition, CONDITION_STATUS_UNKNOWN, CONDITION_TYPE_AVAILABLE,
};

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Availability of a single APIService
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiServiceSummary {
    pub name: String,
    /// `namespace/name` of the backing service; absent for local APIServices
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    /// Status of the `Available` condition, `Unknown` when not yet computed
    pub available: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

impl From<&APIService> for ApiServiceSummary {
    fn from(apiservice: &APIService) -> Self {
        let service = apiservice
            .spec
            .as_ref()
            .and_then(|s| s.service.as_ref())
            .map(|r| {
                format!(
                    "{}/{}",
                    r.namespace.as_deref().unwrap_or_default(),
                    r.name.as_deref().unwrap_or_default()
                )
            });
        let condition = apiservice_condition(apiservice, CONDITION_TYPE_AVAILABLE);

        Self {
            name: apiservice.name_any(),
            service,
            available: condition
                .map(|c| c.status.clone())
                .unwrap_or_else(|| CONDITION_STATUS_UNKNOWN.to_string()),
            reason: condition.and_then(|c| c.reason.clone()),
            message: condition.and_then(|c| c.message.clone()),
            last_transition_time: condition
                .and_then(|c| c.last_transition_time.as_ref())
                .map(|t| t.0.to_rfc3339()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiServiceListResponse {
    pub items: Vec<ApiServiceSummary>,
    pub total: usize,
    pub unavailable: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(error: &str, message: &str) -> Self {
        Self {
            error: error.to_string(),
            message: message.to_string(),
        }
    }
}
