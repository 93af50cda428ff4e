//! Status publication for APIService objects

use async_trait::async_trait;
use k8s_openapi::kube_aggregator::pkg::apis::apiregistration::v1::APIService;
use kube::{
    api::{Api, PostParams},
    Client, ResourceExt,
};
use tracing::debug;

use crate::error::{Error, Result};

/// Writes a recomputed status back to the API server
#[async_trait]
pub trait StatusPublisher: Send + Sync {
    /// Replace the status of `apiservice` with the one it carries.
    ///
    /// A write that loses an optimistic-concurrency race returns
    /// [`Error::Conflict`]; the caller decides whether to retry.
    async fn update_status(&self, apiservice: &APIService) -> Result<APIService>;
}

/// Publishes through the `status` subresource
#[derive(Clone)]
pub struct KubeStatusPublisher {
    api: Api<APIService>,
}

impl KubeStatusPublisher {
    pub fn new(client: Client) -> Self {
        Self {
            api: Api::all(client),
        }
    }
}

#[async_trait]
impl StatusPublisher for KubeStatusPublisher {
    async fn update_status(&self, apiservice: &APIService) -> Result<APIService> {
        let name = apiservice.name_any();
        let data = serde_json::to_vec(apiservice)?;

        match self
            .api
            .replace_status(&name, &PostParams::default(), data)
            .await
        {
            Ok(updated) => {
                debug!(
                    "Updated status of APIService {} (resourceVersion {:?})",
                    name,
                    updated.resource_version()
                );
                Ok(updated)
            }
            Err(kube::Error::Api(resp)) if resp.code == 409 => Err(Error::Conflict(format!(
                "apiservice {}: {}",
                name, resp.message
            ))),
            Err(e) => Err(Error::KubeError(e)),
        }
    }
}
