use crate::error::{Result, RuntimeError};
use crate::traits::ClusterClient;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{DeleteParams, ListParams, Preconditions};
use kube::{Api, Client};
use tracing::debug;

/// Thin wrapper over `kube::Client` for the calls the controller makes
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
}

impl ApiClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client from the in-cluster service account or the local kubeconfig
    pub async fn try_default() -> Result<Self> {
        let client = Client::try_default()
            .await
            .map_err(|e| RuntimeError::client_init(e.to_string()))?;
        Ok(Self::new(client))
    }

    /// Underlying client, for building watches
    pub fn client(&self) -> Client {
        self.client.clone()
    }

    pub fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ClusterClient for ApiClient {
    async fn list_pods(
        &self,
        namespace: &str,
        label_selector: &str,
        field_selector: &str,
    ) -> Result<Vec<Pod>> {
        debug!(
            "LIST pods in {} (labels: '{}', fields: '{}')",
            namespace, label_selector, field_selector
        );

        let mut params = ListParams::default();
        if !label_selector.is_empty() {
            params = params.labels(label_selector);
        }
        if !field_selector.is_empty() {
            params = params.fields(field_selector);
        }

        let list = self
            .pods(namespace)
            .list(&params)
            .await
            .map_err(|e| RuntimeError::kube("list pods", e))?;
        Ok(list.items)
    }

    async fn delete_pod(&self, namespace: &str, name: &str, uid: Option<&str>) -> Result<()> {
        debug!("DELETE pod {}/{}", namespace, name);

        let params = DeleteParams {
            preconditions: uid.map(|uid| Preconditions {
                uid: Some(uid.to_string()),
                resource_version: None,
            }),
            ..Default::default()
        };

        self.pods(namespace)
            .delete(name, &params)
            .await
            .map_err(|e| RuntimeError::kube("delete pod", e))?;
        Ok(())
    }
}
