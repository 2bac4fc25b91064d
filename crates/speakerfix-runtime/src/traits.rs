use crate::error::Result;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use speakerfix_core::PodKey;
use std::sync::Arc;

/// Trait for the cluster operations the controller performs
///
/// Abstracts the Kubernetes API so the reconcile loop can be exercised against
/// `MockCluster` in tests. Implementations issue one request per call and do
/// not retry.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// List pods in `namespace` matching a label selector and a field selector
    async fn list_pods(
        &self,
        namespace: &str,
        label_selector: &str,
        field_selector: &str,
    ) -> Result<Vec<Pod>>;

    /// Delete exactly the pod `namespace/name`, optionally guarded by its uid
    async fn delete_pod(&self, namespace: &str, name: &str, uid: Option<&str>) -> Result<()>;
}

/// Read access to the locally cached pod state
pub trait PodCache: Send + Sync {
    /// Latest observed state of the pod, or `None` if never seen or deleted
    fn get(&self, key: &PodKey) -> Option<Arc<Pod>>;
}

/// Receives pod add/update notifications from the watch
pub trait PodEventHandler: Send + Sync {
    fn on_add(&self, pod: &Pod);

    fn on_update(&self, pod: &Pod);
}
