use crate::error::{Result, RuntimeError};
use crate::traits::{ClusterClient, PodCache};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{Pod, PodCondition, PodSpec, PodStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use parking_lot::RwLock;
use speakerfix_core::PodKey;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Default)]
struct MockState {
    pods: BTreeMap<PodKey, Arc<Pod>>,
    list_calls: usize,
    deletions: Vec<PodKey>,
    next_uid: u64,
    fail_lists: bool,
    fail_deletes: bool,
    /// Creation time handed to pods recreated after a delete
    recreate_at: Option<DateTime<Utc>>,
}

/// In-memory cluster for tests and local development
///
/// Serves both as the API (`ClusterClient`) and the watch cache (`PodCache`).
/// When a recreate time is set, deleting a pod mimics a daemon controller:
/// a replacement with the same labels and node appears with that creation
/// timestamp and a fresh uid.
#[derive(Clone, Default)]
pub struct MockCluster {
    state: Arc<RwLock<MockState>>,
}

impl MockCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a pod, assigning a uid if it has none
    pub fn insert(&self, mut pod: Pod) -> PodKey {
        let key = PodKey::new(
            pod.metadata.namespace.clone().unwrap_or_default(),
            pod.metadata.name.clone().unwrap_or_default(),
        );
        let mut state = self.state.write();
        if pod.metadata.uid.is_none() {
            state.next_uid += 1;
            pod.metadata.uid = Some(format!("mock-uid-{}", state.next_uid));
        }
        state.pods.insert(key.clone(), Arc::new(pod));
        key
    }

    pub fn remove(&self, key: &PodKey) -> Option<Arc<Pod>> {
        self.state.write().pods.remove(key)
    }

    /// Recreate deleted pods with the given creation timestamp
    pub fn recreate_deleted_at(&self, at: DateTime<Utc>) {
        self.state.write().recreate_at = Some(at);
    }

    pub fn fail_lists(&self, fail: bool) {
        self.state.write().fail_lists = fail;
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.state.write().fail_deletes = fail;
    }

    pub fn list_calls(&self) -> usize {
        self.state.read().list_calls
    }

    pub fn deletions(&self) -> Vec<PodKey> {
        self.state.read().deletions.clone()
    }

    pub fn pods_in(&self, namespace: &str) -> Vec<Arc<Pod>> {
        self.state
            .read()
            .pods
            .iter()
            .filter(|(k, _)| k.namespace == namespace)
            .map(|(_, p)| p.clone())
            .collect()
    }
}

impl PodCache for MockCluster {
    fn get(&self, key: &PodKey) -> Option<Arc<Pod>> {
        self.state.read().pods.get(key).cloned()
    }
}

#[async_trait]
impl ClusterClient for MockCluster {
    async fn list_pods(
        &self,
        namespace: &str,
        label_selector: &str,
        field_selector: &str,
    ) -> Result<Vec<Pod>> {
        let mut state = self.state.write();
        state.list_calls += 1;
        if state.fail_lists {
            return Err(RuntimeError::internal_error("Mock: list failure injected"));
        }

        let labels = parse_selector(label_selector);
        let fields = parse_selector(field_selector);

        let pods: Vec<Pod> = state
            .pods
            .iter()
            .filter(|(k, _)| k.namespace == namespace)
            .map(|(_, p)| p.as_ref())
            .filter(|p| matches_labels(p, &labels) && matches_fields(p, &fields))
            .cloned()
            .collect();
        debug!(
            "Mock: listed {} pods in {} ({} / {})",
            pods.len(),
            namespace,
            label_selector,
            field_selector
        );
        Ok(pods)
    }

    async fn delete_pod(&self, namespace: &str, name: &str, uid: Option<&str>) -> Result<()> {
        let key = PodKey::new(namespace, name);
        let mut state = self.state.write();
        if state.fail_deletes {
            return Err(RuntimeError::speaker_delete_failed(
                key.to_string(),
                "Mock: delete failure injected",
            ));
        }

        let existing = match state.pods.get(&key) {
            Some(p) => p.clone(),
            None => {
                return Err(RuntimeError::kube(
                    "delete pod",
                    kube::Error::Api(kube::core::ErrorResponse {
                        status: "Failure".to_string(),
                        message: format!("pods \"{}\" not found", name),
                        reason: "NotFound".to_string(),
                        code: 404,
                    }),
                ))
            }
        };

        if let Some(uid) = uid {
            if existing.metadata.uid.as_deref() != Some(uid) {
                return Err(RuntimeError::speaker_delete_failed(
                    key.to_string(),
                    "Mock: uid precondition failed",
                ));
            }
        }

        state.pods.remove(&key);
        state.deletions.push(key.clone());
        debug!("Mock: pod deleted: {}", key);

        if let Some(at) = state.recreate_at {
            state.next_uid += 1;
            let mut replacement = existing.as_ref().clone();
            let name = format!("{}-r{}", name, state.next_uid);
            replacement.metadata.name = Some(name.clone());
            replacement.metadata.uid = Some(format!("mock-uid-{}", state.next_uid));
            replacement.metadata.creation_timestamp = Some(Time(at));
            state
                .pods
                .insert(PodKey::new(namespace, name), Arc::new(replacement));
        }

        Ok(())
    }
}

/// Parse `a=b,c=d` into pairs; `==` is accepted as equality
fn parse_selector(selector: &str) -> Vec<(String, String)> {
    selector
        .split(',')
        .filter(|s| !s.trim().is_empty())
        .filter_map(|term| {
            let (k, v) = term.split_once('=')?;
            Some((
                k.trim().to_string(),
                v.trim_start_matches('=').trim().to_string(),
            ))
        })
        .collect()
}

fn matches_labels(pod: &Pod, terms: &[(String, String)]) -> bool {
    let labels = pod.metadata.labels.clone().unwrap_or_default();
    terms
        .iter()
        .all(|(k, v)| labels.get(k).map(String::as_str) == Some(v.as_str()))
}

fn matches_fields(pod: &Pod, terms: &[(String, String)]) -> bool {
    terms.iter().all(|(field, value)| {
        let actual = match field.as_str() {
            "spec.nodeName" => pod.spec.as_ref().and_then(|s| s.node_name.clone()),
            "metadata.name" => pod.metadata.name.clone(),
            "metadata.namespace" => pod.metadata.namespace.clone(),
            _ => None,
        };
        actual.as_deref().unwrap_or("") == value
    })
}

/// Build a workload pod, optionally ready since `ready_at`
pub fn make_workload_pod(
    namespace: &str,
    name: &str,
    labels: &[(&str, &str)],
    node_name: Option<&str>,
    ready_at: Option<DateTime<Utc>>,
) -> Pod {
    let mut pod = Pod::default();
    pod.metadata.name = Some(name.to_string());
    pod.metadata.namespace = Some(namespace.to_string());
    pod.metadata.labels = Some(
        labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    );
    pod.spec = Some(PodSpec {
        node_name: node_name.map(str::to_string),
        ..Default::default()
    });
    pod.status = Some(PodStatus {
        conditions: ready_at.map(|at| {
            vec![PodCondition {
                type_: "Ready".to_string(),
                status: "True".to_string(),
                last_transition_time: Some(Time(at)),
                ..Default::default()
            }]
        }),
        ..Default::default()
    });
    pod
}

/// Build a speaker pod on `node_name` created at `created_at`
pub fn make_speaker_pod(
    namespace: &str,
    name: &str,
    labels: &[(&str, &str)],
    node_name: &str,
    created_at: DateTime<Utc>,
) -> Pod {
    let mut pod = Pod::default();
    pod.metadata.name = Some(name.to_string());
    pod.metadata.namespace = Some(namespace.to_string());
    pod.metadata.labels = Some(
        labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    );
    pod.metadata.creation_timestamp = Some(Time(created_at));
    pod.spec = Some(PodSpec {
        node_name: Some(node_name.to_string()),
        ..Default::default()
    });
    pod
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    const SPEAKER_LABELS: &[(&str, &str)] = &[("app", "metallb"), ("component", "speaker")];

    #[tokio::test]
    async fn test_list_filters_by_label_and_node() {
        let cluster = MockCluster::new();
        cluster.insert(make_speaker_pod("kube-system", "speaker-a", SPEAKER_LABELS, "n1", ts(1)));
        cluster.insert(make_speaker_pod("kube-system", "speaker-b", SPEAKER_LABELS, "n2", ts(1)));
        cluster.insert(make_speaker_pod(
            "kube-system",
            "controller",
            &[("app", "metallb"), ("component", "controller")],
            "n1",
            ts(1),
        ));

        let pods = cluster
            .list_pods("kube-system", "app=metallb,component=speaker", "spec.nodeName=n1")
            .await
            .unwrap();
        assert_eq!(pods.len(), 1);
        assert_eq!(pods[0].metadata.name.as_deref(), Some("speaker-a"));
        assert_eq!(cluster.list_calls(), 1);
    }

    #[tokio::test]
    async fn test_delete_missing_pod_is_not_found() {
        let cluster = MockCluster::new();
        let err = cluster.delete_pod("kube-system", "ghost", None).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_delete_checks_uid_and_recreates() {
        let cluster = MockCluster::new();
        let key = cluster.insert(make_speaker_pod(
            "kube-system",
            "speaker-a",
            SPEAKER_LABELS,
            "n1",
            ts(90),
        ));
        let uid = cluster.get(&key).unwrap().metadata.uid.clone().unwrap();

        assert!(cluster
            .delete_pod("kube-system", "speaker-a", Some("other-uid"))
            .await
            .is_err());

        cluster.recreate_deleted_at(ts(200));
        cluster
            .delete_pod("kube-system", "speaker-a", Some(&uid))
            .await
            .unwrap();

        assert_eq!(cluster.deletions(), vec![key.clone()]);
        assert!(cluster.get(&key).is_none());
        let remaining = cluster.pods_in("kube-system");
        assert_eq!(remaining.len(), 1);
        assert_eq!(
            remaining[0].metadata.creation_timestamp,
            Some(Time(ts(200)))
        );
        assert_ne!(remaining[0].metadata.uid.as_deref(), Some(uid.as_str()));
    }
}
