use crate::error::Result;
use crate::traits::ClusterClient;
use speakerfix_core::SpeakerPod;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Identifies speaker pods in the cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeakerSelector {
    /// Namespace the speaker daemon runs in
    pub namespace: String,
    /// Value of the speaker's `app` label
    pub app: String,
    /// Value of the speaker's `component` label
    pub component: String,
}

impl Default for SpeakerSelector {
    fn default() -> Self {
        Self {
            namespace: "kube-system".to_string(),
            app: "metallb".to_string(),
            component: "speaker".to_string(),
        }
    }
}

impl SpeakerSelector {
    pub fn label_selector(&self) -> String {
        format!("app={},component={}", self.app, self.component)
    }

    pub fn node_field_selector(node_name: &str) -> String {
        format!("spec.nodeName={}", node_name)
    }
}

/// Finds and restarts the speaker pod on a node
pub struct SpeakerLookup {
    client: Arc<dyn ClusterClient>,
    selector: SpeakerSelector,
}

impl SpeakerLookup {
    pub fn new(client: Arc<dyn ClusterClient>, selector: SpeakerSelector) -> Self {
        Self { client, selector }
    }

    /// The unique speaker scheduled on `node_name`
    ///
    /// Zero or several matches mean the daemon is mid-rollout on that node;
    /// both report `None` and a later event retries.
    pub async fn find_speaker(&self, node_name: &str) -> Option<SpeakerPod> {
        debug!("Fetching speaker pod from node {}", node_name);

        let pods = match self
            .client
            .list_pods(
                &self.selector.namespace,
                &self.selector.label_selector(),
                &SpeakerSelector::node_field_selector(node_name),
            )
            .await
        {
            Ok(pods) => pods,
            Err(e) => {
                error!("Failed to list speaker pods on node {}: {}", node_name, e);
                return None;
            }
        };

        match pods.as_slice() {
            [pod] => match SpeakerPod::from_pod(pod) {
                Ok(speaker) => Some(speaker),
                Err(e) => {
                    warn!("Ignoring speaker pod on node {}: {}", node_name, e);
                    None
                }
            },
            [] => {
                info!("No speaker pod found on node {}", node_name);
                None
            }
            many => {
                let names: Vec<&str> = many
                    .iter()
                    .filter_map(|p| p.metadata.name.as_deref())
                    .collect();
                warn!(
                    "Found {} speaker pods on node {}: {:?}",
                    many.len(),
                    node_name,
                    names
                );
                None
            }
        }
    }

    /// Delete exactly this speaker so its daemon controller recreates it
    ///
    /// An already-deleted speaker counts as success.
    pub async fn delete_speaker(&self, speaker: &SpeakerPod) -> Result<()> {
        match self
            .client
            .delete_pod(
                &speaker.key.namespace,
                &speaker.key.name,
                speaker.uid.as_deref(),
            )
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => {
                debug!("Speaker pod {} already gone", speaker.key);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{make_speaker_pod, MockCluster};
    use chrono::{DateTime, TimeZone, Utc};
    use speakerfix_core::PodKey;

    const SPEAKER_LABELS: &[(&str, &str)] = &[("app", "metallb"), ("component", "speaker")];

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn lookup(cluster: &MockCluster) -> SpeakerLookup {
        SpeakerLookup::new(Arc::new(cluster.clone()), SpeakerSelector::default())
    }

    #[test]
    fn test_default_selectors() {
        let selector = SpeakerSelector::default();
        assert_eq!(selector.namespace, "kube-system");
        assert_eq!(selector.label_selector(), "app=metallb,component=speaker");
        assert_eq!(
            SpeakerSelector::node_field_selector("n1"),
            "spec.nodeName=n1"
        );
    }

    #[tokio::test]
    async fn test_single_speaker_is_found() {
        let cluster = MockCluster::new();
        cluster.insert(make_speaker_pod("kube-system", "speaker-a", SPEAKER_LABELS, "n1", ts(90)));
        cluster.insert(make_speaker_pod("kube-system", "speaker-b", SPEAKER_LABELS, "n2", ts(95)));

        let speaker = lookup(&cluster).find_speaker("n1").await.unwrap();
        assert_eq!(speaker.key, PodKey::new("kube-system", "speaker-a"));
        assert_eq!(speaker.creation_timestamp, ts(90));
    }

    #[tokio::test]
    async fn test_no_speaker_on_node() {
        let cluster = MockCluster::new();
        cluster.insert(make_speaker_pod("kube-system", "speaker-b", SPEAKER_LABELS, "n2", ts(95)));

        assert!(lookup(&cluster).find_speaker("n1").await.is_none());
    }

    #[tokio::test]
    async fn test_ambiguous_speakers_report_none() {
        let cluster = MockCluster::new();
        cluster.insert(make_speaker_pod("kube-system", "speaker-a", SPEAKER_LABELS, "n1", ts(90)));
        cluster.insert(make_speaker_pod("kube-system", "speaker-c", SPEAKER_LABELS, "n1", ts(91)));

        assert!(lookup(&cluster).find_speaker("n1").await.is_none());
    }

    #[tokio::test]
    async fn test_speaker_in_other_namespace_is_ignored() {
        let cluster = MockCluster::new();
        cluster.insert(make_speaker_pod(
            "metallb-system",
            "speaker-a",
            SPEAKER_LABELS,
            "n1",
            ts(90),
        ));

        assert!(lookup(&cluster).find_speaker("n1").await.is_none());

        let custom = SpeakerLookup::new(
            Arc::new(cluster.clone()),
            SpeakerSelector {
                namespace: "metallb-system".to_string(),
                ..Default::default()
            },
        );
        assert!(custom.find_speaker("n1").await.is_some());
    }

    #[tokio::test]
    async fn test_list_failure_reports_none() {
        let cluster = MockCluster::new();
        cluster.insert(make_speaker_pod("kube-system", "speaker-a", SPEAKER_LABELS, "n1", ts(90)));
        cluster.fail_lists(true);

        assert!(lookup(&cluster).find_speaker("n1").await.is_none());
    }

    #[tokio::test]
    async fn test_delete_speaker_tolerates_missing_pod() {
        let cluster = MockCluster::new();
        let key = cluster.insert(make_speaker_pod(
            "kube-system",
            "speaker-a",
            SPEAKER_LABELS,
            "n1",
            ts(90),
        ));
        let lookup = lookup(&cluster);
        let speaker = lookup.find_speaker("n1").await.unwrap();

        cluster.remove(&key);
        assert!(lookup.delete_speaker(&speaker).await.is_ok());
        assert!(cluster.deletions().is_empty());
    }

    #[tokio::test]
    async fn test_delete_speaker_propagates_failures() {
        let cluster = MockCluster::new();
        cluster.insert(make_speaker_pod("kube-system", "speaker-a", SPEAKER_LABELS, "n1", ts(90)));
        let lookup = lookup(&cluster);
        let speaker = lookup.find_speaker("n1").await.unwrap();

        cluster.fail_deletes(true);
        assert!(lookup.delete_speaker(&speaker).await.is_err());
    }
}
