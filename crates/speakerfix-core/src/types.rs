use crate::error::{CoreError, Result};
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Pod;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Pod condition type reporting readiness
pub const POD_READY: &str = "Ready";
/// Condition status value for a satisfied condition
pub const CONDITION_TRUE: &str = "True";

/// PodKey uniquely identifies a pod for dedup and cache lookups
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PodKey {
    /// Namespace (empty for cluster-scoped objects)
    pub namespace: String,
    /// Object name
    pub name: String,
}

impl PodKey {
    /// Create a new PodKey
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Build the key of a pod from its metadata
    pub fn from_pod(pod: &Pod) -> Result<Self> {
        let name = pod
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| CoreError::missing_metadata("metadata.name"))?;
        let namespace = pod.metadata.namespace.clone().unwrap_or_default();
        Ok(Self::new(namespace, name))
    }
}

impl fmt::Display for PodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}/{}", self.namespace, self.name)
        }
    }
}

impl FromStr for PodKey {
    type Err = CoreError;

    /// Parse `namespace/name` or a bare `name`
    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split('/').collect();
        let (namespace, name) = match parts.as_slice() {
            [name] => ("", *name),
            [namespace, name] => (*namespace, *name),
            _ => return Err(CoreError::invalid_pod_key(s)),
        };
        if name.is_empty() {
            return Err(CoreError::invalid_pod_key(s));
        }
        Ok(Self::new(namespace, name))
    }
}

/// The monitored application pod, reduced to the fields the repair decision needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadPod {
    pub key: PodKey,
    pub labels: BTreeMap<String, String>,
    /// Node the pod is bound to; `None` until scheduled
    pub node_name: Option<String>,
    /// When the Ready condition became true; `None` if the pod is not ready
    pub ready_transition_time: Option<DateTime<Utc>>,
}

impl WorkloadPod {
    pub fn from_pod(pod: &Pod) -> Result<Self> {
        Ok(Self {
            key: PodKey::from_pod(pod)?,
            labels: pod.metadata.labels.clone().unwrap_or_default(),
            node_name: pod
                .spec
                .as_ref()
                .and_then(|s| s.node_name.clone())
                .filter(|n| !n.is_empty()),
            ready_transition_time: ready_transition_time(pod),
        })
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }
}

/// Transition time of the first `Ready=True` condition, if any
pub fn ready_transition_time(pod: &Pod) -> Option<DateTime<Utc>> {
    pod.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())?
        .iter()
        .find(|c| c.type_ == POD_READY && c.status == CONDITION_TRUE)
        .and_then(|c| c.last_transition_time.as_ref())
        .map(|t| t.0)
}

/// The per-node announcement agent pod
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeakerPod {
    pub key: PodKey,
    pub node_name: Option<String>,
    pub creation_timestamp: DateTime<Utc>,
    /// Object uid, used as a delete precondition when known
    pub uid: Option<String>,
}

impl SpeakerPod {
    pub fn from_pod(pod: &Pod) -> Result<Self> {
        let creation_timestamp = pod
            .metadata
            .creation_timestamp
            .as_ref()
            .map(|t| t.0)
            .ok_or_else(|| CoreError::missing_metadata("metadata.creationTimestamp"))?;

        Ok(Self {
            key: PodKey::from_pod(pod)?,
            node_name: pod.spec.as_ref().and_then(|s| s.node_name.clone()),
            creation_timestamp,
            uid: pod.metadata.uid.clone(),
        })
    }
}

/// Which workload pods are in scope for repair
///
/// `ByLabel` watches the whole namespace and filters on a label after fetch.
/// `ByName` narrows the watch itself to one object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PodScope {
    ByLabel { key: String, value: String },
    ByName(String),
}

impl PodScope {
    /// Scope by the conventional `app` label
    pub fn app_label(value: impl Into<String>) -> Self {
        Self::ByLabel {
            key: "app".to_string(),
            value: value.into(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Self::ByLabel { key, value } => {
                if key.is_empty() {
                    return Err(CoreError::invalid_config(
                        "application label key is empty",
                        "Set --app-label-key (defaults to 'app')",
                    ));
                }
                if value.is_empty() {
                    return Err(CoreError::invalid_config(
                        "application label value is empty",
                        "Set --app-label or APP_LABEL to the value of the workload's label",
                    ));
                }
            }
            Self::ByName(name) => {
                if name.is_empty() {
                    return Err(CoreError::invalid_config(
                        "watched pod name is empty",
                        "Set --pod-name or WATCH_POD_NAME to the workload pod's name",
                    ));
                }
            }
        }
        Ok(())
    }

    pub fn matches(&self, pod: &WorkloadPod) -> bool {
        match self {
            Self::ByLabel { key, value } => pod.label(key) == Some(value.as_str()),
            Self::ByName(name) => pod.key.name == *name,
        }
    }

    /// Field selector to narrow the watch with, if this scope filters at the source
    pub fn field_selector(&self) -> Option<String> {
        match self {
            Self::ByLabel { .. } => None,
            Self::ByName(name) => Some(format!("metadata.name={}", name)),
        }
    }
}

impl fmt::Display for PodScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ByLabel { key, value } => write!(f, "label {}={}", key, value),
            Self::ByName(name) => write!(f, "name {}", name),
        }
    }
}
