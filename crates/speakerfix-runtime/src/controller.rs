use crate::error::Result;
use crate::queue::WorkQueue;
use crate::speaker::{SpeakerLookup, SpeakerSelector};
use crate::traits::{ClusterClient, PodCache};
use speakerfix_core::{needs_repair, PodKey, PodScope, WorkloadPod};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Configuration for the repair controller
#[derive(Debug, Clone)]
pub struct RepairControllerConfig {
    /// Which workload pods are repaired
    pub scope: PodScope,
    /// How to find the speaker pods
    pub speaker: SpeakerSelector,
    /// Log repairs instead of deleting speakers
    pub dry_run: bool,
}

/// Which branch a single reconcile took
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Pod is not in the cache (deleted before processing)
    NotFound,
    /// Pod does not match the configured scope
    OutOfScope,
    /// Pod has not become ready
    NotReady,
    /// Pod is not bound to a node
    Unscheduled,
    /// No unique speaker on the pod's node
    NoSpeaker,
    /// Speaker started at or after the readiness transition
    SpeakerCurrent,
    /// Stale speaker deleted
    Repaired,
    /// Stale speaker found, delete skipped in dry-run mode
    DryRun,
    /// Stale speaker found, delete failed
    RepairFailed,
}

impl fmt::Display for ReconcileOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotFound => "not-found",
            Self::OutOfScope => "out-of-scope",
            Self::NotReady => "not-ready",
            Self::Unscheduled => "unscheduled",
            Self::NoSpeaker => "no-speaker",
            Self::SpeakerCurrent => "speaker-current",
            Self::Repaired => "repaired",
            Self::DryRun => "dry-run",
            Self::RepairFailed => "repair-failed",
        };
        write!(f, "{}", s)
    }
}

/// Restarts speaker pods that started before the workload they announce became ready
pub struct RepairController {
    cache: Arc<dyn PodCache>,
    queue: WorkQueue<PodKey>,
    speakers: SpeakerLookup,
    config: RepairControllerConfig,
}

impl RepairController {
    pub fn new(
        cache: Arc<dyn PodCache>,
        client: Arc<dyn ClusterClient>,
        queue: WorkQueue<PodKey>,
        config: RepairControllerConfig,
    ) -> Self {
        let speakers = SpeakerLookup::new(client, config.speaker.clone());
        Self {
            cache,
            queue,
            speakers,
            config,
        }
    }

    /// Consume the queue until it is shut down
    ///
    /// Cancelling `token` shuts the queue down; keys already queued are still
    /// processed before this returns.
    pub async fn run(&self, token: CancellationToken) -> Result<()> {
        info!(
            "Starting repair controller for pods with {} (speakers: {} in {})",
            self.config.scope,
            self.config.speaker.label_selector(),
            self.config.speaker.namespace
        );

        let queue = self.queue.clone();
        let watchdog = tokio::spawn(async move {
            token.cancelled().await;
            queue.shut_down();
        });

        while self.process_next_item().await {}

        watchdog.abort();
        info!("Repair controller stopped");
        Ok(())
    }

    /// Handle one queued key. Returns `false` once the queue is shut down.
    pub async fn process_next_item(&self) -> bool {
        let key = match self.queue.get().await {
            Some(k) => k,
            None => return false,
        };

        let outcome = self.reconcile(&key).await;
        debug!("Reconciled {}: {}", key, outcome);

        // Retries come from fresh pod events, never from queue backoff
        self.queue.forget(&key);
        self.queue.done(&key);
        true
    }

    /// Reconcile a single workload pod against the speaker on its node
    pub async fn reconcile(&self, key: &PodKey) -> ReconcileOutcome {
        let pod = match self.cache.get(key) {
            Some(p) => p,
            None => {
                debug!("Pod {} no longer exists", key);
                return ReconcileOutcome::NotFound;
            }
        };

        let workload = match WorkloadPod::from_pod(&pod) {
            Ok(w) => w,
            Err(e) => {
                warn!("Skipping pod {}: {}", key, e);
                return ReconcileOutcome::NotFound;
            }
        };

        if !self.config.scope.matches(&workload) {
            return ReconcileOutcome::OutOfScope;
        }

        let ready_at = match workload.ready_transition_time {
            Some(t) => t,
            None => {
                debug!("Pod {} is not ready yet", key);
                return ReconcileOutcome::NotReady;
            }
        };

        let node_name = match workload.node_name.as_deref() {
            Some(n) => n,
            None => {
                debug!("Pod {} is not scheduled yet", key);
                return ReconcileOutcome::Unscheduled;
            }
        };

        let speaker = match self.speakers.find_speaker(node_name).await {
            Some(s) => s,
            None => return ReconcileOutcome::NoSpeaker,
        };

        if !needs_repair(Some(ready_at), speaker.creation_timestamp) {
            info!(
                "Pod {} became ready at {}, at or before speaker {} started at {}, nothing to do",
                key, ready_at, speaker.key, speaker.creation_timestamp
            );
            return ReconcileOutcome::SpeakerCurrent;
        }

        if self.config.dry_run {
            warn!(
                "Dry run: speaker {} (started {}) predates readiness of {} ({}), not deleting",
                speaker.key, speaker.creation_timestamp, key, ready_at
            );
            return ReconcileOutcome::DryRun;
        }

        info!(
            "Speaker {} started at {} before pod {} became ready at {}, restarting it",
            speaker.key, speaker.creation_timestamp, key, ready_at
        );

        match self.speakers.delete_speaker(&speaker).await {
            Ok(()) => {
                info!("Deleted speaker pod {} on node {}", speaker.key, node_name);
                ReconcileOutcome::Repaired
            }
            Err(e) => {
                error!("Failed to delete speaker pod {}: {}", speaker.key, e);
                ReconcileOutcome::RepairFailed
            }
        }
    }
}
