use crate::error::Result;
use crate::queue::WorkQueue;
use crate::traits::{PodCache, PodEventHandler};
use futures_util::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::runtime::reflector::{self, ObjectRef, Store};
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, Client};
use speakerfix_core::{PodKey, PodScope};
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

impl PodCache for Store<Pod> {
    fn get(&self, key: &PodKey) -> Option<Arc<Pod>> {
        let mut obj_ref = ObjectRef::new(&key.name);
        if !key.namespace.is_empty() {
            obj_ref = obj_ref.within(&key.namespace);
        }
        Store::get(self, &obj_ref)
    }
}

/// Event handler that turns every add/update into a queued reconcile key
pub struct EnqueueHandler {
    queue: WorkQueue<PodKey>,
}

impl EnqueueHandler {
    pub fn new(queue: WorkQueue<PodKey>) -> Self {
        Self { queue }
    }

    fn enqueue(&self, pod: &Pod) {
        match PodKey::from_pod(pod) {
            Ok(key) => self.queue.add(key),
            Err(e) => warn!("Dropping pod event without a usable key: {}", e),
        }
    }
}

impl PodEventHandler for EnqueueHandler {
    fn on_add(&self, pod: &Pod) {
        self.enqueue(pod);
    }

    fn on_update(&self, pod: &Pod) {
        self.enqueue(pod);
    }
}

/// Translates raw watcher events into add/update callbacks
///
/// A key seen for the first time is an add, a known key is an update. The
/// reflector only publishes (re-)listed objects to its store at `InitDone`,
/// so those are held back and announced after the swap. The re-list then
/// replaces the known set, so objects that vanished while the watch was down
/// are forgotten.
#[derive(Debug, Default)]
pub struct EventDispatcher {
    known: HashSet<PodKey>,
    relisted: Vec<(PodKey, Pod)>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dispatch(&mut self, event: &watcher::Event<Pod>, handler: &dyn PodEventHandler) {
        match event {
            watcher::Event::Init => {
                debug!("Pod watch (re)list started");
                self.relisted.clear();
            }
            watcher::Event::InitApply(pod) => {
                if let Some(key) = key_of(pod) {
                    self.relisted.push((key, pod.clone()));
                }
            }
            watcher::Event::InitDone => {
                debug!("Pod watch list complete ({} pods)", self.relisted.len());
                let previous = std::mem::take(&mut self.known);
                for (key, pod) in std::mem::take(&mut self.relisted) {
                    if previous.contains(&key) {
                        handler.on_update(&pod);
                    } else {
                        handler.on_add(&pod);
                    }
                    self.known.insert(key);
                }
            }
            watcher::Event::Apply(pod) => {
                if let Some(key) = key_of(pod) {
                    if self.known.insert(key) {
                        handler.on_add(pod);
                    } else {
                        handler.on_update(pod);
                    }
                }
            }
            watcher::Event::Delete(pod) => {
                if let Some(key) = key_of(pod) {
                    debug!("Pod {} deleted", key);
                    self.known.remove(&key);
                    self.relisted.retain(|(k, _)| k != &key);
                }
            }
        }
    }

    pub fn is_known(&self, key: &PodKey) -> bool {
        self.known.contains(key)
    }
}

fn key_of(pod: &Pod) -> Option<PodKey> {
    match PodKey::from_pod(pod) {
        Ok(key) => Some(key),
        Err(e) => {
            warn!("Ignoring pod event: {}", e);
            None
        }
    }
}

/// Configuration for the pod watch
#[derive(Debug, Clone)]
pub struct PodWatcherConfig {
    /// Namespace to watch
    pub namespace: String,
    /// Workload scope; a name scope narrows the watch itself
    pub scope: PodScope,
}

impl PodWatcherConfig {
    fn watcher_config(&self) -> watcher::Config {
        let config = watcher::Config::default();
        match self.scope.field_selector() {
            Some(fields) => config.fields(&fields),
            None => config,
        }
    }
}

/// Keeps a reflector store of pods in sync and feeds changes to a handler
pub struct PodWatcher {
    api: Api<Pod>,
    config: PodWatcherConfig,
    store: Store<Pod>,
    writer: reflector::store::Writer<Pod>,
}

impl PodWatcher {
    pub fn new(client: Client, config: PodWatcherConfig) -> Self {
        let api = Api::namespaced(client, &config.namespace);
        let (store, writer) = reflector::store();
        Self {
            api,
            config,
            store,
            writer,
        }
    }

    /// Read handle onto the cache this watcher maintains
    pub fn store(&self) -> Store<Pod> {
        self.store.clone()
    }

    /// Drive the watch until cancelled
    ///
    /// The handler only fires once the store holds the event's object, so a
    /// reconcile triggered by an event always sees at least that state.
    pub async fn run(
        self,
        handler: Arc<dyn PodEventHandler>,
        token: CancellationToken,
    ) -> Result<()> {
        info!(
            "Starting pod watch in namespace '{}' ({})",
            self.config.namespace, self.config.scope
        );

        let stream = reflector::reflector(
            self.writer,
            watcher(self.api, self.config.watcher_config()).default_backoff(),
        );
        let mut stream = std::pin::pin!(stream);
        let mut dispatcher = EventDispatcher::new();

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("Pod watch shutting down");
                    return Ok(());
                }
                next = stream.next() => match next {
                    Some(Ok(event)) => dispatcher.dispatch(&event, handler.as_ref()),
                    Some(Err(e)) => {
                        // The watcher re-lists after backoff on its own
                        warn!("Pod watch error: {}", e);
                    }
                    None => {
                        warn!("Pod watch stream ended");
                        return Ok(());
                    }
                }
            }
        }
    }
}
