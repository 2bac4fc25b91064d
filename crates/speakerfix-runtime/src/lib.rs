// Allow unused assignments for diagnostic fields - they're used by the thiserror/miette macros
#![allow(unused_assignments)]

pub mod api_client;
pub mod controller;
pub mod error;
pub mod mock;
pub mod queue;
pub mod speaker;
pub mod traits;
pub mod watch;

// Re-export primary types
pub use error::{Result, RuntimeError};
pub use mock::MockCluster;
pub use queue::{RateLimiterConfig, WorkQueue};
pub use traits::{ClusterClient, PodCache, PodEventHandler};

// Re-export controller and watch types
pub use api_client::ApiClient;
pub use controller::{ReconcileOutcome, RepairController, RepairControllerConfig};
pub use speaker::{SpeakerLookup, SpeakerSelector};
pub use watch::{EnqueueHandler, EventDispatcher, PodWatcher, PodWatcherConfig};
