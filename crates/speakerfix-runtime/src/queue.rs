use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::trace;

/// Per-item exponential backoff settings for `add_rate_limited`
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Delay after the first failure
    pub base_delay: Duration,
    /// Upper bound on any single delay
    pub max_delay: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_secs(1000),
        }
    }
}

impl RateLimiterConfig {
    /// Delay for an item that has already failed `failures` times
    pub fn delay_for(&self, failures: u32) -> Duration {
        // 2^31 * base already dwarfs any sane max
        let factor = 1u32.checked_shl(failures.min(31)).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }
}

#[derive(Debug)]
struct QueueState<K> {
    /// Keys ready to be handed out, in arrival order
    queue: VecDeque<K>,
    /// Keys that need processing: everything in `queue`, plus in-flight keys re-added
    dirty: HashSet<K>,
    /// Keys handed out and not yet marked done
    processing: HashSet<K>,
    failures: HashMap<K, u32>,
    shutting_down: bool,
}

struct Shared<K> {
    state: Mutex<QueueState<K>>,
    notify: Notify,
    limiter: RateLimiterConfig,
}

/// Deduplicating FIFO work queue with in-flight tracking
///
/// A key is queued at most once while pending. A key that is re-added while
/// it is being processed is held back and queued again once `done` is called,
/// so no key is ever processed concurrently with itself. Handles are cheap to
/// clone and may be shared between producers and the consumer.
pub struct WorkQueue<K> {
    shared: Arc<Shared<K>>,
}

impl<K> Clone for WorkQueue<K> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<K> Default for WorkQueue<K>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new(RateLimiterConfig::default())
    }
}

impl<K> WorkQueue<K>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
{
    pub fn new(limiter: RateLimiterConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(QueueState {
                    queue: VecDeque::new(),
                    dirty: HashSet::new(),
                    processing: HashSet::new(),
                    failures: HashMap::new(),
                    shutting_down: false,
                }),
                notify: Notify::new(),
                limiter,
            }),
        }
    }

    /// Mark `key` as needing processing
    pub fn add(&self, key: K) {
        let mut state = self.shared.state.lock();
        if state.shutting_down || state.dirty.contains(&key) {
            return;
        }
        state.dirty.insert(key.clone());
        if state.processing.contains(&key) {
            return;
        }
        state.queue.push_back(key);
        drop(state);
        self.shared.notify.notify_one();
    }

    /// Wait for the next key. Returns `None` once the queue is shut down and drained.
    pub async fn get(&self) -> Option<K> {
        loop {
            let notified = self.shared.notify.notified();
            {
                let mut state = self.shared.state.lock();
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
                if state.shutting_down {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Mark processing of `key` finished, requeueing it if it was re-added meanwhile
    pub fn done(&self, key: &K) {
        let mut state = self.shared.state.lock();
        state.processing.remove(key);
        if state.dirty.contains(key) {
            state.queue.push_back(key.clone());
            drop(state);
            self.shared.notify.notify_one();
        }
    }

    /// Reset the backoff history of `key`
    pub fn forget(&self, key: &K) {
        self.shared.state.lock().failures.remove(key);
    }

    /// Number of times `key` has been requeued through `add_rate_limited`
    pub fn num_requeues(&self, key: &K) -> u32 {
        self.shared
            .state
            .lock()
            .failures
            .get(key)
            .copied()
            .unwrap_or(0)
    }

    /// Add `key` after its per-item backoff delay, recording one more failure
    pub fn add_rate_limited(&self, key: K) {
        let delay = {
            let mut state = self.shared.state.lock();
            let failures = state.failures.entry(key.clone()).or_insert(0);
            let delay = self.shared.limiter.delay_for(*failures);
            *failures = failures.saturating_add(1);
            delay
        };
        self.add_after(key, delay);
    }

    /// Add `key` once `delay` has elapsed
    pub fn add_after(&self, key: K, delay: Duration) {
        if self.is_shutting_down() {
            return;
        }
        if delay.is_zero() {
            self.add(key);
            return;
        }
        trace!("Requeueing item after {:?}", delay);
        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(key);
        });
    }

    /// Number of keys waiting to be handed out
    pub fn len(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop accepting new keys and wake the consumer
    pub fn shut_down(&self) {
        self.shared.state.lock().shutting_down = true;
        self.shared.notify.notify_waiters();
        // Covers a consumer that checked state but has not started waiting yet
        self.shared.notify.notify_one();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shared.state.lock().shutting_down
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue() -> WorkQueue<String> {
        WorkQueue::default()
    }

    #[tokio::test]
    async fn test_add_deduplicates_pending_keys() {
        let q = queue();
        q.add("media/web-1".to_string());
        q.add("media/web-1".to_string());
        q.add("media/web-1".to_string());
        assert_eq!(q.len(), 1);

        assert_eq!(q.get().await.as_deref(), Some("media/web-1"));
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn test_fifo_order_across_keys() {
        let q = queue();
        q.add("a".to_string());
        q.add("b".to_string());
        q.add("a".to_string());
        q.add("c".to_string());

        assert_eq!(q.get().await.as_deref(), Some("a"));
        assert_eq!(q.get().await.as_deref(), Some("b"));
        assert_eq!(q.get().await.as_deref(), Some("c"));
    }

    #[tokio::test]
    async fn test_in_flight_key_is_held_until_done() {
        let q = queue();
        q.add("a".to_string());
        let key = q.get().await.unwrap();

        // Re-added twice while in flight: not handed out yet
        q.add("a".to_string());
        q.add("a".to_string());
        assert!(q.is_empty());

        q.done(&key);
        assert_eq!(q.len(), 1);
        let again = q.get().await.unwrap();
        assert_eq!(again, "a");
        q.done(&again);
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn test_done_without_readd_does_not_requeue() {
        let q = queue();
        q.add("a".to_string());
        let key = q.get().await.unwrap();
        q.done(&key);
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn test_get_waits_for_add() {
        let q = queue();
        let producer = q.clone();
        let consumer = tokio::spawn(async move { q.get().await });

        tokio::task::yield_now().await;
        producer.add("late".to_string());

        assert_eq!(consumer.await.unwrap().as_deref(), Some("late"));
    }

    #[tokio::test]
    async fn test_shutdown_drains_then_returns_none() {
        let q = queue();
        q.add("a".to_string());
        q.shut_down();

        // Adds after shutdown are dropped
        q.add("b".to_string());

        assert_eq!(q.get().await.as_deref(), Some("a"));
        assert_eq!(q.get().await, None);
        assert!(q.is_shutting_down());
    }

    #[tokio::test]
    async fn test_shutdown_wakes_blocked_consumer() {
        let q = queue();
        let handle = q.clone();
        let consumer = tokio::spawn(async move { handle.get().await });

        tokio::task::yield_now().await;
        q.shut_down();

        assert_eq!(consumer.await.unwrap(), None);
    }

    #[test]
    fn test_backoff_delays_grow_and_cap() {
        let limiter = RateLimiterConfig {
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_secs(1),
        };
        assert_eq!(limiter.delay_for(0), Duration::from_millis(5));
        assert_eq!(limiter.delay_for(1), Duration::from_millis(10));
        assert_eq!(limiter.delay_for(3), Duration::from_millis(40));
        assert_eq!(limiter.delay_for(10), Duration::from_secs(1));
        assert_eq!(limiter.delay_for(u32::MAX), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_add_and_forget() {
        let q = queue();
        q.add_rate_limited("a".to_string());
        assert_eq!(q.num_requeues(&"a".to_string()), 1);
        assert!(q.is_empty());

        tokio::time::sleep(Duration::from_millis(6)).await;
        assert_eq!(q.len(), 1);

        let key = q.get().await.unwrap();
        q.forget(&key);
        q.done(&key);
        assert_eq!(q.num_requeues(&key), 0);
    }
}
