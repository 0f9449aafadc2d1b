//! Deduplicating work queue with one-in-flight-per-key semantics.
//!
//! A key is either queued, in flight, or absent. Enqueueing a key that is
//! queued or in flight only marks it dirty; a dirty in-flight key goes back
//! on the queue when its worker calls [`WorkQueue::done`].

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(500);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(300);

pub struct WorkQueue<K> {
    state: Mutex<QueueState<K>>,
    ready: Notify,
    closed: Notify,
    base_delay: Duration,
    max_delay: Duration,
}

struct QueueState<K> {
    queue: VecDeque<K>,
    dirty: HashSet<K>,
    processing: HashSet<K>,
    failures: HashMap<K, u32>,
    shutting_down: bool,
}

impl<K> WorkQueue<K>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::with_backoff(DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY)
    }

    pub fn with_backoff(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            state: Mutex::new(QueueState {
                queue: VecDeque::new(),
                dirty: HashSet::new(),
                processing: HashSet::new(),
                failures: HashMap::new(),
                shutting_down: false,
            }),
            ready: Notify::new(),
            closed: Notify::new(),
            base_delay,
            max_delay,
        }
    }

    /// Idempotent insert. Ignored after shutdown.
    pub fn enqueue(&self, key: K) {
        {
            let mut state = self.state.lock();
            if state.shutting_down || !state.dirty.insert(key.clone()) {
                return;
            }
            if state.processing.contains(&key) {
                return;
            }
            state.queue.push_back(key);
        }
        self.ready.notify_one();
    }

    /// Waits for the next key, or `None` once the queue is shut down.
    /// The returned key stays in flight until [`WorkQueue::done`].
    pub async fn dequeue(&self) -> Option<K> {
        loop {
            let notified = self.ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock();
                if state.shutting_down {
                    return None;
                }
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
            }

            notified.await;
        }
    }

    pub fn done(&self, key: &K) {
        {
            let mut state = self.state.lock();
            state.processing.remove(key);
            if state.shutting_down || !state.dirty.contains(key) {
                return;
            }
            state.queue.push_back(key.clone());
        }
        self.ready.notify_one();
    }

    /// Stops handing out keys and wakes every blocked `dequeue` and `closed`.
    pub fn shutdown(&self) {
        self.state.lock().shutting_down = true;
        self.ready.notify_waiters();
        self.closed.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.state.lock().shutting_down
    }

    /// Resolves once [`WorkQueue::shutdown`] has been called.
    pub async fn closed(&self) {
        loop {
            let notified = self.closed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_shutting_down() {
                return;
            }
            notified.await;
        }
    }

    pub fn enqueue_after(self: &Arc<Self>, key: K, delay: Duration) {
        if delay.is_zero() {
            self.enqueue(key);
            return;
        }
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.enqueue(key);
        });
    }

    /// Re-enqueues with per-key exponential backoff.
    pub fn enqueue_rate_limited(self: &Arc<Self>, key: K) {
        let delay = {
            let mut state = self.state.lock();
            let failures = state.failures.entry(key.clone()).or_insert(0);
            let exp = *failures;
            *failures = failures.saturating_add(1);
            self.backoff_delay(exp)
        };
        self.enqueue_after(key, delay);
    }

    /// Clears the backoff history of `key`.
    pub fn forget(&self, key: &K) {
        self.state.lock().failures.remove(key);
    }

    pub fn num_requeues(&self, key: &K) -> u32 {
        self.state.lock().failures.get(key).copied().unwrap_or(0)
    }

    /// Number of keys waiting to be dequeued.
    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn backoff_delay(&self, exp: u32) -> Duration {
        let factor = 2u32.checked_pow(exp.min(31)).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }
}

impl<K> Default for WorkQueue<K>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready, assert_ready_eq, task};

    #[test]
    fn test_enqueue_is_idempotent_while_queued() {
        let queue: WorkQueue<&str> = WorkQueue::new();
        queue.enqueue("ns/a");
        queue.enqueue("ns/a");
        queue.enqueue("ns/a");
        assert_eq!(queue.len(), 1);

        let mut get = task::spawn(queue.dequeue());
        assert_ready_eq!(get.poll(), Some("ns/a"));
        drop(get);

        let mut get = task::spawn(queue.dequeue());
        assert_pending!(get.poll());
    }

    #[test]
    fn test_dirty_key_requeued_once_on_done() {
        let queue: WorkQueue<&str> = WorkQueue::new();
        queue.enqueue("ns/a");
        let key = assert_ready!(task::spawn(queue.dequeue()).poll()).unwrap();

        // Updates arriving while in flight are coalesced.
        queue.enqueue("ns/a");
        queue.enqueue("ns/a");
        assert_eq!(queue.len(), 0);

        queue.done(&key);
        assert_eq!(queue.len(), 1);

        let key = assert_ready!(task::spawn(queue.dequeue()).poll()).unwrap();
        queue.done(&key);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_fifo_order_across_keys() {
        let queue: WorkQueue<&str> = WorkQueue::new();
        queue.enqueue("a");
        queue.enqueue("b");
        queue.enqueue("a");
        queue.enqueue("c");

        let mut order = Vec::new();
        for _ in 0..3 {
            order.push(assert_ready!(task::spawn(queue.dequeue()).poll()).unwrap());
        }
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_blocked_dequeue_wakes_on_enqueue() {
        let queue: WorkQueue<&str> = WorkQueue::new();
        let mut get = task::spawn(queue.dequeue());
        assert_pending!(get.poll());

        queue.enqueue("ns/a");
        assert!(get.is_woken());
        assert_ready_eq!(get.poll(), Some("ns/a"));
    }

    #[test]
    fn test_shutdown_wakes_all_waiters() {
        let queue: WorkQueue<&str> = WorkQueue::new();
        let mut first = task::spawn(queue.dequeue());
        let mut second = task::spawn(queue.dequeue());
        let mut closed = task::spawn(queue.closed());
        assert_pending!(first.poll());
        assert_pending!(second.poll());
        assert_pending!(closed.poll());

        queue.shutdown();
        assert_ready_eq!(first.poll(), None);
        assert_ready_eq!(second.poll(), None);
        assert_ready!(closed.poll());
    }

    #[test]
    fn test_no_draining_after_shutdown() {
        let queue: WorkQueue<&str> = WorkQueue::new();
        queue.enqueue("ns/a");
        queue.shutdown();
        queue.enqueue("ns/b");

        assert!(queue.is_shutting_down());
        assert_ready_eq!(task::spawn(queue.dequeue()).poll(), None);
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let queue: WorkQueue<&str> =
            WorkQueue::with_backoff(Duration::from_millis(100), Duration::from_secs(1));
        assert_eq!(queue.backoff_delay(0), Duration::from_millis(100));
        assert_eq!(queue.backoff_delay(1), Duration::from_millis(200));
        assert_eq!(queue.backoff_delay(3), Duration::from_millis(800));
        assert_eq!(queue.backoff_delay(4), Duration::from_secs(1));
        assert_eq!(queue.backoff_delay(40), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_rate_limited_requeue_and_forget() {
        let queue: Arc<WorkQueue<String>> =
            Arc::new(WorkQueue::with_backoff(Duration::from_millis(5), Duration::from_millis(20)));

        queue.enqueue_rate_limited("ns/a".to_string());
        queue.enqueue_rate_limited("ns/a".to_string());
        assert_eq!(queue.num_requeues(&"ns/a".to_string()), 2);

        let key = tokio::time::timeout(Duration::from_secs(1), queue.dequeue())
            .await
            .expect("delayed key never arrived");
        assert_eq!(key.as_deref(), Some("ns/a"));

        queue.forget(&"ns/a".to_string());
        assert_eq!(queue.num_requeues(&"ns/a".to_string()), 0);
    }
}
