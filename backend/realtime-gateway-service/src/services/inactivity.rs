//! Per-connection inactivity timers.
//!
//! At most one timer is live per key. Starting a timer for a key that already
//! has one aborts the old task and bumps the key's generation; a timer task
//! only fires if its generation is still current when it wakes, so a stale
//! wake-up that raced the abort is ignored.

use crate::metrics;
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdleTarget {
    pub room: String,
    pub identity: String,
}

pub type IdleCallback = Arc<dyn Fn(String, IdleTarget) -> BoxFuture<'static, ()> + Send + Sync>;

struct TimerEntry {
    generation: u64,
    handle: JoinHandle<()>,
    room: String,
}

#[derive(Default)]
struct TimerTable {
    timers: HashMap<String, TimerEntry>,
    next_generation: u64,
    cancellations: u64,
    fired: u64,
}

impl TimerTable {
    fn publish_gauge(&self) {
        metrics::LIVE_TIMERS.set(self.timers.len() as i64);
    }
}

#[derive(Clone)]
pub struct InactivityTimers {
    table: Arc<Mutex<TimerTable>>,
    timeout: Duration,
    on_idle: IdleCallback,
}

impl InactivityTimers {
    pub fn new(timeout: Duration, on_idle: IdleCallback) -> Self {
        Self {
            table: Arc::new(Mutex::new(TimerTable::default())),
            timeout,
            on_idle,
        }
    }

    /// Schedules the timer for `key`, replacing any live one.
    pub fn start(&self, key: &str, target: IdleTarget) {
        let mut table = self.table.lock();
        table.next_generation += 1;
        let generation = table.next_generation;

        if let Some(previous) = table.timers.remove(key) {
            previous.handle.abort();
            table.cancellations += 1;
        }

        let room = target.room.clone();
        let handle = tokio::spawn(Self::run(
            self.table.clone(),
            self.on_idle.clone(),
            self.timeout,
            key.to_string(),
            generation,
            target,
        ));
        table.timers.insert(
            key.to_string(),
            TimerEntry {
                generation,
                handle,
                room,
            },
        );
        table.publish_gauge();
    }

    /// Same as [`start`](Self::start); named for call sites that extend a live timer.
    pub fn reset(&self, key: &str, target: IdleTarget) {
        self.start(key, target);
    }

    /// Cancels the timer for `key`. Returns whether one was live.
    pub fn cancel(&self, key: &str) -> bool {
        let mut table = self.table.lock();
        let cancelled = match table.timers.remove(key) {
            Some(entry) => {
                entry.handle.abort();
                table.cancellations += 1;
                true
            }
            None => false,
        };
        table.publish_gauge();
        cancelled
    }

    /// Cancels every timer belonging to `room`.
    pub fn cancel_room(&self, room: &str) -> usize {
        let mut table = self.table.lock();
        let keys: Vec<String> = table
            .timers
            .iter()
            .filter(|(_, entry)| entry.room == room)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &keys {
            if let Some(entry) = table.timers.remove(key) {
                entry.handle.abort();
            }
        }
        table.cancellations += keys.len() as u64;
        table.publish_gauge();
        keys.len()
    }

    pub fn is_scheduled(&self, key: &str) -> bool {
        self.table.lock().timers.contains_key(key)
    }

    pub fn live_count(&self) -> usize {
        self.table.lock().timers.len()
    }

    pub fn cancellations(&self) -> u64 {
        self.table.lock().cancellations
    }

    pub fn fired(&self) -> u64 {
        self.table.lock().fired
    }

    /// Aborts every outstanding timer. Returns how many were live.
    pub fn stop_all(&self) -> usize {
        let mut table = self.table.lock();
        let stopped = table.timers.len();
        for (_, entry) in table.timers.drain() {
            entry.handle.abort();
        }
        table.cancellations += stopped as u64;
        table.publish_gauge();
        stopped
    }

    async fn run(
        table: Arc<Mutex<TimerTable>>,
        on_idle: IdleCallback,
        timeout: Duration,
        key: String,
        generation: u64,
        target: IdleTarget,
    ) {
        tokio::time::sleep(timeout).await;

        let current = {
            let mut table = table.lock();
            let current = table
                .timers
                .get(&key)
                .is_some_and(|entry| entry.generation == generation);
            if current {
                table.timers.remove(&key);
                table.fired += 1;
                table.publish_gauge();
            }
            current
        };

        if current {
            on_idle(key, target).await;
        } else {
            tracing::trace!(key = %key, generation, "stale inactivity timer ignored");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn target() -> IdleTarget {
        IdleTarget {
            room: "r1".into(),
            identity: "alice".into(),
        }
    }

    fn counting(fired: Arc<AtomicUsize>) -> IdleCallback {
        Arc::new(move |_key: String, _target: IdleTarget| -> BoxFuture<'static, ()> {
            let fired = fired.clone();
            async move {
                fired.fetch_add(1, Ordering::SeqCst);
            }
            .boxed()
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_replaces_instead_of_leaking() {
        let fired = Arc::new(AtomicUsize::new(0));
        let timers = InactivityTimers::new(Duration::from_secs(60), counting(fired.clone()));

        const K: u64 = 10;
        for _ in 0..K {
            timers.reset("PA_1", target());
        }
        assert_eq!(timers.live_count(), 1);
        assert_eq!(timers.cancellations(), K - 1);

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(timers.live_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_postpones_firing() {
        let fired = Arc::new(AtomicUsize::new(0));
        let timers = InactivityTimers::new(Duration::from_secs(60), counting(fired.clone()));

        timers.start("PA_1", target());
        tokio::time::sleep(Duration::from_secs(50)).await;
        timers.reset("PA_1", target());
        tokio::time::sleep(Duration::from_secs(50)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(timers.is_scheduled("PA_1"));

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!timers.is_scheduled("PA_1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_firing() {
        let fired = Arc::new(AtomicUsize::new(0));
        let timers = InactivityTimers::new(Duration::from_secs(60), counting(fired.clone()));

        timers.start("PA_1", target());
        assert!(timers.cancel("PA_1"));
        assert!(!timers.cancel("PA_1"));

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_room_only_touches_that_room() {
        let fired = Arc::new(AtomicUsize::new(0));
        let timers = InactivityTimers::new(Duration::from_secs(60), counting(fired.clone()));

        timers.start("PA_1", target());
        timers.start(
            "PA_2",
            IdleTarget {
                room: "r2".into(),
                identity: "bob".into(),
            },
        );
        assert_eq!(timers.cancel_room("r1"), 1);
        assert!(timers.is_scheduled("PA_2"));

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_all_clears_every_timer() {
        let fired = Arc::new(AtomicUsize::new(0));
        let timers = InactivityTimers::new(Duration::from_secs(60), counting(fired.clone()));

        timers.start("PA_1", target());
        timers.start("PA_2", target());
        assert_eq!(timers.stop_all(), 2);
        assert_eq!(timers.live_count(), 0);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
