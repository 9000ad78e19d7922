//! Keyed work queue.
//!
//! A key is handed to at most one worker at a time. Adding a key that is
//! already queued is a no-op; adding a key that is being processed marks it
//! dirty so it is queued again once [`WorkQueue::done`] is called.
//!
//! Delayed adds keep at most one deadline per key, the earliest one. Handing a
//! key to a worker clears its deadline; the reconcile that follows schedules
//! the next one.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use taskdefine_core::ObjectKey;

#[derive(Default)]
struct QueueState {
    queue: VecDeque<ObjectKey>,
    queued: HashSet<ObjectKey>,
    active: HashSet<ObjectKey>,
    dirty: HashSet<ObjectKey>,
    delayed: HashMap<ObjectKey, Instant>,
    shutting_down: bool,
}

impl QueueState {
    /// Queue `key` for a worker. Returns true if a worker should be woken.
    fn push(&mut self, key: ObjectKey) -> bool {
        if self.active.contains(&key) {
            self.dirty.insert(key);
            return false;
        }
        if self.queued.insert(key.clone()) {
            self.queue.push_back(key);
            return true;
        }
        false
    }

    /// Move every key whose deadline has passed onto the queue.
    ///
    /// Returns how many workers to wake and the next pending deadline.
    fn promote_due(&mut self, now: Instant) -> (usize, Option<Instant>) {
        let due: Vec<ObjectKey> = self
            .delayed
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(key, _)| key.clone())
            .collect();

        let mut woken = 0;
        for key in due {
            self.delayed.remove(&key);
            if self.push(key) {
                woken += 1;
            }
        }
        (woken, self.delayed.values().min().copied())
    }
}

/// Work queue that serializes processing per key.
#[derive(Default)]
pub struct WorkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    deadlines_changed: Notify,
}

impl WorkQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue `key` for processing.
    pub async fn add(&self, key: ObjectKey) {
        let mut state = self.state.lock().await;
        if state.shutting_down {
            return;
        }
        if state.push(key) {
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Enqueue `key` once `delay` has elapsed.
    ///
    /// If the key already has an earlier deadline pending, that one is kept.
    /// Delayed keys only become ready while [`WorkQueue::run_timers`] runs.
    pub async fn add_after(&self, key: ObjectKey, delay: Duration) {
        if delay.is_zero() {
            return self.add(key).await;
        }

        let deadline = Instant::now() + delay;
        let mut state = self.state.lock().await;
        if state.shutting_down {
            return;
        }
        let pending = state.delayed.entry(key).or_insert(deadline);
        if *pending < deadline {
            return;
        }
        *pending = deadline;
        drop(state);
        self.deadlines_changed.notify_one();
    }

    /// Wait for the next key. Returns `None` once the queue is shut down.
    ///
    /// The caller owns the key until it calls [`WorkQueue::done`].
    pub async fn next(&self) -> Option<ObjectKey> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock().await;
                if state.shutting_down {
                    return None;
                }
                if let Some(key) = state.queue.pop_front() {
                    state.queued.remove(&key);
                    state.delayed.remove(&key);
                    state.active.insert(key.clone());
                    return Some(key);
                }
            }

            notified.await;
        }
    }

    /// Release `key` after processing. Re-queues it if it was added meanwhile.
    pub async fn done(&self, key: &ObjectKey) {
        let mut state = self.state.lock().await;
        state.active.remove(key);
        if state.dirty.remove(key) && !state.shutting_down && state.push(key.clone()) {
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Promote delayed keys as their deadlines pass. Returns after shutdown.
    pub async fn run_timers(&self) {
        loop {
            let changed = self.deadlines_changed.notified();
            tokio::pin!(changed);
            changed.as_mut().enable();

            let next_deadline = {
                let mut state = self.state.lock().await;
                if state.shutting_down {
                    return;
                }
                let (woken, next_deadline) = state.promote_due(Instant::now());
                drop(state);
                for _ in 0..woken {
                    self.notify.notify_one();
                }
                next_deadline
            };

            match next_deadline {
                Some(deadline) => {
                    tokio::select! {
                        _ = &mut changed => {}
                        _ = tokio::time::sleep_until(deadline) => {}
                    }
                }
                None => changed.await,
            }
        }
    }

    /// Stop handing out keys and wake every waiting worker.
    pub async fn shutdown(&self) {
        self.state.lock().await.shutting_down = true;
        self.notify.notify_waiters();
        self.deadlines_changed.notify_waiters();
    }

    /// Number of keys waiting to be processed, delayed keys excluded.
    pub async fn len(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    /// Number of keys with a pending deadline.
    pub async fn delayed_len(&self) -> usize {
        self.state.lock().await.delayed.len()
    }
}
