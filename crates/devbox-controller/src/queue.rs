use devbox_core::ObjectKey;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Default)]
struct QueueState {
    order: VecDeque<ObjectKey>,
    queued: HashSet<ObjectKey>,
}

/// FIFO of Devbox keys; a key already waiting is not queued twice
#[derive(Default)]
pub struct WorkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl WorkQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add(&self, key: ObjectKey) {
        {
            let mut state = self.state.lock();
            if !state.queued.insert(key.clone()) {
                return;
            }
            state.order.push_back(key);
        }
        self.notify.notify_one();
    }

    /// Add `key` once `delay` has elapsed
    pub fn add_after(self: &Arc<Self>, key: ObjectKey, delay: Duration) {
        if delay.is_zero() {
            self.add(key);
            return;
        }
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(key);
        });
    }

    pub fn try_pop(&self) -> Option<ObjectKey> {
        let mut state = self.state.lock();
        let key = state.order.pop_front()?;
        state.queued.remove(&key);
        Some(key)
    }

    /// Wait for the next key
    pub async fn pop(&self) -> ObjectKey {
        loop {
            let notified = self.notify.notified();
            if let Some(key) = self.try_pop() {
                return key;
            }
            notified.await;
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
