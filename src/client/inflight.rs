//! Per-key serialisation of client requests.
//!
//! Each key (operation kind plus task id) gets its own async mutex. Calls for
//! the same key queue behind each other; calls for different keys never wait.
//! An entry lives only while someone holds or waits for it.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::OwnedMutexGuard;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Move,
    Delete,
}

pub type OperationKey = (OperationKind, String);

struct Slot {
    lock: Arc<tokio::sync::Mutex<()>>,
    /// Holder plus waiters, including waiters whose `acquire` is still pending.
    users: usize,
}

type Slots<K> = Arc<Mutex<HashMap<K, Slot>>>;

pub struct InFlightRegistry<K: Eq + Hash + Clone> {
    slots: Slots<K>,
}

impl<K: Eq + Hash + Clone> Clone for InFlightRegistry<K> {
    fn clone(&self) -> Self {
        Self {
            slots: self.slots.clone(),
        }
    }
}

impl<K: Eq + Hash + Clone> Default for InFlightRegistry<K> {
    fn default() -> Self {
        Self {
            slots: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<K: Eq + Hash + Clone> InFlightRegistry<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no other holder of `key` remains, then hold it until the
    /// returned guard is dropped. Dropping the future while it waits gives
    /// up its place in the queue.
    pub async fn acquire(&self, key: K) -> InFlightGuard<K> {
        let (lock, registration) = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            let slot = slots.entry(key.clone()).or_insert_with(|| Slot {
                lock: Arc::default(),
                users: 0,
            });
            slot.users += 1;
            let registration = Registration {
                slots: self.slots.clone(),
                key,
            };
            (slot.lock.clone(), registration)
        };
        let guard = lock.lock_owned().await;
        InFlightGuard {
            _guard: guard,
            _registration: registration,
        }
    }

    /// Whether a request for `key` is running or queued.
    pub fn is_busy(&self, key: &K) -> bool {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One user's claim on a slot; the last one out removes the entry.
struct Registration<K: Eq + Hash + Clone> {
    slots: Slots<K>,
    key: K,
}

impl<K: Eq + Hash + Clone> Drop for Registration<K> {
    fn drop(&mut self) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(slot) = slots.get_mut(&self.key) {
            slot.users -= 1;
            if slot.users == 0 {
                slots.remove(&self.key);
            }
        }
    }
}

/// Held while a request for one key runs. Fields drop in order: the lock is
/// released before the registration is withdrawn.
pub struct InFlightGuard<K: Eq + Hash + Clone> {
    _guard: OwnedMutexGuard<()>,
    _registration: Registration<K>,
}
