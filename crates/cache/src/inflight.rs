//! Coalescing of concurrent derivations.
//!
//! Without coordination, N simultaneous requests for the same uncached
//! thumbnail run the transform N times. [`InFlight`] hands the first caller a
//! [`ProducerGuard`] and every later caller a [`Waiter`] that resolves once
//! the guard is dropped, successful or not. Waiters then look the key up
//! again; if the producer failed there is nothing cached and they can try
//! producing themselves.

use crate::CacheKey;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;

type Pending = Arc<Mutex<HashMap<CacheKey, watch::Receiver<()>>>>;

/// Registry of keys currently being derived.
///
/// Cheap to clone; clones share the same registry.
#[derive(Debug, Clone, Default)]
pub struct InFlight {
    pending: Pending,
}

/// Outcome of [`InFlight::claim`].
#[derive(Debug)]
pub enum Claim {
    /// Nobody else is deriving this key: go ahead.
    Producer(ProducerGuard),
    /// Another task is deriving this key: wait for it.
    Waiter(Waiter),
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `key` for production, or get a handle to wait on whoever
    /// already has.
    pub fn claim(&self, key: CacheKey) -> Claim {
        let mut pending = lock(&self.pending);
        if let Some(receiver) = pending.get(&key) {
            tracing::debug!(key = %key, "Derivation already in flight; waiting");
            return Claim::Waiter(Waiter { receiver: receiver.clone() });
        }
        let (sender, receiver) = watch::channel(());
        pending.insert(key, receiver);
        Claim::Producer(ProducerGuard {
            key,
            pending: self.pending.clone(),
            _done: sender,
        })
    }

    /// Number of keys currently being derived.
    pub fn len(&self) -> usize {
        lock(&self.pending).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.pending).is_empty()
    }
}

// The map is only touched for single insert/remove calls, so a panic can't
// leave it half-updated; recover from poisoning instead of propagating it.
fn lock(pending: &Pending) -> MutexGuard<'_, HashMap<CacheKey, watch::Receiver<()>>> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Exclusive right to derive one key. Dropping it releases the key and wakes
/// every [`Waiter`].
#[derive(Debug)]
pub struct ProducerGuard {
    key: CacheKey,
    pending: Pending,
    // Never sent on: waiters are woken by the channel closing on drop.
    _done: watch::Sender<()>,
}

impl ProducerGuard {
    pub fn key(&self) -> &CacheKey {
        &self.key
    }
}

impl Drop for ProducerGuard {
    fn drop(&mut self) {
        lock(&self.pending).remove(&self.key);
    }
}

/// Handle on someone else's derivation.
#[derive(Debug)]
pub struct Waiter {
    receiver: watch::Receiver<()>,
}

impl Waiter {
    /// Resolves once the producer's guard has been dropped.
    pub async fn wait(mut self) {
        // `changed()` only errors once the sender is gone, which is exactly
        // the signal we're waiting for.
        while self.receiver.changed().await.is_ok() {}
    }
}
