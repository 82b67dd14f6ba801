// ABOUTME: Process-local registry of in-flight orchestrations keyed by external request id
// ABOUTME: Concurrent callers for the same id share one pending outcome instead of starting a duplicate

use futures::future::{BoxFuture, FutureExt, Shared, WeakShared};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};

pub type SharedOutcome<T> = Shared<BoxFuture<'static, T>>;

struct Entry<T> {
    generation: u64,
    pending: WeakShared<BoxFuture<'static, T>>,
}

struct Inner<T> {
    next_generation: u64,
    entries: HashMap<String, Entry<T>>,
}

/// Best-effort de-duplication of concurrent work.
///
/// The registry holds only weak handles: the work lives as long as at least
/// one caller awaits it. An entry is removed when its work finishes or when
/// every caller has gone away, whichever happens first.
pub struct InFlightRegistry<T> {
    inner: Arc<Mutex<Inner<T>>>,
}

impl<T> InFlightRegistry<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                next_generation: 0,
                entries: HashMap::new(),
            })),
        }
    }

    /// Join the pending work for `key`, or start it with `start` if there is none.
    pub fn join_or_start<F>(&self, key: &str, start: F) -> SharedOutcome<T>
    where
        F: FnOnce() -> BoxFuture<'static, T>,
    {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(pending) = inner.entries.get(key).and_then(|e| e.pending.upgrade()) {
            tracing::debug!(external_id = key, "Joining in-flight request");
            return pending;
        }

        let generation = inner.next_generation;
        inner.next_generation += 1;

        let guard = EntryGuard {
            registry: Arc::downgrade(&self.inner),
            key: key.to_string(),
            generation,
        };
        let work = start();
        let shared = async move {
            let _guard = guard;
            work.await
        }
        .boxed()
        .shared();

        if let Some(pending) = shared.downgrade() {
            inner.entries.insert(
                key.to_string(),
                Entry {
                    generation,
                    pending,
                },
            );
        }
        shared
    }

    pub fn in_flight(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }

    #[cfg(test)]
    fn contains(&self, key: &str) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .contains_key(key)
    }
}

impl<T> Default for InFlightRegistry<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Removes its entry when the work completes or is dropped.
struct EntryGuard<T> {
    registry: Weak<Mutex<Inner<T>>>,
    key: String,
    generation: u64,
}

impl<T> Drop for EntryGuard<T> {
    fn drop(&mut self) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let mut inner = registry.lock().unwrap_or_else(PoisonError::into_inner);
        // A newer attempt may already own the key.
        if inner
            .entries
            .get(&self.key)
            .is_some_and(|e| e.generation == self.generation)
        {
            inner.entries.remove(&self.key);
        }
    }
}
