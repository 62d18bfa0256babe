//! Lookups kept per DNS name.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::lookup::Lookup;

/// Lookups keyed by DNS name, case-insensitively.
///
/// Entries never expire on their own; a caller that finds a stale service
/// replaces its lookup with [`check_and_update`](Self::check_and_update).
#[derive(Debug)]
pub struct ServiceCache<S> {
    lookups: Mutex<HashMap<String, Lookup<S>>>,
}

impl<S> Default for ServiceCache<S> {
    fn default() -> Self {
        Self {
            lookups: Mutex::new(HashMap::new()),
        }
    }
}

fn key(name: &str) -> String {
    name.to_ascii_lowercase()
}

impl<S> ServiceCache<S> {
    /// Returns the lookup for `name`, creating it with `start` if there is
    /// none. `start` runs at most once per missing entry, under the cache
    /// lock.
    pub fn get_or_add(&self, name: &str, start: impl FnOnce() -> Lookup<S>) -> Lookup<S> {
        self.lookups
            .lock()
            .entry(key(name))
            .or_insert_with(start)
            .clone()
    }

    /// Replaces the lookup for `name` with one from `start`, but only if it
    /// is still `stale`. Otherwise returns what is cached, which another
    /// caller has already refreshed.
    pub fn check_and_update(
        &self,
        name: &str,
        stale: &Lookup<S>,
        start: impl FnOnce() -> Lookup<S>,
    ) -> Lookup<S> {
        let mut lookups = self.lookups.lock();
        match lookups.get(&key(name)) {
            Some(current) if !Lookup::ptr_eq(current, stale) => current.clone(),
            _ => {
                #[cfg(feature = "log")]
                tracing::debug!(query = name, "Refreshing expired service");
                let fresh = start();
                lookups.insert(key(name), fresh.clone());
                fresh
            }
        }
    }

    /// Drops the lookup for `name`.
    pub fn remove(&self, name: &str) -> Option<Lookup<S>> {
        self.lookups.lock().remove(&key(name))
    }

    /// Drops the lookup for `name`, but only while it is still `failed`.
    /// A lookup another caller started since is left in place.
    pub fn remove_if(&self, name: &str, failed: &Lookup<S>) -> bool {
        let mut lookups = self.lookups.lock();
        match lookups.get(&key(name)) {
            Some(current) if Lookup::ptr_eq(current, failed) => {
                #[cfg(feature = "log")]
                tracing::debug!(query = name, "Evicting failed lookup");
                lookups.remove(&key(name));
                true
            }
            _ => false,
        }
    }

    /// Drops every lookup.
    pub fn clear(&self) {
        self.lookups.lock().clear();
    }

    /// Number of cached lookups.
    pub fn len(&self) -> usize {
        self.lookups.lock().len()
    }

    /// Whether nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.lookups.lock().is_empty()
    }
}
