//! Per-connection set of active watch keys.
//!
//! A key maps to the registration of the one task delivering for it. Each
//! registration carries a generation id and a child cancellation token, so a
//! loop that outlives an unwatch/re-watch cycle can tell it is stale and never
//! removes its successor's entry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

/// Handle given to the task that delivers for a key.
#[derive(Clone, Debug)]
pub struct WatchHandle {
    /// Watch key (`services`, `nodes`, `service:<id>`, `node:<id>`).
    pub key: String,
    /// Generation of this registration.
    pub id: u64,
    /// Cancelled on unwatch, on connection teardown, and on process shutdown.
    pub token: CancellationToken,
}

#[derive(Debug)]
struct Registration {
    id: u64,
    token: CancellationToken,
}

/// Mutex-guarded map of active watch keys.
#[derive(Debug, Default)]
pub struct WatchSet {
    entries: Mutex<HashMap<String, Registration>>,
    next_id: AtomicU64,
}

impl WatchSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `key` unless it is already present.
    ///
    /// The returned handle's token is a child of `parent`. `None` means the key
    /// already has a delivery path.
    pub fn try_insert(&self, key: &str, parent: &CancellationToken) -> Option<WatchHandle> {
        let mut entries = self.entries.lock();
        if entries.contains_key(key) {
            return None;
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = parent.child_token();
        let _ = entries.insert(
            key.to_string(),
            Registration {
                id,
                token: token.clone(),
            },
        );
        Some(WatchHandle {
            key: key.to_string(),
            id,
            token,
        })
    }

    /// Remove `key` and cancel its task. Returns whether it was present.
    pub fn remove(&self, key: &str) -> bool {
        let removed = self.entries.lock().remove(key);
        match removed {
            Some(registration) => {
                registration.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Remove `key` only if it still belongs to generation `id`.
    pub fn remove_if(&self, key: &str, id: u64) -> bool {
        let mut entries = self.entries.lock();
        if entries.get(key).is_some_and(|r| r.id == id) {
            if let Some(registration) = entries.remove(key) {
                registration.token.cancel();
            }
            true
        } else {
            false
        }
    }

    /// Whether `key` is still registered to generation `id`.
    pub fn is_current(&self, key: &str, id: u64) -> bool {
        self.entries.lock().get(key).is_some_and(|r| r.id == id)
    }

    /// Whether `key` is registered.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().contains_key(key)
    }

    /// Number of registered keys.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether no key is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Registered keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Remove every key and cancel every task. Returns how many were removed.
    pub fn clear(&self) -> usize {
        let drained: Vec<Registration> = self.entries.lock().drain().map(|(_, r)| r).collect();
        for registration in &drained {
            registration.token.cancel();
        }
        drained.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn insert_is_exclusive() {
        let set = WatchSet::new();
        let root = CancellationToken::new();
        assert!(set.try_insert("services", &root).is_some());
        assert!(set.try_insert("services", &root).is_none());
        assert_eq!(set.len(), 1);
        assert!(set.contains("services"));
    }

    #[test]
    fn remove_cancels_token() {
        let set = WatchSet::new();
        let root = CancellationToken::new();
        let handle = set.try_insert("node:n1", &root).unwrap();
        assert!(set.remove("node:n1"));
        assert!(handle.token.is_cancelled());
        assert!(!root.is_cancelled());
        assert!(!set.remove("node:n1"));
    }

    #[test]
    fn stale_generation_cannot_remove_successor() {
        let set = WatchSet::new();
        let root = CancellationToken::new();
        let first = set.try_insert("nodes", &root).unwrap();
        assert!(set.remove("nodes"));
        let second = set.try_insert("nodes", &root).unwrap();

        assert_ne!(first.id, second.id);
        assert!(!set.is_current("nodes", first.id));
        assert!(!set.remove_if("nodes", first.id));
        assert!(set.is_current("nodes", second.id));
        assert!(!second.token.is_cancelled());

        assert!(set.remove_if("nodes", second.id));
        assert!(set.is_empty());
    }

    #[test]
    fn parent_cancellation_reaches_handles() {
        let set = WatchSet::new();
        let root = CancellationToken::new();
        let a = set.try_insert("a", &root).unwrap();
        let b = set.try_insert("b", &root).unwrap();
        root.cancel();
        assert!(a.token.is_cancelled());
        assert!(b.token.is_cancelled());
    }

    #[test]
    fn clear_cancels_everything() {
        let set = WatchSet::new();
        let root = CancellationToken::new();
        let handles: Vec<_> = ["services", "nodes", "node:x"]
            .iter()
            .map(|k| set.try_insert(k, &root).unwrap())
            .collect();
        assert_eq!(set.keys(), vec!["node:x", "nodes", "services"]);
        assert_eq!(set.clear(), 3);
        assert!(set.is_empty());
        assert!(handles.iter().all(|h| h.token.is_cancelled()));
    }

    #[test]
    fn concurrent_inserts_admit_one_winner() {
        let set = Arc::new(WatchSet::new());
        let root = CancellationToken::new();
        let winners: usize = std::thread::scope(|s| {
            let joins: Vec<_> = (0..8)
                .map(|_| {
                    let set = set.clone();
                    let root = root.clone();
                    s.spawn(move || usize::from(set.try_insert("services", &root).is_some()))
                })
                .collect();
            joins.into_iter().map(|j| j.join().unwrap()).sum()
        });
        assert_eq!(winners, 1);
    }
}
