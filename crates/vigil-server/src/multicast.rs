//! Latest-value broadcast of a shared resource.
//!
//! Built on `tokio::sync::watch`: one writer (the region's poller) replaces the
//! value, and every [`Observer`] keeps its own cursor so reading never
//! consumes the value for anyone else. Slow observers skip intermediate values
//! and see only the newest one.

use tokio::sync::watch;
use vigil_core::Action;

/// A published value and the cursor it was published at.
#[derive(Clone, Debug, PartialEq)]
pub struct Snapshot {
    /// The published action.
    pub action: Action,
    /// Number of publishes so far; `0` is the initial value.
    pub version: u64,
}

/// Single-writer, multi-reader channel holding the latest [`Action`].
#[derive(Debug)]
pub struct MulticastChannel {
    tx: watch::Sender<Snapshot>,
}

impl MulticastChannel {
    /// Create a channel holding `initial` at version 0.
    pub fn new(initial: Action) -> Self {
        let (tx, _rx) = watch::channel(Snapshot {
            action: initial,
            version: 0,
        });
        Self { tx }
    }

    /// Replace the value and wake every observer. Returns the new version.
    pub fn publish(&self, action: Action) -> u64 {
        let mut version = 0;
        self.tx.send_modify(|snapshot| {
            snapshot.action = action;
            snapshot.version += 1;
            version = snapshot.version;
        });
        version
    }

    /// Current value and version.
    pub fn latest(&self) -> Snapshot {
        self.tx.borrow().clone()
    }

    /// Current version.
    pub fn version(&self) -> u64 {
        self.tx.borrow().version
    }

    /// Number of live observers.
    pub fn observer_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// New observer; the current value counts as unseen until read.
    pub fn subscribe(&self) -> Observer {
        let mut rx = self.tx.subscribe();
        rx.mark_changed();
        Observer { rx }
    }
}

/// A reader's private cursor into a [`MulticastChannel`].
#[derive(Debug)]
pub struct Observer {
    rx: watch::Receiver<Snapshot>,
}

impl Observer {
    /// Read the current value and mark it seen.
    pub fn current(&mut self) -> Snapshot {
        self.rx.borrow_and_update().clone()
    }

    /// Wait for a value newer than the last one read.
    ///
    /// Returns `None` once the channel is dropped.
    pub async fn changed(&mut self) -> Option<Snapshot> {
        self.rx.changed().await.ok()?;
        Some(self.current())
    }

    /// Whether a value newer than the last one read is available.
    pub fn has_changed(&self) -> bool {
        self.rx.has_changed().unwrap_or(false)
    }
}
