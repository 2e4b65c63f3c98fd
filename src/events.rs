//! Auth-change notification bus
//!
//! Other subsystems (device-identity relinking, widget refresh, session
//! caches) subscribe here and are told when a persisted authentication
//! setting changes. Subscribers are isolated: one faulting callback must
//! never prevent the others from running, and never propagates to the
//! notifier.

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, Weak};

use tracing::{debug, warn};

/// Subscriber callback invoked on every auth-settings change
pub type AuthCallback = Arc<dyn Fn() -> anyhow::Result<()> + Send + Sync>;

type Registry = Mutex<BTreeMap<u64, AuthCallback>>;

/// Pub/sub bus for authentication-state changes
///
/// Constructed once per process. Subscriptions are tracked by handle so a
/// subscriber can unsubscribe at any point, including from inside its own
/// callback: notification iterates over a snapshot of the registry.
pub struct AuthEventBus {
    subscribers: Arc<Registry>,
    next_id: Mutex<u64>,
}

impl Default for AuthEventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthEventBus {
    /// Create an empty bus
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(BTreeMap::new())),
            next_id: Mutex::new(0),
        }
    }

    /// Register a callback, returning a handle that can unsubscribe it
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = {
            let mut next = self.next_id.lock().unwrap();
            *next += 1;
            *next
        };
        self.subscribers
            .lock()
            .unwrap()
            .insert(id, Arc::new(callback));
        debug!(id, "auth event subscriber registered");

        Subscription {
            id,
            registry: Arc::downgrade(&self.subscribers),
        }
    }

    /// Number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }

    /// Invoke every subscriber in subscription order
    ///
    /// A callback that returns an error or panics is logged and skipped;
    /// the remaining subscribers still run.
    pub fn notify_auth_changed(&self) {
        // Snapshot under the lock, invoke outside it, so callbacks may
        // subscribe or unsubscribe freely.
        let snapshot: Vec<(u64, AuthCallback)> = self
            .subscribers
            .lock()
            .unwrap()
            .iter()
            .map(|(id, cb)| (*id, Arc::clone(cb)))
            .collect();

        for (id, callback) in snapshot {
            match catch_unwind(AssertUnwindSafe(|| callback())) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(id, error = %e, "auth event subscriber failed");
                }
                Err(_) => {
                    warn!(id, "auth event subscriber panicked");
                }
            }
        }
    }

    /// Remove every subscriber (explicit disposal path)
    pub fn clear(&self) {
        self.subscribers.lock().unwrap().clear();
    }
}

/// Handle for a registered subscriber
pub struct Subscription {
    id: u64,
    registry: Weak<Registry>,
}

impl Subscription {
    /// Remove the subscriber from the bus
    ///
    /// A no-op if the bus has already been dropped or cleared.
    pub fn unsubscribe(self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.lock().unwrap().remove(&self.id);
        }
    }
}
