//! Time-boxed re-lock suppression
//!
//! Privileged multi-step flows (re-authenticate, mutate a security setting,
//! confirm) request a grace window so the background/foreground cycle the
//! OS biometric prompt itself causes does not re-lock the app mid-flow.
//! The window is purely clock-driven: no timer, read lazily.

use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::clock::Clock;

/// Default grace duration (60 seconds)
pub const DEFAULT_GRACE_MS: u64 = 60_000;

/// Self-expiring keep-unlocked override
pub struct GraceWindow {
    clock: Arc<dyn Clock>,
    expires_at_ms: Mutex<Option<u64>>,
}

impl GraceWindow {
    /// Create a window driven by the given clock
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            expires_at_ms: Mutex::new(None),
        }
    }

    /// Suppress re-locking for the given duration from now
    pub fn request_keep_unlocked(&self, duration_ms: u64) {
        let expires = self.clock.now_ms() + duration_ms;
        *self.expires_at_ms.lock().unwrap() = Some(expires);
        debug!(duration_ms, "grace window opened");
    }

    /// Suppress re-locking for the default duration
    pub fn request_keep_unlocked_default(&self) {
        self.request_keep_unlocked(DEFAULT_GRACE_MS);
    }

    /// Whether the window is currently active
    ///
    /// Lazily clears an expired value; calling after expiry is safe and
    /// simply returns `false`.
    pub fn should_keep_unlocked(&self) -> bool {
        let mut expires = self.expires_at_ms.lock().unwrap();
        match *expires {
            Some(at) if self.clock.now_ms() < at => true,
            Some(_) => {
                *expires = None;
                false
            }
            None => false,
        }
    }

    /// Explicitly close the window
    pub fn clear_keep_unlocked(&self) {
        *self.expires_at_ms.lock().unwrap() = None;
    }
}
