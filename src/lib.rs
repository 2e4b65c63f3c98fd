//! applock - On-device authentication gate
//!
//! Decides whether the app is locked, verifies credentials, and broadcasts
//! authentication-state changes to the rest of the app:
//! - Salted password hashing with legacy-format migration
//! - Platform-aware resolution of the enforced authentication method
//! - The lock/unlock state machine driven by lifecycle events and input
//! - A time-boxed grace window for privileged multi-step flows
//! - An event bus notifying other subsystems of auth changes
//!
//! The gate is headless: UI rendering, navigation, and the OS biometric API
//! are collaborators behind trait seams, so every flow is unit-testable.

pub mod clock;
pub mod controller;
pub mod credentials;
pub mod error;
pub mod events;
pub mod grace;
pub mod policy;
pub mod settings;

pub use clock::{Clock, ManualClock, SystemClock};
pub use controller::{
    LockController, LockSnapshot, LockState, Transition, UiIntent, UnlockFeedback, UnlockOutcome,
    BIOMETRIC_AUTO_TRIGGER_DELAY, MAX_PASSWORD_ATTEMPTS,
};
pub use credentials::{CredentialManager, SaltedHash, MIN_PASSWORD_LENGTH};
pub use error::{AuthError, Result};
pub use events::{AuthEventBus, Subscription};
pub use grace::{GraceWindow, DEFAULT_GRACE_MS};
pub use policy::{BiometricProbe, BiometricType, PlatformCapabilities, PolicyResolver};
pub use settings::{
    AuthMethod, AuthSettings, JsonSettingsStore, MemorySettingsStore, SettingsStore,
};
