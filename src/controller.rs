//! Lock-screen state machine
//!
//! `Init → Locked{method} → Unlocked`, driven by app lifecycle events and
//! user input. The machine is headless: side effects (showing the OS
//! biometric prompt, shaking the password field) are emitted as intents for
//! a thin adapter to execute, so every transition is deterministic under
//! test.
//!
//! Concurrency model: at most one outstanding unlock challenge per
//! controller. A re-entrant trigger while one is pending is ignored, not
//! queued, so attempts are never double-counted. Every challenge is tagged
//! with the session generation it was issued under; a completion arriving
//! after the session has already transitioned is discarded.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::credentials::CredentialManager;
use crate::error::Result;
use crate::grace::GraceWindow;
use crate::policy::PolicyResolver;
use crate::settings::{AuthMethod, SettingsStore};

/// Failed password attempts before the soft-lockout warning
pub const MAX_PASSWORD_ATTEMPTS: u32 = 5;

/// Delay before the automatic biometric challenge, so the challenge surface
/// is ready when the prompt appears
pub const BIOMETRIC_AUTO_TRIGGER_DELAY: Duration = Duration::from_millis(500);

/// Lock-screen state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockState {
    /// Not yet evaluated for the current foreground session
    #[default]
    Init,
    /// Locked, awaiting the given challenge
    Locked {
        /// Method currently being enforced
        method: AuthMethod,
    },
    /// Unlocked for the current foreground session
    Unlocked,
}

/// Observable controller state for UI binding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LockSnapshot {
    /// Current state
    pub state: LockState,
    /// Failed password attempts in the current lock session
    pub attempts: u32,
    /// Method resolved for the current lock session
    pub resolved_method: AuthMethod,
}

/// Side effect requested by a transition, executed by a thin adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiIntent {
    /// Invoke `trigger_biometric` after the given delay
    TriggerBiometricChallenge {
        /// Delay before invoking, letting the challenge surface settle
        after: Duration,
    },
    /// Shake or flash the password field
    FlashInvalidFeedback,
    /// Clear the password input field
    ClearPasswordInput,
}

/// Feedback to surface after a rejected password attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnlockFeedback {
    /// Below the threshold: show "N attempts remaining"
    AttemptsRemaining(u32),
    /// At or above the threshold: show "too many attempts"
    ///
    /// A soft warning only; further attempts are not blocked.
    TooManyAttempts,
}

/// Result of an unlock attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnlockOutcome {
    /// The gate is now unlocked
    Unlocked,
    /// Password rejected; the attempt counter was incremented
    Rejected(UnlockFeedback),
    /// Biometric failed or errored; enforcement fell back to password
    FellBackToPassword,
    /// Another challenge was pending, or the session had already moved on
    Ignored,
}

/// An unlock transition: the outcome plus the side effects it requests
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    /// What happened
    pub outcome: UnlockOutcome,
    /// Side effects for the adapter
    pub intents: Vec<UiIntent>,
}

impl Transition {
    fn ignored() -> Self {
        Self {
            outcome: UnlockOutcome::Ignored,
            intents: Vec::new(),
        }
    }
}

/// The finite state machine gating the app
pub struct LockController {
    store: Arc<dyn SettingsStore>,
    credentials: Arc<CredentialManager>,
    policy: Arc<PolicyResolver>,
    grace: Arc<GraceWindow>,
    state_tx: watch::Sender<LockSnapshot>,
    /// Bumped on every fresh session, successful unlock, and background;
    /// challenges issued under an older generation are discarded
    generation: AtomicU64,
    /// Guard ensuring at most one outstanding challenge
    challenge_pending: AtomicBool,
}

impl LockController {
    /// Create a controller over the given collaborators
    pub fn new(
        store: Arc<dyn SettingsStore>,
        credentials: Arc<CredentialManager>,
        policy: Arc<PolicyResolver>,
        grace: Arc<GraceWindow>,
    ) -> Self {
        let (state_tx, _) = watch::channel(LockSnapshot::default());
        Self {
            store,
            credentials,
            policy,
            grace,
            state_tx,
            generation: AtomicU64::new(0),
            challenge_pending: AtomicBool::new(false),
        }
    }

    /// Current observable state
    pub fn snapshot(&self) -> LockSnapshot {
        *self.state_tx.borrow()
    }

    /// Subscribe to state changes (for UI binding)
    pub fn observe(&self) -> watch::Receiver<LockSnapshot> {
        self.state_tx.subscribe()
    }

    /// Evaluate the gate on process start
    pub async fn start(&self) -> Result<Vec<UiIntent>> {
        self.enter_fresh_session().await
    }

    /// Handle a background → foreground transition
    ///
    /// An active grace window forces `Unlocked` without any challenge;
    /// otherwise the session is re-evaluated from scratch.
    pub async fn on_foreground(&self) -> Result<Vec<UiIntent>> {
        if self.grace.should_keep_unlocked() {
            // Keep the snapshot's resolved method current for UI binding;
            // an unreadable store never blocks the grace resume itself
            let resolved = match self.store.get_settings().await {
                Ok(settings) => Some(self.policy.resolve_method(settings.as_ref())),
                Err(e) => {
                    warn!(error = %e, "settings unreadable during grace resume");
                    None
                }
            };
            self.bump_generation();
            self.state_tx.send_modify(|s| {
                s.state = LockState::Unlocked;
                s.attempts = 0;
                if let Some(method) = resolved {
                    s.resolved_method = method;
                }
            });
            debug!("grace window active, resuming unlocked");
            return Ok(Vec::new());
        }
        self.enter_fresh_session().await
    }

    /// Handle a foreground → background transition
    ///
    /// Clears the unlocked-this-session marker so the next resume always
    /// re-evaluates, and invalidates any outstanding challenge.
    pub fn on_background(&self) {
        self.bump_generation();
        self.state_tx.send_modify(|s| s.state = LockState::Init);
        debug!("backgrounded, lock state reset");
    }

    /// Submit a password for the current lock session
    ///
    /// Only meaningful while the session is locked on the password
    /// challenge; submissions in any other state are ignored so they can
    /// neither unlock out of turn nor inflate the attempt counter.
    pub async fn unlock_with_password(&self, input: &str) -> Result<Transition> {
        let password_locked = matches!(
            self.state_tx.borrow().state,
            LockState::Locked {
                method: AuthMethod::Password
            }
        );
        if !password_locked {
            return Ok(Transition::ignored());
        }
        if !self.begin_challenge() {
            return Ok(Transition::ignored());
        }
        let issued_under = self.generation.load(Ordering::SeqCst);

        let verified = self.credentials.verify_password(input).await;
        self.end_challenge();
        let verified = verified?;

        if self.generation.load(Ordering::SeqCst) != issued_under {
            debug!("password result discarded, session moved on");
            return Ok(Transition::ignored());
        }

        if verified {
            self.bump_generation();
            self.state_tx.send_modify(|s| {
                s.state = LockState::Unlocked;
                s.attempts = 0;
            });
            info!("unlocked with password");
            return Ok(Transition {
                outcome: UnlockOutcome::Unlocked,
                intents: vec![UiIntent::ClearPasswordInput],
            });
        }

        let mut attempts = 0;
        self.state_tx.send_modify(|s| {
            s.attempts += 1;
            attempts = s.attempts;
        });

        let feedback = if attempts >= MAX_PASSWORD_ATTEMPTS {
            UnlockFeedback::TooManyAttempts
        } else {
            UnlockFeedback::AttemptsRemaining(MAX_PASSWORD_ATTEMPTS - attempts)
        };
        debug!(attempts, "password rejected");
        Ok(Transition {
            outcome: UnlockOutcome::Rejected(feedback),
            intents: vec![UiIntent::FlashInvalidFeedback],
        })
    }

    /// Run the biometric challenge for the current lock session
    ///
    /// Failure or a platform error never hard-locks the user out: the
    /// method is re-resolved defensively and the session falls back to the
    /// password challenge. Biometric failures do not count as attempts.
    pub async fn trigger_biometric(&self) -> Result<Transition> {
        if !self.begin_challenge() {
            return Ok(Transition::ignored());
        }
        let issued_under = self.generation.load(Ordering::SeqCst);

        let passed = self.policy.challenge().await;
        self.end_challenge();

        if self.generation.load(Ordering::SeqCst) != issued_under {
            debug!("biometric result discarded, session moved on");
            return Ok(Transition::ignored());
        }

        match passed {
            Ok(true) => {
                self.bump_generation();
                self.state_tx.send_modify(|s| {
                    s.state = LockState::Unlocked;
                    s.attempts = 0;
                });
                info!("unlocked with biometric");
                Ok(Transition {
                    outcome: UnlockOutcome::Unlocked,
                    intents: Vec::new(),
                })
            }
            Ok(false) => {
                debug!("biometric challenge declined");
                self.fall_back_to_password(issued_under).await
            }
            Err(e) => {
                warn!(error = %e, "biometric challenge errored");
                self.fall_back_to_password(issued_under).await
            }
        }
    }

    /// Re-resolve after a failed biometric and fall back to password
    async fn fall_back_to_password(&self, issued_under: u64) -> Result<Transition> {
        let resolved = match self.store.get_settings().await {
            Ok(settings) => self.policy.resolve_method(settings.as_ref()),
            Err(e) => {
                // Settings unreadable: the password challenge is the safe
                // fallback for a session that was already locked
                warn!(error = %e, "settings unreadable during biometric fallback");
                AuthMethod::Password
            }
        };

        // The re-read suspends, so the session may have transitioned while
        // it was in flight; a stale fallback must not overwrite the state
        if self.generation.load(Ordering::SeqCst) != issued_under {
            debug!("biometric fallback discarded, session moved on");
            return Ok(Transition::ignored());
        }

        if resolved == AuthMethod::None {
            self.bump_generation();
            self.state_tx.send_modify(|s| {
                s.state = LockState::Unlocked;
                s.attempts = 0;
            });
            return Ok(Transition {
                outcome: UnlockOutcome::Unlocked,
                intents: Vec::new(),
            });
        }

        self.state_tx.send_modify(|s| {
            s.state = LockState::Locked {
                method: AuthMethod::Password,
            };
            s.resolved_method = AuthMethod::Password;
        });
        Ok(Transition {
            outcome: UnlockOutcome::FellBackToPassword,
            intents: Vec::new(),
        })
    }

    /// Resolve and enter a fresh lock session
    async fn enter_fresh_session(&self) -> Result<Vec<UiIntent>> {
        let settings = self.store.get_settings().await?;
        let resolved = self.policy.resolve_method(settings.as_ref());
        self.bump_generation();

        match resolved {
            AuthMethod::None => {
                self.state_tx.send_modify(|s| {
                    s.state = LockState::Unlocked;
                    s.attempts = 0;
                    s.resolved_method = AuthMethod::None;
                });
                debug!("authentication disabled, resuming unlocked");
                Ok(Vec::new())
            }
            method => {
                self.state_tx.send_modify(|s| {
                    s.state = LockState::Locked { method };
                    s.attempts = 0;
                    s.resolved_method = method;
                });
                info!(?method, "lock session started");
                if method == AuthMethod::Biometric {
                    Ok(vec![UiIntent::TriggerBiometricChallenge {
                        after: BIOMETRIC_AUTO_TRIGGER_DELAY,
                    }])
                } else {
                    Ok(Vec::new())
                }
            }
        }
    }

    fn bump_generation(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    fn begin_challenge(&self) -> bool {
        self.challenge_pending
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    fn end_challenge(&self) {
        self.challenge_pending.store(false, Ordering::SeqCst);
    }
}
