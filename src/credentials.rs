//! Credential storage and verification
//!
//! Passwords are stored as a 16-byte random salt plus a SHA-256 digest of
//! `salt || secret`, encoded as `"salt:digest"` in hex. Earlier app versions
//! stored the bare plaintext; those values must keep verifying and upgrade
//! themselves to the salted form on first successful verification.

use std::sync::Arc;
use std::time::Duration;

use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use zeroize::Zeroizing;

use crate::error::{AuthError, Result};
use crate::events::AuthEventBus;
use crate::policy::PolicyResolver;
use crate::settings::{AuthMethod, AuthSettings, SettingsStore};

/// Minimum password length accepted at setup
pub const MIN_PASSWORD_LENGTH: usize = 4;

/// Salt length in bytes
const SALT_LENGTH: usize = 16;

/// Separator between hex salt and hex digest in the stored form
const SALT_SEPARATOR: char = ':';

/// Bounded delay before the durability re-read on the disable-all path
const DURABILITY_CHECK_DELAY: Duration = Duration::from_millis(200);

/// A salt plus the digest of `salt || secret`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaltedHash {
    salt: [u8; SALT_LENGTH],
    digest: [u8; 32],
}

impl SaltedHash {
    /// Hash a secret under a freshly generated random salt
    pub fn generate(secret: &str) -> Self {
        let mut salt = [0u8; SALT_LENGTH];
        OsRng.fill_bytes(&mut salt);
        let digest = Self::digest(&salt, secret);
        Self { salt, digest }
    }

    /// Parse the `"salt:digest"` stored form
    ///
    /// Returns `None` for the legacy plaintext form (no separator) and for
    /// malformed values.
    pub fn parse(stored: &str) -> Option<Self> {
        let (salt_hex, digest_hex) = stored.split_once(SALT_SEPARATOR)?;
        let salt: [u8; SALT_LENGTH] = hex::decode(salt_hex).ok()?.try_into().ok()?;
        let digest: [u8; 32] = hex::decode(digest_hex).ok()?.try_into().ok()?;
        Some(Self { salt, digest })
    }

    /// Whether a candidate secret matches this hash
    pub fn matches(&self, candidate: &str) -> bool {
        Self::digest(&self.salt, candidate) == self.digest
    }

    /// Encode as `"salt:digest"`
    pub fn encode(&self) -> String {
        format!(
            "{}{}{}",
            hex::encode(self.salt),
            SALT_SEPARATOR,
            hex::encode(self.digest)
        )
    }

    fn digest(salt: &[u8; SALT_LENGTH], secret: &str) -> [u8; 32] {
        let secret_bytes = Zeroizing::new(secret.as_bytes().to_vec());
        let mut hasher = Sha256::new();
        hasher.update(salt);
        hasher.update(&*secret_bytes);
        hasher.finalize().into()
    }
}

/// Manages the persisted credential settings
///
/// Every mutator reads the latest record and rewrites only the fields it
/// owns, then fires the event bus so other subsystems can react.
pub struct CredentialManager {
    store: Arc<dyn SettingsStore>,
    policy: Arc<PolicyResolver>,
    events: Arc<AuthEventBus>,
}

impl CredentialManager {
    /// Create a manager over the given collaborators
    pub fn new(
        store: Arc<dyn SettingsStore>,
        policy: Arc<PolicyResolver>,
        events: Arc<AuthEventBus>,
    ) -> Self {
        Self {
            store,
            policy,
            events,
        }
    }

    /// Current settings, or the lazily-created default record
    async fn current_settings(&self) -> Result<AuthSettings> {
        Ok(self.store.get_settings().await?.unwrap_or_default())
    }

    /// Set up (or replace) the password
    ///
    /// The stored method becomes `Biometric` if biometrics are already
    /// enabled, else `Password`.
    pub async fn setup_password(&self, password: &str) -> Result<()> {
        if password.chars().count() < MIN_PASSWORD_LENGTH {
            return Err(AuthError::PasswordTooShort {
                min: MIN_PASSWORD_LENGTH,
            });
        }

        let mut settings = self.current_settings().await?;
        settings.password_hash = Some(SaltedHash::generate(password).encode());
        settings.recompute_method();
        self.store.upsert_settings(settings).await?;

        info!("password configured");
        self.events.notify_auth_changed();
        Ok(())
    }

    /// Verify a candidate password against the stored hash
    ///
    /// Returns `false` when no hash is stored. A legacy plaintext value that
    /// matches is transparently re-hashed to the salted form; that upgrade
    /// is best-effort and never affects the verification result.
    pub async fn verify_password(&self, candidate: &str) -> Result<bool> {
        let settings = self.store.get_settings().await?;
        let Some(stored) = settings.as_ref().and_then(|s| s.password_hash.clone()) else {
            return Ok(false);
        };

        if let Some(hash) = SaltedHash::parse(&stored) {
            return Ok(hash.matches(candidate));
        }
        if stored.contains(SALT_SEPARATOR) {
            // Separator present but undecodable: corrupt, never matches
            warn!("stored password hash is malformed");
            return Ok(false);
        }

        // Legacy plaintext value
        if stored != candidate {
            return Ok(false);
        }
        if let Err(e) = self.upgrade_legacy_hash(candidate).await {
            warn!(error = %e, "legacy password hash upgrade failed");
        }
        Ok(true)
    }

    /// Re-hash a verified legacy plaintext value to the salted form
    async fn upgrade_legacy_hash(&self, password: &str) -> Result<()> {
        let mut settings = self.current_settings().await?;
        settings.password_hash = Some(SaltedHash::generate(password).encode());
        self.store.upsert_settings(settings).await?;
        info!("legacy password hash upgraded to salted form");
        Ok(())
    }

    /// Enable biometric unlock
    ///
    /// Short-circuits with `CapabilityUnavailable` before touching storage
    /// when the platform cannot actually run a biometric challenge.
    pub async fn setup_biometric(&self) -> Result<()> {
        if !self.policy.is_biometric_available() {
            return Err(AuthError::CapabilityUnavailable);
        }

        let mut settings = self.current_settings().await?;
        settings.biometrics_enabled = true;
        settings.recompute_method();
        self.store.upsert_settings(settings).await?;

        info!("biometric unlock enabled");
        self.events.notify_auth_changed();
        Ok(())
    }

    /// Disable biometric unlock, falling back to password if one is set
    pub async fn disable_biometric(&self) -> Result<()> {
        let mut settings = self.current_settings().await?;
        settings.biometrics_enabled = false;
        settings.recompute_method();
        self.store.upsert_settings(settings).await?;

        info!("biometric unlock disabled");
        self.events.notify_auth_changed();
        Ok(())
    }

    /// Remove the password, leaving biometric enforcement if enabled
    pub async fn disable_password(&self) -> Result<()> {
        let mut settings = self.current_settings().await?;
        settings.password_hash = None;
        settings.recompute_method();
        self.store.upsert_settings(settings).await?;

        info!("password removed");
        self.events.notify_auth_changed();
        Ok(())
    }

    /// Disable all authentication
    ///
    /// The only destructive, security-relevant write in the gate, so the
    /// only one with an explicit durability check: one bounded delay, one
    /// re-read. If the re-read does not show `AuthMethod::None` this fails
    /// with `PersistenceFailed` instead of reporting success.
    pub async fn disable_authentication(&self) -> Result<()> {
        let mut settings = self.current_settings().await?;
        settings.auth_method = AuthMethod::None;
        settings.password_hash = None;
        settings.biometrics_enabled = false;
        self.store.upsert_settings(settings).await?;

        tokio::time::sleep(DURABILITY_CHECK_DELAY).await;

        let confirmed = self.store.get_settings().await?;
        if let Some(read_back) = confirmed {
            if read_back.auth_method != AuthMethod::None {
                warn!("disable-authentication re-read still shows auth enabled");
                return Err(AuthError::PersistenceFailed);
            }
        }

        info!("all authentication disabled");
        self.events.notify_auth_changed();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{BiometricProbe, BiometricType, PlatformCapabilities};
    use crate::settings::MemorySettingsStore;
    use async_trait::async_trait;

    struct NoProbe;

    #[async_trait]
    impl BiometricProbe for NoProbe {
        fn has_hardware(&self) -> bool {
            false
        }
        fn is_enrolled(&self) -> bool {
            false
        }
        fn supported_types(&self) -> Vec<BiometricType> {
            vec![]
        }
        async fn challenge(&self, _prompt: &str) -> Result<bool> {
            Ok(false)
        }
    }

    struct EnrolledProbe;

    #[async_trait]
    impl BiometricProbe for EnrolledProbe {
        fn has_hardware(&self) -> bool {
            true
        }
        fn is_enrolled(&self) -> bool {
            true
        }
        fn supported_types(&self) -> Vec<BiometricType> {
            vec![BiometricType::Fingerprint]
        }
        async fn challenge(&self, _prompt: &str) -> Result<bool> {
            Ok(true)
        }
    }

    fn manager_with(
        store: Arc<MemorySettingsStore>,
        capabilities: PlatformCapabilities,
        probe: Arc<dyn BiometricProbe>,
    ) -> CredentialManager {
        CredentialManager::new(
            store,
            Arc::new(PolicyResolver::new(capabilities, probe)),
            Arc::new(AuthEventBus::new()),
        )
    }

    fn capable_manager(store: Arc<MemorySettingsStore>) -> CredentialManager {
        manager_with(
            store,
            PlatformCapabilities::biometric_capable(),
            Arc::new(EnrolledProbe),
        )
    }

    #[test]
    fn test_salted_hash_roundtrip() {
        let hash = SaltedHash::generate("hunter2");
        assert!(hash.matches("hunter2"));
        assert!(!hash.matches("hunter3"));

        let reparsed = SaltedHash::parse(&hash.encode()).unwrap();
        assert_eq!(reparsed, hash);
    }

    #[test]
    fn test_salted_hash_rejects_legacy_and_malformed() {
        assert!(SaltedHash::parse("plaintext").is_none());
        assert!(SaltedHash::parse("nothex:zz").is_none());
        assert!(SaltedHash::parse("abcd:1234").is_none());
    }

    #[tokio::test]
    async fn test_setup_and_verify_password() {
        let store = Arc::new(MemorySettingsStore::new());
        let manager = capable_manager(Arc::clone(&store));

        manager.setup_password("pass1234").await.unwrap();
        assert!(manager.verify_password("pass1234").await.unwrap());
        assert!(!manager.verify_password("pass1234x").await.unwrap());

        let settings = store.get_settings().await.unwrap().unwrap();
        assert_eq!(settings.auth_method, AuthMethod::Password);
        assert!(settings.password_hash.unwrap().contains(':'));
    }

    #[tokio::test]
    async fn test_setup_password_too_short() {
        let manager = capable_manager(Arc::new(MemorySettingsStore::new()));
        let err = manager.setup_password("abc").await.unwrap_err();
        assert!(matches!(err, AuthError::PasswordTooShort { min: 4 }));
    }

    #[tokio::test]
    async fn test_verify_without_stored_hash() {
        let manager = capable_manager(Arc::new(MemorySettingsStore::new()));
        assert!(!manager.verify_password("anything").await.unwrap());
    }

    #[tokio::test]
    async fn test_legacy_hash_upgrades_on_verification() {
        let store = Arc::new(MemorySettingsStore::with_settings(AuthSettings {
            auth_method: AuthMethod::Password,
            password_hash: Some("secret".to_string()),
            biometrics_enabled: false,
            version: 1,
        }));
        let manager = capable_manager(Arc::clone(&store));

        // A wrong candidate does not trigger the upgrade
        assert!(!manager.verify_password("wrong").await.unwrap());
        assert_eq!(
            store.get_settings().await.unwrap().unwrap().password_hash,
            Some("secret".to_string())
        );

        // The right one verifies and upgrades
        assert!(manager.verify_password("secret").await.unwrap());
        let upgraded = store
            .get_settings()
            .await
            .unwrap()
            .unwrap()
            .password_hash
            .unwrap();
        assert_ne!(upgraded, "secret");
        assert!(upgraded.contains(':'));

        // And keeps verifying afterwards
        assert!(manager.verify_password("secret").await.unwrap());
        assert!(!manager.verify_password("secretx").await.unwrap());
    }

    #[tokio::test]
    async fn test_setup_password_preserves_biometric_flag() {
        let store = Arc::new(MemorySettingsStore::with_settings(AuthSettings {
            auth_method: AuthMethod::Biometric,
            password_hash: None,
            biometrics_enabled: true,
            version: 1,
        }));
        let manager = capable_manager(Arc::clone(&store));

        manager.setup_password("pass1234").await.unwrap();

        let settings = store.get_settings().await.unwrap().unwrap();
        assert!(settings.biometrics_enabled);
        // Biometric stays the stored method when both are set
        assert_eq!(settings.auth_method, AuthMethod::Biometric);
    }

    #[tokio::test]
    async fn test_setup_biometric_short_circuits_without_capability() {
        let store = Arc::new(MemorySettingsStore::new());
        let manager = manager_with(
            Arc::clone(&store),
            PlatformCapabilities::headless(),
            Arc::new(NoProbe),
        );

        let err = manager.setup_biometric().await.unwrap_err();
        assert!(matches!(err, AuthError::CapabilityUnavailable));
        // Storage untouched
        assert!(store.get_settings().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_disable_biometric_falls_back_to_password() {
        let store = Arc::new(MemorySettingsStore::new());
        let manager = capable_manager(Arc::clone(&store));

        manager.setup_password("pass1234").await.unwrap();
        manager.setup_biometric().await.unwrap();
        assert_eq!(
            store.get_settings().await.unwrap().unwrap().auth_method,
            AuthMethod::Biometric
        );

        manager.disable_biometric().await.unwrap();
        let settings = store.get_settings().await.unwrap().unwrap();
        assert_eq!(settings.auth_method, AuthMethod::Password);
        assert!(settings.password_hash.is_some());
    }

    #[tokio::test]
    async fn test_disable_password_keeps_biometric() {
        let store = Arc::new(MemorySettingsStore::new());
        let manager = capable_manager(Arc::clone(&store));

        manager.setup_password("pass1234").await.unwrap();
        manager.setup_biometric().await.unwrap();
        manager.disable_password().await.unwrap();

        let settings = store.get_settings().await.unwrap().unwrap();
        assert_eq!(settings.auth_method, AuthMethod::Biometric);
        assert!(settings.password_hash.is_none());
        assert!(settings.biometrics_enabled);
    }

    #[tokio::test]
    async fn test_disable_authentication_clears_everything() {
        let store = Arc::new(MemorySettingsStore::new());
        let manager = capable_manager(Arc::clone(&store));

        manager.setup_password("pass1234").await.unwrap();
        manager.setup_biometric().await.unwrap();
        manager.disable_authentication().await.unwrap();

        let settings = store.get_settings().await.unwrap().unwrap();
        assert_eq!(settings.auth_method, AuthMethod::None);
        assert!(settings.password_hash.is_none());
        assert!(!settings.biometrics_enabled);
    }

    #[tokio::test]
    async fn test_disable_authentication_detects_stale_write() {
        let store = Arc::new(MemorySettingsStore::with_settings(AuthSettings {
            auth_method: AuthMethod::Password,
            password_hash: Some("aa:bb".to_string()),
            biometrics_enabled: false,
            version: 1,
        }));
        let manager = capable_manager(Arc::clone(&store));

        store.set_stale_writes(true);
        let err = manager.disable_authentication().await.unwrap_err();
        assert!(matches!(err, AuthError::PersistenceFailed));
    }

    #[tokio::test]
    async fn test_mutators_fire_event_bus() {
        use std::sync::atomic::{AtomicU32, Ordering};

        let store = Arc::new(MemorySettingsStore::new());
        let events = Arc::new(AuthEventBus::new());
        let manager = CredentialManager::new(
            Arc::clone(&store) as Arc<dyn SettingsStore>,
            Arc::new(PolicyResolver::new(
                PlatformCapabilities::biometric_capable(),
                Arc::new(EnrolledProbe),
            )),
            Arc::clone(&events),
        );

        let hits = Arc::new(AtomicU32::new(0));
        let h = Arc::clone(&hits);
        let _sub = events.subscribe(move || {
            h.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        manager.setup_password("pass1234").await.unwrap();
        manager.setup_biometric().await.unwrap();
        manager.disable_biometric().await.unwrap();
        manager.disable_authentication().await.unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), 4);
    }
}
