//! Persisted authentication settings and the settings-store collaborator
//!
//! The gate owns a single small record. Several independent flows mutate it
//! (set up password, set up biometric, disable either), so every mutator
//! reads the latest record and rewrites only the fields it owns:
//! last-writer-preserves-others, not transactional isolation.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{AuthError, Result};

/// Storage format version for future migrations
const SETTINGS_VERSION: u32 = 1;

/// The authentication method recorded or enforced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AuthMethod {
    /// No authentication required
    #[default]
    None,
    /// Password challenge
    Password,
    /// Biometric challenge (face, fingerprint, iris)
    Biometric,
}

/// Persisted authentication settings
///
/// Created lazily on the first setup call. Never deleted, only nulled back
/// to `AuthMethod::None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSettings {
    /// Stored user preference (enforcement may differ, see `PolicyResolver`)
    pub auth_method: AuthMethod,

    /// Salted password hash in `"salt:digest"` form, or a legacy plaintext
    /// value from earlier app versions
    pub password_hash: Option<String>,

    /// Whether the user enabled biometric unlock
    pub biometrics_enabled: bool,

    /// Storage format version
    #[serde(default = "default_version")]
    pub version: u32,
}

fn default_version() -> u32 {
    SETTINGS_VERSION
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            auth_method: AuthMethod::None,
            password_hash: None,
            biometrics_enabled: false,
            version: SETTINGS_VERSION,
        }
    }
}

impl AuthSettings {
    /// Recompute the stored method from the credential fields
    ///
    /// Priority rule: biometric wins when enabled, then password when a hash
    /// exists, else none.
    pub fn recompute_method(&mut self) {
        self.auth_method = if self.biometrics_enabled {
            AuthMethod::Biometric
        } else if self.password_hash.is_some() {
            AuthMethod::Password
        } else {
            AuthMethod::None
        };
    }
}

/// Settings-store collaborator
///
/// Reads are assumed read-after-write visible within a bounded delay
/// (~200 ms); the destructive disable-all path re-reads once after that
/// delay to confirm durability.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Fetch the current settings record, if one was ever created
    async fn get_settings(&self) -> Result<Option<AuthSettings>>;

    /// Persist the full settings record
    ///
    /// Mutators achieve partial updates by read-modify-write: they fetch the
    /// latest record first and touch only their own fields.
    async fn upsert_settings(&self, settings: AuthSettings) -> Result<()>;
}

/// In-memory settings store
///
/// Used by tests and host-side harnesses. The staleness knob simulates a
/// backend whose writes do not become visible, which is how the durability
/// check on the disable-all path is exercised.
#[derive(Default)]
pub struct MemorySettingsStore {
    current: Mutex<Option<AuthSettings>>,
    /// Writes land in `shadow` instead of `current` while set
    stale_writes: AtomicBool,
    shadow: Mutex<Option<AuthSettings>>,
}

impl MemorySettingsStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-seeded with a settings record
    pub fn with_settings(settings: AuthSettings) -> Self {
        let store = Self::default();
        *store.current.lock().unwrap() = Some(settings);
        store
    }

    /// Toggle stale-write simulation: while on, writes are accepted but
    /// reads keep returning the previous record
    pub fn set_stale_writes(&self, stale: bool) {
        self.stale_writes.store(stale, Ordering::SeqCst);
    }

    /// Last value written, regardless of staleness simulation
    pub fn last_written(&self) -> Option<AuthSettings> {
        if self.stale_writes.load(Ordering::SeqCst) {
            self.shadow.lock().unwrap().clone()
        } else {
            self.current.lock().unwrap().clone()
        }
    }
}

#[async_trait]
impl SettingsStore for MemorySettingsStore {
    async fn get_settings(&self) -> Result<Option<AuthSettings>> {
        Ok(self.current.lock().unwrap().clone())
    }

    async fn upsert_settings(&self, settings: AuthSettings) -> Result<()> {
        if self.stale_writes.load(Ordering::SeqCst) {
            *self.shadow.lock().unwrap() = Some(settings);
        } else {
            *self.current.lock().unwrap() = Some(settings);
        }
        Ok(())
    }
}

/// File-backed settings store persisting a single JSON record
pub struct JsonSettingsStore {
    path: PathBuf,
}

impl JsonSettingsStore {
    /// Create a store at the given path, ensuring the parent directory exists
    pub fn new(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self { path })
    }

    /// Default settings path under the platform data directory
    pub fn default_path() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("applock")
            .join("auth_settings.json")
    }

    /// Path this store persists to
    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

#[async_trait]
impl SettingsStore for JsonSettingsStore {
    async fn get_settings(&self) -> Result<Option<AuthSettings>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => {
                let settings = serde_json::from_str(&contents)
                    .map_err(|e| AuthError::Storage(format!("failed to parse settings: {}", e)))?;
                Ok(Some(settings))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn upsert_settings(&self, settings: AuthSettings) -> Result<()> {
        let contents = serde_json::to_string_pretty(&settings)?;

        // Write atomically
        let temp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&temp_path, &contents).await?;
        tokio::fs::rename(&temp_path, &self.path).await?;

        // Set restrictive permissions (Unix only)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600)).await?;
        }

        Ok(())
    }
}
