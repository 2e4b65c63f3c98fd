//! Authentication method resolution
//!
//! The stored user preference is only a preference: what the gate actually
//! enforces depends on platform capability at resolution time. Platform
//! capability is injected once at startup as a plain value; policy logic
//! never branches on an OS identifier.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::settings::{AuthMethod, AuthSettings};

/// What the host platform can do, resolved once at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlatformCapabilities {
    /// Whether the platform has a supported biometric surface at all
    pub supports_biometric: bool,
}

impl PlatformCapabilities {
    /// A platform with a biometric surface (phones, most tablets)
    pub fn biometric_capable() -> Self {
        Self {
            supports_biometric: true,
        }
    }

    /// A platform without one (web, desktop shells)
    pub fn headless() -> Self {
        Self {
            supports_biometric: false,
        }
    }
}

/// Biometric factor kinds, in display-priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BiometricType {
    /// Face recognition
    Face,
    /// Fingerprint reader
    Fingerprint,
    /// Iris scanner
    Iris,
    /// Unspecified biometric factor
    Generic,
}

impl BiometricType {
    /// Human-readable label for prompts and settings rows
    pub fn label(&self) -> &'static str {
        match self {
            Self::Face => "Face ID",
            Self::Fingerprint => "Fingerprint",
            Self::Iris => "Iris",
            Self::Generic => "Biometric",
        }
    }
}

/// Biometric collaborator backed by the OS biometric API
#[async_trait]
pub trait BiometricProbe: Send + Sync {
    /// Whether biometric hardware is present
    fn has_hardware(&self) -> bool;

    /// Whether at least one biometric factor is enrolled
    fn is_enrolled(&self) -> bool;

    /// The factor kinds the device supports
    fn supported_types(&self) -> Vec<BiometricType>;

    /// Present the OS biometric challenge; `true` means the user passed
    async fn challenge(&self, prompt: &str) -> Result<bool>;
}

/// Derives the effective enforcement method from stored preference and
/// platform capability
pub struct PolicyResolver {
    capabilities: PlatformCapabilities,
    probe: Arc<dyn BiometricProbe>,
}

impl PolicyResolver {
    /// Create a resolver for the given platform and probe
    pub fn new(capabilities: PlatformCapabilities, probe: Arc<dyn BiometricProbe>) -> Self {
        Self {
            capabilities,
            probe,
        }
    }

    /// Whether biometric authentication can actually be used right now
    ///
    /// `false` unconditionally on platforms without a biometric surface;
    /// otherwise requires both hardware and an enrolled factor.
    pub fn is_biometric_available(&self) -> bool {
        if !self.capabilities.supports_biometric {
            return false;
        }
        self.probe.has_hardware() && self.probe.is_enrolled()
    }

    /// Best label for the device's biometric factor
    ///
    /// Priority: face, then fingerprint, then iris, then the generic label.
    pub fn biometric_type(&self) -> BiometricType {
        let supported = self.probe.supported_types();
        for preferred in [
            BiometricType::Face,
            BiometricType::Fingerprint,
            BiometricType::Iris,
        ] {
            if supported.contains(&preferred) {
                return preferred;
            }
        }
        BiometricType::Generic
    }

    /// Resolve the method the gate actually enforces
    ///
    /// On an incapable platform the biometric preference is ignored
    /// entirely, a silent downgrade to password enforcement, not an error.
    /// On a capable platform biometric takes priority whenever enabled,
    /// even if a password is also set.
    pub fn resolve_method(&self, settings: Option<&AuthSettings>) -> AuthMethod {
        let Some(settings) = settings else {
            return AuthMethod::None;
        };

        if !self.capabilities.supports_biometric {
            return if settings.password_hash.is_some() {
                AuthMethod::Password
            } else {
                AuthMethod::None
            };
        }

        if settings.biometrics_enabled {
            AuthMethod::Biometric
        } else if settings.password_hash.is_some() {
            AuthMethod::Password
        } else {
            AuthMethod::None
        }
    }

    /// Run the OS biometric challenge with a prompt naming the factor
    pub async fn challenge(&self) -> Result<bool> {
        let prompt = format!("Unlock with {}", self.biometric_type().label());
        self.probe.challenge(&prompt).await
    }
}
