// SPDX-License-Identifier: PMPL-1.0-or-later
//
// Proxy configuration: the §6 command surface, serializable for tests and
// for a future config-file front end even though the CLI is the only
// producer today.

use serde::{Deserialize, Serialize};

/// Where the local device password comes from. Never cached beyond the
/// single request/response that needs it (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PasswordSource {
    /// Supplied directly on the command line.
    Inline(String),
    /// Name of an environment variable to read at connect time.
    EnvVar(String),
    /// No credential configured; the device does not require one.
    None,
}

impl Default for PasswordSource {
    fn default() -> Self {
        Self::None
    }
}

/// Resolves a [`PasswordSource`] to an actual credential at the point of
/// use, never caching the result beyond that single call (§6).
pub trait PasswordSupplier: Send + Sync {
    fn resolve(&self) -> Option<String>;
}

impl PasswordSupplier for PasswordSource {
    fn resolve(&self) -> Option<String> {
        match self {
            Self::Inline(value) => Some(value.clone()),
            Self::EnvVar(name) => std::env::var(name).ok(),
            Self::None => None,
        }
    }
}

/// Resolved configuration for a single proxy run.
///
/// Unlike a UI-preferences config, `ProxyConfig` has no sensible defaults
/// for the two required URIs — they must come from the caller — but
/// `preferred_output_format` and `verbosity` do default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// URI of the cloud-side Infrastructure Printer (the remote queue).
    pub infrastructure_uri: String,
    /// URI of the local output device: `ipp://`, `ipps://`, or `socket://`.
    pub device_uri: String,
    /// Output document format to advertise, overriding auto-negotiation.
    pub preferred_output_format: Option<String>,
    /// Username presented to the Infrastructure Printer, if any.
    pub username: Option<String>,
    pub password_source: PasswordSource,
    /// Number of `-v` flags; 0 is warn-level, each added `-v` drops one level.
    pub verbosity: u8,
}

impl ProxyConfig {
    pub fn new(infrastructure_uri: impl Into<String>, device_uri: impl Into<String>) -> Self {
        Self {
            infrastructure_uri: infrastructure_uri.into(),
            device_uri: device_uri.into(),
            preferred_output_format: None,
            username: None,
            password_source: PasswordSource::None,
            verbosity: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_defaults_format_and_verbosity() {
        let cfg = ProxyConfig::new("ipp://infra.example/printers/q1", "ipp://device.local:631/ipp/print");
        assert!(cfg.preferred_output_format.is_none());
        assert_eq!(cfg.verbosity, 0);
        assert!(matches!(cfg.password_source, PasswordSource::None));
    }
}
