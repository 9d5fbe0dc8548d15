//! Connection configuration for the cluster coordinator.

use crate::error::{QuiesceError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default request timeout for control-plane calls.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// TLS material for a secured control plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsOptions {
    /// Path to the CA certificate bundle (PEM).
    pub ca_path: PathBuf,
    /// Path to the client certificate (PEM).
    pub cert_path: PathBuf,
    /// Path to the client private key (PEM).
    pub key_path: PathBuf,
}

/// Options for connecting to the cluster's control plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectOptions {
    /// Comma-separated control-plane addresses, with or without scheme.
    pub endpoints: String,
    /// Optional TLS material; when set, schemeless addresses get `https`.
    #[serde(default)]
    pub tls: Option<TlsOptions>,
    /// Per-request timeout.
    #[serde(default = "default_request_timeout")]
    pub request_timeout: Duration,
}

fn default_request_timeout() -> Duration {
    DEFAULT_REQUEST_TIMEOUT
}

impl ConnectOptions {
    /// Options for a plain-HTTP control plane.
    pub fn new(endpoints: impl Into<String>) -> Self {
        Self {
            endpoints: endpoints.into(),
            tls: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Attach TLS material.
    pub fn with_tls(mut self, tls: TlsOptions) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Validate the options.
    pub fn validate(&self) -> Result<()> {
        if self.endpoints.split(',').all(|a| a.trim().is_empty()) {
            return Err(QuiesceError::InvalidConfig {
                field: "endpoints".to_string(),
                reason: "at least one control-plane address is required".to_string(),
            });
        }
        if self.request_timeout.is_zero() {
            return Err(QuiesceError::InvalidConfig {
                field: "request_timeout".to_string(),
                reason: "timeout must be non-zero".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rejects_empty_endpoints() {
        assert!(ConnectOptions::new("").validate().is_err());
        assert!(ConnectOptions::new(" , ").validate().is_err());
        assert!(ConnectOptions::new("127.0.0.1:2379").validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let mut options = ConnectOptions::new("127.0.0.1:2379");
        options.request_timeout = Duration::ZERO;
        assert!(options.validate().is_err());
    }
}
