//! Error types for quiesce.
//!
//! This module provides a unified error type [`QuiesceError`] for all
//! operations, along with a convenient [`Result`] type alias.
//!
//! The retry policies in [`crate::backoff`] classify errors into three
//! buckets via [`QuiesceError::is_retryable_transient`] and
//! [`QuiesceError::is_expected_terminal`]; everything else is treated as
//! unexpected and stops a retry loop immediately.

use std::io;
use thiserror::Error;

/// Main error type for quiesce operations.
#[derive(Error, Debug)]
pub enum QuiesceError {
    // Control-plane errors
    #[error("cluster unreachable: {0}")]
    ClusterUnreachable(String),

    #[error("control plane returned [{status}] {body} ({url})")]
    ControlPlane {
        status: u16,
        body: String,
        url: String,
    },

    #[error("network error: {0}")]
    Network(String),

    #[error("failed to restore schedule config: {0}")]
    ConfigRestore(String),

    // Data-transfer errors, classified by the retry policies
    #[error("region epoch not match: {0}")]
    EpochMismatch(String),

    #[error("download failed: {0}")]
    DownloadFailed(String),

    #[error("ingest failed: {0}")]
    IngestFailed(String),

    #[error("range is empty")]
    RangeIsEmpty,

    #[error("rewrite rule not found: {0}")]
    RewriteRuleNotFound(String),

    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("aborted: {0}")]
    Aborted(String),

    // Cluster errors
    #[error("unsupported store: {0}")]
    UnsupportedStore(String),

    // Configuration errors
    #[error("invalid configuration: {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    // External errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl QuiesceError {
    /// Check if the error is a transient data-transfer failure worth
    /// retrying with backoff.
    pub fn is_retryable_transient(&self) -> bool {
        matches!(
            self,
            QuiesceError::EpochMismatch(_)
                | QuiesceError::DownloadFailed(_)
                | QuiesceError::IngestFailed(_)
                | QuiesceError::Unavailable(_)
                | QuiesceError::Aborted(_)
        )
    }

    /// Check if the error marks an expected end of the operation, to be
    /// reported to the caller without further retries but not treated as a
    /// failure.
    pub fn is_expected_terminal(&self) -> bool {
        matches!(
            self,
            QuiesceError::RangeIsEmpty | QuiesceError::RewriteRuleNotFound(_)
        )
    }
}

impl From<reqwest::Error> for QuiesceError {
    fn from(e: reqwest::Error) -> Self {
        QuiesceError::Network(e.to_string())
    }
}

/// Result type alias for quiesce operations.
pub type Result<T> = std::result::Result<T, QuiesceError>;
