//! Error types for scan setup, capture and sink delivery.
use std::time::Duration;

use thiserror::Error;

/// Failures raised by the packet capture engine.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CaptureError {
    #[error("permission denied on {interface}: packet capture needs root or CAP_NET_RAW ({reason})")]
    PermissionDenied { interface: String, reason: String },

    #[error("capture setup failed on {interface}: {reason}")]
    Setup { interface: String, reason: String },

    #[error("capture failed: {0}")]
    Runtime(String),
}

impl CaptureError {
    /// Sort a libpcap setup message into a permission or a generic setup failure.
    pub fn from_setup_message(interface: &str, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        let lower = reason.to_ascii_lowercase();
        let interface = interface.to_string();
        if lower.contains("permission") || lower.contains("not permitted") {
            CaptureError::PermissionDenied { interface, reason }
        } else {
            CaptureError::Setup { interface, reason }
        }
    }
}

/// Failures returned by scan lifecycle operations.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("no interface has an address starting with {prefix:?}")]
    NoInterfaceFound { prefix: String },

    #[error("failed to enumerate network interfaces: {0}")]
    Enumerate(String),

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error("a scan is already running")]
    ScanAlreadyRunning,

    #[error("no scan is running")]
    NotRunning,
}

/// Failures delivering one observation to one sink. Never fatal.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("backend responded with {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    #[error("store I/O error: {0}")]
    Store(#[from] std::io::Error),

    #[error("encoding error: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}
