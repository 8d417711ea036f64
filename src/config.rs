use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::capture::PcapOpener;
use crate::classify::DEFAULT_TRUSTED_PREFIX;
use crate::controller::ControllerConfig;
use crate::reporter::DEFAULT_REPORT_ENDPOINT;
use crate::store::DEFAULT_STORE_PATH;

/// Default listen address of the control API.
pub const DEFAULT_BIND: &str = "0.0.0.0:5002";

/// UI origins allowed by CORS when none are configured.
pub const DEFAULT_ALLOWED_ORIGINS: &[&str] = &["http://localhost:5173", "http://127.0.0.1:5173"];

/// Where and how to reach the reporting backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportSettings {
    pub endpoint: String,
    pub token: Option<String>,
}

/// Everything the library needs from the surrounding process.
#[derive(Debug, Clone)]
pub struct Settings {
    pub trusted_prefix: String,
    pub bind: SocketAddr,
    /// `None` means capture until stopped.
    pub scan_duration: Option<Duration>,
    /// `None` disables the backend reporter.
    pub report: Option<ReportSettings>,
    /// `None` disables the local store.
    pub store_path: Option<PathBuf>,
    pub sink_timeout: Duration,
    pub queue_capacity: usize,
    pub capture: PcapOpener,
    pub allowed_origins: Vec<String>,
}

impl Settings {
    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            trusted_prefix: self.trusted_prefix.clone(),
            scan_duration: self.scan_duration,
            channel_capacity: self.queue_capacity,
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            trusted_prefix: DEFAULT_TRUSTED_PREFIX.into(),
            bind: SocketAddr::from(([0, 0, 0, 0], 5002)),
            scan_duration: Some(Duration::from_secs(10)),
            report: Some(ReportSettings {
                endpoint: DEFAULT_REPORT_ENDPOINT.into(),
                token: None,
            }),
            store_path: Some(PathBuf::from(DEFAULT_STORE_PATH)),
            sink_timeout: Duration::from_secs(5),
            queue_capacity: 1024,
            capture: PcapOpener::default(),
            allowed_origins: DEFAULT_ALLOWED_ORIGINS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let s = Settings::default();
        assert_eq!(s.bind.to_string(), DEFAULT_BIND);
        assert_eq!(s.trusted_prefix, "192.168.");
        assert_eq!(s.scan_duration, Some(Duration::from_secs(10)));
        assert_eq!(s.capture.filter, "ip");
        assert_eq!(s.allowed_origins.len(), 2);
    }

    #[test]
    fn controller_config_carries_duration_and_prefix() {
        let s = Settings {
            trusted_prefix: "10.".into(),
            scan_duration: None,
            queue_capacity: 8,
            ..Settings::default()
        };
        let c = s.controller_config();
        assert_eq!(c.trusted_prefix, "10.");
        assert_eq!(c.scan_duration, None);
        assert_eq!(c.channel_capacity, 8);
    }
}
