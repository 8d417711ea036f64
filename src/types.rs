use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Verdict of the source-address heuristic for a single packet.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Legit,
    Spoofed,
}

/// One observed IP packet after classification.
///
/// Serializes as `{sourceIp, destinationIp, timestamp, status}`, which is both the status API
/// shape and the document written to the local store.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PacketObservation {
    pub source_ip: IpAddr,
    pub destination_ip: IpAddr,
    /// Capture time, RFC 3339 UTC.
    #[serde(rename = "timestamp", with = "time::serde::rfc3339")]
    pub captured_at: OffsetDateTime,
    #[serde(rename = "status")]
    pub classification: Classification,
}

impl PacketObservation {
    pub fn is_spoofed(&self) -> bool {
        self.classification == Classification::Spoofed
    }
}

/// Body sent to the reporting backend for one spoofed observation.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReportRecord {
    pub source_ip: IpAddr,
    pub destination_ip: IpAddr,
    /// Send time, RFC 3339 UTC. Deliberately not the capture time.
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub is_spoofed: bool,
    pub analysis_details: String,
}

/// Lifecycle state of the current scan session.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScanState {
    #[default]
    Idle,
    Running,
    Errored,
}

/// Point-in-time copy of the scan session returned by the status endpoint.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub is_scanning: bool,
    pub state: ScanState,
    #[serde(with = "time::serde::rfc3339::option")]
    pub started_at: Option<OffsetDateTime>,
    pub interface: Option<String>,
    pub results: Vec<PacketObservation>,
    pub error: Option<String>,
}
