//! HTTP client for the remote reporting backend.
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use time::OffsetDateTime;
use tracing::info;

use crate::error::SinkError;
use crate::sinks::ObservationSink;
use crate::types::{PacketObservation, ReportRecord};

pub const DEFAULT_REPORT_ENDPOINT: &str = "http://localhost:5001/api/reports";

/// Posts one [`ReportRecord`] per spoofed observation. Only `201 Created` counts as success.
#[derive(Debug, Clone)]
pub struct BackendReporter {
    client: Client,
    endpoint: String,
    token: Option<String>,
}

impl BackendReporter {
    pub fn new(client: Client, endpoint: impl Into<String>, token: Option<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            token,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }
}

/// Build the backend payload. `sent_at` is the send time, not the capture time.
pub fn build_report(observation: &PacketObservation, sent_at: OffsetDateTime) -> ReportRecord {
    ReportRecord {
        source_ip: observation.source_ip,
        destination_ip: observation.destination_ip,
        timestamp: sent_at,
        is_spoofed: observation.is_spoofed(),
        analysis_details: format!("Detected abnormal packet from {}", observation.source_ip),
    }
}

#[async_trait]
impl ObservationSink for BackendReporter {
    fn name(&self) -> &'static str {
        "backend"
    }

    async fn deliver(&self, observation: &PacketObservation) -> Result<(), SinkError> {
        let record = build_report(observation, OffsetDateTime::now_utc());
        let mut req = self.client.post(&self.endpoint).json(&record);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }

        let resp = req.send().await?;
        let status = resp.status();
        if status == StatusCode::CREATED {
            info!(source = %record.source_ip, "reported to backend");
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        Err(SinkError::UnexpectedStatus {
            status: status.as_u16(),
            body,
        })
    }
}
