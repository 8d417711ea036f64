//! Scan lifecycle: `Idle -> Running -> {Idle, Errored}`.
//!
//! One [`ScanSession`] lives behind a single mutex. The capture loop runs on a blocking thread
//! and feeds a bounded channel; a controller task drains it, classifies, records spoofed
//! observations and queues them for the sink worker. No I/O happens under the session lock.
use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tokio::sync::{mpsc, watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::capture::{run_capture, CaptureOpener, CaptureSummary, CapturedPacket, PacketSource};
use crate::classify::Classifier;
use crate::error::{CaptureError, ScanError};
use crate::netdetect::{resolve_interface, InterfaceSource};
use crate::sinks::Dispatcher;
use crate::types::{Classification, PacketObservation, ScanState, StatusSnapshot};

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub trusted_prefix: String,
    /// `Some` bounds each scan; `None` captures until stopped.
    pub scan_duration: Option<Duration>,
    /// Capacity of the capture-to-controller channel.
    pub channel_capacity: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            trusted_prefix: crate::classify::DEFAULT_TRUSTED_PREFIX.into(),
            scan_duration: Some(Duration::from_secs(10)),
            channel_capacity: 1024,
        }
    }
}

/// Acknowledgement returned by a successful start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartAck {
    pub interface: String,
    pub message: String,
}

#[derive(Debug, Default)]
struct ScanSession {
    state: ScanState,
    started_at: Option<OffsetDateTime>,
    interface: Option<String>,
    results: Vec<PacketObservation>,
    error: Option<String>,
    cancel: Option<CancellationToken>,
}

impl ScanSession {
    fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            is_scanning: self.state == ScanState::Running,
            state: self.state,
            started_at: self.started_at,
            interface: self.interface.clone(),
            results: self.results.clone(),
            error: self.error.clone(),
        }
    }
}

struct Inner {
    session: Mutex<ScanSession>,
    // Held for the whole of a start so setup I/O can run outside the session lock.
    start_lock: Mutex<()>,
    classifier: Classifier,
    interfaces: Arc<dyn InterfaceSource>,
    opener: Arc<dyn CaptureOpener>,
    dispatcher: Dispatcher,
    scan_duration: Option<Duration>,
    channel_capacity: usize,
    state_tx: watch::Sender<ScanState>,
}

/// Shared handle to the scan state machine. Clones refer to the same session.
#[derive(Clone)]
pub struct ScanController {
    inner: Arc<Inner>,
}

impl ScanController {
    pub fn new(
        config: ControllerConfig,
        interfaces: Arc<dyn InterfaceSource>,
        opener: Arc<dyn CaptureOpener>,
        dispatcher: Dispatcher,
    ) -> Self {
        let (state_tx, _) = watch::channel(ScanState::Idle);
        Self {
            inner: Arc::new(Inner {
                session: Mutex::new(ScanSession::default()),
                start_lock: Mutex::new(()),
                classifier: Classifier::new(config.trusted_prefix),
                interfaces,
                opener,
                dispatcher,
                scan_duration: config.scan_duration,
                channel_capacity: config.channel_capacity.max(1),
                state_tx,
            }),
        }
    }

    pub fn scan_duration(&self) -> Option<Duration> {
        self.inner.scan_duration
    }

    /// Resolve an interface, open the capture and launch the pipeline in the background.
    ///
    /// Fails with [`ScanError::ScanAlreadyRunning`] while a scan runs. Setup failures leave the
    /// previous session untouched.
    pub async fn start_scan(&self) -> Result<StartAck, ScanError> {
        let _starting = self.inner.start_lock.lock().await;
        if self.inner.session.lock().await.state == ScanState::Running {
            return Err(ScanError::ScanAlreadyRunning);
        }

        let interfaces = Arc::clone(&self.inner.interfaces);
        let opener = Arc::clone(&self.inner.opener);
        let prefix = self.inner.classifier.trusted_prefix().to_string();
        let (interface, source) = tokio::task::spawn_blocking(move || {
            let list = interfaces.interfaces()?;
            let name = resolve_interface(&list, &prefix)?;
            let source = opener.open(&name)?;
            Ok::<_, ScanError>((name, source))
        })
        .await
        .map_err(|e| CaptureError::Runtime(format!("capture setup task failed: {e}")))??;

        let cancel = CancellationToken::new();
        {
            let mut session = self.inner.session.lock().await;
            *session = ScanSession {
                state: ScanState::Running,
                started_at: Some(OffsetDateTime::now_utc()),
                interface: Some(interface.clone()),
                results: Vec::new(),
                error: None,
                cancel: Some(cancel.clone()),
            };
        }
        self.inner.state_tx.send_replace(ScanState::Running);
        info!(%interface, duration = ?self.inner.scan_duration, "scan started");

        self.spawn_pipeline(source, cancel);
        Ok(StartAck {
            interface,
            message: "Scan started successfully".into(),
        })
    }

    fn spawn_pipeline(&self, source: Box<dyn PacketSource>, cancel: CancellationToken) {
        let (tx, mut rx) = mpsc::channel(self.inner.channel_capacity);
        let limit = self.inner.scan_duration;
        let capture = tokio::task::spawn_blocking(move || run_capture(source, limit, cancel, tx));

        let this = self.clone();
        tokio::spawn(async move {
            while let Some(packet) = rx.recv().await {
                this.on_packet_observed(packet).await;
            }
            let outcome = match capture.await {
                Ok(result) => result,
                Err(e) => Err(CaptureError::Runtime(format!("capture thread failed: {e}"))),
            };
            this.on_capture_complete(outcome).await;
        });
    }

    /// Classify one packet; record and forward it if spoofed.
    pub(crate) async fn on_packet_observed(&self, packet: CapturedPacket) -> PacketObservation {
        let classification = self.inner.classifier.classify(&packet.source.to_string());
        let observation = PacketObservation {
            source_ip: packet.source,
            destination_ip: packet.destination,
            captured_at: packet.captured_at,
            classification,
        };

        match classification {
            Classification::Legit => {
                debug!(source = %packet.source, destination = %packet.destination, "legit packet");
            }
            Classification::Spoofed => {
                warn!(
                    source = %packet.source,
                    destination = %packet.destination,
                    "spoofed source address detected"
                );
                let recorded = {
                    let mut session = self.inner.session.lock().await;
                    if session.state == ScanState::Running {
                        session.results.push(observation.clone());
                        true
                    } else {
                        false
                    }
                };
                if recorded {
                    self.inner.dispatcher.dispatch(observation.clone());
                }
            }
        }
        observation
    }

    pub(crate) async fn on_capture_complete(&self, outcome: Result<CaptureSummary, CaptureError>) {
        let (state, spoofed) = {
            let mut session = self.inner.session.lock().await;
            if session.state != ScanState::Running {
                return;
            }
            session.cancel = None;
            match &outcome {
                Ok(_) => session.state = ScanState::Idle,
                Err(e) => {
                    session.state = ScanState::Errored;
                    session.error = Some(e.to_string());
                }
            }
            (session.state, session.results.len())
        };
        self.inner.state_tx.send_replace(state);

        match outcome {
            Ok(summary) => info!(
                ip_packets = summary.ip_packets,
                skipped = summary.skipped,
                stopped = summary.stopped,
                spoofed,
                "scan finished"
            ),
            Err(e) => error!(error = %e, spoofed, "scan aborted"),
        }
    }

    /// Ask the running capture to stop. The session becomes Idle once the loop unwinds.
    pub async fn stop_scan(&self) -> Result<(), ScanError> {
        let session = self.inner.session.lock().await;
        match (&session.state, &session.cancel) {
            (ScanState::Running, Some(cancel)) => {
                cancel.cancel();
                info!("scan stop requested");
                Ok(())
            }
            _ => Err(ScanError::NotRunning),
        }
    }

    pub async fn status(&self) -> StatusSnapshot {
        self.inner.session.lock().await.snapshot()
    }

    pub async fn results(&self) -> Vec<PacketObservation> {
        self.inner.session.lock().await.results.clone()
    }

    pub async fn state(&self) -> ScanState {
        self.inner.session.lock().await.state
    }

    /// Resolve once the current session is no longer Running.
    pub async fn wait_for_completion(&self) -> ScanState {
        let mut rx = self.inner.state_tx.subscribe();
        let finished = rx.wait_for(|s| *s != ScanState::Running).await.map(|s| *s);
        match finished {
            Ok(state) => state,
            Err(_) => self.state().await,
        }
    }
}
