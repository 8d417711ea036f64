use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{info, warn};

use spoofwatch::app::{self, App};
use spoofwatch::capture::PcapOpener;
use spoofwatch::config::{ReportSettings, Settings, DEFAULT_ALLOWED_ORIGINS, DEFAULT_BIND};
use spoofwatch::netdetect::SystemInterfaces;
use spoofwatch::reporter::DEFAULT_REPORT_ENDPOINT;
use spoofwatch::server::{self, AppState};
use spoofwatch::store::DEFAULT_STORE_PATH;
use spoofwatch::{logging, types::ScanState};

/// spoofwatch — flag packets whose source address falls outside the trusted subnet.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "spoofwatch",
    version,
    about = "Capture LAN traffic, flag spoofed source addresses and report them.",
    long_about = None
)]
struct Cli {
    /// Source addresses starting with this text are legit; everything else is spoofed.
    /// Also selects the capture interface.
    #[arg(long, env = "SPOOFWATCH_TRUSTED_PREFIX", default_value = "192.168.")]
    trusted_prefix: String,

    /// Listen address for the control API.
    #[arg(long, env = "SPOOFWATCH_BIND", default_value = DEFAULT_BIND)]
    bind: SocketAddr,

    /// Duration of an API-triggered scan in seconds (0 = until stopped).
    #[arg(long = "scan-secs", env = "SPOOFWATCH_SCAN_SECS", default_value_t = 10)]
    scan_secs: u64,

    /// Capture continuously without the HTTP API until Ctrl+C.
    #[arg(long, default_value_t = false)]
    monitor: bool,

    /// Reporting backend endpoint.
    #[arg(long, env = "SPOOFWATCH_REPORT_ENDPOINT", default_value = DEFAULT_REPORT_ENDPOINT)]
    report_endpoint: String,

    /// Bearer token sent to the reporting backend.
    #[arg(long, env = "SPOOFBUSTERS_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Do not send reports to the backend.
    #[arg(long = "no-report", default_value_t = false)]
    no_report: bool,

    /// JSON-lines file used as the local backup store.
    #[arg(long, env = "SPOOFWATCH_STORE_PATH", default_value = DEFAULT_STORE_PATH)]
    store_path: PathBuf,

    /// Do not write observations to the local store.
    #[arg(long = "no-store", default_value_t = false)]
    no_store: bool,

    /// Per-call timeout for each sink in milliseconds.
    #[arg(long = "sink-timeout-ms", default_value_t = 5000)]
    sink_timeout_ms: u64,

    /// Capacity of the capture and sink queues.
    #[arg(long = "queue-capacity", default_value_t = 1024)]
    queue_capacity: usize,

    /// BPF filter applied to the capture.
    #[arg(long, default_value = "ip")]
    filter: String,

    /// Capture snap length in bytes.
    #[arg(long, default_value_t = 65535)]
    snaplen: i32,

    /// Capture read timeout in milliseconds.
    #[arg(long = "read-timeout-ms", default_value_t = 500)]
    read_timeout_ms: u64,

    /// Do not put the interface into promiscuous mode.
    #[arg(long = "no-promisc", default_value_t = false)]
    no_promisc: bool,

    /// Origin allowed to call the API from a browser (repeatable).
    #[arg(long = "allow-origin")]
    allow_origin: Vec<String>,

    /// Debug logging (RUST_LOG overrides).
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

impl Cli {
    fn to_settings(&self) -> Settings {
        let scan_duration = match (self.monitor, self.scan_secs) {
            (true, _) | (false, 0) => None,
            (false, secs) => Some(Duration::from_secs(secs)),
        };
        let allowed_origins = if self.allow_origin.is_empty() {
            DEFAULT_ALLOWED_ORIGINS.iter().map(|s| s.to_string()).collect()
        } else {
            self.allow_origin.clone()
        };
        Settings {
            trusted_prefix: self.trusted_prefix.clone(),
            bind: self.bind,
            scan_duration,
            report: (!self.no_report).then(|| ReportSettings {
                endpoint: self.report_endpoint.clone(),
                token: self.token.clone(),
            }),
            store_path: (!self.no_store).then(|| self.store_path.clone()),
            sink_timeout: Duration::from_millis(self.sink_timeout_ms),
            queue_capacity: self.queue_capacity,
            capture: PcapOpener {
                filter: self.filter.clone(),
                snaplen: self.snaplen,
                promisc: !self.no_promisc,
                read_timeout: Duration::from_millis(self.read_timeout_ms),
            },
            allowed_origins,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    let settings = cli.to_settings();

    info!(
        trusted_prefix = %settings.trusted_prefix,
        scan_duration = ?settings.scan_duration,
        report = settings.report.as_ref().map(|r| r.endpoint.as_str()).unwrap_or("<disabled>"),
        store = %settings
            .store_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "<disabled>".to_string()),
        "spoofwatch configuration"
    );
    warn_if_unprivileged();

    let app = app::build(
        &settings,
        Arc::new(SystemInterfaces),
        Arc::new(settings.capture.clone()),
    )?;

    if cli.monitor {
        run_monitor(app).await
    } else {
        run_api(app, &settings).await
    }
}

/// Continuous capture until Ctrl+C or a capture error.
async fn run_monitor(app: App) -> Result<()> {
    let App {
        controller,
        sink_worker,
        ..
    } = app;

    let ack = controller
        .start_scan()
        .await
        .context("failed to start monitoring")?;
    info!(interface = %ack.interface, "monitoring spoof attempts (Ctrl+C to stop)");

    let state = tokio::select! {
        state = controller.wait_for_completion() => state,
        _ = tokio::signal::ctrl_c() => {
            let _ = controller.stop_scan().await;
            controller.wait_for_completion().await
        }
    };
    let status = controller.status().await;
    drop(controller);
    sink_worker.await?;

    info!(spoofed = status.results.len(), "monitoring ended");
    if state == ScanState::Errored {
        bail!(status.error.unwrap_or_else(|| "capture failed".into()));
    }
    Ok(())
}

/// Serve the control API until Ctrl+C, then stop any running scan and flush the sinks.
async fn run_api(app: App, settings: &Settings) -> Result<()> {
    let App {
        controller,
        store,
        sink_worker,
    } = app;

    let router = server::router(
        AppState::new(controller.clone(), store),
        &settings.allowed_origins,
    );
    server::spawn_server(settings.bind, router, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await?;

    if controller.stop_scan().await.is_ok() {
        controller.wait_for_completion().await;
    }
    drop(controller);
    sink_worker.await?;
    Ok(())
}

#[cfg(unix)]
fn warn_if_unprivileged() {
    // SAFETY: geteuid has no preconditions and cannot fail.
    if unsafe { libc::geteuid() } != 0 {
        warn!("not running as root; packet capture will likely fail with permission denied");
    }
}

#[cfg(not(unix))]
fn warn_if_unprivileged() {}
