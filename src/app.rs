//! Wires settings into a running controller, sink worker and optional store.
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::capture::CaptureOpener;
use crate::config::Settings;
use crate::controller::ScanController;
use crate::netdetect::InterfaceSource;
use crate::reporter::BackendReporter;
use crate::sinks::{self, FanOut, ObservationSink};
use crate::store::JsonlStore;

pub struct App {
    pub controller: ScanController,
    pub store: Option<Arc<JsonlStore>>,
    /// Fan-out worker; finishes once every controller clone is dropped.
    pub sink_worker: JoinHandle<()>,
}

/// Build the sinks from `settings`, start the sink worker and create the controller.
/// Must run inside a Tokio runtime.
pub fn build(
    settings: &Settings,
    interfaces: Arc<dyn InterfaceSource>,
    opener: Arc<dyn CaptureOpener>,
) -> Result<App> {
    let mut sinks: Vec<Arc<dyn ObservationSink>> = Vec::new();

    if let Some(report) = &settings.report {
        let client = reqwest::Client::builder()
            .timeout(settings.sink_timeout)
            .build()
            .context("failed to build HTTP client for the reporting backend")?;
        if report.token.is_none() {
            warn!("no reporting token configured; reports will be sent without Authorization");
        }
        info!(endpoint = %report.endpoint, "backend reporting enabled");
        sinks.push(Arc::new(BackendReporter::new(
            client,
            report.endpoint.clone(),
            report.token.clone(),
        )));
    }

    let store = settings.store_path.as_ref().map(|path| {
        info!(path = %path.display(), "local store enabled");
        Arc::new(JsonlStore::new(path.clone()))
    });
    if let Some(store) = &store {
        sinks.push(store.clone());
    }

    let fanout = FanOut::new(sinks, settings.sink_timeout);
    if fanout.is_empty() {
        warn!("all sinks disabled; spoofed packets are only kept in memory");
    }
    let (dispatcher, sink_worker) = sinks::spawn_worker(fanout, settings.queue_capacity);
    let controller = ScanController::new(settings.controller_config(), interfaces, opener, dispatcher);

    Ok(App {
        controller,
        store,
        sink_worker,
    })
}
