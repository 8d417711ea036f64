//! Fan-out of spoofed observations to independent sinks.
//!
//! The controller never talks to a sink directly. It hands observations to a [`Dispatcher`],
//! which queues them for a single worker task; the worker delivers each observation to every
//! sink concurrently, each call bounded by its own timeout, and logs per-sink failures.
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::SinkError;
use crate::types::PacketObservation;

/// A destination for spoofed observations. One call is one attempt; no retries.
#[async_trait]
pub trait ObservationSink: Send + Sync {
    fn name(&self) -> &'static str;

    async fn deliver(&self, observation: &PacketObservation) -> Result<(), SinkError>;
}

/// Result of delivering one observation to one sink.
#[derive(Debug)]
pub struct SinkOutcome {
    pub sink: &'static str,
    pub result: Result<(), SinkError>,
}

/// Delivers to every sink, evaluating each outcome independently.
#[derive(Clone)]
pub struct FanOut {
    sinks: Vec<Arc<dyn ObservationSink>>,
    call_timeout: Duration,
}

impl FanOut {
    pub fn new(sinks: Vec<Arc<dyn ObservationSink>>, call_timeout: Duration) -> Self {
        Self {
            sinks,
            call_timeout,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    pub fn sink_names(&self) -> Vec<&'static str> {
        self.sinks.iter().map(|s| s.name()).collect()
    }

    /// Run all sinks for `observation` and return one outcome per sink, in sink order.
    /// Failures are logged here and returned; none of them is propagated.
    pub async fn deliver(&self, observation: &PacketObservation) -> Vec<SinkOutcome> {
        let timeout = self.call_timeout;
        let calls = self.sinks.iter().map(|sink| async move {
            let result = match tokio::time::timeout(timeout, sink.deliver(observation)).await {
                Ok(r) => r,
                Err(_) => Err(SinkError::Timeout(timeout)),
            };
            let source = observation.source_ip;
            match &result {
                Ok(()) => debug!(sink = sink.name(), %source, "delivered"),
                Err(e) => warn!(sink = sink.name(), %source, error = %e, "sink delivery failed"),
            }
            SinkOutcome {
                sink: sink.name(),
                result,
            }
        });
        join_all(calls).await
    }
}

/// Cheap handle used by the controller to queue observations for the fan-out worker.
#[derive(Clone, Debug)]
pub struct Dispatcher {
    tx: Option<mpsc::Sender<PacketObservation>>,
}

impl Dispatcher {
    /// A dispatcher with no worker behind it; every dispatch is a no-op.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Queue without waiting. A full queue drops the observation with a warning so sink
    /// latency never reaches the capture path.
    pub fn dispatch(&self, observation: PacketObservation) {
        let Some(tx) = &self.tx else {
            return;
        };
        match tx.try_send(observation) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(obs)) => {
                warn!(source = %obs.source_ip, "sink queue full; dropping observation")
            }
            Err(mpsc::error::TrySendError::Closed(obs)) => {
                warn!(source = %obs.source_ip, "sink worker stopped; dropping observation")
            }
        }
    }
}

/// Start the fan-out worker. It runs until every [`Dispatcher`] clone is dropped, then drains
/// what is left in the queue and exits; await the handle to flush on shutdown.
pub fn spawn_worker(fanout: FanOut, capacity: usize) -> (Dispatcher, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<PacketObservation>(capacity.max(1));
    let handle = tokio::spawn(async move {
        while let Some(observation) = rx.recv().await {
            fanout.deliver(&observation).await;
        }
        debug!("sink worker finished");
    });
    (Dispatcher { tx: Some(tx) }, handle)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use tokio::sync::Mutex;

    /// Records every observation it receives.
    #[derive(Default)]
    pub struct RecordingSink {
        pub seen: Mutex<Vec<PacketObservation>>,
    }

    #[async_trait]
    impl ObservationSink for RecordingSink {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn deliver(&self, observation: &PacketObservation) -> Result<(), SinkError> {
            self.seen.lock().await.push(observation.clone());
            Ok(())
        }
    }

    /// Always fails with an unexpected status.
    pub struct FailingSink;

    #[async_trait]
    impl ObservationSink for FailingSink {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn deliver(&self, _observation: &PacketObservation) -> Result<(), SinkError> {
            Err(SinkError::UnexpectedStatus {
                status: 500,
                body: "boom".into(),
            })
        }
    }

    /// Never completes within any reasonable timeout.
    pub struct HangingSink;

    #[async_trait]
    impl ObservationSink for HangingSink {
        fn name(&self) -> &'static str {
            "hanging"
        }

        async fn deliver(&self, _observation: &PacketObservation) -> Result<(), SinkError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
    }
}
