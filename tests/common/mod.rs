#![allow(dead_code)]

use std::collections::VecDeque;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::Mutex;

use spoofwatch::capture::{CaptureEvent, CaptureOpener, CapturedPacket, PacketSource};
use spoofwatch::error::{CaptureError, ScanError, SinkError};
use spoofwatch::netdetect::{InterfaceAddr, InterfaceSource};
use spoofwatch::sinks::ObservationSink;
use spoofwatch::types::PacketObservation;

pub fn ip(a: u8, b: u8, c: u8, d: u8) -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(a, b, c, d))
}

pub fn packet(source: IpAddr) -> CaptureEvent {
    CaptureEvent::Ip(CapturedPacket {
        source,
        destination: ip(192, 168, 1, 1),
        captured_at: OffsetDateTime::now_utc(),
    })
}

/// Fixed interface snapshot.
pub struct FixedInterfaces(pub Vec<InterfaceAddr>);

impl FixedInterfaces {
    pub fn lan() -> Arc<Self> {
        Arc::new(Self(vec![
            InterfaceAddr::new("lo", ip(127, 0, 0, 1)),
            InterfaceAddr::new("eth0", ip(192, 168, 1, 20)),
        ]))
    }

    pub fn none() -> Arc<Self> {
        Arc::new(Self(vec![InterfaceAddr::new("lo", ip(127, 0, 0, 1))]))
    }
}

impl InterfaceSource for FixedInterfaces {
    fn interfaces(&self) -> Result<Vec<InterfaceAddr>, ScanError> {
        Ok(self.0.clone())
    }
}

/// Replays a script of events, then idles until the loop ends.
pub struct ScriptedSource(VecDeque<Result<CaptureEvent, CaptureError>>);

impl PacketSource for ScriptedSource {
    fn next_event(&mut self) -> Result<CaptureEvent, CaptureError> {
        self.0.pop_front().unwrap_or_else(|| {
            std::thread::sleep(Duration::from_millis(2));
            Ok(CaptureEvent::Idle)
        })
    }
}

/// Opens a fresh [`ScriptedSource`] per scan, or fails setup with a fixed error.
pub struct ScriptedOpener {
    script: Vec<Result<CaptureEvent, CaptureError>>,
    setup_error: Option<CaptureError>,
    pub opened_on: std::sync::Mutex<Vec<String>>,
}

impl ScriptedOpener {
    pub fn new(script: Vec<Result<CaptureEvent, CaptureError>>) -> Arc<Self> {
        Arc::new(Self {
            script,
            setup_error: None,
            opened_on: Default::default(),
        })
    }

    pub fn failing(error: CaptureError) -> Arc<Self> {
        Arc::new(Self {
            script: Vec::new(),
            setup_error: Some(error),
            opened_on: Default::default(),
        })
    }
}

impl CaptureOpener for ScriptedOpener {
    fn open(&self, interface: &str) -> Result<Box<dyn PacketSource>, CaptureError> {
        if let Some(e) = &self.setup_error {
            return Err(e.clone());
        }
        self.opened_on.lock().unwrap().push(interface.to_string());
        Ok(Box::new(ScriptedSource(self.script.iter().cloned().collect())))
    }
}

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
