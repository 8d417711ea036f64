//! Live packet capture.
//!
//! Capture is split in two so setup failures surface synchronously: [`CaptureOpener::open`]
//! binds the interface and installs the filter, [`run_capture`] is the blocking read loop that
//! pushes every IP packet into a bounded channel in arrival order.
use std::net::IpAddr;
use std::time::{Duration, Instant};

use pcap::{Active, Capture, Linktype};
use pnet::packet::ethernet::{EtherType, EtherTypes, EthernetPacket};
use pnet::packet::ipv4::Ipv4Packet;
use pnet::packet::ipv6::Ipv6Packet;
use pnet::packet::Packet;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::CaptureError;

/// IP-layer addresses of one captured packet, before classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedPacket {
    pub source: IpAddr,
    pub destination: IpAddr,
    pub captured_at: OffsetDateTime,
}

/// What a single read from a packet source produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureEvent {
    Ip(CapturedPacket),
    /// A frame arrived but carried no decodable IP header.
    Skipped,
    /// The read timed out without a frame.
    Idle,
}

/// A blocking stream of link-layer frames.
pub trait PacketSource: Send {
    fn next_event(&mut self) -> Result<CaptureEvent, CaptureError>;
}

/// Opens a [`PacketSource`] on a named interface.
pub trait CaptureOpener: Send + Sync {
    fn open(&self, interface: &str) -> Result<Box<dyn PacketSource>, CaptureError>;
}

/// Counters reported when a capture loop ends cleanly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureSummary {
    pub ip_packets: u64,
    pub skipped: u64,
    /// True when the loop ended because of the stop token rather than the time limit.
    pub stopped: bool,
}

/// libpcap-backed opener.
#[derive(Debug, Clone)]
pub struct PcapOpener {
    pub filter: String,
    pub snaplen: i32,
    pub promisc: bool,
    /// Read timeout; bounds how long the loop can go without checking its deadline.
    pub read_timeout: Duration,
}

impl Default for PcapOpener {
    fn default() -> Self {
        Self {
            filter: "ip".into(),
            snaplen: 65535,
            promisc: true,
            read_timeout: Duration::from_millis(500),
        }
    }
}

impl CaptureOpener for PcapOpener {
    fn open(&self, interface: &str) -> Result<Box<dyn PacketSource>, CaptureError> {
        let setup = |e: pcap::Error| CaptureError::from_setup_message(interface, e.to_string());

        let timeout_ms = self.read_timeout.as_millis().clamp(1, i32::MAX as u128) as i32;
        let mut cap = Capture::from_device(interface)
            .map_err(setup)?
            .promisc(self.promisc)
            .snaplen(self.snaplen)
            .timeout(timeout_ms)
            .immediate_mode(true)
            .open()
            .map_err(setup)?;
        if !self.filter.is_empty() {
            cap.filter(&self.filter, true).map_err(setup)?;
        }
        let linktype = cap.get_datalink();
        info!(interface, filter = %self.filter, linktype = linktype.0, "capture opened");
        Ok(Box::new(PcapSource { cap, linktype }))
    }
}

struct PcapSource {
    cap: Capture<Active>,
    linktype: Linktype,
}

impl PacketSource for PcapSource {
    fn next_event(&mut self) -> Result<CaptureEvent, CaptureError> {
        match self.cap.next_packet() {
            Ok(packet) => {
                let ts = packet.header.ts;
                let captured_at = header_time(ts.tv_sec as i128, ts.tv_usec as i128);
                Ok(match decode_frame(self.linktype, packet.data) {
                    Some((source, destination)) => CaptureEvent::Ip(CapturedPacket {
                        source,
                        destination,
                        captured_at,
                    }),
                    None => CaptureEvent::Skipped,
                })
            }
            Err(pcap::Error::TimeoutExpired) => Ok(CaptureEvent::Idle),
            Err(e) => Err(CaptureError::Runtime(e.to_string())),
        }
    }
}

fn header_time(secs: i128, micros: i128) -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp_nanos(secs * 1_000_000_000 + micros * 1_000)
        .unwrap_or_else(|_| OffsetDateTime::now_utc())
}

const LINKTYPE_ETHERNET: i32 = 1;
const LINKTYPE_RAW_BSD: i32 = 12;
const LINKTYPE_RAW: i32 = 101;
const LINKTYPE_LINUX_SLL: i32 = 113;
const LINKTYPE_IPV4: i32 = 228;
const LINKTYPE_IPV6: i32 = 229;
const SLL_HEADER_LEN: usize = 16;

/// Extract `(source, destination)` from a link-layer frame, or `None` for anything that is
/// not a well-formed IPv4/IPv6 packet.
pub fn decode_frame(linktype: Linktype, data: &[u8]) -> Option<(IpAddr, IpAddr)> {
    match linktype.0 {
        LINKTYPE_ETHERNET => {
            let eth = EthernetPacket::new(data)?;
            decode_by_ethertype(eth.get_ethertype(), eth.payload())
        }
        LINKTYPE_LINUX_SLL => {
            if data.len() < SLL_HEADER_LEN {
                return None;
            }
            let proto = u16::from_be_bytes([data[14], data[15]]);
            decode_by_ethertype(EtherType::new(proto), &data[SLL_HEADER_LEN..])
        }
        LINKTYPE_RAW_BSD | LINKTYPE_RAW | LINKTYPE_IPV4 | LINKTYPE_IPV6 => decode_ip(data),
        _ => None,
    }
}

fn decode_by_ethertype(ethertype: EtherType, payload: &[u8]) -> Option<(IpAddr, IpAddr)> {
    match ethertype {
        EtherTypes::Ipv4 => decode_ipv4(payload),
        EtherTypes::Ipv6 => decode_ipv6(payload),
        _ => None,
    }
}

/// Decode a bare IP packet by its version nibble.
pub fn decode_ip(data: &[u8]) -> Option<(IpAddr, IpAddr)> {
    match data.first()? >> 4 {
        4 => decode_ipv4(data),
        6 => decode_ipv6(data),
        _ => None,
    }
}

fn decode_ipv4(data: &[u8]) -> Option<(IpAddr, IpAddr)> {
    let ip = Ipv4Packet::new(data)?;
    if ip.get_version() != 4 {
        return None;
    }
    Some((IpAddr::V4(ip.get_source()), IpAddr::V4(ip.get_destination())))
}

fn decode_ipv6(data: &[u8]) -> Option<(IpAddr, IpAddr)> {
    let ip = Ipv6Packet::new(data)?;
    if ip.get_version() != 6 {
        return None;
    }
    Some((IpAddr::V6(ip.get_source()), IpAddr::V6(ip.get_destination())))
}

/// Blocking read loop. Must run on a blocking thread.
///
/// Ends when `limit` elapses (measured from the call), when `cancel` fires, or when the
/// receiving side of `tx` is dropped. A read error ends the loop with that error. Sends use
/// `blocking_send` on a bounded channel, so a slow consumer slows intake.
pub fn run_capture(
    mut source: Box<dyn PacketSource>,
    limit: Option<Duration>,
    cancel: CancellationToken,
    tx: mpsc::Sender<CapturedPacket>,
) -> Result<CaptureSummary, CaptureError> {
    let deadline = limit.map(|d| Instant::now() + d);
    let mut summary = CaptureSummary::default();

    loop {
        if cancel.is_cancelled() {
            summary.stopped = true;
            break;
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }
        match source.next_event()? {
            CaptureEvent::Ip(packet) => {
                summary.ip_packets += 1;
                if tx.blocking_send(packet).is_err() {
                    debug!("observation channel closed; ending capture");
                    break;
                }
            }
            CaptureEvent::Skipped => summary.skipped += 1,
            CaptureEvent::Idle => {}
        }
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::net::{Ipv4Addr, Ipv6Addr};

    fn ipv4_header(src: [u8; 4], dst: [u8; 4]) -> Vec<u8> {
        let mut h = vec![0u8; 20];
        h[0] = 0x45;
        h[3] = 20;
        h[8] = 64;
        h[9] = 6;
        h[12..16].copy_from_slice(&src);
        h[16..20].copy_from_slice(&dst);
        h
    }

    fn ethernet(ethertype: u16, payload: &[u8]) -> Vec<u8> {
        let mut f = vec![0u8; 14];
        f[12..14].copy_from_slice(&ethertype.to_be_bytes());
        f.extend_from_slice(payload);
        f
    }

    #[test]
    fn decodes_ipv4_over_ethernet() {
        let frame = ethernet(0x0800, &ipv4_header([10, 0, 0, 7], [192, 168, 1, 2]));
        let (s, d) = decode_frame(Linktype(LINKTYPE_ETHERNET), &frame).unwrap();
        assert_eq!(s, IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7)));
        assert_eq!(d, IpAddr::V4(Ipv4Addr::new(192, 168, 1, 2)));
    }

    #[test]
    fn decodes_ipv6_over_ethernet() {
        let mut ip6 = vec![0u8; 40];
        ip6[0] = 0x60;
        ip6[8..24].copy_from_slice(&Ipv6Addr::LOCALHOST.octets());
        ip6[24..40].copy_from_slice(&Ipv6Addr::LOCALHOST.octets());
        let frame = ethernet(0x86DD, &ip6);
        let (s, _) = decode_frame(Linktype(LINKTYPE_ETHERNET), &frame).unwrap();
        assert_eq!(s, IpAddr::V6(Ipv6Addr::LOCALHOST));
    }

    #[test]
    fn arp_and_truncated_frames_are_skipped() {
        let arp = ethernet(0x0806, &[0u8; 28]);
        assert!(decode_frame(Linktype(LINKTYPE_ETHERNET), &arp).is_none());

        let short = ethernet(0x0800, &[0x45, 0, 0]);
        assert!(decode_frame(Linktype(LINKTYPE_ETHERNET), &short).is_none());

        assert!(decode_frame(Linktype(LINKTYPE_ETHERNET), &[0u8; 6]).is_none());
    }

    #[test]
    fn decodes_raw_and_cooked_link_types() {
        let ip = ipv4_header([172, 16, 0, 1], [192, 168, 0, 1]);
        assert!(decode_frame(Linktype(LINKTYPE_RAW), &ip).is_some());

        let mut sll = vec![0u8; SLL_HEADER_LEN];
        sll[14..16].copy_from_slice(&0x0800u16.to_be_bytes());
        sll.extend_from_slice(&ip);
        let (s, _) = decode_frame(Linktype(LINKTYPE_LINUX_SLL), &sll).unwrap();
        assert_eq!(s, IpAddr::V4(Ipv4Addr::new(172, 16, 0, 1)));
    }

    struct Scripted(VecDeque<Result<CaptureEvent, CaptureError>>);

    impl PacketSource for Scripted {
        fn next_event(&mut self) -> Result<CaptureEvent, CaptureError> {
            self.0.pop_front().unwrap_or_else(|| {
                std::thread::sleep(Duration::from_millis(2));
                Ok(CaptureEvent::Idle)
            })
        }
    }

    fn packet(last: u8) -> CapturedPacket {
        CapturedPacket {
            source: IpAddr::V4(Ipv4Addr::new(10, 0, 0, last)),
            destination: IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1)),
            captured_at: OffsetDateTime::UNIX_EPOCH,
        }
    }

    #[test]
    fn loop_delivers_in_order_and_stops_at_limit() {
        let events = VecDeque::from(vec![
            Ok(CaptureEvent::Ip(packet(1))),
            Ok(CaptureEvent::Skipped),
            Ok(CaptureEvent::Ip(packet(2))),
        ]);
        let (tx, mut rx) = mpsc::channel(8);
        let summary = run_capture(
            Box::new(Scripted(events)),
            Some(Duration::from_millis(30)),
            CancellationToken::new(),
            tx,
        )
        .unwrap();

        assert_eq!(
            summary,
            CaptureSummary {
                ip_packets: 2,
                skipped: 1,
                stopped: false
            }
        );
        assert_eq!(rx.try_recv().unwrap(), packet(1));
        assert_eq!(rx.try_recv().unwrap(), packet(2));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn read_error_aborts_loop() {
        let events = VecDeque::from(vec![
            Ok(CaptureEvent::Ip(packet(1))),
            Err(CaptureError::Runtime("device went away".into())),
        ]);
        let (tx, _rx) = mpsc::channel(8);
        let err = run_capture(Box::new(Scripted(events)), None, CancellationToken::new(), tx)
            .unwrap_err();
        assert_eq!(err, CaptureError::Runtime("device went away".into()));
    }

    #[test]
    fn cancelled_token_marks_summary_stopped() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let (tx, _rx) = mpsc::channel(1);
        let summary =
            run_capture(Box::new(Scripted(VecDeque::new())), None, cancel, tx).unwrap();
        assert!(summary.stopped);
    }
}
