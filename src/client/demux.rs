// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Routes inbound RTP and RTCP to streams.
//!
//! The stream table is published once, after the last `SETUP`, and is
//! immutable afterward. Readers take a cheap `Arc` snapshot per packet, so the
//! TCP reader and any UDP readers never see a half-written table.

use std::sync::Arc;

use bytes::Bytes;
use log::{debug, trace, warn};
use parking_lot::{Mutex, RwLock};

use super::session::{Channels, SetupStream};
use super::{Handler, MediaKind};
use crate::error::ErrorInt;
use crate::hex::LimitedHex;
use crate::rtcp::{self, CompoundPacketIterator};
use crate::rtp::RawPacket;
use crate::{codec, ConnectionContext, PacketContext};

/// RTP payload type of JPEG video, per RFC 3551.
const JPEG_PAYLOAD_TYPE: u8 = 26;

/// Where an inbound buffer arrived.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Source {
    /// An interleaved channel on the RTSP connection.
    Channel(u8),

    /// A local UDP port.
    Port(u16),
}

/// Where to send a receiver report.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum ReportDestination {
    Channel(u8),
    Udp { local_port: u16, server_port: u16 },
}

#[derive(Debug)]
pub(crate) struct Report {
    pub(crate) destination: ReportDestination,
    pub(crate) data: Bytes,
}

struct Stream {
    setup: SetupStream,
    depacketizer: Mutex<codec::Depacketizer>,
}

#[derive(Copy, Clone)]
enum Path {
    Rtp,
    Rtcp,
}

pub(crate) struct Demuxer {
    conn_ctx: ConnectionContext,

    /// SSRC of this receiver, as sent in receiver reports.
    ssrc: u32,
    handler: Arc<dyn Handler>,
    streams: RwLock<Option<Arc<[Stream]>>>,
}

impl Demuxer {
    pub(crate) fn new(conn_ctx: ConnectionContext, handler: Arc<dyn Handler>) -> Self {
        Self {
            conn_ctx,
            ssrc: rand::random(),
            handler,
            streams: RwLock::new(None),
        }
    }

    /// Publishes the finalized stream table. Only the first call has effect.
    pub(crate) fn publish(&self, setups: Vec<SetupStream>) {
        let mut streams = Vec::with_capacity(setups.len());
        for setup in setups {
            match codec::Depacketizer::new(&setup.codec) {
                Ok(d) => streams.push(Stream {
                    setup,
                    depacketizer: Mutex::new(d),
                }),
                Err(e) => warn!("not routing {} stream: {}", setup.kind, e),
            }
        }
        let mut l = self.streams.write();
        if l.is_some() {
            warn!("ignoring second stream table publish");
            return;
        }
        *l = Some(streams.into());
    }

    /// Handles one inbound buffer, returning any receiver reports to send.
    ///
    /// Problems are logged; nothing here is fatal to the session.
    pub(crate) fn handle(&self, source: Source, pkt_ctx: PacketContext, data: Bytes) -> Vec<Report> {
        let snapshot = self.streams.read().clone();
        let Some(streams) = snapshot else {
            debug!("dropping {} byte packet on {:?} before setup finished", data.len(), source);
            return Vec::new();
        };
        let found = streams.iter().find_map(|s| match (source, s.setup.channels) {
            (Source::Channel(c), Channels::Interleaved { rtp, .. }) if c == rtp => {
                Some((s, Path::Rtp))
            }
            (Source::Channel(c), Channels::Interleaved { rtcp, .. }) if c == rtcp => {
                Some((s, Path::Rtcp))
            }
            (Source::Port(p), Channels::Udp { rtp_port, .. }) if p == rtp_port => {
                Some((s, Path::Rtp))
            }
            (Source::Port(p), Channels::Udp { rtcp_port, .. }) if p == rtcp_port => {
                Some((s, Path::Rtcp))
            }
            _ => None,
        });
        match (found, source) {
            (Some((s, Path::Rtp)), _) => {
                self.rtp(s, pkt_ctx, data);
                Vec::new()
            }
            (Some((s, Path::Rtcp)), _) => self.rtcp(s, pkt_ctx, &data),
            (None, Source::Channel(channel)) => {
                warn!(
                    "{}",
                    wrap!(ErrorInt::RtspUnassignedChannelError {
                        conn_ctx: self.conn_ctx,
                        pkt_ctx,
                        channel: u16::from(channel),
                        data,
                    })
                );
                Vec::new()
            }
            (None, Source::Port(port)) => {
                warn!(
                    "[{}] dropping datagram on unassigned port {}:\n{:?}",
                    pkt_ctx,
                    port,
                    LimitedHex::new(&data, 64)
                );
                Vec::new()
            }
        }
    }

    fn packet_error(&self, pkt_ctx: PacketContext, stream: MediaKind, description: String) {
        warn!(
            "{}",
            wrap!(ErrorInt::PacketError {
                conn_ctx: self.conn_ctx,
                pkt_ctx,
                stream,
                description,
            })
        );
    }

    fn rtp(&self, s: &Stream, pkt_ctx: PacketContext, data: Bytes) {
        let kind = s.setup.kind;
        let pkt = match RawPacket::new(data) {
            Ok(p) => p,
            Err(e) => {
                self.packet_error(
                    pkt_ctx,
                    kind,
                    format!(
                        "corrupt RTP header: {}\n{:?}",
                        e.reason,
                        LimitedHex::new(&e.data, 64)
                    ),
                );
                return;
            }
        };
        trace!("{} RTP: {:?}", kind, &pkt);
        let payload_type = pkt.payload_type();
        if let Err(expected) = check_payload_type(&s.setup, payload_type) {
            if payload_type == JPEG_PAYLOAD_TYPE {
                debug!("dropping JPEG (payload type 26) on {} stream; JPEG isn't supported", kind);
                return;
            }
            warn!(
                "{}",
                wrap!(ErrorInt::PayloadMismatch {
                    conn_ctx: self.conn_ctx,
                    pkt_ctx,
                    stream: kind,
                    ssrc: pkt.ssrc(),
                    sequence_number: pkt.sequence_number(),
                    payload_type,
                    expected,
                })
            );
            return;
        }
        let mark = pkt.mark();
        let units = match s
            .depacketizer
            .lock()
            .process_packet(pkt.into_payload_bytes(), mark)
        {
            Ok(Some(units)) => units,
            Ok(None) => return,
            Err(description) => {
                self.packet_error(pkt_ctx, kind, description);
                return;
            }
        };
        match kind {
            MediaKind::Video => self.handler.video_units(units),
            MediaKind::Audio => self.handler.audio_frames(&s.setup.codec, units),
        }
    }

    fn rtcp(&self, s: &Stream, pkt_ctx: PacketContext, data: &[u8]) -> Vec<Report> {
        let kind = s.setup.kind;
        let mut reports = Vec::new();
        for pkt in CompoundPacketIterator::new(data) {
            let pkt = match pkt {
                Ok(p) => p,
                Err(description) => {
                    self.packet_error(pkt_ctx, kind, format!("corrupt RTCP: {description}"));
                    break;
                }
            };
            match pkt.payload_type() {
                rtcp::SENDER_REPORT => {
                    trace!("{} sender report from ssrc={:08x}", kind, pkt.ssrc());
                    if let Some(destination) = self.report_destination(&s.setup) {
                        reports.push(Report {
                            destination,
                            data: Bytes::copy_from_slice(&rtcp::empty_receiver_report(self.ssrc)),
                        });
                    }
                }
                t => trace!("{} RTCP {} ignored", kind, rtcp::payload_type_name(t)),
            }
        }
        reports
    }

    fn report_destination(&self, setup: &SetupStream) -> Option<ReportDestination> {
        match setup.channels {
            Channels::Interleaved { rtcp, .. } => Some(ReportDestination::Channel(rtcp)),
            Channels::Udp { .. } if setup.multicast => {
                debug!("receiver reports aren't sent for multicast {} streams", setup.kind);
                None
            }
            Channels::Udp { rtcp_port, .. } => match setup.server_rtcp_port {
                Some(server_port) => Some(ReportDestination::Udp {
                    local_port: rtcp_port,
                    server_port,
                }),
                None => {
                    debug!(
                        "no server_port for {} stream; not sending receiver report",
                        setup.kind
                    );
                    None
                }
            },
        }
    }
}

/// Checks an RTP packet's payload type against its stream.
///
/// Video must match the negotiated type exactly. Audio also accepts the static
/// G.711 assignments.
fn check_payload_type(setup: &SetupStream, payload_type: u8) -> Result<(), String> {
    let ok = match setup.kind {
        MediaKind::Video => payload_type == setup.payload_type,
        MediaKind::Audio => {
            payload_type == setup.payload_type
                || payload_type == 0
                || payload_type == 8
                || setup.codec == "PCMA"
                || setup.codec == "PCMU"
        }
    };
    if ok {
        Ok(())
    } else {
        Err(format!("negotiated {} {}", setup.codec, setup.payload_type))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rtp::RawPacketBuilder;
    use crate::testutil::{init_logging, Recorder};

    fn video(channels: Channels) -> SetupStream {
        SetupStream {
            kind: MediaKind::Video,
            codec: "H264".to_owned(),
            payload_type: 96,
            channels,
            server_rtcp_port: None,
            multicast: false,
        }
    }

    fn audio(channels: Channels) -> SetupStream {
        SetupStream {
            kind: MediaKind::Audio,
            codec: "PCMA".to_owned(),
            payload_type: 8,
            channels,
            server_rtcp_port: None,
            multicast: false,
        }
    }

    fn tcp_demuxer() -> (Arc<Recorder>, Demuxer) {
        init_logging();
        let recorder = Arc::new(Recorder::default());
        let d = Demuxer::new(ConnectionContext::dummy(), recorder.clone());
        d.publish(vec![
            video(Channels::Interleaved { rtp: 0, rtcp: 1 }),
            audio(Channels::Interleaved { rtp: 2, rtcp: 3 }),
        ]);
        (recorder, d)
    }

    fn rtp(payload_type: u8, mark: bool, payload: &[u8]) -> Bytes {
        RawPacketBuilder {
            sequence_number: 0x1234,
            timestamp: 141000,
            payload_type,
            ssrc: 0xd25614e,
            mark,
        }
        .build(payload.iter().copied())
        .unwrap()
    }

    /// A sender report with no report blocks: 8-byte header plus 20 bytes of sender info.
    fn sender_report(ssrc: u32) -> Vec<u8> {
        let mut v = vec![0x80, rtcp::SENDER_REPORT, 0x00, 0x06];
        v.extend_from_slice(&ssrc.to_be_bytes());
        v.extend_from_slice(&[0; 20]);
        v
    }

    #[test]
    fn video_access_unit() {
        let (recorder, d) = tcp_demuxer();
        let ctx = PacketContext::dummy();
        assert!(d.handle(Source::Channel(0), ctx, rtp(96, false, b"\x06plain")).is_empty());
        assert!(recorder.video.lock().is_empty());
        d.handle(Source::Channel(0), ctx, rtp(96, true, b"\x65idr"));
        let video = recorder.video.lock();
        assert_eq!(video.len(), 1);
        assert_eq!(&video[0][0][..], b"\x06plain");
        assert_eq!(&video[0][1][..], b"\x65idr");
    }

    #[test]
    fn audio_frame() {
        let (recorder, d) = tcp_demuxer();
        d.handle(Source::Channel(2), PacketContext::dummy(), rtp(8, false, b"\xd5\xd5\xd5"));
        let audio = recorder.audio.lock();
        assert_eq!(audio.len(), 1);
        assert_eq!(audio[0].0, "PCMA");
        assert_eq!(&audio[0].1[0][..], b"\xd5\xd5\xd5");
    }

    #[test]
    fn payload_type_mismatch_dropped() {
        let (recorder, d) = tcp_demuxer();
        let ctx = PacketContext::dummy();
        d.handle(Source::Channel(0), ctx, rtp(97, true, b"\x65idr"));
        d.handle(Source::Channel(0), ctx, rtp(26, true, b"\x00\x00"));
        assert!(recorder.video.lock().is_empty());

        // The depacketizer wasn't disturbed.
        d.handle(Source::Channel(0), ctx, rtp(96, true, b"\x65idr"));
        assert_eq!(recorder.video.lock().len(), 1);
    }

    #[test]
    fn malformed_and_unassigned_dropped() {
        let (recorder, d) = tcp_demuxer();
        let ctx = PacketContext::dummy();
        d.handle(Source::Channel(0), ctx, Bytes::from_static(b"\x80\x60\x00"));
        d.handle(Source::Channel(7), ctx, rtp(96, true, b"\x65idr"));
        d.handle(Source::Port(50_000), ctx, rtp(96, true, b"\x65idr"));
        assert!(d.handle(Source::Channel(1), ctx, Bytes::from_static(b"\x80\xc8")).is_empty());
        assert!(recorder.video.lock().is_empty());
    }

    #[test]
    fn before_publish_dropped() {
        init_logging();
        let recorder = Arc::new(Recorder::default());
        let d = Demuxer::new(ConnectionContext::dummy(), recorder.clone());
        d.handle(Source::Channel(0), PacketContext::dummy(), rtp(96, true, b"\x65idr"));
        assert!(recorder.video.lock().is_empty());
    }

    #[test]
    fn two_sender_reports() {
        let (_recorder, d) = tcp_demuxer();
        let first = sender_report(0x1111_1111);
        let mut data = first.clone();
        data.extend_from_slice(&sender_report(0x2222_2222));

        // The second header begins at (L1 + 1) * 4.
        let l1 = usize::from(u16::from_be_bytes([first[2], first[3]]));
        let second_at = (l1 + 1) * 4;
        assert_eq!(second_at, first.len());
        assert_eq!(data[second_at + 1], rtcp::SENDER_REPORT);
        assert_eq!(&data[second_at + 4..second_at + 8], b"\x22\x22\x22\x22");

        let reports = d.handle(Source::Channel(1), PacketContext::dummy(), data.into());
        assert_eq!(reports.len(), 2);
        let ssrc = d.ssrc.to_be_bytes();
        for r in &reports {
            assert_eq!(r.destination, ReportDestination::Channel(1));
            assert_eq!(&r.data[..4], b"\x80\xc9\x00\x01");
            assert_eq!(&r.data[4..], &ssrc[..]);
        }
    }

    #[test]
    fn zero_length_rtcp_header_dropped() {
        let (_recorder, d) = tcp_demuxer();
        log::set_max_level(log::LevelFilter::Trace);
        let mut data = b"\x80\xc8\x00\x00\x11\x22\x33\x44".to_vec();
        data.extend_from_slice(&sender_report(0x2222_2222));
        let reports = d.handle(Source::Channel(1), PacketContext::dummy(), data.into());
        assert!(reports.is_empty());

        // The stream still works afterward.
        let reports = d.handle(
            Source::Channel(1),
            PacketContext::dummy(),
            sender_report(0x2222_2222).into(),
        );
        assert_eq!(reports.len(), 1);
    }

    #[test]
    fn only_sender_reports_answered() {
        let (_recorder, d) = tcp_demuxer();
        let mut data = sender_report(1);
        data.extend_from_slice(b"\x81\xca\x00\x01\x00\x00\x00\x01"); // SDES
        let reports = d.handle(Source::Channel(3), PacketContext::dummy(), data.into());
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].destination, ReportDestination::Channel(3));
    }

    #[test]
    fn udp_report_destinations() {
        init_logging();
        let d = Demuxer::new(ConnectionContext::dummy(), Arc::new(Recorder::default()));
        let mut v = video(Channels::Udp {
            rtp_port: 50_000,
            rtcp_port: 50_001,
        });
        v.server_rtcp_port = Some(6971);
        let mut a = audio(Channels::Udp {
            rtp_port: 5002,
            rtcp_port: 5003,
        });
        a.multicast = true;
        d.publish(vec![v, a]);
        let ctx = PacketContext::dummy();
        let reports = d.handle(Source::Port(50_001), ctx, sender_report(1).into());
        assert_eq!(reports.len(), 1);
        assert_eq!(
            reports[0].destination,
            ReportDestination::Udp {
                local_port: 50_001,
                server_port: 6971
            }
        );
        assert!(d.handle(Source::Port(5003), ctx, sender_report(1).into()).is_empty());
    }
}
