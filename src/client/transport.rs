// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `Transport` header planning for `SETUP` requests and parsing of `SETUP` replies.
//!
//! See [RFC 2326 section 12.39](https://datatracker.ietf.org/doc/html/rfc2326#section-12.39).

use std::net::IpAddr;

use super::{MediaKind, TransportMode};

/// Interleaved channels for the video stream: RTP then RTCP.
pub const VIDEO_CHANNELS: (u8, u8) = (0, 1);

/// Interleaved channels for the audio stream: RTP then RTCP.
pub const AUDIO_CHANNELS: (u8, u8) = (2, 3);

/// The transport requested in one `SETUP`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum TransportDescriptor {
    /// RTP and RTCP interleaved on the RTSP connection.
    Interleaved { rtp_channel: u8, rtcp_channel: u8 },

    /// Unicast UDP to the given locally bound ports.
    Unicast {
        client_rtp_port: u16,
        client_rtcp_port: u16,
    },

    /// Multicast UDP; the server chooses the group and ports.
    Multicast,
}

impl TransportDescriptor {
    /// Returns the value of the `Transport` request header.
    pub(crate) fn header(&self) -> String {
        match self {
            TransportDescriptor::Interleaved {
                rtp_channel,
                rtcp_channel,
            } => format!("RTP/AVP/TCP;unicast;interleaved={rtp_channel}-{rtcp_channel}"),
            TransportDescriptor::Unicast {
                client_rtp_port,
                client_rtcp_port,
            } => format!("RTP/AVP;unicast;client_port={client_rtp_port}-{client_rtcp_port}"),
            TransportDescriptor::Multicast => "RTP/AVP;multicast".to_owned(),
        }
    }
}

/// Chooses the transport for `kind`.
///
/// In UDP mode, `udp_rtp_port` is the even port of the pair already bound for
/// this stream; the RTCP port is the next one.
pub(crate) fn plan(
    kind: MediaKind,
    mode: TransportMode,
    udp_rtp_port: Option<u16>,
) -> Result<TransportDescriptor, String> {
    match mode {
        TransportMode::Tcp => {
            let (rtp_channel, rtcp_channel) = match kind {
                MediaKind::Video => VIDEO_CHANNELS,
                MediaKind::Audio => AUDIO_CHANNELS,
            };
            Ok(TransportDescriptor::Interleaved {
                rtp_channel,
                rtcp_channel,
            })
        }
        TransportMode::Udp => {
            let client_rtp_port =
                udp_rtp_port.ok_or_else(|| format!("no UDP port pair bound for {kind}"))?;
            let client_rtcp_port = client_rtp_port
                .checked_add(1)
                .ok_or_else(|| format!("RTP port {client_rtp_port} has no RTCP successor"))?;
            Ok(TransportDescriptor::Unicast {
                client_rtp_port,
                client_rtcp_port,
            })
        }
        TransportMode::Multicast => Ok(TransportDescriptor::Multicast),
    }
}

/// The `Session` header of a reply: an id and optional `;timeout=` in seconds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct SessionHeader {
    pub(crate) id: String,
    pub(crate) timeout_sec: Option<u32>,
}

/// Parses a `Session` header value.
///
/// See [RFC 2326 section 12.37](https://datatracker.ietf.org/doc/html/rfc2326#section-12.37).
pub(crate) fn parse_session(value: &str) -> Result<SessionHeader, String> {
    let mut parts = value.split(';');
    let id = parts.next().unwrap_or("").trim();
    if id.is_empty() {
        return Err(format!("empty session id in {value:?}"));
    }
    let mut timeout_sec = None;
    for p in parts {
        if let Some(v) = p.trim().strip_prefix("timeout=") {
            timeout_sec = Some(
                u32::from_str_radix(v.trim(), 10).map_err(|_| format!("Unparseable timeout {v}"))?,
            );
        }
    }
    Ok(SessionHeader {
        id: id.to_owned(),
        timeout_sec,
    })
}

/// The interesting fields of a `Transport` reply header.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct ReplyTransport {
    pub(crate) multicast: bool,
    pub(crate) interleaved: Option<(u8, u8)>,
    pub(crate) client_port: Option<(u16, u16)>,
    pub(crate) server_port: Option<(u16, u16)>,

    /// Multicast group.
    pub(crate) destination: Option<IpAddr>,

    /// Multicast ports.
    pub(crate) port: Option<(u16, u16)>,
    pub(crate) source: Option<IpAddr>,
    pub(crate) ssrc: Option<u32>,
}

/// Parses a `Transport` header value from a `SETUP` reply.
///
/// Only the first transport spec is considered. Unknown parameters are ignored.
pub(crate) fn parse_transport(value: &str) -> Result<ReplyTransport, String> {
    let spec = value.split(',').next().unwrap_or("");
    let mut t = ReplyTransport::default();
    for part in spec.split(';').map(str::trim) {
        let (key, v) = part.split_once('=').unwrap_or((part, ""));
        match key.to_ascii_lowercase().as_str() {
            "multicast" => t.multicast = true,
            "unicast" => t.multicast = false,
            "interleaved" => {
                let (n, m) = parse_pair(v, "channel")?;
                let n = u8::try_from(n).map_err(|_| format!("bad channel number {n}"))?;
                let m = u8::try_from(m).map_err(|_| format!("bad channel number {m}"))?;
                t.interleaved = Some((n, m));
            }
            "client_port" => t.client_port = Some(parse_pair(v, "client_port")?),
            "server_port" => t.server_port = Some(parse_pair(v, "server_port")?),
            "port" => t.port = Some(parse_pair(v, "port")?),
            "destination" => {
                t.destination = Some(
                    v.parse()
                        .map_err(|_| format!("Transport header has unparseable destination {v:?}"))?,
                )
            }
            "source" => {
                t.source = Some(
                    v.parse()
                        .map_err(|_| format!("Transport header has unparseable source {v:?}"))?,
                )
            }
            "ssrc" => {
                t.ssrc = Some(
                    u32::from_str_radix(v, 16).map_err(|_| format!("Unparseable ssrc {v}"))?,
                )
            }
            _ => {}
        }
    }
    Ok(t)
}

/// Parses `n-m` or `n`; the latter implies `n-(n+1)`.
fn parse_pair(v: &str, what: &str) -> Result<(u16, u16), String> {
    let (n, m) = match v.split_once('-') {
        Some((n, m)) => (n, Some(m)),
        None => (v, None),
    };
    let n = u16::from_str_radix(n.trim(), 10).map_err(|_| format!("bad {what} {v:?}"))?;
    let m = match m {
        Some(m) => u16::from_str_radix(m.trim(), 10).map_err(|_| format!("bad {what} {v:?}"))?,
        None => n.checked_add(1).ok_or_else(|| format!("bad {what} {v:?}"))?,
    };
    Ok((n, m))
}
