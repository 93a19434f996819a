// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! RTSP client core.
//!
//! Negotiates a session with an RTSP server (`OPTIONS`, `DESCRIBE`, `SETUP`,
//! `PLAY`), answers Digest authentication challenges, and demultiplexes the
//! resulting RTP/RTCP traffic into H.264 NAL units and G.711 audio frames.
//! See [`client::Client`] for the entry point.

#![forbid(clippy::print_stderr, clippy::print_stdout)]
// I prefer to use from_str_radix(..., 10) to explicitly note the base.
#![allow(clippy::from_str_radix_10)]

use log::trace;
use std::fmt::Display;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::ops::RangeInclusive;

/// Wraps the supplied `ErrorInt` and returns it as an `Err`.
macro_rules! bail {
    ($e:expr) => {
        return Err(crate::error::Error(std::sync::Arc::new($e)))
    };
}

macro_rules! wrap {
    ($e:expr) => {
        crate::error::Error(std::sync::Arc::new($e))
    };
}

mod error;
mod hex;
pub mod rtcp;
pub mod rtp;

pub mod client;
pub mod codec;
mod tokio;

#[cfg(test)]
mod testutil;

pub use error::{Error, ErrorKind};

/// A wall time taken from the local machine's realtime clock, used in error reporting.
///
/// Currently this just allows formatting via `Debug` and `Display`.
#[derive(Copy, Clone, Debug)]
pub struct WallTime(chrono::DateTime<chrono::Utc>);

impl WallTime {
    fn now() -> Self {
        Self(chrono::Utc::now())
    }
}

impl Display for WallTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format("%FT%T"))
    }
}

/// RTSP connection context.
///
/// This gives enough information to pick out the flow in a packet capture.
#[derive(Copy, Clone, Debug)]
pub struct ConnectionContext {
    local_addr: SocketAddr,
    peer_addr: SocketAddr,
    established_wall: WallTime,
}

impl ConnectionContext {
    #[doc(hidden)]
    pub fn dummy() -> Self {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0);
        Self {
            local_addr: addr,
            peer_addr: addr,
            established_wall: WallTime::now(),
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }
}

impl Display for ConnectionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}(me)->{}@{}",
            &self.local_addr, &self.peer_addr, &self.established_wall,
        )
    }
}

/// Context of a received message (or read error) within an RTSP connection.
///
/// When paired with a [`ConnectionContext`], this should allow picking the
/// message out of a packet capture.
#[derive(Copy, Clone, Debug)]
pub struct RtspMessageContext {
    /// The starting byte position within the input stream. The bottom 32 bits
    /// can be compared to the relative TCP sequence number.
    pos: u64,

    /// Time when the application parsed the message.
    received_wall: WallTime,
}

impl RtspMessageContext {
    #[doc(hidden)]
    pub fn dummy() -> Self {
        Self {
            pos: 0,
            received_wall: WallTime::now(),
        }
    }

    pub fn pos(&self) -> u64 {
        self.pos
    }
}

impl Display for RtspMessageContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.pos, &self.received_wall)
    }
}

/// Context for an RTP or RTCP packet, received either via RTSP interleaved data or UDP.
#[derive(Copy, Clone, Debug)]
pub struct PacketContext(PacketContextInner);

impl PacketContext {
    #[doc(hidden)]
    pub fn dummy() -> PacketContext {
        Self(PacketContextInner::Dummy)
    }

    pub(crate) fn tcp(msg_ctx: RtspMessageContext) -> Self {
        Self(PacketContextInner::Tcp { msg_ctx })
    }

    pub(crate) fn udp(local_port: u16) -> Self {
        Self(PacketContextInner::Udp {
            local_port,
            received_wall: WallTime::now(),
        })
    }
}

#[derive(Copy, Clone, Debug)]
enum PacketContextInner {
    Tcp {
        msg_ctx: RtspMessageContext,
    },
    Udp {
        local_port: u16,
        received_wall: WallTime,
    },
    Dummy,
}

impl Display for PacketContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            PacketContextInner::Udp {
                local_port,
                received_wall,
            } => write!(f, "udp:{}@{}", local_port, received_wall),
            PacketContextInner::Tcp { msg_ctx } => Display::fmt(&msg_ctx, f),
            PacketContextInner::Dummy => write!(f, "dummy"),
        }
    }
}

#[inline]
pub(crate) fn to_u64(v: usize) -> u64 {
    v as u64
}

/// A pair of local UDP sockets used for RTP and RTCP reception.
///
/// The RTP port is always even, and the RTCP port is always the following (odd) integer.
struct UdpPair {
    rtp_port: u16,
    rtp_socket: UdpSocket,
    rtcp_socket: UdpSocket,
}

impl UdpPair {
    /// Binds the first free even/odd pair within `range`, scanning upward.
    fn for_port_range(ip_addr: IpAddr, range: RangeInclusive<u16>) -> Result<Self, std::io::Error> {
        let first = range.start().saturating_add(range.start() & 1);
        let mut rtp_port = first;
        while rtp_port < *range.end() {
            let rtp_addr = SocketAddr::new(ip_addr, rtp_port);
            let rtp_socket = match UdpSocket::bind(rtp_addr) {
                Ok(s) => s,
                Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
                    trace!("unable to bind RTP addr {:?}", rtp_addr);
                    rtp_port = match rtp_port.checked_add(2) {
                        Some(p) => p,
                        None => break,
                    };
                    continue;
                }
                Err(e) => return Err(e),
            };
            let rtcp_addr = SocketAddr::new(ip_addr, rtp_port + 1);
            let rtcp_socket = match UdpSocket::bind(rtcp_addr) {
                Ok(s) => s,
                Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
                    trace!("unable to bind RTCP addr {:?}", rtcp_addr);
                    rtp_port = match rtp_port.checked_add(2) {
                        Some(p) => p,
                        None => break,
                    };
                    continue;
                }
                Err(e) => return Err(e),
            };
            return Ok(Self {
                rtp_port,
                rtp_socket,
                rtcp_socket,
            });
        }
        Err(std::io::Error::new(
            std::io::ErrorKind::AddrInUse,
            format!(
                "Unable to find even/odd pair in {}:{}..={}",
                ip_addr,
                range.start(),
                range.end()
            ),
        ))
    }

    /// Binds `rtp_port` and `rtcp_port` on the wildcard address and joins `group` on both.
    fn for_multicast(group: IpAddr, rtp_port: u16, rtcp_port: u16) -> Result<Self, std::io::Error> {
        let bind = |port| -> Result<UdpSocket, std::io::Error> {
            match group {
                IpAddr::V4(g) => {
                    let s = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port))?;
                    s.join_multicast_v4(&g, &Ipv4Addr::UNSPECIFIED)?;
                    Ok(s)
                }
                IpAddr::V6(g) => {
                    let s = UdpSocket::bind((Ipv6Addr::UNSPECIFIED, port))?;
                    s.join_multicast_v6(&g, 0)?;
                    Ok(s)
                }
            }
        };
        Ok(Self {
            rtp_port,
            rtp_socket: bind(rtp_port)?,
            rtcp_socket: bind(rtcp_port)?,
        })
    }
}
