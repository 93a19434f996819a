// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::{fmt::Display, sync::Arc};

use crate::{ConnectionContext, PacketContext, RtspMessageContext};
use bytes::Bytes;
use thiserror::Error;

/// An opaque `std::error::Error + Send + Sync + 'static` implementation.
///
/// The focus is on detailed human-readable error messages. In most cases they
/// have enough information to find the offending packet in Wireshark. For
/// coarse programmatic handling, see [`Error::kind`].
#[derive(Clone)]
pub struct Error(pub(crate) Arc<ErrorInt>);

impl Error {
    /// Returns the broad category of this error.
    pub fn kind(&self) -> ErrorKind {
        match &*self.0 {
            ErrorInt::InvalidArgument(_) | ErrorInt::FailedPrecondition(_) => {
                ErrorKind::InvalidArgument
            }
            ErrorInt::ConnectError(_) | ErrorInt::UdpBindError(_) => ErrorKind::ConnectFailure,
            ErrorInt::AuthError { .. } => ErrorKind::AuthFailure,
            ErrorInt::RtspResponseError { .. }
            | ErrorInt::RtspFramingError { .. }
            | ErrorInt::RtspProtocolError { .. } => ErrorKind::ProtocolError,
            ErrorInt::UnsupportedMedia(_) => ErrorKind::UnsupportedMedia,
            ErrorInt::PacketError { .. } | ErrorInt::RtspUnassignedChannelError { .. } => {
                ErrorKind::MalformedPacket
            }
            ErrorInt::PayloadMismatch { .. } => ErrorKind::PayloadMismatch,
            ErrorInt::RtspReadError { .. }
            | ErrorInt::UdpRecvError { .. }
            | ErrorInt::WriteError { .. } => ErrorKind::Io,
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::fmt::Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(&self.0, f)
    }
}

impl std::error::Error for Error {}

/// Broad classification of an [`Error`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The RTSP server couldn't be reached. Fatal to the session.
    ConnectFailure,

    /// The server rejected the supplied credentials, or demanded credentials
    /// that weren't supplied. Fatal to the session.
    AuthFailure,

    /// The server returned a non-success status or an unparseable message.
    ProtocolError,

    /// A media section offered no supported codec or had unusable parameters.
    /// That stream is never set up.
    UnsupportedMedia,

    /// An RTP/RTCP packet was too short for its declared headers, or arrived
    /// on a channel with no stream.
    MalformedPacket,

    /// An RTP packet's payload type didn't match its stream.
    PayloadMismatch,

    /// Reading from or writing to a socket failed after the connection was established.
    Io,

    /// The caller supplied an unusable argument or called in the wrong state.
    InvalidArgument,
}

#[derive(Debug, Error)]
pub(crate) enum ErrorInt {
    /// The method's caller provided an invalid argument.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Unparseable or unexpected RTSP message.
    #[error("[{conn_ctx}, {msg_ctx}] RTSP framing error: {description}")]
    RtspFramingError {
        conn_ctx: ConnectionContext,
        msg_ctx: RtspMessageContext,
        description: String,
    },

    /// A well-formed message which doesn't make sense in the session's state.
    #[error("[{conn_ctx}, {msg_ctx}] RTSP protocol error: {description}")]
    RtspProtocolError {
        conn_ctx: ConnectionContext,
        msg_ctx: RtspMessageContext,
        description: String,
    },

    #[error("[{conn_ctx}, {msg_ctx}] {status} response to {} CSeq={cseq}: \
             {description}", Into::<&str>::into(.method))]
    RtspResponseError {
        conn_ctx: ConnectionContext,
        msg_ctx: RtspMessageContext,
        method: rtsp_types::Method,
        cseq: u32,
        status: rtsp_types::StatusCode,
        description: String,
    },

    #[error("[{conn_ctx}, {msg_ctx}] Authentication failed on {} CSeq={cseq}: \
             {description}", Into::<&str>::into(.method))]
    AuthError {
        conn_ctx: ConnectionContext,
        msg_ctx: RtspMessageContext,
        method: rtsp_types::Method,
        cseq: u32,
        description: String,
    },

    #[error("Unsupported media: {0}")]
    UnsupportedMedia(String),

    #[error(
        "[{conn_ctx}, {pkt_ctx}] Received data on unassigned channel {channel}: \n\
         {:?}",
        crate::hex::LimitedHex::new(data, 64)
    )]
    RtspUnassignedChannelError {
        conn_ctx: ConnectionContext,
        pkt_ctx: PacketContext,
        channel: u16,
        data: Bytes,
    },

    #[error("[{conn_ctx}, {pkt_ctx} {stream}]: {description}")]
    PacketError {
        conn_ctx: ConnectionContext,
        pkt_ctx: PacketContext,
        stream: crate::client::MediaKind,
        description: String,
    },

    #[error(
        "[{conn_ctx}, {pkt_ctx}, {stream}, ssrc={ssrc:08x}, seq={sequence_number:04x}] \
         payload type {payload_type} doesn't match {expected}"
    )]
    PayloadMismatch {
        conn_ctx: ConnectionContext,
        pkt_ctx: PacketContext,
        stream: crate::client::MediaKind,
        ssrc: u32,
        sequence_number: u16,
        payload_type: u8,
        expected: String,
    },

    #[error("Unable to connect to RTSP server: {0}")]
    ConnectError(#[source] std::io::Error),

    #[error("Unable to bind UDP sockets: {0}")]
    UdpBindError(#[source] std::io::Error),

    #[error("[{conn_ctx}, {msg_ctx}] Error reading from RTSP peer: {source}")]
    RtspReadError {
        conn_ctx: ConnectionContext,
        msg_ctx: RtspMessageContext,
        source: std::io::Error,
    },

    #[error("[{conn_ctx}, {pkt_ctx}] Error receiving UDP packet: {source}")]
    UdpRecvError {
        conn_ctx: ConnectionContext,
        pkt_ctx: PacketContext,
        source: std::io::Error,
    },

    #[error("[{conn_ctx}] Error writing to RTSP peer: {source}")]
    WriteError {
        conn_ctx: ConnectionContext,
        source: std::io::Error,
    },

    #[error("Failed precondition: {0}")]
    FailedPrecondition(String),
}
