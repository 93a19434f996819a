// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! RTSP over TCP and RTP/RTCP over UDP, on tokio.
//!
//! The RTSP connection is split into a [`Reader`], which yields [`Incoming`]
//! items, and a [`Writer`], which serializes requests and interleaved data.

use bytes::{Buf, Bytes, BytesMut};
use futures::StreamExt;
use log::trace;
use rtsp_types::{Message, Method, Response};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, UdpSocket};
use tokio_util::codec::{Decoder, FramedRead};
use url::Host;

use crate::error::ErrorInt;
use crate::hex::LimitedHex;
use crate::{ConnectionContext, Error, RtspMessageContext, WallTime};

/// Something read from the RTSP connection.
#[derive(Debug)]
pub(crate) enum Incoming {
    /// A response to one of the client's requests.
    Response(Response<Bytes>),

    /// An interleaved RTP or RTCP packet.
    Data { channel: u8, body: Bytes },

    /// A request initiated by the server. Only its method is kept.
    Request(Method),
}

/// An [`Incoming`] item with its position in the stream.
#[derive(Debug)]
pub(crate) struct Received {
    pub(crate) ctx: RtspMessageContext,
    pub(crate) item: Incoming,
}

/// Connects to `host:port` and splits the connection.
pub(crate) async fn connect(host: Host<&str>, port: u16) -> Result<(Reader, Writer), std::io::Error> {
    let stream = match host {
        Host::Domain(h) => TcpStream::connect((h, port)).await,
        Host::Ipv4(h) => TcpStream::connect((h, port)).await,
        Host::Ipv6(h) => TcpStream::connect((h, port)).await,
    }?;
    split(stream)
}

/// Splits an established connection into its read and write halves.
pub(crate) fn split(stream: TcpStream) -> Result<(Reader, Writer), std::io::Error> {
    let ctx = ConnectionContext {
        local_addr: stream.local_addr()?,
        peer_addr: stream.peer_addr()?,
        established_wall: WallTime::now(),
    };
    let (read_half, write_half) = stream.into_split();
    let reader = Reader {
        ctx,
        frames: FramedRead::new(read_half, RtspDecoder { read_pos: 0 }),
    };
    let writer = Writer {
        ctx,
        half: write_half,
        buf: Vec::new(),
    };
    Ok((reader, writer))
}

pub(crate) struct Reader {
    ctx: ConnectionContext,
    frames: FramedRead<OwnedReadHalf, RtspDecoder>,
}

impl Reader {
    pub(crate) fn ctx(&self) -> ConnectionContext {
        self.ctx
    }

    /// Returns the next item, or `None` once the server closes the connection.
    pub(crate) async fn next(&mut self) -> Option<Result<Received, Error>> {
        let r = self.frames.next().await?;
        Some(r.map_err(|e| match e {
            DecodeError::Io(source) => wrap!(ErrorInt::RtspReadError {
                conn_ctx: self.ctx,
                msg_ctx: RtspMessageContext {
                    pos: self.frames.decoder().read_pos,
                    received_wall: WallTime::now(),
                },
                source,
            }),
            DecodeError::Framing { pos, description } => wrap!(ErrorInt::RtspFramingError {
                conn_ctx: self.ctx,
                msg_ctx: RtspMessageContext {
                    pos,
                    received_wall: WallTime::now(),
                },
                description,
            }),
        }))
    }
}

pub(crate) struct Writer {
    ctx: ConnectionContext,
    half: OwnedWriteHalf,

    /// Serialization buffer, reused between messages.
    buf: Vec<u8>,
}

impl Writer {
    pub(crate) async fn send(&mut self, msg: &Message<Bytes>) -> Result<(), Error> {
        self.buf.clear();
        let r = match msg.write(&mut self.buf) {
            Ok(()) => self.half.write_all(&self.buf).await,
            Err(rtsp_types::WriteError::IoError(e)) => Err(e),
        };
        r.map_err(|source| {
            wrap!(ErrorInt::WriteError {
                conn_ctx: self.ctx,
                source,
            })
        })
    }

    /// Shuts down the write direction; the server sees EOF.
    pub(crate) async fn shutdown(&mut self) -> Result<(), std::io::Error> {
        self.half.shutdown().await
    }
}

#[derive(Debug)]
enum DecodeError {
    Io(std::io::Error),
    Framing { pos: u64, description: String },
}

impl From<std::io::Error> for DecodeError {
    fn from(e: std::io::Error) -> Self {
        DecodeError::Io(e)
    }
}

/// Splits the byte stream into responses, server requests, and `$`-framed data.
struct RtspDecoder {
    /// Bytes consumed so far, including skipped line breaks.
    read_pos: u64,
}

impl RtspDecoder {
    fn message(&self, src: &BytesMut) -> Result<Option<(usize, Incoming)>, DecodeError> {
        let (msg, len): (Message<&[u8]>, usize) = match Message::parse(&src[..]) {
            Ok(m) => m,
            Err(rtsp_types::ParseError::Incomplete(_)) => return Ok(None),
            Err(rtsp_types::ParseError::Error) => {
                return Err(DecodeError::Framing {
                    pos: self.read_pos,
                    description: format!(
                        "invalid RTSP message; buffered:\n{:#?}",
                        LimitedHex::new(&src[..], 128)
                    ),
                })
            }
        };
        let item = match msg {
            Message::Response(r) => Incoming::Response(r.map_body(Bytes::copy_from_slice)),
            Message::Request(r) => Incoming::Request(r.method().clone()),
            Message::Data(d) => Incoming::Data {
                channel: d.channel_id(),
                body: Bytes::copy_from_slice(d.into_body()),
            },
        };
        Ok(Some((len, item)))
    }
}

/// Splits off one `$`-framed packet, or returns `None` if it's incomplete.
fn interleaved(src: &mut BytesMut) -> Option<(usize, Incoming)> {
    let (channel, len) = {
        let header = src.get(..4)?;
        (header[1], 4 + usize::from(u16::from_be_bytes([header[2], header[3]])))
    };
    if src.len() < len {
        src.reserve(len - src.len());
        return None;
    }
    let mut frame = src.split_to(len);
    frame.advance(4);
    Some((
        len,
        Incoming::Data {
            channel,
            body: frame.freeze(),
        },
    ))
}

impl Decoder for RtspDecoder {
    type Item = Received;
    type Error = DecodeError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Received>, DecodeError> {
        // Some servers send a bare CRLF between messages.
        while src.starts_with(b"\r\n") {
            src.advance(2);
            self.read_pos += 2;
        }
        let ctx = RtspMessageContext {
            pos: self.read_pos,
            received_wall: WallTime::now(),
        };
        let parsed = match src.first().copied() {
            None => None,
            Some(b'$') => interleaved(src),
            Some(_) => {
                let parsed = self.message(src)?;
                if let Some((len, _)) = &parsed {
                    src.advance(*len);
                }
                parsed
            }
        };
        let Some((len, item)) = parsed else {
            return Ok(None);
        };
        trace!("read {} bytes at {}", len, ctx);
        self.read_pos += crate::to_u64(len);
        Ok(Some(Received { ctx, item }))
    }
}

/// tokio-specific version of [`crate::UdpPair`].
pub(crate) struct UdpPair {
    pub(crate) rtp_port: u16,
    pub(crate) rtp_socket: UdpSocket,
    pub(crate) rtcp_socket: UdpSocket,
}

impl UdpPair {
    pub(crate) fn for_port_range(
        ip_addr: std::net::IpAddr,
        range: std::ops::RangeInclusive<u16>,
    ) -> Result<Self, std::io::Error> {
        Self::from_std(crate::UdpPair::for_port_range(ip_addr, range)?)
    }

    pub(crate) fn for_multicast(
        group: std::net::IpAddr,
        rtp_port: u16,
        rtcp_port: u16,
    ) -> Result<Self, std::io::Error> {
        Self::from_std(crate::UdpPair::for_multicast(group, rtp_port, rtcp_port)?)
    }

    fn from_std(inner: crate::UdpPair) -> Result<Self, std::io::Error> {
        inner.rtp_socket.set_nonblocking(true)?;
        inner.rtcp_socket.set_nonblocking(true)?;
        Ok(Self {
            rtp_port: inner.rtp_port,
            rtp_socket: UdpSocket::from_std(inner.rtp_socket)?,
            rtcp_socket: UdpSocket::from_std(inner.rtcp_socket)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use rtsp_types::StatusCode;

    use super::*;

    fn decode_all(raw: &[u8]) -> (Vec<Received>, BytesMut) {
        let mut d = RtspDecoder { read_pos: 0 };
        let mut buf = BytesMut::from(raw);
        let mut out = Vec::new();
        while let Some(r) = d.decode(&mut buf).unwrap() {
            out.push(r);
        }
        (out, buf)
    }

    #[test]
    fn crlf_data() {
        let (items, rest) = decode_all(b"\r\n$\x00\x00\x04asdf$\x01");
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].ctx.pos(), 2);
        match &items[0].item {
            Incoming::Data { channel: 0, body } => assert_eq!(&body[..], b"asdf"),
            i => panic!("unexpected {i:?}"),
        }
        assert_eq!(&rest[..], b"$\x01");
    }

    #[test]
    fn interleaved_then_response() {
        let (items, rest) = decode_all(
            b"$\x02\x00\x02hiRTSP/1.0 200 OK\r\nCSeq: 3\r\nContent-Length: 3\r\n\r\nv=0$\x03\x00",
        );
        assert_eq!(items.len(), 2);
        match &items[0].item {
            Incoming::Data { channel: 2, body } => assert_eq!(&body[..], b"hi"),
            i => panic!("unexpected {i:?}"),
        }
        assert_eq!(items[1].ctx.pos(), 6);
        match &items[1].item {
            Incoming::Response(r) => {
                assert_eq!(r.status(), StatusCode::Ok);
                assert_eq!(&r.body()[..], b"v=0");
            }
            i => panic!("unexpected {i:?}"),
        }

        // An incomplete interleaved header stays buffered.
        assert_eq!(&rest[..], b"$\x03\x00");
    }

    #[test]
    fn server_request_keeps_method() {
        let (items, rest) =
            decode_all(b"GET_PARAMETER rtsp://h/ RTSP/1.0\r\nCSeq: 1\r\n\r\n$\x00");
        assert_eq!(items.len(), 1);
        assert!(matches!(
            items[0].item,
            Incoming::Request(Method::GetParameter)
        ));
        assert_eq!(&rest[..], b"$\x00");
    }

    #[test]
    fn garbage_is_framing_error() {
        let mut d = RtspDecoder { read_pos: 7 };
        let mut buf = BytesMut::from(&b"\x00\x01garbage\r\n\r\n"[..]);
        match d.decode(&mut buf) {
            Err(DecodeError::Framing { pos: 7, description }) => {
                assert!(description.starts_with("invalid RTSP message"), "{}", description)
            }
            r => panic!("unexpected {r:?}"),
        }
    }

    #[tokio::test]
    async fn write_then_read() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, server) = tokio::join!(TcpStream::connect(addr), listener.accept());
        let (mut reader, _w) = split(client.unwrap()).unwrap();
        let (_r, mut writer) = split(server.unwrap().0).unwrap();
        assert_eq!(reader.ctx().peer_addr(), addr);
        writer
            .send(&Message::Data(rtsp_types::Data::new(
                1,
                Bytes::from_static(b"\x80\xc9\x00\x01\x00\x00\x00\x01"),
            )))
            .await
            .unwrap();
        writer.shutdown().await.unwrap();
        let r = reader.next().await.unwrap().unwrap();
        match r.item {
            Incoming::Data { channel: 1, body } => assert_eq!(body.len(), 8),
            i => panic!("unexpected {i:?}"),
        }
        assert!(reader.next().await.is_none());
    }
}
