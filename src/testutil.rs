// Copyright (C) 2022 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

use bytes::{Buf, Bytes, BytesMut};
use rtsp_types::{Data, Message};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Sends `log` output to the test harness's captured stderr, filtered by `RUST_LOG`.
pub(crate) fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .is_test(true)
        .try_init();
}

/// Parses a canned response; panics if it isn't exactly one complete response.
pub(crate) fn response(raw: &'static [u8]) -> rtsp_types::Response<Bytes> {
    let (msg, len) = rtsp_types::Message::parse(raw).unwrap();
    assert_eq!(len, raw.len());
    match msg {
        rtsp_types::Message::Response(r) => r.map_body(|b| Bytes::from_static(b)),
        _ => panic!("unexpected message type"),
    }
}

/// A [`crate::client::Handler`] which records everything it's given.
#[derive(Default)]
pub(crate) struct Recorder {
    pub(crate) parameter_sets: parking_lot::Mutex<Vec<(Bytes, Bytes)>>,
    pub(crate) video: parking_lot::Mutex<Vec<Vec<Bytes>>>,
    pub(crate) audio: parking_lot::Mutex<Vec<(String, Vec<Bytes>)>>,
}

impl crate::client::Handler for Recorder {
    fn parameter_sets(&self, sps: Bytes, pps: Bytes) {
        self.parameter_sets.lock().push((sps, pps));
    }

    fn video_units(&self, units: Vec<Bytes>) {
        self.video.lock().push(units);
    }

    fn audio_frames(&self, codec: &str, frames: Vec<Bytes>) {
        self.audio.lock().push((codec.to_owned(), frames));
    }
}

/// The server end of an RTSP connection.
pub(crate) struct ServerConn {
    sock: TcpStream,
    buf: BytesMut,
}

impl ServerConn {
    pub(crate) fn new(sock: TcpStream) -> Self {
        Self {
            sock,
            buf: BytesMut::new(),
        }
    }

    /// Returns the next request or interleaved packet, or `None` once the
    /// client has closed the connection.
    pub(crate) async fn next(&mut self) -> Option<Message<Bytes>> {
        loop {
            let parsed: Result<(Message<&[u8]>, usize), _> = Message::parse(&self.buf[..]);
            let parsed = match parsed {
                Ok((m, len)) => Some((to_owned_message(m), len)),
                Err(rtsp_types::ParseError::Incomplete(_)) => None,
                Err(rtsp_types::ParseError::Error) => {
                    panic!("bad message from client: {:?}", &self.buf[..])
                }
            };
            if let Some((m, len)) = parsed {
                self.buf.advance(len);
                return Some(m);
            }
            match self.sock.read_buf(&mut self.buf).await {
                Ok(0) | Err(_) => return None,
                Ok(_) => {}
            }
        }
    }

    pub(crate) async fn send(&mut self, msg: Message<Bytes>) -> std::io::Result<()> {
        let mut out = Vec::new();
        msg.write(&mut out).unwrap();
        self.sock.write_all(&out).await
    }
}

fn to_owned_message(m: Message<&[u8]>) -> Message<Bytes> {
    match m {
        Message::Request(r) => Message::Request(r.map_body(Bytes::copy_from_slice)),
        Message::Response(r) => Message::Response(r.map_body(Bytes::copy_from_slice)),
        Message::Data(d) => Message::Data(Data::new(
            d.channel_id(),
            Bytes::copy_from_slice(d.into_body()),
        )),
    }
}
