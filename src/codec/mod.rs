// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Codec-specific logic.
//!
//! Currently this consists of RTP depacketization for the codecs a client
//! negotiates: H.264 video and G.711 (PCMA/PCMU) audio. Each depacketizer is
//! stateful per stream and caches partial data across calls.

use bytes::Bytes;

pub mod g711;
pub mod h264;

/// Turns RTP payloads of one stream into complete media units.
#[derive(Debug)]
pub enum Depacketizer {
    H264(h264::Depacketizer),
    G711(g711::Depacketizer),
}

impl Depacketizer {
    /// Creates a depacketizer for an SDP encoding name, matched case-insensitively.
    pub fn new(encoding_name: &str) -> Result<Self, String> {
        if encoding_name.eq_ignore_ascii_case("h264") {
            Ok(Depacketizer::H264(h264::Depacketizer::new()))
        } else if encoding_name.eq_ignore_ascii_case("pcma")
            || encoding_name.eq_ignore_ascii_case("pcmu")
        {
            Ok(Depacketizer::G711(g711::Depacketizer::new()))
        } else {
            Err(format!("no depacketizer for encoding {encoding_name:?}"))
        }
    }

    /// Feeds one RTP payload. Returns the units completed by this packet, if any.
    ///
    /// On error the partial unit in progress (if any) is discarded; the
    /// depacketizer remains usable for following packets.
    pub fn process_packet(
        &mut self,
        payload: Bytes,
        mark: bool,
    ) -> Result<Option<Vec<Bytes>>, String> {
        match self {
            Depacketizer::H264(d) => d.push(payload, mark),
            Depacketizer::G711(d) => d.push(payload),
        }
    }
}
