// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Handles RTCP data as described in
//! [RFC 3550 section 6](https://datatracker.ietf.org/doc/html/rfc3550#section-6).
//!
//! Only the common header is interpreted. The one packet this crate emits is
//! an empty receiver report acknowledging a sender report.

pub const SENDER_REPORT: u8 = 200;
pub const RECEIVER_REPORT: u8 = 201;
pub const SOURCE_DESCRIPTION: u8 = 202;
pub const GOODBYE: u8 = 203;
pub const APPLICATION_DEFINED: u8 = 204;
pub const EXTENDED_REPORT: u8 = 207;

/// Length of the common header as read here: the four leading octets plus the sender SSRC.
pub const COMMON_HEADER_LEN: usize = 8;

/// A generic packet, not parsed as any particular payload type.
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |V=2|P|   RC    |   PT          |             length            |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                         SSRC of sender                        |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Copy, Clone)]
pub struct PacketRef<'a> {
    buf: &'a [u8],
    ssrc: u32,
}

impl<'a> PacketRef<'a> {
    /// Parses a buffer into this packet and rest, validating only the version
    /// and that the stated length is present and covers the common header.
    pub fn parse(buf: &'a [u8]) -> Result<(Self, &'a [u8]), String> {
        if buf.len() < COMMON_HEADER_LEN {
            return Err(format!(
                "RTCP packets must be at least {} bytes; have only {}",
                COMMON_HEADER_LEN,
                buf.len()
            ));
        }
        let ver = buf[0] >> 6;
        if ver != 2 {
            return Err(format!("RTCP packets must be version 2; got {ver}"));
        }

        // raw_len is "The length of this RTCP packet in 32-bit words minus one,
        // including the header and any padding."
        let raw_len = u16::from_be_bytes([buf[2], buf[3]]);
        let len = (usize::from(raw_len) + 1) * 4;
        if len < COMMON_HEADER_LEN {
            return Err(format!(
                "RTCP packet header has length {len} bytes; must be at least {COMMON_HEADER_LEN}"
            ));
        }
        if buf.len() < len {
            return Err(format!(
                "RTCP packet header has length {} bytes; have only {}",
                len,
                buf.len()
            ));
        }
        let ssrc = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
        let (this, rest) = buf.split_at(len);
        Ok((PacketRef { buf: this, ssrc }, rest))
    }

    #[inline]
    pub fn version(&self) -> u8 {
        self.buf[0] >> 6
    }

    /// Returns true iff this packet has padding.
    #[inline]
    pub fn has_padding(&self) -> bool {
        (self.buf[0] & 0b0010_0000) != 0
    }

    /// Returns the low 5 bits of the first octet, which is typically a count
    /// of reception reports.
    #[inline]
    pub fn count(&self) -> u8 {
        self.buf[0] & 0b0001_1111
    }

    /// Returns the uninterpreted payload type of this RTCP packet.
    #[inline]
    pub fn payload_type(&self) -> u8 {
        self.buf[1]
    }

    /// Returns the raw length field: 32-bit words minus one.
    #[inline]
    pub fn length_words(&self) -> u16 {
        u16::from_be_bytes([self.buf[2], self.buf[3]])
    }

    #[inline]
    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    /// Returns the full raw data, including headers.
    #[inline]
    pub fn raw(&self) -> &[u8] {
        self.buf
    }
}

impl std::fmt::Debug for PacketRef<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketRef")
            .field("payload_type", &self.payload_type())
            .field("count", &self.count())
            .field("ssrc", &format_args!("{:08x}", self.ssrc()))
            .field("len", &self.buf.len())
            .finish()
    }
}

/// Iterates through the packets of a compound packet.
///
/// Yields an error for the first packet that can't be parsed, then stops.
pub struct CompoundPacketIterator<'a>(&'a [u8]);

impl<'a> CompoundPacketIterator<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self(buf)
    }
}

impl<'a> Iterator for CompoundPacketIterator<'a> {
    type Item = Result<PacketRef<'a>, String>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.0.is_empty() {
            return None;
        }
        match PacketRef::parse(self.0) {
            Ok((pkt, rest)) => {
                self.0 = rest;
                Some(Ok(pkt))
            }
            Err(e) => {
                self.0 = &[];
                Some(Err(e))
            }
        }
    }
}

/// Returns a short name for a payload type, for logging.
pub fn payload_type_name(payload_type: u8) -> &'static str {
    match payload_type {
        SENDER_REPORT => "SR",
        RECEIVER_REPORT => "RR",
        SOURCE_DESCRIPTION => "SDES",
        GOODBYE => "BYE",
        APPLICATION_DEFINED => "APP",
        EXTENDED_REPORT => "XR",
        _ => "unknown",
    }
}

/// Builds an empty receiver report: version 2, no padding, no report blocks.
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |V=2|0|  RC=0   |   PT=RR=201   |           length=1            |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                     SSRC of packet sender                     |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
pub fn empty_receiver_report(ssrc: u32) -> [u8; 8] {
    let length_words = (COMMON_HEADER_LEN / 4 - 1) as u16;
    let mut rr = [0u8; 8];
    rr[0] = 2 << 6;
    rr[1] = RECEIVER_REPORT;
    rr[2..4].copy_from_slice(&length_words.to_be_bytes());
    rr[4..8].copy_from_slice(&ssrc.to_be_bytes());
    rr
}
