// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Handles RTP data as described in
//! [RFC 3550 section 5.1](https://datatracker.ietf.org/doc/html/rfc3550#section-5.1).

use std::ops::Range;

use bytes::{Buf, Bytes};

/// The minimum length of an RTP header (no CSRCs or extensions).
pub const MIN_HEADER_LEN: usize = 12;

/// Raw packet with a validated header.
///
/// This design is inspired by [`rtp-rs`](https://crates.io/crates/rtp-rs) in
/// that it primarily validates a raw buffer then provides accessors for it,
/// keeping the payload range determined during validation.
///
/// The payload runs from the end of the header (CSRCs and any extension
/// included) to the end of the buffer. Padding, if flagged, isn't stripped.
#[derive(Clone)]
pub struct RawPacket {
    /// Full packet data, including headers.
    ///
    /// ```text
    ///  0                   1                   2                   3
    ///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
    /// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
    /// |V=2|P|X|  CC   |M|     PT      |       sequence number         |
    /// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
    /// |                           timestamp                           |
    /// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
    /// |           synchronization source (SSRC) identifier            |
    /// +=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+
    /// |            contributing source (CSRC) identifiers             |
    /// |                             ....                              |
    /// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
    /// |      defined by profile       |           length              |
    /// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
    /// |                        header extension                       |
    /// |                             ....                              |
    /// ```
    data: Bytes,
    payload_range: Range<usize>,
}

#[derive(Debug)]
pub struct RawPacketError {
    pub reason: &'static str,
    pub data: Bytes,
}

impl RawPacket {
    /// Validates an RTP packet's headers.
    pub fn new(data: Bytes) -> Result<Self, RawPacketError> {
        if data.len() < MIN_HEADER_LEN {
            return Err(RawPacketError {
                reason: "too short",
                data,
            });
        }
        if (data[0] & 0b1100_0000) != 2 << 6 {
            return Err(RawPacketError {
                reason: "must be version 2",
                data,
            });
        }
        let has_extension = (data[0] & 0b0001_0000) != 0;
        let csrc_count = usize::from(data[0] & 0b0000_1111);
        let csrc_end = MIN_HEADER_LEN + (4 * csrc_count);
        if data.len() < csrc_end {
            return Err(RawPacketError {
                reason: "CSRC list is after end of packet",
                data,
            });
        }
        let payload_start = if has_extension {
            if data.len() < csrc_end + 4 {
                return Err(RawPacketError {
                    reason: "extension header is after end of packet",
                    data,
                });
            }
            // The length field counts 32-bit words, excluding the 4-byte extension header.
            let extension_words = u16::from_be_bytes([data[csrc_end + 2], data[csrc_end + 3]]);
            let end = csrc_end + 4 + 4 * usize::from(extension_words);
            if data.len() < end {
                return Err(RawPacketError {
                    reason: "extension is after end of packet",
                    data,
                });
            }
            end
        } else {
            csrc_end
        };
        let len = data.len();
        Ok(Self {
            data,
            payload_range: payload_start..len,
        })
    }

    #[inline]
    pub fn version(&self) -> u8 {
        self.data[0] >> 6
    }

    #[inline]
    pub fn has_padding(&self) -> bool {
        (self.data[0] & 0b0010_0000) != 0
    }

    #[inline]
    pub fn has_extension(&self) -> bool {
        (self.data[0] & 0b0001_0000) != 0
    }

    #[inline]
    pub fn csrc_count(&self) -> u8 {
        self.data[0] & 0b0000_1111
    }

    /// Returns the profile-defined extension id, if an extension is present.
    pub fn extension_id(&self) -> Option<u16> {
        if !self.has_extension() {
            return None;
        }
        let i = MIN_HEADER_LEN + 4 * usize::from(self.csrc_count());
        Some(u16::from_be_bytes([self.data[i], self.data[i + 1]]))
    }

    #[inline]
    pub fn mark(&self) -> bool {
        (self.data[1] & 0b1000_0000) != 0
    }

    #[inline]
    pub fn payload_type(&self) -> u8 {
        self.data[1] & 0b0111_1111
    }

    #[inline]
    pub fn sequence_number(&self) -> u16 {
        u16::from_be_bytes([self.data[2], self.data[3]])
    }

    #[inline]
    pub fn timestamp(&self) -> u32 {
        u32::from_be_bytes([self.data[4], self.data[5], self.data[6], self.data[7]])
    }

    #[inline]
    pub fn ssrc(&self) -> u32 {
        u32::from_be_bytes([self.data[8], self.data[9], self.data[10], self.data[11]])
    }

    /// Returns the byte offset at which the payload starts.
    #[inline]
    pub fn payload_start(&self) -> usize {
        self.payload_range.start
    }

    /// Returns the raw bytes, including the RTP headers.
    #[inline]
    pub fn raw(&self) -> &[u8] {
        &self.data[..]
    }

    /// Returns only the payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.data[self.payload_range.clone()]
    }

    /// Consumes the packet and returns the payload without copying.
    #[inline]
    pub fn into_payload_bytes(self) -> Bytes {
        let mut data = self.data;
        data.truncate(self.payload_range.end);
        data.advance(self.payload_range.start);
        data
    }
}

impl std::fmt::Debug for RawPacket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawPacket")
            .field("payload_type", &self.payload_type())
            .field("ssrc", &format_args!("{:08x}", self.ssrc()))
            .field("sequence_number", &self.sequence_number())
            .field("timestamp", &self.timestamp())
            .field("mark", &self.mark())
            .field("payload", &crate::hex::LimitedHex::new(self.payload(), 64))
            .finish()
    }
}

/// Builds simple packets (no CSRCs, extensions, or padding). Used by tests and benchmarks.
#[doc(hidden)]
pub struct RawPacketBuilder {
    pub sequence_number: u16,
    pub timestamp: u32,
    pub payload_type: u8,
    pub ssrc: u32,
    pub mark: bool,
}

impl RawPacketBuilder {
    pub fn build<P: IntoIterator<Item = u8>>(self, payload: P) -> Result<Bytes, &'static str> {
        if self.payload_type >= 0x80 {
            return Err("payload type too large");
        }
        let data: Bytes = [
            2 << 6, // version=2, no padding, no extensions, no CSRCs.
            if self.mark { 0b1000_0000 } else { 0 } | self.payload_type,
        ]
        .into_iter()
        .chain(self.sequence_number.to_be_bytes())
        .chain(self.timestamp.to_be_bytes())
        .chain(self.ssrc.to_be_bytes())
        .chain(payload)
        .collect();
        if data.len() > usize::from(u16::MAX) {
            return Err("payload too long");
        }
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn fixed_header() {
        let data = RawPacketBuilder {
            sequence_number: 0x1234,
            timestamp: 0xdead_beef,
            payload_type: 96,
            ssrc: 0x0102_0304,
            mark: true,
        }
        .build(*b"hello")
        .unwrap();
        let pkt = RawPacket::new(data).unwrap();
        assert_eq!(pkt.version(), 2);
        assert!(pkt.mark());
        assert_eq!(pkt.payload_type(), 96);
        assert_eq!(pkt.sequence_number(), 0x1234);
        assert_eq!(pkt.timestamp(), 0xdead_beef);
        assert_eq!(pkt.ssrc(), 0x0102_0304);
        assert_eq!(pkt.payload_start(), 12);
        assert_eq!(pkt.payload(), b"hello");
        assert_eq!(pkt.extension_id(), None);
    }

    #[test]
    fn extension_with_two_words() {
        // X=1, CC=0, extension length field 2 => payload at 12 + 4 + 2*4.
        let data = Bytes::from_static(
            b"\x90\x60\x00\x01\x00\x00\x00\x02\x00\x00\x00\x03\
              \xbe\xde\x00\x02\
              \x11\x11\x11\x11\x22\x22\x22\x22\
              payload",
        );
        let pkt = RawPacket::new(data).unwrap();
        assert!(pkt.has_extension());
        assert_eq!(pkt.extension_id(), Some(0xbede));
        assert_eq!(pkt.payload_start(), 12 + 4 + 2 * 4);
        assert_eq!(pkt.payload(), b"payload");
    }

    #[test]
    fn csrcs_then_extension() {
        // CC=2, X=1, extension length 1.
        let data = Bytes::from_static(
            b"\x92\x08\x00\x01\x00\x00\x00\x02\x00\x00\x00\x03\
              \xaa\xaa\xaa\xaa\xbb\xbb\xbb\xbb\
              \x10\x00\x00\x01\xcc\xcc\xcc\xcc\
              x",
        );
        let pkt = RawPacket::new(data).unwrap();
        assert_eq!(pkt.csrc_count(), 2);
        assert_eq!(pkt.payload_start(), 12 + 8 + 4 + 4);
        assert_eq!(pkt.into_payload_bytes(), Bytes::from_static(b"x"));
    }

    #[test]
    fn padding_is_not_stripped() {
        let data = Bytes::from_static(b"\xa0\x00\x00\x01\x00\x00\x00\x02\x00\x00\x00\x03ab\x00\x02");
        let pkt = RawPacket::new(data).unwrap();
        assert!(pkt.has_padding());
        assert_eq!(pkt.payload(), b"ab\x00\x02");
    }

    #[test_case(b"\x80\x60\x00\x01\x00\x00\x00\x02\x00\x00\x00", "too short"; "short fixed header")]
    #[test_case(b"\x40\x60\x00\x01\x00\x00\x00\x02\x00\x00\x00\x03", "must be version 2"; "version 1")]
    #[test_case(b"\x81\x60\x00\x01\x00\x00\x00\x02\x00\x00\x00\x03", "CSRC list is after end of packet"; "missing csrc")]
    #[test_case(b"\x90\x60\x00\x01\x00\x00\x00\x02\x00\x00\x00\x03\xbe\xde", "extension header is after end of packet"; "truncated extension header")]
    #[test_case(b"\x90\x60\x00\x01\x00\x00\x00\x02\x00\x00\x00\x03\xbe\xde\x00\x02\x00\x00\x00\x00", "extension is after end of packet"; "truncated extension")]
    fn malformed(raw: &'static [u8], reason: &str) {
        let e = RawPacket::new(Bytes::from_static(raw)).unwrap_err();
        assert_eq!(e.reason, reason);
    }
}
