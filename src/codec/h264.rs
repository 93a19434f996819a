// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! [H.264](https://www.itu.int/rec/T-REC-H.264-201906-I/en)-encoded video.

use base64::Engine as _;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use h264_reader::nal::{NalHeader, UnitType};
use log::trace;

/// A [super::Depacketizer] implementation which finds access unit boundaries
/// and produces the NAL units of each access unit.
///
/// Handles single NAL unit packets, STAP-A, and FU-A as described in
/// [RFC 6184](https://tools.ietf.org/html/rfc6184). The marker bit ends an
/// access unit. NALs are produced without start codes or length prefixes,
/// each beginning with its one-byte NAL header.
#[derive(Debug, Default)]
pub struct Depacketizer {
    /// Complete NALs of the access unit in progress.
    nals: Vec<Bytes>,

    /// A NAL being reassembled from FU-A fragments, header byte included.
    fu_a: Option<BytesMut>,
}

impl Depacketizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub(super) fn push(&mut self, payload: Bytes, mark: bool) -> Result<Option<Vec<Bytes>>, String> {
        if let Err(e) = self.push_inner(payload, mark) {
            self.nals.clear();
            self.fu_a = None;
            return Err(e);
        }
        if !mark {
            return Ok(None);
        }
        if self.nals.is_empty() {
            return Ok(None);
        }
        Ok(Some(std::mem::take(&mut self.nals)))
    }

    fn push_inner(&mut self, mut data: Bytes, mark: bool) -> Result<(), String> {
        if data.is_empty() {
            return Err("empty NAL".to_owned());
        }
        // https://tools.ietf.org/html/rfc6184#section-5.2
        let nal_header = data[0];
        if (nal_header >> 7) != 0 {
            return Err(format!("NAL header {nal_header:02x} has F bit set"));
        }
        match nal_header & 0b11111 {
            1..=23 => {
                if self.fu_a.is_some() {
                    return Err("non-fragmented NAL while fragment in progress".to_owned());
                }
                self.nals.push(data);
            }
            24 => {
                // STAP-A. https://tools.ietf.org/html/rfc6184#section-5.7.1
                data.advance(1);
                loop {
                    if data.remaining() < 2 {
                        return Err(format!(
                            "STAP-A has {} remaining bytes while expecting 2-byte length",
                            data.remaining()
                        ));
                    }
                    let len = usize::from(data.get_u16());
                    if len == 0 {
                        return Err("zero length in STAP-A".to_owned());
                    }
                    if data.remaining() < len {
                        return Err(format!(
                            "STAP-A too short: {} bytes remaining, expecting {}-byte NAL",
                            data.remaining(),
                            len
                        ));
                    }
                    NalHeader::new(data[0]).map_err(|_| "bad header in STAP-A".to_owned())?;
                    if data.remaining() == len {
                        self.nals.push(data);
                        break;
                    }
                    self.nals.push(data.split_to(len));
                }
            }
            25..=27 | 29 => {
                return Err(format!("unimplemented NAL (header 0x{nal_header:02x})"));
            }
            28 => {
                // FU-A. https://tools.ietf.org/html/rfc6184#section-5.8
                if data.len() < 3 {
                    return Err("FU-A is too short".to_owned());
                }
                let fu_header = data[1];
                let start = (fu_header & 0b1000_0000) != 0;
                let end = (fu_header & 0b0100_0000) != 0;
                let reserved = (fu_header & 0b0010_0000) != 0;
                let reconstructed = (nal_header & 0b1110_0000) | (fu_header & 0b0001_1111);
                if (start && end) || reserved {
                    return Err(format!("invalid FU-A header {fu_header:08b}"));
                }
                data.advance(2);
                match (start, self.fu_a.as_mut()) {
                    (true, Some(_)) => {
                        return Err("FU-A with start bit while frag in progress".to_owned())
                    }
                    (true, None) => {
                        let mut nal = BytesMut::with_capacity(1 + data.len());
                        nal.put_u8(reconstructed);
                        nal.put(data);
                        self.fu_a = Some(nal);
                    }
                    (false, Some(nal)) => {
                        if nal[0] != reconstructed {
                            return Err(format!(
                                "FU-A has inconsistent NAL header: {:02x} then {:02x}",
                                nal[0], reconstructed
                            ));
                        }
                        nal.put(data);
                        if end {
                            if let Some(nal) = self.fu_a.take() {
                                self.nals.push(nal.freeze());
                            }
                        } else if mark {
                            return Err("FU-A with MARK and no END".to_owned());
                        }
                    }
                    (false, None) => {
                        return Err("FU-A with start bit unset while no frag in progress".to_owned())
                    }
                }
            }
            _ => return Err(format!("bad NAL header {nal_header:02x}")),
        }
        if mark && self.fu_a.is_some() {
            return Err("access unit ended with fragment in progress".to_owned());
        }
        Ok(())
    }
}

/// Extracts the parameter sets from the `sprop-parameter-sets` of an SDP
/// `fmtp` attribute's format-specific parameters, in order.
///
/// Returns an empty list if the parameter is absent. Errors on invalid base64
/// or a NAL with a bad header.
pub fn sprop_parameter_sets(format_specific_params: &str) -> Result<Vec<Bytes>, String> {
    let mut sprop_parameter_sets = None;
    for p in format_specific_params.split(';') {
        if let Some((key, value)) = p.trim().split_once('=') {
            if key.trim() == "sprop-parameter-sets" {
                sprop_parameter_sets = Some(value.trim());
            }
        }
    }
    let Some(sprop_parameter_sets) = sprop_parameter_sets else {
        return Ok(Vec::new());
    };
    let mut sets = Vec::new();
    for nal in sprop_parameter_sets.split(',') {
        let nal = base64::engine::general_purpose::STANDARD
            .decode(nal)
            .map_err(|_| format!("NAL {nal:?} has invalid base64 encoding"))?;
        if nal.is_empty() {
            return Err("empty NAL in sprop-parameter-sets".to_owned());
        }
        let header =
            NalHeader::new(nal[0]).map_err(|_| format!("bad NAL header {:02x}", nal[0]))?;
        if !matches!(
            header.nal_unit_type(),
            UnitType::SeqParameterSet | UnitType::PicParameterSet
        ) {
            trace!("unexpected {:?} in sprop-parameter-sets", header.nal_unit_type());
        }

        // GW security GW4089IP leaves Annex B start codes at the end of both
        // SPS and PPS in the sprop-parameter-sets. Strip them out.
        let nal = nal.strip_suffix(b"\x00\x00\x00\x01").unwrap_or(&nal);
        sets.push(Bytes::copy_from_slice(nal));
    }
    Ok(sets)
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    #[test]
    fn depacketize() {
        let mut d = super::Depacketizer::new();

        // plain SEI packet.
        assert!(d.push(Bytes::from_static(b"\x06plain"), false).unwrap().is_none());

        // STAP-A packet.
        assert!(d
            .push(
                Bytes::from_static(b"\x18\x00\x09\x06stap-a 1\x00\x09\x06stap-a 2"),
                false
            )
            .unwrap()
            .is_none());

        // FU-A packet, start.
        assert!(d
            .push(Bytes::from_static(b"\x7c\x86fu-a start, "), false)
            .unwrap()
            .is_none());

        // FU-A packet, middle.
        assert!(d
            .push(Bytes::from_static(b"\x7c\x06fu-a middle, "), false)
            .unwrap()
            .is_none());

        // FU-A packet, end.
        let nals = d
            .push(Bytes::from_static(b"\x7c\x46fu-a end"), true)
            .unwrap()
            .unwrap();
        assert_eq!(
            nals,
            vec![
                Bytes::from_static(b"\x06plain"),
                Bytes::from_static(b"\x06stap-a 1"),
                Bytes::from_static(b"\x06stap-a 2"),
                Bytes::from_static(b"\x66fu-a start, fu-a middle, fu-a end"),
            ]
        );

        // The next access unit starts fresh.
        let nals = d.push(Bytes::from_static(b"\x65idr"), true).unwrap().unwrap();
        assert_eq!(nals, vec![Bytes::from_static(b"\x65idr")]);
    }

    #[test]
    fn error_discards_access_unit() {
        let mut d = super::Depacketizer::new();
        d.push(Bytes::from_static(b"\x06sei"), false).unwrap();

        // FU-A continuation with no start.
        d.push(Bytes::from_static(b"\x7c\x06orphan"), false).unwrap_err();
        let nals = d.push(Bytes::from_static(b"\x01slice"), true).unwrap().unwrap();
        assert_eq!(nals, vec![Bytes::from_static(b"\x01slice")]);
    }

    #[test]
    fn mark_mid_fragment() {
        let mut d = super::Depacketizer::new();
        d.push(Bytes::from_static(b"\x7c\x85start"), false).unwrap();
        d.push(Bytes::from_static(b"\x7c\x05middle"), true).unwrap_err();
    }

    #[test]
    fn truncated_stap_a() {
        let mut d = super::Depacketizer::new();
        d.push(Bytes::from_static(b"\x18\x00\x09\x06short"), true)
            .unwrap_err();
    }

    #[test]
    fn sprop() {
        let sets = super::sprop_parameter_sets(
            "packetization-mode=1;profile-level-id=64001E;\
             sprop-parameter-sets=Z2QAHqwsaoLA9puCgIKgAAADACAAAAMD0IAA,aO4xshsA",
        )
        .unwrap();
        assert_eq!(sets.len(), 2);
        assert_eq!(&sets[0][..3], b"\x67\x64\x00");
        assert_eq!(&sets[1][..], b"\x68\xee\x31\xb2\x1b\x00");
    }

    #[test]
    fn sprop_absent_or_invalid() {
        assert!(super::sprop_parameter_sets("packetization-mode=1")
            .unwrap()
            .is_empty());
        super::sprop_parameter_sets("sprop-parameter-sets=!!!,aO4xshsA").unwrap_err();
    }
}
