// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! G.711 (PCMA/PCMU) audio as defined in
//! [RFC 3551 section 4.5.14](https://datatracker.ietf.org/doc/html/rfc3551#section-4.5.14).
//!
//! Samples are one byte each, so any non-empty payload is a whole frame.

use bytes::Bytes;

#[derive(Debug, Default)]
pub struct Depacketizer;

impl Depacketizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub(super) fn push(&mut self, payload: Bytes) -> Result<Option<Vec<Bytes>>, String> {
        if payload.is_empty() {
            return Err("empty G.711 payload".to_owned());
        }
        Ok(Some(vec![payload]))
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    #[test]
    fn one_frame_per_packet() {
        let mut d = super::Depacketizer::new();
        let frames = d
            .push(Bytes::from_static(b"\xd5\xd5\xd5\xd5"))
            .unwrap()
            .unwrap();
        assert_eq!(frames, vec![Bytes::from_static(b"\xd5\xd5\xd5\xd5")]);
        d.push(Bytes::new()).unwrap_err();
    }
}
