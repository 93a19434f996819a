// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

#![no_main]
use bytes::Bytes;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut data = data;
    let mut depacketizer = rtsp_client_core::codec::Depacketizer::new("H264").unwrap();
    loop {
        let (hdr, rest) = match data.split_first() {
            Some(r) => r,
            None => return,
        };
        let mark = (hdr & 0b1) != 0;
        let len = usize::from(hdr >> 1);
        if rest.len() < len {
            return;
        }
        let (payload, rest) = rest.split_at(len);
        data = rest;
        if let Ok(Some(nals)) = depacketizer.process_packet(Bytes::copy_from_slice(payload), mark) {
            assert!(!nals.is_empty());
            assert!(nals.iter().all(|n| !n.is_empty()));
        }
    }
});
