// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

#![no_main]
use bytes::Bytes;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(pkt) = rtsp_client_core::rtp::RawPacket::new(Bytes::copy_from_slice(data)) {
        assert!(pkt.payload_start() <= data.len());
        assert_eq!(pkt.payload(), &data[pkt.payload_start()..]);
    }
    let mut consumed = 0;
    for pkt in rtsp_client_core::rtcp::CompoundPacketIterator::new(data) {
        let Ok(pkt) = pkt else { break };
        assert_eq!(pkt.raw().len(), (usize::from(pkt.length_words()) + 1) * 4);
        consumed += pkt.raw().len();
    }
    assert!(consumed <= data.len());
});
