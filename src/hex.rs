// Copyright (C) 2022 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Length-limited hex dumps for packet diagnostics.

use pretty_hex::{HexConfig, PrettyHex};

/// Formats at most `max_bytes` of a buffer via `pretty-hex`, noting how much was cut.
pub struct LimitedHex<'a> {
    inner: &'a [u8],
    max_bytes: usize,
}

impl<'a> LimitedHex<'a> {
    pub fn new(inner: &'a [u8], max_bytes: usize) -> Self {
        Self { inner, max_bytes }
    }
}

impl std::fmt::Debug for LimitedHex<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shown = self.inner.len().min(self.max_bytes);
        let cfg = HexConfig {
            title: false,
            ..HexConfig::default()
        };
        writeln!(f, "Length: {0} (0x{0:x}) bytes", self.inner.len())?;
        write!(f, "{:#?}", self.inner[..shown].hex_conf(cfg))?;
        match self.inner.len() - shown {
            0 => Ok(()),
            omitted => write!(f, "\n...{0} (0x{0:x}) bytes not shown...", omitted),
        }
    }
}
