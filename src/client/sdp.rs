// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Chooses at most one video and one audio stream from a `DESCRIBE` response's
//! [SDP](https://datatracker.ietf.org/doc/html/rfc8866).

use bytes::Bytes;
use log::{debug, warn};
use sdp_types::Media;
use url::Url;

use crate::codec::h264;

/// The kind of media carried by a stream.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Video,
    Audio,
}

impl MediaKind {
    fn from_sdp(media: &str) -> Option<Self> {
        match media {
            "video" => Some(MediaKind::Video),
            "audio" => Some(MediaKind::Audio),
            _ => None,
        }
    }

    /// Returns the encoding names accepted for this kind, uppercase.
    pub fn supported_codecs(self) -> &'static [&'static str] {
        match self {
            MediaKind::Video => &["H264"],
            MediaKind::Audio => &["PCMA", "PCMU"],
        }
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(match self {
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
        })
    }
}

/// Statically assigned audio payload types accepted without `rtpmap`, per
/// [RFC 3551 section 6](https://datatracker.ietf.org/doc/html/rfc3551#section-6).
const STATIC_AUDIO_PAYLOAD_TYPES: [(u8, &str); 2] = [(0, "PCMU"), (8, "PCMA")];

/// A stream chosen for `SETUP`.
#[derive(Clone, Debug)]
pub(crate) struct NegotiatedStream {
    pub(crate) kind: MediaKind,

    /// Uppercase encoding name, eg `H264`.
    pub(crate) codec: String,
    pub(crate) payload_type: u8,
    pub(crate) control_url: Url,

    /// The `fmtp` format-specific parameters, if any, passed through unexamined.
    pub(crate) fmtp: Option<String>,

    /// The first two H.264 `sprop-parameter-sets` entries, conventionally SPS then PPS.
    pub(crate) parameter_sets: Option<(Bytes, Bytes)>,
}

/// Result of walking all media sections.
#[derive(Debug, Default)]
pub(crate) struct Negotiation {
    pub(crate) video: Option<NegotiatedStream>,
    pub(crate) audio: Option<NegotiatedStream>,

    /// Kinds matched by a section which then proved unusable, with a reason.
    /// Such a kind isn't retried against later sections.
    pub(crate) rejected: Vec<(MediaKind, String)>,
}

impl Negotiation {
    /// Returns the chosen streams in setup order: video then audio.
    pub(crate) fn streams(&self) -> impl Iterator<Item = &NegotiatedStream> {
        self.video.iter().chain(self.audio.iter())
    }
}

/// Resolves a `control` attribute against the session URL.
///
/// Values beginning with `rtsp://` (any case) are absolute. `*` refers to the
/// session URL itself. Anything else is appended after a `/`, unless the
/// session URL already ends in one.
pub(crate) fn resolve_control(session_url: &str, control: &str) -> String {
    let is_absolute = control
        .get(..7)
        .map(|p| p.eq_ignore_ascii_case("rtsp://"))
        .unwrap_or(false);
    if is_absolute {
        control.to_owned()
    } else if control == "*" {
        session_url.to_owned()
    } else if session_url.ends_with('/') {
        format!("{session_url}{control}")
    } else {
        format!("{session_url}/{control}")
    }
}

/// Parses `body` and picks streams using first-match-wins over the media
/// sections in order.
///
/// Errors only if the SDP itself can't be parsed.
pub(crate) fn negotiate(session_url: &str, body: &[u8]) -> Result<Negotiation, String> {
    let sdp = sdp_types::Session::parse(body).map_err(|e| {
        format!(
            "Unable to parse SDP: {}\n\n{:#?}",
            e,
            crate::hex::LimitedHex::new(body, 512)
        )
    })?;
    let mut n = Negotiation::default();
    for (i, media) in sdp.medias.iter().enumerate() {
        let Some(kind) = MediaKind::from_sdp(&media.media) else {
            debug!("skipping media section {} of type {:?}", i, &media.media);
            continue;
        };
        let claimed = match kind {
            MediaKind::Video => n.video.is_some(),
            MediaKind::Audio => n.audio.is_some(),
        } || n.rejected.iter().any(|(k, _)| *k == kind);
        if claimed {
            debug!("skipping media section {i}: {kind} already matched");
            continue;
        }
        match match_section(session_url, kind, media) {
            Ok(None) => debug!(
                "media section {} ({} {:?}) has no supported codec",
                i, kind, &media.fmt
            ),
            Ok(Some(s)) => {
                debug!(
                    "media section {}: {} {} payload type {} control {}",
                    i, kind, &s.codec, s.payload_type, &s.control_url
                );
                match kind {
                    MediaKind::Video => n.video = Some(s),
                    MediaKind::Audio => n.audio = Some(s),
                }
            }
            Err(e) => {
                warn!("media section {i} ({kind}) unusable: {e}");
                n.rejected.push((kind, e));
            }
        }
    }
    Ok(n)
}

/// Matches one media section.
///
/// Returns `Ok(None)` if it offers no supported codec, or `Err` if it offers
/// one with unusable parameters.
fn match_section(
    session_url: &str,
    kind: MediaKind,
    media: &Media,
) -> Result<Option<NegotiatedStream>, String> {
    let fmts: Vec<u8> = media
        .fmt
        .split_ascii_whitespace()
        .filter_map(|f| u8::from_str_radix(f, 10).ok())
        .filter(|pt| pt & 0x80 == 0)
        .collect();

    let mut control = None;
    let mut rtpmaps = Vec::new();
    let mut fmtps = Vec::new();
    for a in &media.attributes {
        let Some(v) = a.value.as_deref() else {
            continue;
        };
        match a.attribute.as_str() {
            "control" => control = Some(v.trim()),

            // rtpmap-value = payload-type SP encoding-name "/" clock-rate [ "/" encoding-params ]
            "rtpmap" => {
                if let Some((pt, rest)) = v.split_once(' ') {
                    if let Ok(pt) = u8::from_str_radix(pt.trim(), 10) {
                        let encoding = rest.trim().split('/').next().unwrap_or("");
                        rtpmaps.push((pt, encoding.to_ascii_uppercase()));
                    }
                }
            }

            // Similarly starts with payload-type SP.
            "fmtp" if kind == MediaKind::Video => {
                if let Some((pt, rest)) = v.split_once(' ') {
                    if let Ok(pt) = u8::from_str_radix(pt.trim(), 10) {
                        fmtps.push((pt, rest.trim()));
                    }
                }
            }
            _ => {}
        }
    }

    let supported = kind.supported_codecs();
    let matched = rtpmaps
        .iter()
        .find(|(pt, enc)| fmts.contains(pt) && supported.contains(&enc.as_str()))
        .map(|(pt, enc)| (*pt, enc.clone()))
        .or_else(|| {
            if kind != MediaKind::Audio {
                return None;
            }
            fmts.iter().find_map(|pt| {
                if rtpmaps.iter().any(|(p, _)| p == pt) {
                    return None;
                }
                STATIC_AUDIO_PAYLOAD_TYPES
                    .iter()
                    .find(|(p, _)| p == pt)
                    .map(|(p, enc)| (*p, (*enc).to_owned()))
            })
        });
    let Some((payload_type, codec)) = matched else {
        return Ok(None);
    };

    let control_url = resolve_control(session_url, control.unwrap_or("*"));
    let control_url = Url::parse(&control_url)
        .map_err(|e| format!("bad control URL {control_url:?}: {e}"))?;
    let fmtp = fmtps
        .iter()
        .find(|(pt, _)| *pt == payload_type)
        .map(|(_, f)| (*f).to_owned());
    let parameter_sets = match (codec.as_str(), fmtp.as_deref()) {
        ("H264", Some(f)) => {
            let mut sets = h264::sprop_parameter_sets(f)?.into_iter();
            match (sets.next(), sets.next()) {
                (Some(sps), Some(pps)) => Some((sps, pps)),
                _ => None,
            }
        }
        _ => None,
    };
    Ok(Some(NegotiatedStream {
        kind,
        codec,
        payload_type,
        control_url,
        fmtp,
        parameter_sets,
    }))
}
