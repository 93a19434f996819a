// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Splits a caller-supplied `rtsp://` URL into a credential-free URL and
//! optional credentials.

use url::{Host, Url};

use crate::error::ErrorInt;
use crate::Error;

/// Default TCP port for RTSP, per [RFC 2326 section 3.2](https://datatracker.ietf.org/doc/html/rfc2326#section-3.2).
pub const DEFAULT_RTSP_PORT: u16 = 554;

/// Username and password for Digest authentication.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// A URL ready for use on the wire.
#[derive(Clone, Debug)]
pub(crate) struct ResolvedUrl {
    /// The URL with any `user:pass@` removed.
    pub(crate) url: Url,
    pub(crate) host: Host<String>,
    pub(crate) port: u16,
    pub(crate) creds: Option<Credentials>,
}

impl ResolvedUrl {
    /// Returns the URL as sent in request lines and Digest `uri=` values.
    pub(crate) fn as_str(&self) -> &str {
        self.url.as_str()
    }
}

/// Parses `url`, extracting and stripping embedded credentials.
///
/// Credentials are percent-decoded. A URL with a username but no password
/// (`rtsp://user@host/`) yields no credentials; the username is still stripped.
pub(crate) fn resolve(url: &str) -> Result<ResolvedUrl, Error> {
    let mut url = Url::parse(url)
        .map_err(|e| wrap!(ErrorInt::InvalidArgument(format!("bad URL {url:?}: {e}"))))?;
    if !url.scheme().eq_ignore_ascii_case("rtsp") {
        bail!(ErrorInt::InvalidArgument(format!(
            "only rtsp URLs are supported; got {:?}",
            url.scheme()
        )));
    }
    let host = match url.host() {
        Some(h) => h.to_owned(),
        None => bail!(ErrorInt::InvalidArgument(format!("URL {url} has no host"))),
    };
    let port = url.port().unwrap_or(DEFAULT_RTSP_PORT);
    let creds = match (url.username(), url.password()) {
        ("", _) | (_, None) => None,
        (u, Some(p)) => Some(Credentials {
            username: decode(u)?,
            password: decode(p)?,
        }),
    };
    if !url.username().is_empty() || url.password().is_some() {
        // These only fail for URLs that can't have credentials at all, which
        // the host check above rules out.
        let _ = url.set_username("");
        let _ = url.set_password(None);
    }
    Ok(ResolvedUrl {
        url,
        host,
        port,
        creds,
    })
}

fn decode(s: &str) -> Result<String, Error> {
    urlencoding::decode(s)
        .map(|c| c.into_owned())
        .map_err(|_| wrap!(ErrorInt::InvalidArgument("credentials aren't UTF-8".to_owned())))
}
