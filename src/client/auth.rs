// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Digest authentication as in [RFC 2617](https://datatracker.ietf.org/doc/html/rfc2617),
//! in its simplest form: MD5, no `qop`, no `cnonce`.

use log::debug;
use md5::{Digest, Md5};

use super::url::Credentials;

/// Returns the value of an `Authorization` header, or `None` if any input is empty.
///
/// `A1 = md5(username:realm:password)`, `A2 = md5(method:uri)`,
/// `response = md5(A1:nonce:A2)`, all as lowercase hex.
pub fn digest_authorization(
    username: &str,
    password: &str,
    realm: &str,
    nonce: &str,
    uri: &str,
    method: &str,
) -> Option<String> {
    if username.is_empty() || password.is_empty() || realm.is_empty() || nonce.is_empty() {
        return None;
    }
    let ha1 = md5_hex(&format!("{username}:{realm}:{password}"));
    let ha2 = md5_hex(&format!("{method}:{uri}"));
    let response = md5_hex(&format!("{ha1}:{nonce}:{ha2}"));
    Some(format!(
        "Digest username=\"{username}\", realm=\"{realm}\", nonce=\"{nonce}\", \
         uri=\"{uri}\", response=\"{response}\""
    ))
}

fn md5_hex(input: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// The most recent `realm` and `nonce` seen in any `WWW-Authenticate` header.
#[derive(Clone, Debug, Default)]
pub(crate) struct AuthCache {
    realm: Option<String>,
    nonce: Option<String>,
}

impl AuthCache {
    /// Updates from a `WWW-Authenticate` header value. Last write wins.
    ///
    /// Non-Digest challenges (eg `Basic realm="…"`) and Digest challenges that
    /// don't parse are ignored.
    pub(crate) fn update(&mut self, www_authenticate: &str) {
        let trimmed = www_authenticate.trim_start();
        let scheme = trimmed.split_once(' ').map_or(trimmed, |(s, _)| s);
        if !scheme.eq_ignore_ascii_case("digest") {
            debug!("ignoring non-Digest challenge {:?}", www_authenticate);
            return;
        }
        let params = &trimmed[scheme.len()..];
        let header = match digest_auth::WwwAuthenticateHeader::parse(params) {
            Ok(h) => h,
            Err(e) => {
                debug!("ignoring bad challenge {:?}: {}", www_authenticate, e);
                return;
            }
        };
        if header.qop.is_some() {
            debug!("challenge offers qop; answering without it");
        }
        self.realm = Some(header.realm);
        self.nonce = Some(header.nonce);
        debug!(
            "WWW-Authenticate parsed: realm={:?} nonce={:?}",
            self.realm, self.nonce
        );
    }

    /// Returns true iff both a realm and nonce have been seen.
    pub(crate) fn is_challenged(&self) -> bool {
        self.realm.is_some() && self.nonce.is_some()
    }

    /// Computes an `Authorization` value for `method` on `uri`, if possible.
    pub(crate) fn authorization(
        &self,
        creds: Option<&Credentials>,
        method: &str,
        uri: &str,
    ) -> Option<String> {
        let creds = creds?;
        digest_authorization(
            &creds.username,
            &creds.password,
            self.realm.as_deref()?,
            self.nonce.as_deref()?,
            uri,
            method,
        )
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    /// The example from RFC 2069 section 2.4, which is this same no-`qop` variant.
    #[test]
    fn rfc2069_vector() {
        let h = digest_authorization(
            "Mufasa",
            "CircleOfLife",
            "testrealm@host.com",
            "dcd98b7102dd2f0e8b11d0f600bfb0c093",
            "/dir/index.html",
            "GET",
        )
        .unwrap();
        assert_eq!(
            h,
            "Digest username=\"Mufasa\", realm=\"testrealm@host.com\", \
             nonce=\"dcd98b7102dd2f0e8b11d0f600bfb0c093\", uri=\"/dir/index.html\", \
             response=\"1949323746fe6a43ef61f9606e7febea\""
        );
    }

    #[test]
    fn rtsp_describe() {
        let h = digest_authorization(
            "admin",
            "secret",
            "AXIS_WS_ACCC8E3A0A8F",
            "000057c3Y810622bff50b36005eb5efeae118626a161bf",
            "rtsp://192.168.1.10/axis-media/media.amp",
            "DESCRIBE",
        )
        .unwrap();
        assert!(h.ends_with("response=\"a9cf972cba63ad735545b5624796525a\""));
    }

    #[test_case("", "p", "r", "n"; "no username")]
    #[test_case("u", "", "r", "n"; "no password")]
    #[test_case("u", "p", "", "n"; "no realm")]
    #[test_case("u", "p", "r", ""; "no nonce")]
    fn missing_input(username: &str, password: &str, realm: &str, nonce: &str) {
        assert_eq!(
            digest_authorization(username, password, realm, nonce, "rtsp://h/", "DESCRIBE"),
            None
        );
    }

    #[test]
    fn cache_from_axis_challenge() {
        let mut cache = AuthCache::default();
        assert!(!cache.is_challenged());
        cache.update(
            "Digest realm=\"AXIS_WS_ACCC8E3A0A8F\", \
             nonce=\"000057c3Y810622bff50b36005eb5efeae118626a161bf\", stale=FALSE",
        );
        assert!(cache.is_challenged());
        let creds = Credentials {
            username: "admin".to_owned(),
            password: "secret".to_owned(),
        };
        let h = cache
            .authorization(
                Some(&creds),
                "DESCRIBE",
                "rtsp://192.168.1.10/axis-media/media.amp",
            )
            .unwrap();
        assert!(h.ends_with("response=\"a9cf972cba63ad735545b5624796525a\""));
        assert_eq!(cache.authorization(None, "DESCRIBE", "rtsp://h/"), None);
    }

    #[test]
    fn cache_last_write_wins() {
        let mut cache = AuthCache::default();
        cache.update("Digest realm=\"a\", nonce=\"1\"");
        cache.update("Digest realm=\"b\", nonce=\"2\", stale=TRUE");
        cache.update("Basic realm=\"ignored\"");
        cache.update("Digest nonce=\"no realm\"");
        assert_eq!(cache.realm.as_deref(), Some("b"));
        assert_eq!(cache.nonce.as_deref(), Some("2"));
    }

    #[test]
    fn quoted_comma_in_realm() {
        let mut cache = AuthCache::default();
        cache.update("Digest realm=\"IP Camera(C, 1)\", nonce=\"abc\"");
        assert_eq!(cache.realm.as_deref(), Some("IP Camera(C, 1)"));
        assert_eq!(cache.nonce.as_deref(), Some("abc"));
        let creds = Credentials {
            username: "admin".to_owned(),
            password: "secret".to_owned(),
        };
        let h = cache
            .authorization(Some(&creds), "DESCRIBE", "rtsp://h/")
            .unwrap();
        assert!(h.contains("realm=\"IP Camera(C, 1)\""));
        assert_eq!(
            Some(h),
            digest_authorization("admin", "secret", "IP Camera(C, 1)", "abc", "rtsp://h/", "DESCRIBE")
        );
    }
}
