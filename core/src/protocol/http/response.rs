/*
 * response.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Filedist, an automatic file-distribution system.
 *
 * Filedist is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Filedist is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Filedist.  If not, see <http://www.gnu.org/licenses/>.
 */

//! Parsed response head and typed header accessors.

use std::fmt;

use chrono::DateTime;

/// Entity tag; the weak flag survives round trips.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Etag {
    pub value: String,
    pub weak: bool,
}

impl Etag {
    pub fn parse(raw: &str) -> Option<Etag> {
        let raw = raw.trim();
        let (weak, rest) = match raw.strip_prefix("W/") {
            Some(r) => (true, r),
            None => (false, raw),
        };
        let value = rest.trim_matches('"');
        if value.is_empty() {
            return None;
        }
        Some(Etag {
            value: value.to_string(),
            weak,
        })
    }
}

impl fmt::Display for Etag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.weak {
            write!(f, "W/\"{}\"", self.value)
        } else {
            write!(f, "\"{}\"", self.value)
        }
    }
}

/// Status line plus headers.
#[derive(Debug, Clone, Default)]
pub struct ResponseHead {
    /// Minor HTTP version (0 or 1).
    pub version_minor: u8,
    pub code: u16,
    pub reason: String,
    pub headers: Vec<(String, String)>,
}

impl ResponseHead {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn headers_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.headers
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }

    pub fn content_length(&self) -> Option<u64> {
        self.header("content-length").and_then(|v| v.trim().parse().ok())
    }

    pub fn is_chunked(&self) -> bool {
        self.header("transfer-encoding")
            .is_some_and(|v| v.to_ascii_lowercase().contains("chunked"))
    }

    /// Server will close after this response.
    pub fn connection_close(&self) -> bool {
        match self.header("connection") {
            Some(v) => v.eq_ignore_ascii_case("close"),
            None => self.version_minor == 0,
        }
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    /// `filename` parameter of `Content-Disposition`, `filename*` preferred.
    pub fn content_disposition_filename(&self) -> Option<String> {
        let v = self.header("content-disposition")?;
        let mut plain = None;
        for part in v.split(';').skip(1) {
            let Some((k, val)) = part.split_once('=') else {
                continue;
            };
            let k = k.trim().to_ascii_lowercase();
            let val = val.trim();
            if k == "filename*" {
                // charset'lang'pct-encoded
                let encoded = val.splitn(3, '\'').nth(2).unwrap_or(val);
                let name = crate::url::decode_href(encoded);
                if !name.is_empty() {
                    return Some(name);
                }
            } else if k == "filename" {
                plain = Some(val.trim_matches('"').to_string());
            }
        }
        plain.filter(|n| !n.is_empty())
    }

    pub fn last_modified(&self) -> Option<i64> {
        self.header("last-modified").and_then(parse_http_date)
    }

    pub fn date(&self) -> Option<i64> {
        self.header("date").and_then(parse_http_date)
    }

    pub fn etag(&self) -> Option<Etag> {
        self.header("etag").and_then(Etag::parse)
    }

    pub fn location(&self) -> Option<&str> {
        self.header("location")
    }

    pub fn www_authenticate(&self) -> impl Iterator<Item = &str> {
        self.headers_all("www-authenticate")
    }

    /// Status line as received, for error reports.
    pub fn status_line(&self) -> String {
        format!("HTTP/1.{} {} {}", self.version_minor, self.code, self.reason)
            .trim_end()
            .to_string()
    }
}

/// RFC 7231 IMF-fixdate (and RFC 850 / asctime as fallbacks) to unix seconds.
pub fn parse_http_date(s: &str) -> Option<i64> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.timestamp());
    }
    for fmt in ["%A, %d-%b-%y %H:%M:%S GMT", "%a %b %e %H:%M:%S %Y"] {
        if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt.and_utc().timestamp());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn head(headers: &[(&str, &str)]) -> ResponseHead {
        ResponseHead {
            version_minor: 1,
            code: 200,
            reason: "OK".into(),
            headers: headers.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
        }
    }

    #[test]
    fn etag_weak_and_strong() {
        let w = Etag::parse("W/\"abc\"").unwrap();
        assert!(w.weak);
        assert_eq!(w.value, "abc");
        assert_eq!(w.to_string(), "W/\"abc\"");
        let s = Etag::parse("\"d41d8\"").unwrap();
        assert!(!s.weak);
        assert_eq!(s.to_string(), "\"d41d8\"");
        assert!(Etag::parse("\"\"").is_none());
    }

    #[test]
    fn typed_headers() {
        let h = head(&[
            ("Content-Length", " 42 "),
            ("Transfer-Encoding", "Chunked"),
            ("Last-Modified", "Sun, 06 Nov 1994 08:49:37 GMT"),
            ("Content-Disposition", "attachment; filename=\"report.csv\""),
            ("WWW-Authenticate", "Basic realm=\"a\""),
            ("www-authenticate", "Digest realm=\"a\", nonce=\"n\""),
        ]);
        assert_eq!(h.content_length(), Some(42));
        assert!(h.is_chunked());
        assert_eq!(h.last_modified(), Some(784111777));
        assert_eq!(h.content_disposition_filename().as_deref(), Some("report.csv"));
        assert_eq!(h.www_authenticate().count(), 2);
        assert!(!h.connection_close());
    }

    #[test]
    fn extended_filename_wins() {
        let h = head(&[(
            "Content-Disposition",
            "attachment; filename=\"x.txt\"; filename*=UTF-8''na%C3%AFve.txt",
        )]);
        assert_eq!(h.content_disposition_filename().as_deref(), Some("naïve.txt"));
    }

    #[test]
    fn legacy_date_formats() {
        assert_eq!(parse_http_date("Sunday, 06-Nov-94 08:49:37 GMT"), Some(784111777));
        assert_eq!(parse_http_date("Sun Nov  6 08:49:37 1994"), Some(784111777));
        assert_eq!(parse_http_date("yesterday"), None);
    }

    #[test]
    fn http10_closes_by_default() {
        let mut h = head(&[]);
        h.version_minor = 0;
        assert!(h.connection_close());
        assert_eq!(h.status_line(), "HTTP/1.0 200 OK");
    }
}
