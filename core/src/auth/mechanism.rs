/*
 * mechanism.rs
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

//! `WWW-Authenticate` challenge classification.

/// Mechanisms a server may challenge with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMechanism {
    Basic,
    DigestMd5,
    DigestMd5Sess,
    DigestSha256,
    DigestSha256Sess,
    DigestSha512_256,
    DigestSha512_256Sess,
    Unknown,
}

/// Hash underlying a Digest mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestAlgorithm {
    Md5,
    Sha256,
    Sha512_256,
}

impl AuthMechanism {
    pub fn name(&self) -> &'static str {
        match self {
            AuthMechanism::Basic => "Basic",
            AuthMechanism::DigestMd5 => "MD5",
            AuthMechanism::DigestMd5Sess => "MD5-sess",
            AuthMechanism::DigestSha256 => "SHA-256",
            AuthMechanism::DigestSha256Sess => "SHA-256-sess",
            AuthMechanism::DigestSha512_256 => "SHA-512-256",
            AuthMechanism::DigestSha512_256Sess => "SHA-512-256-sess",
            AuthMechanism::Unknown => "unknown",
        }
    }

    pub fn digest_algorithm(&self) -> Option<DigestAlgorithm> {
        match self {
            AuthMechanism::DigestMd5 | AuthMechanism::DigestMd5Sess => Some(DigestAlgorithm::Md5),
            AuthMechanism::DigestSha256 | AuthMechanism::DigestSha256Sess => Some(DigestAlgorithm::Sha256),
            AuthMechanism::DigestSha512_256 | AuthMechanism::DigestSha512_256Sess => {
                Some(DigestAlgorithm::Sha512_256)
            }
            _ => None,
        }
    }

    pub fn is_session(&self) -> bool {
        matches!(
            self,
            AuthMechanism::DigestMd5Sess
                | AuthMechanism::DigestSha256Sess
                | AuthMechanism::DigestSha512_256Sess
        )
    }

    /// Preference when a server offers several challenges; higher wins.
    fn rank(&self) -> u8 {
        match self {
            AuthMechanism::Unknown => 0,
            AuthMechanism::Basic => 1,
            AuthMechanism::DigestMd5 | AuthMechanism::DigestMd5Sess => 2,
            AuthMechanism::DigestSha512_256 | AuthMechanism::DigestSha512_256Sess => 3,
            AuthMechanism::DigestSha256 | AuthMechanism::DigestSha256Sess => 4,
        }
    }

    fn from_digest_algorithm(alg: &str) -> Self {
        match alg.to_ascii_uppercase().as_str() {
            "" | "MD5" => AuthMechanism::DigestMd5,
            "MD5-SESS" => AuthMechanism::DigestMd5Sess,
            "SHA-256" => AuthMechanism::DigestSha256,
            "SHA-256-SESS" => AuthMechanism::DigestSha256Sess,
            "SHA-512-256" => AuthMechanism::DigestSha512_256,
            "SHA-512-256-SESS" => AuthMechanism::DigestSha512_256Sess,
            _ => AuthMechanism::Unknown,
        }
    }
}

impl std::fmt::Display for AuthMechanism {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// One parsed challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub mechanism: AuthMechanism,
    /// Scheme token as sent, for error reporting.
    pub scheme: String,
    pub realm: String,
    pub nonce: String,
    pub opaque: Option<String>,
    pub qop: Vec<String>,
    pub stale: bool,
}

/// Split `key=value, key="quoted, value"` into pairs.
fn parse_params(s: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    let b = s.as_bytes();
    let mut i = 0;
    while i < b.len() {
        while i < b.len() && (b[i] == b',' || b[i].is_ascii_whitespace()) {
            i += 1;
        }
        let key_start = i;
        while i < b.len() && b[i] != b'=' && b[i] != b',' {
            i += 1;
        }
        let key = s[key_start..i].trim().to_ascii_lowercase();
        if i >= b.len() || b[i] == b',' {
            if !key.is_empty() {
                out.push((key, String::new()));
            }
            continue;
        }
        i += 1;
        while i < b.len() && b[i] == b' ' {
            i += 1;
        }
        let mut value = String::new();
        if i < b.len() && b[i] == b'"' {
            i += 1;
            while i < b.len() && b[i] != b'"' {
                if b[i] == b'\\' && i + 1 < b.len() {
                    i += 1;
                }
                value.push(b[i] as char);
                i += 1;
            }
            i += 1;
        } else {
            let v_start = i;
            while i < b.len() && b[i] != b',' {
                i += 1;
            }
            value.push_str(s[v_start..i].trim());
        }
        out.push((key, value));
    }
    out
}

/// Classify one `WWW-Authenticate` value.
pub fn parse_challenge(value: &str) -> Challenge {
    let value = value.trim();
    let (scheme, rest) = match value.find(' ') {
        Some(sp) => (&value[..sp], &value[sp + 1..]),
        None => (value, ""),
    };
    let mut c = Challenge {
        mechanism: AuthMechanism::Unknown,
        scheme: scheme.to_string(),
        realm: String::new(),
        nonce: String::new(),
        opaque: None,
        qop: Vec::new(),
        stale: false,
    };
    let params = parse_params(rest);
    let mut algorithm = String::new();
    for (k, v) in params {
        match k.as_str() {
            "realm" => c.realm = v,
            "nonce" => c.nonce = v,
            "opaque" => c.opaque = Some(v),
            "qop" => {
                c.qop = v
                    .split(',')
                    .map(|q| q.trim().to_ascii_lowercase())
                    .filter(|q| !q.is_empty())
                    .collect()
            }
            "stale" => c.stale = v.eq_ignore_ascii_case("true"),
            "algorithm" => algorithm = v,
            _ => {}
        }
    }
    c.mechanism = if scheme.eq_ignore_ascii_case("basic") {
        AuthMechanism::Basic
    } else if scheme.eq_ignore_ascii_case("digest") {
        AuthMechanism::from_digest_algorithm(&algorithm)
    } else {
        AuthMechanism::Unknown
    };
    c
}

/// Pick the strongest usable challenge among all `WWW-Authenticate` values.
pub fn best_challenge<'a, I>(values: I) -> Option<Challenge>
where
    I: IntoIterator<Item = &'a str>,
{
    values
        .into_iter()
        .map(parse_challenge)
        .max_by_key(|c| c.mechanism.rank())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_digest_variants() {
        let c = parse_challenge(r#"Digest realm="r", nonce="n1", qop="auth,auth-int", opaque="o""#);
        assert_eq!(c.mechanism, AuthMechanism::DigestMd5);
        assert_eq!(c.realm, "r");
        assert_eq!(c.nonce, "n1");
        assert_eq!(c.qop, vec!["auth", "auth-int"]);
        assert_eq!(c.opaque.as_deref(), Some("o"));

        let c = parse_challenge(r#"Digest realm="r", nonce="n", algorithm=SHA-512-256-sess, stale=TRUE"#);
        assert_eq!(c.mechanism, AuthMechanism::DigestSha512_256Sess);
        assert!(c.mechanism.is_session());
        assert!(c.stale);

        let c = parse_challenge(r#"Basic realm="files""#);
        assert_eq!(c.mechanism, AuthMechanism::Basic);
        assert_eq!(parse_challenge("Negotiate").mechanism, AuthMechanism::Unknown);
        assert_eq!(
            parse_challenge(r#"Digest realm="r", algorithm=SHA-1"#).mechanism,
            AuthMechanism::Unknown
        );
    }

    #[test]
    fn quoted_comma_stays_in_value() {
        let c = parse_challenge(r#"Digest realm="a, b", nonce="x""#);
        assert_eq!(c.realm, "a, b");
        assert_eq!(c.nonce, "x");
    }

    #[test]
    fn strongest_challenge_wins() {
        let best = best_challenge([
            r#"Basic realm="x""#,
            r#"Digest realm="x", nonce="1", algorithm=MD5"#,
            r#"Digest realm="x", nonce="2", algorithm=SHA-256"#,
        ])
        .unwrap();
        assert_eq!(best.mechanism, AuthMechanism::DigestSha256);
        assert!(best_challenge(std::iter::empty::<&str>()).is_none());
    }
}
