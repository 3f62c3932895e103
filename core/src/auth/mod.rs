/*
 * mod.rs
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

//! HTTP authentication: Basic, Digest and AWS4-HMAC-SHA256.
//!
//! `AuthState` lives inside the session. It produces the `Authorization` header for each
//! request and consumes the `WWW-Authenticate` challenges of 401 replies.

mod aws4;
mod basic;
mod digest;
mod mechanism;

pub use aws4::{amz_date, canonical_query, sha256_hex, signing_key, Aws4Signer, SigningRequest, EMPTY_PAYLOAD_SHA256};
pub use basic::basic_authorization;
pub use digest::{hash_hex, DigestSession, EntityHasher};
pub use mechanism::{best_challenge, parse_challenge, AuthMechanism, Challenge, DigestAlgorithm};

use crate::error::{Error, Result};
use crate::url::AuthKind;

pub(crate) fn bytes_to_hex(b: &[u8]) -> String {
    const HEX: &[u8] = b"0123456789abcdef";
    let mut s = String::with_capacity(b.len() * 2);
    for &x in b {
        s.push(HEX[(x >> 4) as usize] as char);
        s.push(HEX[(x & 15) as usize] as char);
    }
    s
}

/// What the session knows about the request being authorized.
pub struct RequestContext<'a> {
    pub method: &'a str,
    /// Request target as on the request line (path plus query).
    pub uri: &'a str,
    /// Encoded path without query, for AWS4.
    pub path: &'a str,
    pub query: &'a [(String, String)],
    pub host: &'a str,
    pub amz_date: &'a str,
    pub payload_sha256: &'a str,
    /// Body hash under the Digest algorithm, for `auth-int`.
    pub entity_hash: Option<&'a str>,
}

/// Per-session authentication state.
#[derive(Debug, Clone)]
pub struct AuthState {
    kind: AuthKind,
    user: String,
    password: String,
    region: String,
    digest: Option<DigestSession>,
    /// A challenge-derived credential has been sent and not yet accepted.
    credentials_pending: bool,
    basic_from_challenge: bool,
}

impl AuthState {
    pub fn new(kind: AuthKind, user: &str, password: &str, region: &str) -> Self {
        Self {
            kind,
            user: user.to_string(),
            password: password.to_string(),
            region: region.to_string(),
            digest: None,
            credentials_pending: false,
            basic_from_challenge: false,
        }
    }

    pub fn kind(&self) -> AuthKind {
        self.kind
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    /// True when requests must carry `x-amz-date` and `x-amz-content-sha256`.
    pub fn is_aws(&self) -> bool {
        matches!(self.kind, AuthKind::Aws4HmacSha256 | AuthKind::AwsNoSignRequest)
    }

    /// Digest algorithm when `auth-int` needs a body hash.
    pub fn entity_hash_algorithm(&self) -> Option<DigestAlgorithm> {
        self.digest
            .as_ref()
            .filter(|d| d.needs_entity_hash())
            .map(|d| d.algorithm)
    }

    /// Replace credentials; drops any negotiated challenge when the user changed.
    pub fn set_credentials(&mut self, user: &str, password: &str) -> bool {
        let changed = self.user != user || self.password != password;
        if changed {
            self.user = user.to_string();
            self.password = password.to_string();
            self.reset();
        }
        changed
    }

    /// Forget the negotiated challenge and nonce count.
    pub fn reset(&mut self) {
        self.digest = None;
        self.credentials_pending = false;
        self.basic_from_challenge = false;
    }

    /// `Authorization` value for the next request, if any.
    pub fn authorization(&mut self, ctx: &RequestContext<'_>) -> Option<String> {
        if let Some(d) = self.digest.as_mut() {
            return Some(d.authorization(ctx.method, ctx.uri, &self.user, &self.password, ctx.entity_hash));
        }
        match self.kind {
            AuthKind::Basic => Some(basic_authorization(&self.user, &self.password)),
            AuthKind::None | AuthKind::Digest if self.basic_from_challenge => {
                Some(basic_authorization(&self.user, &self.password))
            }
            AuthKind::Aws4HmacSha256 => {
                let signer = Aws4Signer::new(&self.user, &self.password, &self.region);
                Some(signer.authorization(&SigningRequest {
                    method: ctx.method,
                    path: ctx.path,
                    query: ctx.query,
                    host: ctx.host,
                    amz_date: ctx.amz_date,
                    payload_sha256: ctx.payload_sha256,
                }))
            }
            _ => None,
        }
    }

    /// Absorb a 401/407 reply. `Ok` means the request should be repeated.
    pub fn on_challenge<'a, I>(&mut self, status: u16, challenges: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a str>,
    {
        if self.is_aws() {
            return Err(Error::AuthRejected(status));
        }
        let Some(challenge) = best_challenge(challenges) else {
            return Err(Error::AuthChallengeMissing(status));
        };
        let stale = challenge.stale;
        if self.credentials_pending && !stale {
            return Err(Error::AuthRejected(status));
        }
        if self.kind == AuthKind::Basic && challenge.mechanism == AuthMechanism::Basic {
            // Basic goes out with the first request already.
            return Err(Error::AuthRejected(status));
        }
        match challenge.mechanism {
            AuthMechanism::Unknown => {
                return Err(Error::AuthMethodUnsupported(challenge.scheme));
            }
            AuthMechanism::Basic => {
                self.basic_from_challenge = true;
                self.digest = None;
            }
            _ => {
                tracing::debug!(mechanism = %challenge.mechanism, realm = %challenge.realm, stale, "digest challenge");
                self.digest = DigestSession::new(challenge);
            }
        }
        self.credentials_pending = true;
        Ok(())
    }

    /// The server accepted the last request.
    pub fn on_success(&mut self) {
        self.credentials_pending = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx<'a>(query: &'a [(String, String)]) -> RequestContext<'a> {
        RequestContext {
            method: "GET",
            uri: "/dir/",
            path: "/dir/",
            query,
            host: "h",
            amz_date: "20210101T000000Z",
            payload_sha256: EMPTY_PAYLOAD_SHA256,
            entity_hash: None,
        }
    }

    #[test]
    fn basic_is_preemptive_and_second_401_rejects() {
        let mut a = AuthState::new(AuthKind::Basic, "u", "p", "");
        assert_eq!(a.authorization(&ctx(&[])).as_deref(), Some("Basic dTpw"));
        let e = a.on_challenge(401, [r#"Basic realm="x""#]).unwrap_err();
        assert!(matches!(e, Error::AuthRejected(401)));
    }

    #[test]
    fn digest_negotiated_then_rejected_on_repeat() {
        let mut a = AuthState::new(AuthKind::None, "u", "p", "");
        assert!(a.authorization(&ctx(&[])).is_none());
        a.on_challenge(401, [r#"Digest realm="r", nonce="n", qop="auth""#]).unwrap();
        let h = a.authorization(&ctx(&[])).unwrap();
        assert!(h.starts_with("Digest username=\"u\""));
        let e = a.on_challenge(401, [r#"Digest realm="r", nonce="n2", qop="auth""#]).unwrap_err();
        assert!(matches!(e, Error::AuthRejected(401)));
    }

    #[test]
    fn stale_nonce_allows_retry() {
        let mut a = AuthState::new(AuthKind::Digest, "u", "p", "");
        a.on_challenge(401, [r#"Digest realm="r", nonce="n""#]).unwrap();
        a.on_challenge(401, [r#"Digest realm="r", nonce="n2", stale=true"#]).unwrap();
        a.on_success();
        a.on_challenge(401, [r#"Digest realm="r", nonce="n3""#]).unwrap();
    }

    #[test]
    fn missing_or_unknown_challenge() {
        let mut a = AuthState::new(AuthKind::None, "u", "p", "");
        assert!(matches!(
            a.on_challenge(401, std::iter::empty::<&str>()),
            Err(Error::AuthChallengeMissing(401))
        ));
        assert!(matches!(
            a.on_challenge(401, ["Negotiate abc"]),
            Err(Error::AuthMethodUnsupported(ref s)) if s == "Negotiate"
        ));
    }

    #[test]
    fn aws_kinds() {
        let mut a = AuthState::new(AuthKind::Aws4HmacSha256, "AKID", "secret", "us-east-1");
        let h = a.authorization(&ctx(&[])).unwrap();
        assert!(h.starts_with("AWS4-HMAC-SHA256 Credential=AKID/20210101/us-east-1/s3/aws4_request"));
        assert!(a.on_challenge(403, ["Basic realm=\"x\""]).is_err());
        let mut n = AuthState::new(AuthKind::AwsNoSignRequest, "", "", "us-east-1");
        assert!(n.is_aws());
        assert!(n.authorization(&ctx(&[])).is_none());
    }

    #[test]
    fn credential_change_resets_negotiation() {
        let mut a = AuthState::new(AuthKind::None, "u", "p", "");
        a.on_challenge(401, [r#"Digest realm="r", nonce="n""#]).unwrap();
        assert!(!a.set_credentials("u", "p"));
        assert!(a.authorization(&ctx(&[])).is_some());
        assert!(a.set_credentials("v", "p"));
        assert!(a.authorization(&ctx(&[])).is_none());
    }
}
