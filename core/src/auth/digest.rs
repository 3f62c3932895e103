/*
 * digest.rs
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

//! Digest access authentication (RFC 7616): MD5, SHA-256 and SHA-512/256, with `-sess`
//! variants and `qop=auth`/`auth-int`.

use md5::Md5;
use sha2::{Digest, Sha256, Sha512_256};

use super::bytes_to_hex;
use super::mechanism::{Challenge, DigestAlgorithm};

/// Hex digest of `data` under `alg`.
pub fn hash_hex(alg: DigestAlgorithm, data: &[u8]) -> String {
    match alg {
        DigestAlgorithm::Md5 => bytes_to_hex(&Md5::digest(data)),
        DigestAlgorithm::Sha256 => bytes_to_hex(&Sha256::digest(data)),
        DigestAlgorithm::Sha512_256 => bytes_to_hex(&Sha512_256::digest(data)),
    }
}

/// Incremental hasher for entity bodies (`auth-int`).
pub enum EntityHasher {
    Md5(Md5),
    Sha256(Sha256),
    Sha512_256(Sha512_256),
}

impl EntityHasher {
    pub fn new(alg: DigestAlgorithm) -> Self {
        match alg {
            DigestAlgorithm::Md5 => EntityHasher::Md5(Md5::new()),
            DigestAlgorithm::Sha256 => EntityHasher::Sha256(Sha256::new()),
            DigestAlgorithm::Sha512_256 => EntityHasher::Sha512_256(Sha512_256::new()),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        match self {
            EntityHasher::Md5(h) => h.update(data),
            EntityHasher::Sha256(h) => h.update(data),
            EntityHasher::Sha512_256(h) => h.update(data),
        }
    }

    pub fn finish_hex(self) -> String {
        match self {
            EntityHasher::Md5(h) => bytes_to_hex(&h.finalize()),
            EntityHasher::Sha256(h) => bytes_to_hex(&h.finalize()),
            EntityHasher::Sha512_256(h) => bytes_to_hex(&h.finalize()),
        }
    }
}

/// Digest state kept across requests of one session.
#[derive(Debug, Clone)]
pub struct DigestSession {
    pub challenge: Challenge,
    pub algorithm: DigestAlgorithm,
    nonce_count: u32,
}

impl DigestSession {
    /// `None` when the challenge is not a Digest one.
    pub fn new(challenge: Challenge) -> Option<Self> {
        let algorithm = challenge.mechanism.digest_algorithm()?;
        Some(Self {
            challenge,
            algorithm,
            nonce_count: 0,
        })
    }

    pub fn nonce_count(&self) -> u32 {
        self.nonce_count
    }

    /// Chosen qop: `auth` when offered, `auth-int` only when it is the sole option.
    pub fn qop(&self) -> Option<&'static str> {
        let q = &self.challenge.qop;
        if q.is_empty() {
            None
        } else if q.iter().any(|x| x == "auth") {
            Some("auth")
        } else if q.iter().any(|x| x == "auth-int") {
            Some("auth-int")
        } else {
            None
        }
    }

    /// True when the chosen qop needs a hash of the request body.
    pub fn needs_entity_hash(&self) -> bool {
        self.qop() == Some("auth-int")
    }

    /// `Authorization` value for the next request; bumps the nonce count.
    pub fn authorization(
        &mut self,
        method: &str,
        uri: &str,
        user: &str,
        password: &str,
        entity_hash: Option<&str>,
    ) -> String {
        let cnonce: [u8; 16] = rand::random();
        self.authorization_with_cnonce(method, uri, user, password, entity_hash, &bytes_to_hex(&cnonce))
    }

    pub(crate) fn authorization_with_cnonce(
        &mut self,
        method: &str,
        uri: &str,
        user: &str,
        password: &str,
        entity_hash: Option<&str>,
        cnonce: &str,
    ) -> String {
        self.nonce_count = self.nonce_count.wrapping_add(1);
        let nc = format!("{:08x}", self.nonce_count);
        let alg = self.algorithm;
        let ch = &self.challenge;
        let h = |s: &str| hash_hex(alg, s.as_bytes());

        let mut ha1 = h(&format!("{}:{}:{}", user, ch.realm, password));
        if ch.mechanism.is_session() {
            ha1 = h(&format!("{}:{}:{}", ha1, ch.nonce, cnonce));
        }
        let qop = self.qop();
        let ha2 = match qop {
            Some("auth-int") => {
                let empty = hash_hex(alg, b"");
                h(&format!("{}:{}:{}", method, uri, entity_hash.unwrap_or(&empty)))
            }
            _ => h(&format!("{}:{}", method, uri)),
        };
        let response = match qop {
            Some(q) => h(&format!("{}:{}:{}:{}:{}:{}", ha1, ch.nonce, nc, cnonce, q, ha2)),
            None => h(&format!("{}:{}:{}", ha1, ch.nonce, ha2)),
        };

        let mut out = format!(
            "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\", algorithm={}, response=\"{}\"",
            user,
            ch.realm,
            ch.nonce,
            uri,
            ch.mechanism.name(),
            response
        );
        if let Some(q) = qop {
            out.push_str(&format!(", qop={}, nc={}, cnonce=\"{}\"", q, nc, cnonce));
        }
        if let Some(o) = &ch.opaque {
            out.push_str(&format!(", opaque=\"{}\"", o));
        }
        out
    }
}
