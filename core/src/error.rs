/*
 * error.rs
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

//! Error kinds shared by the HTTP session, listing parser, retrieve list, fetcher and sender.
//!
//! Transport and protocol errors are retryable within the host's retry budget; auth, parser
//! and local errors are not. `exit_code()` gives the transfer exit status the tools report.

use std::path::PathBuf;

use thiserror::Error;

use crate::url::UrlErrors;

/// Result type alias for filedist operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Transfer exit codes (process exit status of the tools and of a finished job).
pub mod exit {
    pub const TRANSFER_SUCCESS: i32 = 0;
    pub const CONNECT_ERROR: i32 = 1;
    pub const AUTH_ERROR: i32 = 3;
    pub const GOT_KILLED: i32 = 8;
    pub const OPEN_REMOTE_ERROR: i32 = 10;
    pub const WRITE_REMOTE_ERROR: i32 = 11;
    pub const DELETE_REMOTE_ERROR: i32 = 13;
    pub const STAT_ERROR: i32 = 17;
    pub const TIMEOUT_ERROR: i32 = 20;
    pub const CONNECTION_RESET_ERROR: i32 = 21;
    pub const CONNECTION_REFUSED_ERROR: i32 = 22;
    pub const OPEN_LOCAL_ERROR: i32 = 30;
    pub const WRITE_LOCAL_ERROR: i32 = 31;
    pub const MOVE_ERROR: i32 = 33;
    pub const LOCK_REGION_ERROR: i32 = 34;
    pub const ALLOC_ERROR: i32 = 35;
    pub const SYNTAX_ERROR: i32 = 60;
    pub const INCORRECT: i32 = 99;
}

#[derive(Debug, Error)]
pub enum Error {
    // Transport
    #[error("timed out after {0} seconds")]
    Timeout(u64),

    #[error("connection refused by {0}")]
    ConnectionRefused(String),

    #[error("connection reset by peer")]
    ConnectionReset,

    /// The server closed a kept-alive connection; it has been reopened and the request may be repeated.
    #[error("server closed the connection, reopened it")]
    ConnectionReopened,

    #[error("proxy CONNECT failed: {0}")]
    ProxyConnectFailed(String),

    #[error("TLS handshake failed: {0}")]
    TlsHandshakeFailed(String),

    #[error("TLS certificate rejected: {0}")]
    TlsCertInvalid(String),

    #[error("not connected")]
    NotConnected,

    // Protocol
    #[error("unexpected HTTP status {code}{}", reply_suffix(.reply))]
    UnexpectedStatus { code: u16, reply: Option<String> },

    #[error("malformed header: {0}")]
    MalformedHeader(String),

    #[error("malformed chunk: {0}")]
    MalformedChunk(String),

    #[error("chunk of {size} bytes exceeds limit of {limit}")]
    ChunkOverflow { size: u64, limit: u64 },

    #[error("body of {size} bytes exceeds limit of {limit}")]
    BodyTooLarge { size: u64, limit: u64 },

    #[error("listing is truncated but carries no continuation token")]
    MissingContinuationToken,

    // Auth
    #[error("authentication method not supported: {0}")]
    AuthMethodUnsupported(String),

    #[error("server sent {0} without a usable WWW-Authenticate challenge")]
    AuthChallengeMissing(u16),

    #[error("credentials rejected (HTTP {0})")]
    AuthRejected(u16),

    // Listing parser
    #[error("unknown directory listing format")]
    UnknownListingDialect,

    #[error("{field} longer than {limit} bytes")]
    FieldOverflow { field: &'static str, limit: usize },

    #[error("unparseable date `{0}`")]
    BadDate(String),

    #[error("unparseable size `{0}`")]
    BadSize(String),

    #[error("malformed listing: {0}")]
    MalformedListing(String),

    #[error("XML listing: {0}")]
    Xml(#[from] quick_xml::Error),

    // URL
    #[error("invalid URL: {0}")]
    Url(UrlErrors),

    // Local
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{op} {path}: {source}")]
    LocalIo {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("rename {from} -> {to}: {source}")]
    RenameFailed {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("lock conflict on {0}")]
    LockConflict(String),

    #[error("retrieve list resize failed: {0}")]
    RetrieveListResize(String),

    #[error("configuration: {0}")]
    Config(String),

    // Domain
    #[error("nothing to fetch")]
    NothingToFetch,

    #[error("failed to delete remote file {file} (HTTP {code})")]
    DeleteRemoteFailed { file: String, code: u16 },

    #[error("hostname changed while connected")]
    HostnameChanged,

    #[error("job database changed")]
    DatabaseChanged,

    #[error("process was killed")]
    GotKilled,
}

impl Error {
    /// Wrap an I/O error with the local operation and path it concerns.
    pub fn local(op: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::LocalIo {
            op,
            path: path.into(),
            source,
        }
    }

    /// Map a socket-level I/O error onto the transport kinds.
    pub fn from_socket(e: std::io::Error, peer: &str) -> Self {
        use std::io::ErrorKind;
        match e.kind() {
            ErrorKind::ConnectionRefused => Error::ConnectionRefused(peer.to_string()),
            ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof => Error::ConnectionReset,
            ErrorKind::TimedOut => Error::Timeout(0),
            _ => Error::Io(e),
        }
    }

    /// True for errors the caller may retry within its retry budget.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Timeout(_)
            | Error::ConnectionRefused(_)
            | Error::ConnectionReset
            | Error::ConnectionReopened
            | Error::ProxyConnectFailed(_)
            | Error::TlsHandshakeFailed(_)
            | Error::NotConnected
            | Error::MalformedHeader(_)
            | Error::MalformedChunk(_)
            | Error::ChunkOverflow { .. } => true,
            Error::UnexpectedStatus { code, .. } => *code >= 500,
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }

    /// True when the worker should stop and report success so the scheduler respawns it.
    pub fn is_clean_exit(&self) -> bool {
        matches!(self, Error::HostnameChanged | Error::DatabaseChanged)
    }

    /// Transfer exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Timeout(_) => exit::TIMEOUT_ERROR,
            Error::ConnectionRefused(_) => exit::CONNECTION_REFUSED_ERROR,
            Error::ConnectionReset | Error::ConnectionReopened => exit::CONNECTION_RESET_ERROR,
            Error::ProxyConnectFailed(_)
            | Error::TlsHandshakeFailed(_)
            | Error::TlsCertInvalid(_)
            | Error::NotConnected => exit::CONNECT_ERROR,
            Error::UnexpectedStatus { .. } => exit::OPEN_REMOTE_ERROR,
            Error::MalformedHeader(_)
            | Error::MalformedChunk(_)
            | Error::ChunkOverflow { .. }
            | Error::MissingContinuationToken => exit::INCORRECT,
            Error::BodyTooLarge { .. } => exit::ALLOC_ERROR,
            Error::AuthMethodUnsupported(_)
            | Error::AuthChallengeMissing(_)
            | Error::AuthRejected(_) => exit::AUTH_ERROR,
            Error::UnknownListingDialect
            | Error::FieldOverflow { .. }
            | Error::BadDate(_)
            | Error::BadSize(_)
            | Error::MalformedListing(_)
            | Error::Xml(_) => exit::INCORRECT,
            Error::Url(_) | Error::Config(_) => exit::SYNTAX_ERROR,
            Error::Io(_) | Error::LocalIo { .. } => exit::WRITE_LOCAL_ERROR,
            Error::RenameFailed { .. } => exit::MOVE_ERROR,
            Error::LockConflict(_) | Error::RetrieveListResize(_) => exit::LOCK_REGION_ERROR,
            Error::NothingToFetch | Error::HostnameChanged | Error::DatabaseChanged => {
                exit::TRANSFER_SUCCESS
            }
            Error::DeleteRemoteFailed { .. } => exit::DELETE_REMOTE_ERROR,
            Error::GotKilled => exit::GOT_KILLED,
        }
    }
}

fn reply_suffix(reply: &Option<String>) -> String {
    match reply {
        Some(r) => format!(" ({})", r),
        None => String::new(),
    }
}

impl From<UrlErrors> for Error {
    fn from(e: UrlErrors) -> Self {
        Error::Url(e)
    }
}
