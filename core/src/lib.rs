/*
 * lib.rs
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

//! Filedist core: the HTTP/S side of the file-distribution system.
//!
//! - `url`: the URL dialect (parse, render, escape, password insertion).
//! - `protocol::http`: HTTP/1.1 session with Basic, Digest and AWS4 authentication, TLS,
//!   chunked bodies, proxy CONNECT and connection reuse across jobs.
//! - `listing`: directory listing parser for HTML index pages and S3 `ListBucket` XML.
//! - `retrieve_list`: per-directory table of remote files shared by cooperating workers.
//! - `fetch` / `send`: the download and upload loops built on the above.

pub mod audit;
pub mod auth;
pub mod config;
pub mod counter;
pub mod error;
pub mod fetch;
pub mod listing;
pub mod lock;
pub mod net;
pub mod protocol;
pub mod rate;
pub mod retrieve_list;
pub mod send;
pub mod url;

pub use config::{FetchOptions, SendOptions, TransferFeatures};
pub use error::{Error, Result};
pub use url::Url;
