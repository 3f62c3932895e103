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

//! HTTP/1.1 client: request composition, push-parsed responses, keep-alive session.
//!
//! - `request`: request head builder, bounded render, masked trace form.
//! - `response`: parsed head with typed accessors (length, ETag, dates, filename).
//! - `h1`: state-machine response parser (Content-Length, chunked, read-until-close).
//! - `connection` / `client`: plain or TLS stream, proxy CONNECT.
//! - `session`: the long-lived `HttpSession` used by the fetcher and sender.

mod request;
mod response;

pub mod client;
pub mod connection;
pub mod h1;
pub mod session;

pub use client::{connect_stream, Endpoint, Proxy};
pub use connection::{HttpStream, Transport};
pub use h1::H1ResponseHandler;
pub use request::{Method, RequestBuilder};
pub use response::{parse_http_date, Etag, ResponseHead};
pub use session::{
    compose_path, split_bucket, BodyInfo, ChunkRead, ConnectParams, GetOutcome, HeadInfo, HeadOutcome,
    HttpSession, ListingRequest, PutReply, PutStart, ServerOptions, SessionState,
};
