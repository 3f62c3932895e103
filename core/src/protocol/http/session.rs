/*
 * session.rs
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

//! Long-lived HTTP/1.1 session: one keep-alive connection, its authentication state, the
//! server option bitmap and the S3 listing marker.
//!
//! Requests are written as one rendered head; responses are push-parsed into a collector and
//! the body is handed out through `read` / `chunk_read`. A kept-alive connection the server
//! closed before answering is reopened and the request repeated once; a close in the middle
//! of a body reopens the connection and reports `ConnectionReopened` so the caller can retry.

use std::ops::{BitOr, BitOrAssign};
use std::path::Path;
use std::time::{Duration, Instant};

use bytes::{Buf, BytesMut};
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;

use crate::auth::{amz_date, bytes_to_hex, AuthState, DigestAlgorithm, EntityHasher, RequestContext, EMPTY_PAYLOAD_SHA256};
use crate::config::{limits, ListVersion, TransferFeatures};
use crate::error::{Error, Result};
use crate::protocol::http::client::{connect_stream, Endpoint, Proxy};
use crate::protocol::http::connection::Transport;
use crate::protocol::http::h1::{H1ResponseHandler, ParseState, ResponseParser};
use crate::protocol::http::request::{Method, RequestBuilder};
use crate::protocol::http::response::{Etag, ResponseHead};
use crate::url::{encode, path_encode, AuthKind, Service, Url};

/// Longest wait for `100 Continue` before the body is sent anyway.
const EXPECT_CONTINUE_WAIT: Duration = Duration::from_secs(3);

/// Upper bound on authentication round trips for one request.
const MAX_AUTH_ROUNDS: u32 = 3;

/// Methods the server advertised in `Allow`, plus known-not-working bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ServerOptions(pub u16);

impl ServerOptions {
    pub const GET: ServerOptions = ServerOptions(1 << 0);
    pub const HEAD: ServerOptions = ServerOptions(1 << 1);
    pub const PUT: ServerOptions = ServerOptions(1 << 2);
    pub const DELETE: ServerOptions = ServerOptions(1 << 3);
    pub const OPTIONS: ServerOptions = ServerOptions(1 << 4);
    pub const MOVE: ServerOptions = ServerOptions(1 << 5);
    pub const POST: ServerOptions = ServerOptions(1 << 6);
    /// The server ignores `Expect: 100-continue`.
    pub const EXPECT_NOT_WORKING: ServerOptions = ServerOptions(1 << 8);
    pub const NONE: ServerOptions = ServerOptions(0);
    /// Assumed until the server says otherwise.
    pub const ASSUMED: ServerOptions = ServerOptions(0b1111);

    pub fn contains(self, other: ServerOptions) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: ServerOptions) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: ServerOptions) {
        self.0 &= !other.0;
    }

    /// Methods listed in an `Allow` header value.
    pub fn from_allow(value: &str) -> ServerOptions {
        let mut o = ServerOptions::NONE;
        for m in value.split(',').map(str::trim) {
            o.insert(match m.to_ascii_uppercase().as_str() {
                "GET" => ServerOptions::GET,
                "HEAD" => ServerOptions::HEAD,
                "PUT" => ServerOptions::PUT,
                "DELETE" => ServerOptions::DELETE,
                "OPTIONS" => ServerOptions::OPTIONS,
                "MOVE" => ServerOptions::MOVE,
                "POST" => ServerOptions::POST,
                _ => ServerOptions::NONE,
            });
        }
        o
    }
}

impl BitOr for ServerOptions {
    type Output = ServerOptions;
    fn bitor(self, rhs: ServerOptions) -> ServerOptions {
        ServerOptions(self.0 | rhs.0)
    }
}

impl BitOrAssign for ServerOptions {
    fn bitor_assign(&mut self, rhs: ServerOptions) {
        self.0 |= rhs.0;
    }
}

/// Where a session is in its request cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Closed,
    Connecting,
    Idle,
    RequestSent,
    HeadersParsed,
    Body,
    Chunks,
}

/// Everything `connect` and `burst` need.
#[derive(Debug, Clone)]
pub struct ConnectParams {
    pub host: String,
    pub port: u16,
    pub proxy: Option<Proxy>,
    pub user: String,
    pub password: String,
    pub auth: AuthKind,
    pub tls: bool,
    pub features: TransferFeatures,
    pub service: Service,
    pub region: String,
    pub transfer_timeout: Duration,
    /// Socket read size.
    pub block_size: usize,
    pub user_agent: String,
    /// Option bitmap from an earlier session; skips the OPTIONS probe.
    pub cached_options: Option<ServerOptions>,
}

impl ConnectParams {
    /// Endpoint and credentials of a recipient URL with default limits.
    pub fn from_url(url: &Url) -> ConnectParams {
        let tls = url.scheme.is_tls();
        ConnectParams {
            host: url.hostname.clone(),
            port: url.effective_port().unwrap_or(if tls { 443 } else { 80 }),
            proxy: None,
            user: url.user.clone().unwrap_or_default(),
            password: url.password.clone().unwrap_or_default(),
            auth: url.auth,
            tls,
            features: TransferFeatures::default(),
            service: url.service,
            region: url.region.clone().unwrap_or_else(|| "us-east-1".to_string()),
            transfer_timeout: Duration::from_secs(limits::DEFAULT_TRANSFER_TIMEOUT),
            block_size: limits::DEFAULT_BLOCK_SIZE,
            user_agent: limits::DEFAULT_USER_AGENT.to_string(),
            cached_options: None,
        }
    }

    fn default_port(&self) -> u16 {
        if self.tls {
            443
        } else {
            80
        }
    }
}

/// Response metadata of a GET that carries a body.
#[derive(Debug, Clone, Default)]
pub struct BodyInfo {
    pub status: u16,
    /// Authoritative body length (of the remaining range for 206).
    pub content_length: Option<u64>,
    pub chunked: bool,
    /// 206: the body starts at the requested offset.
    pub partial: bool,
    pub etag: Option<Etag>,
    pub last_modified: Option<i64>,
    /// `Content-Disposition` filename.
    pub filename: Option<String>,
    pub content_type: Option<String>,
}

impl BodyInfo {
    fn from_head(head: &ResponseHead) -> BodyInfo {
        BodyInfo {
            status: head.code,
            content_length: if head.is_chunked() { None } else { head.content_length() },
            chunked: head.is_chunked(),
            partial: head.code == 206,
            etag: head.etag(),
            last_modified: head.last_modified(),
            filename: head.content_disposition_filename(),
            content_type: head.content_type().map(str::to_string),
        }
    }
}

#[derive(Debug, Clone)]
pub enum GetOutcome {
    /// Body follows; read it with `read` or `chunk_read`.
    Body(BodyInfo),
    /// 204 or 304.
    NothingToFetch,
    /// Any other status; the body has been discarded.
    Status(u16),
}

#[derive(Debug, Clone, Default)]
pub struct HeadInfo {
    pub size: Option<u64>,
    pub mtime: Option<i64>,
    pub etag: Option<Etag>,
}

#[derive(Debug, Clone)]
pub enum HeadOutcome {
    Found(HeadInfo),
    Status(u16),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutStart {
    /// Send the body with `write`, then call `put_response`.
    Ready,
    /// The server answered before the body was sent.
    Status(u16),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PutReply {
    Done { status: u16, etag: Option<Etag> },
    /// 401 with a usable challenge; repeat the PUT.
    AuthRequired,
    Status(u16),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkRead {
    Data(usize),
    /// The terminating zero-size chunk (or end of body) was reached.
    LastChunk,
}

/// Parameters of one directory listing request.
#[derive(Debug, Clone, Copy)]
pub struct ListingRequest {
    pub version: ListVersion,
    /// Largest body accepted; 0 means unlimited.
    pub max_dir_buffer: u64,
    pub no_delimiter: bool,
    pub keep_path: bool,
}

/// Parser events gathered for the current response.
#[derive(Default)]
struct Collector {
    head: ResponseHead,
    body: BytesMut,
    last_chunk: bool,
}

impl Collector {
    fn clear(&mut self) {
        self.head = ResponseHead::default();
        self.body.clear();
        self.last_chunk = false;
    }
}

impl H1ResponseHandler for Collector {
    fn status(&mut self, version_minor: u8, code: u16, reason: &str) {
        self.head.version_minor = version_minor;
        self.head.code = code;
        self.head.reason = reason.to_string();
    }

    fn header(&mut self, name: &str, value: &str) {
        self.head.headers.push((name.to_string(), value.to_string()));
    }

    fn body_chunk(&mut self, data: &[u8]) {
        self.body.extend_from_slice(data);
    }

    fn chunk_start(&mut self, size: u64) {
        if size == 0 {
            self.last_chunk = true;
        }
    }

    fn complete(&mut self) {}
}

/// One request as composed before authentication.
struct Exchange {
    method: Method,
    host: String,
    path: String,
    query: Vec<(String, String)>,
    headers: Vec<(String, String)>,
    payload_sha256: String,
    entity_hash: Option<String>,
    content_length: Option<u64>,
    expect_continue: bool,
}

impl Exchange {
    fn new(method: Method, host: String, path: String) -> Exchange {
        Exchange {
            method,
            host,
            path,
            query: Vec::new(),
            headers: Vec::new(),
            payload_sha256: EMPTY_PAYLOAD_SHA256.to_string(),
            entity_hash: None,
            content_length: None,
            expect_continue: false,
        }
    }
}

/// Request path `/<dir>/<file>` with exactly one `/` between segments. A file starting with
/// `/` is absolute; an empty file names the directory listing (`/dir/`).
pub fn compose_path(dir: &str, file: &str) -> String {
    if file.starts_with('/') {
        return path_encode(file.as_bytes());
    }
    let d = dir.trim_matches('/');
    let mut p = String::from("/");
    if !d.is_empty() {
        p.push_str(&path_encode(d.as_bytes()));
        p.push('/');
    }
    p.push_str(&path_encode(file.as_bytes()));
    p
}

/// S3 bucket (first component) and key prefix of a directory.
pub fn split_bucket(dir: &str) -> (&str, &str) {
    let d = dir.trim_start_matches('/');
    match d.split_once('/') {
        Some((bucket, rest)) => (bucket, rest.trim_end_matches('/')),
        None => (d, ""),
    }
}

/// Query of an S3 list request, in wire order.
pub fn s3_list_query(prefix: &str, req: &ListingRequest, marker: Option<&str>) -> Vec<(String, String)> {
    let mut q = Vec::new();
    if !req.no_delimiter {
        q.push(("delimiter".to_string(), "/".to_string()));
    }
    if req.version == ListVersion::V2 {
        q.push(("list-type".to_string(), "2".to_string()));
    }
    if let Some(m) = marker {
        let name = match req.version {
            ListVersion::V1 => "marker",
            ListVersion::V2 => "continuation-token",
        };
        q.push((name.to_string(), m.to_string()));
    }
    let max_keys = if req.max_dir_buffer == 0 {
        limits::S3_MAX_KEYS
    } else {
        (req.max_dir_buffer / limits::S3_LIST_ENTRY_ESTIMATE).clamp(1, limits::S3_MAX_KEYS)
    };
    q.push(("max-keys".to_string(), max_keys.to_string()));
    if !req.keep_path && !prefix.is_empty() {
        q.push(("prefix".to_string(), format!("{}/", prefix.trim_end_matches('/'))));
    }
    q
}

fn wire_query(query: &[(String, String)]) -> String {
    query
        .iter()
        .map(|(k, v)| format!("{}={}", encode(k.as_bytes()), encode(v.as_bytes())))
        .collect::<Vec<_>>()
        .join("&")
}

/// Feed every byte of a local file to `f`.
async fn hash_file<F: FnMut(&[u8])>(path: &Path, mut f: F) -> Result<()> {
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| Error::local("open", path, e))?;
    let mut buf = vec![0u8; limits::DEFAULT_BLOCK_SIZE];
    loop {
        let n = file.read(&mut buf).await.map_err(|e| Error::local("read", path, e))?;
        if n == 0 {
            return Ok(());
        }
        f(&buf[..n]);
    }
}

async fn file_sha256(path: &Path) -> Result<String> {
    let mut h = Sha256::new();
    hash_file(path, |b| h.update(b)).await?;
    Ok(bytes_to_hex(&h.finalize()))
}

async fn file_entity_hash(path: &Path, alg: DigestAlgorithm) -> Result<String> {
    let mut h = EntityHasher::new(alg);
    hash_file(path, |b| h.update(b)).await?;
    Ok(h.finish_hex())
}

/// HTTP/1.1 session with one server.
pub struct HttpSession {
    params: ConnectParams,
    transport: Option<Transport>,
    parser: ResponseParser,
    collector: Collector,
    state: SessionState,
    options: ServerOptions,
    auth: AuthState,
    marker: Option<String>,
    close_after_response: bool,
    /// Requests carry `Connection: close` and the connection ends with each response.
    closing: bool,
    head_request: bool,
    requests_on_connection: u32,
    connected_at: Instant,
    last_reply: Option<String>,
}

impl HttpSession {
    /// Open the connection and probe the server options (skipped for S3 or when cached).
    pub async fn connect(params: ConnectParams) -> Result<HttpSession> {
        let auth = AuthState::new(params.auth, &params.user, &params.password, &params.region);
        let mut session = HttpSession {
            options: params.cached_options.unwrap_or(ServerOptions::ASSUMED),
            params,
            transport: None,
            parser: ResponseParser::new(),
            collector: Collector::default(),
            state: SessionState::Closed,
            auth,
            marker: None,
            close_after_response: false,
            closing: false,
            head_request: false,
            requests_on_connection: 0,
            connected_at: Instant::now(),
            last_reply: None,
        };
        session.open().await?;
        if session.params.service != Service::S3 && session.params.cached_options.is_none() {
            if let Err(e) = session.options("").await {
                if e.is_retryable() {
                    return Err(e);
                }
                tracing::debug!(host = %session.params.host, error = %e, "OPTIONS probe failed");
                session.auth.reset();
            }
        }
        Ok(session)
    }

    async fn open(&mut self) -> Result<()> {
        self.state = SessionState::Connecting;
        let ep = Endpoint {
            host: &self.params.host,
            port: self.params.port,
            tls: self.params.tls,
            proxy: self.params.proxy.as_ref(),
            features: &self.params.features,
            limit: self.params.transfer_timeout,
            read_size: self.params.block_size,
        };
        match connect_stream(&ep).await {
            Ok(t) => {
                tracing::debug!(peer = %t.peer(), tls = t.is_tls(), "connected");
                self.transport = Some(t);
                self.parser.reset();
                self.collector.clear();
                self.requests_on_connection = 0;
                self.close_after_response = false;
                self.connected_at = Instant::now();
                self.state = SessionState::Idle;
                Ok(())
            }
            Err(e) => {
                self.state = SessionState::Closed;
                Err(e)
            }
        }
    }

    async fn reconnect(&mut self) -> Result<()> {
        self.transport = None;
        self.open().await
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn options_bitmap(&self) -> ServerOptions {
        self.options
    }

    pub fn params(&self) -> &ConnectParams {
        &self.params
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_some()
    }

    /// When the current connection was opened.
    pub fn connected_at(&self) -> Instant {
        self.connected_at
    }

    /// Last status line received, for error reports.
    pub fn last_reply(&self) -> Option<&str> {
        self.last_reply.as_deref()
    }

    pub fn set_marker(&mut self, marker: Option<String>) {
        self.marker = marker;
    }

    pub fn marker(&self) -> Option<&str> {
        self.marker.as_deref()
    }

    /// Mark the coming requests as the last of this connection: they ask the server to close
    /// and the connection is dropped once the response is read.
    pub fn set_closing(&mut self, closing: bool) {
        self.closing = closing;
    }

    /// Forget negotiated digest state; the next 401 starts over.
    pub fn reset_authentication(&mut self) {
        self.auth.reset();
    }

    /// Same endpoint: host, port, TLS, proxy and service match.
    pub fn can_burst(&self, params: &ConnectParams) -> bool {
        self.params.host.eq_ignore_ascii_case(&params.host)
            && self.params.port == params.port
            && self.params.tls == params.tls
            && self.params.proxy == params.proxy
            && self.params.service == params.service
    }

    /// Take over the next job on this connection. Authentication restarts only when the
    /// credentials changed.
    pub async fn burst(&mut self, params: ConnectParams) -> Result<()> {
        if !self.can_burst(&params) {
            return Err(Error::HostnameChanged);
        }
        if params.auth != self.auth.kind() || params.region != self.params.region {
            self.auth = AuthState::new(params.auth, &params.user, &params.password, &params.region);
        } else if self.auth.set_credentials(&params.user, &params.password) {
            tracing::debug!(host = %params.host, "credentials changed, reauthenticating");
        }
        let limit = params.transfer_timeout;
        self.params = ConnectParams {
            cached_options: Some(self.options),
            ..params
        };
        self.marker = None;
        self.closing = false;
        match self.transport.as_mut() {
            Some(t) => t.set_timeout(limit),
            None => self.open().await?,
        }
        Ok(())
    }

    fn host_header(&self, bucket: Option<&str>) -> String {
        let mut h = match bucket {
            Some(b) => format!("{}.{}", b, self.params.host),
            None => self.params.host.clone(),
        };
        if self.params.port != self.params.default_port() {
            h.push_str(&format!(":{}", self.params.port));
        }
        h
    }

    fn s3_vhost(&self) -> bool {
        self.params.service == Service::S3 && !self.params.features.bucketname_in_path
    }

    /// Host header and request path for `dir` + `file`.
    fn resolve(&self, dir: &str, file: &str) -> (String, String) {
        if self.s3_vhost() {
            let (bucket, key_dir) = split_bucket(dir);
            if !bucket.is_empty() {
                return (self.host_header(Some(bucket)), compose_path(key_dir, file));
            }
        }
        (self.host_header(None), compose_path(dir, file))
    }

    fn build_request(&mut self, ex: &Exchange) -> Result<RequestBuilder> {
        let mut target = ex.path.clone();
        if !ex.query.is_empty() {
            target.push('?');
            target.push_str(&wire_query(&ex.query));
        }
        if self.params.proxy.is_some() && !self.params.tls {
            target = format!("http://{}{}", ex.host, target);
        }
        let mut req = RequestBuilder::new(ex.method, target);
        req.header("Host", ex.host.as_str())
            .header("User-Agent", self.params.user_agent.as_str())
            .header("Accept", "*/*");
        let amz = self
            .auth
            .is_aws()
            .then(|| amz_date(chrono::Utc::now().timestamp()));
        if let Some(d) = &amz {
            req.header("x-amz-content-sha256", ex.payload_sha256.as_str())
                .header("x-amz-date", d.as_str());
        }
        let ctx = RequestContext {
            method: ex.method.as_str(),
            uri: &req.target,
            path: &ex.path,
            query: &ex.query,
            host: &ex.host,
            amz_date: amz.as_deref().unwrap_or(""),
            payload_sha256: &ex.payload_sha256,
            entity_hash: ex.entity_hash.as_deref(),
        };
        let authorization = self.auth.authorization(&ctx);
        if let Some(value) = authorization {
            req.header("Authorization", value);
        }
        for (k, v) in &ex.headers {
            req.header(k.as_str(), v.as_str());
        }
        if let Some(n) = ex.content_length {
            req.header("Content-Length", n.to_string());
        }
        if ex.expect_continue {
            req.header("Expect", "100-continue");
        }
        req.header("Connection", if self.closing { "close" } else { "keep-alive" });
        Ok(req)
    }

    /// Write the request head, reconnecting first when the connection was dropped.
    async fn send(&mut self, req: &RequestBuilder) -> Result<()> {
        let head = req.render(limits::MAX_HTTP_HEADER_BUFFER)?;
        if self.transport.is_none() {
            self.open().await?;
        }
        tracing::trace!(request = %req.masked(), "send");
        self.parser.reset();
        self.collector.clear();
        self.head_request = req.method == Method::Head;
        let t = self.transport.as_mut().ok_or(Error::NotConnected)?;
        t.write_all(&head).await?;
        self.requests_on_connection += 1;
        self.state = SessionState::RequestSent;
        Ok(())
    }

    /// As `send`, repeating once on a fresh connection when a reused one was found dead.
    async fn send_fresh(&mut self, req: &RequestBuilder) -> Result<()> {
        let reused = self.transport.is_some() && self.requests_on_connection > 0;
        match self.send(req).await {
            Err(Error::ConnectionReset) if reused => {
                tracing::debug!(host = %self.params.host, "kept-alive connection was closed, reconnecting");
                self.reconnect().await?;
                self.send(req).await
            }
            r => r,
        }
    }

    /// Read until the response head is complete. `want_continue` returns a `100` head to the
    /// caller; other provisional responses are skipped.
    async fn read_head(&mut self, wait: Option<Duration>, want_continue: bool) -> Result<ResponseHead> {
        loop {
            let t = self.transport.as_mut().ok_or(Error::NotConnected)?;
            self.parser.receive(&mut t.read_buf, &mut self.collector)?;
            if self.parser.state() == ParseState::HeadersComplete {
                let head = std::mem::take(&mut self.collector.head);
                tracing::trace!(status = %head.status_line(), "receive");
                if (100..200).contains(&head.code) {
                    self.parser.set_no_body();
                    self.parser.reset();
                    if head.code == 100 && want_continue {
                        return Ok(head);
                    }
                    continue;
                }
                self.last_reply = Some(head.status_line());
                self.close_after_response = self.closing || head.connection_close();
                let chunked = head.is_chunked();
                if self.head_request || head.code == 204 || head.code == 304 {
                    self.parser.set_no_body();
                } else {
                    self.parser.set_body_mode(head.content_length(), chunked);
                }
                self.state = if chunked { SessionState::Chunks } else { SessionState::Body };
                if self.parser.is_complete() {
                    self.finish_response();
                } else if self.parser.state() == ParseState::HeadersComplete {
                    self.state = SessionState::HeadersParsed;
                }
                return Ok(head);
            }
            let n = match wait {
                Some(w) => t.fill_within(w).await?,
                None => t.fill().await?,
            };
            if n == 0 {
                self.transport = None;
                self.state = SessionState::Closed;
                return Err(Error::ConnectionReset);
            }
        }
    }

    /// Send and read the head; a reused connection closed before the status line is
    /// reopened and the request repeated once.
    async fn exchange(&mut self, req: &RequestBuilder) -> Result<ResponseHead> {
        let reused = self.transport.is_some() && self.requests_on_connection > 0;
        let first = match self.send(req).await {
            Ok(()) => self.read_head(None, false).await,
            Err(e) => Err(e),
        };
        match first {
            Err(Error::ConnectionReset) if reused && self.collector.head.code == 0 => {
                tracing::debug!(host = %self.params.host, "kept-alive connection was closed, repeating request");
                self.reconnect().await?;
                self.send(req).await?;
                self.read_head(None, false).await
            }
            r => r,
        }
    }

    /// Request/response with 401 handling. The returned head's body is still unread.
    async fn round_trip(&mut self, ex: &Exchange) -> Result<ResponseHead> {
        let mut rounds = 0;
        loop {
            let req = self.build_request(ex)?;
            let head = self.exchange(&req).await?;
            if head.code == 401 {
                self.drain_body().await?;
                rounds += 1;
                if rounds > MAX_AUTH_ROUNDS {
                    return Err(Error::AuthRejected(401));
                }
                self.auth.on_challenge(401, head.www_authenticate())?;
                continue;
            }
            self.auth.on_success();
            return Ok(head);
        }
    }

    fn finish_response(&mut self) {
        self.state = SessionState::Idle;
        if self.close_after_response {
            tracing::debug!(host = %self.params.host, "server closes the connection");
            self.transport = None;
            self.state = SessionState::Closed;
            self.close_after_response = false;
        }
    }

    fn in_body(&self) -> bool {
        matches!(
            self.state,
            SessionState::Body | SessionState::Chunks | SessionState::HeadersParsed
        )
    }

    /// Parse buffered bytes or read more from the socket.
    async fn pump(&mut self) -> Result<()> {
        let t = self.transport.as_mut().ok_or(Error::NotConnected)?;
        if !t.read_buf.is_empty() {
            self.parser.receive(&mut t.read_buf, &mut self.collector)?;
            if !self.collector.body.is_empty() || self.parser.is_complete() {
                return Ok(());
            }
        }
        let n = t.fill().await?;
        if n == 0 {
            if self.parser.on_close(&mut self.collector).is_ok() {
                self.close_after_response = true;
                return Ok(());
            }
            tracing::warn!(
                host = %self.params.host,
                bytes = self.parser.body_bytes(),
                "server closed the connection during the body"
            );
            self.reconnect().await?;
            return Err(Error::ConnectionReopened);
        }
        self.parser.receive(&mut t.read_buf, &mut self.collector)
    }

    /// Read body bytes. Returns 0 at the end of the body.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        loop {
            if !self.collector.body.is_empty() {
                let n = buf.len().min(self.collector.body.len());
                buf[..n].copy_from_slice(&self.collector.body[..n]);
                self.collector.body.advance(n);
                return Ok(n);
            }
            if !self.in_body() || self.parser.is_complete() {
                if self.in_body() {
                    self.finish_response();
                }
                return Ok(0);
            }
            self.pump().await?;
        }
    }

    /// Read the next piece of a chunked body; `LastChunk` once the zero chunk was seen.
    pub async fn chunk_read(&mut self, buf: &mut [u8]) -> Result<ChunkRead> {
        match self.read(buf).await? {
            0 => Ok(ChunkRead::LastChunk),
            n => Ok(ChunkRead::Data(n)),
        }
    }

    /// Discard the rest of the body. A long body closes the connection instead.
    async fn drain_body(&mut self) -> Result<()> {
        let mut discarded = 0usize;
        loop {
            discarded += self.collector.body.len();
            self.collector.body.clear();
            if !self.in_body() || self.parser.is_complete() {
                if self.in_body() {
                    self.finish_response();
                }
                return Ok(());
            }
            if discarded > limits::MAX_RESPONSE_HEAD {
                self.transport = None;
                self.state = SessionState::Closed;
                return Ok(());
            }
            match self.pump().await {
                Err(Error::ConnectionReopened) => return Ok(()),
                r => r?,
            }
        }
    }

    fn same_host_target(&self, location: &str) -> Option<String> {
        if location.starts_with('/') {
            return Some(location.to_string());
        }
        let rest = location.split_once("://")?.1;
        let (authority, path) = rest.split_at(rest.find('/').unwrap_or(rest.len()));
        let hostport = authority.rsplit('@').next().unwrap_or(authority);
        let host = match hostport.strip_prefix('[') {
            Some(v6) => v6.split(']').next().unwrap_or(v6),
            None => hostport.split(':').next().unwrap_or(hostport),
        };
        let own = self.params.host.trim_start_matches('[').trim_end_matches(']');
        if host.eq_ignore_ascii_case(own) {
            Some(if path.is_empty() { "/".to_string() } else { path.to_string() })
        } else {
            None
        }
    }

    /// GET `dir/file` from `offset`. Same-host 302/303/307/308 are followed once.
    pub async fn get(&mut self, dir: &str, file: &str, offset: u64) -> Result<GetOutcome> {
        let (host, path) = self.resolve(dir, file);
        let mut ex = Exchange::new(Method::Get, host, path);
        if offset > 0 {
            ex.headers.push(("Range".to_string(), format!("bytes={}-", offset)));
        }
        let mut redirected = false;
        loop {
            let head = self.round_trip(&ex).await?;
            match head.code {
                204 | 304 => {
                    self.drain_body().await?;
                    return Ok(GetOutcome::NothingToFetch);
                }
                200..=299 => return Ok(GetOutcome::Body(BodyInfo::from_head(&head))),
                302 | 303 | 307 | 308 if !redirected => {
                    let target = head.location().and_then(|l| self.same_host_target(l));
                    self.drain_body().await?;
                    match target {
                        Some(t) => {
                            tracing::debug!(status = head.code, location = %t, "following redirect");
                            ex.path = t;
                            ex.query.clear();
                            redirected = true;
                        }
                        None => return Ok(GetOutcome::Status(head.code)),
                    }
                }
                code => {
                    if let Some(l) = head.location() {
                        tracing::info!(status = code, location = %l, "not following redirect");
                    }
                    self.drain_body().await?;
                    return Ok(GetOutcome::Status(code));
                }
            }
        }
    }

    /// HEAD `dir/file`: exact size and modification time when the server gives them.
    pub async fn head(&mut self, dir: &str, file: &str) -> Result<HeadOutcome> {
        let (host, path) = self.resolve(dir, file);
        let head = self.round_trip(&Exchange::new(Method::Head, host, path)).await?;
        self.drain_body().await?;
        if head.is_success() {
            Ok(HeadOutcome::Found(HeadInfo {
                size: head.content_length(),
                mtime: head.last_modified(),
                etag: head.etag(),
            }))
        } else {
            Ok(HeadOutcome::Status(head.code))
        }
    }

    /// Start a PUT of `local_path` (`size` bytes) to `dir/file`. With `Ready`, send the body
    /// with `write` and finish with `put_response`.
    pub async fn put(
        &mut self,
        dir: &str,
        file: &str,
        local_path: &Path,
        size: u64,
        first_in_burst: bool,
    ) -> Result<PutStart> {
        if first_in_burst {
            self.options.remove(ServerOptions::EXPECT_NOT_WORKING);
        }
        let (host, path) = self.resolve(dir, file);
        let mut ex = Exchange::new(Method::Put, host, path);
        ex.content_length = Some(size);
        ex.headers
            .push(("Content-Type".to_string(), "application/octet-stream".to_string()));
        if self.auth.is_aws() {
            ex.payload_sha256 = file_sha256(local_path).await?;
        }
        ex.expect_continue =
            !self.params.features.no_expect && !self.options.contains(ServerOptions::EXPECT_NOT_WORKING);
        let wait = EXPECT_CONTINUE_WAIT.min(self.params.transfer_timeout);
        let mut hashed_for = None;
        let mut rounds = 0;
        loop {
            if let Some(alg) = self.auth.entity_hash_algorithm() {
                if hashed_for != Some(alg) {
                    ex.entity_hash = Some(file_entity_hash(local_path, alg).await?);
                    hashed_for = Some(alg);
                }
            }
            let req = self.build_request(&ex)?;
            self.send_fresh(&req).await?;
            if !ex.expect_continue {
                return Ok(PutStart::Ready);
            }
            match self.read_head(Some(wait), true).await {
                Ok(h) if h.code == 100 => {
                    self.state = SessionState::RequestSent;
                    return Ok(PutStart::Ready);
                }
                Ok(h) if h.code == 401 => {
                    self.drain_body().await?;
                    rounds += 1;
                    if rounds > MAX_AUTH_ROUNDS {
                        return Err(Error::AuthRejected(401));
                    }
                    self.auth.on_challenge(401, h.www_authenticate())?;
                    // The unsent body would be read as the next request.
                    self.transport = None;
                }
                Ok(h) => {
                    self.drain_body().await?;
                    self.transport = None;
                    self.state = SessionState::Closed;
                    return Ok(PutStart::Status(h.code));
                }
                Err(Error::Timeout(_)) => {
                    tracing::debug!(host = %self.params.host, "no 100 Continue, sending body");
                    self.options.insert(ServerOptions::EXPECT_NOT_WORKING);
                    self.state = SessionState::RequestSent;
                    return Ok(PutStart::Ready);
                }
                Err(Error::ConnectionReset) => {
                    self.reconnect().await?;
                    return Err(Error::ConnectionReopened);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Send PUT body bytes.
    pub async fn write(&mut self, data: &[u8]) -> Result<()> {
        let t = self.transport.as_mut().ok_or(Error::NotConnected)?;
        t.write_all(data).await
    }

    /// Read the final response of a PUT.
    pub async fn put_response(&mut self) -> Result<PutReply> {
        let head = self.read_head(None, false).await?;
        self.drain_body().await?;
        match head.code {
            401 => {
                self.auth.on_challenge(401, head.www_authenticate())?;
                Ok(PutReply::AuthRequired)
            }
            code if head.is_success() => {
                self.auth.on_success();
                Ok(PutReply::Done {
                    status: code,
                    etag: head.etag(),
                })
            }
            code => Ok(PutReply::Status(code)),
        }
    }

    /// DELETE `dir/file`.
    pub async fn del(&mut self, dir: &str, file: &str) -> Result<()> {
        let (host, path) = self.resolve(dir, file);
        let head = self.round_trip(&Exchange::new(Method::Delete, host, path)).await?;
        self.drain_body().await?;
        if head.is_success() {
            Ok(())
        } else {
            Err(Error::DeleteRemoteFailed {
                file: file.to_string(),
                code: head.code,
            })
        }
    }

    /// OPTIONS on `dir`; updates the option bitmap from `Allow`.
    pub async fn options(&mut self, dir: &str) -> Result<ServerOptions> {
        let (host, path) = self.resolve(dir, "");
        let head = self.round_trip(&Exchange::new(Method::Options, host, path)).await?;
        self.drain_body().await?;
        if head.is_success() {
            if let Some(allow) = head.header("allow") {
                let keep = self.options.0 & ServerOptions::EXPECT_NOT_WORKING.0;
                self.options = ServerOptions(ServerOptions::from_allow(allow).0 | keep);
            }
        }
        tracing::debug!(host = %self.params.host, options = self.options.0, status = head.code, "server options");
        Ok(self.options)
    }

    /// Keepalive: HEAD on `/`; any status will do.
    pub async fn noop(&mut self) -> Result<()> {
        let host = self.host_header(None);
        self.round_trip(&Exchange::new(Method::Head, host, "/".to_string()))
            .await?;
        self.drain_body().await
    }

    /// Fetch one listing page of `dir`. S3 requests carry the list query and the current
    /// marker. Fails with `BodyTooLarge` before the buffer grows past the ceiling.
    pub async fn get_listing(&mut self, dir: &str, req: &ListingRequest) -> Result<Vec<u8>> {
        let ex = if self.params.service == Service::S3 {
            let (bucket, prefix) = split_bucket(dir);
            let (host, path) = if bucket.is_empty() {
                (self.host_header(None), "/".to_string())
            } else if self.s3_vhost() {
                (self.host_header(Some(bucket)), "/".to_string())
            } else {
                (self.host_header(None), format!("/{}", path_encode(bucket.as_bytes())))
            };
            let mut ex = Exchange::new(Method::Get, host, path);
            ex.query = s3_list_query(prefix, req, self.marker.as_deref());
            ex
        } else {
            let (host, path) = self.resolve(dir, "");
            Exchange::new(Method::Get, host, path)
        };
        let head = self.round_trip(&ex).await?;
        if head.code == 204 || head.code == 304 {
            self.drain_body().await?;
            return Ok(Vec::new());
        }
        if !head.is_success() {
            self.drain_body().await?;
            return Err(Error::UnexpectedStatus {
                code: head.code,
                reply: Some(head.status_line()),
            });
        }
        let limit = req.max_dir_buffer;
        if let Some(cl) = head.content_length().filter(|&cl| limit > 0 && cl > limit) {
            self.abandon();
            return Err(Error::BodyTooLarge { size: cl, limit });
        }
        let mut body = Vec::with_capacity(head.content_length().unwrap_or(8192).min(1 << 20) as usize);
        let mut buf = vec![0u8; self.params.block_size.max(1024)];
        loop {
            let n = self.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            let size = (body.len() + n) as u64;
            if limit > 0 && size > limit {
                self.abandon();
                return Err(Error::BodyTooLarge { size, limit });
            }
            body.extend_from_slice(&buf[..n]);
        }
        tracing::debug!(dir, bytes = body.len(), "listing received");
        Ok(body)
    }

    /// Drop the connection mid-response; the next request reconnects.
    fn abandon(&mut self) {
        self.transport = None;
        self.parser.reset();
        self.collector.clear();
        self.state = SessionState::Closed;
    }

    /// Close the connection (TLS close_notify included). Never fails.
    pub async fn quit(&mut self) {
        if let Some(mut t) = self.transport.take() {
            t.shutdown().await;
        }
        self.state = SessionState::Closed;
    }
}
