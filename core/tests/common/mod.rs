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

//! In-process HTTP/1.1 server for the integration tests.
//!
//! Every connection is served until the client closes it. The responder sees each request
//! once its body has arrived. A request carrying `Expect: 100-continue` is shown to the
//! responder first with `expecting` set; an empty reply means "send 100 Continue and read
//! the body", anything else is sent instead of reading the body.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

#[derive(Debug, Clone, Default)]
pub struct Request {
    pub method: String,
    pub target: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub expecting: bool,
}

impl Request {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Path without the query.
    pub fn path(&self) -> &str {
        self.target.split('?').next().unwrap_or(&self.target)
    }
}

pub type Responder = dyn Fn(&Request) -> Vec<u8> + Send + Sync;

pub struct MockServer {
    pub port: u16,
    pub requests: Arc<Mutex<Vec<Request>>>,
}

impl MockServer {
    pub async fn start<F>(respond: F) -> MockServer
    where
        F: Fn(&Request) -> Vec<u8> + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let respond: Arc<Responder> = Arc::new(respond);
        let log = requests.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let respond = respond.clone();
                let log = log.clone();
                tokio::spawn(async move {
                    let _ = serve(stream, respond, log).await;
                });
            }
        });
        MockServer { port, requests }
    }

    pub fn url(&self, rest: &str) -> String {
        format!("http://127.0.0.1:{}/{}", self.port, rest)
    }

    /// Requests seen so far, OPTIONS probes left out.
    pub fn seen(&self) -> Vec<Request> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.method != "OPTIONS")
            .cloned()
            .collect()
    }
}

async fn read_head(stream: &mut TcpStream, pending: &mut Vec<u8>) -> std::io::Result<Option<Request>> {
    loop {
        if let Some(end) = pending.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&pending[..end]).into_owned();
            pending.drain(..end + 4);
            let mut lines = head.split("\r\n");
            let mut first = lines.next().unwrap_or("").split(' ');
            let method = first.next().unwrap_or("").to_string();
            let target = first.next().unwrap_or("").to_string();
            let headers = lines
                .filter_map(|l| l.split_once(':'))
                .map(|(n, v)| (n.trim().to_string(), v.trim().to_string()))
                .collect();
            return Ok(Some(Request {
                method,
                target,
                headers,
                ..Request::default()
            }));
        }
        let mut buf = [0u8; 4096];
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Ok(None);
        }
        pending.extend_from_slice(&buf[..n]);
    }
}

async fn read_body(stream: &mut TcpStream, pending: &mut Vec<u8>, len: usize) -> std::io::Result<Vec<u8>> {
    while pending.len() < len {
        let mut buf = [0u8; 4096];
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        pending.extend_from_slice(&buf[..n]);
    }
    let take = len.min(pending.len());
    Ok(pending.drain(..take).collect())
}

async fn serve(
    mut stream: TcpStream,
    respond: Arc<Responder>,
    log: Arc<Mutex<Vec<Request>>>,
) -> std::io::Result<()> {
    let mut pending = Vec::new();
    while let Some(mut req) = read_head(&mut stream, &mut pending).await? {
        let len: usize = req.header("content-length").and_then(|v| v.parse().ok()).unwrap_or(0);
        let expect = req
            .header("expect")
            .is_some_and(|v| v.eq_ignore_ascii_case("100-continue"));
        if expect {
            req.expecting = true;
            let early = respond(&req);
            if !early.is_empty() {
                log.lock().unwrap().push(req.clone());
                stream.write_all(&early).await?;
                continue;
            }
            req.expecting = false;
            stream.write_all(b"HTTP/1.1 100 Continue\r\n\r\n").await?;
        }
        req.body = read_body(&mut stream, &mut pending, len).await?;
        let reply = respond(&req);
        log.lock().unwrap().push(req);
        stream.write_all(&reply).await?;
    }
    Ok(())
}

/// A complete response with `Content-Length` set from `body`.
pub fn response(status: &str, headers: &[(&str, &str)], body: &[u8]) -> Vec<u8> {
    let mut out = format!("HTTP/1.1 {}\r\n", status);
    for (n, v) in headers {
        out.push_str(&format!("{}: {}\r\n", n, v));
    }
    out.push_str(&format!("Content-Length: {}\r\n\r\n", body.len()));
    let mut out = out.into_bytes();
    out.extend_from_slice(body);
    out
}

/// 200 with an `Allow` header, for the OPTIONS probe at connect.
pub fn options_reply() -> Vec<u8> {
    response("200 OK", &[("Allow", "GET, HEAD, PUT, DELETE, OPTIONS")], b"")
}

/// Reply to a HEAD: headers only, `Content-Length` announces `len`.
pub fn head_response(status: &str, len: u64, headers: &[(&str, &str)]) -> Vec<u8> {
    let mut out = format!("HTTP/1.1 {}\r\n", status);
    for (n, v) in headers {
        out.push_str(&format!("{}: {}\r\n", n, v));
    }
    out.push_str(&format!("Content-Length: {}\r\n\r\n", len));
    out.into_bytes()
}
