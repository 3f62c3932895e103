/*
 * parser.rs
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

//! HTTP/1.1 response push parser: status line, headers, body (Content-Length, chunked or
//! until close).

use bytes::Buf;
use bytes::BytesMut;

use crate::config::limits;
use crate::error::{Error, Result};

/// Callback for HTTP/1.1 response events.
pub trait H1ResponseHandler {
    fn status(&mut self, version_minor: u8, code: u16, reason: &str);
    fn header(&mut self, name: &str, value: &str);
    fn body_chunk(&mut self, data: &[u8]);
    /// A chunk size line was read (chunked framing only).
    fn chunk_start(&mut self, _size: u64) {}
    fn trailer(&mut self, _name: &str, _value: &str) {}
    fn complete(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseState {
    Idle,
    StatusLine,
    Headers,
    /// Headers done; the session must call set_body_mode().
    HeadersComplete,
    Body,
    ChunkSize,
    ChunkData,
    ChunkDataEnd,
    ChunkTrailer,
}

/// Push parser for one HTTP/1.1 response. Feed bytes via `receive`; the handler is invoked
/// as complete tokens are parsed.
pub struct ResponseParser {
    state: ParseState,
    /// Content-Length when known (-1 for chunked or read-until-close).
    content_length: i64,
    bytes_received: i64,
    chunk_remaining: u64,
    max_chunk: u64,
    head_bytes: usize,
}

impl ResponseParser {
    pub fn new() -> Self {
        Self {
            state: ParseState::StatusLine,
            content_length: -1,
            bytes_received: 0,
            chunk_remaining: 0,
            max_chunk: limits::MAX_CHUNK_SIZE,
            head_bytes: 0,
        }
    }

    pub fn state(&self) -> ParseState {
        self.state
    }

    pub fn is_complete(&self) -> bool {
        self.state == ParseState::Idle
    }

    /// Body runs until the peer closes.
    pub fn reads_until_close(&self) -> bool {
        self.state == ParseState::Body && self.content_length < 0
    }

    pub fn reset(&mut self) {
        self.state = ParseState::StatusLine;
        self.content_length = -1;
        self.bytes_received = 0;
        self.chunk_remaining = 0;
        self.head_bytes = 0;
    }

    /// Find CRLF in buf; return the offset of the CR, or None.
    fn find_crlf(buf: &[u8]) -> Option<usize> {
        buf.windows(2).position(|w| w == b"\r\n")
    }

    fn take_line(&mut self, buf: &mut BytesMut) -> Result<Option<String>> {
        let Some(line_end) = Self::find_crlf(buf) else {
            if self.head_bytes + buf.len() > limits::MAX_RESPONSE_HEAD {
                return Err(Error::MalformedHeader("response head too long".into()));
            }
            return Ok(None);
        };
        self.head_bytes += line_end + 2;
        if self.head_bytes > limits::MAX_RESPONSE_HEAD {
            return Err(Error::MalformedHeader("response head too long".into()));
        }
        let line = buf.split_to(line_end + 2);
        Ok(Some(String::from_utf8_lossy(&line[..line_end]).into_owned()))
    }

    /// Consume and parse as much as possible from buf. Partial data remains in buf.
    pub fn receive<H: H1ResponseHandler>(&mut self, buf: &mut BytesMut, handler: &mut H) -> Result<()> {
        while !buf.is_empty() {
            match self.state {
                ParseState::StatusLine => {
                    let Some(line) = self.take_line(buf)? else {
                        return Ok(());
                    };
                    if line.is_empty() {
                        // Stray CRLF between responses.
                        continue;
                    }
                    let (minor, code, reason) = parse_status_line(&line)?;
                    handler.status(minor, code, reason);
                    self.state = ParseState::Headers;
                }
                ParseState::Headers => {
                    let Some(line) = self.take_line(buf)? else {
                        return Ok(());
                    };
                    if line.is_empty() {
                        self.state = ParseState::HeadersComplete;
                        return Ok(());
                    }
                    match line.find(':') {
                        Some(colon) => handler.header(line[..colon].trim(), line[colon + 1..].trim()),
                        None => return Err(Error::MalformedHeader(line)),
                    }
                }
                ParseState::HeadersComplete => return Ok(()),
                ParseState::Body => {
                    if self.content_length >= 0 {
                        let remaining = (self.content_length - self.bytes_received) as usize;
                        let to_read = remaining.min(buf.len());
                        if to_read > 0 {
                            let chunk = buf.split_to(to_read);
                            handler.body_chunk(&chunk);
                            self.bytes_received += to_read as i64;
                        }
                        if self.bytes_received >= self.content_length {
                            handler.complete();
                            self.state = ParseState::Idle;
                        }
                    } else {
                        let chunk = buf.split_to(buf.len());
                        handler.body_chunk(&chunk);
                        self.bytes_received += chunk.len() as i64;
                    }
                    return Ok(());
                }
                ParseState::ChunkSize => {
                    let Some(line_end) = Self::find_crlf(buf) else {
                        if buf.len() > 1024 {
                            return Err(Error::MalformedChunk("chunk size line too long".into()));
                        }
                        return Ok(());
                    };
                    let line = buf.split_to(line_end + 2);
                    let text = String::from_utf8_lossy(&line[..line_end]);
                    let size = parse_chunk_size(&text, self.max_chunk)?;
                    handler.chunk_start(size);
                    if size == 0 {
                        self.state = ParseState::ChunkTrailer;
                    } else {
                        self.chunk_remaining = size;
                        self.state = ParseState::ChunkData;
                    }
                }
                ParseState::ChunkData => {
                    let to_read = (self.chunk_remaining.min(buf.len() as u64)) as usize;
                    let chunk = buf.split_to(to_read);
                    handler.body_chunk(&chunk);
                    self.chunk_remaining -= to_read as u64;
                    self.bytes_received += to_read as i64;
                    if self.chunk_remaining == 0 {
                        self.state = ParseState::ChunkDataEnd;
                    }
                }
                ParseState::ChunkDataEnd => {
                    if buf.len() < 2 {
                        return Ok(());
                    }
                    if &buf[..2] != b"\r\n" {
                        return Err(Error::MalformedChunk("missing CRLF after chunk data".into()));
                    }
                    buf.advance(2);
                    self.state = ParseState::ChunkSize;
                }
                ParseState::ChunkTrailer => {
                    let Some(line_end) = Self::find_crlf(buf) else {
                        return Ok(());
                    };
                    if line_end == 0 {
                        buf.advance(2);
                        handler.complete();
                        self.state = ParseState::Idle;
                    } else {
                        let line = buf.split_to(line_end + 2);
                        let text = String::from_utf8_lossy(&line[..line_end]);
                        if let Some(colon) = text.find(':') {
                            handler.trailer(text[..colon].trim(), text[colon + 1..].trim());
                        }
                    }
                }
                ParseState::Idle => return Ok(()),
            }
        }
        Ok(())
    }

    /// Called after headers are received (state HeadersComplete). `None` length without
    /// chunking reads until the peer closes.
    pub fn set_body_mode(&mut self, content_length: Option<u64>, chunked: bool) {
        if self.state != ParseState::HeadersComplete {
            return;
        }
        self.bytes_received = 0;
        if chunked {
            self.content_length = -1;
            self.state = ParseState::ChunkSize;
        } else if let Some(cl) = content_length {
            self.content_length = cl as i64;
            self.state = if cl == 0 { ParseState::Idle } else { ParseState::Body };
        } else {
            self.content_length = -1;
            self.state = ParseState::Body;
        }
    }

    /// The response carries no body (HEAD, 1xx, 204, 304).
    pub fn set_no_body(&mut self) {
        if self.state == ParseState::HeadersComplete {
            self.state = ParseState::Idle;
        }
    }

    /// The peer closed the connection. Completes a read-until-close body; anything else
    /// is a truncated response.
    pub fn on_close<H: H1ResponseHandler>(&mut self, handler: &mut H) -> Result<()> {
        match self.state {
            ParseState::Idle => Ok(()),
            ParseState::Body if self.content_length < 0 => {
                handler.complete();
                self.state = ParseState::Idle;
                Ok(())
            }
            _ => Err(Error::ConnectionReset),
        }
    }

    /// Body bytes delivered so far.
    pub fn body_bytes(&self) -> u64 {
        self.bytes_received.max(0) as u64
    }
}

impl Default for ResponseParser {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_status_line(line: &str) -> Result<(u8, u16, &str)> {
    let bad = || Error::MalformedHeader(format!("bad status line `{}`", line));
    let rest = line.strip_prefix("HTTP/1.").ok_or_else(bad)?;
    let mut parts = rest.splitn(3, ' ');
    let minor = parts
        .next()
        .and_then(|m| m.parse::<u8>().ok())
        .ok_or_else(bad)?;
    let code = parts
        .next()
        .filter(|c| c.len() == 3)
        .and_then(|c| c.parse::<u16>().ok())
        .ok_or_else(bad)?;
    Ok((minor, code, parts.next().unwrap_or("").trim()))
}

fn parse_chunk_size(line: &str, max: u64) -> Result<u64> {
    let hex = line.split(';').next().unwrap_or("").trim();
    if hex.is_empty() || !hex.bytes().all(|c| c.is_ascii_hexdigit()) {
        return Err(Error::MalformedChunk(format!("bad chunk size `{}`", line)));
    }
    let digits = hex.trim_start_matches('0');
    if digits.len() > 16 {
        return Err(Error::ChunkOverflow { size: u64::MAX, limit: max });
    }
    let size = u64::from_str_radix(if digits.is_empty() { "0" } else { digits }, 16)
        .map_err(|_| Error::MalformedChunk(format!("bad chunk size `{}`", line)))?;
    if size > max {
        return Err(Error::ChunkOverflow { size, limit: max });
    }
    Ok(size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Rec {
        status: Option<(u8, u16, String)>,
        headers: Vec<(String, String)>,
        body: Vec<u8>,
        chunks: Vec<u64>,
        done: bool,
    }

    impl H1ResponseHandler for Rec {
        fn status(&mut self, minor: u8, code: u16, reason: &str) {
            self.status = Some((minor, code, reason.to_string()));
        }
        fn header(&mut self, name: &str, value: &str) {
            self.headers.push((name.into(), value.into()));
        }
        fn body_chunk(&mut self, data: &[u8]) {
            self.body.extend_from_slice(data);
        }
        fn chunk_start(&mut self, size: u64) {
            self.chunks.push(size);
        }
        fn complete(&mut self) {
            self.done = true;
        }
    }

    fn feed(p: &mut ResponseParser, r: &mut Rec, bytes: &[u8]) {
        let mut buf = BytesMut::from(bytes);
        p.receive(&mut buf, r).unwrap();
        if p.state() == ParseState::HeadersComplete {
            p.set_body_mode(None, true);
            p.receive(&mut buf, r).unwrap();
        }
        assert!(buf.is_empty());
    }

    #[test]
    fn chunked_hello() {
        let mut p = ResponseParser::new();
        let mut r = Rec::default();
        feed(&mut p, &mut r, b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n0\r\n\r\n");
        assert_eq!(r.status, Some((1, 200, "OK".into())));
        assert_eq!(r.body, b"hello");
        assert_eq!(r.chunks, vec![5, 0]);
        assert!(r.done);
        assert!(p.is_complete());
    }

    #[test]
    fn byte_at_a_time() {
        let msg = b"HTTP/1.1 200 OK\r\nContent-Length: 3\r\n\r\nabc";
        let mut p = ResponseParser::new();
        let mut r = Rec::default();
        let mut buf = BytesMut::new();
        for &b in msg.iter() {
            buf.extend_from_slice(&[b]);
            p.receive(&mut buf, &mut r).unwrap();
            if p.state() == ParseState::HeadersComplete {
                p.set_body_mode(Some(3), false);
            }
        }
        assert_eq!(r.body, b"abc");
        assert!(p.is_complete());
    }

    #[test]
    fn bad_chunk_size() {
        let mut p = ResponseParser::new();
        let mut r = Rec::default();
        let mut buf = BytesMut::from(&b"HTTP/1.1 200 OK\r\n\r\nzz\r\n"[..]);
        p.receive(&mut buf, &mut r).unwrap();
        p.set_body_mode(None, true);
        assert!(matches!(p.receive(&mut buf, &mut r), Err(Error::MalformedChunk(_))));
        assert!(matches!(
            parse_chunk_size("1ffffffffffffffff", u64::MAX),
            Err(Error::ChunkOverflow { .. })
        ));
        assert!(matches!(parse_chunk_size("100", 0xff), Err(Error::ChunkOverflow { size: 256, .. })));
        assert_eq!(parse_chunk_size("1A;ext=1", 1 << 20).unwrap(), 26);
    }

    #[test]
    fn read_until_close() {
        let mut p = ResponseParser::new();
        let mut r = Rec::default();
        let mut buf = BytesMut::from(&b"HTTP/1.0 200 OK\r\n\r\npartial"[..]);
        p.receive(&mut buf, &mut r).unwrap();
        p.set_body_mode(None, false);
        p.receive(&mut buf, &mut r).unwrap();
        assert!(p.reads_until_close());
        p.on_close(&mut r).unwrap();
        assert!(r.done);
        assert_eq!(r.body, b"partial");
    }

    #[test]
    fn truncated_length_body_is_reset() {
        let mut p = ResponseParser::new();
        let mut r = Rec::default();
        let mut buf = BytesMut::from(&b"HTTP/1.1 200 OK\r\n\r\nab"[..]);
        p.receive(&mut buf, &mut r).unwrap();
        p.set_body_mode(Some(10), false);
        p.receive(&mut buf, &mut r).unwrap();
        assert!(matches!(p.on_close(&mut r), Err(Error::ConnectionReset)));
    }

    #[test]
    fn malformed_status_line() {
        let mut p = ResponseParser::new();
        let mut r = Rec::default();
        let mut buf = BytesMut::from(&b"ICY 200 OK\r\n"[..]);
        assert!(matches!(p.receive(&mut buf, &mut r), Err(Error::MalformedHeader(_))));
    }
}
