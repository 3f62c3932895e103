/*
 * connection.rs
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

//! One TCP or TLS stream plus its read buffer. Every read and write is bounded by the
//! transfer timeout.

use bytes::BytesMut;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::client::TlsStream as TokioTlsStream;

use crate::error::{Error, Result};

/// Unified stream: plain TCP or TLS. Implements AsyncRead + AsyncWrite.
pub enum HttpStream {
    Plain(TcpStream),
    Tls(Box<TokioTlsStream<TcpStream>>),
}

impl HttpStream {
    pub fn is_tls(&self) -> bool {
        matches!(self, HttpStream::Tls(_))
    }
}

impl AsyncRead for HttpStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match &mut *self {
            HttpStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            HttpStream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for HttpStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match &mut *self {
            HttpStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            HttpStream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut *self {
            HttpStream::Plain(s) => Pin::new(s).poll_flush(cx),
            HttpStream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut *self {
            HttpStream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            HttpStream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// Connected stream with its read buffer. `fill` appends to the buffer; the response parser
/// consumes from it.
pub struct Transport {
    stream: HttpStream,
    pub(crate) read_buf: BytesMut,
    peer: String,
    limit: Duration,
    read_size: usize,
}

impl Transport {
    pub fn new(stream: HttpStream, peer: String, limit: Duration, read_size: usize) -> Self {
        Self {
            stream,
            read_buf: BytesMut::with_capacity(read_size.max(8192)),
            peer,
            limit,
            read_size: read_size.max(1024),
        }
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn is_tls(&self) -> bool {
        self.stream.is_tls()
    }

    pub fn set_timeout(&mut self, limit: Duration) {
        self.limit = limit;
    }

    pub fn timeout(&self) -> Duration {
        self.limit
    }

    /// Write all of `data` and flush.
    pub async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        let secs = self.limit.as_secs();
        let stream = &mut self.stream;
        timeout(self.limit, async {
            stream.write_all(data).await?;
            stream.flush().await?;
            Ok::<(), io::Error>(())
        })
        .await
        .map_err(|_| Error::Timeout(secs))?
        .map_err(|e| Error::from_socket(e, &self.peer))
    }

    /// Read once into the buffer. Returns the byte count; 0 means the peer closed.
    pub async fn fill(&mut self) -> Result<usize> {
        self.fill_within(self.limit).await
    }

    /// As `fill` with an explicit bound (used while waiting for `100 Continue`).
    pub async fn fill_within(&mut self, limit: Duration) -> Result<usize> {
        self.read_buf.reserve(self.read_size);
        match timeout(limit, self.stream.read_buf(&mut self.read_buf)).await {
            Ok(Ok(n)) => Ok(n),
            Ok(Err(e)) => Err(Error::from_socket(e, &self.peer)),
            Err(_) => Err(Error::Timeout(limit.as_secs())),
        }
    }

    /// Close the write side (TLS close_notify); errors are ignored.
    pub async fn shutdown(&mut self) {
        let _ = timeout(Duration::from_secs(5), self.stream.shutdown()).await;
    }
}
