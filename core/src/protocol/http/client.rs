/*
 * client.rs
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

//! Opening a transport: TCP (direct or through a proxy), then TLS when requested.

use std::time::Duration;

use bytes::Buf;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;

use crate::config::TransferFeatures;
use crate::error::{Error, Result};
use crate::net::{http_client_config, server_name, tcp_connect, tls_error, SocketOptions};
use crate::protocol::http::connection::{HttpStream, Transport};

/// HTTP proxy endpoint (`host:port`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proxy {
    pub host: String,
    pub port: u16,
}

impl Proxy {
    /// Parse `host[:port]`; the port defaults to 8080.
    pub fn parse(s: &str) -> Result<Proxy> {
        let s = s.trim().trim_start_matches("http://").trim_end_matches('/');
        let (host, port) = match s.rsplit_once(':') {
            Some((h, p)) if !h.ends_with(':') && !p.contains(']') => {
                let port = p
                    .parse::<u16>()
                    .map_err(|_| Error::Config(format!("bad proxy port in `{}`", s)))?;
                (h, port)
            }
            _ => (s, 8080),
        };
        if host.is_empty() {
            return Err(Error::Config("empty proxy host".into()));
        }
        Ok(Proxy {
            host: host.to_string(),
            port,
        })
    }
}

/// Where and how to open the stream.
pub struct Endpoint<'a> {
    pub host: &'a str,
    pub port: u16,
    pub tls: bool,
    pub proxy: Option<&'a Proxy>,
    pub features: &'a TransferFeatures,
    pub limit: Duration,
    pub read_size: usize,
}

/// Connect to the endpoint. Through a proxy, TLS connections are tunnelled with CONNECT;
/// plain connections talk to the proxy directly (the session then sends absolute-form targets).
pub async fn connect_stream(ep: &Endpoint<'_>) -> Result<Transport> {
    let opts = SocketOptions {
        sndbuf: ep.features.sndbuf_size,
        rcvbuf: ep.features.rcvbuf_size,
    };
    let (tcp, peer) = match ep.proxy {
        Some(proxy) => {
            let mut tcp = tcp_connect(&proxy.host, proxy.port, opts, ep.limit).await?;
            if ep.tls {
                proxy_tunnel(&mut tcp, ep.host, ep.port, ep.limit).await?;
            }
            (tcp, format!("{}:{} via {}:{}", ep.host, ep.port, proxy.host, proxy.port))
        }
        None => (
            tcp_connect(ep.host, ep.port, opts, ep.limit).await?,
            format!("{}:{}", ep.host, ep.port),
        ),
    };
    let stream = if ep.tls {
        let config = http_client_config(
            ep.features.tls_strict_verify,
            ep.features.tls_legacy_renegotiation,
        );
        let connector = TlsConnector::from(config);
        let tls = timeout(ep.limit, connector.connect(server_name(ep.host)?, tcp))
            .await
            .map_err(|_| Error::Timeout(ep.limit.as_secs()))?
            .map_err(tls_error)?;
        tracing::debug!(peer = %peer, "TLS established");
        HttpStream::Tls(Box::new(tls))
    } else {
        HttpStream::Plain(tcp)
    };
    Ok(Transport::new(stream, peer, ep.limit, ep.read_size))
}

/// Issue `CONNECT host:port` and wait for a 2xx.
async fn proxy_tunnel(tcp: &mut TcpStream, host: &str, port: u16, limit: Duration) -> Result<()> {
    let req = format!(
        "CONNECT {host}:{port} HTTP/1.1\r\nHost: {host}:{port}\r\nProxy-Connection: keep-alive\r\n\r\n"
    );
    tracing::trace!(request = %req.trim_end(), "proxy");
    timeout(limit, tcp.write_all(req.as_bytes()))
        .await
        .map_err(|_| Error::Timeout(limit.as_secs()))?
        .map_err(|e| Error::ProxyConnectFailed(e.to_string()))?;
    let mut buf = bytes::BytesMut::with_capacity(1024);
    loop {
        if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&buf[..end]).into_owned();
            buf.advance(end + 4);
            let status = head.lines().next().unwrap_or("");
            let code = status.split_whitespace().nth(1).and_then(|c| c.parse::<u16>().ok());
            tracing::trace!(reply = %status, "proxy");
            return match code {
                Some(c) if (200..300).contains(&c) => Ok(()),
                _ => Err(Error::ProxyConnectFailed(status.to_string())),
            };
        }
        if buf.len() > 16 * 1024 {
            return Err(Error::ProxyConnectFailed("oversized CONNECT reply".into()));
        }
        let n = timeout(limit, tcp.read_buf(&mut buf))
            .await
            .map_err(|_| Error::Timeout(limit.as_secs()))?
            .map_err(|e| Error::ProxyConnectFailed(e.to_string()))?;
        if n == 0 {
            return Err(Error::ProxyConnectFailed("proxy closed the connection".into()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proxy_parse() {
        assert_eq!(
            Proxy::parse("proxy.local:3128").unwrap(),
            Proxy {
                host: "proxy.local".into(),
                port: 3128
            }
        );
        assert_eq!(Proxy::parse("http://p/").unwrap().port, 8080);
        assert!(Proxy::parse("p:notaport").is_err());
        assert!(Proxy::parse("").is_err());
    }

    #[tokio::test]
    async fn tunnel_rejected_by_proxy() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut s, _) = listener.accept().await.unwrap();
            let mut b = [0u8; 512];
            let _ = s.read(&mut b).await;
            let _ = s.write_all(b"HTTP/1.1 403 Forbidden\r\n\r\n").await;
        });
        let proxy = Proxy {
            host: "127.0.0.1".into(),
            port,
        };
        let features = TransferFeatures::default();
        let ep = Endpoint {
            host: "example.org",
            port: 443,
            tls: true,
            proxy: Some(&proxy),
            features: &features,
            limit: Duration::from_secs(5),
            read_size: 4096,
        };
        let e = connect_stream(&ep).await.err().unwrap();
        assert!(matches!(e, Error::ProxyConnectFailed(ref s) if s.contains("403")), "{e}");
    }
}
