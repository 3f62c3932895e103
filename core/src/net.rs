/*
 * net.rs
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

//! TCP and TLS plumbing: socket buffer sizing, root store, strict or lenient certificate
//! verification.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpSocket, TcpStream};
use tokio::time::timeout;
use tokio_rustls::rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use tokio_rustls::rustls::client::ClientConfig;
use tokio_rustls::rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use tokio_rustls::rustls::{DigitallySignedStruct, RootCertStore, SignatureScheme};

use crate::error::{Error, Result};

/// Build a root certificate store: platform native certs first, then webpki-roots as fallback.
fn build_root_store() -> RootCertStore {
    let mut root_store = RootCertStore::empty();
    if let Ok(certs) = rustls_native_certs::load_native_certs() {
        for cert in certs {
            let _ = root_store.add(cert);
        }
    }
    if root_store.is_empty() {
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    }
    root_store
}

/// Verifier used when strict verification is off: the session is encrypted but the peer is
/// not authenticated.
#[derive(Debug)]
struct AcceptAnyCert;

impl ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, tokio_rustls::rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ECDSA_NISTP521_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ED25519,
        ]
    }
}

/// TLS client config for HTTP/1.1. `strict` verifies the chain against the root store.
pub fn http_client_config(strict: bool, legacy_renegotiation: bool) -> Arc<ClientConfig> {
    if legacy_renegotiation {
        tracing::debug!("legacy TLS renegotiation requested; rustls never renegotiates");
    }
    let mut config = if strict {
        ClientConfig::builder()
            .with_root_certificates(build_root_store())
            .with_no_client_auth()
    } else {
        ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCert))
            .with_no_client_auth()
    };
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Arc::new(config)
}

/// Host name or address for SNI.
pub fn server_name(host: &str) -> Result<ServerName<'static>> {
    let bare = host.trim_start_matches('[').trim_end_matches(']');
    ServerName::try_from(bare.to_owned())
        .map_err(|_| Error::TlsHandshakeFailed(format!("invalid server name `{}`", host)))
}

/// Map a handshake failure onto the TLS error kinds.
pub fn tls_error(e: std::io::Error) -> Error {
    let text = e.to_string();
    let invalid_cert = e
        .get_ref()
        .and_then(|inner| inner.downcast_ref::<tokio_rustls::rustls::Error>())
        .is_some_and(|r| matches!(r, tokio_rustls::rustls::Error::InvalidCertificate(_)));
    if invalid_cert {
        Error::TlsCertInvalid(text)
    } else {
        Error::TlsHandshakeFailed(text)
    }
}

/// Socket buffer sizes applied before connecting.
#[derive(Debug, Clone, Copy, Default)]
pub struct SocketOptions {
    pub sndbuf: Option<u32>,
    pub rcvbuf: Option<u32>,
}

/// Resolve `host:port` and connect to the first address that answers within `limit`.
pub async fn tcp_connect(host: &str, port: u16, opts: SocketOptions, limit: Duration) -> Result<TcpStream> {
    let peer = format!("{}:{}", host, port);
    let bare = host.trim_start_matches('[').trim_end_matches(']');
    let addrs: Vec<SocketAddr> = timeout(limit, tokio::net::lookup_host((bare, port)))
        .await
        .map_err(|_| Error::Timeout(limit.as_secs()))?
        .map_err(|e| Error::from_socket(e, &peer))?
        .collect();
    let mut last_err = Error::ConnectionRefused(peer.clone());
    for addr in addrs {
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        };
        let socket = socket.map_err(Error::Io)?;
        if let Some(n) = opts.sndbuf {
            if let Err(e) = socket.set_send_buffer_size(n) {
                tracing::warn!(size = n, error = %e, "could not set socket send buffer");
            }
        }
        if let Some(n) = opts.rcvbuf {
            if let Err(e) = socket.set_recv_buffer_size(n) {
                tracing::warn!(size = n, error = %e, "could not set socket receive buffer");
            }
        }
        match timeout(limit, socket.connect(addr)).await {
            Ok(Ok(stream)) => {
                let _ = stream.set_nodelay(true);
                return Ok(stream);
            }
            Ok(Err(e)) => {
                tracing::debug!(%addr, error = %e, "connect failed");
                last_err = Error::from_socket(e, &peer);
            }
            Err(_) => last_err = Error::Timeout(limit.as_secs()),
        }
    }
    Err(last_err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_names() {
        assert!(server_name("example.org").is_ok());
        assert!(server_name("[::1]").is_ok());
        assert!(server_name("127.0.0.1").is_ok());
        assert!(matches!(server_name("bad name"), Err(Error::TlsHandshakeFailed(_))));
    }

    #[test]
    fn both_configs_build() {
        let strict = http_client_config(true, false);
        assert_eq!(strict.alpn_protocols, vec![b"http/1.1".to_vec()]);
        let lenient = http_client_config(false, true);
        assert_eq!(lenient.alpn_protocols.len(), 1);
    }

    #[tokio::test]
    async fn refused_port_maps_to_refused() {
        let l = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = l.local_addr().unwrap().port();
        drop(l);
        let e = tcp_connect("127.0.0.1", port, SocketOptions::default(), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(e, Error::ConnectionRefused(_)), "{e}");
    }
}
