/*
 * http_integration.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * Integration tests for the HTTP session against an in-process server:
 * chunked bodies, ranged resume, S3 paging, Digest retry, PUT with
 * Expect: 100-continue, proxies and closing connections.
 *
 * Run with:
 *   cargo test -p filedist_core --test http_integration
 */

//! HTTP session against the in-process mock server: chunked bodies, ranged resume, S3
//! pagination, digest authentication, PUT with `Expect: 100-continue`, plain and tunnelled
//! proxy connections and `Connection: close`.

mod common;

use common::{head_response, options_reply, response, MockServer, Request};
use filedist_core::listing::{self, ListingOptions};
use filedist_core::protocol::http::{
    ChunkRead, ConnectParams, GetOutcome, HeadOutcome, HttpSession, ListingRequest, Proxy, PutReply, PutStart,
};
use filedist_core::config::ListVersion;
use filedist_core::{Error, Url};

async fn session(url: &str) -> HttpSession {
    let url = Url::parse(url).unwrap();
    HttpSession::connect(ConnectParams::from_url(&url)).await.unwrap()
}

#[tokio::test]
async fn chunked_get() {
    let server = MockServer::start(|req: &Request| match req.method.as_str() {
        "OPTIONS" => options_reply(),
        _ => b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n0\r\n\r\n".to_vec(),
    })
    .await;
    let mut s = session(&server.url("pub/")).await;
    let info = match s.get("pub", "hello.txt", 0).await.unwrap() {
        GetOutcome::Body(info) => info,
        other => panic!("unexpected {:?}", other),
    };
    assert!(info.chunked);
    assert_eq!(info.content_length, None);

    let mut body = Vec::new();
    let mut buf = [0u8; 64];
    loop {
        match s.chunk_read(&mut buf).await.unwrap() {
            ChunkRead::Data(n) => body.extend_from_slice(&buf[..n]),
            ChunkRead::LastChunk => break,
        }
    }
    assert_eq!(body, b"hello");

    // the connection stays usable
    assert!(matches!(s.get("pub", "hello.txt", 0).await.unwrap(), GetOutcome::Body(_)));
    let mut rest = Vec::new();
    loop {
        let n = s.read(&mut buf).await.unwrap();
        if n == 0 {
            break;
        }
        rest.extend_from_slice(&buf[..n]);
    }
    assert_eq!(rest, b"hello");
    assert_eq!(server.seen()[0].path(), "/pub/hello.txt");
}

#[tokio::test]
async fn ranged_resume() {
    let data: Vec<u8> = (0..250u32).map(|i| (i % 251) as u8).collect();
    let served = data.clone();
    let server = MockServer::start(move |req: &Request| match req.method.as_str() {
        "OPTIONS" => options_reply(),
        "HEAD" => head_response("200 OK", 250, &[("Last-Modified", "Fri, 01 Jan 2021 00:00:00 GMT")]),
        _ => {
            let from: usize = req
                .header("range")
                .and_then(|r| r.strip_prefix("bytes="))
                .and_then(|r| r.trim_end_matches('-').parse().ok())
                .unwrap_or(0);
            let range = format!("bytes {}-249/250", from);
            response("206 Partial Content", &[("Content-Range", range.as_str())], &served[from..])
        }
    })
    .await;
    let mut s = session(&server.url("obs/")).await;
    match s.head("obs", "big.bin").await.unwrap() {
        HeadOutcome::Found(info) => {
            assert_eq!(info.size, Some(250));
            assert_eq!(info.mtime, Some(1_609_459_200));
        }
        other => panic!("unexpected {:?}", other),
    }
    let info = match s.get("obs", "big.bin", 100).await.unwrap() {
        GetOutcome::Body(info) => info,
        other => panic!("unexpected {:?}", other),
    };
    assert!(info.partial);
    assert_eq!(info.content_length, Some(150));
    let mut got = Vec::new();
    let mut buf = [0u8; 32];
    loop {
        let n = s.read(&mut buf).await.unwrap();
        if n == 0 {
            break;
        }
        got.extend_from_slice(&buf[..n]);
    }
    assert_eq!(got, &data[100..]);
    let seen = server.seen();
    assert_eq!(seen[1].header("range"), Some("bytes=100-"));
}

const PAGE_ONE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<ListBucketResult><Name>bucket</Name><Prefix>p/</Prefix><KeyCount>1</KeyCount>
<IsTruncated>true</IsTruncated><NextContinuationToken>abc</NextContinuationToken>
<Contents><Key>p/a.bin</Key><LastModified>2021-01-01T00:00:00.000Z</LastModified><ETag>"e1"</ETag><Size>10</Size></Contents>
</ListBucketResult>"#;

const PAGE_TWO: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<ListBucketResult><Name>bucket</Name><Prefix>p/</Prefix><KeyCount>1</KeyCount>
<IsTruncated>false</IsTruncated>
<Contents><Key>p/b.bin</Key><LastModified>2021-01-02T00:00:00.000Z</LastModified><ETag>"e2"</ETag><Size>20</Size></Contents>
</ListBucketResult>"#;

#[tokio::test]
async fn s3_v2_pagination() {
    let server = MockServer::start(|req: &Request| {
        if req.target.contains("continuation-token=abc") {
            response("200 OK", &[("Content-Type", "application/xml")], PAGE_TWO.as_bytes())
        } else {
            response("200 OK", &[("Content-Type", "application/xml")], PAGE_ONE.as_bytes())
        }
    })
    .await;
    let url = Url::parse(&server.url("bucket/p/;service=s3")).unwrap();
    let mut params = ConnectParams::from_url(&url);
    params.features.bucketname_in_path = true;
    let mut s = HttpSession::connect(params).await.unwrap();

    let req = ListingRequest {
        version: ListVersion::V2,
        max_dir_buffer: 0,
        no_delimiter: false,
        keep_path: false,
    };
    let opts = ListingOptions {
        s3_prefix: Some("p/"),
        ..ListingOptions::default()
    };
    let mut names = Vec::new();
    let mut pages = 0;
    loop {
        let body = s.get_listing("bucket/p/", &req).await.unwrap();
        let (entries, summary) = listing::parse_all(&body, &opts).unwrap();
        names.extend(entries.into_iter().map(|e| (e.name, e.size)));
        pages += 1;
        if summary.complete {
            break;
        }
        s.set_marker(summary.marker);
    }
    assert_eq!(pages, 2);
    assert_eq!(names, [("a.bin".to_string(), Some(10)), ("b.bin".to_string(), Some(20))]);

    let seen = server.seen();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].path(), "/bucket");
    assert!(seen[0].target.contains("list-type=2"));
    assert!(!seen[0].target.contains("continuation-token"));
    assert!(seen[1].target.contains("&continuation-token=abc"));
}

#[tokio::test]
async fn digest_retry_after_401() {
    let server = MockServer::start(|req: &Request| match (req.method.as_str(), req.header("authorization")) {
        ("OPTIONS", _) => options_reply(),
        (_, Some(a)) if a.starts_with("Digest ") => response("200 OK", &[], b"secret"),
        _ => response(
            "401 Unauthorized",
            &[("WWW-Authenticate", r#"Digest realm="files", nonce="n0nce", qop="auth""#)],
            b"",
        ),
    })
    .await;
    let mut s = session(&server.url("pub/;auth=digest").replacen("http://", "http://joe:pw@", 1)).await;
    let outcome = s.get("pub", "f.txt", 0).await.unwrap();
    assert!(matches!(outcome, GetOutcome::Body(ref i) if i.status == 200), "{:?}", outcome);
    let mut buf = [0u8; 16];
    let n = s.read(&mut buf).await.unwrap();
    assert_eq!(&buf[..n], b"secret");

    let seen = server.seen();
    assert_eq!(seen.len(), 2);
    assert!(seen[0].header("authorization").is_none());
    let auth = seen[1].header("authorization").unwrap();
    assert!(auth.contains(r#"username="joe""#), "{}", auth);
    assert!(auth.contains(r#"realm="files""#), "{}", auth);
    assert!(auth.contains(r#"uri="/pub/f.txt""#), "{}", auth);
}

#[tokio::test]
async fn put_with_expect_continue() {
    let dir = tempfile::tempdir().unwrap();
    let local = dir.path().join("up.bin");
    std::fs::write(&local, b"payload bytes").unwrap();

    let server = MockServer::start(|req: &Request| match req.method.as_str() {
        "OPTIONS" => options_reply(),
        "PUT" if req.expecting => Vec::new(),
        "PUT" => response("201 Created", &[("ETag", "\"t1\"")], b""),
        _ => response("405 Method Not Allowed", &[], b""),
    })
    .await;
    let mut s = session(&server.url("in/")).await;
    assert_eq!(s.put("in", "up.bin", &local, 13, true).await.unwrap(), PutStart::Ready);
    s.write(b"payload bytes").await.unwrap();
    match s.put_response().await.unwrap() {
        PutReply::Done { status, etag } => {
            assert_eq!(status, 201);
            assert_eq!(etag.map(|t| t.value).as_deref(), Some("t1"));
        }
        other => panic!("unexpected {:?}", other),
    }
    let seen = server.seen();
    assert_eq!(seen[0].header("expect"), Some("100-continue"));
    assert_eq!(seen[0].header("content-length"), Some("13"));
    assert_eq!(seen[0].body, b"payload bytes");
}

async fn read_body(s: &mut HttpSession) -> Vec<u8> {
    let mut body = Vec::new();
    let mut buf = [0u8; 64];
    loop {
        let n = s.read(&mut buf).await.unwrap();
        if n == 0 {
            return body;
        }
        body.extend_from_slice(&buf[..n]);
    }
}

fn via(server: &MockServer, url: &str) -> ConnectParams {
    let mut params = ConnectParams::from_url(&Url::parse(url).unwrap());
    params.proxy = Some(Proxy {
        host: "127.0.0.1".into(),
        port: server.port,
    });
    params
}

#[tokio::test]
async fn plain_http_through_proxy_uses_absolute_targets() {
    let server = MockServer::start(|req: &Request| match req.method.as_str() {
        "OPTIONS" => options_reply(),
        _ => response("200 OK", &[], b"hi"),
    })
    .await;
    let mut s = HttpSession::connect(via(&server, "http://origin.example/pub/")).await.unwrap();
    assert!(matches!(s.get("pub", "a.txt", 0).await.unwrap(), GetOutcome::Body(_)));
    assert_eq!(read_body(&mut s).await, b"hi");

    let get = server.seen().into_iter().find(|r| r.method == "GET").unwrap();
    assert_eq!(get.target, "http://origin.example/pub/a.txt");
    assert_eq!(get.header("host"), Some("origin.example"));
    assert!(server.requests.lock().unwrap().iter().all(|r| r.method != "CONNECT"));
}

#[tokio::test]
async fn tls_through_proxy_tunnels_with_connect() {
    let server = MockServer::start(|req: &Request| match req.method.as_str() {
        "CONNECT" => response("403 Forbidden", &[], b""),
        _ => response("400 Bad Request", &[], b""),
    })
    .await;
    let e = HttpSession::connect(via(&server, "https://secure.example/pub/")).await.err().unwrap();
    assert!(matches!(e, Error::ProxyConnectFailed(ref s) if s.contains("403")), "{e}");
    assert!(e.is_retryable());

    let seen = server.seen();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].method, "CONNECT");
    assert_eq!(seen[0].target, "secure.example:443");
    assert_eq!(seen[0].header("host"), Some("secure.example:443"));
}

#[tokio::test]
async fn closing_request_asks_server_to_close() {
    let server = MockServer::start(|req: &Request| match req.method.as_str() {
        "OPTIONS" => options_reply(),
        _ => response("200 OK", &[], b"data"),
    })
    .await;
    let mut s = session(&server.url("pub/")).await;
    assert!(matches!(s.get("pub", "a", 0).await.unwrap(), GetOutcome::Body(_)));
    assert_eq!(read_body(&mut s).await, b"data");
    assert!(s.is_connected());

    s.set_closing(true);
    assert!(matches!(s.get("pub", "b", 0).await.unwrap(), GetOutcome::Body(_)));
    assert_eq!(read_body(&mut s).await, b"data");
    assert!(!s.is_connected());

    let seen = server.seen();
    assert_eq!(seen[0].header("connection"), Some("keep-alive"));
    assert_eq!(seen[1].header("connection"), Some("close"));
}
