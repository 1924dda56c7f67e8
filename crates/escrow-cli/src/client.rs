// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Minimal HTTP/1.1 client for the escrow API.
//
// One request per connection (`Connection: close`), plain `http://` only.
// The whole exchange, connect included, runs under a single timeout.

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use escrow_core::error::{EscrowError, Result};
use escrow_core::types::{PasswordInfo, RecoveryKeyInfo};
use escrow_core::wire::{RotateRequest, UpdateKeyRequest, VersionInfo, WriteAck};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

pub const DEFAULT_SERVER: &str = "http://localhost:8080";

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const HTTP_PORT: u16 = 80;

/// A decoded HTTP response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    /// Reason phrase from the status line, possibly empty.
    pub reason: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).trim().to_owned()
    }

    /// Fail with `server <status>: <body>` unless the status is 200.
    pub fn ensure_ok(self) -> Result<Self> {
        if self.status == 200 {
            return Ok(self);
        }
        let status = if self.reason.is_empty() {
            self.status.to_string()
        } else {
            format!("{} {}", self.status, self.reason)
        };
        Err(EscrowError::Http(format!("server {status}: {}", self.text())))
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

/// Client for one escrow server.
#[derive(Debug, Clone)]
pub struct EscrowClient {
    /// `host[:port]` as given, sent in the `Host` header.
    authority: String,
    /// `host:port` passed to `connect`.
    connect_addr: String,
    /// Path prefix from the base URL, without a trailing slash.
    base_path: String,
    authorization: Option<String>,
    timeout: Duration,
}

impl EscrowClient {
    /// Create a client for a base URL such as `http://escrow.corp:8080`.
    pub fn new(server: &str) -> Result<Self> {
        let server = server.trim().trim_end_matches('/');
        let rest = strip_prefix_ignore_case(server, "http://").ok_or_else(|| {
            if strip_prefix_ignore_case(server, "https://").is_some() {
                EscrowError::Config(format!(
                    "{server}: https is not supported, reach the server through plain http"
                ))
            } else {
                EscrowError::Config(format!("{server}: server URL must start with http://"))
            }
        })?;

        let (authority, base_path) = match rest.find('/') {
            Some(i) => (&rest[..i], &rest[i..]),
            None => (rest, ""),
        };
        if authority.is_empty() {
            return Err(EscrowError::Config(format!("{server}: missing host")));
        }

        Ok(Self {
            authority: authority.to_owned(),
            connect_addr: connect_addr(authority),
            base_path: base_path.to_owned(),
            authorization: None,
            timeout: DEFAULT_TIMEOUT,
        })
    }

    pub fn with_basic_auth(mut self, user: &str, pass: &str) -> Self {
        let token = STANDARD.encode(format!("{user}:{pass}"));
        self.authorization = Some(format!("Basic {token}"));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn fetch_password(&self, host: &str) -> Result<PasswordInfo> {
        let path = format!("/api/v1/password/{}", encode_path_segment(host));
        self.request("GET", &path, None).await?.ensure_ok()?.json()
    }

    pub async fn fetch_bde_key(&self, host: &str) -> Result<RecoveryKeyInfo> {
        let path = format!("/api/v1/bde/{}", encode_path_segment(host));
        self.request("GET", &path, None).await?.ensure_ok()?.json()
    }

    pub async fn rotate_password(
        &self,
        host: &str,
        password: &str,
        actor: Option<&str>,
    ) -> Result<WriteAck> {
        let body = RotateRequest {
            host: host.to_owned(),
            password: password.to_owned(),
            actor: actor.map(str::to_owned),
        };
        self.post_json("/api/v1/rotate", &body).await
    }

    pub async fn update_key(&self, host: &str, key: &str, actor: Option<&str>) -> Result<WriteAck> {
        let body = UpdateKeyRequest {
            host: host.to_owned(),
            key: key.to_owned(),
            actor: actor.map(str::to_owned),
        };
        self.post_json("/api/v1/update_key", &body).await
    }

    pub async fn version(&self) -> Result<VersionInfo> {
        self.request("GET", "/version", None).await?.ensure_ok()?.json()
    }

    async fn post_json<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let body = serde_json::to_vec(body)?;
        self.request("POST", path, Some(&body)).await?.ensure_ok()?.json()
    }

    /// Send one request and return the response whatever its status.
    pub async fn request(&self, method: &str, path: &str, body: Option<&[u8]>) -> Result<HttpResponse> {
        debug!(method, path, server = %self.authority, "sending request");
        let raw = self.encode_request(method, path, body);

        let response = tokio::time::timeout(self.timeout, self.exchange(&raw))
            .await
            .map_err(|_| {
                EscrowError::Http(format!(
                    "{method} {path}: no response from {} within {}s",
                    self.authority,
                    self.timeout.as_secs()
                ))
            })??;

        debug!(status = response.status, bytes = response.body.len(), "response received");
        Ok(response)
    }

    fn encode_request(&self, method: &str, path: &str, body: Option<&[u8]>) -> Vec<u8> {
        let mut head = format!(
            "{method} {}{path} HTTP/1.1\r\n\
             Host: {}\r\n\
             User-Agent: escrow-cli/{}\r\n\
             Accept: application/json\r\n\
             Connection: close\r\n",
            self.base_path,
            self.authority,
            env!("CARGO_PKG_VERSION"),
        );
        if let Some(auth) = &self.authorization {
            head.push_str(&format!("Authorization: {auth}\r\n"));
        }
        if let Some(body) = body {
            head.push_str("Content-Type: application/json\r\n");
            head.push_str(&format!("Content-Length: {}\r\n", body.len()));
        }
        head.push_str("\r\n");

        let mut raw = head.into_bytes();
        raw.extend_from_slice(body.unwrap_or_default());
        raw
    }

    async fn exchange(&self, raw: &[u8]) -> Result<HttpResponse> {
        let mut stream = TcpStream::connect(&self.connect_addr)
            .await
            .map_err(|e| EscrowError::Http(format!("connect to {}: {e}", self.connect_addr)))?;

        stream
            .write_all(raw)
            .await
            .map_err(|e| EscrowError::Http(format!("send request: {e}")))?;

        let mut buf = Vec::with_capacity(4096);
        stream
            .read_to_end(&mut buf)
            .await
            .map_err(|e| EscrowError::Http(format!("read response: {e}")))?;

        parse_response(&buf)
    }
}

fn strip_prefix_ignore_case<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    let head = s.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix).then(|| &s[prefix.len()..])
}

/// Append the default port unless the authority already carries one.
fn connect_addr(authority: &str) -> String {
    let has_port = authority
        .rsplit_once(':')
        .is_some_and(|(host, port)| {
            !port.is_empty()
                && port.bytes().all(|b| b.is_ascii_digit())
                && (!host.contains(':') || host.ends_with(']'))
        });
    if has_port {
        authority.to_owned()
    } else {
        format!("{authority}:{HTTP_PORT}")
    }
}

/// Percent-encode everything outside the RFC 3986 unreserved set.
pub fn encode_path_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for b in segment.bytes() {
        if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~') {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{b:02X}"));
        }
    }
    out
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn malformed(what: impl std::fmt::Display) -> EscrowError {
    EscrowError::Http(format!("malformed response: {what}"))
}

/// Parse a complete HTTP/1.1 response read until connection close.
pub fn parse_response(raw: &[u8]) -> Result<HttpResponse> {
    let head_end = find(raw, b"\r\n\r\n").ok_or_else(|| malformed("no header terminator"))?;
    let head = std::str::from_utf8(&raw[..head_end]).map_err(malformed)?;
    let rest = &raw[head_end + 4..];

    let mut lines = head.split("\r\n");
    let status_line = lines.next().unwrap_or_default();
    let mut parts = status_line.splitn(3, ' ');
    let version = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/") {
        return Err(malformed(format!("bad status line {status_line:?}")));
    }
    let status: u16 = parts
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| malformed(format!("bad status line {status_line:?}")))?;
    let reason = parts.next().unwrap_or_default().trim().to_owned();

    let headers: Vec<(String, String)> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_owned(), v.trim().to_owned()))
        .collect();

    let mut response = HttpResponse {
        status,
        reason,
        headers,
        body: Vec::new(),
    };

    let chunked = response
        .header("transfer-encoding")
        .is_some_and(|te| te.to_ascii_lowercase().contains("chunked"));
    response.body = if chunked {
        decode_chunked(rest)?
    } else if let Some(len) = response.header("content-length") {
        let len: usize = len.parse().map_err(|_| malformed("bad content-length"))?;
        rest.get(..len)
            .ok_or_else(|| malformed(format!("body shorter than {len} bytes")))?
            .to_vec()
    } else {
        rest.to_vec()
    };

    Ok(response)
}

fn decode_chunked(mut data: &[u8]) -> Result<Vec<u8>> {
    let mut body = Vec::new();
    loop {
        let line_end = find(data, b"\r\n").ok_or_else(|| malformed("truncated chunk size"))?;
        let size_line = std::str::from_utf8(&data[..line_end]).map_err(malformed)?;
        let size_hex = size_line.split(';').next().unwrap_or_default().trim();
        let size = usize::from_str_radix(size_hex, 16)
            .map_err(|_| malformed(format!("bad chunk size {size_hex:?}")))?;
        data = &data[line_end + 2..];

        if size == 0 {
            return Ok(body);
        }
        let chunk = data
            .get(..size)
            .ok_or_else(|| malformed("truncated chunk"))?;
        body.extend_from_slice(chunk);
        data = data.get(size + 2..).unwrap_or_default();
    }
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;

    use super::*;

    /// Serve exactly one canned response, returning the raw request received.
    async fn one_shot_server(response: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 8192];
            let mut received = Vec::new();
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                received.extend_from_slice(&buf[..n]);
                if n == 0 || complete_request(&received) {
                    break;
                }
            }
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
            String::from_utf8(received).unwrap()
        });
        (format!("http://{addr}"), handle)
    }

    fn complete_request(raw: &[u8]) -> bool {
        let Some(end) = find(raw, b"\r\n\r\n") else {
            return false;
        };
        let head = String::from_utf8_lossy(&raw[..end]).to_ascii_lowercase();
        let len = head
            .lines()
            .find_map(|l| l.strip_prefix("content-length:"))
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(0);
        raw.len() >= end + 4 + len
    }

    #[test]
    fn base_url_parsing() {
        let client = EscrowClient::new("http://escrow.corp:9000/").unwrap();
        assert_eq!(client.authority, "escrow.corp:9000");
        assert_eq!(client.connect_addr, "escrow.corp:9000");
        assert_eq!(client.base_path, "");

        let client = EscrowClient::new("HTTP://localhost/escrow").unwrap();
        assert_eq!(client.connect_addr, "localhost:80");
        assert_eq!(client.base_path, "/escrow");

        let client = EscrowClient::new("http://[::1]").unwrap();
        assert_eq!(client.connect_addr, "[::1]:80");
        let client = EscrowClient::new("http://[::1]:8080").unwrap();
        assert_eq!(client.connect_addr, "[::1]:8080");
    }

    #[test]
    fn rejects_unsupported_urls() {
        assert!(matches!(
            EscrowClient::new("https://escrow.corp"),
            Err(EscrowError::Config(_))
        ));
        assert!(EscrowClient::new("escrow.corp:8080").is_err());
        assert!(EscrowClient::new("http://").is_err());
    }

    #[test]
    fn path_segments_are_escaped() {
        assert_eq!(encode_path_segment("WEB01"), "WEB01");
        assert_eq!(encode_path_segment("web-01.corp_x~"), "web-01.corp_x~");
        assert_eq!(encode_path_segment("a/b c"), "a%2Fb%20c");
        assert_eq!(encode_path_segment("ü"), "%C3%BC");
    }

    #[test]
    fn parses_content_length_body() {
        let raw = b"HTTP/1.1 404 Not Found\r\nContent-Type: application/json\r\nContent-Length: 13\r\n\r\n{\"error\":\"x\"}trailing";
        let resp = parse_response(raw).unwrap();
        assert_eq!(resp.status, 404);
        assert_eq!(resp.reason, "Not Found");
        assert_eq!(resp.header("content-type"), Some("application/json"));
        assert_eq!(resp.body, b"{\"error\":\"x\"}");

        let err = resp.ensure_ok().unwrap_err();
        assert_eq!(err.to_string(), "HTTP error: server 404 Not Found: {\"error\":\"x\"}");
    }

    #[test]
    fn parses_chunked_body() {
        let raw = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n4\r\n{\"a\"\r\n5;ext=1\r\n:\"b\"}\r\n0\r\n\r\n";
        let resp = parse_response(raw).unwrap();
        assert_eq!(resp.body, b"{\"a\":\"b\"}");
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_response(b"not http").is_err());
        assert!(parse_response(b"SMTP 220 hi\r\n\r\n").is_err());
        assert!(parse_response(b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nshort").is_err());
    }

    #[tokio::test]
    async fn fetch_password_round_trip() {
        let (url, server) = one_shot_server(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\n\r\n\
             {\"password\":\"Passw0rd!\",\"rotated_at\":\"2026-01-02T03:04:05Z\",\"actor\":\"alice\"}",
        )
        .await;

        let client = EscrowClient::new(&url).unwrap().with_basic_auth("admin", "hunter2");
        let info = client.fetch_password("WEB 01").await.unwrap();
        assert_eq!(info.password, "Passw0rd!");
        assert_eq!(info.actor, "alice");

        let request = server.await.unwrap();
        assert!(request.starts_with("GET /api/v1/password/WEB%2001 HTTP/1.1\r\n"));
        assert!(request.contains(&format!("Authorization: Basic {}\r\n", STANDARD.encode("admin:hunter2"))));
        assert!(request.contains("Connection: close\r\n"));
    }

    #[tokio::test]
    async fn rotate_sends_json_body() {
        let (url, server) = one_shot_server(
            "HTTP/1.1 200 OK\r\n\r\n\
             {\"status\":\"rotated\",\"hostname\":\"WEB01\",\"actor\":\"bob\"}",
        )
        .await;

        let client = EscrowClient::new(&url).unwrap();
        let ack = client.rotate_password("WEB01", "pw", Some("bob")).await.unwrap();
        assert_eq!(ack.status, WriteAck::ROTATED);

        let request = server.await.unwrap();
        let body = &request[request.find("\r\n\r\n").unwrap() + 4..];
        let sent: RotateRequest = serde_json::from_str(body).unwrap();
        assert_eq!(sent.actor.as_deref(), Some("bob"));
        assert!(request.starts_with("POST /api/v1/rotate HTTP/1.1\r\n"));
    }

    #[tokio::test]
    async fn times_out_on_silent_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _hold = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(socket);
        });

        let client = EscrowClient::new(&format!("http://{addr}"))
            .unwrap()
            .with_timeout(Duration::from_millis(100));
        let err = client.version().await.unwrap_err();
        assert!(err.to_string().contains("no response"), "{err}");
    }
}
