//! Raw HTTP/1.1 head parsing
//!
//! The router needs the request head before deciding whether to complete a
//! WebSocket handshake, reject, or tunnel, so heads are read straight off the
//! socket. Bytes read past the end of the head are returned to the caller.

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{RelayError, Result};

/// Upper bound on an HTTP head
pub const MAX_HEAD_BYTES: usize = 16 * 1024;

const MAX_HEADERS: usize = 64;

/// A parsed request line and header block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub method: String,
    pub target: String,
    pub version: u8,
    pub headers: Vec<(String, Vec<u8>)>,
}

/// A parsed status line and header block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    pub version: u8,
    pub code: u16,
    pub reason: String,
    pub headers: Vec<(String, Vec<u8>)>,
}

fn find_header<'a>(headers: &'a [(String, Vec<u8>)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .and_then(|(_, v)| std::str::from_utf8(v).ok())
        .map(str::trim)
}

fn write_headers(out: &mut Vec<u8>, headers: &[(String, Vec<u8>)]) {
    for (name, value) in headers {
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value);
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"\r\n");
}

fn owned_headers(headers: &[httparse::Header<'_>]) -> Vec<(String, Vec<u8>)> {
    headers
        .iter()
        .map(|h| (h.name.to_string(), h.value.to_vec()))
        .collect()
}

impl RequestHead {
    /// Parse a complete head, returning it with the number of bytes consumed
    pub fn parse(buf: &[u8]) -> Result<Option<(Self, usize)>> {
        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut req = httparse::Request::new(&mut headers);
        match req.parse(buf) {
            Ok(httparse::Status::Complete(len)) => Ok(Some((
                Self {
                    method: req.method.unwrap_or_default().to_string(),
                    target: req.path.unwrap_or_default().to_string(),
                    version: req.version.unwrap_or(1),
                    headers: owned_headers(req.headers),
                },
                len,
            ))),
            Ok(httparse::Status::Partial) => Ok(None),
            Err(e) => Err(RelayError::Protocol {
                message: e.to_string(),
            }),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Request target without its query string
    pub fn path(&self) -> &str {
        self.target.split('?').next().unwrap_or("")
    }

    /// First value of a query parameter, percent-decoded
    pub fn query_param(&self, name: &str) -> Option<String> {
        let (_, query) = self.target.split_once('?')?;
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    }

    /// Whether this request asks for a protocol upgrade
    pub fn is_upgrade(&self) -> bool {
        let connection_upgrade = self.header("connection").is_some_and(|v| {
            v.split(',')
                .any(|token| token.trim().eq_ignore_ascii_case("upgrade"))
        });
        connection_upgrade && self.header("upgrade").is_some()
    }

    /// Re-serialize the head for forwarding
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = format!("{} {} HTTP/1.{}\r\n", self.method, self.target, self.version)
            .into_bytes();
        write_headers(&mut out, &self.headers);
        out
    }
}

impl ResponseHead {
    /// Parse a complete head, returning it with the number of bytes consumed
    pub fn parse(buf: &[u8]) -> Result<Option<(Self, usize)>> {
        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut res = httparse::Response::new(&mut headers);
        match res.parse(buf) {
            Ok(httparse::Status::Complete(len)) => Ok(Some((
                Self {
                    version: res.version.unwrap_or(1),
                    code: res.code.unwrap_or(0),
                    reason: res.reason.unwrap_or_default().to_string(),
                    headers: owned_headers(res.headers),
                },
                len,
            ))),
            Ok(httparse::Status::Partial) => Ok(None),
            Err(e) => Err(RelayError::Protocol {
                message: e.to_string(),
            }),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    pub fn is_switching_protocols(&self) -> bool {
        self.code == 101
    }

    pub fn content_length(&self) -> Option<u64> {
        self.header("content-length")?.parse().ok()
    }

    /// Re-serialize the status line and headers
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out =
            format!("HTTP/1.{} {} {}\r\n", self.version, self.code, self.reason).into_bytes();
        write_headers(&mut out, &self.headers);
        out
    }
}

/// Read from `stream` until `parse` reports a complete head
///
/// Returns the head and any bytes read beyond it.
async fn read_head_with<S, T, F>(stream: &mut S, parse: F) -> Result<(T, Vec<u8>)>
where
    S: AsyncRead + Unpin,
    F: Fn(&[u8]) -> Result<Option<(T, usize)>>,
{
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(RelayError::Protocol {
                message: "connection closed before end of head".to_string(),
            });
        }
        buf.extend_from_slice(&chunk[..n]);

        if let Some((head, len)) = parse(&buf)? {
            return Ok((head, buf.split_off(len)));
        }
        if buf.len() > MAX_HEAD_BYTES {
            return Err(RelayError::Protocol {
                message: format!("head exceeds {} bytes", MAX_HEAD_BYTES),
            });
        }
    }
}

pub async fn read_request_head<S: AsyncRead + Unpin>(
    stream: &mut S,
) -> Result<(RequestHead, Vec<u8>)> {
    read_head_with(stream, RequestHead::parse).await
}

pub async fn read_response_head<S: AsyncRead + Unpin>(
    stream: &mut S,
) -> Result<(ResponseHead, Vec<u8>)> {
    read_head_with(stream, ResponseHead::parse).await
}

/// Bare status response used for rejections and gateway failures
pub fn status_only(code: u16, reason: &str) -> String {
    format!("HTTP/1.1 {} {}\r\nConnection: close\r\n\r\n", code, reason)
}
