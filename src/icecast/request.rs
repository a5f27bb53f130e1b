//! Request heads and response status lines
//!
//! Icecast sources speak an HTTP/1.0 dialect: the request line may read
//! `SOURCE /mount ICE/1.0`, which general HTTP parsers refuse. Heads are
//! parsed here directly, for every request the relay answers itself.

use std::fmt;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use url::Url;

use crate::error::{ProtocolError, Result};

/// Base that request targets are resolved against
const TARGET_BASE: &str = "http://localhost";

/// Parsed request line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    pub method: String,
    pub target: String,
    pub version: String,
}

/// Split `METHOD TARGET VERSION`
///
/// Trailing CR/LF is ignored; the version is not interpreted.
pub fn parse_request_line(line: &str) -> std::result::Result<RequestLine, ProtocolError> {
    let trimmed = line.trim_end_matches(['\r', '\n']);
    let mut parts = trimmed.splitn(3, ' ');

    match (parts.next(), parts.next(), parts.next()) {
        (Some(method), Some(target), Some(version))
            if !method.is_empty() && !target.is_empty() && !version.is_empty() =>
        {
            Ok(RequestLine {
                method: method.to_string(),
                target: target.to_string(),
                version: version.to_string(),
            })
        }
        _ => Err(ProtocolError::InvalidRequestLine(trimmed.to_string())),
    }
}

/// Resolve an origin-form request target
pub fn parse_target(target: &str) -> std::result::Result<Url, ProtocolError> {
    if !target.starts_with('/') || target.starts_with("//") {
        return Err(ProtocolError::InvalidUri(target.to_string()));
    }

    Url::parse(TARGET_BASE)
        .and_then(|base| base.join(target))
        .map_err(|_| ProtocolError::InvalidUri(target.to_string()))
}

/// Mount name in the encoded form request paths arrive in
///
/// Query parameters naming a mount are already decoded; request paths are
/// not. Names that do not parse as a path are returned unchanged.
pub fn mount_path(name: &str) -> String {
    match parse_target(name) {
        Ok(url) if url.query().is_none() && url.fragment().is_none() => url.path().to_string(),
        _ => name.to_string(),
    }
}

/// A request line and its headers
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub line: RequestLine,
    pub headers: Vec<(String, String)>,
}

impl RequestHead {
    pub fn method(&self) -> &str {
        &self.line.method
    }

    /// First value of header `name`, matched case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Parsed request target
    pub fn uri(&self) -> std::result::Result<Url, ProtocolError> {
        parse_target(&self.line.target)
    }
}

/// Read a request head, consuming exactly up to and including the blank line
///
/// Bytes after the head stay in `reader`. Fails with `HeadTooLarge` once
/// `max_size` bytes were read without reaching the end of the head.
pub async fn read_request_head<R>(reader: &mut R, max_size: usize) -> Result<RequestHead>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines: Vec<String> = Vec::new();
    let mut line = Vec::with_capacity(256);
    let mut consumed = 0usize;

    loop {
        let budget = max_size.saturating_sub(consumed);
        if budget == 0 {
            return Err(ProtocolError::HeadTooLarge(max_size).into());
        }

        line.clear();
        let n = (&mut *reader)
            .take(budget as u64)
            .read_until(b'\n', &mut line)
            .await?;
        consumed += n;

        if line.last() != Some(&b'\n') {
            if n > 0 && consumed >= max_size {
                return Err(ProtocolError::HeadTooLarge(max_size).into());
            }
            return Err(ProtocolError::IncompleteHead.into());
        }

        let text = String::from_utf8_lossy(&line);
        let text = text.trim_end_matches(['\r', '\n']);
        if text.is_empty() {
            // Leading blank lines are tolerated, like most HTTP servers do
            if lines.is_empty() {
                continue;
            }
            break;
        }
        lines.push(text.to_string());
    }

    parse_head(&lines)
}

fn parse_head(lines: &[String]) -> Result<RequestHead> {
    let (first, rest) = lines
        .split_first()
        .ok_or(ProtocolError::IncompleteHead)?;
    let line = parse_request_line(first)?;

    let mut headers: Vec<(String, String)> = Vec::with_capacity(rest.len());
    for raw in rest {
        // obs-fold: continuation of the previous header
        if raw.starts_with([' ', '\t']) {
            let (_, value) = headers
                .last_mut()
                .ok_or_else(|| ProtocolError::InvalidHeader(raw.clone()))?;
            value.push(' ');
            value.push_str(raw.trim());
            continue;
        }

        let (name, value) = raw
            .split_once(':')
            .ok_or_else(|| ProtocolError::InvalidHeader(raw.clone()))?;
        if name.is_empty() || name.contains(char::is_whitespace) {
            return Err(ProtocolError::InvalidHeader(raw.clone()).into());
        }
        headers.push((name.to_string(), value.trim().to_string()));
    }

    Ok(RequestHead { line, headers })
}

/// Response status codes the relay sends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    BadRequest,
    Unauthorized,
    NotFound,
}

impl Status {
    pub fn code(self) -> u16 {
        match self {
            Status::Ok => 200,
            Status::BadRequest => 400,
            Status::Unauthorized => 401,
            Status::NotFound => 404,
        }
    }

    pub fn reason(self) -> &'static str {
        match self {
            Status::Ok => "OK",
            Status::BadRequest => "Bad Request",
            Status::Unauthorized => "Unauthorized",
            Status::NotFound => "Not Found",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code(), self.reason())
    }
}

/// Encode an `HTTP/1.0` status line, headers and the blank line
pub fn encode_response_head(status: Status, headers: &[(&str, &str)]) -> String {
    let mut head = format!("HTTP/1.0 {}\r\n", status);
    for (name, value) in headers {
        head.push_str(name);
        head.push_str(": ");
        head.push_str(value);
        head.push_str("\r\n");
    }
    head.push_str("\r\n");
    head
}

/// Write a response head and flush it
pub async fn write_response_head<W>(
    writer: &mut W,
    status: Status,
    headers: &[(&str, &str)],
) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer
        .write_all(encode_response_head(status, headers).as_bytes())
        .await?;
    writer.flush().await
}
