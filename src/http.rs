// Copyright (c) 2019 Parity Technologies (UK) Ltd.
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! A minimal HTTP/1.1 request/response codec, just enough to parse and
//! serialize the opening handshake (RFC 6455 §4) and its rejection
//! responses.

use crate::buffer::Parsing;
use std::fmt;
use unicase::Ascii;

/// How many header lines `httparse` will accept per message (spec §4.B: "at
/// most 256 header fields").
const MAX_HEADERS: usize = 256;

/// Maximum length, in bytes, of the request/status line or any one header
/// line, excluding the terminating CRLF (spec §4.B: "each line ≤ 8192 bytes").
const MAX_LINE_LEN: usize = 8192;

/// Scan `buf` for any request/status/header line exceeding [`MAX_LINE_LEN`],
/// stopping at the blank line that terminates the header block (the body
/// that may follow is arbitrary bytes, not CRLF-delimited lines).
///
/// This runs ahead of `httparse`, which happily keeps buffering an
/// unterminated line of any length; without this check a line that never
/// gets its CRLF would make the parser wait for more bytes forever instead
/// of failing per spec.
fn check_line_lengths(buf: &[u8]) -> Result<(), Error> {
    let mut start = 0;
    loop {
        match buf[start ..].iter().position(|&b| b == b'\n') {
            None => {
                if buf.len() - start > MAX_LINE_LEN {
                    return Err(Error::LineTooLong);
                }
                return Ok(());
            }
            Some(rel) => {
                let end = start + rel;
                if end - start > MAX_LINE_LEN {
                    return Err(Error::LineTooLong);
                }
                let blank = end == start || (end == start + 1 && buf[start] == b'\r');
                start = end + 1;
                if blank {
                    return Ok(());
                }
            }
        }
    }
}

/// Case-insensitive, order-preserving, multi-valued header collection.
///
/// Repeated header lines (as `Sec-WebSocket-Extensions` and
/// `Sec-WebSocket-Protocol` commonly are) are kept as separate entries
/// rather than being pre-joined on a comma, so callers can decide how to
/// interpret repetition themselves.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>
}

impl Headers {
    pub fn new() -> Self {
        Headers { entries: Vec::new() }
    }

    /// Append a header line, keeping any existing lines with the same name.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.entries.push((name.into(), value.into()));
        self
    }

    /// The first value for `name`, if any.
    pub fn get(&self, name: &str) -> Option<&str> {
        let key = Ascii::new(name);
        self.entries.iter().find(|(n, _)| Ascii::new(n.as_str()) == key).map(|(_, v)| v.as_str())
    }

    /// All values for `name`, in the order they appeared.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> {
        let key = Ascii::new(name);
        self.entries.iter().filter(move |(n, _)| Ascii::new(n.as_str()) == key).map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Does `name`'s first value equal `expected`, ignoring ASCII case?
    pub fn equals(&self, name: &str, expected: &str) -> bool {
        self.get(name).map_or(false, |v| Ascii::new(v) == Ascii::new(expected))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }
}

/// A parsed or to-be-serialized HTTP/1.1 request line and headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// The request method, e.g. `"GET"`.
    pub method: String,
    /// The request target (path and, if present, query string).
    pub path: String,
    /// The request headers.
    pub headers: Headers
}

/// A parsed or to-be-serialized HTTP/1.1 status line, headers and body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// The status code, e.g. `101`.
    pub status_code: u16,
    /// The status line's reason phrase, e.g. `"Switching Protocols"`.
    pub reason_phrase: String,
    /// The response headers.
    pub headers: Headers,
    /// The response body, read per `Content-Length` (empty unless one was
    /// present).
    pub body: Vec<u8>
}

impl Response {
    pub fn new(status_code: u16) -> Self {
        let reason_phrase = http::StatusCode::from_u16(status_code)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or("")
            .to_string();
        Response { status_code, reason_phrase, headers: Headers::new(), body: Vec::new() }
    }
}

fn content_length(headers: &Headers) -> Result<usize, Error> {
    match headers.get("Content-Length") {
        None => Ok(0),
        Some(v) => v.trim().parse().map_err(|_| Error::InvalidHeaderValue("Content-Length", v.to_string()))
    }
}

/// Parse as much of an HTTP/1.1 request as is available in `buf`.
pub fn parse_request(buf: &[u8]) -> Result<Parsing<Request>, Error> {
    check_line_lengths(buf)?;
    let mut header_buf = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut parsed = httparse::Request::new(&mut header_buf);
    let offset = match parsed.parse(buf).map_err(Error::Malformed)? {
        httparse::Status::Complete(n) => n,
        httparse::Status::Partial => return Ok(Parsing::NeedMore(0))
    };
    let method = parsed.method.ok_or(Error::MissingRequestLine)?.to_string();
    let path = parsed.path.ok_or(Error::MissingRequestLine)?.to_string();
    if parsed.version != Some(1) {
        return Err(Error::UnsupportedVersion)
    }
    let mut headers = Headers::new();
    for h in parsed.headers.iter() {
        headers.append(h.name.to_string(), std::str::from_utf8(h.value)?.to_string());
    }
    Ok(Parsing::Done { value: Request { method, path, headers }, offset })
}

/// Parse as much of an HTTP/1.1 response (status line, headers, and a
/// `Content-Length`-bounded body if any) as is available in `buf`.
pub fn parse_response(buf: &[u8]) -> Result<Parsing<Response>, Error> {
    check_line_lengths(buf)?;
    let mut header_buf = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut parsed = httparse::Response::new(&mut header_buf);
    let header_offset = match parsed.parse(buf).map_err(Error::Malformed)? {
        httparse::Status::Complete(n) => n,
        httparse::Status::Partial => return Ok(Parsing::NeedMore(0))
    };
    if parsed.version != Some(1) {
        return Err(Error::UnsupportedVersion)
    }
    let status_code = parsed.code.ok_or(Error::MissingRequestLine)?;
    let reason_phrase = parsed.reason.unwrap_or("").to_string();
    let mut headers = Headers::new();
    for h in parsed.headers.iter() {
        headers.append(h.name.to_string(), std::str::from_utf8(h.value)?.to_string());
    }
    let body_len = content_length(&headers)?;
    if buf.len() < header_offset + body_len {
        return Ok(Parsing::NeedMore(header_offset + body_len - buf.len()))
    }
    let body = buf[header_offset .. header_offset + body_len].to_vec();
    Ok(Parsing::Done { value: Response { status_code, reason_phrase, headers, body }, offset: header_offset + body_len })
}

/// Serialize a request line, headers and (empty) body.
pub fn encode_request(req: &Request) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(req.method.as_bytes());
    out.push(b' ');
    out.extend_from_slice(req.path.as_bytes());
    out.extend_from_slice(b" HTTP/1.1\r\n");
    for (name, value) in req.headers.iter() {
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"\r\n");
    out
}

/// Serialize a status line, headers and body.
pub fn encode_response(resp: &Response) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"HTTP/1.1 ");
    out.extend_from_slice(resp.status_code.to_string().as_bytes());
    out.push(b' ');
    out.extend_from_slice(resp.reason_phrase.as_bytes());
    out.extend_from_slice(b"\r\n");
    for (name, value) in resp.headers.iter() {
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(&resp.body);
    out
}

/// Errors raised while parsing an HTTP/1.1 message.
#[derive(Debug)]
pub enum Error {
    Malformed(httparse::Error),
    MissingRequestLine,
    UnsupportedVersion,
    InvalidHeaderValue(&'static str, String),
    Utf8(std::str::Utf8Error),
    LineTooLong
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Malformed(e) => write!(f, "malformed HTTP message: {}", e),
            Error::MissingRequestLine => f.write_str("missing request/status line"),
            Error::UnsupportedVersion => f.write_str("HTTP version was not 1.1"),
            Error::InvalidHeaderValue(name, value) => write!(f, "invalid {} header: {}", name, value),
            Error::Utf8(e) => write!(f, "header value not valid UTF-8: {}", e),
            Error::LineTooLong => write!(f, "line exceeds {} bytes", MAX_LINE_LEN)
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Malformed(e) => Some(e),
            Error::Utf8(e) => Some(e),
            _ => None
        }
    }
}

impl From<std::str::Utf8Error> for Error {
    fn from(e: std::str::Utf8Error) -> Self {
        Error::Utf8(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_are_case_insensitive_and_ordered() {
        let mut h = Headers::new();
        h.append("Sec-WebSocket-Extensions", "permessage-deflate");
        h.append("sec-websocket-extensions", "foo; bar");
        assert_eq!(h.get("SEC-WEBSOCKET-EXTENSIONS"), Some("permessage-deflate"));
        assert_eq!(h.get_all("Sec-WebSocket-Extensions").collect::<Vec<_>>(), vec!["permessage-deflate", "foo; bar"]);
    }

    #[test]
    fn rejects_header_line_exceeding_max_length() {
        let mut request = b"GET / HTTP/1.1\r\nHost: example.com\r\nX-Long: ".to_vec();
        request.extend(std::iter::repeat(b'a').take(MAX_LINE_LEN + 1));
        request.extend_from_slice(b"\r\n\r\n");
        assert!(matches!(parse_request(&request), Err(Error::LineTooLong)));
    }

    #[test]
    fn does_not_scan_body_bytes_as_lines() {
        let body = vec![b'a'; MAX_LINE_LEN + 1];
        let mut resp = Response::new(200);
        resp.headers.append("Content-Length", &body.len().to_string());
        resp.body = body.clone();
        let bytes = encode_response(&resp);
        match parse_response(&bytes).unwrap() {
            Parsing::Done { value, .. } => assert_eq!(value.body, body),
            Parsing::NeedMore(_) => panic!("expected Done")
        }
    }

    #[test]
    fn parse_request_needs_more_on_partial() {
        let partial = b"GET / HTTP/1.1\r\nHost: example.com\r\n";
        assert_eq!(parse_request(partial).unwrap(), Parsing::NeedMore(0));
    }

    #[test]
    fn round_trip_request() {
        let mut headers = Headers::new();
        headers.append("Host", "example.com");
        headers.append("Upgrade", "websocket");
        let req = Request { method: "GET".into(), path: "/chat".into(), headers };
        let bytes = encode_request(&req);
        match parse_request(&bytes).unwrap() {
            Parsing::Done { value, offset } => {
                assert_eq!(offset, bytes.len());
                assert_eq!(value.method, "GET");
                assert_eq!(value.path, "/chat");
                assert_eq!(value.headers.get("Host"), Some("example.com"));
            }
            Parsing::NeedMore(_) => panic!("expected Done")
        }
    }

    #[test]
    fn round_trip_response_with_body() {
        let mut resp = Response::new(400);
        resp.headers.append("Content-Length", "5");
        resp.body = b"oops!".to_vec();
        let bytes = encode_response(&resp);
        match parse_response(&bytes).unwrap() {
            Parsing::Done { value, offset } => {
                assert_eq!(offset, bytes.len());
                assert_eq!(value.status_code, 400);
                assert_eq!(value.body, b"oops!");
            }
            Parsing::NeedMore(_) => panic!("expected Done")
        }
    }
}
