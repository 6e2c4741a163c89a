// Copyright (c) 2019 Parity Technologies (UK) Ltd.
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! Parsing of `ws://`/`wss://` URIs into the pieces a client handshake needs.

use base64::engine::{general_purpose::STANDARD, Engine};
use std::fmt;
use url::Url;

/// The parts of a `ws`/`wss` URI relevant to building an opening request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Value for the `Host` header: the hostname, plus `:port` unless the
    /// port is the scheme's default (80 for `ws`, 443 for `wss`).
    pub host: String,
    /// The request path, including query string; `/` if the URI had none.
    pub resource: String,
    /// `true` for `wss`.
    pub secure: bool,
    /// `Authorization: Basic <...>` header value, if the URI embedded
    /// userinfo (`ws://user:pass@host/...`).
    pub authorization: Option<String>
}

/// Errors raised while parsing a `ws`/`wss` URI.
#[derive(Debug)]
pub enum Error {
    /// The URI could not be parsed at all.
    Parse(url::ParseError),
    /// The scheme was something other than `ws` or `wss`.
    InvalidScheme(String),
    /// The URI had no host component.
    MissingHost
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Parse(e) => write!(f, "malformed URI: {}", e),
            Error::InvalidScheme(s) => write!(f, "scheme must be 'ws' or 'wss', got '{}'", s),
            Error::MissingHost => f.write_str("URI has no host")
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Parse(e) => Some(e),
            Error::InvalidScheme(_) | Error::MissingHost => None
        }
    }
}

impl From<url::ParseError> for Error {
    fn from(e: url::ParseError) -> Self {
        Error::Parse(e)
    }
}

/// Parse a `ws://`/`wss://` URI into its handshake-relevant parts.
pub fn parse(uri: &str) -> Result<Target, Error> {
    let url = Url::parse(uri)?;

    let secure = match url.scheme() {
        "ws" => false,
        "wss" => true,
        other => return Err(Error::InvalidScheme(other.to_string()))
    };

    let hostname = url.host_str().ok_or(Error::MissingHost)?;
    let default_port = if secure { 443 } else { 80 };
    let host = match url.port() {
        Some(port) if port != default_port => format!("{}:{}", hostname, port),
        _ => hostname.to_string()
    };

    let resource = match url.query() {
        Some(q) => format!("{}?{}", url.path(), q),
        None => url.path().to_string()
    };
    let resource = if resource.is_empty() { "/".to_string() } else { resource };

    let authorization = if !url.username().is_empty() || url.password().is_some() {
        let credentials = format!("{}:{}", url.username(), url.password().unwrap_or(""));
        Some(format!("Basic {}", STANDARD.encode(credentials)))
    } else {
        None
    };

    Ok(Target { host, resource, secure, authorization })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_host_and_resource() {
        let t = parse("wss://example.com/test").unwrap();
        assert_eq!(t.host, "example.com");
        assert_eq!(t.resource, "/test");
        assert!(t.secure);
        assert!(t.authorization.is_none());
    }

    #[test]
    fn keeps_non_default_port() {
        let t = parse("ws://example.com:9000/chat").unwrap();
        assert_eq!(t.host, "example.com:9000");
    }

    #[test]
    fn drops_default_port() {
        let secure = parse("wss://example.com:443/").unwrap();
        assert_eq!(secure.host, "example.com");
        let plain = parse("ws://example.com:80/").unwrap();
        assert_eq!(plain.host, "example.com");
    }

    #[test]
    fn root_path_defaults_to_slash() {
        let t = parse("ws://example.com").unwrap();
        assert_eq!(t.resource, "/");
    }

    #[test]
    fn query_string_is_kept() {
        let t = parse("ws://example.com/chat?room=1").unwrap();
        assert_eq!(t.resource, "/chat?room=1");
    }

    #[test]
    fn userinfo_becomes_basic_auth() {
        let t = parse("ws://alice:secret@example.com/").unwrap();
        assert_eq!(t.authorization.as_deref(), Some("Basic YWxpY2U6c2VjcmV0"));
    }

    #[test]
    fn rejects_non_websocket_scheme() {
        assert!(matches!(parse("http://example.com/"), Err(Error::InvalidScheme(_))));
    }
}
