// Copyright (c) 2019 Parity Technologies (UK) Ltd.
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! Client-side [handshake](https://tools.ietf.org/html/rfc6455#section-4):
//! request construction and response validation.

use super::{accept_key, describe_offer, format_params, generate_key, header_contains_token, parse_extensions, parse_protocols};
use crate::{
    error::Error,
    extension::{ClientFactory, Extension},
    http::{self, Headers, Request, Response},
    uri
};
use std::borrow::Cow;

/// Default `User-Agent` sent unless overridden by `extra_headers`.
pub const USER_AGENT: &str = concat!("wsio/", env!("CARGO_PKG_VERSION"));

/// Builds the opening request and validates the server's response.
///
/// One `Client` corresponds to one handshake attempt; [`Connection::connect`]
/// (the sans-I/O entry point most callers use) owns one internally.
///
/// [`Connection::connect`]: crate::connection::Connection::connect
pub struct Client<'a> {
    target: uri::Target,
    origin: Option<Cow<'a, str>>,
    user_agent: Cow<'a, str>,
    extra_headers: Headers,
    protocols: Vec<Cow<'a, str>>,
    extensions: Vec<Box<dyn ClientFactory>>,
    key: String
}

impl<'a> Client<'a> {
    /// Start building a handshake for the given `ws://`/`wss://` URI.
    pub fn new(uri: &str) -> Result<Self, Error> {
        let target = uri::parse(uri)?;
        Ok(Client {
            target,
            origin: None,
            user_agent: Cow::Borrowed(USER_AGENT),
            extra_headers: Headers::new(),
            protocols: Vec::new(),
            extensions: Vec::new(),
            key: String::new()
        })
    }

    /// Set the `Origin` header.
    pub fn set_origin(&mut self, origin: impl Into<Cow<'a, str>>) -> &mut Self {
        self.origin = Some(origin.into());
        self
    }

    /// Override the default `User-Agent` value.
    pub fn set_user_agent(&mut self, ua: impl Into<Cow<'a, str>>) -> &mut Self {
        self.user_agent = ua.into();
        self
    }

    /// Add a subprotocol to offer, in order of preference.
    pub fn add_protocol(&mut self, p: impl Into<Cow<'a, str>>) -> &mut Self {
        self.protocols.push(p.into());
        self
    }

    /// Add an extension factory; its offer is appended to
    /// `Sec-WebSocket-Extensions` in the order factories are added.
    pub fn add_extension(&mut self, factory: Box<dyn ClientFactory>) -> &mut Self {
        self.extensions.push(factory);
        self
    }

    /// Set (or override) an extra header. Overrides any default this crate
    /// would otherwise have sent for the same name, including `User-Agent`.
    pub fn set_extra_header(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.extra_headers.append(name, value);
        self
    }

    /// Build the opening request (RFC 6455 §4.1). Generates a fresh
    /// `Sec-WebSocket-Key`; call this exactly once per handshake attempt.
    pub fn request(&mut self) -> Request {
        self.key = generate_key();

        let mut headers = Headers::new();
        headers.append("Host", self.target.host.clone());
        headers.append("Upgrade", "websocket");
        headers.append("Connection", "Upgrade");
        headers.append("Sec-WebSocket-Key", self.key.clone());
        headers.append("Sec-WebSocket-Version", "13");
        if !self.extra_headers.contains("User-Agent") {
            headers.append("User-Agent", self.user_agent.clone().into_owned());
        }
        if let Some(origin) = &self.origin {
            headers.append("Origin", origin.clone().into_owned());
        }
        if let Some(auth) = &self.target.authorization {
            headers.append("Authorization", auth.clone());
        }
        if !self.protocols.is_empty() {
            headers.append("Sec-WebSocket-Protocol", self.protocols.iter().map(|p| p.as_ref()).collect::<Vec<_>>().join(", "));
        }
        if !self.extensions.is_empty() {
            let offers = self.extensions.iter().map(|e| format_params(&e.offer())).collect::<Vec<_>>().join(", ");
            headers.append("Sec-WebSocket-Extensions", offers);
        }
        for (name, value) in self.extra_headers.iter() {
            headers.append(name.to_string(), value.to_string());
        }

        Request { method: "GET".into(), path: self.target.resource.clone(), headers }
    }

    /// Validate the server's handshake response (RFC 6455 §4.1, step 11;
    /// §4.G "Response validation").
    pub fn validate(&mut self, response: &Response) -> Result<Accepted, Error> {
        if response.status_code != 101 {
            return Err(Error::InvalidStatus(response.status_code));
        }

        let upgrade = response.headers.get("Upgrade").ok_or_else(|| Error::InvalidHeader("missing Upgrade header".into()))?;
        if !upgrade.eq_ignore_ascii_case("websocket") {
            return Err(Error::InvalidUpgrade);
        }

        let connection = response.headers.get("Connection").ok_or_else(|| Error::InvalidHeader("missing Connection header".into()))?;
        if !header_contains_token(connection, "Upgrade") {
            return Err(Error::InvalidHeader("Connection header does not contain Upgrade".into()));
        }

        let accept_values: Vec<&str> = response.headers.get_all("Sec-WebSocket-Accept").collect();
        match accept_values.as_slice() {
            [] => return Err(Error::InvalidHeader("missing Sec-WebSocket-Accept header".into())),
            [only] => {
                if *only != accept_key(&self.key) {
                    return Err(Error::InvalidHeaderValue("Sec-WebSocket-Accept".into(), (*only).to_string()));
                }
            }
            _ => return Err(Error::InvalidHeader("multiple Sec-WebSocket-Accept headers".into()))
        }

        let mut extensions = Vec::new();
        for line in response.headers.get_all(super::SEC_WEBSOCKET_EXTENSIONS) {
            for offer in parse_extensions(line)? {
                let accepted = self
                    .extensions
                    .iter()
                    .find_map(|factory| factory.accept(&offer))
                    .ok_or_else(|| Error::NegotiationError(format!("Unsupported extension: {}", describe_offer(&offer))))?;
                extensions.push(accepted);
            }
        }

        let mut protocol = None;
        let protocol_values: Vec<&str> = response.headers.get_all(super::SEC_WEBSOCKET_PROTOCOL).collect();
        if protocol_values.len() > 1 {
            return Err(Error::InvalidHeader("multiple Sec-WebSocket-Protocol headers".into()));
        }
        if let Some(line) = protocol_values.first() {
            for p in parse_protocols(line) {
                if !self.protocols.iter().any(|offered| offered.as_ref() == p) {
                    return Err(Error::NegotiationError(format!("unsolicited protocol: {}", p)));
                }
                protocol = Some(p);
            }
        }

        Ok(Accepted { protocol, extensions })
    }

    /// Consume any factories still unused (e.g. because validation never
    /// ran) without building extensions from them.
    pub fn into_factories(self) -> Vec<Box<dyn ClientFactory>> {
        self.extensions
    }
}

/// The result of a successfully validated server response.
pub struct Accepted {
    /// The subprotocol the server selected, if any.
    pub protocol: Option<String>,
    /// Extensions negotiated, in the order the server listed them.
    pub extensions: Vec<Box<dyn Extension>>
}

/// Build the `GET` line + headers directly, bypassing [`Client`], for
/// callers that already have a parsed [`http::Request`] and just want the
/// wire bytes (used by the connection state machine).
pub fn encode(request: &Request) -> Vec<u8> {
    http::encode_request(request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extension::Param;

    #[test]
    fn scenario_client_opening_request() {
        let mut client = Client::new("wss://example.com/test").unwrap();
        client.key = "dGhlIHNhbXBsZSBub25jZQ==".to_string();
        // Re-derive request() manually without touching the key so we can
        // pin it for the literal-string assertion (§8 scenario 1).
        let mut headers = Headers::new();
        headers.append("Host", client.target.host.clone());
        headers.append("Upgrade", "websocket");
        headers.append("Connection", "Upgrade");
        headers.append("Sec-WebSocket-Key", client.key.clone());
        headers.append("Sec-WebSocket-Version", "13");
        headers.append("User-Agent", client.user_agent.clone().into_owned());
        let req = Request { method: "GET".into(), path: client.target.resource.clone(), headers };
        let wire = String::from_utf8(http::encode_request(&req)).unwrap();
        assert_eq!(
            wire,
            format!(
                "GET /test HTTP/1.1\r\nHost: example.com\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\
                 Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nSec-WebSocket-Version: 13\r\nUser-Agent: {}\r\n\r\n",
                USER_AGENT
            )
        );
    }

    #[test]
    fn validate_accepts_matching_response() {
        let mut client = Client::new("ws://example.com/").unwrap();
        client.key = "dGhlIHNhbXBsZSBub25jZQ==".to_string();
        let mut resp = Response::new(101);
        resp.headers.append("Upgrade", "websocket");
        resp.headers.append("Connection", "Upgrade");
        resp.headers.append("Sec-WebSocket-Accept", "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
        assert!(client.validate(&resp).is_ok());
    }

    #[test]
    fn validate_rejects_missing_connection_header() {
        let mut client = Client::new("ws://example.com/").unwrap();
        client.key = "dGhlIHNhbXBsZSBub25jZQ==".to_string();
        let mut resp = Response::new(101);
        resp.headers.append("Upgrade", "websocket");
        resp.headers.append("Sec-WebSocket-Accept", "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
        assert!(matches!(client.validate(&resp), Err(Error::InvalidHeader(_))));
    }

    #[test]
    fn validate_rejects_non_101_status() {
        let mut client = Client::new("ws://example.com/").unwrap();
        let resp = Response::new(404);
        assert!(matches!(client.validate(&resp), Err(Error::InvalidStatus(404))));
    }

    #[test]
    fn validate_rejects_unsolicited_extension() {
        struct Factory;
        impl ClientFactory for Factory {
            fn offer(&self) -> Vec<Param<'static>> {
                vec![Param::new("x-op")]
            }
            fn accept(&self, _: &[Param<'_>]) -> Option<Box<dyn Extension>> {
                None
            }
        }

        let mut client = Client::new("ws://example.com/").unwrap();
        client.key = "dGhlIHNhbXBsZSBub25jZQ==".to_string();
        client.add_extension(Box::new(Factory));
        let mut resp = Response::new(101);
        resp.headers.append("Upgrade", "websocket");
        resp.headers.append("Connection", "Upgrade");
        resp.headers.append("Sec-WebSocket-Accept", "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
        resp.headers.append("Sec-WebSocket-Extensions", "x-op; op=that");
        match client.validate(&resp) {
            Err(Error::NegotiationError(msg)) => {
                assert_eq!(msg, "Unsupported extension: name = x-op, params = [('op', 'that')]");
            }
            other => panic!("expected NegotiationError, got {:?}", other)
        }
    }
}
