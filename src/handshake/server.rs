// Copyright (c) 2019 Parity Technologies (UK) Ltd.
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! Server-side [handshake](https://tools.ietf.org/html/rfc6455#section-4):
//! request validation, extension/subprotocol negotiation, and response
//! construction.

use super::{accept_key, format_params, header_contains_token, parse_extensions, parse_protocols};
use crate::{
    access_control::{AllowAny, Policy},
    error::Error,
    extension::{Extension, ServerFactory},
    http::{Request, Response}
};
use base64::engine::{general_purpose::STANDARD, Engine};

/// Validates an opening request and negotiates extensions/subprotocols on
/// the server side. One `Server` corresponds to one handshake attempt;
/// [`Connection::accept`] owns one internally.
///
/// [`Connection::accept`]: crate::connection::Connection::accept
pub struct Server {
    protocols: Vec<String>,
    extensions: Vec<Box<dyn ServerFactory>>,
    origin_policy: Box<dyn Policy>
}

impl Server {
    /// Create a server handshake with no supported protocols or extensions,
    /// and no `Origin` restriction.
    pub fn new() -> Self {
        Server { protocols: Vec::new(), extensions: Vec::new(), origin_policy: Box::new(AllowAny) }
    }

    /// Add a subprotocol the server is willing to speak.
    pub fn add_protocol(&mut self, p: impl Into<String>) -> &mut Self {
        self.protocols.push(p.into());
        self
    }

    /// Restrict which `Origin` header values are acceptable. Requests with
    /// no `Origin` header at all are unaffected by this policy (not every
    /// websocket client is a browser).
    pub fn set_origin_policy(&mut self, policy: Box<dyn Policy>) -> &mut Self {
        self.origin_policy = policy;
        self
    }

    /// Add an extension factory available for negotiation.
    pub fn add_extension(&mut self, factory: Box<dyn ServerFactory>) -> &mut Self {
        self.extensions.push(factory);
        self
    }

    /// Validate the client's opening request (RFC 6455 §4.2.1, §4.G "Request
    /// validation") and negotiate extensions/subprotocols.
    ///
    /// On success, returns the computed [`Accepted`] response to send back.
    /// A request that is well-formed HTTP but fails websocket-specific
    /// validation yields `Err`; the caller (the connection state machine)
    /// is expected to turn that into a rejection response rather than drop
    /// the connection silently (§4.G).
    pub fn validate(&self, request: &Request) -> Result<Accepted, Error> {
        if !request.method.eq_ignore_ascii_case("GET") {
            return Err(Error::InvalidHeader(format!("unsupported method: {}", request.method)));
        }
        if !request.headers.contains("Host") {
            return Err(Error::InvalidHeader("missing Host header".into()));
        }

        let upgrade = request.headers.get("Upgrade").ok_or_else(|| Error::InvalidHeader("missing Upgrade header".into()))?;
        if !upgrade.eq_ignore_ascii_case("websocket") {
            return Err(Error::InvalidUpgrade);
        }

        let connection = request.headers.get("Connection").ok_or_else(|| Error::InvalidHeader("missing Connection header".into()))?;
        if !header_contains_token(connection, "Upgrade") {
            return Err(Error::InvalidHeader("Connection header does not contain Upgrade".into()));
        }

        let version = request.headers.get("Sec-WebSocket-Version").ok_or(Error::InvalidVersion)?;
        if version.trim() != "13" {
            return Err(Error::InvalidVersion);
        }

        let key = match request.headers.get_all("Sec-WebSocket-Key").collect::<Vec<_>>().as_slice() {
            [] => return Err(Error::InvalidHeader("missing Sec-WebSocket-Key header".into())),
            [only] => (*only).to_string(),
            _ => return Err(Error::InvalidHeader("multiple Sec-WebSocket-Key headers".into()))
        };
        match STANDARD.decode(&key) {
            Ok(decoded) if decoded.len() == 16 => {}
            _ => return Err(Error::InvalidHeaderValue("Sec-WebSocket-Key".into(), key))
        }

        if let Some(origin) = request.headers.get("Origin") {
            if !self.origin_policy.is_allowed(origin.as_bytes()) {
                return Err(Error::InvalidOrigin(origin.to_string()));
            }
        }

        let mut extensions = Vec::new();
        for line in request.headers.get_all(super::SEC_WEBSOCKET_EXTENSIONS) {
            let offers = parse_extensions(line)?;
            if let Some(ext) = self.extensions.iter().find_map(|f| f.negotiate(&offers)) {
                extensions.push(ext);
            }
        }

        let mut protocol = None;
        for line in request.headers.get_all(super::SEC_WEBSOCKET_PROTOCOL) {
            for offered in parse_protocols(line) {
                if protocol.is_none() && self.protocols.iter().any(|supported| *supported == offered) {
                    protocol = Some(offered);
                }
            }
        }

        Ok(Accepted { key, protocol, extensions })
    }

    /// Build the `101 Switching Protocols` response for an [`Accepted`]
    /// negotiation.
    pub fn accept(&self, accepted: &Accepted) -> Response {
        let mut response = Response::new(101);
        response.headers.append("Upgrade", "websocket");
        response.headers.append("Connection", "Upgrade");
        response.headers.append("Sec-WebSocket-Accept", accept_key(&accepted.key));
        if let Some(protocol) = &accepted.protocol {
            response.headers.append("Sec-WebSocket-Protocol", protocol.clone());
        }
        let enabled: Vec<_> = accepted.extensions.iter().filter(|e| e.is_enabled()).collect();
        if !enabled.is_empty() {
            let value = enabled.iter().map(|e| format_params(e.params())).collect::<Vec<_>>().join(", ");
            response.headers.append("Sec-WebSocket-Extensions", value);
        }
        response
    }

    /// Build a rejection response with the given HTTP status code.
    pub fn reject(&self, status_code: u16) -> Response {
        Response::new(status_code)
    }
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

/// The result of successfully validating a client's opening request.
pub struct Accepted {
    key: String,
    /// The subprotocol selected, if the client offered one the server
    /// supports.
    pub protocol: Option<String>,
    /// Extensions negotiated, in the order the client offered them.
    pub extensions: Vec<Box<dyn Extension>>
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{extension::Param, http::Headers};

    fn base_request() -> Request {
        let mut headers = Headers::new();
        headers.append("Host", "example.com");
        headers.append("Upgrade", "websocket");
        headers.append("Connection", "Upgrade");
        headers.append("Sec-WebSocket-Version", "13");
        headers.append("Sec-WebSocket-Key", "dGhlIHNhbXBsZSBub25jZQ==");
        Request { method: "GET".into(), path: "/".into(), headers }
    }

    #[test]
    fn validates_and_accepts_minimal_request() {
        let server = Server::new();
        let accepted = server.validate(&base_request()).unwrap();
        let response = server.accept(&accepted);
        assert_eq!(response.status_code, 101);
        assert_eq!(response.headers.get("Sec-WebSocket-Accept"), Some("s3pPLMBiTxaQ9kYGzzhZRbK+xOo="));
    }

    #[test]
    fn rejects_missing_key() {
        let mut request = base_request();
        request.headers = Headers::new();
        request.headers.append("Host", "example.com");
        request.headers.append("Upgrade", "websocket");
        request.headers.append("Connection", "Upgrade");
        request.headers.append("Sec-WebSocket-Version", "13");
        let server = Server::new();
        assert!(matches!(server.validate(&request), Err(Error::InvalidHeader(_))));
    }

    #[test]
    fn rejects_duplicate_key() {
        let mut request = base_request();
        request.headers.append("Sec-WebSocket-Key", "dGhlIHNhbXBsZSBub25jZQ==");
        let server = Server::new();
        assert!(matches!(server.validate(&request), Err(Error::InvalidHeader(_))));
    }

    #[test]
    fn rejects_key_that_does_not_decode_to_16_bytes() {
        let mut request = base_request();
        request.headers = Headers::new();
        request.headers.append("Host", "example.com");
        request.headers.append("Upgrade", "websocket");
        request.headers.append("Connection", "Upgrade");
        request.headers.append("Sec-WebSocket-Version", "13");
        request.headers.append("Sec-WebSocket-Key", "dG9vc2hvcnQ=");
        let server = Server::new();
        assert!(matches!(server.validate(&request), Err(Error::InvalidHeaderValue(_, _))));
    }

    #[test]
    fn rejects_wrong_version() {
        let mut request = base_request();
        request.headers = Headers::new();
        request.headers.append("Host", "example.com");
        request.headers.append("Upgrade", "websocket");
        request.headers.append("Connection", "Upgrade");
        request.headers.append("Sec-WebSocket-Version", "8");
        request.headers.append("Sec-WebSocket-Key", "dGhlIHNhbXBsZSBub25jZQ==");
        let server = Server::new();
        assert!(matches!(server.validate(&request), Err(Error::InvalidVersion)));
    }

    #[test]
    fn selects_first_supported_protocol() {
        let mut request = base_request();
        request.headers.append("Sec-WebSocket-Protocol", "chat, superchat");
        let mut server = Server::new();
        server.add_protocol("superchat");
        let accepted = server.validate(&request).unwrap();
        assert_eq!(accepted.protocol.as_deref(), Some("superchat"));
    }

    #[test]
    fn declines_unsupported_extension_without_failing_handshake() {
        struct Factory;
        impl ServerFactory for Factory {
            fn negotiate(&self, _offers: &[Vec<Param<'_>>]) -> Option<Box<dyn Extension>> {
                None
            }
        }
        let mut request = base_request();
        request.headers.append("Sec-WebSocket-Extensions", "x-unknown");
        let mut server = Server::new();
        server.add_extension(Box::new(Factory));
        let accepted = server.validate(&request).unwrap();
        assert!(accepted.extensions.is_empty());
    }

    #[test]
    fn origin_policy_rejects_disallowed_origin() {
        use crate::access_control::AllowList;

        let mut request = base_request();
        request.headers.append("Origin", "https://evil.example");
        let mut server = Server::new();
        server.set_origin_policy(Box::new(AllowList::new(vec!["https://good.example"])));
        assert!(matches!(server.validate(&request), Err(Error::InvalidOrigin(_))));
    }

    #[test]
    fn reject_uses_canonical_reason_phrase() {
        let server = Server::new();
        let response = server.reject(400);
        assert_eq!(response.reason_phrase, "Bad Request");
    }
}
