// Copyright (c) 2019 Parity Technologies (UK) Ltd.
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! Websocket [handshake](https://tools.ietf.org/html/rfc6455#section-4):
//! request/response construction and validation for both roles.

pub mod client;
pub mod server;

use crate::{error::Error, extension::Param};
use base64::engine::{general_purpose::STANDARD, Engine};
use sha1::{Digest, Sha1};
use unicase::Ascii;

// Defined in RFC6455 and used to generate the `Sec-WebSocket-Accept` header
// in the server handshake response.
const GUID: &[u8] = b"258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

pub(crate) const SEC_WEBSOCKET_EXTENSIONS: &str = "Sec-WebSocket-Extensions";
pub(crate) const SEC_WEBSOCKET_PROTOCOL: &str = "Sec-WebSocket-Protocol";

/// Compute the `Sec-WebSocket-Accept` value for a given `Sec-WebSocket-Key`.
pub(crate) fn accept_key(key: &str) -> String {
    let mut digest = Sha1::new();
    digest.update(key.as_bytes());
    digest.update(GUID);
    STANDARD.encode(digest.finalize())
}

/// Generate a fresh 16-byte nonce, base64-encoded, for `Sec-WebSocket-Key`.
pub(crate) fn generate_key() -> String {
    let mut nonce = [0u8; 16];
    rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut nonce);
    STANDARD.encode(nonce)
}

/// Does the token-list value of `header` (case-insensitively) contain `token`?
pub(crate) fn header_contains_token(value: &str, token: &str) -> bool {
    value.split(',').any(|t| Ascii::new(t.trim()) == Ascii::new(token))
}

/// Parse one `Sec-WebSocket-Extensions` header *line* into its comma-separated
/// offers, each itself a semicolon-separated list of [`Param`]s (RFC 6455
/// §9.1). Header lines repeated on the wire are folded into a single list by
/// the caller, one call per physical line (see §9, Open Question).
pub(crate) fn parse_extensions(value: &str) -> Result<Vec<Vec<Param<'static>>>, Error> {
    let mut offers = Vec::new();
    for offer in value.split(',') {
        let offer = offer.trim();
        if offer.is_empty() {
            continue;
        }
        let mut params = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for part in offer.split(';') {
            let part = part.trim();
            if part.is_empty() {
                return Err(Error::InvalidHeaderFormat(format!("empty extension parameter in '{}'", offer)));
            }
            let param = match part.split_once('=') {
                Some((name, value)) => {
                    let value = value.trim().trim_matches('"');
                    Param::with_value(name.trim().to_string(), value.to_string())
                }
                None => Param::new(part.to_string())
            };
            if !seen.insert(param.name().to_ascii_lowercase()) {
                return Err(Error::DuplicateParameter(param.name().to_string()));
            }
            params.push(param.into_owned());
        }
        offers.push(params);
    }
    Ok(offers)
}

/// Serialize one extension offer (or accepted response) back to wire syntax.
pub(crate) fn format_params(params: &[Param<'_>]) -> String {
    params.iter().map(|p| p.to_string()).collect::<Vec<_>>().join("; ")
}

/// Describe one extension offer the way [`Error::NegotiationError`] reports
/// it: the first parameter is the extension's own name, the rest are its
/// parameters.
///
/// [`Error::NegotiationError`]: crate::error::Error::NegotiationError
pub(crate) fn describe_offer(offer: &[Param<'_>]) -> String {
    let name = offer.first().map(|p| p.name()).unwrap_or("");
    let params = offer
        .iter()
        .skip(1)
        .map(|p| format!("('{}', '{}')", p.name(), p.value().unwrap_or("")))
        .collect::<Vec<_>>()
        .join(", ");
    format!("name = {}, params = [{}]", name, params)
}

/// Parse a `Sec-WebSocket-Protocol` header value into its comma-separated
/// tokens.
pub(crate) fn parse_protocols(value: &str) -> Vec<String> {
    value.split(',').map(|p| p.trim().to_string()).filter(|p| !p.is_empty()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_key_matches_rfc_example() {
        // RFC 6455 §1.3 worked example.
        assert_eq!(accept_key("dGhlIHNhbXBsZSBub25jZQ=="), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[test]
    fn parses_single_offer_with_params() {
        let offers = parse_extensions("permessage-deflate; client_max_window_bits").unwrap();
        assert_eq!(offers.len(), 1);
        assert_eq!(offers[0][0].name(), "permessage-deflate");
        assert_eq!(offers[0][1].name(), "client_max_window_bits");
    }

    #[test]
    fn parses_multiple_comma_separated_offers() {
        let offers = parse_extensions("foo, bar; x=1").unwrap();
        assert_eq!(offers.len(), 2);
        assert_eq!(offers[1][1].value(), Some("1"));
    }

    #[test]
    fn rejects_duplicate_parameter_name() {
        assert!(parse_extensions("foo; bar; bar").is_err());
    }

    #[test]
    fn header_contains_token_is_case_insensitive() {
        assert!(header_contains_token("Upgrade, keep-alive", "upgrade"));
        assert!(!header_contains_token("keep-alive", "upgrade"));
    }
}
