// Copyright (c) 2019 Parity Technologies (UK) Ltd.
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! The error taxonomy (§7) shared by the handshake and connection modules.

use crate::close::Close;
use std::fmt;
use thiserror::Error;

/// Everything that can go wrong while running the protocol.
///
/// Handshake validation failures are usually *not* returned through this
/// type directly: they are attached to the parsed [`crate::http::Response`]
/// or [`crate::http::Request`] event instead (see the crate-level docs), so
/// that the caller still has the raw message to log. `Error` is what
/// synchronous send-side calls (`send_text`, `send_close`, ...) and frame
/// decoding return.
#[derive(Debug, Error)]
pub enum Error {
    /// A received header was missing, repeated when it must not be, or
    /// otherwise structurally wrong.
    #[error("invalid header: {0}")]
    InvalidHeader(String),

    /// A header's value did not parse as the grammar it is defined with.
    #[error("invalid header format: {0}")]
    InvalidHeaderFormat(String),

    /// A header was present and well-formed but carried an unacceptable
    /// value.
    #[error("invalid header value for {0}: {1}")]
    InvalidHeaderValue(String, String),

    /// The `Origin` header failed an access-control check.
    #[error("invalid origin: {0}")]
    InvalidOrigin(String),

    /// `Upgrade` was missing or did not list `websocket`.
    #[error("invalid upgrade header")]
    InvalidUpgrade,

    /// The HTTP status line was not `101 Switching Protocols`.
    #[error("invalid status code: {0}")]
    InvalidStatus(u16),

    /// `Sec-WebSocket-Version` was missing or not `13`.
    #[error("invalid Sec-WebSocket-Version")]
    InvalidVersion,

    /// An extension or subprotocol in a response was never offered, or no
    /// factory accepted it.
    #[error("negotiation error: {0}")]
    NegotiationError(String),

    /// The same extension parameter name appeared twice in one offer.
    #[error("duplicate parameter: {0}")]
    DuplicateParameter(String),

    /// An extension parameter name was not recognised by the extension.
    #[error("invalid parameter name: {0}")]
    InvalidParameterName(String),

    /// An extension parameter's value was malformed or out of range.
    #[error("invalid parameter value: {0}")]
    InvalidParameterValue(String),

    /// The local side deliberately refused to continue the handshake.
    #[error("handshake aborted: {0}")]
    AbortHandshake(String),

    /// `wss://` was redirected to `ws://` (or another insecure downgrade).
    #[error("security error: {0}")]
    SecurityError(String),

    /// The `ws`/`wss` URI given to the client was malformed.
    #[error("invalid uri: {0}")]
    InvalidUri(#[from] crate::uri::Error),

    /// A framing rule (RFC 6455 §5) was violated.
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// A message or frame exceeded the configured `max_size`.
    #[error("payload too big: {size} bytes exceeds the {max}-byte limit")]
    PayloadTooBig {
        /// The size that was rejected.
        size: u64,
        /// The configured limit.
        max: u64
    },

    /// An API was called when the connection was not in a state that
    /// permits it (e.g. sending after `CLOSING`).
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The byte stream ended before a complete message could be parsed.
    #[error("unexpected end of stream")]
    Eof,

    /// An underlying HTTP parse error.
    #[error(transparent)]
    Http(#[from] crate::http::Error),

    /// An underlying frame parse error.
    #[error(transparent)]
    Frame(#[from] crate::frame::Error),

    /// An error raised by a negotiated extension's `encode`/`decode` hook.
    #[error("extension error: {0}")]
    Extension(#[source] crate::extension::Error),

    /// Text data that failed incremental UTF-8 validation.
    #[error(transparent)]
    Utf8(#[from] crate::utf8::Utf8Error)
}

/// The connection has finished closing; no further data will flow.
///
/// Mirrors the two flavours the spec distinguishes: [`ConnectionClosed::is_ok`]
/// is true exactly when both sides exchanged (or implied) code `1000` or the
/// no-status sentinel `1005`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionClosed {
    /// The close frame received from the peer, if any arrived before the
    /// socket closed.
    pub received: Option<Close>,
    /// The close frame this side sent, if any.
    pub sent: Option<Close>,
    /// `true` if the peer's close frame was received *before* this side sent
    /// its own (echo ordering); `false` if this side closed first; `None` if
    /// only one side ever sent a close frame (e.g. after `receive_eof`).
    pub received_then_sent: Option<bool>
}

fn describe(c: &Close) -> String {
    c.to_string()
}

impl ConnectionClosed {
    /// A normal closure: both known codes are `1000` (or the received side
    /// is the `1005` "no status" sentinel, meaning the peer just closed the
    /// socket without sending a close frame at all). If neither side ever
    /// closed (the abrupt-EOF case), this is an error, not a clean close.
    pub fn is_ok(&self) -> bool {
        if self.received.is_none() && self.sent.is_none() {
            return false;
        }
        let side_ok = |c: &Option<Close>| c.as_ref().map_or(true, |c| matches!(c.code, 1000 | crate::close::NO_STATUS_RECEIVED));
        side_ok(&self.received) && side_ok(&self.sent)
    }
}

impl fmt::Display for ConnectionClosed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.received_then_sent, &self.received, &self.sent) {
            (Some(true), Some(r), Some(s)) => write!(f, "received {}; then sent {}", describe(r), describe(s)),
            (Some(false), Some(r), Some(s)) => write!(f, "sent {}; then received {}", describe(s), describe(r)),
            (_, Some(r), None) => write!(f, "received {}", describe(r)),
            (_, None, Some(s)) => write!(f, "sent {}", describe(s)),
            (_, Some(r), Some(s)) => write!(f, "received {}; sent {}", describe(r), describe(s)),
            (_, None, None) => f.write_str("connection closed")
        }
    }
}

impl std::error::Error for ConnectionClosed {}

impl From<crate::extension::Error> for Error {
    fn from(e: crate::extension::Error) -> Self {
        Error::Extension(e)
    }
}
