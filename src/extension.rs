// Copyright (c) 2019 Parity Technologies (UK) Ltd.
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! Extension negotiation (RFC 6455 §9) and the per-frame encode/decode hook
//! a negotiated extension gets.
//!
//! An extension is offered by the client as one or more `Sec-WebSocket-Extensions`
//! parameter sets, and each side independently turns an offer into a live
//! [`Extension`] value (or declines it) via role-specific factory traits,
//! since what counts as acceptable parameters differs for the offering and
//! the accepting side.

#[cfg(feature = "deflate")]
pub mod deflate;

use crate::frame::Frame;
use std::borrow::Cow;

/// An error produced by an extension's encode/decode step.
pub type Error = Box<dyn std::error::Error + Send + Sync + 'static>;

/// One extension parameter, as it appears in a `Sec-WebSocket-Extensions`
/// header (`name` or `name=value`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param<'a> {
    name: Cow<'a, str>,
    value: Option<Cow<'a, str>>
}

impl<'a> Param<'a> {
    pub fn new(name: impl Into<Cow<'a, str>>) -> Self {
        Param { name: name.into(), value: None }
    }

    pub fn with_value(name: impl Into<Cow<'a, str>>, value: impl Into<Cow<'a, str>>) -> Self {
        Param { name: name.into(), value: Some(value.into()) }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    pub fn into_owned(self) -> Param<'static> {
        Param { name: Cow::Owned(self.name.into_owned()), value: self.value.map(|v| Cow::Owned(v.into_owned())) }
    }
}

impl std::fmt::Display for Param<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.value {
            Some(v) => write!(f, "{}={}", self.name, v),
            None => write!(f, "{}", self.name)
        }
    }
}

/// A single, already negotiated extension instance attached to a connection.
///
/// Implementations get first refusal on every frame that crosses the wire:
/// [`decode`](Extension::decode) runs right after base-frame decoding and
/// before the connection inspects the opcode; [`encode`](Extension::encode)
/// runs right before the frame is serialized.
pub trait Extension: std::fmt::Debug {
    /// The extension token, as it appears in `Sec-WebSocket-Extensions`.
    fn name(&self) -> &str;

    /// Did negotiation actually enable this extension for this connection?
    fn is_enabled(&self) -> bool;

    /// The parameters this side settled on, for echoing back in a response.
    fn params(&self) -> &[Param<'static>];

    /// Which of the three RSV bits this extension claims. The connection
    /// will accept (rather than reject) a frame with those bits set.
    fn reserved_bits(&self) -> (bool, bool, bool) {
        (false, false, false)
    }

    /// A reserved opcode this extension claims, if any.
    fn reserved_opcode(&self) -> Option<u8> {
        None
    }

    /// Transform an incoming frame in place (e.g. inflate a compressed payload).
    fn decode(&mut self, frame: &mut Frame) -> Result<(), Error>;

    /// Transform an outgoing frame in place (e.g. deflate the payload and set RSV1).
    fn encode(&mut self, frame: &mut Frame) -> Result<(), Error>;
}

impl<E: Extension + ?Sized> Extension for Box<E> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn is_enabled(&self) -> bool {
        (**self).is_enabled()
    }

    fn params(&self) -> &[Param<'static>] {
        (**self).params()
    }

    fn reserved_bits(&self) -> (bool, bool, bool) {
        (**self).reserved_bits()
    }

    fn reserved_opcode(&self) -> Option<u8> {
        (**self).reserved_opcode()
    }

    fn decode(&mut self, frame: &mut Frame) -> Result<(), Error> {
        (**self).decode(frame)
    }

    fn encode(&mut self, frame: &mut Frame) -> Result<(), Error> {
        (**self).encode(frame)
    }
}

/// Turns a client's own extension offer into a live [`Extension`], once the
/// server's response parameters are known.
pub trait ClientFactory {
    /// The parameter sets to put in the opening request's
    /// `Sec-WebSocket-Extensions` header, one entry per alternative offered.
    fn offer(&self) -> Vec<Param<'static>>;

    /// Build the extension from the parameters the server echoed back, or
    /// return `None` if they are unacceptable (the connection then proceeds
    /// without this extension rather than failing the handshake).
    fn accept(&self, response_params: &[Param<'_>]) -> Option<Box<dyn Extension>>;
}

/// Turns one of a client's offered parameter sets into a live [`Extension`]
/// on the server side.
pub trait ServerFactory {
    /// Pick (and configure) an extension from the offered parameter sets, in
    /// the order the client listed them, or decline all of them with `None`.
    fn negotiate(&self, offers: &[Vec<Param<'_>>]) -> Option<Box<dyn Extension>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn param_display_matches_wire_syntax() {
        assert_eq!(Param::new("foo").to_string(), "foo");
        assert_eq!(Param::with_value("bar", "1").to_string(), "bar=1");
    }

    #[derive(Debug)]
    struct Noop;

    impl Extension for Noop {
        fn name(&self) -> &str {
            "noop"
        }
        fn is_enabled(&self) -> bool {
            true
        }
        fn params(&self) -> &[Param<'static>] {
            &[]
        }
        fn decode(&mut self, _frame: &mut Frame) -> Result<(), Error> {
            Ok(())
        }
        fn encode(&mut self, _frame: &mut Frame) -> Result<(), Error> {
            Ok(())
        }
    }

    #[test]
    fn boxed_extension_forwards_to_inner() {
        let mut boxed: Box<dyn Extension> = Box::new(Noop);
        assert_eq!(boxed.name(), "noop");
        assert!(boxed.is_enabled());
        let mut frame = Frame::new(crate::frame::OpCode::Binary);
        assert!(boxed.decode(&mut frame).is_ok());
        assert!(boxed.encode(&mut frame).is_ok());
    }
}

