// Copyright (c) 2019 Parity Technologies (UK) Ltd.
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! A sans-I/O implementation of the [RFC 6455][rfc6455] websocket protocol:
//! opening handshake, frame codec, extension negotiation and a connection
//! state machine that turns received bytes into [`connection::Event`]s.
//!
//! This crate performs no I/O of its own. Callers own the transport (a TCP
//! stream, a test harness, anything byte-oriented): feed received bytes to
//! [`connection::Connection::receive_data`] and write whatever bytes it
//! hands back.
//!
//! ```no_run
//! use wsio::connection::{Connection, Mode};
//!
//! let mut conn = Connection::new(Mode::Client);
//! let request = conn.connect("ws://example.com/chat")?;
//! let _wire = conn.send_request(&request);
//! // write `_wire`, read the response bytes into `conn.receive_data(..)`, ...
//! # Ok::<(), wsio::error::Error>(())
//! ```
//!
//! [rfc6455]: https://tools.ietf.org/html/rfc6455

#![deny(missing_docs)]

pub mod access_control;
pub mod buffer;
pub mod close;
pub mod connection;
pub mod error;
pub mod extension;
pub mod frame;
pub mod handshake;
pub mod http;
mod mask;
pub mod uri;
pub mod utf8;

pub use connection::{Connection, Event, Mode, State};
pub use error::{ConnectionClosed, Error};
