// Copyright (c) 2019 Parity Technologies (UK) Ltd.
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! `permessage-deflate` ([RFC 7692](https://tools.ietf.org/html/rfc7692)).
//!
//! Only available with the `deflate` feature. The extension currently always
//! asks for "no context takeover"; window bits other than the default (15)
//! can be requested via [`Deflate::set_max_server_window_bits`] /
//! [`Deflate::set_max_client_window_bits`].

use crate::{
    connection::Mode,
    extension::{ClientFactory, Error, Extension, Param, ServerFactory},
    frame::{Frame, OpCode}
};
use bytes::{BufMut, BytesMut};
use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress};
use log::{debug, trace};
use smallvec::SmallVec;
use std::convert::TryInto;

const SERVER_NO_CONTEXT_TAKEOVER: &str = "server_no_context_takeover";
const SERVER_MAX_WINDOW_BITS: &str = "server_max_window_bits";
const CLIENT_NO_CONTEXT_TAKEOVER: &str = "client_no_context_takeover";
const CLIENT_MAX_WINDOW_BITS: &str = "client_max_window_bits";

/// The `permessage-deflate` extension.
#[derive(Debug)]
pub struct Deflate {
    mode: Mode,
    enabled: bool,
    buffer: BytesMut,
    params: SmallVec<[Param<'static>; 2]>,
    our_max_window_bits: u8,
    their_max_window_bits: u8,
    await_last_fragment: bool
}

impl Deflate {
    /// Create a new, not-yet-negotiated instance for the given role.
    pub fn new(mode: Mode) -> Self {
        let params = match mode {
            Mode::Server => SmallVec::new(),
            Mode::Client => {
                let mut params = SmallVec::new();
                params.push(Param::new(SERVER_NO_CONTEXT_TAKEOVER));
                params.push(Param::new(CLIENT_NO_CONTEXT_TAKEOVER));
                params.push(Param::new(CLIENT_MAX_WINDOW_BITS));
                params
            }
        };
        Deflate { mode, enabled: false, buffer: BytesMut::new(), params, our_max_window_bits: 15, their_max_window_bits: 15, await_last_fragment: false }
    }

    /// Limit the LZ77 window the server will use (9..=15). Client mode only.
    pub fn set_max_server_window_bits(&mut self, max: u8) {
        assert_eq!(self.mode, Mode::Client, "setting max. server window bits requires client mode");
        assert!((9 ..= 15).contains(&max));
        self.their_max_window_bits = max;
        self.params.push(Param::with_value(SERVER_MAX_WINDOW_BITS, max.to_string()));
    }

    /// Limit the LZ77 window this side will use (9..=15). Client mode only.
    pub fn set_max_client_window_bits(&mut self, max: u8) {
        assert_eq!(self.mode, Mode::Client, "setting max. client window bits requires client mode");
        assert!((9 ..= 15).contains(&max));
        self.our_max_window_bits = max;
        if let Some(p) = self.params.iter_mut().find(|p| p.name() == CLIENT_MAX_WINDOW_BITS) {
            *p = Param::with_value(CLIENT_MAX_WINDOW_BITS, max.to_string());
        } else {
            self.params.push(Param::with_value(CLIENT_MAX_WINDOW_BITS, max.to_string()));
        }
    }

    fn accept_their_max_window_bits(&mut self, p: &Param<'_>, upper_bound: Option<u8>) -> Result<(), ()> {
        if let Some(Ok(v)) = p.value().map(|s| s.parse::<u8>()) {
            if !(8 ..= 15).contains(&v) {
                debug!("invalid {}: {} (expected range: 8..=15)", p.name(), v);
                return Err(())
            }
            if let Some(bound) = upper_bound {
                if v > bound {
                    debug!("invalid {}: {} (expected <= {})", p.name(), v, bound);
                    return Err(())
                }
            }
            self.their_max_window_bits = std::cmp::max(9, v);
        }
        Ok(())
    }

    /// Configure this (server-side) instance from one of the client's offered
    /// parameter sets. Returns `false` if the offer is unacceptable, in which
    /// case the extension is left disabled and the offer should be skipped.
    pub fn configure_server(&mut self, offer: &[Param<'_>]) -> bool {
        self.params.clear();
        for p in offer {
            match p.name() {
                CLIENT_MAX_WINDOW_BITS =>
                    if self.accept_their_max_window_bits(p, None).is_err() {
                        return false
                    },
                SERVER_MAX_WINDOW_BITS => match p.value().map(|s| s.parse::<u8>()) {
                    Some(Ok(v)) if (9 ..= 15).contains(&v) => {
                        self.params.push(Param::with_value(SERVER_MAX_WINDOW_BITS, v.to_string()));
                        self.our_max_window_bits = v;
                    }
                    _ => {
                        debug!("unacceptable {}: {:?}", p.name(), p.value());
                        return false
                    }
                },
                CLIENT_NO_CONTEXT_TAKEOVER => self.params.push(Param::new(CLIENT_NO_CONTEXT_TAKEOVER)),
                SERVER_NO_CONTEXT_TAKEOVER => self.params.push(Param::new(SERVER_NO_CONTEXT_TAKEOVER)),
                other => {
                    debug!("permessage-deflate: unknown parameter: {}", other);
                    return false
                }
            }
        }
        self.enabled = true;
        true
    }

    /// Configure this (client-side) instance from the server's response
    /// parameters. Returns `false` if the response is unacceptable.
    pub fn configure_client(&mut self, response: &[Param<'_>]) -> bool {
        let mut server_no_context_takeover = false;
        for p in response {
            match p.name() {
                SERVER_NO_CONTEXT_TAKEOVER => server_no_context_takeover = true,
                CLIENT_NO_CONTEXT_TAKEOVER => {}
                SERVER_MAX_WINDOW_BITS => {
                    let bound = Some(self.their_max_window_bits);
                    if self.accept_their_max_window_bits(p, bound).is_err() {
                        return false
                    }
                }
                CLIENT_MAX_WINDOW_BITS => match p.value().map(|s| s.parse::<u8>()) {
                    Some(Ok(v)) if (8 ..= 15).contains(&v) => {
                        self.our_max_window_bits = std::cmp::min(self.our_max_window_bits, std::cmp::max(9, v));
                    }
                    _ => {
                        debug!("unacceptable {}: {:?}", p.name(), p.value());
                        return false
                    }
                },
                other => {
                    debug!("permessage-deflate: unknown parameter: {}", other);
                    return false
                }
            }
        }
        if !server_no_context_takeover {
            debug!("permessage-deflate: server did not confirm no context takeover");
            return false
        }
        self.enabled = true;
        true
    }
}

impl Extension for Deflate {
    fn name(&self) -> &str {
        "permessage-deflate"
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn params(&self) -> &[Param<'static>] {
        &self.params
    }

    fn reserved_bits(&self) -> (bool, bool, bool) {
        (true, false, false)
    }

    fn decode(&mut self, frame: &mut Frame) -> Result<(), Error> {
        match frame.opcode {
            OpCode::Binary | OpCode::Text if frame.rsv1 => {
                if !frame.fin {
                    self.await_last_fragment = true;
                    trace!("deflate: not decoding {}; awaiting last fragment", frame.opcode);
                    return Ok(())
                }
            }
            OpCode::Continue if frame.fin && self.await_last_fragment => {
                self.await_last_fragment = false;
            }
            _ => {
                trace!("deflate: not decoding {}", frame.opcode);
                return Ok(())
            }
        }

        if frame.payload.is_empty() {
            return Ok(())
        }

        frame.payload.extend_from_slice(&[0, 0, 0xFF, 0xFF]); // RFC 7692 §7.2.2
        self.buffer.clear();

        let mut d = Decompress::new_with_window_bits(false, self.their_max_window_bits);
        while d.total_in() < frame.payload.len() as u64 {
            let off: usize = d.total_in().try_into()?;
            self.buffer.reserve(frame.payload.len() - off);
            let before = d.total_out();
            let chunk = self.buffer.chunk_mut();
            let spare = unsafe { std::slice::from_raw_parts_mut(chunk.as_mut_ptr(), chunk.len()) };
            d.decompress(&frame.payload[off ..], spare, FlushDecompress::Sync)?;
            let written: usize = (d.total_out() - before).try_into()?;
            unsafe { self.buffer.advance_mut(written) }
        }

        std::mem::swap(&mut self.buffer, &mut frame.payload);
        frame.rsv1 = false;
        Ok(())
    }

    fn encode(&mut self, frame: &mut Frame) -> Result<(), Error> {
        if !matches!(frame.opcode, OpCode::Binary | OpCode::Text) {
            trace!("deflate: not encoding {}", frame.opcode);
            return Ok(())
        }
        if frame.payload.is_empty() {
            return Ok(())
        }

        self.buffer.clear();
        let mut c = Compress::new_with_window_bits(Compression::fast(), false, self.our_max_window_bits);
        while c.total_in() < frame.payload.len() as u64 {
            let off: usize = c.total_in().try_into()?;
            self.buffer.reserve(frame.payload.len() - off);
            let before = c.total_out();
            let chunk = self.buffer.chunk_mut();
            let spare = unsafe { std::slice::from_raw_parts_mut(chunk.as_mut_ptr(), chunk.len()) };
            c.compress(&frame.payload[off ..], spare, FlushCompress::Sync)?;
            let written: usize = (c.total_out() - before).try_into()?;
            unsafe { self.buffer.advance_mut(written) }
        }
        if self.buffer.remaining_mut() < 5 {
            self.buffer.reserve(5);
            let before = c.total_out();
            let chunk = self.buffer.chunk_mut();
            let spare = unsafe { std::slice::from_raw_parts_mut(chunk.as_mut_ptr(), chunk.len()) };
            c.compress(&[], spare, FlushCompress::Sync)?;
            let written: usize = (c.total_out() - before).try_into()?;
            unsafe { self.buffer.advance_mut(written) }
        }

        let n = self.buffer.len() - 4;
        self.buffer.truncate(n); // strip the [0, 0, 0xFF, 0xFF] trailer, RFC 7692 §7.2.1
        std::mem::swap(&mut self.buffer, &mut frame.payload);
        frame.rsv1 = true;
        Ok(())
    }
}

/// Client-side negotiation for `permessage-deflate`: offers the parameters
/// configured here and builds a [`Deflate`] instance from whatever the
/// server echoes back.
#[derive(Debug, Default)]
pub struct DeflateClientFactory {
    max_server_window_bits: Option<u8>,
    max_client_window_bits: Option<u8>
}

impl DeflateClientFactory {
    /// Offer the extension with no window-bits constraints.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the server to cap its LZ77 window at `max` bits (9..=15).
    pub fn set_max_server_window_bits(mut self, max: u8) -> Self {
        self.max_server_window_bits = Some(max);
        self
    }

    /// Cap this side's own LZ77 window at `max` bits (9..=15).
    pub fn set_max_client_window_bits(mut self, max: u8) -> Self {
        self.max_client_window_bits = Some(max);
        self
    }

    fn configured(&self) -> Deflate {
        let mut d = Deflate::new(Mode::Client);
        if let Some(max) = self.max_server_window_bits {
            d.set_max_server_window_bits(max);
        }
        if let Some(max) = self.max_client_window_bits {
            d.set_max_client_window_bits(max);
        }
        d
    }
}

impl ClientFactory for DeflateClientFactory {
    fn offer(&self) -> Vec<Param<'static>> {
        self.configured().params().to_vec()
    }

    fn accept(&self, response_params: &[Param<'_>]) -> Option<Box<dyn Extension>> {
        let mut d = self.configured();
        if d.configure_client(response_params) {
            Some(Box::new(d))
        } else {
            None
        }
    }
}

/// Server-side negotiation for `permessage-deflate`: accepts the first
/// offered parameter set this side can honour.
#[derive(Debug, Default)]
pub struct DeflateServerFactory;

impl DeflateServerFactory {
    /// Create a factory with no window-bits constraints of its own.
    pub fn new() -> Self {
        Self
    }
}

impl ServerFactory for DeflateServerFactory {
    fn negotiate(&self, offers: &[Vec<Param<'_>>]) -> Option<Box<dyn Extension>> {
        offers.iter().find_map(|offer| {
            let mut d = Deflate::new(Mode::Server);
            if d.configure_server(offer) {
                Some(Box::new(d) as Box<dyn Extension>)
            } else {
                None
            }
        })
    }
}
