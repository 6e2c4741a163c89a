// Copyright (c) 2019 Parity Technologies (UK) Ltd.
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! The [`Connection`] state machine: handshake through data phase through
//! close, entirely sans-I/O. Callers own the transport; this module only
//! turns received bytes into [`Event`]s and application calls into bytes to
//! write.

use crate::{
    access_control::Policy,
    buffer::{Buffer, Parsing},
    close::{self, Close},
    error::{ConnectionClosed, Error},
    extension::{ClientFactory, Extension, ServerFactory},
    frame::{Frame, FrameCodec, OpCode},
    handshake::{client::Client, server::Server},
    http::{self, Request, Response},
    mask, utf8
};
use bytes::BytesMut;

/// Default maximum accumulated size, in bytes, of one message (RFC 6455
/// places no limit on this; 1 MiB matches common browser/server practice).
pub const DEFAULT_MAX_MESSAGE_SIZE: u64 = 1024 * 1024;

/// Is the connection used by a client or server?
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Client-side of a connection: outgoing frames are masked.
    Client,
    /// Server-side of a connection: outgoing frames are unmasked.
    Server
}

impl Mode {
    pub fn is_client(self) -> bool {
        matches!(self, Mode::Client)
    }

    pub fn is_server(self) -> bool {
        matches!(self, Mode::Server)
    }
}

/// The connection's top-level lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// The opening handshake has not yet completed (on either side).
    Connecting,
    /// The handshake succeeded; data frames may be exchanged.
    Open,
    /// A close frame has been sent (but not yet answered) or received (and
    /// already echoed).
    Closing,
    /// Both sides of the close handshake are accounted for, or the
    /// connection failed outright.
    Closed
}

/// Handshake substates a [`Connection`] passes through while [`State::Connecting`]
/// (RFC 6455 §4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectingState {
    AwaitingRequest,
    AwaitingResponse,
    HeadersReceived,
    Validated,
    Rejected
}

/// Something the caller needs to know about: a handshake message, or a
/// complete data/control message.
#[derive(Debug)]
pub enum Event {
    /// The server received the client's opening request. The caller must
    /// respond with [`Connection::accept`] or [`Connection::reject`].
    Request(Request),
    /// The client received the server's opening response. `error` is set
    /// when response validation failed; the response is still delivered so
    /// the caller can log the rejection.
    Response {
        response: Response,
        error: Option<Error>
    },
    /// A complete text message.
    Text(String),
    /// A complete binary message.
    Binary(Vec<u8>),
    /// A ping was received. The matching pong has already been queued in the
    /// bytes returned alongside this event.
    Ping(Vec<u8>),
    /// An unsolicited pong was received.
    Pong(Vec<u8>)
}

/// State tracking an in-progress fragmented *inbound* message.
struct Fragment {
    opcode: OpCode,
    payload: BytesMut,
    utf8: Option<utf8::Validator>
}

impl Fragment {
    fn new(opcode: OpCode) -> Self {
        Fragment { opcode, payload: BytesMut::new(), utf8: if opcode == OpCode::Text { Some(utf8::Validator::new()) } else { None } }
    }
}

/// Configuration collected for a client handshake before [`Connection::connect`]
/// builds the actual request.
#[derive(Default)]
struct ClientConfig {
    origin: Option<String>,
    user_agent: Option<String>,
    protocols: Vec<String>,
    extensions: Vec<Box<dyn ClientFactory>>,
    extra_headers: Vec<(String, String)>
}

/// A sans-I/O RFC 6455 connection: feed it bytes, get events and bytes back.
///
/// Construct with [`Connection::new`], configure with the `set_*`/`add_*`
/// methods, drive the handshake with [`connect`](Connection::connect) or
/// [`accept`](Connection::accept)/[`reject`](Connection::reject), then move
/// into the data phase with [`receive_data`](Connection::receive_data) and
/// the `send_*` family.
pub struct Connection {
    mode: Mode,
    state: State,
    connecting: ConnectingState,
    pending_client: ClientConfig,
    client: Option<Client<'static>>,
    server: Server,
    codec: FrameCodec,
    extensions: Vec<Box<dyn Extension>>,
    subprotocol: Option<String>,
    max_message_size: u64,
    buffer: Buffer,
    fragment: Option<Fragment>,
    send_fragment_opcode: Option<OpCode>,
    close_rcvd: Option<Close>,
    close_sent: Option<Close>,
    close_rcvd_then_sent: Option<bool>
}

impl Connection {
    /// Create a new connection for the given role, in state `CONNECTING`.
    pub fn new(mode: Mode) -> Self {
        let mut codec = FrameCodec::new();
        codec.require_mask(Some(mode.is_server()));
        codec.set_max_payload_size(DEFAULT_MAX_MESSAGE_SIZE);
        Connection {
            mode,
            state: State::Connecting,
            connecting: match mode {
                Mode::Client => ConnectingState::AwaitingResponse,
                Mode::Server => ConnectingState::AwaitingRequest
            },
            pending_client: ClientConfig::default(),
            client: None,
            server: Server::new(),
            codec,
            extensions: Vec::new(),
            subprotocol: None,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            buffer: Buffer::new(),
            fragment: None,
            send_fragment_opcode: None,
            close_rcvd: None,
            close_sent: None,
            close_rcvd_then_sent: None
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn subprotocol(&self) -> Option<&str> {
        self.subprotocol.as_deref()
    }

    /// The close frames exchanged, once `state()` is [`State::Closed`].
    pub fn closed(&self) -> Option<ConnectionClosed> {
        if self.state != State::Closed {
            return None;
        }
        Some(ConnectionClosed { received: self.close_rcvd.clone(), sent: self.close_sent.clone(), received_then_sent: self.close_rcvd_then_sent })
    }

    /// Cap the total accumulated size of one message; also bounds a single
    /// frame's payload, since a frame can never exceed the message budget.
    pub fn set_max_message_size(&mut self, max: u64) -> &mut Self {
        self.max_message_size = max;
        self.codec.set_max_payload_size(max);
        self
    }

    /// Set the `Origin` header the client will send (client only).
    pub fn set_origin(&mut self, origin: impl Into<String>) -> &mut Self {
        assert_eq!(self.mode, Mode::Client, "Origin is a client-side setting");
        self.pending_client.origin = Some(origin.into());
        self
    }

    /// Override the default `User-Agent` the client will send (client only).
    pub fn set_user_agent(&mut self, user_agent: impl Into<String>) -> &mut Self {
        assert_eq!(self.mode, Mode::Client, "User-Agent is a client-side setting");
        self.pending_client.user_agent = Some(user_agent.into());
        self
    }

    /// Add (or override) a header on the opening request (client only).
    pub fn set_extra_header(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        assert_eq!(self.mode, Mode::Client, "extra headers are attached to the client's opening request");
        self.pending_client.extra_headers.push((name.into(), value.into()));
        self
    }

    /// Add a subprotocol: offered in order for a client, supported (in
    /// addition order) for a server.
    pub fn add_protocol(&mut self, protocol: impl Into<String>) -> &mut Self {
        let protocol = protocol.into();
        match self.mode {
            Mode::Client => self.pending_client.protocols.push(protocol),
            Mode::Server => {
                self.server.add_protocol(protocol);
            }
        }
        self
    }

    /// Add a client-side extension factory (client only).
    pub fn add_client_extension(&mut self, factory: Box<dyn ClientFactory>) -> &mut Self {
        assert_eq!(self.mode, Mode::Client);
        self.pending_client.extensions.push(factory);
        self
    }

    /// Add a server-side extension factory (server only).
    pub fn add_server_extension(&mut self, factory: Box<dyn ServerFactory>) -> &mut Self {
        assert_eq!(self.mode, Mode::Server);
        self.server.add_extension(factory);
        self
    }

    /// Restrict acceptable `Origin` values on incoming requests (server
    /// only); see [`crate::access_control`].
    pub fn set_origin_policy(&mut self, policy: Box<dyn Policy>) -> &mut Self {
        assert_eq!(self.mode, Mode::Server);
        self.server.set_origin_policy(policy);
        self
    }

    /// Build the opening request for `uri` (client only). Apply `add_*`/`set_*`
    /// configuration before calling this.
    pub fn connect(&mut self, uri: &str) -> Result<Request, Error> {
        assert_eq!(self.mode, Mode::Client);
        let mut client = Client::new(uri)?;
        if let Some(origin) = self.pending_client.origin.take() {
            client.set_origin(origin);
        }
        if let Some(ua) = self.pending_client.user_agent.take() {
            client.set_user_agent(ua);
        }
        for p in self.pending_client.protocols.drain(..) {
            client.add_protocol(p);
        }
        for e in self.pending_client.extensions.drain(..) {
            client.add_extension(e);
        }
        for (name, value) in self.pending_client.extra_headers.drain(..) {
            client.set_extra_header(name, value);
        }
        let request = client.request();
        self.client = Some(client);
        Ok(request)
    }

    /// Validate `request` (server only) and, on success, build the `101`
    /// response and move to `OPEN`. A validation failure leaves `state()` at
    /// `CONNECTING`; the caller should turn it into a rejection via
    /// [`Connection::reject`] instead.
    pub fn accept(&mut self, request: &Request) -> Result<Response, Error> {
        assert_eq!(self.mode, Mode::Server);
        let accepted = self.server.validate(request)?;
        let response = self.server.accept(&accepted);
        self.subprotocol = accepted.protocol;
        self.install_extensions(accepted.extensions);
        self.connecting = ConnectingState::Validated;
        self.state = State::Open;
        Ok(response)
    }

    /// Decline the client's request with an HTTP status code (server only).
    /// `state()` stays `CONNECTING`.
    pub fn reject(&mut self, status_code: u16) -> Response {
        assert_eq!(self.mode, Mode::Server);
        self.connecting = ConnectingState::Rejected;
        self.server.reject(status_code)
    }

    /// Serialize a request to wire bytes.
    pub fn send_request(&self, request: &Request) -> Vec<u8> {
        http::encode_request(request)
    }

    /// Serialize a response to wire bytes.
    pub fn send_response(&self, response: &Response) -> Vec<u8> {
        http::encode_response(response)
    }

    fn install_extensions(&mut self, extensions: Vec<Box<dyn Extension>>) {
        for ext in extensions.into_iter().filter(|e| e.is_enabled()) {
            log::debug!("using extension: {}", ext.name());
            self.codec.add_reserved_bits(ext.reserved_bits());
            if let Some(opcode) = ext.reserved_opcode() {
                self.codec.add_reserved_opcode(opcode);
            }
            self.extensions.push(ext);
        }
    }

    /// Feed bytes received from the transport. Returns the events they
    /// produced and any bytes the state machine decided to emit on its own
    /// (a pong answering a ping, a close echo, or an abort close).
    pub fn receive_data(&mut self, bytes: &[u8]) -> Result<(Vec<Event>, Vec<u8>), Error> {
        self.buffer.feed(bytes);
        let mut events = Vec::new();
        let mut outbound = Vec::new();

        if self.state == State::Connecting {
            match self.mode {
                Mode::Client => self.receive_client_handshake(&mut events)?,
                Mode::Server => self.receive_server_handshake(&mut events)?
            }
        }

        while matches!(self.state, State::Open | State::Closing) {
            if !self.receive_one_frame(&mut events, &mut outbound)? {
                break;
            }
        }

        if self.state == State::Closed {
            self.buffer.clear();
        }

        Ok((events, outbound))
    }

    /// Signal end of stream. No more progress is possible after this; the
    /// connection moves straight to `CLOSED`.
    ///
    /// If the buffer still holds bytes a parser was mid-way through (a
    /// truncated handshake message or a truncated frame), that is a
    /// protocol violation (§4.A: a parser still needing bytes at EOF raises
    /// an `EOFError`), so this aborts with close code 1002 instead of
    /// closing silently.
    pub fn receive_eof(&mut self) -> Vec<u8> {
        self.buffer.feed_eof();
        if self.state == State::Closed {
            return Vec::new();
        }
        let mut outbound = Vec::new();
        if self.buffer.is_empty() {
            self.state = State::Closed;
        } else {
            self.fail_with(1002, Error::Eof.to_string(), &mut outbound);
        }
        self.buffer.clear();
        outbound
    }

    fn receive_client_handshake(&mut self, events: &mut Vec<Event>) -> Result<(), Error> {
        match http::parse_response(self.buffer.as_ref())? {
            Parsing::NeedMore(_) => Ok(()),
            Parsing::Done { value: response, offset } => {
                self.buffer.split_to(offset);
                self.connecting = ConnectingState::HeadersReceived;
                let client = self.client.as_mut().expect("connect() must be called before receive_data in client mode");
                match client.validate(&response) {
                    Ok(accepted) => {
                        self.subprotocol = accepted.protocol;
                        self.install_extensions(accepted.extensions);
                        self.connecting = ConnectingState::Validated;
                        self.state = State::Open;
                        events.push(Event::Response { response, error: None });
                    }
                    Err(error) => {
                        self.connecting = ConnectingState::Rejected;
                        events.push(Event::Response { response, error: Some(error) });
                    }
                }
                Ok(())
            }
        }
    }

    fn receive_server_handshake(&mut self, events: &mut Vec<Event>) -> Result<(), Error> {
        match http::parse_request(self.buffer.as_ref())? {
            Parsing::NeedMore(_) => Ok(()),
            Parsing::Done { value: request, offset } => {
                self.buffer.split_to(offset);
                self.connecting = ConnectingState::HeadersReceived;
                events.push(Event::Request(request));
                Ok(())
            }
        }
    }

    /// Parse and dispatch one frame. Returns `Ok(true)` if progress was made
    /// (the caller should try again in case the buffer holds more), or
    /// `Ok(false)` if more bytes are needed (or the connection just failed).
    fn receive_one_frame(&mut self, events: &mut Vec<Event>, outbound: &mut Vec<u8>) -> Result<bool, Error> {
        let (frame, offset) = match self.codec.decode(self.buffer.as_ref()) {
            Ok(Parsing::NeedMore(_)) => return Ok(false),
            Ok(Parsing::Done { value, offset }) => (value, offset),
            Err(e) => {
                self.fail_with(1002, e.to_string(), outbound);
                return Ok(false);
            }
        };
        self.buffer.split_to(offset);
        self.handle_frame(frame, events, outbound)?;
        Ok(true)
    }

    fn handle_frame(&mut self, mut frame: Frame, events: &mut Vec<Event>, outbound: &mut Vec<u8>) -> Result<(), Error> {
        if matches!(frame.opcode, OpCode::Ping | OpCode::Pong | OpCode::Close) {
            return self.handle_control_frame(frame, events, outbound);
        }

        match (frame.opcode, self.fragment.is_some()) {
            (OpCode::Continue, false) => {
                self.fail_with(1002, "CONTINUE frame without an initial fragment", outbound);
                return Ok(());
            }
            (OpCode::Text, true) | (OpCode::Binary, true) => {
                self.fail_with(1002, "new message started while a fragmented message is in progress", outbound);
                return Ok(());
            }
            _ => {}
        }

        // Decode runs right-to-left relative to negotiation order.
        for ext in self.extensions.iter_mut().rev() {
            ext.decode(&mut frame)?;
        }

        let fin = frame.fin;
        let opcode = self.fragment.as_ref().map(|f| f.opcode).unwrap_or(frame.opcode);
        let fragment = self.fragment.get_or_insert_with(|| Fragment::new(opcode));

        let accumulated = fragment.payload.len() as u64 + frame.payload.len() as u64;
        if accumulated > self.max_message_size {
            self.fragment = None;
            self.fail_with(1009, format!("message exceeds the {}-byte limit", self.max_message_size), outbound);
            return Ok(());
        }

        if let Some(validator) = fragment.utf8.as_mut() {
            if validator.feed(&frame.payload, fin).is_err() {
                self.fragment = None;
                self.fail_with(1007, "invalid UTF-8 in text message", outbound);
                return Ok(());
            }
        }

        fragment.payload.extend_from_slice(&frame.payload);

        if fin {
            let fragment = self.fragment.take().expect("just inserted above");
            match opcode {
                OpCode::Text => {
                    let text = String::from_utf8(fragment.payload.to_vec()).expect("payload was validated incrementally above");
                    events.push(Event::Text(text));
                }
                OpCode::Binary => events.push(Event::Binary(fragment.payload.to_vec())),
                _ => {}
            }
        }

        Ok(())
    }

    fn handle_control_frame(&mut self, frame: Frame, events: &mut Vec<Event>, outbound: &mut Vec<u8>) -> Result<(), Error> {
        match frame.opcode {
            OpCode::Ping => {
                events.push(Event::Ping(frame.payload.to_vec()));
                let pong = Frame::with_payload(OpCode::Pong, frame.payload.clone());
                let bytes = self.encode_frame(&pong)?;
                outbound.extend(bytes);
            }
            OpCode::Pong => events.push(Event::Pong(frame.payload.to_vec())),
            OpCode::Close => {
                let close = decode_close_payload(&frame.payload)?;
                self.close_rcvd = Some(close.clone());
                if self.close_sent.is_none() {
                    let code = if close::is_valid_outgoing(close.code) { close.code } else { 1000 };
                    let reply = Close::new(code, "");
                    let bytes = self.encode_frame(&encode_close_frame(&reply))?;
                    outbound.extend(bytes);
                    self.close_sent = Some(reply);
                    self.close_rcvd_then_sent = Some(true);
                } else {
                    self.close_rcvd_then_sent = Some(false);
                }
                self.state = State::Closed;
            }
            _ => unreachable!("only Ping/Pong/Close reach handle_control_frame")
        }
        Ok(())
    }

    fn encode_frame(&mut self, frame: &Frame) -> Result<Vec<u8>, Error> {
        let mut frame = frame.clone();
        for ext in self.extensions.iter_mut() {
            ext.encode(&mut frame)?;
        }
        let mask = if self.mode.is_client() { Some(mask::generate_key()) } else { None };
        Ok(self.codec.encode(&frame, mask))
    }

    /// Send a complete (or initial-fragment, `fin=false`) text message.
    pub fn send_text(&mut self, data: &str, fin: bool) -> Result<Vec<u8>, Error> {
        self.send_data(OpCode::Text, data.as_bytes(), fin)
    }

    /// Send a complete (or initial-fragment) binary message.
    pub fn send_binary(&mut self, data: &[u8], fin: bool) -> Result<Vec<u8>, Error> {
        self.send_data(OpCode::Binary, data, fin)
    }

    /// Continue a fragmented message started with `send_text`/`send_binary`
    /// with `fin=false`.
    pub fn send_continuation(&mut self, data: &[u8], fin: bool) -> Result<Vec<u8>, Error> {
        self.send_data(OpCode::Continue, data, fin)
    }

    fn send_data(&mut self, opcode: OpCode, data: &[u8], fin: bool) -> Result<Vec<u8>, Error> {
        if self.state != State::Open {
            return Err(Error::InvalidState(format!("cannot send data in state {:?}", self.state)));
        }
        match (opcode, self.send_fragment_opcode) {
            (OpCode::Continue, None) => return Err(Error::InvalidState("no fragmented message is in progress".into())),
            (OpCode::Continue, Some(_)) => {}
            (_, Some(_)) => return Err(Error::InvalidState("a fragmented message is already in progress".into())),
            (_, None) => {}
        }
        self.send_fragment_opcode = if fin { None } else { Some(opcode) };
        let mut frame = Frame::with_payload(opcode, data);
        frame.fin = fin;
        self.encode_frame(&frame)
    }

    /// Send a ping. `data` must be at most 125 bytes.
    pub fn send_ping(&mut self, data: &[u8]) -> Result<Vec<u8>, Error> {
        self.send_control(OpCode::Ping, data)
    }

    /// Send an unsolicited pong. `data` must be at most 125 bytes.
    pub fn send_pong(&mut self, data: &[u8]) -> Result<Vec<u8>, Error> {
        self.send_control(OpCode::Pong, data)
    }

    fn send_control(&mut self, opcode: OpCode, data: &[u8]) -> Result<Vec<u8>, Error> {
        if data.len() > 125 {
            return Err(Error::ProtocolError("control frame payload exceeds 125 bytes".into()));
        }
        if self.state != State::Open {
            return Err(Error::InvalidState(format!("cannot send control frame in state {:?}", self.state)));
        }
        self.encode_frame(&Frame::with_payload(opcode, data))
    }

    /// Send a close frame and move to `CLOSING` (or straight to `CLOSED` if
    /// the peer's close frame already arrived). `code` defaults to `1000`;
    /// `reason` defaults to empty.
    pub fn send_close(&mut self, code: Option<u16>, reason: Option<&str>) -> Result<Vec<u8>, Error> {
        if self.state != State::Open {
            return Err(Error::InvalidState(format!("cannot close in state {:?}", self.state)));
        }
        let code = code.unwrap_or(1000);
        if !close::is_valid_outgoing(code) {
            return Err(Error::ProtocolError(format!("invalid close code for sending: {}", code)));
        }
        let reason = reason.unwrap_or("");
        if reason.len() > 123 {
            return Err(Error::ProtocolError("close reason exceeds 123 bytes".into()));
        }
        let close = Close::new(code, reason);
        let bytes = self.encode_frame(&encode_close_frame(&close))?;
        self.close_sent = Some(close);
        self.state = if self.close_rcvd.is_some() { State::Closed } else { State::Closing };
        Ok(bytes)
    }

    /// Abort the connection: send a close frame (best-effort) and move
    /// straight to `CLOSED` regardless of any peer response.
    pub fn fail(&mut self, code: u16, reason: &str) -> Vec<u8> {
        if self.state == State::Closed {
            return Vec::new();
        }
        let code = if close::is_valid_outgoing(code) { code } else { 1002 };
        let close = Close::new(code, reason);
        let bytes = self.encode_frame(&encode_close_frame(&close)).unwrap_or_default();
        self.close_sent = Some(close);
        self.state = State::Closed;
        bytes
    }

    fn fail_with(&mut self, code: u16, reason: impl Into<String>, outbound: &mut Vec<u8>) {
        outbound.extend(self.fail(code, &reason.into()));
    }
}

fn decode_close_payload(payload: &[u8]) -> Result<Close, Error> {
    match payload.len() {
        0 => Ok(Close::new(close::NO_STATUS_RECEIVED, "")),
        1 => Err(Error::ProtocolError("close frame payload must be empty or at least 2 bytes".into())),
        _ => {
            let code = u16::from_be_bytes([payload[0], payload[1]]);
            if !(1000 ..= 4999).contains(&code) || close::is_reserved_sentinel(code) {
                return Err(Error::ProtocolError(format!("invalid close code on the wire: {}", code)));
            }
            let reason = std::str::from_utf8(&payload[2 ..]).map_err(|_| Error::ProtocolError("close reason is not valid UTF-8".into()))?;
            Ok(Close::new(code, reason))
        }
    }
}

fn encode_close_frame(close: &Close) -> Frame {
    let mut payload = BytesMut::new();
    if close.code != close::NO_STATUS_RECEIVED || !close.reason.is_empty() {
        payload.extend_from_slice(&close.code.to_be_bytes());
        payload.extend_from_slice(close.reason.as_bytes());
    }
    Frame::with_payload(OpCode::Close, payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handshake(client: &mut Connection, server: &mut Connection, uri: &str) {
        let request = client.connect(uri).unwrap();
        let bytes = client.send_request(&request);
        let (events, _) = server.receive_data(&bytes).unwrap();
        let request = match events.into_iter().next() {
            Some(Event::Request(r)) => r,
            other => panic!("expected Request event, got {:?}", other)
        };
        let response = server.accept(&request).unwrap();
        let bytes = server.send_response(&response);
        let (events, _) = client.receive_data(&bytes).unwrap();
        match events.into_iter().next() {
            Some(Event::Response { error: None, .. }) => {}
            other => panic!("expected successful Response event, got {:?}", other)
        }
    }

    #[test]
    fn scenario_client_opening_request() {
        let mut client = Connection::new(Mode::Client);
        let request = client.connect("wss://example.com/test").unwrap();
        let wire = String::from_utf8(client.send_request(&request)).unwrap();
        assert!(wire.starts_with("GET /test HTTP/1.1\r\nHost: example.com\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Key: "));
        assert!(wire.contains("\r\nSec-WebSocket-Version: 13\r\n"));
        assert!(wire.ends_with("\r\n\r\n"));
    }

    #[test]
    fn scenario_handshake_round_trip_reaches_open() {
        let mut client = Connection::new(Mode::Client);
        let mut server = Connection::new(Mode::Server);
        handshake(&mut client, &mut server, "ws://example.com/chat");
        assert_eq!(client.state(), State::Open);
        assert_eq!(server.state(), State::Open);
    }

    #[test]
    fn scenario_reject_response() {
        let mut client = Connection::new(Mode::Client);
        client.connect("ws://example.com/").unwrap();
        let wire = b"HTTP/1.1 404 Not Found\r\nContent-Length: 13\r\n\r\nSorry folks.\n";
        let (events, _) = client.receive_data(wire).unwrap();
        assert_eq!(client.state(), State::Connecting);
        match events.into_iter().next() {
            Some(Event::Response { response, error: Some(Error::InvalidStatus(404)) }) => {
                assert_eq!(response.body, b"Sorry folks.\n");
            }
            other => panic!("expected rejected Response event, got {:?}", other)
        }
    }

    #[test]
    fn scenario_missing_connection_header() {
        let mut client = Connection::new(Mode::Client);
        let request = client.connect("ws://example.com/").unwrap();
        let key = request.headers.get("Sec-WebSocket-Key").unwrap();
        let accept = crate::handshake::accept_key(key);
        let wire = format!("HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nSec-WebSocket-Accept: {}\r\n\r\n", accept);
        let (events, _) = client.receive_data(wire.as_bytes()).unwrap();
        assert_eq!(client.state(), State::Connecting);
        match events.into_iter().next() {
            Some(Event::Response { error: Some(Error::InvalidHeader(msg)), .. }) => assert_eq!(msg, "missing Connection header"),
            other => panic!("expected InvalidHeader, got {:?}", other)
        }
    }

    #[test]
    fn data_messages_round_trip_after_handshake() {
        let mut client = Connection::new(Mode::Client);
        let mut server = Connection::new(Mode::Server);
        handshake(&mut client, &mut server, "ws://example.com/");

        let bytes = client.send_text("hello", true).unwrap();
        let (events, _) = server.receive_data(&bytes).unwrap();
        assert!(matches!(events.as_slice(), [Event::Text(t)] if t == "hello"));

        let bytes = server.send_binary(&[1, 2, 3], true).unwrap();
        let (events, _) = client.receive_data(&bytes).unwrap();
        assert!(matches!(events.as_slice(), [Event::Binary(b)] if b == &[1, 2, 3]));
    }

    #[test]
    fn fragmented_message_reassembles_with_interleaved_control_frame() {
        let mut client = Connection::new(Mode::Client);
        let mut server = Connection::new(Mode::Server);
        handshake(&mut client, &mut server, "ws://example.com/");

        let mut bytes = client.send_text("hel", false).unwrap();
        bytes.extend(client.send_ping(b"hi").unwrap());
        bytes.extend(client.send_continuation(b"lo", true).unwrap());

        let (events, outbound) = server.receive_data(&bytes).unwrap();
        assert!(matches!(events.as_slice(), [Event::Ping(p), Event::Text(t)] if p == b"hi" && t == "hello"));
        assert!(!outbound.is_empty());
    }

    #[test]
    fn invalid_utf8_fails_connection_with_1007() {
        let mut client = Connection::new(Mode::Client);
        let mut server = Connection::new(Mode::Server);
        handshake(&mut client, &mut server, "ws://example.com/");

        let frame = Frame::with_payload(OpCode::Text, &b"\xff\xfe"[..]);
        let bytes = FrameCodec::new().encode(&frame, Some(mask::generate_key()));
        let (events, outbound) = server.receive_data(&bytes).unwrap();
        assert!(events.is_empty());
        assert!(!outbound.is_empty());
        assert_eq!(server.state(), State::Closed);
        assert_eq!(server.closed().unwrap().sent.unwrap().code, 1007);
    }

    #[test]
    fn oversized_message_fails_with_1009() {
        let mut client = Connection::new(Mode::Client);
        let mut server = Connection::new(Mode::Server);
        handshake(&mut client, &mut server, "ws://example.com/");
        server.set_max_message_size(4);

        let bytes = client.send_binary(b"too much data", true).unwrap();
        let (events, outbound) = server.receive_data(&bytes).unwrap();
        assert!(events.is_empty());
        assert_eq!(server.closed().unwrap().sent.unwrap().code, 1009);
        assert!(!outbound.is_empty());
    }

    #[test]
    fn scenario_close_exchange_converges_on_closed() {
        let mut client = Connection::new(Mode::Client);
        let mut server = Connection::new(Mode::Server);
        handshake(&mut client, &mut server, "ws://example.com/");

        let client_close = client.send_close(Some(1000), Some("")).unwrap();
        let server_close = server.send_close(Some(1000), Some("")).unwrap();

        client.receive_data(&server_close).unwrap();
        server.receive_data(&client_close).unwrap();

        assert_eq!(client.state(), State::Closed);
        assert_eq!(server.state(), State::Closed);
        assert!(client.closed().unwrap().is_ok());
        assert!(server.closed().unwrap().is_ok());
    }

    #[test]
    fn send_before_open_is_invalid_state() {
        let mut client = Connection::new(Mode::Client);
        assert!(matches!(client.send_text("hi", true), Err(Error::InvalidState(_))));
    }

    #[test]
    fn eof_with_empty_buffer_closes_silently() {
        let mut client = Connection::new(Mode::Client);
        let mut server = Connection::new(Mode::Server);
        handshake(&mut client, &mut server, "ws://example.com/");

        let bytes = server.receive_eof();
        assert!(bytes.is_empty());
        assert_eq!(server.state(), State::Closed);
        assert!(server.closed().unwrap().received.is_none());
    }

    #[test]
    fn eof_mid_frame_aborts_with_protocol_error() {
        let mut client = Connection::new(Mode::Client);
        let mut server = Connection::new(Mode::Server);
        handshake(&mut client, &mut server, "ws://example.com/");

        let mut bytes = client.send_text("hello", true).unwrap();
        bytes.truncate(bytes.len() - 2);
        let (events, _) = server.receive_data(&bytes).unwrap();
        assert!(events.is_empty());

        let outbound = server.receive_eof();
        assert!(!outbound.is_empty());
        assert_eq!(server.state(), State::Closed);
        assert_eq!(server.closed().unwrap().sent.unwrap().code, 1002);
    }
}
