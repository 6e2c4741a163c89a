// Copyright (c) 2019 Parity Technologies (UK) Ltd.
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

// Example to be used with the autobahn test suite, a fully automated test
// suite to verify client and server implementations of the websocket
// protocol.
//
// Once started, the tests can be executed with: wstest -m fuzzingserver
//
// See https://github.com/crossbario/autobahn-testsuite for details.
//
// `wsio` performs no I/O of its own, so this demo owns the socket: it reads
// bytes off a blocking `TcpStream`, hands them to `Connection::receive_data`,
// and writes back whatever bytes the connection produces.

use std::{
    error::Error as StdError,
    io::{Read, Write},
    net::TcpStream
};
use wsio::{Connection, Event, Mode, State};

const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

type BoxedError = Box<dyn StdError>;

fn main() -> Result<(), BoxedError> {
    env_logger::init();
    let n = num_of_cases()?;
    for i in 1 ..= n {
        if let Err(e) = run_case(i) {
            log::error!("case {}: {:?}", i, e)
        }
    }
    update_report()?;
    Ok(())
}

fn num_of_cases() -> Result<usize, BoxedError> {
    let (_stream, _conn, text) = handshake_and_read_one_text("/getCaseCount")?;
    let num: usize = text.parse()?;
    log::info!("{} cases to run", num);
    Ok(num)
}

fn run_case(n: usize) -> Result<(), BoxedError> {
    log::info!("running case {}", n);
    let resource = format!("/runCase?case={}&agent=wsio-{}", n, PKG_VERSION);
    let (mut stream, mut conn, _) = handshake(&resource)?;
    loop {
        let mut buf = [0u8; 8 * 1024];
        let n = stream.read(&mut buf)?;
        if n == 0 {
            conn.receive_eof();
            return Ok(());
        }
        let (events, outbound) = conn.receive_data(&buf[.. n])?;
        if !outbound.is_empty() {
            stream.write_all(&outbound)?;
        }
        for event in events {
            match event {
                Event::Text(text) => {
                    let bytes = conn.send_text(&text, true)?;
                    stream.write_all(&bytes)?;
                }
                Event::Binary(data) => {
                    let bytes = conn.send_binary(&data, true)?;
                    stream.write_all(&bytes)?;
                }
                _ => {}
            }
        }
        if conn.state() == State::Closed {
            return Ok(());
        }
    }
}

fn update_report() -> Result<(), BoxedError> {
    log::info!("requesting report generation");
    let resource = format!("/updateReports?agent=wsio-{}", PKG_VERSION);
    let (mut stream, mut conn, _) = handshake(&resource)?;
    let bytes = conn.send_close(None, None)?;
    stream.write_all(&bytes)?;
    Ok(())
}

/// Connect, perform the opening handshake and block until the connection is
/// `Open` (or the handshake is rejected, which is surfaced as an error).
fn handshake(resource: &str) -> Result<(TcpStream, Connection, Option<String>), BoxedError> {
    let mut stream = TcpStream::connect("127.0.0.1:9001")?;
    let mut conn = Connection::new(Mode::Client);
    #[cfg(feature = "deflate")]
    conn.add_client_extension(Box::new(wsio::extension::deflate::DeflateClientFactory::new()));
    let uri = format!("ws://127.0.0.1:9001{}", resource);
    let request = conn.connect(&uri)?;
    stream.write_all(&conn.send_request(&request))?;

    let mut buf = [0u8; 8 * 1024];
    loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err("connection closed during handshake".into());
        }
        let (events, _) = conn.receive_data(&buf[.. n])?;
        for event in events {
            if let Event::Response { error: Some(e), .. } = event {
                return Err(e.into());
            }
        }
        if conn.state() == State::Open {
            return Ok((stream, conn, None));
        }
    }
}

/// Like [`handshake`], but also reads the first complete text message the
/// server sends (used for `getCaseCount`).
fn handshake_and_read_one_text(resource: &str) -> Result<(TcpStream, Connection, String), BoxedError> {
    let (mut stream, mut conn, _) = handshake(resource)?;
    let mut buf = [0u8; 8 * 1024];
    loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err("connection closed before a text message arrived".into());
        }
        let (events, outbound) = conn.receive_data(&buf[.. n])?;
        if !outbound.is_empty() {
            stream.write_all(&outbound)?;
        }
        for event in events {
            if let Event::Text(text) = event {
                return Ok((stream, conn, text));
            }
        }
    }
}
