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
// Once started, the tests can be executed with: wstest -m fuzzingclient
//
// See https://github.com/crossbario/autobahn-testsuite for details.

use std::{
    error::Error as StdError,
    io::{Read, Write},
    net::{TcpListener, TcpStream},
    thread
};
use wsio::{Connection, Event, Mode, State};

type BoxedError = Box<dyn StdError>;

fn main() -> Result<(), BoxedError> {
    env_logger::init();
    let listener = TcpListener::bind("127.0.0.1:9001")?;
    for stream in listener.incoming() {
        let stream = stream?;
        thread::spawn(move || {
            if let Err(e) = serve(stream) {
                log::error!("connection error: {}", e)
            }
        });
    }
    Ok(())
}

fn serve(mut stream: TcpStream) -> Result<(), BoxedError> {
    let mut conn = Connection::new(Mode::Server);
    #[cfg(feature = "deflate")]
    conn.add_server_extension(Box::new(wsio::extension::deflate::DeflateServerFactory::new()));

    let mut buf = [0u8; 8 * 1024];
    while conn.state() == State::Connecting {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Ok(());
        }
        let (events, _) = conn.receive_data(&buf[.. n])?;
        for event in events {
            if let Event::Request(request) = event {
                let response = conn.accept(&request)?;
                stream.write_all(&conn.send_response(&response))?;
            }
        }
    }

    loop {
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
