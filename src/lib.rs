//! duplex_web - Embedded HTTP/1.1 server with in-place WebSocket upgrade
//!
//! Serves static files from a web root, answers registered paths with your
//! own handlers, and lets any connection switch to WebSocket (RFC 6455) after
//! a successful handshake, keeping the same socket and worker.
//!
//! # Protocol Support
//!
//! - **HTTP/1.1**: `GET`, `HEAD` and `POST`, persistent and pipelined connections,
//!   form-encoded bodies
//! - **WebSocket**: protocol version 13, text and binary messages, fragmentation,
//!   ping/pong and close
//!
//! # Architecture
//!
//! - [`Connection`] binds a [`Session`] (the transport) to a [`Personality`]
//!   (the protocol), starting with [`Http`] and switching to [`WebSocket`] once
//! - [`Routes`] holds the web root, [`RequestHandler`]s and [`WebSocketFactory`]s
//! - [`Server`] drives one [`Connection`] per TCP socket on a fixed pool of
//!   Tokio worker tasks
//!
//! # Examples
//!
//! ```no_run
//! use duplex_web::{Outbound, Request, Response, Routes, Server, StatusCode, WebSocketHandler};
//! use tokio::net::TcpListener;
//!
//! struct Echo;
//!
//! impl WebSocketHandler for Echo {
//!     fn text(&mut self, socket: &mut Outbound<'_>, text: String) {
//!         socket.send_text(&text);
//!     }
//!
//!     fn binary(&mut self, socket: &mut Outbound<'_>, data: Vec<u8>) {
//!         socket.send_binary(&data);
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let routes = Routes::new("./public")
//!         .route("/hello", |req| {
//!             let name = req.param("name").unwrap_or("World");
//!             Ok(Response::text(StatusCode::Ok, format!("Hello, {name}!")))
//!         })
//!         .websocket("/echo", |_: &Request| Echo);
//!
//!     Server::builder()
//!         .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
//!         .routes(routes)
//!         .build()
//!         .launch()
//!         .await;
//! }
//! ```
//!
//! Logging goes through [`tracing`]; install any subscriber to see it.

pub(crate) mod http {
    pub mod mime;
    pub(crate) mod personality;
    pub mod query;
    pub(crate) mod request;
    pub(crate) mod response;
    pub(crate) mod types;
}
pub(crate) mod server {
    pub(crate) mod connection;
    pub(crate) mod routes;
    pub(crate) mod server_impl;
    pub(crate) mod session;
}
pub mod ws {
    //! WebSocket framing and handshake primitives.

    pub(crate) mod frame;
    pub(crate) mod handshake;
    pub(crate) mod socket;

    pub use frame::{apply_mask, encode_frame, encode_message, Frame, Opcode};
    pub use handshake::{accept_key, GUID};
}
pub(crate) mod errors;
pub mod limits;

pub use crate::{
    errors::{HttpError, WsError},
    http::{
        mime,
        personality::Http,
        query,
        request::Request,
        response::{
            write::{BodyWriter, WriteBuffer},
            Body, Response,
        },
        types::{Method, MultiMap, StatusCode, Version},
    },
    server::{
        routes::{RequestHandler, Routes, WebSocketFactory},
        server_impl::{Server, ServerBuilder},
        session::{Connection, Personality, Session},
    },
    ws::socket::{Outbound, WebSocket, WebSocketHandler},
};

#[cfg(test)]
pub(crate) mod tools {
    use crate::{
        http::request::{Parser, Progress, Request},
        limits::ReqLimits,
        server::session::Session,
        ws::frame::{encode_frame, Opcode},
    };
    use std::str::from_utf8;

    #[inline]
    pub fn str_op(value: &[u8]) -> &str {
        from_utf8(value).unwrap()
    }

    #[inline]
    pub fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
        memchr::memmem::find(haystack, needle)
    }

    /// Parses one complete request.
    pub fn request(src: &str) -> Request {
        let mut parser = Parser::new(&ReqLimits::default());
        match parser.parse(src.as_bytes()) {
            Ok(Progress::Complete(_)) => parser.take_request(),
            other => panic!("not a complete request ({other:?}): {src:?}"),
        }
    }

    /// A single frame as a client sends it, masked.
    pub fn client_frame(fin: bool, opcode: Opcode, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(payload.len() + 14);
        encode_frame(&mut out, fin, opcode, payload, Some([0x37, 0xFA, 0x21, 0x3D]));
        out
    }

    #[derive(Debug, Default)]
    pub struct RecordingSession {
        pub sent: Vec<u8>,
        pub sends: usize,
        pub close_requested: bool,
    }

    impl Session for RecordingSession {
        fn send(&mut self, bytes: Vec<u8>) {
            self.sent.extend_from_slice(&bytes);
            self.sends += 1;
        }

        fn request_close(&mut self) {
            self.close_requested = true;
        }
    }
}
