//! Server configuration limits and timeouts
//!
//! Every limit has a conservative default. Fields are public so that only the
//! values you care about need to be changed, the rest is filled in with
//! `..Default::default()`.
//!
//! # Memory Consumption
//!
//! Each active connection consumes memory according to:
//!
//! `Total` = `Read Buffer` ([`ConnLimits::read_buffer_size`]) +
//!           `Request Buffer` (up to [`ReqLimits::header_size`] + [`ReqLimits::content_size`]) +
//!           `Response Buffer` ([`RespLimits`]) +
//!           `WebSocket Buffers` (up to [`WsLimits::max_payload`] + [`WsLimits::max_message`])
//!
//! # Examples
//!
//! ```no_run
//! use duplex_web::{Routes, Server, limits::{ConnLimits, ReqLimits, ServerLimits}};
//! use tokio::net::TcpListener;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     Server::builder()
//!         .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
//!         .routes(Routes::new("./public"))
//!         .server_limits(ServerLimits {
//!             max_connections: 500, // More simultaneous WebSocket clients
//!             ..ServerLimits::default()
//!         })
//!         .connection_limits(ConnLimits {
//!             socket_read_timeout: Duration::from_secs(30),
//!             ..ConnLimits::default()
//!         })
//!         .request_limits(ReqLimits {
//!             content_size: 64 * 1024, // Small form posts only
//!             ..ReqLimits::default()
//!         })
//!         .build()
//!         .launch()
//!         .await;
//! }
//! ```

use std::time::Duration;

/// Controls server-level concurrency and queueing behavior.
///
/// # Connection management
/// ```text
///                            [------------]
///                            [ Tcp accept ]
///                            [------------]
///                                  ||
///                                  || TCP_STREAM
///                                  \/
/// [--------------]   Yes   /-----------------\   No   [---------------]
/// [ Add to queue ] <====== | Is there space? | =====> [ Drop + warn!  ]
/// [--------------]         \-----------------/        [---------------]
///        ||
///        \==================\\          //====================\
///                            V          V                    ||
/// [--------]   Yes   /-------------------------\   No   [------]
/// [ Worker ] <====== | Is there a free worker? | =====> [ Wait ]
/// [--------]         \-------------------------/        [------]
/// ```
///
/// A worker is a long-running task created once by
/// [`ServerBuilder::build`](crate::ServerBuilder::build). It drives one connection
/// at a time, from the first HTTP request until the socket closes, including any
/// time spent as a WebSocket after an upgrade.
#[derive(Debug, Clone)]
pub struct ServerLimits {
    /// Number of connections served at the same time (default: `100`).
    ///
    /// Exactly this many workers are spawned. An upgraded WebSocket keeps its
    /// worker busy for as long as it is open.
    pub max_connections: usize,

    /// Maximum number of accepted connections waiting for a worker (default: `250`).
    ///
    /// Connections accepted while the queue is full are closed immediately.
    pub max_pending_connections: usize,

    /// How idle workers wait for new connections (default: `Sleep(50µs)`).
    pub wait_strategy: WaitStrategy,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ServerLimits {
    fn default() -> Self {
        Self {
            max_connections: 100,
            max_pending_connections: 250,
            wait_strategy: WaitStrategy::Sleep(Duration::from_micros(50)),

            _priv: (),
        }
    }
}

/// Strategy for worker task waiting when no connections are available
#[derive(Debug, Clone)]
pub enum WaitStrategy {
    /// While waiting, uses [`tokio::task::yield_now()`]
    ///
    /// Keeps latency minimal at the cost of a busy CPU.
    Yield,

    /// While waiting, uses [`tokio::time::sleep()`]
    Sleep(Duration),
}

/// Connection-level limits and timeouts
#[derive(Debug, Clone)]
pub struct ConnLimits {
    /// Inactivity timeout (default: `2 minutes`)
    ///
    /// A connection that delivers no bytes for this long is closed. This applies
    /// to idle keep-alive HTTP connections and to silent WebSockets alike.
    pub socket_read_timeout: Duration,

    /// Maximum duration of a single flush to the socket (default: `3 seconds`)
    pub socket_write_timeout: Duration,

    /// Size of the buffer used for each socket read (default: `8192`)
    pub read_buffer_size: usize,

    /// Disable Nagle's algorithm on accepted sockets (default: `true`)
    pub tcp_nodelay: bool,

    /// Enable `SO_KEEPALIVE` on accepted sockets (default: `true`)
    pub tcp_keepalive: bool,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ConnLimits {
    #[inline(always)]
    fn default() -> Self {
        Self {
            socket_read_timeout: Duration::from_secs(120),
            socket_write_timeout: Duration::from_secs(3),
            read_buffer_size: 8192,
            tcp_nodelay: true,
            tcp_keepalive: true,

            _priv: (),
        }
    }
}

/// Limits applied while framing an HTTP request.
///
/// Both limits are enforced before the corresponding bytes are buffered, a
/// violation answers `400 Bad Request` and closes the connection.
#[derive(Debug, Clone, PartialEq)]
pub struct ReqLimits {
    /// Maximum size of the request line plus headers, terminating blank line
    /// included (default: `8192`)
    pub header_size: usize,

    /// Maximum accepted `Content-Length` (default: `1 MiB`)
    pub content_size: usize,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ReqLimits {
    #[inline(always)]
    fn default() -> Self {
        Self {
            header_size: 8192,
            content_size: 1024 * 1024,

            _priv: (),
        }
    }
}

/// Response serialization settings.
///
/// # Buffer Management
///
/// Every response is serialized into a single buffer before it is handed to the
/// connection, so headers and body leave in one write. The buffer starts at
/// `default_capacity`. A buffer that grew past `max_capacity` (a large file, say)
/// is not kept around for the next response.
#[derive(Debug, Clone, PartialEq)]
pub struct RespLimits {
    /// Initial capacity of the response buffer (default: `1024`)
    pub default_capacity: usize,

    /// Capacity above which the buffer is released after use (default: `64 KiB`)
    pub max_capacity: usize,

    /// Chunk size used when copying a file body into the buffer (default: `16 KiB`)
    pub file_chunk_size: usize,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for RespLimits {
    #[inline(always)]
    fn default() -> Self {
        Self {
            default_capacity: 1024,
            max_capacity: 64 * 1024,
            file_chunk_size: 16 * 1024,

            _priv: (),
        }
    }
}

/// WebSocket framing limits
#[derive(Debug, Clone, PartialEq)]
pub struct WsLimits {
    /// Largest payload of a single frame (default: `128 KiB`)
    ///
    /// Incoming frames above it are a protocol error. Outgoing messages above it
    /// are split into continuation frames.
    pub max_payload: usize,

    /// Largest reassembled message (default: `16 MiB`)
    pub max_message: usize,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for WsLimits {
    #[inline(always)]
    fn default() -> Self {
        Self {
            max_payload: 128 * 1024,
            max_message: 16 * 1024 * 1024,

            _priv: (),
        }
    }
}

/// The limits every connection needs to speak HTTP and WebSocket.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProtocolLimits {
    /// See [`ReqLimits`]
    pub request: ReqLimits,
    /// See [`RespLimits`]
    pub response: RespLimits,
    /// See [`WsLimits`]
    pub websocket: WsLimits,
}
