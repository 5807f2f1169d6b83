use crate::{
    limits::{
        ConnLimits, ProtocolLimits, ReqLimits, RespLimits, ServerLimits, WaitStrategy, WsLimits,
    },
    server::{connection::TcpConnection, routes::Routes},
};
use crossbeam::queue::SegQueue;
use std::{io, net::SocketAddr, sync::Arc};
use tokio::{
    net::{TcpListener, TcpStream},
    task::yield_now,
    time::sleep as tokio_sleep,
};
use tracing::{debug, error, info, warn};

/// An HTTP server whose connections can upgrade to WebSocket.
///
/// Accepted sockets wait in a queue until one of the workers spawned by
/// [`ServerBuilder::build`] picks them up. A worker owns one connection at a
/// time, through every request and, after an upgrade, every WebSocket message.
///
/// # Examples
///
/// ```no_run
/// use duplex_web::{Response, Routes, Server, StatusCode};
/// use tokio::net::TcpListener;
///
/// #[tokio::main]
/// async fn main() {
///     let routes = Routes::new("./public")
///         .route("/health", |_| Ok(Response::text(StatusCode::Ok, "up")));
///
///     Server::builder()
///         .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
///         .routes(routes)
///         .build()
///         .launch()
///         .await
/// }
/// ```
pub struct Server {
    listener: TcpListener,
    stream_queue: TcpQueue,
    server_limits: ServerLimits,
}

impl Server {
    /// Creates a new builder for configuring the server instance.
    #[inline]
    pub fn builder() -> ServerBuilder {
        ServerBuilder {
            listener: None,
            routes: None,

            server_limits: None,
            connection_limits: None,
            request_limits: None,
            response_limits: None,
            websocket_limits: None,
        }
    }

    /// The address the listener is bound to.
    #[inline]
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Starts accepting connections. Never returns.
    ///
    /// A connection arriving while [`ServerLimits::max_pending_connections`]
    /// sockets are already queued is dropped.
    pub async fn launch(self) {
        if let Ok(addr) = self.listener.local_addr() {
            info!(%addr, "server listening");
        }

        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(value) => value,
                Err(err) => {
                    error!(error = %err, "accept failed");
                    continue;
                }
            };

            match self.stream_queue.len() < self.server_limits.max_pending_connections {
                true => self.stream_queue.push((stream, peer)),
                false => {
                    warn!(%peer, "connection queue full, dropping connection");
                    drop(stream);
                }
            }
        }
    }

    #[inline]
    async fn get_stream(queue: &TcpQueue, wait: &WaitStrategy) -> (TcpStream, SocketAddr) {
        loop {
            if let Some(value) = queue.pop() {
                return value;
            }

            match wait {
                WaitStrategy::Yield => yield_now().await,
                WaitStrategy::Sleep(time) => tokio_sleep(*time).await,
            }
        }
    }
}

//

/// Builder for configuring and creating [`Server`] instances.
///
/// Only [`listener`](Self::listener) and [`routes`](Self::routes) are
/// required, every limit falls back to its default.
pub struct ServerBuilder {
    listener: Option<TcpListener>,
    routes: Option<Arc<Routes>>,

    server_limits: Option<ServerLimits>,
    connection_limits: Option<ConnLimits>,
    request_limits: Option<ReqLimits>,
    response_limits: Option<RespLimits>,
    websocket_limits: Option<WsLimits>,
}

impl ServerBuilder {
    /// Sets the TCP listener that the server will use to accept connections.
    ///
    /// **This is a required component.**
    #[inline(always)]
    pub fn listener(mut self, listener: TcpListener) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Sets the web root and the handlers answering requests.
    ///
    /// **This is a required component.**
    #[inline(always)]
    pub fn routes(mut self, routes: Routes) -> Self {
        self.routes = Some(Arc::new(routes));
        self
    }

    /// Configures worker count and accept queueing.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # #[tokio::main]
    /// # async fn main() {
    /// use duplex_web::{Routes, Server, limits::{ServerLimits, WaitStrategy}};
    /// use tokio::net::TcpListener;
    ///
    /// let server = Server::builder()
    ///     .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
    ///     .routes(Routes::new("./public"))
    ///     .server_limits(ServerLimits {
    ///         max_connections: 1000,
    ///         wait_strategy: WaitStrategy::Yield,
    ///         ..ServerLimits::default()
    ///     })
    ///     .build();
    /// # }
    /// ```
    #[inline(always)]
    pub fn server_limits(mut self, limits: ServerLimits) -> Self {
        self.server_limits = Some(limits);
        self
    }

    /// Configures socket options and timeouts.
    #[inline(always)]
    pub fn connection_limits(mut self, limits: ConnLimits) -> Self {
        self.connection_limits = Some(limits);
        self
    }

    /// Configures request size limits.
    #[inline(always)]
    pub fn request_limits(mut self, limits: ReqLimits) -> Self {
        self.request_limits = Some(limits);
        self
    }

    /// Configures response buffering.
    #[inline(always)]
    pub fn response_limits(mut self, limits: RespLimits) -> Self {
        self.response_limits = Some(limits);
        self
    }

    /// Configures WebSocket frame and message limits.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # #[tokio::main]
    /// # async fn main() {
    /// use duplex_web::{Routes, Server, limits::WsLimits};
    /// use tokio::net::TcpListener;
    ///
    /// let server = Server::builder()
    ///     .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
    ///     .routes(Routes::new("./public"))
    ///     .websocket_limits(WsLimits {
    ///         max_payload: 16 * 1024,
    ///         ..WsLimits::default()
    ///     })
    ///     .build();
    /// # }
    /// ```
    #[inline(always)]
    pub fn websocket_limits(mut self, limits: WsLimits) -> Self {
        self.websocket_limits = Some(limits);
        self
    }

    /// Finalizes the builder, spawning one worker task per
    /// [`ServerLimits::max_connections`].
    ///
    /// Must be called inside a Tokio runtime.
    ///
    /// # Panics
    ///
    /// Error messages:
    /// - ``The `listener` method must be called to create``
    /// - ``The `routes` method must be called to create``
    ///
    /// Panics when:
    /// - The `listener` method was not called.
    /// - The `routes` method was not called.
    #[inline]
    #[track_caller]
    pub fn build(self) -> Server {
        let (listener, routes, limits) = self.get_all_parts();

        let stream_queue = Arc::new(SegQueue::new());

        for _ in 0..limits.0.max_connections {
            Self::spawn_worker(&stream_queue, &limits, &routes);
        }

        Server {
            listener,
            stream_queue,
            server_limits: limits.0,
        }
    }

    #[inline]
    fn spawn_worker(queue: &TcpQueue, limits: &AllLimits, routes: &Arc<Routes>) {
        let queue = queue.clone();
        let routes = routes.clone();
        let limits = limits.clone();

        tokio::spawn(async move {
            loop {
                let (mut stream, peer) =
                    Server::get_stream(&queue, &limits.0.wait_strategy).await;
                debug!(%peer, "connection accepted");

                let mut conn = TcpConnection::new(routes.clone(), &limits);
                match conn.run(&mut stream, peer).await {
                    Ok(()) => debug!(%peer, "connection closed"),
                    Err(err) => debug!(%peer, error = %err, "connection closed with error"),
                }
            }
        });
    }

    #[inline]
    #[track_caller]
    fn get_all_parts(self) -> (TcpListener, Arc<Routes>, AllLimits) {
        (
            self.listener
                .expect("The `listener` method must be called to create"),
            self.routes
                .expect("The `routes` method must be called to create"),
            (
                self.server_limits.unwrap_or_default(),
                self.connection_limits.unwrap_or_default(),
                ProtocolLimits {
                    request: self.request_limits.unwrap_or_default(),
                    response: self.response_limits.unwrap_or_default(),
                    websocket: self.websocket_limits.unwrap_or_default(),
                },
            ),
        )
    }
}

type TcpQueue = Arc<SegQueue<(TcpStream, SocketAddr)>>;
pub(crate) type AllLimits = (ServerLimits, ConnLimits, ProtocolLimits);
