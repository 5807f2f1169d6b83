use crate::{
    http::personality::Http,
    limits::ProtocolLimits,
    server::routes::Routes,
    ws::socket::WebSocket,
};
use std::sync::Arc;
use tracing::debug;

/// The transport under a [`Connection`].
///
/// `send` queues bytes for the peer in order; `request_close` asks the
/// transport to close once the queued bytes are written.
pub trait Session {
    fn send(&mut self, bytes: Vec<u8>);
    fn request_close(&mut self);
}

/// The protocol currently spoken on a connection.
///
/// A connection starts as [`Http`] and may switch to [`WebSocket`] once,
/// after a successful upgrade handshake.
pub enum Personality {
    Http(Http),
    WebSocket(WebSocket),
}

/// How far a personality got through a chunk of input.
pub(crate) enum Consumed {
    /// Every byte was used, more may come.
    All,
    /// The connection must close; remaining input is discarded.
    Closed,
    /// The first `used` bytes ended with an accepted upgrade.
    Upgrade { used: usize, socket: WebSocket },
}

impl Personality {
    #[inline]
    pub fn is_websocket(&self) -> bool {
        matches!(self, Personality::WebSocket(_))
    }

    #[inline]
    fn consume(&mut self, session: &mut dyn Session, input: &[u8]) -> Consumed {
        match self {
            Personality::Http(http) => http.consume(session, input),
            Personality::WebSocket(socket) => socket.consume(session, input),
        }
    }

    #[inline]
    fn closing(&mut self, session: &mut dyn Session) {
        if let Personality::WebSocket(socket) = self {
            socket.closing(session);
        }
    }
}

/// Binds a [`Session`] to its current [`Personality`].
///
/// Feed it input with [`process_input`](Self::process_input) and call
/// [`close`](Self::close) once the transport goes away. The server drives one
/// per TCP socket; other event loops can drive their own.
pub struct Connection<S: Session> {
    session: S,
    personality: Personality,
    closing: bool,
    closed: bool,
}

impl<S: Session> Connection<S> {
    pub fn new(session: S, routes: Arc<Routes>, limits: &ProtocolLimits) -> Self {
        Self {
            session,
            personality: Personality::Http(Http::new(routes, limits)),
            closing: false,
            closed: false,
        }
    }

    /// Hands input to the current personality.
    ///
    /// Bytes left over after an upgrade go to the new personality within the
    /// same call. Returns `false` once the connection should close; further
    /// input is then ignored.
    pub fn process_input(&mut self, mut input: &[u8]) -> bool {
        while !self.closing && !input.is_empty() {
            match self.personality.consume(&mut self.session, input) {
                Consumed::All => break,
                Consumed::Closed => self.closing = true,
                Consumed::Upgrade { used, mut socket } => {
                    input = &input[used..];
                    debug!(leftover = input.len(), "switching to websocket");

                    let open = socket.connected(&mut self.session);
                    self.personality = Personality::WebSocket(socket);
                    if !open {
                        self.closing = true;
                    }
                }
            }
        }

        !self.closing
    }

    /// Runs the personality's close notification. Only the first call acts.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.closing = true;

        self.personality.closing(&mut self.session);
    }

    #[inline]
    pub fn personality(&self) -> &Personality {
        &self.personality
    }

    #[inline]
    pub fn session(&self) -> &S {
        &self.session
    }

    #[inline]
    pub fn session_mut(&mut self) -> &mut S {
        &mut self.session
    }
}
