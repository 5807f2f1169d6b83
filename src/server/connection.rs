use crate::{
    limits::{ConnLimits, RespLimits},
    server::{
        routes::Routes,
        server_impl::AllLimits,
        session::{Connection, Session},
    },
};
use socket2::SockRef;
use std::{io, net::SocketAddr, sync::Arc};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    time::timeout,
};
use tracing::{debug, trace};

/// [`Session`] over a TCP socket: output is queued here and flushed by
/// [`TcpConnection::run`] after every read.
#[derive(Debug, Default)]
pub(crate) struct TcpSession {
    outbound: Vec<u8>,
    close_requested: bool,
}

impl Session for TcpSession {
    #[inline]
    fn send(&mut self, bytes: Vec<u8>) {
        if self.outbound.is_empty() {
            self.outbound = bytes;
        } else {
            self.outbound.extend_from_slice(&bytes);
        }
    }

    #[inline]
    fn request_close(&mut self) {
        self.close_requested = true;
    }
}

pub(crate) struct TcpConnection {
    connection: Connection<TcpSession>,
    read_buffer: Vec<u8>,

    conn_limits: ConnLimits,
    resp_limits: RespLimits,
}

impl TcpConnection {
    #[inline]
    pub(crate) fn new(routes: Arc<Routes>, limits: &AllLimits) -> Self {
        Self {
            connection: Connection::new(TcpSession::default(), routes, &limits.2),
            read_buffer: vec![0; limits.1.read_buffer_size.max(1)],

            conn_limits: limits.1.clone(),
            resp_limits: limits.2.response.clone(),
        }
    }

    /// Serves the socket until either side closes it.
    pub(crate) async fn run(&mut self, stream: &mut TcpStream, peer: SocketAddr) -> io::Result<()> {
        configure(stream, &self.conn_limits);

        let result = self.impl_run(stream, peer).await;

        self.connection.close();
        let session = self.connection.session_mut();
        let _ = writer::flush(stream, session, &self.conn_limits, &self.resp_limits).await;
        let _ = stream.shutdown().await;

        result
    }

    async fn impl_run(&mut self, stream: &mut TcpStream, peer: SocketAddr) -> io::Result<()> {
        loop {
            let read = match timeout(
                self.conn_limits.socket_read_timeout,
                stream.read(&mut self.read_buffer),
            )
            .await
            {
                Ok(Ok(0)) => return Ok(()),
                Ok(Ok(read)) => read,
                Ok(Err(err)) => return Err(err),
                Err(_) => {
                    debug!(%peer, "read timed out");
                    return Ok(());
                }
            };
            trace!(%peer, read, "bytes received");

            let open = self.connection.process_input(&self.read_buffer[..read]);
            let session = self.connection.session_mut();
            writer::flush(stream, session, &self.conn_limits, &self.resp_limits).await?;

            if !open || self.connection.session().close_requested {
                return Ok(());
            }
        }
    }
}

fn configure(stream: &TcpStream, limits: &ConnLimits) {
    if limits.tcp_nodelay {
        if let Err(err) = stream.set_nodelay(true) {
            debug!(error = %err, "TCP_NODELAY not set");
        }
    }
    if limits.tcp_keepalive {
        if let Err(err) = SockRef::from(stream).set_keepalive(true) {
            debug!(error = %err, "SO_KEEPALIVE not set");
        }
    }
}

pub(crate) mod writer {
    use super::TcpSession;
    use crate::limits::{ConnLimits, RespLimits};
    use std::io;
    use tokio::{io::AsyncWriteExt, net::TcpStream, time::timeout};

    /// Writes everything queued on the session.
    ///
    /// The queue is emptied even on failure. Its allocation is dropped when it
    /// grew past [`RespLimits::max_capacity`].
    pub(crate) async fn flush(
        stream: &mut TcpStream,
        session: &mut TcpSession,
        conn_limits: &ConnLimits,
        resp_limits: &RespLimits,
    ) -> io::Result<()> {
        if session.outbound.is_empty() {
            return Ok(());
        }

        let result = timeout(
            conn_limits.socket_write_timeout,
            stream.write_all(&session.outbound),
        )
        .await;

        session.outbound.clear();
        if session.outbound.capacity() > resp_limits.max_capacity {
            session.outbound = Vec::with_capacity(resp_limits.default_capacity);
        }

        result?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_queues_in_order() {
        let mut session = TcpSession::default();

        session.send(b"HTTP/1.1 ".to_vec());
        session.send(b"200 OK\r\n".to_vec());
        assert_eq!(session.outbound, b"HTTP/1.1 200 OK\r\n");
        assert!(!session.close_requested);

        session.request_close();
        assert!(session.close_requested);
    }
}
