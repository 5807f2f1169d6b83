use crate::{
    errors::HttpError,
    http::{
        mime,
        request::{Parser, Progress, Request},
        response::Response,
        types::{Method, StatusCode},
    },
    limits::ProtocolLimits,
    server::{
        routes::{RequestHandler, Routes},
        session::{Consumed, Session},
    },
    ws::{handshake, socket::WebSocket},
};
use std::{io, path::Path, sync::Arc};
use tracing::{debug, info, warn};

/// The HTTP personality of a connection.
///
/// Frames requests out of the byte stream and answers each one in order,
/// from a registered handler or from the web root.
pub struct Http {
    routes: Arc<Routes>,
    parser: Parser,
    limits: ProtocolLimits,
}

/// What happens to the connection after a request was answered.
enum Flow {
    KeepAlive,
    Close,
    Upgrade(WebSocket),
}

impl Http {
    pub(crate) fn new(routes: Arc<Routes>, limits: &ProtocolLimits) -> Self {
        Self {
            routes,
            parser: Parser::new(&limits.request),
            limits: limits.clone(),
        }
    }

    pub(crate) fn consume(&mut self, session: &mut dyn Session, input: &[u8]) -> Consumed {
        let mut offset = 0;

        while offset < input.len() {
            match self.parser.parse(&input[offset..]) {
                Ok(Progress::Partial) => break,
                Ok(Progress::Complete(used)) => {
                    offset += used;
                    let request = self.parser.take_request();

                    match self.dispatch(session, &request) {
                        Flow::KeepAlive => {}
                        Flow::Close => {
                            session.request_close();
                            return Consumed::Closed;
                        }
                        Flow::Upgrade(socket) => {
                            return Consumed::Upgrade {
                                used: offset,
                                socket,
                            }
                        }
                    }
                }
                Err(kind) => {
                    debug!(error = %kind, "malformed request");
                    let err = HttpError::from(kind);
                    self.send_best_effort(session, &error_response(&err), Method::Get);
                    session.request_close();
                    return Consumed::Closed;
                }
            }
        }

        Consumed::All
    }

    fn dispatch(&self, session: &mut dyn Session, request: &Request) -> Flow {
        debug!(method = %request.method(), path = request.path(), "request");

        match self.answer(session, request) {
            Ok(Flow::KeepAlive) if !request.keep_alive() => Flow::Close,
            Ok(flow) => flow,
            Err(err) => {
                debug!(status = err.status().as_u16(), message = err.message(), "request failed");
                self.send_best_effort(session, &error_response(&err), request.method());
                Flow::Close
            }
        }
    }

    fn answer(&self, session: &mut dyn Session, request: &Request) -> Result<Flow, HttpError> {
        let path = self
            .routes
            .resolve(request.path())
            .ok_or_else(|| HttpError::forbidden("FORBIDDEN: Outside of web scope"))?;

        if request.has_header("upgrade") {
            return match handshake::upgrade(request, &self.routes, &self.limits.websocket) {
                Ok(upgrade) => {
                    self.send(session, &upgrade.response, Method::Get)?;
                    info!(path = request.path(), "websocket connected");
                    Ok(Flow::Upgrade(upgrade.socket))
                }
                Err(response) => {
                    self.send_best_effort(session, &response, request.method());
                    Ok(Flow::Close)
                }
            };
        }

        if let Some(handler) = self.routes.lookup(request.path()) {
            return self.run_handler(session, request, handler);
        }

        self.serve_static(session, request, &path)
    }

    fn run_handler(
        &self,
        session: &mut dyn Session,
        request: &Request,
        handler: &dyn RequestHandler,
    ) -> Result<Flow, HttpError> {
        let response = handler.handle(request).map_err(|err| {
            warn!(path = request.path(), error = %err, "handler failed");
            err
        })?;
        self.send(session, &response, request.method())?;

        Ok(Flow::KeepAlive)
    }

    fn serve_static(
        &self,
        session: &mut dyn Session,
        request: &Request,
        path: &Path,
    ) -> Result<Flow, HttpError> {
        if path.is_dir() {
            if !request.path().ends_with('/') {
                self.send(session, &redirect(request), request.method())?;
                return Ok(Flow::Close);
            }

            if let Some(handler) = self.routes.lookup(&format!("{}index.html", request.path())) {
                return self.run_handler(session, request, handler);
            }

            let index = path.join("index.html");
            if !index.is_file() {
                return Err(HttpError::forbidden("FORBIDDEN: No directory listings"));
            }
            return self.send_file(session, request, &index);
        }

        if !path.exists() {
            return Err(HttpError::not_found("File not found"));
        }
        self.send_file(session, request, path)
    }

    fn send_file(
        &self,
        session: &mut dyn Session,
        request: &Request,
        path: &Path,
    ) -> Result<Flow, HttpError> {
        let unreadable = |err: io::Error| {
            debug!(path = %path.display(), error = %err, "file not readable");
            HttpError::forbidden("FORBIDDEN: Reading file failed")
        };

        let response = Response::new(StatusCode::Ok)
            .mime(mime::from_path(path))
            .file(path)
            .map_err(unreadable)?;
        self.send(session, &response, request.method())
            .map_err(unreadable)?;

        Ok(Flow::KeepAlive)
    }

    /// Serializes the whole response before handing it to the session, so a
    /// failure leaves nothing half-sent.
    fn send(&self, session: &mut dyn Session, response: &Response, method: Method) -> io::Result<()> {
        let limits = &self.limits.response;
        let mut out = Vec::with_capacity(limits.default_capacity);

        response.write_to(&mut out, method, limits.file_chunk_size)?;
        session.send(out);
        Ok(())
    }

    fn send_best_effort(&self, session: &mut dyn Session, response: &Response, method: Method) {
        if let Err(err) = self.send(session, response, method) {
            debug!(error = %err, "failed to serialize response");
        }
    }
}

#[inline]
fn error_response(err: &HttpError) -> Response {
    Response::text(err.status(), err.message())
}

fn redirect(request: &Request) -> Response {
    let raw_path = request.target().split('?').next().unwrap_or_default();
    let location = format!("{raw_path}/");
    let escaped = escape_html(&location);

    Response::new(StatusCode::MovedPermanently)
        .mime(mime::TEXT_HTML)
        .body(format!(
            "<html><body>Redirected: <a href=\"{escaped}\">{escaped}</a></body></html>"
        ))
        .header("Location", location)
}

fn escape_html(src: &str) -> String {
    let mut out = String::with_capacity(src.len());
    for ch in src.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
    out
}
