use crate::{
    http::{request::Request, response::Response, types::StatusCode},
    limits::WsLimits,
    server::routes::Routes,
    ws::socket::WebSocket,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use sha1::{Digest, Sha1};

/// Fixed GUID appended to the client key before hashing (RFC 6455, section 1.3).
pub const GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// The only protocol version spoken.
const VERSION: i64 = 13;

/// Computes `Sec-WebSocket-Accept` for a client's `Sec-WebSocket-Key`.
///
/// # Examples
/// ```
/// use duplex_web::ws::accept_key;
///
/// assert_eq!(accept_key("dGhlIHNhbXBsZSBub25jZQ=="), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
/// ```
pub fn accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(GUID.as_bytes());
    STANDARD.encode(hasher.finalize())
}

/// An accepted upgrade: the `101` response and the personality that follows it.
pub(crate) struct Upgrade {
    pub(crate) response: Response,
    pub(crate) socket: WebSocket,
}

/// Validates an upgrade request.
///
/// On rejection the returned response is sent and the connection closes.
pub(crate) fn upgrade(
    request: &Request,
    routes: &Routes,
    limits: &WsLimits,
) -> Result<Upgrade, Response> {
    let reject = |message: &'static str| Response::text(StatusCode::BadRequest, message);

    let is_websocket = request
        .header("upgrade")
        .is_some_and(|value| value.eq_ignore_ascii_case("websocket"));
    if !is_websocket {
        return Err(reject("Unsupported upgrade request"));
    }

    let version = request
        .header_as_int("sec-websocket-version")
        .filter(|version| *version >= 0)
        .or_else(|| request.header_as_int("sec-websocket-draft"));
    if version != Some(VERSION) {
        return Err(reject("Unsupported websocket version specification")
            .header("Sec-WebSocket-Version", VERSION));
    }

    let Some(key) = request
        .header("sec-websocket-key")
        .filter(|key| !key.is_empty())
    else {
        return Err(reject("Missing websocket key"));
    };

    let Some(factory) = routes.lookup_websocket(request.path()) else {
        return Err(reject("No websocket handler for this path"));
    };

    let response = Response::new(StatusCode::SwitchingProtocols)
        .header("Upgrade", "WebSocket")
        .header("Connection", "Upgrade")
        .header("Sec-WebSocket-Accept", accept_key(key));

    Ok(Upgrade {
        response,
        socket: WebSocket::new(factory.create(request), limits),
    })
}
