use crate::StatusCode;
use std::{borrow::Cow, io};
use thiserror::Error;

/// Violations found while framing an HTTP request.
///
/// All of them end the connection with a `400` carrying the message below.
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub(crate) enum ErrorKind {
    #[error("BAD REQUEST: Header too large")]
    HeaderTooLarge,
    #[error("BAD REQUEST: Content too large")]
    ContentTooLarge,
    #[error("BAD REQUEST: Invalid request line")]
    InvalidRequestLine,
    #[error("BAD REQUEST: Invalid method")]
    InvalidMethod,
    #[error("BAD REQUEST: Invalid encoding")]
    InvalidEncoding,
}

impl From<ErrorKind> for HttpError {
    #[inline]
    fn from(kind: ErrorKind) -> Self {
        HttpError::new(StatusCode::BadRequest, kind.to_string())
    }
}

/// An error that is answered with an HTTP status and a plain-text message.
///
/// Returned by [`RequestHandler`](crate::RequestHandler)s. The server turns it
/// into a `text/plain` response with the message as body and closes the
/// connection afterwards.
///
/// # Examples
/// ```
/// use duplex_web::{HttpError, StatusCode};
///
/// let err = HttpError::not_found("No such user");
/// assert_eq!(err.status(), StatusCode::NotFound);
/// assert_eq!(err.message(), "No such user");
///
/// let io = std::io::Error::new(std::io::ErrorKind::Other, "disk on fire");
/// let err = HttpError::from(io);
/// assert_eq!(err.status(), StatusCode::InternalServerError);
/// assert_eq!(err.message(), "INTERNAL ERROR: disk on fire");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{} {message}", .status.as_u16())]
pub struct HttpError {
    status: StatusCode,
    message: Cow<'static, str>,
}

impl HttpError {
    /// Creates an error with an arbitrary status.
    #[inline]
    pub fn new(status: StatusCode, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// `400 Bad Request`
    #[inline]
    pub fn bad_request(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(StatusCode::BadRequest, message)
    }

    /// `403 Forbidden`
    #[inline]
    pub fn forbidden(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(StatusCode::Forbidden, message)
    }

    /// `404 Not Found`
    #[inline]
    pub fn not_found(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(StatusCode::NotFound, message)
    }

    /// `500 Internal Server Error`
    #[inline]
    pub fn internal(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(StatusCode::InternalServerError, message)
    }

    #[inline]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<io::Error> for HttpError {
    #[inline]
    fn from(err: io::Error) -> Self {
        HttpError::internal(format!("INTERNAL ERROR: {err}"))
    }
}

/// WebSocket protocol violations.
///
/// Any of these closes the connection without a reply.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum WsError {
    #[error("invalid reserved bits")]
    InvalidReservedBits,
    #[error("unknown opcode {0:#x}")]
    UnknownOpcode(u8),
    #[error("fragmented control frame")]
    FragmentedControlFrame,
    #[error("frame payload of {0} bytes exceeds the limit")]
    PayloadTooLarge(u64),
    #[error("message exceeds the limit")]
    MessageTooLarge,
    #[error("continuation frame without a message in progress")]
    UnexpectedContinuation,
    #[error("new message started before the previous one finished")]
    ExpectedContinuation,
    #[error("text message is not valid UTF-8")]
    InvalidUtf8,
    #[error("read past end of frame")]
    ReadPastEnd,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn framing_errors_are_bad_requests() {
        #[rustfmt::skip]
        let cases = [
            (ErrorKind::HeaderTooLarge,     "BAD REQUEST: Header too large"),
            (ErrorKind::ContentTooLarge,    "BAD REQUEST: Content too large"),
            (ErrorKind::InvalidRequestLine, "BAD REQUEST: Invalid request line"),
            (ErrorKind::InvalidMethod,      "BAD REQUEST: Invalid method"),
            (ErrorKind::InvalidEncoding,    "BAD REQUEST: Invalid encoding"),
        ];

        for (kind, message) in cases {
            let err = HttpError::from(kind);
            assert_eq!(err.status(), StatusCode::BadRequest);
            assert_eq!(err.message(), message);
        }
    }

    #[test]
    fn io_is_internal() {
        let err = HttpError::from(io::Error::new(io::ErrorKind::NotFound, "gone"));
        assert_eq!(err.status(), StatusCode::InternalServerError);
        assert_eq!(err.message(), "INTERNAL ERROR: gone");
        assert_eq!(err.to_string(), "500 INTERNAL ERROR: gone");
    }
}
