//! HTTP response builder and serializer.

use crate::{
    http::types::{Method, StatusCode},
    BodyWriter, WriteBuffer,
};
use std::{
    borrow::Cow,
    fs::File,
    io::{self, Read},
    path::PathBuf,
};
use time::{macros::format_description, OffsetDateTime};

/// Body of a [`Response`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    /// No body, and no `Content-Length` header.
    Empty,
    /// Bytes held in memory.
    Bytes(Vec<u8>),
    /// A file streamed from disk, `size` bytes long.
    File { path: PathBuf, size: u64 },
}

/// HTTP response builder.
///
/// Responses are built by value and returned from a
/// [`RequestHandler`](crate::RequestHandler). When sent, a response is written
/// as a status line, a `Content-Type` header (when a MIME type is set), a `Date`
/// header (unless one was set explicitly), the headers set here, and, for a
/// response with a body, `Content-Length` and `Connection: keep-alive`. The body
/// follows the blank line except for `HEAD` requests.
///
/// # Examples
/// ```
/// use duplex_web::{mime, Response, StatusCode};
///
/// let resp = Response::new(StatusCode::Ok)
///     .mime(mime::TEXT_HTML)
///     .header("Cache-Control", "no-store")
///     .header("X-Answer", 42)
///     .body("<h1>Hello World</h1>");
///
/// assert_eq!(resp.status(), StatusCode::Ok);
/// assert_eq!(resp.header_value("x-answer"), Some(&b"42"[..]));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    status: StatusCode,
    mime: Option<Cow<'static, str>>,
    headers: Vec<(Cow<'static, str>, Vec<u8>)>,
    body: Body,
}

impl Response {
    #[inline]
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            mime: None,
            headers: Vec::new(),
            body: Body::Empty,
        }
    }

    /// A `text/plain` response carrying `message`.
    #[inline]
    pub fn text(status: StatusCode, message: impl WriteBuffer) -> Self {
        Self::new(status).mime(crate::mime::TEXT_PLAIN).body(message)
    }

    /// Sets the `Content-Type`.
    #[inline]
    pub fn mime(mut self, mime: impl Into<Cow<'static, str>>) -> Self {
        self.mime = Some(mime.into());
        self
    }

    /// Sets a header, replacing any earlier value of the same name.
    ///
    /// Names are compared case-insensitively. `Content-Type` should be set
    /// with [`mime`](Self::mime). `Content-Length` is computed from the body,
    /// so setting it here has no effect.
    pub fn header(mut self, name: impl Into<Cow<'static, str>>, value: impl WriteBuffer) -> Self {
        let name = name.into();
        if name.eq_ignore_ascii_case("content-length") {
            return self;
        }

        let mut buffer = Vec::new();
        value.write_to(&mut buffer);

        match self
            .headers
            .iter_mut()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(&name))
        {
            Some(entry) => entry.1 = buffer,
            None => self.headers.push((name, buffer)),
        }
        self
    }

    /// Sets an in-memory body.
    #[inline]
    pub fn body(mut self, value: impl WriteBuffer) -> Self {
        let mut buffer = Vec::new();
        value.write_to(&mut buffer);
        self.body = Body::Bytes(buffer);
        self
    }

    /// Builds an in-memory body piece by piece.
    ///
    /// # Examples
    /// ```
    /// use duplex_web::{Response, StatusCode};
    /// use std::io::Write;
    ///
    /// let resp = Response::new(StatusCode::Ok).body_with(|w| {
    ///     w.write("count: ");
    ///     w.write(3);
    ///     let _ = write!(w, ", sum: {}", 1 + 2);
    /// });
    /// ```
    #[inline]
    pub fn body_with(mut self, build: impl FnOnce(&mut BodyWriter)) -> Self {
        let mut buffer = Vec::new();
        build(&mut BodyWriter(&mut buffer));
        self.body = Body::Bytes(buffer);
        self
    }

    /// Uses a file as the body. Its size is read now, its contents when sent.
    ///
    /// # Errors
    ///
    /// Fails when the file's metadata cannot be read.
    pub fn file(mut self, path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let size = path.metadata()?.len();
        self.body = Body::File { path, size };
        Ok(self)
    }

    #[inline]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    #[inline]
    pub fn mime_type(&self) -> Option<&str> {
        self.mime.as_deref()
    }

    /// Value of a header set on this response.
    #[inline]
    pub fn header_value(&self, name: &str) -> Option<&[u8]> {
        self.headers
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_slice())
    }

    #[inline]
    pub fn body_ref(&self) -> &Body {
        &self.body
    }

    /// Serializes the whole response into `out`.
    ///
    /// A file body is copied in chunks of `chunk_size` bytes. Nothing useful is
    /// left in `out` on error.
    pub(crate) fn write_to(
        &self,
        out: &mut Vec<u8>,
        method: Method,
        chunk_size: usize,
    ) -> io::Result<()> {
        out.extend_from_slice(self.status.first_line().as_bytes());

        if let Some(mime) = &self.mime {
            write_header(out, "Content-Type", mime.as_bytes());
        }
        if self.header_value("date").is_none() {
            write_header(out, "Date", http_date().as_bytes());
        }
        for (name, value) in &self.headers {
            write_header(out, name, value);
        }

        let length = match &self.body {
            Body::Empty => None,
            Body::Bytes(bytes) => Some(bytes.len() as u64),
            Body::File { size, .. } => Some(*size),
        };
        if let Some(length) = length {
            write_header(out, "Content-Length", length.to_string().as_bytes());
            write_header(out, "Connection", b"keep-alive");
        }
        out.extend_from_slice(b"\r\n");

        if method == Method::Head {
            return Ok(());
        }

        match &self.body {
            Body::Empty => Ok(()),
            Body::Bytes(bytes) => {
                out.extend_from_slice(bytes);
                Ok(())
            }
            Body::File { path, size } => copy_file(out, File::open(path)?, *size, chunk_size),
        }
    }
}

#[inline]
fn write_header(out: &mut Vec<u8>, name: &str, value: &[u8]) {
    out.extend_from_slice(name.as_bytes());
    out.extend_from_slice(b": ");
    out.extend_from_slice(value);
    out.extend_from_slice(b"\r\n");
}

fn copy_file(out: &mut Vec<u8>, mut file: File, size: u64, chunk_size: usize) -> io::Result<()> {
    let chunk_size = chunk_size.max(1) as u64;
    let mut remaining = size;

    while remaining > 0 {
        let start = out.len();
        out.resize(start + remaining.min(chunk_size) as usize, 0);

        let read = file.read(&mut out[start..])?;
        out.truncate(start + read);
        if read == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "file shrank while it was being sent",
            ));
        }
        remaining -= read as u64;
    }

    Ok(())
}

/// Current time in RFC 1123 form, e.g. `Sun, 06 Nov 1994 08:49:37 GMT`.
pub(crate) fn http_date() -> String {
    OffsetDateTime::now_utc()
        .format(format_description!(
            "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
        ))
        .unwrap_or_default()
}

pub mod write {
    use super::*;
    use std::{fmt::Display, io::Write as _, rc::Rc, sync::Arc};

    /// Writer for constructing an in-memory response body.
    /// Used in [body_with](Response::body_with).
    #[derive(Debug)]
    pub struct BodyWriter<'a>(pub(crate) &'a mut Vec<u8>);

    impl BodyWriter<'_> {
        /// Appends content to the response body.
        #[inline]
        pub fn write<T: WriteBuffer>(&mut self, value: T) {
            value.write_to(self.0);
        }
    }

    impl std::io::Write for BodyWriter<'_> {
        #[inline]
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.extend_from_slice(buf);
            Ok(buf.len())
        }

        #[inline]
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// Trait for values that can be written as a header value or a body.
    ///
    /// Implemented for strings, bytes, booleans, chars and integer types.
    ///
    /// # Example
    /// ```
    /// use duplex_web::WriteBuffer;
    ///
    /// struct MyString(String);
    ///
    /// impl WriteBuffer for MyString {
    ///     fn write_to(&self, buffer: &mut Vec<u8>) {
    ///         buffer.extend_from_slice(self.0.as_bytes())
    ///     }
    /// }
    /// ```
    pub trait WriteBuffer {
        /// Writes the value's representation to the end of the buffer.
        fn write_to(&self, buffer: &mut Vec<u8>);
    }

    macro_rules! impl_write_buffer {
        (bytes, $conn:expr => $($t:ty),*) => {
            $(impl WriteBuffer for $t {
                #[inline] fn write_to(&self, buffer: &mut Vec<u8>) {
                    let closure = $conn;
                    closure(self, buffer);
                }
            })*
        };
        (display => $($t:ty),*) => {
            $(impl WriteBuffer for $t {
                #[inline] fn write_to(&self, buffer: &mut Vec<u8>) {
                    write_display(self, buffer);
                }
            })*
        };
    }

    impl<T: WriteBuffer + ?Sized> WriteBuffer for &T {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            T::write_to(*self, buffer);
        }
    }
    impl_write_buffer! {
        bytes, |value: &str, buffer: &mut Vec<u8>| {
            buffer.extend_from_slice(value.as_bytes());
        } => str, String, Box<str>, Cow<'_, str>,
        Arc<str>, Rc<str>
    }
    impl_write_buffer! {
        bytes, |value: &[u8], buffer: &mut Vec<u8>| {
            buffer.extend_from_slice(value);
        } => [u8], Vec<u8>, Box<[u8]>, Cow<'_, [u8]>,
        Arc<[u8]>, Rc<[u8]>
    }
    impl<const N: usize> WriteBuffer for [u8; N] {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            buffer.extend_from_slice(self);
        }
    }
    impl_write_buffer! {
        display => u8, u16, u32, u64, u128, usize,
        i8, i16, i32, i64, i128, isize, bool, char
    }

    #[inline(always)]
    fn write_display(value: &impl Display, buffer: &mut Vec<u8>) {
        // Writing into a `Vec` cannot fail.
        let _ = write!(buffer, "{value}");
    }
}
