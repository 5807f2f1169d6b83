use crate::{
    errors::ErrorKind,
    http::types::{slice_to_usize, Method, MultiMap, Version},
    limits::ReqLimits,
    query::Query,
};
use std::mem;

const FORM_URL_ENCODED: &str = "application/x-www-form-urlencoded";

/// A parsed HTTP request.
///
/// # Input data requirements
///
/// #### General designations
/// - `SP`: one or more ASCII whitespace characters
/// - `CRLF`: Carriage return + line feed (`"\r\n"`)
/// ---
/// - `[METHOD]`: `GET`, `POST` or `HEAD`, in any letter case
/// - `[TARGET]`: a path, optionally followed by `?` and a query string. The path
///   is percent-decoded, the query string is split into [parameters](Self::params).
/// - `[MAJOR]`, `[MINOR]`: decimal protocol version numbers
///
/// #### Format
/// ```text
/// [METHOD] SP [TARGET] SP HTTP/[MAJOR].[MINOR] CRLF
/// [NAME]: [VALUE] CRLF
/// ... more headers ...
/// CRLF
/// [BODY]
/// ```
///
/// The request line and headers must be valid `UTF-8` and fit in
/// [`ReqLimits::header_size`] bytes. Header names are case-insensitive. Lines
/// without a `:` are ignored.
///
/// The body is exactly `Content-Length` bytes long. A missing or unparsable
/// `Content-Length` means there is no body; chunked transfer encoding is not
/// supported. A `POST` with `Content-Type: application/x-www-form-urlencoded`
/// has every line of its body merged into the parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    method: Method,
    target: String,
    path: String,
    query: String,
    version: Version,
    headers: MultiMap,
    params: MultiMap,
    content_length: usize,
    body: Vec<u8>,
}

impl Default for Request {
    fn default() -> Self {
        Self {
            method: Method::Get,
            target: String::new(),
            path: String::new(),
            query: String::new(),
            version: Version::default(),
            headers: MultiMap::new(),
            params: MultiMap::new(),
            content_length: 0,
            body: Vec::new(),
        }
    }
}

impl Request {
    #[inline]
    pub fn method(&self) -> Method {
        self.method
    }

    /// The request target exactly as sent, query string included.
    #[inline]
    pub fn target(&self) -> &str {
        &self.target
    }

    /// The percent-decoded path, without the query string.
    #[inline]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The raw query string, without the leading `?`.
    #[inline]
    pub fn query(&self) -> &str {
        &self.query
    }

    #[inline]
    pub fn version(&self) -> Version {
        self.version
    }

    /// All headers, keyed by lowercased name.
    #[inline]
    pub fn headers(&self) -> &MultiMap {
        &self.headers
    }

    /// First value of a header, `Some("")` if it was sent empty.
    #[inline]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.first(&name.to_ascii_lowercase())
    }

    #[inline]
    pub fn header_all(&self, name: &str) -> &[String] {
        self.headers.get_all(&name.to_ascii_lowercase())
    }

    #[inline]
    pub fn header_as_int(&self, name: &str) -> Option<i64> {
        self.headers.first_as_int(&name.to_ascii_lowercase())
    }

    #[inline]
    pub fn has_header(&self, name: &str) -> bool {
        self.headers.contains(&name.to_ascii_lowercase())
    }

    /// Query string parameters, plus form fields for url-encoded `POST`s.
    #[inline]
    pub fn params(&self) -> &MultiMap {
        &self.params
    }

    #[inline]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.first(name)
    }

    #[inline]
    pub fn param_all(&self, name: &str) -> &[String] {
        self.params.get_all(name)
    }

    #[inline]
    pub fn content_length(&self) -> usize {
        self.content_length
    }

    #[inline]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// `false` when the client sent `Connection: close`.
    #[inline]
    pub fn keep_alive(&self) -> bool {
        !self
            .header("connection")
            .is_some_and(|value| value.eq_ignore_ascii_case("close"))
    }
}

// PARSER

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    ScanCr,
    AfterCr,
    AfterCrLf,
    AfterCrLfCr,
    Body,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Progress {
    /// Every byte was consumed and the request needs more.
    Partial,
    /// The request is complete after this many bytes of the input.
    Complete(usize),
}

/// Incremental request framer.
///
/// Bytes may arrive split at any boundary. The head is scanned one byte at a
/// time for the blank line ending it, the body is copied in bulk.
#[derive(Debug)]
pub(crate) struct Parser {
    state: ParseState,
    head: Vec<u8>,
    request: Request,
    limits: ReqLimits,
}

impl Parser {
    #[inline]
    pub(crate) fn new(limits: &ReqLimits) -> Self {
        Self {
            state: ParseState::ScanCr,
            head: Vec::with_capacity(512),
            request: Request::default(),
            limits: limits.clone(),
        }
    }

    #[inline]
    pub(crate) fn reset(&mut self) {
        self.state = ParseState::ScanCr;
        self.head.clear();
        self.request = Request::default();
    }

    /// Hands out the completed request and gets ready for the next one.
    #[inline]
    pub(crate) fn take_request(&mut self) -> Request {
        let request = mem::take(&mut self.request);
        self.reset();
        request
    }

    pub(crate) fn parse(&mut self, input: &[u8]) -> Result<Progress, ErrorKind> {
        let mut pos = 0;

        loop {
            if self.state == ParseState::Body {
                let request = &mut self.request;
                let take = (request.content_length - request.body.len()).min(input.len() - pos);
                request.body.extend_from_slice(&input[pos..pos + take]);
                pos += take;

                if request.body.len() < request.content_length {
                    return Ok(Progress::Partial);
                }

                finish_body(request);
                return Ok(Progress::Complete(pos));
            }

            let Some(&byte) = input.get(pos) else {
                return Ok(Progress::Partial);
            };
            pos += 1;

            if self.head.len() >= self.limits.header_size {
                return Err(ErrorKind::HeaderTooLarge);
            }
            self.head.push(byte);

            self.state = match (self.state, byte) {
                (ParseState::ScanCr, b'\r') => ParseState::AfterCr,
                (ParseState::AfterCr, b'\n') => ParseState::AfterCrLf,
                (ParseState::AfterCr, b'\r') => ParseState::AfterCr,
                (ParseState::AfterCrLf, b'\r') => ParseState::AfterCrLfCr,
                (ParseState::AfterCrLfCr, b'\n') => {
                    parse_head(&self.head, &mut self.request, &self.limits)?;
                    ParseState::Body
                }
                (ParseState::AfterCrLfCr, b'\r') => ParseState::AfterCr,
                _ => ParseState::ScanCr,
            };
        }
    }
}

fn parse_head(head: &[u8], request: &mut Request, limits: &ReqLimits) -> Result<(), ErrorKind> {
    let head = simdutf8::basic::from_utf8(head).map_err(|_| ErrorKind::InvalidEncoding)?;
    let mut lines = head.lines().skip_while(|line| line.trim().is_empty());

    parse_request_line(lines.next().unwrap_or_default(), request)?;

    for line in lines {
        let line = line.trim();
        if line.is_empty() {
            break;
        }

        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let (name, value) = (name.trim().to_ascii_lowercase(), value.trim());
        match value.is_empty() {
            true => request.headers.insert_empty(name),
            false => request.headers.append(name, value),
        }
    }

    let content_length = request
        .headers
        .first("content-length")
        .and_then(|value| slice_to_usize(value.as_bytes()))
        .unwrap_or(0);
    if content_length > limits.content_size {
        return Err(ErrorKind::ContentTooLarge);
    }

    request.content_length = content_length;
    request.body.reserve_exact(content_length);
    Ok(())
}

fn parse_request_line(line: &str, request: &mut Request) -> Result<(), ErrorKind> {
    let mut parts = line.split_ascii_whitespace();
    let (Some(method), Some(target), Some(version), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(ErrorKind::InvalidRequestLine);
    };

    request.version = parse_version(version).ok_or(ErrorKind::InvalidRequestLine)?;
    request.method = Method::from_bytes(method.as_bytes()).ok_or(ErrorKind::InvalidMethod)?;

    let (path, query) = target.split_once('?').unwrap_or((target, ""));
    request.path = Query::decode_percent(path.as_bytes());
    if !query.is_empty() {
        Query::parse_into(&mut request.params, query.as_bytes());
    }
    request.query = query.to_owned();
    request.target = target.to_owned();

    Ok(())
}

#[inline]
fn parse_version(src: &str) -> Option<Version> {
    let (major, minor) = src.strip_prefix("HTTP/")?.split_once('.')?;

    Some(Version {
        major: u16::try_from(slice_to_usize(major.as_bytes())?).ok()?,
        minor: u16::try_from(slice_to_usize(minor.as_bytes())?).ok()?,
    })
}

fn finish_body(request: &mut Request) {
    let is_form = request.method == Method::Post
        && request.headers.first("content-type").is_some_and(|value| {
            let media_type = value.split(';').next().unwrap_or_default();
            media_type.trim().eq_ignore_ascii_case(FORM_URL_ENCODED)
        });

    if is_form {
        for line in request.body.split(|&byte| byte == b'\n') {
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            Query::parse_into(&mut request.params, line);
        }
    }
}

#[cfg(test)]
mod request_self {
    use super::*;

    fn parse_all(src: &[u8]) -> Result<(Request, usize), ErrorKind> {
        let mut parser = Parser::new(&ReqLimits::default());
        match parser.parse(src)? {
            Progress::Complete(used) => Ok((parser.take_request(), used)),
            Progress::Partial => panic!("request incomplete: {:?}", String::from_utf8_lossy(src)),
        }
    }

    fn parse(src: &str) -> Result<Request, ErrorKind> {
        parse_all(src.as_bytes()).map(|(request, _)| request)
    }

    #[test]
    fn simple_get() {
        let req = parse("GET /x HTTP/1.1\r\nHost: h\r\n\r\n").unwrap();

        assert_eq!(req.method(), Method::Get);
        assert_eq!(req.path(), "/x");
        assert_eq!(req.version(), Version { major: 1, minor: 1 });
        assert_eq!(req.header("Host"), Some("h"));
        assert_eq!(req.content_length(), 0);
        assert!(req.body().is_empty());
        assert!(req.params().is_empty());
        assert!(req.keep_alive());
    }

    #[test]
    fn form_post() {
        let req = parse(concat!(
            "POST /form HTTP/1.1\r\n",
            "Content-Type: application/x-www-form-urlencoded\r\n",
            "Content-Length: 7\r\n",
            "\r\n",
            "a=1&b=2"
        ))
        .unwrap();

        assert_eq!(req.method(), Method::Post);
        assert_eq!(req.body(), b"a=1&b=2");
        assert_eq!(req.params().len(), 2);
        assert_eq!(req.param_all("a"), ["1"]);
        assert_eq!(req.param_all("b"), ["2"]);
    }

    #[test]
    fn form_body_lines_merge_with_query() {
        let body = "a=2\r\nc=3%264\n";
        let src = format!(
            "post /f?a=1 HTTP/1.0\r\nContent-Type: Application/X-WWW-Form-Urlencoded; charset=utf-8\r\nContent-Length: {}\r\n\r\n{body}",
            body.len()
        );
        let req = parse(&src).unwrap();

        assert_eq!(req.param_all("a"), ["1", "2"]);
        assert_eq!(req.param("c"), Some("3&4"));
    }

    #[test]
    fn form_body_ignored_for_other_types() {
        #[rustfmt::skip]
        let cases = [
            "POST / HTTP/1.1\r\nContent-Type: text/plain\r\nContent-Length: 3\r\n\r\na=1",
            "POST / HTTP/1.1\r\nContent-Length: 3\r\n\r\na=1",
            "GET / HTTP/1.1\r\nContent-Type: application/x-www-form-urlencoded\r\nContent-Length: 3\r\n\r\na=1",
        ];

        for src in cases {
            let req = parse(src).unwrap();
            assert_eq!(req.body(), b"a=1");
            assert!(req.params().is_empty(), "{src}");
        }
    }

    #[test]
    fn parse_method() {
        #[rustfmt::skip]
        let cases = [
            ("GET / HTTP/1.1\r\n\r\n",     Ok(Method::Get)),
            ("get / HTTP/1.1\r\n\r\n",     Ok(Method::Get)),
            ("POST / HTTP/1.1\r\n\r\n",    Ok(Method::Post)),
            ("Head / HTTP/1.1\r\n\r\n",    Ok(Method::Head)),

            ("PUT / HTTP/1.1\r\n\r\n",     Err(ErrorKind::InvalidMethod)),
            ("GETGET / HTTP/1.1\r\n\r\n",  Err(ErrorKind::InvalidMethod)),
        ];

        for (src, expected) in cases {
            assert_eq!(parse(src).map(|req| req.method()), expected, "{src}");
        }
    }

    #[test]
    fn parse_request_line() {
        #[rustfmt::skip]
        let cases = [
            ("GET / HTTP/1.0\r\n\r\n",        Ok(Version { major: 1, minor: 0 })),
            ("GET  /   HTTP/2.17\r\n\r\n",    Ok(Version { major: 2, minor: 17 })),
            ("\r\nGET / HTTP/1.1\r\n\r\n",    Ok(Version { major: 1, minor: 1 })),

            ("GET /\r\n\r\n",                 Err(ErrorKind::InvalidRequestLine)),
            ("GET / HTTP/1\r\n\r\n",          Err(ErrorKind::InvalidRequestLine)),
            ("GET / HTTP/a.1\r\n\r\n",        Err(ErrorKind::InvalidRequestLine)),
            ("GET / HTTP/1.1 x\r\n\r\n",      Err(ErrorKind::InvalidRequestLine)),
            ("GET / HTTPS/1.1\r\n\r\n",       Err(ErrorKind::InvalidRequestLine)),
            ("GET / HTTP/1.99999\r\n\r\n",    Err(ErrorKind::InvalidRequestLine)),
            ("\r\n\r\n",                      Err(ErrorKind::InvalidRequestLine)),
        ];

        for (src, expected) in cases {
            assert_eq!(parse(src).map(|req| req.version()), expected, "{src:?}");
        }
    }

    #[test]
    fn parse_target() {
        #[rustfmt::skip]
        let cases = [
            ("/",                    "/",           ""),
            ("/a%20b+c",             "/a b+c",      ""),
            ("/x?",                  "/x",          ""),
            ("/x?q=1+2&flag",        "/x",          "q=1+2&flag"),
            ("/%2e%2e/etc",          "/../etc",     ""),
            ("/a?b?c",               "/a",          "b?c"),
        ];

        for (target, path, query) in cases {
            let req = parse(&format!("GET {target} HTTP/1.1\r\n\r\n")).unwrap();
            assert_eq!(req.target(), target);
            assert_eq!(req.path(), path);
            assert_eq!(req.query(), query);
        }

        let req = parse("GET /x?q=1+2&flag&&e= HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(req.param("q"), Some("1 2"));
        assert_eq!(req.param("flag"), Some(""));
        assert!(req.param_all("e").is_empty());
    }

    #[test]
    fn parse_headers() {
        let req = parse(concat!(
            "GET / HTTP/1.1\r\n",
            "Accept: text/html\r\n",
            "ACCEPT:  text/plain  \r\n",
            "X-Empty:\r\n",
            "no colon here\r\n",
            "X-Time: 12:30\r\n",
            "Connection: Close\r\n",
            "\r\n"
        ))
        .unwrap();

        assert_eq!(req.header_all("accept"), ["text/html", "text/plain"]);
        assert_eq!(req.header("Accept"), Some("text/html"));
        assert!(req.has_header("x-empty"));
        assert_eq!(req.header("X-Empty"), Some(""));
        assert_eq!(req.header("X-Time"), Some("12:30"));
        assert_eq!(req.header("missing"), None);
        assert_eq!(req.headers().len(), 4);
        assert!(!req.keep_alive());
    }

    #[test]
    fn content_length() {
        #[rustfmt::skip]
        let cases = [
            ("",                           0),
            ("Content-Length: 0\r\n",      0),
            ("Content-Length: abc\r\n",    0),
            ("Content-Length: -5\r\n",     0),
            ("Content-Length:\r\n",        0),
            ("Content-Length: 3\r\n",      3),
        ];

        for (header, expected) in cases {
            let src = format!("POST / HTTP/1.1\r\n{header}\r\nxyz");
            let (req, used) = parse_all(src.as_bytes()).unwrap();

            assert_eq!(req.content_length(), expected, "{header:?}");
            assert_eq!(req.body(), &b"xyz"[..expected]);
            assert_eq!(used, src.len() - 3 + expected);
        }
    }

    #[test]
    fn content_too_large() {
        let limit = ReqLimits::default().content_size;
        let ok = format!("POST / HTTP/1.1\r\nContent-Length: {limit}\r\n\r\n");
        let too_large = format!("POST / HTTP/1.1\r\nContent-Length: {}\r\n\r\n", limit + 1);

        let mut parser = Parser::new(&ReqLimits::default());
        assert_eq!(parser.parse(ok.as_bytes()), Ok(Progress::Partial));

        let mut parser = Parser::new(&ReqLimits::default());
        assert_eq!(
            parser.parse(too_large.as_bytes()),
            Err(ErrorKind::ContentTooLarge)
        );
    }

    #[test]
    fn header_size_boundary() {
        let prefix = "GET / HTTP/1.1\r\nX-Pad: ";
        let limit = ReqLimits::default().header_size;

        for (size, expected) in [(limit, true), (limit + 1, false)] {
            let pad = "a".repeat(size - prefix.len() - 4);
            let src = format!("{prefix}{pad}\r\n\r\n");
            assert_eq!(src.len(), size);

            match expected {
                true => {
                    let (req, used) = parse_all(src.as_bytes()).unwrap();
                    assert_eq!(used, size);
                    assert_eq!(req.header("x-pad").map(str::len), Some(pad.len()));
                }
                false => assert_eq!(parse(&src), Err(ErrorKind::HeaderTooLarge)),
            }
        }
    }

    #[test]
    fn invalid_encoding() {
        let mut parser = Parser::new(&ReqLimits::default());
        assert_eq!(
            parser.parse(b"GET /\xff HTTP/1.1\r\n\r\n"),
            Err(ErrorKind::InvalidEncoding)
        );
    }

    #[test]
    fn byte_by_byte() {
        let src = b"POST /p?x=1 HTTP/1.1\r\r\nContent-Length: 4\r\nA: b\r\n\r\nbody";
        let (expected, _) = parse_all(src).unwrap();

        let mut parser = Parser::new(&ReqLimits::default());
        for (i, byte) in src.iter().enumerate() {
            let progress = parser.parse(std::slice::from_ref(byte)).unwrap();
            match i + 1 == src.len() {
                true => assert_eq!(progress, Progress::Complete(1)),
                false => assert_eq!(progress, Progress::Partial),
            }
        }

        let req = parser.take_request();
        assert_eq!(req, expected);
        assert_eq!(req.body(), b"body");
        assert_eq!(req.header("a"), Some("b"));
    }

    #[test]
    fn pipelined() {
        let src = b"GET /a HTTP/1.1\r\n\r\nGET /b HTTP/1.1\r\n\r\n";
        let mut parser = Parser::new(&ReqLimits::default());

        let Ok(Progress::Complete(used)) = parser.parse(src) else {
            panic!("first request incomplete");
        };
        assert_eq!(parser.take_request().path(), "/a");
        assert_eq!(parser.parse(&src[used..]), Ok(Progress::Complete(src.len() - used)));
        assert_eq!(parser.take_request().path(), "/b");
    }

    #[test]
    fn reset() {
        let mut parser = Parser::new(&ReqLimits::default());
        assert_eq!(parser.parse(b"GET /half"), Ok(Progress::Partial));

        parser.reset();
        assert_eq!(parser.request, Request::default());
        assert_eq!(
            parser.parse(b"GET /full HTTP/1.1\r\n\r\n"),
            Ok(Progress::Complete(22))
        );
    }
}
