use crate::{
    errors::HttpError,
    http::{request::Request, response::Response},
    ws::socket::WebSocketHandler,
};
use std::{
    collections::HashMap,
    fs,
    path::{Component, Path, PathBuf},
};

/// Produces a response for one HTTP request.
///
/// An error is rendered as a `text/plain` response with the error's status,
/// after which the connection closes.
///
/// # Examples
///
/// ```
/// use duplex_web::{HttpError, Request, RequestHandler, Response, StatusCode};
///
/// struct Greeter;
///
/// impl RequestHandler for Greeter {
///     fn handle(&self, req: &Request) -> Result<Response, HttpError> {
///         match req.param("name") {
///             Some(name) => Ok(Response::text(StatusCode::Ok, format!("Hello, {name}!"))),
///             None => Err(HttpError::bad_request("Missing name")),
///         }
///     }
/// }
/// ```
pub trait RequestHandler: Send + Sync + 'static {
    fn handle(&self, request: &Request) -> Result<Response, HttpError>;
}

impl<F> RequestHandler for F
where
    F: Fn(&Request) -> Result<Response, HttpError> + Send + Sync + 'static,
{
    #[inline]
    fn handle(&self, request: &Request) -> Result<Response, HttpError> {
        self(request)
    }
}

/// Creates the handler for each WebSocket connection on a path.
pub trait WebSocketFactory: Send + Sync + 'static {
    /// Called with the upgrade request once the handshake is accepted.
    fn create(&self, request: &Request) -> Box<dyn WebSocketHandler>;
}

impl<F, H> WebSocketFactory for F
where
    F: Fn(&Request) -> H + Send + Sync + 'static,
    H: WebSocketHandler + 'static,
{
    #[inline]
    fn create(&self, request: &Request) -> Box<dyn WebSocketHandler> {
        Box::new(self(request))
    }
}

/// Everything a server answers with: a web root for static files plus the
/// request handlers and WebSocket factories registered by exact path.
///
/// # Examples
///
/// ```
/// use duplex_web::{Outbound, Request, Response, Routes, StatusCode, WebSocketHandler};
///
/// struct Echo;
///
/// impl WebSocketHandler for Echo {
///     fn text(&mut self, socket: &mut Outbound<'_>, text: String) {
///         socket.send_text(&text);
///     }
///     fn binary(&mut self, socket: &mut Outbound<'_>, data: Vec<u8>) {
///         socket.send_binary(&data);
///     }
/// }
///
/// let routes = Routes::new("./public")
///     .route("/hello", |_| Ok(Response::text(StatusCode::Ok, "Hello!")))
///     .websocket("/echo", |_| Echo);
///
/// assert!(routes.lookup("/hello").is_some());
/// assert!(routes.lookup_websocket("/echo").is_some());
/// ```
pub struct Routes {
    root: PathBuf,
    handlers: HashMap<String, Box<dyn RequestHandler>>,
    websockets: HashMap<String, Box<dyn WebSocketFactory>>,
}

impl Routes {
    /// Serves static files below `root`.
    ///
    /// The root is canonicalized when it exists and used as given otherwise.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            root: fs::canonicalize(&root).unwrap_or(root),
            handlers: HashMap::new(),
            websockets: HashMap::new(),
        }
    }

    /// Registers a closure for requests whose decoded path equals `path`.
    #[inline]
    pub fn route<F>(self, path: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&Request) -> Result<Response, HttpError> + Send + Sync + 'static,
    {
        self.handler(path, handler)
    }

    /// Registers a [`RequestHandler`] for requests whose decoded path equals `path`.
    #[inline]
    pub fn handler(mut self, path: impl Into<String>, handler: impl RequestHandler) -> Self {
        self.handlers.insert(path.into(), Box::new(handler));
        self
    }

    /// Registers a closure creating the handler of each WebSocket upgraded on `path`.
    #[inline]
    pub fn websocket<F, H>(self, path: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&Request) -> H + Send + Sync + 'static,
        H: WebSocketHandler + 'static,
    {
        self.websocket_factory(path, factory)
    }

    /// Registers a [`WebSocketFactory`] for upgrades on `path`.
    #[inline]
    pub fn websocket_factory(
        mut self,
        path: impl Into<String>,
        factory: impl WebSocketFactory,
    ) -> Self {
        self.websockets.insert(path.into(), Box::new(factory));
        self
    }

    #[inline]
    pub fn lookup(&self, path: &str) -> Option<&dyn RequestHandler> {
        self.handlers.get(path).map(|handler| &**handler)
    }

    #[inline]
    pub fn lookup_websocket(&self, path: &str) -> Option<&dyn WebSocketFactory> {
        self.websockets.get(path).map(|factory| &**factory)
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Maps a decoded request path to a file system path below the root.
    ///
    /// Normalization is lexical: `.` segments are dropped and `..` removes the
    /// previous segment. `None` when the path would leave the root or holds a
    /// segment that is not a plain file name.
    pub(crate) fn resolve(&self, uri: &str) -> Option<PathBuf> {
        let mut path = self.root.clone();
        let mut depth = 0usize;

        for segment in uri.split(['/', '\\']) {
            match segment {
                "" | "." => {}
                ".." => {
                    depth = depth.checked_sub(1)?;
                    path.pop();
                }
                _ if segment.contains('\0') => return None,
                _ => {
                    let mut components = Path::new(segment).components();
                    match (components.next(), components.next()) {
                        (Some(Component::Normal(_)), None) => {}
                        _ => return None,
                    }

                    path.push(segment);
                    depth += 1;
                }
            }
        }

        Some(path)
    }
}

impl std::fmt::Debug for Routes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Routes")
            .field("root", &self.root)
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .field("websockets", &self.websockets.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{tools::*, StatusCode};

    #[test]
    fn resolve() {
        let routes = Routes::new("/srv/www-does-not-exist");

        #[rustfmt::skip]
        let cases = [
            ("/",                      Some("/srv/www-does-not-exist")),
            ("/index.html",            Some("/srv/www-does-not-exist/index.html")),
            ("/a/b/../c.txt",          Some("/srv/www-does-not-exist/a/c.txt")),
            ("/a/./b//c",              Some("/srv/www-does-not-exist/a/b/c")),
            ("/a/..",                  Some("/srv/www-does-not-exist")),
            ("/..",                    None),
            ("/../etc/passwd",         None),
            ("/a/../../etc/passwd",    None),
            ("/a\\..\\..\\etc",        None),
            ("/nul\0byte",             None),
        ];

        for (uri, expected) in cases {
            assert_eq!(routes.resolve(uri), expected.map(PathBuf::from), "{uri:?}");
        }
    }

    #[test]
    fn lookup() {
        let routes = Routes::new(".")
            .route("/hello", |req| {
                Ok(Response::text(StatusCode::Ok, format!("hi {}", req.query())))
            })
            .handler("/fail", |_: &Request| -> Result<Response, HttpError> {
                Err(HttpError::forbidden("nope"))
            });

        let request = request("GET /hello?x HTTP/1.1\r\n\r\n");

        let Some(handler) = routes.lookup("/hello") else {
            panic!("missing handler");
        };
        assert_eq!(
            handler.handle(&request).map(|resp| resp.body_ref().clone()),
            Ok(crate::Body::Bytes(b"hi x".to_vec()))
        );

        let Some(handler) = routes.lookup("/fail") else {
            panic!("missing handler");
        };
        assert_eq!(
            handler.handle(&request).map_err(|err| err.status()),
            Err(StatusCode::Forbidden)
        );

        assert!(routes.lookup("/hello/").is_none());
        assert!(routes.lookup_websocket("/hello").is_none());
    }
}
