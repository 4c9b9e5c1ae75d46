//! Incoming HTTP request type.

use std::collections::HashMap;
use std::net::SocketAddr;

use bytes::Bytes;
use http::{HeaderMap, Method, Uri};

use crate::context::RequestContext;

/// An incoming HTTP request with its body fully buffered.
pub struct Request {
    pub(crate) head: http::request::Parts,
    pub(crate) body: Bytes,
    pub(crate) params: HashMap<String, String>,
    pub(crate) context: RequestContext,
    pub(crate) body_unreadable: bool,
}

impl Request {
    /// Wraps an `http::Request` received from `peer`.
    ///
    /// The server does this for you; it is public so that a pipeline can be
    /// driven directly, without a socket.
    pub fn new(req: http::Request<Bytes>, peer: Option<SocketAddr>) -> Self {
        let (head, body) = req.into_parts();
        Self::from_parts(head, body, peer)
    }

    pub(crate) fn from_parts(
        head: http::request::Parts,
        body: Bytes,
        peer: Option<SocketAddr>,
    ) -> Self {
        Self {
            head,
            body,
            params: HashMap::new(),
            context: RequestContext::new(peer),
            body_unreadable: false,
        }
    }

    pub fn method(&self) -> &Method { &self.head.method }
    pub fn uri(&self) -> &Uri { &self.head.uri }
    pub fn path(&self) -> &str { self.head.uri.path() }
    pub fn headers(&self) -> &HeaderMap { &self.head.headers }
    pub fn body(&self) -> &[u8] { &self.body }
    pub fn context(&self) -> &RequestContext { &self.context }

    /// Case-insensitive header lookup. Values that are not visible ASCII
    /// are treated as absent.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.head.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Returns a named path parameter.
    ///
    /// For a route `/users/{id}`, `req.param("id")` on `/users/42` returns `Some("42")`.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// Replaces the request's context with one derived from it.
    ///
    /// Middleware calls this after `req.context().clone().with_…(…)`; the
    /// previous context value is dropped, never modified.
    pub fn with_context(mut self, context: RequestContext) -> Self {
        self.context = context;
        self
    }

    /// Marks a request whose body could not be read. It still travels the
    /// whole pipeline; the router answers it with `400 Bad Request`.
    pub(crate) fn with_unreadable_body(mut self) -> Self {
        self.body = Bytes::new();
        self.body_unreadable = true;
        self
    }

    pub(crate) fn with_params(mut self, params: HashMap<String, String>) -> Self {
        self.params = params;
        self
    }
}
