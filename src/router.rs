//! Method + path dispatch over per-method radix trees.
//!
//! One tree per HTTP method. O(path-length) lookup. You register a path, you
//! get a handler. Cross-cutting behavior lives in [`middleware`](crate::middleware),
//! never here.

use std::collections::HashMap;
use std::sync::Arc;

use http::header::{self, HeaderValue};
use http::{Method, StatusCode};
use matchit::Router as MatchitRouter;
use tracing::debug;

use crate::error::Error;
use crate::handler::{BoxFuture, BoxedHandler, ErasedHandler, Handler, boxed};
use crate::request::Request;
use crate::response::Response;

/// The application router.
///
/// Build it once at startup and hand it to [`Service::new`](crate::Service::new),
/// which places it at the center of the middleware pipeline.
/// Each registration returns `self` so calls chain naturally.
///
/// Paths use `{name}` for a single segment and `{*name}` for a catch-all
/// suffix (prefix matching):
///
/// ```rust
/// # use keel::{Method, Request, Response, Router};
/// # async fn get_user(_: Request) -> Response { Response::text("") }
/// # async fn create_user(_: Request) -> Response { Response::text("") }
/// # async fn assets(_: Request) -> Response { Response::text("") }
/// Router::new()
///     .get("/users/{id}", get_user)
///     .post("/users", create_user)
///     .on(Method::GET, "/assets/{*file}", assets);
/// ```
pub struct Router {
    routes: HashMap<Method, MatchitRouter<BoxedHandler>>,
    invalid: Option<(String, String)>,
}

impl Router {
    pub fn new() -> Self {
        Self { routes: HashMap::new(), invalid: None }
    }

    /// Register a handler for a method + path pair.
    ///
    /// An invalid or conflicting path does not panic; the first such error
    /// is kept and reported by [`Service::new`](crate::Service::new).
    pub fn on(mut self, method: Method, path: &str, handler: impl Handler) -> Self {
        let inserted = self
            .routes
            .entry(method)
            .or_default()
            .insert(path, boxed(handler));
        if let Err(e) = inserted {
            self.invalid.get_or_insert_with(|| (path.to_owned(), e.to_string()));
        }
        self
    }

    pub fn get(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::GET, path, handler)
    }

    pub fn post(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::POST, path, handler)
    }

    pub fn put(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::PUT, path, handler)
    }

    pub fn patch(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::PATCH, path, handler)
    }

    pub fn delete(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::DELETE, path, handler)
    }

    /// Fails with the first registration error, if any.
    pub fn validate(&self) -> Result<(), Error> {
        match &self.invalid {
            Some((path, reason)) => {
                Err(Error::InvalidRoute { path: path.clone(), reason: reason.clone() })
            }
            None => Ok(()),
        }
    }

    /// The handler for `method` + `path`, with its captured parameters.
    pub(crate) fn lookup(&self, method: &Method, path: &str) -> Option<(BoxedHandler, HashMap<String, String>)> {
        let found = self.routes.get(method)?.at(path).ok()?;
        let params = found
            .params
            .iter()
            .map(|(name, value)| (name.to_owned(), value.to_owned()))
            .collect();
        Some((Arc::clone(found.value), params))
    }

    /// Methods with a route matching `path`, for the `Allow` header of a 405.
    fn allowed(&self, path: &str) -> Vec<&Method> {
        let mut methods: Vec<&Method> = self
            .routes
            .iter()
            .filter(|(_, tree)| tree.at(path).is_ok())
            .map(|(method, _)| method)
            .collect();
        methods.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        methods
    }

    /// Turns the router into the terminal handler of a pipeline.
    pub fn into_handler(self) -> BoxedHandler {
        Arc::new(RouterHandler(Arc::new(self)))
    }
}

impl Default for Router {
    fn default() -> Self { Self::new() }
}

// ── Dispatch ──────────────────────────────────────────────────────────────────

struct RouterHandler(Arc<Router>);

impl ErasedHandler for RouterHandler {
    fn call(&self, req: Request) -> BoxFuture {
        if req.body_unreadable {
            return Box::pin(async {
                Response::builder().status(StatusCode::BAD_REQUEST).text("Bad Request")
            });
        }

        if let Some((handler, params)) = self.0.lookup(req.method(), req.path()) {
            return handler.call(req.with_params(params));
        }

        let allowed = self.0.allowed(req.path());
        let response = if allowed.is_empty() {
            debug!(method = %req.method(), path = req.path(), "no route");
            Response::status(StatusCode::NOT_FOUND)
        } else {
            let allow = allowed.iter().map(|m| m.as_str()).collect::<Vec<_>>().join(", ");
            let mut res = Response::status(StatusCode::METHOD_NOT_ALLOWED);
            if let Ok(value) = HeaderValue::from_str(&allow) {
                res.headers_mut().insert(header::ALLOW, value);
            }
            res
        };
        Box::pin(async move { response })
    }
}
