//! Handlers, and the one type every layer of the pipeline shares.
//!
//! Route functions, the router and each wrapped stage all end up as a
//! [`BoxedHandler`]. A stage receives the next `BoxedHandler` and returns a
//! new one, so building the pipeline is a fold over a list.
//!
//! ```text
//! async fn show(req: Request) -> impl IntoResponse     route function
//!        │  Router::get(.., show)  or  handler::boxed(show)
//!        ▼
//! Arc<Endpoint(show)>                                   BoxedHandler
//!        │  Stage::wrap, once per stage, innermost first
//!        ▼
//! Arc<AccessLog { next: Arc<Timing { next: .. }> }>     composed pipeline
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::request::Request;
use crate::response::{IntoResponse, Response};

/// The future returned by every [`ErasedHandler`].
pub type BoxFuture = Pin<Box<dyn Future<Output = Response> + Send + 'static>>;

/// Object-safe request handler.
///
/// Middleware stages implement this directly: hold the `next` handler in a
/// struct, do the stage's work around `next.call(req)`.
pub trait ErasedHandler {
    fn call(&self, req: Request) -> BoxFuture;
}

/// A handler shared by every connection task.
pub type BoxedHandler = Arc<dyn ErasedHandler + Send + Sync + 'static>;

/// Anything that can serve a route.
///
/// Implemented for every `Fn(Request) -> impl Future<Output = impl IntoResponse>`
/// that is `Send + Sync + 'static`, which covers `async fn` items and
/// closures returning `async` blocks. Sealed.
pub trait Handler: sealed::Erase + Send + Sync + 'static {}

impl<F, Fut, R> Handler for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
}

mod sealed {
    use super::*;

    pub trait Erase {
        fn erase(self) -> BoxedHandler;
    }

    impl<F, Fut, R> Erase for F
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: IntoResponse + Send + 'static,
    {
        fn erase(self) -> BoxedHandler {
            Arc::new(Endpoint(self))
        }
    }
}

/// A route function behind the [`ErasedHandler`] vtable.
struct Endpoint<F>(F);

impl<F, Fut, R> ErasedHandler for Endpoint<F>
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn call(&self, req: Request) -> BoxFuture {
        // The function body up to its first `.await` runs here, outside the
        // returned future. The recovery stage guards both halves.
        let pending = (self.0)(req);
        Box::pin(async move { pending.await.into_response() })
    }
}

/// Erases a [`Handler`] so it can be called, or wrapped by a stage, without
/// a router.
pub fn boxed(handler: impl Handler) -> BoxedHandler {
    sealed::Erase::erase(handler)
}
