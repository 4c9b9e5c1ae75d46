//! # keel
//!
//! An HTTP service host. You bring the routes and the store handles; keel
//! runs them behind a fixed middleware pipeline and shuts them down
//! gracefully.
//!
//! ## What every request goes through
//!
//! ```text
//! Log → Timing → RequestId → RealIp → Recover → Timeout → Router → handler
//! ```
//!
//! - one structured access record per request (`keel::access` target)
//! - an `x-request-id` on every response, echoed or generated
//! - the client address, honoring proxy headers when configured to
//! - panics turned into `500` responses, scoped to the one request
//! - handlers bounded by `http.request_timeout_secs` (`504` on expiry)
//!
//! ## Lifecycle
//!
//! [`Service::new`] validates the wiring without binding anything.
//! [`Service::start`] binds and serves until [`Service::stop`], which stops
//! accepting, lets in-flight requests finish within the grace period and
//! then returns. `/healthz` and `/readyz` are always mounted.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::process::ExitCode;
//! use std::sync::Arc;
//!
//! use keel::{BackingStore, Config, Request, Response, Router, Service, StatusCode, Stores};
//! # use keel::StoreError;
//! # struct Pg;
//! # #[async_trait::async_trait]
//! # impl BackingStore for Pg {
//! #     fn name(&self) -> &str { "pg" }
//! #     async fn ping(&self) -> Result<(), StoreError> { Ok(()) }
//! # }
//!
//! #[tokio::main]
//! async fn main() -> ExitCode {
//!     let stores = Stores::new()
//!         .relational(Arc::new(Pg))
//!         .document(Arc::new(Pg))
//!         .cache(Arc::new(Pg));
//!
//!     let routes = Router::new()
//!         .get("/users/{id}", get_user)
//!         .post("/users", create_user);
//!
//!     let service = match Service::new(stores, ":3000", Config::default(), routes) {
//!         Ok(service) => service,
//!         Err(e) => return e.exit_code(),
//!     };
//!
//!     let stopper = service.clone();
//!     tokio::spawn(async move {
//!         keel::shutdown_signal().await;
//!         stopper.stop().await;
//!     });
//!
//!     match service.start().await {
//!         Ok(()) => ExitCode::SUCCESS,
//!         Err(e) => e.exit_code(),
//!     }
//! }
//!
//! async fn get_user(req: Request) -> Response {
//!     let id = req.param("id").unwrap_or("unknown");
//!     Response::json(format!(r#"{{"id":"{id}"}}"#))
//! }
//!
//! async fn create_user(req: Request) -> Response {
//!     if req.body().is_empty() {
//!         return Response::status(StatusCode::BAD_REQUEST);
//!     }
//!     Response::builder().status(StatusCode::CREATED).json(req.body().to_vec())
//! }
//! ```

mod config;
mod context;
mod error;
mod handler;
mod request;
mod response;
mod router;
mod service;
mod store;

pub mod health;
pub mod middleware;
pub mod telemetry;

pub use config::{Config, HttpConfig, LogConfig};
pub use context::{RequestContext, RequestId};
pub use error::Error;
pub use handler::{BoxFuture, BoxedHandler, ErasedHandler, Handler, boxed};
pub use http::{Method, StatusCode};
pub use request::Request;
pub use response::{IntoResponse, Response, ResponseBuilder};
pub use router::Router;
pub use service::{Listener, Service, State, shutdown_signal};
pub use store::{BackingStore, StoreError, StoreKind, Stores};
