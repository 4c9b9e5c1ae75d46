//! Per-request deadline.

use std::sync::Arc;
use std::time::Duration;

use http::StatusCode;
use tracing::warn;

use super::Stage;
use crate::handler::{BoxFuture, BoxedHandler, ErasedHandler};
use crate::request::Request;
use crate::response::Response;

/// Bounds handler execution and answers `504 Gateway Timeout` on expiry.
///
/// The inner future is dropped when the deadline passes. Anything the
/// handler spawned onto the runtime keeps running; only its result is
/// discarded.
#[derive(Clone, Copy, Debug)]
pub struct TimeoutStage {
    limit: Duration,
}

impl TimeoutStage {
    pub fn new(limit: Duration) -> Self {
        Self { limit }
    }
}

impl Stage for TimeoutStage {
    fn name(&self) -> &'static str { "timeout" }

    fn wrap(&self, next: BoxedHandler) -> BoxedHandler {
        Arc::new(Deadline { next, limit: self.limit })
    }
}

struct Deadline {
    next: BoxedHandler,
    limit: Duration,
}

impl ErasedHandler for Deadline {
    fn call(&self, req: Request) -> BoxFuture {
        let request_id = req.context().request_id().cloned();
        let limit = self.limit;
        let fut = self.next.call(req);

        Box::pin(async move {
            match tokio::time::timeout(limit, fut).await {
                Ok(res) => res,
                Err(_) => {
                    warn!(
                        request_id = request_id.as_ref().map(|id| id.as_str()).unwrap_or("-"),
                        limit_ms = limit.as_millis() as u64,
                        "request timed out"
                    );
                    Response::builder()
                        .status(StatusCode::GATEWAY_TIMEOUT)
                        .text("Gateway Timeout")
                }
            }
        })
    }
}
