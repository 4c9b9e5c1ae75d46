//! Panic containment.
//!
//! [`supervise`] runs one request behind an unwind boundary and reports the
//! result as an explicit [`Outcome`]. [`RecoverStage`] turns a
//! [`Fault`] into the fixed `500 Internal Server Error` response. A panic
//! unwinds only the task serving that one request, so concurrent requests
//! never see it.
//!
//! Handlers must not rely on shared state staying consistent across a panic;
//! the boundary asserts unwind safety on their behalf, as any HTTP server
//! that keeps running after a handler panic has to.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use futures::FutureExt;
use http::StatusCode;
use tracing::error;

use super::Stage;
use crate::handler::{BoxFuture, BoxedHandler, ErasedHandler};
use crate::request::Request;
use crate::response::Response;

/// A panic captured at the supervision boundary.
#[derive(Clone, Debug, thiserror::Error)]
#[error("handler panicked: {message}")]
pub struct Fault {
    pub message: String,
}

/// Result of running one request under supervision.
pub type Outcome = Result<Response, Fault>;

/// Calls `next` with `req`, catching a panic raised while building the
/// future or while polling it.
pub async fn supervise(next: &BoxedHandler, req: Request) -> Outcome {
    let fut = catch_unwind(AssertUnwindSafe(|| next.call(req))).map_err(fault)?;
    AssertUnwindSafe(fut).catch_unwind().await.map_err(fault)
}

fn fault(payload: Box<dyn Any + Send>) -> Fault {
    let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    };
    Fault { message }
}

/// Converts panics in any inner stage or handler into `500` responses.
#[derive(Clone, Copy, Debug, Default)]
pub struct RecoverStage;

impl Stage for RecoverStage {
    fn name(&self) -> &'static str { "recover" }

    fn wrap(&self, next: BoxedHandler) -> BoxedHandler {
        Arc::new(Recover { next })
    }
}

struct Recover {
    next: BoxedHandler,
}

impl ErasedHandler for Recover {
    fn call(&self, req: Request) -> BoxFuture {
        let next = Arc::clone(&self.next);
        Box::pin(async move {
            let request_id = req.context().request_id().cloned();
            let method = req.method().clone();
            let path = req.path().to_owned();

            match supervise(&next, req).await {
                Ok(res) => res,
                Err(fault) => {
                    error!(
                        request_id = request_id.as_ref().map(|id| id.as_str()).unwrap_or("-"),
                        method = %method,
                        path = %path,
                        panic = %fault.message,
                        "handler panicked"
                    );
                    internal_error()
                }
            }
        })
    }
}

fn internal_error() -> Response {
    Response::builder()
        .status(StatusCode::INTERNAL_SERVER_ERROR)
        .text("Internal Server Error")
}

#[cfg(test)]
mod tests {
    use std::future::Ready;

    use bytes::Bytes;

    use super::*;
    use crate::handler::boxed;

    fn request() -> Request {
        Request::new(http::Request::new(Bytes::new()), None)
    }

    async fn panics_when_polled(_req: Request) -> Response {
        panic!("polled and exploded")
    }

    fn panics_when_called(_req: Request) -> Ready<Response> {
        panic!("called and exploded")
    }

    async fn panics_with_payload(_req: Request) -> Response {
        std::panic::panic_any(42_u32)
    }

    #[tokio::test]
    async fn supervise_reports_both_panic_sites() {
        let fault = supervise(&boxed(panics_when_polled), request()).await.unwrap_err();
        assert_eq!(fault.message, "polled and exploded");

        let fault = supervise(&boxed(panics_when_called), request()).await.unwrap_err();
        assert_eq!(fault.message, "called and exploded");

        let fault = supervise(&boxed(panics_with_payload), request()).await.unwrap_err();
        assert_eq!(fault.message, "non-string panic payload");
    }

    #[tokio::test]
    async fn supervise_passes_responses_through() {
        let ok = boxed(|_req: Request| async { Response::status(StatusCode::ACCEPTED) });
        let res = supervise(&ok, request()).await.unwrap();
        assert_eq!(res.status_code(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn stage_answers_500_and_keeps_serving() {
        let handler = RecoverStage.wrap(boxed(panics_when_polled));
        let res = handler.call(request()).await;
        assert_eq!(res.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(res.body(), b"Internal Server Error");

        let res = handler.call(request()).await;
        assert_eq!(res.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
