//! Correlation id assignment.

use std::sync::Arc;

use http::header::{HeaderName, HeaderValue};

use super::Stage;
use crate::context::RequestId;
use crate::handler::{BoxFuture, BoxedHandler, ErasedHandler};
use crate::request::Request;

/// Header carrying the correlation id in both directions.
pub const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

/// Reuses the caller's `X-Request-ID` when it is acceptable, generates one
/// otherwise, and echoes it on every response.
#[derive(Clone, Copy, Debug, Default)]
pub struct RequestIdStage;

impl Stage for RequestIdStage {
    fn name(&self) -> &'static str { "request_id" }

    fn wrap(&self, next: BoxedHandler) -> BoxedHandler {
        Arc::new(AssignRequestId { next })
    }
}

struct AssignRequestId {
    next: BoxedHandler,
}

impl ErasedHandler for AssignRequestId {
    fn call(&self, req: Request) -> BoxFuture {
        let id = req
            .header(REQUEST_ID_HEADER.as_str())
            .and_then(RequestId::parse)
            .unwrap_or_else(RequestId::generate);
        let context = req.context().clone().with_request_id(id.clone());
        let req = req.with_context(context.clone());
        let next = Arc::clone(&self.next);

        Box::pin(async move {
            let mut res = next.call(req).await;
            // Parsed ids are visible ASCII and generated ones are UUIDs.
            if let Ok(value) = HeaderValue::from_str(id.as_str()) {
                res.headers_mut().insert(REQUEST_ID_HEADER, value);
            }
            res.attach_context(context);
            res
        })
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::handler::boxed;
    use crate::response::Response;

    fn echo_id() -> BoxedHandler {
        RequestIdStage.wrap(boxed(|req: Request| async move {
            let id = req.context().request_id().map(|id| id.to_string()).unwrap_or_default();
            Response::text(id)
        }))
    }

    fn request(id: Option<&str>) -> Request {
        let mut builder = http::Request::builder().uri("/");
        if let Some(id) = id {
            builder = builder.header("x-request-id", id);
        }
        Request::new(builder.body(Bytes::new()).unwrap(), None)
    }

    #[tokio::test]
    async fn caller_id_is_echoed_and_visible_to_handler() {
        let res = echo_id().call(request(Some("abc123"))).await;
        assert_eq!(res.header("x-request-id"), Some("abc123"));
        assert_eq!(res.body(), b"abc123");
        assert_eq!(res.context().unwrap().request_id().unwrap().as_str(), "abc123");
    }

    #[tokio::test]
    async fn missing_or_unusable_id_is_generated() {
        for supplied in [None, Some(""), Some("has spaces in it")] {
            let res = echo_id().call(request(supplied)).await;
            let id = res.header("x-request-id").unwrap().to_owned();
            assert!(!id.is_empty());
            assert_ne!(Some(id.as_str()), supplied);
            assert_eq!(res.body(), id.as_bytes());
        }
    }

    #[tokio::test]
    async fn handler_cannot_override_the_id_header() {
        let handler = RequestIdStage.wrap(boxed(|_req: Request| async {
            let mut res = Response::text("x");
            res.headers_mut().insert(REQUEST_ID_HEADER, HeaderValue::from_static("forged"));
            res
        }));
        let res = handler.call(request(Some("real"))).await;
        assert_eq!(res.header("x-request-id"), Some("real"));
    }
}
