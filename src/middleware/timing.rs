//! Arrival timestamp and response-time header.

use std::sync::Arc;
use std::time::SystemTime;

use http::header::{HeaderName, HeaderValue};
use tokio::time::Instant;

use super::Stage;
use crate::handler::{BoxFuture, BoxedHandler, ErasedHandler};
use crate::request::Request;

/// Milliseconds since the request arrived, e.g. `12.345ms`.
pub const RESPONSE_TIME_HEADER: HeaderName = HeaderName::from_static("x-response-time");

/// Stamps the arrival time on the request context, unless the connection
/// already did, and reports the time since arrival once the inner chain
/// has answered.
#[derive(Clone, Copy, Debug, Default)]
pub struct TimingStage;

impl Stage for TimingStage {
    fn name(&self) -> &'static str { "timing" }

    fn wrap(&self, next: BoxedHandler) -> BoxedHandler {
        Arc::new(Timing { next })
    }
}

struct Timing {
    next: BoxedHandler,
}

impl ErasedHandler for Timing {
    fn call(&self, req: Request) -> BoxFuture {
        let (arrived, context) = match req.context().arrived_at() {
            Some(at) => (at, req.context().clone()),
            None => {
                let at = Instant::now();
                (at, req.context().clone().with_arrival(at, SystemTime::now()))
            }
        };
        let req = req.with_context(context.clone());
        let next = Arc::clone(&self.next);

        Box::pin(async move {
            let mut res = next.call(req).await;
            let elapsed = arrived.elapsed().as_secs_f64() * 1000.0;
            if let Ok(value) = HeaderValue::from_str(&format!("{elapsed:.3}ms")) {
                res.headers_mut().insert(RESPONSE_TIME_HEADER, value);
            }
            res.attach_context(context);
            res
        })
    }
}
