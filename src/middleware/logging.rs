//! Access log.

use std::sync::Arc;

use tokio::time::Instant;
use tracing::{error, info};

use super::Stage;
use crate::handler::{BoxFuture, BoxedHandler, ErasedHandler};
use crate::request::Request;

/// Emits one `keel::access` record per request after everything inside has
/// finished, whether the handler answered, panicked, or ran out of time.
///
/// Request id, client address and arrival time come from the context the
/// inner stages attach to the response, since this stage runs before any of
/// them have touched the request.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogStage;

impl Stage for LogStage {
    fn name(&self) -> &'static str { "log" }

    fn wrap(&self, next: BoxedHandler) -> BoxedHandler {
        Arc::new(AccessLog { next })
    }
}

struct AccessLog {
    next: BoxedHandler,
}

impl ErasedHandler for AccessLog {
    fn call(&self, req: Request) -> BoxFuture {
        let started = Instant::now();
        let method = req.method().clone();
        let path = req.path().to_owned();
        let next = Arc::clone(&self.next);

        Box::pin(async move {
            let res = next.call(req).await;

            let context = res.context();
            let arrived = context.and_then(|c| c.arrived_at()).unwrap_or(started);
            let elapsed_ms = arrived.elapsed().as_secs_f64() * 1000.0;
            let request_id = context
                .and_then(|c| c.request_id())
                .map(|id| id.as_str().to_owned())
                .unwrap_or_else(|| "-".to_owned());
            let client_addr = context
                .and_then(|c| c.client_addr())
                .map(|ip| ip.to_string())
                .unwrap_or_else(|| "-".to_owned());
            let status = res.status_code().as_u16();

            if res.status_code().is_server_error() {
                error!(
                    target: "keel::access",
                    method = %method,
                    path = %path,
                    status,
                    elapsed_ms,
                    request_id = %request_id,
                    client_addr = %client_addr,
                    "request failed"
                );
            } else {
                info!(
                    target: "keel::access",
                    method = %method,
                    path = %path,
                    status,
                    elapsed_ms,
                    request_id = %request_id,
                    client_addr = %client_addr,
                    "request completed"
                );
            }

            res
        })
    }
}
