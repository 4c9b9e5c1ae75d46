//! Built-in health-check handlers.
//!
//! | Probe | Path | Question |
//! |---|---|---|
//! | **Liveness** | `/healthz` | Is the process alive? Failure → restart. |
//! | **Readiness** | `/readyz` | Are the backing stores reachable? Failure → no traffic. |
//!
//! [`Service::new`](crate::Service::new) mounts both, so application routers
//! must not claim these paths.

use http::StatusCode;
use tracing::warn;

use crate::handler::Handler;
use crate::request::Request;
use crate::response::Response;
use crate::store::Stores;

pub const LIVENESS_PATH: &str = "/healthz";
pub const READINESS_PATH: &str = "/readyz";

/// Liveness probe. Always `200 OK` with body `"ok"`; it has no dependencies
/// on purpose.
pub async fn liveness(_req: Request) -> Response {
    Response::text("ok")
}

/// Readiness probe over `stores`.
///
/// Pings every store. `200 "ready"` when all answer, otherwise
/// `503 Service Unavailable` listing the failures, one per line.
pub fn readiness(stores: Stores) -> impl Handler {
    move |_req: Request| {
        let stores = stores.clone();
        async move {
            let failures: Vec<String> = stores
                .ping_all()
                .await
                .into_iter()
                .filter_map(|(kind, result)| result.err().map(|e| format!("{kind}: {e}")))
                .collect();

            if failures.is_empty() {
                return Response::text("ready");
            }
            warn!(failures = ?failures, "readiness check failed");
            Response::builder()
                .status(StatusCode::SERVICE_UNAVAILABLE)
                .text(failures.join("\n"))
        }
    }
}
