//! Originating client address.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use http::HeaderMap;

use super::Stage;
use crate::handler::{BoxFuture, BoxedHandler, ErasedHandler};
use crate::request::Request;

const TRUE_CLIENT_IP: &str = "true-client-ip";
const X_REAL_IP: &str = "x-real-ip";
const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Resolves the client address and records it in the request context.
#[derive(Clone, Copy, Debug)]
pub struct RealIpStage {
    trust_proxy_headers: bool,
}

impl RealIpStage {
    pub fn new(trust_proxy_headers: bool) -> Self {
        Self { trust_proxy_headers }
    }
}

impl Default for RealIpStage {
    fn default() -> Self { Self::new(true) }
}

impl Stage for RealIpStage {
    fn name(&self) -> &'static str { "real_ip" }

    fn wrap(&self, next: BoxedHandler) -> BoxedHandler {
        Arc::new(ResolveRealIp { next, trust_proxy_headers: self.trust_proxy_headers })
    }
}

struct ResolveRealIp {
    next: BoxedHandler,
    trust_proxy_headers: bool,
}

impl ErasedHandler for ResolveRealIp {
    fn call(&self, req: Request) -> BoxFuture {
        let resolved = resolve_client_ip(
            req.headers(),
            req.context().peer_addr(),
            self.trust_proxy_headers,
        );
        let context = match resolved {
            Some(ip) => req.context().clone().with_client_addr(ip),
            None => req.context().clone(),
        };
        let req = req.with_context(context.clone());
        let next = Arc::clone(&self.next);

        Box::pin(async move {
            let mut res = next.call(req).await;
            res.attach_context(context);
            res
        })
    }
}

/// Picks the originating client IP.
///
/// With `trust_proxy_headers`, the first header that parses wins:
/// `True-Client-IP`, then `X-Real-IP`, then the leftmost `X-Forwarded-For`
/// entry. Otherwise, or when none parse, the transport peer is used.
pub fn resolve_client_ip(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    trust_proxy_headers: bool,
) -> Option<IpAddr> {
    let from_headers = || {
        let single = |name: &str| headers.get(name)?.to_str().ok()?.trim().parse::<IpAddr>().ok();
        single(TRUE_CLIENT_IP).or_else(|| single(X_REAL_IP)).or_else(|| {
            let list = headers.get(X_FORWARDED_FOR)?.to_str().ok()?;
            list.split(',').next()?.trim().parse().ok()
        })
    };

    trust_proxy_headers
        .then(from_headers)
        .flatten()
        .or_else(|| peer.map(|p| p.ip()))
}
