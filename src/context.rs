//! Per-request context.
//!
//! Every request gets its own [`RequestContext`] the moment hyper hands it
//! to keel. Middleware stages enrich it as the request travels inward:
//!
//! ```text
//! RequestContext::new(peer)          ← dispatch
//!        ↓ with_arrival(..)          ← TimingStage
//!        ↓ with_request_id(..)       ← RequestIdStage
//!        ↓ with_client_addr(..)      ← RealIpStage
//! req.context()                      ← your handler reads it
//! ```
//!
//! A context is never edited in place. Each `with_*` method consumes the old
//! value and returns a derived one, so whatever a stage has already seen
//! stays true for it.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, SystemTime};

use tokio::time::Instant;
use uuid::Uuid;

/// Longest caller-supplied correlation id keel will accept.
const MAX_REQUEST_ID_LEN: usize = 256;

// ── RequestId ─────────────────────────────────────────────────────────────────

/// Opaque correlation identifier for one request.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct RequestId(String);

impl RequestId {
    /// A fresh random id (UUID v4, hyphenated).
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Accepts a caller-supplied id.
    ///
    /// Returns `None` for ids that are blank, longer than 256 bytes, or that
    /// contain anything other than visible ASCII. Those get replaced by a
    /// generated id rather than echoed back.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() || raw.len() > MAX_REQUEST_ID_LEN {
            return None;
        }
        if !raw.bytes().all(|b| b.is_ascii_graphic()) {
            return None;
        }
        Some(Self(raw.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ── RequestContext ────────────────────────────────────────────────────────────

/// Metadata attached to a single request.
#[derive(Clone, Debug)]
pub struct RequestContext {
    arrived_at: Option<Instant>,
    arrived_at_wall: Option<SystemTime>,
    request_id: Option<RequestId>,
    peer_addr: Option<SocketAddr>,
    client_addr: Option<IpAddr>,
}

impl RequestContext {
    /// An empty context for a request received from `peer_addr`.
    pub fn new(peer_addr: Option<SocketAddr>) -> Self {
        Self {
            arrived_at: None,
            arrived_at_wall: None,
            request_id: None,
            peer_addr,
            client_addr: None,
        }
    }

    pub fn with_arrival(self, at: Instant, wall: SystemTime) -> Self {
        Self { arrived_at: Some(at), arrived_at_wall: Some(wall), ..self }
    }

    pub fn with_request_id(self, id: RequestId) -> Self {
        Self { request_id: Some(id), ..self }
    }

    pub fn with_client_addr(self, addr: IpAddr) -> Self {
        Self { client_addr: Some(addr), ..self }
    }

    /// Monotonic arrival time, set by the timing stage.
    pub fn arrived_at(&self) -> Option<Instant> { self.arrived_at }

    /// Wall-clock arrival time, set by the timing stage.
    pub fn arrived_at_wall(&self) -> Option<SystemTime> { self.arrived_at_wall }

    pub fn request_id(&self) -> Option<&RequestId> { self.request_id.as_ref() }

    /// Transport-level peer address of the connection.
    pub fn peer_addr(&self) -> Option<SocketAddr> { self.peer_addr }

    /// Originating client address, after proxy headers are taken into account.
    pub fn client_addr(&self) -> Option<IpAddr> { self.client_addr }

    /// Time since arrival, or `None` if no arrival was recorded.
    pub fn elapsed(&self) -> Option<Duration> {
        self.arrived_at.map(|at| at.elapsed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_printable_ids() {
        assert_eq!(RequestId::parse("abc123").unwrap().as_str(), "abc123");
        assert_eq!(RequestId::parse("  trace-9/x  ").unwrap().as_str(), "trace-9/x");
    }

    #[test]
    fn parse_rejects_blank_oversized_and_non_ascii() {
        assert!(RequestId::parse("").is_none());
        assert!(RequestId::parse("   ").is_none());
        assert!(RequestId::parse(&"a".repeat(MAX_REQUEST_ID_LEN + 1)).is_none());
        assert!(RequestId::parse("has space").is_none());
        assert!(RequestId::parse("ünïcode").is_none());
    }

    #[test]
    fn generated_ids_are_distinct_uuids() {
        let a = RequestId::generate();
        let b = RequestId::generate();
        assert_ne!(a, b);
        assert!(Uuid::parse_str(a.as_str()).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn derivation_leaves_the_previous_context_untouched() {
        let peer: SocketAddr = "10.0.0.1:5000".parse().unwrap();
        let base = RequestContext::new(Some(peer));
        let derived = base
            .clone()
            .with_arrival(Instant::now(), SystemTime::now())
            .with_request_id(RequestId::parse("r-1").unwrap())
            .with_client_addr("192.0.2.7".parse().unwrap());

        assert!(base.request_id().is_none());
        assert!(base.arrived_at().is_none());
        assert_eq!(derived.request_id().unwrap().as_str(), "r-1");
        assert_eq!(derived.peer_addr(), Some(peer));
        assert_eq!(derived.client_addr(), Some("192.0.2.7".parse().unwrap()));

        tokio::time::advance(Duration::from_millis(40)).await;
        assert_eq!(derived.elapsed(), Some(Duration::from_millis(40)));
    }
}
