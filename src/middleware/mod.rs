//! Middleware pipeline.
//!
//! A [`Stage`] takes the next handler and returns a new handler that wraps
//! it. [`compose`] folds an ordered list of stages around a terminal handler
//! so that stage *i* fully wraps stage *i + 1*:
//!
//! ```text
//! request ──► Log ► Timing ► RequestId ► RealIp ► Recover ► Timeout ► Router
//! response ◄─ Log ◄ Timing ◄ RequestId ◄ RealIp ◄ Recover ◄ Timeout ◄──┘
//! ```
//!
//! That is the order [`Pipeline::standard`] builds, and the only order a
//! [`Service`](crate::Service) runs:
//!
//! - **Log** is outermost so it sees the final outcome of everything inside,
//!   including recovered panics and timeouts, exactly once per request.
//! - **Recover** sits below the stages that shape the log record and above
//!   the timeout and the handler, so a panic in either becomes a 500 before
//!   logging runs.
//! - **Timeout** is innermost so only handler execution is bounded, never the
//!   middleware around it.
//!
//! The order is fixed when the pipeline is composed. Nothing can reorder it
//! per request.

mod logging;
mod real_ip;
mod recover;
mod request_id;
mod timeout;
mod timing;

pub use logging::LogStage;
pub use real_ip::{RealIpStage, resolve_client_ip};
pub use recover::{Fault, Outcome, RecoverStage, supervise};
pub use request_id::{REQUEST_ID_HEADER, RequestIdStage};
pub use timeout::TimeoutStage;
pub use timing::{RESPONSE_TIME_HEADER, TimingStage};

use crate::config::HttpConfig;
use crate::handler::BoxedHandler;

/// One unit of the pipeline.
///
/// Stages keep no per-request state; anything they hold is configuration
/// captured at construction.
pub trait Stage: Send + Sync + 'static {
    /// Stable name, used in startup logs.
    fn name(&self) -> &'static str;

    /// Wraps `next` and returns the combined handler.
    fn wrap(&self, next: BoxedHandler) -> BoxedHandler;
}

/// Folds `stages` (outermost first) around `terminal`.
pub fn compose(stages: &[Box<dyn Stage>], terminal: BoxedHandler) -> BoxedHandler {
    stages.iter().rev().fold(terminal, |next, stage| stage.wrap(next))
}

/// An ordered list of stages, outermost first.
#[derive(Default)]
pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// The production order: log, timing, request id, real ip, recover, timeout.
    pub fn standard(cfg: &HttpConfig) -> Self {
        Self::new()
            .stage(LogStage)
            .stage(TimingStage)
            .stage(RequestIdStage)
            .stage(RealIpStage::new(cfg.trust_proxy_headers))
            .stage(RecoverStage)
            .stage(TimeoutStage::new(cfg.request_timeout()))
    }

    /// Appends `stage` inside every stage added so far.
    pub fn stage(mut self, stage: impl Stage) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub fn compose(&self, terminal: BoxedHandler) -> BoxedHandler {
        compose(&self.stages, terminal)
    }
}
