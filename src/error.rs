//! Unified error type.

use std::io;
use std::net::SocketAddr;
use std::process::ExitCode;

use crate::service::State;
use crate::store::StoreKind;

/// The error type returned by keel's fallible operations.
///
/// Application-level errors (404, 500, 504, etc.) are expressed as HTTP
/// [`Response`](crate::Response) values, not as `Error`s. A panic or a timeout
/// inside one request never turns into an `Error`. This type surfaces the
/// faults that stop a service from existing or from running: broken wiring
/// at construction, bad configuration, and bind or accept failures.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("missing required {0} store")]
    MissingStore(StoreKind),

    #[error("invalid address `{addr}`: {reason}")]
    InvalidAddress { addr: String, reason: String },

    #[error("invalid route `{path}`: {reason}")]
    InvalidRoute { path: String, reason: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("service cannot start from the {0} state")]
    NotStartable(State),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("accept failed: {0}")]
    Accept(#[source] io::Error),
}

impl Error {
    /// Process exit code for a service that ended with this error.
    ///
    /// A clean `Ok(())` from [`Service::start`](crate::Service::start) maps
    /// to `0`; every variant here is non-zero. Wiring and configuration
    /// faults use `78` (`EX_CONFIG`), a lifecycle misuse uses `70`
    /// (`EX_SOFTWARE`), and network faults use `1`.
    pub fn exit_code(&self) -> ExitCode {
        let code: u8 = match self {
            Self::MissingStore(_)
            | Self::InvalidAddress { .. }
            | Self::InvalidRoute { .. }
            | Self::Config(_) => 78,
            Self::NotStartable(_) => 70,
            Self::Bind { .. } | Self::Accept(_) => 1,
        };
        ExitCode::from(code)
    }
}
