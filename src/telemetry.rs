//! Process-wide logger installation.
//!
//! keel logs through `tracing` and never installs a subscriber on its own.
//! Binaries that do not want to wire one up by hand can call [`init`] once at
//! startup.

use tracing::Subscriber;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LogConfig;
use crate::error::Error;

/// Installs a global `fmt` subscriber writing to stdout.
///
/// `RUST_LOG`, when set, takes precedence over `log.level`. Development mode
/// prints multi-line human-readable records; otherwise every record is one
/// JSON object with an RFC 3339 timestamp, suitable for log shippers.
///
/// Fails if the level is not a valid filter or a global subscriber is
/// already installed.
pub fn init(cfg: &LogConfig) -> Result<(), Error> {
    subscriber(filter(cfg)?, cfg.development, std::io::stdout)
        .try_init()
        .map_err(|e| Error::Config(format!("logger: {e}")))
}

fn filter(cfg: &LogConfig) -> Result<EnvFilter, Error> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&cfg.level)
            .map_err(|e| Error::Config(format!("log.level `{}`: {e}", cfg.level))),
    }
}

fn subscriber<W>(filter: EnvFilter, development: bool, writer: W) -> Box<dyn Subscriber + Send + Sync>
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let fmt = tracing_subscriber::fmt().with_env_filter(filter).with_writer(writer);
    if development {
        Box::new(fmt.pretty().finish())
    } else {
        Box::new(fmt.json().flatten_event(true).with_current_span(false).finish())
    }
}
