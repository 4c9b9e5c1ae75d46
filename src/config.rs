//! Service configuration.
//!
//! Every field has a default, so an empty file (or no file at all) is a
//! valid configuration. Sources are layered, later ones winning:
//!
//! 1. built-in defaults
//! 2. an optional file (`.toml`, `.yaml`, `.json`, ... by extension)
//! 3. environment variables: `KEEL_` prefix, `__` between sections
//!
//! | Key | Env | Default |
//! |---|---|---|
//! | `log.level` | `KEEL_LOG__LEVEL` | `info` |
//! | `log.development` | `KEEL_LOG__DEVELOPMENT` | `false` |
//! | `http.request_timeout_secs` | `KEEL_HTTP__REQUEST_TIMEOUT_SECS` | `180` |
//! | `http.shutdown_grace_secs` | `KEEL_HTTP__SHUTDOWN_GRACE_SECS` | `15` |
//! | `http.trust_proxy_headers` | `KEEL_HTTP__TRUST_PROXY_HEADERS` | `true` |

use std::path::Path;
use std::time::Duration;

use config::{Environment, File, Map};
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

use crate::error::Error;

const ENV_PREFIX: &str = "KEEL";

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub log: LogConfig,
    pub http: HttpConfig,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct LogConfig {
    /// An `EnvFilter` directive: `info`, `warn,keel=debug`, ...
    pub level: String,
    /// Human-readable output instead of JSON lines.
    pub development: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { level: "info".to_owned(), development: false }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct HttpConfig {
    /// Upper bound on handler execution per request.
    pub request_timeout_secs: u64,
    /// How long `stop` waits for in-flight connections.
    pub shutdown_grace_secs: u64,
    /// Whether `X-Forwarded-For` and friends are believed.
    pub trust_proxy_headers: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 180,
            shutdown_grace_secs: 15,
            trust_proxy_headers: true,
        }
    }
}

impl HttpConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

impl Config {
    /// Loads defaults, then `path` if given, then `KEEL_*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self, Error> {
        Self::load_from(path, None)
    }

    /// `env` replaces the process environment when given.
    fn load_from(path: Option<&Path>, env: Option<Map<String, String>>) -> Result<Self, Error> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }
        let cfg: Config = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .source(env),
            )
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| Error::Config(e.to_string()))?;

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), Error> {
        EnvFilter::try_new(&self.log.level)
            .map_err(|e| Error::Config(format!("log.level `{}`: {e}", self.log.level)))?;
        if self.http.request_timeout_secs == 0 {
            return Err(Error::Config("http.request_timeout_secs must be positive".to_owned()));
        }
        if self.http.shutdown_grace_secs == 0 {
            return Err(Error::Config("http.shutdown_grace_secs must be positive".to_owned()));
        }
        Ok(())
    }
}
