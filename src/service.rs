//! Service lifecycle: construction, serving, and graceful shutdown.
//!
//! ```text
//! Service::new ──► Constructed ──start()──► Running ──stop()──► Stopping ──► Stopped
//!                       │                                                      ▲
//!                       └──────────────────────stop()─────────────────────────┘
//! ```
//!
//! `Stopped` is terminal. A service that has stopped, or was stopped before
//! it ever started, cannot be started again.
//!
//! # Graceful shutdown
//!
//! [`Service::stop`] reacts by:
//! 1. Immediately stopping `accept()`. No new connections are made.
//! 2. Asking every open connection to finish its in-flight request and close.
//! 3. Waiting up to `http.shutdown_grace_secs` for that to happen, then
//!    aborting whatever is still open.
//!
//! An exhausted grace period is logged, not returned: the process should
//! still exit normally.

use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::context::RequestContext;
use crate::error::Error;
use crate::handler::{BoxedHandler, ErasedHandler};
use crate::health;
use crate::middleware::Pipeline;
use crate::request::Request;
use crate::router::Router;
use crate::store::Stores;

// ── Listener ──────────────────────────────────────────────────────────────────

/// A source of inbound connections.
///
/// Implemented for [`TcpListener`]. Tests and embedders can supply their own
/// (in-memory pipes, pre-bound sockets) through [`Service::serve_with`].
pub trait Listener: Send + 'static {
    type Io: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    fn accept(&mut self) -> impl Future<Output = io::Result<(Self::Io, SocketAddr)>> + Send;
}

impl Listener for TcpListener {
    type Io = TcpStream;

    fn accept(&mut self) -> impl Future<Output = io::Result<(Self::Io, SocketAddr)>> + Send {
        TcpListener::accept(&*self)
    }
}

// ── State ─────────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum State {
    Constructed,
    Running,
    Stopping,
    Stopped,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Constructed => "constructed",
            Self::Running     => "running",
            Self::Stopping    => "stopping",
            Self::Stopped     => "stopped",
        })
    }
}

// ── Service ───────────────────────────────────────────────────────────────────

/// The HTTP service host.
///
/// Cheap to clone; clones share one lifecycle, so one task can run
/// [`start`](Service::start) while another calls [`stop`](Service::stop).
#[derive(Clone)]
pub struct Service {
    shared: Arc<Shared>,
}

struct Shared {
    addr: SocketAddr,
    config: Config,
    stores: Stores,
    handler: BoxedHandler,
    stages: Vec<&'static str>,
    state: Mutex<State>,
    shutdown: CancellationToken,
    stopped: watch::Sender<bool>,
}

impl Service {
    /// Wires the pipeline around `routes`. Binds nothing and performs no I/O.
    ///
    /// `addr` is `host:port` or `:port` (all interfaces). The health probes
    /// are mounted at `/healthz` and `/readyz`.
    ///
    /// # Errors
    ///
    /// A missing store, an unparseable address, an invalid configuration or
    /// a route that failed to register.
    pub fn new(stores: Stores, addr: &str, config: Config, routes: Router) -> Result<Self, Error> {
        stores.validate()?;
        config.validate()?;
        let addr = parse_addr(addr)?;

        let routes = routes
            .get(health::LIVENESS_PATH, health::liveness)
            .get(health::READINESS_PATH, health::readiness(stores.clone()));
        routes.validate()?;

        let pipeline = Pipeline::standard(&config.http);
        let handler = pipeline.compose(routes.into_handler());

        Ok(Self {
            shared: Arc::new(Shared {
                addr,
                config,
                stores,
                handler,
                stages: pipeline.names(),
                state: Mutex::new(State::Constructed),
                shutdown: CancellationToken::new(),
                stopped: watch::channel(false).0,
            }),
        })
    }

    pub fn addr(&self) -> SocketAddr { self.shared.addr }
    pub fn config(&self) -> &Config { &self.shared.config }
    pub fn stores(&self) -> &Stores { &self.shared.stores }
    pub fn state(&self) -> State { *self.shared.state.lock() }

    /// Binds the configured address and serves until [`stop`](Service::stop).
    ///
    /// Returns `Ok(())` after a requested shutdown, or the fault that ended
    /// the service: a failed bind or accept. Map it to a process exit code
    /// with [`Error::exit_code`].
    pub async fn start(&self) -> Result<(), Error> {
        self.begin()?;
        let serving = Serving::new(&self.shared);
        let addr = self.shared.addr;
        let listener = match TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(source) => {
                error!(addr = %addr, error = %source, "bind failed");
                serving.finish();
                return Err(Error::Bind { addr, source });
            }
        };
        self.run(listener, serving).await
    }

    /// Like [`start`](Service::start), over a caller-supplied listener.
    pub async fn serve_with<L: Listener>(&self, listener: L) -> Result<(), Error> {
        self.begin()?;
        let serving = Serving::new(&self.shared);
        self.run(listener, serving).await
    }

    /// Shuts the service down and waits until it is fully stopped.
    ///
    /// - `Running`: stop accepting, drain within the grace period.
    /// - `Stopping`: wait for the drain already underway.
    /// - `Constructed`: become `Stopped` without ever serving.
    /// - `Stopped`: no-op.
    pub async fn stop(&self) {
        let mut stopped = self.shared.stopped.subscribe();
        {
            let mut state = self.shared.state.lock();
            match *state {
                State::Constructed => {
                    *state = State::Stopped;
                    self.shared.stopped.send_replace(true);
                    info!("service stopped before it was started");
                    return;
                }
                State::Running => {
                    *state = State::Stopping;
                    info!(addr = %self.shared.addr, "stopping service");
                    self.shared.shutdown.cancel();
                }
                State::Stopping => {}
                State::Stopped => {
                    debug!("stop called on a stopped service");
                    return;
                }
            }
        }
        // `Shared` owns the sender, so the channel cannot close under us.
        let _ = stopped.wait_for(|done| *done).await;
    }

    fn begin(&self) -> Result<(), Error> {
        let mut state = self.shared.state.lock();
        match *state {
            State::Constructed => {
                *state = State::Running;
                Ok(())
            }
            other => Err(Error::NotStartable(other)),
        }
    }

    async fn run<L: Listener>(&self, mut listener: L, serving: Serving<'_>) -> Result<(), Error> {
        let shared = &self.shared;
        info!(addr = %shared.addr, stages = ?shared.stages, stores = ?shared.stores, "starting service");

        // JoinSet tracks every connection task so shutdown can wait for them,
        // and abort them once the grace period is over.
        let mut tasks = JoinSet::new();

        let outcome = loop {
            tokio::select! {
                // Check shutdown first so a stop takes effect even when more
                // connections are queued.
                biased;

                () = shared.shutdown.cancelled() => {
                    info!(in_flight = tasks.len(), "draining connections");
                    break Ok(());
                }

                res = listener.accept() => match res {
                    Ok((io, peer)) => {
                        tasks.spawn(serve_connection(
                            Arc::clone(&shared.handler),
                            io,
                            peer,
                            shared.shutdown.clone(),
                        ));
                    }
                    Err(e) if is_transient(&e) => {
                        debug!(error = %e, "accept error on a single connection");
                    }
                    Err(e) if is_exhaustion(&e) => {
                        warn!(
                            error = %e,
                            backoff_ms = ACCEPT_BACKOFF.as_millis() as u64,
                            "out of file descriptors, pausing accept"
                        );
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                    Err(e) => {
                        error!(error = %e, "accept failed, stopping service");
                        break Err(Error::Accept(e));
                    }
                },

                // Reap finished connection tasks so the JoinSet does not grow
                // without bound on long-running services.
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        };

        drop(listener);
        {
            let mut state = shared.state.lock();
            if *state == State::Running {
                *state = State::Stopping;
            }
        }
        shared.shutdown.cancel();
        self.drain(&mut tasks).await;
        serving.finish();

        info!("service stopped");
        outcome
    }

    async fn drain(&self, tasks: &mut JoinSet<()>) {
        let grace = self.shared.config.http.shutdown_grace();
        let drained = tokio::time::timeout(grace, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            warn!(
                grace_secs = grace.as_secs(),
                remaining = tasks.len(),
                "shutdown grace period elapsed, closing remaining connections"
            );
            tasks.shutdown().await;
        }
    }
}

/// Moves the service to `Stopped` and wakes every `stop` waiter when the
/// serving future ends, including when it is dropped before finishing.
struct Serving<'a> {
    shared: &'a Shared,
    finished: bool,
}

impl<'a> Serving<'a> {
    fn new(shared: &'a Shared) -> Self {
        Self { shared, finished: false }
    }

    fn finish(mut self) {
        self.finished = true;
    }
}

impl Drop for Serving<'_> {
    fn drop(&mut self) {
        if !self.finished {
            warn!(addr = %self.shared.addr, "serving future dropped, marking service stopped");
        }
        self.shared.shutdown.cancel();
        *self.shared.state.lock() = State::Stopped;
        self.shared.stopped.send_replace(true);
    }
}

/// Pause after the process or system runs out of file descriptors.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Errors that concern one connection, not the listening socket.
fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
    )
}

/// The process (`EMFILE`) or the system (`ENFILE`) is out of file
/// descriptors. Closing connections frees some, so accepting resumes later.
fn is_exhaustion(e: &io::Error) -> bool {
    const ENFILE: i32 = 23;
    const EMFILE: i32 = 24;
    cfg!(unix) && matches!(e.raw_os_error(), Some(ENFILE | EMFILE))
}

/// Accepts `host:port`, and `:port` as shorthand for `0.0.0.0:port`.
fn parse_addr(addr: &str) -> Result<SocketAddr, Error> {
    let full = match addr.strip_prefix(':') {
        Some(port) => format!("0.0.0.0:{port}"),
        None => addr.to_owned(),
    };
    full.parse().map_err(|e: std::net::AddrParseError| Error::InvalidAddress {
        addr: addr.to_owned(),
        reason: e.to_string(),
    })
}

// ── Connections ───────────────────────────────────────────────────────────────

async fn serve_connection<I>(
    handler: BoxedHandler,
    io: I,
    peer: SocketAddr,
    shutdown: CancellationToken,
) where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    // `service_fn` is called once per request on the connection.
    let svc = service_fn(move |req| {
        let handler = Arc::clone(&handler);
        async move { Ok::<_, Infallible>(dispatch(handler, req, peer).await) }
    });

    // `auto::Builder` serves HTTP/1.1 and HTTP/2, whichever the client speaks.
    let builder = ConnBuilder::new(TokioExecutor::new());
    let conn = builder.serve_connection(TokioIo::new(io), svc);
    tokio::pin!(conn);

    let finished = tokio::select! {
        res = conn.as_mut() => Some(res),
        () = shutdown.cancelled() => None,
    };
    let res = match finished {
        Some(res) => res,
        None => {
            conn.as_mut().graceful_shutdown();
            conn.await
        }
    };

    if let Err(e) = res {
        debug!(peer = %peer, error = %e, "connection error");
    }
}

/// Buffers one request body and runs the request through the pipeline.
///
/// Arrival is stamped before the body is read, so slow uploads count
/// towards the reported response time. A body that cannot be read (bad
/// framing, a client gone mid-upload) still goes through every stage and
/// is answered `400` by the router.
async fn dispatch(
    handler: BoxedHandler,
    req: hyper::Request<Incoming>,
    peer: SocketAddr,
) -> http::Response<Full<Bytes>> {
    let context = RequestContext::new(Some(peer)).with_arrival(Instant::now(), SystemTime::now());
    let (head, body) = req.into_parts();
    let req = match body.collect().await {
        Ok(collected) => Request::from_parts(head, collected.to_bytes(), Some(peer)),
        Err(e) => {
            debug!(peer = %peer, error = %e, "failed to read request body");
            Request::from_parts(head, Bytes::new(), Some(peer)).with_unreadable_body()
        }
    };

    handler.call(req.with_context(context)).await.into_http()
}

// ── Shutdown signal ───────────────────────────────────────────────────────────

/// Resolves on the first shutdown signal the process receives.
///
/// On Unix this listens for both **SIGTERM** (sent by orchestrators) and
/// **SIGINT** (Ctrl-C). On other platforms only Ctrl-C is available. A
/// signal that cannot be installed is logged and never fires.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c  => {}
        () = sigterm => {}
    }
}
