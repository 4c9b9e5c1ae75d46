//! The standard pipeline driven in-process, with access records captured
//! from `tracing`.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::future::join_all;
use parking_lot::Mutex;
use tokio::time::{Instant, sleep};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

use keel::middleware::Pipeline;
use keel::{BoxedHandler, Config, ErasedHandler, Request, Response, Router, StatusCode};

// ── Log capture ───────────────────────────────────────────────────────────────

#[derive(Clone, Debug)]
struct Record {
    level: Level,
    fields: HashMap<String, String>,
}

impl Record {
    fn field(&self, name: &str) -> &str {
        self.fields.get(name).map(String::as_str).unwrap_or_default()
    }
}

#[derive(Clone, Default)]
struct AccessLog(Arc<Mutex<Vec<Record>>>);

impl AccessLog {
    fn records(&self) -> Vec<Record> {
        self.0.lock().clone()
    }

    /// Routes this thread's events here until the guard drops.
    fn install(&self) -> tracing::subscriber::DefaultGuard {
        let subscriber = tracing_subscriber::registry().with(self.clone());
        tracing::subscriber::set_default(subscriber)
    }
}

struct Fields<'a>(&'a mut HashMap<String, String>);

impl Visit for Fields<'_> {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.0.insert(field.name().to_owned(), value.to_owned());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.0.insert(field.name().to_owned(), value.to_string());
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.0.insert(field.name().to_owned(), value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.0.insert(field.name().to_owned(), format!("{value:?}"));
    }
}

impl<S: Subscriber> Layer<S> for AccessLog {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if event.metadata().target() != "keel::access" {
            return;
        }
        let mut fields = HashMap::new();
        event.record(&mut Fields(&mut fields));
        self.0.lock().push(Record { level: *event.metadata().level(), fields });
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn pipeline(config: &Config, routes: Router) -> BoxedHandler {
    Pipeline::standard(&config.http).compose(routes.into_handler())
}

fn peer() -> SocketAddr {
    "10.0.0.1:40000".parse().unwrap()
}

fn get(path: &str, headers: &[(&str, &str)]) -> Request {
    let mut builder = http::Request::get(path);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    Request::new(builder.body(Bytes::new()).unwrap(), Some(peer()))
}

fn body(res: &Response) -> &str {
    std::str::from_utf8(res.body()).unwrap()
}

async fn echo_request_id(req: Request) -> String {
    req.context().request_id().map(|id| id.to_string()).unwrap_or_default()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn supplied_request_id_is_echoed_everywhere() {
    let log = AccessLog::default();
    let _guard = log.install();
    let app = pipeline(&Config::default(), Router::new().get("/id", echo_request_id));

    let res = app.call(get("/id", &[("x-request-id", "abc123")])).await;

    assert_eq!(res.status_code(), StatusCode::OK);
    assert_eq!(res.header("x-request-id"), Some("abc123"));
    assert_eq!(body(&res), "abc123");

    let records = log.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].level, Level::INFO);
    assert_eq!(records[0].field("request_id"), "abc123");
    assert_eq!(records[0].field("method"), "GET");
    assert_eq!(records[0].field("path"), "/id");
    assert_eq!(records[0].field("status"), "200");
}

#[tokio::test]
async fn missing_request_id_is_generated_once() {
    let log = AccessLog::default();
    let _guard = log.install();
    let app = pipeline(&Config::default(), Router::new().get("/id", echo_request_id));

    let res = app.call(get("/id", &[])).await;

    let id = res.header("x-request-id").unwrap().to_owned();
    assert!(uuid::Uuid::parse_str(&id).is_ok(), "{id}");
    assert_eq!(body(&res), id);
    assert_eq!(log.records()[0].field("request_id"), id);

    let again = app.call(get("/id", &[])).await;
    assert_ne!(again.header("x-request-id"), Some(id.as_str()));
}

#[tokio::test]
async fn panic_is_contained_to_one_request() {
    let log = AccessLog::default();
    let _guard = log.install();
    let routes = Router::new()
        .get("/boom", |_req: Request| async move {
            if true {
                panic!("handler exploded");
            }
            "unreachable"
        })
        .get("/fine", |_req: Request| async { "fine" });
    let app = pipeline(&Config::default(), routes);

    let res = app.call(get("/boom", &[("x-request-id", "r-1")])).await;
    assert_eq!(res.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body(&res), "Internal Server Error");
    assert_eq!(res.header("x-request-id"), Some("r-1"));

    let res = app.call(get("/fine", &[])).await;
    assert_eq!(res.status_code(), StatusCode::OK);
    assert_eq!(body(&res), "fine");

    let records = log.records();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].level, Level::ERROR);
    assert_eq!(records[0].field("status"), "500");
    assert_eq!(records[0].field("request_id"), "r-1");
    assert_eq!(records[1].level, Level::INFO);
    assert_eq!(records[1].field("status"), "200");
}

#[tokio::test(start_paused = true)]
async fn slow_handler_times_out_with_a_single_record() {
    let log = AccessLog::default();
    let _guard = log.install();
    let mut config = Config::default();
    config.http.request_timeout_secs = 1;
    let routes = Router::new().get("/slow", |_req: Request| async {
        sleep(Duration::from_secs(5)).await;
        "too late"
    });
    let app = pipeline(&config, routes);

    let started = Instant::now();
    let res = app.call(get("/slow", &[])).await;
    let waited = started.elapsed();

    assert_eq!(res.status_code(), StatusCode::GATEWAY_TIMEOUT);
    assert!(res.header("x-request-id").is_some());
    assert!(waited >= Duration::from_secs(1) && waited < Duration::from_millis(1010), "{waited:?}");

    // Nothing else gets logged once the abandoned handler would have finished.
    sleep(Duration::from_secs(10)).await;
    let records = log.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].level, Level::ERROR);
    assert_eq!(records[0].field("status"), "504");
}

#[tokio::test(start_paused = true)]
async fn elapsed_time_covers_the_handler() {
    let log = AccessLog::default();
    let _guard = log.install();
    let routes = Router::new().get("/nap", |_req: Request| async {
        sleep(Duration::from_millis(50)).await;
        "rested"
    });
    let app = pipeline(&Config::default(), routes);

    let res = app.call(get("/nap", &[])).await;

    let elapsed_ms: f64 = log.records()[0].field("elapsed_ms").parse().unwrap();
    assert!((50.0..51.0).contains(&elapsed_ms), "{elapsed_ms}");
    let header: f64 = res
        .header("x-response-time")
        .and_then(|v| v.strip_suffix("ms"))
        .and_then(|v| v.parse().ok())
        .unwrap();
    assert!((50.0..51.0).contains(&header), "{header}");
}

#[tokio::test(start_paused = true)]
async fn concurrent_requests_keep_their_own_context() {
    let log = AccessLog::default();
    let _guard = log.install();
    let routes = Router::new().get("/work/{n}", |req: Request| async move {
        let n: u64 = req.param("n").unwrap().parse().unwrap();
        sleep(Duration::from_millis(32 - n)).await;
        echo_request_id(req).await
    });
    let app = pipeline(&Config::default(), routes);

    let calls = (0..32).map(|n| {
        let app = Arc::clone(&app);
        async move {
            let id = format!("req-{n}");
            let res = app.call(get(&format!("/work/{n}"), &[("x-request-id", id.as_str())])).await;
            (id, res)
        }
    });
    for (id, res) in join_all(calls).await {
        assert_eq!(res.header("x-request-id"), Some(id.as_str()));
        assert_eq!(body(&res), id);
    }

    let logged: HashSet<String> =
        log.records().iter().map(|r| r.field("request_id").to_owned()).collect();
    let expected: HashSet<String> = (0..32).map(|n| format!("req-{n}")).collect();
    assert_eq!(logged, expected);
}

#[tokio::test]
async fn client_address_honors_proxy_headers() {
    let log = AccessLog::default();
    let _guard = log.install();
    let routes = Router::new().get("/ip", |req: Request| async move {
        req.context().client_addr().map(|ip| ip.to_string()).unwrap_or_default()
    });

    let trusting = pipeline(&Config::default(), routes);
    let res = trusting.call(get("/ip", &[("x-forwarded-for", "203.0.113.7, 10.0.0.1")])).await;
    assert_eq!(body(&res), "203.0.113.7");

    let res = trusting.call(get("/ip", &[])).await;
    assert_eq!(body(&res), "10.0.0.1");

    let records = log.records();
    assert_eq!(records[0].field("client_addr"), "203.0.113.7");
    assert_eq!(records[1].field("client_addr"), "10.0.0.1");
}

#[tokio::test]
async fn proxy_headers_ignored_when_untrusted() {
    let mut config = Config::default();
    config.http.trust_proxy_headers = false;
    let routes = Router::new().get("/ip", |req: Request| async move {
        req.context().client_addr().map(|ip| ip.to_string()).unwrap_or_default()
    });
    let app = pipeline(&config, routes);

    let res = app.call(get("/ip", &[("x-real-ip", "203.0.113.7")])).await;
    assert_eq!(body(&res), "10.0.0.1");
}

#[tokio::test]
async fn unmatched_routes_still_pass_through_every_stage() {
    let log = AccessLog::default();
    let _guard = log.install();
    let app = pipeline(&Config::default(), Router::new().get("/known", |_req: Request| async { "hi" }));

    let res = app.call(get("/unknown", &[])).await;
    assert_eq!(res.status_code(), StatusCode::NOT_FOUND);
    assert!(res.header("x-request-id").is_some());
    assert!(res.header("x-response-time").is_some());

    let post = Request::new(http::Request::post("/known").body(Bytes::new()).unwrap(), Some(peer()));
    let res = app.call(post).await;
    assert_eq!(res.status_code(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(res.header("allow"), Some("GET"));

    let statuses: Vec<String> = log.records().iter().map(|r| r.field("status").to_owned()).collect();
    assert_eq!(statuses, ["404", "405"]);
}
