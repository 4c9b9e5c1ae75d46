//! Minimal keel service: a few JSON endpoints, in-memory stores, graceful
//! shutdown on Ctrl-C or SIGTERM.
//!
//! Run with:
//!   cargo run --example basic
//!   CONFIG_FILE=keel.toml KEEL_LOG__DEVELOPMENT=true cargo run --example basic
//!
//! Try:
//!   curl -i http://localhost:3000/users/42
//!   curl -i -H 'x-request-id: abc123' http://localhost:3000/users/42
//!   curl -i -X POST http://localhost:3000/users -d '{"name":"alice"}'
//!   curl -i http://localhost:3000/panic
//!   curl -i http://localhost:3000/readyz

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use async_trait::async_trait;
use keel::{
    BackingStore, Config, Request, Response, Router, Service, StatusCode, StoreError, Stores,
    telemetry,
};
use tracing::error;

/// Stands in for a real database client.
struct InMemory(&'static str);

#[async_trait]
impl BackingStore for InMemory {
    fn name(&self) -> &str { self.0 }

    async fn ping(&self) -> Result<(), StoreError> { Ok(()) }
}

#[tokio::main]
async fn main() -> ExitCode {
    let path = std::env::var_os("CONFIG_FILE").map(PathBuf::from);
    let config = match Config::load(path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            return e.exit_code();
        }
    };
    if let Err(e) = telemetry::init(&config.log) {
        eprintln!("{e}");
        return e.exit_code();
    }

    let stores = Stores::new()
        .relational(Arc::new(InMemory("postgres")))
        .document(Arc::new(InMemory("mongodb")))
        .cache(Arc::new(InMemory("redis")));

    let routes = Router::new()
        .get("/users/{id}", get_user)
        .post("/users", create_user)
        .delete("/users/{id}", delete_user)
        .get("/panic", explode);

    let service = match Service::new(stores, ":3000", config, routes) {
        Ok(service) => service,
        Err(e) => {
            error!(error = %e, "failed to build service");
            return e.exit_code();
        }
    };

    let stopper = service.clone();
    tokio::spawn(async move {
        keel::shutdown_signal().await;
        stopper.stop().await;
    });

    match service.start().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "service failed");
            e.exit_code()
        }
    }
}

async fn get_user(req: Request) -> Response {
    let id = req.param("id").unwrap_or("unknown");
    let request_id = req.context().request_id().map(|id| id.as_str()).unwrap_or("-");
    Response::json(format!(r#"{{"id":"{id}","name":"alice","request_id":"{request_id}"}}"#))
}

async fn create_user(req: Request) -> Response {
    if req.body().is_empty() {
        return Response::status(StatusCode::BAD_REQUEST);
    }
    Response::builder()
        .status(StatusCode::CREATED)
        .json(r#"{"id":"99","name":"new_user"}"#)
}

async fn delete_user(_req: Request) -> Response {
    Response::status(StatusCode::NO_CONTENT)
}

// The pipeline answers 500 and the service keeps serving.
async fn explode(_req: Request) -> Response {
    panic!("boom");
}
