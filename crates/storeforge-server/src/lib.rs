//! HTTP API for storeforge.
//!
//! Routes, all JSON:
//! - `POST   /api/stores`            start provisioning a store (`{"type": "woocommerce"}`)
//! - `GET    /api/stores`            list stores, newest first
//! - `GET    /api/stores/{id}`       one store
//! - `GET    /api/stores/{id}/status` status projection for polling
//! - `DELETE /api/stores/{id}`       tear a store down
//! - `GET    /api/health`            record store, cluster and installer health
//!
//! Requests are served by a small pool of blocking `tiny_http` workers; the
//! orchestrator's async operations are driven through a Tokio runtime handle.
//! The [`TestServer`] helper starts a server backed by mock capabilities on a
//! random port for integration testing.

use serde::Deserialize;
use serde_json::{json, Value};
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;
use storeforge_core::{CoreError, Orchestrator, OrchestratorConfig};
use storeforge_runtime::{
    ClusterBackend, MockCluster, MockInstaller, PackageInstaller, ReadinessScript,
};
use storeforge_store::{MemoryRecordStore, RecordStore, StoreType};
use thiserror::Error;
use tiny_http::{Header, Method, Response, Server, StatusCode};
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

/// Largest request body accepted.
const MAX_BODY_BYTES: u64 = 64 * 1024;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("{0}")]
    Validation(String),
    #[error("Store not found")]
    StoreNotFound,
    #[error("Not found")]
    RouteNotFound,
    #[error("Method not allowed")]
    MethodNotAllowed,
    #[error("failed to bind {addr}: {reason}")]
    Bind { addr: String, reason: String },
    #[error("failed to start runtime: {0}")]
    Runtime(#[from] std::io::Error),
    #[error(transparent)]
    Core(#[from] CoreError),
}

impl ServerError {
    pub fn status_code(&self) -> u16 {
        match self {
            ServerError::Validation(_) => 400,
            ServerError::StoreNotFound | ServerError::RouteNotFound => 404,
            ServerError::MethodNotAllowed => 405,
            ServerError::Core(core) => match core {
                CoreError::UnsupportedType(_) => 400,
                CoreError::StoreNotFound(_) => 404,
                CoreError::CapacityReached { .. } | CoreError::InvalidTransition { .. } => 409,
                CoreError::ConcurrencyLimit { .. } => 429,
                _ => 500,
            },
            ServerError::Bind { .. } | ServerError::Runtime(_) => 500,
        }
    }

    fn body(&self) -> Value {
        match self {
            ServerError::Validation(msg) => json!({
                "error": "Validation Error",
                "message": "Invalid request data",
                "details": [{ "field": "type", "message": msg }],
            }),
            e if e.status_code() == 500 => json!({
                "error": "Internal Server Error",
                "message": e.to_string(),
            }),
            ServerError::Core(core) => json!({ "error": core.to_string() }),
            e => json!({ "error": e.to_string() }),
        }
    }
}

/// A route resolved from method and path.
#[derive(Debug, PartialEq, Eq)]
pub enum Route<'a> {
    Root,
    Health,
    CreateStore,
    ListStores,
    GetStore(&'a str),
    StoreStatus(&'a str),
    DeleteStore(&'a str),
}

/// Resolve a request to a route. Query strings and trailing slashes are ignored.
pub fn parse_route<'a>(method: &Method, url: &'a str) -> Result<Route<'a>, ServerError> {
    let path = url.split('?').next().unwrap_or_default();
    let segments: Vec<&'a str> = path.trim_end_matches('/').split('/').skip(1).collect();

    match (method, segments.as_slice()) {
        (Method::Get, []) => Ok(Route::Root),
        (Method::Get, ["api", "health"]) => Ok(Route::Health),
        (Method::Get, ["api", "stores"]) => Ok(Route::ListStores),
        (Method::Post, ["api", "stores"]) => Ok(Route::CreateStore),
        (Method::Get, ["api", "stores", id]) => Ok(Route::GetStore(*id)),
        (Method::Delete, ["api", "stores", id]) => Ok(Route::DeleteStore(*id)),
        (Method::Get, ["api", "stores", id, "status"]) => Ok(Route::StoreStatus(*id)),
        (
            _,
            [] | ["api", "health"] | ["api", "stores"] | ["api", "stores", _]
            | ["api", "stores", _, "status"],
        ) => Err(ServerError::MethodNotAllowed),
        _ => Err(ServerError::RouteNotFound),
    }
}

#[derive(Debug, Deserialize)]
struct CreateStoreRequest {
    #[serde(rename = "type")]
    store_type: Option<String>,
}

/// Validate a create-store body into a store type.
pub fn parse_create_request(body: &[u8]) -> Result<StoreType, ServerError> {
    let request: CreateStoreRequest = serde_json::from_slice(body)
        .map_err(|e| ServerError::Validation(format!("invalid JSON body: {e}")))?;
    let Some(raw) = request.store_type else {
        return Err(ServerError::Validation("Store type is required".to_owned()));
    };
    raw.parse::<StoreType>()
        .map_err(|_| ServerError::Validation(
            "Store type must be either \"woocommerce\" or \"medusa\"".to_owned(),
        ))
}

/// Shared state of a running server.
pub struct AppState {
    orchestrator: Orchestrator,
    runtime: Handle,
}

impl AppState {
    pub fn new(orchestrator: Orchestrator, runtime: Handle) -> Self {
        Self {
            orchestrator,
            runtime,
        }
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }
}

/// Execute a resolved route, returning the status code and JSON body.
pub fn dispatch(
    state: &AppState,
    route: Route<'_>,
    body: &[u8],
) -> Result<(u16, Value), ServerError> {
    let orchestrator = &state.orchestrator;
    match route {
        Route::Root => Ok((
            200,
            json!({
                "service": "storeforge",
                "version": env!("CARGO_PKG_VERSION"),
                "endpoints": ["/api/health", "/api/stores"],
            }),
        )),
        Route::Health => {
            let report = state.runtime.block_on(orchestrator.health());
            let code = if report.is_healthy() { 200 } else { 503 };
            Ok((code, serde_json::to_value(report).unwrap_or(Value::Null)))
        }
        Route::CreateStore => {
            let store_type = parse_create_request(body)?;
            let record = {
                let _rt = state.runtime.enter();
                orchestrator.create_store(store_type)?
            };
            info!(store_id = %record.id, "store creation request accepted");
            Ok((
                202,
                json!({ "message": "Store provisioning started", "store": record }),
            ))
        }
        Route::ListStores => {
            let stores = orchestrator.list_stores()?;
            Ok((200, json!({ "stores": stores })))
        }
        Route::GetStore(id) => {
            let store = orchestrator
                .get_store(id)?
                .ok_or(ServerError::StoreNotFound)?;
            Ok((200, json!({ "store": store })))
        }
        Route::StoreStatus(id) => {
            let status = orchestrator
                .store_status(id)?
                .ok_or(ServerError::StoreNotFound)?;
            Ok((200, serde_json::to_value(status).unwrap_or(Value::Null)))
        }
        Route::DeleteStore(id) => {
            state.runtime.block_on(orchestrator.delete_store(id))?;
            info!(store_id = id, "store deletion completed");
            Ok((200, json!({ "message": "Store deleted successfully" })))
        }
    }
}

fn read_body(req: &mut tiny_http::Request) -> Option<Vec<u8>> {
    let mut body = Vec::new();
    req.as_reader()
        .take(MAX_BODY_BYTES)
        .read_to_end(&mut body)
        .ok()
        .map(|_| body)
}

fn respond_json(req: tiny_http::Request, code: u16, body: &Value) {
    let mut response =
        Response::from_data(body.to_string().into_bytes()).with_status_code(StatusCode(code));
    if let Ok(header) = Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..]) {
        response = response.with_header(header);
    }
    if let Err(e) = req.respond(response) {
        warn!("failed to send response: {e}");
    }
}

/// Handle a single HTTP request.
pub fn handle_request(state: &AppState, mut req: tiny_http::Request) {
    let method = req.method().clone();
    let url = req.url().to_owned();
    debug!("{method} {url}");

    let body = if method == Method::Post {
        let Some(body) = read_body(&mut req) else {
            respond_json(req, 400, &ServerError::Validation("unreadable body".to_owned()).body());
            return;
        };
        body
    } else {
        Vec::new()
    };

    let result = parse_route(&method, &url).and_then(|route| dispatch(state, route, &body));
    match result {
        Ok((code, value)) => respond_json(req, code, &value),
        Err(e) => {
            let code = e.status_code();
            if code >= 500 {
                error!("{method} {url}: {e}");
            } else {
                warn!("{method} {url}: {code} {e}");
            }
            respond_json(req, code, &e.body());
        }
    }
}

/// Serve requests on `workers` threads until the server is unblocked.
fn serve(
    server: &Arc<Server>,
    state: &Arc<AppState>,
    workers: usize,
) -> Vec<std::thread::JoinHandle<()>> {
    (0..workers.max(1))
        .map(|_| {
            let server = Arc::clone(server);
            let state = Arc::clone(state);
            std::thread::spawn(move || {
                for request in server.incoming_requests() {
                    handle_request(&state, request);
                }
            })
        })
        .collect()
}

/// Bind `addr` and serve until every worker exits.
pub fn run_server(state: &Arc<AppState>, addr: &str, workers: usize) -> Result<(), ServerError> {
    let server = Arc::new(Server::http(addr).map_err(|e| ServerError::Bind {
        addr: addr.to_owned(),
        reason: e.to_string(),
    })?);
    info!("listening on {addr} with {workers} workers");
    for handle in serve(&server, state, workers) {
        if handle.join().is_err() {
            error!("server worker panicked");
        }
    }
    Ok(())
}

/// A server on `127.0.0.1:{random port}` backed by an in-memory record store
/// and mock capabilities, with its own Tokio runtime.
///
/// Dropping the `TestServer` stops it.
pub struct TestServer {
    pub url: String,
    pub port: u16,
    pub cluster: Arc<MockCluster>,
    pub installer: Arc<MockInstaller>,
    state: Arc<AppState>,
    server: Arc<Server>,
    workers: Vec<std::thread::JoinHandle<()>>,
    _runtime: tokio::runtime::Runtime,
}

impl TestServer {
    /// Start with a one-second poll interval and a ten-second readiness timeout.
    pub fn start(readiness: ReadinessScript) -> Result<Self, ServerError> {
        let config = OrchestratorConfig {
            poll_interval: Duration::from_secs(1),
            readiness_timeout: Duration::from_secs(10),
            ..OrchestratorConfig::default()
        };
        Self::start_with(config, readiness)
    }

    pub fn start_with(
        config: OrchestratorConfig,
        readiness: ReadinessScript,
    ) -> Result<Self, ServerError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()?;
        let cluster = Arc::new(MockCluster::with_readiness(readiness));
        let installer = Arc::new(MockInstaller::new());
        let orchestrator = Orchestrator::new(
            config,
            Arc::new(MemoryRecordStore::new()) as Arc<dyn RecordStore>,
            Arc::clone(&cluster) as Arc<dyn ClusterBackend>,
            Arc::clone(&installer) as Arc<dyn PackageInstaller>,
        )?;
        let state = Arc::new(AppState::new(orchestrator, runtime.handle().clone()));

        let server = Arc::new(Server::http("127.0.0.1:0").map_err(|e| ServerError::Bind {
            addr: "127.0.0.1:0".to_owned(),
            reason: e.to_string(),
        })?);
        let port = server
            .server_addr()
            .to_ip()
            .map(|addr| addr.port())
            .ok_or_else(|| ServerError::Bind {
                addr: "127.0.0.1:0".to_owned(),
                reason: "not an IP address".to_owned(),
            })?;
        let workers = serve(&server, &state, 4);

        Ok(Self {
            url: format!("http://127.0.0.1:{port}"),
            port,
            cluster,
            installer,
            state,
            server,
            workers,
            _runtime: runtime,
        })
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        self.state.orchestrator()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        for _ in &self.workers {
            self.server.unblock();
        }
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}
