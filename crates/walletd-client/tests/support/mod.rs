//! In-process fake wallet daemon for integration tests.
//!
//! Runs on its own thread and runtime so tests can drive the client from
//! plain threads, current-thread runtimes or multi-thread runtimes alike.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::sync::oneshot;
use walletd_core::config::{Config, ReconnectPolicy};

pub const XPUB: &str = "xpub-test";

/// A JSON-RPC request as the daemon saw it.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub body: Value,
    pub authorization: Option<String>,
}

impl Recorded {
    pub fn method(&self) -> &str {
        self.body["method"].as_str().unwrap_or_default()
    }

    pub fn params(&self) -> &Value {
        &self.body["params"]
    }
}

#[derive(Debug, Clone)]
enum Reply {
    Result(Value),
    Error { code: i64, message: String },
    Raw { status: StatusCode, body: Value },
}

#[derive(Default)]
pub struct DaemonState {
    replies: Mutex<HashMap<String, Reply>>,
    requests: Mutex<Vec<Recorded>>,
    spec_body: Mutex<String>,
    spec_hits: AtomicUsize,
    ws_script: Mutex<Vec<String>>,
    ws_auth: Mutex<Vec<Option<String>>>,
    ws_registrations: Mutex<Vec<String>>,
    ws_connections: AtomicUsize,
}

pub struct FakeDaemon {
    pub addr: SocketAddr,
    state: Arc<DaemonState>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl FakeDaemon {
    pub fn start() -> Self {
        let state = Arc::new(DaemonState::default());
        *state.spec_body.lock().unwrap() = default_spec().to_string();

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel::<()>();

        let app = Router::new()
            .route("/", post(rpc))
            .route("/spec", get(spec))
            .route("/ws", get(ws))
            .with_state(state.clone());

        std::thread::spawn(move || {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            rt.block_on(async move {
                let listener = tokio::net::TcpListener::from_std(listener).unwrap();
                let _ = axum::serve(listener, app)
                    .with_graceful_shutdown(async move {
                        let _ = rx.await;
                    })
                    .await;
            });
        });

        Self {
            addr,
            state,
            shutdown: Some(tx),
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Client config pointed at this daemon.
    pub fn config(&self) -> Config {
        Config {
            url: self.url(),
            xpub: Some(XPUB.to_string()),
            reconnect: ReconnectPolicy::fixed(std::time::Duration::from_millis(10)),
            poll_interval_ms: 10,
            ..Config::default()
        }
    }

    pub fn reply(&self, method: &str, result: Value) -> &Self {
        self.state
            .replies
            .lock()
            .unwrap()
            .insert(method.to_string(), Reply::Result(result));
        self
    }

    pub fn fail(&self, method: &str, code: i64, message: &str) -> &Self {
        self.state.replies.lock().unwrap().insert(
            method.to_string(),
            Reply::Error {
                code,
                message: message.to_string(),
            },
        );
        self
    }

    /// Answer `method` with an arbitrary status and JSON body.
    pub fn respond(&self, method: &str, status: u16, body: Value) -> &Self {
        let status = StatusCode::from_u16(status).unwrap();
        self.state
            .replies
            .lock()
            .unwrap()
            .insert(method.to_string(), Reply::Raw { status, body });
        self
    }

    pub fn serve_spec(&self, body: &str) -> &Self {
        *self.state.spec_body.lock().unwrap() = body.to_string();
        self
    }

    /// Messages sent on every websocket connection before closing it.
    pub fn script_ws(&self, messages: &[&str]) -> &Self {
        *self.state.ws_script.lock().unwrap() = messages.iter().map(|m| m.to_string()).collect();
        self
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.state.requests.lock().unwrap().clone()
    }

    pub fn spec_hits(&self) -> usize {
        self.state.spec_hits.load(Ordering::SeqCst)
    }

    pub fn ws_connections(&self) -> usize {
        self.state.ws_connections.load(Ordering::SeqCst)
    }

    pub fn ws_auth(&self) -> Vec<Option<String>> {
        self.state.ws_auth.lock().unwrap().clone()
    }

    pub fn ws_registrations(&self) -> Vec<String> {
        self.state.ws_registrations.lock().unwrap().clone()
    }
}

impl Drop for FakeDaemon {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

pub fn default_spec() -> Value {
    json!({
        "version": "1.0",
        "exceptions": {
            "-32600": {"exc_name": "UnauthorizedError", "docstring": "Unauthorized"},
            "-32001": {"exc_name": "InvalidAddressError", "docstring": "Invalid address"}
        }
    })
}

/// Port nothing is listening on.
pub fn closed_port_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    format!("http://127.0.0.1:{port}")
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn auth_header(headers: &HeaderMap) -> Option<String> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

async fn rpc(
    State(state): State<Arc<DaemonState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let method = body["method"].as_str().unwrap_or_default().to_string();
    state.requests.lock().unwrap().push(Recorded {
        body,
        authorization: auth_header(&headers),
    });
    let reply = state.replies.lock().unwrap().get(&method).cloned();
    if let Some(Reply::Raw { status, body }) = reply {
        return (status, Json(body));
    }
    let body = match reply {
        Some(Reply::Result(result)) => json!({"jsonrpc": "2.0", "id": 0, "result": result}),
        Some(Reply::Error { code, message }) => json!({
            "jsonrpc": "2.0",
            "id": 0,
            "error": {"code": code, "message": message}
        }),
        _ => json!({
            "jsonrpc": "2.0",
            "id": 0,
            "error": {"code": -32601, "message": "Method not found"}
        }),
    };
    (StatusCode::OK, Json(body))
}

async fn spec(State(state): State<Arc<DaemonState>>) -> String {
    state.spec_hits.fetch_add(1, Ordering::SeqCst);
    state.spec_body.lock().unwrap().clone()
}

async fn ws(
    State(state): State<Arc<DaemonState>>,
    headers: HeaderMap,
    upgrade: WebSocketUpgrade,
) -> Response {
    state.ws_auth.lock().unwrap().push(auth_header(&headers));
    upgrade.on_upgrade(move |socket| serve_socket(socket, state))
}

async fn serve_socket(mut socket: WebSocket, state: Arc<DaemonState>) {
    state.ws_connections.fetch_add(1, Ordering::SeqCst);
    if let Some(Ok(Message::Text(first))) = socket.recv().await {
        state.ws_registrations.lock().unwrap().push(first);
    }
    let script = state.ws_script.lock().unwrap().clone();
    for message in script {
        if socket.send(Message::Text(message)).await.is_err() {
            return;
        }
    }
    let _ = socket.send(Message::Close(None)).await;
}
