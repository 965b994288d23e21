//! Shared helpers for integration tests: a scriptable axum tool server and
//! test logging.

#![allow(dead_code)]

use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicU16, AtomicU64, AtomicUsize, Ordering},
        Arc, Once,
    },
    time::Duration,
};

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::{net::TcpListener, task::JoinHandle};
use tracing_subscriber::{
    filter::LevelFilter, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

static INIT: Once = Once::new();

pub fn init_test_logging() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().with_test_writer())
            .with(
                EnvFilter::builder()
                    .with_default_directive(LevelFilter::INFO.into())
                    .from_env_lossy(),
            )
            .try_init();
    });
}

/// Behaviour of one mock tool server. Every field may be changed while the
/// server is running.
pub struct MockState {
    health_status: AtomicU16,
    tools: Mutex<Value>,
    call_status: AtomicU16,
    call_body: Mutex<Value>,
    call_delay_ms: AtomicU64,
    call_bodies: Mutex<Vec<Value>>,
    health_hits: AtomicUsize,
    list_hits: AtomicUsize,
    call_hits: AtomicUsize,
}

pub struct MockServer {
    addr: SocketAddr,
    state: Arc<MockState>,
    handle: JoinHandle<()>,
}

impl MockServer {
    /// Start a healthy server exposing `tools` and answering every call with
    /// `{"content": "pong"}`.
    pub async fn start(tools: Value) -> Self {
        let state = Arc::new(MockState {
            health_status: AtomicU16::new(200),
            tools: Mutex::new(tools),
            call_status: AtomicU16::new(200),
            call_body: Mutex::new(json!({"content": "pong"})),
            call_delay_ms: AtomicU64::new(0),
            call_bodies: Mutex::new(Vec::new()),
            health_hits: AtomicUsize::new(0),
            list_hits: AtomicUsize::new(0),
            call_hits: AtomicUsize::new(0),
        });

        let app = Router::new()
            .route("/health", get(health))
            .route("/list_tools", post(list_tools))
            .route("/call_tool", post(call_tool))
            .with_state(Arc::clone(&state));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            state,
            handle,
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn set_health_status(&self, status: u16) {
        self.state.health_status.store(status, Ordering::SeqCst);
    }

    pub fn set_tools(&self, tools: Value) {
        *self.state.tools.lock() = tools;
    }

    pub fn set_call_response(&self, status: u16, body: Value) {
        self.state.call_status.store(status, Ordering::SeqCst);
        *self.state.call_body.lock() = body;
    }

    pub fn set_call_delay(&self, delay: Duration) {
        self.state
            .call_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn call_bodies(&self) -> Vec<Value> {
        self.state.call_bodies.lock().clone()
    }

    pub fn health_hits(&self) -> usize {
        self.state.health_hits.load(Ordering::SeqCst)
    }

    pub fn list_hits(&self) -> usize {
        self.state.list_hits.load(Ordering::SeqCst)
    }

    pub fn call_hits(&self) -> usize {
        self.state.call_hits.load(Ordering::SeqCst)
    }

    pub fn total_hits(&self) -> usize {
        self.health_hits() + self.list_hits() + self.call_hits()
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn status_code(code: u16) -> StatusCode {
    StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

async fn health(State(state): State<Arc<MockState>>) -> StatusCode {
    state.health_hits.fetch_add(1, Ordering::SeqCst);
    status_code(state.health_status.load(Ordering::SeqCst))
}

async fn list_tools(State(state): State<Arc<MockState>>) -> Json<Value> {
    state.list_hits.fetch_add(1, Ordering::SeqCst);
    let tools = state.tools.lock().clone();
    Json(tools)
}

async fn call_tool(State(state): State<Arc<MockState>>, Json(body): Json<Value>) -> Response {
    state.call_hits.fetch_add(1, Ordering::SeqCst);
    state.call_bodies.lock().push(body);

    let delay = state.call_delay_ms.load(Ordering::SeqCst);
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }

    let status = status_code(state.call_status.load(Ordering::SeqCst));
    let body = state.call_body.lock().clone();
    (status, Json(body)).into_response()
}

/// A local port with nothing listening on it.
pub fn unused_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}
