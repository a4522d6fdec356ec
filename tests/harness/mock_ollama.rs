//! Mock Ollama backend for integration tests
//!
//! Serves `/api/tags` and `/api/generate` with canned output. Streaming
//! replies are NDJSON and include a reasoning span split across lines plus
//! one malformed line, the way real models sometimes emit them.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_stream::stream;

use axum::body::Body;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router, routing};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

pub const MODELS: [&str; 2] = ["mock-small", "mock-large"];

/// Lines sent for a streaming generation, newline-terminated on the wire
pub const STREAM_LINES: [&str; 6] = [
    r#"{"response":"<thi","done":false}"#,
    r#"{"response":"nk>planning</think>","done":false}"#,
    "this line is not json",
    r#"{"response":"Mock","done":false}"#,
    r#"{"response":" reply","done":false}"#,
    r#"{"response":"","done":true}"#,
];

/// Tokens in a slow streaming reply, one line each
pub const SLOW_TOKENS: u32 = 40;
pub const SLOW_LINE_DELAY: Duration = Duration::from_millis(25);

pub const BLOCKING_REPLY: &str = "<think>planning</think>\n\n\nMock reply";

pub struct MockOllama {
    addr: SocketAddr,
    shutdown: CancellationToken,
    state: Arc<MockState>,
}

struct MockState {
    failing: AtomicBool,
    slow: bool,
    lines_sent: AtomicU32,
    abandoned_streams: AtomicU32,
    generate_count: AtomicU32,
    tags_count: AtomicU32,
    last_body: Mutex<Option<serde_json::Value>>,
}

impl MockOllama {
    pub async fn start() -> anyhow::Result<Self> {
        Self::start_inner(false, false).await
    }

    /// Every request answers 500
    pub async fn start_failing() -> anyhow::Result<Self> {
        Self::start_inner(true, false).await
    }

    /// Streaming replies send [`SLOW_TOKENS`] lines, one per
    /// [`SLOW_LINE_DELAY`]
    pub async fn start_slow() -> anyhow::Result<Self> {
        Self::start_inner(false, true).await
    }

    async fn start_inner(failing: bool, slow: bool) -> anyhow::Result<Self> {
        let state = Arc::new(MockState {
            failing: AtomicBool::new(failing),
            slow,
            lines_sent: AtomicU32::new(0),
            abandoned_streams: AtomicU32::new(0),
            generate_count: AtomicU32::new(0),
            tags_count: AtomicU32::new(0),
            last_body: Mutex::new(None),
        });

        let app = Router::new()
            .route("/api/tags", routing::get(handle_tags))
            .route("/api/generate", routing::post(handle_generate))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let shutdown = CancellationToken::new();
        let shutdown_clone = shutdown.clone();

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    shutdown_clone.cancelled().await;
                })
                .await
                .ok();
        });

        Ok(Self {
            addr,
            shutdown,
            state,
        })
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn set_failing(&self, failing: bool) {
        self.state.failing.store(failing, Ordering::Relaxed);
    }

    pub fn generate_count(&self) -> u32 {
        self.state.generate_count.load(Ordering::Relaxed)
    }

    pub fn tags_count(&self) -> u32 {
        self.state.tags_count.load(Ordering::Relaxed)
    }

    /// Streamed lines handed to the transport so far, across all requests
    pub fn lines_sent(&self) -> u32 {
        self.state.lines_sent.load(Ordering::Relaxed)
    }

    /// Streaming bodies dropped before their final line was sent
    pub fn abandoned_streams(&self) -> u32 {
        self.state.abandoned_streams.load(Ordering::Relaxed)
    }

    /// Body of the most recent generate request
    pub fn last_body(&self) -> Option<serde_json::Value> {
        self.state.last_body.lock().clone()
    }
}

impl Drop for MockOllama {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn handle_tags(State(state): State<Arc<MockState>>) -> Response {
    state.tags_count.fetch_add(1, Ordering::Relaxed);
    if state.failing.load(Ordering::Relaxed) {
        return (StatusCode::INTERNAL_SERVER_ERROR, "backend down").into_response();
    }
    let models: Vec<_> = MODELS
        .iter()
        .map(|name| serde_json::json!({ "name": name }))
        .collect();
    Json(serde_json::json!({ "models": models })).into_response()
}

async fn handle_generate(
    State(state): State<Arc<MockState>>,
    Json(body): Json<serde_json::Value>,
) -> Response {
    state.generate_count.fetch_add(1, Ordering::Relaxed);
    let stream = body["stream"].as_bool().unwrap_or(false);
    *state.last_body.lock() = Some(body);

    if state.failing.load(Ordering::Relaxed) {
        return (StatusCode::INTERNAL_SERVER_ERROR, "backend down").into_response();
    }

    if stream && state.slow {
        return (
            [(header::CONTENT_TYPE, "application/x-ndjson")],
            Body::from_stream(slow_lines(state)),
        )
            .into_response();
    }

    if stream {
        let mut ndjson = STREAM_LINES.join("\n");
        ndjson.push('\n');
        return (
            [(header::CONTENT_TYPE, "application/x-ndjson")],
            Body::from(ndjson),
        )
            .into_response();
    }

    Json(serde_json::json!({ "response": BLOCKING_REPLY, "done": true })).into_response()
}

/// Counts a stream as abandoned if it is dropped before completing.
struct CompletionGuard {
    state: Arc<MockState>,
    completed: bool,
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        if !self.completed {
            self.state.abandoned_streams.fetch_add(1, Ordering::Relaxed);
        }
    }
}

fn slow_lines(
    state: Arc<MockState>,
) -> impl futures_util::Stream<Item = Result<String, std::io::Error>> + Send + 'static {
    stream! {
        let mut guard = CompletionGuard { state, completed: false };
        for i in 0..SLOW_TOKENS {
            tokio::time::sleep(SLOW_LINE_DELAY).await;
            guard.state.lines_sent.fetch_add(1, Ordering::Relaxed);
            yield Ok(format!("{{\"response\":\"tok{i} \",\"done\":false}}\n"));
        }
        guard.completed = true;
        yield Ok("{\"response\":\"\",\"done\":true}\n".to_string());
    }
}
