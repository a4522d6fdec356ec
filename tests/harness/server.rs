//! Test server wrapper that starts the gateway on a random port

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use minivault_service::config::UpstreamSettings;
use minivault_service::{
    AppConfig, AppState, AsyncLogSink, LogRecord, UpstreamBackend, UpstreamClient, build_router,
};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

pub struct TestServer {
    addr: SocketAddr,
    shutdown: CancellationToken,
    client: reqwest::Client,
    log_sink: Arc<AsyncLogSink>,
    // Held so the log directory outlives the server
    _log_dir: TempDir,
}

impl TestServer {
    /// Gateway with no backend; every answer is a fallback
    pub async fn offline() -> anyhow::Result<Self> {
        Self::start(test_config(), None).await
    }

    /// Gateway talking to the backend at `base_url`
    pub async fn with_upstream(base_url: &str) -> anyhow::Result<Self> {
        let mut config = test_config();
        config.upstream = upstream_settings(base_url);
        let client = UpstreamClient::new(config.upstream.clone())?;
        Self::start(config, Some(Arc::new(client))).await
    }

    pub async fn start(
        mut config: AppConfig,
        upstream: Option<Arc<dyn UpstreamBackend>>,
    ) -> anyhow::Result<Self> {
        let log_dir = tempfile::tempdir()?;
        config.log_path = log_dir.path().join("logs/log.jsonl");

        let log_sink = Arc::new(AsyncLogSink::start(&config.log_path).await?);
        let state = AppState::new(Arc::new(config), upstream, Arc::clone(&log_sink));
        let router = build_router(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let shutdown = CancellationToken::new();
        let shutdown_clone = shutdown.clone();

        tokio::spawn(async move {
            axum::serve(
                listener,
                router.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                shutdown_clone.cancelled().await;
            })
            .await
            .ok();
        });

        Ok(Self {
            addr,
            shutdown,
            client: reqwest::Client::new(),
            log_sink,
            _log_dir: log_dir,
        })
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub fn log_path(&self) -> PathBuf {
        self.log_sink.path().clone()
    }

    /// Drains the interaction log and returns everything written so far
    pub async fn logged_records(&self) -> Vec<LogRecord> {
        self.log_sink.stop().await;
        let raw = tokio::fs::read_to_string(self.log_path())
            .await
            .unwrap_or_default();
        raw.lines()
            .map(|line| serde_json::from_str(line).expect("valid log line"))
            .collect()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.upstream.enabled = false;
    config
}

pub fn upstream_settings(base_url: &str) -> UpstreamSettings {
    UpstreamSettings {
        base_url: base_url.to_string(),
        timeout: Duration::from_secs(5),
        ..UpstreamSettings::default()
    }
}

/// Payloads of the `data:` lines in an SSE body
pub fn parse_sse_data(text: &str) -> Vec<String> {
    text.lines()
        .filter(|line| line.starts_with("data: "))
        .map(|line| line.trim_start_matches("data: ").to_owned())
        .collect()
}
