use std::{net::SocketAddr, sync::Arc};

use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use minivault_service::{
    AppConfig, AppState, AsyncLogSink, UpstreamBackend, UpstreamClient, UpstreamHealth,
    build_router,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = Arc::new(AppConfig::from_env()?);
    tracing::info!(addr = %config.listen_addr, version = env!("CARGO_PKG_VERSION"), "starting gateway");

    let log_sink = Arc::new(AsyncLogSink::start(&config.log_path).await?);
    let upstream = connect_upstream(&config).await?;

    if config.upstream.resume_content.is_some() {
        tracing::info!("resume content loaded for personal questions");
    } else {
        tracing::info!("no resume content available (set LLM_RESUME_CONTENT or LLM_RESUME_FILE)");
    }

    let state = AppState::new(config.clone(), upstream, log_sink.clone());
    state.limiter.clone().spawn_idle_sweeper();
    let router = build_router(state);

    let listener = TcpListener::bind(config.listen_addr).await?;
    let addr = listener.local_addr()?;
    tracing::info!(%addr, "REST server ready");

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("shutting down, draining interaction log");
    log_sink.stop().await;

    Ok(())
}

async fn connect_upstream(config: &AppConfig) -> anyhow::Result<Option<Arc<dyn UpstreamBackend>>> {
    if !config.upstream.enabled {
        tracing::info!("upstream disabled, serving fallback responses");
        return Ok(None);
    }

    let client = UpstreamClient::new(config.upstream.clone())?;
    match client.health_check().await {
        UpstreamHealth::Healthy { models } => {
            tracing::info!(count = models.len(), "upstream ready");
            match &config.upstream.model {
                Some(model) => tracing::info!(%model, "using default model"),
                None => tracing::info!("using dynamic model selection"),
            }
        }
        UpstreamHealth::Unhealthy { error } => {
            tracing::warn!(%error, "upstream not available, continuing with fallback responses");
        }
    }

    Ok(Some(Arc::new(client)))
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}

fn init_tracing() {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,hyper=warn,axum::rejection=trace".into());
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .compact();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}
