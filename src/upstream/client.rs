use std::time::Duration;

use async_stream::stream;
use async_trait::async_trait;
use futures_util::StreamExt;
use parking_lot::Mutex;
use rand::{SeedableRng, rngs::StdRng, seq::IndexedRandom};
use reqwest::{Client, Response};
use tokio::time::Instant;
use tracing::{debug, warn};

use super::{
    TokenStream, UpstreamBackend, UpstreamError, UpstreamHealth,
    cache::{MODEL_CACHE_TTL, ModelCache},
    cleaning::{ReasoningFilter, clean_response},
    types::{GenerateBody, GenerateOptions, GenerateReply, StreamLine, TagsReply},
};
use crate::{config::UpstreamSettings, types::GenerationParams};

/// HTTP client for an Ollama-compatible backend.
///
/// One pooled `reqwest::Client` is shared by every request. When no default
/// model is configured, each generation draws a model at random from the
/// backend's list, which is cached for [`MODEL_CACHE_TTL`].
pub struct UpstreamClient {
    http: Client,
    settings: UpstreamSettings,
    models: Mutex<ModelCache>,
    rng: Mutex<StdRng>,
}

impl UpstreamClient {
    pub fn new(settings: UpstreamSettings) -> Result<Self, UpstreamError> {
        Self::with_rng(settings, StdRng::from_os_rng())
    }

    /// Uses `rng` for dynamic model selection, so tests can pin the draw.
    pub fn with_rng(settings: UpstreamSettings, rng: StdRng) -> Result<Self, UpstreamError> {
        let http = Client::builder()
            .timeout(settings.timeout)
            .pool_idle_timeout(Some(Duration::from_secs(90)))
            .tcp_nodelay(true)
            .build()?;

        Ok(Self {
            http,
            settings,
            models: Mutex::new(ModelCache::default()),
            rng: Mutex::new(rng),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.settings.base_url.trim_end_matches('/'))
    }

    /// Explicit name, then the configured default, then a random pick from
    /// the (possibly refreshed) model list.
    pub async fn select_model(&self, explicit: Option<&str>) -> Result<String, UpstreamError> {
        if let Some(model) = explicit {
            return Ok(model.to_string());
        }
        if let Some(model) = &self.settings.model {
            return Ok(model.clone());
        }
        if let Some(model) = self.pick_cached(Instant::now()) {
            return Ok(model);
        }

        match self.list_models().await {
            Ok(models) => {
                debug!(count = models.len(), "refreshed upstream model list");
                self.models.lock().store(models, Instant::now());
            }
            Err(err) if self.models.lock().stale().is_empty() => return Err(err),
            Err(err) => warn!(error = %err, "model list refresh failed, using stale list"),
        }

        let cache = self.models.lock();
        cache
            .stale()
            .choose(&mut *self.rng.lock())
            .cloned()
            .ok_or_else(|| UpstreamError::new("no models available from upstream"))
    }

    fn pick_cached(&self, now: Instant) -> Option<String> {
        let cache = self.models.lock();
        let models = cache.fresh(now, MODEL_CACHE_TTL)?;
        models.choose(&mut *self.rng.lock()).cloned()
    }

    fn body<'a>(
        &self,
        model: &'a str,
        params: &'a GenerationParams,
        stream: bool,
    ) -> GenerateBody<'a> {
        GenerateBody {
            model,
            prompt: &params.prompt,
            stream,
            options: GenerateOptions {
                temperature: params.temperature.unwrap_or(self.settings.temperature),
                top_p: params.top_p.unwrap_or(self.settings.top_p),
                num_predict: params.max_tokens.unwrap_or(self.settings.max_tokens),
            },
            system: params.system.as_deref(),
        }
    }

    async fn post_generate(
        &self,
        params: &GenerationParams,
        stream: bool,
    ) -> Result<Response, UpstreamError> {
        let model = self.select_model(params.model.as_deref()).await?;
        debug!(%model, stream, "sending generation request upstream");

        let response = self
            .http
            .post(self.url("api/generate"))
            .json(&self.body(&model, params, stream))
            .send()
            .await?;
        ensure_success(response, "generation failed").await
    }
}

#[async_trait]
impl UpstreamBackend for UpstreamClient {
    async fn health_check(&self) -> UpstreamHealth {
        match self.http.get(self.url("api/tags")).send().await {
            Ok(response) if response.status().is_success() => {
                match response.json::<TagsReply>().await {
                    Ok(tags) => UpstreamHealth::Healthy {
                        models: tags.into_names(),
                    },
                    Err(err) => UpstreamHealth::Unhealthy {
                        error: err.to_string(),
                    },
                }
            }
            Ok(response) => UpstreamHealth::Unhealthy {
                error: format!("HTTP {}", response.status().as_u16()),
            },
            Err(err) => UpstreamHealth::Unhealthy {
                error: err.to_string(),
            },
        }
    }

    async fn list_models(&self) -> Result<Vec<String>, UpstreamError> {
        let response = self.http.get(self.url("api/tags")).send().await?;
        let response = ensure_success(response, "failed to list models").await?;
        let tags: TagsReply = response
            .json()
            .await
            .map_err(|err| UpstreamError::new(format!("invalid model list: {err}")))?;
        Ok(tags.into_names())
    }

    async fn generate(
        &self,
        params: &GenerationParams,
        stream: bool,
    ) -> Result<String, UpstreamError> {
        let raw = if stream {
            let mut tokens = self.generate_stream(params).await?;
            let mut text = String::new();
            while let Some(token) = tokens.next().await {
                text.push_str(&token?);
            }
            text
        } else {
            let response = self.post_generate(params, false).await?;
            let reply: GenerateReply = response
                .json()
                .await
                .map_err(|err| UpstreamError::new(format!("invalid generation reply: {err}")))?;
            reply.response
        };

        Ok(clean_response(&raw, self.settings.include_thinking)
            .trim()
            .to_string())
    }

    async fn generate_stream(
        &self,
        params: &GenerationParams,
    ) -> Result<TokenStream, UpstreamError> {
        let response = self.post_generate(params, true).await?;
        let mut body = response.bytes_stream();
        let mut filter = ReasoningFilter::new(self.settings.include_thinking);

        Ok(Box::pin(stream! {
            let mut lines = LineBuffer::default();
            let mut done = false;

            while !done {
                let chunk = match body.next().await {
                    Some(Ok(chunk)) => chunk,
                    Some(Err(err)) => {
                        yield Err(UpstreamError::from(err));
                        return;
                    }
                    None => break,
                };
                for line in lines.push(&chunk) {
                    let Some(parsed) = parse_line(&line) else {
                        continue;
                    };
                    if let Some(token) = parsed.response.as_deref().and_then(|t| filter.push(t)) {
                        yield Ok(token);
                    }
                    if parsed.done {
                        done = true;
                        break;
                    }
                }
            }

            // The backend may close without a trailing newline.
            if !done {
                if let Some(parsed) = lines.finish().as_deref().and_then(parse_line) {
                    if let Some(token) = parsed.response.as_deref().and_then(|t| filter.push(t)) {
                        yield Ok(token);
                    }
                }
            }
            if let Some(token) = filter.finish() {
                yield Ok(token);
            }
        }))
    }
}

async fn ensure_success(response: Response, context: &str) -> Result<Response, UpstreamError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(UpstreamError::new(format!("{context}: HTTP {status} - {body}")))
}

/// Splits a byte stream into newline-terminated lines.
#[derive(Debug, Default)]
struct LineBuffer {
    partial: Vec<u8>,
}

impl LineBuffer {
    fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.partial.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.partial.iter().position(|b| *b == b'\n') {
            lines.push(self.partial.drain(..=pos).collect());
        }
        lines
    }

    fn finish(&mut self) -> Option<Vec<u8>> {
        let rest = std::mem::take(&mut self.partial);
        (!rest.is_empty()).then_some(rest)
    }
}

fn parse_line(line: &[u8]) -> Option<StreamLine> {
    let line = line.trim_ascii();
    if line.is_empty() {
        return None;
    }
    match serde_json::from_slice(line) {
        Ok(parsed) => Some(parsed),
        Err(err) => {
            warn!(
                error = %err,
                line = %String::from_utf8_lossy(line),
                "skipping malformed stream line"
            );
            None
        }
    }
}
