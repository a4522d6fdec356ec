//! Access to the external text-generation backend.

mod cache;
mod cleaning;
mod client;
mod types;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::Serialize;
use thiserror::Error;

use crate::types::GenerationParams;

pub use cache::MODEL_CACHE_TTL;
pub use cleaning::{ReasoningFilter, clean_response};
pub use client::UpstreamClient;

/// Incremental generation output, already cleaned.
pub type TokenStream = BoxStream<'static, Result<String, UpstreamError>>;

/// Any failure talking to the backend. Callers substitute a fallback rather
/// than surfacing it.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct UpstreamError {
    message: String,
}

impl UpstreamError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for UpstreamError {
    fn from(err: reqwest::Error) -> Self {
        UpstreamError::new(format!("failed to reach upstream: {err}"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum UpstreamHealth {
    Healthy { models: Vec<String> },
    Unhealthy { error: String },
}

impl UpstreamHealth {
    pub fn is_healthy(&self) -> bool {
        matches!(self, UpstreamHealth::Healthy { .. })
    }
}

#[async_trait]
pub trait UpstreamBackend: Send + Sync {
    /// Never fails; transport problems become [`UpstreamHealth::Unhealthy`].
    async fn health_check(&self) -> UpstreamHealth;

    async fn list_models(&self) -> Result<Vec<String>, UpstreamError>;

    /// Complete text for `params`. With `stream` set the chunked endpoint is
    /// used and its tokens are concatenated.
    async fn generate(
        &self,
        params: &GenerationParams,
        stream: bool,
    ) -> Result<String, UpstreamError>;

    async fn generate_stream(&self, params: &GenerationParams)
    -> Result<TokenStream, UpstreamError>;
}
