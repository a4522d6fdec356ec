use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    error::ServiceError,
    presets::{Preset, PresetName},
    upstream::UpstreamHealth,
};

pub const MAX_TOKENS_LIMIT: u32 = 4000;

#[derive(Debug, Clone, Deserialize)]
pub struct GenerationRequest {
    pub prompt: String,
    #[serde(default)]
    pub stream: bool,
    pub preset: Option<PresetName>,
    pub model: Option<String>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub max_tokens: Option<u32>,
    pub system: Option<String>,
}

impl GenerationRequest {
    pub fn validate(&self) -> Result<(), ServiceError> {
        if self.prompt.is_empty() {
            return Err(ServiceError::Validation("prompt must not be empty".into()));
        }
        if let Some(t) = self.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(ServiceError::Validation(
                    "temperature must be between 0 and 2".into(),
                ));
            }
        }
        if let Some(p) = self.top_p {
            if !(0.0..=1.0).contains(&p) {
                return Err(ServiceError::Validation(
                    "top_p must be between 0 and 1".into(),
                ));
            }
        }
        if let Some(n) = self.max_tokens {
            if !(1..=MAX_TOKENS_LIMIT).contains(&n) {
                return Err(ServiceError::Validation(format!(
                    "max_tokens must be between 1 and {MAX_TOKENS_LIMIT}"
                )));
            }
        }
        Ok(())
    }

    /// Sampling parameters for this request. Explicit values win; a named
    /// preset only fills the fields left unset.
    pub fn generation_params(&self) -> GenerationParams {
        let preset = self.preset.map(PresetName::preset);
        GenerationParams {
            prompt: self.prompt.clone(),
            model: self.model.clone(),
            temperature: self.temperature.or(preset.map(|p| p.temperature)),
            top_p: self.top_p.or(preset.map(|p| p.top_p)),
            max_tokens: self.max_tokens.or(preset.map(|p| p.max_tokens)),
            system: self.system.clone(),
        }
    }
}

/// What gets sent upstream. Unset fields fall back to the client's defaults.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationParams {
    pub prompt: String,
    pub model: Option<String>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub max_tokens: Option<u32>,
    pub system: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    Upstream,
    Fallback,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationResult {
    pub text: String,
    pub provenance: Provenance,
    pub usage: Usage,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerateResponse {
    pub response: String,
    pub usage: Usage,
    pub generated_at: DateTime<Utc>,
    pub provenance: Provenance,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    pub token: String,
    pub index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub uptime_seconds: f64,
    pub total_requests: u64,
    pub version: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm_status: Option<UpstreamHealth>,
}

#[derive(Debug, Serialize)]
pub struct ModelInfo {
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct ModelsResponse {
    pub models: Vec<ModelInfo>,
}

#[derive(Debug, Serialize)]
pub struct PresetsResponse {
    pub presets: Vec<Preset>,
    pub default: PresetName,
}
