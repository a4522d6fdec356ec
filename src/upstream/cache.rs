use std::time::Duration;

use tokio::time::Instant;

/// How long a fetched model list is trusted before it is refreshed.
pub const MODEL_CACHE_TTL: Duration = Duration::from_secs(60);

/// Last model list returned by the backend. Only time invalidates it.
#[derive(Debug, Default)]
pub(crate) struct ModelCache {
    models: Vec<String>,
    fetched_at: Option<Instant>,
}

impl ModelCache {
    /// The cached list, if non-empty and younger than `ttl`.
    pub fn fresh(&self, now: Instant, ttl: Duration) -> Option<&[String]> {
        let fetched_at = self.fetched_at?;
        if self.models.is_empty() || now.saturating_duration_since(fetched_at) > ttl {
            return None;
        }
        Some(&self.models)
    }

    /// The cached list regardless of age.
    pub fn stale(&self) -> &[String] {
        &self.models
    }

    pub fn store(&mut self, models: Vec<String>, now: Instant) {
        self.models = models;
        self.fetched_at = Some(now);
    }
}
