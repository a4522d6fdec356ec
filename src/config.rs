use std::{
    env, fs,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::{Path, PathBuf},
    time::Duration,
};

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub listen_addr: SocketAddr,
    pub upstream: UpstreamSettings,
    pub rate_limit: usize,
    pub rate_limit_window: Duration,
    pub log_path: PathBuf,
}

/// Settings for the text-generation backend and the fallback path.
#[derive(Debug, Clone)]
pub struct UpstreamSettings {
    pub enabled: bool,
    pub base_url: String,
    /// `None` selects a random model from the backend's list per request.
    pub model: Option<String>,
    pub temperature: f64,
    pub top_p: f64,
    pub max_tokens: u32,
    pub timeout: Duration,
    pub system_prompt: Option<String>,
    pub resume_content: Option<String>,
    pub include_thinking: bool,
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "http://localhost:11434".to_string(),
            model: None,
            temperature: 0.7,
            top_p: 0.9,
            max_tokens: 1000,
            timeout: Duration::from_secs(30),
            system_prompt: None,
            resume_content: None,
            include_thinking: false,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8000),
            upstream: UpstreamSettings::default(),
            rate_limit: 10,
            rate_limit_window: Duration::from_secs(60),
            log_path: PathBuf::from("logs/log.jsonl"),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        let listen_addr = env::var("SERVER_ADDR")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.listen_addr);

        let upstream = UpstreamSettings::from_env(defaults.upstream);

        let rate_limit = parse_var("API_RATE_LIMIT").unwrap_or(defaults.rate_limit);
        let rate_limit_window = parse_var("API_RATE_LIMIT_WINDOW")
            .map(Duration::from_secs)
            .unwrap_or(defaults.rate_limit_window);
        let log_path = env::var("LOG_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.log_path);

        Ok(Self {
            listen_addr,
            upstream,
            rate_limit,
            rate_limit_window,
            log_path,
        })
    }
}

impl UpstreamSettings {
    fn from_env(defaults: Self) -> Self {
        let enabled = env::var("LLM_PROVIDER")
            .map(|v| v.eq_ignore_ascii_case("ollama"))
            .unwrap_or(defaults.enabled);

        // Empty or "auto" means dynamic selection.
        let model = env::var("LLM_MODEL")
            .ok()
            .filter(|v| !v.is_empty() && v != "auto");

        let timeout = parse_var::<f64>("LLM_TIMEOUT")
            .filter(|secs| secs.is_finite() && *secs > 0.0)
            .map(Duration::from_secs_f64)
            .unwrap_or(defaults.timeout);

        let resume_file = env::var("LLM_RESUME_FILE").unwrap_or_else(|_| "resume.txt".into());
        let resume_content = env::var("LLM_RESUME_CONTENT")
            .ok()
            .filter(|v| !v.is_empty())
            .or_else(|| load_resume_file(Path::new(&resume_file)));

        Self {
            enabled,
            base_url: env::var("LLM_BASE_URL").unwrap_or(defaults.base_url),
            model,
            temperature: parse_var("LLM_TEMPERATURE").unwrap_or(defaults.temperature),
            top_p: parse_var("LLM_TOP_P").unwrap_or(defaults.top_p),
            max_tokens: parse_var("LLM_MAX_TOKENS").unwrap_or(defaults.max_tokens),
            timeout,
            system_prompt: env::var("LLM_SYSTEM_PROMPT").ok().filter(|v| !v.is_empty()),
            resume_content,
            include_thinking: env::var("LLM_INCLUDE_THINKING")
                .map(|v| v.eq_ignore_ascii_case("true"))
                .unwrap_or(defaults.include_thinking),
        }
    }
}

fn parse_var<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}

fn load_resume_file(path: &Path) -> Option<String> {
    if !path.exists() {
        return None;
    }
    match fs::read_to_string(path) {
        Ok(raw) => {
            let trimmed = raw.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "could not load resume file");
            None
        }
    }
}
