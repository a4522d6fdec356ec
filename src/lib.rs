pub mod config;
pub mod error;
pub mod log_sink;
pub mod presets;
pub mod rate_limit;
pub mod resolver;
pub mod server;
pub mod streaming;
pub mod types;
pub mod upstream;
mod usage;

pub use config::AppConfig;
pub use log_sink::{AsyncLogSink, LogRecord};
pub use resolver::ResponseResolver;
pub use server::{AppState, build_router};
pub use types::{GenerationRequest, GenerateResponse, StreamEvent, Usage};
pub use upstream::{UpstreamBackend, UpstreamClient, UpstreamError, UpstreamHealth};
pub use usage::count_tokens;
