use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadFile(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("validation error: {0}")]
    Validation(String),
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP request failed for {url}: {source}")]
    Transient { url: String, source: reqwest::Error },
    #[error("HTTP {status} for {url}")]
    Status { url: String, status: u16 },
    #[error("rate limited{}", retry_after.map(|s| format!(" (retry after {s}s)")).unwrap_or_default())]
    RateLimited { retry_after: Option<u64> },
    #[error("failed to parse content from {url}: {message}")]
    Parse { url: String, message: String },
}

impl FetchError {
    /// Whether the caller may retry this request (possibly with rotated headers).
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Transient { .. } => true,
            FetchError::Status { status, .. } => matches!(status, 403 | 429 | 500..=599),
            FetchError::RateLimited { .. } => true,
            FetchError::Parse { .. } => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum AiError {
    #[error("AI API error {status}: {body}")]
    Api { status: u16, body: String },
    #[error("AI rate limit exceeded{}", retry_after.map(|s| format!(" (retry after {s}s)")).unwrap_or_default())]
    RateLimited { retry_after: Option<u64> },
    #[error("AI request failed: {0}")]
    Transport(String),
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("database operation timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },
    #[error("database queue is not running")]
    Closed,
    #[error("database operation failed: {0}")]
    Operation(String),
}
