use std::env;

use crate::error::BlogdeskError;

/// Header carrying the server-held credential from proxy to task runner.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Streaming proxy
    pub backend_url: String,
    pub proxy_prefix: String,
    pub admin_api_key: Option<String>,
    pub public_url: Option<String>,
    pub proxy_host: String,
    pub proxy_port: u16,

    // Task runner
    pub database_url: Option<String>,
    pub evaluate_delay_secs: u64,
    pub auto_generate_min_score: f64,
}

impl Config {
    /// Load the proxy configuration. `BACKEND_URL` is required.
    pub fn proxy_from_env() -> Result<Self, BlogdeskError> {
        Self::load(|key| env::var(key).ok(), true)
    }

    /// Load the task runner configuration. The backend URL is not needed.
    pub fn runner_from_env() -> Result<Self, BlogdeskError> {
        Self::load(|key| env::var(key).ok(), false)
    }

    /// Build from an arbitrary variable source.
    pub fn load(
        lookup: impl Fn(&str) -> Option<String>,
        require_backend: bool,
    ) -> Result<Self, BlogdeskError> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let backend_url = match var("BACKEND_URL") {
            Some(url) => {
                url::Url::parse(&url).map_err(|e| {
                    BlogdeskError::Config(format!("BACKEND_URL is not a valid URL: {e}"))
                })?;
                url.trim_end_matches('/').to_string()
            }
            None if require_backend => {
                return Err(BlogdeskError::Config(
                    "BACKEND_URL environment variable is required".to_string(),
                ))
            }
            None => String::new(),
        };

        Ok(Self {
            backend_url,
            proxy_prefix: normalize_prefix(&var("PROXY_PREFIX").unwrap_or_else(|| "/api".to_string())),
            admin_api_key: var("ADMIN_API_KEY"),
            public_url: var("PUBLIC_URL"),
            proxy_host: var("PROXY_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            proxy_port: parse_var(&var, "PROXY_PORT", 3000)?,
            database_url: var("DATABASE_URL"),
            evaluate_delay_secs: parse_var(&var, "EVALUATE_DELAY_SECS", 4)?,
            auto_generate_min_score: parse_var(&var, "AUTO_GENERATE_MIN_SCORE", 7.0)?,
        })
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.proxy_host, self.proxy_port)
    }
}

fn parse_var<T: std::str::FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, BlogdeskError> {
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| BlogdeskError::Config(format!("{key} must be a number, got {raw:?}"))),
        None => Ok(default),
    }
}

/// `api/` and `/api` both become `/api`; an empty prefix stays empty.
fn normalize_prefix(raw: &str) -> String {
    let trimmed = raw.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{trimmed}")
    }
}
