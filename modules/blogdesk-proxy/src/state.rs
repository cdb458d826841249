use std::time::Duration;

use blogdesk_common::Config;

use crate::error::ProxyError;
use crate::guard::Origin;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Backend base, no trailing slash.
    pub backend_url: String,
    /// Route prefix, `""` or `/segment`.
    pub prefix: String,
    pub api_key: Option<String>,
    pub public_url: Option<String>,
    pub listen_addr: String,
}

impl ProxyConfig {
    pub fn new(backend_url: impl Into<String>) -> Self {
        Self {
            backend_url: backend_url.into().trim_end_matches('/').to_string(),
            prefix: "/api".to_string(),
            api_key: None,
            public_url: None,
            listen_addr: "0.0.0.0:3000".to_string(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            backend_url: config.backend_url.clone(),
            prefix: config.proxy_prefix.clone(),
            api_key: config.admin_api_key.clone(),
            public_url: config.public_url.clone(),
            listen_addr: config.listen_addr(),
        }
    }
}

/// Shared by every request.
#[derive(Clone)]
pub struct ProxyState {
    pub config: ProxyConfig,
    pub http: reqwest::Client,
    pub(crate) backend_origin: Origin,
    pub(crate) public_origin: Option<Origin>,
}

impl ProxyState {
    pub fn new(config: ProxyConfig) -> Result<Self, ProxyError> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Self::with_client(config, http)
    }

    /// No request timeout is set: streams stay open as long as the runner
    /// keeps producing.
    pub fn with_client(config: ProxyConfig, http: reqwest::Client) -> Result<Self, ProxyError> {
        let backend_origin = Origin::from_url(&config.backend_url)
            .ok_or_else(|| ProxyError::InvalidBackendUrl(config.backend_url.clone()))?;
        let public_origin = config.public_url.as_deref().and_then(Origin::from_url);

        Ok(Self {
            config,
            http,
            backend_origin,
            public_origin,
        })
    }
}
