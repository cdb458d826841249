//! Self-reference detection.
//!
//! A proxy whose backend URL resolves to itself would forward into itself
//! forever. Origins are compared before any network call is made.

use url::Url;

const LOOPBACK_ALIASES: [&str; 4] = ["localhost", "127.0.0.1", "::1", "0.0.0.0"];

/// Host and port, with every loopback alias folded to `localhost`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    pub host: String,
    pub port: u16,
}

impl Origin {
    pub fn new(host: &str, port: u16) -> Self {
        let host = host
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_ascii_lowercase();
        let host = if LOOPBACK_ALIASES.contains(&host.as_str()) {
            "localhost".to_string()
        } else {
            host
        };
        Self { host, port }
    }

    pub fn from_url(raw: &str) -> Option<Self> {
        let url = Url::parse(raw).ok()?;
        let host = url.host_str()?;
        Some(Self::new(host, url.port_or_known_default()?))
    }

    /// Parse a `Host` header, using `default_port` when it carries none.
    pub fn from_host_header(value: &str, default_port: u16) -> Option<Self> {
        let value = value.trim();
        if value.is_empty() {
            return None;
        }
        let (host, port) = match value.rsplit_once(':') {
            // A bare IPv6 literal has colons but no brackets.
            Some((host, port)) if !host.contains(':') || host.ends_with(']') => {
                (host, port.parse().ok()?)
            }
            _ => (value, default_port),
        };
        Some(Self::new(host, port))
    }
}

/// True when `backend` is the proxy's own public origin or the origin the
/// caller addressed it by.
///
/// A `Host` header without a port takes the public origin's port, or 80.
pub fn points_at_self(backend: &Origin, public: Option<&Origin>, host_header: Option<&str>) -> bool {
    if public == Some(backend) {
        return true;
    }
    let default_port = public.map_or(80, |p| p.port);
    host_header
        .and_then(|h| Origin::from_host_header(h, default_port))
        .is_some_and(|inbound| &inbound == backend)
}
