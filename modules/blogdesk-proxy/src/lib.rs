//! Streaming proxy between an untrusted caller and the task runner.
//!
//! Injects the server-held credential, forwards one request into one
//! request, and relays event streams chunk by chunk without buffering.

pub mod error;
pub mod forward;
pub mod guard;
pub mod relay;
pub mod state;

pub use error::ProxyError;
pub use forward::{backend_url_for, forward, proxy_router};
pub use guard::{points_at_self, Origin};
pub use relay::{relay_body, RelayGuard};
pub use state::{ProxyConfig, ProxyState};
