use std::time::Duration;

use crate::transport::ReconnectPolicy;

/// Endpoints and timings for one chat session.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// REST base, e.g. `http://localhost:5000`
    pub api_url: String,
    /// Gateway endpoint, e.g. `ws://localhost:5000/gateway`
    pub gateway_url: String,
    pub reconnect: ReconnectPolicy,
    /// Quiet period before a local typing change is announced.
    pub typing_debounce: Duration,
    /// How long an announced local "typing" may last without a new keystroke cycle.
    pub typing_force_clear: Duration,
    /// How long a peer's typing indicator lives without a follow-up.
    pub typing_expiry: Duration,
}

impl ClientConfig {
    pub fn new(api_url: impl Into<String>, gateway_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into().trim_end_matches('/').to_string(),
            gateway_url: gateway_url.into(),
            reconnect: ReconnectPolicy::default(),
            typing_debounce: Duration::from_secs(1),
            typing_force_clear: Duration::from_secs(2),
            typing_expiry: Duration::from_secs(3),
        }
    }

    /// Derive both endpoints from one server address like `http://host:5000`.
    pub fn for_server(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        let ws = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            base.to_string()
        };
        Self::new(base, format!("{ws}/gateway"))
    }
}
