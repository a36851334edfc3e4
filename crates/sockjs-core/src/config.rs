use std::time::Duration;

/// Per-prefix service configuration.
#[derive(Clone, Debug)]
pub struct ServiceConfig {
    /// URL prefix the service is mounted under, e.g. `/echo`.
    pub prefix: String,
    /// Whether the websocket transport is offered. `/info` reports this.
    pub websocket_enabled: bool,
    /// Sub-protocols offered during the websocket handshake.
    pub websocket_protocols: Vec<String>,
    /// Echo a `JSESSIONID` cookie back on HTTP transports.
    pub cookies_needed: bool,
    /// SockJS client library URL referenced by the iframe page.
    pub sockjs_url: String,
    /// How long a session may sit with no transport attached.
    pub session_timeout: Duration,
    /// Heartbeat cadence for attached HTTP transports.
    pub heartbeat_interval: Duration,
    /// Websocket heartbeat cadence. `None` falls back to
    /// [`heartbeat_interval`](Self::heartbeat_interval).
    pub websocket_heartbeat_interval: Option<Duration>,
    /// Streaming response body limit before a forced reconnect.
    pub max_streaming_bytes: usize,
}

impl ServiceConfig {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            ..Default::default()
        }
    }

    /// The heartbeat cadence a websocket connection should use.
    pub fn websocket_heartbeat(&self) -> Duration {
        self.websocket_heartbeat_interval
            .unwrap_or(self.heartbeat_interval)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            prefix: "/sockjs".to_string(),
            websocket_enabled: true,
            websocket_protocols: Vec::new(),
            cookies_needed: false,
            sockjs_url: "https://cdn.jsdelivr.net/sockjs/1/sockjs.min.js".to_string(),
            session_timeout: Duration::from_millis(5000),
            heartbeat_interval: Duration::from_millis(25000),
            websocket_heartbeat_interval: None,
            max_streaming_bytes: 131_072,
        }
    }
}
