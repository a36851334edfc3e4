use axum::http::Method;

/// The closed set of session transports, selected once per request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportKind {
    Websocket,
    XhrPolling,
    XhrSend,
    XhrStreaming,
    Jsonp,
    JsonpSend,
    EventSource,
    HtmlFile,
}

impl TransportKind {
    /// Map the last path segment of `/{server}/{session}/{transport}`.
    pub fn parse(segment: &str) -> Option<Self> {
        match segment {
            "websocket" => Some(Self::Websocket),
            "xhr" => Some(Self::XhrPolling),
            "xhr_send" => Some(Self::XhrSend),
            "xhr_streaming" => Some(Self::XhrStreaming),
            "jsonp" => Some(Self::Jsonp),
            "jsonp_send" => Some(Self::JsonpSend),
            "eventsource" => Some(Self::EventSource),
            "htmlfile" => Some(Self::HtmlFile),
            _ => None,
        }
    }

    /// The one HTTP method the transport accepts.
    pub fn method(&self) -> Method {
        match self {
            Self::XhrPolling | Self::XhrSend | Self::XhrStreaming | Self::JsonpSend => Method::POST,
            Self::Websocket | Self::Jsonp | Self::EventSource | Self::HtmlFile => Method::GET,
        }
    }
}

/// Parse result of a session-transport request path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PathParams {
    /// Load-balancer stickiness segment. Accepted, never routed on.
    pub server_id: String,
    pub session_id: String,
    pub transport: TransportKind,
}

impl PathParams {
    pub fn parse(server_id: &str, session_id: &str, transport: &str) -> Option<Self> {
        if !valid_segment(server_id) || !valid_segment(session_id) {
            return None;
        }
        Some(Self {
            server_id: server_id.to_string(),
            session_id: session_id.to_string(),
            transport: TransportKind::parse(transport)?,
        })
    }
}

fn valid_segment(s: &str) -> bool {
    !s.is_empty() && !s.contains('.')
}
