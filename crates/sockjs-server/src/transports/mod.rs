pub mod polling;
pub mod sending;
pub mod streaming;
pub mod websocket;

use std::sync::Arc;

use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use sockjs_core::Frame;

use crate::router::{apply_cors, apply_no_cache, apply_session_cookie};
use crate::server::ServiceState;
use crate::session::{Session, SessionEvent};

/// One-shot framed response with the transport header set (no-cache,
/// CORS, sticky cookie).
pub(crate) fn framed(
    state: &ServiceState,
    req_headers: &HeaderMap,
    content_type: &'static str,
    status: StatusCode,
    body: String,
) -> Response {
    let mut resp = (status, [(header::CONTENT_TYPE, content_type)], body).into_response();
    let headers = resp.headers_mut();
    apply_no_cache(headers);
    apply_cors(req_headers, headers);
    apply_session_cookie(&state.config, req_headers, headers);
    resp
}

pub(crate) fn event_frame(event: SessionEvent) -> Frame {
    match event {
        SessionEvent::Messages(msgs) => Frame::Message(msgs),
        SessionEvent::Closed(frame) => frame,
        SessionEvent::Heartbeat => Frame::Heartbeat,
    }
}

pub(crate) fn spawn_on_open(session: &Arc<Session>) {
    let service = session.service();
    let handle = session.handle();
    tokio::spawn(async move {
        service.on_open(handle).await;
    });
}

/// Forward decoded messages to the service in order. Runs on the send
/// request's own task, so the acknowledgement is only written after the
/// service has seen every message.
pub(crate) async fn deliver(session: &Arc<Session>, messages: Vec<String>) {
    if messages.is_empty() {
        return;
    }
    let service = session.service();
    let handle = session.handle();
    for message in messages {
        service.on_message(handle.clone(), message).await;
    }
}

/// Extract the `c` / `callback` query parameter for JSONP and HTMLFile.
/// Restricted to a safe character set to keep script injection out.
pub(crate) fn callback_param(query: Option<&str>) -> Option<String> {
    let query = query?;
    for pair in query.split('&') {
        let mut parts = pair.splitn(2, '=');
        let key = parts.next()?;
        if key == "c" || key == "callback" {
            let value = parts.next().unwrap_or("");
            if !value.is_empty()
                && value
                    .bytes()
                    .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'.')
            {
                return Some(value.to_string());
            }
            return None;
        }
    }
    None
}

pub(crate) fn callback_required() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        [(header::CONTENT_TYPE, crate::router::CT_PLAIN)],
        "\"callback\" parameter required",
    )
        .into_response()
}
