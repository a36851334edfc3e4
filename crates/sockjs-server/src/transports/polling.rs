use std::sync::Arc;

use axum::extract::Request;
use axum::http::StatusCode;
use axum::response::Response;
use sockjs_core::Frame;

use super::{callback_param, callback_required, event_frame, framed, spawn_on_open};
use crate::router::CT_JAVASCRIPT;
use crate::server::ServiceState;
use crate::session::Attach;

/// XHR long-poll: one request, one frame.
pub async fn xhr(state: ServiceState, session_id: String, req: Request) -> Response {
    let req_headers = req.headers().clone();
    let frame = poll_frame(&state, &session_id).await;
    framed(
        &state,
        &req_headers,
        CT_JAVASCRIPT,
        StatusCode::OK,
        frame.wire_line(),
    )
}

/// JSONP long-poll: same cycle, script-wrapped.
pub async fn jsonp(state: ServiceState, session_id: String, req: Request) -> Response {
    let Some(callback) = callback_param(req.uri().query()) else {
        return callback_required();
    };
    let req_headers = req.headers().clone();
    let frame = poll_frame(&state, &session_id).await;
    framed(
        &state,
        &req_headers,
        CT_JAVASCRIPT,
        StatusCode::OK,
        frame.wire_jsonp(&callback),
    )
}

/// Resolve one poll cycle to the frame it answers with. Holds the
/// request open (without holding a thread) until a message arrives, the
/// session closes, or a heartbeat interval passes.
async fn poll_frame(state: &ServiceState, session_id: &str) -> Frame {
    let session = state.registry.get_or_create(
        session_id,
        Arc::clone(&state.config),
        Arc::clone(&state.service),
    );
    match session.attach() {
        Attach::Rejected(frame) => frame,
        Attach::Opened(_guard) => {
            spawn_on_open(&session);
            Frame::Open
        }
        Attach::Resumed(_guard) => {
            // _guard detaches on return, including when the client
            // disconnects and this future is dropped mid-wait.
            event_frame(session.poll_wait().await)
        }
    }
}
