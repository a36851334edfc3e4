use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::Request;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use sockjs_core::{iframe, Frame};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use super::{callback_param, callback_required, framed, spawn_on_open};
use crate::router::{
    apply_cors, apply_no_cache, apply_session_cookie, CT_EVENT_STREAM, CT_HTML, CT_JAVASCRIPT,
};
use crate::server::ServiceState;
use crate::session::{Attach, AttachGuard, Session, SessionEvent};

/// Per-transport prelude and frame rendering for streaming responses.
enum Framing {
    Xhr,
    EventSource,
    HtmlFile(String),
}

impl Framing {
    fn content_type(&self) -> &'static str {
        match self {
            Self::Xhr => CT_JAVASCRIPT,
            Self::EventSource => CT_EVENT_STREAM,
            Self::HtmlFile(_) => CT_HTML,
        }
    }

    /// Bytes written before the first frame so browsers commit to
    /// incremental parsing.
    fn prelude(&self) -> String {
        match self {
            Self::Xhr => {
                let mut p = "h".repeat(2048);
                p.push('\n');
                p
            }
            Self::EventSource => "\r\n".to_string(),
            Self::HtmlFile(callback) => iframe::htmlfile_header(callback),
        }
    }

    fn render(&self, frame: &Frame) -> String {
        match self {
            Self::Xhr => frame.wire_line(),
            Self::EventSource => frame.wire_eventsource(),
            Self::HtmlFile(_) => frame.wire_htmlfile(),
        }
    }
}

pub async fn xhr_streaming(state: ServiceState, session_id: String, req: Request) -> Response {
    stream_response(state, session_id, req, Framing::Xhr)
}

pub async fn eventsource(state: ServiceState, session_id: String, req: Request) -> Response {
    stream_response(state, session_id, req, Framing::EventSource)
}

pub async fn htmlfile(state: ServiceState, session_id: String, req: Request) -> Response {
    let Some(callback) = callback_param(req.uri().query()) else {
        return callback_required();
    };
    stream_response(state, session_id, req, Framing::HtmlFile(callback))
}

fn stream_response(
    state: ServiceState,
    session_id: String,
    req: Request,
    framing: Framing,
) -> Response {
    let session = state.registry.get_or_create(
        &session_id,
        Arc::clone(&state.config),
        Arc::clone(&state.service),
    );
    match session.attach() {
        Attach::Rejected(frame) => {
            let mut body = framing.prelude();
            body.push_str(&framing.render(&frame));
            framed(
                &state,
                req.headers(),
                framing.content_type(),
                StatusCode::OK,
                body,
            )
        }
        Attach::Opened(guard) => streaming_body(&state, req.headers(), session, guard, framing, true),
        Attach::Resumed(guard) => {
            streaming_body(&state, req.headers(), session, guard, framing, false)
        }
    }
}

fn streaming_body(
    state: &ServiceState,
    req_headers: &HeaderMap,
    session: Arc<Session>,
    guard: AttachGuard,
    framing: Framing,
    opened: bool,
) -> Response {
    let content_type = framing.content_type();
    let (tx, rx) = mpsc::channel::<Result<Bytes, Infallible>>(32);
    let max_bytes = state.config.max_streaming_bytes;
    tokio::spawn(drive(session, guard, framing, tx, opened, max_bytes));

    let body = Body::from_stream(ReceiverStream::new(rx));
    let mut resp = (StatusCode::OK, [(header::CONTENT_TYPE, content_type)], body).into_response();
    let headers = resp.headers_mut();
    apply_no_cache(headers);
    apply_cors(req_headers, headers);
    apply_session_cookie(&state.config, req_headers, headers);
    resp
}

/// Connection driver: writes the prelude, then frames as they become
/// available, until the session closes, the client disconnects, or the
/// byte limit trips a reconnect.
async fn drive(
    session: Arc<Session>,
    guard: AttachGuard,
    framing: Framing,
    tx: mpsc::Sender<Result<Bytes, Infallible>>,
    opened: bool,
    max_bytes: usize,
) {
    let _guard = guard;
    if tx
        .send(Ok(Bytes::from(framing.prelude())))
        .await
        .is_err()
    {
        return;
    }

    let mut written = 0usize;
    if opened {
        spawn_on_open(&session);
        if !send_frame(&tx, &framing, &Frame::Open, &mut written).await {
            return;
        }
    }

    let mut ticker = tokio::time::interval(session.config().heartbeat_interval);
    ticker.tick().await; // consume the immediate first tick

    loop {
        let notified = session.notified();
        if let Some(event) = session.take_ready() {
            match event {
                SessionEvent::Messages(msgs) => {
                    if !send_frame(&tx, &framing, &Frame::Message(msgs), &mut written).await {
                        return;
                    }
                    if written >= max_bytes {
                        break;
                    }
                    ticker.reset();
                    continue;
                }
                SessionEvent::Closed(frame) => {
                    let _ = send_frame(&tx, &framing, &frame, &mut written).await;
                    break;
                }
                SessionEvent::Heartbeat => {}
            }
        }
        tokio::select! {
            _ = notified => {}
            _ = ticker.tick() => {
                if !send_frame(&tx, &framing, &Frame::Heartbeat, &mut written).await {
                    return;
                }
                if written >= max_bytes {
                    break;
                }
            }
        }
    }
    // Dropping tx ends the body; the final empty chunk forces the client
    // to reconnect.
    tracing::debug!(session_id = %session.id(), written = written, "streaming connection ended");
}

async fn send_frame(
    tx: &mpsc::Sender<Result<Bytes, Infallible>>,
    framing: &Framing,
    frame: &Frame,
    written: &mut usize,
) -> bool {
    let chunk = framing.render(frame);
    *written += chunk.len();
    tx.send(Ok(Bytes::from(chunk))).await.is_ok()
}
