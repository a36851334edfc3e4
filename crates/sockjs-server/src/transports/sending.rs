use axum::extract::{Form, FromRequest, Request};
use axum::http::{header, StatusCode};
use axum::response::Response;
use serde::Deserialize;
use sockjs_core::{payload, PayloadError};

use super::{deliver, framed};
use crate::router::CT_PLAIN;
use crate::server::ServiceState;

const MAX_SEND_BODY: usize = 4 * 1024 * 1024;

/// XHR send: decode the body, forward messages, `204 No Content`.
pub async fn xhr_send(state: ServiceState, session_id: String, req: Request) -> Response {
    let req_headers = req.headers().clone();
    let Some(session) = state.registry.get(&session_id) else {
        tracing::debug!(session_id = %session_id, "send to unknown session");
        return crate::router::not_found();
    };
    if !session.accepts_messages() {
        return crate::router::not_found();
    }

    let text = match read_text(req).await {
        Ok(text) => text,
        Err(err) => return payload_error(&state, &req_headers, err),
    };
    match payload::decode(&text) {
        Ok(messages) => {
            deliver(&session, messages).await;
            framed(
                &state,
                &req_headers,
                CT_PLAIN,
                StatusCode::NO_CONTENT,
                String::new(),
            )
        }
        Err(err) => payload_error(&state, &req_headers, err),
    }
}

#[derive(Deserialize)]
struct SendForm {
    d: Option<String>,
}

/// JSONP send: accepts either a raw JSON body or a form-encoded `d=`
/// field, answers `200 OK` with body `ok`.
pub async fn jsonp_send(state: ServiceState, session_id: String, req: Request) -> Response {
    let req_headers = req.headers().clone();
    let Some(session) = state.registry.get(&session_id) else {
        tracing::debug!(session_id = %session_id, "send to unknown session");
        return crate::router::not_found();
    };
    if !session.accepts_messages() {
        return crate::router::not_found();
    }

    let is_form = req_headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/x-www-form-urlencoded"));
    let text = if is_form {
        match Form::<SendForm>::from_request(req, &()).await {
            Ok(Form(form)) => form.d.unwrap_or_default(),
            Err(_) => String::new(),
        }
    } else {
        match read_text(req).await {
            Ok(text) => text,
            Err(err) => return payload_error(&state, &req_headers, err),
        }
    };

    match payload::decode(&text) {
        Ok(messages) => {
            deliver(&session, messages).await;
            framed(
                &state,
                &req_headers,
                CT_PLAIN,
                StatusCode::OK,
                "ok".to_string(),
            )
        }
        Err(err) => payload_error(&state, &req_headers, err),
    }
}

async fn read_text(req: Request) -> Result<String, PayloadError> {
    let bytes = axum::body::to_bytes(req.into_body(), MAX_SEND_BODY)
        .await
        .map_err(|_| PayloadError::Expected)?;
    String::from_utf8(bytes.to_vec()).map_err(|_| PayloadError::BrokenJson)
}

fn payload_error(
    state: &ServiceState,
    req_headers: &axum::http::HeaderMap,
    err: PayloadError,
) -> Response {
    framed(
        state,
        req_headers,
        CT_PLAIN,
        StatusCode::INTERNAL_SERVER_ERROR,
        err.to_string(),
    )
}
