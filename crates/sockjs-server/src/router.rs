use axum::extract::{Path, Request, State};
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use rand::Rng;
use serde::Serialize;
use sockjs_core::{iframe, ServiceConfig};

use crate::server::ServiceState;
use crate::transport::{PathParams, TransportKind};
use crate::transports;

pub(crate) const CT_PLAIN: &str = "text/plain; charset=UTF-8";
pub(crate) const CT_HTML: &str = "text/html; charset=UTF-8";
pub(crate) const CT_JAVASCRIPT: &str = "application/javascript; charset=UTF-8";
pub(crate) const CT_JSON: &str = "application/json; charset=UTF-8";
pub(crate) const CT_EVENT_STREAM: &str = "text/event-stream; charset=UTF-8";

/// Build the routes for one mounted service prefix.
pub fn service_router(state: ServiceState) -> Router {
    let prefix = state.config.prefix.clone();
    Router::new()
        .route(&prefix, any(greeting))
        .route(&format!("{prefix}/"), any(greeting))
        .route(&format!("{prefix}/info"), any(info))
        .route(&format!("{prefix}/websocket"), any(raw_websocket))
        .route(&format!("{prefix}/{{page}}"), any(page))
        .route(
            &format!("{prefix}/{{server}}/{{session}}/{{transport}}"),
            any(session_transport),
        )
        .with_state(state)
}

/// `404 Not Found` with the protocol's plain-text body.
pub(crate) fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        [(header::CONTENT_TYPE, CT_PLAIN)],
        "Not found",
    )
        .into_response()
}

pub(crate) fn method_not_allowed(allow: &'static str) -> Response {
    let mut resp = StatusCode::METHOD_NOT_ALLOWED.into_response();
    resp.headers_mut()
        .insert(header::ALLOW, HeaderValue::from_static(allow));
    resp
}

/// Echo the request origin (credentialed) or fall back to `*`.
pub(crate) fn apply_cors(req_headers: &HeaderMap, headers: &mut HeaderMap) {
    match req_headers.get(header::ORIGIN) {
        Some(origin) if origin.as_bytes() != b"null" => {
            headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin.clone());
            headers.insert(
                header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
                HeaderValue::from_static("true"),
            );
        }
        _ => {
            headers.insert(
                header::ACCESS_CONTROL_ALLOW_ORIGIN,
                HeaderValue::from_static("*"),
            );
        }
    }
}

/// Echo the client's `JSESSIONID` cookie (or mint a dummy) when the
/// service is configured for sticky cookies.
pub(crate) fn apply_session_cookie(
    config: &ServiceConfig,
    req_headers: &HeaderMap,
    headers: &mut HeaderMap,
) {
    if !config.cookies_needed {
        return;
    }
    let jsid = req_headers
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .and_then(extract_jsessionid)
        .unwrap_or_else(|| "dummy".to_string());
    if let Ok(value) = HeaderValue::from_str(&format!("JSESSIONID={jsid}; path=/")) {
        headers.insert(header::SET_COOKIE, value);
    }
}

fn extract_jsessionid(cookies: &str) -> Option<String> {
    cookies
        .split(';')
        .map(str::trim)
        .find_map(|c| c.strip_prefix("JSESSIONID=").map(str::to_string))
}

pub(crate) fn apply_no_cache(headers: &mut HeaderMap) {
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-store, no-cache, no-transform, must-revalidate, max-age=0"),
    );
}

/// CORS preflight: answered before path classification, cacheable for a
/// year.
pub(crate) fn preflight(
    config: &ServiceConfig,
    req_headers: &HeaderMap,
    methods: &'static str,
) -> Response {
    let mut resp = StatusCode::NO_CONTENT.into_response();
    let headers = resp.headers_mut();
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("public, max-age=31536000"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(methods),
    );
    headers.insert(
        header::ACCESS_CONTROL_MAX_AGE,
        HeaderValue::from_static("31536000"),
    );
    if let Some(requested) = req_headers.get(header::ACCESS_CONTROL_REQUEST_HEADERS) {
        headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, requested.clone());
    }
    apply_cors(req_headers, headers);
    apply_session_cookie(config, req_headers, headers);
    resp
}

async fn greeting(State(state): State<ServiceState>, req: Request) -> Response {
    match *req.method() {
        Method::OPTIONS => preflight(&state.config, req.headers(), "OPTIONS, GET"),
        Method::GET => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, CT_PLAIN)],
            "Welcome to SockJS!\n",
        )
            .into_response(),
        _ => method_not_allowed("GET"),
    }
}

/// Capability document. Field order is part of the wire contract.
#[derive(Serialize)]
struct Info {
    websocket: bool,
    cookie_needed: bool,
    origins: [&'static str; 1],
    entropy: u32,
}

async fn info(State(state): State<ServiceState>, req: Request) -> Response {
    match *req.method() {
        Method::OPTIONS => preflight(&state.config, req.headers(), "OPTIONS, GET"),
        Method::GET => {
            let doc = Info {
                websocket: state.config.websocket_enabled,
                cookie_needed: state.config.cookies_needed,
                origins: ["*:*"],
                entropy: rand::thread_rng().gen_range(1..u32::MAX),
            };
            let body = match serde_json::to_string(&doc) {
                Ok(body) => body,
                Err(err) => {
                    tracing::error!(error = %err, "info document serialization failed");
                    return StatusCode::INTERNAL_SERVER_ERROR.into_response();
                }
            };
            let mut resp =
                (StatusCode::OK, [(header::CONTENT_TYPE, CT_JSON)], body).into_response();
            apply_no_cache(resp.headers_mut());
            apply_cors(req.headers(), resp.headers_mut());
            apply_session_cookie(&state.config, req.headers(), resp.headers_mut());
            resp
        }
        _ => method_not_allowed("GET"),
    }
}

/// `iframe[...].html` bootstrap page with conditional-GET support.
/// Anything else one level under the prefix is a 404.
async fn page(
    State(state): State<ServiceState>,
    Path(page): Path<String>,
    req: Request,
) -> Response {
    if !(page.starts_with("iframe") && page.ends_with(".html")) {
        return not_found();
    }
    match *req.method() {
        Method::OPTIONS => preflight(&state.config, req.headers(), "OPTIONS, GET"),
        Method::GET => {
            let doc = iframe::document(&state.config.sockjs_url);
            let tag = iframe::etag(&doc);
            let matched = req
                .headers()
                .get(header::IF_NONE_MATCH)
                .and_then(|v| v.to_str().ok())
                .is_some_and(|v| v == tag);
            if matched {
                return StatusCode::NOT_MODIFIED.into_response();
            }
            let mut resp = (StatusCode::OK, [(header::CONTENT_TYPE, CT_HTML)], doc).into_response();
            let headers = resp.headers_mut();
            headers.insert(
                header::CACHE_CONTROL,
                HeaderValue::from_static("public, max-age=31536000"),
            );
            if let Ok(value) = HeaderValue::from_str(&tag) {
                headers.insert(header::ETAG, value);
            }
            resp
        }
        _ => method_not_allowed("GET"),
    }
}

async fn raw_websocket(State(state): State<ServiceState>, req: Request) -> Response {
    if *req.method() != Method::GET {
        return method_not_allowed("GET");
    }
    transports::websocket::raw_ws(state, req).await
}

/// `/{server}/{session}/{transport}` dispatch. The serverId segment is
/// validated but has no routing effect.
async fn session_transport(
    State(state): State<ServiceState>,
    Path((server, session, transport)): Path<(String, String, String)>,
    req: Request,
) -> Response {
    let Some(params) = PathParams::parse(&server, &session, &transport) else {
        return not_found();
    };

    let allow: &'static str = match params.transport.method() {
        Method::POST => "POST",
        _ => "GET",
    };
    if *req.method() == Method::OPTIONS {
        let methods = match params.transport.method() {
            Method::POST => "OPTIONS, POST",
            _ => "OPTIONS, GET",
        };
        return preflight(&state.config, req.headers(), methods);
    }
    if *req.method() != params.transport.method() {
        return method_not_allowed(allow);
    }

    let session_id = params.session_id;
    match params.transport {
        TransportKind::XhrPolling => transports::polling::xhr(state, session_id, req).await,
        TransportKind::Jsonp => transports::polling::jsonp(state, session_id, req).await,
        TransportKind::XhrSend => transports::sending::xhr_send(state, session_id, req).await,
        TransportKind::JsonpSend => transports::sending::jsonp_send(state, session_id, req).await,
        TransportKind::XhrStreaming => {
            transports::streaming::xhr_streaming(state, session_id, req).await
        }
        TransportKind::EventSource => {
            transports::streaming::eventsource(state, session_id, req).await
        }
        TransportKind::HtmlFile => transports::streaming::htmlfile(state, session_id, req).await,
        TransportKind::Websocket => transports::websocket::session_ws(state, session_id, req).await,
    }
}
