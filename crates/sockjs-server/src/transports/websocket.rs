use std::sync::Arc;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{FromRequestParts, Request};
use axum::response::{IntoResponse, Response};
use futures::{SinkExt, StreamExt};
use sockjs_core::frame::close_code;
use sockjs_core::{payload, Frame};

use crate::server::ServiceState;
use crate::session::{Attach, Session, SessionEvent};

/// Session-bound websocket transport. The connection owns its session
/// exclusively, so the session never enters the registry.
pub async fn session_ws(state: ServiceState, session_id: String, req: Request) -> Response {
    if !state.config.websocket_enabled {
        return crate::router::not_found();
    }
    upgrade(state, session_id, req, false).await
}

/// Raw websocket endpoint directly under the prefix: no SockJS framing,
/// inbound and outbound text frames are messages verbatim.
pub async fn raw_ws(state: ServiceState, req: Request) -> Response {
    if !state.config.websocket_enabled {
        return crate::router::not_found();
    }
    upgrade(state, "raw".to_string(), req, true).await
}

async fn upgrade(state: ServiceState, session_id: String, req: Request, raw: bool) -> Response {
    let (mut parts, _body) = req.into_parts();
    let ws = match WebSocketUpgrade::from_request_parts(&mut parts, &()).await {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };
    let ws = if state.config.websocket_protocols.is_empty() {
        ws
    } else {
        ws.protocols(state.config.websocket_protocols.clone())
    };
    let session = Session::new(session_id, Arc::clone(&state.config), Arc::clone(&state.service));
    ws.on_upgrade(move |socket| drive_socket(socket, session, raw))
}

/// Single task per connection: inbound frames, outbound queue and the
/// heartbeat tick are raced in one select loop.
async fn drive_socket(socket: WebSocket, session: Arc<Session>, raw: bool) {
    let guard = match session.attach() {
        Attach::Opened(g) => g,
        // A freshly created session always opens; anything else is a bug.
        _ => return,
    };
    let (mut ws_tx, mut ws_rx) = socket.split();
    let service = session.service();
    let handle = session.handle();

    if !raw
        && ws_tx
            .send(WsMessage::Text(Frame::Open.wire().into()))
            .await
            .is_err()
    {
        return;
    }
    service.on_open(handle.clone()).await;
    tracing::debug!(session_id = %session.id(), raw = raw, "websocket session open");

    let mut ticker = tokio::time::interval(session.config().websocket_heartbeat());
    ticker.tick().await; // consume the immediate first tick

    'conn: loop {
        let notified = session.notified();
        while let Some(event) = session.take_ready() {
            match event {
                SessionEvent::Messages(msgs) => {
                    // One message frame per message; websocket gains
                    // nothing from batching.
                    for msg in msgs {
                        let text = if raw {
                            msg
                        } else {
                            Frame::Message(vec![msg]).wire()
                        };
                        if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                            break 'conn;
                        }
                    }
                }
                SessionEvent::Closed(frame) => {
                    if !raw {
                        let _ = ws_tx.send(WsMessage::Text(frame.wire().into())).await;
                    }
                    let _ = ws_tx.close().await;
                    break 'conn;
                }
                SessionEvent::Heartbeat => {}
            }
        }

        tokio::select! {
            _ = notified => {}
            _ = ticker.tick() => {
                let beat = if raw {
                    WsMessage::Ping(Vec::new().into())
                } else {
                    WsMessage::Text(Frame::Heartbeat.wire().into())
                };
                if ws_tx.send(beat).await.is_err() {
                    break 'conn;
                }
            }
            inbound = ws_rx.next() => {
                match inbound {
                    Some(Ok(WsMessage::Text(text))) => {
                        let text = text.to_string();
                        if raw {
                            service.on_message(handle.clone(), text).await;
                        } else if !text.is_empty() {
                            match payload::decode_single(&text) {
                                Ok(msg) => service.on_message(handle.clone(), msg).await,
                                Err(err) => {
                                    // No per-frame recovery on websocket;
                                    // bad JSON tears the connection down.
                                    tracing::debug!(
                                        session_id = %session.id(),
                                        error = %err,
                                        "websocket payload rejected"
                                    );
                                    break 'conn;
                                }
                            }
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break 'conn,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    drop(guard);
    session.close(close_code::GO_AWAY, "Go away!");
    service.on_close(handle).await;
    tracing::debug!(session_id = %session.id(), "websocket session closed");
}
