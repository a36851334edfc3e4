use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use sockjs_core::ServiceConfig;
use tower_http::trace::TraceLayer;

use crate::router::{not_found, service_router};
use crate::service::Service;
use crate::session::{start_sweeper, SessionRegistry};

/// Server-level settings, shared by every mounted service.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub port: u16,
    /// How often idle sessions are checked for eviction.
    pub sweep_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8081,
            sweep_interval: Duration::from_secs(1),
        }
    }
}

/// One service mounted under a URL prefix.
pub struct ServiceMount {
    pub config: ServiceConfig,
    pub service: Arc<dyn Service>,
}

impl ServiceMount {
    pub fn new(config: ServiceConfig, service: impl Service) -> Self {
        Self {
            config,
            service: Arc::new(service),
        }
    }
}

/// Per-mount state handed to the route handlers. Each mount gets its own
/// session registry, so ids never collide across prefixes.
#[derive(Clone)]
pub struct ServiceState {
    pub config: Arc<ServiceConfig>,
    pub service: Arc<dyn Service>,
    pub registry: Arc<SessionRegistry>,
}

/// Assemble the router for a set of mounts. Exposed separately from
/// [`start`] so tests can drive the router on an ephemeral port.
pub fn build_router(mounts: Vec<ServiceMount>) -> (Router, Vec<Arc<SessionRegistry>>) {
    let mut router = Router::new();
    let mut registries = Vec::with_capacity(mounts.len());
    for mount in mounts {
        let registry = Arc::new(SessionRegistry::new());
        registries.push(Arc::clone(&registry));
        let state = ServiceState {
            config: Arc::new(mount.config),
            service: mount.service,
            registry,
        };
        router = router.merge(service_router(state));
    }
    let router = router
        .fallback(|| async { not_found() })
        .layer(TraceLayer::new_for_http());
    (router, registries)
}

/// Handle to a running server. Dropping it does not stop the server.
pub struct ServerHandle {
    pub port: u16,
    _server: tokio::task::JoinHandle<()>,
    _sweepers: Vec<tokio::task::JoinHandle<()>>,
}

/// Bind and serve the given mounts. Returns once the listener is bound;
/// the accept loop runs on a background task.
pub async fn start(
    config: ServerConfig,
    mounts: Vec<ServiceMount>,
) -> Result<ServerHandle, std::io::Error> {
    let (router, registries) = build_router(mounts);
    let sweepers = registries
        .into_iter()
        .map(|registry| start_sweeper(registry, config.sweep_interval))
        .collect();

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
    let port = listener.local_addr()?.port();
    tracing::info!(port = port, "sockjs server listening");

    let server = tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, router).await {
            tracing::error!(error = %err, "server terminated");
        }
    });

    Ok(ServerHandle {
        port,
        _server: server,
        _sweepers: sweepers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::SessionHandle;
    use async_trait::async_trait;
    use futures::{SinkExt, StreamExt};
    use tokio_tungstenite::connect_async;
    use tokio_tungstenite::tungstenite::Message as WsFrame;

    type WsStream =
        tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

    /// Next text frame, skipping pings. `None` once the connection ends.
    async fn next_ws_text(ws: &mut WsStream) -> Option<String> {
        while let Some(frame) = ws.next().await {
            match frame {
                Ok(WsFrame::Text(t)) => return Some(t.to_string()),
                Ok(WsFrame::Close(_)) | Err(_) => return None,
                Ok(_) => continue,
            }
        }
        None
    }

    struct EchoService;

    #[async_trait]
    impl Service for EchoService {
        async fn on_message(&self, session: SessionHandle, message: String) {
            session.send(message);
        }
    }

    fn echo_config(prefix: &str) -> ServiceConfig {
        ServiceConfig {
            session_timeout: Duration::from_millis(200),
            heartbeat_interval: Duration::from_millis(300),
            ..ServiceConfig::new(prefix)
        }
    }

    async fn spawn_echo() -> u16 {
        let handle = start(
            ServerConfig {
                port: 0,
                sweep_interval: Duration::from_millis(100),
            },
            vec![ServiceMount::new(echo_config("/echo"), EchoService)],
        )
        .await
        .unwrap();
        handle.port
    }

    #[tokio::test]
    async fn greeting_and_fallback() {
        let port = spawn_echo().await;
        let client = reqwest::Client::new();

        let resp = client
            .get(format!("http://127.0.0.1:{port}/echo"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        assert_eq!(resp.text().await.unwrap(), "Welcome to SockJS!\n");

        let resp = client
            .get(format!("http://127.0.0.1:{port}/nope"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 404);
    }

    #[tokio::test]
    async fn info_reports_capabilities_with_fresh_entropy() {
        let port = spawn_echo().await;
        let client = reqwest::Client::new();
        let url = format!("http://127.0.0.1:{port}/echo/info");

        let a: serde_json::Value = client.get(&url).send().await.unwrap().json().await.unwrap();
        let b: serde_json::Value = client.get(&url).send().await.unwrap().json().await.unwrap();

        assert_eq!(a["websocket"], true);
        assert_eq!(a["cookie_needed"], false);
        assert_eq!(a["origins"], serde_json::json!(["*:*"]));
        assert_ne!(a["entropy"], b["entropy"]);
    }

    #[tokio::test]
    async fn iframe_page_supports_conditional_get() {
        let port = spawn_echo().await;
        let client = reqwest::Client::new();
        let url = format!("http://127.0.0.1:{port}/echo/iframe.html");

        let resp = client.get(&url).send().await.unwrap();
        assert_eq!(resp.status(), 200);
        let etag = resp.headers()["etag"].to_str().unwrap().to_string();
        let body = resp.text().await.unwrap();
        assert!(body.contains("SockJS.bootstrap_iframe()"));

        let resp = client
            .get(&url)
            .header("If-None-Match", &etag)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 304);

        let resp = client
            .get(format!("http://127.0.0.1:{port}/echo/iframe-abc.html"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);

        let resp = client
            .get(format!("http://127.0.0.1:{port}/echo/other.html"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 404);
    }

    #[tokio::test]
    async fn xhr_polling_echo_cycle() {
        let port = spawn_echo().await;
        let client = reqwest::Client::new();
        let base = format!("http://127.0.0.1:{port}/echo/000/xhrsess1");

        let resp = client.post(format!("{base}/xhr")).send().await.unwrap();
        assert_eq!(resp.status(), 200);
        assert_eq!(resp.text().await.unwrap(), "o\n");

        let resp = client
            .post(format!("{base}/xhr_send"))
            .body(r#"["hello"]"#)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 204);

        let resp = client.post(format!("{base}/xhr")).send().await.unwrap();
        assert_eq!(resp.text().await.unwrap(), "a[\"hello\"]\n");
    }

    #[tokio::test]
    async fn consecutive_sends_arrive_in_order() {
        let port = spawn_echo().await;
        let client = reqwest::Client::new();
        let base = format!("http://127.0.0.1:{port}/echo/000/ordered");

        let resp = client.post(format!("{base}/xhr")).send().await.unwrap();
        assert_eq!(resp.text().await.unwrap(), "o\n");

        // Each 204 means the service has already seen the message, so the
        // backlog must drain in send order.
        for msg in ["1", "2", "3"] {
            let resp = client
                .post(format!("{base}/xhr_send"))
                .body(format!(r#"["{msg}"]"#))
                .send()
                .await
                .unwrap();
            assert_eq!(resp.status(), 204);
        }

        let resp = client.post(format!("{base}/xhr")).send().await.unwrap();
        assert_eq!(resp.text().await.unwrap(), "a[\"1\",\"2\",\"3\"]\n");
    }

    #[tokio::test]
    async fn websocket_session_framing_and_echo() {
        let port = spawn_echo().await;
        let (mut ws, _) = connect_async(format!(
            "ws://127.0.0.1:{port}/echo/000/wsess/websocket"
        ))
        .await
        .unwrap();

        assert_eq!(next_ws_text(&mut ws).await.as_deref(), Some("o"));

        ws.send(WsFrame::Text("\"hi\"".into())).await.unwrap();
        assert_eq!(next_ws_text(&mut ws).await.as_deref(), Some("a[\"hi\"]"));

        // Empty frames are ignored; broken JSON tears the connection down.
        ws.send(WsFrame::Text("".into())).await.unwrap();
        ws.send(WsFrame::Text("{".into())).await.unwrap();
        assert_eq!(next_ws_text(&mut ws).await, None);
    }

    #[tokio::test]
    async fn raw_websocket_echoes_verbatim() {
        let port = spawn_echo().await;
        let (mut ws, _) = connect_async(format!("ws://127.0.0.1:{port}/echo/websocket"))
            .await
            .unwrap();

        // No SockJS framing on the raw endpoint, not even an open frame.
        ws.send(WsFrame::Text("hello".into())).await.unwrap();
        assert_eq!(next_ws_text(&mut ws).await.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn websocket_heartbeat_uses_dedicated_interval() {
        let handle = start(
            ServerConfig {
                port: 0,
                sweep_interval: Duration::from_millis(100),
            },
            vec![ServiceMount::new(
                ServiceConfig {
                    heartbeat_interval: Duration::from_secs(30),
                    websocket_heartbeat_interval: Some(Duration::from_millis(100)),
                    ..ServiceConfig::new("/echo")
                },
                EchoService,
            )],
        )
        .await
        .unwrap();
        let port = handle.port;
        let (mut ws, _) = connect_async(format!("ws://127.0.0.1:{port}/echo/000/hb/websocket"))
            .await
            .unwrap();

        assert_eq!(next_ws_text(&mut ws).await.as_deref(), Some("o"));
        let beat = tokio::time::timeout(Duration::from_secs(2), next_ws_text(&mut ws))
            .await
            .expect("no heartbeat within the websocket interval");
        assert_eq!(beat.as_deref(), Some("h"));
    }

    #[tokio::test]
    async fn xhr_send_to_unknown_session_is_404() {
        let port = spawn_echo().await;
        let client = reqwest::Client::new();
        let resp = client
            .post(format!(
                "http://127.0.0.1:{port}/echo/000/missing/xhr_send"
            ))
            .body(r#"["x"]"#)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 404);
    }

    #[tokio::test]
    async fn xhr_send_rejects_bad_payloads() {
        let port = spawn_echo().await;
        let client = reqwest::Client::new();
        let base = format!("http://127.0.0.1:{port}/echo/000/badpay");

        let resp = client.post(format!("{base}/xhr")).send().await.unwrap();
        assert_eq!(resp.text().await.unwrap(), "o\n");

        let resp = client
            .post(format!("{base}/xhr_send"))
            .body(r#"["x"#)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 500);
        assert_eq!(resp.text().await.unwrap(), "Broken JSON encoding.");

        let resp = client
            .post(format!("{base}/xhr_send"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 500);
        assert_eq!(resp.text().await.unwrap(), "Payload expected.");
    }

    #[tokio::test]
    async fn concurrent_poll_interrupts_session() {
        let port = spawn_echo().await;
        let client = reqwest::Client::new();
        let base = format!("http://127.0.0.1:{port}/echo/000/twopoll");

        let resp = client.post(format!("{base}/xhr")).send().await.unwrap();
        assert_eq!(resp.text().await.unwrap(), "o\n");

        // First poll parks on the session.
        let first = {
            let client = client.clone();
            let url = format!("{base}/xhr");
            tokio::spawn(async move { client.post(url).send().await.unwrap().text().await.unwrap() })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;

        // Second concurrent poll is rejected and interrupts the session.
        let resp = client.post(format!("{base}/xhr")).send().await.unwrap();
        assert_eq!(
            resp.text().await.unwrap(),
            "c[2010,\"Another connection still open\"]\n"
        );

        // The parked poll still completes normally (heartbeat at 300ms).
        assert_eq!(first.await.unwrap(), "h\n");

        let resp = client.post(format!("{base}/xhr")).send().await.unwrap();
        assert_eq!(
            resp.text().await.unwrap(),
            "c[1002,\"Connection interrupted\"]\n"
        );
    }

    #[tokio::test]
    async fn xhr_streaming_recycles_at_byte_limit() {
        let handle = start(
            ServerConfig {
                port: 0,
                sweep_interval: Duration::from_millis(100),
            },
            vec![ServiceMount::new(
                ServiceConfig {
                    max_streaming_bytes: 4096,
                    ..echo_config("/echo")
                },
                EchoService,
            )],
        )
        .await
        .unwrap();
        let port = handle.port;
        let client = reqwest::Client::new();
        let base = format!("http://127.0.0.1:{port}/echo/000/streamlim");

        let resp = client
            .post(format!("{base}/xhr_streaming"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let mut stream = resp.bytes_stream();

        // Push enough frames to blow the 4096-byte budget, then drain the
        // body to its end.
        let msg = "x".repeat(1000);
        for _ in 0..5 {
            let resp = client
                .post(format!("{base}/xhr_send"))
                .body(format!(r#"["{msg}"]"#))
                .send()
                .await
                .unwrap();
            assert_eq!(resp.status(), 204);
        }

        // The budget forces the body to end; without the limit this drain
        // would run forever on heartbeats.
        let body = tokio::time::timeout(Duration::from_secs(2), async {
            let mut body = Vec::new();
            while let Some(chunk) = stream.next().await {
                body.extend_from_slice(&chunk.unwrap());
            }
            body
        })
        .await
        .expect("stream did not close at the byte limit");
        let body = String::from_utf8(body).unwrap();

        let prelude: String = "h".repeat(2048) + "\n";
        let rest = body.strip_prefix(&prelude).expect("streaming prelude");
        assert!(rest.starts_with("o\n"));
        assert!(rest.contains("a[\""));
        // Payload stops at the first frame crossing the limit.
        assert!(rest.len() < 4096 + 1100, "body ran past the limit");
    }

    #[tokio::test]
    async fn jsonp_requires_callback_and_wraps_frames() {
        let port = spawn_echo().await;
        let client = reqwest::Client::new();
        let base = format!("http://127.0.0.1:{port}/echo/000/jsonpsess");

        let resp = client.get(format!("{base}/jsonp")).send().await.unwrap();
        assert_eq!(resp.status(), 500);
        assert_eq!(resp.text().await.unwrap(), "\"callback\" parameter required");

        let resp = client
            .get(format!("{base}/jsonp?c=cb"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        assert_eq!(resp.text().await.unwrap(), "cb(\"o\");\r\n");

        let resp = client
            .post(format!("{base}/jsonp_send"))
            .header("content-type", "application/x-www-form-urlencoded")
            .body("d=%5B%22hi%22%5D")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        assert_eq!(resp.text().await.unwrap(), "ok");

        let resp = client
            .get(format!("{base}/jsonp?c=cb"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.text().await.unwrap(), "cb(\"a[\\\"hi\\\"]\");\r\n");
    }

    #[tokio::test]
    async fn method_policy_per_transport() {
        let port = spawn_echo().await;
        let client = reqwest::Client::new();
        let base = format!("http://127.0.0.1:{port}/echo/000/methods");

        let resp = client.get(format!("{base}/xhr")).send().await.unwrap();
        assert_eq!(resp.status(), 405);
        assert_eq!(resp.headers()["allow"], "POST");

        let resp = client
            .post(format!("{base}/eventsource"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 405);
        assert_eq!(resp.headers()["allow"], "GET");

        let resp = client
            .request(reqwest::Method::OPTIONS, format!("{base}/xhr"))
            .header("Origin", "http://a.example")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 204);
        assert_eq!(resp.headers()["access-control-allow-methods"], "OPTIONS, POST");
        assert_eq!(
            resp.headers()["access-control-allow-origin"],
            "http://a.example"
        );
    }

    #[tokio::test]
    async fn bad_session_path_segments_are_404() {
        let port = spawn_echo().await;
        let client = reqwest::Client::new();

        for path in [
            "/echo/000//xhr",
            "/echo/a.b/sess/xhr",
            "/echo/000/sess/unknown",
        ] {
            let resp = client
                .post(format!("http://127.0.0.1:{port}{path}"))
                .send()
                .await
                .unwrap();
            assert_eq!(resp.status(), 404, "path {path}");
        }
    }

    #[tokio::test]
    async fn sticky_cookie_is_echoed_when_enabled() {
        let handle = start(
            ServerConfig {
                port: 0,
                sweep_interval: Duration::from_millis(100),
            },
            vec![ServiceMount::new(
                ServiceConfig {
                    cookies_needed: true,
                    ..echo_config("/cecho")
                },
                EchoService,
            )],
        )
        .await
        .unwrap();
        let port = handle.port;
        let client = reqwest::Client::new();
        let base = format!("http://127.0.0.1:{port}/cecho/000/cookies");

        let resp = client.post(format!("{base}/xhr")).send().await.unwrap();
        assert_eq!(resp.headers()["set-cookie"], "JSESSIONID=dummy; path=/");

        let resp = client
            .post(format!("{base}/xhr"))
            .header("Cookie", "JSESSIONID=mine")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.headers()["set-cookie"], "JSESSIONID=mine; path=/");

        // /info carries the cookie too.
        let resp = client
            .get(format!("http://127.0.0.1:{port}/cecho/info"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.headers()["set-cookie"], "JSESSIONID=dummy; path=/");
    }

    #[tokio::test]
    async fn disabled_websocket_is_404_and_info_reflects_it() {
        let handle = start(
            ServerConfig {
                port: 0,
                sweep_interval: Duration::from_millis(100),
            },
            vec![ServiceMount::new(
                ServiceConfig {
                    websocket_enabled: false,
                    ..echo_config("/dws")
                },
                EchoService,
            )],
        )
        .await
        .unwrap();
        let port = handle.port;
        let client = reqwest::Client::new();

        let info: serde_json::Value = client
            .get(format!("http://127.0.0.1:{port}/dws/info"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(info["websocket"], false);

        let resp = client
            .get(format!("http://127.0.0.1:{port}/dws/000/s/websocket"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 404);
    }

    #[tokio::test]
    async fn idle_session_is_swept_and_close_frame_replayed_until_then() {
        let port = spawn_echo().await;
        let client = reqwest::Client::new();
        let base = format!("http://127.0.0.1:{port}/echo/000/sweepme");

        let resp = client.post(format!("{base}/xhr")).send().await.unwrap();
        assert_eq!(resp.text().await.unwrap(), "o\n");

        // 200ms session timeout plus 100ms sweep cadence.
        tokio::time::sleep(Duration::from_millis(500)).await;

        // The id is gone, so the next poll starts a fresh session.
        let resp = client.post(format!("{base}/xhr")).send().await.unwrap();
        assert_eq!(resp.text().await.unwrap(), "o\n");
    }
}
