use async_trait::async_trait;
use clap::Parser;
use sockjs_core::ServiceConfig;
use sockjs_server::{ServerConfig, Service, ServiceMount, SessionHandle};

/// SockJS protocol server with the standard test services mounted.
#[derive(Parser, Debug)]
#[command(name = "sockjs", version, about)]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value_t = 8081)]
    port: u16,

    /// URL of the SockJS client script served inside iframe pages
    #[arg(long, default_value = "https://cdn.jsdelivr.net/npm/sockjs-client@1/dist/sockjs.min.js")]
    sockjs_url: String,
}

/// Echoes every message back to its sender.
struct EchoService;

#[async_trait]
impl Service for EchoService {
    async fn on_message(&self, session: SessionHandle, message: String) {
        session.send(message);
    }
}

/// Closes every session as soon as it opens.
struct CloseService;

#[async_trait]
impl Service for CloseService {
    async fn on_open(&self, session: SessionHandle) {
        session.close();
    }

    async fn on_message(&self, _session: SessionHandle, _message: String) {}
}

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let with_url = |prefix: &str| ServiceConfig {
        sockjs_url: args.sockjs_url.clone(),
        ..ServiceConfig::new(prefix)
    };

    let mounts = vec![
        ServiceMount::new(with_url("/echo"), EchoService),
        ServiceMount::new(
            ServiceConfig {
                websocket_enabled: false,
                ..with_url("/disabled_websocket_echo")
            },
            EchoService,
        ),
        ServiceMount::new(
            ServiceConfig {
                cookies_needed: true,
                ..with_url("/cookie_needed_echo")
            },
            EchoService,
        ),
        ServiceMount::new(with_url("/close"), CloseService),
    ];

    let config = ServerConfig {
        port: args.port,
        ..ServerConfig::default()
    };
    let handle = match sockjs_server::start(config, mounts).await {
        Ok(handle) => handle,
        Err(err) => {
            tracing::error!(error = %err, "failed to start server");
            std::process::exit(1);
        }
    };
    tracing::info!(port = handle.port, "sockjs server ready");

    // Wait for shutdown signal
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for ctrl+c");
    }
    tracing::info!("Shutting down");
}
