use std::sync::Arc;

use async_trait::async_trait;
use sockjs_core::frame::close_code;

use crate::session::Session;

/// The application side of a SockJS session.
///
/// The server calls these; the service talks back through the
/// [`SessionHandle`] it is given.
#[async_trait]
pub trait Service: Send + Sync + 'static {
    /// A session finished its open handshake.
    async fn on_open(&self, _session: SessionHandle) {}

    /// One decoded client message.
    async fn on_message(&self, session: SessionHandle, message: String);

    /// The session ended (client disconnect, timeout or explicit close).
    async fn on_close(&self, _session: SessionHandle) {}
}

/// Capability handle a service uses to talk to one session.
#[derive(Clone)]
pub struct SessionHandle {
    session: Arc<Session>,
}

impl SessionHandle {
    pub(crate) fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    pub fn id(&self) -> &str {
        self.session.id()
    }

    /// Queue one outbound message. Delivered promptly if a transport is
    /// attached, buffered in order otherwise.
    pub fn send(&self, message: impl Into<String>) {
        self.session.enqueue(message.into());
    }

    /// Close the session with the protocol's standard `3000,"Go away!"`.
    pub fn close(&self) {
        self.close_with(close_code::GO_AWAY, "Go away!");
    }

    /// Close the session with an explicit code and reason.
    pub fn close_with(&self, code: u16, reason: &str) {
        self.session.close(code, reason);
    }
}
