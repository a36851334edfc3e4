use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use sockjs_core::{Frame, ServiceConfig};
use tokio::sync::futures::Notified;
use tokio::sync::Notify;

use crate::service::{Service, SessionHandle};

/// Session lifecycle states.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Lifecycle {
    /// Created, open frame not yet written.
    Connecting,
    /// Open frame written, traffic flowing.
    Open,
    /// A second connection attempted to attach; every later request is
    /// answered with `c[1002,...]` until the session is evicted.
    Interrupted,
    /// Closed by the service (or rejected); code and reason are replayed
    /// to any late request.
    Closed(u16, String),
}

/// Outcome of trying to attach a receiving transport to a session.
pub enum Attach {
    /// First attachment. Write the open frame, then start delivering.
    Opened(AttachGuard),
    /// Session already open and free; connection accepted.
    Resumed(AttachGuard),
    /// Write this close frame to the requesting connection and finish.
    Rejected(Frame),
}

/// Event a waiting receiver observes.
#[derive(Debug, PartialEq, Eq)]
pub enum SessionEvent {
    /// Buffered messages, drained in enqueue order.
    Messages(Vec<String>),
    /// Session is closed; write this frame and stop.
    Closed(Frame),
    /// Nothing happened for a full heartbeat interval.
    Heartbeat,
}

struct SessionInner {
    lifecycle: Lifecycle,
    queue: VecDeque<String>,
    in_use: bool,
    /// Whether the open frame was ever written (gates `on_close`).
    opened: bool,
    last_detach: Instant,
}

/// One logical duplex channel, outliving any single HTTP connection.
pub struct Session {
    id: String,
    config: Arc<ServiceConfig>,
    service: Arc<dyn Service>,
    inner: Mutex<SessionInner>,
    notify: Notify,
}

impl Session {
    pub fn new(id: impl Into<String>, config: Arc<ServiceConfig>, service: Arc<dyn Service>) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            config,
            service,
            inner: Mutex::new(SessionInner {
                lifecycle: Lifecycle::Connecting,
                queue: VecDeque::new(),
                in_use: false,
                opened: false,
                last_detach: Instant::now(),
            }),
            notify: Notify::new(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub(crate) fn service(&self) -> Arc<dyn Service> {
        Arc::clone(&self.service)
    }

    pub fn handle(self: &Arc<Self>) -> SessionHandle {
        SessionHandle::new(Arc::clone(self))
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.inner.lock().lifecycle.clone()
    }

    /// Whether inbound sends may still be delivered to the service.
    pub fn accepts_messages(&self) -> bool {
        matches!(
            self.inner.lock().lifecycle,
            Lifecycle::Connecting | Lifecycle::Open
        )
    }

    pub fn is_in_use(&self) -> bool {
        self.inner.lock().in_use
    }

    /// Try to attach a receiving transport. At most one connection may be
    /// attached at any instant; a concurrent attempt interrupts the
    /// session and is itself rejected.
    pub fn attach(self: &Arc<Self>) -> Attach {
        let mut inner = self.inner.lock();
        match inner.lifecycle.clone() {
            Lifecycle::Closed(code, reason) => Attach::Rejected(Frame::close(code, &reason)),
            Lifecycle::Interrupted => Attach::Rejected(Frame::close_interrupted()),
            _ if inner.in_use => {
                inner.lifecycle = Lifecycle::Interrupted;
                drop(inner);
                tracing::debug!(session_id = %self.id, "concurrent attach, session interrupted");
                self.notify.notify_waiters();
                Attach::Rejected(Frame::close_another_connection())
            }
            Lifecycle::Connecting => {
                inner.in_use = true;
                inner.opened = true;
                inner.lifecycle = Lifecycle::Open;
                Attach::Opened(AttachGuard {
                    session: Arc::clone(self),
                })
            }
            Lifecycle::Open => {
                inner.in_use = true;
                Attach::Resumed(AttachGuard {
                    session: Arc::clone(self),
                })
            }
        }
    }

    fn detach(&self) {
        let mut inner = self.inner.lock();
        inner.in_use = false;
        inner.last_detach = Instant::now();
        drop(inner);
        self.notify.notify_waiters();
    }

    /// Append an outbound message and wake any attached receiver.
    pub fn enqueue(&self, message: String) {
        {
            let mut inner = self.inner.lock();
            if matches!(inner.lifecycle, Lifecycle::Closed(..)) {
                tracing::debug!(session_id = %self.id, "dropping send to closed session");
                return;
            }
            inner.queue.push_back(message);
        }
        self.notify.notify_waiters();
    }

    /// Drain the whole outbound backlog in enqueue order.
    pub fn drain_all(&self) -> Vec<String> {
        self.inner.lock().queue.drain(..).collect()
    }

    /// Close the session. The attached transport (if any) wakes up and
    /// writes the close frame; the sweeper evicts the session afterwards.
    pub fn close(&self, code: u16, reason: &str) {
        {
            let mut inner = self.inner.lock();
            if matches!(inner.lifecycle, Lifecycle::Closed(..)) {
                return;
            }
            inner.lifecycle = Lifecycle::Closed(code, reason.to_string());
        }
        self.notify.notify_waiters();
    }

    /// Non-blocking check for something a receiver must act on.
    /// Interrupted sessions deliberately return nothing: the connection
    /// that was attached when the interrupt happened is left in place and
    /// completes normally.
    pub fn take_ready(&self) -> Option<SessionEvent> {
        let mut inner = self.inner.lock();
        if let Lifecycle::Closed(code, reason) = &inner.lifecycle {
            return Some(SessionEvent::Closed(Frame::close(*code, reason)));
        }
        if !inner.queue.is_empty() {
            return Some(SessionEvent::Messages(inner.queue.drain(..).collect()));
        }
        None
    }

    /// Future resolving on the next enqueue / close / detach. Create it
    /// before calling [`take_ready`] so no wake-up is missed.
    pub fn notified(&self) -> Notified<'_> {
        self.notify.notified()
    }

    /// Park a polling request until a message arrives, the session
    /// closes, or a heartbeat interval elapses, whichever is first.
    pub async fn poll_wait(&self) -> SessionEvent {
        let deadline = tokio::time::Instant::now() + self.config.heartbeat_interval;
        loop {
            let notified = self.notified();
            if let Some(event) = self.take_ready() {
                return event;
            }
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep_until(deadline) => return SessionEvent::Heartbeat,
            }
        }
    }

    fn expired(&self) -> Option<bool> {
        let inner = self.inner.lock();
        if inner.in_use {
            return None;
        }
        if matches!(inner.lifecycle, Lifecycle::Closed(..)) {
            return Some(inner.opened);
        }
        if inner.last_detach.elapsed() >= self.config.session_timeout {
            return Some(inner.opened);
        }
        None
    }
}

/// Clears the session's attached state when the receiving connection
/// ends, including abrupt client disconnects that drop the handler.
pub struct AttachGuard {
    session: Arc<Session>,
}

impl AttachGuard {
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }
}

impl Drop for AttachGuard {
    fn drop(&mut self) {
        self.session.detach();
    }
}

/// Shared map of live sessions for one mounted service.
///
/// Injected into the router and transport handlers rather than living in
/// a global, but behaviorally a cross-request, cross-connection map.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<Session>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert-if-absent: concurrent first requests for the same unseen id
    /// all observe the same instance.
    pub fn get_or_create(
        &self,
        id: &str,
        config: Arc<ServiceConfig>,
        service: Arc<dyn Service>,
    ) -> Arc<Session> {
        self.sessions
            .entry(id.to_string())
            .or_insert_with(|| Session::new(id, config, service))
            .clone()
    }

    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|s| Arc::clone(&s))
    }

    pub fn remove(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.remove(id).map(|(_, s)| s)
    }

    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    /// Evict closed sessions and sessions that sat detached past their
    /// timeout. Fires `Service::on_close` for each evicted session that
    /// had completed its open handshake.
    pub fn sweep(&self) -> usize {
        let expired: Vec<(String, bool)> = self
            .sessions
            .iter()
            .filter_map(|entry| {
                entry
                    .value()
                    .expired()
                    .map(|opened| (entry.key().clone(), opened))
            })
            .collect();

        let mut removed = 0;
        for (id, opened) in expired {
            if let Some(session) = self.remove(&id) {
                removed += 1;
                tracing::debug!(session_id = %id, "session evicted");
                if opened {
                    let service = session.service();
                    let handle = session.handle();
                    tokio::spawn(async move {
                        service.on_close(handle).await;
                    });
                }
            }
        }
        removed
    }
}

/// Background task that periodically evicts idle sessions.
pub fn start_sweeper(
    registry: Arc<SessionRegistry>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let removed = registry.sweep();
            if removed > 0 {
                tracing::debug!(removed = removed, "idle session sweep");
            }
        }
    })
}
