use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use tokio::sync::{RwLock, broadcast, mpsc};
use tracing::{error, trace};
use uuid::Uuid;

use huddle_types::events::ServerEvent;

pub const BROADCAST_CAPACITY: usize = 1024;

/// One fanned-out event, serialized once for every receiver.
#[derive(Debug, Clone)]
pub struct Broadcast {
    pub event: Arc<ServerEvent>,
    pub json: Arc<str>,
}

/// A registered session's private channel.
struct SessionHandle {
    ip: Option<IpAddr>,
    tx: mpsc::UnboundedSender<ServerEvent>,
}

/// Routes events to live sessions: everyone, or exactly one.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// All subscribed sessions receive every broadcast
    broadcast_tx: broadcast::Sender<Broadcast>,

    /// Per-session targeted send channels: session_id -> handle
    sessions: RwLock<HashMap<Uuid, SessionHandle>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            inner: Arc::new(DispatcherInner {
                broadcast_tx,
                sessions: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Subscribe to broadcasts. Events sent before this call are not seen.
    pub fn subscribe(&self) -> broadcast::Receiver<Broadcast> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Deliver an event to every subscribed session.
    ///
    /// Synchronous, so it can run while the store's writer is still held.
    pub fn broadcast_all(&self, event: ServerEvent) {
        let json = match serde_json::to_string(&event) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize {} broadcast: {}", event.name(), e);
                return;
            }
        };
        trace!("broadcast {}", event.name());

        // No receivers is fine: nobody is connected
        let _ = self.inner.broadcast_tx.send(Broadcast {
            event: Arc::new(event),
            json: json.into(),
        });
    }

    /// Register a session's private channel. Returns its receiver.
    pub async fn register_session(
        &self,
        session_id: Uuid,
        ip: Option<IpAddr>,
    ) -> mpsc::UnboundedReceiver<ServerEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .sessions
            .write()
            .await
            .insert(session_id, SessionHandle { ip, tx });
        rx
    }

    pub async fn unregister_session(&self, session_id: Uuid) {
        self.inner.sessions.write().await.remove(&session_id);
    }

    /// Deliver an event only to the originating session. Silently dropped if
    /// the session has already gone.
    pub async fn reply_one(&self, session_id: Uuid, event: ServerEvent) {
        let sessions = self.inner.sessions.read().await;
        if let Some(handle) = sessions.get(&session_id) {
            let _ = handle.tx.send(event);
        }
    }

    pub async fn session_count(&self) -> usize {
        self.inner.sessions.read().await.len()
    }

    /// Peer address a session connected from, if known.
    pub async fn session_ip(&self, session_id: Uuid) -> Option<IpAddr> {
        self.inner
            .sessions
            .read()
            .await
            .get(&session_id)
            .and_then(|h| h.ip)
    }
}
