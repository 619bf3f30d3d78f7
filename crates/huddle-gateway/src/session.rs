use std::collections::{HashMap, HashSet};
use std::net::IpAddr;

use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use huddle_db::Snapshot;

use crate::dispatcher::Broadcast;
use huddle_types::events::ServerEvent;
use huddle_types::models::{Identity, Profile};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Joined,
    Disconnected,
}

/// One live connection. Process-local; owns no durable data.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    pub ip: Option<IpAddr>,
    pub identity: Identity,
    pub profile: Profile,
    state: SessionState,
}

impl Session {
    pub fn new(identity: Identity, ip: Option<IpAddr>) -> Self {
        Self {
            id: Uuid::new_v4(),
            ip,
            identity,
            profile: Profile::default(),
            state: SessionState::Connecting,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Connecting -> Joined, once the snapshot has been delivered.
    pub fn mark_joined(&mut self) {
        if self.state == SessionState::Connecting {
            debug!("session {} joined", self.id);
            self.state = SessionState::Joined;
        }
    }

    /// Terminal.
    pub fn mark_disconnected(&mut self) {
        debug!("session {} disconnected", self.id);
        self.state = SessionState::Disconnected;
    }
}

/// Suppresses live events a joining session already saw in its snapshot.
///
/// A session subscribes before the snapshot is read, so broadcasts committed
/// in between arrive twice: once inside `load data`, once live. Creations are
/// keyed by id; vote updates only pass when they move a tally past what the
/// snapshot showed. Edits and deletes are idempotent and always pass.
#[derive(Debug, Clone, Default)]
pub struct JoinFilter {
    message_ids: HashSet<i64>,
    poll_totals: HashMap<i64, u64>,
}

impl JoinFilter {
    pub fn from_snapshot(snapshot: &Snapshot) -> Self {
        Self {
            message_ids: snapshot.messages.iter().map(|m| m.id).collect(),
            poll_totals: snapshot
                .polls
                .iter()
                .map(|(poll, tally)| (poll.id, tally.total))
                .collect(),
        }
    }

    pub fn admits(&self, event: &ServerEvent) -> bool {
        match event {
            ServerEvent::ChatMessage(payload) => payload
                .message_id
                .is_none_or(|id| !self.message_ids.contains(&id)),
            ServerEvent::PollUpdate(view) => !self.poll_totals.contains_key(&view.poll_id),
            ServerEvent::VoteUpdate(view) => self
                .poll_totals
                .get(&view.poll_id)
                .is_none_or(|&seen| view.total_votes > seen),
            _ => true,
        }
    }
}

/// A session's view of the broadcast stream, filtered against what it has
/// already been sent in a snapshot.
pub struct LiveFeed {
    pub(crate) session_id: Uuid,
    pub(crate) rx: broadcast::Receiver<Broadcast>,
    pub(crate) filter: JoinFilter,
    /// Set once the receiver has lagged; cleared when a fresh snapshot is out
    pub(crate) resync_pending: bool,
}

impl LiveFeed {
    pub fn new(session_id: Uuid, rx: broadcast::Receiver<Broadcast>, filter: JoinFilter) -> Self {
        Self {
            session_id,
            rx,
            filter,
            resync_pending: false,
        }
    }
}

/// What the next step of a live feed produced.
#[derive(Debug)]
pub enum Delivery {
    Event(Broadcast),
    /// Broadcasts were dropped for this session; a replacement `load data`
    Resync(ServerEvent),
    Closed,
}
