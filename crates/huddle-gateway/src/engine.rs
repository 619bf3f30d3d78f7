use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;

use anyhow::anyhow;
use chrono::Utc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use huddle_db::ops;
use huddle_db::{Database, DeleteOutcome, EditOutcome, NewMessage, VoteOutcome, VotePolicy};
use huddle_types::events::{ChatMessagePayload, ClientEvent, PollView, ServerEvent, VoteView};
use huddle_types::models::{Identity, Profile, Tally};

use crate::dispatcher::Dispatcher;
use crate::error::{EngineError, Topic};
use crate::moderation::{Moderation, Verdict};
use crate::session::{Delivery, JoinFilter, LiveFeed, Session};

/// Server-side rules applied to every event.
#[derive(Debug, Clone)]
pub struct Policy {
    /// The one channel every message is posted to
    pub channel_id: String,
    pub edit_window: chrono::Duration,
    pub votes: VotePolicy,
    pub moderation: Moderation,
    pub min_poll_options: usize,
    pub max_poll_options: usize,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            channel_id: "general".into(),
            edit_window: chrono::Duration::minutes(5),
            votes: VotePolicy::default(),
            moderation: Moderation::default(),
            min_poll_options: 2,
            max_poll_options: 10,
        }
    }
}

/// Everything a freshly joined session needs to start its loops.
pub struct Joined {
    pub session: Session,
    /// `load data` for this session only
    pub load_data: ServerEvent,
    pub feed: LiveFeed,
    pub direct_rx: mpsc::UnboundedReceiver<ServerEvent>,
}

/// Applies client events: validate, commit, then broadcast.
///
/// Every mutation publishes its broadcast from inside `Database::write_then`,
/// so broadcasts leave in the order the store committed them.
#[derive(Clone)]
pub struct Engine {
    db: Arc<Database>,
    dispatcher: Dispatcher,
    policy: Arc<Policy>,
}

impl Engine {
    pub fn new(db: Arc<Database>, dispatcher: Dispatcher, policy: Policy) -> Self {
        Self {
            db,
            dispatcher,
            policy: Arc::new(policy),
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// Register a session, subscribe it, and read its join snapshot.
    ///
    /// The subscription is taken before the snapshot so nothing committed in
    /// between is lost; the feed's filter drops the resulting duplicates.
    pub async fn join(&self, identity: Identity, ip: Option<IpAddr>) -> Result<Joined, EngineError> {
        let session = Session::new(identity, ip);

        let user_id = session.identity.user_id.clone();
        self.blocking(move |db, _| db.ensure_user(&user_id)).await?;

        let direct_rx = self.dispatcher.register_session(session.id, ip).await;
        let broadcast_rx = self.dispatcher.subscribe();

        let (load_data, filter) = match self.snapshot().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.dispatcher.unregister_session(session.id).await;
                return Err(e);
            }
        };

        info!("session {} ({}) joining", session.id, session.identity.user_id);

        let feed = LiveFeed::new(session.id, broadcast_rx, filter);
        Ok(Joined {
            session,
            load_data,
            feed,
            direct_rx,
        })
    }

    /// Next broadcast this session should see.
    ///
    /// A session that falls more than the broadcast capacity behind cannot
    /// replay what it missed, so it is handed a fresh `load data` instead and
    /// its filter is rebuilt from that snapshot. The pending flag survives
    /// cancellation, so a dropped call resumes with the resync.
    pub async fn next_live(&self, feed: &mut LiveFeed) -> Result<Delivery, EngineError> {
        loop {
            if feed.resync_pending {
                let (load_data, filter) = self.snapshot().await?;
                feed.filter = filter;
                feed.resync_pending = false;
                info!("session {} resynced after lagging", feed.session_id);
                return Ok(Delivery::Resync(load_data));
            }

            match feed.rx.recv().await {
                Ok(msg) if feed.filter.admits(&msg.event) => return Ok(Delivery::Event(msg)),
                Ok(_) => continue,
                Err(RecvError::Lagged(n)) => {
                    warn!("session {} lagged by {} broadcasts, resyncing", feed.session_id, n);
                    feed.resync_pending = true;
                }
                Err(RecvError::Closed) => return Ok(Delivery::Closed),
            }
        }
    }

    /// Current channel history and polls as `load data`, plus the filter that
    /// keeps them from being delivered twice.
    async fn snapshot(&self) -> Result<(ServerEvent, JoinFilter), EngineError> {
        let channel_id = self.policy.channel_id.clone();
        let snapshot = self.blocking(move |db, _| db.load_snapshot(&channel_id)).await?;

        debug!(
            "snapshot with {} messages and {} polls",
            snapshot.messages.len(),
            snapshot.polls.len()
        );

        let filter = JoinFilter::from_snapshot(&snapshot);
        let load_data = ServerEvent::LoadData {
            messages: snapshot.messages.iter().map(ChatMessagePayload::from).collect(),
            polls: snapshot
                .polls
                .into_iter()
                .map(|(poll, tally)| PollView::new(&poll, tally))
                .collect(),
        };
        Ok((load_data, filter))
    }

    pub async fn leave(&self, session: &mut Session) {
        self.dispatcher.unregister_session(session.id).await;
        session.mark_disconnected();
    }

    /// Handle one client event, answering failures privately.
    pub async fn dispatch(&self, session: &mut Session, event: ClientEvent) {
        let topic = topic_of(&event);
        if let Err(err) = self.handle(session, event).await {
            if err.is_expected() {
                debug!("session {} event rejected: {}", session.id, err);
            } else {
                error!("session {} event failed: {:#}", session.id, err);
            }
            if let Some(reply) = err.reply(topic) {
                self.dispatcher.reply_one(session.id, reply).await;
            }
        }
    }

    pub async fn handle(&self, session: &mut Session, event: ClientEvent) -> Result<(), EngineError> {
        match event {
            ClientEvent::Profile {
                display_name,
                profile_picture,
            } => self.update_profile(session, display_name, profile_picture).await,
            ClientEvent::ChatMessage(payload) => self.chat_message(session, payload).await,
            ClientEvent::EditMessage {
                message_id,
                new_content,
            } => self.edit_message(message_id, new_content).await,
            ClientEvent::DeleteMessage { message_id } => self.delete_message(message_id).await,
            ClientEvent::CreatePoll { question, options } => {
                self.create_poll(session, question, options).await
            }
            ClientEvent::VoteSubmission {
                poll_id,
                selected_option,
            } => self.vote(session, poll_id, selected_option).await,
        }
    }

    async fn update_profile(
        &self,
        session: &mut Session,
        display_name: String,
        profile_picture: Option<String>,
    ) -> Result<(), EngineError> {
        session.profile = Profile {
            display_name: display_name.trim().to_string(),
            avatar_url: profile_picture.filter(|url| !url.trim().is_empty()),
        };

        let user_id = session.identity.user_id.clone();
        let profile = session.profile.clone();
        self.blocking(move |db, _| {
            db.upsert_user(&user_id, &profile.display_name, profile.avatar_url.as_deref())
        })
        .await
    }

    async fn chat_message(
        &self,
        session: &Session,
        payload: ChatMessagePayload,
    ) -> Result<(), EngineError> {
        if payload.text.trim().is_empty() {
            debug!("session {} sent an empty message, ignoring", session.id);
            return Ok(());
        }

        self.screen(&payload.text)?;

        let display_name = if payload.display_name.trim().is_empty() {
            session.profile.display_name.clone()
        } else {
            payload.display_name
        };
        let msg = NewMessage {
            author_id: session.identity.user_id.clone(),
            channel_id: self.policy.channel_id.clone(),
            display_name,
            avatar_url: payload.profile_picture.or_else(|| session.profile.avatar_url.clone()),
            content: payload.text,
        };
        let now = Utc::now();

        let pending = msg.clone();
        let stored = self
            .blocking(move |db, dispatcher| {
                db.write_then(
                    |conn| ops::insert_message(conn, &pending, now),
                    |stored| dispatcher.broadcast_all(ServerEvent::ChatMessage(stored.into())),
                )
            })
            .await;

        if let Err(e) = stored {
            // Availability over durability: the message still goes out, without an id
            error!("Failed to persist message from {}: {:#}", session.identity.user_id, e);
            self.dispatcher.broadcast_all(ServerEvent::ChatMessage(ChatMessagePayload {
                display_name: msg.display_name,
                text: msg.content,
                profile_picture: msg.avatar_url,
                timestamp: Some(now),
                message_id: None,
            }));
        }

        Ok(())
    }

    async fn edit_message(&self, message_id: i64, new_content: String) -> Result<(), EngineError> {
        self.screen(&new_content)?;

        let now = Utc::now();
        let window = self.policy.edit_window;

        let outcome = self
            .blocking(move |db, dispatcher| {
                db.write_then(
                    |conn| ops::edit_message(conn, message_id, &new_content, now, window),
                    |outcome| {
                        if let EditOutcome::Edited(content) = outcome {
                            dispatcher.broadcast_all(ServerEvent::MessageEdited {
                                message_id,
                                new_content: content.clone(),
                            });
                        }
                    },
                )
            })
            .await?;

        match outcome {
            EditOutcome::Edited(_) => Ok(()),
            EditOutcome::EditRejected => Err(EngineError::EditRejected(message_id)),
            EditOutcome::NotFound => Err(EngineError::NotFound(message_id)),
        }
    }

    async fn delete_message(&self, message_id: i64) -> Result<(), EngineError> {
        let outcome = self
            .blocking(move |db, dispatcher| {
                db.write_then(
                    |conn| ops::delete_message(conn, message_id),
                    |outcome| {
                        if *outcome == DeleteOutcome::Deleted {
                            dispatcher.broadcast_all(ServerEvent::MessageDeleted { message_id });
                        }
                    },
                )
            })
            .await?;

        match outcome {
            DeleteOutcome::Deleted => Ok(()),
            DeleteOutcome::NotFound => Err(EngineError::NotFound(message_id)),
        }
    }

    async fn create_poll(
        &self,
        session: &Session,
        question: String,
        options: Vec<String>,
    ) -> Result<(), EngineError> {
        let (question, options) = self.validate_poll(question, options)?;
        let creator = session.identity.user_id.clone();
        let now = Utc::now();

        let poll = self
            .blocking(move |db, dispatcher| {
                db.write_then(
                    |conn| ops::create_poll(conn, &question, &creator, &options, now),
                    |poll| {
                        let tally = Tally::zero(&poll.options);
                        dispatcher.broadcast_all(ServerEvent::PollUpdate(PollView::new(poll, tally)));
                    },
                )
            })
            .await?;

        info!("poll {} created by {}", poll.id, poll.created_by);
        Ok(())
    }

    /// Chat bodies, new or edited, must pass moderation.
    fn screen(&self, body: &str) -> Result<(), EngineError> {
        match self.policy.moderation.classify(body) {
            Verdict::Clean => Ok(()),
            Verdict::Rejected => Err(EngineError::ValidationRejected(
                "Your message contains blocked words and was not sent".into(),
            )),
        }
    }

    /// Trimmed question and options, or why they are unacceptable.
    fn validate_poll(
        &self,
        question: String,
        options: Vec<String>,
    ) -> Result<(String, Vec<String>), EngineError> {
        let reject = |why: &str| Err(EngineError::ValidationRejected(why.to_string()));

        let question = question.trim().to_string();
        if question.is_empty() {
            return reject("A poll needs a question");
        }

        let options: Vec<String> = options.iter().map(|o| o.trim().to_string()).collect();
        if options.iter().any(String::is_empty) {
            return reject("Poll options cannot be empty");
        }
        if options.len() < self.policy.min_poll_options {
            return Err(EngineError::ValidationRejected(format!(
                "A poll needs at least {} options",
                self.policy.min_poll_options
            )));
        }
        if options.len() > self.policy.max_poll_options {
            return Err(EngineError::ValidationRejected(format!(
                "A poll can have at most {} options",
                self.policy.max_poll_options
            )));
        }
        let distinct: HashSet<&str> = options.iter().map(String::as_str).collect();
        if distinct.len() != options.len() {
            return reject("Poll options must be distinct");
        }

        Ok((question, options))
    }

    async fn vote(&self, session: &Session, poll_id: i64, selected_option: String) -> Result<(), EngineError> {
        let label = selected_option.clone();
        let option_id = self
            .blocking(move |db, _| db.find_option(poll_id, &label))
            .await?
            .ok_or_else(|| EngineError::InvalidOption {
                poll_id,
                option: selected_option.clone(),
            })?;

        let voter = session.identity.user_id.clone();
        let policy = self.policy.votes;
        let now = Utc::now();

        let outcome = self
            .blocking(move |db, dispatcher| {
                db.write_then(
                    |conn| ops::cast_vote(conn, poll_id, option_id, &voter, policy, now),
                    |outcome| {
                        if let VoteOutcome::Accepted(tally) = outcome {
                            dispatcher.broadcast_all(ServerEvent::VoteUpdate(VoteView::new(
                                poll_id,
                                tally.clone(),
                            )));
                        }
                    },
                )
            })
            .await?;

        match outcome {
            VoteOutcome::Accepted(_) => Ok(()),
            VoteOutcome::InvalidOption => Err(EngineError::InvalidOption {
                poll_id,
                option: selected_option,
            }),
            VoteOutcome::AlreadyVoted => Err(EngineError::AlreadyVoted(poll_id)),
        }
    }

    /// Run blocking store work off the async runtime.
    async fn blocking<F, T>(&self, f: F) -> Result<T, EngineError>
    where
        F: FnOnce(&Database, &Dispatcher) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        let dispatcher = self.dispatcher.clone();
        tokio::task::spawn_blocking(move || f(&db, &dispatcher))
            .await
            .map_err(|e| {
                warn!("spawn_blocking join error: {}", e);
                EngineError::Storage(anyhow!("blocking task failed: {}", e))
            })?
            .map_err(EngineError::Storage)
    }
}

fn topic_of(event: &ClientEvent) -> Topic {
    match event {
        ClientEvent::Profile { .. } => Topic::Profile,
        ClientEvent::ChatMessage(_)
        | ClientEvent::EditMessage { .. }
        | ClientEvent::DeleteMessage { .. } => Topic::Message,
        ClientEvent::CreatePoll { .. } | ClientEvent::VoteSubmission { .. } => Topic::Poll,
    }
}
