use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{ChatMessage, Poll, Tally};

/// `chat message` payload. Clients send `displayName` and `text`; the server
/// stamps `timestamp` and `message_id` before broadcasting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessagePayload {
    #[serde(rename = "displayName", default)]
    pub display_name: String,
    pub text: String,
    #[serde(rename = "profilePicture", default, skip_serializing_if = "Option::is_none")]
    pub profile_picture: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<i64>,
}

impl From<&ChatMessage> for ChatMessagePayload {
    fn from(msg: &ChatMessage) -> Self {
        Self {
            display_name: msg.display_name.clone(),
            text: msg.content.clone(),
            profile_picture: msg.avatar_url.clone(),
            timestamp: Some(msg.created_at),
            message_id: Some(msg.id),
        }
    }
}

/// Full poll view: `poll update` and each entry of `load data.polls`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollView {
    pub poll_id: i64,
    pub question: String,
    pub options: Vec<String>,
    pub votes: BTreeMap<String, u64>,
    pub total_votes: u64,
}

impl PollView {
    pub fn new(poll: &Poll, tally: Tally) -> Self {
        Self {
            poll_id: poll.id,
            question: poll.question.clone(),
            options: tally.options,
            votes: tally.votes,
            total_votes: tally.total,
        }
    }
}

/// Tally-only view broadcast after every accepted vote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteView {
    pub poll_id: i64,
    pub options: Vec<String>,
    pub votes: BTreeMap<String, u64>,
    pub total_votes: u64,
}

impl VoteView {
    pub fn new(poll_id: i64, tally: Tally) -> Self {
        Self {
            poll_id,
            options: tally.options,
            votes: tally.votes,
            total_votes: tally.total,
        }
    }
}

/// Events sent FROM client TO server over the socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all_fields = "camelCase")]
pub enum ClientEvent {
    /// Answer to `request profile`
    #[serde(rename = "profile")]
    Profile {
        display_name: String,
        #[serde(default)]
        profile_picture: Option<String>,
    },

    #[serde(rename = "chat message")]
    ChatMessage(ChatMessagePayload),

    #[serde(rename = "edit message")]
    EditMessage { message_id: i64, new_content: String },

    #[serde(rename = "delete message")]
    DeleteMessage { message_id: i64 },

    #[serde(rename = "create poll")]
    CreatePoll { question: String, options: Vec<String> },

    /// `selectedOption` is the option label as rendered by the client.
    #[serde(rename = "vote submission")]
    VoteSubmission { poll_id: i64, selected_option: String },
}

/// Events sent FROM server TO clients, either to everyone or to one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    #[serde(rename = "request profile")]
    RequestProfile,

    #[serde(rename = "chat message")]
    ChatMessage(ChatMessagePayload),

    #[serde(rename = "message error")]
    MessageError(String),

    #[serde(rename = "message edited")]
    MessageEdited { message_id: i64, new_content: String },

    #[serde(rename = "message deleted")]
    MessageDeleted { message_id: i64 },

    #[serde(rename = "poll update")]
    PollUpdate(PollView),

    #[serde(rename = "vote update")]
    VoteUpdate(VoteView),

    #[serde(rename = "poll error")]
    PollError(String),

    /// Join snapshot, delivered once to the joining session only
    #[serde(rename = "load data")]
    LoadData {
        messages: Vec<ChatMessagePayload>,
        polls: Vec<PollView>,
    },
}

impl ServerEvent {
    /// Wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            Self::RequestProfile => "request profile",
            Self::ChatMessage(_) => "chat message",
            Self::MessageError(_) => "message error",
            Self::MessageEdited { .. } => "message edited",
            Self::MessageDeleted { .. } => "message deleted",
            Self::PollUpdate(_) => "poll update",
            Self::VoteUpdate(_) => "vote update",
            Self::PollError(_) => "poll error",
            Self::LoadData { .. } => "load data",
        }
    }
}
