use thiserror::Error;

use huddle_types::events::ServerEvent;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Moderation or input validation refused the event
    #[error("{0}")]
    ValidationRejected(String),

    #[error("Message {0} can no longer be edited")]
    EditRejected(i64),

    #[error("Message {0} not found")]
    NotFound(i64),

    #[error("Option '{option}' is not part of poll {poll_id}")]
    InvalidOption { poll_id: i64, option: String },

    #[error("You have already voted in poll {0}")]
    AlreadyVoted(i64),

    #[error("storage error: {0:#}")]
    Storage(#[from] anyhow::Error),
}

/// Which private error event a failed client event is answered with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topic {
    Message,
    Poll,
    Profile,
}

impl EngineError {
    /// Business-rule outcomes, as opposed to failures worth logging loudly.
    pub fn is_expected(&self) -> bool {
        !matches!(self, Self::Storage(_))
    }

    /// Private reply for the originating session, if the topic has one.
    pub fn reply(&self, topic: Topic) -> Option<ServerEvent> {
        let text = match self {
            Self::Storage(_) => "Something went wrong, please try again".to_string(),
            other => other.to_string(),
        };

        match topic {
            Topic::Message => Some(ServerEvent::MessageError(text)),
            Topic::Poll => Some(ServerEvent::PollError(text)),
            Topic::Profile => None,
        }
    }
}
