/// Inputs and outcomes of store operations. Rows are mapped straight into the
/// huddle-types models; these types only describe what a write did.
use huddle_types::models::{ChatMessage, Poll, Tally};

/// A message about to be inserted. The id and timestamp are assigned by the store.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub author_id: String,
    pub channel_id: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditOutcome {
    /// The stored content after the edit
    Edited(String),
    /// The edit window has closed
    EditRejected,
    NotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoteOutcome {
    /// Vote recorded; carries the tally recomputed inside the same transaction
    Accepted(Tally),
    /// The option does not belong to the poll (or the poll does not exist)
    InvalidOption,
    /// The voter already voted and the policy forbids repeats
    AlreadyVoted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VotePolicy {
    pub allow_multiple_votes_per_voter: bool,
}

impl Default for VotePolicy {
    fn default() -> Self {
        Self {
            allow_multiple_votes_per_voter: true,
        }
    }
}

/// Everything a joining session needs, read in one transaction.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub messages: Vec<ChatMessage>,
    pub polls: Vec<(Poll, Tally)>,
}
