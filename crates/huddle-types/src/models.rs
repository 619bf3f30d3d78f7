use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who an event is attributed to. Every session carries one; there is no
/// authentication layer, so it is resolved from configuration at connect time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
}

impl Identity {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
        }
    }
}

/// Display details a client supplies after `request profile`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub display_name: String,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: i64,
    pub channel_id: String,
    pub author_id: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// A poll and its fixed, ordered option labels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Poll {
    pub id: i64,
    pub question: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub options: Vec<String>,
}

/// Vote counts derived from the ledger. Never stored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    /// Option labels in creation order.
    pub options: Vec<String>,
    pub votes: BTreeMap<String, u64>,
    pub total: u64,
}

impl Tally {
    /// Build a tally from `(label, count)` rows in option order.
    pub fn from_counts<I, S>(rows: I) -> Self
    where
        I: IntoIterator<Item = (S, u64)>,
        S: Into<String>,
    {
        let mut tally = Tally::default();
        for (label, count) in rows {
            let label = label.into();
            tally.total += count;
            tally.votes.insert(label.clone(), count);
            tally.options.push(label);
        }
        tally
    }

    /// All options at zero, as broadcast right after a poll is created.
    pub fn zero(options: &[String]) -> Self {
        Self::from_counts(options.iter().map(|o| (o.clone(), 0)))
    }

    pub fn count(&self, label: &str) -> Option<u64> {
        self.votes.get(label).copied()
    }
}
