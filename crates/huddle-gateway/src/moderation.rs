/// Substrings that reject a chat message outright.
pub const DEFAULT_DENYLIST: &[&str] = &["badword1", "badword2", "badword3"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Clean,
    Rejected,
}

/// Denylist filter for chat bodies. Matching is case-sensitive substring
/// containment; an empty denylist accepts everything.
#[derive(Debug, Clone)]
pub struct Moderation {
    denylist: Vec<String>,
}

impl Moderation {
    pub fn new<I, S>(denylist: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            denylist: denylist
                .into_iter()
                .map(Into::into)
                .filter(|word: &String| !word.is_empty())
                .collect(),
        }
    }

    pub fn classify(&self, body: &str) -> Verdict {
        if self.denylist.iter().any(|word| body.contains(word.as_str())) {
            Verdict::Rejected
        } else {
            Verdict::Clean
        }
    }
}

impl Default for Moderation {
    fn default() -> Self {
        Self::new(DEFAULT_DENYLIST.iter().copied())
    }
}
