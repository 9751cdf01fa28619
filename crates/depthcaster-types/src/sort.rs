use serde::{Deserialize, Serialize};

/// How the curated feed computes each cast's sort time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FeedSort {
    /// Latest curation timestamp among eligible curators.
    RecentlyCurated,
    /// Original cast timestamp.
    TimeOfCast,
    /// Latest stored reply, falling back to the cast timestamp.
    #[default]
    RecentReply,
}

impl FeedSort {
    pub fn as_str(self) -> &'static str {
        match self {
            FeedSort::RecentlyCurated => "recently-curated",
            FeedSort::TimeOfCast => "time-of-cast",
            FeedSort::RecentReply => "recent-reply",
        }
    }
}

/// Ordering of root-level replies in a conversation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ThreadSort {
    Newest,
    Engagement,
    Quality,
    #[default]
    Chronological,
}
