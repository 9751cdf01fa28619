//! Row types returned by the query modules.
//! `cast_data` columns are already decoded into [`CastPayload`] here, so
//! nothing above the storage layer touches raw JSON.

use chrono::{DateTime, Utc};
use depthcaster_types::cast::{CastPayload, METADATA_PARENT_HASH};
use depthcaster_types::events::WebhookKind;
use depthcaster_types::poll::{PollAnswer, PollType};

#[derive(Debug, Clone)]
pub struct UserRow {
    pub fid: u64,
    pub username: Option<String>,
    pub display_name: Option<String>,
    pub pfp_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CuratedCastRow {
    pub cast_hash: String,
    pub cast: CastPayload,
    pub curated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CurationRow {
    pub cast_hash: String,
    pub curator_fid: u64,
    pub created_at: DateTime<Utc>,
}

/// Phase-one feed row: just enough to order and paginate.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedCandidate {
    pub cast_hash: String,
    pub sort_time: DateTime<Utc>,
}

/// Where the previous feed page stopped. Rows sharing `sort_time` continue
/// below `cast_hash`; without a hash only strictly older rows follow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedCursor {
    pub sort_time: DateTime<Utc>,
    pub cast_hash: Option<String>,
}

impl FeedCursor {
    pub fn after(candidate: &FeedCandidate) -> Self {
        Self {
            sort_time: candidate.sort_time,
            cast_hash: Some(candidate.cast_hash.clone()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UncurateOutcome {
    pub removed: bool,
    pub cast_deleted: bool,
}

/// One reply or quote stored beneath a curated cast.
#[derive(Debug, Clone)]
pub struct ReplyRow {
    pub reply_cast_hash: String,
    pub curated_cast_hash: String,
    pub parent_cast_hash: Option<String>,
    pub root_cast_hash: String,
    pub quoted_cast_hash: Option<String>,
    pub is_quote: bool,
    pub depth: u32,
    pub cast: CastPayload,
}

impl ReplyRow {
    /// Build a thread member from a payload. `depth` is the parent's depth + 1.
    pub fn from_cast(cast: CastPayload, curated_cast_hash: &str, depth: u32) -> Self {
        let quoted = cast.quoted_cast_hash().map(str::to_string);
        Self {
            reply_cast_hash: cast.hash.clone(),
            curated_cast_hash: curated_cast_hash.to_string(),
            parent_cast_hash: cast.parent_hash.clone(),
            root_cast_hash: curated_cast_hash.to_string(),
            is_quote: quoted.is_some(),
            quoted_cast_hash: quoted,
            depth,
            cast,
        }
    }

    /// A display-only row holding the cast a quote replied to.
    pub fn metadata(cast: CastPayload, curated_cast_hash: &str) -> Self {
        let mut row = Self::from_cast(cast, curated_cast_hash, 0);
        row.parent_cast_hash = Some(METADATA_PARENT_HASH.to_string());
        row
    }

    pub fn is_metadata(&self) -> bool {
        self.parent_cast_hash.as_deref() == Some(METADATA_PARENT_HASH)
    }
}

/// Engagement counters kept both as columns and inside `cast_data`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    Likes,
    Recasts,
    Replies,
}

impl Counter {
    pub(crate) fn column(self) -> &'static str {
        match self {
            Counter::Likes => "likes_count",
            Counter::Recasts => "recasts_count",
            Counter::Replies => "replies_count",
        }
    }

    pub(crate) fn json_path(self) -> &'static str {
        match self {
            Counter::Likes => "$.reactions.likes_count",
            Counter::Recasts => "$.reactions.recasts_count",
            Counter::Replies => "$.replies.count",
        }
    }
}

/// Where a cast sits relative to the curated threads this service stores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadPosition {
    pub curated_cast_hash: String,
    /// 0 for the curated cast itself.
    pub depth: u32,
}

#[derive(Debug, Clone)]
pub struct NewPoll {
    pub cast_hash: String,
    pub slug: Option<String>,
    pub question: String,
    pub poll_type: PollType,
    pub choices: Vec<String>,
    pub allocation_budget: u32,
    pub created_by: u64,
    pub options: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct PollOptionRow {
    pub id: i64,
    pub text: String,
    pub order_index: i64,
}

#[derive(Debug, Clone)]
pub struct PollRow {
    pub id: i64,
    pub cast_hash: String,
    pub slug: Option<String>,
    pub question: String,
    pub poll_type: PollType,
    pub choices: Vec<String>,
    pub allocation_budget: u32,
    pub created_by: u64,
    pub created_at: DateTime<Utc>,
    pub options: Vec<PollOptionRow>,
}

#[derive(Debug, Clone)]
pub struct PollResponseRow {
    pub poll_id: i64,
    pub user_fid: u64,
    pub answer: PollAnswer,
}

#[derive(Debug, Clone)]
pub struct NewNotification {
    pub user_fid: u64,
    pub kind: String,
    pub actor_fid: Option<u64>,
    pub cast_hash: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct NotificationRow {
    pub id: i64,
    pub user_fid: u64,
    pub kind: String,
    pub actor_fid: Option<u64>,
    pub cast_hash: Option<String>,
    pub message: String,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct WebhookRow {
    pub id: String,
    pub kind: WebhookKind,
    pub secret: String,
    pub url: Option<String>,
}
