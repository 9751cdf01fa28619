use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cast::CastPayload;
use crate::poll::PollType;
use crate::roles::Role;
use crate::sort::{FeedSort, ThreadSort};

// -- Session Claims --

/// Session token claims shared by the auth middleware and anything that
/// mints tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub fid: u64,
    pub username: String,
    pub exp: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

// -- Feed --

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedItem {
    pub cast: CastPayload,
    pub sort_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub curated_by: Option<u64>,
    pub curators: Vec<u64>,
    pub viewer_curated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_cast: Option<CastPayload>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedResponse {
    pub items: Vec<FeedItem>,
    pub next_cursor: Option<String>,
    pub sort_by: FeedSort,
}

// -- Conversation --

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadNode {
    pub hash: String,
    pub depth: u32,
    pub is_quote: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quoted_cast_hash: Option<String>,
    pub cast: CastPayload,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_cast: Option<CastPayload>,
    pub children: Vec<ThreadNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationResponse {
    pub root_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<CastPayload>,
    pub sort_by: ThreadSort,
    pub replies: Vec<ThreadNode>,
}

// -- Curation --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurateRequest {
    pub cast_hash: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurateResponse {
    pub cast_hash: String,
    pub curated: bool,
    pub curators: Vec<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagRequest {
    pub tag: String,
}

// -- Posting --

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishCastRequest {
    pub signer_uuid: String,
    pub text: String,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub parent_author_fid: Option<u64>,
    #[serde(default)]
    pub embeds: Vec<String>,
    #[serde(default)]
    pub quote_cast_hash: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishCastResponse {
    pub hash: String,
    pub stored_reply: bool,
}

// -- Roles --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleRequest {
    pub fid: u64,
    pub role: Role,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RolesResponse {
    pub fid: u64,
    pub roles: Vec<Role>,
}

// -- Watches --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchRequest {
    pub watched_fid: u64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchListResponse {
    pub watched_fids: Vec<u64>,
}

// -- Notifications --

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationView {
    pub id: i64,
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor_fid: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cast_hash: Option<String>,
    pub message: String,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadRequest {
    /// Mark everything read when absent.
    #[serde(default)]
    pub ids: Option<Vec<i64>>,
}

// -- Polls --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePollRequest {
    pub cast_hash: String,
    pub question: String,
    pub poll_type: PollType,
    pub options: Vec<String>,
    #[serde(default)]
    pub choices: Option<Vec<String>>,
    #[serde(default)]
    pub allocation_budget: Option<u32>,
    #[serde(default)]
    pub slug: Option<String>,
}
