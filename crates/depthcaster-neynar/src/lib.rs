//! Client for the external social-protocol API.
//!
//! Everything above this crate talks to [`CastSource`]; the HTTP client and
//! the in-flight coalescing wrapper both implement it.

pub mod client;
pub mod coalesce;
pub mod conversation;

use depthcaster_types::api::PublishCastRequest;
use depthcaster_types::cast::CastPayload;
use futures_util::future::BoxFuture;

pub use client::NeynarClient;
pub use coalesce::Coalescing;
pub use conversation::{Conversation, ConversationCast};

#[derive(Debug, thiserror::Error)]
pub enum NeynarError {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("upstream returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unexpected response: {0}")]
    Decode(String),

    #[error("{0}")]
    Coalesced(String),
}

pub type Result<T> = std::result::Result<T, NeynarError>;

/// Result of publishing a cast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedCast {
    pub hash: String,
    pub author_fid: Option<u64>,
}

pub trait CastSource: Send + Sync {
    /// `Ok(None)` when the cast does not exist upstream.
    fn lookup_cast<'a>(&'a self, hash: &'a str) -> BoxFuture<'a, Result<Option<CastPayload>>>;

    fn conversation<'a>(&'a self, hash: &'a str, reply_depth: u32) -> BoxFuture<'a, Result<Option<Conversation>>>;

    fn publish_cast<'a>(&'a self, request: &'a PublishCastRequest) -> BoxFuture<'a, Result<PublishedCast>>;
}
