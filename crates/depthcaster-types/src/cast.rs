use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Parent hash written on reply rows that exist only so a quote cast can show
/// the cast it replied to. Such rows are never thread members.
pub const METADATA_PARENT_HASH: &str = "0x0000000000000000000000000000000000000000";

/// Lowercased form used for hash comparisons.
pub fn normalize_hash(hash: &str) -> String {
    hash.trim().to_ascii_lowercase()
}

/// A cast as returned by the external API and stored as `cast_data`.
///
/// Only the fields this service reads are modelled; anything else in the
/// upstream payload is dropped on deserialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CastPayload {
    pub hash: String,
    #[serde(default)]
    pub author: CastAuthor,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_author: Option<ParentAuthor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_hash: Option<String>,
    #[serde(default)]
    pub embeds: Vec<CastEmbed>,
    #[serde(default)]
    pub reactions: ReactionCounts,
    #[serde(default)]
    pub replies: ReplyCount,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CastAuthor {
    #[serde(default)]
    pub fid: u64,
    #[serde(default)]
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pfp_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experimental: Option<AuthorExperimental>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthorExperimental {
    #[serde(default)]
    pub neynar_user_score: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParentAuthor {
    #[serde(default)]
    pub fid: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CastId {
    #[serde(default)]
    pub fid: Option<u64>,
    pub hash: String,
}

/// Embeds are either a reference to another cast (a quote) or a URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CastEmbed {
    Cast {
        cast_id: CastId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cast: Option<Box<CastPayload>>,
    },
    Url {
        url: String,
    },
    Other(serde_json::Value),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReactionCounts {
    #[serde(default)]
    pub likes_count: i64,
    #[serde(default)]
    pub recasts_count: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplyCount {
    #[serde(default)]
    pub count: i64,
}

impl CastPayload {
    /// Hash of the first embedded cast, if this cast quotes one.
    pub fn quoted_cast_hash(&self) -> Option<&str> {
        self.embeds.iter().find_map(|e| match e {
            CastEmbed::Cast { cast_id, .. } => Some(cast_id.hash.as_str()),
            _ => None,
        })
    }

    pub fn is_quote(&self) -> bool {
        self.quoted_cast_hash().is_some()
    }

    /// True when this quote cast also replies to something other than the
    /// cast it quotes, so a display needs the reply target as well.
    pub fn replies_elsewhere(&self) -> bool {
        match (self.parent_hash.as_deref(), self.quoted_cast_hash()) {
            (Some(parent), Some(quoted)) => normalize_hash(parent) != normalize_hash(quoted),
            _ => false,
        }
    }

    pub fn parent_author_fid(&self) -> Option<u64> {
        self.parent_author.as_ref().and_then(|p| p.fid)
    }

    pub fn likes(&self) -> i64 {
        self.reactions.likes_count
    }

    pub fn recasts(&self) -> i64 {
        self.reactions.recasts_count
    }

    pub fn reply_count(&self) -> i64 {
        self.replies.count
    }

    pub fn author_score(&self) -> f64 {
        self.author
            .score
            .or_else(|| self.author.experimental.as_ref().and_then(|e| e.neynar_user_score))
            .unwrap_or(0.0)
    }

    /// likes + 2*recasts + 3*replies
    pub fn engagement_score(&self) -> i64 {
        self.likes() + 2 * self.recasts() + 3 * self.reply_count()
    }

    /// author_score*100 + min(text_length/5, 100)
    pub fn quality_score(&self) -> f64 {
        let length_bonus = (self.text.chars().count() / 5).min(100) as f64;
        self.author_score() * 100.0 + length_bonus
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> serde_json::Value {
        serde_json::json!({
            "object": "cast",
            "hash": "0xabc",
            "author": {
                "fid": 42,
                "username": "alice",
                "display_name": "Alice",
                "experimental": { "neynar_user_score": 0.9 }
            },
            "text": "hello world",
            "timestamp": "2025-03-01T12:00:00.000Z",
            "parent_hash": "0xdef",
            "parent_author": { "fid": null },
            "embeds": [
                { "url": "https://example.com" },
                { "cast_id": { "fid": 7, "hash": "0x123" } }
            ],
            "reactions": { "likes_count": 3, "recasts_count": 1, "likes": [] },
            "replies": { "count": 2 },
            "channel": { "id": "depth" }
        })
    }

    #[test]
    fn parses_upstream_payload() {
        let cast: CastPayload = serde_json::from_value(sample()).unwrap();
        assert_eq!(cast.author.fid, 42);
        assert_eq!(cast.quoted_cast_hash(), Some("0x123"));
        assert!(cast.replies_elsewhere());
        assert_eq!(cast.parent_author_fid(), None);
        assert_eq!(cast.engagement_score(), 3 + 2 + 6);
    }

    #[test]
    fn quality_caps_length_bonus() {
        let mut cast: CastPayload = serde_json::from_value(sample()).unwrap();
        cast.text = "x".repeat(2000);
        assert!((cast.quality_score() - (90.0 + 100.0)).abs() < 1e-9);
    }

    #[test]
    fn unknown_embed_shapes_do_not_fail() {
        let mut value = sample();
        value["embeds"] = serde_json::json!([{ "weird": true }]);
        let cast: CastPayload = serde_json::from_value(value).unwrap();
        assert!(!cast.is_quote());
    }

    #[test]
    fn quote_of_parent_is_not_elsewhere() {
        let mut value = sample();
        value["parent_hash"] = serde_json::json!("0X123");
        let cast: CastPayload = serde_json::from_value(value).unwrap();
        assert!(!cast.replies_elsewhere());
    }
}
