use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

use crate::cast::CastPayload;

/// Raw webhook body. `data` is decoded once the event type is known.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEnvelope {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub created_at: Option<i64>,
    pub data: serde_json::Value,
}

/// Events this service reacts to.
#[derive(Debug, Clone)]
pub enum WebhookEvent {
    CastCreated(CastPayload),
    ReactionCreated(ReactionEvent),
    ReactionDeleted(ReactionEvent),
}

impl WebhookEnvelope {
    /// Decode the payload. `Ok(None)` means an event type we ignore.
    pub fn into_event(self) -> Result<Option<WebhookEvent>, serde_json::Error> {
        let event = match self.event_type.as_str() {
            "cast.created" => WebhookEvent::CastCreated(serde_json::from_value(self.data)?),
            "reaction.created" => WebhookEvent::ReactionCreated(serde_json::from_value(self.data)?),
            "reaction.deleted" => WebhookEvent::ReactionDeleted(serde_json::from_value(self.data)?),
            _ => return Ok(None),
        };
        Ok(Some(event))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReactionKind {
    Like,
    Recast,
}

impl ReactionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ReactionKind::Like => "like",
            ReactionKind::Recast => "recast",
        }
    }
}

// Upstream sends either the protobuf enum value (1, 2) or its name.
impl<'de> Deserialize<'de> for ReactionKind {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Num(u8),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Num(1) => Ok(ReactionKind::Like),
            Raw::Num(2) => Ok(ReactionKind::Recast),
            Raw::Text(s) if s.eq_ignore_ascii_case("like") => Ok(ReactionKind::Like),
            Raw::Text(s) if s.eq_ignore_ascii_case("recast") => Ok(ReactionKind::Recast),
            Raw::Num(n) => Err(serde::de::Error::custom(format!("unknown reaction type {n}"))),
            Raw::Text(s) => Err(serde::de::Error::custom(format!("unknown reaction type {s}"))),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReactionUser {
    pub fid: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReactionTarget {
    pub hash: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReactionEvent {
    pub reaction_type: ReactionKind,
    pub user: ReactionUser,
    pub cast: ReactionTarget,
}

/// Purpose tag of a registered webhook, used to route events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WebhookKind {
    UserWatch,
    CuratedReply,
    CuratedQuote,
    CuratedReaction,
}

impl WebhookKind {
    pub fn as_str(self) -> &'static str {
        match self {
            WebhookKind::UserWatch => "user-watch",
            WebhookKind::CuratedReply => "curated-reply",
            WebhookKind::CuratedQuote => "curated-quote",
            WebhookKind::CuratedReaction => "curated-reaction",
        }
    }
}

impl fmt::Display for WebhookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WebhookKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user-watch" => Ok(WebhookKind::UserWatch),
            "curated-reply" => Ok(WebhookKind::CuratedReply),
            "curated-quote" => Ok(WebhookKind::CuratedQuote),
            "curated-reaction" => Ok(WebhookKind::CuratedReaction),
            other => Err(format!("unknown webhook type: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_reaction_with_numeric_type() {
        let env: WebhookEnvelope = serde_json::from_value(serde_json::json!({
            "created_at": 1_700_000_000,
            "type": "reaction.created",
            "data": {
                "object": "reaction",
                "reaction_type": 2,
                "user": { "fid": 9 },
                "cast": { "object": "cast_dehydrated", "hash": "0xaa" }
            }
        }))
        .unwrap();

        match env.into_event().unwrap() {
            Some(WebhookEvent::ReactionCreated(r)) => {
                assert_eq!(r.reaction_type, ReactionKind::Recast);
                assert_eq!(r.user.fid, 9);
                assert_eq!(r.cast.hash, "0xaa");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn ignores_unhandled_event_types() {
        let env: WebhookEnvelope = serde_json::from_value(serde_json::json!({
            "type": "follow.created",
            "data": {}
        }))
        .unwrap();
        assert!(env.into_event().unwrap().is_none());
    }
}
