//! Folding new casts and reactions into stored curated threads. Shared by
//! the webhook and by direct posting, which can race on the same cast.

use depthcaster_db::models::{Counter, ReplyRow};
use depthcaster_types::cast::{CastPayload, normalize_hash};
use depthcaster_types::events::{ReactionEvent, ReactionKind};
use tracing::debug;

use crate::error::ApiResult;
use crate::notify::{self, KIND_CURATED_QUOTE, KIND_CURATED_REPLY};
use crate::state::{AppState, run_db};

/// Which relations of a new cast to act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Accept {
    pub replies: bool,
    pub quotes: bool,
}

impl Accept {
    pub const ALL: Accept = Accept {
        replies: true,
        quotes: true,
    };
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ingested {
    Reply { curated_cast_hash: String, is_new: bool },
    Quote { curated_cast_hash: String, is_new: bool },
}

impl Ingested {
    pub fn curated_cast_hash(&self) -> &str {
        match self {
            Ingested::Reply { curated_cast_hash, .. } | Ingested::Quote { curated_cast_hash, .. } => {
                curated_cast_hash
            }
        }
    }

    pub fn is_new(&self) -> bool {
        match self {
            Ingested::Reply { is_new, .. } | Ingested::Quote { is_new, .. } => *is_new,
        }
    }
}

/// Store `cast` if it replies to or quotes something inside a curated
/// thread. A cast seen twice only refreshes its stored payload.
pub async fn ingest_cast(state: &AppState, cast: &CastPayload, accept: Accept) -> ApiResult<Option<Ingested>> {
    let owned = cast.clone();
    let outcome = run_db(state, move |db| {
        let cast = owned;
        let author = cast.author.fid;

        if accept.replies {
            if let Some(parent) = cast.parent_hash.as_deref().map(normalize_hash) {
                if let Some(pos) = db.thread_position(&parent)? {
                    let row = ReplyRow::from_cast(cast, &pos.curated_cast_hash, pos.depth + 1);
                    let is_new = db.insert_reply_if_absent(&row)?;
                    if is_new {
                        db.apply_counter_delta(&parent, Counter::Replies, 1)?;
                        db.record_interaction(&pos.curated_cast_hash, &parent, "reply", author)?;
                    } else {
                        db.upsert_reply(&row)?;
                    }
                    return Ok(Some(Ingested::Reply {
                        curated_cast_hash: pos.curated_cast_hash,
                        is_new,
                    }));
                }
            }
        }

        if accept.quotes {
            if let Some(quoted) = cast.quoted_cast_hash().map(normalize_hash) {
                if let Some(pos) = db.thread_position(&quoted)? {
                    let row = ReplyRow::from_cast(cast, &pos.curated_cast_hash, pos.depth + 1);
                    let is_new = db.insert_reply_if_absent(&row)?;
                    if is_new {
                        db.record_interaction(&pos.curated_cast_hash, &quoted, "quote", author)?;
                    } else {
                        db.upsert_reply(&row)?;
                    }
                    return Ok(Some(Ingested::Quote {
                        curated_cast_hash: pos.curated_cast_hash,
                        is_new,
                    }));
                }
            }
        }

        Ok(None)
    })
    .await?;

    if let Some(ingested) = &outcome {
        state.invalidate_feed();
        if ingested.is_new() {
            let kind = match ingested {
                Ingested::Reply { .. } => KIND_CURATED_REPLY,
                Ingested::Quote { .. } => KIND_CURATED_QUOTE,
            };
            notify::notify_curators(state, ingested.curated_cast_hash(), cast, kind).await;
        }
    } else {
        debug!("Cast {} is outside every curated thread", cast.hash);
    }
    Ok(outcome)
}

/// Apply a like or recast (or its removal) to a cast inside a curated
/// thread. Redelivered events change nothing. Returns whether a counter moved.
pub async fn ingest_reaction(state: &AppState, event: &ReactionEvent, created: bool) -> ApiResult<bool> {
    let target = normalize_hash(&event.cast.hash);
    let kind = event.reaction_type;
    let user = event.user.fid;

    let moved = run_db(state, move |db| {
        let Some(pos) = db.thread_position(&target)? else {
            return Ok(false);
        };
        let counter = match kind {
            ReactionKind::Like => Counter::Likes,
            ReactionKind::Recast => Counter::Recasts,
        };

        let changed = if created {
            db.record_interaction(&pos.curated_cast_hash, &target, kind.as_str(), user)?
        } else {
            db.remove_interaction(&target, kind.as_str(), user)?
        };
        if changed {
            db.apply_counter_delta(&target, counter, if created { 1 } else { -1 })?;
        }
        Ok(changed)
    })
    .await?;

    if moved {
        state.invalidate_feed();
    }
    Ok(moved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{StubSource, at, cast, quote, reply, test_state};
    use std::sync::Arc;

    fn reaction(kind: ReactionKind, user: u64, hash: &str) -> ReactionEvent {
        serde_json::from_value(serde_json::json!({
            "reaction_type": kind.as_str(),
            "user": { "fid": user },
            "cast": { "hash": hash },
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn replies_land_under_their_thread() {
        let state = test_state(Arc::new(StubSource::default()));
        state.db.curate_cast(&cast("0xroot", 1, 0), 1, at(1)).unwrap();

        let first = ingest_cast(&state, &reply("0xr1", "0xroot", 2, 2), Accept::ALL).await.unwrap();
        assert_eq!(
            first,
            Some(Ingested::Reply {
                curated_cast_hash: "0xroot".into(),
                is_new: true
            })
        );
        ingest_cast(&state, &reply("0xr2", "0xr1", 3, 3), Accept::ALL).await.unwrap();
        assert_eq!(state.db.get_reply("0xr2").unwrap().unwrap().depth, 2);

        // Same cast again refreshes without double counting.
        let again = ingest_cast(&state, &reply("0xr1", "0xroot", 2, 2), Accept::ALL).await.unwrap();
        assert!(!again.unwrap().is_new());
        let root = state.db.get_curated_cast("0xroot").unwrap().unwrap();
        assert_eq!(root.cast.reply_count(), 1);
        assert_eq!(state.db.list_notifications(1, 10).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn quotes_respect_accept_flags() {
        let state = test_state(Arc::new(StubSource::default()));
        state.db.curate_cast(&cast("0xroot", 1, 0), 1, at(1)).unwrap();
        let q = quote("0xq", "0xroot", 4, 5);

        let none = ingest_cast(&state, &q, Accept { replies: true, quotes: false }).await.unwrap();
        assert!(none.is_none());

        let stored = ingest_cast(&state, &q, Accept::ALL).await.unwrap();
        assert!(matches!(stored, Some(Ingested::Quote { .. })));
        let row = state.db.get_reply("0xq").unwrap().unwrap();
        assert!(row.is_quote);
        assert_eq!(row.quoted_cast_hash.as_deref(), Some("0xroot"));
    }

    #[tokio::test]
    async fn casts_outside_threads_are_ignored() {
        let state = test_state(Arc::new(StubSource::default()));
        let out = ingest_cast(&state, &reply("0xr", "0xnowhere", 2, 1), Accept::ALL).await.unwrap();
        assert!(out.is_none());
    }

    #[tokio::test]
    async fn reactions_are_idempotent() {
        let state = test_state(Arc::new(StubSource::default()));
        state.db.curate_cast(&cast("0xroot", 1, 0), 1, at(1)).unwrap();
        let like = reaction(ReactionKind::Like, 9, "0xROOT");

        assert!(ingest_reaction(&state, &like, true).await.unwrap());
        assert!(!ingest_reaction(&state, &like, true).await.unwrap());
        assert_eq!(state.db.get_curated_cast("0xroot").unwrap().unwrap().cast.likes(), 1);

        assert!(ingest_reaction(&state, &like, false).await.unwrap());
        assert_eq!(state.db.get_curated_cast("0xroot").unwrap().unwrap().cast.likes(), 0);
    }
}
