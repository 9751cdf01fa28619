//! In-app notification fan-out. Delivery is best effort: each recipient is
//! handled in turn and a failure for one never stops the rest.

use depthcaster_db::models::NewNotification;
use depthcaster_types::cast::{CastPayload, normalize_hash};
use tracing::{debug, warn};

use crate::state::{AppState, run_db};

pub const KIND_WATCHED_CAST: &str = "watched-cast";
pub const KIND_CURATED_REPLY: &str = "curated-reply";
pub const KIND_CURATED_QUOTE: &str = "curated-quote";

const PREVIEW_CHARS: usize = 80;

#[derive(Debug, Clone)]
pub struct Notice {
    pub kind: &'static str,
    pub actor_fid: Option<u64>,
    pub cast_hash: Option<String>,
    pub message: String,
}

impl Notice {
    pub fn for_cast(kind: &'static str, cast: &CastPayload, verb: &str) -> Self {
        let name = if cast.author.username.is_empty() {
            format!("fid {}", cast.author.fid)
        } else {
            format!("@{}", cast.author.username)
        };
        Self {
            kind,
            actor_fid: Some(cast.author.fid),
            cast_hash: Some(normalize_hash(&cast.hash)),
            message: format!("{name} {verb}: {}", preview(&cast.text)),
        }
    }
}

fn preview(text: &str) -> String {
    let mut out: String = text.chars().take(PREVIEW_CHARS).collect();
    if text.chars().count() > PREVIEW_CHARS {
        out.push_str("...");
    }
    out
}

/// Notify each recipient in turn, skipping the actor. Returns how many new
/// notifications were stored.
pub async fn fan_out(state: &AppState, recipients: Vec<u64>, notice: Notice) -> usize {
    let mut delivered = 0;
    let mut seen = Vec::with_capacity(recipients.len());

    for fid in recipients {
        if Some(fid) == notice.actor_fid || seen.contains(&fid) {
            continue;
        }
        seen.push(fid);

        let row = NewNotification {
            user_fid: fid,
            kind: notice.kind.to_string(),
            actor_fid: notice.actor_fid,
            cast_hash: notice.cast_hash.clone(),
            message: notice.message.clone(),
        };
        match run_db(state, move |db| db.insert_notification(&row)).await {
            Ok(true) => delivered += 1,
            Ok(false) => debug!("fid {} already notified about {:?}", fid, notice.cast_hash),
            Err(e) => warn!("Failed to notify fid {}: {}", fid, e),
        }
    }
    delivered
}

/// Tell everyone watching the author about a new cast.
pub async fn notify_watchers(state: &AppState, cast: &CastPayload) -> usize {
    let author = cast.author.fid;
    let watchers = match run_db(state, move |db| db.watchers_of(author)).await {
        Ok(w) => w,
        Err(e) => {
            warn!("Failed to load watchers of fid {}: {}", author, e);
            return 0;
        }
    };
    if watchers.is_empty() {
        return 0;
    }
    fan_out(state, watchers, Notice::for_cast(KIND_WATCHED_CAST, cast, "cast")).await
}

/// Tell the curators of `curated_hash` about a new reply or quote in its thread.
pub async fn notify_curators(state: &AppState, curated_hash: &str, cast: &CastPayload, kind: &'static str) -> usize {
    let hash = curated_hash.to_string();
    let curators = match run_db(state, move |db| db.get_curators(&hash)).await {
        Ok(c) => c,
        Err(e) => {
            warn!("Failed to load curators of {}: {}", curated_hash, e);
            return 0;
        }
    };
    let verb = if kind == KIND_CURATED_QUOTE { "quoted a curated cast" } else { "replied in a curated thread" };
    fan_out(state, curators, Notice::for_cast(kind, cast, verb)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{StubSource, at, cast, reply, test_state};
    use std::sync::Arc;

    #[tokio::test]
    async fn watchers_hear_once_and_author_never() {
        let state = test_state(Arc::new(StubSource::default()));
        state.db.add_watch(10, 5).unwrap();
        state.db.add_watch(11, 5).unwrap();
        let c = cast("0xnew", 5, 1);

        assert_eq!(notify_watchers(&state, &c).await, 2);
        // Redelivery of the same cast is absorbed.
        assert_eq!(notify_watchers(&state, &c).await, 0);
        assert_eq!(state.db.list_notifications(10, 10).unwrap().len(), 1);
        assert!(state.db.list_notifications(5, 10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn curators_hear_about_replies() {
        let state = test_state(Arc::new(StubSource::default()));
        state.db.curate_cast(&cast("0xroot", 1, 0), 2, at(1)).unwrap();
        state.db.curate_cast(&cast("0xroot", 1, 0), 3, at(2)).unwrap();

        // The replier curated the cast too and is skipped.
        let r = reply("0xr", "0xroot", 3, 4);
        assert_eq!(notify_curators(&state, "0xroot", &r, KIND_CURATED_REPLY).await, 1);
        let notes = state.db.list_notifications(2, 10).unwrap();
        assert_eq!(notes[0].kind, KIND_CURATED_REPLY);
        assert!(notes[0].message.starts_with("@user3 replied"));
    }

    #[test]
    fn long_text_is_trimmed() {
        let p = preview(&"x".repeat(200));
        assert_eq!(p.chars().count(), PREVIEW_CHARS + 3);
    }
}
