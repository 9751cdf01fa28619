pub mod cache;
pub mod casts;
pub mod conversation;
pub mod curation;
pub mod error;
pub mod feed;
pub mod ingest;
pub mod middleware;
pub mod notifications;
pub mod notify;
pub mod polls;
pub mod roles;
pub mod state;
pub mod thread;
pub mod users;
pub mod watches;
pub mod webhook;

use axum::Router;
use axum::middleware::from_fn_with_state;
use axum::routing::{delete, get, post};

pub use state::{AppState, AppStateInner, Settings};

/// Every HTTP route. Reads are open to anonymous callers but still pick up
/// the viewer when a valid token is sent; writes require a token.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/api/feed", get(feed::get_feed))
        .route("/api/conversation/{hash}", get(conversation::get_conversation))
        .route("/api/curate", get(curation::get_curation))
        .route("/api/curate/{hash}/tags", get(curation::list_tags))
        .route("/api/poll/{key}", get(polls::get_poll))
        .route("/api/poll/{key}/results", get(polls::results))
        .route("/api/users/{fid}", get(users::get_user))
        .layer(from_fn_with_state(state.clone(), middleware::optional_auth))
        .with_state(state.clone());

    let webhook_routes = Router::new()
        .route("/api/webhooks/neynar", post(webhook::receive))
        .route("/health", get(health))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/api/curate", post(curation::curate).delete(curation::uncurate))
        .route("/api/curate/{hash}/tags", post(curation::add_tag).delete(curation::remove_tag))
        .route("/api/cast/curated/{hash}", delete(curation::delete_curated_cast))
        .route("/api/cast/curated/{hash}/refresh", post(curation::refresh_cast))
        .route("/api/conversation/reply/{hash}", delete(conversation::delete_reply))
        .route("/api/cast", post(casts::publish_cast))
        .route("/api/roles", post(roles::grant_role).delete(roles::revoke_role))
        .route("/api/roles/{fid}", get(roles::get_roles))
        .route(
            "/api/watches",
            get(watches::list_watches)
                .post(watches::add_watch)
                .delete(watches::remove_watch),
        )
        .route("/api/notifications", get(notifications::list_notifications))
        .route("/api/notifications/read", post(notifications::mark_read))
        .route("/api/poll", post(polls::create_poll))
        .route("/api/poll/{key}", delete(polls::delete_poll))
        .route("/api/poll/{key}/respond", post(polls::respond))
        .route("/api/admin/webhooks", post(webhook::register_webhook))
        .layer(from_fn_with_state(state.clone(), middleware::require_auth))
        .with_state(state);

    Router::new()
        .merge(public_routes)
        .merge(webhook_routes)
        .merge(protected_routes)
}

async fn health() -> &'static str {
    "ok"
}

#[cfg(test)]
pub(crate) mod testkit {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use chrono::{DateTime, TimeZone, Utc};
    use depthcaster_db::Database;
    use depthcaster_neynar::{CastSource, Conversation, PublishedCast};
    use depthcaster_types::api::PublishCastRequest;
    use depthcaster_types::cast::{CastEmbed, CastId, CastPayload, normalize_hash};
    use futures_util::FutureExt;
    use futures_util::future::BoxFuture;

    use crate::state::{AppState, AppStateInner, Settings};
    use crate::thread::OrphanPolicy;

    /// In-memory upstream. Counts lookups so tests can see coalescing and
    /// caching at work.
    #[derive(Default)]
    pub struct StubSource {
        casts: Mutex<HashMap<String, CastPayload>>,
        conversations: Mutex<HashMap<String, Conversation>>,
        pub lookups: AtomicUsize,
    }

    impl StubSource {
        pub fn add_cast(&self, cast: CastPayload) {
            let key = normalize_hash(&cast.hash);
            self.casts.lock().unwrap().insert(key, cast);
        }

        pub fn add_conversation(&self, hash: &str, conversation: Conversation) {
            self.conversations
                .lock()
                .unwrap()
                .insert(normalize_hash(hash), conversation);
        }
    }

    impl CastSource for StubSource {
        fn lookup_cast<'a>(&'a self, hash: &'a str) -> BoxFuture<'a, depthcaster_neynar::Result<Option<CastPayload>>> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            let found = self.casts.lock().unwrap().get(&normalize_hash(hash)).cloned();
            async move { Ok(found) }.boxed()
        }

        fn conversation<'a>(
            &'a self,
            hash: &'a str,
            _reply_depth: u32,
        ) -> BoxFuture<'a, depthcaster_neynar::Result<Option<Conversation>>> {
            let found = self.conversations.lock().unwrap().get(&normalize_hash(hash)).cloned();
            async move { Ok(found) }.boxed()
        }

        fn publish_cast<'a>(
            &'a self,
            request: &'a PublishCastRequest,
        ) -> BoxFuture<'a, depthcaster_neynar::Result<PublishedCast>> {
            let hash = format!("0xpub{:x}", request.text.len());
            async move { Ok(PublishedCast { hash, author_fid: None }) }.boxed()
        }
    }

    pub fn test_state(source: Arc<StubSource>) -> AppState {
        let settings = Settings {
            jwt_secret: "test-secret".into(),
            webhook_secrets: vec!["env-secret".into()],
            feed_cache_ttl: Duration::from_secs(60),
            curator_cache_ttl: Duration::from_secs(60),
            orphan_policy: OrphanPolicy::Promote,
        };
        let db = Database::open_in_memory().unwrap();
        Arc::new(AppStateInner::new(db, source, settings))
    }

    pub fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 12, minute, 0).unwrap()
    }

    pub fn cast(hash: &str, author: u64, minute: u32) -> CastPayload {
        serde_json::from_value(serde_json::json!({
            "hash": hash,
            "author": { "fid": author, "username": format!("user{author}") },
            "text": format!("cast {hash}"),
            "timestamp": at(minute),
        }))
        .unwrap()
    }

    pub fn reply(hash: &str, parent: &str, author: u64, minute: u32) -> CastPayload {
        let mut c = cast(hash, author, minute);
        c.parent_hash = Some(parent.to_string());
        c
    }

    pub fn quote(hash: &str, quoted: &str, author: u64, minute: u32) -> CastPayload {
        let mut c = cast(hash, author, minute);
        c.embeds.push(CastEmbed::Cast {
            cast_id: CastId {
                fid: None,
                hash: quoted.to_string(),
            },
            cast: None,
        });
        c
    }
}
