use std::sync::Arc;
use std::time::Duration;

use depthcaster_db::Database;
use depthcaster_neynar::CastSource;
use depthcaster_types::api::FeedResponse;
use tracing::error;

use crate::cache::TtlCache;
use crate::error::{ApiError, ApiResult};
use crate::thread::OrphanPolicy;

pub type AppState = Arc<AppStateInner>;

/// Runtime knobs the server reads from its environment.
#[derive(Debug, Clone)]
pub struct Settings {
    pub jwt_secret: String,
    /// Accepted in addition to the secrets stored in the `webhooks` table.
    pub webhook_secrets: Vec<String>,
    pub feed_cache_ttl: Duration,
    pub curator_cache_ttl: Duration,
    pub orphan_policy: OrphanPolicy,
}

pub struct AppStateInner {
    pub db: Database,
    pub neynar: Arc<dyn CastSource>,
    pub jwt_secret: String,
    pub webhook_secrets: Vec<String>,
    pub orphan_policy: OrphanPolicy,
    pub feed_cache: TtlCache<String, FeedResponse>,
    pub curator_cache: TtlCache<(), Vec<u64>>,
}

impl AppStateInner {
    pub fn new(db: Database, neynar: Arc<dyn CastSource>, settings: Settings) -> Self {
        Self {
            db,
            neynar,
            jwt_secret: settings.jwt_secret,
            webhook_secrets: settings.webhook_secrets,
            orphan_policy: settings.orphan_policy,
            feed_cache: TtlCache::new(settings.feed_cache_ttl),
            curator_cache: TtlCache::new(settings.curator_cache_ttl),
        }
    }

    /// Forget cached feed pages after anything that changes curation.
    pub fn invalidate_feed(&self) {
        self.feed_cache.clear();
    }

    /// Role changes can alter who counts as a curator.
    pub fn invalidate_curators(&self) {
        self.curator_cache.clear();
        self.feed_cache.clear();
    }
}

/// Run a storage call off the async runtime.
pub async fn run_db<F, T>(state: &AppState, f: F) -> ApiResult<T>
where
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let state = Arc::clone(state);
    tokio::task::spawn_blocking(move || f(&state.db))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Internal(anyhow::anyhow!("storage task failed"))
        })?
        .map_err(ApiError::from)
}
