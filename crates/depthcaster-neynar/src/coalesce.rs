use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use depthcaster_types::api::PublishCastRequest;
use depthcaster_types::cast::{CastPayload, normalize_hash};
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared, WeakShared};

use crate::conversation::Conversation;
use crate::{CastSource, NeynarError, PublishedCast, Result};

type Call<T> = BoxFuture<'static, std::result::Result<T, String>>;
type SharedCall<T> = Shared<Call<T>>;
type Registry<T> = Arc<Mutex<HashMap<String, (u64, WeakShared<Call<T>>)>>>;

/// Outstanding calls keyed by request. The map only holds weak handles; an
/// entry goes away when its call resolves or when every waiter has dropped it,
/// so later callers start fresh either way.
struct Inflight<T: Clone> {
    calls: Registry<T>,
    next_id: AtomicU64,
}

/// Removes one registry entry when the call owning it finishes or is dropped.
struct Unregister<T: Clone> {
    calls: Registry<T>,
    key: String,
    id: u64,
}

impl<T: Clone> Drop for Unregister<T> {
    fn drop(&mut self) {
        let mut calls = self.calls.lock().unwrap_or_else(|e| e.into_inner());
        // A newer call may already own the key.
        if calls.get(&self.key).is_some_and(|(id, _)| *id == self.id) {
            calls.remove(&self.key);
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Inflight<T> {
    fn new() -> Self {
        Self {
            calls: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
        }
    }

    fn join<F>(&self, key: String, start: F) -> SharedCall<T>
    where
        F: FnOnce() -> Call<T>,
    {
        let mut calls = self.calls.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = calls.get(&key).and_then(|(_, weak)| weak.upgrade()) {
            return existing;
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let guard = Unregister {
            calls: Arc::clone(&self.calls),
            key: key.clone(),
            id,
        };
        let call = start();
        let shared = async move {
            let out = call.await;
            drop(guard);
            out
        }
        .boxed()
        .shared();

        if let Some(weak) = shared.downgrade() {
            calls.insert(key, (id, weak));
        }
        shared
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Wraps a [`CastSource`] so concurrent identical lookups share one upstream
/// request. Publishing is never coalesced.
pub struct Coalescing {
    inner: Arc<dyn CastSource>,
    casts: Inflight<Option<CastPayload>>,
    conversations: Inflight<Option<Conversation>>,
}

impl Coalescing {
    pub fn new(inner: Arc<dyn CastSource>) -> Self {
        Self {
            inner,
            casts: Inflight::new(),
            conversations: Inflight::new(),
        }
    }
}

impl CastSource for Coalescing {
    fn lookup_cast<'a>(&'a self, hash: &'a str) -> BoxFuture<'a, Result<Option<CastPayload>>> {
        let key = normalize_hash(hash);
        let inner = Arc::clone(&self.inner);
        let owned = key.clone();
        let call = self.casts.join(key, move || {
            async move { inner.lookup_cast(&owned).await.map_err(|e| e.to_string()) }.boxed()
        });
        async move { call.await.map_err(NeynarError::Coalesced) }.boxed()
    }

    fn conversation<'a>(&'a self, hash: &'a str, reply_depth: u32) -> BoxFuture<'a, Result<Option<Conversation>>> {
        let hash = normalize_hash(hash);
        let key = format!("{hash}:{reply_depth}");
        let inner = Arc::clone(&self.inner);
        let call = self.conversations.join(key, move || {
            async move {
                inner
                    .conversation(&hash, reply_depth)
                    .await
                    .map_err(|e| e.to_string())
            }
            .boxed()
        });
        async move { call.await.map_err(NeynarError::Coalesced) }.boxed()
    }

    fn publish_cast<'a>(&'a self, request: &'a PublishCastRequest) -> BoxFuture<'a, Result<PublishedCast>> {
        self.inner.publish_cast(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct SlowSource {
        lookups: AtomicUsize,
    }

    impl CastSource for SlowSource {
        fn lookup_cast<'a>(&'a self, hash: &'a str) -> BoxFuture<'a, Result<Option<CastPayload>>> {
            async move {
                self.lookups.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                let cast = serde_json::from_value(serde_json::json!({ "hash": hash }))
                    .map_err(|e| NeynarError::Decode(e.to_string()))?;
                Ok(Some(cast))
            }
            .boxed()
        }

        fn conversation<'a>(&'a self, _hash: &'a str, _depth: u32) -> BoxFuture<'a, Result<Option<Conversation>>> {
            async { Ok(None) }.boxed()
        }

        fn publish_cast<'a>(&'a self, _request: &'a PublishCastRequest) -> BoxFuture<'a, Result<PublishedCast>> {
            async { Err(NeynarError::Decode("unsupported".into())) }.boxed()
        }
    }

    #[tokio::test]
    async fn concurrent_lookups_share_one_request() {
        let source = Arc::new(SlowSource {
            lookups: AtomicUsize::new(0),
        });
        let coalescing = Coalescing::new(source.clone());

        let (a, b) = tokio::join!(
            coalescing.lookup_cast("0xABC"),
            coalescing.lookup_cast("0xabc")
        );
        assert_eq!(a.unwrap().unwrap().hash, "0xABC");
        assert!(b.unwrap().is_some());
        assert_eq!(source.lookups.load(Ordering::SeqCst), 1);

        // Resolved calls are not cached.
        coalescing.lookup_cast("0xabc").await.unwrap();
        assert_eq!(source.lookups.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn abandoned_lookup_frees_its_slot() {
        let source = Arc::new(SlowSource {
            lookups: AtomicUsize::new(0),
        });
        let coalescing = Coalescing::new(source.clone());

        let abandoned = tokio::time::timeout(Duration::from_millis(5), coalescing.lookup_cast("0xabc")).await;
        assert!(abandoned.is_err());
        assert_eq!(coalescing.casts.len(), 0);

        coalescing.lookup_cast("0xabc").await.unwrap();
        assert_eq!(source.lookups.load(Ordering::SeqCst), 2);
        assert_eq!(coalescing.casts.len(), 0);
    }
}
