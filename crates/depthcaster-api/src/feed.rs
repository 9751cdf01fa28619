use std::collections::{BTreeSet, HashMap};

use axum::extract::{Query, State};
use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use depthcaster_db::models::{CurationRow, CuratedCastRow, FeedCandidate, FeedCursor, ReplyRow};
use depthcaster_db::ts;
use depthcaster_types::api::{Claims, FeedItem, FeedResponse};
use depthcaster_types::cast::{CastPayload, normalize_hash};
use depthcaster_types::roles::Role;
use depthcaster_types::sort::FeedSort;
use futures_util::future::join_all;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::curation::parse_hash;
use crate::error::{ApiError, ApiResult};
use crate::state::{AppState, run_db};

pub const DEFAULT_LIMIT: usize = 30;
pub const MAX_LIMIT: usize = 100;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedQuery {
    pub cursor: Option<String>,
    pub limit: Option<u32>,
    #[serde(default)]
    pub sort_by: FeedSort,
    /// Comma-separated FIDs overriding the default curator set.
    pub curator_fids: Option<String>,
    pub viewer_fid: Option<u64>,
}

/// Cursors read `<rfc3339>|<hash>`. A bare timestamp is still accepted and
/// resumes strictly before it.
pub fn parse_cursor(raw: &str) -> ApiResult<FeedCursor> {
    let invalid = || ApiError::bad_request(format!("invalid cursor: {raw}"));
    let (time, hash) = match raw.split_once('|') {
        Some((time, hash)) => (time, Some(parse_hash(hash).map_err(|_| invalid())?)),
        None => (raw, None),
    };
    let sort_time = DateTime::parse_from_rfc3339(time)
        .map_err(|_| invalid())?
        .with_timezone(&Utc);
    Ok(FeedCursor {
        sort_time,
        cast_hash: hash,
    })
}

pub fn encode_cursor(cursor: &FeedCursor) -> String {
    match &cursor.cast_hash {
        Some(hash) => format!("{}|{}", ts(cursor.sort_time), hash),
        None => ts(cursor.sort_time),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeedRequest {
    pub viewer_fid: Option<u64>,
    pub cursor: Option<FeedCursor>,
    pub limit: usize,
    pub sort: FeedSort,
    pub curator_fids: Option<Vec<u64>>,
}

impl FeedRequest {
    pub fn from_query(query: FeedQuery, viewer_fid: Option<u64>) -> ApiResult<Self> {
        let cursor = query
            .cursor
            .as_deref()
            .filter(|c| !c.is_empty())
            .map(parse_cursor)
            .transpose()?;

        let curator_fids = match query.curator_fids.as_deref() {
            None => None,
            Some(raw) => {
                let fids = raw
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(|s| {
                        s.parse::<u64>()
                            .map_err(|_| ApiError::bad_request(format!("invalid curator fid: {s}")))
                    })
                    .collect::<ApiResult<Vec<u64>>>()?;
                (!fids.is_empty()).then_some(fids)
            }
        };

        let limit = query
            .limit
            .map(|l| (l as usize).clamp(1, MAX_LIMIT))
            .unwrap_or(DEFAULT_LIMIT);

        Ok(Self {
            viewer_fid: query.viewer_fid.or(viewer_fid),
            cursor,
            limit,
            sort: query.sort_by,
            curator_fids,
        })
    }

    fn cache_key(&self) -> String {
        format!(
            "{}|{}|{}|{:?}|{:?}",
            self.sort.as_str(),
            self.limit,
            self.cursor.as_ref().map(encode_cursor).unwrap_or_default(),
            self.curator_fids,
            self.viewer_fid
        )
    }
}

/// FIDs holding any role that grants curation, cached briefly.
pub async fn eligible_curators(state: &AppState) -> ApiResult<Vec<u64>> {
    if let Some(fids) = state.curator_cache.get(&()) {
        return Ok(fids);
    }
    let fids = run_db(state, |db| db.fids_with_roles(&Role::curator_class())).await?;
    state.curator_cache.insert((), fids.clone());
    Ok(fids)
}

struct Page {
    candidates: Vec<FeedCandidate>,
    has_more: bool,
    casts: HashMap<String, CuratedCastRow>,
    curations: HashMap<String, Vec<CurationRow>>,
    parents: HashMap<String, CastPayload>,
}

/// Reply target of a curated quote cast that also replies to something else.
fn wanted_parent(cast: &CastPayload) -> Option<String> {
    if cast.replies_elsewhere() {
        cast.parent_hash.as_deref().map(normalize_hash)
    } else {
        None
    }
}

async fn load_page(state: &AppState, req: &FeedRequest, curators: Vec<u64>) -> ApiResult<Page> {
    let sort = req.sort;
    let cursor = req.cursor.clone();
    let limit = req.limit;

    run_db(state, move |db| {
        // One extra row tells us whether another page exists.
        let mut candidates = db.feed_candidates(&curators, sort, cursor.as_ref(), limit + 1)?;
        let has_more = candidates.len() > limit;
        candidates.truncate(limit);

        let hashes: Vec<String> = candidates.iter().map(|c| c.cast_hash.clone()).collect();
        let casts = db.load_curated_casts(&hashes)?;
        let curations = db.curators_for_casts(&hashes)?;

        let wanted: Vec<String> = casts
            .values()
            .filter_map(|row| wanted_parent(&row.cast))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let parents = db.find_cast_payloads(&wanted)?;

        Ok(Page {
            candidates,
            has_more,
            casts,
            curations,
            parents,
        })
    })
    .await
}

/// Fetch reply targets that are not stored locally, in parallel, and keep
/// them as metadata rows under the quote that needed them. Failures only
/// cost the item its parent.
async fn fetch_missing_parents(state: &AppState, page: &mut Page) {
    let mut needed_by: HashMap<String, Vec<String>> = HashMap::new();
    for row in page.casts.values() {
        if let Some(parent) = wanted_parent(&row.cast) {
            if !page.parents.contains_key(&parent) {
                needed_by.entry(parent).or_default().push(row.cast_hash.clone());
            }
        }
    }
    if needed_by.is_empty() {
        return;
    }

    let lookups = needed_by.keys().map(|hash| async move {
        let result = state.neynar.lookup_cast(hash).await;
        (hash.clone(), result)
    });

    let mut to_store = Vec::new();
    for (hash, result) in join_all(lookups).await {
        match result {
            Ok(Some(cast)) => {
                for quote_hash in needed_by.get(&hash).into_iter().flatten() {
                    to_store.push(ReplyRow::metadata(cast.clone(), quote_hash));
                }
                page.parents.insert(hash, cast);
            }
            Ok(None) => warn!("Quote parent {} not found upstream", hash),
            Err(e) => warn!("Failed to fetch quote parent {}: {}", hash, e),
        }
    }

    if to_store.is_empty() {
        return;
    }
    let stored = run_db(state, move |db| {
        for row in &to_store {
            if let Err(e) = db.insert_metadata_reply(row) {
                warn!("Failed to store quote parent {}: {:#}", row.reply_cast_hash, e);
            }
        }
        Ok(())
    })
    .await;
    if let Err(e) = stored {
        warn!("Failed to store quote parents: {}", e);
    }
}

/// Assemble one page of the curated feed.
pub async fn assemble_feed(state: &AppState, req: FeedRequest) -> ApiResult<FeedResponse> {
    let key = req.cache_key();
    if let Some(hit) = state.feed_cache.get(&key) {
        debug!("Feed cache hit for {}", key);
        return Ok(hit);
    }

    let curators = match &req.curator_fids {
        Some(fids) => fids.clone(),
        None => eligible_curators(state).await?,
    };

    let mut page = load_page(state, &req, curators.clone()).await?;
    fetch_missing_parents(state, &mut page).await;

    let next_cursor = if page.has_more {
        page.candidates.last().map(|c| encode_cursor(&FeedCursor::after(c)))
    } else {
        None
    };

    let mut items = Vec::with_capacity(page.candidates.len());
    for candidate in &page.candidates {
        let Some(row) = page.casts.remove(&candidate.cast_hash) else {
            warn!("Curated cast {} has no readable payload; skipping", candidate.cast_hash);
            continue;
        };

        let curations = page.curations.remove(&candidate.cast_hash).unwrap_or_default();
        let fids: Vec<u64> = curations.iter().map(|c| c.curator_fid).collect();
        let curated_by = fids
            .iter()
            .find(|fid| curators.contains(fid))
            .or_else(|| fids.first())
            .copied();
        let viewer_curated = req.viewer_fid.is_some_and(|v| fids.contains(&v));
        let parent_cast = wanted_parent(&row.cast).and_then(|p| page.parents.get(&p).cloned());

        items.push(FeedItem {
            cast: row.cast,
            sort_time: candidate.sort_time,
            curated_by,
            curators: fids,
            viewer_curated,
            parent_cast,
        });
    }

    let response = FeedResponse {
        items,
        next_cursor,
        sort_by: req.sort,
    };
    state.feed_cache.insert(key, response.clone());
    Ok(response)
}

pub async fn get_feed(
    State(state): State<AppState>,
    claims: Option<Extension<Claims>>,
    Query(query): Query<FeedQuery>,
) -> ApiResult<Json<FeedResponse>> {
    let viewer = claims.map(|Extension(c)| c.fid);
    let req = FeedRequest::from_query(query, viewer)?;
    Ok(Json(assemble_feed(&state, req).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{StubSource, at, cast, quote, reply, test_state};
    use std::sync::Arc;
    use std::sync::atomic::Ordering;

    fn request(limit: usize, sort: FeedSort, cursor: Option<FeedCursor>) -> FeedRequest {
        FeedRequest {
            viewer_fid: None,
            cursor,
            limit,
            sort,
            curator_fids: None,
        }
    }

    #[test]
    fn query_parsing_clamps_and_validates() {
        let req = FeedRequest::from_query(
            FeedQuery {
                limit: Some(1000),
                curator_fids: Some("1, 2,".into()),
                ..Default::default()
            },
            Some(9),
        )
        .unwrap();
        assert_eq!(req.limit, MAX_LIMIT);
        assert_eq!(req.curator_fids, Some(vec![1, 2]));
        assert_eq!(req.viewer_fid, Some(9));
        assert_eq!(req.sort, FeedSort::RecentReply);

        let bad = FeedRequest::from_query(
            FeedQuery {
                cursor: Some("yesterday".into()),
                ..Default::default()
            },
            None,
        );
        assert!(matches!(bad, Err(ApiError::BadRequest(_))));
    }

    #[test]
    fn cursor_forms() {
        let full = parse_cursor("2025-01-01T12:07:00.000Z|0xA1").unwrap();
        assert_eq!(full.sort_time, at(7));
        assert_eq!(full.cast_hash.as_deref(), Some("0xa1"));
        assert_eq!(encode_cursor(&full), "2025-01-01T12:07:00.000Z|0xa1");

        let bare = parse_cursor("2025-01-01T12:07:00Z").unwrap();
        assert_eq!(bare.cast_hash, None);

        assert!(parse_cursor("2025-01-01T12:07:00Z|nothex").is_err());
        assert!(parse_cursor("|0xa1").is_err());
    }

    #[tokio::test]
    async fn newer_reply_sorts_first() {
        let state = test_state(Arc::new(StubSource::default()));
        state.db.add_role(1, Role::Curator).unwrap();
        state.db.curate_cast(&cast("0xa", 5, 0), 1, at(1)).unwrap();
        state.db.curate_cast(&cast("0xb", 5, 2), 1, at(3)).unwrap();
        state
            .db
            .upsert_reply(&ReplyRow::from_cast(reply("0xb1", "0xb", 6, 10), "0xb", 1))
            .unwrap();
        state
            .db
            .upsert_reply(&ReplyRow::from_cast(reply("0xa1", "0xa", 6, 20), "0xa", 1))
            .unwrap();

        let feed = assemble_feed(&state, request(10, FeedSort::RecentReply, None)).await.unwrap();
        let order: Vec<_> = feed.items.iter().map(|i| i.cast.hash.as_str()).collect();
        assert_eq!(order, vec!["0xa", "0xb"]);
        assert_eq!(feed.items[0].sort_time, at(20));
        assert!(feed.next_cursor.is_none());
    }

    #[tokio::test]
    async fn pages_are_strictly_older() {
        let state = test_state(Arc::new(StubSource::default()));
        state.db.add_role(1, Role::Curator).unwrap();
        for i in 0..5u32 {
            state
                .db
                .curate_cast(&cast(&format!("0xc{i}"), 5, i), 1, at(10 + i))
                .unwrap();
        }

        let mut cursor = None;
        let mut seen: Vec<DateTime<Utc>> = Vec::new();
        let mut pages = 0;
        loop {
            let page = assemble_feed(&state, request(2, FeedSort::TimeOfCast, cursor))
                .await
                .unwrap();
            pages += 1;
            if let Some(last) = seen.last() {
                assert!(page.items.iter().all(|i| i.sort_time < *last));
            }
            seen.extend(page.items.iter().map(|i| i.sort_time));
            match page.next_cursor {
                Some(next) => cursor = Some(parse_cursor(&next).unwrap()),
                None => break,
            }
        }
        assert_eq!(pages, 3);
        assert_eq!(seen.len(), 5);
    }

    #[tokio::test]
    async fn tied_sort_times_span_pages() {
        let state = test_state(Arc::new(StubSource::default()));
        state.db.add_role(1, Role::Curator).unwrap();
        for h in ["0xa1", "0xa2", "0xa3"] {
            state.db.curate_cast(&cast(h, 5, 7), 1, at(30)).unwrap();
        }

        let mut cursor = None;
        let mut seen: Vec<String> = Vec::new();
        loop {
            let query = FeedQuery {
                cursor: cursor.take(),
                limit: Some(2),
                sort_by: FeedSort::TimeOfCast,
                ..Default::default()
            };
            let req = FeedRequest::from_query(query, None).unwrap();
            let page = assemble_feed(&state, req).await.unwrap();
            seen.extend(page.items.iter().map(|i| i.cast.hash.clone()));
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        assert_eq!(seen, vec!["0xa3", "0xa2", "0xa1"]);
    }

    #[tokio::test]
    async fn quote_parent_is_fetched_once_and_kept() {
        let source = Arc::new(StubSource::default());
        source.add_cast(cast("0xparent", 3, 0));
        let state = test_state(source.clone());
        state.db.add_role(1, Role::Curator).unwrap();

        let mut q = quote("0xq", "0xquoted", 2, 5);
        q.parent_hash = Some("0xparent".into());
        state.db.curate_cast(&q, 1, at(6)).unwrap();

        let feed = assemble_feed(&state, request(10, FeedSort::RecentlyCurated, None)).await.unwrap();
        assert_eq!(
            feed.items[0].parent_cast.as_ref().map(|c| c.hash.as_str()),
            Some("0xparent")
        );

        state.invalidate_feed();
        let again = assemble_feed(&state, request(10, FeedSort::RecentlyCurated, None)).await.unwrap();
        assert!(again.items[0].parent_cast.is_some());
        assert_eq!(source.lookups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_parent_does_not_fail_the_page() {
        let state = test_state(Arc::new(StubSource::default()));
        state.db.add_role(1, Role::Curator).unwrap();
        let mut q = quote("0xq", "0xquoted", 2, 5);
        q.parent_hash = Some("0xgone".into());
        state.db.curate_cast(&q, 1, at(6)).unwrap();

        let feed = assemble_feed(&state, request(10, FeedSort::RecentlyCurated, None)).await.unwrap();
        assert_eq!(feed.items.len(), 1);
        assert!(feed.items[0].parent_cast.is_none());
    }

    #[tokio::test]
    async fn attribution_prefers_eligible_curators() {
        let state = test_state(Arc::new(StubSource::default()));
        state.db.curate_cast(&cast("0xa", 5, 0), 1, at(1)).unwrap();
        state.db.curate_cast(&cast("0xa", 5, 0), 2, at(2)).unwrap();

        let mut req = request(10, FeedSort::RecentlyCurated, None);
        req.curator_fids = Some(vec![2]);
        req.viewer_fid = Some(1);
        let feed = assemble_feed(&state, req).await.unwrap();

        let item = &feed.items[0];
        assert_eq!(item.curators, vec![1, 2]);
        assert_eq!(item.curated_by, Some(2));
        assert!(item.viewer_curated);
    }
}
