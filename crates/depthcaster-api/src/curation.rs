use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use chrono::Utc;
use depthcaster_db::models::ReplyRow;
use depthcaster_types::api::{Claims, CurateRequest, CurateResponse, TagRequest};
use depthcaster_types::cast::{CastPayload, normalize_hash};
use depthcaster_types::roles::Capability;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{ApiError, ApiResult};
use crate::roles::require_capability;
use crate::state::{AppState, run_db};

/// How deep to pull an upstream conversation when a cast is first curated.
pub const IMPORT_REPLY_DEPTH: u32 = 5;

const MAX_TAG_LEN: usize = 50;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurationQuery {
    pub cast_hash: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TagsResponse {
    pub cast_hash: String,
    pub tags: Vec<String>,
}

pub(crate) fn parse_hash(raw: &str) -> ApiResult<String> {
    let hash = normalize_hash(raw);
    let hex = hash.strip_prefix("0x").unwrap_or_default();
    if hex.is_empty() || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ApiError::bad_request(format!("invalid cast hash: {raw}")));
    }
    Ok(hash)
}

/// Pull the upstream conversation under `root` into storage. Returns how
/// many replies were written.
pub async fn import_conversation(state: &AppState, root: &str) -> ApiResult<usize> {
    let Some(conversation) = state.neynar.conversation(root, IMPORT_REPLY_DEPTH).await? else {
        return Ok(0);
    };

    let rows: Vec<ReplyRow> = conversation
        .flatten()
        .into_iter()
        .map(|(cast, depth)| ReplyRow::from_cast(cast, root, depth))
        .collect();
    if rows.is_empty() {
        return Ok(0);
    }

    run_db(state, move |db| {
        for row in &rows {
            db.upsert_reply(row)?;
        }
        Ok(rows.len())
    })
    .await
}

async fn curated_payload(state: &AppState, hash: &str) -> ApiResult<CastPayload> {
    let owned = hash.to_string();
    if let Some(row) = run_db(state, move |db| db.get_curated_cast(&owned)).await? {
        return Ok(row.cast);
    }
    state
        .neynar
        .lookup_cast(hash)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("cast {hash} not found")))
}

pub async fn curate(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CurateRequest>,
) -> ApiResult<(StatusCode, Json<CurateResponse>)> {
    require_capability(&state, claims.fid, Capability::Curate).await?;
    let hash = parse_hash(&req.cast_hash)?;

    let cast = curated_payload(&state, &hash).await?;
    let curator = claims.fid;
    let curator_name = claims.username.clone();
    let (was_curated, newly, curators) = run_db(&state, {
        let hash = hash.clone();
        move |db| {
            let was_curated = db.is_curated(&hash)?;
            let author = &cast.author;
            db.upsert_user(
                author.fid,
                Some(author.username.as_str()).filter(|u| !u.is_empty()),
                author.display_name.as_deref(),
                author.pfp_url.as_deref(),
            )?;
            db.upsert_user(curator, Some(curator_name.as_str()), None, None)?;
            let newly = db.curate_cast(&cast, curator, Utc::now())?;
            Ok((was_curated, newly, db.get_curators(&hash)?))
        }
    })
    .await?;
    state.invalidate_feed();

    if !was_curated {
        info!("fid {} curated {}", curator, hash);
        match import_conversation(&state, &hash).await {
            Ok(n) => info!("Imported {} replies under {}", n, hash),
            Err(e) => warn!("Conversation import for {} failed: {}", hash, e),
        }
    }

    let status = if newly { StatusCode::CREATED } else { StatusCode::OK };
    Ok((
        status,
        Json(CurateResponse {
            cast_hash: hash,
            curated: true,
            curators,
        }),
    ))
}

pub async fn uncurate(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CurateRequest>,
) -> ApiResult<Json<CurateResponse>> {
    require_capability(&state, claims.fid, Capability::Curate).await?;
    let hash = parse_hash(&req.cast_hash)?;

    let curator = claims.fid;
    let (outcome, curators) = run_db(&state, {
        let hash = hash.clone();
        move |db| {
            let outcome = db.uncurate_cast(&hash, curator)?;
            Ok((outcome, db.get_curators(&hash)?))
        }
    })
    .await?;
    if !outcome.removed {
        return Err(ApiError::not_found("you have not curated this cast"));
    }
    if outcome.cast_deleted {
        info!("Last curation of {} removed; cast deleted", hash);
    }
    state.invalidate_feed();

    Ok(Json(CurateResponse {
        cast_hash: hash,
        curated: !outcome.cast_deleted,
        curators,
    }))
}

pub async fn get_curation(
    State(state): State<AppState>,
    Query(query): Query<CurationQuery>,
) -> ApiResult<Json<CurateResponse>> {
    let hash = parse_hash(&query.cast_hash)?;
    let curators = run_db(&state, {
        let hash = hash.clone();
        move |db| db.get_curators(&hash)
    })
    .await?;

    Ok(Json(CurateResponse {
        cast_hash: hash,
        curated: !curators.is_empty(),
        curators,
    }))
}

pub async fn delete_curated_cast(
    State(state): State<AppState>,
    Path(hash): Path<String>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<StatusCode> {
    require_capability(&state, claims.fid, Capability::Moderate).await?;
    let hash = parse_hash(&hash)?;

    let deleted = run_db(&state, {
        let hash = hash.clone();
        move |db| db.delete_curated_cast(&hash)
    })
    .await?;
    if !deleted {
        return Err(ApiError::not_found(format!("cast {hash} is not curated")));
    }

    info!("fid {} deleted curated cast {}", claims.fid, hash);
    state.invalidate_feed();
    Ok(StatusCode::NO_CONTENT)
}

/// Re-fetch a curated cast and store its current engagement.
pub async fn refresh_cast(
    State(state): State<AppState>,
    Path(hash): Path<String>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<CastPayload>> {
    require_capability(&state, claims.fid, Capability::Curate).await?;
    let hash = parse_hash(&hash)?;

    let curated = run_db(&state, {
        let hash = hash.clone();
        move |db| db.is_curated(&hash)
    })
    .await?;
    if !curated {
        return Err(ApiError::not_found(format!("cast {hash} is not curated")));
    }

    let fresh = state
        .neynar
        .lookup_cast(&hash)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("cast {hash} no longer exists upstream")))?;

    let stored = fresh.clone();
    run_db(&state, move |db| db.update_cast_engagement(&stored)).await?;
    state.invalidate_feed();
    Ok(Json(fresh))
}

pub async fn list_tags(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> ApiResult<Json<TagsResponse>> {
    let hash = parse_hash(&hash)?;
    let tags = run_db(&state, {
        let hash = hash.clone();
        move |db| db.get_tags(&hash)
    })
    .await?;
    Ok(Json(TagsResponse { cast_hash: hash, tags }))
}

fn parse_tag(raw: &str) -> ApiResult<String> {
    let tag = raw.trim().to_lowercase();
    if tag.is_empty() || tag.chars().count() > MAX_TAG_LEN {
        return Err(ApiError::bad_request(format!(
            "tag must be 1 to {MAX_TAG_LEN} characters"
        )));
    }
    Ok(tag)
}

pub async fn add_tag(
    State(state): State<AppState>,
    Path(hash): Path<String>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<TagRequest>,
) -> ApiResult<(StatusCode, Json<TagsResponse>)> {
    require_capability(&state, claims.fid, Capability::Moderate).await?;
    let hash = parse_hash(&hash)?;
    let tag = parse_tag(&req.tag)?;

    let admin = claims.fid;
    let result = run_db(&state, {
        let hash = hash.clone();
        move |db| {
            if !db.is_curated(&hash)? {
                return Ok(None);
            }
            let added = db.add_tag(&hash, &tag, admin)?;
            Ok(Some((added, db.get_tags(&hash)?)))
        }
    })
    .await?;

    let Some((added, tags)) = result else {
        return Err(ApiError::not_found(format!("cast {hash} is not curated")));
    };
    let status = if added { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(TagsResponse { cast_hash: hash, tags })))
}

pub async fn remove_tag(
    State(state): State<AppState>,
    Path(hash): Path<String>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<TagRequest>,
) -> ApiResult<Json<TagsResponse>> {
    require_capability(&state, claims.fid, Capability::Moderate).await?;
    let hash = parse_hash(&hash)?;
    let tag = parse_tag(&req.tag)?;

    let (removed, tags) = run_db(&state, {
        let hash = hash.clone();
        move |db| {
            let removed = db.remove_tag(&hash, &tag)?;
            Ok((removed, db.get_tags(&hash)?))
        }
    })
    .await?;
    if !removed {
        return Err(ApiError::not_found("tag not found on this cast"));
    }
    Ok(Json(TagsResponse { cast_hash: hash, tags }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{StubSource, cast, reply, test_state};
    use depthcaster_neynar::Conversation;
    use std::sync::Arc;

    #[test]
    fn hashes_are_validated_and_normalized() {
        assert_eq!(parse_hash(" 0xABC ").unwrap(), "0xabc");
        assert!(parse_hash("abc").is_err());
        assert!(parse_hash("0x").is_err());
        assert!(parse_hash("0xzz").is_err());
    }

    #[tokio::test]
    async fn import_writes_replies_with_depths() {
        let source = Arc::new(StubSource::default());
        let convo: Conversation = serde_json::from_value(serde_json::json!({
            "cast": {
                "hash": "0xroot",
                "direct_replies": [
                    { "hash": "0xr1", "parent_hash": "0xroot", "timestamp": "2025-01-01T12:01:00Z",
                      "direct_replies": [
                        { "hash": "0xr2", "parent_hash": "0xr1", "timestamp": "2025-01-01T12:02:00Z" }
                      ] }
                ]
            }
        }))
        .unwrap();
        source.add_conversation("0xroot", convo);
        let state = test_state(source);
        state.db.curate_cast(&cast("0xroot", 1, 0), 1, Utc::now()).unwrap();

        assert_eq!(import_conversation(&state, "0xroot").await.unwrap(), 2);
        let r2 = state.db.get_reply("0xr2").unwrap().unwrap();
        assert_eq!(r2.depth, 2);
        assert_eq!(r2.parent_cast_hash.as_deref(), Some("0xr1"));
    }

    #[tokio::test]
    async fn import_keeps_existing_rows_in_step() {
        let state = test_state(Arc::new(StubSource::default()));
        state.db.curate_cast(&cast("0xroot", 1, 0), 1, Utc::now()).unwrap();
        state
            .db
            .upsert_reply(&ReplyRow::from_cast(reply("0xr1", "0xroot", 2, 1), "0xroot", 1))
            .unwrap();

        // No upstream conversation: nothing written, nothing lost.
        assert_eq!(import_conversation(&state, "0xroot").await.unwrap(), 0);
        assert!(state.db.get_reply("0xr1").unwrap().is_some());
    }
}
