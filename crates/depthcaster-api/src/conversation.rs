use axum::extract::{Path, Query, State};
use axum::{Extension, Json};
use depthcaster_types::api::{Claims, ConversationResponse};
use depthcaster_types::roles::Capability;
use depthcaster_types::sort::ThreadSort;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::curation::parse_hash;
use crate::error::{ApiError, ApiResult};
use crate::roles::require_capability;
use crate::state::{AppState, run_db};
use crate::thread::{build_thread, quote_parents_to_resolve};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationQuery {
    #[serde(default)]
    pub sort_by: ThreadSort,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteReplyResponse {
    pub deleted: usize,
}

/// Stored conversation under a curated cast, as a nested tree.
pub async fn load_conversation(state: &AppState, root: &str, sort: ThreadSort) -> ApiResult<ConversationResponse> {
    let owned = root.to_string();
    let (root_cast, rows, stored_parents) = run_db(state, move |db| {
        let root_cast = db.find_cast_payload(&owned)?;
        let rows = db.thread_rows(&owned, sort)?;
        let stored_parents = db.find_cast_payloads(&quote_parents_to_resolve(&rows))?;
        Ok((root_cast, rows, stored_parents))
    })
    .await?;

    if root_cast.is_none() && rows.is_empty() {
        return Err(ApiError::not_found(format!("no conversation stored for {root}")));
    }

    let replies = build_thread(root, rows, sort, state.orphan_policy, &stored_parents);
    Ok(ConversationResponse {
        root_hash: root.to_string(),
        root: root_cast,
        sort_by: sort,
        replies,
    })
}

pub async fn get_conversation(
    State(state): State<AppState>,
    Path(hash): Path<String>,
    Query(query): Query<ConversationQuery>,
) -> ApiResult<Json<ConversationResponse>> {
    let hash = parse_hash(&hash)?;
    Ok(Json(load_conversation(&state, &hash, query.sort_by).await?))
}

/// Remove a stored reply and everything beneath it.
pub async fn delete_reply(
    State(state): State<AppState>,
    Path(hash): Path<String>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<DeleteReplyResponse>> {
    require_capability(&state, claims.fid, Capability::Moderate).await?;
    let hash = parse_hash(&hash)?;

    let deleted = run_db(&state, {
        let hash = hash.clone();
        move |db| db.delete_reply_cascade(&hash)
    })
    .await?;
    if deleted == 0 {
        return Err(ApiError::not_found(format!("reply {hash} not found")));
    }

    info!("fid {} deleted reply {} ({} rows)", claims.fid, hash, deleted);
    state.invalidate_feed();
    Ok(Json(DeleteReplyResponse { deleted }))
}
