use axum::extract::{Query, State};
use axum::{Extension, Json};
use depthcaster_db::models::NotificationRow;
use depthcaster_types::api::{Claims, MarkReadRequest, NotificationView};
use serde::{Deserialize, Serialize};

use crate::error::ApiResult;
use crate::state::{AppState, run_db};

#[derive(Debug, Deserialize)]
pub struct NotificationQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    50
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadResponse {
    pub updated: usize,
}

fn view(row: NotificationRow) -> NotificationView {
    NotificationView {
        id: row.id,
        kind: row.kind,
        actor_fid: row.actor_fid,
        cast_hash: row.cast_hash,
        message: row.message,
        is_read: row.is_read,
        created_at: row.created_at,
    }
}

pub async fn list_notifications(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<NotificationQuery>,
) -> ApiResult<Json<Vec<NotificationView>>> {
    let fid = claims.fid;
    let limit = query.limit.clamp(1, 200);
    let rows = run_db(&state, move |db| db.list_notifications(fid, limit)).await?;
    Ok(Json(rows.into_iter().map(view).collect()))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<MarkReadRequest>,
) -> ApiResult<Json<MarkReadResponse>> {
    let fid = claims.fid;
    let updated = run_db(&state, move |db| db.mark_notifications_read(fid, req.ids.as_deref())).await?;
    Ok(Json(MarkReadResponse { updated }))
}
