use axum::extract::State;
use axum::http::StatusCode;
use axum::{Extension, Json};
use depthcaster_types::api::{Claims, WatchListResponse, WatchRequest};

use crate::error::{ApiError, ApiResult};
use crate::state::{AppState, run_db};

pub async fn list_watches(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<WatchListResponse>> {
    let fid = claims.fid;
    let watched_fids = run_db(&state, move |db| db.watched_by(fid)).await?;
    Ok(Json(WatchListResponse { watched_fids }))
}

pub async fn add_watch(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<WatchRequest>,
) -> ApiResult<(StatusCode, Json<WatchListResponse>)> {
    if req.watched_fid == claims.fid {
        return Err(ApiError::bad_request("cannot watch yourself"));
    }

    let (watcher, watched) = (claims.fid, req.watched_fid);
    let (created, watched_fids) = run_db(&state, move |db| {
        let created = db.add_watch(watcher, watched)?;
        Ok((created, db.watched_by(watcher)?))
    })
    .await?;

    let status = if created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(WatchListResponse { watched_fids })))
}

pub async fn remove_watch(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<WatchRequest>,
) -> ApiResult<Json<WatchListResponse>> {
    let (watcher, watched) = (claims.fid, req.watched_fid);
    let (removed, watched_fids) = run_db(&state, move |db| {
        let removed = db.remove_watch(watcher, watched)?;
        Ok((removed, db.watched_by(watcher)?))
    })
    .await?;
    if !removed {
        return Err(ApiError::not_found("not watching that user"));
    }
    Ok(Json(WatchListResponse { watched_fids }))
}
