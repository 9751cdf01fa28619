use axum::Json;
use axum::extract::{Path, State};
use depthcaster_types::roles::Role;
use serde::Serialize;

use crate::error::{ApiError, ApiResult};
use crate::state::{AppState, run_db};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub fid: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pfp_url: Option<String>,
    pub roles: Vec<Role>,
}

/// Profile of a user this service knows about, through curation or a role.
pub async fn get_user(State(state): State<AppState>, Path(fid): Path<u64>) -> ApiResult<Json<UserProfile>> {
    let (user, roles) = run_db(&state, move |db| Ok((db.get_user(fid)?, db.get_roles(fid)?))).await?;
    if user.is_none() && roles.is_empty() {
        return Err(ApiError::not_found(format!("unknown fid {fid}")));
    }

    let (username, display_name, pfp_url) = user
        .map(|u| (u.username, u.display_name, u.pfp_url))
        .unwrap_or_default();
    Ok(Json(UserProfile {
        fid,
        username,
        display_name,
        pfp_url,
        roles,
    }))
}
