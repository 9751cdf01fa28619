use axum::extract::{Path, State};
use axum::{Extension, Json};
use depthcaster_types::api::{Claims, RoleRequest, RolesResponse};
use depthcaster_types::roles::{Capability, Role, has_capability};
use tracing::info;

use crate::error::{ApiError, ApiResult};
use crate::state::{AppState, run_db};

/// The single authorization gate. Returns the caller's roles on success.
pub async fn require_capability(state: &AppState, fid: u64, capability: Capability) -> ApiResult<Vec<Role>> {
    let roles = run_db(state, move |db| db.get_roles(fid)).await?;
    if has_capability(&roles, capability) {
        Ok(roles)
    } else {
        Err(ApiError::Forbidden(format!("missing {capability:?} permission")))
    }
}

pub async fn get_roles(
    State(state): State<AppState>,
    Path(fid): Path<u64>,
    Extension(_claims): Extension<Claims>,
) -> ApiResult<Json<RolesResponse>> {
    let roles = run_db(&state, move |db| db.get_roles(fid)).await?;
    Ok(Json(RolesResponse { fid, roles }))
}

pub async fn grant_role(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<RoleRequest>,
) -> ApiResult<Json<RolesResponse>> {
    require_capability(&state, claims.fid, req.role.grant_requires()).await?;

    let (fid, role) = (req.fid, req.role);
    let roles = run_db(&state, move |db| {
        db.add_role(fid, role)?;
        db.get_roles(fid)
    })
    .await?;

    info!("fid {} granted {} to fid {}", claims.fid, role, fid);
    state.invalidate_curators();
    Ok(Json(RolesResponse { fid, roles }))
}

pub async fn revoke_role(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<RoleRequest>,
) -> ApiResult<Json<RolesResponse>> {
    require_capability(&state, claims.fid, req.role.grant_requires()).await?;

    let (fid, role) = (req.fid, req.role);
    let (removed, roles) = run_db(&state, move |db| {
        let removed = db.remove_role(fid, role)?;
        Ok((removed, db.get_roles(fid)?))
    })
    .await?;
    if !removed {
        return Err(ApiError::not_found(format!("fid {fid} does not hold {role}")));
    }

    info!("fid {} revoked {} from fid {}", claims.fid, role, fid);
    state.invalidate_curators();
    Ok(Json(RolesResponse { fid, roles }))
}
