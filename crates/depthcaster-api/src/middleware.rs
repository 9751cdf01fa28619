use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;
use axum_extra::headers::authorization::Bearer;
use axum_extra::headers::{Authorization, HeaderMapExt};
use chrono::Utc;
use depthcaster_types::api::Claims;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};

use crate::error::ApiError;
use crate::state::AppState;

/// Issue a session token for `fid`. Sign-in itself happens elsewhere.
pub fn create_token(
    secret: &str,
    fid: u64,
    username: &str,
    ttl: chrono::Duration,
) -> Result<String, jsonwebtoken::errors::Error> {
    let claims = Claims {
        fid,
        username: username.to_string(),
        exp: (Utc::now() + ttl).timestamp().max(0) as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

/// `Ok(None)` when no bearer token was sent; an error when one was sent but
/// does not validate.
fn bearer_claims(secret: &str, headers: &HeaderMap) -> Result<Option<Claims>, ApiError> {
    let Some(Authorization(bearer)) = headers.typed_get::<Authorization<Bearer>>() else {
        return Ok(None);
    };

    let token_data = decode::<Claims>(
        bearer.token(),
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| ApiError::Unauthorized("invalid or expired token".into()))?;

    Ok(Some(token_data.claims))
}

/// Extract and validate the JWT from the Authorization header.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let claims = bearer_claims(&state.jwt_secret, req.headers())?
        .ok_or_else(|| ApiError::Unauthorized("authentication required".into()))?;

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

/// Like [`require_auth`] but lets anonymous requests through.
pub async fn optional_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if let Some(claims) = bearer_claims(&state.jwt_secret, req.headers())? {
        req.extensions_mut().insert(claims);
    }
    Ok(next.run(req).await)
}
