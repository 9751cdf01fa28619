use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use depthcaster_db::DbError;
use depthcaster_types::api::ErrorBody;
use tracing::error;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error(transparent)]
    Internal(anyhow::Error),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        ApiError::BadRequest(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        ApiError::NotFound(msg.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Storage conflicts become 409; everything else is a 500.
impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<DbError>() {
            Ok(DbError::Conflict(msg)) => ApiError::Conflict(msg),
            Err(err) => ApiError::Internal(err),
        }
    }
}

impl From<depthcaster_neynar::NeynarError> for ApiError {
    fn from(err: depthcaster_neynar::NeynarError) -> Self {
        ApiError::Internal(anyhow::Error::new(err).context("external API call failed"))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            ApiError::Internal(err) => {
                error!("Internal error: {:#}", err);
                "internal server error".to_string()
            }
            other => other.to_string(),
        };
        (status, Json(ErrorBody { error: message })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_survives_anyhow() {
        let err: anyhow::Error = DbError::Conflict("slug taken".into()).into();
        let api: ApiError = err.into();
        assert_eq!(api.status(), StatusCode::CONFLICT);
        assert_eq!(api.to_string(), "slug taken");
    }

    #[test]
    fn other_errors_are_internal() {
        let api: ApiError = anyhow::anyhow!("disk on fire").into();
        assert_eq!(api.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
