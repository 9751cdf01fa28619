//! Inbound event webhook and webhook secret registration.
//!
//! Deliveries are signed with HMAC over the raw body. Each registered
//! secret carries a kind; the kinds whose secrets verify a delivery decide
//! what is done with it. Secrets from the environment enable everything.

use std::collections::HashSet;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::{Extension, Json};
use depthcaster_types::api::Claims;
use depthcaster_types::events::{WebhookEnvelope, WebhookEvent, WebhookKind};
use depthcaster_types::roles::Capability;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Sha256, Sha512};
use tracing::{debug, info, warn};

use crate::error::{ApiError, ApiResult};
use crate::ingest::{Accept, ingest_cast, ingest_reaction};
use crate::notify::notify_watchers;
use crate::roles::require_capability;
use crate::state::{AppState, run_db};

pub const SIGNATURE_HEADER: &str = "x-neynar-signature";

const ALL_KINDS: [WebhookKind; 4] = [
    WebhookKind::UserWatch,
    WebhookKind::CuratedReply,
    WebhookKind::CuratedQuote,
    WebhookKind::CuratedReaction,
];

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookAck {
    pub event_type: String,
    pub handled: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterWebhookRequest {
    /// Upstream webhook id; generated when absent.
    #[serde(default)]
    pub id: Option<String>,
    pub kind: WebhookKind,
    pub secret: String,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredWebhook {
    pub id: String,
    pub kind: WebhookKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Check a hex HMAC digest of `body`. SHA-512 and SHA-256 digests are both
/// accepted, told apart by length.
pub fn verify_signature(secret: &str, body: &[u8], signature_hex: &str) -> bool {
    let Ok(signature) = hex::decode(signature_hex.trim()) else {
        return false;
    };
    match signature.len() {
        64 => match Hmac::<Sha512>::new_from_slice(secret.as_bytes()) {
            Ok(mut mac) => {
                mac.update(body);
                mac.verify_slice(&signature).is_ok()
            }
            Err(_) => false,
        },
        32 => match Hmac::<Sha256>::new_from_slice(secret.as_bytes()) {
            Ok(mut mac) => {
                mac.update(body);
                mac.verify_slice(&signature).is_ok()
            }
            Err(_) => false,
        },
        _ => false,
    }
}

/// Kinds enabled for a delivery, or `None` when no secret verifies it.
async fn matched_kinds(state: &AppState, body: &Bytes, signature: &str) -> ApiResult<Option<HashSet<WebhookKind>>> {
    if state
        .webhook_secrets
        .iter()
        .any(|secret| verify_signature(secret, body, signature))
    {
        return Ok(Some(ALL_KINDS.into_iter().collect()));
    }

    let registered = run_db(state, |db| db.list_webhooks()).await?;
    let kinds: HashSet<WebhookKind> = registered
        .iter()
        .filter(|w| verify_signature(&w.secret, body, signature))
        .map(|w| w.kind)
        .collect();
    Ok((!kinds.is_empty()).then_some(kinds))
}

async fn dispatch(state: &AppState, event: WebhookEvent, kinds: &HashSet<WebhookKind>) -> ApiResult<bool> {
    match event {
        WebhookEvent::CastCreated(cast) => {
            let mut handled = false;
            if kinds.contains(&WebhookKind::UserWatch) {
                let notified = notify_watchers(state, &cast).await;
                debug!("Cast {} notified {} watchers", cast.hash, notified);
                handled = true;
            }
            let accept = Accept {
                replies: kinds.contains(&WebhookKind::CuratedReply),
                quotes: kinds.contains(&WebhookKind::CuratedQuote),
            };
            if accept.replies || accept.quotes {
                handled |= ingest_cast(state, &cast, accept).await?.is_some();
            }
            Ok(handled)
        }
        WebhookEvent::ReactionCreated(reaction) if kinds.contains(&WebhookKind::CuratedReaction) => {
            ingest_reaction(state, &reaction, true).await
        }
        WebhookEvent::ReactionDeleted(reaction) if kinds.contains(&WebhookKind::CuratedReaction) => {
            ingest_reaction(state, &reaction, false).await
        }
        _ => Ok(false),
    }
}

pub async fn receive(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> ApiResult<Json<WebhookAck>> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Unauthorized("missing webhook signature".into()))?;

    let Some(kinds) = matched_kinds(&state, &body, signature).await? else {
        warn!("Rejected webhook delivery with an unknown signature");
        return Err(ApiError::Unauthorized("invalid webhook signature".into()));
    };

    let envelope: WebhookEnvelope =
        serde_json::from_slice(&body).map_err(|e| ApiError::bad_request(format!("malformed webhook body: {e}")))?;
    let event_type = envelope.event_type.clone();

    let event = envelope
        .into_event()
        .map_err(|e| ApiError::bad_request(format!("malformed {event_type} payload: {e}")))?;
    let handled = match event {
        Some(event) => dispatch(&state, event, &kinds).await?,
        None => {
            debug!("Ignoring webhook event {}", event_type);
            false
        }
    };

    Ok(Json(WebhookAck { event_type, handled }))
}

pub async fn register_webhook(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<RegisterWebhookRequest>,
) -> ApiResult<(StatusCode, Json<RegisteredWebhook>)> {
    require_capability(&state, claims.fid, Capability::Moderate).await?;
    if req.secret.trim().is_empty() {
        return Err(ApiError::bad_request("secret is required"));
    }

    let id = req
        .id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let (kind, url) = (req.kind, req.url);
    run_db(&state, {
        let (id, url) = (id.clone(), url.clone());
        move |db| db.upsert_webhook(&id, kind, &req.secret, url.as_deref())
    })
    .await?;

    info!("fid {} registered {} webhook {}", claims.fid, kind, id);
    Ok((StatusCode::CREATED, Json(RegisteredWebhook { id, kind, url })))
}
