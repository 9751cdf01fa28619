use axum::extract::State;
use axum::http::StatusCode;
use axum::{Extension, Json};
use chrono::Utc;
use depthcaster_neynar::PublishedCast;
use depthcaster_types::api::{Claims, PublishCastRequest, PublishCastResponse};
use depthcaster_types::cast::{CastAuthor, CastEmbed, CastId, CastPayload, ParentAuthor};
use tracing::{info, warn};

use crate::curation::parse_hash;
use crate::error::{ApiError, ApiResult};
use crate::ingest::{Accept, ingest_cast};
use crate::state::AppState;

/// Protocol limit on cast text, in bytes.
const MAX_TEXT_BYTES: usize = 1024;
const MAX_EMBEDS: usize = 2;

fn validate(mut req: PublishCastRequest) -> ApiResult<PublishCastRequest> {
    if req.signer_uuid.trim().is_empty() {
        return Err(ApiError::bad_request("signerUuid is required"));
    }
    if req.text.len() > MAX_TEXT_BYTES {
        return Err(ApiError::bad_request(format!("text exceeds {MAX_TEXT_BYTES} bytes")));
    }
    let embed_count = req.embeds.len() + usize::from(req.quote_cast_hash.is_some());
    if embed_count > MAX_EMBEDS {
        return Err(ApiError::bad_request(format!("at most {MAX_EMBEDS} embeds")));
    }
    if req.text.trim().is_empty() && embed_count == 0 {
        return Err(ApiError::bad_request("cast needs text or an embed"));
    }

    // Parents are cast hashes or channel URLs.
    req.parent = req
        .parent
        .as_deref()
        .map(|p| if p.starts_with("https://") { Ok(p.to_string()) } else { parse_hash(p) })
        .transpose()?;
    req.quote_cast_hash = req.quote_cast_hash.as_deref().map(parse_hash).transpose()?;
    Ok(req)
}

/// Our own snapshot of a cast we just published, used until the webhook
/// delivers the upstream version.
fn local_snapshot(claims: &Claims, req: &PublishCastRequest, published: &PublishedCast) -> CastPayload {
    let mut embeds: Vec<CastEmbed> = req
        .embeds
        .iter()
        .map(|url| CastEmbed::Url { url: url.clone() })
        .collect();
    if let Some(quoted) = &req.quote_cast_hash {
        embeds.push(CastEmbed::Cast {
            cast_id: CastId {
                fid: None,
                hash: quoted.clone(),
            },
            cast: None,
        });
    }

    CastPayload {
        hash: published.hash.clone(),
        author: CastAuthor {
            fid: published.author_fid.unwrap_or(claims.fid),
            username: claims.username.clone(),
            ..Default::default()
        },
        text: req.text.clone(),
        timestamp: Utc::now(),
        parent_hash: req.parent.clone(),
        parent_author: req.parent_author_fid.map(|fid| ParentAuthor { fid: Some(fid) }),
        thread_hash: None,
        embeds,
        reactions: Default::default(),
        replies: Default::default(),
    }
}

pub async fn publish_cast(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<PublishCastRequest>,
) -> ApiResult<(StatusCode, Json<PublishCastResponse>)> {
    let req = validate(req)?;

    let published = state.neynar.publish_cast(&req).await?;
    info!("fid {} published {}", claims.fid, published.hash);

    let snapshot = local_snapshot(&claims, &req, &published);
    let stored_reply = match ingest_cast(&state, &snapshot, Accept::ALL).await {
        Ok(outcome) => outcome.is_some(),
        Err(e) => {
            warn!("Published {} but could not store it: {}", published.hash, e);
            false
        }
    };

    Ok((
        StatusCode::CREATED,
        Json(PublishCastResponse {
            hash: published.hash,
            stored_reply,
        }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(text: &str) -> PublishCastRequest {
        PublishCastRequest {
            signer_uuid: "signer".into(),
            text: text.into(),
            parent: None,
            parent_author_fid: None,
            embeds: vec![],
            quote_cast_hash: None,
        }
    }

    #[test]
    fn validation_rules() {
        assert!(validate(request("hello")).is_ok());
        assert!(validate(request("   ")).is_err());
        assert!(validate(request(&"x".repeat(MAX_TEXT_BYTES + 1))).is_err());

        let mut quoted = request("");
        quoted.quote_cast_hash = Some("0xABC".into());
        assert_eq!(validate(quoted).unwrap().quote_cast_hash.as_deref(), Some("0xabc"));

        let mut bad_parent = request("hi");
        bad_parent.parent = Some("not-a-hash".into());
        assert!(validate(bad_parent).is_err());
    }

    #[test]
    fn snapshot_carries_quote_and_parent() {
        let claims = Claims {
            fid: 4,
            username: "dana".into(),
            exp: 0,
        };
        let mut req = request("nice");
        req.parent = Some("0xparent".into());
        req.quote_cast_hash = Some("0xquoted".into());
        let published = PublishedCast {
            hash: "0xnew".into(),
            author_fid: None,
        };

        let snap = local_snapshot(&claims, &req, &published);
        assert_eq!(snap.author.fid, 4);
        assert_eq!(snap.quoted_cast_hash(), Some("0xquoted"));
        assert!(snap.replies_elsewhere());
    }
}
