use std::time::Duration;

use depthcaster_types::api::PublishCastRequest;
use depthcaster_types::cast::CastPayload;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::conversation::Conversation;
use crate::{CastSource, NeynarError, PublishedCast, Result};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Deserialize)]
struct CastEnvelope {
    cast: CastPayload,
}

#[derive(Deserialize)]
struct ConversationEnvelope {
    conversation: Conversation,
}

#[derive(Deserialize)]
struct PublishEnvelope {
    cast: PublishedCastBody,
}

#[derive(Deserialize)]
struct PublishedCastBody {
    hash: String,
    #[serde(default)]
    author: Option<PublishedAuthor>,
}

#[derive(Deserialize)]
struct PublishedAuthor {
    fid: u64,
}

/// HTTP client for the Neynar v2 API.
#[derive(Clone)]
pub struct NeynarClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl NeynarClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.client
            .get(format!("{}{}", self.base_url, path))
            .header("x-api-key", &self.api_key)
    }

    /// `Ok(None)` on 404, the body on success, an error otherwise.
    async fn read_optional(resp: Response) -> Result<Option<Value>> {
        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(NeynarError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(Some(resp.json().await?))
    }

    pub async fn fetch_cast(&self, hash: &str) -> Result<Option<CastPayload>> {
        debug!("Looking up cast {}", hash);
        let resp = self
            .get("/v2/farcaster/cast")
            .query(&[("identifier", hash), ("type", "hash")])
            .send()
            .await?;

        let Some(body) = Self::read_optional(resp).await? else {
            return Ok(None);
        };
        let envelope: CastEnvelope =
            serde_json::from_value(body).map_err(|e| NeynarError::Decode(e.to_string()))?;
        Ok(Some(envelope.cast))
    }

    pub async fn fetch_conversation(&self, hash: &str, reply_depth: u32) -> Result<Option<Conversation>> {
        debug!("Fetching conversation {} (depth {})", hash, reply_depth);
        let depth = reply_depth.to_string();
        let resp = self
            .get("/v2/farcaster/cast/conversation")
            .query(&[
                ("identifier", hash),
                ("type", "hash"),
                ("reply_depth", depth.as_str()),
                ("include_chronological_parent_casts", "false"),
            ])
            .send()
            .await?;

        let Some(body) = Self::read_optional(resp).await? else {
            return Ok(None);
        };
        let envelope: ConversationEnvelope =
            serde_json::from_value(body).map_err(|e| NeynarError::Decode(e.to_string()))?;
        Ok(Some(envelope.conversation))
    }

    pub async fn submit_cast(&self, request: &PublishCastRequest) -> Result<PublishedCast> {
        let mut embeds: Vec<Value> = request.embeds.iter().map(|url| json!({ "url": url })).collect();
        if let Some(quoted) = &request.quote_cast_hash {
            embeds.push(json!({ "cast_id": { "hash": quoted } }));
        }

        let mut body = json!({
            "signer_uuid": request.signer_uuid,
            "text": request.text,
            "embeds": embeds,
        });
        if let Some(parent) = &request.parent {
            body["parent"] = json!(parent);
        }
        if let Some(fid) = request.parent_author_fid {
            body["parent_author_fid"] = json!(fid);
        }

        let resp = self
            .client
            .post(format!("{}/v2/farcaster/cast", self.base_url))
            .header("x-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!("Publishing cast failed with {}: {}", status, body);
            return Err(NeynarError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let envelope: PublishEnvelope = resp.json().await?;
        Ok(PublishedCast {
            hash: envelope.cast.hash,
            author_fid: envelope.cast.author.map(|a| a.fid),
        })
    }
}

impl CastSource for NeynarClient {
    fn lookup_cast<'a>(&'a self, hash: &'a str) -> BoxFuture<'a, Result<Option<CastPayload>>> {
        self.fetch_cast(hash).boxed()
    }

    fn conversation<'a>(&'a self, hash: &'a str, reply_depth: u32) -> BoxFuture<'a, Result<Option<Conversation>>> {
        self.fetch_conversation(hash, reply_depth).boxed()
    }

    fn publish_cast<'a>(&'a self, request: &'a PublishCastRequest) -> BoxFuture<'a, Result<PublishedCast>> {
        self.submit_cast(request).boxed()
    }
}
