//! HTTP/JSON client for the local platform bridge
//!
//! The bridge process owns the authenticated session and exposes a handful
//! of POST endpoints. Every request and response body is JSON.
//!
//! ## Endpoints
//!
//! | Path          | Request                    | Response                 |
//! |---------------|----------------------------|--------------------------|
//! | `/search`     | `{query, limit}`           | `{results: [RawEntity]}` |
//! | `/resolve`    | `{identifier}`             | `RawEntity`              |
//! | `/join`       | `{identifier}`             | `{}`                     |
//! | `/membership` | `{identifier}`             | `{status}`               |
//! | `/dialogs`    | `{}`                       | `{results: [RawEntity]}` |
//! | `/send`       | `{identifier, text}`       | `{message_id}`           |
//! | `/delete`     | `{identifier, message_id}` | `{}`                     |
//!
//! Errors come back as a non-2xx status with
//! `{"error": {"code", "message", "retry_after"?}}`.

use super::{ClientError, MembershipStatus, ProtocolClient, RawEntity};
use crate::config::GatewayConfig;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
    limit: usize,
}

#[derive(Debug, Serialize)]
struct IdentifierRequest<'a> {
    identifier: &'a str,
}

#[derive(Debug, Serialize)]
struct SendRequest<'a> {
    identifier: &'a str,
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct DeleteRequest<'a> {
    identifier: &'a str,
    message_id: i64,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    message_id: i64,
}

#[derive(Debug, Deserialize)]
struct ResultsResponse {
    #[serde(default)]
    results: Vec<RawEntity>,
}

#[derive(Debug, Deserialize)]
struct MembershipResponse {
    status: MembershipStatus,
}

#[derive(Debug, Deserialize)]
struct Empty {}

#[derive(Debug, Default, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub code: Option<i32>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub retry_after: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

pub struct HttpGatewayClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpGatewayClient {
    pub fn new(config: &GatewayConfig, base_url: &str) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
        })
    }

    async fn post<B, R>(&self, path: &str, body: &B) -> Result<R, ClientError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.http.post(&url).json(body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let body = serde_json::from_str::<ErrorEnvelope>(&text)
                .map(|envelope| envelope.error)
                .unwrap_or_else(|_| ErrorBody {
                    message: Some(text),
                    ..ErrorBody::default()
                });
            return Err(map_error(status.as_u16(), body));
        }

        response
            .json::<R>()
            .await
            .map_err(|e| ClientError::Transport(format!("invalid bridge response from {}: {}", path, e)))
    }
}

/// Translate a bridge error response into the client error taxonomy
pub fn map_error(status: u16, body: ErrorBody) -> ClientError {
    let message = body.message.unwrap_or_else(|| format!("HTTP {}", status));

    if let Some(seconds) = body.retry_after {
        return ClientError::FloodWait { seconds };
    }

    match status {
        404 => ClientError::NotFound(message),
        403 => ClientError::Restricted(message),
        _ => ClientError::Rpc {
            code: body.code.unwrap_or(status as i32),
            message,
        },
    }
}

#[async_trait]
impl ProtocolClient for HttpGatewayClient {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<RawEntity>, ClientError> {
        let response: ResultsResponse = self.post("/search", &SearchRequest { query, limit }).await?;
        log::debug!("🔍 Bridge search '{}' returned {} results", query, response.results.len());
        Ok(response.results)
    }

    async fn resolve(&self, identifier: &str) -> Result<RawEntity, ClientError> {
        self.post("/resolve", &IdentifierRequest { identifier }).await
    }

    async fn join(&self, identifier: &str) -> Result<(), ClientError> {
        let _: Empty = self.post("/join", &IdentifierRequest { identifier }).await?;
        Ok(())
    }

    async fn check_membership(&self, identifier: &str) -> Result<MembershipStatus, ClientError> {
        let response: MembershipResponse =
            self.post("/membership", &IdentifierRequest { identifier }).await?;
        Ok(response.status)
    }

    async fn list_joined_groups(&self) -> Result<Vec<RawEntity>, ClientError> {
        let response: ResultsResponse = self.post("/dialogs", &serde_json::json!({})).await?;
        Ok(response.results)
    }

    async fn send_message(&self, identifier: &str, text: &str) -> Result<i64, ClientError> {
        let response: SendResponse = self.post("/send", &SendRequest { identifier, text }).await?;
        Ok(response.message_id)
    }

    async fn delete_message(&self, identifier: &str, message_id: i64) -> Result<(), ClientError> {
        let _: Empty = self
            .post("/delete", &DeleteRequest { identifier, message_id })
            .await?;
        Ok(())
    }
}
