//! Remote sync endpoint client.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::Serialize;

use crate::config::{StoreConfig, SyncEndpointConfig};
use crate::error::{Error, Result};
use crate::models::{SyncAction, SyncItem};
use crate::util::{compact_text, normalize_text_option};

/// Result of delivering one queue item.
#[derive(Debug, Clone)]
pub enum PushOutcome {
    /// The remote accepted the mutation.
    Accepted,
    /// The remote rejected the mutation as stale and returned its current
    /// representation.
    Conflict {
        remote_data: serde_json::Value,
        remote_timestamp: DateTime<Utc>,
    },
}

/// Abstract remote endpoint the sync manager drains the queue into.
#[async_trait]
pub trait RemoteEndpoint: Send + Sync {
    /// Deliver one mutation. Transport and server failures are errors;
    /// a conflict is a successful call with a `Conflict` outcome.
    async fn push(&self, item: &SyncItem) -> Result<PushOutcome>;
}

#[derive(Serialize)]
struct PushBody<'a> {
    data: &'a serde_json::Value,
    timestamp: DateTime<Utc>,
    version: &'a str,
    checksum: &'a str,
}

/// HTTP implementation of the endpoint contract:
/// `POST {base}/{entityType}` for creates, `PUT {base}/{entityType}/{id}` for
/// updates, `DELETE {base}/{entityType}/{id}` for deletes. A 409 response body
/// carries the current remote representation.
pub struct HttpRemote {
    client: reqwest::Client,
    base_url: String,
    auth_token: Option<String>,
}

impl HttpRemote {
    /// Build a client from the endpoint configuration.
    pub fn new(endpoint: &SyncEndpointConfig, config: &StoreConfig) -> Result<Self> {
        let base_url = normalize_text_option(endpoint.url.clone())
            .ok_or_else(|| Error::InvalidInput("sync endpoint URL is required".to_string()))?;
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_token: normalize_text_option(endpoint.auth_token.clone()),
        })
    }

    fn item_url(&self, item: &SyncItem) -> String {
        let segment = item.entity_type.path_segment();
        match item.action {
            SyncAction::Create => format!("{}/{segment}", self.base_url),
            SyncAction::Update | SyncAction::Delete => {
                format!("{}/{segment}/{}", self.base_url, item.entity_id)
            }
        }
    }
}

#[async_trait]
impl RemoteEndpoint for HttpRemote {
    async fn push(&self, item: &SyncItem) -> Result<PushOutcome> {
        let url = self.item_url(item);
        let mut request = match item.action {
            SyncAction::Create => self.client.post(&url),
            SyncAction::Update => self.client.put(&url),
            SyncAction::Delete => self.client.delete(&url),
        };
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }
        if !matches!(item.action, SyncAction::Delete) {
            request = request.json(&PushBody {
                data: &item.data,
                timestamp: item.timestamp,
                version: &item.version,
                checksum: &item.checksum,
            });
        }

        let response = request.send().await?;
        let status = response.status();

        if status.is_success() {
            return Ok(PushOutcome::Accepted);
        }

        if status == StatusCode::CONFLICT {
            let remote_data: serde_json::Value = response.json().await.unwrap_or_default();
            let remote_timestamp = remote_timestamp_of(&remote_data);
            return Ok(PushOutcome::Conflict {
                remote_data,
                remote_timestamp,
            });
        }

        let body = response.text().await.unwrap_or_default();
        Err(Error::Sync(format!(
            "remote returned HTTP {} for {url}: {}",
            status.as_u16(),
            compact_text(&body)
        )))
    }
}

fn remote_timestamp_of(remote_data: &serde_json::Value) -> DateTime<Utc> {
    for field in ["updated_at", "timestamp"] {
        if let Some(raw) = remote_data.get(field).and_then(serde_json::Value::as_str) {
            if let Ok(parsed) = raw.parse::<DateTime<Utc>>() {
                return parsed;
            }
        }
    }
    Utc::now()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EntityKind;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn config_for(url: &str) -> (SyncEndpointConfig, StoreConfig) {
        (
            SyncEndpointConfig::new(url, "test-token"),
            StoreConfig::default(),
        )
    }

    fn item(action: SyncAction) -> SyncItem {
        SyncItem::new(
            EntityKind::Campaign,
            "c1",
            action,
            json!({"title": "Test"}),
            "1.2.0",
            "checksum",
        )
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn create_posts_to_collection() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/campaigns")
            .match_header("authorization", "Bearer test-token")
            .with_status(201)
            .create_async()
            .await;

        let (endpoint, config) = config_for(&server.url());
        let remote = HttpRemote::new(&endpoint, &config).unwrap();
        let outcome = remote.push(&item(SyncAction::Create)).await.unwrap();
        assert!(matches!(outcome, PushOutcome::Accepted));
        mock.assert_async().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn update_puts_to_item_path() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("PUT", "/campaigns/c1")
            .with_status(200)
            .create_async()
            .await;

        let (endpoint, config) = config_for(&server.url());
        let remote = HttpRemote::new(&endpoint, &config).unwrap();
        remote.push(&item(SyncAction::Update)).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn delete_sends_no_body() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("DELETE", "/campaigns/c1")
            .match_body(mockito::Matcher::Missing)
            .with_status(204)
            .create_async()
            .await;

        let (endpoint, config) = config_for(&server.url());
        let remote = HttpRemote::new(&endpoint, &config).unwrap();
        remote.push(&item(SyncAction::Delete)).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn conflict_carries_remote_representation() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("PUT", "/campaigns/c1")
            .with_status(409)
            .with_header("content-type", "application/json")
            .with_body(r#"{"title":"Remote","updated_at":"2026-08-01T12:00:00Z"}"#)
            .create_async()
            .await;

        let (endpoint, config) = config_for(&server.url());
        let remote = HttpRemote::new(&endpoint, &config).unwrap();
        let outcome = remote.push(&item(SyncAction::Update)).await.unwrap();
        match outcome {
            PushOutcome::Conflict {
                remote_data,
                remote_timestamp,
            } => {
                assert_eq!(remote_data["title"], "Remote");
                assert_eq!(
                    remote_timestamp,
                    "2026-08-01T12:00:00Z".parse::<DateTime<Utc>>().unwrap()
                );
            }
            PushOutcome::Accepted => panic!("expected conflict"),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn server_error_is_an_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/campaigns")
            .with_status(500)
            .with_body("boom")
            .create_async()
            .await;

        let (endpoint, config) = config_for(&server.url());
        let remote = HttpRemote::new(&endpoint, &config).unwrap();
        let error = remote.push(&item(SyncAction::Create)).await;
        assert!(matches!(error, Err(Error::Sync(_))));
    }
}
