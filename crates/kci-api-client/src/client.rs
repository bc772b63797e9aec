//! `ApiClient`: the trait every consumer codes against, plus the
//! `reqwest`-backed implementation talking to the real central API.

use async_trait::async_trait;
use kci_core::event::{Channel, Event};
use kci_core::types::Id;
use kci_core::Node;
use serde_json::Value;

use crate::error::ApiError;
use crate::query::NodeFilter;

/// A user/service identity as reported by the central API's `whoami`.
#[derive(Debug, Clone)]
pub struct Whoami {
    pub username: String,
    pub email: String,
}

/// Everything the scheduler, reconciler, ingester and job-retry listener
/// need from the central API: node CRUD, event publish/subscribe and
/// telemetry ingestion.
#[async_trait]
pub trait ApiClient: Send + Sync {
    async fn whoami(&self) -> Result<Whoami, ApiError>;

    async fn get_node(&self, id: &Id) -> Result<Node, ApiError>;
    async fn find_nodes(&self, filter: &NodeFilter) -> Result<Vec<Node>, ApiError>;
    async fn count_nodes(&self, filter: &NodeFilter) -> Result<u64, ApiError>;
    async fn create_node(&self, node: &Node) -> Result<Node, ApiError>;
    async fn update_node(&self, node: &Node) -> Result<Node, ApiError>;

    async fn send_event(&self, channel: Channel, data: Value) -> Result<(), ApiError>;

    /// Subscribe to a channel, filtered server-side (e.g. `{"state":
    /// "done", "kind": "job"}`). Returns an opaque subscription id.
    async fn subscribe(&self, channel: Channel, filters: Value) -> Result<String, ApiError>;
    async fn unsubscribe(&self, sub_id: &str) -> Result<(), ApiError>;
    /// Block until the next event arrives on the subscription, or error
    /// after the underlying transport's own retry budget is exhausted.
    async fn receive_event(&self, sub_id: &str) -> Result<Event, ApiError>;

    async fn emit_telemetry(&self, event: Value) -> Result<(), ApiError>;
}

/// `reqwest`-backed `ApiClient` talking to a real central API instance.
#[derive(Debug, Clone)]
pub struct ReqwestApiClient {
    base_url: String,
    token: String,
    http: reqwest::Client,
}

impl ReqwestApiClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: token.into(),
            http: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url.trim_end_matches('/'))
    }

    async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        if resp.status().is_success() {
            Ok(resp)
        } else {
            let status = resp.status().as_u16();
            let message = resp.text().await.unwrap_or_default();
            Err(ApiError::Status { status, message })
        }
    }
}

#[async_trait]
impl ApiClient for ReqwestApiClient {
    async fn whoami(&self) -> Result<Whoami, ApiError> {
        let resp = self
            .http
            .get(self.url("/whoami"))
            .bearer_auth(&self.token)
            .send()
            .await?;
        let resp = Self::check_status(resp).await?;
        let value: Value = resp.json().await?;
        Ok(Whoami {
            username: value["username"].as_str().unwrap_or_default().to_string(),
            email: value["email"].as_str().unwrap_or_default().to_string(),
        })
    }

    async fn get_node(&self, id: &Id) -> Result<Node, ApiError> {
        let resp = self
            .http
            .get(self.url(&format!("/node/{id}")))
            .bearer_auth(&self.token)
            .send()
            .await?;
        let resp = Self::check_status(resp).await?;
        Ok(resp.json().await?)
    }

    async fn find_nodes(&self, filter: &NodeFilter) -> Result<Vec<Node>, ApiError> {
        let resp = self
            .http
            .get(self.url("/nodes"))
            .bearer_auth(&self.token)
            .query(&filter.to_query_pairs())
            .send()
            .await?;
        let resp = Self::check_status(resp).await?;
        Ok(resp.json().await?)
    }

    async fn count_nodes(&self, filter: &NodeFilter) -> Result<u64, ApiError> {
        let resp = self
            .http
            .get(self.url("/count"))
            .bearer_auth(&self.token)
            .query(&filter.to_query_pairs())
            .send()
            .await?;
        let resp = Self::check_status(resp).await?;
        Ok(resp.json().await?)
    }

    async fn create_node(&self, node: &Node) -> Result<Node, ApiError> {
        let resp = self
            .http
            .post(self.url("/node"))
            .bearer_auth(&self.token)
            .json(node)
            .send()
            .await?;
        let resp = Self::check_status(resp).await?;
        Ok(resp.json().await?)
    }

    async fn update_node(&self, node: &Node) -> Result<Node, ApiError> {
        let resp = self
            .http
            .put(self.url(&format!("/node/{}", node.id)))
            .bearer_auth(&self.token)
            .json(node)
            .send()
            .await?;
        let resp = Self::check_status(resp).await?;
        Ok(resp.json().await?)
    }

    async fn send_event(&self, channel: Channel, data: Value) -> Result<(), ApiError> {
        let resp = self
            .http
            .post(self.url(&format!("/send/{}", channel.as_str())))
            .bearer_auth(&self.token)
            .json(&data)
            .send()
            .await?;
        Self::check_status(resp).await?;
        Ok(())
    }

    async fn subscribe(&self, channel: Channel, filters: Value) -> Result<String, ApiError> {
        let resp = self
            .http
            .post(self.url(&format!("/subscribe/{}", channel.as_str())))
            .bearer_auth(&self.token)
            .json(&filters)
            .send()
            .await?;
        let resp = Self::check_status(resp).await?;
        let value: Value = resp.json().await?;
        Ok(value["id"].as_str().unwrap_or_default().to_string())
    }

    async fn unsubscribe(&self, sub_id: &str) -> Result<(), ApiError> {
        let resp = self
            .http
            .post(self.url(&format!("/unsubscribe/{sub_id}")))
            .bearer_auth(&self.token)
            .send()
            .await?;
        Self::check_status(resp).await?;
        Ok(())
    }

    async fn receive_event(&self, sub_id: &str) -> Result<Event, ApiError> {
        let resp = self
            .http
            .get(self.url(&format!("/listen/{sub_id}")))
            .bearer_auth(&self.token)
            .send()
            .await?;
        let resp = Self::check_status(resp).await?;
        Ok(resp.json().await?)
    }

    async fn emit_telemetry(&self, event: Value) -> Result<(), ApiError> {
        let resp = self
            .http
            .post(self.url("/telemetry"))
            .bearer_auth(&self.token)
            .json(&event)
            .send()
            .await?;
        Self::check_status(resp).await?;
        Ok(())
    }
}
