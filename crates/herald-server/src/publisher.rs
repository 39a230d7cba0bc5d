//! Publishers wired into the dispatcher.

use async_trait::async_trait;
use herald_config::{PublisherConfig, PublisherKind};
use herald_core::{HeraldError, HeraldResult};
use herald_jobs::{PostPayload, PublishError, PublishReceipt, Publisher};
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Publishes posts to a page through the Graph API.
///
/// Text posts go to `/{page}/feed`, posts with an image to `/{page}/photos`.
pub struct GraphPublisher {
    client: Client,
    base_url: String,
    default_page_id: Option<String>,
    access_token: String,
}

/// Success body of the feed and photos edges.
#[derive(Debug, Deserialize)]
struct GraphPostResponse {
    id: String,
    #[serde(default)]
    post_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GraphErrorBody {
    error: GraphErrorDetail,
}

#[derive(Debug, Deserialize)]
struct GraphErrorDetail {
    message: String,
}

impl GraphPublisher {
    /// Creates a publisher from configuration.
    pub fn new(config: &PublisherConfig) -> HeraldResult<Self> {
        let access_token = config
            .access_token
            .clone()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                HeraldError::Configuration("publisher.access_token is required".to_string())
            })?;

        let client = Client::builder()
            .timeout(config.timeout())
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| HeraldError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        if config.page_id.is_none() {
            warn!("publisher.page_id is not set; every post must name a target page");
        }

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            default_page_id: config.page_id.clone(),
            access_token,
        })
    }

    fn url(&self, page_id: &str, edge: &str) -> String {
        format!("{}/{}/{}", self.base_url, page_id, edge)
    }
}

#[async_trait]
impl Publisher for GraphPublisher {
    async fn publish(&self, payload: &PostPayload) -> Result<PublishReceipt, PublishError> {
        let page_id = payload
            .target_page_id
            .as_deref()
            .or(self.default_page_id.as_deref())
            .ok_or_else(|| PublishError::Rejected {
                status: 400,
                message: "No target page for post".to_string(),
            })?;

        let request = match payload.image_path.as_deref() {
            Some(image) => self.client.post(self.url(page_id, "photos")).form(&[
                ("url", image),
                ("caption", payload.message.as_str()),
                ("access_token", self.access_token.as_str()),
            ]),
            None => self.client.post(self.url(page_id, "feed")).form(&[
                ("message", payload.message.as_str()),
                ("access_token", self.access_token.as_str()),
            ]),
        };

        debug!(page_id = %page_id, photo = payload.image_path.is_some(), "Publishing post");

        let response = request.send().await.map_err(|e| PublishError::Transport(e.to_string()))?;
        handle_response(response).await
    }
}

async fn handle_response(response: reqwest::Response) -> Result<PublishReceipt, PublishError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<GraphErrorBody>(&body)
            .map(|e| e.error.message)
            .unwrap_or(body);
        return Err(PublishError::Rejected {
            status: status.as_u16(),
            message,
        });
    }

    let body: GraphPostResponse = response
        .json()
        .await
        .map_err(|e| PublishError::Transport(format!("Unexpected response body: {}", e)))?;

    Ok(PublishReceipt::new(body.post_id.unwrap_or(body.id)))
}

/// Logs the payload and reports success without contacting anything.
#[derive(Debug, Default)]
pub struct LogPublisher;

#[async_trait]
impl Publisher for LogPublisher {
    async fn publish(&self, payload: &PostPayload) -> Result<PublishReceipt, PublishError> {
        info!(
            message = %payload.message,
            image = ?payload.image_path,
            target_page = ?payload.target_page_id,
            "Dry run publish"
        );
        Ok(PublishReceipt::new(format!("dry-run-{}", uuid::Uuid::now_v7())))
    }
}

/// Builds the publisher selected by `publisher.kind`.
pub fn build_publisher(config: &PublisherConfig) -> HeraldResult<Arc<dyn Publisher>> {
    info!(kind = %config.kind, "Creating publisher");
    match config.kind {
        PublisherKind::Graph => Ok(Arc::new(GraphPublisher::new(config)?)),
        PublisherKind::Log => Ok(Arc::new(LogPublisher)),
    }
}
