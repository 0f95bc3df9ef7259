//! HTTP client for the reference-data collaborators.
//!
//! Products, box sizes and feedback rules live in the box-config store;
//! bulk batches are created by the batch service behind the same base URL.
//! This module is the only place that talks HTTP to either of them — the
//! classification core itself never blocks on I/O.
//!
//! The client does not retry: feedback submission failures are surfaced to
//! the caller as a local error state, retry policy belongs to the operator
//! of the collaborator boundary.

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::config::CatalogConfig;
use crate::model::{BoxType, FeedbackRule, Product};

fn user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("boxfit/{version}")
}

/// Error while talking to a collaborator service.
#[derive(Debug)]
pub enum CatalogError {
    /// Transport-level failure (connect, timeout, decode).
    Transport(reqwest::Error),
    /// The collaborator answered with a non-success status.
    UpstreamStatus { status: StatusCode, body: String },
}

impl std::fmt::Display for CatalogError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CatalogError::Transport(err) => write!(f, "catalog request failed: {}", err),
            CatalogError::UpstreamStatus { status, body } => {
                write!(f, "catalog service responded with {}: {}", status, body)
            }
        }
    }
}

impl std::error::Error for CatalogError {}

impl From<reqwest::Error> for CatalogError {
    fn from(err: reqwest::Error) -> Self {
        CatalogError::Transport(err)
    }
}

/// Wire shape of the add-feedback operation.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NewFeedback {
    pub combo_signature: String,
    pub box_id: String,
    pub fits: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correct_box_id: Option<String>,
}

/// Wire shape of the create-batch operation forwarded to the batch service.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateBatchRequest {
    pub order_numbers: Vec<String>,
    #[serde(rename = "type")]
    pub batch_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cell_ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_name: Option<String>,
}

/// Receipt returned by the batch service for a created batch.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BatchReceipt {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// Snapshot of the reference data one classification call works on.
///
/// Fetched once at call time; the core never observes catalog changes
/// mid-computation.
#[derive(Clone, Debug)]
pub struct CatalogSnapshot {
    pub products: Vec<Product>,
    pub boxes: Vec<BoxType>,
    pub feedback: Vec<FeedbackRule>,
}

/// Client for the box-config and batch collaborators.
#[derive(Clone)]
pub struct CatalogClient {
    http: reqwest::Client,
    base_url: String,
}

impl CatalogClient {
    /// Creates a client with the configured timeout and user agent.
    pub fn new(config: &CatalogConfig) -> Result<Self, CatalogError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .user_agent(user_agent())
            .build()?;
        Ok(Self {
            http,
            base_url: config.base_url().trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn expect_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, CatalogError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "unreadable response body".to_string());
        Err(CatalogError::UpstreamStatus { status, body })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, CatalogError> {
        let response = self.http.get(self.endpoint(path)).send().await?;
        let response = Self::expect_success(response).await?;
        Ok(response.json::<T>().await?)
    }

    /// Loads the product catalog.
    pub async fn fetch_products(&self) -> Result<Vec<Product>, CatalogError> {
        self.get_json("products").await
    }

    /// Loads the box catalog.
    pub async fn fetch_boxes(&self) -> Result<Vec<BoxType>, CatalogError> {
        self.get_json("boxes").await
    }

    /// Loads all persisted feedback rules.
    pub async fn fetch_feedback(&self) -> Result<Vec<FeedbackRule>, CatalogError> {
        self.get_json("box-feedback").await
    }

    /// Fetches products, boxes and feedback concurrently.
    pub async fn fetch_snapshot(&self) -> Result<CatalogSnapshot, CatalogError> {
        let (products, boxes, feedback) = futures::try_join!(
            self.fetch_products(),
            self.fetch_boxes(),
            self.fetch_feedback()
        )?;
        Ok(CatalogSnapshot {
            products,
            boxes,
            feedback,
        })
    }

    /// Persists a confirm/override decision and returns the stored rule.
    pub async fn submit_feedback(
        &self,
        feedback: &NewFeedback,
    ) -> Result<FeedbackRule, CatalogError> {
        let response = self
            .http
            .post(self.endpoint("box-feedback"))
            .json(feedback)
            .send()
            .await?;
        let response = Self::expect_success(response).await?;
        Ok(response.json::<FeedbackRule>().await?)
    }

    /// Forwards a create-batch request to the batch service.
    pub async fn create_batch(
        &self,
        request: &CreateBatchRequest,
    ) -> Result<BatchReceipt, CatalogError> {
        let response = self
            .http
            .post(self.endpoint("batches"))
            .json(request)
            .send()
            .await?;
        let response = Self::expect_success(response).await?;
        Ok(response.json::<BatchReceipt>().await?)
    }
}
