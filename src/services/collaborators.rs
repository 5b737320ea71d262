use std::future::Future;

use serde::Serialize;
use serde_json::Value;

use super::client::ServiceClient;
use super::error::ServiceError;
use super::types::{DetectRequest, DetectionResult, DetectionSource, Snapshot, StoreReceipt};

/// Produces one image per call.
pub trait ImageSource: Send + Sync + 'static {
    fn capture(&self) -> impl Future<Output = Result<Snapshot, ServiceError>> + Send;
}

/// One detection backend.
pub trait Detector: Send + Sync + 'static {
    fn source(&self) -> DetectionSource;

    fn detect(&self, image: &str)
    -> impl Future<Output = Result<DetectionResult, ServiceError>> + Send;
}

/// Durable storage for reports and escalated incident images.
pub trait ReportStore: Send + Sync + 'static {
    fn store_local<B: Serialize + Sync>(
        &self,
        body: &B,
    ) -> impl Future<Output = Result<StoreReceipt, ServiceError>> + Send;

    fn store_escalation<B: Serialize + Sync>(
        &self,
        body: &B,
    ) -> impl Future<Output = Result<StoreReceipt, ServiceError>> + Send;
}

/// Capture service reached over HTTP.
pub struct HttpImageSource {
    client: ServiceClient,
    url: String,
}

impl HttpImageSource {
    pub fn new(client: ServiceClient, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

impl ImageSource for HttpImageSource {
    async fn capture(&self) -> Result<Snapshot, ServiceError> {
        let snapshot: Snapshot = self.client.get_json(&self.url).await?;
        snapshot.validate()
    }
}

/// Detection service (local model or cloud model) reached over HTTP.
pub struct HttpDetector {
    client: ServiceClient,
    url: String,
    source: DetectionSource,
}

impl HttpDetector {
    pub fn new(client: ServiceClient, url: impl Into<String>, source: DetectionSource) -> Self {
        Self {
            client,
            url: url.into(),
            source,
        }
    }
}

impl Detector for HttpDetector {
    fn source(&self) -> DetectionSource {
        self.source
    }

    async fn detect(&self, image: &str) -> Result<DetectionResult, ServiceError> {
        let body: Value = self
            .client
            .post_json(&self.url, &DetectRequest { image })
            .await?;
        Ok(DetectionResult::from_response(self.source, body))
    }
}

/// Local report store and cloud escalation store reached over HTTP.
pub struct HttpReportStore {
    client: ServiceClient,
    local_url: String,
    cloud_url: String,
}

impl HttpReportStore {
    pub fn new(
        client: ServiceClient,
        local_url: impl Into<String>,
        cloud_url: impl Into<String>,
    ) -> Self {
        Self {
            client,
            local_url: local_url.into(),
            cloud_url: cloud_url.into(),
        }
    }
}

impl ReportStore for HttpReportStore {
    async fn store_local<B: Serialize + Sync>(&self, body: &B) -> Result<StoreReceipt, ServiceError> {
        let response: Value = self.client.post_json(&self.local_url, body).await?;
        Ok(StoreReceipt::from_response(&response))
    }

    async fn store_escalation<B: Serialize + Sync>(
        &self,
        body: &B,
    ) -> Result<StoreReceipt, ServiceError> {
        let response: Value = self.client.post_json(&self.cloud_url, body).await?;
        Ok(StoreReceipt::from_response(&response))
    }
}
