//! Controller management API client
//!
//! The rest of the crate consumes the controller through the
//! [`ControllerApi`] trait: inventory fetches per entity class, the
//! cluster-runtime endpoint, and the batched analytics query. Session
//! handling, authentication and TLS live only in the HTTP
//! implementation behind the trait.

use crate::models::{
    ClusterRuntime, CollectionEnvelope, CollectionRequest, PoolInventory, ServiceEngineInventory,
    VirtualServiceInventory,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;
use url::Url;

const VIRTUAL_SERVICE_PATH: &str = "/api/virtualservice";
const SERVICE_ENGINE_PATH: &str = "/api/serviceengine";
const POOL_PATH: &str = "/api/pool";
const CLUSTER_RUNTIME_PATH: &str = "/api/cluster";
const ANALYTICS_COLLECTION_PATH: &str = "/api/analytics/metrics/collection";

/// Resolved connection parameters for one controller endpoint.
///
/// All fields are externally supplied; absent values are configuration
/// errors handled before this type is constructed.
#[derive(Debug, Clone)]
pub struct ConnectionOpts {
    pub endpoint: String,
    pub username: String,
    pub password: String,
    pub tenant: String,
    pub api_version: String,
}

/// Request/response capability against the controller.
#[async_trait]
pub trait ControllerApi: Send + Sync {
    async fn virtual_services(&self) -> Result<Vec<VirtualServiceInventory>>;
    async fn service_engines(&self) -> Result<Vec<ServiceEngineInventory>>;
    async fn pools(&self) -> Result<Vec<PoolInventory>>;
    async fn cluster_runtime(&self) -> Result<ClusterRuntime>;
    async fn metrics_collection(&self, request: &CollectionRequest) -> Result<CollectionEnvelope>;
}

#[derive(Debug, Deserialize)]
struct PagedResponse<T> {
    #[serde(default)]
    next: Option<String>,
    #[serde(default = "Vec::new")]
    results: Vec<T>,
}

/// HTTP implementation of [`ControllerApi`].
///
/// The underlying `reqwest` client is reused across collection cycles;
/// every request carries credentials plus the tenant and API version
/// headers, so an expired server-side session never surfaces here.
pub struct HttpControllerClient {
    http: reqwest::Client,
    base: Url,
    opts: ConnectionOpts,
}

impl HttpControllerClient {
    /// Build a client for the configured endpoint.
    ///
    /// `request_timeout` bounds every call made through this client.
    pub fn new(opts: ConnectionOpts, request_timeout: Duration, insecure: bool) -> Result<Self> {
        let base = Url::parse(&opts.endpoint)
            .with_context(|| format!("invalid controller endpoint {:?}", opts.endpoint))?;
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .danger_accept_invalid_certs(insecure)
            .build()
            .context("failed to build controller HTTP client")?;
        Ok(Self { http, base, opts })
    }

    fn authenticated(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .basic_auth(&self.opts.username, Some(&self.opts.password))
            .header("X-Avi-Tenant", &self.opts.tenant)
            .header("X-Avi-Version", &self.opts.api_version)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        let response = self
            .authenticated(self.http.get(url.clone()))
            .send()
            .await
            .with_context(|| format!("request to {url} failed"))?
            .error_for_status()
            .with_context(|| format!("controller rejected request to {url}"))?;
        response
            .json::<T>()
            .await
            .with_context(|| format!("failed to decode response from {url}"))
    }

    /// Fetch every page of an inventory listing.
    async fn list_all<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>> {
        let mut results = Vec::new();
        let mut url = self
            .base
            .join(path)
            .with_context(|| format!("invalid inventory path {path}"))?;
        loop {
            let page: PagedResponse<T> = self.get_json(url).await?;
            results.extend(page.results);
            match page.next {
                Some(next) => {
                    url = Url::parse(&next)
                        .with_context(|| format!("invalid pagination link {next:?}"))?;
                }
                None => break,
            }
        }
        debug!(path, count = results.len(), "fetched inventory");
        Ok(results)
    }
}

#[async_trait]
impl ControllerApi for HttpControllerClient {
    async fn virtual_services(&self) -> Result<Vec<VirtualServiceInventory>> {
        self.list_all(VIRTUAL_SERVICE_PATH).await
    }

    async fn service_engines(&self) -> Result<Vec<ServiceEngineInventory>> {
        self.list_all(SERVICE_ENGINE_PATH).await
    }

    async fn pools(&self) -> Result<Vec<PoolInventory>> {
        self.list_all(POOL_PATH).await
    }

    async fn cluster_runtime(&self) -> Result<ClusterRuntime> {
        let url = self
            .base
            .join(CLUSTER_RUNTIME_PATH)
            .context("invalid cluster runtime path")?;
        self.get_json(url).await
    }

    async fn metrics_collection(&self, request: &CollectionRequest) -> Result<CollectionEnvelope> {
        let url = self
            .base
            .join(ANALYTICS_COLLECTION_PATH)
            .context("invalid analytics collection path")?;
        let response = self
            .authenticated(self.http.post(url.clone()).json(request))
            .send()
            .await
            .with_context(|| format!("batched metric query to {url} failed"))?
            .error_for_status()
            .with_context(|| format!("controller rejected batched metric query to {url}"))?;
        response
            .json::<CollectionEnvelope>()
            .await
            .context("failed to decode batched metric query response")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts() -> ConnectionOpts {
        ConnectionOpts {
            endpoint: "https://controller.example.com".to_string(),
            username: "admin".to_string(),
            password: "secret".to_string(),
            tenant: "admin".to_string(),
            api_version: "20.1.6".to_string(),
        }
    }

    #[test]
    fn test_client_rejects_invalid_endpoint() {
        let mut bad = opts();
        bad.endpoint = "not a url".to_string();
        assert!(HttpControllerClient::new(bad, Duration::from_secs(5), false).is_err());
    }

    #[test]
    fn test_client_accepts_valid_endpoint() {
        assert!(HttpControllerClient::new(opts(), Duration::from_secs(5), true).is_ok());
    }

    #[test]
    fn test_paged_response_defaults() {
        let page: PagedResponse<PoolInventory> = serde_json::from_str("{}").unwrap();
        assert!(page.next.is_none());
        assert!(page.results.is_empty());
    }
}
