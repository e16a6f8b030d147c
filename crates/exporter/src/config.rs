//! Exporter configuration
//!
//! All connection parameters are externally supplied through the
//! environment. The five controller parameters are required; a missing
//! one is a startup error, never a silent default.

use anyhow::{Context, Result};
use exporter_lib::ConnectionOpts;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ExporterConfig {
    /// Controller endpoint URL, e.g. `https://controller.example.com`.
    pub controller_url: String,
    pub username: String,
    pub password: String,
    pub tenant: String,
    pub api_version: String,

    /// Optional comma-separated list of dotted metric keys restricting
    /// what gets published. Absent or empty publishes the full catalog.
    #[serde(default)]
    pub metrics: Option<String>,

    /// Address for the scrape and health endpoints.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Directory holding the three metric definition documents.
    #[serde(default = "default_definitions_dir")]
    pub definitions_dir: String,

    /// Per reverse-DNS lookup bound.
    #[serde(default = "default_dns_timeout_ms")]
    pub dns_timeout_ms: u64,

    /// Bound on every controller API call.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Skip TLS certificate verification against the controller.
    #[serde(default)]
    pub insecure: bool,
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_definitions_dir() -> String {
    "defs".to_string()
}

fn default_dns_timeout_ms() -> u64 {
    500
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl ExporterConfig {
    /// Load configuration from `EXPORTER_`-prefixed environment
    /// variables.
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("EXPORTER"))
            .build()
            .context("failed to read exporter environment")?;
        config.try_deserialize().context(
            "invalid exporter configuration; EXPORTER_CONTROLLER_URL, EXPORTER_USERNAME, \
             EXPORTER_PASSWORD, EXPORTER_TENANT and EXPORTER_API_VERSION are required",
        )
    }

    /// The selection override as a list of keys, empty when everything
    /// should be published.
    pub fn selected_metrics(&self) -> Vec<String> {
        self.metrics
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn connection_opts(&self) -> ConnectionOpts {
        ConnectionOpts {
            endpoint: self.controller_url.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            tenant: self.tenant.clone(),
            api_version: self.api_version.clone(),
        }
    }
}
