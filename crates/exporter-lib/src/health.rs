//! Readiness probing of the controller endpoint
//!
//! Readiness is a cached TCP reachability check against the controller
//! host: the dial is bounded and the result reused for a refresh
//! interval, so health endpoints never stall on a slow controller.

use anyhow::{Context, Result};
use serde::Serialize;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;
use url::Url;

/// Readiness as reported to the health endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ReadinessStatus {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone)]
struct ProbeResult {
    ready: bool,
    reason: Option<String>,
    checked_at: Instant,
}

pub struct ReadinessProbe {
    /// `host:port` of the controller.
    target: String,
    dial_timeout: Duration,
    refresh: Duration,
    last: RwLock<Option<ProbeResult>>,
}

impl ReadinessProbe {
    pub fn new(target: String, dial_timeout: Duration, refresh: Duration) -> Self {
        Self {
            target,
            dial_timeout,
            refresh,
            last: RwLock::new(None),
        }
    }

    /// Derive the dial target from the controller endpoint URL, using
    /// the scheme's default port when none is set explicitly.
    pub fn target_from_url(endpoint: &str) -> Result<String> {
        let url = Url::parse(endpoint)
            .with_context(|| format!("invalid controller endpoint {endpoint:?}"))?;
        let host = url
            .host_str()
            .with_context(|| format!("controller endpoint {endpoint:?} has no host"))?;
        let port = url
            .port_or_known_default()
            .with_context(|| format!("controller endpoint {endpoint:?} has no usable port"))?;
        Ok(format!("{host}:{port}"))
    }

    /// Current readiness, refreshing the cached probe when stale.
    pub async fn status(&self) -> ReadinessStatus {
        {
            let last = self.last.read().await;
            if let Some(result) = last.as_ref() {
                if result.checked_at.elapsed() < self.refresh {
                    return ReadinessStatus {
                        ready: result.ready,
                        reason: result.reason.clone(),
                    };
                }
            }
        }

        let result = self.dial().await;
        let status = ReadinessStatus {
            ready: result.ready,
            reason: result.reason.clone(),
        };
        *self.last.write().await = Some(result);
        status
    }

    async fn dial(&self) -> ProbeResult {
        let outcome = tokio::time::timeout(self.dial_timeout, TcpStream::connect(&self.target)).await;
        let (ready, reason) = match outcome {
            Ok(Ok(_)) => (true, None),
            Ok(Err(error)) => (
                false,
                Some(format!("controller {} unreachable: {error}", self.target)),
            ),
            Err(_) => (
                false,
                Some(format!(
                    "controller {} dial timed out after {}ms",
                    self.target,
                    self.dial_timeout.as_millis()
                )),
            ),
        };
        debug!(target = %self.target, ready, "readiness probe");
        ProbeResult {
            ready,
            reason,
            checked_at: Instant::now(),
        }
    }
}
