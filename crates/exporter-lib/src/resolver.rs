//! Entity resolution: inventory fetches plus best-effort reverse DNS
//!
//! Each resolve operation rebuilds its mapping from scratch and is
//! independently fallible. Reverse DNS is the slowest and least
//! reliable step, so it is bounded per lookup and a failure only
//! degrades that one entity's FQDN label to empty.

use crate::client::ControllerApi;
use crate::models::{
    ControllerNodeRecord, PoolRecord, ServiceEngineRecord, VirtualServiceRecord,
};
use anyhow::Result;
use async_trait::async_trait;
use hickory_resolver::TokioAsyncResolver;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Best-effort reverse DNS capability. Failure is an empty name set,
/// never an error.
#[async_trait]
pub trait ReverseDns: Send + Sync {
    async fn lookup(&self, address: IpAddr) -> Vec<String>;
}

/// Production resolver backed by hickory's tokio resolver, with a
/// per-lookup timeout so one stuck lookup cannot stall a cycle.
pub struct HickoryReverseDns {
    resolver: TokioAsyncResolver,
    timeout: Duration,
}

impl HickoryReverseDns {
    pub fn new(timeout: Duration) -> Result<Self> {
        let resolver = TokioAsyncResolver::tokio_from_system_conf()?;
        Ok(Self { resolver, timeout })
    }
}

#[async_trait]
impl ReverseDns for HickoryReverseDns {
    async fn lookup(&self, address: IpAddr) -> Vec<String> {
        match tokio::time::timeout(self.timeout, self.resolver.reverse_lookup(address)).await {
            Ok(Ok(response)) => response.iter().map(|ptr| ptr.0.to_utf8()).collect(),
            Ok(Err(error)) => {
                debug!(%address, %error, "reverse lookup failed");
                Vec::new()
            }
            Err(_) => {
                debug!(%address, timeout_ms = self.timeout.as_millis() as u64, "reverse lookup timed out");
                Vec::new()
            }
        }
    }
}

/// Resolves controller inventories into label-bearing records keyed by
/// entity identifier.
pub struct EntityResolver {
    api: Arc<dyn ControllerApi>,
    dns: Arc<dyn ReverseDns>,
}

impl EntityResolver {
    pub fn new(api: Arc<dyn ControllerApi>, dns: Arc<dyn ReverseDns>) -> Self {
        Self { api, dns }
    }

    /// Virtual services, keyed by UUID. The address is the first
    /// configured VIP; the pool identifier is the final path segment of
    /// the pool reference when one is set.
    pub async fn virtual_services(&self) -> Result<HashMap<String, VirtualServiceRecord>> {
        let inventory = self.api.virtual_services().await?;
        let mut records = HashMap::with_capacity(inventory.len());
        for vs in inventory {
            let address = vs
                .vip
                .first()
                .and_then(|vip| vip.ip_address.as_ref())
                .map(|ip| ip.addr.clone())
                .unwrap_or_default();
            let fqdn = self.joined_names(&address).await;
            let pool_id = vs
                .pool_ref
                .as_deref()
                .map(reference_tail)
                .unwrap_or_default()
                .to_string();
            records.insert(
                vs.uuid,
                VirtualServiceRecord {
                    name: vs.name,
                    ip_address: address,
                    fqdn,
                    pool_id,
                },
            );
        }
        Ok(records)
    }

    /// Service engines, keyed by UUID. The address comes from the first
    /// management vNIC network.
    pub async fn service_engines(&self) -> Result<HashMap<String, ServiceEngineRecord>> {
        let inventory = self.api.service_engines().await?;
        let mut records = HashMap::with_capacity(inventory.len());
        for se in inventory {
            let address = se
                .mgmt_vnic
                .as_ref()
                .and_then(|vnic| vnic.vnic_networks.first())
                .map(|network| network.ip.ip_addr.addr.clone())
                .unwrap_or_default();
            let fqdn = self.joined_names(&address).await;
            records.insert(
                se.uuid,
                ServiceEngineRecord {
                    name: se.name,
                    ip_address: address,
                    fqdn,
                },
            );
        }
        Ok(records)
    }

    /// Cluster nodes from the cluster-runtime endpoint, keyed by the
    /// node's VM identifier.
    pub async fn cluster_nodes(&self) -> Result<HashMap<String, ControllerNodeRecord>> {
        let runtime = self.api.cluster_runtime().await?;
        let mut records = HashMap::with_capacity(runtime.nodes.len());
        for node in runtime.nodes {
            let fqdn = self.joined_names(&node.ip.addr).await;
            records.insert(
                node.vm_uuid,
                ControllerNodeRecord {
                    name: node.name,
                    ip_address: node.ip.addr,
                    fqdn,
                },
            );
        }
        Ok(records)
    }

    /// Pools are referenced by virtual services, not monitored
    /// directly; only the name is needed.
    pub async fn pools(&self) -> Result<HashMap<String, PoolRecord>> {
        let inventory = self.api.pools().await?;
        Ok(inventory
            .into_iter()
            .map(|pool| (pool.uuid, PoolRecord { name: pool.name }))
            .collect())
    }

    /// Resolve an address to its reverse names, normalized for label
    /// stability: trailing dots stripped, deduplicated, sorted,
    /// comma-joined.
    async fn joined_names(&self, address: &str) -> String {
        let Ok(ip) = address.parse::<IpAddr>() else {
            return String::new();
        };
        let mut names: Vec<String> = self
            .dns
            .lookup(ip)
            .await
            .into_iter()
            .map(|name| name.strip_suffix('.').unwrap_or(&name).to_string())
            .collect();
        names.sort();
        names.dedup();
        names.join(",")
    }
}

/// Final path segment of a reference URI, e.g.
/// `https://ctrl/api/pool/pool-abc` yields `pool-abc`.
pub fn reference_tail(reference: &str) -> &str {
    reference.rsplit('/').next().unwrap_or(reference)
}
