//! Wire models for the controller management API and the resolved
//! entity records derived from them

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// An IP address as the controller renders it.
#[derive(Debug, Clone, Deserialize)]
pub struct AddressPayload {
    pub addr: String,
    #[serde(rename = "type", default)]
    pub addr_type: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VipPayload {
    #[serde(default)]
    pub ip_address: Option<AddressPayload>,
}

/// One virtual service inventory entry.
#[derive(Debug, Clone, Deserialize)]
pub struct VirtualServiceInventory {
    pub uuid: String,
    pub name: String,
    #[serde(default)]
    pub vip: Vec<VipPayload>,
    #[serde(default)]
    pub pool_ref: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VnicIpPayload {
    pub ip_addr: AddressPayload,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VnicNetworkPayload {
    pub ip: VnicIpPayload,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MgmtVnicPayload {
    #[serde(default)]
    pub vnic_networks: Vec<VnicNetworkPayload>,
}

/// One service engine inventory entry. The management address lives on
/// the first management vNIC network.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceEngineInventory {
    pub uuid: String,
    pub name: String,
    #[serde(default)]
    pub mgmt_vnic: Option<MgmtVnicPayload>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PoolInventory {
    pub uuid: String,
    pub name: String,
}

/// A node entry from the cluster-runtime endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ClusterNodePayload {
    pub name: String,
    pub ip: AddressPayload,
    pub vm_uuid: String,
    #[serde(default)]
    pub vm_hostname: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClusterRuntime {
    #[serde(default)]
    pub nodes: Vec<ClusterNodePayload>,
}

/// Batched analytics query: one sub-request per metric of one entity class.
#[derive(Debug, Clone, Serialize)]
pub struct CollectionRequest {
    pub metric_requests: Vec<MetricRequest>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricRequest {
    pub step: u32,
    pub limit: u32,
    pub entity_uuid: String,
    pub metric_entity: String,
    pub metric_id: String,
}

/// Response envelope of the analytics collection endpoint: a `series`
/// map keyed by entity, each holding one payload per queried metric.
#[derive(Debug, Clone, Deserialize)]
pub struct CollectionEnvelope {
    #[serde(default)]
    pub series: HashMap<String, Vec<SeriesPayload>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeriesPayload {
    pub header: SeriesHeader,
    #[serde(default)]
    pub data: Vec<SamplePayload>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeriesHeader {
    /// The dotted metric key this series answers for.
    pub name: String,
    pub entity_uuid: String,
    #[serde(default)]
    pub tenant_uuid: String,
    #[serde(default)]
    pub units: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SamplePayload {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// Resolved virtual service metadata used to label its samples.
///
/// All record types are rebuilt from scratch on every collection cycle
/// and default to empty fields, which is what a metric series joins
/// against when its entity is absent from the inventory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VirtualServiceRecord {
    pub name: String,
    pub ip_address: String,
    pub fqdn: String,
    pub pool_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceEngineRecord {
    pub name: String,
    pub ip_address: String,
    pub fqdn: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControllerNodeRecord {
    pub name: String,
    pub ip_address: String,
    pub fqdn: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolRecord {
    pub name: String,
}
