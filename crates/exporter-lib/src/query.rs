//! Batched metric queries per entity class
//!
//! One request per class covers every catalog metric of that class in a
//! single round trip: each sub-request selects all entities with a
//! wildcard, asks for the class's entity-type token, and limits the
//! result window to the most recent sample.

use crate::catalog::{Catalog, EntityClass};
use crate::client::ControllerApi;
use crate::models::{CollectionEnvelope, CollectionRequest, MetricRequest, SamplePayload};
use anyhow::Result;
use tracing::debug;

/// All sub-requests share a short fixed step.
pub const QUERY_STEP_SECONDS: u32 = 5;
/// Only the latest sample is published.
pub const SAMPLE_LIMIT: u32 = 1;

/// Wildcard entity selector: one sub-request covers every entity of the
/// class.
const ALL_ENTITIES: &str = "*";

/// One query result for a single (entity, metric) pair.
#[derive(Debug, Clone)]
pub struct MetricSeries {
    pub entity_id: String,
    /// Dotted catalog key the series answers for.
    pub metric_key: String,
    pub tenant_id: String,
    pub units: String,
    /// Ascending-time samples; only the last one is published.
    pub samples: Vec<SamplePayload>,
}

/// Build the batched request covering every catalog metric of `class`.
pub fn build_request(class: EntityClass, catalog: &Catalog) -> CollectionRequest {
    let metric_requests = catalog
        .class_keys(class)
        .map(|key| MetricRequest {
            step: QUERY_STEP_SECONDS,
            limit: SAMPLE_LIMIT,
            entity_uuid: ALL_ENTITIES.to_string(),
            metric_entity: class.metric_entity_token().to_string(),
            metric_id: key.to_string(),
        })
        .collect();
    CollectionRequest { metric_requests }
}

/// Execute the batched query for one class and flatten the nested
/// response into one series per (entity, metric) pair.
pub async fn query_class(
    api: &dyn ControllerApi,
    class: EntityClass,
    catalog: &Catalog,
) -> Result<Vec<MetricSeries>> {
    let request = build_request(class, catalog);
    if request.metric_requests.is_empty() {
        return Ok(Vec::new());
    }
    let envelope = api.metrics_collection(&request).await?;
    let series = flatten(envelope);
    debug!(
        class = class.as_str(),
        requested = request.metric_requests.len(),
        series = series.len(),
        "batched metric query complete"
    );
    Ok(series)
}

fn flatten(envelope: CollectionEnvelope) -> Vec<MetricSeries> {
    envelope
        .series
        .into_values()
        .flatten()
        .map(|payload| MetricSeries {
            entity_id: payload.header.entity_uuid,
            metric_key: payload.header.name,
            tenant_id: payload.header.tenant_uuid,
            units: payload.header.units,
            samples: payload.data,
        })
        .collect()
}
