//! Metric catalog: per-entity-class default metric definitions and the
//! label schema each published gauge carries
//!
//! The catalog is built once at startup from static definition documents
//! and is immutable afterwards. The gauge store registers exactly one
//! gauge vector per catalog entry, so a partial or malformed catalog is
//! fatal rather than degraded.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Labels published for virtual service metrics.
const VIRTUAL_SERVICE_LABELS: &[&str] = &[
    "name",
    "fqdn",
    "ipaddress",
    "pool",
    "tenant_uuid",
    "units",
    "cluster",
];

/// Labels published for service engine and controller node metrics.
const NODE_LABELS: &[&str] = &[
    "name",
    "entity_uuid",
    "fqdn",
    "ipaddress",
    "tenant_uuid",
    "units",
    "cluster",
];

/// The three monitored object types, each with its own metric catalog
/// and label schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityClass {
    VirtualService,
    ServiceEngine,
    Controller,
}

impl EntityClass {
    pub const ALL: [EntityClass; 3] = [
        EntityClass::VirtualService,
        EntityClass::ServiceEngine,
        EntityClass::Controller,
    ];

    /// Definition document for this class, relative to the definitions
    /// directory.
    pub fn definition_file(&self) -> &'static str {
        match self {
            EntityClass::VirtualService => "virtualservice_metrics.json",
            EntityClass::ServiceEngine => "serviceengine_metrics.json",
            EntityClass::Controller => "controller_metrics.json",
        }
    }

    /// Entity-type token used in batched analytics queries.
    pub fn metric_entity_token(&self) -> &'static str {
        match self {
            EntityClass::VirtualService => "VSERVER_METRICS_ENTITY",
            EntityClass::ServiceEngine => "SE_METRICS_ENTITY",
            EntityClass::Controller => "CONTROLLER_METRICS_ENTITY",
        }
    }

    /// The label schema is a pure function of the entity class.
    pub fn label_names(&self) -> &'static [&'static str] {
        match self {
            EntityClass::VirtualService => VIRTUAL_SERVICE_LABELS,
            EntityClass::ServiceEngine | EntityClass::Controller => NODE_LABELS,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityClass::VirtualService => "virtualservice",
            EntityClass::ServiceEngine => "serviceengine",
            EntityClass::Controller => "controller",
        }
    }
}

/// One metric as loaded from a definition document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricDefinition {
    /// Dotted catalog key, e.g. `l4_client.avg_bandwidth`.
    pub key: String,
    /// Key with separators normalized for exposition.
    pub exposition_name: String,
    pub help: String,
    pub class: EntityClass,
}

/// A metric definition plus the ordered label names its gauge requires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GaugeSpec {
    pub definition: MetricDefinition,
    pub labels: &'static [&'static str],
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read metric definitions from {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed metric definitions in {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("requested metrics not present in the catalog: {}", keys.join(", "))]
    UnknownMetrics { keys: Vec<String> },
}

#[derive(Debug, Deserialize)]
struct DefinitionRecord {
    metric: String,
    help: String,
}

/// The full set of publishable metrics, keyed by dotted catalog key.
///
/// Backed by a `BTreeMap` so iteration, and therefore gauge
/// registration, is deterministic across builds from the same sources.
#[derive(Debug, Clone)]
pub struct Catalog {
    specs: BTreeMap<String, GaugeSpec>,
}

impl Catalog {
    /// Load the three per-class definition documents from `dir`.
    ///
    /// Any unreadable or malformed document is an error; no partial
    /// catalog is ever returned.
    pub fn load(dir: &Path) -> Result<Self, CatalogError> {
        let mut specs = BTreeMap::new();
        for class in EntityClass::ALL {
            let path = dir.join(class.definition_file());
            let raw = fs::read_to_string(&path).map_err(|source| CatalogError::Io {
                path: path.clone(),
                source,
            })?;
            let records: Vec<DefinitionRecord> =
                serde_json::from_str(&raw).map_err(|source| CatalogError::Parse {
                    path: path.clone(),
                    source,
                })?;
            for record in records {
                let definition = MetricDefinition {
                    exposition_name: normalize_key(&record.metric),
                    key: record.metric,
                    help: record.help,
                    class,
                };
                specs.insert(
                    definition.key.clone(),
                    GaugeSpec {
                        labels: class.label_names(),
                        definition,
                    },
                );
            }
        }
        Ok(Self { specs })
    }

    /// Restrict the catalog to a caller-provided key set.
    ///
    /// An empty selection keeps the full catalog. A requested key that
    /// does not exist is rejected explicitly, never inserted as an
    /// empty spec.
    pub fn restrict(self, requested: &[String]) -> Result<Self, CatalogError> {
        if requested.is_empty() {
            return Ok(self);
        }
        let mut specs = BTreeMap::new();
        let mut unknown = Vec::new();
        for key in requested {
            match self.specs.get(key) {
                Some(spec) => {
                    specs.insert(key.clone(), spec.clone());
                }
                None => unknown.push(key.clone()),
            }
        }
        if !unknown.is_empty() {
            return Err(CatalogError::UnknownMetrics { keys: unknown });
        }
        Ok(Self { specs })
    }

    pub fn get(&self, key: &str) -> Option<&GaugeSpec> {
        self.specs.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &GaugeSpec)> {
        self.specs.iter()
    }

    /// Catalog keys belonging to one entity class.
    pub fn class_keys(&self, class: EntityClass) -> impl Iterator<Item = &str> {
        self.specs
            .iter()
            .filter(move |(_, spec)| spec.definition.class == class)
            .map(|(key, _)| key.as_str())
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

/// Normalize a dotted metric key into an exposition-safe name.
fn normalize_key(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
