//! Gauge store: one labeled gauge vector per catalog metric
//!
//! The store owns an explicit registry rather than the process-global
//! default one, so its contents are exactly the catalog plus the
//! exporter's own telemetry, and tests can run isolated stores side by
//! side.

use crate::catalog::Catalog;
use prometheus::proto::MetricFamily;
use prometheus::{GaugeVec, Opts, Registry};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("metric {0} is not registered")]
    UnknownMetric(String),
    #[error("labels for metric {metric} do not match its schema (expected {expected:?})")]
    LabelMismatch {
        metric: String,
        expected: Vec<&'static str>,
    },
    #[error(transparent)]
    Prometheus(#[from] prometheus::Error),
}

struct RegisteredGauge {
    gauge: GaugeVec,
    labels: &'static [&'static str],
}

/// Registry of gauge vectors keyed by dotted catalog key.
pub struct GaugeStore {
    registry: Registry,
    gauges: HashMap<String, RegisteredGauge>,
}

impl GaugeStore {
    /// Register one empty gauge vector per catalog entry. Called once
    /// at startup; the registered set is fixed for the process
    /// lifetime.
    pub fn new(catalog: &Catalog) -> Result<Self, StoreError> {
        let registry = Registry::new();
        let mut gauges = HashMap::with_capacity(catalog.len());
        for (key, spec) in catalog.iter() {
            let opts = Opts::new(
                spec.definition.exposition_name.clone(),
                spec.definition.help.clone(),
            );
            let gauge = GaugeVec::new(opts, spec.labels)?;
            registry.register(Box::new(gauge.clone()))?;
            gauges.insert(
                key.clone(),
                RegisteredGauge {
                    gauge,
                    labels: spec.labels,
                },
            );
        }
        Ok(Self { registry, gauges })
    }

    /// The registry backing this store, for registering exporter
    /// telemetry alongside the catalog gauges.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Overwrite the value for one exact label combination.
    ///
    /// `labels` must carry exactly the label names declared for this
    /// metric's spec, in any order.
    pub fn set(
        &self,
        key: &str,
        labels: &[(&'static str, String)],
        value: f64,
    ) -> Result<(), StoreError> {
        let entry = self
            .gauges
            .get(key)
            .ok_or_else(|| StoreError::UnknownMetric(key.to_string()))?;
        let mut by_name: HashMap<&str, &str> = HashMap::with_capacity(labels.len());
        for (name, label_value) in labels {
            by_name.insert(*name, label_value.as_str());
        }
        let matches = labels.len() == entry.labels.len()
            && entry.labels.iter().all(|name| by_name.contains_key(name));
        if !matches {
            return Err(StoreError::LabelMismatch {
                metric: key.to_string(),
                expected: entry.labels.to_vec(),
            });
        }
        entry.gauge.get_metric_with(&by_name)?.set(value);
        Ok(())
    }

    /// Retract one label combination. `values` must be ordered per the
    /// metric's label schema.
    pub fn remove_values(&self, key: &str, values: &[String]) -> Result<(), StoreError> {
        let entry = self
            .gauges
            .get(key)
            .ok_or_else(|| StoreError::UnknownMetric(key.to_string()))?;
        let refs: Vec<&str> = values.iter().map(String::as_str).collect();
        entry.gauge.remove_label_values(&refs)?;
        Ok(())
    }

    /// Snapshot of all current values, for the exposition encoder.
    pub fn gather(&self) -> Vec<MetricFamily> {
        self.registry.gather()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use std::io::Write;
    use std::path::Path;

    fn write_defs(dir: &Path) {
        let files = [
            (
                "virtualservice_metrics.json",
                r#"[{"metric": "l4_client.avg_bandwidth", "help": "Bandwidth."}]"#,
            ),
            (
                "serviceengine_metrics.json",
                r#"[{"metric": "se_stats.avg_cpu_usage", "help": "CPU."}]"#,
            ),
            ("controller_metrics.json", "[]"),
        ];
        for (name, body) in files {
            let mut f = std::fs::File::create(dir.join(name)).unwrap();
            f.write_all(body.as_bytes()).unwrap();
        }
    }

    fn store() -> GaugeStore {
        let dir = tempfile::tempdir().unwrap();
        write_defs(dir.path());
        GaugeStore::new(&Catalog::load(dir.path()).unwrap()).unwrap()
    }

    fn vs_labels(name: &str) -> Vec<(&'static str, String)> {
        vec![
            ("name", name.to_string()),
            ("fqdn", "app.example.com".to_string()),
            ("ipaddress", "10.0.0.1".to_string()),
            ("pool", "web-pool".to_string()),
            ("tenant_uuid", "tenant-1".to_string()),
            ("units", "BITS_PER_SECOND".to_string()),
            ("cluster", "https://ctrl".to_string()),
        ]
    }

    #[test]
    fn test_registered_families_use_exposition_names() {
        let store = store();
        store
            .set("l4_client.avg_bandwidth", &vs_labels("web"), 1.0)
            .unwrap();
        let families = store.gather();
        assert!(families
            .iter()
            .any(|family| family.get_name() == "l4_client_avg_bandwidth"));
    }

    #[test]
    fn test_set_overwrites_in_place() {
        let store = store();
        store
            .set("l4_client.avg_bandwidth", &vs_labels("web"), 1.0)
            .unwrap();
        store
            .set("l4_client.avg_bandwidth", &vs_labels("web"), 42.0)
            .unwrap();

        let families = store.gather();
        let family = families
            .iter()
            .find(|family| family.get_name() == "l4_client_avg_bandwidth")
            .unwrap();
        assert_eq!(family.get_metric().len(), 1);
        assert_eq!(family.get_metric()[0].get_gauge().get_value(), 42.0);
    }

    #[test]
    fn test_set_unknown_metric_is_an_error() {
        let store = store();
        assert!(matches!(
            store.set("no_such.metric", &vs_labels("web"), 1.0),
            Err(StoreError::UnknownMetric(_))
        ));
    }

    #[test]
    fn test_set_rejects_label_mismatch() {
        let store = store();
        let mut labels = vs_labels("web");
        labels.pop();
        assert!(matches!(
            store.set("l4_client.avg_bandwidth", &labels, 1.0),
            Err(StoreError::LabelMismatch { .. })
        ));

        let mut extra = vs_labels("web");
        extra.push(("unexpected", "value".to_string()));
        assert!(matches!(
            store.set("l4_client.avg_bandwidth", &extra, 1.0),
            Err(StoreError::LabelMismatch { .. })
        ));
    }

    #[test]
    fn test_set_accepts_labels_in_any_order() {
        let store = store();
        let mut labels = vs_labels("web");
        labels.reverse();
        store
            .set("l4_client.avg_bandwidth", &labels, 7.0)
            .unwrap();
    }

    #[test]
    fn test_remove_values_retracts_combination() {
        let store = store();
        store
            .set("l4_client.avg_bandwidth", &vs_labels("web"), 1.0)
            .unwrap();
        // Schema order for virtual service labels.
        let values = vec![
            "web".to_string(),
            "app.example.com".to_string(),
            "10.0.0.1".to_string(),
            "web-pool".to_string(),
            "tenant-1".to_string(),
            "BITS_PER_SECOND".to_string(),
            "https://ctrl".to_string(),
        ];
        store
            .remove_values("l4_client.avg_bandwidth", &values)
            .unwrap();

        let families = store.gather();
        let remaining = families
            .iter()
            .find(|family| family.get_name() == "l4_client_avg_bandwidth")
            .map(|family| family.get_metric().len())
            .unwrap_or(0);
        assert_eq!(remaining, 0);
    }
}
