//! Exporter self-telemetry
//!
//! Registered in the same registry as the catalog gauges so one scrape
//! carries both the controller's metrics and the exporter's own branch
//! durations and error counts.

use crate::catalog::EntityClass;
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry};

/// Histogram buckets for branch durations (in seconds). Branches make
/// several network round trips, so the range is wider than a local
/// collector would use.
const DURATION_BUCKETS: &[f64] = &[0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0];

#[derive(Clone)]
pub struct ExporterMetrics {
    collection_duration_seconds: HistogramVec,
    collection_errors_total: IntCounterVec,
    last_scrape_series: IntGaugeVec,
}

impl ExporterMetrics {
    pub fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
        let collection_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "exporter_collection_duration_seconds",
                "Time spent collecting one entity class, resolve through store",
            )
            .buckets(DURATION_BUCKETS.to_vec()),
            &["entity_class"],
        )?;
        registry.register(Box::new(collection_duration_seconds.clone()))?;

        let collection_errors_total = IntCounterVec::new(
            Opts::new(
                "exporter_collection_errors_total",
                "Collection branches skipped because of an upstream failure",
            ),
            &["entity_class"],
        )?;
        registry.register(Box::new(collection_errors_total.clone()))?;

        let last_scrape_series = IntGaugeVec::new(
            Opts::new(
                "exporter_last_scrape_series",
                "Series published for an entity class during the last successful branch",
            ),
            &["entity_class"],
        )?;
        registry.register(Box::new(last_scrape_series.clone()))?;

        Ok(Self {
            collection_duration_seconds,
            collection_errors_total,
            last_scrape_series,
        })
    }

    pub fn observe_branch(&self, class: EntityClass, duration_secs: f64, series: usize) {
        self.collection_duration_seconds
            .with_label_values(&[class.as_str()])
            .observe(duration_secs);
        self.last_scrape_series
            .with_label_values(&[class.as_str()])
            .set(series as i64);
    }

    pub fn inc_branch_error(&self, class: EntityClass) {
        self.collection_errors_total
            .with_label_values(&[class.as_str()])
            .inc();
    }
}
