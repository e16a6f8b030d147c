//! Collection orchestration: one cycle per scrape
//!
//! A cycle runs three independent branches (virtual service, service
//! engine, controller). Each branch resolves its entity inventory,
//! issues one batched metric query, left-joins results to entity
//! records by identifier and overwrites the gauge store. A branch
//! failure is logged and skipped for the cycle; the other branches
//! still update and the failed branch's gauges keep their previous
//! values.
//!
//! Cycles are serialized by an internal mutex, so overlapping scrapes
//! never interleave writes from two cycles. The lock also guards the
//! bookkeeping used to retract series whose entity disappeared from
//! the inventory between cycles.

use crate::catalog::{Catalog, EntityClass};
use crate::client::ControllerApi;
use crate::observability::ExporterMetrics;
use crate::query::{self, MetricSeries};
use crate::resolver::{EntityResolver, ReverseDns};
use crate::store::GaugeStore;
use anyhow::Result;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Label values in schema order, identifying one published series.
type LabelValues = Vec<String>;

/// Series published by the last successful cycle of each branch,
/// keyed by catalog metric key.
#[derive(Default)]
struct PublishedSeries {
    by_metric: HashMap<String, HashSet<LabelValues>>,
}

pub struct CollectionOrchestrator {
    api: Arc<dyn ControllerApi>,
    resolver: EntityResolver,
    catalog: Catalog,
    store: GaugeStore,
    metrics: ExporterMetrics,
    /// Value of the `cluster` label on every published series.
    cluster: String,
    published: Mutex<PublishedSeries>,
}

impl CollectionOrchestrator {
    pub fn new(
        api: Arc<dyn ControllerApi>,
        dns: Arc<dyn ReverseDns>,
        catalog: Catalog,
        store: GaugeStore,
        metrics: ExporterMetrics,
        cluster: String,
    ) -> Self {
        Self {
            resolver: EntityResolver::new(api.clone(), dns),
            api,
            catalog,
            store,
            metrics,
            cluster,
            published: Mutex::new(PublishedSeries::default()),
        }
    }

    pub fn store(&self) -> &GaugeStore {
        &self.store
    }

    /// Run one full collection cycle across all entity classes.
    ///
    /// Never fails as a whole: a failed branch is logged, counted and
    /// skipped, leaving its gauges stale-but-present for this cycle.
    pub async fn run_cycle(&self) {
        let mut published = self.published.lock().await;
        self.cycle_locked(&mut published).await;
    }

    /// Run one cycle and snapshot the store before releasing the cycle
    /// lock, so the snapshot never observes writes from a concurrent
    /// scrape's cycle.
    pub async fn collect_and_gather(&self) -> Vec<prometheus::proto::MetricFamily> {
        let mut published = self.published.lock().await;
        self.cycle_locked(&mut published).await;
        self.store.gather()
    }

    async fn cycle_locked(&self, published: &mut PublishedSeries) {
        info!("collection cycle starting");
        for class in EntityClass::ALL {
            let started = Instant::now();
            match self.run_branch(class, published).await {
                Ok(series) => {
                    let elapsed = started.elapsed().as_secs_f64();
                    self.metrics.observe_branch(class, elapsed, series);
                    debug!(
                        class = class.as_str(),
                        series,
                        elapsed_ms = (elapsed * 1000.0) as u64,
                        "collection branch complete"
                    );
                }
                Err(error) => {
                    self.metrics.inc_branch_error(class);
                    warn!(
                        class = class.as_str(),
                        error = %error,
                        "collection branch failed; keeping previous values"
                    );
                }
            }
        }
    }

    async fn run_branch(
        &self,
        class: EntityClass,
        published: &mut PublishedSeries,
    ) -> Result<usize> {
        match class {
            EntityClass::VirtualService => self.collect_virtual_services(published).await,
            EntityClass::ServiceEngine => self.collect_service_engines(published).await,
            EntityClass::Controller => self.collect_controller_nodes(published).await,
        }
    }

    async fn collect_virtual_services(&self, published: &mut PublishedSeries) -> Result<usize> {
        // Entity maps are fully built before any series is joined.
        let records = self.resolver.virtual_services().await?;
        let pools = self.resolver.pools().await?;
        let series = query::query_class(self.api.as_ref(), EntityClass::VirtualService, &self.catalog)
            .await?;

        let mut seen = HashMap::new();
        let mut written = 0;
        for entry in &series {
            let record = records.get(&entry.entity_id).cloned().unwrap_or_default();
            let pool = pools
                .get(&record.pool_id)
                .map(|pool| pool.name.clone())
                .unwrap_or_default();
            let labels = vec![
                ("name", record.name),
                ("fqdn", record.fqdn),
                ("ipaddress", record.ip_address),
                ("pool", pool),
                ("tenant_uuid", entry.tenant_id.clone()),
                ("units", entry.units.clone()),
                ("cluster", self.cluster.clone()),
            ];
            written += self.publish(entry, labels, &mut seen)?;
        }
        self.retract_stale(EntityClass::VirtualService, &seen, published);
        Ok(written)
    }

    async fn collect_service_engines(&self, published: &mut PublishedSeries) -> Result<usize> {
        let records = self.resolver.service_engines().await?;
        let series = query::query_class(self.api.as_ref(), EntityClass::ServiceEngine, &self.catalog)
            .await?;

        let mut seen = HashMap::new();
        let mut written = 0;
        for entry in &series {
            let record = records.get(&entry.entity_id).cloned().unwrap_or_default();
            let labels = vec![
                ("name", record.name),
                ("entity_uuid", entry.entity_id.clone()),
                ("fqdn", record.fqdn),
                ("ipaddress", record.ip_address),
                ("tenant_uuid", entry.tenant_id.clone()),
                ("units", entry.units.clone()),
                ("cluster", self.cluster.clone()),
            ];
            written += self.publish(entry, labels, &mut seen)?;
        }
        self.retract_stale(EntityClass::ServiceEngine, &seen, published);
        Ok(written)
    }

    async fn collect_controller_nodes(&self, published: &mut PublishedSeries) -> Result<usize> {
        let records = self.resolver.cluster_nodes().await?;
        let series =
            query::query_class(self.api.as_ref(), EntityClass::Controller, &self.catalog).await?;

        let mut seen = HashMap::new();
        let mut written = 0;
        for entry in &series {
            let record = records.get(&entry.entity_id).cloned().unwrap_or_default();
            let labels = vec![
                ("name", record.name),
                ("entity_uuid", entry.entity_id.clone()),
                ("fqdn", record.fqdn),
                ("ipaddress", record.ip_address),
                ("tenant_uuid", entry.tenant_id.clone()),
                ("units", entry.units.clone()),
                ("cluster", self.cluster.clone()),
            ];
            written += self.publish(entry, labels, &mut seen)?;
        }
        self.retract_stale(EntityClass::Controller, &seen, published);
        Ok(written)
    }

    /// Write the most recent sample of one series and record its label
    /// combination for the stale-series sweep. Returns how many values
    /// were written (0 or 1).
    fn publish(
        &self,
        series: &MetricSeries,
        labels: Vec<(&'static str, String)>,
        seen: &mut HashMap<String, HashSet<LabelValues>>,
    ) -> Result<usize> {
        let Some(spec) = self.catalog.get(&series.metric_key) else {
            warn!(
                metric = %series.metric_key,
                entity = %series.entity_id,
                "series for a metric not in the catalog; skipping"
            );
            return Ok(0);
        };
        let Some(sample) = series.samples.last() else {
            debug!(
                metric = %series.metric_key,
                entity = %series.entity_id,
                "series with no samples; nothing to publish"
            );
            return Ok(0);
        };
        self.store.set(&series.metric_key, &labels, sample.value)?;

        let ordered: LabelValues = spec
            .labels
            .iter()
            .map(|name| {
                labels
                    .iter()
                    .find(|(label, _)| label == name)
                    .map(|(_, value)| value.clone())
                    .unwrap_or_default()
            })
            .collect();
        seen.entry(series.metric_key.clone()).or_default().insert(ordered);
        Ok(1)
    }

    /// Drop label combinations published by the previous successful
    /// cycle of this branch but absent from the current one. Runs only
    /// after a branch succeeds, so a failed branch keeps its previous
    /// values untouched.
    fn retract_stale(
        &self,
        class: EntityClass,
        seen: &HashMap<String, HashSet<LabelValues>>,
        published: &mut PublishedSeries,
    ) {
        for key in self.catalog.class_keys(class) {
            let current = seen.get(key);
            if let Some(previous) = published.by_metric.get(key) {
                for values in previous {
                    let still_present = current.map_or(false, |set| set.contains(values));
                    if !still_present {
                        if let Err(error) = self.store.remove_values(key, values) {
                            debug!(metric = %key, %error, "failed to retract stale series");
                        }
                    }
                }
            }
            published
                .by_metric
                .insert(key.to_string(), current.cloned().unwrap_or_default());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::models::{
        AddressPayload, ClusterNodePayload, ClusterRuntime, CollectionEnvelope,
        CollectionRequest, PoolInventory, SamplePayload, SeriesHeader, SeriesPayload,
        ServiceEngineInventory, VipPayload, VirtualServiceInventory,
    };
    use anyhow::bail;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use prometheus::proto::MetricFamily;
    use prometheus::{Encoder, TextEncoder};
    use std::io::Write;
    use std::net::IpAddr;
    use std::path::Path;
    use std::sync::Mutex as StdMutex;

    const VS_METRIC: &str = "l4_client.avg_bandwidth";
    const SE_METRIC: &str = "se_stats.avg_cpu_usage";
    const CONTROLLER_METRIC: &str = "controller_stats.avg_mem_usage";

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
            (
                "controller_metrics.json",
                r#"[{"metric": "controller_stats.avg_mem_usage", "help": "Memory."}]"#,
            ),
        ];
        for (name, body) in files {
            let mut f = std::fs::File::create(dir.join(name)).unwrap();
            f.write_all(body.as_bytes()).unwrap();
        }
    }

    #[derive(Default)]
    struct FakeState {
        virtual_services: Vec<VirtualServiceInventory>,
        service_engines: Vec<ServiceEngineInventory>,
        pools: Vec<PoolInventory>,
        nodes: Vec<ClusterNodePayload>,
        vs_series: Vec<SeriesPayload>,
        se_series: Vec<SeriesPayload>,
        controller_series: Vec<SeriesPayload>,
        fail_se_inventory: bool,
        fail_se_query: bool,
    }

    #[derive(Default)]
    struct FakeApi {
        state: StdMutex<FakeState>,
    }

    #[async_trait]
    impl ControllerApi for FakeApi {
        async fn virtual_services(&self) -> Result<Vec<VirtualServiceInventory>> {
            Ok(self.state.lock().unwrap().virtual_services.clone())
        }
        async fn service_engines(&self) -> Result<Vec<ServiceEngineInventory>> {
            let state = self.state.lock().unwrap();
            if state.fail_se_inventory {
                bail!("service engine inventory unavailable");
            }
            Ok(state.service_engines.clone())
        }
        async fn pools(&self) -> Result<Vec<PoolInventory>> {
            Ok(self.state.lock().unwrap().pools.clone())
        }
        async fn cluster_runtime(&self) -> Result<ClusterRuntime> {
            Ok(ClusterRuntime {
                nodes: self.state.lock().unwrap().nodes.clone(),
            })
        }
        async fn metrics_collection(
            &self,
            request: &CollectionRequest,
        ) -> Result<CollectionEnvelope> {
            let state = self.state.lock().unwrap();
            let token = request
                .metric_requests
                .first()
                .map(|sub| sub.metric_entity.clone())
                .unwrap_or_default();
            let series = match token.as_str() {
                "VSERVER_METRICS_ENTITY" => state.vs_series.clone(),
                "SE_METRICS_ENTITY" => {
                    if state.fail_se_query {
                        bail!("analytics query failed");
                    }
                    state.se_series.clone()
                }
                "CONTROLLER_METRICS_ENTITY" => state.controller_series.clone(),
                other => bail!("unexpected metric entity token {other}"),
            };
            let mut grouped: HashMap<String, Vec<SeriesPayload>> = HashMap::new();
            for payload in series {
                grouped
                    .entry(payload.header.entity_uuid.clone())
                    .or_default()
                    .push(payload);
            }
            Ok(CollectionEnvelope { series: grouped })
        }
    }

    struct FakeDns {
        answers: HashMap<IpAddr, Vec<String>>,
    }

    #[async_trait]
    impl ReverseDns for FakeDns {
        async fn lookup(&self, address: IpAddr) -> Vec<String> {
            self.answers.get(&address).cloned().unwrap_or_default()
        }
    }

    fn series(entity: &str, metric: &str, values: &[f64]) -> SeriesPayload {
        SeriesPayload {
            header: SeriesHeader {
                name: metric.to_string(),
                entity_uuid: entity.to_string(),
                tenant_uuid: "tenant-1".to_string(),
                units: "METRIC_COUNT".to_string(),
            },
            data: values
                .iter()
                .enumerate()
                .map(|(i, value)| SamplePayload {
                    timestamp: Utc.with_ymd_and_hms(2026, 8, 6, 10, 0, i as u32).unwrap(),
                    value: *value,
                })
                .collect(),
        }
    }

    fn base_state() -> FakeState {
        let mut state = FakeState::default();
        state.virtual_services.push(VirtualServiceInventory {
            uuid: "vs1".to_string(),
            name: "web".to_string(),
            vip: vec![VipPayload {
                ip_address: Some(AddressPayload {
                    addr: "10.0.0.1".to_string(),
                    addr_type: "V4".to_string(),
                }),
            }],
            pool_ref: Some("https://ctrl/api/pool/pool-abc".to_string()),
        });
        state.pools.push(PoolInventory {
            uuid: "pool-abc".to_string(),
            name: "web-pool".to_string(),
        });
        state.service_engines.push(ServiceEngineInventory {
            uuid: "se1".to_string(),
            name: "engine-1".to_string(),
            mgmt_vnic: None,
        });
        state.nodes.push(ClusterNodePayload {
            name: "node-1".to_string(),
            ip: AddressPayload {
                addr: "10.0.0.100".to_string(),
                addr_type: "V4".to_string(),
            },
            vm_uuid: "vm-1".to_string(),
            vm_hostname: None,
        });
        state.vs_series.push(series("vs1", VS_METRIC, &[10.0, 42.0]));
        state.se_series.push(series("se1", SE_METRIC, &[55.0]));
        state
            .controller_series
            .push(series("vm-1", CONTROLLER_METRIC, &[71.0]));
        state
    }

    fn orchestrator(state: FakeState) -> (CollectionOrchestrator, Arc<FakeApi>) {
        let dir = tempfile::tempdir().unwrap();
        write_defs(dir.path());
        let catalog = Catalog::load(dir.path()).unwrap();
        let store = GaugeStore::new(&catalog).unwrap();
        let metrics = ExporterMetrics::register(store.registry()).unwrap();
        let api = Arc::new(FakeApi {
            state: StdMutex::new(state),
        });
        let mut answers = HashMap::new();
        answers.insert(
            "10.0.0.1".parse::<IpAddr>().unwrap(),
            vec!["app.example.com.".to_string()],
        );
        let dns = Arc::new(FakeDns { answers });
        let orchestrator = CollectionOrchestrator::new(
            api.clone(),
            dns,
            catalog,
            store,
            metrics,
            "https://ctrl".to_string(),
        );
        (orchestrator, api)
    }

    fn family<'a>(families: &'a [MetricFamily], name: &str) -> Option<&'a MetricFamily> {
        families.iter().find(|family| family.get_name() == name)
    }

    fn label_value(metric: &prometheus::proto::Metric, name: &str) -> String {
        metric
            .get_label()
            .iter()
            .find(|pair| pair.get_name() == name)
            .map(|pair| pair.get_value().to_string())
            .unwrap_or_default()
    }

    fn catalog_text(store: &GaugeStore) -> String {
        let families: Vec<MetricFamily> = store
            .gather()
            .into_iter()
            .filter(|family| !family.get_name().starts_with("exporter_"))
            .collect();
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&families, &mut buffer).unwrap();
        String::from_utf8(buffer).unwrap()
    }

    #[tokio::test]
    async fn test_end_to_end_virtual_service_scenario() {
        let (orchestrator, _api) = orchestrator(base_state());
        orchestrator.run_cycle().await;

        let families = orchestrator.store().gather();
        let family = family(&families, "l4_client_avg_bandwidth").unwrap();
        assert_eq!(family.get_metric().len(), 1);
        let metric = &family.get_metric()[0];

        assert_eq!(metric.get_gauge().get_value(), 42.0);
        assert_eq!(label_value(metric, "name"), "web");
        assert_eq!(label_value(metric, "fqdn"), "app.example.com");
        assert_eq!(label_value(metric, "ipaddress"), "10.0.0.1");
        assert_eq!(label_value(metric, "pool"), "web-pool");
        assert_eq!(label_value(metric, "tenant_uuid"), "tenant-1");
        assert_eq!(label_value(metric, "units"), "METRIC_COUNT");
        assert_eq!(label_value(metric, "cluster"), "https://ctrl");
    }

    #[tokio::test]
    async fn test_left_join_publishes_unresolved_entities_with_empty_labels() {
        let mut state = base_state();
        state.vs_series.push(series("ghost", VS_METRIC, &[7.0]));
        let (orchestrator, _api) = orchestrator(state);
        orchestrator.run_cycle().await;

        let families = orchestrator.store().gather();
        let family = family(&families, "l4_client_avg_bandwidth").unwrap();
        assert_eq!(family.get_metric().len(), 2);

        let ghost = family
            .get_metric()
            .iter()
            .find(|metric| label_value(metric, "name").is_empty())
            .expect("unresolved entity still published");
        assert_eq!(ghost.get_gauge().get_value(), 7.0);
        assert_eq!(label_value(ghost, "fqdn"), "");
        assert_eq!(label_value(ghost, "ipaddress"), "");
        assert_eq!(label_value(ghost, "pool"), "");
        assert_eq!(label_value(ghost, "tenant_uuid"), "tenant-1");
    }

    #[tokio::test]
    async fn test_empty_series_publishes_nothing() {
        let mut state = base_state();
        state.vs_series = vec![series("vs1", VS_METRIC, &[])];
        let (orchestrator, _api) = orchestrator(state);
        orchestrator.run_cycle().await;

        let families = orchestrator.store().gather();
        let published = family(&families, "l4_client_avg_bandwidth")
            .map(|family| family.get_metric().len())
            .unwrap_or(0);
        assert_eq!(published, 0);
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_other_branches_updating() {
        let (orchestrator, api) = orchestrator(base_state());
        orchestrator.run_cycle().await;

        {
            let mut state = api.state.lock().unwrap();
            state.fail_se_inventory = true;
            state.vs_series = vec![series("vs1", VS_METRIC, &[43.0])];
            state.se_series = vec![series("se1", SE_METRIC, &[99.0])];
        }
        orchestrator.run_cycle().await;

        let families = orchestrator.store().gather();
        let vs = family(&families, "l4_client_avg_bandwidth").unwrap();
        assert_eq!(vs.get_metric()[0].get_gauge().get_value(), 43.0);

        // The failed branch retains the value from the first cycle.
        let se = family(&families, "se_stats_avg_cpu_usage").unwrap();
        assert_eq!(se.get_metric()[0].get_gauge().get_value(), 55.0);

        let controller = family(&families, "controller_stats_avg_mem_usage").unwrap();
        assert_eq!(controller.get_metric()[0].get_gauge().get_value(), 71.0);

        let errors = family(&families, "exporter_collection_errors_total").unwrap();
        assert_eq!(errors.get_metric()[0].get_counter().get_value(), 1.0);
    }

    #[tokio::test]
    async fn test_two_identical_cycles_are_idempotent() {
        let (orchestrator, _api) = orchestrator(base_state());
        orchestrator.run_cycle().await;
        let first = catalog_text(orchestrator.store());
        orchestrator.run_cycle().await;
        let second = catalog_text(orchestrator.store());
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_disappeared_entity_is_retracted_on_next_cycle() {
        let mut state = base_state();
        state.vs_series.push(series("vs2", VS_METRIC, &[5.0]));
        state.virtual_services.push(VirtualServiceInventory {
            uuid: "vs2".to_string(),
            name: "old".to_string(),
            vip: Vec::new(),
            pool_ref: None,
        });
        let (orchestrator, api) = orchestrator(state);
        orchestrator.run_cycle().await;

        let families = orchestrator.store().gather();
        assert_eq!(
            family(&families, "l4_client_avg_bandwidth")
                .unwrap()
                .get_metric()
                .len(),
            2
        );

        {
            let mut state = api.state.lock().unwrap();
            state.virtual_services.retain(|vs| vs.uuid != "vs2");
            state.vs_series = vec![series("vs1", VS_METRIC, &[42.0])];
        }
        orchestrator.run_cycle().await;

        let families = orchestrator.store().gather();
        let remaining = family(&families, "l4_client_avg_bandwidth")
            .map(|family| family.get_metric().len())
            .unwrap_or(0);
        assert_eq!(remaining, 1);
    }

    #[tokio::test]
    async fn test_failed_branch_retracts_nothing() {
        let (orchestrator, api) = orchestrator(base_state());
        orchestrator.run_cycle().await;

        {
            let mut state = api.state.lock().unwrap();
            state.fail_se_query = true;
        }
        orchestrator.run_cycle().await;

        let families = orchestrator.store().gather();
        let se = family(&families, "se_stats_avg_cpu_usage").unwrap();
        assert_eq!(se.get_metric().len(), 1);
        assert_eq!(se.get_metric()[0].get_gauge().get_value(), 55.0);
    }

    #[tokio::test]
    async fn test_series_for_unknown_metric_is_skipped() {
        let mut state = base_state();
        state
            .vs_series
            .push(series("vs1", "l4_client.not_in_catalog", &[1.0]));
        let (orchestrator, _api) = orchestrator(state);
        orchestrator.run_cycle().await;

        let families = orchestrator.store().gather();
        let vs = family(&families, "l4_client_avg_bandwidth").unwrap();
        assert_eq!(vs.get_metric().len(), 1);
        assert_eq!(vs.get_metric()[0].get_gauge().get_value(), 42.0);
    }
}
