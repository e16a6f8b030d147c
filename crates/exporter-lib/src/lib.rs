//! Exporter library for load-balancer controller metrics
//!
//! This crate provides the core functionality for:
//! - Loading the metric catalog and its per-class label schemas
//! - Resolving entity inventories (virtual services, service engines,
//!   pools, cluster nodes) into label-bearing records
//! - Issuing batched analytics queries against the controller
//! - Publishing the latest sample per series as a labeled gauge
//! - Readiness probing of the controller endpoint

pub mod catalog;
pub mod client;
pub mod collect;
pub mod exposition;
pub mod health;
pub mod models;
pub mod observability;
pub mod query;
pub mod resolver;
pub mod store;

pub use catalog::{Catalog, CatalogError, EntityClass, GaugeSpec, MetricDefinition};
pub use client::{ConnectionOpts, ControllerApi, HttpControllerClient};
pub use collect::CollectionOrchestrator;
pub use health::ReadinessProbe;
pub use observability::ExporterMetrics;
pub use query::MetricSeries;
pub use resolver::{EntityResolver, HickoryReverseDns, ReverseDns};
pub use store::{GaugeStore, StoreError};
