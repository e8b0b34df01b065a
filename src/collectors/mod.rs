use crate::collectors::resolution::MetricResolution;
use crate::scrape::target::Instance;
use crate::scrape::version::VersionRange;
use anyhow::Result;
use futures::future::BoxFuture;
use prometheus::Registry;
use std::collections::HashMap;
use std::sync::Arc;

#[macro_use]
mod register_macro;

/// One metric source: a named, independently enableable unit that
/// registers its descriptors once and refreshes their samples on each
/// scrape.
///
/// Collectors read the [`Instance`] (pool, detected version, cache)
/// and never mutate it; a failing collector returns an error and the
/// registry turns that into meta-metrics without touching siblings.
pub trait Collector: Send + Sync {
    fn name(&self) -> &'static str;

    fn enabled_by_default(&self) -> bool;

    /// Polling tier this collector's series belong to.
    fn resolution(&self) -> MetricResolution;

    /// Server versions this collector applies to. Outside the range it
    /// runs zero queries and emits zero series.
    fn version_range(&self) -> VersionRange {
        VersionRange::ANY
    }

    fn register_metrics(&self, registry: &Registry) -> Result<()>;

    fn collect<'a>(&'a self, instance: &'a Instance) -> BoxFuture<'a, Result<()>>;
}

pub type SharedCollector = Arc<dyn Collector>;

// THIS IS THE ONLY PLACE YOU NEED TO ADD NEW COLLECTORS ✨
register_collectors! {
    version => VersionCollector,
    activity => ActivityCollector,
    bgwriter => BgwriterCollector,
    database => DatabaseCollector,
    stat_io => StatIoCollector,
}

// Other modules
pub mod config;
pub mod custom;
pub mod registry;
pub mod resolution;
pub mod util;
