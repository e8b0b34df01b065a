use crate::collectors::config::CollectorConfig;
use crate::collectors::custom::{CustomQueryCollector, CustomQueryMetrics};
use crate::collectors::{Collector, SharedCollector, all_factories};
use crate::scrape::stats::ScrapeStats;
use crate::scrape::target::Instance;
use anyhow::Result;
use prometheus::Registry;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// The set of enabled collectors, built once from configuration and
/// shared by all targets. No global state: the scheduler owns the
/// value and passes it where it is needed.
#[derive(Clone)]
pub struct CollectorRegistry {
    collectors: Vec<SharedCollector>,
    custom_metrics: CustomQueryMetrics,
}

impl CollectorRegistry {
    /// Builds the enabled collector set: every built-in collector the
    /// config enables, plus one custom query collector per configured
    /// tier directory.
    #[must_use]
    pub fn new(config: &CollectorConfig) -> Self {
        let factories = all_factories();
        let mut collectors: Vec<SharedCollector> = Vec::new();

        // Deterministic order for registration and logs.
        let mut names: Vec<&'static str> = factories.keys().copied().collect();
        names.sort_unstable();
        for name in names {
            if let Some(factory) = factories.get(name) {
                let collector = factory();
                if config.is_enabled(collector.name(), collector.enabled_by_default()) {
                    collectors.push(collector);
                }
            }
        }

        let custom_metrics = CustomQueryMetrics::new();
        let mut tiers: Vec<_> = config.custom_query_dirs.iter().collect();
        tiers.sort_by_key(|(tier, _)| tier.as_str());
        for (tier, dir) in tiers {
            let collector = CustomQueryCollector::load(*tier, dir, custom_metrics.clone());
            if config.is_enabled(collector.name(), collector.enabled_by_default()) {
                collectors.push(Arc::new(collector));
            }
        }

        Self {
            collectors,
            custom_metrics,
        }
    }

    /// Registers every collector's descriptors plus the shared user
    /// query meta-metrics.
    ///
    /// # Errors
    ///
    /// Fails on descriptor collisions, which indicate two collectors
    /// claiming the same series.
    pub fn register_all(&self, registry: &Registry) -> Result<()> {
        self.custom_metrics.register(registry)?;
        for collector in &self.collectors {
            collector.register_metrics(registry)?;
        }
        Ok(())
    }

    pub fn collector_names(&self) -> Vec<&'static str> {
        self.collectors.iter().map(|c| c.name()).collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.collectors.is_empty()
    }

    /// Runs every enabled, request-filtered, version-applicable
    /// collector against `instance`, each as its own task so a panic
    /// or error in one never reaches its siblings. Joins all tasks,
    /// then returns the number of failures.
    pub async fn collect_all(
        &self,
        instance: &Arc<Instance>,
        stats: &ScrapeStats,
        filter: Option<&HashSet<String>>,
    ) -> usize {
        let version = instance.version().await;

        let mut tasks = Vec::new();
        for collector in &self.collectors {
            if let Some(filter) = filter
                && !filter.contains(collector.name())
            {
                continue;
            }
            if let Some(version) = version
                && !collector.version_range().contains(version)
            {
                debug!(
                    collector = collector.name(),
                    %version,
                    "server version outside collector range, skipping"
                );
                continue;
            }

            let collector = Arc::clone(collector);
            let instance = Arc::clone(instance);
            let timer = stats.start_collector(collector.name());
            tasks.push(tokio::spawn(async move {
                let name = collector.name();
                match collector.collect(&instance).await {
                    Ok(()) => {
                        timer.success();
                        debug!(collector = name, "collected metrics");
                        false
                    }
                    Err(err) => {
                        warn!(collector = name, error = %err, "collector failed");
                        timer.error();
                        true
                    }
                }
            }));
        }

        let mut errors = 0_usize;
        for task in tasks {
            match task.await {
                Ok(failed) => errors += usize::from(failed),
                Err(join_err) => {
                    // The timer unwound with the panicking task and
                    // recorded the error meta-metrics on drop; this
                    // arm only keeps the failure count honest.
                    warn!(error = %join_err, "collector task panicked");
                    errors += 1;
                }
            }
        }
        errors
    }
}
