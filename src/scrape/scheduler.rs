use crate::collectors::registry::CollectorRegistry;
use crate::scrape::stats::ScrapeStats;
use crate::scrape::target::Target;
use anyhow::{Context, Result};
use prometheus::{IntGaugeVec, Opts, Registry, TextEncoder};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Scrape-wide tuning.
#[derive(Clone, Debug)]
pub struct ScheduleSettings {
    /// Upper bound on one target's whole scrape (connect + collect).
    pub scrape_timeout: Duration,
    /// Derive sibling-database targets from each configured parent.
    pub auto_discover_databases: bool,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            scrape_timeout: Duration::from_secs(10),
            auto_discover_databases: false,
        }
    }
}

/// Orchestrates one `/metrics` request: fans out one task per target,
/// gates each through its breaker, runs the collector set, sets
/// `pg_up{server}` and encodes the registry after every task joined.
pub struct Scheduler {
    targets: Vec<Arc<Target>>,
    discovered: tokio::sync::RwLock<Vec<Arc<Target>>>,
    collectors: CollectorRegistry,
    registry: Registry,
    stats: ScrapeStats,
    up: IntGaugeVec,
    settings: ScheduleSettings,
}

impl Scheduler {
    /// Wires targets, collectors and the exposition registry together.
    ///
    /// # Errors
    ///
    /// Fails when metric registration collides, which is a programming
    /// error surfaced at startup rather than per scrape.
    pub fn new(
        targets: Vec<Target>,
        collectors: CollectorRegistry,
        settings: ScheduleSettings,
    ) -> Result<Self> {
        let registry = Registry::new();
        let stats = ScrapeStats::new();
        stats
            .register(&registry)
            .context("registering scrape meta-metrics")?;

        #[allow(clippy::expect_used)]
        let up = IntGaugeVec::new(
            Opts::new(
                "pg_up",
                "Whether the last scrape of metrics from PostgreSQL was able to connect to the server (1 for yes, 0 for no).",
            ),
            &["server"],
        )
        .expect("valid pg_up metric opts");
        registry
            .register(Box::new(up.clone()))
            .context("registering pg_up")?;

        collectors
            .register_all(&registry)
            .context("registering collector metrics")?;

        Ok(Self {
            targets: targets.into_iter().map(Arc::new).collect(),
            discovered: tokio::sync::RwLock::new(Vec::new()),
            collectors,
            registry,
            stats,
            up,
            settings,
        })
    }

    #[must_use]
    pub fn collector_names(&self) -> Vec<&'static str> {
        self.collectors.collector_names()
    }

    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Runs one full scrape cycle and returns the encoded exposition.
    ///
    /// Target failures never fail the scrape; they surface as
    /// `pg_up{server} == 0`.
    ///
    /// # Errors
    ///
    /// Only on exposition encoding failures, an exporter-internal
    /// fault.
    #[instrument(skip(self, filter), level = "info")]
    pub async fn scrape(&self, filter: Option<&HashSet<String>>) -> Result<String> {
        let started = std::time::Instant::now();

        let mut round: Vec<Arc<Target>> = self.targets.clone();
        round.extend(self.discovered.read().await.iter().cloned());
        self.scrape_round(&round, filter).await;

        if self.settings.auto_discover_databases {
            let fresh = self.discover().await;
            if !fresh.is_empty() {
                self.scrape_round(&fresh, filter).await;
            }
        }

        let output = self.encode()?;
        self.stats
            .record_scrape(started.elapsed().as_secs_f64(), count_samples(&self.registry));
        Ok(output)
    }

    async fn scrape_round(&self, targets: &[Arc<Target>], filter: Option<&HashSet<String>>) {
        let filter: Option<Arc<HashSet<String>>> = filter.map(|f| Arc::new(f.clone()));
        let mut tasks = Vec::with_capacity(targets.len());
        for target in targets {
            let target = Arc::clone(target);
            let collectors = self.collectors.clone();
            let stats = self.stats.clone();
            let up = self.up.clone();
            let timeout = self.settings.scrape_timeout;
            let filter = filter.clone();
            tasks.push(tokio::spawn(async move {
                scrape_target(&target, &collectors, &stats, &up, timeout, filter.as_deref()).await;
            }));
        }
        for task in tasks {
            if let Err(err) = task.await {
                warn!(error = %err, "target scrape task panicked");
            }
        }
    }

    /// Asks every reachable parent for its sibling databases and
    /// derives a target per previously unseen one.
    async fn discover(&self) -> Vec<Arc<Target>> {
        let mut known: HashSet<String> = self
            .targets
            .iter()
            .map(|t| t.fingerprint().to_string())
            .collect();
        {
            let discovered = self.discovered.read().await;
            known.extend(discovered.iter().map(|t| t.fingerprint().to_string()));
        }

        let mut fresh = Vec::new();
        for parent in &self.targets {
            let names = match parent.discover_databases().await {
                Ok(names) => names,
                Err(err) => {
                    debug!(server = %parent.instance().server_label(), error = %err, "database discovery skipped");
                    continue;
                }
            };
            for datname in names {
                match parent.derive_database(&datname) {
                    Ok(derived) => {
                        let fingerprint = derived.fingerprint().to_string();
                        if known.insert(fingerprint.clone()) {
                            info!(server = %fingerprint, "discovered database target");
                            fresh.push(Arc::new(derived));
                        }
                    }
                    Err(err) => {
                        warn!(datname = %datname, error = %err, "cannot derive database target");
                    }
                }
            }
        }

        if !fresh.is_empty() {
            self.discovered.write().await.extend(fresh.iter().cloned());
        }
        fresh
    }

    fn encode(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        encoder
            .encode_to_string(&self.registry.gather())
            .context("encoding metrics")
    }
}

/// Scrapes one target end to end. Connect failure or timeout means
/// `pg_up == 0` and no collector runs; a reachable target with any
/// collector error is also `pg_up == 0` (partial success is not
/// success).
async fn scrape_target(
    target: &Arc<Target>,
    collectors: &CollectorRegistry,
    stats: &ScrapeStats,
    up: &IntGaugeVec,
    timeout: Duration,
    filter: Option<&HashSet<String>>,
) {
    let server = target.instance().server_label().to_string();

    let outcome = tokio::time::timeout(timeout, async {
        target.ensure_ready().await?;
        Ok::<usize, crate::scrape::error::ScrapeError>(
            collectors.collect_all(target.instance(), stats, filter).await,
        )
    })
    .await;

    let healthy = match outcome {
        Ok(Ok(0)) => true,
        Ok(Ok(errors)) => {
            warn!(server = %server, errors, "scrape finished with collector errors");
            false
        }
        Ok(Err(err)) => {
            warn!(server = %server, error = %err, "target unreachable");
            false
        }
        Err(_) => {
            warn!(server = %server, ?timeout, "target scrape timed out");
            false
        }
    };
    up.with_label_values(&[&server])
        .set(i64::from(healthy));
}

#[allow(clippy::cast_possible_wrap)]
fn count_samples(registry: &Registry) -> i64 {
    registry
        .gather()
        .iter()
        .map(|family| family.get_metric().len() as i64)
        .sum()
}
