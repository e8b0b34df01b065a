use crate::cli::actions::Action;
use crate::collectors::config::CollectorConfig;
use crate::collectors::registry::CollectorRegistry;
use crate::exporter;
use crate::scrape::breaker::BreakerConfig;
use crate::scrape::scheduler::{ScheduleSettings, Scheduler};
use crate::scrape::target::{Target, TargetSettings};
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};

/// Handle the run action: build targets and collectors, wire the
/// scheduler, then serve until shutdown.
///
/// # Errors
///
/// Fails on unusable connection descriptors, metric registration
/// collisions or an unbindable listener.
pub async fn handle(action: Action) -> Result<()> {
    let Action::Run {
        port,
        listen,
        dsns,
        excluded_databases,
        auto_discover_databases,
        connect_timeout,
        scrape_timeout,
        breaker_failure_threshold,
        breaker_cooldown,
        size_cache_ttl,
        custom_query_dirs,
        enabled_collectors,
        disabled_collectors,
    } = action;

    let target_settings = TargetSettings {
        connect_timeout,
        breaker: BreakerConfig {
            failure_threshold: breaker_failure_threshold,
            cooldown: breaker_cooldown,
        },
        excluded_databases: Arc::from(excluded_databases),
        size_cache_ttl,
    };

    let mut targets = Vec::with_capacity(dsns.len());
    for dsn in dsns {
        let target = Target::from_dsn(dsn, target_settings.clone())
            .context("building target from connection descriptor")?;
        info!(server = %target.fingerprint(), "configured target");
        targets.push(target);
    }

    let mut config = CollectorConfig::from_flags(&enabled_collectors, &disabled_collectors);
    for (tier, dir) in custom_query_dirs {
        config = config.with_custom_query_dir(tier, dir);
    }

    let registry = CollectorRegistry::new(&config);
    if registry.is_empty() {
        warn!("no collectors enabled, scrapes will only report target liveness");
    }
    let scheduler = Scheduler::new(
        targets,
        registry,
        ScheduleSettings {
            scrape_timeout,
            auto_discover_databases,
        },
    )?;

    exporter::new(port, listen, Arc::new(scheduler)).await
}
