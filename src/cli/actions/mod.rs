pub mod run;

use crate::collectors::resolution::MetricResolution;
use secrecy::SecretString;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug)]
pub enum Action {
    Run {
        port: u16,
        listen: Option<String>,
        /// One connection descriptor per target, already split.
        dsns: Vec<SecretString>,
        excluded_databases: Vec<String>,
        auto_discover_databases: bool,
        connect_timeout: Duration,
        scrape_timeout: Duration,
        breaker_failure_threshold: u32,
        breaker_cooldown: Duration,
        size_cache_ttl: Duration,
        custom_query_dirs: HashMap<MetricResolution, PathBuf>,
        enabled_collectors: Vec<String>,
        disabled_collectors: Vec<String>,
    },
}
