use crate::cli::actions::Action;
use crate::collectors::COLLECTOR_NAMES;
use crate::collectors::resolution::MetricResolution;
use anyhow::{Result, anyhow};
use clap::ArgMatches;
use secrecy::SecretString;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Turns parsed CLI matches into the one action this binary knows.
///
/// # Errors
///
/// Fails when a required argument is missing or no usable DSN
/// remains after splitting the list.
pub fn handler(matches: &ArgMatches) -> Result<Action> {
    let port = matches
        .get_one::<u16>("port")
        .copied()
        .ok_or_else(|| anyhow!("Port is required. Please provide it using the --port flag."))?;

    // None means auto-detect (IPv6 first, IPv4 fallback).
    let listen = matches.get_one::<String>("listen").map(ToString::to_string);

    let dsns = split_dsn_list(
        matches
            .get_one::<String>("dsn")
            .ok_or_else(|| anyhow!("DSN is required. Please provide it using the --dsn flag."))?,
    )?;

    let excluded_databases: Vec<String> = matches
        .get_many::<String>("exclude-databases")
        .map(|vals| {
            vals.map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default();

    let seconds = |name: &str| -> Duration {
        Duration::from_secs(matches.get_one::<u64>(name).copied().unwrap_or_default())
    };

    let mut custom_query_dirs = HashMap::new();
    for tier in MetricResolution::all() {
        let flag = format!("collect.custom_query.{tier}.directory");
        if let Some(dir) = matches.get_one::<String>(&flag) {
            custom_query_dirs.insert(tier, PathBuf::from(dir));
        }
    }

    let (enabled_collectors, disabled_collectors) = collector_flags(matches);

    Ok(Action::Run {
        port,
        listen,
        dsns,
        excluded_databases,
        auto_discover_databases: matches.get_flag("auto-discover-databases"),
        connect_timeout: seconds("connect-timeout"),
        scrape_timeout: seconds("scrape-timeout"),
        breaker_failure_threshold: matches
            .get_one::<u32>("breaker-failure-threshold")
            .copied()
            .unwrap_or(10),
        breaker_cooldown: seconds("breaker-cooldown"),
        size_cache_ttl: seconds("size-cache-ttl"),
        custom_query_dirs,
        enabled_collectors,
        disabled_collectors,
    })
}

/// Splits a comma-separated DSN list into one secret per target.
///
/// # Errors
///
/// Fails when nothing but separators remains; a single unparseable
/// entry is left for target construction to reject with context.
fn split_dsn_list(raw: &str) -> Result<Vec<SecretString>> {
    let dsns: Vec<SecretString> = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| SecretString::from(s.to_string()))
        .collect();
    if dsns.is_empty() {
        return Err(anyhow!("no connection descriptor left after splitting DSN list"));
    }
    Ok(dsns)
}

/// Explicit `--collector.X` / `--no-collector.X` choices, in registry
/// order. Unmentioned collectors keep their own default.
fn collector_flags(matches: &ArgMatches) -> (Vec<String>, Vec<String>) {
    let mut enabled = Vec::new();
    let mut disabled = Vec::new();
    for &name in COLLECTOR_NAMES {
        if matches.get_flag(&format!("no-collector.{name}")) {
            disabled.push(name.to_string());
        } else if matches.get_flag(&format!("collector.{name}")) {
            enabled.push(name.to_string());
        }
    }
    (enabled, disabled)
}
