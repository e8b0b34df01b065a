use crate::collectors::resolution::MetricResolution;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

/// Which collectors run and where user query files live.
///
/// Collectors not named by any flag fall back to their own
/// `enabled_by_default`; explicit disables win over enables.
#[derive(Clone, Debug, Default)]
pub struct CollectorConfig {
    enabled: HashSet<String>,
    disabled: HashSet<String>,
    /// Custom query directory per resolution tier; a missing entry
    /// disables that tier's custom collector.
    pub custom_query_dirs: HashMap<MetricResolution, PathBuf>,
}

impl CollectorConfig {
    /// Create an empty config
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies explicit `--collector.X` enables and `--no-collector.X`
    /// disables on top of the built-in defaults.
    #[must_use]
    pub fn from_flags(enable: &[String], disable: &[String]) -> Self {
        Self {
            enabled: enable.iter().cloned().collect(),
            disabled: disable.iter().cloned().collect(),
            custom_query_dirs: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_custom_query_dir(mut self, tier: MetricResolution, dir: PathBuf) -> Self {
        self.custom_query_dirs.insert(tier, dir);
        self
    }

    /// Check if a collector is enabled, given its default.
    #[must_use]
    pub fn is_enabled(&self, name: &str, default: bool) -> bool {
        if self.disabled.contains(name) {
            return false;
        }
        if self.enabled.contains(name) {
            return true;
        }
        default
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_defaults() {
        let config =
            CollectorConfig::from_flags(&["stat_io".to_string()], &["bgwriter".to_string()]);
        assert!(config.is_enabled("stat_io", false));
        assert!(config.is_enabled("version", true));
        assert!(!config.is_enabled("bgwriter", true));
    }

    #[test]
    fn disable_wins_over_enable() {
        let config =
            CollectorConfig::from_flags(&["bgwriter".to_string()], &["bgwriter".to_string()]);
        assert!(!config.is_enabled("bgwriter", true));
    }

    #[test]
    fn custom_query_dir_per_tier() {
        let config = CollectorConfig::new()
            .with_custom_query_dir(MetricResolution::High, PathBuf::from("/etc/queries/hr"));
        assert!(
            config
                .custom_query_dirs
                .contains_key(&MetricResolution::High)
        );
        assert!(!config.custom_query_dirs.contains_key(&MetricResolution::Low));
    }
}
