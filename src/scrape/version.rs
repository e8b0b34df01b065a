use crate::scrape::error::ScrapeError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;

// The result of SELECT version() is free text like
// "PostgreSQL 14.2 on x86_64-pc-linux-gnu, compiled by gcc ...".
// SHOW server_version yields "13.3 (Debian 13.3-1.pgdg100+1)".
#[allow(clippy::expect_used)]
static BANNER_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\w+ ((\d+)(\.\d+)?(\.\d+)?)").expect("valid banner regex"));

#[allow(clippy::expect_used)]
static BARE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^((\d+)(\.\d+)?(\.\d+)?)").expect("valid bare version regex"));

/// Detected server version, normalized to a full semantic triplet.
///
/// Ordering is derived, so version gates read as plain comparisons:
/// `version >= ServerVersion::new(17, 0, 0)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ServerVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl ServerVersion {
    #[must_use]
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Parses the output of `SELECT version()`; falls back to the bare
    /// `SHOW server_version` form. Unparseable text is an error, never
    /// a default: collectors branch on the version for correctness
    /// (column existence, unit conversions).
    ///
    /// # Errors
    ///
    /// Returns [`ScrapeError::VersionParseFailed`] when no version
    /// triplet can be extracted.
    pub fn parse(text: &str) -> Result<Self, ScrapeError> {
        BANNER_REGEX
            .captures(text)
            .or_else(|| BARE_REGEX.captures(text))
            .and_then(|captures| captures.get(1))
            .and_then(|m| Self::parse_triplet(m.as_str()))
            .ok_or_else(|| ScrapeError::VersionParseFailed {
                raw: text.to_string(),
            })
    }

    fn parse_triplet(text: &str) -> Option<Self> {
        let mut parts = text.split('.');
        let major = parts.next()?.parse().ok()?;
        let minor = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
        let patch = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
        Some(Self::new(major, minor, patch))
    }
}

impl fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Applicable server version window of a collector.
#[derive(Clone, Copy, Debug, Default)]
pub struct VersionRange {
    pub min: Option<ServerVersion>,
    pub max: Option<ServerVersion>,
}

impl VersionRange {
    pub const ANY: Self = Self {
        min: None,
        max: None,
    };

    #[must_use]
    pub const fn at_least(min: ServerVersion) -> Self {
        Self {
            min: Some(min),
            max: None,
        }
    }

    #[must_use]
    pub fn contains(self, version: ServerVersion) -> bool {
        self.min.is_none_or(|min| version >= min) && self.max.is_none_or(|max| version < max)
    }
}

/// Picks the most version-appropriate variant from a declared list.
///
/// Each entry declares the version that introduced it; the newest
/// variant whose introduction version is at or below the detected
/// server version wins. Pure function, no state.
pub struct VersionGate;

impl VersionGate {
    pub fn select<T>(version: ServerVersion, variants: &[(ServerVersion, T)]) -> Option<&T> {
        variants
            .iter()
            .filter(|(introduced, _)| *introduced <= version)
            .max_by_key(|(introduced, _)| *introduced)
            .map(|(_, variant)| variant)
    }
}
