use std::fmt;
use std::str::FromStr;

/// Polling tier of a collector.
///
/// Each collector (and each custom query directory) belongs to exactly
/// one tier, so operators can point three Prometheus scrape jobs with
/// different intervals at `/metrics?collect[]=...` without double
/// sampling any series.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MetricResolution {
    High,
    Medium,
    Low,
}

impl MetricResolution {
    /// Directory and flag spelling of the tier.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::High => "hr",
            Self::Medium => "mr",
            Self::Low => "lr",
        }
    }

    #[must_use]
    pub const fn all() -> [Self; 3] {
        [Self::High, Self::Medium, Self::Low]
    }
}

impl fmt::Display for MetricResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricResolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hr" | "high" => Ok(Self::High),
            "mr" | "medium" => Ok(Self::Medium),
            "lr" | "low" => Ok(Self::Low),
            other => Err(format!("unknown resolution {other:?}, expected hr|mr|lr")),
        }
    }
}
