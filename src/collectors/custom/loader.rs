use anyhow::{Result, anyhow, bail};
use serde::Deserialize;
use std::collections::BTreeMap;

/// How a result column feeds the exposition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Usage {
    /// Column value becomes a label on every sample of the query.
    Label,
    Gauge,
    Counter,
}

impl Usage {
    fn parse(s: &str) -> Result<Self> {
        match s {
            "LABEL" => Ok(Self::Label),
            "GAUGE" => Ok(Self::Gauge),
            "COUNTER" => Ok(Self::Counter),
            other => Err(anyhow!(
                "unsupported usage {other:?}, expected LABEL|GAUGE|COUNTER"
            )),
        }
    }
}

/// One declared value column of a user query.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValueColumn {
    pub column: String,
    pub usage: Usage,
    pub description: String,
}

/// One parsed user query: metric namespace, SQL, label columns and
/// value columns in declaration order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserQuery {
    pub name: String,
    pub sql: String,
    pub labels: Vec<String>,
    pub values: Vec<ValueColumn>,
}

#[derive(Deserialize)]
struct RawColumn {
    usage: String,
    #[serde(default)]
    description: String,
}

#[derive(Deserialize)]
struct RawQuery {
    query: String,
    #[serde(default)]
    metrics: Vec<BTreeMap<String, RawColumn>>,
}

/// Parses one YAML document of user queries.
///
/// The format is a map of metric namespace to query declaration:
///
/// ```yaml
/// pg_replication:
///   query: "SELECT EXTRACT(EPOCH FROM (now() - pg_last_xact_replay_timestamp())) AS lag"
///   metrics:
///     - lag:
///         usage: "GAUGE"
///         description: "Replication lag behind master in seconds"
/// ```
///
/// # Errors
///
/// Any malformed entry fails the whole document; the caller records
/// the load error for this file and moves on to the next one.
pub fn parse_document(text: &str) -> Result<Vec<UserQuery>> {
    let raw: BTreeMap<String, RawQuery> = serde_yaml::from_str(text)?;

    let mut queries = Vec::with_capacity(raw.len());
    for (name, spec) in raw {
        if spec.query.trim().is_empty() {
            bail!("query {name:?} has an empty SQL statement");
        }

        let mut labels = Vec::new();
        let mut values = Vec::new();
        for entry in &spec.metrics {
            for (column, decl) in entry {
                match Usage::parse(&decl.usage)? {
                    Usage::Label => labels.push(column.clone()),
                    usage @ (Usage::Gauge | Usage::Counter) => values.push(ValueColumn {
                        column: column.clone(),
                        usage,
                        description: if decl.description.is_empty() {
                            format!("User query column {name}_{column}")
                        } else {
                            decl.description.clone()
                        },
                    }),
                }
            }
        }
        if values.is_empty() {
            bail!("query {name:?} declares no GAUGE or COUNTER column");
        }

        queries.push(UserQuery {
            name,
            sql: spec.query,
            labels,
            values,
        });
    }
    Ok(queries)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
pg_postmaster_uptime:
  query: "SELECT count(*) AS seconds FROM pg_stat_activity"
  metrics:
    - seconds:
        usage: "GAUGE"
        description: "Service uptime"
"#;

    #[test]
    #[allow(clippy::unwrap_used)]
    fn parses_single_gauge_query() {
        let queries = parse_document(SAMPLE).unwrap();
        assert_eq!(queries.len(), 1);
        let q = queries.first().unwrap();
        assert_eq!(q.name, "pg_postmaster_uptime");
        assert!(q.labels.is_empty());
        assert_eq!(q.values.first().unwrap().usage, Usage::Gauge);
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn splits_labels_from_values() {
        let text = r#"
pg_custom:
  query: "SELECT datname, sessions FROM some_view"
  metrics:
    - datname:
        usage: "LABEL"
    - sessions:
        usage: "COUNTER"
        description: "Sessions"
"#;
        let queries = parse_document(text).unwrap();
        let q = queries.first().unwrap();
        assert_eq!(q.labels, vec!["datname".to_string()]);
        assert_eq!(q.values.first().unwrap().column, "sessions");
    }

    #[test]
    fn rejects_unknown_usage() {
        let text = r#"
pg_custom:
  query: "SELECT 1 AS x"
  metrics:
    - x:
        usage: "HISTOGRAM"
"#;
        assert!(parse_document(text).is_err());
    }

    #[test]
    fn rejects_query_without_value_column() {
        let text = r#"
pg_custom:
  query: "SELECT datname FROM pg_database"
  metrics:
    - datname:
        usage: "LABEL"
"#;
        assert!(parse_document(text).is_err());
    }

    #[test]
    fn rejects_malformed_yaml() {
        assert!(parse_document("pg_custom:\n  query: [not a").is_err());
    }
}
