//! Engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Options recognised by [`crate::DeductionEngine`].
///
/// Durations serialize as whole milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Total attempts per pair query (1 = no retries).
    pub max_retries: u32,
    #[serde(with = "duration_ms")]
    pub retry_delay: Duration,
    /// Pause after every logical query, success or failure.
    #[serde(with = "duration_ms")]
    pub inter_query_delay: Duration,
    /// Limit for a single attempt.
    #[serde(with = "duration_ms")]
    pub query_timeout: Duration,
    /// Explicit allow-list of source ids or names.
    pub source_filter: Option<Vec<String>>,
    /// Tried before the catalog-order candidates; the first entry is the baseline source.
    pub baseline_triple_override: Option<[String; 3]>,
    /// Cap on selected sources, applied after filtering.
    pub max_sources: Option<usize>,
    /// Cap on candidate triples tried before giving up.
    pub max_baseline_triples: Option<usize>,
    /// Concurrent propagation queries (1 = sequential).
    pub propagation_concurrency: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
            inter_query_delay: Duration::from_secs(2),
            query_timeout: Duration::from_secs(60),
            source_filter: None,
            baseline_triple_override: None,
            max_sources: None,
            max_baseline_triples: None,
            propagation_concurrency: 1,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_retries == 0 {
            return Err(ConfigError::ZeroRetries);
        }
        if self.propagation_concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        if let Some(triple) = &self.baseline_triple_override {
            for (i, name) in triple.iter().enumerate() {
                if triple[..i].iter().any(|other| other.trim() == name.trim()) {
                    return Err(ConfigError::DuplicateBaselineSource(name.clone()));
                }
            }
        }
        Ok(())
    }

    /// Zero every delay; convenient for fixtures and tests.
    pub fn without_delays(mut self) -> Self {
        self.retry_delay = Duration::ZERO;
        self.inter_query_delay = Duration::ZERO;
        self
    }
}

/// Parse a comma-separated source allow-list.
///
/// A `#` starts a trailing comment; a value that starts with `#` yields
/// nothing. Blank items are dropped.
pub fn parse_source_filter(raw: &str) -> Vec<String> {
    let raw = raw.trim();
    let without_comment = match raw.find('#') {
        Some(idx) => &raw[..idx],
        None => raw,
    };
    without_comment
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.max_retries, 3);
        assert_eq!(cfg.propagation_concurrency, 1);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_retries() {
        let cfg = EngineConfig {
            max_retries: 0,
            ..Default::default()
        };
        assert_eq!(cfg.validate(), Err(ConfigError::ZeroRetries));
    }

    #[test]
    fn test_validate_rejects_duplicate_override() {
        let cfg = EngineConfig {
            baseline_triple_override: Some(["A".into(), "B".into(), " A".into()]),
            ..Default::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::DuplicateBaselineSource(_))
        ));
    }

    #[test]
    fn test_serde_uses_milliseconds() {
        let cfg = EngineConfig::default();
        let json = serde_json::to_value(&cfg).unwrap();
        assert_eq!(json["retry_delay"], 1000);
        assert_eq!(json["inter_query_delay"], 2000);

        let partial: EngineConfig =
            serde_json::from_str(r#"{"max_retries": 5, "retry_delay": 250}"#).unwrap();
        assert_eq!(partial.max_retries, 5);
        assert_eq!(partial.retry_delay, Duration::from_millis(250));
        assert_eq!(partial.query_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_parse_source_filter_strips_comment() {
        assert_eq!(
            parse_source_filter("Jane Doe (Site), Bob ,, Carl # trailing note"),
            vec!["Jane Doe (Site)", "Bob", "Carl"]
        );
        assert!(parse_source_filter("# Jane, Bob").is_empty());
        assert!(parse_source_filter("   ").is_empty());
    }
}
