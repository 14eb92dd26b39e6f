//! Execution configuration
//!
//! Tunables for plan selection, proximity search and yielding. Every field
//! has a default, so an empty JSON object is a complete configuration.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for configuration loading
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Trial period sizing and plan cache policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanSelectionConfig {
    /// Minimum number of work rounds in a trial (default: 10000)
    #[serde(default = "default_works")]
    pub works: u64,

    /// Fraction of the collection size to use as the round budget when
    /// that exceeds `works` (default: 0.29)
    #[serde(default = "default_collection_fraction")]
    pub collection_fraction: f64,

    /// Cap on results buffered per candidate (default: 101)
    #[serde(default = "default_max_results")]
    pub max_results: u64,

    /// Whether winners may be written to the plan cache (default: true)
    #[serde(default = "default_true")]
    pub cache_enabled: bool,
}

fn default_works() -> u64 {
    10_000
}

fn default_collection_fraction() -> f64 {
    0.29
}

fn default_max_results() -> u64 {
    101
}

fn default_true() -> bool {
    true
}

impl Default for PlanSelectionConfig {
    fn default() -> Self {
        Self {
            works: default_works(),
            collection_fraction: default_collection_fraction(),
            max_results: default_max_results(),
            cache_enabled: default_true(),
        }
    }
}

impl PlanSelectionConfig {
    /// Number of rounds for a collection of `num_records` records
    pub fn trial_works(&self, num_records: u64) -> u64 {
        let scaled = (self.collection_fraction * num_records as f64) as u64;
        self.works.max(scaled)
    }

    /// Results to buffer per candidate for a query asking for `limit`
    pub fn trial_results(&self, limit: Option<u64>) -> u64 {
        match limit {
            Some(limit) => limit.min(self.max_results),
            None => self.max_results,
        }
    }
}

/// Proximity search tunables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NearConfig {
    /// An interval that buffered fewer results doubles the next
    /// increment (default: 300)
    #[serde(default = "default_low_watermark")]
    pub low_buffer_watermark: u64,

    /// An interval that buffered more results halves the next increment
    /// (default: 600)
    #[serde(default = "default_high_watermark")]
    pub high_buffer_watermark: u64,

    /// Most cells used to cover one interval (default: 16)
    #[serde(default = "default_max_covering_cells")]
    pub max_covering_cells: usize,

    /// Bits per coordinate in 2D index keys (default: 26)
    #[serde(default = "default_geohash_bits")]
    pub geohash_bits: u32,
}

fn default_low_watermark() -> u64 {
    300
}

fn default_high_watermark() -> u64 {
    600
}

fn default_max_covering_cells() -> usize {
    16
}

fn default_geohash_bits() -> u32 {
    26
}

impl Default for NearConfig {
    fn default() -> Self {
        Self {
            low_buffer_watermark: default_low_watermark(),
            high_buffer_watermark: default_high_watermark(),
            max_covering_cells: default_max_covering_cells(),
            geohash_bits: default_geohash_bits(),
        }
    }
}

/// Automatic yield schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YieldConfig {
    /// Yield after this many work calls (default: 128)
    #[serde(default = "default_yield_iterations")]
    pub iterations: u64,

    /// Yield after this many milliseconds (default: 10)
    #[serde(default = "default_yield_period_ms")]
    pub period_ms: u64,
}

fn default_yield_iterations() -> u64 {
    128
}

fn default_yield_period_ms() -> u64 {
    10
}

impl Default for YieldConfig {
    fn default() -> Self {
        Self {
            iterations: default_yield_iterations(),
            period_ms: default_yield_period_ms(),
        }
    }
}

/// Top-level execution configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default)]
    pub plan_selection: PlanSelectionConfig,

    #[serde(default)]
    pub near: NearConfig,

    #[serde(default)]
    pub yielding: YieldConfig,

    /// Read every index-located document into the working set before
    /// yielding (default: false)
    #[serde(default)]
    pub force_fetch_on_save: bool,
}

impl ExecutionConfig {
    /// Parses and validates a JSON configuration
    pub fn from_json_str(json: &str) -> ConfigResult<Self> {
        let config: ExecutionConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON configuration file
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        let plan = &self.plan_selection;
        if plan.works == 0 {
            return Err(ConfigError::invalid("plan_selection.works", "must be non-zero"));
        }
        if !(plan.collection_fraction > 0.0 && plan.collection_fraction <= 1.0) {
            return Err(ConfigError::invalid(
                "plan_selection.collection_fraction",
                format!("{} is not in (0, 1]", plan.collection_fraction),
            ));
        }
        if plan.max_results == 0 {
            return Err(ConfigError::invalid("plan_selection.max_results", "must be non-zero"));
        }

        let near = &self.near;
        if near.low_buffer_watermark >= near.high_buffer_watermark {
            return Err(ConfigError::invalid(
                "near.low_buffer_watermark",
                format!(
                    "{} must be below high_buffer_watermark {}",
                    near.low_buffer_watermark, near.high_buffer_watermark
                ),
            ));
        }
        if near.max_covering_cells == 0 {
            return Err(ConfigError::invalid("near.max_covering_cells", "must be non-zero"));
        }
        if !(1..=32).contains(&near.geohash_bits) {
            return Err(ConfigError::invalid(
                "near.geohash_bits",
                format!("{} is not in 1..=32", near.geohash_bits),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = ExecutionConfig::default();
        assert_eq!(config.plan_selection.works, 10_000);
        assert_eq!(config.plan_selection.max_results, 101);
        assert_eq!(config.near.low_buffer_watermark, 300);
        assert_eq!(config.near.high_buffer_watermark, 600);
        assert_eq!(config.yielding.iterations, 128);
        assert!(!config.force_fetch_on_save);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_json_is_default() {
        let config = ExecutionConfig::from_json_str("{}").unwrap();
        assert_eq!(config, ExecutionConfig::default());
    }

    #[test]
    fn test_partial_section() {
        let config =
            ExecutionConfig::from_json_str(r#"{"near": {"high_buffer_watermark": 1000}}"#).unwrap();
        assert_eq!(config.near.high_buffer_watermark, 1000);
        assert_eq!(config.near.low_buffer_watermark, 300);
    }

    #[test]
    fn test_trial_sizing() {
        let plan = PlanSelectionConfig::default();
        assert_eq!(plan.trial_works(1_000), 10_000);
        let large = plan.trial_works(100_000);
        assert!(large > 28_000 && large <= 29_000);
        assert_eq!(plan.trial_results(Some(5)), 5);
        assert_eq!(plan.trial_results(Some(1_000)), 101);
        assert_eq!(plan.trial_results(None), 101);
    }

    #[test]
    fn test_rejects_inverted_watermarks() {
        let err = ExecutionConfig::from_json_str(
            r#"{"near": {"low_buffer_watermark": 700, "high_buffer_watermark": 600}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "near.low_buffer_watermark", .. }));
    }

    #[test]
    fn test_rejects_bad_fraction_and_bits() {
        let err = ExecutionConfig::from_json_str(r#"{"plan_selection": {"collection_fraction": 0}}"#)
            .unwrap_err();
        assert!(err.to_string().contains("collection_fraction"));

        let err = ExecutionConfig::from_json_str(r#"{"near": {"geohash_bits": 40}}"#).unwrap_err();
        assert!(err.to_string().contains("geohash_bits"));
    }

    #[test]
    fn test_parse_error() {
        let err = ExecutionConfig::from_json_str("{not json").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"yielding": {{"iterations": 4}}, "force_fetch_on_save": true}}"#).unwrap();

        let config = ExecutionConfig::load(file.path()).unwrap();
        assert_eq!(config.yielding.iterations, 4);
        assert!(config.force_fetch_on_save);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = ExecutionConfig::load(dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
