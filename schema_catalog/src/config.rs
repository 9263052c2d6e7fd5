//! Configuration handling for schema_catalog

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{Error, Result};

/// Load configuration from a TOML or YAML file
pub fn load_from_file(path: &str) -> Result<Config> {
    let config_str = fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

    let extension = Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("toml")
        .to_lowercase();

    let config: Config = match extension.as_str() {
        "yaml" | "yml" => serde_yaml::from_str(&config_str)
            .map_err(|e| Error::Config(format!("Failed to parse config file: {}", e)))?,
        _ => toml::from_str(&config_str)
            .map_err(|e| Error::Config(format!("Failed to parse config file: {}", e)))?,
    };

    Ok(config)
}

/// Represents the complete catalog configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    pub data_source: DataSourceConfig,
    #[serde(default)]
    pub profiling: ProfilingConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub diagram: DiagramConfig,
    pub logging: Option<LoggingConfig>,
}

/// Connection descriptor and discovery limits for one data source
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DataSourceConfig {
    pub name: String,
    /// One of `postgres`, `sqlite`, `sqlserver`
    pub engine: String,
    pub url: String,
    /// Overrides the database label used in qualified names
    pub database: Option<String>,
    /// Glob patterns; an empty list includes every schema
    #[serde(default)]
    pub include_schemas: Vec<String>,
    #[serde(default)]
    pub exclude_schemas: Vec<String>,
    /// Regular expressions matched against bare table names
    #[serde(default)]
    pub include_tables: Vec<String>,
    #[serde(default)]
    pub exclude_tables: Vec<String>,
    /// Row-count threshold at or above which profiling samples instead of scanning
    #[serde(default = "default_sample_cap")]
    pub sample_cap: u64,
    #[serde(default = "default_sample_size")]
    pub sample_size: u64,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,
}

/// Column profiling settings
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ProfilingConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_column_timeout")]
    pub column_timeout_seconds: u64,
    /// Upper bound on distinct values for the enumeration pattern
    #[serde(default = "default_enumeration_max_distinct")]
    pub enumeration_max_distinct: u64,
}

impl Default for ProfilingConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            column_timeout_seconds: default_column_timeout(),
            enumeration_max_distinct: default_enumeration_max_distinct(),
        }
    }
}

/// Relationship detector tuning
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DetectionConfig {
    #[serde(default = "default_naming_base")]
    pub naming_base_confidence: f64,
    #[serde(default = "default_naming_bonus")]
    pub naming_bonus: f64,
    #[serde(default = "default_naming_penalty")]
    pub naming_penalty: f64,
    /// Heuristic candidates below this confidence are discarded
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
    #[serde(default = "default_min_containment")]
    pub overlap_min_containment: f64,
    /// Column-name similarity a pair needs before its values are compared
    #[serde(default = "default_name_similarity")]
    pub name_similarity_threshold: f64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            naming_base_confidence: default_naming_base(),
            naming_bonus: default_naming_bonus(),
            naming_penalty: default_naming_penalty(),
            min_confidence: default_min_confidence(),
            overlap_min_containment: default_min_containment(),
            name_similarity_threshold: default_name_similarity(),
        }
    }
}

/// Diagram descriptor settings
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DiagramConfig {
    /// Relationships below this confidence do not take part in layering
    #[serde(default = "default_confidence_floor")]
    pub confidence_floor: f64,
    #[serde(default = "default_max_columns")]
    pub max_columns: usize,
}

impl Default for DiagramConfig {
    fn default() -> Self {
        Self {
            confidence_floor: default_confidence_floor(),
            max_columns: default_max_columns(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
    #[serde(default = "default_log_format")]
    pub format: String,
    #[serde(default = "default_true")]
    pub stdout: bool,
}

fn default_sample_cap() -> u64 {
    100_000
}

fn default_sample_size() -> u64 {
    10_000
}

fn default_concurrency() -> usize {
    4
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_top_k() -> usize {
    10
}

fn default_column_timeout() -> u64 {
    60
}

fn default_enumeration_max_distinct() -> u64 {
    20
}

fn default_naming_base() -> f64 {
    0.6
}

fn default_naming_bonus() -> f64 {
    0.2
}

fn default_naming_penalty() -> f64 {
    0.3
}

fn default_min_confidence() -> f64 {
    0.3
}

fn default_min_containment() -> f64 {
    0.3
}

fn default_name_similarity() -> f64 {
    0.3
}

fn default_confidence_floor() -> f64 {
    0.5
}

fn default_max_columns() -> usize {
    10
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_true() -> bool {
    true
}
