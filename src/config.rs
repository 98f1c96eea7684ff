//! Configuration management
//!
//! Thresholds and windows for clustering, tiering and outcome measurement.
//! These were chosen empirically, so they live here instead of in code.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::embeddings::EmbeddingConfig;
use crate::error::{EngineError, EngineResult};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// SQLite database holding error events and the intervention ledger
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    /// Error pattern clustering
    #[serde(default)]
    pub clustering: ClusteringConfig,
    /// Frequency thresholds and escalation counts
    #[serde(default)]
    pub tiers: TierConfig,
    /// Outcome measurement
    #[serde(default)]
    pub ledger: LedgerConfig,
    /// Embedding provider
    #[serde(default)]
    pub embeddings: EmbeddingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusteringConfig {
    /// Stop merging once the best average-linkage similarity drops below this
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
    /// Clusters smaller than this are dropped before prioritization
    #[serde(default = "default_min_cluster_size")]
    pub min_cluster_size: usize,
    /// Give up on the embedding provider after this long and fall back
    #[serde(default = "default_embedding_timeout_ms")]
    pub embedding_timeout_ms: u64,
    /// Embedding batches in flight at once
    #[serde(default = "default_embedding_concurrency")]
    pub embedding_concurrency: usize,
}

fn default_similarity_threshold() -> f32 {
    0.65
}

fn default_min_cluster_size() -> usize {
    2
}

fn default_embedding_timeout_ms() -> u64 {
    10_000
}

fn default_embedding_concurrency() -> usize {
    4
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
            min_cluster_size: default_min_cluster_size(),
            embedding_timeout_ms: default_embedding_timeout_ms(),
            embedding_concurrency: default_embedding_concurrency(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierConfig {
    /// Frequency (0-100) at which a pattern is surfaced at all
    #[serde(default = "default_nudge_threshold")]
    pub nudge_threshold: u8,
    /// Frequency (0-100) at which a pattern counts as fossilizing
    #[serde(default = "default_fossilization_threshold")]
    pub fossilization_threshold: u8,
    /// Interventions without success before tier 2
    #[serde(default = "default_push_interventions")]
    pub push_interventions: usize,
    /// Interventions without success before tier 3
    #[serde(default = "default_destabilize_interventions")]
    pub destabilize_interventions: usize,
    /// Width of each trend window
    #[serde(default = "default_trend_window_days")]
    pub trend_window_days: i64,
    /// current/previous below this is improving
    #[serde(default = "default_improving_ratio")]
    pub improving_ratio: f64,
    /// current/previous above this is worsening
    #[serde(default = "default_worsening_ratio")]
    pub worsening_ratio: f64,
    /// Tier 3 falls back to tier 1 when no intervention happened for this many days
    #[serde(default)]
    pub dormancy_reset_days: Option<i64>,
}

fn default_nudge_threshold() -> u8 {
    40
}

fn default_fossilization_threshold() -> u8 {
    70
}

fn default_push_interventions() -> usize {
    2
}

fn default_destabilize_interventions() -> usize {
    4
}

fn default_trend_window_days() -> i64 {
    7
}

fn default_improving_ratio() -> f64 {
    0.7
}

fn default_worsening_ratio() -> f64 {
    1.3
}

impl Default for TierConfig {
    fn default() -> Self {
        Self {
            nudge_threshold: default_nudge_threshold(),
            fossilization_threshold: default_fossilization_threshold(),
            push_interventions: default_push_interventions(),
            destabilize_interventions: default_destabilize_interventions(),
            trend_window_days: default_trend_window_days(),
            improving_ratio: default_improving_ratio(),
            worsening_ratio: default_worsening_ratio(),
            dormancy_reset_days: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Interventions younger than this are not measured yet
    #[serde(default = "default_measurement_window_days")]
    pub measurement_window_days: i64,
    /// Measure stale interventions on a spawned task during profile reads
    #[serde(default = "default_true")]
    pub measure_in_background: bool,
}

fn default_measurement_window_days() -> i64 {
    3
}

fn default_true() -> bool {
    true
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            measurement_window_days: default_measurement_window_days(),
            measure_in_background: true,
        }
    }
}

fn default_database_path() -> PathBuf {
    data_dir()
        .map(|d| d.join("adaptation.db"))
        .unwrap_or_else(|_| PathBuf::from("adaptation.db"))
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            clustering: ClusteringConfig::default(),
            tiers: TierConfig::default(),
            ledger: LedgerConfig::default(),
            embeddings: EmbeddingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the default location, falling back to defaults
    pub fn load() -> Result<Self> {
        Self::load_from(&config_path()?)
    }

    /// Load configuration from a specific file; a missing file means defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = toml::from_str(&contents)
            .context("Failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a file
    pub fn save_to(&self, path: &Path) -> Result<()> {
        let parent = path.parent()
            .context("Config path has no parent")?;

        std::fs::create_dir_all(parent)
            .context("Failed to create config directory")?;

        let contents = toml::to_string_pretty(self)
            .context("Failed to serialize config")?;

        std::fs::write(path, contents)
            .context("Failed to write config file")?;

        Ok(())
    }

    /// Reject threshold combinations the tier classifier cannot honor
    pub fn validate(&self) -> EngineResult<()> {
        let t = &self.tiers;
        if t.nudge_threshold >= t.fossilization_threshold {
            return Err(EngineError::Config(format!(
                "nudge_threshold ({}) must be below fossilization_threshold ({})",
                t.nudge_threshold, t.fossilization_threshold
            )));
        }
        if t.fossilization_threshold > 100 {
            return Err(EngineError::Config("fossilization_threshold must be at most 100".into()));
        }
        if t.push_interventions == 0 || t.push_interventions > t.destabilize_interventions {
            return Err(EngineError::Config(format!(
                "push_interventions ({}) must be at least 1 and not exceed destabilize_interventions ({})",
                t.push_interventions, t.destabilize_interventions
            )));
        }
        if t.trend_window_days <= 0 || self.ledger.measurement_window_days <= 0 {
            return Err(EngineError::Config("window lengths must be positive".into()));
        }
        if t.improving_ratio > t.worsening_ratio {
            return Err(EngineError::Config("improving_ratio must not exceed worsening_ratio".into()));
        }
        let s = self.clustering.similarity_threshold;
        if !(0.0..=1.0).contains(&s) {
            return Err(EngineError::Config(format!("similarity_threshold {} outside [0, 1]", s)));
        }
        if self.clustering.min_cluster_size == 0 {
            return Err(EngineError::Config("min_cluster_size must be at least 1".into()));
        }
        Ok(())
    }
}

/// Get the configuration file path
pub fn config_path() -> Result<PathBuf> {
    let base = directories::ProjectDirs::from("com", "adaptation-engine", "adaptation-engine")
        .context("Failed to get project directories")?;
    Ok(base.config_dir().join("config.toml"))
}

/// Get the data directory path
pub fn data_dir() -> Result<PathBuf> {
    let base = directories::ProjectDirs::from("com", "adaptation-engine", "adaptation-engine")
        .context("Failed to get project directories")?;
    Ok(base.data_dir().to_path_buf())
}

/// Get default configuration as TOML string
pub fn default_config_toml() -> String {
    let config = Config::default();
    toml::to_string_pretty(&config).unwrap_or_else(|_| "# Default configuration\n".to_string())
}
