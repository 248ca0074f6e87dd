//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.proxkit.toml` files. Explicit command-line flags always win over
//! file settings; file settings win over built-in defaults.

use crate::analysis::{NearMethod, NearOptions, StatsContext, Thresholds};
use crate::cli::{Args, Command, NearOptionArgs};
use crate::models::Statistic;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default configuration file name.
pub const CONFIG_FILE: &str = ".proxkit.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Near analysis settings.
    #[serde(default)]
    pub near: NearConfig,

    /// Scoring settings.
    #[serde(default)]
    pub scoring: ScoringConfig,

    /// Neighborhood statistics settings.
    #[serde(default)]
    pub neighbors: NeighborsConfig,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Enable verbose logging by default.
    #[serde(default)]
    pub verbose: bool,

    /// Maximum length of generated field names.
    #[serde(default = "default_max_field_length")]
    pub max_field_length: usize,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            max_field_length: default_max_field_length(),
        }
    }
}

fn default_max_field_length() -> usize {
    64
}

/// Near analysis settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NearConfig {
    /// Distance method.
    #[serde(default)]
    pub method: NearMethod,

    /// Search radius; unlimited when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_radius: Option<f64>,

    /// Write X_/Y_ location fields.
    #[serde(default)]
    pub location: bool,

    /// Write ANGLE_ fields.
    #[serde(default)]
    pub angle: bool,

    /// Write FID_ fields.
    #[serde(default)]
    pub fid: bool,
}

/// Threshold scoring settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    /// Upper bound (inclusive). Required, from here or `--upper`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upper: Option<f64>,

    /// Lower bound (inclusive).
    #[serde(default)]
    pub lower: f64,

    /// Score for values within the bounds.
    #[serde(default = "default_within_score")]
    pub within_score: f64,

    /// Score for values outside the bounds.
    #[serde(default)]
    pub outside_score: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            upper: None,
            lower: 0.0,
            within_score: default_within_score(),
            outside_score: 0.0,
        }
    }
}

fn default_within_score() -> f64 {
    1.0
}

/// Neighborhood statistics settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NeighborsConfig {
    /// Statistics to compute: any of "sum", "mean", "std".
    #[serde(default = "default_statistics")]
    pub statistics: Vec<String>,

    /// Weight neighbors by the relation's weights.
    #[serde(default = "default_true")]
    pub use_weights: bool,
}

impl Default for NeighborsConfig {
    fn default() -> Self {
        Self {
            statistics: default_statistics(),
            use_weights: true,
        }
    }
}

fn default_statistics() -> Vec<String> {
    Statistic::ALL.iter().map(|s| s.name().to_string()).collect()
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(CONFIG_FILE);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// Only values the user actually passed override the file.
    pub fn merge_with_args(&mut self, args: &Args) {
        if args.verbose {
            self.general.verbose = true;
        }

        match &args.command {
            Command::Near(near) => self.merge_near(&near.options),
            Command::NearFilter(near) => self.merge_near(&near.options),
            Command::Score(score) => {
                if let Some(upper) = score.upper {
                    self.scoring.upper = Some(upper);
                }
                if let Some(lower) = score.lower {
                    self.scoring.lower = lower;
                }
                if let Some(within) = score.within_score {
                    self.scoring.within_score = within;
                }
                if let Some(outside) = score.outside_score {
                    self.scoring.outside_score = outside;
                }
            }
            Command::NeighborStats(stats) => {
                if let Some(ref statistics) = stats.stats {
                    self.neighbors.statistics = statistics.clone();
                }
                if stats.no_weights {
                    self.neighbors.use_weights = false;
                }
            }
            Command::InitConfig => {}
        }
    }

    fn merge_near(&mut self, options: &NearOptionArgs) {
        if let Some(method) = options.method {
            self.near.method = method;
        }
        if let Some(radius) = options.search_radius {
            self.near.search_radius = Some(radius);
        }

        // Flags can only switch features on.
        self.near.location |= options.location;
        self.near.angle |= options.angle;
        self.near.fid |= options.fid;
    }

    /// Near options for this run.
    pub fn near_options(&self) -> NearOptions {
        NearOptions {
            search_radius: self.near.search_radius,
            location: self.near.location,
            angle: self.near.angle,
            fid: self.near.fid,
            method: self.near.method,
            max_field_length: self.general.max_field_length,
        }
    }

    /// Scoring thresholds for this run. Fails if no upper bound was given.
    pub fn thresholds(&self) -> Result<Thresholds> {
        let Some(upper) = self.scoring.upper else {
            bail!("An upper threshold is required (--upper or [scoring].upper in {})", CONFIG_FILE);
        };

        if upper < self.scoring.lower {
            bail!(
                "Upper threshold {} is below lower threshold {}",
                upper,
                self.scoring.lower
            );
        }

        Ok(Thresholds {
            upper,
            lower: self.scoring.lower,
            within_score: self.scoring.within_score,
            outside_score: self.scoring.outside_score,
        })
    }

    /// Aggregation context for the given fields. Unsupported statistic
    /// names are dropped here.
    pub fn stats_context(&self, fields: &[String]) -> StatsContext {
        StatsContext::new(
            fields.to_vec(),
            Statistic::parse_lenient(&self.neighbors.statistics),
            self.neighbors.use_weights,
        )
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}
