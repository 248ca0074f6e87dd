//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation. Tunables are `Option`s so that values from
//! `.proxkit.toml` apply unless a flag is given.

use crate::analysis::NearMethod;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

/// Proxkit - proximity and neighborhood analysis for point tables
///
/// Derive distance-to-nearest fields for several near layers, score them
/// against thresholds and summarize attributes over a spatial weights
/// relation.
///
/// Examples:
///   proxkit near -i homes.geojson -n parks.geojson,schools.geojson --angle
///   proxkit near-filter -i homes.geojson -n amenities.geojson --filter-field KIND
///   proxkit score -i homes.geojson --fields DIST_parks,DIST_schools --upper 500
///   proxkit neighbor-stats -i tracts.geojson --fields POP -w weights.json -o out.geojson
///   proxkit init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Path to configuration file
    ///
    /// If not specified, looks for .proxkit.toml in the current directory
    #[arg(short, long, value_name = "FILE", global = true, env = "PROXKIT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Add nearest-feature fields for each near layer
    Near(NearArgs),

    /// Add nearest-feature fields for each unique value of a field in one near layer
    NearFilter(NearFilterArgs),

    /// Add threshold score fields for existing numeric fields
    Score(ScoreArgs),

    /// Summarize attributes over a spatial weights relation
    NeighborStats(NeighborStatsArgs),

    /// Generate a default .proxkit.toml configuration file
    InitConfig,
}

/// Flags shared by `near` and `near-filter`.
#[derive(clap::Args, Debug, Clone, Default)]
pub struct NearOptionArgs {
    /// Ignore near features farther than this distance
    #[arg(long, value_name = "DIST")]
    pub search_radius: Option<f64>,

    /// Also write X_ and Y_ fields with the nearest feature's location
    #[arg(long)]
    pub location: bool,

    /// Also write ANGLE_ fields
    #[arg(long)]
    pub angle: bool,

    /// Also write FID_ fields with the nearest feature's id
    #[arg(long)]
    pub fid: bool,

    /// Distance method (planar, geodesic)
    #[arg(long, value_name = "METHOD")]
    pub method: Option<NearMethod>,
}

#[derive(clap::Args, Debug, Clone)]
pub struct NearArgs {
    /// Input feature table
    #[arg(short, long, value_name = "FILE")]
    pub input: PathBuf,

    /// Near feature tables (comma-separated or repeated)
    #[arg(short, long, value_name = "FILES", value_delimiter = ',', required = true)]
    pub near: Vec<PathBuf>,

    /// Write the result here instead of updating the input
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    #[command(flatten)]
    pub options: NearOptionArgs,
}

#[derive(clap::Args, Debug, Clone)]
pub struct NearFilterArgs {
    /// Input feature table
    #[arg(short, long, value_name = "FILE")]
    pub input: PathBuf,

    /// Near feature table to split
    #[arg(short, long, value_name = "FILE")]
    pub near: PathBuf,

    /// Field whose unique values define the near layers
    #[arg(long, value_name = "FIELD")]
    pub filter_field: String,

    /// Write the result here instead of updating the input
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    #[command(flatten)]
    pub options: NearOptionArgs,
}

#[derive(clap::Args, Debug, Clone)]
pub struct ScoreArgs {
    /// Input feature table
    #[arg(short, long, value_name = "FILE")]
    pub input: PathBuf,

    /// Fields to score (comma-separated)
    #[arg(long, value_name = "FIELDS", value_delimiter = ',', required = true)]
    pub fields: Vec<String>,

    /// Upper bound, inclusive
    #[arg(long, allow_negative_numbers = true)]
    pub upper: Option<f64>,

    /// Lower bound, inclusive
    #[arg(long, allow_negative_numbers = true)]
    pub lower: Option<f64>,

    /// Score for values within the bounds
    #[arg(long, allow_negative_numbers = true)]
    pub within_score: Option<f64>,

    /// Score for values outside the bounds
    #[arg(long, allow_negative_numbers = true)]
    pub outside_score: Option<f64>,

    /// Write the result here instead of updating the input
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,
}

#[derive(clap::Args, Debug, Clone)]
pub struct NeighborStatsArgs {
    /// Input feature table
    #[arg(short, long, value_name = "FILE")]
    pub input: PathBuf,

    /// Attribute fields to summarize (comma-separated)
    #[arg(long, value_name = "FIELDS", value_delimiter = ',', required = true)]
    pub fields: Vec<String>,

    /// Spatial weights relation (JSON)
    #[arg(short, long, value_name = "FILE")]
    pub weights: PathBuf,

    /// Output feature table
    #[arg(short, long, value_name = "FILE")]
    pub output: PathBuf,

    /// Statistics to compute (comma-separated: sum, mean, std)
    #[arg(long, value_name = "STATS", value_delimiter = ',')]
    pub stats: Option<Vec<String>>,

    /// Ignore the relation's weights
    #[arg(long)]
    pub no_weights: bool,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        match &self.command {
            Command::Near(near) => {
                require_file(&near.input)?;
                for path in &near.near {
                    require_file(path)?;
                }
                validate_radius(near.options.search_radius)?;
            }
            Command::NearFilter(near) => {
                require_file(&near.input)?;
                require_file(&near.near)?;
                if near.filter_field.trim().is_empty() {
                    return Err("Filter field must not be empty".to_string());
                }
                validate_radius(near.options.search_radius)?;
            }
            Command::Score(score) => {
                require_file(&score.input)?;
                require_fields(&score.fields)?;
                if let (Some(upper), Some(lower)) = (score.upper, score.lower) {
                    if upper < lower {
                        return Err(format!(
                            "Upper bound {} is below lower bound {}",
                            upper, lower
                        ));
                    }
                }
            }
            Command::NeighborStats(stats) => {
                require_file(&stats.input)?;
                require_file(&stats.weights)?;
                require_fields(&stats.fields)?;
                if same_file(&stats.output, &stats.input) {
                    return Err("Output must differ from the input table".to_string());
                }
            }
            Command::InitConfig => {}
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}

fn require_file(path: &Path) -> Result<(), String> {
    if !path.is_file() {
        return Err(format!("File does not exist: {}", path.display()));
    }
    Ok(())
}

/// Whether two paths name the same file once `.`/`..` segments and
/// symlinks in existing directories are resolved. `path` may not exist yet.
fn same_file(path: &Path, existing: &Path) -> bool {
    let Ok(existing) = existing.canonicalize() else {
        return path == existing;
    };

    let resolved = path.canonicalize().or_else(|_| {
        let parent = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let name = path.file_name().unwrap_or_default();
        parent.canonicalize().map(|p| p.join(name))
    });

    match resolved {
        Ok(resolved) => resolved == existing,
        Err(_) => path == existing,
    }
}

fn require_fields(fields: &[String]) -> Result<(), String> {
    if fields.iter().all(|f| f.trim().is_empty()) {
        return Err("At least one field is required".to_string());
    }
    Ok(())
}

fn validate_radius(radius: Option<f64>) -> Result<(), String> {
    match radius {
        Some(r) if !(r.is_finite() && r > 0.0) => {
            Err("Search radius must be a positive number".to_string())
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{NamedTempFile, TempDir};

    fn make_args(command: Command) -> Args {
        Args {
            command,
            config: None,
            verbose: false,
            quiet: false,
        }
    }

    fn score_command(input: PathBuf) -> Command {
        Command::Score(ScoreArgs {
            input,
            fields: vec!["DIST_parks".to_string()],
            upper: Some(100.0),
            lower: Some(0.0),
            within_score: None,
            outside_score: None,
            output: None,
        })
    }

    #[test]
    fn test_parse_near_subcommand() {
        let args = Args::try_parse_from([
            "proxkit",
            "near",
            "-i",
            "homes.geojson",
            "-n",
            "parks.geojson,schools.geojson",
            "--angle",
            "--method",
            "geodesic",
        ])
        .unwrap();

        match args.command {
            Command::Near(near) => {
                assert_eq!(near.near.len(), 2);
                assert!(near.options.angle);
                assert!(!near.options.fid);
                assert_eq!(near.options.method, Some(NearMethod::Geodesic));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_global_flags_after_subcommand() {
        let args = Args::try_parse_from([
            "proxkit",
            "score",
            "-i",
            "homes.geojson",
            "--fields",
            "DIST_a,DIST_b",
            "--lower",
            "-5",
            "-v",
        ])
        .unwrap();

        assert!(args.verbose);
        match args.command {
            Command::Score(score) => {
                assert_eq!(score.fields, vec!["DIST_a", "DIST_b"]);
                assert_eq!(score.lower, Some(-5.0));
                assert_eq!(score.upper, None);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_validation_missing_input() {
        let args = make_args(score_command(PathBuf::from("/nonexistent/homes.geojson")));
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_bounds() {
        let file = NamedTempFile::new().unwrap();
        let mut args = make_args(score_command(file.path().to_path_buf()));
        assert!(args.validate().is_ok());

        if let Command::Score(ref mut score) = args.command {
            score.lower = Some(500.0);
        }
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_output_aliasing_input_is_rejected() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("tracts.geojson");
        let weights = dir.path().join("weights.json");
        std::fs::write(&input, "{}").unwrap();
        std::fs::write(&weights, "{}").unwrap();

        let stats_command = |output: PathBuf| {
            make_args(Command::NeighborStats(NeighborStatsArgs {
                input: input.clone(),
                fields: vec!["POP".to_string()],
                weights: weights.clone(),
                output,
                stats: None,
                no_weights: false,
            }))
        };

        let aliased = dir.path().join(".").join("tracts.geojson");
        assert!(stats_command(aliased).validate().is_err());

        let sub = dir.path().join("sub");
        std::fs::create_dir(&sub).unwrap();
        let dotdot = sub.join("..").join("tracts.geojson");
        assert!(stats_command(dotdot).validate().is_err());

        let fresh = dir.path().join("out.geojson");
        assert!(stats_command(fresh).validate().is_ok());
    }

    #[test]
    fn test_validation_conflicting_options() {
        let mut args = make_args(Command::InitConfig);
        args.verbose = true;
        args.quiet = true;
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_radius() {
        assert!(validate_radius(None).is_ok());
        assert!(validate_radius(Some(10.0)).is_ok());
        assert!(validate_radius(Some(0.0)).is_err());
        assert!(validate_radius(Some(f64::NAN)).is_err());
    }

    #[test]
    fn test_log_level() {
        let mut args = make_args(Command::InitConfig);
        assert_eq!(args.log_level(), tracing::Level::INFO);

        args.verbose = true;
        assert_eq!(args.log_level(), tracing::Level::DEBUG);

        args.verbose = false;
        args.quiet = true;
        assert_eq!(args.log_level(), tracing::Level::ERROR);
    }
}
