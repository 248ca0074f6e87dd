//! Proxkit - proximity and neighborhood analysis for point tables
//!
//! A CLI tool that derives nearest-feature fields for several near layers,
//! scores derived fields against thresholds and computes neighborhood
//! statistics over a spatial weights relation.
//!
//! Exit codes:
//!   0 - Success
//!   1 - Error (bad arguments, unreadable input, missing fields, etc.)

mod analysis;
mod cli;
mod config;
mod error;
mod io;
mod models;

use analysis::near::LayerFields;
use anyhow::{Context, Result};
use cli::{Args, Command, NearArgs, NearFilterArgs, NeighborStatsArgs, ScoreArgs};
use config::{Config, CONFIG_FILE};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle init-config early (no logging needed)
    if let Command::InitConfig = args.command {
        return handle_init_config();
    }

    let mut config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    };
    config.merge_with_args(&args);

    init_logging(&args, &config);

    info!("Proxkit v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);

    if let Err(e) = run(&args, &config) {
        error!("Run failed: {:#}", e);
        eprintln!("\n❌ Error: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}

/// Handle init-config: generate a default .proxkit.toml.
fn handle_init_config() -> Result<()> {
    let path = Path::new(CONFIG_FILE);

    if path.exists() {
        eprintln!("⚠️  {} already exists. Remove it first or edit it manually.", CONFIG_FILE);
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content).with_context(|| format!("Failed to write {}", CONFIG_FILE))?;

    println!("✅ Created {} with default settings.", CONFIG_FILE);
    println!("   Edit it to set near options, score thresholds and statistics.");
    Ok(())
}

/// Initialize logging based on verbosity settings.
fn init_logging(args: &Args, config: &Config) {
    let level = if config.general.verbose && !args.quiet {
        tracing::Level::DEBUG
    } else {
        args.log_level()
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("Warning: a tracing subscriber was already installed");
    }
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<Config> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        return Config::load(config_path);
    }

    // A broken default file is reported rather than silently ignored.
    Ok(Config::load_default()?.unwrap_or_default())
}

fn run(args: &Args, config: &Config) -> Result<()> {
    let start_time = Instant::now();

    match &args.command {
        Command::Near(near) => run_near(near, config, args.quiet)?,
        Command::NearFilter(near) => run_near_filter(near, config, args.quiet)?,
        Command::Score(score) => run_score(score, config)?,
        Command::NeighborStats(stats) => run_neighbor_stats(stats, config)?,
        Command::InitConfig => return Ok(()),
    }

    println!("   Duration: {:.1}s", start_time.elapsed().as_secs_f64());
    Ok(())
}

fn make_progress(len: u64, quiet: bool) -> ProgressBar {
    if quiet {
        return ProgressBar::hidden();
    }

    let progress = ProgressBar::new(len);
    let style = ProgressStyle::with_template("{bar:40.cyan/blue} {pos}/{len} layers  {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    progress.set_style(style);
    progress
}

fn print_layers(layers: &[LayerFields]) {
    for layer in layers {
        println!("     📍 {}: {}", layer.layer, layer.names().join(", "));
    }
}

fn run_near(args: &NearArgs, config: &Config, quiet: bool) -> Result<()> {
    let options = config.near_options();
    let mut input = io::read_table(&args.input)
        .with_context(|| format!("Failed to read {}", args.input.display()))?;
    if input.is_empty() {
        warn!("{} has no features; only the field definitions will change", input.name);
    }

    let layers = args
        .near
        .iter()
        .map(|path| {
            io::read_table(path).with_context(|| format!("Failed to read {}", path.display()))
        })
        .collect::<Result<Vec<_>>>()?;

    println!(
        "📏 Running {:?} near analysis for {} features against {} layers...",
        options.method,
        input.len(),
        layers.len()
    );

    let progress = make_progress(layers.len() as u64, quiet);
    let written = analysis::chained_near_analysis(&mut input, &layers, &options, &progress)?;
    progress.finish_and_clear();

    let output = args.output.as_deref().unwrap_or(&args.input);
    io::write_table(&input, output)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    println!("\n📊 Near Summary:");
    print_layers(&written);
    println!("\n✅ Near analysis complete! Saved to: {}", output.display());
    Ok(())
}

fn run_near_filter(args: &NearFilterArgs, config: &Config, quiet: bool) -> Result<()> {
    let options = config.near_options();
    let mut input = io::read_table(&args.input)
        .with_context(|| format!("Failed to read {}", args.input.display()))?;
    if input.is_empty() {
        warn!("{} has no features; only the field definitions will change", input.name);
    }
    let near = io::read_table(&args.near)
        .with_context(|| format!("Failed to read {}", args.near.display()))?;

    println!(
        "📏 Running {:?} near analysis for {} features, one layer per {} value in {}...",
        options.method,
        input.len(),
        args.filter_field,
        near.name
    );

    let progress = make_progress(0, quiet);
    let written = analysis::chained_near_analysis_filter(
        &mut input,
        &near,
        &args.filter_field,
        &options,
        &progress,
    )?;
    progress.finish_and_clear();

    if written.is_empty() {
        warn!("{} has no non-empty values; no fields were added", args.filter_field);
    }

    let output = args.output.as_deref().unwrap_or(&args.input);
    io::write_table(&input, output)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    println!("\n📊 Near Summary:");
    print_layers(&written);
    println!("\n✅ Near analysis complete! Saved to: {}", output.display());
    Ok(())
}

fn run_score(args: &ScoreArgs, config: &Config) -> Result<()> {
    let thresholds = config.thresholds()?;
    let mut table = io::read_table(&args.input)
        .with_context(|| format!("Failed to read {}", args.input.display()))?;

    println!("🎯 Scoring {} fields of {}...", args.fields.len(), table.name);
    let scored = analysis::chained_scoring(
        &mut table,
        &args.fields,
        &thresholds,
        config.general.max_field_length,
    );

    let output = args.output.as_deref().unwrap_or(&args.input);
    io::write_table(&table, output)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    println!("\n📊 Scoring Summary:");
    for field in &scored {
        println!(
            "     🎯 {} -> {} ({} of {} rows scored)",
            field.source,
            field.score_field,
            field.scored,
            table.len()
        );
    }
    if scored.len() < args.fields.len() {
        println!(
            "   ⚠️  {} fields could not be processed",
            args.fields.len() - scored.len()
        );
    }
    println!("\n✅ Scoring complete! Saved to: {}", output.display());
    Ok(())
}

fn run_neighbor_stats(args: &NeighborStatsArgs, config: &Config) -> Result<()> {
    let table = io::read_table(&args.input)
        .with_context(|| format!("Failed to read {}", args.input.display()))?;
    let weights = io::read_weights(&args.weights)
        .with_context(|| format!("Failed to read {}", args.weights.display()))?;
    let context = config.stats_context(&args.fields);

    println!(
        "🧮 Computing {} neighborhood statistics for {} over {} neighbor pairs...",
        if context.weighted { "weighted" } else { "non-weighted" },
        table.name,
        weights.relations.len()
    );

    let stats = analysis::compute_neighborhood_stats(&table, &weights, &context)?;

    io::write_table(&stats.table, &args.output)
        .with_context(|| format!("Failed to write {}", args.output.display()))?;

    println!("\n📊 Neighborhood Summary:");
    println!("   Source entities: {}", stats.entities);
    println!("   Rows updated: {} of {}", stats.matched, stats.table.len());
    println!("   New fields: {}", stats.columns.join(", "));
    println!(
        "\n✅ Neighborhood statistics complete! Saved to: {}",
        args.output.display()
    );
    Ok(())
}
