//! zonestats CLI - zonal statistics for project boundaries

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use zonestats_algorithms::vector::{area_ha, generate_zones, perimeter_m};
use zonestats_cloud::BBox;
use zonestats_core::crs::{self, CRS};
use zonestats_core::vector::load_boundary;
use zonestats_core::Boundary;
use zonestats_pipeline::config::boundary_year;
use zonestats_pipeline::{
    derive, discover, export_batch_summary, export_csv, export_derived, export_windows, run_batch,
    run_project, write_csv, PipelineConfig, ProjectStatus, YearRange,
};

// ─── CLI structure ──────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "zonestats")]
#[command(author, version, about = "Zonal statistics over project areas and their surroundings", long_about = None)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Options shared by `run` and `batch`
#[derive(clap::Args)]
struct RunArgs {
    /// Pipeline configuration (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Layers to compute, overriding the configuration
    #[arg(short, long = "layer")]
    layers: Vec<String>,
    /// Project start year; computes the configured number of years before it
    #[arg(short, long)]
    year: Option<i32>,
    /// Evaluate layers sequentially
    #[arg(long)]
    no_parallel: bool,
    /// Write each zone window as GeoTIFF into this directory
    #[arg(long)]
    rasters: Option<PathBuf>,
    /// Write class shares, annual loss and loss rates to this CSV
    #[arg(long)]
    derived: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show information about a boundary file
    Info {
        /// Boundary file (GeoJSON or shapefile)
        input: PathBuf,
    },
    /// List the zones a configuration derives from a boundary
    Zones {
        /// Boundary file (GeoJSON or shapefile)
        input: PathBuf,
        /// Pipeline configuration (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// List known layers and the datasets serving them
    Layers {
        /// Pipeline configuration (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Compute statistics for one project
    Run {
        /// Boundary file (GeoJSON or shapefile)
        input: PathBuf,
        /// Output CSV (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[command(flatten)]
        args: RunArgs,
    },
    /// Compute statistics for every boundary in a directory
    Batch {
        /// Directory of boundary files, or of project folders holding shapefiles
        dir: PathBuf,
        /// Output CSV
        #[arg(short, long, default_value = "results.csv")]
        output: PathBuf,
        /// Per-project summary CSV
        #[arg(short, long)]
        summary: Option<PathBuf>,
        #[command(flatten)]
        args: RunArgs,
    },
}

// ─── Helpers ────────────────────────────────────────────────────────────

fn setup_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");
}

fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .expect("valid template"),
    );
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

fn read_config(path: Option<&Path>) -> Result<PipelineConfig> {
    match path {
        Some(path) => PipelineConfig::from_file(path)
            .with_context(|| format!("Failed to read config {}", path.display())),
        None => Ok(PipelineConfig::default()),
    }
}

/// Configuration with command-line overrides applied, validated.
fn effective_config(args: &RunArgs) -> Result<PipelineConfig> {
    let mut config = read_config(args.config.as_deref())?;
    if !args.layers.is_empty() {
        config.layers = args.layers.clone();
    }
    if let Some(year) = args.year {
        config.years = Some(YearRange {
            start: year - config.years_before as i32,
            end: year,
        });
    }
    if args.no_parallel {
        config.concurrency.parallel = false;
    }
    if args.rasters.is_some() {
        config.export_rasters = true;
    }
    let catalog = config.layer_catalog()?;
    config.validate(&catalog).context("Invalid configuration")?;
    Ok(config)
}

fn read_boundary(path: &Path, config: &PipelineConfig) -> Result<Boundary> {
    let pb = spinner("Reading boundary...");
    let boundary = load_boundary(path, &config.loader).context("Failed to read boundary")?;
    pb.finish_and_clear();
    Ok(boundary)
}

fn done(name: &str, path: &Path, elapsed: std::time::Duration) {
    println!("{} saved to: {}", name, path.display());
    println!("  Processing time: {:.2?}", elapsed);
}

// ─── Main ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    match cli.command {
        Commands::Info { input } => {
            let config = PipelineConfig::default();
            let boundary = read_boundary(&input, &config)?;
            let bounds = crs::transform_multipolygon(&boundary.geometry, &boundary.crs, &CRS::wgs84())
                .ok()
                .and_then(|g| BBox::of(&g));
            let utm = crs::projected_zone_for(&boundary.geometry, &boundary.crs)?;

            println!("File: {}", input.display());
            println!("Project: {}", boundary.id);
            println!("CRS: {}", boundary.crs);
            println!("Parts: {}", boundary.parts());
            if let Some(b) = bounds {
                println!(
                    "Bounds (lon/lat): ({:.6}, {:.6}) - ({:.6}, {:.6})",
                    b.min_x, b.min_y, b.max_x, b.max_y
                );
            }
            println!("Metric CRS: EPSG:{}", utm.epsg());
            println!("Area: {:.2} ha", area_ha(&boundary.geometry, &boundary.crs)?);
            println!("Perimeter: {:.1} m", perimeter_m(&boundary.geometry, &boundary.crs)?);
            if let Some(year) = boundary_year(&boundary) {
                println!("Project year: {}", year);
            }
            if !boundary.properties.is_empty() {
                let mut keys: Vec<&String> = boundary.properties.keys().collect();
                keys.sort();
                println!("\nProperties:");
                for key in keys {
                    println!("  {}: {:?}", key, boundary.properties[key]);
                }
            }
        }

        Commands::Zones { input, config } => {
            let config = read_config(config.as_deref())?;
            let boundary = read_boundary(&input, &config)?;
            let zones = generate_zones(&boundary, &config.zones).context("Failed to derive zones")?;
            println!("{:<12} {:<28} {:>12} {:>6}", "zone", "rule", "area (ha)", "parts");
            for zone in &zones {
                let area = area_ha(&zone.geometry, &zone.crs)?;
                println!(
                    "{:<12} {:<28} {:>12.2} {:>6}",
                    zone.name,
                    zone.rule.describe(),
                    area,
                    zone.geometry.0.len()
                );
            }
        }

        Commands::Layers { config } => {
            let config = read_config(config.as_deref())?;
            let resolver = config.build_resolver()?;
            let session = config.session()?;
            let datasets = resolver.datasets(&session).context("Failed to list datasets")?;

            for spec in resolver.catalog().layers() {
                println!(
                    "{} ({}; {:?}, {:?}, unit '{}')",
                    spec.name, spec.source, spec.temporal, spec.semantics, spec.unit
                );
                for ds in datasets.iter().filter(|d| d.layer == spec.name) {
                    let years = ds
                        .years
                        .map(|(a, b)| format!("{}-{}", a, b))
                        .unwrap_or_else(|| "any year".to_string());
                    println!(
                        "  {} via {} at {} m, {}{}",
                        ds.id,
                        ds.backend,
                        ds.resolution_m,
                        years,
                        if ds.default { " (default)" } else { "" }
                    );
                }
            }
        }

        Commands::Run { input, output, args } => {
            let config = effective_config(&args)?;
            let catalog = config.layer_catalog()?;
            let resolver = config.build_resolver()?;
            let session = config.session()?;
            let boundary = read_boundary(&input, &config)?;

            let start = Instant::now();
            let pb = spinner(&format!("Computing {}...", boundary.id));
            let run = run_project(&boundary, &config, &resolver, &session)
                .with_context(|| format!("Project {} failed", boundary.id))?;
            pb.finish_and_clear();
            let elapsed = start.elapsed();

            info!(
                computed = run.table.observations().count(),
                missing = run.table.missing().count(),
                "results"
            );
            match output {
                Some(path) => {
                    export_csv(&path, [&run.table], &catalog).context("Failed to write CSV")?;
                    done("Results", &path, elapsed);
                }
                None => write_csv(std::io::stdout().lock(), [&run.table], &catalog)?,
            }
            if let Some(dir) = args.rasters {
                let written = export_windows(&dir, &run.windows).context("Failed to write rasters")?;
                info!(count = written.len(), dir = %dir.display(), "wrote zone windows");
            }
            if let Some(path) = args.derived {
                let rows = derive(&run, &catalog)?;
                export_derived(&path, &rows).context("Failed to write derived figures")?;
                done("Derived figures", &path, elapsed);
            }
        }

        Commands::Batch {
            dir,
            output,
            summary,
            args,
        } => {
            let config = effective_config(&args)?;
            let catalog = config.layer_catalog()?;
            let resolver = config.build_resolver()?;
            let session = config.session()?;
            let sources = discover(&dir).with_context(|| format!("Cannot list {}", dir.display()))?;
            if sources.is_empty() {
                anyhow::bail!("No boundary files in {}", dir.display());
            }

            let start = Instant::now();
            let pb = ProgressBar::new(sources.len() as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                    .expect("valid template"),
            );
            let report = run_batch(&sources, &config, &resolver, &session, |project| {
                pb.set_message(project.project.clone());
                pb.inc(1);
            });
            pb.finish_and_clear();
            let elapsed = start.elapsed();

            let tables = report.completed().filter_map(|p| p.run()).map(|run| &run.table);
            export_csv(&output, tables, &catalog).context("Failed to write CSV")?;
            if let Some(path) = &summary {
                export_batch_summary(path, &report).context("Failed to write summary")?;
            }
            if let Some(dir) = &args.rasters {
                for run in report.completed().filter_map(|p| p.run()) {
                    export_windows(dir, &run.windows).context("Failed to write rasters")?;
                }
            }
            if let Some(path) = &args.derived {
                let mut rows = Vec::new();
                for run in report.completed().filter_map(|p| p.run()) {
                    rows.extend(derive(run, &catalog)?);
                }
                export_derived(path, &rows).context("Failed to write derived figures")?;
            }

            println!(
                "{} projects: {} complete, {} failed",
                report.projects.len(),
                report.completed().count(),
                report.failed().count()
            );
            for project in report.failed() {
                if let ProjectStatus::Failed { kind, message } = &project.status {
                    println!("  {} [{}] {}", project.project, kind, message);
                }
            }
            done("Results", &output, elapsed);
        }
    }

    Ok(())
}
