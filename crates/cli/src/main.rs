//! Canopy CLI - canopy cover zonal statistics over region batches

mod merge;
mod sink;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use canopy_algorithms::canopy::{canopy_mask, AreaMode, MaskParams};
use canopy_algorithms::pipeline::{BatchRunner, PipelineBuilder, PipelineConfig};
use canopy_algorithms::regions::{exclude_regions, select_batch};
use canopy_core::io::{read_geotiff, read_mosaic, read_regions_geojson, write_geotiff, GeoTiffOptions};
use canopy_core::{CoordTransform, GridSpec, Raster, Region, CRS};

// ─── CLI structure ──────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "canopy")]
#[command(author, version, about = "Canopy cover zonal statistics over region batches", long_about = None)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute canopy metrics for one batch of regions
    Run(RunArgs),
    /// Write the binary canopy mask as GeoTIFF
    Mask {
        /// Canopy height rasters (tiles are mosaicked in order)
        #[arg(long, required = true, num_args = 1..)]
        height: Vec<PathBuf>,
        /// Output GeoTIFF
        #[arg(short, long)]
        output: PathBuf,
        /// Minimum canopy height in metres
        #[arg(long, default_value = "2.0")]
        threshold: f64,
        /// CRS of the output grid when reprojecting
        #[arg(long, default_value = "EPSG:3347")]
        target_crs: CRS,
        /// Output cell size in target CRS units
        #[arg(long, default_value = "1.0")]
        resolution: f64,
        /// Keep the native height grid
        #[arg(long)]
        no_reproject: bool,
        /// CRS of the height rasters when the files declare none
        #[arg(long)]
        height_crs: Option<CRS>,
    },
    /// Fold batch CSVs into a master CSV
    Merge {
        /// Master CSV (created if missing)
        #[arg(long)]
        master: PathBuf,
        /// Batch CSV files
        #[arg(required = true)]
        batches: Vec<PathBuf>,
        /// Directory for the timestamped copy of the previous master
        #[arg(long)]
        backup_dir: Option<PathBuf>,
        /// Identifier column
        #[arg(long, default_value = "CSDUID")]
        id_field: String,
    },
    /// Show information about a raster file
    Info {
        /// Input raster file
        input: PathBuf,
    },
}

#[derive(Args)]
struct RunArgs {
    /// GeoJSON region source
    #[arg(long)]
    regions: PathBuf,
    /// Canopy height rasters (tiles are mosaicked in order)
    #[arg(long, required = true, num_args = 1..)]
    height: Vec<PathBuf>,
    /// JSON configuration file; flags override its values
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Output CSV (default: canopy_cover_batch_<n>.csv)
    #[arg(short, long)]
    output: Option<PathBuf>,
    #[arg(long)]
    batch_number: Option<usize>,
    #[arg(long)]
    batch_size: Option<usize>,
    /// Minimum canopy height in metres
    #[arg(long)]
    threshold: Option<f64>,
    #[arg(long)]
    target_crs: Option<CRS>,
    /// Working grid cell size in target CRS units
    #[arg(long)]
    resolution: Option<f64>,
    /// Aggregate on the native height grid
    #[arg(long)]
    no_reproject: bool,
    #[arg(long, value_enum)]
    area_mode: Option<AreaModeArg>,
    /// Region identifiers to skip
    #[arg(long, value_delimiter = ',')]
    exclude: Vec<String>,
    /// Most cells a single region may touch
    #[arg(long)]
    pixel_ceiling: Option<u64>,
    /// Per-region time budget in seconds
    #[arg(long)]
    timeout_secs: Option<f64>,
    /// Worker threads for region aggregation
    #[arg(long)]
    threads: Option<usize>,
    /// Region identifier attribute
    #[arg(long)]
    id_field: Option<String>,
    #[arg(long)]
    region_crs: Option<CRS>,
    /// CRS of the height rasters when the files declare none
    #[arg(long)]
    height_crs: Option<CRS>,
}

#[derive(Clone, Copy, ValueEnum)]
enum AreaModeArg {
    Uniform,
    DistortionAware,
}

impl From<AreaModeArg> for AreaMode {
    fn from(arg: AreaModeArg) -> Self {
        match arg {
            AreaModeArg::Uniform => AreaMode::Uniform,
            AreaModeArg::DistortionAware => AreaMode::DistortionAware,
        }
    }
}

// ─── Helpers ────────────────────────────────────────────────────────────

fn setup_logging(verbose: bool) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to install log subscriber")
}

fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

fn progress_bar(len: usize) -> ProgressBar {
    let pb = ProgressBar::new(len as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} regions")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    pb
}

fn read_heights(paths: &[PathBuf], height_crs: Option<&CRS>) -> Result<Raster<f32>> {
    let pb = spinner("Reading height rasters...");
    let mut raster: Raster<f32> = read_mosaic(paths).context("Failed to read height rasters")?;
    pb.finish_and_clear();

    if raster.crs().is_none() {
        raster.set_crs(height_crs.cloned());
    }
    info!(
        "Heights: {} x {} from {} file(s), CRS {}",
        raster.cols(),
        raster.rows(),
        paths.len(),
        raster.crs().map_or_else(|| "unknown".to_string(), |c| c.to_string())
    );
    Ok(raster)
}

fn read_regions(path: &Path, id_field: &str) -> Result<Vec<Region>> {
    let pb = spinner("Reading regions...");
    let regions = read_regions_geojson(path, id_field)
        .with_context(|| format!("Failed to read regions from {}", path.display()))?;
    pb.finish_and_clear();
    info!("Regions: {} from {}", regions.len(), path.display());
    Ok(regions)
}

fn build_config(args: &RunArgs) -> Result<PipelineConfig> {
    let base = match &args.config {
        Some(path) => PipelineConfig::from_json_file(path)
            .with_context(|| format!("Failed to load configuration {}", path.display()))?,
        None => PipelineConfig::default(),
    };

    let mut builder = PipelineBuilder::from_config(base);
    if let Some(v) = args.batch_number {
        builder = builder.batch_number(v);
    }
    if let Some(v) = args.batch_size {
        builder = builder.batch_size(v);
    }
    if let Some(v) = args.threshold {
        builder = builder.threshold_meters(v);
    }
    if let Some(crs) = &args.target_crs {
        builder = builder.target_crs(crs.clone());
    }
    if let Some(v) = args.resolution {
        builder = builder.target_resolution_m(v);
    }
    if args.no_reproject {
        builder = builder.reproject(false);
    }
    if let Some(mode) = args.area_mode {
        builder = builder.area_mode(mode.into());
    }
    if !args.exclude.is_empty() {
        builder = builder.exclusion_list(args.exclude.iter().map(String::as_str));
    }
    if let Some(v) = args.pixel_ceiling {
        builder = builder.pixel_count_ceiling(v);
    }
    if args.timeout_secs.is_some() {
        builder = builder.region_timeout_secs(args.timeout_secs);
    }
    if args.threads.is_some() {
        builder = builder.concurrency(args.threads);
    }
    if let Some(field) = &args.id_field {
        builder = builder.id_field(field.clone());
    }
    if let Some(crs) = &args.region_crs {
        builder = builder.region_crs(crs.clone());
    }
    if args.height_crs.is_some() {
        builder = builder.height_crs(args.height_crs.clone());
    }

    builder.build().context("Invalid configuration")
}

fn run(args: RunArgs) -> Result<()> {
    let start = Instant::now();
    let config = build_config(&args)?;

    let heights = read_heights(&args.height, config.height_crs.as_ref())?;
    let regions = exclude_regions(read_regions(&args.regions, &config.id_field)?, &config.exclusion_list);

    let batch_len = select_batch(&regions, config.batch_size, config.batch_number)
        .context("Invalid batch selection")?
        .len();
    if batch_len == 0 {
        info!(
            "Batch {} selects no regions out of {}: no more batches",
            config.batch_number,
            regions.len()
        );
        return Ok(());
    }

    let output = args
        .output
        .clone()
        .unwrap_or_else(|| sink::default_output(config.batch_number));
    let id_field = config.id_field.clone();

    let runner = BatchRunner::new(config);
    let pb = progress_bar(batch_len);
    let report = runner
        .run_with_progress(&heights, regions, |_| pb.inc(1))
        .context("Batch run failed")?;
    pb.finish_and_clear();

    let written = sink::write_records(&output, &id_field, &report)?;
    let failures_path = sink::failures_path(&output);
    let failed = sink::write_failures(&failures_path, &id_field, &report)?;

    println!("Batch {} of {} saved to: {}", report.batch_number, report.batch_count(), output.display());
    println!("  Records: {} ({} with no area)", written, report.degenerate_count());
    if failed > 0 {
        println!("  Failed regions: {} (see {})", failed, failures_path.display());
    }
    let partial = report.partial_coverage();
    if !partial.is_empty() {
        warn!("{} regions have partial raster coverage", partial.len());
    }
    println!("  Processing time: {:.2?}", start.elapsed());
    Ok(())
}

fn mask(
    height: &[PathBuf],
    output: &Path,
    threshold: f64,
    target_crs: CRS,
    resolution: f64,
    no_reproject: bool,
    height_crs: Option<CRS>,
) -> Result<()> {
    let start = Instant::now();
    let heights = read_heights(height, height_crs.as_ref())?;

    let target_grid = if no_reproject {
        None
    } else {
        let source_crs = heights
            .crs()
            .context("Height rasters declare no CRS; pass --height-crs")?;
        let extent = CoordTransform::new(source_crs, &target_crs)
            .context("Cannot reproject heights")?
            .transform_rect(heights.grid_spec().extent(), 32);
        Some(GridSpec::covering(&extent, resolution, Some(target_crs)).context("Invalid output grid")?)
    };

    let pb = spinner("Building canopy mask...");
    let result = canopy_mask(
        &heights,
        &MaskParams {
            threshold_meters: threshold,
            target_grid,
        },
    )
    .context("Failed to build canopy mask")?;
    pb.finish_and_clear();

    let pb = spinner("Writing output...");
    write_geotiff(&result, output, Some(GeoTiffOptions::mask())).context("Failed to write output")?;
    pb.finish_and_clear();

    println!("Canopy mask saved to: {}", output.display());
    println!("  Grid: {}", result.grid_spec().describe());
    println!("  Processing time: {:.2?}", start.elapsed());
    Ok(())
}

fn info(input: &Path) -> Result<()> {
    let pb = spinner("Reading raster...");
    let raster: Raster<f32> = read_geotiff(input).context("Failed to read raster")?;
    pb.finish_and_clear();

    let (rows, cols) = raster.shape();
    let bounds = raster.bounds();
    let gt = raster.transform();
    let stats = raster.statistics();

    println!("File: {}", input.display());
    println!("Dimensions: {} x {} ({} cells)", cols, rows, raster.len());
    println!("Cell size: {} x {}", gt.pixel_width, gt.pixel_height.abs());
    println!(
        "Bounds: ({:.6}, {:.6}) - ({:.6}, {:.6})",
        bounds.0, bounds.1, bounds.2, bounds.3
    );
    println!("Origin: ({:.6}, {:.6})", gt.origin_x, gt.origin_y);
    match raster.crs() {
        Some(crs) => println!("CRS: {}", crs),
        None => println!("CRS: none"),
    }
    if let Some(nodata) = raster.nodata() {
        println!("NoData: {}", nodata);
    }
    println!("\nStatistics:");
    if let Some(min) = stats.min {
        println!("  Min: {:.4}", min);
    }
    if let Some(max) = stats.max {
        println!("  Max: {:.4}", max);
    }
    if let Some(mean) = stats.mean {
        println!("  Mean: {:.4}", mean);
    }
    println!(
        "  Valid cells: {} ({:.1}%)",
        stats.valid_count,
        100.0 * stats.valid_count as f64 / raster.len().max(1) as f64
    );
    Ok(())
}

// ─── Main ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose)?;

    match cli.command {
        Commands::Run(args) => run(args),
        Commands::Mask {
            height,
            output,
            threshold,
            target_crs,
            resolution,
            no_reproject,
            height_crs,
        } => mask(&height, &output, threshold, target_crs, resolution, no_reproject, height_crs),
        Commands::Merge {
            master,
            batches,
            backup_dir,
            id_field,
        } => {
            let start = Instant::now();
            let backup_dir = backup_dir.unwrap_or_else(|| merge::default_backup_dir(&master));
            let summary = merge::merge_batches(&master, &batches, &id_field, &backup_dir)?;

            println!("Master saved to: {}", master.display());
            println!(
                "  Rows: {} ({} existing, {} added, {} duplicates skipped)",
                summary.total(),
                summary.existing,
                summary.added,
                summary.duplicates
            );
            if let Some(backup) = &summary.backup {
                println!("  Backup: {}", backup.display());
            }
            println!("  Processing time: {:.2?}", start.elapsed());
            Ok(())
        }
        Commands::Info { input } => info(&input),
    }
}
