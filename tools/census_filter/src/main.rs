//! Census region filter: copies the rows of a nationwide 100 m census table
//! whose cell centre lies inside the study region, chunk by chunk.
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use env_logger::Env;
use log::info;

use flood_core::census::filter_region_file;
use flood_core::config::PipelineConfig;
use flood_core::crs::polygon_from_dms;

// ── CLI ──────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "census_filter", about = "Filter a census grid CSV to the study region")]
struct Args {
    /// Nationwide census CSV (`;`-separated, x_mp_100m / y_mp_100m centres)
    #[arg(short, long)]
    input: PathBuf,

    /// Output CSV, truncated before writing
    #[arg(short, long, default_value = "outputs/tables/region_grid.csv")]
    output: PathBuf,

    /// Pipeline configuration JSON (region corners, grid CRS, chunk size)
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = PipelineConfig::load(args.config.as_deref())
        .context("Failed to load configuration")?;
    let region = polygon_from_dms(&config.region_corners_dms, config.grid_epsg)
        .context("Failed to build the region polygon")?;

    if let Some(dir) = args.output.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).with_context(|| format!("Cannot create {}", dir.display()))?;
    }
    let summary = filter_region_file(&args.input, &args.output, &region, config.chunk_size)
        .with_context(|| format!("Region filter failed for {}", args.input.display()))?;

    info!(
        "{} of {} rows kept ({} chunks) -> {}",
        summary.rows_kept,
        summary.rows_read,
        summary.chunks,
        args.output.display()
    );
    Ok(())
}
