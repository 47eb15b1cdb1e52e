//! Census-based risk tables (age bands, total and over-65 population per
//! risk class) and the comparison of two residential-code selections.
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use env_logger::Env;
use log::info;

use flood_core::aggregate::{compare_overviews, AllocationOverview, CategoryTable};
use flood_core::census::{join_over65, load_age_rows, load_grid_cells, load_over65_shares};
use flood_core::config::PipelineConfig;
use flood_core::output;
use flood_core::pipeline::{self, RiskModel};
use flood_core::raster::RiskRaster;

// ── CLI ──────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "risk_tables", about = "Census population tables per flood-risk class")]
struct Args {
    /// Pipeline configuration JSON
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Residents per age band and risk class
    Age {
        /// Census CSV with x_mp_100m / y_mp_100m and one column per age band
        #[arg(short, long)]
        input: PathBuf,
        /// Flood-risk GeoTIFF
        #[arg(short, long)]
        raster: PathBuf,
        #[arg(short, long, default_value = "outputs/tables/age_risk.csv")]
        output: PathBuf,
    },
    /// Total and over-65 residents per risk class
    Over65 {
        /// Census grid CSV with GITTER_ID_100m, centres and Einwohner
        #[arg(short, long)]
        population: PathBuf,
        /// CSV with GITTER_ID_100m and AnteilUeber65 (percent)
        #[arg(short, long)]
        shares: PathBuf,
        /// Flood-risk GeoTIFF
        #[arg(short, long)]
        raster: PathBuf,
        #[arg(short, long, default_value = "outputs/tables/over65_risk.csv")]
        output: PathBuf,
    },
    /// Compare two enriched building tables, e.g. from two residential-code presets
    Compare {
        /// Enriched building table used as the base
        #[arg(long)]
        base: PathBuf,
        /// Enriched building table compared against the base
        #[arg(long)]
        other: PathBuf,
        #[arg(short, long, default_value = "outputs/tables/function_comparison.json")]
        output: PathBuf,
    },
}

fn prepare(path: &Path) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).with_context(|| format!("Cannot create {}", dir.display()))?;
    }
    Ok(())
}

fn write_table(path: &Path, group_header: &str, table: &CategoryTable) -> Result<()> {
    prepare(path)?;
    output::write_category_table(output::create(path)?, group_header, table)
        .with_context(|| format!("Write failed: {}", path.display()))
}

fn open_raster(path: &Path) -> Result<RiskRaster> {
    RiskRaster::open(path).with_context(|| format!("Cannot open raster {}", path.display()))
}

fn overview(path: &Path) -> Result<AllocationOverview> {
    let file = fs::File::open(path).with_context(|| format!("Cannot read {}", path.display()))?;
    let label = path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    let (buildings, populations) =
        output::read_allocated_populations(file, &path.display().to_string())?;
    Ok(AllocationOverview::from_populations(label, buildings, populations))
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let config = PipelineConfig::load(args.config.as_deref())
        .context("Failed to load configuration")?;

    match args.command {
        Command::Age { input, raster, output } => {
            let rows = load_age_rows(&input)
                .with_context(|| format!("Cannot read {}", input.display()))?;
            let raster = open_raster(&raster)?;
            let risk = RiskModel::new(&raster, &config)?;
            let table = pipeline::age_risk_table(&rows, config.grid_epsg, &risk)?;
            write_table(&output, "age_band", &table)?;
            info!("{} census cells -> {}", rows.len(), output.display());
        }
        Command::Over65 { population, shares, raster, output } => {
            let cells = load_grid_cells(&population)
                .with_context(|| format!("Cannot read {}", population.display()))?;
            let shares = load_over65_shares(&shares)
                .with_context(|| format!("Cannot read {}", shares.display()))?;
            let joined = join_over65(cells, &shares);
            let raster = open_raster(&raster)?;
            let risk = RiskModel::new(&raster, &config)?;
            let table = pipeline::over65_risk_table(&joined, config.grid_epsg, &risk)?;
            write_table(&output, "population", &table)?;
            info!("{} joined cells -> {}", joined.len(), output.display());
        }
        Command::Compare { base, other, output } => {
            let comparison = compare_overviews(overview(&base)?, overview(&other)?);
            prepare(&output)?;
            fs::write(&output, serde_json::to_string_pretty(&comparison)?)
                .with_context(|| format!("Write failed: {}", output.display()))?;
            info!(
                "populated buildings {} -> {} ({:+})",
                comparison.base.populated_buildings,
                comparison.other.populated_buildings,
                comparison.populated_diff
            );
        }
    }
    Ok(())
}
