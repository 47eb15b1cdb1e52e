//! Municipality zone statistics: share of each flood-risk class among the
//! raster cells of every municipality that lies mostly inside the region.
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use env_logger::Env;
use geo::MultiPolygon;
use log::info;

use flood_core::classify::RiskClass;
use flood_core::config::PipelineConfig;
use flood_core::crs::{polygon_from_dms, CoordTransformer};
use flood_core::municipality::zone_statistics;
use flood_core::output;
use flood_core::pipeline::RiskModel;
use flood_core::raster::RiskRaster;
use flood_core::vector::{load_municipalities, load_region};

// ── CLI ──────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "zone_stats", about = "Classified flood-risk statistics per municipality")]
struct Args {
    /// Municipality boundaries GeoJSON with a `GEN` name property
    #[arg(short, long)]
    municipalities: PathBuf,

    /// Region GeoJSON; defaults to the configured DMS corner polygon
    #[arg(long)]
    region: Option<PathBuf>,

    /// Flood-risk GeoTIFF
    #[arg(short, long)]
    raster: PathBuf,

    /// Output CSV
    #[arg(short, long, default_value = "outputs/tables/municipality_risk.csv")]
    output: PathBuf,

    /// Pipeline configuration JSON
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let config = PipelineConfig::load(args.config.as_deref())
        .context("Failed to load configuration")?;

    let munis = load_municipalities(&args.municipalities, config.building_epsg)
        .with_context(|| format!("Cannot read municipalities {}", args.municipalities.display()))?;

    let region = match &args.region {
        Some(path) => {
            let (region, epsg) = load_region(path, munis.epsg)
                .with_context(|| format!("Cannot read region {}", path.display()))?;
            if epsg != munis.epsg {
                let t = CoordTransformer::new(epsg, munis.epsg)?;
                let polygons = region
                    .iter()
                    .map(|p| t.transform_polygon(p))
                    .collect::<flood_core::Result<Vec<_>>>()?;
                MultiPolygon::new(polygons)
            } else {
                region
            }
        }
        None => MultiPolygon::new(vec![polygon_from_dms(&config.region_corners_dms, munis.epsg)?]),
    };

    let raster = RiskRaster::open(&args.raster)
        .with_context(|| format!("Cannot open raster {}", args.raster.display()))?;
    let risk = RiskModel::new(&raster, &config)?;
    let to_raster = CoordTransformer::new(munis.epsg, risk.epsg)?;

    let stats = zone_statistics(
        munis.items,
        &region,
        &raster,
        &to_raster,
        &risk.scheme,
        config.min_overlap_ratio,
    )?;

    if let Some(dir) = args.output.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).with_context(|| format!("Cannot create {}", dir.display()))?;
    }
    output::write_zone_stats(output::create(&args.output)?, &RiskClass::names(), &stats)
        .with_context(|| format!("Write failed: {}", args.output.display()))?;

    info!("{} municipalities -> {}", stats.len(), args.output.display());
    Ok(())
}
