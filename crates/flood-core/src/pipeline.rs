//! Stage wiring: footprints and census cells in, attributed buildings and
//! report tables out.

use log::{debug, info, warn};

use crate::aggregate::{CategoryTable, RankedGroup};
use crate::allocation::{self, AllocationSummary};
use crate::census::{age_band_labels, AgeRow, Over65Cell};
use crate::classify::{BinScheme, RiskClass};
use crate::config::PipelineConfig;
use crate::crs::CoordTransformer;
use crate::error::{Error, Result};
use crate::geometry::Atom;
use crate::grid::GridIndex;
use crate::raster::RiskRaster;
use crate::records::{BuildingRecord, GridCell};
use crate::vector::Layer;

/// Raster, its CRS and the bins its values are classified with.
pub struct RiskModel<'a> {
    pub raster: &'a RiskRaster,
    pub epsg: u32,
    pub scheme: BinScheme<RiskClass>,
}

impl<'a> RiskModel<'a> {
    /// The configured override wins over the CRS the raster declares.
    pub fn new(raster: &'a RiskRaster, config: &PipelineConfig) -> Result<Self> {
        let epsg = config
            .raster_epsg
            .or(raster.epsg)
            .ok_or_else(|| {
                Error::Config("risk raster declares no CRS and raster_epsg is unset".into())
            })?;
        Ok(Self { raster, epsg, scheme: config.risk_bins.scheme()? })
    }

    /// Sample and classify points given in `source_epsg`. One result per
    /// point; no-data, outside and out-of-range values have no class.
    pub fn assess(
        &self,
        points: &[(f64, f64)],
        source_epsg: u32,
    ) -> Result<Vec<(Option<f64>, Option<RiskClass>)>> {
        let to_raster = CoordTransformer::new(source_epsg, self.epsg)?;
        let projected = to_raster.transform_all(points)?;
        let mut out_of_range = 0usize;
        let assessed: Vec<_> = self
            .raster
            .sample_all(&projected)
            .into_iter()
            .map(|score| {
                let class = score.and_then(|v| match self.scheme.classify(v) {
                    Ok(c) => Some(*c),
                    Err(_) => {
                        out_of_range += 1;
                        None
                    }
                });
                (score, class)
            })
            .collect();
        let unsampled = assessed.iter().filter(|(s, _)| s.is_none()).count();
        debug!(
            "{} points assessed, {unsampled} without raster value, {out_of_range} out of range",
            points.len()
        );
        Ok(assessed)
    }
}

/// Outcome of the building pipeline.
#[derive(Debug, Clone)]
pub struct BuildingRun {
    pub records: Vec<BuildingRecord>,
    pub allocation: AllocationSummary,
    pub unclassified: usize,
}

fn reproject_footprint(atom: Atom, t: &CoordTransformer) -> Result<Atom> {
    Ok(match atom {
        Atom::Point(p) => Atom::Point(t.transform_point(p)?),
        Atom::Polygon(p) => Atom::Polygon(t.transform_polygon(&p)?),
    })
}

/// Concatenate footprint layers, reprojecting each into `epsg`.
pub fn merge_layers(
    layers: Vec<Layer<BuildingRecord>>,
    epsg: u32,
) -> Result<Layer<BuildingRecord>> {
    let mut items = Vec::new();
    for layer in layers {
        if layer.epsg == epsg {
            items.extend(layer.items);
            continue;
        }
        let t = CoordTransformer::new(layer.epsg, epsg)?;
        for mut r in layer.items {
            r.footprint = reproject_footprint(r.footprint, &t)?;
            items.push(r);
        }
    }
    Ok(Layer { epsg, items })
}

/// Residential filter, metrics, grid join, allocation and risk attribution,
/// in that order. Records keep their input order.
pub fn run_buildings(
    buildings: Layer<BuildingRecord>,
    cells: Vec<GridCell>,
    risk: &RiskModel<'_>,
    config: &PipelineConfig,
) -> Result<BuildingRun> {
    let codes = config.residential_codes.codes();
    let mut records = allocation::filter_residential(buildings.items, &codes);

    if buildings.epsg != config.building_epsg {
        let t = CoordTransformer::new(buildings.epsg, config.building_epsg)?;
        for r in records.iter_mut() {
            r.footprint = reproject_footprint(r.footprint.clone(), &t)?;
        }
    }
    allocation::derive_metrics(&mut records)?;

    let centroids: Vec<Option<(f64, f64)>> =
        records.iter().map(|r| r.footprint.centroid().map(|p| (p.x(), p.y()))).collect();
    let degenerate = centroids.iter().filter(|c| c.is_none()).count();
    if degenerate > 0 {
        warn!("{degenerate} buildings have no centroid and stay unassigned");
    }
    let present: Vec<(f64, f64)> = centroids.iter().flatten().copied().collect();

    // one transformation per target CRS, scattered back over the present slots
    let scatter = |values: Vec<(f64, f64)>| -> Vec<Option<(f64, f64)>> {
        let mut it = values.into_iter();
        centroids.iter().map(|c| c.and_then(|_| it.next())).collect()
    };
    let to_output = CoordTransformer::new(config.building_epsg, config.output_epsg)?;
    let to_grid = CoordTransformer::new(config.building_epsg, config.grid_epsg)?;
    let in_output = scatter(to_output.transform_all(&present)?);
    let in_grid = scatter(to_grid.transform_all(&present)?);
    let assessed = risk.assess(&present, config.building_epsg)?;

    let grid = GridIndex::build(cells, config.cell_size_m)?;
    let grid_points: Vec<_> =
        in_grid.iter().map(|c| c.map(|(x, y)| geo::Point::new(x, y))).collect();
    let assignment = grid.assign(&grid_points);
    let mut summary = allocation::allocate(&mut records, &assignment, grid.cells());
    summary.population_discarded = grid.duplicate_population();
    if summary.population_discarded > 0.0 {
        warn!("{:.1} residents dropped with duplicate grid centres", summary.population_discarded);
    }

    let mut assessed = assessed.into_iter();
    let mut unclassified = 0;
    for ((r, out), centroid) in records.iter_mut().zip(in_output).zip(&centroids) {
        r.centroid = out.map(|(x, y)| geo::Point::new(x, y));
        if centroid.is_some() {
            if let Some((score, class)) = assessed.next() {
                r.risk_score = score;
                r.risk_class = class;
            }
        }
        if r.risk_class.is_none() {
            unclassified += 1;
        }
    }
    info!("{} residential buildings attributed, {unclassified} without risk class", records.len());
    Ok(BuildingRun { records, allocation: summary, unclassified })
}

/// Building counts per locality and risk class, localities by name.
pub fn locality_risk_table(records: &[BuildingRecord]) -> Result<CategoryTable> {
    let mut table = CategoryTable::new(RiskClass::names());
    table.tally(records, |r| Some((r.locality()?.to_string(), r.risk_class?.to_string())))?;
    table.sort_groups();
    Ok(table)
}

/// Localities ranked by their share of high-risk and of low-risk buildings.
pub fn locality_rankings(
    table: &CategoryTable,
    top_n: usize,
) -> (Vec<RankedGroup>, Vec<RankedGroup>) {
    let high =
        table.rank_by_share(&[RiskClass::High.as_str(), RiskClass::VeryHigh.as_str()], top_n);
    let low = table.rank_by_share(&[RiskClass::VeryLow.as_str(), RiskClass::Low.as_str()], top_n);
    (high, low)
}

/// Buildings per household-size band and risk class. Only buildings with
/// an allocated population inside the configured bounds are counted.
pub fn household_risk_table(
    records: &[BuildingRecord],
    config: &PipelineConfig,
) -> Result<CategoryTable> {
    let bands = config.household_bins.scheme()?;
    let mut table = CategoryTable::with_groups(bands.labels().to_vec(), RiskClass::names());
    let (lo, hi) = (config.min_household_size, config.max_household_size);
    for r in records {
        let (Some(p), Some(class)) = (r.estimated_population, r.risk_class) else {
            continue;
        };
        if p <= lo || p > hi {
            continue;
        }
        if let Ok(band) = bands.classify(p) {
            table.count(band, class.as_str())?;
        }
    }
    Ok(table)
}

/// Residents per age band and risk class, from census cell centres in
/// `grid_epsg`.
pub fn age_risk_table(
    rows: &[AgeRow],
    grid_epsg: u32,
    risk: &RiskModel<'_>,
) -> Result<CategoryTable> {
    let labels = age_band_labels();
    let mut table = CategoryTable::with_groups(labels.clone(), RiskClass::names());
    let points: Vec<_> = rows.iter().map(|r| (r.x, r.y)).collect();
    for (row, (_, class)) in rows.iter().zip(risk.assess(&points, grid_epsg)?) {
        let Some(class) = class else { continue };
        for (label, count) in labels.iter().zip(&row.counts) {
            if *count > 0.0 {
                table.add(label, class.as_str(), *count)?;
            }
        }
    }
    Ok(table)
}

pub const POPULATION_ROW: &str = "population";
pub const OVER65_ROW: &str = "over65";

/// Total and over-65 residents per risk class. Each row's percentages are
/// that population's distribution over the classes.
pub fn over65_risk_table(
    cells: &[Over65Cell],
    grid_epsg: u32,
    risk: &RiskModel<'_>,
) -> Result<CategoryTable> {
    let rows = vec![POPULATION_ROW.to_string(), OVER65_ROW.to_string()];
    let mut table = CategoryTable::with_groups(rows, RiskClass::names());
    let points: Vec<_> = cells.iter().map(|c| (c.cell.x, c.cell.y)).collect();
    for (cell, (_, class)) in cells.iter().zip(risk.assess(&points, grid_epsg)?) {
        let Some(class) = class else { continue };
        table.add(POPULATION_ROW, class.as_str(), cell.cell.population)?;
        table.add(OVER65_ROW, class.as_str(), cell.over65)?;
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{Closed, RiskPreset};
    use crate::raster::GeoTransform;
    use crate::records::BuildingAttrs;
    use geo::polygon;

    #[test]
    fn merged_layers_share_one_crs() {
        let a = Layer { epsg: 25832, items: vec![populated("a", None, None)] };
        let b = Layer {
            epsg: 25832,
            items: vec![populated("b", None, None), populated("c", None, None)],
        };
        let merged = merge_layers(vec![a, b], 25832).unwrap();
        assert_eq!(merged.items.len(), 3);
        assert_eq!(merged.items[2].locality(), Some("c"));

        let wgs = Layer { epsg: 4326, items: vec![populated("d", None, None)] };
        let merged = merge_layers(vec![wgs], 25832).unwrap();
        let Atom::Polygon(p) = &merged.items[0].footprint else { panic!("polygon expected") };
        // (0, 0) in lon/lat is far west of zone 32's false easting
        assert!(p.exterior().0[0].x < 0.0);
    }

    fn flat_raster(value: f64) -> RiskRaster {
        let transform = GeoTransform::north_up(0.0, 400.0, 100.0, 100.0);
        let mut r = RiskRaster::new(4, 4, transform, value, Some(-9999.0));
        r.epsg = Some(3035);
        r
    }

    fn config() -> PipelineConfig {
        PipelineConfig {
            risk_bins: crate::classify::RiskBins::Preset(RiskPreset::WoeRounded),
            ..Default::default()
        }
    }

    #[test]
    fn raster_crs_comes_from_override_or_file() {
        let mut raster = flat_raster(0.0);
        assert_eq!(RiskModel::new(&raster, &config()).unwrap().epsg, 3035);
        let c = PipelineConfig { raster_epsg: Some(25832), ..config() };
        assert_eq!(RiskModel::new(&raster, &c).unwrap().epsg, 25832);
        raster.epsg = None;
        assert!(matches!(RiskModel::new(&raster, &config()), Err(Error::Config(_))));
    }

    #[test]
    fn assess_keeps_one_result_per_point() {
        let mut raster = flat_raster(3.0);
        raster.set(0, 0, -9999.0);
        raster.set(0, 1, 20.0);
        let risk = RiskModel::new(&raster, &config()).unwrap();
        let points = [(50.0, 350.0), (150.0, 350.0), (250.0, 250.0), (900.0, 50.0)];
        let out = risk.assess(&points, 3035).unwrap();
        assert_eq!(out.len(), 4);
        assert_eq!(out[0], (None, None));
        assert_eq!(out[1], (Some(20.0), None));
        assert_eq!(out[2], (Some(3.0), Some(RiskClass::VeryHigh)));
        assert_eq!(out[3], (None, None));
    }

    fn populated(
        locality: &str,
        population: Option<f64>,
        class: Option<RiskClass>,
    ) -> BuildingRecord {
        let attrs = BuildingAttrs { locality: Some(locality.into()), ..Default::default() };
        let footprint = polygon![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0), (x: 0.0, y: 1.0)];
        let mut r = BuildingRecord::new(attrs, Atom::Polygon(footprint));
        r.estimated_population = population;
        r.risk_class = class;
        r
    }

    #[test]
    fn household_table_respects_bounds_and_keeps_all_bands() {
        let records = vec![
            populated("a", Some(1.5), Some(RiskClass::Low)),
            populated("a", Some(2.0), Some(RiskClass::Low)),
            populated("a", Some(4.0), Some(RiskClass::High)),
            populated("a", Some(250.0), Some(RiskClass::High)),
            populated("a", Some(0.0), Some(RiskClass::High)),
            populated("a", Some(3.0), None),
        ];
        let t = household_risk_table(&records, &config()).unwrap();
        assert_eq!(t.groups().len(), 7);
        assert_eq!(t.get("1-2", "low"), 2.0);
        assert_eq!(t.get("3-5", "high"), 1.0);
        assert_eq!(t.total("100+"), 0.0);
        assert_eq!(t.percentages("100+"), None);
    }

    #[test]
    fn locality_table_zero_fills_and_ranks() {
        let records = vec![
            populated("Zell", None, Some(RiskClass::VeryHigh)),
            populated("Aub", None, Some(RiskClass::Low)),
            populated("Aub", None, Some(RiskClass::High)),
            populated("Aub", None, None),
        ];
        let t = locality_risk_table(&records).unwrap();
        assert_eq!(t.groups(), &["Aub".to_string(), "Zell".to_string()]);
        assert_eq!(t.get("Zell", "low"), 0.0);
        let (high, low) = locality_rankings(&t, 1);
        assert_eq!(high[0].group, "Zell");
        assert_eq!(low[0].group, "Aub");
    }

    #[test]
    fn census_tables_follow_cell_classes() {
        let mut raster = flat_raster(-15.0);
        raster.set(3, 3, 5.0);
        let edges = vec![-20.0, -10.0, -5.0, 0.0, 2.5, 10.0];
        let scheme = BinScheme::new(edges, RiskClass::ALL.to_vec(), Closed::Left).unwrap();
        let risk = RiskModel { raster: &raster, epsg: 3035, scheme };

        let rows = vec![
            AgeRow { x: 50.0, y: 350.0, counts: vec![1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 2.0] },
            AgeRow { x: 350.0, y: 50.0, counts: vec![3.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0] },
        ];
        let ages = age_risk_table(&rows, 3035, &risk).unwrap();
        assert_eq!(ages.row("<10").unwrap(), &[1.0, 0.0, 0.0, 0.0, 3.0]);
        assert_eq!(ages.get(">80", "very-low"), 2.0);
        assert_eq!(ages.percentages("50-59"), None);

        let over65 = |id: &str, x: f64, y: f64, population: f64, over65: f64| Over65Cell {
            cell: GridCell { id: id.into(), x, y, population },
            over65,
        };
        let cells = vec![over65("a", 50.0, 350.0, 30.0, 6.0), over65("b", 350.0, 50.0, 10.0, 2.0)];
        let t = over65_risk_table(&cells, 3035, &risk).unwrap();
        assert_eq!(t.percentages(POPULATION_ROW).unwrap(), vec![75.0, 0.0, 0.0, 0.0, 25.0]);
        assert_eq!(t.get(OVER65_ROW, "very-high"), 2.0);
    }
}
