use std::collections::HashMap;

use approx::assert_relative_eq;
use flood_core::classify::{RiskBins, RiskClass, RiskPreset};
use flood_core::config::PipelineConfig;
use flood_core::crs::CoordTransformer;
use flood_core::output;
use flood_core::pipeline::{self, RiskModel};
use flood_core::raster::{GeoTransform, RiskRaster};
use flood_core::records::{AllocationStatus, GridCell};
use flood_core::vector::parse_buildings;

fn feature(
    id: &str,
    function: &str,
    locality: &str,
    height: f64,
    storeys: Option<u32>,
    geometry: &str,
) -> String {
    let storeys = storeys.map_or("null".to_string(), |s| s.to_string());
    format!(
        r#"{{ "type": "Feature",
              "properties": {{ "gml_id": "{id}", "function": "{function}",
                               "LocalityNa": "{locality}",
                               "measuredHe": {height}, "storeysAbo": {storeys} }},
              "geometry": {geometry} }}"#
    )
}

fn rect(x0: f64, y0: f64, x1: f64, y1: f64) -> String {
    format!("[[[{x0},{y0}],[{x1},{y0}],[{x1},{y1}],[{x0},{y1}],[{x0},{y0}]]]")
}

fn buildings_geojson() -> String {
    let features = [
        feature("A", "31001_1000", "Aub", 3.0, Some(1), &format!(
            r#"{{"type":"Polygon","coordinates":{}}}"#,
            rect(566010.0, 5513010.0, 566012.0, 5513015.0)
        )),
        feature("B", "31001_9998", "Aub", 7.0, Some(2), &format!(
            r#"{{"type":"Polygon","coordinates":{}}}"#,
            rect(566020.0, 5513020.0, 566022.0, 5513025.0)
        )),
        feature("C", "31001_2000", "Aub", 9.0, Some(3), &format!(
            r#"{{"type":"Polygon","coordinates":{}}}"#,
            rect(566030.0, 5513030.0, 566040.0, 5513040.0)
        )),
        feature("D", "31001_1000", "Bergtheim", 6.0, None, &format!(
            r#"{{"type":"MultiPolygon","coordinates":[{},{}]}}"#,
            rect(566110.0, 5513010.0, 566120.0, 5513020.0),
            rect(566130.0, 5513030.0, 566140.0, 5513040.0)
        )),
        feature("E", "31001_1000", "Zell", 3.0, Some(1), &format!(
            r#"{{"type":"Polygon","coordinates":{}}}"#,
            rect(570000.0, 5520000.0, 570010.0, 5520010.0)
        )),
    ];
    format!(
        r#"{{ "type": "FeatureCollection",
              "crs": {{ "type": "name", "properties": {{ "name": "EPSG:25832" }} }},
              "features": [{}] }}"#,
        features.join(",")
    )
}

fn risk_raster() -> RiskRaster {
    let transform = GeoTransform::north_up(566000.0, 5513100.0, 100.0, 100.0);
    let mut r = RiskRaster::new(3, 1, transform, -9999.0, Some(-9999.0));
    r.set(0, 0, -12.0);
    r.set(0, 1, 3.0);
    r.epsg = Some(25832);
    r
}

fn cell(id: &str, x: f64, y: f64, population: f64) -> GridCell {
    GridCell { id: id.into(), x, y, population }
}

fn utm_config() -> PipelineConfig {
    PipelineConfig {
        grid_epsg: 25832,
        risk_bins: RiskBins::Preset(RiskPreset::WoeRounded),
        ..Default::default()
    }
}

#[test]
fn building_pipeline_end_to_end() {
    let config = utm_config();
    let layer = parse_buildings(&buildings_geojson(), "buildings", 4326).unwrap();
    assert_eq!(layer.epsg, 25832);
    let cells = vec![
        cell("c1", 566050.0, 5513050.0, 100.0),
        cell("c2", 566150.0, 5513050.0, 9.0),
        cell("c3", 566250.0, 5513050.0, 5.0),
        cell("c1-again", 566050.0, 5513050.0, 7.0),
    ];
    let raster = risk_raster();
    let risk = RiskModel::new(&raster, &config).unwrap();
    let run = pipeline::run_buildings(layer, cells, &risk, &config).unwrap();

    let ids: Vec<_> = run.records.iter().map(|r| r.attrs.gml_id.as_str()).collect();
    assert_eq!(ids, vec!["A", "B", "D", "D", "E"]);

    // volumes 30 and 70 in a cell of 100 residents
    assert_eq!(run.records[0].volume, Some(30.0));
    assert_eq!(run.records[1].volume, Some(70.0));
    assert_eq!(run.records[0].estimated_population, Some(30.0));
    assert_eq!(run.records[1].estimated_population, Some(70.0));

    // storeys imputed from the mean storey height (3 + 3.5 + 3) / 3
    assert_eq!(run.records[2].estimated_storeys, Some(2));
    assert_eq!(run.records[2].floor_area, Some(200.0));
    assert_eq!(run.records[2].estimated_population, Some(4.5));
    assert_eq!(run.records[3].estimated_population, Some(4.5));

    let outside = &run.records[4];
    assert_eq!(outside.allocation_status, AllocationStatus::NoCell);
    assert_eq!(outside.estimated_population, None);
    assert_eq!(outside.risk_class, None);

    assert_eq!(run.records[0].risk_class, Some(RiskClass::VeryLow));
    assert_eq!(run.records[2].risk_class, Some(RiskClass::VeryHigh));
    assert_eq!(run.unclassified, 1);

    assert_eq!(run.allocation.allocated, 4);
    assert_eq!(run.allocation.population_unclaimed, 5.0);
    assert_eq!(run.allocation.population_discarded, 7.0);
    assert_relative_eq!(run.allocation.population_allocated, 109.0, max_relative = 1e-12);

    let centroid = run.records[0].centroid.unwrap();
    assert_relative_eq!(centroid.x(), 566011.0, epsilon = 1e-6);
    assert_relative_eq!(centroid.y(), 5513012.5, epsilon = 1e-6);

    let localities = pipeline::locality_risk_table(&run.records).unwrap();
    assert_eq!(localities.groups(), &["Aub".to_string(), "Bergtheim".to_string()]);
    assert_eq!(localities.get("Aub", "very-low"), 2.0);
    assert_eq!(localities.get("Aub", "high"), 0.0);
    assert_eq!(localities.percentages("Bergtheim").unwrap()[4], 100.0);

    let households = pipeline::household_risk_table(&run.records, &config).unwrap();
    assert_eq!(households.get("21-50", "very-low"), 1.0);
    assert_eq!(households.get("51-100", "very-low"), 1.0);
    assert_eq!(households.get("3-5", "very-high"), 2.0);
    assert_eq!(households.percentages("1-2"), None);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("buildings.csv");
    output::write_buildings(output::create(&path).unwrap(), &run.records).unwrap();
    let first = std::fs::read_to_string(&path).unwrap();
    assert_eq!(first.lines().count(), 6);
    assert!(first.lines().next().unwrap().starts_with("gml_id,creation_date,"));
    output::write_buildings(output::create(&path).unwrap(), &run.records).unwrap();
    assert_eq!(std::fs::read_to_string(&path).unwrap(), first);
}

#[test]
fn population_is_conserved_across_a_reprojected_grid() {
    let config = PipelineConfig { grid_epsg: 3035, ..utm_config() };
    let layer = parse_buildings(&buildings_geojson(), "buildings", 25832).unwrap();

    // grid cells around the building centroids, in LAEA
    let to_grid = CoordTransformer::new(25832, 3035).unwrap();
    let mut cells: Vec<GridCell> = Vec::new();
    let centroids = [(566011.0, 5513012.5), (566021.0, 5513022.5), (566125.0, 5513025.0)];
    for (i, (x, y)) in centroids.into_iter().enumerate() {
        let (gx, gy) = to_grid.transform(x, y).unwrap();
        let centre = ((gx / 100.0).floor() * 100.0 + 50.0, (gy / 100.0).floor() * 100.0 + 50.0);
        if cells.iter().all(|c| (c.x, c.y) != centre) {
            cells.push(cell(&format!("cell{i}"), centre.0, centre.1, 10.0 * (i + 1) as f64));
        }
    }

    let raster = risk_raster();
    let risk = RiskModel::new(&raster, &config).unwrap();
    let run = pipeline::run_buildings(layer, cells.clone(), &risk, &config).unwrap();

    let mut per_cell: HashMap<String, f64> = HashMap::new();
    for r in &run.records {
        if let (Some(id), Some(p)) = (&r.cell_id, r.estimated_population) {
            *per_cell.entry(id.clone()).or_default() += p;
        }
    }
    assert!(!per_cell.is_empty());
    for c in &cells {
        if let Some(total) = per_cell.get(&c.id) {
            assert_relative_eq!(*total, c.population, max_relative = 1e-6);
        }
    }
    // A and B always land in a cell: their centroids defined the cells
    assert!(run.records[0].cell_id.is_some() && run.records[1].cell_id.is_some());
}
