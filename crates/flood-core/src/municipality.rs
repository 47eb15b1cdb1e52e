//! Per-municipality risk statistics over a study region.

use geo::{Area, BooleanOps, BoundingRect, Contains, MultiPolygon, Point};
use log::{debug, info, warn};
use serde::Serialize;

use crate::aggregate::row_percentages;
use crate::classify::{BinScheme, RiskClass};
use crate::crs::CoordTransformer;
use crate::error::Result;
use crate::raster::RiskRaster;
use crate::records::Municipality;

/// `area(boundary ∩ region) / area(boundary)`, None for a zero-area boundary.
pub fn overlap_ratio(boundary: &MultiPolygon<f64>, region: &MultiPolygon<f64>) -> Option<f64> {
    let total = boundary.unsigned_area();
    if total == 0.0 {
        return None;
    }
    Some(boundary.intersection(region).unsigned_area() / total)
}

/// Municipalities overlapping the region by more than `min_ratio`, clipped
/// to it, with their ratio.
pub fn select_overlapping(
    municipalities: Vec<Municipality>,
    region: &MultiPolygon<f64>,
    min_ratio: f64,
) -> Vec<(Municipality, f64)> {
    let total = municipalities.len();
    let mut kept = Vec::new();
    for m in municipalities {
        match overlap_ratio(&m.boundary, region) {
            Some(ratio) if ratio > min_ratio => {
                let boundary = m.boundary.intersection(region);
                kept.push((Municipality { name: m.name, boundary }, ratio));
            }
            Some(_) => {}
            None => warn!("municipality {} has no area, skipped", m.name),
        }
    }
    info!("{} of {total} municipalities overlap the region by more than {min_ratio}", kept.len());
    kept
}

/// Class counts of the raster cells whose centres lie inside a zone.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZoneCounts {
    pub counts: Vec<f64>,
    pub nodata: usize,
    pub out_of_range: usize,
}

impl ZoneCounts {
    pub fn total(&self) -> f64 {
        self.counts.iter().sum()
    }
}

/// Classify every cell centre inside `zone` (raster CRS).
pub fn zonal_class_counts(
    raster: &RiskRaster,
    zone: &MultiPolygon<f64>,
    scheme: &BinScheme<RiskClass>,
) -> ZoneCounts {
    let mut out = ZoneCounts {
        counts: vec![0.0; scheme.labels().len()],
        nodata: 0,
        out_of_range: 0,
    };
    let Some(bbox) = zone.bounding_rect() else {
        return out;
    };
    let (rows, cols) = raster.window(bbox.min().x, bbox.min().y, bbox.max().x, bbox.max().y);
    for row in rows {
        for col in cols.clone() {
            let (x, y) = raster.transform.cell_center(row, col);
            if !zone.contains(&Point::new(x, y)) {
                continue;
            }
            match raster.value_at(row, col) {
                None => out.nodata += 1,
                Some(v) => match scheme.bin_index(v) {
                    Ok(i) => out.counts[i] += 1.0,
                    Err(_) => out.out_of_range += 1,
                },
            }
        }
    }
    out
}

/// One row of the zone statistics table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZoneStat {
    pub name: String,
    pub overlap_ratio: f64,
    pub counts: ZoneCounts,
}

impl ZoneStat {
    pub fn percentages(&self) -> Option<Vec<f64>> {
        row_percentages(&self.counts.counts)
    }
}

/// Overlap filter, clip, reprojection into the raster CRS and zonal counts,
/// in input order.
pub fn zone_statistics(
    municipalities: Vec<Municipality>,
    region: &MultiPolygon<f64>,
    raster: &RiskRaster,
    to_raster: &CoordTransformer,
    scheme: &BinScheme<RiskClass>,
    min_ratio: f64,
) -> Result<Vec<ZoneStat>> {
    let mut stats = Vec::new();
    for (m, ratio) in select_overlapping(municipalities, region, min_ratio) {
        let zone = m
            .boundary
            .iter()
            .map(|p| to_raster.transform_polygon(p))
            .collect::<Result<Vec<_>>>()?;
        let counts = zonal_class_counts(raster, &MultiPolygon::new(zone), scheme);
        debug!(
            "{}: {} cells classified, {} no-data, {} out of range",
            m.name,
            counts.total(),
            counts.nodata,
            counts.out_of_range
        );
        stats.push(ZoneStat { name: m.name, overlap_ratio: ratio, counts });
    }
    Ok(stats)
}
