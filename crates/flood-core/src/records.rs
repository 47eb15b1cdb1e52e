//! Row types shared by the pipeline stages.

use std::fmt;

use geo::Point;
use serde::{Deserialize, Serialize};

use crate::classify::RiskClass;
use crate::geometry::Atom;

/// Source attributes of a building footprint, copied verbatim onto every
/// exploded part.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildingAttrs {
    pub gml_id: String,
    pub creation_date: Option<String>,
    pub municipality_code: Option<String>,
    pub locality: Option<String>,
    pub thoroughfare: Option<String>,
    pub function: Option<String>,
    /// Metres above ground.
    pub measured_height: Option<f64>,
    pub storeys_above_ground: Option<u32>,
}

/// Outcome of the population allocation for one building.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AllocationStatus {
    /// Not yet through the allocator.
    #[default]
    Pending,
    Allocated,
    /// No height or no footprint area, so no volume weight.
    MissingVolume,
    /// Zero height or area. Excluded from the cell's volume total and given
    /// no share, also when the whole cell has zero volume.
    ZeroVolume,
    /// Centroid outside every grid cell.
    NoCell,
}

impl AllocationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AllocationStatus::Pending => "pending",
            AllocationStatus::Allocated => "allocated",
            AllocationStatus::MissingVolume => "missing-volume",
            AllocationStatus::ZeroVolume => "zero-volume",
            AllocationStatus::NoCell => "no-cell",
        }
    }
}

impl fmt::Display for AllocationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One atomic building, enriched stage by stage. Derived fields start empty
/// and are only ever filled in.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildingRecord {
    pub attrs: BuildingAttrs,
    /// Footprint in the source CRS.
    pub footprint: Atom,
    /// Footprint centroid in the output CRS.
    pub centroid: Option<Point<f64>>,
    pub estimated_storeys: Option<u32>,
    pub area: Option<f64>,
    pub floor_area: Option<f64>,
    pub volume: Option<f64>,
    pub cell_id: Option<String>,
    pub risk_score: Option<f64>,
    pub risk_class: Option<RiskClass>,
    pub estimated_population: Option<f64>,
    pub allocation_status: AllocationStatus,
}

impl BuildingRecord {
    pub fn new(attrs: BuildingAttrs, footprint: Atom) -> Self {
        Self {
            attrs,
            footprint,
            centroid: None,
            estimated_storeys: None,
            area: None,
            floor_area: None,
            volume: None,
            cell_id: None,
            risk_score: None,
            risk_class: None,
            estimated_population: None,
            allocation_status: AllocationStatus::Pending,
        }
    }

    pub fn function(&self) -> Option<&str> {
        self.attrs.function.as_deref()
    }

    pub fn locality(&self) -> Option<&str> {
        self.attrs.locality.as_deref()
    }
}

/// A 100 m census cell, known only by its centre.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridCell {
    pub id: String,
    pub x: f64,
    pub y: f64,
    /// Authoritative resident count; never modified after load.
    pub population: f64,
}

impl GridCell {
    pub fn center(&self) -> Point<f64> {
        Point::new(self.x, self.y)
    }
}

/// A named administrative boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct Municipality {
    pub name: String,
    pub boundary: geo::MultiPolygon<f64>,
}
