//! Run configuration, loaded from JSON. Every field has a default, so a
//! config file only needs to name what it changes.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::classify::{HouseholdBins, RiskBins};
use crate::crs::{self, Dms, DmsCorner, Hemisphere};
use crate::error::{Error, Result};

/// Building function codes treated as residential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResidentialPreset {
    /// Pure residential buildings.
    ResidentialOnly,
    /// Residential plus residential with mixed use.
    #[default]
    ResidentialMixed,
}

impl ResidentialPreset {
    pub fn codes(self) -> Vec<String> {
        let codes: &[&str] = match self {
            ResidentialPreset::ResidentialOnly => &["31001_1000"],
            ResidentialPreset::ResidentialMixed => &["31001_1000", "31001_9998"],
        };
        codes.iter().map(|c| c.to_string()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResidentialCodes {
    Preset(ResidentialPreset),
    Codes(Vec<String>),
}

impl Default for ResidentialCodes {
    fn default() -> Self {
        ResidentialCodes::Preset(ResidentialPreset::default())
    }
}

impl ResidentialCodes {
    pub fn codes(&self) -> Vec<String> {
        match self {
            ResidentialCodes::Preset(p) => p.codes(),
            ResidentialCodes::Codes(c) => c.clone(),
        }
    }
}

fn corner(lat: (f64, f64, f64), lon: (f64, f64, f64)) -> DmsCorner {
    DmsCorner {
        lat: Dms::new(lat.0, lat.1, lat.2, Hemisphere::N),
        lon: Dms::new(lon.0, lon.1, lon.2, Hemisphere::E),
    }
}

/// Rough outline of Lower Franconia.
pub fn lower_franconia_corners() -> Vec<DmsCorner> {
    vec![
        corner((49.0, 32.0, 30.54), (8.0, 51.0, 10.63)),
        corner((49.0, 24.0, 38.26), (10.0, 44.0, 28.60)),
        corner((50.0, 28.0, 27.07), (10.0, 58.0, 50.11)),
        corner((50.0, 42.0, 6.96), (9.0, 5.0, 21.97)),
    ]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// CRS of the building footprints (metric, used for areas).
    pub building_epsg: u32,
    /// CRS of the census grid centres.
    pub grid_epsg: u32,
    /// Overrides the CRS declared by the risk raster.
    pub raster_epsg: Option<u32>,
    /// CRS of the centroids written to the building table.
    pub output_epsg: u32,
    pub cell_size_m: f64,
    pub residential_codes: ResidentialCodes,
    pub risk_bins: RiskBins,
    pub household_bins: HouseholdBins,
    /// Exclusive lower bound on residents per building for household bands.
    pub min_household_size: f64,
    /// Inclusive upper bound on residents per building for household bands.
    pub max_household_size: f64,
    pub region_corners_dms: Vec<DmsCorner>,
    pub chunk_size: usize,
    pub min_overlap_ratio: f64,
    pub top_n: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            building_epsg: crs::EPSG_UTM32N,
            grid_epsg: crs::EPSG_LAEA_EUROPE,
            raster_epsg: None,
            output_epsg: crs::EPSG_UTM32N,
            cell_size_m: 100.0,
            residential_codes: ResidentialCodes::default(),
            risk_bins: RiskBins::default(),
            household_bins: HouseholdBins::default(),
            min_household_size: 0.0,
            max_household_size: 200.0,
            region_corners_dms: lower_franconia_corners(),
            chunk_size: 100_000,
            min_overlap_ratio: 0.6,
            top_n: 20,
        }
    }
}

impl PipelineConfig {
    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Self::from_json_str(&text)
    }

    /// Defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::from_json_file(p),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.risk_bins.scheme()?;
        self.household_bins.scheme()?;
        let fixed = [self.building_epsg, self.grid_epsg, self.output_epsg];
        for epsg in fixed.into_iter().chain(self.raster_epsg) {
            if crs::proj_string(epsg).is_none() {
                return Err(Error::Config(format!("EPSG:{epsg} is not supported")));
            }
        }
        if !(self.cell_size_m > 0.0) {
            return Err(Error::Config(format!(
                "cell_size_m must be positive, got {}",
                self.cell_size_m
            )));
        }
        if !(self.min_household_size >= 0.0 && self.min_household_size < self.max_household_size) {
            return Err(Error::Config(format!(
                "household size bounds ({}, {}] are empty",
                self.min_household_size, self.max_household_size
            )));
        }
        if self.chunk_size == 0 {
            return Err(Error::Config("chunk_size must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.min_overlap_ratio) {
            return Err(Error::Config(format!(
                "min_overlap_ratio {} is not a fraction",
                self.min_overlap_ratio
            )));
        }
        if self.residential_codes.codes().is_empty() {
            return Err(Error::Config("residential_codes is empty".into()));
        }
        Ok(())
    }
}
