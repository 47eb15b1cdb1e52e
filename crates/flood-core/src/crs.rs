//! Coordinate reference system handling.
//!
//! Axis order contract: every coordinate pair crossing this module's API is
//! `(easting, northing)` for projected systems and `(longitude, latitude)` in
//! decimal degrees for geographic ones, regardless of the axis order the
//! EPSG registry declares. Callers holding `(lat, lon)` pairs must swap them
//! before calling in.

use std::fmt;

use geo::{Coord, MapCoords, Point, Polygon};
use proj4rs::proj::Proj;
use proj4rs::transform::transform;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// WGS 84 geographic (lon/lat degrees).
pub const EPSG_WGS84: u32 = 4326;
/// ETRS89 geographic (lon/lat degrees).
pub const EPSG_ETRS89: u32 = 4258;
/// ETRS89 / LAEA Europe, the census grid system.
pub const EPSG_LAEA_EUROPE: u32 = 3035;
/// ETRS89 / UTM zone 32N, the Bavarian cadastre system.
pub const EPSG_UTM32N: u32 = 25832;
/// ETRS89 / UTM zone 33N.
pub const EPSG_UTM33N: u32 = 25833;
/// DHDN / 3-degree Gauss-Kruger zone 4.
pub const EPSG_DHDN_GK4: u32 = 31468;

/// Proj4 definitions for the systems the pipeline meets in practice.
pub fn proj_string(epsg: u32) -> Option<&'static str> {
    match epsg {
        EPSG_WGS84 => Some("+proj=longlat +datum=WGS84 +no_defs"),
        EPSG_ETRS89 => Some("+proj=longlat +ellps=GRS80 +towgs84=0,0,0,0,0,0,0 +no_defs"),
        EPSG_LAEA_EUROPE => Some(
            "+proj=laea +lat_0=52 +lon_0=10 +x_0=4321000 +y_0=3210000 \
             +ellps=GRS80 +towgs84=0,0,0,0,0,0,0 +units=m +no_defs",
        ),
        EPSG_UTM32N => {
            Some("+proj=utm +zone=32 +ellps=GRS80 +towgs84=0,0,0,0,0,0,0 +units=m +no_defs")
        }
        EPSG_UTM33N => {
            Some("+proj=utm +zone=33 +ellps=GRS80 +towgs84=0,0,0,0,0,0,0 +units=m +no_defs")
        }
        EPSG_DHDN_GK4 => Some(
            "+proj=tmerc +lat_0=0 +lon_0=12 +k=1 +x_0=4500000 +y_0=0 +ellps=bessel \
             +towgs84=598.1,73.7,418.2,0.202,0.045,-2.455,6.7 +units=m +no_defs",
        ),
        _ => None,
    }
}

fn load_proj(epsg: u32) -> Result<Proj> {
    let def = proj_string(epsg)
        .ok_or_else(|| Error::Config(format!("EPSG:{epsg} is not supported")))?;
    Proj::from_proj_string(def)
        .map_err(|e| Error::Config(format!("invalid projection definition for EPSG:{epsg}: {e}")))
}

/// Reusable transformation between two EPSG systems.
pub struct CoordTransformer {
    source_epsg: u32,
    target_epsg: u32,
    // None when source and target coincide
    projs: Option<(Proj, Proj)>,
}

impl fmt::Debug for CoordTransformer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoordTransformer")
            .field("source_epsg", &self.source_epsg)
            .field("target_epsg", &self.target_epsg)
            .finish_non_exhaustive()
    }
}

impl CoordTransformer {
    pub fn new(source_epsg: u32, target_epsg: u32) -> Result<Self> {
        let projs = if source_epsg == target_epsg {
            // still reject unknown codes so misconfiguration surfaces early
            load_proj(source_epsg)?;
            None
        } else {
            Some((load_proj(source_epsg)?, load_proj(target_epsg)?))
        };
        Ok(Self { source_epsg, target_epsg, projs })
    }

    /// The transformer for the opposite direction.
    pub fn inverse(&self) -> Result<Self> {
        Self::new(self.target_epsg, self.source_epsg)
    }

    pub fn source_epsg(&self) -> u32 {
        self.source_epsg
    }

    pub fn target_epsg(&self) -> u32 {
        self.target_epsg
    }

    /// Transform one `(x, y)` pair; see the module docs for axis order.
    pub fn transform(&self, x: f64, y: f64) -> Result<(f64, f64)> {
        let Some((src, dst)) = &self.projs else {
            return Ok((x, y));
        };
        let (in_x, in_y) = if src.is_latlong() { (x.to_radians(), y.to_radians()) } else { (x, y) };
        let mut point = (in_x, in_y, 0.0);
        transform(src, dst, &mut point).map_err(|e| Error::Projection {
            from: self.source_epsg,
            to: self.target_epsg,
            message: format!("({x}, {y}): {e}"),
        })?;
        if dst.is_latlong() {
            Ok((point.0.to_degrees(), point.1.to_degrees()))
        } else {
            Ok((point.0, point.1))
        }
    }

    /// Transform a batch, preserving order and count.
    pub fn transform_all(&self, coords: &[(f64, f64)]) -> Result<Vec<(f64, f64)>> {
        coords.iter().map(|&(x, y)| self.transform(x, y)).collect()
    }

    pub fn transform_point(&self, p: Point<f64>) -> Result<Point<f64>> {
        let (x, y) = self.transform(p.x(), p.y())?;
        Ok(Point::new(x, y))
    }

    pub fn transform_polygon(&self, polygon: &Polygon<f64>) -> Result<Polygon<f64>> {
        polygon.try_map_coords(|c: Coord<f64>| {
            self.transform(c.x, c.y).map(|(x, y)| Coord { x, y })
        })
    }
}

/// Hemisphere indicator of a DMS coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Hemisphere {
    N,
    S,
    E,
    W,
}

/// A degree-minute-second angle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Dms {
    pub degrees: f64,
    pub minutes: f64,
    pub seconds: f64,
    pub hemisphere: Hemisphere,
}

impl Dms {
    pub fn new(degrees: f64, minutes: f64, seconds: f64, hemisphere: Hemisphere) -> Self {
        Self { degrees, minutes, seconds, hemisphere }
    }

    pub fn to_decimal(self) -> f64 {
        dms_to_dd(self.degrees, self.minutes, self.seconds, self.hemisphere)
    }
}

/// `deg + min/60 + sec/3600`, negated for the southern and western hemispheres.
pub fn dms_to_dd(degrees: f64, minutes: f64, seconds: f64, hemisphere: Hemisphere) -> f64 {
    let dd = degrees + minutes / 60.0 + seconds / 3600.0;
    match hemisphere {
        Hemisphere::S | Hemisphere::W => -dd,
        Hemisphere::N | Hemisphere::E => dd,
    }
}

/// A (latitude, longitude) corner as surveyed, in DMS.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DmsCorner {
    pub lat: Dms,
    pub lon: Dms,
}

impl DmsCorner {
    /// `(lon, lat)` in decimal degrees, ready for [`CoordTransformer`].
    pub fn to_lon_lat(self) -> (f64, f64) {
        (self.lon.to_decimal(), self.lat.to_decimal())
    }
}

/// Build a polygon in `target_epsg` from DMS corners given in WGS 84.
/// Corner order is kept; the ring is closed automatically.
pub fn polygon_from_dms(corners: &[DmsCorner], target_epsg: u32) -> Result<Polygon<f64>> {
    if corners.len() < 3 {
        return Err(Error::Config(format!(
            "a region needs at least 3 corners, got {}",
            corners.len()
        )));
    }
    let transformer = CoordTransformer::new(EPSG_WGS84, target_epsg)?;
    let lon_lat: Vec<(f64, f64)> = corners.iter().map(|c| c.to_lon_lat()).collect();
    let projected = transformer.transform_all(&lon_lat)?;
    Ok(Polygon::new(projected.into(), vec![]))
}
