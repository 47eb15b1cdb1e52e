//! Single-band risk raster and nearest-cell point sampling.

use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::ops::Range;
use std::path::Path;

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use tiff::decoder::{Decoder, DecodingResult};
use tiff::tags::Tag;

use crate::error::{Error, Result};

const GEOKEY_RASTER_TYPE: u32 = 1025;
const GEOKEY_GEOGRAPHIC_TYPE: u32 = 2048;
const GEOKEY_PROJECTED_TYPE: u32 = 3072;
const GEOKEY_USER_DEFINED: u32 = 32767;
const RASTER_PIXEL_IS_POINT: u32 = 2;

/// Affine mapping between cell indices and map coordinates (no rotation).
/// `pixel_height` is negative for north-up rasters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    /// Map x of the outer upper-left corner of cell (0, 0).
    pub origin_x: f64,
    /// Map y of the outer upper-left corner of cell (0, 0).
    pub origin_y: f64,
    pub pixel_width: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    pub fn north_up(origin_x: f64, origin_y: f64, res_x: f64, res_y: f64) -> Self {
        Self { origin_x, origin_y, pixel_width: res_x, pixel_height: -res_y.abs() }
    }

    /// Fractional (col, row) of a map coordinate.
    #[inline]
    pub fn to_cell(&self, x: f64, y: f64) -> (f64, f64) {
        ((x - self.origin_x) / self.pixel_width, (y - self.origin_y) / self.pixel_height)
    }

    /// Map coordinate of the centre of cell (row, col).
    #[inline]
    pub fn cell_center(&self, row: usize, col: usize) -> (f64, f64) {
        (
            self.origin_x + (col as f64 + 0.5) * self.pixel_width,
            self.origin_y + (row as f64 + 0.5) * self.pixel_height,
        )
    }
}

/// A read-only scalar grid, stored row-major from the top (north) row down.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskRaster {
    pub data: Vec<f64>,
    pub width: usize,
    pub height: usize,
    pub transform: GeoTransform,
    pub nodata: Option<f64>,
    /// EPSG code from the GeoTIFF geokeys, when declared.
    pub epsg: Option<u32>,
}

impl RiskRaster {
    pub fn new(
        width: usize,
        height: usize,
        transform: GeoTransform,
        fill: f64,
        nodata: Option<f64>,
    ) -> Self {
        Self { data: vec![fill; width * height], width, height, transform, nodata, epsg: None }
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.data[row * self.width + col]
    }

    #[inline]
    pub fn set(&mut self, row: usize, col: usize, val: f64) {
        self.data[row * self.width + col] = val;
    }

    fn is_nodata(&self, v: f64) -> bool {
        match self.nodata {
            Some(nd) if nd.is_nan() => v.is_nan(),
            Some(nd) => v == nd,
            None => false,
        }
    }

    /// Cell containing (x, y), or None outside the extent.
    /// Cells own their upper-left edges; the far right and bottom edges of
    /// the raster are outside.
    pub fn locate(&self, x: f64, y: f64) -> Option<(usize, usize)> {
        let (fc, fr) = self.transform.to_cell(x, y);
        if !fc.is_finite() || !fr.is_finite() || fc < 0.0 || fr < 0.0 {
            return None;
        }
        let (col, row) = (fc.floor() as usize, fr.floor() as usize);
        (col < self.width && row < self.height).then_some((row, col))
    }

    /// Value of the cell containing (x, y); None for no-data or outside the extent.
    pub fn sample(&self, x: f64, y: f64) -> Option<f64> {
        let (row, col) = self.locate(x, y)?;
        self.value_at(row, col)
    }

    /// Cell value with no-data resolved to None.
    pub fn value_at(&self, row: usize, col: usize) -> Option<f64> {
        let v = self.get(row, col);
        (!self.is_nodata(v) && !v.is_nan()).then_some(v)
    }

    /// One result per input coordinate, in input order.
    pub fn sample_all(&self, coords: &[(f64, f64)]) -> Vec<Option<f64>> {
        coords.iter().map(|&(x, y)| self.sample(x, y)).collect()
    }

    /// Row and column ranges of the cells whose area can touch the given
    /// map-space box, clamped to the raster.
    pub fn window(
        &self,
        min_x: f64,
        min_y: f64,
        max_x: f64,
        max_y: f64,
    ) -> (Range<usize>, Range<usize>) {
        let (c0, r0) = self.transform.to_cell(min_x, max_y);
        let (c1, r1) = self.transform.to_cell(max_x, min_y);
        let clamp = |lo: f64, hi: f64, n: usize| -> Range<usize> {
            let (lo, hi) = if lo <= hi { (lo, hi) } else { (hi, lo) };
            let start = lo.floor().max(0.0) as usize;
            let end = (hi.ceil().max(0.0) as usize).min(n);
            start.min(end)..end
        };
        (clamp(r0, r1, self.height), clamp(c0, c1, self.width))
    }

    /// Read band 1 of a GeoTIFF. The file handle is dropped before returning,
    /// on success and on failure alike.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| Error::io(path, e))?;
        let raster = read_geotiff(BufReader::new(file)).map_err(|message| Error::Raster {
            path: path.to_path_buf(),
            message,
        })?;
        debug!(
            "opened raster {} ({}x{}, nodata {:?}, EPSG {:?})",
            path.display(),
            raster.width,
            raster.height,
            raster.nodata,
            raster.epsg
        );
        Ok(raster)
    }
}

fn geo_keys<R: Read + Seek>(decoder: &mut Decoder<R>) -> Vec<(u32, u32)> {
    // header: version, revision, minor, key count; then 4-tuples
    let Ok(Some(value)) = decoder.find_tag(Tag::GeoKeyDirectoryTag) else {
        return Vec::new();
    };
    let Ok(dir) = value.into_u32_vec() else {
        return Vec::new();
    };
    dir.get(4..)
        .unwrap_or_default()
        .chunks_exact(4)
        .filter(|entry| entry[1] == 0)
        .map(|entry| (entry[0], entry[3]))
        .collect()
}

fn read_geotiff<R: Read + Seek>(reader: R) -> std::result::Result<RiskRaster, String> {
    let mut decoder = Decoder::new(reader).map_err(|e| format!("not a valid TIFF: {e}"))?;
    let (width, height) = decoder.dimensions().map_err(|e| format!("dimensions error: {e}"))?;
    let (width, height) = (width as usize, height as usize);
    if width == 0 || height == 0 {
        return Err("zero-sized raster".into());
    }

    let scale = decoder
        .find_tag(Tag::ModelPixelScaleTag)
        .ok()
        .flatten()
        .and_then(|v| v.into_f64_vec().ok())
        .filter(|s| s.len() >= 2)
        .ok_or("missing ModelPixelScale tag")?;
    let tie = decoder
        .find_tag(Tag::ModelTiepointTag)
        .ok()
        .flatten()
        .and_then(|v| v.into_f64_vec().ok())
        .filter(|t| t.len() >= 6)
        .ok_or("missing ModelTiepoint tag")?;

    let nodata = decoder
        .find_tag(Tag::GdalNodata)
        .ok()
        .flatten()
        .and_then(|v| v.into_string().ok())
        .and_then(|s| s.trim_matches(char::from(0)).trim().parse::<f64>().ok());

    let keys = geo_keys(&mut decoder);
    let key = |id: u32| keys.iter().find(|(k, _)| *k == id).map(|(_, v)| *v);
    let epsg = key(GEOKEY_PROJECTED_TYPE)
        .filter(|&c| c != GEOKEY_USER_DEFINED)
        .or_else(|| key(GEOKEY_GEOGRAPHIC_TYPE).filter(|&c| c != GEOKEY_USER_DEFINED));

    // tiepoint (i, j) in raster space maps to (x, y) in model space
    let mut origin_x = tie[3] - tie[0] * scale[0];
    let mut origin_y = tie[4] + tie[1] * scale[1];
    if key(GEOKEY_RASTER_TYPE) == Some(RASTER_PIXEL_IS_POINT) {
        origin_x -= scale[0] / 2.0;
        origin_y += scale[1] / 2.0;
    }

    let image = decoder.read_image().map_err(|e| format!("read_image error: {e}"))?;
    // a nodata string written for an f32 band may carry more digits than f32 holds
    let nodata = match image {
        DecodingResult::F32(_) => nodata.map(|nd| f64::from(nd as f32)),
        _ => nodata,
    };
    // widen every pixel type; f64 bands keep their raw values
    let mut values: Vec<f64> = match image {
        DecodingResult::F64(v) => v,
        DecodingResult::F32(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::U8(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::U16(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::I8(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::I16(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::I32(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::U32(v) => v.into_iter().map(f64::from).collect(),
        _ => return Err("unsupported pixel type".into()),
    };

    let cells = width * height;
    if values.len() < cells {
        return Err(format!("expected {cells} samples, decoded {}", values.len()));
    }
    if values.len() > cells {
        let bands = values.len() / cells;
        warn!("raster has {bands} interleaved bands; using band 1");
        values = values.into_iter().step_by(bands).take(cells).collect();
    }

    Ok(RiskRaster {
        data: values,
        width,
        height,
        transform: GeoTransform::north_up(origin_x, origin_y, scale[0], scale[1]),
        nodata,
        epsg,
    })
}
