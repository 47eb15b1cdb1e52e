//! Census grid tables: `;`-separated, one row per 100 m cell.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use geo::{Contains, Point, Polygon};
use log::{debug, info, warn};

use crate::error::{Error, Result};
use crate::records::GridCell;

pub const COL_X: &str = "x_mp_100m";
pub const COL_Y: &str = "y_mp_100m";
pub const COL_POPULATION: &str = "Einwohner";
pub const COL_CELL_ID: &str = "GITTER_ID_100m";
pub const COL_OVER65_SHARE: &str = "AnteilUeber65";

/// Age-band columns and their display labels, youngest first.
pub const AGE_BANDS: [(&str, &str); 9] = [
    ("Unter10", "<10"),
    ("a10bis19", "10-19"),
    ("a20bis29", "20-29"),
    ("a30bis39", "30-39"),
    ("a40bis49", "40-49"),
    ("a50bis59", "50-59"),
    ("a60bis69", "60-69"),
    ("a70bis79", "70-79"),
    ("a80undaelter", ">80"),
];

pub fn age_band_labels() -> Vec<String> {
    AGE_BANDS.iter().map(|(_, label)| label.to_string()).collect()
}

/// Parse a census number. Accepts a decimal comma; placeholders such as
/// `–` or an empty field are missing values.
pub fn parse_decimal(field: &str) -> Option<f64> {
    let field = field.trim();
    if field.is_empty() {
        return None;
    }
    field.replace(',', ".").parse::<f64>().ok().filter(|v| v.is_finite())
}

fn census_reader<R: Read>(reader: R) -> csv::Reader<R> {
    ReaderBuilder::new().delimiter(b';').trim(csv::Trim::Headers).from_reader(reader)
}

fn column(headers: &StringRecord, name: &str, source_name: &str) -> Result<usize> {
    headers.iter().position(|h| h == name).ok_or_else(|| Error::schema(source_name, name))
}

fn open(path: &Path) -> Result<File> {
    File::open(path).map_err(|e| Error::io(path, e))
}

/// Read grid cells (centre, id, population). Rows with an unparseable or
/// negative population or centre are skipped with a warning.
pub fn read_grid_cells<R: Read>(reader: R, source_name: &str) -> Result<Vec<GridCell>> {
    let mut rdr = census_reader(reader);
    let headers = rdr.headers()?.clone();
    let (ix, iy) = (column(&headers, COL_X, source_name)?, column(&headers, COL_Y, source_name)?);
    let ip = column(&headers, COL_POPULATION, source_name)?;
    let iid = column(&headers, COL_CELL_ID, source_name)?;

    let mut cells = Vec::new();
    let mut skipped = 0usize;
    for (line, record) in rdr.records().enumerate() {
        let record = record?;
        let field = |i: usize| record.get(i).unwrap_or("");
        let parsed = (parse_decimal(field(ix)), parse_decimal(field(iy)), parse_decimal(field(ip)));
        match parsed {
            (Some(x), Some(y), Some(population)) if population >= 0.0 => {
                cells.push(GridCell { id: field(iid).to_string(), x, y, population });
            }
            _ => {
                skipped += 1;
                warn!(
                    "{source_name}: skipping row {} with unusable centre or population",
                    line + 2
                );
            }
        }
    }
    info!("{source_name}: {} grid cells loaded, {skipped} skipped", cells.len());
    Ok(cells)
}

pub fn load_grid_cells(path: &Path) -> Result<Vec<GridCell>> {
    read_grid_cells(open(path)?, &path.display().to_string())
}

/// Over-65 shares in percent, keyed by cell id.
pub fn read_over65_shares<R: Read>(reader: R, source_name: &str) -> Result<HashMap<String, f64>> {
    let mut rdr = census_reader(reader);
    let headers = rdr.headers()?.clone();
    let iid = column(&headers, COL_CELL_ID, source_name)?;
    let ishare = column(&headers, COL_OVER65_SHARE, source_name)?;
    let mut shares = HashMap::new();
    for record in rdr.records() {
        let record = record?;
        let id = record.get(iid).unwrap_or("");
        match record.get(ishare).and_then(parse_decimal) {
            Some(share) => {
                shares.entry(id.to_string()).or_insert(share);
            }
            None => warn!("{source_name}: no usable over-65 share for cell {id}"),
        }
    }
    Ok(shares)
}

pub fn load_over65_shares(path: &Path) -> Result<HashMap<String, f64>> {
    read_over65_shares(open(path)?, &path.display().to_string())
}

/// Residents per age band at one cell centre, in `AGE_BANDS` order.
#[derive(Debug, Clone, PartialEq)]
pub struct AgeRow {
    pub x: f64,
    pub y: f64,
    pub counts: Vec<f64>,
}

/// Rows with a missing centre or any missing age count are skipped.
pub fn read_age_rows<R: Read>(reader: R, source_name: &str) -> Result<Vec<AgeRow>> {
    let mut rdr = census_reader(reader);
    let headers = rdr.headers()?.clone();
    let (ix, iy) = (column(&headers, COL_X, source_name)?, column(&headers, COL_Y, source_name)?);
    let bands = AGE_BANDS
        .iter()
        .map(|(col, _)| column(&headers, col, source_name))
        .collect::<Result<Vec<_>>>()?;

    let mut rows = Vec::new();
    for (line, record) in rdr.records().enumerate() {
        let record = record?;
        let value = |i: usize| record.get(i).and_then(parse_decimal);
        let counts: Option<Vec<f64>> = bands.iter().map(|&i| value(i)).collect();
        match (value(ix), value(iy), counts) {
            (Some(x), Some(y), Some(counts)) => rows.push(AgeRow { x, y, counts }),
            _ => warn!("{source_name}: skipping row {} with missing values", line + 2),
        }
    }
    debug!("{source_name}: {} age rows", rows.len());
    Ok(rows)
}

pub fn load_age_rows(path: &Path) -> Result<Vec<AgeRow>> {
    read_age_rows(open(path)?, &path.display().to_string())
}

/// A cell with its absolute over-65 population.
#[derive(Debug, Clone, PartialEq)]
pub struct Over65Cell {
    pub cell: GridCell,
    pub over65: f64,
}

/// Inner join on cell id; `over65 = population * share / 100`. Cells where
/// either figure is not positive are dropped.
pub fn join_over65(cells: Vec<GridCell>, shares: &HashMap<String, f64>) -> Vec<Over65Cell> {
    cells
        .into_iter()
        .filter_map(|cell| {
            let share = *shares.get(&cell.id)?;
            let over65 = cell.population * share / 100.0;
            (cell.population > 0.0 && over65 > 0.0).then_some(Over65Cell { cell, over65 })
        })
        .collect()
}

/// Counters of a region filter run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterSummary {
    pub rows_read: usize,
    pub rows_kept: usize,
    pub chunks: usize,
}

fn write_chunk<W: Write>(
    out: &mut csv::Writer<W>,
    chunk: &[StringRecord],
    (ix, iy): (usize, usize),
    region: &Polygon<f64>,
) -> Result<usize> {
    let mut kept = 0;
    for record in chunk {
        let x = record.get(ix).and_then(parse_decimal);
        let y = record.get(iy).and_then(parse_decimal);
        if let (Some(x), Some(y)) = (x, y) {
            if region.contains(&Point::new(x, y)) {
                out.write_record(record)?;
                kept += 1;
            }
        }
    }
    out.flush().map_err(|e| Error::Csv(e.into()))?;
    Ok(kept)
}

/// Copy the rows whose cell centre lies inside `region`, chunk by chunk.
///
/// The header is validated before `open_output` is called, so a schema error
/// leaves no output behind. The header is written once, followed by matching
/// rows in input order.
pub fn filter_region<R, W>(
    reader: R,
    source_name: &str,
    region: &Polygon<f64>,
    chunk_size: usize,
    open_output: impl FnOnce() -> Result<W>,
) -> Result<FilterSummary>
where
    R: Read,
    W: Write,
{
    if chunk_size == 0 {
        return Err(Error::Config("chunk size must be at least 1".into()));
    }
    let mut rdr = census_reader(reader);
    let headers = rdr.headers()?.clone();
    let cols = (column(&headers, COL_X, source_name)?, column(&headers, COL_Y, source_name)?);

    let mut out = WriterBuilder::new().delimiter(b';').from_writer(open_output()?);
    out.write_record(&headers)?;

    let mut summary = FilterSummary::default();
    let mut chunk = Vec::with_capacity(chunk_size);
    for record in rdr.records() {
        chunk.push(record?);
        if chunk.len() == chunk_size {
            summary.rows_kept += write_chunk(&mut out, &chunk, cols, region)?;
            summary.rows_read += chunk.len();
            summary.chunks += 1;
            debug!(
                "chunk {}: {} of {} rows kept so far",
                summary.chunks, summary.rows_kept, summary.rows_read
            );
            chunk.clear();
        }
    }
    if !chunk.is_empty() {
        summary.rows_kept += write_chunk(&mut out, &chunk, cols, region)?;
        summary.rows_read += chunk.len();
        summary.chunks += 1;
    }
    out.flush().map_err(|e| Error::Csv(e.into()))?;
    info!(
        "{source_name}: kept {} of {} rows in {} chunks",
        summary.rows_kept, summary.rows_read, summary.chunks
    );
    Ok(summary)
}

/// File form of [`filter_region`]; the output is truncated first.
pub fn filter_region_file(
    input: &Path,
    output: &Path,
    region: &Polygon<f64>,
    chunk_size: usize,
) -> Result<FilterSummary> {
    let source_name = input.display().to_string();
    filter_region(open(input)?, &source_name, region, chunk_size, || {
        File::create(output).map_err(|e| Error::io(output, e))
    })
}
