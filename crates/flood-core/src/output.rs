//! CSV writers for the published tables. Floats use Rust's shortest
//! round-trip formatting and missing values are empty fields, so identical
//! inputs give identical bytes.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use csv::{Reader, Writer};

use crate::aggregate::{row_percentages, CategoryTable, RankedGroup};
use crate::error::{Error, Result};
use crate::municipality::ZoneStat;
use crate::records::{AllocationStatus, BuildingRecord};

pub const BUILDING_COLUMNS: [&str; 19] = [
    "gml_id",
    "creation_date",
    "municipality_code",
    "locality",
    "thoroughfare",
    "function",
    "x",
    "y",
    "measured_height",
    "storeys_above_ground",
    "estimated_storeys",
    "area",
    "floor_area",
    "volume",
    "cell_id",
    "risk_score",
    "risk_class",
    "estimated_population",
    "allocation_status",
];

fn opt<T: ToString>(v: Option<T>) -> String {
    v.map(|v| v.to_string()).unwrap_or_default()
}

fn opt_str(v: &Option<String>) -> String {
    v.clone().unwrap_or_default()
}

/// Create or truncate `path`.
pub fn create(path: &Path) -> Result<File> {
    File::create(path).map_err(|e| Error::io(path, e))
}

fn finish<W: Write>(mut w: Writer<W>) -> Result<()> {
    w.flush().map_err(|e| Error::Csv(e.into()))
}

pub fn write_buildings<W: Write>(out: W, records: &[BuildingRecord]) -> Result<()> {
    let mut w = Writer::from_writer(out);
    w.write_record(BUILDING_COLUMNS)?;
    for r in records {
        let a = &r.attrs;
        w.write_record([
            a.gml_id.clone(),
            opt_str(&a.creation_date),
            opt_str(&a.municipality_code),
            opt_str(&a.locality),
            opt_str(&a.thoroughfare),
            opt_str(&a.function),
            opt(r.centroid.map(|p| p.x())),
            opt(r.centroid.map(|p| p.y())),
            opt(a.measured_height),
            opt(a.storeys_above_ground),
            opt(r.estimated_storeys),
            opt(r.area),
            opt(r.floor_area),
            opt(r.volume),
            opt_str(&r.cell_id),
            opt(r.risk_score),
            opt(r.risk_class),
            opt(r.estimated_population),
            r.allocation_status.to_string(),
        ])?;
    }
    finish(w)
}

/// `group, <category...>, total, <category>_pct...`; percentages are empty
/// for zero-total rows.
pub fn write_category_table<W: Write>(
    out: W,
    group_header: &str,
    table: &CategoryTable,
) -> Result<()> {
    let mut w = Writer::from_writer(out);
    let mut header = vec![group_header.to_string()];
    header.extend(table.categories().iter().cloned());
    header.push("total".into());
    header.extend(table.categories().iter().map(|c| format!("{c}_pct")));
    w.write_record(&header)?;

    for (group, row) in table.rows() {
        let mut rec = vec![group.to_string()];
        rec.extend(row.iter().map(f64::to_string));
        rec.push(row.iter().sum::<f64>().to_string());
        match row_percentages(row) {
            Some(pct) => rec.extend(pct.iter().map(f64::to_string)),
            None => rec.extend(row.iter().map(|_| String::new())),
        }
        w.write_record(&rec)?;
    }
    finish(w)
}

/// `GEN, overlap_ratio, <class...>, total, <class>_pct...`.
pub fn write_zone_stats<W: Write>(out: W, labels: &[String], stats: &[ZoneStat]) -> Result<()> {
    let mut w = Writer::from_writer(out);
    let mut header = vec!["GEN".to_string(), "overlap_ratio".to_string()];
    header.extend(labels.iter().cloned());
    header.push("total".into());
    header.extend(labels.iter().map(|c| format!("{c}_pct")));
    w.write_record(&header)?;

    for s in stats {
        let mut rec = vec![s.name.clone(), s.overlap_ratio.to_string()];
        rec.extend(s.counts.counts.iter().map(f64::to_string));
        rec.push(s.counts.total().to_string());
        match s.percentages() {
            Some(pct) => rec.extend(pct.iter().map(f64::to_string)),
            None => rec.extend(labels.iter().map(|_| String::new())),
        }
        w.write_record(&rec)?;
    }
    finish(w)
}

pub fn write_ranking<W: Write>(out: W, group_header: &str, ranking: &[RankedGroup]) -> Result<()> {
    let mut w = Writer::from_writer(out);
    w.write_record([group_header, "share_pct", "total"])?;
    for r in ranking {
        w.write_record([r.group.clone(), (r.share * 100.0).to_string(), r.total.to_string()])?;
    }
    finish(w)
}

/// Building count and allocated populations read back from an enriched
/// building table.
pub fn read_allocated_populations<R: Read>(
    input: R,
    source_name: &str,
) -> Result<(usize, Vec<f64>)> {
    let mut rdr = Reader::from_reader(input);
    let headers = rdr.headers()?.clone();
    let col = |name: &str| {
        headers.iter().position(|h| h == name).ok_or_else(|| Error::schema(source_name, name))
    };
    let (ipop, istatus) = (col("estimated_population")?, col("allocation_status")?);
    let allocated = AllocationStatus::Allocated.as_str();

    let mut buildings = 0;
    let mut populations = Vec::new();
    for record in rdr.records() {
        let record = record?;
        buildings += 1;
        if record.get(istatus) != Some(allocated) {
            continue;
        }
        if let Some(p) = record.get(ipop).and_then(|v| v.parse::<f64>().ok()) {
            populations.push(p);
        }
    }
    Ok((buildings, populations))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::RiskClass;
    use crate::geometry::Atom;
    use crate::municipality::ZoneCounts;
    use crate::records::BuildingAttrs;
    use geo::point;

    fn text(buf: Vec<u8>) -> String {
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn building_rows_leave_nulls_empty() {
        let attrs = BuildingAttrs {
            gml_id: "DEBY_A".into(),
            function: Some("31001_1000".into()),
            ..Default::default()
        };
        let mut r = BuildingRecord::new(attrs, Atom::Point(point!(x: 1.0, y: 2.0)));
        r.centroid = Some(point!(x: 566000.5, y: 5513000.25));
        r.risk_class = Some(RiskClass::VeryHigh);
        r.estimated_population = Some(2.5);
        r.allocation_status = AllocationStatus::Allocated;
        let mut buf = Vec::new();
        write_buildings(&mut buf, &[r]).unwrap();
        let out = text(buf);
        let lines: Vec<_> = out.lines().collect();
        assert_eq!(lines[0].split(',').count(), 19);
        assert_eq!(
            lines[1],
            "DEBY_A,,,,,31001_1000,566000.5,5513000.25,,,,,,,,,very-high,2.5,allocated"
        );
    }

    #[test]
    fn category_table_has_fixed_columns() {
        let mut t =
            CategoryTable::with_groups(vec!["1-2".into(), "3-5".into()], RiskClass::names());
        t.count("1-2", "low").unwrap();
        t.count("1-2", "high").unwrap();
        let mut buf = Vec::new();
        write_category_table(&mut buf, "household", &t).unwrap();
        let out = text(buf);
        let lines: Vec<_> = out.lines().collect();
        assert_eq!(
            lines[0],
            "household,very-low,low,medium,high,very-high,total,\
             very-low_pct,low_pct,medium_pct,high_pct,very-high_pct"
        );
        assert_eq!(lines[1], "1-2,0,1,0,1,0,2,0,50,0,50,0");
        assert_eq!(lines[2], "3-5,0,0,0,0,0,0,,,,,");
    }

    #[test]
    fn zone_stats_rows() {
        let stats = vec![ZoneStat {
            name: "Aub".into(),
            overlap_ratio: 0.75,
            counts: ZoneCounts {
                counts: vec![1.0, 0.0, 0.0, 0.0, 3.0],
                nodata: 2,
                out_of_range: 0,
            },
        }];
        let mut buf = Vec::new();
        write_zone_stats(&mut buf, &RiskClass::names(), &stats).unwrap();
        let out = text(buf);
        assert_eq!(out.lines().nth(1), Some("Aub,0.75,1,0,0,0,3,4,25,0,0,0,75"));
    }

    #[test]
    fn populations_read_back_from_building_table() {
        let csv = "gml_id,estimated_population,allocation_status\n\
                   a,2.5,allocated\nb,,no-cell\nc,0,allocated\n";
        let (n, pops) = read_allocated_populations(csv.as_bytes(), "buildings").unwrap();
        assert_eq!(n, 3);
        assert_eq!(pops, vec![2.5, 0.0]);
        assert!(read_allocated_populations("gml_id\n".as_bytes(), "x").is_err());
    }
}
