//! GeoJSON feature sources: building footprints, municipality boundaries
//! and region outlines.

use std::fs;
use std::path::Path;

use geo::{Geometry, MultiPolygon};
use geojson::{Feature, FeatureCollection, JsonValue};
use log::{debug, warn};

use crate::error::{Error, Result};
use crate::geometry::{explode_geometries, Atom, Shape};
use crate::records::{BuildingAttrs, BuildingRecord, Municipality};

/// Property names of the building footprint export.
pub mod fields {
    pub const FUNCTION: &str = "function";
    pub const MEASURED_HEIGHT: &str = "measuredHe";
    pub const STOREYS: &str = "storeysAbo";
    pub const GML_ID: &str = "gml_id";
    pub const CREATION_DATE: &str = "creationDa";
    pub const MUNICIPALITY_CODE: &str = "Gemeindesc";
    pub const LOCALITY: &str = "LocalityNa";
    pub const THOROUGHFARE: &str = "Thoroughfa";
    pub const MUNICIPALITY_NAME: &str = "GEN";
}

/// Features of one source together with the EPSG code they are in.
#[derive(Debug, Clone, PartialEq)]
pub struct Layer<T> {
    pub epsg: u32,
    pub items: Vec<T>,
}

/// EPSG code from a CRS name such as `urn:ogc:def:crs:EPSG::25832`,
/// `EPSG:25832` or the OGC CRS84 urn.
pub fn parse_crs_name(name: &str) -> Option<u32> {
    let name = name.trim();
    if name.ends_with("CRS84") {
        return Some(crate::crs::EPSG_WGS84);
    }
    let upper = name.to_ascii_uppercase();
    let at = upper.rfind("EPSG")?;
    upper[at + 4..].trim_start_matches(':').parse().ok()
}

/// EPSG code declared by the legacy `crs` member, if any.
pub fn declared_epsg(fc: &FeatureCollection) -> Option<u32> {
    let crs = fc.foreign_members.as_ref()?.get("crs")?;
    let name = crs.get("properties")?.get("name")?.as_str()?;
    parse_crs_name(name)
}

fn vector_error(source_name: &str, message: impl ToString) -> Error {
    Error::Vector { path: source_name.into(), message: message.to_string() }
}

/// Parse a feature collection and settle its CRS.
pub fn parse_collection(
    text: &str,
    source_name: &str,
    default_epsg: u32,
) -> Result<(FeatureCollection, u32)> {
    let fc: FeatureCollection = text.parse().map_err(|e| vector_error(source_name, e))?;
    let epsg = match declared_epsg(&fc) {
        Some(code) => {
            if code != default_epsg {
                debug!("{source_name}: declared EPSG:{code} overrides EPSG:{default_epsg}");
            }
            code
        }
        None => default_epsg,
    };
    Ok((fc, epsg))
}

fn read_text(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|e| Error::io(path, e))
}

/// Every feature must carry every key, possibly as null.
fn require_properties(fc: &FeatureCollection, keys: &[&str], source_name: &str) -> Result<()> {
    for feature in &fc.features {
        if let Some(missing) = keys.iter().find(|k| !feature.contains_property(k)) {
            return Err(Error::schema(source_name, *missing));
        }
    }
    Ok(())
}

fn prop_string(feature: &Feature, key: &str) -> Option<String> {
    match feature.property(key)? {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn prop_f64(feature: &Feature, key: &str) -> Option<f64> {
    let value = match feature.property(key)? {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().replace(',', ".").parse().ok(),
        _ => None,
    };
    value.filter(|v| v.is_finite())
}

fn prop_count(feature: &Feature, key: &str) -> Option<u32> {
    prop_f64(feature, key).filter(|v| *v >= 0.0 && v.fract() == 0.0).map(|v| v as u32)
}

fn geometry_of(feature: &Feature, source_name: &str) -> Result<Option<Geometry<f64>>> {
    feature
        .geometry
        .as_ref()
        .map(|g| Geometry::<f64>::try_from(g).map_err(|e| vector_error(source_name, e)))
        .transpose()
}

fn building_attrs(feature: &Feature) -> BuildingAttrs {
    BuildingAttrs {
        gml_id: prop_string(feature, fields::GML_ID).unwrap_or_default(),
        creation_date: prop_string(feature, fields::CREATION_DATE),
        municipality_code: prop_string(feature, fields::MUNICIPALITY_CODE),
        locality: prop_string(feature, fields::LOCALITY),
        thoroughfare: prop_string(feature, fields::THOROUGHFARE),
        function: prop_string(feature, fields::FUNCTION),
        measured_height: prop_f64(feature, fields::MEASURED_HEIGHT),
        storeys_above_ground: prop_count(feature, fields::STOREYS),
    }
}

/// Building footprints, exploded to one record per part.
pub fn parse_buildings(
    text: &str,
    source_name: &str,
    default_epsg: u32,
) -> Result<Layer<BuildingRecord>> {
    let (fc, epsg) = parse_collection(text, source_name, default_epsg)?;
    require_properties(
        &fc,
        &[fields::GML_ID, fields::FUNCTION, fields::MEASURED_HEIGHT, fields::STOREYS],
        source_name,
    )?;
    let mut raw = Vec::with_capacity(fc.features.len());
    for feature in &fc.features {
        match geometry_of(feature, source_name)? {
            Some(g) => raw.push((g, building_attrs(feature))),
            None => warn!(
                "{source_name}: building {:?} has no geometry, skipped",
                prop_string(feature, fields::GML_ID)
            ),
        }
    }
    let items = explode_geometries(raw)?
        .into_iter()
        .map(|f| BuildingRecord::new(f.attrs, f.geometry))
        .collect::<Vec<_>>();
    debug!("{source_name}: {} features exploded into {} buildings", fc.features.len(), items.len());
    Ok(Layer { epsg, items })
}

pub fn load_buildings(path: &Path, default_epsg: u32) -> Result<Layer<BuildingRecord>> {
    parse_buildings(&read_text(path)?, &path.display().to_string(), default_epsg)
}

fn polygonal(g: Geometry<f64>) -> Result<MultiPolygon<f64>> {
    let polygons = Shape::try_from(g)?
        .into_atoms()
        .into_iter()
        .map(|atom| match atom {
            Atom::Polygon(p) => Ok(p),
            Atom::Point(_) => Err(Error::GeometryType { found: "Point".into() }),
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(MultiPolygon::new(polygons))
}

/// Municipality boundaries named by `GEN`.
pub fn parse_municipalities(
    text: &str,
    source_name: &str,
    default_epsg: u32,
) -> Result<Layer<Municipality>> {
    let (fc, epsg) = parse_collection(text, source_name, default_epsg)?;
    require_properties(&fc, &[fields::MUNICIPALITY_NAME], source_name)?;
    let mut items = Vec::with_capacity(fc.features.len());
    for feature in &fc.features {
        let name = prop_string(feature, fields::MUNICIPALITY_NAME).unwrap_or_default();
        match geometry_of(feature, source_name)? {
            Some(g) => items.push(Municipality { name, boundary: polygonal(g)? }),
            None => warn!("{source_name}: municipality {name} has no geometry, skipped"),
        }
    }
    Ok(Layer { epsg, items })
}

pub fn load_municipalities(path: &Path, default_epsg: u32) -> Result<Layer<Municipality>> {
    parse_municipalities(&read_text(path)?, &path.display().to_string(), default_epsg)
}

/// All polygons of a source gathered into one region.
pub fn parse_region(
    text: &str,
    source_name: &str,
    default_epsg: u32,
) -> Result<(MultiPolygon<f64>, u32)> {
    let (fc, epsg) = parse_collection(text, source_name, default_epsg)?;
    let mut polygons = Vec::new();
    for feature in &fc.features {
        if let Some(g) = geometry_of(feature, source_name)? {
            polygons.extend(polygonal(g)?);
        }
    }
    if polygons.is_empty() {
        return Err(vector_error(source_name, "region has no polygons"));
    }
    Ok((MultiPolygon::new(polygons), epsg))
}

pub fn load_region(path: &Path, default_epsg: u32) -> Result<(MultiPolygon<f64>, u32)> {
    parse_region(&read_text(path)?, &path.display().to_string(), default_epsg)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BUILDINGS: &str = r#"{
      "type": "FeatureCollection",
      "crs": { "type": "name", "properties": { "name": "urn:ogc:def:crs:EPSG::25832" } },
      "features": [
        { "type": "Feature",
          "properties": { "gml_id": "DEBY_A", "function": "31001_1000", "measuredHe": 9.5,
                          "storeysAbo": null, "LocalityNa": "Aub", "Gemeindesc": "09679114" },
          "geometry": { "type": "MultiPolygon", "coordinates": [
            [[[0,0],[10,0],[10,10],[0,10],[0,0]]],
            [[[20,0],[25,0],[25,5],[20,5],[20,0]]] ] } },
        { "type": "Feature",
          "properties": { "gml_id": "DEBY_B", "function": "31001_2000",
                          "measuredHe": "6,5", "storeysAbo": 2 },
          "geometry": { "type": "Polygon", "coordinates": [[[0,0],[4,0],[4,4],[0,4],[0,0]]] } },
        { "type": "Feature",
          "properties": { "gml_id": "DEBY_C", "function": "31001_1000",
                          "measuredHe": null, "storeysAbo": null },
          "geometry": null }
      ]
    }"#;

    #[test]
    fn crs_names() {
        assert_eq!(parse_crs_name("urn:ogc:def:crs:EPSG::25832"), Some(25832));
        assert_eq!(parse_crs_name("EPSG:3035"), Some(3035));
        assert_eq!(parse_crs_name("urn:ogc:def:crs:OGC:1.3:CRS84"), Some(4326));
        assert_eq!(parse_crs_name("local"), None);
    }

    #[test]
    fn buildings_are_exploded_with_attributes() {
        let layer = parse_buildings(BUILDINGS, "buildings", 4326).unwrap();
        assert_eq!(layer.epsg, 25832);
        assert_eq!(layer.items.len(), 3);
        let (a0, a1, b) = (&layer.items[0], &layer.items[1], &layer.items[2]);
        assert_eq!(a0.attrs, a1.attrs);
        assert_eq!(a0.attrs.locality.as_deref(), Some("Aub"));
        assert_eq!(a0.attrs.measured_height, Some(9.5));
        assert_eq!(a0.attrs.storeys_above_ground, None);
        assert_eq!(a1.footprint.area(), Some(25.0));
        assert_eq!(b.attrs.measured_height, Some(6.5));
        assert_eq!(b.attrs.storeys_above_ground, Some(2));
    }

    #[test]
    fn missing_required_property_is_a_schema_error() {
        let text = r#"{"type":"FeatureCollection","features":[
            {"type":"Feature","properties":{"gml_id":"x","function":"31001_1000","measuredHe":3},
             "geometry":{"type":"Point","coordinates":[1,2]}}]}"#;
        let err = parse_buildings(text, "buildings", 25832).unwrap_err();
        assert!(matches!(err, Error::Schema { ref field, .. } if field == "storeysAbo"));
    }

    #[test]
    fn line_geometries_are_rejected() {
        let text = r#"{"type":"FeatureCollection","features":[
            {"type":"Feature",
             "properties":{"gml_id":"x","function":"f","measuredHe":3,"storeysAbo":1},
             "geometry":{"type":"LineString","coordinates":[[1,2],[3,4]]}}]}"#;
        assert!(matches!(parse_buildings(text, "b", 25832), Err(Error::GeometryType { .. })));
    }

    #[test]
    fn municipalities_and_region() {
        let text = r#"{"type":"FeatureCollection","features":[
            {"type":"Feature","properties":{"GEN":"Aub"},
             "geometry":{"type":"Polygon","coordinates":[[[0,0],[1,0],[1,1],[0,1],[0,0]]]}},
            {"type":"Feature","properties":{"GEN":"Bergtheim"},
             "geometry":{"type":"MultiPolygon",
                         "coordinates":[[[[2,0],[3,0],[3,1],[2,1],[2,0]]]]}}]}"#;
        let layer = parse_municipalities(text, "munis", 25832).unwrap();
        assert_eq!(layer.epsg, 25832);
        assert_eq!(layer.items[1].name, "Bergtheim");
        let (region, _) = parse_region(text, "region", 25832).unwrap();
        assert_eq!(region.0.len(), 2);
        assert!(parse_region(r#"{"type":"FeatureCollection","features":[]}"#, "r", 1).is_err());
    }

    #[test]
    fn invalid_json_names_the_source() {
        let err = parse_region("{", "region.geojson", 25832).unwrap_err();
        assert!(err.to_string().contains("region.geojson"));
    }
}
