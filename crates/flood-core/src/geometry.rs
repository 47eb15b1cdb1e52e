//! Geometry normalisation: multi-part records are exploded into one record
//! per atomic point or polygon.
//!
//! Attributes are cloned verbatim onto every part. Part order follows the
//! iteration order of the source collection.

use geo::{Area, Centroid, Geometry, MultiPoint, MultiPolygon, Point, Polygon};

use crate::error::{Error, Result};

/// The geometry kinds the pipeline accepts from vector sources.
#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    Point(Point<f64>),
    Polygon(Polygon<f64>),
    MultiPoint(MultiPoint<f64>),
    MultiPolygon(MultiPolygon<f64>),
}

/// A single, non-collection geometry.
#[derive(Debug, Clone, PartialEq)]
pub enum Atom {
    Point(Point<f64>),
    Polygon(Polygon<f64>),
}

impl Atom {
    /// Planar footprint area. Points have none.
    pub fn area(&self) -> Option<f64> {
        match self {
            Atom::Point(_) => None,
            Atom::Polygon(p) => Some(p.unsigned_area()),
        }
    }

    /// Centroid of a polygon, or the point itself.
    /// Degenerate polygons (no area, no vertices) have no centroid.
    pub fn centroid(&self) -> Option<Point<f64>> {
        match self {
            Atom::Point(p) => Some(*p),
            Atom::Polygon(p) => p.centroid(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Atom::Point(_) => "Point",
            Atom::Polygon(_) => "Polygon",
        }
    }
}

fn geometry_kind(g: &Geometry<f64>) -> &'static str {
    match g {
        Geometry::Point(_) => "Point",
        Geometry::Line(_) => "Line",
        Geometry::LineString(_) => "LineString",
        Geometry::Polygon(_) => "Polygon",
        Geometry::MultiPoint(_) => "MultiPoint",
        Geometry::MultiLineString(_) => "MultiLineString",
        Geometry::MultiPolygon(_) => "MultiPolygon",
        Geometry::GeometryCollection(_) => "GeometryCollection",
        Geometry::Rect(_) => "Rect",
        Geometry::Triangle(_) => "Triangle",
    }
}

impl TryFrom<Geometry<f64>> for Shape {
    type Error = Error;

    /// Accepts points, polygons, their multi-part forms, and geometry
    /// collections whose members are all points or all polygons.
    fn try_from(g: Geometry<f64>) -> Result<Self> {
        match g {
            Geometry::Point(p) => Ok(Shape::Point(p)),
            Geometry::Polygon(p) => Ok(Shape::Polygon(p)),
            Geometry::MultiPoint(mp) => Ok(Shape::MultiPoint(mp)),
            Geometry::MultiPolygon(mp) => Ok(Shape::MultiPolygon(mp)),
            Geometry::GeometryCollection(gc) => {
                let mut points = Vec::new();
                let mut polygons = Vec::new();
                for member in gc {
                    match member {
                        Geometry::Point(p) => points.push(p),
                        Geometry::MultiPoint(mp) => points.extend(mp),
                        Geometry::Polygon(p) => polygons.push(p),
                        Geometry::MultiPolygon(mp) => polygons.extend(mp),
                        other => {
                            return Err(Error::GeometryType {
                                found: format!("GeometryCollection<{}>", geometry_kind(&other)),
                            })
                        }
                    }
                }
                match (points.is_empty(), polygons.is_empty()) {
                    (false, true) => Ok(Shape::MultiPoint(MultiPoint::new(points))),
                    (true, false) => Ok(Shape::MultiPolygon(MultiPolygon::new(polygons))),
                    (true, true) => Err(Error::GeometryType {
                        found: "empty GeometryCollection".into(),
                    }),
                    (false, false) => Err(Error::GeometryType {
                        found: "mixed GeometryCollection".into(),
                    }),
                }
            }
            other => Err(Error::GeometryType { found: geometry_kind(&other).into() }),
        }
    }
}

impl Shape {
    /// Split into atomic parts, in collection order.
    pub fn into_atoms(self) -> Vec<Atom> {
        match self {
            Shape::Point(p) => vec![Atom::Point(p)],
            Shape::Polygon(p) => vec![Atom::Polygon(p)],
            Shape::MultiPoint(mp) => mp.into_iter().map(Atom::Point).collect(),
            Shape::MultiPolygon(mp) => mp.into_iter().map(Atom::Polygon).collect(),
        }
    }
}

/// A geometry-bearing record with arbitrary attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct Feature<A> {
    pub shape: Shape,
    pub attrs: A,
}

/// A record holding exactly one atomic geometry.
#[derive(Debug, Clone, PartialEq)]
pub struct AtomicFeature<A> {
    pub geometry: Atom,
    pub attrs: A,
}

/// Explode typed features. A k-part feature yields k records.
pub fn explode<A: Clone>(features: impl IntoIterator<Item = Feature<A>>) -> Vec<AtomicFeature<A>> {
    let mut out = Vec::new();
    for feature in features {
        let Feature { shape, attrs } = feature;
        let atoms = shape.into_atoms();
        let last = atoms.len().saturating_sub(1);
        for (i, geometry) in atoms.into_iter().enumerate() {
            // the final part takes ownership instead of cloning
            if i == last {
                out.push(AtomicFeature { geometry, attrs });
                break;
            }
            out.push(AtomicFeature { geometry, attrs: attrs.clone() });
        }
    }
    out
}

/// Classify raw `geo` geometries and explode them.
/// The first unsupported geometry aborts the batch.
pub fn explode_geometries<A: Clone>(
    records: impl IntoIterator<Item = (Geometry<f64>, A)>,
) -> Result<Vec<AtomicFeature<A>>> {
    let features = records
        .into_iter()
        .map(|(g, attrs)| Shape::try_from(g).map(|shape| Feature { shape, attrs }))
        .collect::<Result<Vec<_>>>()?;
    Ok(explode(features))
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{line_string, point, polygon, GeometryCollection};

    fn square(x: f64, y: f64, side: f64) -> Polygon<f64> {
        polygon![
            (x: x, y: y),
            (x: x + side, y: y),
            (x: x + side, y: y + side),
            (x: x, y: y + side),
        ]
    }

    #[test]
    fn multipolygon_with_k_parts_yields_k_records() {
        let mp = MultiPolygon::new(vec![
            square(0.0, 0.0, 1.0),
            square(5.0, 5.0, 2.0),
            square(9.0, 0.0, 1.0),
        ]);
        let out = explode(vec![Feature {
            shape: Shape::MultiPolygon(mp),
            attrs: ("DEBY123", 7.5),
        }]);
        assert_eq!(out.len(), 3);
        assert!(out.iter().all(|f| f.attrs == ("DEBY123", 7.5)));
        assert_eq!(out[1].geometry, Atom::Polygon(square(5.0, 5.0, 2.0)));
    }

    #[test]
    fn single_geometries_pass_through() {
        let out = explode(vec![
            Feature { shape: Shape::Point(point!(x: 1.0, y: 2.0)), attrs: 1 },
            Feature { shape: Shape::Polygon(square(0.0, 0.0, 1.0)), attrs: 2 },
        ]);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].geometry.kind(), "Point");
        assert_eq!(out[1].attrs, 2);
    }

    #[test]
    fn multipoint_preserves_part_order() {
        let mp = MultiPoint::new(vec![
            point!(x: 3.0, y: 0.0),
            point!(x: 1.0, y: 0.0),
            point!(x: 2.0, y: 0.0),
        ]);
        let out = explode(vec![Feature { shape: Shape::MultiPoint(mp), attrs: () }]);
        let xs: Vec<f64> =
            out.iter().filter_map(|f| f.geometry.centroid()).map(|p| p.x()).collect();
        assert_eq!(xs, vec![3.0, 1.0, 2.0]);
    }

    #[test]
    fn linestring_is_rejected() {
        let g = Geometry::LineString(line_string![(x: 0.0, y: 0.0), (x: 1.0, y: 1.0)]);
        let err = explode_geometries(vec![(g, ())]).unwrap_err();
        assert!(matches!(err, Error::GeometryType { ref found } if found == "LineString"));
    }

    #[test]
    fn mixed_collection_is_rejected_but_homogeneous_is_accepted() {
        let mixed = GeometryCollection::new_from(vec![
            Geometry::Point(point!(x: 0.0, y: 0.0)),
            Geometry::Polygon(square(0.0, 0.0, 1.0)),
        ]);
        assert!(Shape::try_from(Geometry::GeometryCollection(mixed)).is_err());

        let points = GeometryCollection::new_from(vec![
            Geometry::Point(point!(x: 0.0, y: 0.0)),
            Geometry::Point(point!(x: 1.0, y: 0.0)),
        ]);
        let shape = Shape::try_from(Geometry::GeometryCollection(points)).unwrap();
        assert_eq!(shape.into_atoms().len(), 2);
    }

    #[test]
    fn polygon_area_and_centroid() {
        let atom = Atom::Polygon(square(10.0, 20.0, 4.0));
        assert_eq!(atom.area(), Some(16.0));
        let c = atom.centroid().unwrap();
        assert!((c.x() - 12.0).abs() < 1e-12 && (c.y() - 22.0).abs() < 1e-12);
        assert_eq!(Atom::Point(point!(x: 1.0, y: 1.0)).area(), None);
    }
}
