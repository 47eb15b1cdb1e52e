//! Square grid cells rebuilt from their centres, and point-in-cell lookup.
//!
//! A cell is `[cx - s/2, cx + s/2) x [cy - s/2, cy + s/2)`. Cells own their
//! lower and left edges, so a point on a shared edge lands in exactly one
//! cell of a regular lattice.

use std::collections::HashSet;

use geo::{Point, Polygon, Rect};
use log::{debug, warn};
use rstar::primitives::{GeomWithData, Rectangle};
use rstar::{RTree, AABB};

use crate::error::{Error, Result};
use crate::records::GridCell;

type CellEntry = GeomWithData<Rectangle<[f64; 2]>, usize>;

/// Square polygon of side `size` centred on `center`.
pub fn cell_polygon(center: Point<f64>, size: f64) -> Polygon<f64> {
    let half = size / 2.0;
    Rect::new(
        (center.x() - half, center.y() - half),
        (center.x() + half, center.y() + half),
    )
    .to_polygon()
}

/// Spatial index over the tiling of a set of grid cells.
pub struct GridIndex {
    cells: Vec<GridCell>,
    cell_size: f64,
    tree: RTree<CellEntry>,
    duplicate_population: f64,
}

impl GridIndex {
    /// Index the cells. Repeated centres keep the first cell; the population
    /// of the dropped ones is reported by [`GridIndex::duplicate_population`].
    pub fn build(cells: impl IntoIterator<Item = GridCell>, cell_size: f64) -> Result<Self> {
        if !(cell_size.is_finite() && cell_size > 0.0) {
            return Err(Error::Config(format!("cell size must be positive, got {cell_size}")));
        }
        let half = cell_size / 2.0;
        let mut seen = HashSet::new();
        let mut kept = Vec::new();
        let mut entries = Vec::new();
        let mut duplicate_population = 0.0;
        for cell in cells {
            if !seen.insert((cell.x.to_bits(), cell.y.to_bits())) {
                warn!(
                    "duplicate grid centre ({}, {}) for cell {}, dropping its {} residents",
                    cell.x, cell.y, cell.id, cell.population
                );
                duplicate_population += cell.population;
                continue;
            }
            let rect = Rectangle::from_corners(
                [cell.x - half, cell.y - half],
                [cell.x + half, cell.y + half],
            );
            entries.push(GeomWithData::new(rect, kept.len()));
            kept.push(cell);
        }
        debug!("indexed {} grid cells of {cell_size} m", kept.len());
        Ok(Self {
            cells: kept,
            cell_size,
            tree: RTree::bulk_load(entries),
            duplicate_population,
        })
    }

    pub fn cells(&self) -> &[GridCell] {
        &self.cells
    }

    pub fn cell_size(&self) -> f64 {
        self.cell_size
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Population of cells dropped for repeating an earlier centre.
    pub fn duplicate_population(&self) -> f64 {
        self.duplicate_population
    }

    pub fn polygon(&self, index: usize) -> Polygon<f64> {
        cell_polygon(self.cells[index].center(), self.cell_size)
    }

    /// Index of the cell containing `p`, if any.
    pub fn locate(&self, p: Point<f64>) -> Option<usize> {
        let (x, y) = (p.x(), p.y());
        self.tree
            .locate_in_envelope_intersecting(&AABB::from_point([x, y]))
            .filter(|entry| {
                let (lo, hi) = (entry.geom().lower(), entry.geom().upper());
                lo[0] <= x && x < hi[0] && lo[1] <= y && y < hi[1]
            })
            .map(|entry| entry.data)
            .min()
    }

    /// Left join: one optional cell index per input point, in input order.
    pub fn assign(&self, points: &[Option<Point<f64>>]) -> Vec<Option<usize>> {
        points.iter().map(|p| p.and_then(|p| self.locate(p))).collect()
    }

    /// Invert an assignment into per-cell member lists (cell order, then
    /// input order within each cell).
    pub fn members(&self, assignment: &[Option<usize>]) -> Vec<Vec<usize>> {
        let mut out = vec![Vec::new(); self.cells.len()];
        for (i, cell) in assignment.iter().enumerate() {
            if let Some(c) = cell {
                out[*c].push(i);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{point, Area, BooleanOps};

    fn cell(id: &str, x: f64, y: f64, population: f64) -> GridCell {
        GridCell { id: id.into(), x, y, population }
    }

    fn two_by_two() -> GridIndex {
        GridIndex::build(
            vec![
                cell("a", 4321050.0, 3210050.0, 10.0),
                cell("b", 4321150.0, 3210050.0, 20.0),
                cell("c", 4321050.0, 3210150.0, 30.0),
                cell("d", 4321150.0, 3210150.0, 0.0),
            ],
            100.0,
        )
        .unwrap()
    }

    #[test]
    fn polygon_is_centred_square() {
        let p = cell_polygon(point!(x: 50.0, y: 50.0), 100.0);
        assert_eq!(p.unsigned_area(), 10000.0);
        let coords: Vec<_> = p.exterior().coords().map(|c| (c.x, c.y)).collect();
        assert!(coords.contains(&(0.0, 0.0)) && coords.contains(&(100.0, 100.0)));
    }

    #[test]
    fn neighbouring_cells_do_not_overlap() {
        let g = two_by_two();
        for i in 0..g.len() {
            for j in (i + 1)..g.len() {
                let shared = g.polygon(i).intersection(&g.polygon(j));
                assert_eq!(shared.unsigned_area(), 0.0);
            }
        }
    }

    #[test]
    fn interior_points_find_their_cell() {
        let g = two_by_two();
        assert_eq!(g.locate(point!(x: 4321010.0, y: 3210010.0)), Some(0));
        assert_eq!(g.locate(point!(x: 4321199.0, y: 3210199.0)), Some(3));
        assert_eq!(g.locate(point!(x: 4320999.0, y: 3210050.0)), None);
    }

    #[test]
    fn shared_edge_goes_to_exactly_one_cell() {
        let g = two_by_two();
        // the vertical edge between a and b, and the corner shared by all four
        assert_eq!(g.locate(point!(x: 4321100.0, y: 3210050.0)), Some(1));
        assert_eq!(g.locate(point!(x: 4321100.0, y: 3210100.0)), Some(3));
        // the outer top and right edges belong to nobody
        assert_eq!(g.locate(point!(x: 4321200.0, y: 3210150.0)), None);
        assert_eq!(g.locate(point!(x: 4321050.0, y: 3210200.0)), None);
    }

    #[test]
    fn assignment_is_a_left_join() {
        let g = two_by_two();
        let pts = vec![
            Some(point!(x: 4321010.0, y: 3210010.0)),
            None,
            Some(point!(x: 0.0, y: 0.0)),
            Some(point!(x: 4321020.0, y: 3210020.0)),
        ];
        let assigned = g.assign(&pts);
        assert_eq!(assigned, vec![Some(0), None, None, Some(0)]);
        let members = g.members(&assigned);
        assert_eq!(members[0], vec![0, 3]);
        assert!(members[1].is_empty() && members[3].is_empty());
    }

    #[test]
    fn duplicate_centres_keep_first() {
        let cells = vec![
            cell("first", 50.0, 50.0, 1.0),
            cell("second", 50.0, 50.0, 2.0),
            cell("other", 150.0, 50.0, 4.0),
            cell("third", 50.0, 50.0, 8.0),
        ];
        let g = GridIndex::build(cells, 100.0).unwrap();
        assert_eq!(g.len(), 2);
        assert_eq!(g.cells()[0].id, "first");
        assert_eq!(g.duplicate_population(), 10.0);
        let indexed: f64 = g.cells().iter().map(|c| c.population).sum();
        assert_eq!(indexed + g.duplicate_population(), 15.0);
    }

    #[test]
    fn unique_centres_drop_nothing() {
        assert_eq!(two_by_two().duplicate_population(), 0.0);
    }

    #[test]
    fn nonpositive_cell_size_is_rejected() {
        assert!(GridIndex::build(Vec::new(), 0.0).is_err());
        assert!(GridIndex::build(Vec::new(), f64::NAN).is_err());
    }
}
