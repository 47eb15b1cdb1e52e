//! Volume-weighted redistribution of cell population onto buildings.
//!
//! Building metrics come from the footprint (area) and the measured height:
//! `volume = area * height` is the allocation weight, storeys only feed the
//! floor area.

use log::{debug, info};

use crate::error::{Error, Result};
use crate::records::{AllocationStatus, BuildingRecord, GridCell};

/// Keep buildings whose function code is one of `codes`, in input order.
pub fn filter_residential(records: Vec<BuildingRecord>, codes: &[String]) -> Vec<BuildingRecord> {
    let before = records.len();
    let kept: Vec<_> = records
        .into_iter()
        .filter(|r| r.function().is_some_and(|f| codes.iter().any(|c| c == f)))
        .collect();
    debug!("residential filter kept {} of {before} buildings", kept.len());
    kept
}

/// Mean of `height / storeys` over buildings that carry both, with at least
/// one storey.
pub fn mean_storey_height(records: &[BuildingRecord]) -> Option<f64> {
    let (sum, n) = records
        .iter()
        .filter_map(|r| match (r.attrs.measured_height, r.attrs.storeys_above_ground) {
            (Some(h), Some(s)) if s > 0 && h.is_finite() => Some(h / f64::from(s)),
            _ => None,
        })
        .fold((0.0, 0usize), |(sum, n), v| (sum + v, n + 1));
    (n > 0).then(|| sum / n as f64)
}

/// Recorded storeys, else `height / mean_storey_height` rounded half to even.
pub fn estimate_storeys(
    height: Option<f64>,
    storeys: Option<u32>,
    mean_storey_height: Option<f64>,
) -> Option<u32> {
    match (storeys, height, mean_storey_height) {
        (Some(s), _, _) => Some(s),
        (None, Some(h), Some(m)) if h.is_finite() && m > 0.0 => {
            Some((h / m).round_ties_even().max(0.0) as u32)
        }
        _ => None,
    }
}

/// Fill `estimated_storeys`, `area`, `floor_area` and `volume`.
///
/// Area is the planar footprint area in the footprint's CRS, so footprints
/// must be in a metric CRS. Fails when some building needs storey
/// imputation but no building provides a reference storey height.
pub fn derive_metrics(records: &mut [BuildingRecord]) -> Result<()> {
    let reference = mean_storey_height(records);
    let needs_reference = records
        .iter()
        .any(|r| r.attrs.storeys_above_ground.is_none() && r.attrs.measured_height.is_some());
    if needs_reference && reference.is_none() {
        return Err(Error::Config(
            "storeys must be imputed but no building has both height and storeys".into(),
        ));
    }
    if let Some(m) = reference {
        debug!("mean storey height {m:.3} m");
    }

    for r in records.iter_mut() {
        let height = r.attrs.measured_height;
        r.estimated_storeys = estimate_storeys(height, r.attrs.storeys_above_ground, reference);
        r.area = r.footprint.area();
        r.floor_area = match (r.area, r.estimated_storeys) {
            (Some(a), Some(s)) => Some(a * f64::from(s)),
            _ => None,
        };
        r.volume = match (r.area, height) {
            (Some(a), Some(h)) if h.is_finite() => Some(a * h),
            _ => None,
        };
    }
    Ok(())
}

/// `volume / total` of `population`, computed as `volume * population / total`
/// so that integral shares stay exact.
pub fn volume_share(volume: f64, total: f64, population: f64, group: &str) -> Result<f64> {
    if total == 0.0 {
        return Err(Error::AllocationUndefined { group: group.to_string() });
    }
    Ok(volume * population / total)
}

/// Totals of one allocation run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AllocationSummary {
    pub allocated: usize,
    pub missing_volume: usize,
    pub zero_volume: usize,
    pub no_cell: usize,
    /// Population of cells that received at least one building.
    pub population_covered: f64,
    /// Population of cells without any allocatable building.
    pub population_unclaimed: f64,
    /// Population of grid cells dropped for a repeated centre.
    pub population_discarded: f64,
    pub population_allocated: f64,
}

/// Per-cell sums of building volume. Buildings without a positive volume
/// or without a cell add nothing.
pub fn cell_volumes(
    records: &[BuildingRecord],
    assignment: &[Option<usize>],
    cell_count: usize,
) -> Vec<f64> {
    let mut sums = vec![0.0; cell_count];
    for (r, cell) in records.iter().zip(assignment) {
        if let (Some(v), Some(c)) = (r.volume, cell) {
            if v > 0.0 {
                sums[*c] += v;
            }
        }
    }
    sums
}

/// Distribute each cell's population over its assigned buildings by volume.
///
/// `assignment[i]` is the index into `cells` of building `i`. Buildings
/// with zero volume, and buildings whose cell has zero total volume, are
/// flagged and keep no population.
pub fn allocate(
    records: &mut [BuildingRecord],
    assignment: &[Option<usize>],
    cells: &[GridCell],
) -> AllocationSummary {
    let sums = cell_volumes(records, assignment, cells.len());
    let mut claimed = vec![false; cells.len()];
    let mut summary = AllocationSummary::default();

    for (r, cell) in records.iter_mut().zip(assignment) {
        r.cell_id = cell.map(|c| cells[c].id.clone());
        let (volume, c) = match (r.volume, cell) {
            (None, _) => {
                r.allocation_status = AllocationStatus::MissingVolume;
                summary.missing_volume += 1;
                continue;
            }
            (Some(_), None) => {
                r.allocation_status = AllocationStatus::NoCell;
                summary.no_cell += 1;
                continue;
            }
            (Some(v), Some(c)) => (v, *c),
        };
        // zero-volume buildings take no share; a cell holding only such
        // buildings has a zero total, where the share is undefined anyway
        let share = if volume > 0.0 {
            volume_share(volume, sums[c], cells[c].population, &cells[c].id).ok()
        } else {
            None
        };
        match share {
            Some(p) => {
                r.estimated_population = Some(p);
                r.allocation_status = AllocationStatus::Allocated;
                claimed[c] = true;
                summary.allocated += 1;
                summary.population_allocated += p;
            }
            None => {
                r.allocation_status = AllocationStatus::ZeroVolume;
                summary.zero_volume += 1;
            }
        }
    }

    for (cell, claimed) in cells.iter().zip(&claimed) {
        if *claimed {
            summary.population_covered += cell.population;
        } else {
            summary.population_unclaimed += cell.population;
        }
    }
    info!(
        "allocated {:.1} of {:.1} residents to {} buildings \
         ({} without volume, {} with zero volume, {} outside the grid)",
        summary.population_allocated,
        summary.population_covered + summary.population_unclaimed,
        summary.allocated,
        summary.missing_volume,
        summary.zero_volume,
        summary.no_cell,
    );
    summary
}
