//! Count and percentage tables over a fixed category universe.
//!
//! Every group row carries every category column. A category that never
//! occurs in a group reads as zero; a group whose total is zero has no
//! percentages at all.

use std::collections::HashMap;

use serde::Serialize;

use crate::error::{Error, Result};
use crate::records::{AllocationStatus, BuildingRecord};

/// Weighted counts per (group, category).
#[derive(Debug, Clone, PartialEq)]
pub struct CategoryTable {
    groups: Vec<String>,
    categories: Vec<String>,
    counts: Vec<Vec<f64>>,
    group_index: HashMap<String, usize>,
    category_index: HashMap<String, usize>,
    // false once the group universe is fixed up front
    open_groups: bool,
}

impl CategoryTable {
    /// Table whose groups appear in first-seen order.
    pub fn new(categories: Vec<String>) -> Self {
        let category_index = categories.iter().enumerate().map(|(i, c)| (c.clone(), i)).collect();
        Self {
            groups: Vec::new(),
            categories,
            counts: Vec::new(),
            group_index: HashMap::new(),
            category_index,
            open_groups: true,
        }
    }

    /// Table with a fixed group universe; every group is present even if
    /// nothing is ever counted for it.
    pub fn with_groups(groups: Vec<String>, categories: Vec<String>) -> Self {
        let mut table = Self::new(categories);
        for g in groups {
            table.ensure_group(&g);
        }
        table.open_groups = false;
        table
    }

    fn ensure_group(&mut self, group: &str) -> Option<usize> {
        if let Some(&i) = self.group_index.get(group) {
            return Some(i);
        }
        if !self.open_groups {
            return None;
        }
        let i = self.groups.len();
        self.groups.push(group.to_string());
        self.counts.push(vec![0.0; self.categories.len()]);
        self.group_index.insert(group.to_string(), i);
        Some(i)
    }

    /// Add `weight` to a cell. Unknown categories, and unknown groups of a
    /// fixed-group table, are configuration errors.
    pub fn add(&mut self, group: &str, category: &str, weight: f64) -> Result<()> {
        let c = *self
            .category_index
            .get(category)
            .ok_or_else(|| {
                Error::Config(format!("category `{category}` is not in the table universe"))
            })?;
        let g = self
            .ensure_group(group)
            .ok_or_else(|| Error::Config(format!("group `{group}` is not in the table universe")))?;
        self.counts[g][c] += weight;
        Ok(())
    }

    pub fn count(&mut self, group: &str, category: &str) -> Result<()> {
        self.add(group, category, 1.0)
    }

    /// Count items by a (group, category) key; `None` keys are skipped.
    pub fn tally<T>(
        &mut self,
        items: &[T],
        key: impl Fn(&T) -> Option<(String, String)>,
    ) -> Result<()> {
        for item in items {
            if let Some((g, c)) = key(item) {
                self.count(&g, &c)?;
            }
        }
        Ok(())
    }

    pub fn groups(&self) -> &[String] {
        &self.groups
    }

    pub fn categories(&self) -> &[String] {
        &self.categories
    }

    pub fn row(&self, group: &str) -> Option<&[f64]> {
        self.group_index.get(group).map(|&i| self.counts[i].as_slice())
    }

    pub fn rows(&self) -> impl Iterator<Item = (&str, &[f64])> {
        self.groups.iter().map(String::as_str).zip(self.counts.iter().map(Vec::as_slice))
    }

    /// Zero for absent groups and categories.
    pub fn get(&self, group: &str, category: &str) -> f64 {
        match (self.group_index.get(group), self.category_index.get(category)) {
            (Some(&g), Some(&c)) => self.counts[g][c],
            _ => 0.0,
        }
    }

    pub fn total(&self, group: &str) -> f64 {
        self.row(group).map_or(0.0, |r| r.iter().sum())
    }

    /// Row percentages, or None for a zero-total row.
    pub fn percentages(&self, group: &str) -> Option<Vec<f64>> {
        row_percentages(self.row(group)?)
    }

    /// Order groups by name.
    pub fn sort_groups(&mut self) {
        let mut order: Vec<usize> = (0..self.groups.len()).collect();
        order.sort_by(|&a, &b| self.groups[a].cmp(&self.groups[b]));
        self.groups = order.iter().map(|&i| self.groups[i].clone()).collect();
        self.counts = order.iter().map(|&i| self.counts[i].clone()).collect();
        self.group_index = self.groups.iter().enumerate().map(|(i, g)| (g.clone(), i)).collect();
    }

    /// Fraction of a group's total that falls into `subset`.
    pub fn share(&self, group: &str, subset: &[&str]) -> Option<f64> {
        let total = self.total(group);
        if total == 0.0 {
            return None;
        }
        let part: f64 = subset.iter().map(|c| self.get(group, c)).sum();
        Some(part / total)
    }

    /// Groups with the largest `share(subset)`, descending, ties by name.
    /// Zero-total groups are never ranked.
    pub fn rank_by_share(&self, subset: &[&str], top_n: usize) -> Vec<RankedGroup> {
        let mut ranked: Vec<RankedGroup> = self
            .groups
            .iter()
            .filter_map(|g| {
                self.share(g, subset).map(|share| RankedGroup {
                    group: g.clone(),
                    share,
                    total: self.total(g),
                })
            })
            .collect();
        ranked.sort_by(|a, b| b.share.total_cmp(&a.share).then_with(|| a.group.cmp(&b.group)));
        ranked.truncate(top_n);
        ranked
    }
}

/// Percentages of a row, or None when the row sums to zero.
pub fn row_percentages(row: &[f64]) -> Option<Vec<f64>> {
    let total: f64 = row.iter().sum();
    (total != 0.0).then(|| row.iter().map(|v| v * 100.0 / total).collect())
}

/// One entry of a share ranking.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedGroup {
    pub group: String,
    pub share: f64,
    pub total: f64,
}

/// Allocation outcome of one residential-code selection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AllocationOverview {
    pub label: String,
    pub buildings: usize,
    pub populated_buildings: usize,
    pub total_population: f64,
    pub mean_population: Option<f64>,
}

impl AllocationOverview {
    pub fn from_records(label: impl Into<String>, records: &[BuildingRecord]) -> Self {
        let populations = records
            .iter()
            .filter(|r| r.allocation_status == AllocationStatus::Allocated)
            .filter_map(|r| r.estimated_population);
        Self::from_populations(label, records.len(), populations)
    }

    /// From the allocated populations alone, e.g. read back from an
    /// enriched table.
    pub fn from_populations(
        label: impl Into<String>,
        buildings: usize,
        populations: impl IntoIterator<Item = f64>,
    ) -> Self {
        let (total, n) = populations.into_iter().fold((0.0, 0usize), |(t, n), p| (t + p, n + 1));
        Self {
            label: label.into(),
            buildings,
            populated_buildings: n,
            total_population: total,
            mean_population: (n > 0).then(|| total / n as f64),
        }
    }
}

/// Difference of two overviews, `other` relative to `base`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverviewComparison {
    pub base: AllocationOverview,
    pub other: AllocationOverview,
    pub populated_diff: i64,
    pub populated_change_pct: Option<f64>,
    pub mean_diff: Option<f64>,
    pub mean_change_pct: Option<f64>,
}

fn change_pct(base: f64, other: f64) -> Option<f64> {
    (base != 0.0).then(|| (other - base) / base * 100.0)
}

pub fn compare_overviews(
    base: AllocationOverview,
    other: AllocationOverview,
) -> OverviewComparison {
    let populated_diff = other.populated_buildings as i64 - base.populated_buildings as i64;
    let populated_change_pct =
        change_pct(base.populated_buildings as f64, other.populated_buildings as f64);
    let (mean_diff, mean_change_pct) = match (base.mean_population, other.mean_population) {
        (Some(b), Some(o)) => (Some(o - b), change_pct(b, o)),
        _ => (None, None),
    };
    OverviewComparison {
        base,
        other,
        populated_diff,
        populated_change_pct,
        mean_diff,
        mean_change_pct,
    }
}
