//! Binning of continuous values into ordinal classes.
//!
//! Bin schemes are configuration. Two edge sets circulate for the same five
//! flood-risk classes and they do not convert into each other, so each is a
//! separately named preset.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Which side of each interval is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Closed {
    /// `[e_i, e_i+1)`; the last interval also includes the top edge.
    #[default]
    Left,
    /// `(e_i, e_i+1]`; the first interval also includes the bottom edge.
    Right,
}

/// N ascending bins over N+1 edges, each labelled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinScheme<L> {
    edges: Vec<f64>,
    labels: Vec<L>,
    #[serde(default)]
    closed: Closed,
}

impl<L> BinScheme<L> {
    pub fn new(edges: Vec<f64>, labels: Vec<L>, closed: Closed) -> Result<Self> {
        if labels.is_empty() || edges.len() != labels.len() + 1 {
            return Err(Error::Config(format!(
                "{} edges cannot delimit {} labels",
                edges.len(),
                labels.len()
            )));
        }
        if edges.iter().any(|e| e.is_nan()) || edges.windows(2).any(|w| w[0] >= w[1]) {
            return Err(Error::Config(format!("bin edges must be strictly ascending: {edges:?}")));
        }
        Ok(Self { edges, labels, closed })
    }

    pub fn edges(&self) -> &[f64] {
        &self.edges
    }

    pub fn labels(&self) -> &[L] {
        &self.labels
    }

    pub fn closed(&self) -> Closed {
        self.closed
    }

    /// Index of the bin containing `value`.
    pub fn bin_index(&self, value: f64) -> Result<usize> {
        let n = self.labels.len();
        let (min, max) = (self.edges[0], self.edges[n]);
        if value.is_nan() || value < min || value > max {
            return Err(Error::OutOfRange { value, min, max });
        }
        let inner = &self.edges[1..n];
        let idx = match self.closed {
            // number of interior edges <= value
            Closed::Left => inner.partition_point(|&e| e <= value),
            // number of interior edges < value
            Closed::Right => inner.partition_point(|&e| e < value),
        };
        Ok(idx)
    }

    pub fn classify(&self, value: f64) -> Result<&L> {
        self.bin_index(value).map(|i| &self.labels[i])
    }
}

/// Ordinal flood-risk band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RiskClass {
    VeryLow,
    Low,
    Medium,
    High,
    VeryHigh,
}

impl RiskClass {
    pub const ALL: [RiskClass; 5] = [
        RiskClass::VeryLow,
        RiskClass::Low,
        RiskClass::Medium,
        RiskClass::High,
        RiskClass::VeryHigh,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RiskClass::VeryLow => "very-low",
            RiskClass::Low => "low",
            RiskClass::Medium => "medium",
            RiskClass::High => "high",
            RiskClass::VeryHigh => "very-high",
        }
    }

    /// Column names for the full class universe.
    pub fn names() -> Vec<String> {
        Self::ALL.iter().map(|c| c.as_str().to_string()).collect()
    }
}

impl fmt::Display for RiskClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskClass {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| Error::Config(format!("unknown risk class `{s}`")))
    }
}

/// Named risk edge sets for the weights-of-evidence susceptibility raster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RiskPreset {
    /// `[-18.459, -10.999, -6.982, -2.62, 2.546, 10.81]`
    #[default]
    WoePrecise,
    /// `[-18.459, -11, -7, -2.6, 2.5, 10.81]`
    WoeRounded,
}

impl RiskPreset {
    pub fn edges(self) -> Vec<f64> {
        match self {
            RiskPreset::WoePrecise => vec![-18.459, -10.999, -6.982, -2.62, 2.546, 10.81],
            RiskPreset::WoeRounded => vec![-18.459, -11.0, -7.0, -2.6, 2.5, 10.81],
        }
    }
}

/// Risk bins: either a named preset or explicit edges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RiskBins {
    Preset(RiskPreset),
    Edges(Vec<f64>),
}

impl Default for RiskBins {
    fn default() -> Self {
        RiskBins::Preset(RiskPreset::default())
    }
}

impl RiskBins {
    pub fn scheme(&self) -> Result<BinScheme<RiskClass>> {
        let edges = match self {
            RiskBins::Preset(p) => p.edges(),
            RiskBins::Edges(e) => e.clone(),
        };
        BinScheme::new(edges, RiskClass::ALL.to_vec(), Closed::Left)
    }
}

/// Household-size bands over allocated residents per building. The last
/// band is open-ended when there is one label per edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HouseholdBins {
    pub edges: Vec<f64>,
    pub labels: Vec<String>,
}

impl Default for HouseholdBins {
    fn default() -> Self {
        Self {
            edges: vec![0.0, 2.0, 5.0, 10.0, 20.0, 50.0, 100.0],
            labels: ["1-2", "3-5", "6-10", "11-20", "21-50", "51-100", "100+"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl HouseholdBins {
    /// Right-closed scheme: "1-2" is `[0, 2]`, "3-5" is `(2, 5]`.
    pub fn scheme(&self) -> Result<BinScheme<String>> {
        let mut edges = self.edges.clone();
        if edges.len() == self.labels.len() {
            edges.push(f64::INFINITY);
        }
        BinScheme::new(edges, self.labels.clone(), Closed::Right)
    }
}
