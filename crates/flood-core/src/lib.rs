//! Flood-risk and population attribution for building footprints.
//!
//! Footprints are exploded to single parts, measured, joined to 100 m census
//! cells by centroid and given a volume-weighted share of each cell's
//! residents. Their centroids are sampled against a risk raster and binned
//! into ordinal classes, and the attributed table feeds the count and
//! percentage tables in [`aggregate`].

pub mod aggregate;
pub mod allocation;
pub mod census;
pub mod classify;
pub mod config;
pub mod crs;
pub mod error;
pub mod geometry;
pub mod grid;
pub mod municipality;
pub mod output;
pub mod pipeline;
pub mod raster;
pub mod records;
pub mod vector;

pub use error::{Error, Result};
