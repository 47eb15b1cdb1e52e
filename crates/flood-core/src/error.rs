use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the exposure pipeline.
///
/// Structural problems (missing columns, wrong geometry kinds, unreadable
/// sources) abort a run. `OutOfRange` is recoverable: callers drop the
/// record instead of propagating it.
#[derive(Debug, Error)]
pub enum Error {
    /// A required column or property is missing from a source.
    #[error("schema error in {source_name}: missing field `{field}`")]
    Schema { source_name: String, field: String },

    /// A geometry is neither a point/polygon nor a homogeneous multi-part of one.
    #[error("unexpected geometry type `{found}` (expected point, polygon, or a multi-part of one)")]
    GeometryType { found: String },

    /// Classification input outside the configured bin edges.
    #[error("value {value} outside classification range [{min}, {max}]")]
    OutOfRange { value: f64, min: f64, max: f64 },

    /// A weighted share was requested over a zero total.
    #[error("allocation undefined for {group}: total weight is zero")]
    AllocationUndefined { group: String },

    #[error("cannot access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("vector source {}: {message}", path.display())]
    Vector { path: PathBuf, message: String },

    #[error("raster {}: {message}", path.display())]
    Raster { path: PathBuf, message: String },

    #[error("projection EPSG:{from} -> EPSG:{to} failed: {message}")]
    Projection { from: u32, to: u32, message: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }

    pub fn schema(source_name: impl Into<String>, field: impl Into<String>) -> Self {
        Self::Schema { source_name: source_name.into(), field: field.into() }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
