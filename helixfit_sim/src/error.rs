//! Error types for the simulation harness.

use helixfit_core::FitError;
use helixfit_geom::GeometryError;
use thiserror::Error;

/// Errors raised while building detectors, loading configuration or
/// writing results.
#[derive(Debug, Error)]
pub enum SimError {
    /// A track fit failed
    #[error("Fit error: {0}")]
    Fit(#[from] FitError),

    /// The synthetic detector could not be built
    #[error("Geometry error: {0}")]
    Geometry(#[from] GeometryError),

    /// Configuration values are inconsistent
    #[error("Config error: {0}")]
    Config(String),

    /// Reading or writing a file failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SimError {
    /// Creates a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
