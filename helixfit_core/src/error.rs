//! Status vocabulary and error types for fit sessions.
//!
//! Every fallible session operation returns `Result<_, FitError>`. Callers
//! that need the coarse four-way outcome ask the error for its [`Status`].

use helixfit_geom::{ElementId, GeometryError, LayerId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::hit::HitId;
use crate::types::CrossingMode;

/// Coarse outcome of a session operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    /// The operation completed
    Success,
    /// The operation failed (numerical failure, wrong session state, too few hits)
    Error,
    /// The arguments were invalid (unknown hit, layer or element, bad seed)
    BadInputs,
    /// The trajectory never reaches the requested layer
    NoIntersection,
}

impl Status {
    /// Numeric status code.
    pub fn code(self) -> i32 {
        match self {
            Status::Success => 0,
            Status::Error => 1,
            Status::BadInputs => 3,
            Status::NoIntersection => 4,
        }
    }

    /// Status of an operation result.
    pub fn of<T>(result: &Result<T, FitError>) -> Self {
        match result {
            Ok(_) => Status::Success,
            Err(e) => e.status(),
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Status::Success => "success",
            Status::Error => "error",
            Status::BadInputs => "bad_inputs",
            Status::NoIntersection => "no_intersection",
        };
        write!(f, "{}", name)
    }
}

/// Errors returned by fit sessions and estimators.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FitError {
    /// A fitted track is required but the session has none
    #[error("Session has no fitted track")]
    NotFitted,

    /// The session has not been initialised with a seed
    #[error("Session has not been initialised")]
    NotInitialised,

    /// Fewer hits than the operation needs
    #[error("Too few hits: found {found}, need {required}")]
    TooFewHits { found: usize, required: usize },

    /// The seed hits do not define a trajectory (coincident points)
    #[error("Seed hits are degenerate")]
    DegenerateHits,

    /// The estimator failed numerically or did not converge
    #[error("Fit diverged: {0}")]
    FitDiverged(String),

    /// The trajectory never crosses the surface of a hit
    #[error("Trajectory does not reach surface {0}")]
    SurfaceUnreachable(ElementId),

    /// An updated covariance is no longer positive semidefinite
    #[error("Covariance is not positive semidefinite")]
    CovarianceNotPositive,

    /// The hit is already part of the session
    #[error("Duplicate hit: {0}")]
    DuplicateHit(HitId),

    /// The hit is not part of the fitted track
    #[error("Unknown hit: {0}")]
    UnknownHit(HitId),

    /// No layer with this ID exists
    #[error("Unknown layer: {0}")]
    UnknownLayer(LayerId),

    /// No surface is registered for this element ID
    #[error("Unknown element: {0}")]
    UnknownElement(ElementId),

    /// An externally supplied seed is malformed
    #[error("Invalid seed: {0}")]
    InvalidSeed(String),

    /// The hit cannot be placed on a surface of its element
    #[error("Geometry error: {0}")]
    Geometry(GeometryError),

    /// The trajectory has no crossing with the layer in the requested mode
    #[error("No intersection with {layer} ({mode})")]
    NoIntersection { layer: LayerId, mode: CrossingMode },
}

impl FitError {
    /// Maps the error onto the status vocabulary.
    pub fn status(&self) -> Status {
        match self {
            FitError::NotFitted
            | FitError::NotInitialised
            | FitError::TooFewHits { .. }
            | FitError::DegenerateHits
            | FitError::FitDiverged(_)
            | FitError::SurfaceUnreachable(_)
            | FitError::CovarianceNotPositive => Status::Error,
            FitError::DuplicateHit(_)
            | FitError::UnknownHit(_)
            | FitError::UnknownLayer(_)
            | FitError::UnknownElement(_)
            | FitError::InvalidSeed(_)
            | FitError::Geometry(_) => Status::BadInputs,
            FitError::NoIntersection { .. } => Status::NoIntersection,
        }
    }

    /// Creates a divergence error.
    pub fn diverged(msg: impl Into<String>) -> Self {
        FitError::FitDiverged(msg.into())
    }

    /// Creates an invalid-seed error.
    pub fn invalid_seed(msg: impl Into<String>) -> Self {
        FitError::InvalidSeed(msg.into())
    }
}

impl From<GeometryError> for FitError {
    fn from(e: GeometryError) -> Self {
        match e {
            GeometryError::UnknownLayer(layer) => FitError::UnknownLayer(layer),
            GeometryError::UnknownElement(element) => FitError::UnknownElement(element),
            other => FitError::Geometry(other),
        }
    }
}
