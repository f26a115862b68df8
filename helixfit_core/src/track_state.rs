//! Track states: helix parameters with covariance at a reference point.

use helixfit_geom::ElementId;
use nalgebra::{Vector3, Vector5};
use serde::{Deserialize, Serialize};

use crate::helix::{Helix, TrackCovariance, TrackParams};
use crate::hit::HitId;

/// Where along the trajectory a state was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StateLocation {
    /// Seed used to start a fit
    Seed,
    /// Closest approach to the interaction point
    AtIp,
    /// At the first hit in radius
    AtFirstHit,
    /// At the last hit in radius
    AtLastHit,
    /// After filtering a hit
    AtHit(HitId),
    /// At a crossing with a surface
    AtSurface(ElementId),
    /// Closest approach to an arbitrary point
    AtPoint,
    /// Any other location
    Other,
}

/// Helix parameters, their covariance and the reference point they refer to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackState {
    pub params: TrackParams,

    /// Symmetric positive semidefinite 5x5 covariance
    pub covariance: TrackCovariance,

    /// Reference point (mm)
    pub reference_point: Vector3<f64>,

    pub location: StateLocation,
}

impl TrackState {
    pub fn new(
        params: TrackParams,
        covariance: TrackCovariance,
        reference_point: Vector3<f64>,
    ) -> Self {
        Self {
            params,
            covariance,
            reference_point,
            location: StateLocation::Other,
        }
    }

    /// Replaces the location tag.
    pub fn with_location(mut self, location: StateLocation) -> Self {
        self.location = location;
        self
    }

    /// The helix described by this state.
    pub fn helix(&self) -> Helix {
        Helix::new(self.params, self.reference_point)
    }

    pub fn d0(&self) -> f64 {
        self.helix().d0()
    }

    pub fn phi(&self) -> f64 {
        self.helix().phi()
    }

    pub fn omega(&self) -> f64 {
        self.helix().omega()
    }

    pub fn z0(&self) -> f64 {
        self.helix().z0()
    }

    pub fn tan_lambda(&self) -> f64 {
        self.helix().tan_lambda()
    }

    /// Point of closest approach to the reference point.
    pub fn position(&self) -> Vector3<f64> {
        self.helix().pca()
    }

    /// Momentum vector (GeV) at the point of closest approach in a field of `bz` Tesla.
    pub fn momentum(&self, bz: f64) -> Option<Vector3<f64>> {
        let helix = self.helix();
        let pt = helix.transverse_momentum(bz)?;
        let (sin, cos) = helix.phi().sin_cos();
        Some(Vector3::new(pt * cos, pt * sin, pt * helix.tan_lambda()))
    }

    /// One-sigma parameter uncertainties.
    pub fn errors(&self) -> Vector5<f64> {
        self.covariance.diagonal().map(|v| v.max(0.0).sqrt())
    }

    /// Whether every parameter, covariance entry and reference coordinate is finite.
    pub fn is_finite(&self) -> bool {
        self.params.iter().all(|v| v.is_finite())
            && self.covariance.iter().all(|v| v.is_finite())
            && self.reference_point.iter().all(|v| v.is_finite())
    }
}

/// Relative tolerance on negative eigenvalues when checking a covariance.
const PSD_TOLERANCE: f64 = 1e-9;

/// Whether a covariance is symmetric positive semidefinite within rounding.
pub fn is_positive_semidefinite(covariance: &TrackCovariance) -> bool {
    if !covariance.iter().all(|v| v.is_finite()) {
        return false;
    }
    let asymmetry = (covariance - covariance.transpose()).abs().max();
    let scale = covariance.abs().max().max(f64::MIN_POSITIVE);
    if asymmetry > PSD_TOLERANCE * scale {
        return false;
    }

    let eigenvalues = covariance.symmetric_eigenvalues();
    eigenvalues.min() >= -PSD_TOLERANCE * scale
}

/// Replaces a covariance by its symmetric part.
pub fn symmetrize(covariance: &TrackCovariance) -> TrackCovariance {
    (covariance + covariance.transpose()) * 0.5
}
