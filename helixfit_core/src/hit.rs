//! Detector hits: measured 3D points with their uncertainty.

use helixfit_geom::{ElementId, Surface};
use nalgebra::{Matrix2, Matrix3, Vector3};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier of a hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HitId(pub Uuid);

impl HitId {
    /// Creates a new random HitId.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a deterministic HitId from a seed (for simulation).
    pub fn from_seed(seed: u64) -> Self {
        let mut bytes = [0u8; 16];
        bytes[0..8].copy_from_slice(&seed.to_le_bytes());
        bytes[8..16].copy_from_slice(&seed.wrapping_mul(0x9e3779b97f4a7c15).to_le_bytes());
        Self(Uuid::from_bytes(bytes))
    }
}

impl Default for HitId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for HitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// Measurement uncertainty of a hit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum HitUncertainty {
    /// Independent resolutions (mm) along the local u and v axes of the surface
    Local { sigma_u: f64, sigma_v: f64 },

    /// Full 3x3 global covariance (mm²), projected onto the surface on use
    Global(Matrix3<f64>),
}

/// A measured point on a sensitive surface.
///
/// Hits are shared between the caller and any number of sessions via `Arc`;
/// a session never mutates them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hit {
    pub id: HitId,

    /// Measured position (mm)
    pub position: Vector3<f64>,

    pub uncertainty: HitUncertainty,

    /// Element the hit was read out from
    pub element_id: ElementId,
}

impl Hit {
    /// Creates a hit with local (u, v) resolutions.
    pub fn new(
        id: HitId,
        position: Vector3<f64>,
        element_id: ElementId,
        sigma_u: f64,
        sigma_v: f64,
    ) -> Self {
        Self {
            id,
            position,
            uncertainty: HitUncertainty::Local { sigma_u, sigma_v },
            element_id,
        }
    }

    /// Creates a hit with a full global covariance.
    pub fn with_global_covariance(
        id: HitId,
        position: Vector3<f64>,
        element_id: ElementId,
        covariance: Matrix3<f64>,
    ) -> Self {
        Self {
            id,
            position,
            uncertainty: HitUncertainty::Global(covariance),
            element_id,
        }
    }

    /// Measurement covariance in the local frame of `surface` at the hit.
    pub fn local_covariance(&self, surface: &Surface) -> Matrix2<f64> {
        match self.uncertainty {
            HitUncertainty::Local { sigma_u, sigma_v } => {
                Matrix2::new(sigma_u * sigma_u, 0.0, 0.0, sigma_v * sigma_v)
            }
            HitUncertainty::Global(cov) => {
                let projection = surface.local_projection(&self.position);
                projection * cov * projection.transpose()
            }
        }
    }

    /// Transverse radius of the hit, used to order hits from the inside out.
    pub fn radius(&self) -> f64 {
        self.position.x.hypot(self.position.y)
    }
}
