//! Magnetic field providers.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// Source of the magnetic field component along the beam (z) axis.
///
/// Implementations must be immutable once fitting starts; they are shared
/// across all fit sessions without locking.
pub trait MagneticField: Send + Sync + std::fmt::Debug {
    /// Field along z in Tesla at `point` (mm).
    fn bz(&self, point: &Vector3<f64>) -> f64;
}

/// A solenoidal field that is constant everywhere.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UniformField {
    /// Field along z in Tesla
    pub bz: f64,
}

impl UniformField {
    /// Creates a uniform field of `bz` Tesla.
    pub fn new(bz: f64) -> Self {
        Self { bz }
    }
}

impl MagneticField for UniformField {
    fn bz(&self, _point: &Vector3<f64>) -> f64 {
        self.bz
    }
}
