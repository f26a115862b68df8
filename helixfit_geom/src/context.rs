//! Detector context trait shared by all fit sessions.

use nalgebra::Vector3;
use std::sync::Arc;

use crate::field::MagneticField;
use crate::registry::SurfaceRegistry;

/// The central interface to the detector description.
///
/// Fit sessions hold an `Arc<dyn DetectorContext>` instead of reaching for
/// process-wide geometry, so a session can be built against a synthetic
/// geometry in tests exactly as against the full detector.
///
/// # Implementations
///
/// - **Production / simulation**: [`Detector`] - a registry plus a field map
/// - **Tests**: any small struct holding a hand-built registry
pub trait DetectorContext: Send + Sync + 'static {
    /// Returns the registry of sensitive surfaces.
    fn surface_registry(&self) -> &SurfaceRegistry;

    /// Returns the field along z in Tesla at `point` (mm).
    fn bz_at(&self, point: &Vector3<f64>) -> f64;

    /// Returns a human-readable name for logging.
    fn name(&self) -> &str {
        "detector"
    }
}

/// A detector description: named registry of surfaces plus a field map.
#[derive(Debug)]
pub struct Detector {
    name: String,
    registry: SurfaceRegistry,
    field: Box<dyn MagneticField>,
}

impl Detector {
    /// Creates a detector from a registry and a field provider.
    pub fn new(
        name: impl Into<String>,
        registry: SurfaceRegistry,
        field: impl MagneticField + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            registry,
            field: Box::new(field),
        }
    }

    /// Wraps the detector for sharing between sessions.
    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }
}

impl DetectorContext for Detector {
    fn surface_registry(&self) -> &SurfaceRegistry {
        &self.registry
    }

    fn bz_at(&self, point: &Vector3<f64>) -> f64 {
        self.field.bz(point)
    }

    fn name(&self) -> &str {
        &self.name
    }
}
