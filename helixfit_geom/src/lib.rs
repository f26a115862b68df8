//! HelixFit Geometry Abstraction Layer
//!
//! This crate provides the read-only detector description that every fit
//! session consults:
//! - **Surfaces**: sensitive cylinders and planes with their material
//! - **Registry**: lookup by numbered layer and by readout element ID
//! - **Field**: the local magnetic field along the beam axis
//!
//! # Core Concept: An Explicit Context Handle
//!
//! Geometry and field are never global state. A fit session receives an
//! `Arc<dyn DetectorContext>` at construction, so the same engine runs
//! against a full detector description or a synthetic test geometry.
//!
//! # Example
//!
//! ```ignore
//! use helixfit_geom::{Detector, DetectorContext, LayerId, ElementId, Material, Surface, SurfaceRegistry, UniformField};
//!
//! let mut registry = SurfaceRegistry::new();
//! registry.insert(Surface::cylinder(LayerId(1), ElementId(1001), 50.0, 200.0, 0.0, Material::silicon(0.3))?);
//! let detector = Detector::new("toy", registry, UniformField::new(3.5)).shared();
//! assert_eq!(detector.bz_at(&nalgebra::Vector3::zeros()), 3.5);
//! ```

mod context;
mod error;
mod field;
mod registry;
mod surface;
mod types;

pub use context::{Detector, DetectorContext};
pub use error::GeometryError;
pub use field::{MagneticField, UniformField};
pub use registry::SurfaceRegistry;
pub use surface::{wrap_angle, Material, PlaneBounds, Shape, Surface, ON_SURFACE_TOLERANCE};
pub use types::{ElementId, LayerId};
