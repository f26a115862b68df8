//! Synthetic silicon tracker used by the simulation.
//!
//! The detector is a barrel of coaxial cylinders closed by planar endcap
//! disks, all in a uniform solenoid field:
//! - the innermost barrel layers are split at z = 0 into two half-cylinders
//!   read out under one element ID
//! - each endcap layer is a pair of annular disks at ±z

use helixfit_geom::{
    Detector, ElementId, LayerId, Material, PlaneBounds, Surface, SurfaceRegistry, UniformField,
};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::error::SimError;

/// Layer number offset of the +z endcap disks.
pub const ENDCAP_POSITIVE_BASE: i32 = 10;

/// Layer number offset of the -z endcap disks.
pub const ENDCAP_NEGATIVE_BASE: i32 = 20;

/// Layout of the synthetic detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Detector name used in logs
    pub name: String,

    /// Solenoid field along z (Tesla)
    pub bz: f64,

    /// Barrel layer radii, innermost first (mm)
    pub barrel_radii: Vec<f64>,

    /// Half-length of every barrel layer (mm)
    pub barrel_half_length: f64,

    /// Number of innermost barrel layers split into two half-cylinders
    pub split_layers: usize,

    /// Insensitive gap between the halves of a split layer (mm)
    pub split_gap: f64,

    /// |z| of the endcap disks (mm)
    pub endcap_z: Vec<f64>,

    /// Inner radius of the endcap disks (mm)
    pub endcap_r_min: f64,

    /// Outer radius of the endcap disks (mm)
    pub endcap_r_max: f64,

    /// Silicon thickness of every sensitive layer (mm)
    pub thickness: f64,

    /// Resolution along the first local axis (rφ on the barrel, mm)
    pub sigma_u: f64,

    /// Resolution along the second local axis (z on the barrel, mm)
    pub sigma_v: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            name: "synthetic-tracker".to_string(),
            bz: 3.5,
            barrel_radii: vec![30.0, 60.0, 100.0, 150.0, 200.0, 300.0],
            barrel_half_length: 500.0,
            split_layers: 2,
            split_gap: 1.0,
            endcap_z: vec![550.0, 650.0],
            endcap_r_min: 40.0,
            endcap_r_max: 320.0,
            thickness: 0.3,
            sigma_u: 0.01,  // 10 μm
            sigma_v: 0.02,  // 20 μm
        }
    }
}

impl DetectorConfig {
    /// Checks the layout for values that cannot describe a detector.
    pub fn validate(&self) -> Result<(), SimError> {
        if !self.bz.is_finite() {
            return Err(SimError::config(format!("field {}", self.bz)));
        }
        if self.barrel_radii.is_empty() {
            return Err(SimError::config("detector has no barrel layers"));
        }
        if self.barrel_radii.windows(2).any(|w| w[1] <= w[0]) {
            return Err(SimError::config("barrel radii must be strictly increasing"));
        }
        if self.split_layers > self.barrel_radii.len() {
            return Err(SimError::config(format!(
                "{} split layers but only {} barrel layers",
                self.split_layers,
                self.barrel_radii.len()
            )));
        }
        if !(self.split_gap >= 0.0 && self.split_gap < self.barrel_half_length) {
            return Err(SimError::config(format!("split gap {}", self.split_gap)));
        }
        if self.endcap_z.iter().any(|&z| z <= 0.0) {
            return Err(SimError::config("endcap disks must sit at positive |z|"));
        }
        if !(self.sigma_u > 0.0 && self.sigma_v > 0.0) {
            return Err(SimError::config("resolutions must be positive"));
        }
        Ok(())
    }

    /// Layer IDs of the barrel, innermost first.
    pub fn barrel_layers(&self) -> Vec<LayerId> {
        (1..=self.barrel_radii.len() as i32).map(LayerId).collect()
    }

    /// Layer IDs of the endcap disks, +z side first.
    pub fn endcap_layers(&self) -> Vec<LayerId> {
        let n = self.endcap_z.len() as i32;
        (1..=n)
            .map(|k| LayerId(ENDCAP_POSITIVE_BASE + k))
            .chain((1..=n).map(|k| LayerId(ENDCAP_NEGATIVE_BASE + k)))
            .collect()
    }

    /// Builds the registry of sensitive surfaces.
    pub fn build_registry(&self) -> Result<SurfaceRegistry, SimError> {
        self.validate()?;
        let material = Material::silicon(self.thickness);
        let mut registry = SurfaceRegistry::new();

        for (i, (&radius, layer)) in self.barrel_radii.iter().zip(self.barrel_layers()).enumerate() {
            let element = ElementId::encode(layer, 0);
            if i < self.split_layers {
                let half = (self.barrel_half_length - self.split_gap / 2.0) / 2.0;
                let centre = self.split_gap / 2.0 + half;
                for z_center in [-centre, centre] {
                    registry.insert(Surface::cylinder(layer, element, radius, half, z_center, material)?);
                }
            } else {
                registry.insert(Surface::cylinder(
                    layer,
                    element,
                    radius,
                    self.barrel_half_length,
                    0.0,
                    material,
                )?);
            }
        }

        let bounds = PlaneBounds::Annulus {
            r_min: self.endcap_r_min,
            r_max: self.endcap_r_max,
        };
        let n = self.endcap_z.len();
        for (layer, z) in self.endcap_layers().into_iter().zip(
            self.endcap_z.iter().copied().chain(self.endcap_z.iter().map(|z| -z)),
        ) {
            registry.insert(Surface::plane(
                layer,
                ElementId::encode(layer, 0),
                Vector3::new(0.0, 0.0, z),
                Vector3::z(),
                Vector3::x(),
                bounds,
                material,
            )?);
        }

        debug!(
            barrel = self.barrel_radii.len(),
            split = self.split_layers,
            endcap = 2 * n,
            surfaces = registry.len(),
            "Synthetic detector built"
        );
        Ok(registry)
    }

    /// Builds the shared detector context.
    pub fn build(&self) -> Result<Arc<Detector>, SimError> {
        let registry = self.build_registry()?;
        Ok(Detector::new(self.name.clone(), registry, UniformField::new(self.bz)).shared())
    }
}
