//! Sensitive detector surfaces.
//!
//! Two shapes cover the detectors HelixFit is used with:
//! - **Cylinder**: a barrel layer coaxial with the z (beam) axis
//! - **Plane**: a ladder, wafer or endcap disk with rectangular or annular bounds
//!
//! Every surface exposes an implicit function that is zero on the surface,
//! its gradient, and a 2D local frame (u, v) used for measurements.

use nalgebra::{Matrix2x3, Vector2, Vector3};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use crate::error::GeometryError;
use crate::types::{ElementId, LayerId};

/// Distance (mm) within which a point counts as lying on a surface.
pub const ON_SURFACE_TOLERANCE: f64 = 1e-3;

/// Wraps an angle into the half-open interval (-π, π].
pub fn wrap_angle(angle: f64) -> f64 {
    let mut a = angle % (2.0 * PI);
    if a <= -PI {
        a += 2.0 * PI;
    } else if a > PI {
        a -= 2.0 * PI;
    }
    a
}

/// Material budget of a surface, used for multiple scattering and energy loss.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Material {
    /// Thickness along the surface normal (mm)
    pub thickness: f64,

    /// Radiation length X0 (mm)
    pub radiation_length: f64,

    /// Mean energy loss of a minimum ionising particle (GeV/mm)
    pub de_dx: f64,
}

impl Material {
    /// Silicon sensor of the given thickness in mm.
    pub fn silicon(thickness: f64) -> Self {
        Self {
            thickness,
            radiation_length: 93.7,
            de_dx: 3.87e-4,
        }
    }

    /// Massless surface with no scattering or energy loss.
    pub fn none() -> Self {
        Self {
            thickness: 0.0,
            radiation_length: f64::INFINITY,
            de_dx: 0.0,
        }
    }

    /// Thickness in units of radiation length (x / X0).
    pub fn radiation_fraction(&self) -> f64 {
        if self.radiation_length.is_finite() && self.radiation_length > 0.0 {
            self.thickness / self.radiation_length
        } else {
            0.0
        }
    }
}

/// Bounds of a planar surface in its local (u, v) frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum PlaneBounds {
    /// |u| <= half_u and |v| <= half_v
    Rectangle { half_u: f64, half_v: f64 },

    /// r_min <= sqrt(u² + v²) <= r_max
    Annulus { r_min: f64, r_max: f64 },
}

/// Geometric shape of a sensitive surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Shape {
    /// Cylinder coaxial with the z axis
    Cylinder {
        radius: f64,
        half_length: f64,
        z_center: f64,
    },

    /// Bounded plane; `normal` and `u_axis` are unit and orthogonal
    Plane {
        origin: Vector3<f64>,
        normal: Vector3<f64>,
        u_axis: Vector3<f64>,
        bounds: PlaneBounds,
    },
}

/// A sensitive surface belonging to a numbered layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Surface {
    /// Layer this surface belongs to
    pub layer_id: LayerId,

    /// Readout element ID (may be shared by the pieces of a split layer)
    pub element_id: ElementId,

    /// Geometric shape
    pub shape: Shape,

    /// Material budget
    pub material: Material,
}

impl Surface {
    /// Creates a cylindrical surface around the z axis.
    pub fn cylinder(
        layer_id: LayerId,
        element_id: ElementId,
        radius: f64,
        half_length: f64,
        z_center: f64,
        material: Material,
    ) -> Result<Self, GeometryError> {
        if !(radius.is_finite() && radius > 0.0) {
            return Err(GeometryError::invalid(format!("cylinder radius {radius}")));
        }
        if !(half_length.is_finite() && half_length > 0.0) || !z_center.is_finite() {
            return Err(GeometryError::invalid(format!(
                "cylinder extent {half_length} around z={z_center}"
            )));
        }

        Ok(Self {
            layer_id,
            element_id,
            shape: Shape::Cylinder {
                radius,
                half_length,
                z_center,
            },
            material,
        })
    }

    /// Creates a bounded planar surface.
    ///
    /// `u_axis` is made orthogonal to `normal` before normalisation, so any
    /// vector not parallel to the normal is accepted.
    pub fn plane(
        layer_id: LayerId,
        element_id: ElementId,
        origin: Vector3<f64>,
        normal: Vector3<f64>,
        u_axis: Vector3<f64>,
        bounds: PlaneBounds,
        material: Material,
    ) -> Result<Self, GeometryError> {
        let n = normal
            .try_normalize(1e-12)
            .ok_or_else(|| GeometryError::invalid("plane normal has zero length"))?;
        let u = (u_axis - n * u_axis.dot(&n))
            .try_normalize(1e-12)
            .ok_or_else(|| GeometryError::invalid("plane u axis is parallel to the normal"))?;

        let bounds_ok = match bounds {
            PlaneBounds::Rectangle { half_u, half_v } => half_u > 0.0 && half_v > 0.0,
            PlaneBounds::Annulus { r_min, r_max } => r_min >= 0.0 && r_max > r_min,
        };
        if !bounds_ok || !origin.iter().all(|c| c.is_finite()) {
            return Err(GeometryError::invalid(format!("plane bounds {bounds:?}")));
        }

        Ok(Self {
            layer_id,
            element_id,
            shape: Shape::Plane {
                origin,
                normal: n,
                u_axis: u,
                bounds,
            },
            material,
        })
    }

    /// Implicit function of the unbounded surface: zero on it, positive outside
    /// a cylinder or on the normal side of a plane.
    pub fn implicit(&self, p: &Vector3<f64>) -> f64 {
        match &self.shape {
            Shape::Cylinder { radius, .. } => p.x.hypot(p.y) - radius,
            Shape::Plane { origin, normal, .. } => (p - origin).dot(normal),
        }
    }

    /// Gradient of [`Surface::implicit`] at `p`.
    pub fn implicit_gradient(&self, p: &Vector3<f64>) -> Vector3<f64> {
        match &self.shape {
            Shape::Cylinder { .. } => {
                let rho = p.x.hypot(p.y);
                if rho < 1e-12 {
                    Vector3::zeros()
                } else {
                    Vector3::new(p.x / rho, p.y / rho, 0.0)
                }
            }
            Shape::Plane { normal, .. } => *normal,
        }
    }

    /// Whether `p` lies inside the surface bounds (distance to the surface ignored).
    pub fn contains(&self, p: &Vector3<f64>) -> bool {
        match &self.shape {
            Shape::Cylinder {
                half_length,
                z_center,
                ..
            } => (p.z - z_center).abs() <= half_length + ON_SURFACE_TOLERANCE,
            Shape::Plane { bounds, .. } => {
                let local = self.local_coordinates(p);
                match *bounds {
                    PlaneBounds::Rectangle { half_u, half_v } => {
                        local.x.abs() <= half_u + ON_SURFACE_TOLERANCE
                            && local.y.abs() <= half_v + ON_SURFACE_TOLERANCE
                    }
                    PlaneBounds::Annulus { r_min, r_max } => {
                        let r = local.norm();
                        r >= r_min - ON_SURFACE_TOLERANCE && r <= r_max + ON_SURFACE_TOLERANCE
                    }
                }
            }
        }
    }

    /// Whether `p` lies on the bounded surface.
    pub fn is_on_surface(&self, p: &Vector3<f64>) -> bool {
        self.implicit(p).abs() <= ON_SURFACE_TOLERANCE && self.contains(p)
    }

    /// Local (u, v) coordinates of `p`: (r·φ, z − z_center) on a cylinder,
    /// in-plane projections on a plane.
    pub fn local_coordinates(&self, p: &Vector3<f64>) -> Vector2<f64> {
        match &self.shape {
            Shape::Cylinder {
                radius, z_center, ..
            } => Vector2::new(radius * p.y.atan2(p.x), p.z - z_center),
            Shape::Plane {
                origin,
                normal,
                u_axis,
                ..
            } => {
                let d = p - origin;
                let v_axis = normal.cross(u_axis);
                Vector2::new(d.dot(u_axis), d.dot(&v_axis))
            }
        }
    }

    /// Local displacement from `from` to `to`; the azimuth difference on a
    /// cylinder is wrapped so points either side of φ = ±π stay close.
    pub fn local_offset(&self, from: &Vector3<f64>, to: &Vector3<f64>) -> Vector2<f64> {
        match &self.shape {
            Shape::Cylinder { radius, .. } => {
                let dphi = wrap_angle(to.y.atan2(to.x) - from.y.atan2(from.x));
                Vector2::new(radius * dphi, to.z - from.z)
            }
            Shape::Plane { normal, u_axis, .. } => {
                let d = to - from;
                let v_axis = normal.cross(u_axis);
                Vector2::new(d.dot(u_axis), d.dot(&v_axis))
            }
        }
    }

    /// Linear map from a global displacement at `p` to the local (u, v) frame.
    pub fn local_projection(&self, p: &Vector3<f64>) -> Matrix2x3<f64> {
        match &self.shape {
            Shape::Cylinder { .. } => {
                let phi = p.y.atan2(p.x);
                Matrix2x3::new(-phi.sin(), phi.cos(), 0.0, 0.0, 0.0, 1.0)
            }
            Shape::Plane { normal, u_axis, .. } => {
                let v_axis = normal.cross(u_axis);
                Matrix2x3::new(
                    u_axis.x, u_axis.y, u_axis.z, v_axis.x, v_axis.y, v_axis.z,
                )
            }
        }
    }

    /// Unit normal at `p` (radial for a cylinder).
    pub fn normal_at(&self, p: &Vector3<f64>) -> Vector3<f64> {
        self.implicit_gradient(p)
    }

    /// Transverse radius used to order surfaces from the inside out.
    pub fn sorting_radius(&self) -> f64 {
        match &self.shape {
            Shape::Cylinder { radius, .. } => *radius,
            Shape::Plane { origin, .. } => origin.x.hypot(origin.y),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn barrel() -> Surface {
        Surface::cylinder(LayerId(1), ElementId(1000), 100.0, 200.0, 0.0, Material::silicon(0.3))
            .unwrap()
    }

    fn disk() -> Surface {
        Surface::plane(
            LayerId(10),
            ElementId(10000),
            Vector3::new(0.0, 0.0, 500.0),
            Vector3::new(0.0, 0.0, 1.0),
            Vector3::new(1.0, 0.0, 0.3),
            PlaneBounds::Annulus { r_min: 40.0, r_max: 300.0 },
            Material::silicon(0.3),
        )
        .unwrap()
    }

    #[test]
    fn test_wrap_angle() {
        assert_relative_eq!(wrap_angle(2.5 * PI), 0.5 * PI, epsilon = 1e-12);
        assert_relative_eq!(wrap_angle(-PI), PI, epsilon = 1e-12);
        assert_relative_eq!(wrap_angle(0.5), 0.5, epsilon = 1e-12);
        assert_relative_eq!(wrap_angle(-0.5 - 2.0 * PI), -0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_cylinder_on_surface() {
        let s = barrel();
        assert!(s.is_on_surface(&Vector3::new(100.0, 0.0, 150.0)));
        assert!(!s.is_on_surface(&Vector3::new(100.0, 0.0, 250.0)));
        assert!(!s.is_on_surface(&Vector3::new(101.0, 0.0, 0.0)));
        assert_relative_eq!(s.implicit(&Vector3::new(0.0, 120.0, 0.0)), 20.0, epsilon = 1e-12);
    }

    #[test]
    fn test_cylinder_local_offset_wraps_azimuth() {
        let s = barrel();
        let a = Vector3::new(-100.0, 1e-3, 0.0);
        let b = Vector3::new(-100.0, -1e-3, 1.0);
        let offset = s.local_offset(&a, &b);
        // Crossing the ±π seam must give a small displacement, not 2πR
        assert!(offset.x.abs() < 1e-2);
        assert_relative_eq!(offset.y, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_plane_axes_are_orthonormalised() {
        let s = disk();
        match &s.shape {
            Shape::Plane { normal, u_axis, .. } => {
                assert_relative_eq!(u_axis.norm(), 1.0, epsilon = 1e-12);
                assert_relative_eq!(u_axis.dot(normal), 0.0, epsilon = 1e-12);
            }
            _ => panic!("expected a plane"),
        }
    }

    #[test]
    fn test_annulus_bounds() {
        let s = disk();
        assert!(s.is_on_surface(&Vector3::new(100.0, 0.0, 500.0)));
        assert!(!s.is_on_surface(&Vector3::new(10.0, 0.0, 500.0)));
        assert!(!s.is_on_surface(&Vector3::new(100.0, 0.0, 501.0)));
    }

    #[test]
    fn test_local_projection_matches_offset() {
        let s = barrel();
        let p = Vector3::new(60.0, 80.0, 10.0);
        let step = Vector3::new(-0.8, 0.6, 0.5) * 1e-4;
        let linear = s.local_projection(&p) * step;
        let exact = s.local_offset(&p, &(p + step));
        assert_relative_eq!(linear.x, exact.x, epsilon = 1e-8);
        assert_relative_eq!(linear.y, exact.y, epsilon = 1e-8);
    }

    #[test]
    fn test_degenerate_surfaces_rejected() {
        assert!(Surface::cylinder(LayerId(1), ElementId(1), -1.0, 10.0, 0.0, Material::none()).is_err());
        let parallel = Surface::plane(
            LayerId(1),
            ElementId(1),
            Vector3::zeros(),
            Vector3::z(),
            Vector3::z(),
            PlaneBounds::Rectangle { half_u: 1.0, half_v: 1.0 },
            Material::none(),
        );
        assert!(matches!(parallel, Err(GeometryError::InvalidSurface(_))));
    }
}
