//! Crossings of a helix with detector surfaces.
//!
//! Cylinders are solved analytically (circle-circle intersection in the
//! transverse plane, polished by Newton iterations). Planes are scanned for
//! sign changes of the implicit function over one turn each way and refined
//! by bisection. Both searches cover at most one full turn in each direction.

use helixfit_geom::{ElementId, Shape, Surface};
use nalgebra::{Vector2, Vector3};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::f64::consts::PI;

use crate::helix::Helix;
use crate::types::{CrossingMode, FitDirection};

/// Arc lengths (mm) closer than this to the start are "the current location".
pub const CROSSING_TOLERANCE: f64 = 1e-6;

/// Longest arc length (mm) searched in each direction.
pub const MAX_SEARCH_ARC: f64 = 2.0e4;

const SCAN_STEPS: usize = 512;
const MAX_BISECTIONS: usize = 64;
const MAX_NEWTON_ITERATIONS: usize = 25;

/// Below this curvature the circle-circle solution loses precision and the
/// straight-line solution is polished instead.
const NEARLY_STRAIGHT_OMEGA: f64 = 1e-6;

/// A selected crossing of a trajectory with a layer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LayerIntersection {
    /// Crossing point (mm)
    pub point: Vector3<f64>,

    /// Element of the surface that was crossed
    pub element_id: ElementId,

    /// Signed transverse arc length from the start (mm)
    pub arc_length: f64,
}

/// Arc lengths at which the helix crosses `surface` inside its bounds.
pub fn surface_crossings(helix: &Helix, surface: &Surface) -> Vec<f64> {
    unbounded_crossings(helix, surface)
        .into_iter()
        .filter(|&s| surface.contains(&helix.point_at(s)))
        .collect()
}

/// Finds the crossing of `surface` nearest `s_hint`, ignoring surface bounds.
///
/// Newton iteration from the hint is tried first; if it stalls the full
/// crossing search is used.
pub fn crossing_near(helix: &Helix, surface: &Surface, s_hint: f64) -> Option<f64> {
    newton(helix, surface, s_hint).or_else(|| {
        unbounded_crossings(helix, surface)
            .into_iter()
            .min_by(|a, b| by_magnitude(a - s_hint, b - s_hint))
    })
}

/// Selects the crossing of a layer made of `surfaces` according to `mode`.
///
/// Forward and backward are taken along `direction`.
pub fn intersect_layer(
    helix: &Helix,
    surfaces: &[&Surface],
    mode: CrossingMode,
    direction: FitDirection,
) -> Option<LayerIntersection> {
    let candidates = surfaces.iter().flat_map(|surface| {
        surface_crossings(helix, surface)
            .into_iter()
            .map(move |s| (s, surface.element_id))
    });

    select_crossing(candidates, mode, direction).map(|(arc_length, element_id)| LayerIntersection {
        point: helix.point_at(arc_length),
        element_id,
        arc_length,
    })
}

/// Picks one `(arc_length, tag)` candidate according to `mode`.
pub fn select_crossing<T>(
    candidates: impl IntoIterator<Item = (f64, T)>,
    mode: CrossingMode,
    direction: FitDirection,
) -> Option<(f64, T)> {
    let sign = direction.sign();
    candidates
        .into_iter()
        .filter(|(s, _)| match mode {
            CrossingMode::Forward => s * sign > CROSSING_TOLERANCE,
            CrossingMode::Backward => s * sign < -CROSSING_TOLERANCE,
            CrossingMode::Closest => s.is_finite(),
        })
        .min_by(|a, b| by_magnitude(a.0, b.0))
}

fn by_magnitude(a: f64, b: f64) -> Ordering {
    a.abs().partial_cmp(&b.abs()).unwrap_or(Ordering::Equal)
}

// ============================================================================
// CROSSING SEARCH
// ============================================================================

fn unbounded_crossings(helix: &Helix, surface: &Surface) -> Vec<f64> {
    match &surface.shape {
        Shape::Cylinder { radius, .. } => cylinder_crossings(helix, surface, *radius),
        Shape::Plane { .. } => scan_crossings(helix, surface),
    }
}

fn cylinder_crossings(helix: &Helix, surface: &Surface, radius: f64) -> Vec<f64> {
    let pca = helix.pca();
    let q = Vector2::new(pca.x, pca.y);
    let (sin, cos) = helix.phi().sin_cos();
    let t = Vector2::new(cos, sin);
    let omega = helix.omega();

    let approximate: Vec<f64> = if omega.abs() < NEARLY_STRAIGHT_OMEGA {
        // |q + s·t|² = R²
        let qt = q.dot(&t);
        let disc = qt * qt - (q.norm_squared() - radius * radius);
        if disc < 0.0 {
            return Vec::new();
        }
        let root = disc.sqrt();
        vec![-qt - root, -qt + root]
    } else {
        let Some(center) = helix.center() else {
            return Vec::new();
        };
        let r_helix = 1.0 / omega.abs();
        let d = center.norm();
        if d < 1e-12 || d > r_helix + radius || d < (r_helix - radius).abs() {
            return Vec::new();
        }

        let a = (radius * radius - r_helix * r_helix + d * d) / (2.0 * d);
        let h = (radius * radius - a * a).max(0.0).sqrt();
        let base = center * (a / d);
        let perp = Vector2::new(-center.y, center.x) / d;
        let period = helix.period();

        [base + perp * h, base - perp * h]
            .iter()
            .flat_map(|x| {
                let p = Vector3::new(x.x, x.y, 0.0);
                let s0 = helix.arc_length_to_pca(&p);
                [s0 - period, s0, s0 + period]
            })
            .collect()
    };

    approximate
        .into_iter()
        .map(|s| newton(helix, surface, s).unwrap_or(s))
        .collect()
}

fn scan_crossings(helix: &Helix, surface: &Surface) -> Vec<f64> {
    let span = helix.period().min(MAX_SEARCH_ARC);
    let step = 2.0 * span / SCAN_STEPS as f64;
    let g = |s: f64| surface.implicit(&helix.point_at(s));

    let mut roots = Vec::new();
    let mut s_prev = -span;
    let mut g_prev = g(s_prev);
    if g_prev == 0.0 {
        roots.push(s_prev);
    }

    for i in 1..=SCAN_STEPS {
        let s = -span + i as f64 * step;
        let g_s = g(s);
        if g_s == 0.0 {
            roots.push(s);
        } else if g_prev * g_s < 0.0 {
            roots.push(bisect(&g, s_prev, s, g_prev));
        }
        s_prev = s;
        g_prev = g_s;
    }
    roots
}

fn bisect(g: &impl Fn(f64) -> f64, mut lo: f64, mut hi: f64, mut g_lo: f64) -> f64 {
    for _ in 0..MAX_BISECTIONS {
        let mid = 0.5 * (lo + hi);
        let g_mid = g(mid);
        if g_mid == 0.0 {
            return mid;
        }
        if g_lo * g_mid < 0.0 {
            hi = mid;
        } else {
            lo = mid;
            g_lo = g_mid;
        }
        if hi - lo < 1e-10 {
            break;
        }
    }
    0.5 * (lo + hi)
}

fn newton(helix: &Helix, surface: &Surface, s_start: f64) -> Option<f64> {
    let mut s = s_start;
    for _ in 0..MAX_NEWTON_ITERATIONS {
        let p = helix.point_at(s);
        let g = surface.implicit(&p);
        let slope = surface.implicit_gradient(&p).dot(&helix.tangent_at(s));
        if slope.abs() < 1e-12 || !g.is_finite() {
            return None;
        }

        let step = g / slope;
        s -= step;
        if step.abs() < 1e-10 {
            return Some(s);
        }
    }

    // Accept a slow finish as long as the point is on the surface
    let residual = surface.implicit(&helix.point_at(s)).abs();
    (residual < 1e-6).then_some(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use helixfit_geom::{LayerId, Material, PlaneBounds};

    fn cylinder(radius: f64) -> Surface {
        Surface::cylinder(LayerId(1), ElementId(1000), radius, 1000.0, 0.0, Material::none()).unwrap()
    }

    fn disk(z: f64) -> Surface {
        Surface::plane(
            LayerId(10),
            ElementId(10000),
            Vector3::new(0.0, 0.0, z),
            Vector3::z(),
            Vector3::x(),
            PlaneBounds::Annulus { r_min: 10.0, r_max: 600.0 },
            Material::none(),
        )
        .unwrap()
    }

    #[test]
    fn test_straight_line_cylinder_crossings() {
        // Line along x through the origin crosses r = 100 at x = ±100
        let helix = Helix::from_components(0.0, 0.0, 0.0, 0.0, 0.0, Vector3::zeros());
        let mut s = surface_crossings(&helix, &cylinder(100.0));
        s.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(s.len(), 2);
        assert_relative_eq!(s[0], -100.0, epsilon = 1e-9);
        assert_relative_eq!(s[1], 100.0, epsilon = 1e-9);
    }

    #[test]
    fn test_helix_cylinder_crossing_is_on_surface() {
        let helix = Helix::from_components(0.0, 0.4, 1e-3, 0.0, 0.2, Vector3::zeros());
        let surface = cylinder(300.0);
        let crossings = surface_crossings(&helix, &surface);
        assert!(!crossings.is_empty());
        for s in crossings {
            assert_relative_eq!(helix.point_at(s).xy().norm(), 300.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_unreachable_cylinder() {
        // Track from the origin with R = 100 never leaves r < 200
        let helix = Helix::from_components(0.0, 0.0, 1e-2, 0.0, 0.0, Vector3::zeros());
        assert!(surface_crossings(&helix, &cylinder(500.0)).is_empty());
    }

    #[test]
    fn test_plane_crossing() {
        let helix = Helix::from_components(0.0, 0.0, 1e-3, 0.0, 0.5, Vector3::zeros());
        let crossings = surface_crossings(&helix, &disk(100.0));
        assert_eq!(crossings.len(), 1);
        assert_relative_eq!(crossings[0], 200.0, epsilon = 1e-6);
    }

    #[test]
    fn test_crossing_modes_on_two_crossing_layer() {
        // Start inside a cylinder: crossings at s = -100 and s = +100 for a straight line.
        let helix = Helix::from_components(0.0, 0.0, 0.0, 0.0, 0.0, Vector3::new(-20.0, 0.0, 0.0));
        let surface = cylinder(100.0);
        let layer = [&surface];

        let fwd = intersect_layer(&helix, &layer, CrossingMode::Forward, FitDirection::Forward).unwrap();
        let bwd = intersect_layer(&helix, &layer, CrossingMode::Backward, FitDirection::Forward).unwrap();
        let closest = intersect_layer(&helix, &layer, CrossingMode::Closest, FitDirection::Forward).unwrap();

        assert_relative_eq!(fwd.arc_length, 120.0, epsilon = 1e-9);
        assert_relative_eq!(bwd.arc_length, -80.0, epsilon = 1e-9);
        assert_relative_eq!(closest.arc_length, -80.0, epsilon = 1e-9);
        assert_relative_eq!(fwd.point, Vector3::new(100.0, 0.0, 0.0), epsilon = 1e-9);

        // A backward fit swaps the meaning of forward and backward
        let rev = intersect_layer(&helix, &layer, CrossingMode::Forward, FitDirection::Backward).unwrap();
        assert_relative_eq!(rev.arc_length, -80.0, epsilon = 1e-9);
    }

    #[test]
    fn test_closest_includes_current_location() {
        let helix = Helix::from_components(0.0, 0.0, 0.0, 0.0, 0.0, Vector3::new(100.0, 0.0, 0.0));
        let surface = cylinder(100.0);
        let closest =
            intersect_layer(&helix, &[&surface], CrossingMode::Closest, FitDirection::Forward).unwrap();
        assert_relative_eq!(closest.arc_length, 0.0, epsilon = 1e-9);

        let fwd = intersect_layer(&helix, &[&surface], CrossingMode::Forward, FitDirection::Forward);
        assert!(fwd.is_none());
    }

    #[test]
    fn test_crossing_near_hint() {
        let helix = Helix::from_components(0.0, 0.0, 0.0, 0.0, 0.0, Vector3::zeros());
        let surface = cylinder(100.0);
        assert_relative_eq!(crossing_near(&helix, &surface, 90.0).unwrap(), 100.0, epsilon = 1e-9);
        assert_relative_eq!(crossing_near(&helix, &surface, -90.0).unwrap(), -100.0, epsilon = 1e-9);
    }
}
