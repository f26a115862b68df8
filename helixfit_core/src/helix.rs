//! Helix parameterisation of a charged track in a solenoidal field.
//!
//! A track is described by five parameters relative to a reference point r:
//! - **d0**: signed transverse distance from r to the point of closest approach
//! - **φ0**: azimuth of the momentum at that point
//! - **ω**: signed curvature 1/R (mm⁻¹), positive for counter-clockwise motion
//! - **z0**: z of the point of closest approach relative to r
//! - **tanλ**: dip, dz per unit transverse arc length
//!
//! The point of closest approach (PCA) is `r + d0·(-sin φ0, cos φ0) + z0·ẑ`.
//! Arc length `s` is measured in the transverse plane from the PCA, positive
//! along the momentum.

use helixfit_geom::wrap_angle;
use nalgebra::{Matrix5, Vector2, Vector3, Vector5};
use std::f64::consts::PI;

/// Index of d0 in a parameter vector.
pub const D0: usize = 0;
/// Index of φ0 in a parameter vector.
pub const PHI: usize = 1;
/// Index of ω in a parameter vector.
pub const OMEGA: usize = 2;
/// Index of z0 in a parameter vector.
pub const Z0: usize = 3;
/// Index of tanλ in a parameter vector.
pub const TAN_LAMBDA: usize = 4;

/// Five helix parameters (d0, φ0, ω, z0, tanλ).
pub type TrackParams = Vector5<f64>;

/// 5x5 covariance of [`TrackParams`].
pub type TrackCovariance = Matrix5<f64>;

/// pT [GeV] = CURVATURE_CONSTANT · B [T] · R [mm]
pub const CURVATURE_CONSTANT: f64 = 2.99792458e-4;

/// Curvature below which a track is treated as a straight line.
const STRAIGHT_OMEGA: f64 = 1e-12;

/// A helix with its reference point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Helix {
    pub params: TrackParams,
    pub reference: Vector3<f64>,
}

impl Helix {
    pub fn new(params: TrackParams, reference: Vector3<f64>) -> Self {
        Self { params, reference }
    }

    /// Builds a helix from its individual parameters.
    pub fn from_components(
        d0: f64,
        phi: f64,
        omega: f64,
        z0: f64,
        tan_lambda: f64,
        reference: Vector3<f64>,
    ) -> Self {
        Self::new(TrackParams::new(d0, phi, omega, z0, tan_lambda), reference)
    }

    pub fn d0(&self) -> f64 {
        self.params[D0]
    }

    pub fn phi(&self) -> f64 {
        self.params[PHI]
    }

    pub fn omega(&self) -> f64 {
        self.params[OMEGA]
    }

    pub fn z0(&self) -> f64 {
        self.params[Z0]
    }

    pub fn tan_lambda(&self) -> f64 {
        self.params[TAN_LAMBDA]
    }

    /// Whether the curvature is too small to distinguish from a line.
    pub fn is_straight(&self) -> bool {
        self.omega().abs() < STRAIGHT_OMEGA
    }

    /// Radius of curvature (mm), infinite for a straight track.
    pub fn radius(&self) -> f64 {
        if self.is_straight() {
            f64::INFINITY
        } else {
            1.0 / self.omega().abs()
        }
    }

    /// Transverse arc length of one full turn (infinite for a straight track).
    pub fn period(&self) -> f64 {
        2.0 * PI * self.radius()
    }

    /// Point of closest approach to the reference point.
    pub fn pca(&self) -> Vector3<f64> {
        let (sin, cos) = self.phi().sin_cos();
        Vector3::new(
            self.reference.x - self.d0() * sin,
            self.reference.y + self.d0() * cos,
            self.reference.z + self.z0(),
        )
    }

    /// Centre of the transverse circle, `None` for a straight track.
    pub fn center(&self) -> Option<Vector2<f64>> {
        if self.is_straight() {
            return None;
        }
        let pca = self.pca();
        let (sin, cos) = self.phi().sin_cos();
        Some(Vector2::new(
            pca.x - sin / self.omega(),
            pca.y + cos / self.omega(),
        ))
    }

    /// Momentum azimuth at arc length `s`.
    pub fn phi_at(&self, s: f64) -> f64 {
        wrap_angle(self.phi() + self.omega() * s)
    }

    /// Position at arc length `s`.
    pub fn point_at(&self, s: f64) -> Vector3<f64> {
        let pca = self.pca();
        let half = 0.5 * self.omega() * s;

        // Chord length 2R·sin(ωs/2), written to stay exact as ω → 0
        let chord = if half.abs() < 1e-9 {
            s * (1.0 - half * half / 6.0)
        } else {
            s * half.sin() / half
        };
        let (sin, cos) = (self.phi() + half).sin_cos();

        Vector3::new(
            pca.x + chord * cos,
            pca.y + chord * sin,
            pca.z + s * self.tan_lambda(),
        )
    }

    /// Derivative of the position with respect to `s`.
    pub fn tangent_at(&self, s: f64) -> Vector3<f64> {
        let (sin, cos) = (self.phi() + self.omega() * s).sin_cos();
        Vector3::new(cos, sin, self.tan_lambda())
    }

    /// Unit direction of motion at `s`.
    pub fn direction_at(&self, s: f64) -> Vector3<f64> {
        self.tangent_at(s).normalize()
    }

    /// 3D path length corresponding to transverse arc length `s`.
    pub fn path_length(&self, s: f64) -> f64 {
        s * (1.0 + self.tan_lambda().powi(2)).sqrt()
    }

    /// Arc length of the transverse point of closest approach to `point`,
    /// within half a turn of the PCA.
    pub fn arc_length_to_pca(&self, point: &Vector3<f64>) -> f64 {
        self.arc_length_near(point, 0.0)
    }

    /// Arc length of the transverse point of closest approach to `point`,
    /// choosing the turn whose arc length is nearest `s_hint`.
    pub fn arc_length_near(&self, point: &Vector3<f64>, s_hint: f64) -> f64 {
        let pca = self.pca();
        let (sin, cos) = self.phi().sin_cos();
        let dx = point.x - pca.x;
        let dy = point.y - pca.y;

        // Displacement along the momentum and along the inward normal
        let along = dx * cos + dy * sin;
        let across = -dx * sin + dy * cos;

        let w = self.omega();
        if w.abs() < STRAIGHT_OMEGA {
            return along;
        }

        let turn = (w * along).atan2(1.0 - w * across);
        let k = ((w * s_hint - turn) / (2.0 * PI)).round();
        (turn + 2.0 * PI * k) / w
    }

    /// Re-expresses the helix relative to `new_reference`.
    ///
    /// Returns the moved helix and the arc length from the old PCA to the new
    /// one. `s_hint` selects the turn for curling tracks.
    pub fn repivot(&self, new_reference: &Vector3<f64>, s_hint: f64) -> (Helix, f64) {
        let s = self.arc_length_near(new_reference, s_hint);
        let p = self.point_at(s);
        let phi = self.phi_at(s);
        let (sin, cos) = phi.sin_cos();

        let d0 = -(p.x - new_reference.x) * sin + (p.y - new_reference.y) * cos;
        let params = TrackParams::new(
            d0,
            phi,
            self.omega(),
            p.z - new_reference.z,
            self.tan_lambda(),
        );

        (Helix::new(params, *new_reference), s)
    }

    /// Transverse momentum (GeV) in a field of `bz` Tesla.
    pub fn transverse_momentum(&self, bz: f64) -> Option<f64> {
        if self.is_straight() || bz.abs() < f64::EPSILON {
            return None;
        }
        Some(CURVATURE_CONSTANT * bz.abs() / self.omega().abs())
    }

    /// Total momentum (GeV) in a field of `bz` Tesla.
    pub fn momentum(&self, bz: f64) -> Option<f64> {
        self.transverse_momentum(bz)
            .map(|pt| pt * (1.0 + self.tan_lambda().powi(2)).sqrt())
    }

    /// Charge sign implied by the curvature in a field of `bz` Tesla.
    ///
    /// A positive particle in +Bz circles clockwise (negative ω).
    pub fn charge(&self, bz: f64) -> f64 {
        if self.is_straight() || bz == 0.0 {
            return 0.0;
        }
        -(self.omega() * bz).signum()
    }

    /// Curvature of a particle with transverse momentum `pt` (GeV) and charge
    /// sign `charge` in a field of `bz` Tesla.
    pub fn omega_for(pt: f64, charge: f64, bz: f64) -> f64 {
        -charge.signum() * CURVATURE_CONSTANT * bz / pt
    }

    /// The helix through three points, moving from `p1` via `p2` to `p3`.
    ///
    /// The result is referenced at `p1` (d0 = z0 = 0); the arc length from
    /// `p1` to `p3` along the direction of motion is returned with it.
    /// Returns `None` when the points are coincident in the transverse plane.
    pub fn through_three_points(
        p1: &Vector3<f64>,
        p2: &Vector3<f64>,
        p3: &Vector3<f64>,
    ) -> Option<(Helix, f64)> {
        let a = Vector2::new(p2.x - p1.x, p2.y - p1.y);
        let b = Vector2::new(p3.x - p2.x, p3.y - p2.y);
        let chord = Vector2::new(p3.x - p1.x, p3.y - p1.y);
        if a.norm() < 1e-9 || b.norm() < 1e-9 || chord.norm() < 1e-9 {
            return None;
        }

        let cross = a.x * b.y - a.y * b.x;

        if cross.abs() <= 1e-12 * a.norm() * b.norm() {
            let phi = chord.y.atan2(chord.x);
            let s3 = chord.norm();
            let helix = Helix::from_components(0.0, phi, 0.0, 0.0, (p3.z - p1.z) / s3, *p1);
            return Some((helix, s3));
        }

        // Circumcentre of the transverse triangle
        let (x1, y1, x2, y2, x3, y3) = (p1.x, p1.y, p2.x, p2.y, p3.x, p3.y);
        let d = 2.0 * (x1 * (y2 - y3) + x2 * (y3 - y1) + x3 * (y1 - y2));
        let q1 = x1 * x1 + y1 * y1;
        let q2 = x2 * x2 + y2 * y2;
        let q3 = x3 * x3 + y3 * y3;
        let cx = (q1 * (y2 - y3) + q2 * (y3 - y1) + q3 * (y1 - y2)) / d;
        let cy = (q1 * (x3 - x2) + q2 * (x1 - x3) + q3 * (x2 - x1)) / d;

        let (rx, ry) = (x1 - cx, y1 - cy);
        let radius = rx.hypot(ry);
        let omega = if cross > 0.0 { 1.0 / radius } else { -1.0 / radius };

        // Tangent at p1 perpendicular to the radius, turning with the sign of ω
        let (tx, ty) = if omega > 0.0 { (-ry, rx) } else { (ry, -rx) };
        let phi = ty.atan2(tx);

        let flat = Helix::from_components(0.0, phi, omega, 0.0, 0.0, *p1);
        let period = flat.period();
        let ahead = |p: &Vector3<f64>| {
            let s = flat.arc_length_to_pca(p);
            if s <= 0.0 {
                s + period
            } else {
                s
            }
        };
        let s2 = ahead(p2);
        let mut s3 = ahead(p3);
        if s3 < s2 {
            s3 += period;
        }

        let helix = Helix::from_components(0.0, phi, omega, 0.0, (p3.z - p1.z) / s3, *p1);
        Some((helix, s3))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sample_helix() -> Helix {
        Helix::from_components(1.5, 0.3, 2e-3, -4.0, 0.4, Vector3::new(2.0, -1.0, 3.0))
    }

    #[test]
    fn test_point_at_zero_is_pca() {
        let h = sample_helix();
        let p = h.point_at(0.0);
        assert_relative_eq!(p, h.pca(), epsilon = 1e-12);
        // PCA lies d0 from the reference
        let d = (p - h.reference).xy().norm();
        assert_relative_eq!(d, 1.5, epsilon = 1e-12);
    }

    #[test]
    fn test_points_lie_on_circle() {
        let h = sample_helix();
        let c = h.center().unwrap();
        for s in [-800.0, -10.0, 0.0, 250.0, 1400.0] {
            let p = h.point_at(s);
            assert_relative_eq!((p.xy() - c).norm(), 500.0, epsilon = 1e-9);
            assert_relative_eq!(p.z, h.pca().z + 0.4 * s, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_tangent_matches_finite_difference() {
        let h = sample_helix();
        let s = 120.0;
        let eps = 1e-5;
        let numeric = (h.point_at(s + eps) - h.point_at(s - eps)) / (2.0 * eps);
        assert_relative_eq!(numeric, h.tangent_at(s), epsilon = 1e-6);
    }

    #[test]
    fn test_straight_track() {
        let h = Helix::from_components(0.0, 0.0, 0.0, 0.0, 1.0, Vector3::zeros());
        assert!(h.is_straight());
        assert!(h.center().is_none());
        assert_relative_eq!(h.point_at(10.0), Vector3::new(10.0, 0.0, 10.0), epsilon = 1e-12);
        assert_relative_eq!(h.arc_length_to_pca(&Vector3::new(7.0, 3.0, 0.0)), 7.0, epsilon = 1e-12);
    }

    #[test]
    fn test_repivot_to_own_reference_is_identity() {
        let h = sample_helix();
        let (moved, s) = h.repivot(&h.reference, 0.0);
        assert_relative_eq!(s, 0.0, epsilon = 1e-9);
        assert_relative_eq!(moved.params, h.params, epsilon = 1e-9);
    }

    #[test]
    fn test_repivot_roundtrip() {
        let h = sample_helix();
        let target = h.point_at(300.0) + Vector3::new(0.5, -0.2, 1.0);

        let (moved, s) = h.repivot(&target, 300.0);
        assert_relative_eq!(s, 300.0, epsilon = 1.0);
        // The moved helix describes the same curve
        assert_relative_eq!(moved.point_at(40.0), h.point_at(s + 40.0), epsilon = 1e-8);

        let (back, s_back) = moved.repivot(&h.reference, -s);
        assert_relative_eq!(s_back, -s, epsilon = 1e-8);
        assert_relative_eq!(back.params, h.params, epsilon = 1e-8);
    }

    #[test]
    fn test_arc_length_hint_selects_turn() {
        let h = Helix::from_components(0.0, 0.0, 1e-2, 0.0, 0.0, Vector3::zeros());
        let period = h.period();
        let p = h.point_at(0.75 * period);

        assert_relative_eq!(h.arc_length_to_pca(&p), -0.25 * period, epsilon = 1e-9);
        assert_relative_eq!(h.arc_length_near(&p, 0.7 * period), 0.75 * period, epsilon = 1e-9);
    }

    #[test]
    fn test_three_point_helix_recovers_track() {
        let truth = Helix::from_components(0.0, 1.1, -1.5e-3, 0.0, 0.25, Vector3::new(10.0, 5.0, -2.0));
        let (p1, p2, p3) = (truth.point_at(0.0), truth.point_at(200.0), truth.point_at(450.0));

        let (seed, s3) = Helix::through_three_points(&p1, &p2, &p3).unwrap();
        assert_relative_eq!(s3, 450.0, epsilon = 1e-6);
        assert_relative_eq!(seed.omega(), truth.omega(), epsilon = 1e-9);
        assert_relative_eq!(seed.phi(), truth.phi(), epsilon = 1e-9);
        assert_relative_eq!(seed.tan_lambda(), truth.tan_lambda(), epsilon = 1e-9);
        assert_relative_eq!(seed.point_at(200.0), p2, epsilon = 1e-6);
    }

    #[test]
    fn test_three_point_helix_rejects_coincident_points() {
        let p = Vector3::new(1.0, 2.0, 3.0);
        assert!(Helix::through_three_points(&p, &p, &Vector3::new(5.0, 0.0, 0.0)).is_none());
    }

    #[test]
    fn test_momentum_and_charge() {
        // 1 GeV pT in 3.5 T: R = 1 / (2.998e-4 * 3.5) mm
        let omega = Helix::omega_for(1.0, 1.0, 3.5);
        let h = Helix::from_components(0.0, 0.0, omega, 0.0, 1.0, Vector3::zeros());
        assert_relative_eq!(h.transverse_momentum(3.5).unwrap(), 1.0, epsilon = 1e-12);
        assert_relative_eq!(h.momentum(3.5).unwrap(), 2f64.sqrt(), epsilon = 1e-12);
        assert_eq!(h.charge(3.5), 1.0);
        assert!(h.omega() < 0.0);
        assert!(h.transverse_momentum(0.0).is_none());
    }
}
