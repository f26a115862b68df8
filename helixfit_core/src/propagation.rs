//! Transport of track states along the helix.
//!
//! Parameters move by re-pivoting the helix to a new reference point; the
//! covariance follows through the Jacobian of that map, C' = J·C·Jᵀ. The
//! Jacobian is taken by central finite differences, which keeps it exact to
//! rounding for both curved and straight tracks.

use helixfit_geom::wrap_angle;
use nalgebra::Vector3;

use crate::helix::{Helix, TrackCovariance, PHI};
use crate::intersection::LayerIntersection;
use crate::track_state::{symmetrize, StateLocation, TrackState};

/// Finite-difference step per parameter (d0, φ0, ω, z0, tanλ).
pub(crate) const JACOBIAN_STEPS: [f64; 5] = [1e-5, 1e-7, 1e-9, 1e-5, 1e-7];

/// Jacobian of the re-pivot map at `helix` towards `new_reference`.
///
/// `s` is the arc length of the re-pivot; perturbed helices follow the same turn.
pub fn repivot_jacobian(helix: &Helix, new_reference: &Vector3<f64>, s: f64) -> TrackCovariance {
    let mut jacobian = TrackCovariance::zeros();
    for (j, &h) in JACOBIAN_STEPS.iter().enumerate() {
        let mut plus = helix.params;
        let mut minus = helix.params;
        plus[j] += h;
        minus[j] -= h;

        let (up, _) = Helix::new(plus, helix.reference).repivot(new_reference, s);
        let (down, _) = Helix::new(minus, helix.reference).repivot(new_reference, s);

        let mut column = (up.params - down.params) / (2.0 * h);
        column[PHI] = wrap_angle(up.params[PHI] - down.params[PHI]) / (2.0 * h);
        jacobian.set_column(j, &column);
    }
    jacobian
}

/// Moves `state` to `new_reference`, choosing the turn nearest `s_hint`.
pub fn transport(state: &TrackState, new_reference: &Vector3<f64>, s_hint: f64) -> TrackState {
    let helix = state.helix();
    let (moved, s) = helix.repivot(new_reference, s_hint);
    let jacobian = repivot_jacobian(&helix, new_reference, s);
    let covariance = symmetrize(&(jacobian * state.covariance * jacobian.transpose()));

    TrackState {
        params: moved.params,
        covariance,
        reference_point: *new_reference,
        location: state.location,
    }
}

/// Moves `state` to the point of closest approach to `point`.
pub fn to_point(state: &TrackState, point: &Vector3<f64>) -> TrackState {
    let s = state.helix().arc_length_to_pca(point);
    transport(state, point, s).with_location(StateLocation::AtPoint)
}

/// Moves `state` onto a layer crossing.
pub fn to_crossing(state: &TrackState, crossing: &LayerIntersection) -> TrackState {
    transport(state, &crossing.point, crossing.arc_length)
        .with_location(StateLocation::AtSurface(crossing.element_id))
}
