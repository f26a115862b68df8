//! Material effects at sensitive surfaces.
//!
//! - **Multiple scattering**: Highland formula, added as process noise on
//!   the direction parameters (φ0, tanλ)
//! - **Energy loss**: mean ionisation loss, applied as a curvature update
//!
//! Both are skipped without a field, where momentum is unknown.

use helixfit_geom::Surface;
use serde::{Deserialize, Serialize};

use crate::error::FitError;
use crate::helix::{OMEGA, PHI, TAN_LAMBDA};
use crate::track_state::TrackState;
use crate::types::FitDirection;

/// Assumed particle mass (charged pion, GeV).
pub const PION_MASS: f64 = 0.13957;

/// Grazing crossings are capped at this incidence cosine.
const MIN_INCIDENCE_COSINE: f64 = 0.05;

/// Which material effects a fit includes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterialOptions {
    pub multiple_scattering: bool,
    pub energy_loss: bool,
}

impl MaterialOptions {
    /// No material effects.
    pub fn none() -> Self {
        Self {
            multiple_scattering: false,
            energy_loss: false,
        }
    }

    pub fn any(&self) -> bool {
        self.multiple_scattering || self.energy_loss
    }
}

impl Default for MaterialOptions {
    fn default() -> Self {
        Self {
            multiple_scattering: true,
            energy_loss: true,
        }
    }
}

/// RMS plane scattering angle (rad) after `x_over_x0` radiation lengths,
/// for momentum `p` (GeV) and velocity `beta`.
pub fn highland_angle(p: f64, beta: f64, x_over_x0: f64) -> f64 {
    if x_over_x0 <= 0.0 || p <= 0.0 {
        return 0.0;
    }
    let correction = (1.0 + 0.038 * x_over_x0.ln()).max(0.0);
    0.0136 / (beta * p) * x_over_x0.sqrt() * correction
}

/// Applies the material of `surface` to a state located on it.
///
/// Energy is removed when the fit runs along the momentum and restored when
/// it runs against it. Fails when the particle would range out.
pub fn apply(
    state: &mut TrackState,
    surface: &Surface,
    bz: f64,
    direction: FitDirection,
    options: MaterialOptions,
) -> Result<(), FitError> {
    let helix = state.helix();
    let Some(p) = helix.momentum(bz) else {
        return Ok(());
    };
    if !options.any() || surface.material.thickness <= 0.0 {
        return Ok(());
    }

    let position = helix.pca();
    let incidence = surface
        .normal_at(&position)
        .dot(&helix.direction_at(0.0))
        .abs()
        .max(MIN_INCIDENCE_COSINE);

    let mass2 = PION_MASS * PION_MASS;
    let energy = (p * p + mass2).sqrt();

    if options.multiple_scattering {
        let x = surface.material.radiation_fraction() / incidence;
        let theta = highland_angle(p, p / energy, x);
        let dip2 = 1.0 + helix.tan_lambda().powi(2);
        let variance = theta * theta;

        // Projected onto the azimuth and the dip slope
        state.covariance[(PHI, PHI)] += variance * dip2;
        state.covariance[(TAN_LAMBDA, TAN_LAMBDA)] += variance * dip2 * dip2;
    }

    if options.energy_loss && surface.material.de_dx > 0.0 {
        let loss = surface.material.de_dx * surface.material.thickness / incidence;
        let new_energy = energy - direction.sign() * loss;
        if new_energy <= PION_MASS {
            return Err(FitError::diverged(format!(
                "particle with p={p:.4} GeV ranges out in {}",
                surface.element_id
            )));
        }

        let new_p = (new_energy * new_energy - mass2).sqrt();
        let scale = p / new_p;
        state.params[OMEGA] *= scale;
        state.covariance.row_mut(OMEGA).scale_mut(scale);
        state.covariance.column_mut(OMEGA).scale_mut(scale);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helix::{Helix, TrackParams};
    use approx::assert_relative_eq;
    use helixfit_geom::{ElementId, LayerId, Material};
    use nalgebra::{Matrix5, Vector3};

    fn barrel() -> Surface {
        Surface::cylinder(LayerId(1), ElementId(1000), 100.0, 500.0, 0.0, Material::silicon(0.3)).unwrap()
    }

    fn state_on_barrel(pt: f64) -> TrackState {
        // Radial track through (100, 0, 0)
        let omega = Helix::omega_for(pt, 1.0, 3.5);
        TrackState::new(
            TrackParams::new(0.0, 0.0, omega, 0.0, 0.0),
            Matrix5::identity() * 1e-8,
            Vector3::new(100.0, 0.0, 0.0),
        )
    }

    #[test]
    fn test_highland_angle() {
        // 1 GeV pion through 0.3 mm of silicon
        let x = 0.3 / 93.7;
        let theta = highland_angle(1.0, 1.0, x);
        assert!(theta > 5e-4 && theta < 1e-3, "theta = {theta}");
        assert_eq!(highland_angle(1.0, 1.0, 0.0), 0.0);
    }

    #[test]
    fn test_scattering_inflates_direction_variance() {
        let mut state = state_on_barrel(1.0);
        let before = state.covariance;
        apply(&mut state, &barrel(), 3.5, FitDirection::Forward, MaterialOptions {
            multiple_scattering: true,
            energy_loss: false,
        })
        .unwrap();

        assert!(state.covariance[(PHI, PHI)] > before[(PHI, PHI)]);
        assert!(state.covariance[(TAN_LAMBDA, TAN_LAMBDA)] > before[(TAN_LAMBDA, TAN_LAMBDA)]);
        assert_eq!(state.covariance[(0, 0)], before[(0, 0)]);
        assert_eq!(state.params, state_on_barrel(1.0).params);
    }

    #[test]
    fn test_energy_loss_direction() {
        let options = MaterialOptions {
            multiple_scattering: false,
            energy_loss: true,
        };
        let original = state_on_barrel(0.5);

        let mut forward = original.clone();
        apply(&mut forward, &barrel(), 3.5, FitDirection::Forward, options).unwrap();
        // Losing energy curls the track more
        assert!(forward.omega().abs() > original.omega().abs());

        let mut backward = original.clone();
        apply(&mut backward, &barrel(), 3.5, FitDirection::Backward, options).unwrap();
        assert!(backward.omega().abs() < original.omega().abs());

        let pt = forward.helix().transverse_momentum(3.5).unwrap();
        assert_relative_eq!(pt, 0.5, epsilon = 1e-3);
    }

    #[test]
    fn test_no_field_means_no_effects() {
        let mut state = state_on_barrel(1.0);
        let before = state.clone();
        apply(&mut state, &barrel(), 0.0, FitDirection::Forward, MaterialOptions::default()).unwrap();
        assert_eq!(state, before);
    }

    #[test]
    fn test_slow_particle_ranges_out() {
        let mut state = state_on_barrel(1.0);
        let thick = Surface::cylinder(
            LayerId(1),
            ElementId(1000),
            100.0,
            500.0,
            0.0,
            Material { thickness: 1000.0, radiation_length: 93.7, de_dx: 3.87e-3 },
        )
        .unwrap();
        let result = apply(&mut state, &thick, 3.5, FitDirection::Forward, MaterialOptions::default());
        assert!(matches!(result, Err(FitError::FitDiverged(_))));
    }
}
