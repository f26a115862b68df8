//! The Kalman filter: sequential, one hit at a time.
//!
//! Each hit is processed in three steps:
//! 1. **Predict**: transport the state to the crossing with the hit's surface
//! 2. **Material**: add scattering noise and correct for energy loss
//! 3. **Update**: Kalman gain from the 2D local residual, Joseph-form covariance
//!
//! The measurement model h(p) is the local position of the helix crossing on
//! the surface; its Jacobian H is taken by central finite differences.

use helixfit_geom::{wrap_angle, Surface};
use nalgebra::{Matrix2x5, Matrix5, Vector2};
use std::sync::Arc;
use tracing::{debug, error};

use crate::error::FitError;
use crate::estimator::{ndf_for, EstimatorKind, FilterStep, FitContext, FitOutcome, HitSite, TrackEstimator};
use crate::helix::{Helix, PHI};
use crate::hit::Hit;
use crate::intersection::crossing_near;
use crate::material;
use crate::propagation::{self, JACOBIAN_STEPS};
use crate::track_state::{is_positive_semidefinite, symmetrize, StateLocation, TrackState};

/// Local residual of a hit and its derivatives with respect to the helix parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Linearisation {
    /// Measured minus predicted local position
    pub residual: Vector2<f64>,

    /// ∂(predicted local position)/∂(helix parameters)
    pub jacobian: Matrix2x5<f64>,

    /// Arc length of the predicted crossing
    pub arc_length: f64,
}

/// Linearises the measurement model of `hit` around `helix`.
///
/// The predicted position is the crossing with `surface` nearest `s_hint`.
pub fn linearise(
    helix: &Helix,
    surface: &Surface,
    hit: &Hit,
    s_hint: f64,
) -> Result<Linearisation, FitError> {
    let unreachable = || FitError::SurfaceUnreachable(surface.element_id);

    let arc_length = crossing_near(helix, surface, s_hint).ok_or_else(unreachable)?;
    let predicted = helix.point_at(arc_length);
    let residual = surface.local_offset(&predicted, &hit.position);

    let mut jacobian = Matrix2x5::zeros();
    for (j, &h) in JACOBIAN_STEPS.iter().enumerate() {
        let mut plus = helix.params;
        let mut minus = helix.params;
        plus[j] += h;
        minus[j] -= h;
        let up = Helix::new(plus, helix.reference);
        let down = Helix::new(minus, helix.reference);

        let s_up = crossing_near(&up, surface, arc_length).ok_or_else(unreachable)?;
        let s_down = crossing_near(&down, surface, arc_length).ok_or_else(unreachable)?;
        let column = surface.local_offset(&down.point_at(s_down), &up.point_at(s_up)) / (2.0 * h);
        jacobian.set_column(j, &column);
    }

    Ok(Linearisation {
        residual,
        jacobian,
        arc_length,
    })
}

/// Transports `state` to the crossing with `surface` nearest `hit` and applies
/// the surface material.
pub fn predict(
    ctx: &FitContext<'_>,
    state: &TrackState,
    surface: &Surface,
    hit: &Hit,
) -> Result<TrackState, FitError> {
    let helix = state.helix();
    let s_hint = helix.arc_length_to_pca(&hit.position);
    let s = crossing_near(&helix, surface, s_hint)
        .ok_or(FitError::SurfaceUnreachable(surface.element_id))?;

    let mut predicted = propagation::transport(state, &helix.point_at(s), s)
        .with_location(StateLocation::AtSurface(surface.element_id));
    material::apply(&mut predicted, surface, ctx.bz, ctx.direction, ctx.material)?;
    Ok(predicted)
}

/// Updates a predicted state with `hit`.
pub fn update(predicted: &TrackState, surface: &Surface, hit: &Hit) -> Result<FilterStep, FitError> {
    let lin = linearise(&predicted.helix(), surface, hit, 0.0)?;
    let v = hit.local_covariance(surface);
    let c = &predicted.covariance;
    let h = &lin.jacobian;

    // S = V + H C Hᵀ
    let s = v + h * c * h.transpose();
    let s_chol = s
        .cholesky()
        .ok_or_else(|| FitError::diverged(format!("singular innovation covariance at hit {}", hit.id)))?;
    let s_inv = s_chol.inverse();

    // K = C Hᵀ S⁻¹
    let gain = c * h.transpose() * s_inv;
    let chi2 = (lin.residual.transpose() * s_inv * lin.residual)[(0, 0)];

    let mut params = predicted.params + gain * lin.residual;
    params[PHI] = wrap_angle(params[PHI]);

    // Joseph form: C' = (I - KH) C (I - KH)ᵀ + K V Kᵀ
    let ikh = Matrix5::identity() - gain * h;
    let covariance = symmetrize(&(ikh * c * ikh.transpose() + gain * v * gain.transpose()));
    if !is_positive_semidefinite(&covariance) {
        error!(hit = %hit.id, "updated covariance is not positive semidefinite");
        return Err(FitError::CovarianceNotPositive);
    }

    Ok(FilterStep {
        state: TrackState {
            params,
            covariance,
            reference_point: predicted.reference_point,
            location: StateLocation::AtHit(hit.id),
        },
        chi2_increment: chi2,
    })
}

/// One full filter step: locate the surface, predict, update.
pub fn filter_step(ctx: &FitContext<'_>, state: &TrackState, hit: &Hit) -> Result<FilterStep, FitError> {
    let surface = ctx.registry.find_surface(hit.element_id, &hit.position)?;
    let predicted = predict(ctx, state, surface, hit)?;
    let step = update(&predicted, surface, hit)?;

    if !step.chi2_increment.is_finite() || !step.state.is_finite() {
        return Err(FitError::diverged(format!("non-finite update at hit {}", hit.id)));
    }
    Ok(step)
}

/// Sequential Kalman filter.
#[derive(Debug, Clone, Copy, Default)]
pub struct KalmanEstimator;

impl TrackEstimator for KalmanEstimator {
    fn kind(&self) -> EstimatorKind {
        EstimatorKind::Kalman
    }

    fn fit(
        &self,
        ctx: &FitContext<'_>,
        seed: &TrackState,
        hits: &[Arc<Hit>],
    ) -> Result<FitOutcome, FitError> {
        let mut state = seed.clone();
        let mut chi2 = 0.0;
        let mut sites = Vec::with_capacity(hits.len());

        for (k, hit) in hits.iter().enumerate() {
            let step = filter_step(ctx, &state, hit)?;
            chi2 += step.chi2_increment;
            state = step.state;

            debug!(
                hit = %hit.id,
                element = %hit.element_id,
                chi2_increment = step.chi2_increment,
                chi2,
                "filtered hit"
            );

            sites.push(HitSite {
                hit_id: hit.id,
                state: state.clone(),
                chi2,
                ndf: ndf_for(k + 1),
            });
        }

        Ok(FitOutcome {
            sites,
            chi2,
            ndf: ndf_for(hits.len()),
        })
    }
}
