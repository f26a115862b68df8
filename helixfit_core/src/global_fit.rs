//! Global χ² fit: Gauss-Newton over all hits at once.
//!
//! Parameters are kept at the seed's reference point. Each iteration
//! linearises every hit around the current helix, solves the normal
//! equations (Σ HᵀWH) Δ = Σ HᵀW r and steps. The fit has converged when the
//! total χ² stops changing; the covariance is the inverse normal matrix.
//! Material effects are not modelled.

use helixfit_geom::{wrap_angle, Surface};
use nalgebra::{Matrix2, Matrix5, Vector5};
use std::sync::Arc;
use tracing::debug;

use crate::error::FitError;
use crate::estimator::{ndf_for, EstimatorKind, FitContext, FitOutcome, HitSite, TrackEstimator};
use crate::helix::{Helix, PHI};
use crate::hit::Hit;
use crate::kalman::linearise;
use crate::propagation;
use crate::track_state::{symmetrize, StateLocation, TrackState};

/// Iterative least-squares estimator.
#[derive(Debug, Clone, Copy, Default)]
pub struct GlobalChi2Estimator;

impl GlobalChi2Estimator {
    fn weight(hit: &Hit, surface: &Surface) -> Result<Matrix2<f64>, FitError> {
        hit.local_covariance(surface)
            .cholesky()
            .map(|chol| chol.inverse())
            .ok_or_else(|| FitError::diverged(format!("singular measurement covariance for hit {}", hit.id)))
    }
}

impl TrackEstimator for GlobalChi2Estimator {
    fn kind(&self) -> EstimatorKind {
        EstimatorKind::GlobalChi2
    }

    fn fit(
        &self,
        ctx: &FitContext<'_>,
        seed: &TrackState,
        hits: &[Arc<Hit>],
    ) -> Result<FitOutcome, FitError> {
        let surfaces = hits
            .iter()
            .map(|hit| ctx.registry.find_surface(hit.element_id, &hit.position))
            .collect::<Result<Vec<_>, _>>()?;
        let weights = hits
            .iter()
            .zip(&surfaces)
            .map(|(hit, surface)| Self::weight(hit, surface))
            .collect::<Result<Vec<_>, _>>()?;

        let reference = seed.reference_point;
        let mut params = seed.params;
        let seed_helix = seed.helix();
        let mut hints: Vec<f64> = hits
            .iter()
            .map(|hit| seed_helix.arc_length_to_pca(&hit.position))
            .collect();
        let mut previous_chi2: Option<f64> = None;

        for iteration in 0..ctx.max_iterations {
            let helix = Helix::new(params, reference);
            let mut normal = Matrix5::zeros();
            let mut gradient = Vector5::zeros();
            let mut chi2 = 0.0;

            for (i, hit) in hits.iter().enumerate() {
                let lin = linearise(&helix, surfaces[i], hit, hints[i])?;
                let ht_w = lin.jacobian.transpose() * weights[i];
                normal += ht_w * lin.jacobian;
                gradient += ht_w * lin.residual;
                chi2 += (lin.residual.transpose() * weights[i] * lin.residual)[(0, 0)];
                hints[i] = lin.arc_length;
            }

            if !chi2.is_finite() {
                return Err(FitError::diverged("non-finite chi2 in global fit"));
            }

            let chol = normal
                .cholesky()
                .ok_or_else(|| FitError::diverged("singular normal matrix in global fit"))?;

            let converged = previous_chi2
                .map(|prev| (prev - chi2).abs() <= ctx.convergence_tolerance * chi2.max(1.0))
                .unwrap_or(false);
            debug!(iteration, chi2, converged, "global fit iteration");

            if converged {
                let fitted = TrackState::new(params, symmetrize(&chol.inverse()), reference);
                let ndf = ndf_for(hits.len());
                let sites = hits
                    .iter()
                    .zip(&hints)
                    .map(|(hit, &s)| {
                        let point = helix.point_at(s);
                        HitSite {
                            hit_id: hit.id,
                            state: propagation::transport(&fitted, &point, s)
                                .with_location(StateLocation::AtHit(hit.id)),
                            chi2,
                            ndf,
                        }
                    })
                    .collect();
                return Ok(FitOutcome { sites, chi2, ndf });
            }

            previous_chi2 = Some(chi2);
            params += chol.solve(&gradient);
            params[PHI] = wrap_angle(params[PHI]);
        }

        Err(FitError::diverged(format!(
            "global fit did not converge in {} iterations",
            ctx.max_iterations
        )))
    }
}
