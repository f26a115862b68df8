//! The estimator seam: how a set of hits becomes a fitted track.
//!
//! Two estimators implement [`TrackEstimator`]:
//! - [`KalmanEstimator`]: sequential filtering, one hit at a time, with
//!   material effects between hits
//! - [`GlobalChi2Estimator`]: Gauss-Newton minimisation of the total χ²
//!   over all hits at once
//!
//! Both accept single-hit updates through [`TrackEstimator::add_measurement`],
//! which always runs one Kalman step.

use helixfit_geom::SurfaceRegistry;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;

use crate::error::FitError;
use crate::hit::{Hit, HitId};
use crate::kalman;
use crate::material::MaterialOptions;
use crate::track_state::TrackState;
use crate::types::FitDirection;

pub use crate::global_fit::GlobalChi2Estimator;
pub use crate::kalman::KalmanEstimator;

/// Degrees of freedom of a fit over `hits` two-dimensional measurements.
pub fn ndf_for(hits: usize) -> i32 {
    2 * hits as i32 - 5
}

/// Everything an estimator needs besides the seed and the hits.
#[derive(Debug, Clone, Copy)]
pub struct FitContext<'a> {
    pub registry: &'a SurfaceRegistry,

    /// Field (T) used for momentum-dependent effects
    pub bz: f64,

    pub direction: FitDirection,

    pub material: MaterialOptions,

    /// Iteration cap for iterative estimators
    pub max_iterations: usize,

    /// Relative χ² change below which an iterative estimator has converged
    pub convergence_tolerance: f64,
}

/// The fitted state at one hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HitSite {
    pub hit_id: HitId,
    pub state: TrackState,
    pub chi2: f64,
    pub ndf: i32,
}

/// Result of fitting a full set of hits.
#[derive(Debug, Clone, PartialEq)]
pub struct FitOutcome {
    /// One site per hit, in processing order
    pub sites: Vec<HitSite>,
    pub chi2: f64,
    pub ndf: i32,
}

impl FitOutcome {
    /// The state after the last processed hit.
    pub fn final_state(&self) -> Option<&TrackState> {
        self.sites.last().map(|site| &site.state)
    }
}

/// Result of adding one measurement to a track.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterStep {
    /// Updated state on the hit's surface
    pub state: TrackState,

    /// χ² contribution of the hit
    pub chi2_increment: f64,
}

/// A track estimator.
pub trait TrackEstimator: Send + Sync + std::fmt::Debug {
    /// Which estimator this is.
    fn kind(&self) -> EstimatorKind;

    /// Fits `hits`, given in processing order, starting from `seed`.
    fn fit(
        &self,
        ctx: &FitContext<'_>,
        seed: &TrackState,
        hits: &[Arc<Hit>],
    ) -> Result<FitOutcome, FitError>;

    /// Adds a single measurement to `current`.
    fn add_measurement(
        &self,
        ctx: &FitContext<'_>,
        current: &TrackState,
        hit: &Hit,
    ) -> Result<FilterStep, FitError> {
        kalman::filter_step(ctx, current, hit)
    }
}

/// Available estimators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimatorKind {
    #[default]
    Kalman,
    GlobalChi2,
}

impl EstimatorKind {
    pub fn all() -> Vec<EstimatorKind> {
        vec![EstimatorKind::Kalman, EstimatorKind::GlobalChi2]
    }

    pub fn name(&self) -> &'static str {
        match self {
            EstimatorKind::Kalman => "kalman",
            EstimatorKind::GlobalChi2 => "global_chi2",
        }
    }

    /// Creates the estimator.
    pub fn build(self) -> Box<dyn TrackEstimator> {
        match self {
            EstimatorKind::Kalman => Box::new(KalmanEstimator),
            EstimatorKind::GlobalChi2 => Box::new(GlobalChi2Estimator),
        }
    }
}

impl std::fmt::Display for EstimatorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for EstimatorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "kalman" | "kf" => Ok(EstimatorKind::Kalman),
            "global_chi2" | "global" | "chi2" => Ok(EstimatorKind::GlobalChi2),
            _ => Err(format!("Unknown estimator: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimator_kind_parsing() {
        for kind in EstimatorKind::all() {
            assert_eq!(kind.name().parse::<EstimatorKind>().unwrap(), kind);
            assert_eq!(kind.build().kind(), kind);
        }
        assert_eq!("KF".parse::<EstimatorKind>().unwrap(), EstimatorKind::Kalman);
        assert!("daf".parse::<EstimatorKind>().is_err());
    }

    #[test]
    fn test_ndf() {
        assert_eq!(ndf_for(3), 1);
        assert_eq!(ndf_for(5), 5);
        assert_eq!(ndf_for(1), -3);
    }
}
