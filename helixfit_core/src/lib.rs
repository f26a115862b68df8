//! HelixFit Core - Incremental Track Fitting for Particle Detectors
//!
//! Turns a set of detector hits into a fitted helical trajectory and answers
//! questions about it:
//! 1. **Fit**: Kalman filter or global χ² over the hits, with multiple
//!    scattering and energy loss at each sensitive surface
//! 2. **Grow**: add hits one at a time, gated on their χ² increment
//! 3. **Transport**: move the fitted state to a point or onto a layer,
//!    with full covariance propagation
//!
//! # Architecture
//!
//! A [`TrackingSystem`] holds the detector context and the fitter
//! configuration and creates [`FitSession`]s, one per track candidate.
//! Every session operation returns `Result<_, FitError>`; the error maps
//! onto the coarse [`Status`] vocabulary (success, error, bad inputs,
//! no intersection).

pub mod error;
pub mod estimator;
pub mod global_fit;
pub mod helix;
pub mod hit;
pub mod intersection;
pub mod kalman;
pub mod material;
pub mod propagation;
pub mod session;
pub mod system;
pub mod track_state;
pub mod types;

// Re-export key types for convenience
pub use error::{FitError, Status};
pub use estimator::{EstimatorKind, FitContext, FitOutcome, GlobalChi2Estimator, HitSite, KalmanEstimator, TrackEstimator};
pub use helix::{Helix, TrackCovariance, TrackParams};
pub use hit::{Hit, HitId, HitUncertainty};
pub use intersection::LayerIntersection;
pub use material::MaterialOptions;
pub use session::{FitSession, FittedState, LayerState, MIN_HITS};
pub use system::{FitterConfig, TrackingSystem};
pub use track_state::{StateLocation, TrackState};
pub use types::{CrossingMode, FitDirection, FitStatus};
