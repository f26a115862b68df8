//! Fit sessions: one track candidate, from hits to a fitted trajectory.
//!
//! A session moves through four states:
//! - **Uninitialised**: hits may be added, nothing can be queried
//! - **Initialised**: a seed exists (from the hits or supplied by the caller)
//! - **Fitted**: a fitted state is available for queries and transport
//! - **Failed**: the last fit failed; re-initialise or fit again
//!
//! Transport comes in two flavours: `propagate*` replaces the session's
//! current state with the result, `extrapolate*` leaves it untouched.

use helixfit_geom::{DetectorContext, ElementId, LayerId};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::FitError;
use crate::estimator::{ndf_for, EstimatorKind, FitContext, HitSite, TrackEstimator};
use crate::helix::{Helix, TrackCovariance, TrackParams};
use crate::hit::{Hit, HitId};
use crate::intersection::{intersect_layer, LayerIntersection};
use crate::propagation;
use crate::system::FitterConfig;
use crate::track_state::{is_positive_semidefinite, StateLocation, TrackState};
use crate::types::{CrossingMode, FitDirection, FitStatus};

/// Fewest hits from which a seed can be built and a fit run.
pub const MIN_HITS: usize = 3;

/// A track state with the fit quality it carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedState {
    pub state: TrackState,
    pub chi2: f64,
    pub ndf: i32,
}

/// A track state on a layer, with the element that was crossed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerState {
    pub state: TrackState,
    pub chi2: f64,
    pub ndf: i32,
    pub element_id: ElementId,
}

#[derive(Debug, Clone)]
struct Seed {
    state: TrackState,
    bz: f64,
}

/// One track candidate being fitted.
pub struct FitSession {
    context: Arc<dyn DetectorContext>,
    estimator: Box<dyn TrackEstimator>,
    config: FitterConfig,

    /// Hits in insertion order
    hits: Vec<Arc<Hit>>,

    status: FitStatus,
    direction: FitDirection,
    seed: Option<Seed>,

    /// The state queries and transports start from
    current: Option<TrackState>,
    chi2: f64,
    ndf: i32,

    /// Fitted state at each hit that entered the fit
    sites: HashMap<HitId, HitSite>,
}

impl FitSession {
    pub fn new(
        context: Arc<dyn DetectorContext>,
        estimator: Box<dyn TrackEstimator>,
        config: FitterConfig,
    ) -> Self {
        Self {
            context,
            estimator,
            config,
            hits: Vec::new(),
            status: FitStatus::Uninitialised,
            direction: FitDirection::Forward,
            seed: None,
            current: None,
            chi2: 0.0,
            ndf: 0,
            sites: HashMap::new(),
        }
    }

    pub fn status(&self) -> FitStatus {
        self.status
    }

    pub fn direction(&self) -> FitDirection {
        self.direction
    }

    /// Hits in insertion order.
    pub fn hits(&self) -> &[Arc<Hit>] {
        &self.hits
    }

    pub fn estimator_kind(&self) -> EstimatorKind {
        self.estimator.kind()
    }

    pub fn config(&self) -> &FitterConfig {
        &self.config
    }

    // ========================================================================
    // BUILDING THE FIT
    // ========================================================================

    /// Adds a hit. Allowed in any state; the hit enters the next full fit.
    pub fn add_hit(&mut self, hit: Arc<Hit>) -> Result<(), FitError> {
        self.check_new_hit(&hit)?;
        self.hits.push(hit);
        Ok(())
    }

    /// Builds a seed from the hits and prepares a fit in `direction`.
    ///
    /// The seed is the helix through the first, middle and last hit in
    /// insertion order, placed at the first hit in processing order.
    pub fn initialise(&mut self, direction: FitDirection) -> Result<(), FitError> {
        let n = self.hits.len();
        if n < MIN_HITS {
            return Err(FitError::TooFewHits {
                found: n,
                required: MIN_HITS,
            });
        }

        let first = self.hits[0].position;
        let middle = self.hits[n / 2].position;
        let last = self.hits[n - 1].position;
        let (helix, s_last) =
            Helix::through_three_points(&first, &middle, &last).ok_or(FitError::DegenerateHits)?;

        let (start, s_hint) = match direction {
            FitDirection::Forward => (first, 0.0),
            FitDirection::Backward => (last, s_last),
        };
        let (pivoted, _) = helix.repivot(&start, s_hint);
        let covariance =
            TrackCovariance::from_diagonal(&TrackParams::from_column_slice(&self.config.seed_covariance));
        if !is_positive_semidefinite(&covariance) {
            return Err(FitError::invalid_seed(format!(
                "configured seed covariance {:?} is not positive semidefinite",
                self.config.seed_covariance
            )));
        }

        let state = TrackState::new(pivoted.params, covariance, start).with_location(StateLocation::Seed);
        let bz = self.context.bz_at(&start);

        debug!(
            hits = n,
            omega = state.omega(),
            tan_lambda = state.tan_lambda(),
            %direction,
            "Seeded from hits"
        );
        self.start(Seed { state, bz }, direction);
        Ok(())
    }

    /// Prepares a fit from a caller-supplied seed state and field.
    pub fn initialise_with_state(
        &mut self,
        seed: TrackState,
        bz: f64,
        direction: FitDirection,
    ) -> Result<(), FitError> {
        if !seed.is_finite() {
            return Err(FitError::invalid_seed("non-finite parameters or covariance"));
        }
        if !bz.is_finite() {
            return Err(FitError::invalid_seed(format!("field {bz}")));
        }
        if !is_positive_semidefinite(&seed.covariance) {
            return Err(FitError::invalid_seed("covariance is not positive semidefinite"));
        }

        let state = seed.with_location(StateLocation::Seed);
        self.start(Seed { state, bz }, direction);
        Ok(())
    }

    /// Fits all hits from the stored seed.
    pub fn fit(&mut self) -> Result<FittedState, FitError> {
        let seed = self.seed.clone().ok_or(FitError::NotInitialised)?;
        if self.hits.len() < MIN_HITS {
            self.fail();
            return Err(FitError::TooFewHits {
                found: self.hits.len(),
                required: MIN_HITS,
            });
        }

        let hits = self.ordered_hits();
        let ctx = FitContext {
            registry: self.context.surface_registry(),
            bz: seed.bz,
            direction: self.direction,
            material: self.config.material(),
            max_iterations: self.config.max_iterations,
            convergence_tolerance: self.config.convergence_tolerance,
        };

        let outcome = match self.estimator.fit(&ctx, &seed.state, &hits) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, hits = hits.len(), "Fit failed");
                self.fail();
                return Err(e);
            }
        };

        let Some(final_state) = outcome.final_state().cloned() else {
            self.fail();
            return Err(FitError::diverged("estimator returned no states"));
        };

        self.sites = outcome
            .sites
            .into_iter()
            .map(|site| (site.hit_id, site))
            .collect();
        self.current = Some(final_state.clone());
        self.chi2 = outcome.chi2;
        self.ndf = outcome.ndf;
        self.status = FitStatus::Fitted;

        info!(
            hits = hits.len(),
            chi2 = self.chi2,
            ndf = self.ndf,
            estimator = %self.estimator.kind(),
            "Track fitted"
        );

        Ok(FittedState {
            state: final_state,
            chi2: self.chi2,
            ndf: self.ndf,
        })
    }

    /// Filters one more hit into the track, if its χ² increment is at most `max_chi2`.
    ///
    /// Returns the χ² increment in both cases. A rejected hit leaves the
    /// session unchanged; an accepted one becomes part of the track. On an
    /// initialised session the first accepted hit produces a fitted track.
    ///
    /// Hits added to an initialised session before this call are fitted
    /// first, exactly as [`fit`](Self::fit) would, and the new hit is gated
    /// against that result. A failure of that fit is returned as is.
    pub fn add_and_fit(&mut self, hit: Arc<Hit>, max_chi2: f64) -> Result<f64, FitError> {
        self.check_new_hit(&hit)?;
        if self.seed.is_none() {
            return Err(FitError::NotInitialised);
        }
        if self.status == FitStatus::Initialised && !self.hits.is_empty() {
            debug!(pending = self.hits.len(), "Fitting pending hits before gating");
            self.fit()?;
        }

        let (start, bz) = match (self.status, &self.seed, &self.current) {
            (FitStatus::Uninitialised, _, _) | (_, None, _) => return Err(FitError::NotInitialised),
            (FitStatus::Initialised, Some(seed), _) => (seed.state.clone(), seed.bz),
            (FitStatus::Fitted, Some(seed), Some(current)) => (current.clone(), seed.bz),
            _ => return Err(FitError::NotFitted),
        };

        let ctx = FitContext {
            registry: self.context.surface_registry(),
            bz,
            direction: self.direction,
            material: self.config.material(),
            max_iterations: self.config.max_iterations,
            convergence_tolerance: self.config.convergence_tolerance,
        };
        let step = self.estimator.add_measurement(&ctx, &start, &hit)?;
        let increment = step.chi2_increment;

        if increment > max_chi2 {
            debug!(hit = %hit.id, chi2_increment = increment, max_chi2, "Hit rejected");
            return Ok(increment);
        }

        self.chi2 += increment;
        self.ndf = ndf_for(self.sites.len() + 1);
        self.sites.insert(
            hit.id,
            HitSite {
                hit_id: hit.id,
                state: step.state.clone(),
                chi2: self.chi2,
                ndf: self.ndf,
            },
        );
        debug!(hit = %hit.id, chi2_increment = increment, chi2 = self.chi2, "Hit accepted");

        self.hits.push(hit);
        self.current = Some(step.state);
        self.status = FitStatus::Fitted;
        Ok(increment)
    }

    // ========================================================================
    // QUERIES
    // ========================================================================

    /// The current fitted state.
    pub fn track_state(&self) -> Result<FittedState, FitError> {
        let state = self.fitted_state()?;
        Ok(FittedState {
            state: state.clone(),
            chi2: self.chi2,
            ndf: self.ndf,
        })
    }

    /// The fitted state at a hit that took part in the fit.
    pub fn track_state_at(&self, hit: &Hit) -> Result<FittedState, FitError> {
        let site = self.site(hit)?;
        Ok(FittedState {
            state: site.state.clone(),
            chi2: site.chi2,
            ndf: site.ndf,
        })
    }

    // ========================================================================
    // TRANSPORT TO A POINT
    // ========================================================================

    /// Moves the current state to the point of closest approach to `point`.
    pub fn propagate(&mut self, point: &Vector3<f64>) -> Result<FittedState, FitError> {
        let result = self.extrapolate(point)?;
        self.current = Some(result.state.clone());
        Ok(result)
    }

    /// Moves the state at `hit` to `point` and makes it the current state.
    pub fn propagate_from_hit(
        &mut self,
        point: &Vector3<f64>,
        hit: &Hit,
    ) -> Result<FittedState, FitError> {
        let result = self.extrapolate_from_hit(point, hit)?;
        self.current = Some(result.state.clone());
        Ok(result)
    }

    /// The current state at the point of closest approach to `point`.
    pub fn extrapolate(&self, point: &Vector3<f64>) -> Result<FittedState, FitError> {
        let start = self.fitted_state()?;
        Ok(FittedState {
            state: propagation::to_point(start, point),
            chi2: self.chi2,
            ndf: self.ndf,
        })
    }

    /// The state at `hit` moved to the point of closest approach to `point`.
    pub fn extrapolate_from_hit(
        &self,
        point: &Vector3<f64>,
        hit: &Hit,
    ) -> Result<FittedState, FitError> {
        let site = self.site(hit)?;
        Ok(FittedState {
            state: propagation::to_point(&site.state, point),
            chi2: site.chi2,
            ndf: site.ndf,
        })
    }

    // ========================================================================
    // TRANSPORT TO A LAYER
    // ========================================================================

    /// Moves the current state onto a layer and makes the result current.
    pub fn propagate_to_layer(
        &mut self,
        layer: LayerId,
        mode: CrossingMode,
    ) -> Result<LayerState, FitError> {
        let result = self.extrapolate_to_layer(layer, mode)?;
        self.current = Some(result.state.clone());
        Ok(result)
    }

    /// Moves the state at `hit` onto a layer and makes the result current.
    pub fn propagate_to_layer_from_hit(
        &mut self,
        layer: LayerId,
        hit: &Hit,
        mode: CrossingMode,
    ) -> Result<LayerState, FitError> {
        let result = self.extrapolate_to_layer_from_hit(layer, hit, mode)?;
        self.current = Some(result.state.clone());
        Ok(result)
    }

    /// The current state on a layer.
    pub fn extrapolate_to_layer(
        &self,
        layer: LayerId,
        mode: CrossingMode,
    ) -> Result<LayerState, FitError> {
        let start = self.fitted_state()?;
        self.to_layer(start, self.chi2, self.ndf, layer, mode)
    }

    /// The state at `hit` on a layer.
    pub fn extrapolate_to_layer_from_hit(
        &self,
        layer: LayerId,
        hit: &Hit,
        mode: CrossingMode,
    ) -> Result<LayerState, FitError> {
        let site = self.site(hit)?;
        self.to_layer(&site.state, site.chi2, site.ndf, layer, mode)
    }

    /// Where the current trajectory crosses a layer.
    pub fn intersection_with_layer(
        &self,
        layer: LayerId,
        mode: CrossingMode,
    ) -> Result<LayerIntersection, FitError> {
        let start = self.fitted_state()?;
        self.crossing(start, layer, mode)
    }

    /// Where the trajectory from `hit` crosses a layer.
    pub fn intersection_with_layer_from_hit(
        &self,
        layer: LayerId,
        hit: &Hit,
        mode: CrossingMode,
    ) -> Result<LayerIntersection, FitError> {
        let site = self.site(hit)?;
        self.crossing(&site.state, layer, mode)
    }

    // ========== Private Helper Methods ==========

    fn check_new_hit(&self, hit: &Hit) -> Result<(), FitError> {
        if self.hits.iter().any(|h| h.id == hit.id) {
            return Err(FitError::DuplicateHit(hit.id));
        }
        self.context
            .surface_registry()
            .find_surface(hit.element_id, &hit.position)?;
        Ok(())
    }

    fn start(&mut self, seed: Seed, direction: FitDirection) {
        self.seed = Some(seed);
        self.direction = direction;
        self.status = FitStatus::Initialised;
        self.current = None;
        self.chi2 = 0.0;
        self.ndf = 0;
        self.sites.clear();
    }

    fn fail(&mut self) {
        self.status = FitStatus::Failed;
        self.current = None;
        self.sites.clear();
    }

    fn ordered_hits(&self) -> Vec<Arc<Hit>> {
        match self.direction {
            FitDirection::Forward => self.hits.clone(),
            FitDirection::Backward => self.hits.iter().rev().cloned().collect(),
        }
    }

    fn fitted_state(&self) -> Result<&TrackState, FitError> {
        if self.status != FitStatus::Fitted {
            return Err(FitError::NotFitted);
        }
        self.current.as_ref().ok_or(FitError::NotFitted)
    }

    fn site(&self, hit: &Hit) -> Result<&HitSite, FitError> {
        self.fitted_state()?;
        self.sites.get(&hit.id).ok_or(FitError::UnknownHit(hit.id))
    }

    fn crossing(
        &self,
        start: &TrackState,
        layer: LayerId,
        mode: CrossingMode,
    ) -> Result<LayerIntersection, FitError> {
        let surfaces = self.context.surface_registry().layer(layer)?;
        intersect_layer(&start.helix(), &surfaces, mode, self.direction)
            .ok_or(FitError::NoIntersection { layer, mode })
    }

    fn to_layer(
        &self,
        start: &TrackState,
        chi2: f64,
        ndf: i32,
        layer: LayerId,
        mode: CrossingMode,
    ) -> Result<LayerState, FitError> {
        let crossing = self.crossing(start, layer, mode)?;
        Ok(LayerState {
            state: propagation::to_crossing(start, &crossing),
            chi2,
            ndf,
            element_id: crossing.element_id,
        })
    }
}

impl std::fmt::Debug for FitSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FitSession")
            .field("detector", &self.context.name())
            .field("estimator", &self.estimator.kind())
            .field("status", &self.status)
            .field("direction", &self.direction)
            .field("hits", &self.hits.len())
            .field("chi2", &self.chi2)
            .field("ndf", &self.ndf)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Status;
    use crate::intersection::surface_crossings;
    use crate::system::TrackingSystem;
    use approx::assert_relative_eq;
    use helixfit_geom::{Detector, Material, Surface, SurfaceRegistry, UniformField};

    const BZ: f64 = 3.5;
    const RADII: [f64; 6] = [30.0, 60.0, 100.0, 150.0, 200.0, 300.0];

    fn detector() -> Arc<Detector> {
        let registry = SurfaceRegistry::from_surfaces(RADII.iter().enumerate().map(|(i, &r)| {
            let layer = LayerId(i as i32 + 1);
            Surface::cylinder(layer, ElementId::encode(layer, 0), r, 500.0, 0.0, Material::silicon(0.3))
                .unwrap()
        }));
        Detector::new("barrel", registry, UniformField::new(BZ)).shared()
    }

    fn system(material: bool) -> TrackingSystem {
        let mut system = TrackingSystem::with_defaults(detector());
        system.include_multiple_scattering(material);
        system.include_energy_loss(material);
        system
    }

    fn truth() -> Helix {
        let omega = Helix::omega_for(1.0, 1.0, BZ);
        Helix::from_components(0.0, 0.3, omega, 0.0, 0.2, Vector3::zeros())
    }

    /// Hits on the first five layers, displaced in z by a few microns.
    fn hits() -> Vec<Arc<Hit>> {
        let truth = truth();
        let detector = detector();
        let wiggle = [0.006, -0.004, 0.009, -0.007, 0.002];
        (0..5)
            .map(|i| {
                let layer = LayerId(i as i32 + 1);
                let surface = detector.surface_registry().layer(layer).unwrap()[0].clone();
                let s = surface_crossings(&truth, &surface)
                    .into_iter()
                    .filter(|s| *s > 0.0)
                    .fold(f64::INFINITY, f64::min);
                Arc::new(Hit::new(
                    HitId::from_seed(i as u64 + 1),
                    truth.point_at(s) + Vector3::new(0.0, 0.0, wiggle[i]),
                    surface.element_id,
                    0.01,
                    0.01,
                ))
            })
            .collect()
    }

    fn fitted_session(material: bool) -> (FitSession, Vec<Arc<Hit>>) {
        let mut session = system(material).create_session();
        let hits = hits();
        for hit in &hits {
            session.add_hit(hit.clone()).unwrap();
        }
        session.initialise(FitDirection::Forward).unwrap();
        session.fit().unwrap();
        (session, hits)
    }

    #[test]
    fn test_five_hit_fit() {
        let (session, hits) = fitted_session(true);
        assert_eq!(session.status(), FitStatus::Fitted);

        let fitted = session.track_state().unwrap();
        assert_eq!(fitted.ndf, 5);
        assert!(fitted.chi2.is_finite() && fitted.chi2 >= 0.0);
        assert!(is_positive_semidefinite(&fitted.state.covariance));

        let pt = fitted.state.helix().transverse_momentum(BZ).unwrap();
        assert_relative_eq!(pt, 1.0, epsilon = 0.05);

        for (k, hit) in hits.iter().enumerate() {
            let at_hit = session.track_state_at(hit).unwrap();
            assert_eq!(at_hit.ndf, ndf_for(k + 1));
            assert_eq!(at_hit.state.location, StateLocation::AtHit(hit.id));
        }
    }

    #[test]
    fn test_global_chi2_session() {
        let mut system = system(false);
        system.use_estimator(EstimatorKind::GlobalChi2);
        let mut session = system.create_session();
        for hit in hits() {
            session.add_hit(hit).unwrap();
        }
        session.initialise(FitDirection::Forward).unwrap();
        let fitted = session.fit().unwrap();
        assert_eq!(fitted.ndf, 5);
        assert_relative_eq!(fitted.state.omega(), truth().omega(), epsilon = 1e-5);
    }

    #[test]
    fn test_queries_before_fit_fail() {
        let mut session = system(true).create_session();
        let hits = hits();
        let origin = Vector3::zeros();

        assert_eq!(session.track_state().unwrap_err(), FitError::NotFitted);
        assert_eq!(Status::of(&session.track_state_at(&hits[0])), Status::Error);
        assert_eq!(Status::of(&session.extrapolate(&origin)), Status::Error);
        assert_eq!(Status::of(&session.propagate(&origin)), Status::Error);
        assert_eq!(
            Status::of(&session.extrapolate_to_layer(LayerId(1), CrossingMode::Forward)),
            Status::Error
        );
        assert_eq!(
            Status::of(&session.intersection_with_layer(LayerId(1), CrossingMode::Closest)),
            Status::Error
        );
        assert_eq!(Status::of(&session.fit()), Status::Error);

        // Unseeded add_and_fit is an error and changes nothing
        let err = session.add_and_fit(hits[0].clone(), f64::INFINITY).unwrap_err();
        assert_eq!(err, FitError::NotInitialised);
        assert!(session.hits().is_empty());
        assert_eq!(session.status(), FitStatus::Uninitialised);
    }

    #[test]
    fn test_too_few_hits_and_bad_inputs() {
        let mut session = system(true).create_session();
        let hits = hits();
        session.add_hit(hits[0].clone()).unwrap();
        session.add_hit(hits[1].clone()).unwrap();

        let err = session.initialise(FitDirection::Forward).unwrap_err();
        assert_eq!(err, FitError::TooFewHits { found: 2, required: 3 });
        assert_eq!(err.status(), Status::Error);

        let err = session.add_hit(hits[0].clone()).unwrap_err();
        assert_eq!(err.status(), Status::BadInputs);

        let stray = Hit::new(HitId::new(), Vector3::new(1.0, 2.0, 3.0), ElementId(99_999), 0.01, 0.01);
        let err = session.add_hit(Arc::new(stray)).unwrap_err();
        assert_eq!(err, FitError::UnknownElement(ElementId(99_999)));
    }

    #[test]
    fn test_unknown_layer_and_hit() {
        let (session, _) = fitted_session(true);
        let err = session.extrapolate_to_layer(LayerId(42), CrossingMode::Forward).unwrap_err();
        assert_eq!(err.status(), Status::BadInputs);

        let outsider = Hit::new(HitId::new(), Vector3::new(30.0, 0.0, 0.0), ElementId(1000), 0.01, 0.01);
        let err = session.track_state_at(&outsider).unwrap_err();
        assert_eq!(err, FitError::UnknownHit(outsider.id));
        assert_eq!(err.status(), Status::BadInputs);
    }

    #[test]
    fn test_gating_thresholds() {
        let (session, hits) = fitted_session(true);
        let extra_layer = LayerId(6);
        let crossing = session
            .intersection_with_layer(extra_layer, CrossingMode::Forward)
            .unwrap();
        let extra = Arc::new(Hit::new(
            HitId::from_seed(100),
            crossing.point + Vector3::new(0.0, 0.0, 0.02),
            crossing.element_id,
            0.01,
            0.01,
        ));

        // Threshold 0: rejected, session untouched
        let mut strict = session;
        let before = strict.track_state().unwrap();
        let chi2 = strict.add_and_fit(extra.clone(), 0.0).unwrap();
        assert!(chi2 > 0.0);
        assert_eq!(strict.track_state().unwrap(), before);
        assert_eq!(strict.hits().len(), hits.len());
        assert!(strict.track_state_at(&extra).is_err());

        // Threshold ∞: accepted
        let accepted = strict.add_and_fit(extra.clone(), f64::INFINITY).unwrap();
        assert_relative_eq!(accepted, chi2, epsilon = 1e-9);
        let after = strict.track_state().unwrap();
        assert_eq!(after.ndf, 7);
        assert_relative_eq!(after.chi2, before.chi2 + chi2, epsilon = 1e-9);
        assert_eq!(strict.hits().len(), hits.len() + 1);
        assert!(strict.track_state_at(&extra).is_ok());
    }

    #[test]
    fn test_add_and_fit_from_seed() {
        let mut session = system(true).create_session();
        let hits = hits();
        let truth = truth();
        let seed = TrackState::new(
            truth.params,
            TrackCovariance::from_diagonal(&TrackParams::new(1.0, 1e-3, 1e-8, 1.0, 1e-3)),
            Vector3::zeros(),
        );
        session.initialise_with_state(seed, BZ, FitDirection::Forward).unwrap();
        assert_eq!(session.status(), FitStatus::Initialised);

        for hit in &hits {
            session.add_and_fit(hit.clone(), f64::INFINITY).unwrap();
        }
        assert_eq!(session.status(), FitStatus::Fitted);
        assert_eq!(session.track_state().unwrap().ndf, 5);
    }

    #[test]
    fn test_add_and_fit_fits_pending_hits() {
        let hits = hits();
        let seeded = || {
            let mut session = system(true).create_session();
            for hit in &hits[..4] {
                session.add_hit(hit.clone()).unwrap();
            }
            session.initialise(FitDirection::Forward).unwrap();
            session
        };

        let mut session = seeded();
        session.add_and_fit(hits[4].clone(), f64::INFINITY).unwrap();
        assert_eq!(session.status(), FitStatus::Fitted);
        assert_eq!(session.hits().len(), 5);

        let fitted = session.track_state().unwrap();
        assert_eq!(fitted.ndf, 5);
        assert_relative_eq!(fitted.state.omega(), truth().omega(), epsilon = 5e-5);
        for (k, hit) in hits.iter().enumerate() {
            assert_eq!(session.track_state_at(hit).unwrap().ndf, ndf_for(k + 1));
        }

        // A rejected hit still leaves the earlier hits fitted
        let mut session = seeded();
        let chi2 = session.add_and_fit(hits[4].clone(), 0.0).unwrap();
        assert!(chi2 > 0.0);
        assert_eq!(session.status(), FitStatus::Fitted);
        assert_eq!(session.hits().len(), 4);
        assert_eq!(session.track_state().unwrap().ndf, 3);
        assert!(session.track_state_at(&hits[0]).is_ok());
        assert_eq!(session.track_state_at(&hits[4]).unwrap_err(), FitError::UnknownHit(hits[4].id));
    }

    #[test]
    fn test_configured_seed_covariance_checked() {
        for variances in [[1e2, -1e-2, 1e-6, 1e2, 1e-2], [1e2, 1e-2, f64::NAN, 1e2, 1e-2]] {
            let config = FitterConfig {
                seed_covariance: variances,
                ..Default::default()
            };
            let mut session = TrackingSystem::new(detector(), config).create_session();
            for hit in hits() {
                session.add_hit(hit).unwrap();
            }
            let err = session.initialise(FitDirection::Forward).unwrap_err();
            assert!(matches!(err, FitError::InvalidSeed(_)));
            assert_eq!(err.status(), Status::BadInputs);
            assert_eq!(session.status(), FitStatus::Uninitialised);
        }
    }

    #[test]
    fn test_invalid_seed() {
        let mut session = system(true).create_session();
        let mut cov = TrackCovariance::identity();
        cov[(2, 2)] = -1.0;
        let seed = TrackState::new(truth().params, cov, Vector3::zeros());
        let err = session.initialise_with_state(seed, BZ, FitDirection::Forward).unwrap_err();
        assert_eq!(err.status(), Status::BadInputs);
        assert_eq!(session.status(), FitStatus::Uninitialised);
    }

    #[test]
    fn test_propagate_versus_extrapolate() {
        let (mut session, _) = fitted_session(true);
        let before = session.track_state().unwrap();
        let origin = Vector3::zeros();

        let extrapolated = session.extrapolate(&origin).unwrap();
        assert_eq!(session.track_state().unwrap(), before);
        assert_eq!(extrapolated.state.reference_point, origin);

        let propagated = session.propagate(&origin).unwrap();
        assert_eq!(propagated, extrapolated);
        assert_eq!(session.track_state().unwrap().state, propagated.state);
        // Transport does not change the fit quality
        assert_eq!(propagated.chi2, before.chi2);
        // The track comes from the origin
        assert!(propagated.state.d0().abs() < 0.1);
        assert!(propagated.state.z0().abs() < 0.1);
    }

    #[test]
    fn test_transport_to_current_reference_is_identity() {
        let (mut session, _) = fitted_session(true);
        let before = session.track_state().unwrap();
        let again = session.propagate(&before.state.reference_point).unwrap();
        assert_relative_eq!(again.state.params, before.state.params, epsilon = 1e-9);
        assert_relative_eq!(again.chi2, before.chi2);
    }

    #[test]
    fn test_layer_crossing_modes() {
        let (session, _) = fitted_session(true);
        let outer = LayerId(6);

        let fwd = session.intersection_with_layer(outer, CrossingMode::Forward).unwrap();
        let bwd = session.intersection_with_layer(outer, CrossingMode::Backward).unwrap();
        let closest = session.intersection_with_layer(outer, CrossingMode::Closest).unwrap();

        assert!(fwd.arc_length > 0.0);
        assert!(bwd.arc_length < 0.0);
        assert!(fwd.arc_length.abs() < bwd.arc_length.abs());
        assert_eq!(closest, fwd);
        assert_relative_eq!(fwd.point.xy().norm(), 300.0, epsilon = 1e-6);

        // Layer 3 lies behind the last hit only
        let inner = LayerId(3);
        let back = session.extrapolate_to_layer(inner, CrossingMode::Backward).unwrap();
        assert_relative_eq!(back.state.reference_point.xy().norm(), 100.0, epsilon = 1e-6);
        let err = session.extrapolate_to_layer(inner, CrossingMode::Forward).unwrap_err();
        assert_eq!(err.status(), Status::NoIntersection);
    }

    #[test]
    fn test_layer_beyond_turning_point() {
        // pT = 0.15 GeV curls within 2R ≈ 286 mm; the 400 mm layer is never reached
        let radii = [20.0, 40.0, 60.0, 80.0, 120.0, 400.0];
        let registry = SurfaceRegistry::from_surfaces(radii.iter().enumerate().map(|(i, &r)| {
            let layer = LayerId(i as i32 + 1);
            Surface::cylinder(layer, ElementId::encode(layer, 0), r, 500.0, 0.0, Material::silicon(0.3))
                .unwrap()
        }));
        let detector = Detector::new("curler", registry, UniformField::new(BZ)).shared();
        let mut system = TrackingSystem::with_defaults(detector.clone());
        system.include_multiple_scattering(false);
        system.include_energy_loss(false);

        let omega = Helix::omega_for(0.15, -1.0, BZ);
        let truth = Helix::from_components(0.0, 1.1, omega, 0.0, 0.3, Vector3::zeros());
        let wiggle = [0.004, -0.003, 0.006, -0.005, 0.002];
        let mut session = system.create_session();
        for (i, w) in wiggle.iter().enumerate() {
            let layer = LayerId(i as i32 + 1);
            let surface = detector.surface_registry().layer(layer).unwrap()[0].clone();
            let s = surface_crossings(&truth, &surface)
                .into_iter()
                .filter(|s| *s > 0.0)
                .fold(f64::INFINITY, f64::min);
            session
                .add_hit(Arc::new(Hit::new(
                    HitId::from_seed(200 + i as u64),
                    truth.point_at(s) + Vector3::new(0.0, 0.0, *w),
                    surface.element_id,
                    0.01,
                    0.01,
                )))
                .unwrap();
        }
        session.initialise(FitDirection::Forward).unwrap();
        assert_eq!(session.fit().unwrap().ndf, 5);
        let before = session.track_state().unwrap();

        let outer = LayerId(6);
        for mode in [CrossingMode::Forward, CrossingMode::Backward, CrossingMode::Closest] {
            let err = session.intersection_with_layer(outer, mode).unwrap_err();
            assert_eq!(err, FitError::NoIntersection { layer: outer, mode });
            assert_eq!(err.status(), Status::NoIntersection);
        }

        let err = session.propagate_to_layer(outer, CrossingMode::Forward).unwrap_err();
        assert_eq!(err.status(), Status::NoIntersection);
        let err = session.propagate_to_layer(LayerId(42), CrossingMode::Forward).unwrap_err();
        assert_eq!(err.status(), Status::BadInputs);

        // Failed transports leave the session as it was
        assert_eq!(session.status(), FitStatus::Fitted);
        assert_eq!(session.track_state().unwrap(), before);
    }

    #[test]
    fn test_propagate_to_layer_from_hit() {
        let (mut session, hits) = fitted_session(true);
        let on_layer = session
            .propagate_to_layer_from_hit(LayerId(6), &hits[2], CrossingMode::Forward)
            .unwrap();
        assert_eq!(on_layer.element_id, ElementId::encode(LayerId(6), 0));
        assert_eq!(on_layer.ndf, ndf_for(3));
        assert_eq!(session.track_state().unwrap().state, on_layer.state);
        assert_eq!(on_layer.state.location, StateLocation::AtSurface(on_layer.element_id));
    }

    #[test]
    fn test_forward_backward_consistency() {
        let (forward, hits) = fitted_session(false);
        let end = forward.track_state().unwrap();

        let mut backward = system(false).create_session();
        for hit in &hits {
            backward.add_hit(hit.clone()).unwrap();
        }
        backward
            .initialise_with_state(end.state.clone(), BZ, FitDirection::Backward)
            .unwrap();
        backward.fit().unwrap();

        // Same hit, same information: parameters agree within errors
        let last_hit = &hits[hits.len() - 1];
        let at_boundary = backward.track_state_at(last_hit).unwrap();
        let sigma = end.state.errors();
        for i in 0..5 {
            let diff = (at_boundary.state.params[i] - end.state.params[i]).abs();
            assert!(diff <= 3.0 * sigma[i] + 1e-9, "param {i}: diff {diff} sigma {}", sigma[i]);
        }

        // The backward fit ends at the innermost hit
        let inner = backward.track_state().unwrap();
        assert_relative_eq!(inner.state.reference_point.xy().norm(), 30.0, epsilon = 1e-3);
        assert_relative_eq!(inner.state.omega(), end.state.omega(), epsilon = 3.0 * sigma[2]);
    }

    #[test]
    fn test_backward_seed_from_hits() {
        let mut session = system(true).create_session();
        for hit in hits() {
            session.add_hit(hit).unwrap();
        }
        session.initialise(FitDirection::Backward).unwrap();
        let fitted = session.fit().unwrap();
        assert_eq!(session.direction(), FitDirection::Backward);
        // Processing ends at the first inserted hit
        assert_relative_eq!(fitted.state.reference_point.xy().norm(), 30.0, epsilon = 1e-3);
        assert_relative_eq!(fitted.state.omega(), truth().omega(), epsilon = 5e-5);
    }
}
