//! Ground truth oracle for the simulation.
//!
//! The Oracle is the particle gun and the sensor model in one:
//! - draws charged tracks from a seeded `ChaCha8Rng`
//! - follows each truth helix outward through the detector
//! - records one Gaussian-smeared hit per crossed surface
//! - optionally displaces some hits to act as outliers
//!
//! Truth helices carry no material effects: every hit lies on the same
//! ideal trajectory.

use helixfit_core::helix::PHI;
use helixfit_core::intersection::{surface_crossings, CROSSING_TOLERANCE};
use helixfit_core::{Helix, Hit, HitId, StateLocation, TrackCovariance, TrackParams, TrackState};
use helixfit_geom::{wrap_angle, DetectorContext, ElementId, Shape, Surface};
use nalgebra::Vector3;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal, StandardNormal};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::sync::Arc;
use tracing::debug;

use crate::error::SimError;

// ============================================================================
// GUN CONFIGURATION
// ============================================================================

/// Kinematic ranges of the particle gun.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GunConfig {
    /// Transverse momentum range (GeV)
    pub pt_min: f64,
    pub pt_max: f64,

    /// Dip range (tan λ)
    pub tan_lambda_min: f64,
    pub tan_lambda_max: f64,

    /// Transverse spread of the production vertex (mm)
    pub d0_sigma: f64,

    /// Longitudinal spread of the production vertex (mm)
    pub z0_sigma: f64,

    /// Chance that a hit is replaced by an outlier
    pub outlier_probability: f64,

    /// Displacement of an outlier along the first local axis (mm)
    pub outlier_shift: f64,

    /// Innermost hits of every track that are never made outliers
    pub clean_inner_hits: usize,

    /// Smearing of input states, in units of the supplied seed errors
    pub seed_smear: f64,
}

impl Default for GunConfig {
    fn default() -> Self {
        Self {
            pt_min: 0.5,
            pt_max: 5.0,
            tan_lambda_min: -1.0,
            tan_lambda_max: 1.0,
            d0_sigma: 0.02,
            z0_sigma: 5.0,
            outlier_probability: 0.0,
            outlier_shift: 2.0,
            clean_inner_hits: 3,
            seed_smear: 0.1,
        }
    }
}

impl GunConfig {
    /// Checks the ranges for values the gun cannot sample from.
    pub fn validate(&self) -> Result<(), SimError> {
        if !(self.pt_min > 0.0 && self.pt_max >= self.pt_min) {
            return Err(SimError::config(format!(
                "pT range [{}, {}]",
                self.pt_min, self.pt_max
            )));
        }
        if !(self.tan_lambda_max >= self.tan_lambda_min) {
            return Err(SimError::config(format!(
                "tan(lambda) range [{}, {}]",
                self.tan_lambda_min, self.tan_lambda_max
            )));
        }
        if !(0.0..=1.0).contains(&self.outlier_probability) {
            return Err(SimError::config(format!(
                "outlier probability {}",
                self.outlier_probability
            )));
        }
        Ok(())
    }
}

// ============================================================================
// TRUTH RECORDS
// ============================================================================

/// A generated track: the truth helix and its measurements.
#[derive(Debug, Clone)]
pub struct TruthTrack {
    /// Track number within this oracle
    pub id: u64,

    /// Truth trajectory, referenced at the origin
    pub helix: Helix,

    /// Transverse momentum (GeV)
    pub pt: f64,

    /// Charge sign (+1 or -1)
    pub charge: f64,

    /// Hits ordered by increasing radius
    pub hits: Vec<Arc<Hit>>,

    /// Hits that were displaced to act as outliers
    pub outliers: Vec<HitId>,
}

impl TruthTrack {
    /// Whether `hit` was generated as an outlier.
    pub fn is_outlier(&self, hit: &HitId) -> bool {
        self.outliers.contains(hit)
    }
}

// ============================================================================
// ORACLE
// ============================================================================

/// The Oracle - draws truth tracks and measures them.
pub struct Oracle {
    physics_seed: u64,
    rng: ChaCha8Rng,
    context: Arc<dyn DetectorContext>,
    gun: GunConfig,

    noise_u: Normal<f64>,
    noise_v: Normal<f64>,
    vertex_d0: Normal<f64>,
    vertex_z0: Normal<f64>,

    sigma_u: f64,
    sigma_v: f64,
    next_id: u64,
}

impl Oracle {
    /// Creates an oracle measuring with local resolutions `sigma_u`, `sigma_v` (mm).
    pub fn new(
        physics_seed: u64,
        context: Arc<dyn DetectorContext>,
        gun: GunConfig,
        sigma_u: f64,
        sigma_v: f64,
    ) -> Result<Self, SimError> {
        gun.validate()?;
        let normal = |sigma: f64| {
            Normal::new(0.0, sigma).map_err(|e| SimError::config(format!("sigma {sigma}: {e}")))
        };

        Ok(Self {
            physics_seed,
            rng: ChaCha8Rng::seed_from_u64(physics_seed),
            noise_u: normal(sigma_u)?,
            noise_v: normal(sigma_v)?,
            vertex_d0: normal(gun.d0_sigma)?,
            vertex_z0: normal(gun.z0_sigma)?,
            context,
            gun,
            sigma_u,
            sigma_v,
            next_id: 0,
        })
    }

    pub fn seed(&self) -> u64 {
        self.physics_seed
    }

    pub fn gun(&self) -> &GunConfig {
        &self.gun
    }

    /// Draws one track and measures it.
    pub fn shoot(&mut self) -> TruthTrack {
        let id = self.next_id;
        self.next_id += 1;

        let pt = self.rng.gen_range(self.gun.pt_min..=self.gun.pt_max);
        let charge = if self.rng.gen_bool(0.5) { 1.0 } else { -1.0 };
        let phi = self.rng.gen_range(-PI..PI);
        let tan_lambda = self
            .rng
            .gen_range(self.gun.tan_lambda_min..=self.gun.tan_lambda_max);
        let d0 = self.vertex_d0.sample(&mut self.rng);
        let z0 = self.vertex_z0.sample(&mut self.rng);

        let origin = Vector3::zeros();
        let bz = self.context.bz_at(&origin);
        let omega = Helix::omega_for(pt, charge, bz);
        let helix = Helix::from_components(d0, phi, omega, z0, tan_lambda, origin);

        let (hits, outliers) = self.measure(&helix);
        debug!(
            track = id,
            pt,
            charge,
            tan_lambda,
            hits = hits.len(),
            outliers = outliers.len(),
            "Track generated"
        );

        TruthTrack {
            id,
            helix,
            pt,
            charge,
            hits,
            outliers,
        }
    }

    /// Draws `n` tracks.
    pub fn shoot_many(&mut self, n: usize) -> Vec<TruthTrack> {
        (0..n).map(|_| self.shoot()).collect()
    }

    /// A smeared input state for `track`, as an upstream stage would hand it over.
    ///
    /// Parameters are displaced by `seed_smear` times the errors in
    /// `seed_variances`; the covariance is `seed_variances` on the diagonal.
    pub fn input_state(&mut self, track: &TruthTrack, seed_variances: &[f64; 5]) -> TrackState {
        let mut params = track.helix.params;
        for (i, variance) in seed_variances.iter().enumerate() {
            let unit: f64 = self.rng.sample(StandardNormal);
            params[i] += unit * self.gun.seed_smear * variance.max(0.0).sqrt();
        }
        params[PHI] = wrap_angle(params[PHI]);

        let covariance = TrackCovariance::from_diagonal(&TrackParams::from_column_slice(seed_variances));
        TrackState::new(params, covariance, track.helix.reference).with_location(StateLocation::AtIp)
    }

    /// Hits of `helix` on every surface crossed on its way out, with outliers.
    fn measure(&mut self, helix: &Helix) -> (Vec<Arc<Hit>>, Vec<HitId>) {
        let context = self.context.clone();
        let registry = context.surface_registry();

        // Only the outgoing half-turn; a curler re-entering the detector is not followed
        let limit = if helix.is_straight() {
            f64::INFINITY
        } else {
            helix.period() / 2.0
        };

        let mut measured: Vec<(Vector3<f64>, &Surface)> = registry
            .surfaces()
            .filter_map(|surface| {
                surface_crossings(helix, surface)
                    .into_iter()
                    .filter(|&s| s > CROSSING_TOLERANCE && s < limit)
                    .fold(None, |best: Option<f64>, s| Some(best.map_or(s, |b| b.min(s))))
                    .map(|s| (helix.point_at(s), surface))
            })
            .filter_map(|(point, surface)| {
                let du = self.noise_u.sample(&mut self.rng);
                let dv = self.noise_v.sample(&mut self.rng);
                let smeared = displace(surface, &point, du, dv);
                // Smearing across a sensor edge leaves no hit
                surface.is_on_surface(&smeared).then_some((smeared, surface))
            })
            .collect();

        measured.sort_by(|a, b| {
            a.0.xy()
                .norm()
                .partial_cmp(&b.0.xy().norm())
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut hits = Vec::with_capacity(measured.len());
        let mut outliers = Vec::new();
        for (i, (mut position, surface)) in measured.into_iter().enumerate() {
            let id = HitId::from_seed(self.rng.gen());
            if i >= self.gun.clean_inner_hits && self.rng.gen_bool(self.gun.outlier_probability) {
                let side = if self.rng.gen_bool(0.5) { 1.0 } else { -1.0 };
                let shifted = displace(surface, &position, side * self.gun.outlier_shift, 0.0);
                if surface.is_on_surface(&shifted) {
                    position = shifted;
                    outliers.push(id);
                }
            }
            hits.push(Arc::new(self.hit(id, position, surface.element_id)));
        }
        (hits, outliers)
    }

    fn hit(&self, id: HitId, position: Vector3<f64>, element_id: ElementId) -> Hit {
        Hit::new(id, position, element_id, self.sigma_u, self.sigma_v)
    }
}

/// Moves `point` by (`du`, `dv`) in the local frame of `surface`, staying on it.
fn displace(surface: &Surface, point: &Vector3<f64>, du: f64, dv: f64) -> Vector3<f64> {
    match &surface.shape {
        Shape::Cylinder { radius, .. } => {
            let phi = point.y.atan2(point.x) + du / radius;
            Vector3::new(radius * phi.cos(), radius * phi.sin(), point.z + dv)
        }
        Shape::Plane { normal, u_axis, .. } => {
            let v_axis = normal.cross(u_axis);
            point + u_axis * du + v_axis * dv
        }
    }
}
