//! The tracking system: fitter configuration and the session factory.

use helixfit_geom::DetectorContext;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::estimator::EstimatorKind;
use crate::material::MaterialOptions;
use crate::session::FitSession;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Configuration shared by every session a [`TrackingSystem`] creates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitterConfig {
    /// Estimator used by new sessions (default: Kalman)
    pub estimator: EstimatorKind,

    /// Include multiple scattering (default: true)
    pub multiple_scattering: bool,

    /// Include energy loss (default: true)
    pub energy_loss: bool,

    /// Diagonal covariance (d0, φ0, ω, z0, tanλ) given to seeds built from hits
    pub seed_covariance: [f64; 5],

    /// Iteration cap of the global χ² estimator (default: 20)
    pub max_iterations: usize,

    /// Relative χ² change that ends the global χ² estimator (default: 1e-4)
    pub convergence_tolerance: f64,
}

impl Default for FitterConfig {
    fn default() -> Self {
        Self {
            estimator: EstimatorKind::Kalman,
            multiple_scattering: true,
            energy_loss: true,
            seed_covariance: [1e2, 1e-2, 1e-6, 1e2, 1e-2], // 10 mm, 0.1 rad, 1e-3/mm, 10 mm, 0.1
            max_iterations: 20,
            convergence_tolerance: 1e-4,
        }
    }
}

impl FitterConfig {
    /// The material effects this configuration enables.
    pub fn material(&self) -> MaterialOptions {
        MaterialOptions {
            multiple_scattering: self.multiple_scattering,
            energy_loss: self.energy_loss,
        }
    }
}

// ============================================================================
// SESSION FACTORY
// ============================================================================

/// Creates fit sessions bound to one detector description.
pub struct TrackingSystem {
    context: Arc<dyn DetectorContext>,
    config: FitterConfig,
}

impl TrackingSystem {
    pub fn new(context: Arc<dyn DetectorContext>, config: FitterConfig) -> Self {
        info!(
            detector = context.name(),
            options = %options_string(&config),
            "Tracking system configured"
        );
        Self { context, config }
    }

    /// A system with the default configuration.
    pub fn with_defaults(context: Arc<dyn DetectorContext>) -> Self {
        Self::new(context, FitterConfig::default())
    }

    pub fn config(&self) -> &FitterConfig {
        &self.config
    }

    pub fn context(&self) -> &Arc<dyn DetectorContext> {
        &self.context
    }

    /// Enables or disables multiple scattering for sessions created afterwards.
    pub fn include_multiple_scattering(&mut self, on: bool) {
        self.config.multiple_scattering = on;
    }

    /// Enables or disables energy loss for sessions created afterwards.
    pub fn include_energy_loss(&mut self, on: bool) {
        self.config.energy_loss = on;
    }

    /// Selects the estimator for sessions created afterwards.
    pub fn use_estimator(&mut self, kind: EstimatorKind) {
        self.config.estimator = kind;
    }

    /// One-line summary of the active options.
    pub fn options_summary(&self) -> String {
        options_string(&self.config)
    }

    /// Creates an empty, uninitialised session.
    pub fn create_session(&self) -> FitSession {
        FitSession::new(
            self.context.clone(),
            self.config.estimator.build(),
            self.config.clone(),
        )
    }
}

impl std::fmt::Debug for TrackingSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackingSystem")
            .field("detector", &self.context.name())
            .field("config", &self.config)
            .finish()
    }
}

fn options_string(config: &FitterConfig) -> String {
    let on_off = |b: bool| if b { "on" } else { "off" };
    format!(
        "estimator={} multiple_scattering={} energy_loss={}",
        config.estimator,
        on_off(config.multiple_scattering),
        on_off(config.energy_loss)
    )
}
