//! Run configuration: fitter, detector and pass criteria, loadable from JSON.

use helixfit_core::FitterConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::detector::DetectorConfig;
use crate::error::SimError;

/// Limits a scenario run must stay within to pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Acceptance {
    /// Largest mean χ²/ndf over fitted tracks
    pub max_mean_chi2_ndf: f64,

    /// Largest |mean| of the curvature pull
    pub max_pull_mean: f64,

    /// Largest RMS of the curvature pull
    pub max_pull_rms: f64,

    /// Smallest fraction of generated tracks that must be refitted
    pub min_efficiency: f64,

    /// Smallest fraction of injected outliers the gate must refuse
    pub min_outlier_rejection: f64,
}

impl Default for Acceptance {
    fn default() -> Self {
        Self {
            max_mean_chi2_ndf: 3.0,
            max_pull_mean: 1.0,
            max_pull_rms: 3.0,
            min_efficiency: 0.9,
            min_outlier_rejection: 0.9,
        }
    }
}

/// Everything a scenario run is configured with.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub fitter: FitterConfig,
    pub detector: DetectorConfig,
    pub acceptance: Acceptance,
}

impl SimConfig {
    /// Parses a JSON document; absent fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self, SimError> {
        let config: SimConfig = serde_json::from_str(json)?;
        config.detector.validate()?;
        Ok(config)
    }

    /// Loads a JSON override file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, SimError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use helixfit_core::EstimatorKind;

    #[test]
    fn test_partial_override() {
        let config = SimConfig::from_json(
            r#"{
                "fitter": { "estimator": "global_chi2", "multiple_scattering": false },
                "detector": { "bz": 2.0 },
                "acceptance": { "max_pull_rms": 2.5 }
            }"#,
        )
        .unwrap();

        assert_eq!(config.fitter.estimator, EstimatorKind::GlobalChi2);
        assert!(!config.fitter.multiple_scattering);
        assert!(config.fitter.energy_loss);
        assert_eq!(config.detector.bz, 2.0);
        assert_eq!(config.detector.barrel_radii.len(), 6);
        assert_eq!(config.acceptance.max_pull_rms, 2.5);
        assert_eq!(config.acceptance.min_efficiency, 0.9);
    }

    #[test]
    fn test_empty_document_is_default() {
        assert_eq!(SimConfig::from_json("{}").unwrap(), SimConfig::default());
    }

    #[test]
    fn test_bad_override_rejected() {
        assert!(matches!(SimConfig::from_json("{ not json"), Err(SimError::Json(_))));
        assert!(matches!(
            SimConfig::from_json(r#"{ "detector": { "barrel_radii": [] } }"#),
            Err(SimError::Config(_))
        ));
        assert!(matches!(
            SimConfig::from_json_file("/nonexistent/helixfit.json"),
            Err(SimError::Io(_))
        ));
    }
}
