//! Refit scenarios: particle gun settings and refit options per scenario.

use helixfit_core::FitDirection;

use crate::oracle::GunConfig;
use crate::refit::RefitConfig;

/// χ² increment above which the outlier scenario refuses a hit.
pub const OUTLIER_GATE: f64 = 25.0;

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScenarioId {
    /// SIM-001: mixed-momentum tracks through the barrel
    Barrel,

    /// SIM-002: soft tracks dominated by multiple scattering
    LowMomentum,

    /// SIM-003: displaced hits refused by the χ² gate
    Outliers,

    /// SIM-004: fit from the outermost hit inward
    Backward,

    /// SIM-005: seed from upstream track states
    Seeded,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::Barrel,
            ScenarioId::LowMomentum,
            ScenarioId::Outliers,
            ScenarioId::Backward,
            ScenarioId::Seeded,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::Barrel => "barrel",
            ScenarioId::LowMomentum => "low_momentum",
            ScenarioId::Outliers => "outliers",
            ScenarioId::Backward => "backward",
            ScenarioId::Seeded => "seeded",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::Barrel => "0.5-5 GeV tracks, |tanλ| < 1, seeded from hits",
            ScenarioId::LowMomentum => "0.3-0.6 GeV tracks, scattering dominates the errors",
            ScenarioId::Outliers => "20% of outer hits displaced by 2 mm, gated at χ² 25",
            ScenarioId::Backward => "fit from the outermost hit towards the beam line",
            ScenarioId::Seeded => "seeded from smeared upstream states instead of hits",
        }
    }

    /// Particle gun for this scenario.
    pub fn gun(&self) -> GunConfig {
        match self {
            ScenarioId::LowMomentum => GunConfig {
                pt_min: 0.3,
                pt_max: 0.6,
                ..Default::default()
            },
            ScenarioId::Outliers => GunConfig {
                pt_min: 1.0,
                outlier_probability: 0.2,
                ..Default::default()
            },
            _ => GunConfig::default(),
        }
    }

    /// Refit options for this scenario.
    pub fn refit(&self) -> RefitConfig {
        match self {
            ScenarioId::Outliers => RefitConfig {
                max_chi2_increment: Some(OUTLIER_GATE),
                ..Default::default()
            },
            ScenarioId::Backward => RefitConfig {
                direction: FitDirection::Backward,
                ..Default::default()
            },
            ScenarioId::Seeded => RefitConfig {
                use_input_state: true,
                ..Default::default()
            },
            _ => RefitConfig::default(),
        }
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "barrel" | "sim-001" => Ok(ScenarioId::Barrel),
            "low_momentum" | "lowmomentum" | "low_pt" | "sim-002" => Ok(ScenarioId::LowMomentum),
            "outliers" | "outlier" | "sim-003" => Ok(ScenarioId::Outliers),
            "backward" | "sim-004" => Ok(ScenarioId::Backward),
            "seeded" | "sim-005" => Ok(ScenarioId::Seeded),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_parse_back() {
        for scenario in ScenarioId::all() {
            assert_eq!(scenario.name().parse::<ScenarioId>(), Ok(scenario));
            assert_eq!(scenario.to_string(), scenario.name());
        }
        assert_eq!("SIM-003".parse::<ScenarioId>(), Ok(ScenarioId::Outliers));
        assert!("time_warp".parse::<ScenarioId>().is_err());
    }

    #[test]
    fn test_scenario_settings() {
        assert!(ScenarioId::Outliers.gun().outlier_probability > 0.0);
        assert_eq!(ScenarioId::Outliers.refit().max_chi2_increment, Some(OUTLIER_GATE));
        assert_eq!(ScenarioId::Backward.refit().direction, FitDirection::Backward);
        assert!(ScenarioId::Seeded.refit().use_input_state);
        assert_eq!(ScenarioId::Barrel.refit(), RefitConfig::default());
        for scenario in ScenarioId::all() {
            assert!(scenario.gun().validate().is_ok());
        }
    }
}
