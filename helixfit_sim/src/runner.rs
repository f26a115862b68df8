//! Scenario runner - generates tracks, refits them and scores the result.

use helixfit_core::TrackingSystem;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, error, info};

use crate::config::{Acceptance, SimConfig};
use crate::error::SimError;
use crate::exporter::{SimExport, TrackRecord};
use crate::oracle::{Oracle, TruthTrack};
use crate::refit::{InputTrack, RefitOutput, RefitStage};
use crate::scenarios::ScenarioId;

/// Results from running a scenario.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Tracks drawn from the gun
    pub tracks_generated: usize,

    /// Tracks the refit stage produced
    pub tracks_fitted: usize,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScenarioMetrics {
    /// Hits handed to the refit stage
    pub hits: u64,

    /// Tracks the refit stage skipped
    pub failed_fits: u64,

    /// Hits refused by the χ² gate
    pub rejected_hits: u64,

    /// Outliers the oracle injected
    pub outliers_injected: u64,

    /// Injected outliers the gate refused
    pub outliers_rejected: u64,

    /// Fitted tracks over generated tracks
    pub efficiency: f64,

    /// Mean χ²/ndf of fitted tracks with ndf > 0
    pub mean_chi2_ndf: f64,

    /// Mean of (ω_fit - ω_true) / σ_ω
    pub curvature_pull_mean: f64,

    /// RMS of (ω_fit - ω_true) / σ_ω
    pub curvature_pull_rms: f64,
}

impl ScenarioMetrics {
    /// Scores a refit against the truth it came from.
    pub fn collect(truth: &[TruthTrack], output: &RefitOutput, failed_fits: u64) -> Self {
        let by_id: HashMap<u64, &TruthTrack> = truth.iter().map(|t| (t.id, t)).collect();

        let mut metrics = ScenarioMetrics {
            hits: truth.iter().map(|t| t.hits.len() as u64).sum(),
            failed_fits,
            outliers_injected: truth.iter().map(|t| t.outliers.len() as u64).sum(),
            ..Default::default()
        };
        if !truth.is_empty() {
            metrics.efficiency = output.tracks.len() as f64 / truth.len() as f64;
        }

        let mut chi2_ndf = Vec::new();
        let mut pulls = Vec::new();
        for relation in &output.relations {
            let (Some(track), Some(source)) =
                (output.tracks.get(relation.output), by_id.get(&relation.input))
            else {
                continue;
            };

            metrics.rejected_hits += track.rejected.len() as u64;
            metrics.outliers_rejected +=
                track.rejected.iter().filter(|id| source.is_outlier(id)).count() as u64;

            if track.ndf > 0 {
                chi2_ndf.push(track.chi2 / track.ndf as f64);
            }

            // ω is unchanged by extrapolation, so the IP state carries the full fit
            let state = &track.at_ip.state;
            let variance = state.covariance[(2, 2)];
            if variance > 0.0 {
                pulls.push((state.omega() - source.helix.omega()) / variance.sqrt());
            }
        }

        metrics.mean_chi2_ndf = mean(&chi2_ndf);
        metrics.curvature_pull_mean = mean(&pulls);
        metrics.curvature_pull_rms = if pulls.is_empty() {
            0.0
        } else {
            (pulls.iter().map(|p| p * p).sum::<f64>() / pulls.len() as f64).sqrt()
        };
        metrics
    }

    /// First limit in `acceptance` these metrics break, if any.
    pub fn violation(&self, acceptance: &Acceptance) -> Option<String> {
        if self.efficiency < acceptance.min_efficiency {
            return Some(format!(
                "efficiency {:.3} below {:.3}",
                self.efficiency, acceptance.min_efficiency
            ));
        }
        if self.mean_chi2_ndf > acceptance.max_mean_chi2_ndf {
            return Some(format!(
                "mean chi2/ndf {:.2} exceeds {:.2}",
                self.mean_chi2_ndf, acceptance.max_mean_chi2_ndf
            ));
        }
        if self.curvature_pull_mean.abs() > acceptance.max_pull_mean {
            return Some(format!(
                "curvature pull mean {:.2} exceeds {:.2}",
                self.curvature_pull_mean, acceptance.max_pull_mean
            ));
        }
        if self.curvature_pull_rms > acceptance.max_pull_rms {
            return Some(format!(
                "curvature pull RMS {:.2} exceeds {:.2}",
                self.curvature_pull_rms, acceptance.max_pull_rms
            ));
        }
        if self.outliers_injected > 0 {
            let rejection = self.outliers_rejected as f64 / self.outliers_injected as f64;
            if rejection < acceptance.min_outlier_rejection {
                return Some(format!(
                    "outlier rejection {:.3} below {:.3}",
                    rejection, acceptance.min_outlier_rejection
                ));
            }
        }
        None
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Runs refit scenarios.
pub struct ScenarioRunner {
    /// Configuration seed
    seed: u64,

    /// Tracks per scenario
    num_tracks: usize,

    config: SimConfig,
}

impl ScenarioRunner {
    /// Creates a new scenario runner with the default configuration.
    pub fn new(seed: u64, num_tracks: usize) -> Self {
        Self {
            seed,
            num_tracks,
            config: SimConfig::default(),
        }
    }

    /// Sets the run configuration.
    pub fn with_config(mut self, config: SimConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Runs a scenario and returns the result.
    pub fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        match self.run_with_export(scenario) {
            Ok((result, _)) => result,
            Err(e) => {
                error!("Scenario {} could not start: {}", scenario.name(), e);
                ScenarioResult {
                    scenario,
                    seed: self.seed,
                    passed: false,
                    tracks_generated: 0,
                    tracks_fitted: 0,
                    failure_reason: Some(e.to_string()),
                    metrics: ScenarioMetrics::default(),
                }
            }
        }
    }

    /// Runs a scenario and keeps every track for export.
    pub fn run_with_export(&self, scenario: ScenarioId) -> Result<(ScenarioResult, SimExport), SimError> {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);
        debug!("  {}", scenario.description());

        let physics_seed = self.seed.wrapping_mul(0x9e3779b97f4a7c15);
        let detector = self.config.detector.build()?;
        let system = TrackingSystem::new(detector.clone(), self.config.fitter.clone());
        let options = system.options_summary();
        let mut oracle = Oracle::new(
            physics_seed,
            detector,
            scenario.gun(),
            self.config.detector.sigma_u,
            self.config.detector.sigma_v,
        )?;

        let truth = oracle.shoot_many(self.num_tracks);
        let refit = scenario.refit();
        let seed_variances = self.config.fitter.seed_covariance;
        let inputs: Vec<InputTrack> = truth
            .iter()
            .map(|track| InputTrack {
                id: track.id,
                hits: track.hits.clone(),
                state: refit
                    .use_input_state
                    .then(|| oracle.input_state(track, &seed_variances)),
            })
            .collect();

        let mut stage = RefitStage::new(system, refit);
        let output = stage.process(&inputs);
        let metrics = ScenarioMetrics::collect(&truth, &output, stage.failed());
        let failure_reason = metrics.violation(&self.config.acceptance);
        let passed = failure_reason.is_none();

        info!(
            "  {} | fitted={}/{} | chi2/ndf={:.2} | pull={:.2}±{:.2} | rejected={}",
            scenario.name(),
            output.tracks.len(),
            truth.len(),
            metrics.mean_chi2_ndf,
            metrics.curvature_pull_mean,
            metrics.curvature_pull_rms,
            metrics.rejected_hits
        );

        let mut export = SimExport::new(scenario.name(), self.seed, options);
        let fits: HashMap<u64, usize> = output.relations.iter().map(|r| (r.input, r.output)).collect();
        for track in &truth {
            let fit = fits.get(&track.id).and_then(|&i| output.tracks.get(i));
            export.add_track(TrackRecord::new(track, fit));
        }
        export.finalize(passed, metrics.clone());

        let result = ScenarioResult {
            scenario,
            seed: self.seed,
            passed,
            tracks_generated: truth.len(),
            tracks_fitted: output.tracks.len(),
            failure_reason,
            metrics,
        };
        Ok((result, export))
    }
}
