//! JSON exporter for scenario runs.
//!
//! Writes truth, hits and refitted states of every track so a run can be
//! inspected or plotted outside the harness.

use helixfit_core::Helix;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;

use crate::oracle::TruthTrack;
use crate::refit::RefitTrack;
use crate::runner::ScenarioMetrics;

/// Truth helix parameters, referenced at the origin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HelixRecord {
    pub d0: f64,
    pub phi: f64,
    pub omega: f64,
    pub z0: f64,
    pub tan_lambda: f64,
}

impl From<&Helix> for HelixRecord {
    fn from(helix: &Helix) -> Self {
        Self {
            d0: helix.d0(),
            phi: helix.phi(),
            omega: helix.omega(),
            z0: helix.z0(),
            tan_lambda: helix.tan_lambda(),
        }
    }
}

/// One measured hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HitRecord {
    pub id: String,
    pub element: i32,
    pub x: f64,
    pub y: f64,
    pub z: f64,

    /// Displaced by the oracle
    pub outlier: bool,

    /// Refused by the χ² gate
    pub rejected: bool,
}

/// One generated track and its refit, if any.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackRecord {
    pub input_id: u64,
    pub pt: f64,
    pub charge: f64,
    pub truth: HelixRecord,
    pub hits: Vec<HitRecord>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub fit: Option<RefitTrack>,
}

impl TrackRecord {
    pub fn new(truth: &TruthTrack, fit: Option<&RefitTrack>) -> Self {
        let hits = truth
            .hits
            .iter()
            .map(|hit| HitRecord {
                id: hit.id.0.to_string(),
                element: hit.element_id.0,
                x: hit.position.x,
                y: hit.position.y,
                z: hit.position.z,
                outlier: truth.is_outlier(&hit.id),
                rejected: fit.is_some_and(|f| f.rejected.contains(&hit.id)),
            })
            .collect();

        Self {
            input_id: truth.id,
            pt: truth.pt,
            charge: truth.charge,
            truth: HelixRecord::from(&truth.helix),
            hits,
            fit: fit.cloned(),
        }
    }
}

/// Complete scenario export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimExport {
    /// Scenario name
    pub scenario: String,

    /// Seed used
    pub seed: u64,

    /// Fitter options, as logged at startup
    pub options: String,

    /// All generated tracks
    pub tracks: Vec<TrackRecord>,

    /// Final results
    pub passed: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<ScenarioMetrics>,
}

impl SimExport {
    /// Creates a new export container.
    pub fn new(scenario: &str, seed: u64, options: impl Into<String>) -> Self {
        Self {
            scenario: scenario.to_string(),
            seed,
            options: options.into(),
            tracks: Vec::new(),
            passed: false,
            metrics: None,
        }
    }

    /// Adds a track.
    pub fn add_track(&mut self, track: TrackRecord) {
        self.tracks.push(track);
    }

    /// Finalizes the export.
    pub fn finalize(&mut self, passed: bool, metrics: ScenarioMetrics) {
        self.passed = passed;
        self.metrics = Some(metrics);
    }

    /// Writes to a JSON file.
    pub fn write_to_file(&self, path: &str) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}
