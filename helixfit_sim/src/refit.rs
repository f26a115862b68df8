//! Refit stage: fits each input track hit by hit and reports it at the
//! first hit, the last hit and the interaction point.

use helixfit_core::{
    FitDirection, FitError, FittedState, Hit, HitId, StateLocation, TrackState, TrackingSystem,
    MIN_HITS,
};
use helixfit_geom::DetectorContext;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Weight of the relation between an output track and its input.
pub const RELATION_WEIGHT: f64 = 1.0;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// How the refit stage drives its sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefitConfig {
    /// Direction every session fits in (default: forward)
    pub direction: FitDirection,

    /// Seed from the input track's state and the local field instead of
    /// from its hits (default: false)
    pub use_input_state: bool,

    /// When set, only the hits needed for a seed are fitted at once (the
    /// innermost for forward fits, the outermost for backward ones); the
    /// others are filtered in one by one, in fit direction, and dropped when
    /// their χ² increment exceeds this value
    pub max_chi2_increment: Option<f64>,
}

impl Default for RefitConfig {
    fn default() -> Self {
        Self {
            direction: FitDirection::Forward,
            use_input_state: false,
            max_chi2_increment: None,
        }
    }
}

// ============================================================================
// RECORDS
// ============================================================================

/// A track handed to the refit stage.
#[derive(Debug, Clone)]
pub struct InputTrack {
    pub id: u64,
    pub hits: Vec<Arc<Hit>>,

    /// State from an upstream stage, used when seeding from input states
    pub state: Option<TrackState>,
}

/// A refitted track.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefitTrack {
    pub at_first_hit: FittedState,
    pub at_last_hit: FittedState,

    /// Extrapolation to the origin
    pub at_ip: FittedState,

    /// Hits in the fit, innermost first
    pub hits: Vec<HitId>,

    /// Hits refused by the χ² gate
    pub rejected: Vec<HitId>,

    /// Fit quality of the whole track
    pub chi2: f64,
    pub ndf: i32,
}

/// Links an output track to the input it was refitted from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackRelation {
    /// Index into [`RefitOutput::tracks`]
    pub output: usize,

    /// ID of the input track
    pub input: u64,

    pub weight: f64,
}

/// Everything one call to [`RefitStage::process`] produced.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RefitOutput {
    pub tracks: Vec<RefitTrack>,
    pub relations: Vec<TrackRelation>,
}

impl RefitOutput {
    /// Input track ID of output track `output`.
    pub fn input_of(&self, output: usize) -> Option<u64> {
        self.relations
            .iter()
            .find(|r| r.output == output)
            .map(|r| r.input)
    }
}

// ============================================================================
// STAGE
// ============================================================================

/// Refits input tracks with sessions from one tracking system.
#[derive(Debug)]
pub struct RefitStage {
    system: TrackingSystem,
    config: RefitConfig,

    processed: u64,
    failed: u64,
    rejected_hits: u64,
}

impl RefitStage {
    pub fn new(system: TrackingSystem, config: RefitConfig) -> Self {
        info!(
            direction = %config.direction,
            use_input_state = config.use_input_state,
            max_chi2_increment = ?config.max_chi2_increment,
            options = %system.options_summary(),
            "Refit stage configured"
        );
        Self {
            system,
            config,
            processed: 0,
            failed: 0,
            rejected_hits: 0,
        }
    }

    pub fn config(&self) -> &RefitConfig {
        &self.config
    }

    pub fn system(&self) -> &TrackingSystem {
        &self.system
    }

    /// Tracks seen so far, failed ones included.
    pub fn processed(&self) -> u64 {
        self.processed
    }

    /// Tracks that could not be refitted.
    pub fn failed(&self) -> u64 {
        self.failed
    }

    /// Hits refused by the χ² gate so far.
    pub fn rejected_hits(&self) -> u64 {
        self.rejected_hits
    }

    /// Refits every input track. Tracks that fail are skipped.
    pub fn process(&mut self, inputs: &[InputTrack]) -> RefitOutput {
        let mut output = RefitOutput::default();

        for input in inputs {
            self.processed += 1;
            match self.refit(input) {
                Ok(track) => {
                    self.rejected_hits += track.rejected.len() as u64;
                    output.relations.push(TrackRelation {
                        output: output.tracks.len(),
                        input: input.id,
                        weight: RELATION_WEIGHT,
                    });
                    output.tracks.push(track);
                }
                Err(e) => {
                    self.failed += 1;
                    warn!(track = input.id, hits = input.hits.len(), error = %e, "Refit failed, track skipped");
                }
            }
        }

        debug!(
            inputs = inputs.len(),
            refitted = output.tracks.len(),
            processed = self.processed,
            failed = self.failed,
            "Refit batch done"
        );
        output
    }

    /// Refits one track.
    pub fn refit(&self, input: &InputTrack) -> Result<RefitTrack, FitError> {
        let mut hits = input.hits.clone();
        sort_by_radius(&mut hits);

        let seed_hits = match self.config.max_chi2_increment {
            Some(_) => MIN_HITS.min(hits.len()),
            None => hits.len(),
        };
        // Seed hits stay innermost first; gated hits follow in fit direction
        let (initial, rest): (&[Arc<Hit>], Vec<Arc<Hit>>) = match self.config.direction {
            FitDirection::Forward => {
                let (initial, rest) = hits.split_at(seed_hits);
                (initial, rest.to_vec())
            }
            FitDirection::Backward => {
                let (rest, initial) = hits.split_at(hits.len() - seed_hits);
                (initial, rest.iter().rev().cloned().collect())
            }
        };

        let mut session = self.system.create_session();
        for hit in initial {
            session.add_hit(hit.clone())?;
        }

        match (&input.state, self.config.use_input_state) {
            (Some(state), true) => {
                let bz = self.system.context().bz_at(&state.reference_point);
                session.initialise_with_state(state.clone(), bz, self.config.direction)?;
            }
            _ => session.initialise(self.config.direction)?,
        }
        session.fit()?;

        let mut rejected = Vec::new();
        if let Some(max_chi2) = self.config.max_chi2_increment {
            for hit in rest {
                let increment = session.add_and_fit(hit.clone(), max_chi2)?;
                if increment > max_chi2 {
                    rejected.push(hit.id);
                }
            }
        }

        let total = session.track_state()?;
        let mut used = session.hits().to_vec();
        sort_by_radius(&mut used);
        let (Some(first), Some(last)) = (used.first(), used.last()) else {
            return Err(FitError::TooFewHits {
                found: 0,
                required: MIN_HITS,
            });
        };

        let at_first_hit = relabel(session.track_state_at(first)?, StateLocation::AtFirstHit);
        let at_last_hit = relabel(session.track_state_at(last)?, StateLocation::AtLastHit);
        let at_ip = relabel(session.extrapolate(&Vector3::zeros())?, StateLocation::AtIp);

        Ok(RefitTrack {
            at_first_hit,
            at_last_hit,
            at_ip,
            hits: used.iter().map(|h| h.id).collect(),
            rejected,
            chi2: total.chi2,
            ndf: total.ndf,
        })
    }
}

fn sort_by_radius(hits: &mut [Arc<Hit>]) {
    hits.sort_by(|a, b| a.radius().partial_cmp(&b.radius()).unwrap_or(Ordering::Equal));
}

fn relabel(fitted: FittedState, location: StateLocation) -> FittedState {
    FittedState {
        state: fitted.state.with_location(location),
        ..fitted
    }
}
