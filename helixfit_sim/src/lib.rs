//! HelixFit Simulation Harness
//!
//! This crate closes the loop around the fitting engine: tracks are drawn
//! from a seeded particle gun, measured in a synthetic detector, refitted
//! and compared with the truth they came from.
//!
//! # Core Principle: One Seed, One Run
//!
//! All randomness (kinematics, hit smearing, outliers, input-state
//! smearing) comes from a `ChaCha8Rng` derived from a single 64-bit seed,
//! so a failing scenario replays exactly.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                      ScenarioRunner                        │
//! │                                                            │
//! │  ┌──────────────┐  hits   ┌──────────────┐  states        │
//! │  │    Oracle    │────────►│  RefitStage  │────────┐       │
//! │  │ (particle    │         │ (FitSession  │        │       │
//! │  │  gun + hits) │         │  per track)  │        ▼       │
//! │  └──────┬───────┘         └──────────────┘  ┌──────────┐  │
//! │         │ truth                              │ Metrics  │  │
//! │         └───────────────────────────────────►│ χ², pull │  │
//! │                                              └──────────┘  │
//! │  ┌──────────────────────────────────────────────────────┐  │
//! │  │ Synthetic detector: barrel + endcap disks, 3.5 T     │  │
//! │  └──────────────────────────────────────────────────────┘  │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use helixfit_sim::{ScenarioRunner, scenarios::ScenarioId};
//!
//! let result = ScenarioRunner::new(42, 100).run(ScenarioId::Barrel);
//! assert!(result.passed);
//! ```

pub mod config;
pub mod detector;
pub mod error;
pub mod exporter;
pub mod oracle;
pub mod refit;
pub mod runner;
pub mod scenarios;

pub use config::{Acceptance, SimConfig};
pub use detector::DetectorConfig;
pub use error::SimError;
pub use exporter::{HelixRecord, HitRecord, SimExport, TrackRecord};
pub use oracle::{GunConfig, Oracle, TruthTrack};
pub use refit::{InputTrack, RefitConfig, RefitOutput, RefitStage, RefitTrack, TrackRelation};
pub use runner::{ScenarioMetrics, ScenarioResult, ScenarioRunner};
