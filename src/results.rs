//! Running aggregates and the final run report.

use crate::scoring::Classification;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};

pub(crate) type SharedResults = Arc<Mutex<TestResults>>;

/// Locks the shared aggregate, recovering from a poisoned mutex. The
/// aggregate holds plain numbers, so a writer that panicked mid-update
/// cannot leave it in an invalid state.
pub(crate) fn lock_results(results: &SharedResults) -> MutexGuard<'_, TestResults> {
    results.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// The live aggregate mutated throughout a run.
///
/// Owned by the orchestrator behind a mutex; testers and the prober write
/// their current figures into it, observers may snapshot it at any time.
/// Reset to zero at the start of each run and frozen into the final
/// [`RunReport`] at the end.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct TestResults {
    pub download_mbps: f64,
    pub upload_mbps: f64,
    pub ping_ms: f64,
    pub jitter_ms: f64,
    pub packet_loss_pct: f64,
}

/// How a phase's measurement concluded.
///
/// Distinguishes "0 Mbps measured" from "measurement failed": a phase that
/// produced zero accepted samples reports `NoData`, never a silent zero.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "lowercase", tag = "outcome", content = "value")]
pub enum Outcome {
    Measured(f64),
    NoData,
}

impl Outcome {
    pub fn from_aggregate(value: Option<f64>) -> Self {
        match value {
            Some(v) => Outcome::Measured(v),
            None => Outcome::NoData,
        }
    }

    pub fn value(&self) -> Option<f64> {
        match self {
            Outcome::Measured(v) => Some(*v),
            Outcome::NoData => None,
        }
    }

    pub fn is_measured(&self) -> bool {
        matches!(self, Outcome::Measured(_))
    }
}

/// Raw latency history for the run, both views.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LatencyHistory {
    /// Every probe, including failure sentinels and over-ceiling samples.
    /// Feeds loss accounting and time-series rendering.
    pub all_ms: Vec<f64>,
    /// Samples under the validity ceiling. Feeds ping/jitter averaging
    /// and spike analysis.
    pub valid_ms: Vec<f64>,
    pub probes: usize,
    pub errors: usize,
}

/// Everything handed to observers when a run finishes.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub timestamp: DateTime<Utc>,
    /// Wall-clock length of the run in seconds.
    pub elapsed_secs: f64,
    /// Whether the run was stopped by the user before its budget expired.
    pub cancelled: bool,
    /// The frozen running aggregate.
    pub results: TestResults,
    pub download: Outcome,
    pub upload: Outcome,
    pub ping: Outcome,
    pub jitter: Outcome,
    pub packet_loss_pct: f64,
    pub latency: LatencyHistory,
    pub classification: Classification,
}
