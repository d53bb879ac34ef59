//! Derived statistics and connection-quality classification.
//!
//! Everything here is a pure function of the final aggregates and the
//! latency history: no network I/O, no randomness, no hidden state.
//! Thresholds are declarative constants so tests can enumerate boundary
//! values exactly at each cutoff.
//!
//! Use-case threshold tables (speeds in Mbps, times in ms):
//!
//! | use case      | metric   | Excellent | Good  | Fair  | Poor    |
//! |---------------|----------|-----------|-------|-------|---------|
//! | web browsing  | download | >=10      | >=5   | >=2   | <2      |
//! | HD video      | download | >=25      | >=10  | >=5   | <5      |
//! | 4K streaming  | download | >=50      | >=35  | >=25  | <25     |
//! | bulk download | download | >=50      | >=20  | >=5   | <5      |
//! | gaming        | ping     | <=50      | <=80  | <=100 | >100    |
//! | gaming        | jitter   | <=20      | <=40  | <=60  | >60     |
//! | video calls   | download | >=10      | >=5   | >=2   | <2      |
//! | video calls   | upload   | >=10      | >=5   | >=2   | <2      |
//! | video calls   | ping     | <=50      | <=100 | <=150 | >150    |
//!
//! Multi-metric use cases take the minimum of their per-metric tiers. A
//! metric that could not be measured pins the tiers gated on it to Poor
//! rather than silently passing.

use crate::stats::{mean_f64, stddev_f64};
use serde::Serialize;
use std::fmt;

/// Spike threshold: a valid latency sample is a spike when it exceeds
/// `max(mean + K * stddev, mean * C)` over the valid history.
///
/// K = 2.0 and C = 2.5. With K = 3 a short history with one large outlier
/// inflates the stddev enough to hide the outlier itself.
pub const SPIKE_STDDEV_K: f64 = 2.0;
pub const SPIKE_MEAN_C: f64 = 2.5;

/// Quality tier for a specific use case, ordered worst to best.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityScore {
    Poor,
    Fair,
    Good,
    Excellent,
}

impl QualityScore {
    pub fn description(&self) -> &'static str {
        match self {
            QualityScore::Excellent => "Excellent",
            QualityScore::Good => "Good",
            QualityScore::Fair => "Fair",
            QualityScore::Poor => "Poor",
        }
    }

    /// Relabeled tier names for the bulk-download use case.
    pub fn transfer_label(&self) -> &'static str {
        match self {
            QualityScore::Excellent => "Very Fast",
            QualityScore::Good => "Fast",
            QualityScore::Fair => "Moderate",
            QualityScore::Poor => "Slow",
        }
    }

    pub fn is_at_least(&self, other: QualityScore) -> bool {
        *self >= other
    }
}

impl fmt::Display for QualityScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Bufferbloat severity inferred from jitter and packet loss, ordered
/// worst to best.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Bufferbloat {
    Poor,
    Fair,
    Good,
}

impl Bufferbloat {
    pub fn description(&self) -> &'static str {
        match self {
            Bufferbloat::Good => "Good",
            Bufferbloat::Fair => "Fair",
            Bufferbloat::Poor => "Poor",
        }
    }
}

impl fmt::Display for Bufferbloat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

mod bufferbloat_thresholds {
    /// Jitter (ms) above which the connection is rated Poor / Fair.
    pub const JITTER_POOR: f64 = 50.0;
    pub const JITTER_FAIR: f64 = 20.0;

    /// Packet loss (percent) above which the rating is Poor / Fair.
    pub const LOSS_POOR: f64 = 3.0;
    pub const LOSS_FAIR: f64 = 1.0;
}

mod web_thresholds {
    pub const DOWNLOAD_EXCELLENT: f64 = 10.0;
    pub const DOWNLOAD_GOOD: f64 = 5.0;
    pub const DOWNLOAD_FAIR: f64 = 2.0;
}

mod hd_video_thresholds {
    pub const DOWNLOAD_EXCELLENT: f64 = 25.0;
    pub const DOWNLOAD_GOOD: f64 = 10.0;
    pub const DOWNLOAD_FAIR: f64 = 5.0;
}

mod streaming_4k_thresholds {
    pub const DOWNLOAD_EXCELLENT: f64 = 50.0;
    pub const DOWNLOAD_GOOD: f64 = 35.0;
    pub const DOWNLOAD_FAIR: f64 = 25.0;
}

mod bulk_download_thresholds {
    pub const DOWNLOAD_EXCELLENT: f64 = 50.0;
    pub const DOWNLOAD_GOOD: f64 = 20.0;
    pub const DOWNLOAD_FAIR: f64 = 5.0;
}

mod gaming_thresholds {
    pub const PING_EXCELLENT: f64 = 50.0;
    pub const PING_GOOD: f64 = 80.0;
    pub const PING_FAIR: f64 = 100.0;

    pub const JITTER_EXCELLENT: f64 = 20.0;
    pub const JITTER_GOOD: f64 = 40.0;
    pub const JITTER_FAIR: f64 = 60.0;
}

mod video_call_thresholds {
    pub const DOWNLOAD_EXCELLENT: f64 = 10.0;
    pub const DOWNLOAD_GOOD: f64 = 5.0;
    pub const DOWNLOAD_FAIR: f64 = 2.0;

    pub const UPLOAD_EXCELLENT: f64 = 10.0;
    pub const UPLOAD_GOOD: f64 = 5.0;
    pub const UPLOAD_FAIR: f64 = 2.0;

    pub const PING_EXCELLENT: f64 = 50.0;
    pub const PING_GOOD: f64 = 100.0;
    pub const PING_FAIR: f64 = 150.0;
}

/// Genre-specific gaming cutoffs: a rating drops to the named tier once
/// ping or jitter exceeds the paired values.
mod genre_thresholds {
    /// (ping, jitter) ceilings for Excellent / Good / Fair; above the Fair
    /// ping ceiling the rating is Poor.
    pub const FPS: [(f64, f64); 3] = [(50.0, 20.0), (80.0, 40.0), (120.0, f64::MAX)];
    pub const MOBA: [(f64, f64); 3] = [(70.0, 30.0), (100.0, 50.0), (150.0, f64::MAX)];
    pub const BATTLE_ROYALE: [(f64, f64); 3] = [(60.0, 25.0), (90.0, 45.0), (130.0, f64::MAX)];
}

/// Outlier analysis of the valid latency history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpikeAnalysis {
    /// Statistical spike threshold in ms, when computable (>= 2 samples).
    pub threshold_ms: Option<f64>,
    /// Number of samples exceeding the threshold.
    pub spike_count: usize,
    pub min_ping_ms: Option<f64>,
    pub max_ping_ms: Option<f64>,
}

/// Per-use-case suitability tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UseCaseScores {
    pub web_browsing: QualityScore,
    pub hd_video: QualityScore,
    pub streaming_4k: QualityScore,
    pub gaming: QualityScore,
    pub video_calls: QualityScore,
    pub bulk_download: QualityScore,
}

/// Genre-specific gaming ratings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GamingGenreScores {
    pub fps: QualityScore,
    pub moba: QualityScore,
    pub battle_royale: QualityScore,
}

/// Complete classifier output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    pub bufferbloat: Bufferbloat,
    pub spikes: SpikeAnalysis,
    /// Best-case ping (minimum valid sample), the figure that matters for
    /// real-time gaming.
    pub gaming_latency_ms: Option<f64>,
    pub use_cases: UseCaseScores,
    pub genres: GamingGenreScores,
}

/// Final aggregates fed into the classifier. `None` means the phase
/// produced no accepted samples and the metric could not be measured.
#[derive(Debug, Clone, Copy)]
pub struct ClassifierInput<'a> {
    pub download_mbps: Option<f64>,
    pub upload_mbps: Option<f64>,
    pub ping_ms: Option<f64>,
    pub jitter_ms: Option<f64>,
    pub packet_loss_pct: f64,
    /// Valid latency samples (failure sentinels excluded).
    pub valid_pings: &'a [f64],
}

/// Classify a finished (possibly partial) run.
pub fn classify(input: &ClassifierInput) -> Classification {
    Classification {
        bufferbloat: bufferbloat_tier(
            input.jitter_ms,
            input.packet_loss_pct,
        ),
        spikes: analyze_spikes(input.valid_pings),
        gaming_latency_ms: input
            .valid_pings
            .iter()
            .copied()
            .fold(None, |acc: Option<f64>, v| {
                Some(acc.map_or(v, |m| m.min(v)))
            }),
        use_cases: UseCaseScores {
            web_browsing: download_tier(
                input.download_mbps,
                web_thresholds::DOWNLOAD_EXCELLENT,
                web_thresholds::DOWNLOAD_GOOD,
                web_thresholds::DOWNLOAD_FAIR,
            ),
            hd_video: download_tier(
                input.download_mbps,
                hd_video_thresholds::DOWNLOAD_EXCELLENT,
                hd_video_thresholds::DOWNLOAD_GOOD,
                hd_video_thresholds::DOWNLOAD_FAIR,
            ),
            streaming_4k: download_tier(
                input.download_mbps,
                streaming_4k_thresholds::DOWNLOAD_EXCELLENT,
                streaming_4k_thresholds::DOWNLOAD_GOOD,
                streaming_4k_thresholds::DOWNLOAD_FAIR,
            ),
            gaming: gaming_tier(input.ping_ms, input.jitter_ms),
            video_calls: video_call_tier(
                input.download_mbps,
                input.upload_mbps,
                input.ping_ms,
            ),
            bulk_download: download_tier(
                input.download_mbps,
                bulk_download_thresholds::DOWNLOAD_EXCELLENT,
                bulk_download_thresholds::DOWNLOAD_GOOD,
                bulk_download_thresholds::DOWNLOAD_FAIR,
            ),
        },
        genres: GamingGenreScores {
            fps: genre_tier(
                input.ping_ms,
                input.jitter_ms,
                &genre_thresholds::FPS,
            ),
            moba: genre_tier(
                input.ping_ms,
                input.jitter_ms,
                &genre_thresholds::MOBA,
            ),
            battle_royale: genre_tier(
                input.ping_ms,
                input.jitter_ms,
                &genre_thresholds::BATTLE_ROYALE,
            ),
        },
    }
}

/// Spike detection over the valid latency history.
///
/// Threshold is `max(mean + K * stddev, mean * C)` and requires at least
/// two samples; min/max are reported for any non-empty history.
pub fn analyze_spikes(valid_pings: &[f64]) -> SpikeAnalysis {
    let min_ping_ms = valid_pings
        .iter()
        .copied()
        .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |m| m.min(v))));
    let max_ping_ms = valid_pings
        .iter()
        .copied()
        .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |m| m.max(v))));

    if valid_pings.len() < 2 {
        return SpikeAnalysis {
            threshold_ms: None,
            spike_count: 0,
            min_ping_ms,
            max_ping_ms,
        };
    }

    // Both unwraps are safe: the slice has >= 2 elements here.
    let mean = mean_f64(valid_pings).unwrap();
    let stddev = stddev_f64(valid_pings).unwrap();

    let threshold = (mean + SPIKE_STDDEV_K * stddev).max(mean * SPIKE_MEAN_C);
    let spike_count =
        valid_pings.iter().filter(|&&p| p > threshold).count();

    SpikeAnalysis {
        threshold_ms: Some(threshold),
        spike_count,
        min_ping_ms,
        max_ping_ms,
    }
}

fn bufferbloat_tier(jitter_ms: Option<f64>, packet_loss_pct: f64) -> Bufferbloat {
    use bufferbloat_thresholds::*;

    let jitter = jitter_ms.unwrap_or(0.0);

    let jitter_tier = if jitter > JITTER_POOR {
        Bufferbloat::Poor
    } else if jitter > JITTER_FAIR {
        Bufferbloat::Fair
    } else {
        Bufferbloat::Good
    };

    let loss_tier = if packet_loss_pct > LOSS_POOR {
        Bufferbloat::Poor
    } else if packet_loss_pct > LOSS_FAIR {
        Bufferbloat::Fair
    } else {
        Bufferbloat::Good
    };

    jitter_tier.min(loss_tier)
}

/// Step function over a download speed. An unmeasured speed is Poor.
fn download_tier(
    mbps: Option<f64>,
    excellent: f64,
    good: f64,
    fair: f64,
) -> QualityScore {
    match mbps {
        Some(v) if v >= excellent => QualityScore::Excellent,
        Some(v) if v >= good => QualityScore::Good,
        Some(v) if v >= fair => QualityScore::Fair,
        Some(_) => QualityScore::Poor,
        None => QualityScore::Poor,
    }
}

fn gaming_tier(ping_ms: Option<f64>, jitter_ms: Option<f64>) -> QualityScore {
    use gaming_thresholds::*;

    let Some(ping) = ping_ms else {
        return QualityScore::Poor;
    };
    let jitter = jitter_ms.unwrap_or(0.0);

    let ping_score = if ping <= PING_EXCELLENT {
        QualityScore::Excellent
    } else if ping <= PING_GOOD {
        QualityScore::Good
    } else if ping <= PING_FAIR {
        QualityScore::Fair
    } else {
        QualityScore::Poor
    };

    let jitter_score = if jitter <= JITTER_EXCELLENT {
        QualityScore::Excellent
    } else if jitter <= JITTER_GOOD {
        QualityScore::Good
    } else if jitter <= JITTER_FAIR {
        QualityScore::Fair
    } else {
        QualityScore::Poor
    };

    ping_score.min(jitter_score)
}

fn video_call_tier(
    download_mbps: Option<f64>,
    upload_mbps: Option<f64>,
    ping_ms: Option<f64>,
) -> QualityScore {
    use video_call_thresholds::*;

    let download_score = download_tier(
        download_mbps,
        DOWNLOAD_EXCELLENT,
        DOWNLOAD_GOOD,
        DOWNLOAD_FAIR,
    );
    let upload_score = download_tier(
        upload_mbps,
        UPLOAD_EXCELLENT,
        UPLOAD_GOOD,
        UPLOAD_FAIR,
    );

    let ping_score = match ping_ms {
        Some(p) if p <= PING_EXCELLENT => QualityScore::Excellent,
        Some(p) if p <= PING_GOOD => QualityScore::Good,
        Some(p) if p <= PING_FAIR => QualityScore::Fair,
        _ => QualityScore::Poor,
    };

    [download_score, upload_score, ping_score].into_iter().min().unwrap()
}

fn genre_tier(
    ping_ms: Option<f64>,
    jitter_ms: Option<f64>,
    ceilings: &[(f64, f64); 3],
) -> QualityScore {
    let Some(ping) = ping_ms else {
        return QualityScore::Poor;
    };
    let jitter = jitter_ms.unwrap_or(0.0);

    let [(ping_exc, jit_exc), (ping_good, jit_good), (ping_fair, _)] =
        *ceilings;

    if ping > ping_fair {
        QualityScore::Poor
    } else if ping > ping_good || jitter > jit_good {
        QualityScore::Fair
    } else if ping > ping_exc || jitter > jit_exc {
        QualityScore::Good
    } else {
        QualityScore::Excellent
    }
}
