//! Test profiles, endpoint roles and engine configuration.

use crate::errors::MeasureError;
use serde::Serialize;
use std::time::Duration;
use url::Url;

/// Named test profiles selectable by the embedding UI.
///
/// A profile is looked up once per run and never mutated mid-run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TestProfile {
    Quick,
    Normal,
    Extended,
    Long,
}

impl TestProfile {
    /// Resolve the profile to its immutable configuration record.
    pub fn config(self) -> ProfileConfig {
        match self {
            TestProfile::Quick => ProfileConfig {
                phase_duration: Duration::from_secs(8),
                ping_samples: 15,
                ..ProfileConfig::default()
            },
            TestProfile::Normal => ProfileConfig {
                phase_duration: Duration::from_secs(20),
                ping_samples: 40,
                ..ProfileConfig::default()
            },
            TestProfile::Extended => ProfileConfig {
                phase_duration: Duration::from_secs(45),
                ping_samples: 80,
                ..ProfileConfig::default()
            },
            TestProfile::Long => ProfileConfig {
                phase_duration: Duration::from_secs(60),
                ping_samples: 120,
                ..ProfileConfig::default()
            },
        }
    }
}

/// Per-run budget and latency-probe settings resolved from a profile.
#[derive(Debug, Clone)]
pub struct ProfileConfig {
    /// Duration budget for each throughput phase (download, then upload).
    pub phase_duration: Duration,

    /// Number of latency probes to attempt.
    pub ping_samples: usize,

    /// Pause between latency probes.
    /// Default: 50ms
    pub ping_interval: Duration,

    /// Probes at or above this value are counted as lost and excluded
    /// from the valid view used for ping/jitter averaging.
    /// Default: 500ms
    pub ping_valid_ceiling_ms: f64,

    /// Per-probe request timeout.
    /// Default: 3s
    pub ping_timeout: Duration,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            phase_duration: Duration::from_secs(20),
            ping_samples: 40,
            ping_interval: Duration::from_millis(50),
            ping_valid_ceiling_ms: 500.0,
            ping_timeout: Duration::from_secs(3),
        }
    }
}

/// Abstract endpoint roles the engine issues requests against.
///
/// The defaults target Cloudflare's speed-test endpoints but any provider
/// with the same shapes works: the download endpoint must accept a
/// `bytes=N` query parameter and stream that many bytes back, the upload
/// sinks must accept an arbitrary-size POST body.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    /// Low-payload endpoint for round-trip probes.
    pub probe_url: String,
    /// Payload endpoint for download tests; `bytes` query is appended.
    pub download_url: String,
    /// Upload sinks, rotated through on repeated failure.
    pub upload_urls: Vec<String>,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            probe_url: "https://speed.cloudflare.com/__down?bytes=0"
                .to_string(),
            download_url: "https://speed.cloudflare.com/__down".to_string(),
            upload_urls: vec!["https://speed.cloudflare.com/__up".to_string()],
        }
    }
}

impl EndpointConfig {
    /// Validate that every configured endpoint parses as a URL.
    pub fn validate(&self) -> Result<(), MeasureError> {
        let all = std::iter::once(&self.probe_url)
            .chain(std::iter::once(&self.download_url))
            .chain(self.upload_urls.iter());

        for endpoint in all {
            Url::parse(endpoint).map_err(|e| {
                MeasureError::config(format!(
                    "invalid endpoint {}: {}",
                    endpoint, e
                ))
            })?;
        }

        if self.upload_urls.is_empty() {
            return Err(MeasureError::config(
                "at least one upload sink is required",
            ));
        }

        Ok(())
    }
}

/// Tuning for one throughput direction.
#[derive(Debug, Clone)]
pub struct ThroughputConfig {
    /// Ordered payload-size ladder in bytes, smallest first.
    pub payload_sizes: Vec<u64>,

    /// Advance to the next payload size once the trailing average of the
    /// last `trailing_window` samples exceeds this speed.
    pub step_up_mbps: f64,

    /// Number of samples in the step-up trailing average.
    /// Default: 5
    pub trailing_window: usize,

    /// Plausibility band: samples outside `[min_mbps, max_mbps]` are
    /// rejected as measurement noise or zero-duration spikes.
    pub min_mbps: f64,
    pub max_mbps: f64,

    /// Minimum interval between incremental speed samples.
    /// Default: 50ms (download), 100ms (upload)
    pub sample_interval: Duration,

    /// Window for the live "current speed" average shown to observers.
    /// Default: 8
    pub live_window: usize,

    /// Number of top samples averaged into the final aggregate.
    pub top_n: usize,

    /// Pause between consecutive successful requests.
    /// Default: 50ms
    pub request_pause: Duration,

    /// Backoff after a failed request.
    /// Default: 200ms
    pub error_backoff: Duration,

    /// Per-request timeout so a hung connection cannot stall the phase
    /// past its duration budget.
    /// Default: 20s
    pub request_timeout: Duration,

    /// Requests that complete faster than this yield no trustworthy
    /// coarse sample. Gates the upload whole-request fallback only;
    /// download samples are always taken incrementally from the stream.
    /// Default: 150ms
    pub min_request_duration: Duration,

    /// Consecutive failures on one sink before rotating to the next.
    /// Read by the upload tester only, since the download direction has
    /// a single endpoint.
    /// Default: 3
    pub rotate_after_failures: u32,
}

impl ThroughputConfig {
    /// Download defaults: 10/25/50/100 MB ladder, step-up at 30 Mbps,
    /// 0.5-2000 Mbps plausibility band, top-10 final aggregate.
    pub fn download_default() -> Self {
        Self {
            payload_sizes: vec![
                10_000_000,  // 10MB
                25_000_000,  // 25MB
                50_000_000,  // 50MB
                100_000_000, // 100MB
            ],
            step_up_mbps: 30.0,
            trailing_window: 5,
            min_mbps: 0.5,
            max_mbps: 2000.0,
            sample_interval: Duration::from_millis(50),
            live_window: 8,
            top_n: 10,
            request_pause: Duration::from_millis(50),
            error_backoff: Duration::from_millis(200),
            request_timeout: Duration::from_secs(20),
            min_request_duration: Duration::from_millis(150),
            rotate_after_failures: 3,
        }
    }

    /// Upload defaults: smaller 1/2/5/10/20 MB ladder with a lower ceiling
    /// appropriate to typical upload asymmetry, top-8 final aggregate.
    pub fn upload_default() -> Self {
        Self {
            payload_sizes: vec![
                1_000_000,  // 1MB
                2_000_000,  // 2MB
                5_000_000,  // 5MB
                10_000_000, // 10MB
                20_000_000, // 20MB
            ],
            step_up_mbps: 20.0,
            trailing_window: 5,
            min_mbps: 0.5,
            max_mbps: 1000.0,
            sample_interval: Duration::from_millis(100),
            live_window: 8,
            top_n: 8,
            request_pause: Duration::from_millis(50),
            error_backoff: Duration::from_millis(200),
            request_timeout: Duration::from_secs(20),
            min_request_duration: Duration::from_millis(150),
            rotate_after_failures: 3,
        }
    }

    /// Whether a computed sample falls inside the plausibility band.
    pub fn accepts(&self, mbps: f64) -> bool {
        mbps.is_finite() && mbps >= self.min_mbps && mbps <= self.max_mbps
    }

    /// Validate the invariants the testers index and aggregate on.
    pub fn validate(&self, direction: &str) -> Result<(), MeasureError> {
        if self.payload_sizes.is_empty() {
            return Err(MeasureError::config(format!(
                "{} payload ladder must not be empty",
                direction
            )));
        }
        if self.top_n == 0 {
            return Err(MeasureError::config(format!(
                "{} top_n must be at least 1",
                direction
            )));
        }
        Ok(())
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub endpoints: EndpointConfig,
    pub download: ThroughputConfig,
    pub upload: ThroughputConfig,

    /// Soft cap on retained samples per buffer during long runs.
    /// Default: 300
    pub history_cap: usize,

    /// Latency recorded into the full history for a failed probe.
    /// Default: 999ms
    pub ping_failure_sentinel_ms: f64,

    /// Floor for the prober's spike re-check threshold.
    /// Default: 100ms
    pub ping_spike_floor_ms: f64,
}

impl EngineConfig {
    /// Validate the whole configuration before any task spawns. All
    /// fields are public, so a host can construct values the measurement
    /// tasks cannot run on; those are rejected here instead of failing
    /// inside a detached task.
    pub fn validate(&self) -> Result<(), MeasureError> {
        self.endpoints.validate()?;
        self.download.validate("download")?;
        self.upload.validate("upload")?;

        if self.history_cap == 0 {
            return Err(MeasureError::config(
                "history_cap must be at least 1",
            ));
        }

        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            endpoints: EndpointConfig::default(),
            download: ThroughputConfig::download_default(),
            upload: ThroughputConfig::upload_default(),
            history_cap: 300,
            ping_failure_sentinel_ms: 999.0,
            ping_spike_floor_ms: 100.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_durations() {
        assert_eq!(
            TestProfile::Quick.config().phase_duration,
            Duration::from_secs(8)
        );
        assert_eq!(TestProfile::Quick.config().ping_samples, 15);
        assert_eq!(
            TestProfile::Normal.config().phase_duration,
            Duration::from_secs(20)
        );
        assert_eq!(TestProfile::Normal.config().ping_samples, 40);
        assert_eq!(
            TestProfile::Extended.config().phase_duration,
            Duration::from_secs(45)
        );
        assert_eq!(TestProfile::Extended.config().ping_samples, 80);
        assert_eq!(
            TestProfile::Long.config().phase_duration,
            Duration::from_secs(60)
        );
        assert_eq!(TestProfile::Long.config().ping_samples, 120);
    }

    #[test]
    fn test_plausibility_band() {
        let config = ThroughputConfig::download_default();
        assert!(config.accepts(100.0));
        assert!(config.accepts(0.5));
        assert!(config.accepts(2000.0));
        assert!(!config.accepts(0.1));
        // A zero-byte window computes to 0 Mbps and is never accepted.
        assert!(!config.accepts(0.0));
        assert!(!config.accepts(3000.0));
        assert!(!config.accepts(f64::NAN));
        assert!(!config.accepts(f64::INFINITY));
    }

    #[test]
    fn test_payload_ladders_ascend() {
        for config in [
            ThroughputConfig::download_default(),
            ThroughputConfig::upload_default(),
        ] {
            assert!(config
                .payload_sizes
                .windows(2)
                .all(|pair| pair[0] < pair[1]));
        }
    }

    #[test]
    fn test_endpoint_validation() {
        assert!(EndpointConfig::default().validate().is_ok());

        let bad = EndpointConfig {
            probe_url: "not a url".to_string(),
            ..EndpointConfig::default()
        };
        assert!(bad.validate().is_err());

        let empty_sinks = EndpointConfig {
            upload_urls: vec![],
            ..EndpointConfig::default()
        };
        assert!(empty_sinks.validate().is_err());
    }

    #[test]
    fn test_engine_config_validation() {
        assert!(EngineConfig::default().validate().is_ok());

        let mut empty_ladder = EngineConfig::default();
        empty_ladder.download.payload_sizes.clear();
        assert!(empty_ladder.validate().is_err());

        let mut zero_top = EngineConfig::default();
        zero_top.upload.top_n = 0;
        assert!(zero_top.validate().is_err());

        let mut zero_cap = EngineConfig::default();
        zero_cap.history_cap = 0;
        assert!(zero_cap.validate().is_err());
    }
}
