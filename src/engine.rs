//! Run orchestration.
//!
//! `TestEngine` owns the state machine for a measurement run: latency
//! probing starts in the background, the download and upload phases run
//! in sequence against it, and finalization freezes the aggregates,
//! classifies them once, and emits the report. Keeping throughput phases
//! sequential means neither contends with the other for the link, at the
//! cost of a longer run.
//!
//! All cancellation is cooperative through a single watch channel. Every
//! task checks it at its next natural boundary (a chunk, a tick, a
//! pause) and in-flight requests are dropped rather than awaited.

use crate::client::MeasureClient;
use crate::config::{EngineConfig, ProfileConfig, TestProfile};
use crate::download::{DownloadTester, ThroughputSummary};
use crate::errors::MeasureError;
use crate::events::{self, EventSender, TestEvent};
use crate::ping::{LatencyProber, LatencySummary};
use crate::results::{
    lock_results, Outcome, RunReport, SharedResults, TestResults,
};
use crate::scoring::{classify, ClassifierInput};
use crate::upload::UploadTester;
use chrono::Utc;
use log::{info, warn};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::time::Instant;

/// Lifecycle of the engine.
///
/// `Stopping` covers both a user stop request and the natural wind-down
/// at the end of a run; either way tasks drain and finalization still
/// runs over whatever was collected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    Stopping,
}

/// The embedding surface: construct once, start runs, observe events.
pub struct TestEngine {
    config: EngineConfig,
    client: Arc<MeasureClient>,
    state: watch::Sender<RunState>,
    events: EventSender,
    results: SharedResults,
}

impl TestEngine {
    /// Builds an engine and the event stream observers consume. Fails on
    /// invalid configuration; a value that passes here cannot panic a
    /// measurement task later.
    pub fn new(
        config: EngineConfig,
    ) -> Result<(Self, events::EventReceiver), MeasureError> {
        config.validate()?;
        let client =
            Arc::new(MeasureClient::new(config.endpoints.clone())?);
        let (events, receiver) = events::channel();
        let (state, _) = watch::channel(RunState::Idle);
        let engine = Self {
            config,
            client,
            state,
            events,
            results: Arc::new(Mutex::new(TestResults::default())),
        };
        Ok((engine, receiver))
    }

    pub fn state(&self) -> RunState {
        *self.state.borrow()
    }

    /// Snapshot of the live aggregate, valid at any point in a run.
    pub fn snapshot(&self) -> TestResults {
        *lock_results(&self.results)
    }

    /// Starts a run with one of the named profiles.
    pub fn start(&self, profile: TestProfile) -> Result<(), MeasureError> {
        self.start_with(profile.config())
    }

    /// Starts a run with an explicit profile. Rejected while a run is
    /// active; the previous run's aggregate is reset before any task
    /// spawns.
    pub fn start_with(
        &self,
        profile: ProfileConfig,
    ) -> Result<(), MeasureError> {
        // Transition under the watch channel's lock so concurrent starts
        // on a shared engine admit exactly one run.
        let admitted = self.state.send_if_modified(|state| {
            if *state == RunState::Idle {
                *state = RunState::Running;
                true
            } else {
                false
            }
        });
        if !admitted {
            return Err(MeasureError::config(
                "a measurement run is already active",
            ));
        }

        *lock_results(&self.results) = TestResults::default();

        let runner = Runner {
            config: self.config.clone(),
            profile,
            client: Arc::clone(&self.client),
            events: self.events.clone(),
            state: self.state.clone(),
            results: Arc::clone(&self.results),
        };
        tokio::spawn(runner.run());
        Ok(())
    }

    /// Requests a cooperative stop. A no-op unless a run is active;
    /// finalization still happens over the partial data.
    pub fn stop(&self) {
        if self.state() == RunState::Running {
            self.state.send_replace(RunState::Stopping);
        }
    }
}

struct Runner {
    config: EngineConfig,
    profile: ProfileConfig,
    client: Arc<MeasureClient>,
    events: EventSender,
    state: watch::Sender<RunState>,
    results: SharedResults,
}

impl Runner {
    async fn run(self) {
        let started = Instant::now();
        let timestamp = Utc::now();
        info!(
            "starting measurement run: {} latency samples, {:?} per throughput phase",
            self.profile.ping_samples, self.profile.phase_duration
        );

        // The prober outlives both throughput phases; its own sample
        // budget usually ends it well before this deadline.
        let prober_deadline = started + self.profile.phase_duration * 2;
        let prober = LatencyProber::new(
            Arc::clone(&self.client),
            self.profile.clone(),
            self.config.ping_failure_sentinel_ms,
            self.config.ping_spike_floor_ms,
            self.config.history_cap,
            self.events.clone(),
            self.state.subscribe(),
            Arc::clone(&self.results),
        );
        let latency_task = tokio::spawn(prober.run(prober_deadline));

        let download = DownloadTester::new(
            Arc::clone(&self.client),
            self.config.download.clone(),
            self.config.history_cap,
            self.events.clone(),
            self.state.subscribe(),
            Arc::clone(&self.results),
        )
        .run(self.profile.phase_duration)
        .await;

        let upload = UploadTester::new(
            Arc::clone(&self.client),
            self.config.upload.clone(),
            self.config.history_cap,
            self.events.clone(),
            self.state.subscribe(),
            Arc::clone(&self.results),
        )
        .run(self.profile.phase_duration)
        .await;

        // Stopping was requested by the user if it arrived before the
        // phases wound down on their own.
        let cancelled = *self.state.borrow() == RunState::Stopping;
        self.state.send_replace(RunState::Stopping);

        let latency = match latency_task.await {
            Ok(summary) => summary,
            Err(e) => {
                warn!("latency prober task failed: {}", e);
                LatencySummary::default()
            }
        };

        let report = self.finalize(
            timestamp,
            started.elapsed().as_secs_f64(),
            cancelled,
            latency,
            download,
            upload,
        );
        info!(
            "run finished: download {:?}, upload {:?}, ping {:?}, loss {:.1}%",
            report.download, report.upload, report.ping,
            report.packet_loss_pct
        );
        self.events.send(TestEvent::RunFinished(Box::new(report)));
        self.state.send_replace(RunState::Idle);
    }

    /// Freezes the aggregate and classifies it exactly once.
    fn finalize(
        &self,
        timestamp: chrono::DateTime<Utc>,
        elapsed_secs: f64,
        cancelled: bool,
        latency: LatencySummary,
        download: ThroughputSummary,
        upload: ThroughputSummary,
    ) -> RunReport {
        let results = *lock_results(&self.results);

        let classification = classify(&ClassifierInput {
            download_mbps: download.aggregate_mbps,
            upload_mbps: upload.aggregate_mbps,
            ping_ms: latency.ping_ms,
            jitter_ms: latency.jitter_ms,
            packet_loss_pct: latency.packet_loss_pct,
            valid_pings: &latency.history.valid_ms,
        });

        RunReport {
            timestamp,
            elapsed_secs,
            cancelled,
            results,
            download: Outcome::from_aggregate(download.aggregate_mbps),
            upload: Outcome::from_aggregate(upload.aggregate_mbps),
            ping: Outcome::from_aggregate(latency.ping_ms),
            jitter: Outcome::from_aggregate(latency.jitter_ms),
            packet_loss_pct: latency.packet_loss_pct,
            latency: latency.history,
            classification,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EndpointConfig;
    use crate::scoring::QualityScore;
    use std::time::Duration;

    fn unreachable_config() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.endpoints = EndpointConfig {
            probe_url: "http://127.0.0.1:9/probe".to_string(),
            download_url: "http://127.0.0.1:9/down".to_string(),
            upload_urls: vec!["http://127.0.0.1:9/up".to_string()],
        };
        config.download.error_backoff = Duration::from_millis(10);
        config.download.request_timeout = Duration::from_millis(300);
        config.upload.error_backoff = Duration::from_millis(10);
        config.upload.request_timeout = Duration::from_millis(300);
        config
    }

    fn tiny_profile() -> ProfileConfig {
        ProfileConfig {
            phase_duration: Duration::from_millis(150),
            ping_samples: 3,
            ping_interval: Duration::from_millis(5),
            ping_valid_ceiling_ms: 500.0,
            ping_timeout: Duration::from_millis(300),
        }
    }

    async fn wait_for_report(
        receiver: &mut events::EventReceiver,
    ) -> Box<RunReport> {
        loop {
            match receiver.recv().await {
                Some(TestEvent::RunFinished(report)) => return report,
                Some(_) => continue,
                None => panic!("event stream closed before the report"),
            }
        }
    }

    #[test]
    fn test_new_rejects_degenerate_config() {
        // A config the tasks cannot run on must fail construction, not
        // panic inside a detached task and wedge the state machine.
        let mut empty_ladder = unreachable_config();
        empty_ladder.download.payload_sizes.clear();
        assert!(TestEngine::new(empty_ladder).is_err());

        let mut zero_cap = unreachable_config();
        zero_cap.history_cap = 0;
        assert!(TestEngine::new(zero_cap).is_err());

        let mut zero_top = unreachable_config();
        zero_top.upload.top_n = 0;
        assert!(TestEngine::new(zero_top).is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_starts_admit_exactly_one_run() {
        let (engine, mut receiver) =
            TestEngine::new(unreachable_config()).unwrap();
        let engine = Arc::new(engine);

        let mut attempts = Vec::new();
        for _ in 0..8 {
            let engine = Arc::clone(&engine);
            attempts.push(tokio::spawn(async move {
                engine.start_with(tiny_profile()).is_ok()
            }));
        }

        let mut admitted = 0;
        for attempt in attempts {
            if attempt.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 1);

        let _ = wait_for_report(&mut receiver).await;
        assert_eq!(engine.state(), RunState::Idle);
    }

    #[tokio::test]
    async fn test_run_on_dead_network_reports_no_data_not_zero() {
        let (engine, mut receiver) =
            TestEngine::new(unreachable_config()).unwrap();

        engine.start_with(tiny_profile()).unwrap();
        assert_eq!(engine.state(), RunState::Running);

        // A second start while running is rejected.
        assert!(engine.start(TestProfile::Quick).is_err());

        let report = wait_for_report(&mut receiver).await;

        assert!(!report.cancelled);
        assert!(!report.download.is_measured());
        assert!(!report.upload.is_measured());
        assert!(!report.ping.is_measured());
        assert!(!report.jitter.is_measured());
        assert_eq!(report.packet_loss_pct, 100.0);
        assert_eq!(report.latency.probes, 3);
        assert_eq!(report.latency.all_ms.len(), 3);
        assert!(report.latency.valid_ms.is_empty());
        // Unmeasured metrics gate every use case to the floor.
        assert_eq!(
            report.classification.use_cases.web_browsing,
            QualityScore::Poor
        );
        assert_eq!(
            report.classification.use_cases.gaming,
            QualityScore::Poor
        );
        assert_eq!(engine.state(), RunState::Idle);
    }

    #[tokio::test]
    async fn test_stop_cancels_and_still_finalizes() {
        let (engine, mut receiver) =
            TestEngine::new(unreachable_config()).unwrap();
        let profile = ProfileConfig {
            phase_duration: Duration::from_secs(10),
            ping_samples: 200,
            ..tiny_profile()
        };

        engine.start_with(profile).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        engine.stop();

        let report = wait_for_report(&mut receiver).await;
        assert!(report.cancelled);
        assert!(report.elapsed_secs < 5.0);
        assert_eq!(engine.state(), RunState::Idle);
    }

    #[tokio::test]
    async fn test_engine_is_reusable_after_a_run() {
        let (engine, mut receiver) =
            TestEngine::new(unreachable_config()).unwrap();

        engine.start_with(tiny_profile()).unwrap();
        let first = wait_for_report(&mut receiver).await;
        assert_eq!(first.latency.probes, 3);

        engine.start_with(tiny_profile()).unwrap();
        let second = wait_for_report(&mut receiver).await;
        assert_eq!(second.latency.probes, 3);
        assert_eq!(engine.state(), RunState::Idle);
    }

    #[tokio::test]
    async fn test_snapshot_is_reset_between_runs() {
        let (engine, mut receiver) =
            TestEngine::new(unreachable_config()).unwrap();

        engine.start_with(tiny_profile()).unwrap();
        let _ = wait_for_report(&mut receiver).await;
        // Aggregate keeps the finished run's loss until the next start.
        assert_eq!(engine.snapshot().packet_loss_pct, 100.0);

        engine.start_with(tiny_profile()).unwrap();
        let _ = wait_for_report(&mut receiver).await;
        assert_eq!(engine.snapshot().download_mbps, 0.0);
    }
}
