//! Download throughput phase.
//!
//! Repeatedly fetches payloads and samples transfer speed from the byte
//! stream as it arrives, so a single long request still yields many
//! samples. Payload size climbs a ladder once the trailing average shows
//! the link can take it, keeping slow links on small requests and fast
//! links saturated. The final figure averages the top samples so the
//! report reflects sustained peak capacity rather than ramp-up.

use crate::buffer::SampleBuffer;
use crate::client::MeasureClient;
use crate::config::ThroughputConfig;
use crate::engine::RunState;
use crate::errors::MeasureError;
use crate::events::{EventSender, Phase, TestEvent};
use crate::results::{lock_results, SharedResults};
use crate::stats::{mean_f64, speed_mbps};
use futures::StreamExt;
use log::{debug, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep, Instant};

/// What a throughput phase hands back when it stops.
#[derive(Debug, Clone, Default)]
pub struct ThroughputSummary {
    /// Top-N mean of accepted samples, `None` when the phase produced
    /// no usable sample at all.
    pub aggregate_mbps: Option<f64>,
    pub samples: usize,
    pub requests: usize,
    pub errors: usize,
}

pub(crate) struct DownloadTester {
    client: Arc<MeasureClient>,
    config: ThroughputConfig,
    history_cap: usize,
    events: EventSender,
    state: watch::Receiver<RunState>,
    results: SharedResults,
}

impl DownloadTester {
    pub fn new(
        client: Arc<MeasureClient>,
        config: ThroughputConfig,
        history_cap: usize,
        events: EventSender,
        state: watch::Receiver<RunState>,
        results: SharedResults,
    ) -> Self {
        Self { client, config, history_cap, events, state, results }
    }

    fn keep_running(&self) -> bool {
        *self.state.borrow() == RunState::Running
    }

    pub async fn run(mut self, duration: Duration) -> ThroughputSummary {
        let started = Instant::now();
        let deadline = started + duration;
        let mut accepted = SampleBuffer::with_capacity(self.history_cap);
        let mut size_index = 0usize;
        let mut requests = 0usize;
        let mut errors = 0usize;

        while Instant::now() < deadline && self.keep_running() {
            let bytes = self.config.payload_sizes
                [size_index.min(self.config.payload_sizes.len() - 1)];
            requests += 1;

            match self
                .transfer(bytes, deadline, started, duration, &mut accepted)
                .await
            {
                Ok(()) => {
                    if size_index + 1 < self.config.payload_sizes.len()
                        && should_step_up(&accepted, &self.config)
                    {
                        size_index += 1;
                        debug!(
                            "download payload stepping up to {} bytes",
                            self.config.payload_sizes[size_index]
                        );
                    }
                    self.pause(self.config.request_pause).await;
                }
                Err(e) => {
                    errors += 1;
                    warn!("download request failed: {}", e);
                    self.pause(self.config.error_backoff).await;
                }
            }
        }

        let aggregate = accepted.top_n_mean(self.config.top_n);
        if let Some(mbps) = aggregate {
            lock_results(&self.results).download_mbps = mbps;
        }
        self.events
            .send(TestEvent::PhaseComplete { phase: Phase::Download });

        ThroughputSummary {
            aggregate_mbps: aggregate,
            samples: accepted.len(),
            requests,
            errors,
        }
    }

    /// One streamed request. Samples the stream roughly every
    /// `sample_interval`; returns early at the deadline or on stop, which
    /// drops the response and aborts the transfer.
    async fn transfer(
        &mut self,
        bytes: u64,
        deadline: Instant,
        phase_started: Instant,
        duration: Duration,
        accepted: &mut SampleBuffer,
    ) -> Result<(), MeasureError> {
        let response = self
            .client
            .download(bytes, self.config.request_timeout)
            .await?;
        let mut stream = response.bytes_stream();
        let mut window_bytes = 0u64;
        let mut window_started = Instant::now();

        loop {
            tokio::select! {
                chunk = stream.next() => {
                    match chunk {
                        Some(Ok(data)) => {
                            window_bytes += data.len() as u64;
                            let elapsed = window_started.elapsed();
                            if elapsed >= self.config.sample_interval {
                                self.sample(
                                    window_bytes,
                                    elapsed,
                                    phase_started,
                                    duration,
                                    accepted,
                                );
                                window_bytes = 0;
                                window_started = Instant::now();
                            }
                            if Instant::now() >= deadline {
                                return Ok(());
                            }
                        }
                        Some(Err(e)) => {
                            return Err(MeasureError::from_request(
                                "download stream",
                                e,
                            ));
                        }
                        None => return Ok(()),
                    }
                }
                changed = self.state.changed() => {
                    if changed.is_err() || !self.keep_running() {
                        return Ok(());
                    }
                }
            }
        }
    }

    fn sample(
        &self,
        bytes: u64,
        elapsed: Duration,
        phase_started: Instant,
        duration: Duration,
        accepted: &mut SampleBuffer,
    ) {
        let Some(mbps) = speed_mbps(bytes, elapsed.as_secs_f64()) else {
            return;
        };
        if !self.config.accepts(mbps) {
            return;
        }

        accepted.push(mbps);
        let live = accepted
            .recent_mean(self.config.live_window)
            .unwrap_or(mbps);
        lock_results(&self.results).download_mbps = live;

        self.events
            .send(TestEvent::DownloadSample { mbps, live_mbps: live });
        self.events.send(TestEvent::Progress {
            phase: Phase::Download,
            percent: phase_percent(phase_started, duration),
        });
    }

    async fn pause(&mut self, delay: Duration) {
        tokio::select! {
            _ = sleep(delay) => {}
            _ = self.state.changed() => {}
        }
    }
}

/// Whether the trailing window of accepted samples clears the step-up
/// threshold for the next payload size.
pub(crate) fn should_step_up(
    accepted: &SampleBuffer,
    config: &ThroughputConfig,
) -> bool {
    if accepted.len() < config.trailing_window {
        return false;
    }
    match mean_f64(&accepted.recent(config.trailing_window)) {
        Some(avg) => avg > config.step_up_mbps,
        None => false,
    }
}

/// Elapsed share of the phase budget, clamped to 100.
pub(crate) fn phase_percent(started: Instant, duration: Duration) -> f64 {
    if duration.is_zero() {
        return 100.0;
    }
    (started.elapsed().as_secs_f64() / duration.as_secs_f64() * 100.0)
        .min(100.0)
}
