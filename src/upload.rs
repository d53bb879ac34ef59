//! Upload throughput phase.
//!
//! POSTs random payloads as a chunked stream. A shared counter records
//! bytes as the body is pulled off the stream, and a concurrent ticker
//! reads it to produce speed samples mid-request. When a request is too
//! quick or too opaque to sample mid-flight, one coarse whole-request
//! sample stands in, but only if the request ran long enough for its
//! average to mean anything.
//!
//! Repeated failures against one sink rotate to the next configured
//! upload URL rather than burning the remaining phase budget on a dead
//! endpoint.

use crate::buffer::SampleBuffer;
use crate::client::MeasureClient;
use crate::config::ThroughputConfig;
use crate::download::{phase_percent, should_step_up, ThroughputSummary};
use crate::engine::RunState;
use crate::errors::MeasureError;
use crate::events::{EventSender, Phase, TestEvent};
use crate::results::{lock_results, SharedResults};
use crate::stats::speed_mbps;
use log::{debug, info, warn};
use rand::RngCore;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep, Instant, MissedTickBehavior};

/// Stream chunk size for upload bodies. Small enough that the byte
/// counter advances many times per sample interval on ordinary links.
pub(crate) const UPLOAD_CHUNK: usize = 64 * 1024;

pub(crate) struct UploadTester {
    client: Arc<MeasureClient>,
    config: ThroughputConfig,
    history_cap: usize,
    events: EventSender,
    state: watch::Receiver<RunState>,
    results: SharedResults,
}

impl UploadTester {
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
        let mut sink_index = 0usize;
        let mut consecutive_failures = 0u32;
        let mut requests = 0usize;
        let mut errors = 0usize;

        let sinks = self.client.endpoints().upload_urls.clone();

        while Instant::now() < deadline && self.keep_running() {
            let bytes = self.config.payload_sizes
                [size_index.min(self.config.payload_sizes.len() - 1)];
            let url = sinks[sink_index].clone();
            requests += 1;

            match self
                .transfer(&url, bytes, started, duration, &mut accepted)
                .await
            {
                Ok(()) => {
                    consecutive_failures = 0;
                    if size_index + 1 < self.config.payload_sizes.len()
                        && should_step_up(&accepted, &self.config)
                    {
                        size_index += 1;
                        debug!(
                            "upload payload stepping up to {} bytes",
                            self.config.payload_sizes[size_index]
                        );
                    }
                    self.pause(self.config.request_pause).await;
                }
                Err(e) => {
                    errors += 1;
                    consecutive_failures += 1;
                    warn!("upload request failed: {}", e);
                    if consecutive_failures
                        >= self.config.rotate_after_failures
                        && sinks.len() > 1
                    {
                        sink_index = next_sink(sink_index, sinks.len());
                        consecutive_failures = 0;
                        info!(
                            "rotating upload sink to {}",
                            sinks[sink_index]
                        );
                    }
                    self.pause(self.config.error_backoff).await;
                }
            }
        }

        let aggregate = accepted.top_n_mean(self.config.top_n);
        if let Some(mbps) = aggregate {
            lock_results(&self.results).upload_mbps = mbps;
        }
        self.events
            .send(TestEvent::PhaseComplete { phase: Phase::Upload });

        ThroughputSummary {
            aggregate_mbps: aggregate,
            samples: accepted.len(),
            requests,
            errors,
        }
    }

    /// One upload request, sampled mid-flight from the body counter. A
    /// stop request drops the in-flight request future, which aborts the
    /// POST.
    async fn transfer(
        &mut self,
        url: &str,
        bytes: u64,
        phase_started: Instant,
        duration: Duration,
        accepted: &mut SampleBuffer,
    ) -> Result<(), MeasureError> {
        let sent = Arc::new(AtomicU64::new(0));
        let body = chunked_body(
            random_payload(bytes as usize),
            Arc::clone(&sent),
        );

        let request_started = Instant::now();
        let request = self.client.upload(
            url,
            body,
            self.config.request_timeout,
        );
        tokio::pin!(request);

        let mut ticker = tokio::time::interval(self.config.sample_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut counted = 0u64;
        let mut window_started = request_started;
        let mut sampled_granular = false;

        loop {
            tokio::select! {
                result = &mut request => {
                    result?;
                    if !sampled_granular {
                        if let Some(mbps) = coarse_sample(
                            bytes,
                            request_started.elapsed(),
                            &self.config,
                        ) {
                            self.record(
                                mbps,
                                phase_started,
                                duration,
                                accepted,
                            );
                        }
                    }
                    return Ok(());
                }
                _ = ticker.tick() => {
                    let total = sent.load(Ordering::Relaxed);
                    let elapsed = window_started.elapsed();
                    if total > counted {
                        if let Some(mbps) =
                            speed_mbps(total - counted, elapsed.as_secs_f64())
                        {
                            if self.config.accepts(mbps) {
                                sampled_granular = true;
                                self.record(
                                    mbps,
                                    phase_started,
                                    duration,
                                    accepted,
                                );
                            }
                        }
                    }
                    counted = total;
                    window_started = Instant::now();
                }
                changed = self.state.changed() => {
                    if changed.is_err() || !self.keep_running() {
                        return Ok(());
                    }
                }
            }
        }
    }

    fn record(
        &self,
        mbps: f64,
        phase_started: Instant,
        duration: Duration,
        accepted: &mut SampleBuffer,
    ) {
        accepted.push(mbps);
        let live = accepted
            .recent_mean(self.config.live_window)
            .unwrap_or(mbps);
        lock_results(&self.results).upload_mbps = live;

        self.events
            .send(TestEvent::UploadSample { mbps, live_mbps: live });
        self.events.send(TestEvent::Progress {
            phase: Phase::Upload,
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

/// Incompressible payload so transparent compression along the path
/// cannot inflate the measured speed.
pub(crate) fn random_payload(len: usize) -> Vec<u8> {
    let mut payload = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut payload);
    payload
}

/// Wraps the payload in a chunk stream that bumps `sent` as the HTTP
/// stack pulls each chunk, giving the sampler a live byte count.
pub(crate) fn chunked_body(
    payload: Vec<u8>,
    sent: Arc<AtomicU64>,
) -> reqwest::Body {
    let chunks: Vec<Vec<u8>> = payload
        .chunks(UPLOAD_CHUNK)
        .map(|chunk| chunk.to_vec())
        .collect();
    let stream = futures::stream::iter(chunks.into_iter().map(move |chunk| {
        sent.fetch_add(chunk.len() as u64, Ordering::Relaxed);
        Ok::<_, std::io::Error>(chunk)
    }));
    reqwest::Body::wrap_stream(stream)
}

/// One whole-request average when no mid-flight sample landed. Rejected
/// outright for requests shorter than the minimum duration, where the
/// average is dominated by connection setup.
pub(crate) fn coarse_sample(
    bytes: u64,
    elapsed: Duration,
    config: &ThroughputConfig,
) -> Option<f64> {
    if elapsed < config.min_request_duration {
        return None;
    }
    let mbps = speed_mbps(bytes, elapsed.as_secs_f64())?;
    config.accepts(mbps).then_some(mbps)
}

pub(crate) fn next_sink(current: usize, total: usize) -> usize {
    (current + 1) % total
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EndpointConfig;
    use std::sync::Mutex;

    #[test]
    fn test_random_payload_is_incompressible_enough() {
        let payload = random_payload(4096);
        assert_eq!(payload.len(), 4096);
        // All-equal bytes would mean the RNG never ran.
        assert!(payload.iter().any(|&b| b != payload[0]));
    }

    #[test]
    fn test_coarse_sample_rejects_too_short_requests() {
        let config = ThroughputConfig::upload_default();
        assert_eq!(
            coarse_sample(1_000_000, Duration::from_millis(50), &config),
            None
        );
    }

    #[test]
    fn test_coarse_sample_accepts_plausible_requests() {
        let config = ThroughputConfig::upload_default();
        // 1 MB over one second is 8 Mbps.
        let mbps = coarse_sample(
            1_000_000,
            Duration::from_secs(1),
            &config,
        )
        .unwrap();
        assert!((mbps - 8.0).abs() < 1e-9);
    }

    #[test]
    fn test_coarse_sample_rejects_implausible_speeds() {
        let config = ThroughputConfig::upload_default();
        // 100 MB in 200 ms would be 4000 Mbps, over the upload band.
        assert_eq!(
            coarse_sample(
                100_000_000,
                Duration::from_millis(200),
                &config
            ),
            None
        );
    }

    #[test]
    fn test_sink_rotation_wraps() {
        assert_eq!(next_sink(0, 3), 1);
        assert_eq!(next_sink(2, 3), 0);
        assert_eq!(next_sink(0, 1), 0);
    }

    #[test]
    fn test_chunk_counter_advances_as_stream_is_pulled() {
        use futures::executor::block_on;
        use futures::StreamExt;

        let sent = Arc::new(AtomicU64::new(0));
        let payload = vec![7u8; UPLOAD_CHUNK + 100];
        let chunks: Vec<Vec<u8>> = payload
            .chunks(UPLOAD_CHUNK)
            .map(|chunk| chunk.to_vec())
            .collect();
        let counter = Arc::clone(&sent);
        let mut stream =
            futures::stream::iter(chunks.into_iter().map(move |chunk| {
                counter.fetch_add(chunk.len() as u64, Ordering::Relaxed);
                Ok::<_, std::io::Error>(chunk)
            }));

        assert_eq!(sent.load(Ordering::Relaxed), 0);
        block_on(stream.next()).unwrap().unwrap();
        assert_eq!(
            sent.load(Ordering::Relaxed),
            UPLOAD_CHUNK as u64
        );
        block_on(stream.next()).unwrap().unwrap();
        assert_eq!(
            sent.load(Ordering::Relaxed),
            (UPLOAD_CHUNK + 100) as u64
        );
    }

    #[tokio::test]
    async fn test_unreachable_sink_reports_no_data() {
        let endpoints = EndpointConfig {
            probe_url: "http://127.0.0.1:9/probe".to_string(),
            download_url: "http://127.0.0.1:9/down".to_string(),
            upload_urls: vec!["http://127.0.0.1:9/up".to_string()],
        };
        let client = Arc::new(MeasureClient::new(endpoints).unwrap());
        let mut config = ThroughputConfig::upload_default();
        config.payload_sizes = vec![10_000];
        config.error_backoff = Duration::from_millis(10);
        config.request_timeout = Duration::from_millis(300);
        let (events, _rx) = crate::events::channel();
        let (_state_tx, state_rx) = watch::channel(RunState::Running);
        let results: SharedResults =
            Arc::new(Mutex::new(Default::default()));

        let tester = UploadTester::new(
            client,
            config,
            300,
            events,
            state_rx,
            results.clone(),
        );
        let summary = tester.run(Duration::from_millis(150)).await;

        assert_eq!(summary.aggregate_mbps, None);
        assert_eq!(summary.samples, 0);
        assert_eq!(summary.errors, summary.requests);
        assert_eq!(lock_results(&results).upload_mbps, 0.0);
    }
}
