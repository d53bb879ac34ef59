//! Adaptive latency prober.
//!
//! Sends small timed probes at a fixed cadence until its sample budget or
//! deadline is exhausted. A probe that fails records the failure sentinel
//! into the history; a probe that completes above the validity ceiling is
//! kept for graphing but excluded from ping and jitter averages. Both
//! kinds count toward packet loss.
//!
//! When a probe comes back far above the run's baseline the prober halves
//! its interval for the next probe, so a suspected latency spike is
//! re-checked quickly instead of waiting out a full cadence.

use crate::buffer::SampleBuffer;
use crate::client::MeasureClient;
use crate::config::ProfileConfig;
use crate::engine::RunState;
use crate::events::{EventSender, Phase, TestEvent};
use crate::results::{lock_results, LatencyHistory, SharedResults};
use crate::stats::{jitter_f64, mean_f64, stddev_f64};
use log::debug;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep, Instant};

/// What the prober hands back when it stops.
#[derive(Debug, Clone, Default)]
pub struct LatencySummary {
    pub history: LatencyHistory,
    /// Mean of valid samples, `None` when every probe failed or was
    /// over the ceiling.
    pub ping_ms: Option<f64>,
    pub jitter_ms: Option<f64>,
    pub packet_loss_pct: f64,
}

pub(crate) struct LatencyProber {
    client: Arc<MeasureClient>,
    profile: ProfileConfig,
    sentinel_ms: f64,
    spike_floor_ms: f64,
    history_cap: usize,
    events: EventSender,
    state: watch::Receiver<RunState>,
    results: SharedResults,
}

impl LatencyProber {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: Arc<MeasureClient>,
        profile: ProfileConfig,
        sentinel_ms: f64,
        spike_floor_ms: f64,
        history_cap: usize,
        events: EventSender,
        state: watch::Receiver<RunState>,
        results: SharedResults,
    ) -> Self {
        Self {
            client,
            profile,
            sentinel_ms,
            spike_floor_ms,
            history_cap,
            events,
            state,
            results,
        }
    }

    fn keep_running(&self) -> bool {
        *self.state.borrow() == RunState::Running
    }

    /// Probes until the sample budget, the deadline, or a stop request,
    /// whichever comes first.
    pub async fn run(mut self, deadline: Instant) -> LatencySummary {
        let mut history = SampleBuffer::with_capacity(self.history_cap);
        let mut valid = SampleBuffer::with_capacity(self.history_cap);
        let mut probes = 0usize;
        let mut errors = 0usize;
        let budget = self.profile.ping_samples;

        'probing: for sequence in 0..budget {
            if !self.keep_running() || Instant::now() >= deadline {
                break;
            }

            // Dropping the probe future on a stop request aborts the
            // in-flight request instead of waiting out its timeout.
            let probe = self.client.probe(self.profile.ping_timeout);
            tokio::pin!(probe);
            let recorded = loop {
                tokio::select! {
                    result = &mut probe => {
                        break match result {
                            Ok(ms) => ms,
                            Err(e) => {
                                debug!("latency probe failed: {}", e);
                                self.sentinel_ms
                            }
                        };
                    }
                    changed = self.state.changed() => {
                        if changed.is_err() || !self.keep_running() {
                            break 'probing;
                        }
                    }
                }
            };

            probes += 1;
            history.push(recorded);
            let is_valid = recorded < self.profile.ping_valid_ceiling_ms;
            if is_valid {
                valid.push(recorded);
            } else {
                errors += 1;
            }

            let valid_values = valid.values();
            let loss = errors as f64 / probes as f64 * 100.0;
            {
                let mut results = lock_results(&self.results);
                results.packet_loss_pct = loss;
                if let Some(avg) = mean_f64(&valid_values) {
                    results.ping_ms = avg;
                    results.jitter_ms = jitter_f64(&valid_values);
                }
            }

            self.events.send(TestEvent::LatencySample {
                ms: recorded,
                valid: is_valid,
            });
            self.events.send(TestEvent::Progress {
                phase: Phase::Ping,
                percent: (sequence + 1) as f64 / budget as f64 * 100.0,
            });

            let delay = probe_delay(
                &valid_values,
                recorded,
                self.profile.ping_interval,
                self.spike_floor_ms,
            );
            tokio::select! {
                _ = sleep(delay) => {}
                changed = self.state.changed() => {
                    if changed.is_err() || !self.keep_running() {
                        break;
                    }
                }
            }
        }

        self.events.send(TestEvent::PhaseComplete { phase: Phase::Ping });

        let valid_values = valid.values();
        let ping_ms = mean_f64(&valid_values);
        let jitter_ms = match valid_values.len() {
            0 => None,
            _ => Some(jitter_f64(&valid_values)),
        };
        let packet_loss_pct = if probes == 0 {
            0.0
        } else {
            errors as f64 / probes as f64 * 100.0
        };

        LatencySummary {
            history: LatencyHistory {
                all_ms: history.values(),
                valid_ms: valid_values,
                probes,
                errors,
            },
            ping_ms,
            jitter_ms,
            packet_loss_pct,
        }
    }
}

/// Interval until the next probe. Once enough valid samples exist to form
/// a baseline, a sample over the re-check threshold halves the interval
/// so the suspected spike is confirmed or dismissed sooner.
pub(crate) fn probe_delay(
    valid: &[f64],
    last: f64,
    interval: Duration,
    floor_ms: f64,
) -> Duration {
    const MIN_BASELINE: usize = 5;

    if valid.len() < MIN_BASELINE {
        return interval;
    }
    match recheck_threshold(valid, floor_ms) {
        Some(threshold) if last > threshold => interval / 2,
        _ => interval,
    }
}

/// Threshold above which a sample triggers an accelerated re-check:
/// the larger of mean + 3 sigma and 2.5x mean, floored so quiet links
/// with tiny variance do not re-check on millisecond noise.
pub(crate) fn recheck_threshold(valid: &[f64], floor_ms: f64) -> Option<f64> {
    let mean = mean_f64(valid)?;
    let sd = stddev_f64(valid)?;
    Some((mean + 3.0 * sd).max(mean * 2.5).max(floor_ms))
}
