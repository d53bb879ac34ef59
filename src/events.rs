//! Typed events pushed to the embedding presentation layer.
//!
//! The engine has zero rendering dependencies: observers receive a stream
//! of `TestEvent` values over an unbounded channel and decide what to do
//! with them. Dropping the receiver silently discards further events.

use crate::results::RunReport;
use serde::Serialize;
use std::fmt;
use tokio::sync::mpsc;

/// Which measurement phase an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Ping,
    Download,
    Upload,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Ping => write!(f, "ping"),
            Phase::Download => write!(f, "download"),
            Phase::Upload => write!(f, "upload"),
        }
    }
}

/// Everything the engine tells its observers.
#[derive(Debug, Clone)]
pub enum TestEvent {
    /// A latency probe completed. `valid` is false for failure sentinels
    /// and over-ceiling samples, which feed loss accounting and graphing
    /// but not ping/jitter averages.
    LatencySample { ms: f64, valid: bool },
    /// An accepted download speed sample. `live_mbps` is the smoothed
    /// recent-window average suitable for display.
    DownloadSample { mbps: f64, live_mbps: f64 },
    /// An accepted upload speed sample.
    UploadSample { mbps: f64, live_mbps: f64 },
    /// Progress through a phase's duration or sample budget, 0-100.
    Progress { phase: Phase, percent: f64 },
    PhaseComplete { phase: Phase },
    /// The run finished (naturally or by user stop) and the classifier
    /// has produced the final report.
    RunFinished(Box<RunReport>),
}

/// Sending half handed to every measurement task.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<TestEvent>,
}

impl EventSender {
    /// Push an event, ignoring a dropped receiver.
    pub fn send(&self, event: TestEvent) {
        let _ = self.tx.send(event);
    }
}

pub type EventReceiver = mpsc::UnboundedReceiver<TestEvent>;

pub fn channel() -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSender { tx }, rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_arrive_in_order() {
        let (tx, mut rx) = channel();
        tx.send(TestEvent::LatencySample { ms: 20.0, valid: true });
        tx.send(TestEvent::PhaseComplete { phase: Phase::Ping });

        match rx.try_recv().unwrap() {
            TestEvent::LatencySample { ms, valid } => {
                assert_eq!(ms, 20.0);
                assert!(valid);
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(matches!(
            rx.try_recv().unwrap(),
            TestEvent::PhaseComplete { phase: Phase::Ping }
        ));
    }

    #[test]
    fn test_send_after_receiver_dropped_is_silent() {
        let (tx, rx) = channel();
        drop(rx);
        // Must not panic or error.
        tx.send(TestEvent::Progress { phase: Phase::Download, percent: 50.0 });
    }
}
