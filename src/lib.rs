//! Embeddable internet connection measurement engine.
//!
//! `netgauge` measures a connection the way a person experiences it:
//! latency and jitter from timed HTTP probes, download and upload
//! throughput from adaptive streamed transfers, and packet loss from
//! probe failures. The raw numbers are then classified into quality
//! tiers per use case (browsing, video, gaming, video calls) so a host
//! application can show "good for 4K streaming" instead of a bare Mbps
//! figure.
//!
//! The crate is a library with no interface of its own. The host
//! constructs a [`TestEngine`], starts a run with a [`TestProfile`], and
//! consumes [`TestEvent`]s from the returned receiver:
//!
//! ```no_run
//! use netgauge::{EngineConfig, TestEngine, TestEvent, TestProfile};
//!
//! # async fn demo() -> Result<(), netgauge::MeasureError> {
//! let (engine, mut events) = TestEngine::new(EngineConfig::default())?;
//! engine.start(TestProfile::Normal)?;
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         TestEvent::DownloadSample { live_mbps, .. } => {
//!             println!("download: {live_mbps:.1} Mbps");
//!         }
//!         TestEvent::RunFinished(report) => {
//!             println!("{}", report.classification.use_cases.web_browsing);
//!             break;
//!         }
//!         _ => {}
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Runs are cooperative: [`TestEngine::stop`] winds the tasks down at
//! their next boundary and the final report still covers whatever was
//! measured.

mod buffer;
mod client;
mod config;
mod download;
mod engine;
mod errors;
mod events;
mod ping;
mod results;
mod scoring;
mod stats;
mod upload;

pub use buffer::SampleBuffer;
pub use client::MeasureClient;
pub use config::{
    EndpointConfig, EngineConfig, ProfileConfig, TestProfile,
    ThroughputConfig,
};
pub use engine::{RunState, TestEngine};
pub use errors::{ErrorKind, MeasureError};
pub use events::{EventReceiver, EventSender, Phase, TestEvent};
pub use ping::LatencySummary;
pub use results::{LatencyHistory, Outcome, RunReport, TestResults};
pub use scoring::{
    analyze_spikes, classify, Bufferbloat, Classification,
    ClassifierInput, GamingGenreScores, QualityScore, SpikeAnalysis,
    UseCaseScores,
};
