//! Error types for the measurement engine.
//!
//! Nothing in this crate is fatal to the host process: individual probe or
//! transfer failures degrade to a retry, a loss-counted sample, or a
//! no-data result field. `MeasureError` therefore only surfaces at the API
//! boundary (invalid configuration, starting an already-running engine) and
//! inside the transfer plumbing where failed iterations are logged and
//! counted.

use std::error::Error;
use std::fmt;

/// Categories of errors that can occur during a measurement run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A single request failed or the endpoint rejected it.
    Network,
    /// A request exceeded its timeout.
    Timeout,
    /// Invalid configuration or invalid engine state for the call.
    Config,
}

impl ErrorKind {
    pub fn description(&self) -> &'static str {
        match self {
            ErrorKind::Network => "Network error",
            ErrorKind::Timeout => "Request timeout",
            ErrorKind::Config => "Configuration error",
        }
    }
}

#[derive(Debug)]
pub struct MeasureError {
    pub kind: ErrorKind,
    pub message: String,
    pub source: Option<Box<dyn Error + Send + Sync>>,
}

impl MeasureError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into(), source: None }
    }

    pub fn with_source(
        mut self,
        source: impl Error + Send + Sync + 'static,
    ) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config, message)
    }

    /// Classify a transport error from reqwest into the right kind.
    pub fn from_request(context: &str, error: reqwest::Error) -> Self {
        let kind = if error.is_timeout() {
            ErrorKind::Timeout
        } else {
            ErrorKind::Network
        };

        Self::new(kind, format!("{}: {}", context, error)).with_source(error)
    }
}

impl fmt::Display for MeasureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.description(), self.message)
    }
}

impl Error for MeasureError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as &(dyn Error + 'static))
    }
}
