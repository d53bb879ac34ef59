//! HTTP measurement client.
//!
//! One shared `reqwest::Client` issues every request of a run: lightweight
//! round-trip probes, streamed download transfers, and chunked upload
//! posts. Timeouts are per-request so a single hung connection cannot
//! stall a phase past its duration budget.

use crate::config::EndpointConfig;
use crate::errors::MeasureError;
use reqwest::header::{HeaderValue, CACHE_CONTROL};
use reqwest::{Body, Client as HttpClient, Response};
use std::time::Duration;
use tokio::time::Instant;

const UA: &str =
    concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone)]
pub struct MeasureClient {
    http: HttpClient,
    endpoints: EndpointConfig,
}

impl MeasureClient {
    pub fn new(endpoints: EndpointConfig) -> Result<Self, MeasureError> {
        endpoints.validate()?;

        let http = HttpClient::builder().user_agent(UA).build().map_err(
            |e| {
                MeasureError::config("failed to build HTTP client")
                    .with_source(e)
            },
        )?;

        Ok(Self { http, endpoints })
    }

    pub fn endpoints(&self) -> &EndpointConfig {
        &self.endpoints
    }

    /// One round-trip probe. Returns the elapsed time in milliseconds on
    /// success; the caller decides how failures feed loss accounting.
    pub async fn probe(&self, timeout: Duration) -> Result<f64, MeasureError> {
        let started = Instant::now();

        // Cache-busting query parameter so intermediaries cannot answer
        // from cache and fake a fast round trip.
        let buster = chrono::Utc::now().timestamp_micros().to_string();

        self.http
            .get(&self.endpoints.probe_url)
            .query(&[("t", buster.as_str())])
            .header(CACHE_CONTROL, HeaderValue::from_static("no-cache"))
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| MeasureError::from_request("latency probe", e))?
            .error_for_status()
            .map_err(|e| MeasureError::from_request("latency probe", e))?;

        Ok(started.elapsed().as_secs_f64() * 1000.0)
    }

    /// Request `bytes` of payload from the download endpoint. The caller
    /// streams the body and samples it incrementally; dropping the
    /// response aborts the transfer.
    pub async fn download(
        &self,
        bytes: u64,
        timeout: Duration,
    ) -> Result<Response, MeasureError> {
        self.http
            .get(&self.endpoints.download_url)
            .query(&[("bytes", bytes.to_string().as_str())])
            .header(CACHE_CONTROL, HeaderValue::from_static("no-cache"))
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| MeasureError::from_request("download request", e))?
            .error_for_status()
            .map_err(|e| MeasureError::from_request("download request", e))
    }

    /// POST a payload body to the given upload sink.
    pub async fn upload(
        &self,
        url: &str,
        body: Body,
        timeout: Duration,
    ) -> Result<(), MeasureError> {
        self.http
            .post(url)
            .body(body)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| MeasureError::from_request("upload request", e))?
            .error_for_status()
            .map_err(|e| MeasureError::from_request("upload request", e))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;

    fn unreachable_endpoints() -> EndpointConfig {
        EndpointConfig {
            probe_url: "http://127.0.0.1:9/probe".to_string(),
            download_url: "http://127.0.0.1:9/down".to_string(),
            upload_urls: vec!["http://127.0.0.1:9/up".to_string()],
        }
    }

    #[test]
    fn test_new_rejects_invalid_endpoints() {
        let endpoints = EndpointConfig {
            probe_url: "definitely not a url".to_string(),
            ..EndpointConfig::default()
        };
        let error = MeasureClient::new(endpoints).unwrap_err();
        assert_eq!(error.kind, ErrorKind::Config);
    }

    #[tokio::test]
    async fn test_probe_failure_is_an_error_not_a_panic() {
        let client = MeasureClient::new(unreachable_endpoints()).unwrap();
        let result = client.probe(Duration::from_millis(500)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_download_failure_is_an_error() {
        let client = MeasureClient::new(unreachable_endpoints()).unwrap();
        let result =
            client.download(1_000, Duration::from_millis(500)).await;
        assert!(result.is_err());
    }
}
