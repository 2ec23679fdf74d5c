//! Probe module for liveness checks.
//!
//! A probe issues one bounded-timeout request against a target and reports
//! either the response status and latency or a transport failure.

mod http;

pub use http::*;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Probe error types.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("target unreachable: {0}")]
    Unreachable(String),
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// A response received from a target, whatever its status.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeResponse {
    pub status_code: u16,
    pub latency: Duration,
}

impl ProbeResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

/// Something that can check a probe URL.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, url: &str, timeout: Duration) -> Result<ProbeResponse, ProbeError>;
}
