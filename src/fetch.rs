// src/fetch.rs
//! Bounded-retry HTTP fetch with exponential backoff and jitter.
//!
//! - 2xx returns immediately.
//! - Transport errors and statuses in `retry_on` are retried up to `max_attempts`.
//! - Any other non-2xx status is returned at once as `FetchError::Status`.
//!
//! The network call sits behind [`Transport`] so the retry loop can be driven
//! by scripted responses in tests.

use async_trait::async_trait;
use rand::Rng;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use crate::config::RetryConfig;

/// Hard safety bounds applied after overlaying source config on defaults.
pub const MAX_ATTEMPTS_CAP: u32 = 3;
pub const TIMEOUT_CAP_MS: u64 = 10_000;

const FALLBACK_BACKOFF_MS: u64 = 200;
const FALLBACK_MULTIPLIER: f64 = 2.0;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub multiplier: f64,
    pub jitter_bound: Duration,
    pub retry_on: HashSet<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            base_backoff: Duration::from_millis(FALLBACK_BACKOFF_MS),
            multiplier: FALLBACK_MULTIPLIER,
            jitter_bound: Duration::ZERO,
            retry_on: HashSet::new(),
        }
    }
}

impl RetryPolicy {
    /// Overlay a source's retry settings on the network defaults, then clamp.
    /// Zero / empty source fields inherit the default.
    pub fn effective(source: &RetryConfig, defaults: &RetryConfig) -> Self {
        let max_attempts = if source.max_attempts > 0 {
            source.max_attempts
        } else {
            defaults.max_attempts
        };
        let backoff_ms = if source.backoff_ms > 0 {
            source.backoff_ms
        } else {
            defaults.backoff_ms
        };
        let multiplier = if source.multiplier > 0.0 {
            source.multiplier
        } else {
            defaults.multiplier
        };
        let jitter_ms = if source.jitter_ms > 0 {
            source.jitter_ms
        } else {
            defaults.jitter_ms
        };
        let retry_on = if source.retry_on_status.is_empty() {
            &defaults.retry_on_status
        } else {
            &source.retry_on_status
        };

        Self {
            max_attempts: max_attempts.clamp(1, MAX_ATTEMPTS_CAP),
            base_backoff: Duration::from_millis(if backoff_ms > 0 {
                backoff_ms
            } else {
                FALLBACK_BACKOFF_MS
            }),
            multiplier: if multiplier > 0.0 && multiplier.is_finite() {
                multiplier
            } else {
                FALLBACK_MULTIPLIER
            },
            jitter_bound: Duration::from_millis(jitter_ms),
            retry_on: retry_on.iter().copied().collect(),
        }
    }

    fn jitter(&self) -> Duration {
        let bound = self.jitter_bound.as_millis() as u64;
        if bound == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::rng().random_range(0..=bound))
    }
}

/// Source timeout falling back to the network default, capped at 10s.
pub fn effective_timeout(source_ms: u64, default_ms: u64) -> Duration {
    let ms = if source_ms > 0 { source_ms } else { default_ms };
    Duration::from_millis(ms.min(TIMEOUT_CAP_MS))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct TransportError {
    pub message: String,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("transport error after {attempts} attempt(s): {source}")]
    Transport {
        attempts: u32,
        source: TransportError,
    },
    #[error("http status {status} after {attempts} attempt(s)")]
    Status {
        status: u16,
        body: Vec<u8>,
        attempts: u32,
    },
}

impl FetchError {
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::Status { status, .. } => Some(*status),
            FetchError::Transport { .. } => None,
        }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            FetchError::Transport { attempts, .. } | FetchError::Status { attempts, .. } => {
                *attempts
            }
        }
    }
}

/// One HTTP GET, no retries. Any status is a successful transport round-trip.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(
        &self,
        url: &str,
        headers: &BTreeMap<String, String>,
        timeout: Duration,
    ) -> Result<FetchResponse, TransportError>;
}

/// `reqwest`-backed transport. One client per generation, shared by all workers.
#[derive(Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn get(
        &self,
        url: &str,
        headers: &BTreeMap<String, String>,
        timeout: Duration,
    ) -> Result<FetchResponse, TransportError> {
        let mut req = self.client.get(url).timeout(timeout);
        for (k, v) in headers {
            req = req.header(k.as_str(), v.as_str());
        }
        let resp = req
            .send()
            .await
            .map_err(|e| TransportError::new(format!("request failed: {e}")))?;
        let status = resp.status().as_u16();
        let body = resp
            .bytes()
            .await
            .map_err(|e| TransportError::new(format!("reading body: {e}")))?;
        Ok(FetchResponse {
            status,
            body: body.to_vec(),
        })
    }
}

#[derive(Clone)]
pub struct FetchClient {
    transport: Arc<dyn Transport>,
}

impl FetchClient {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    pub async fn fetch(
        &self,
        url: &str,
        headers: &BTreeMap<String, String>,
        timeout: Duration,
        policy: &RetryPolicy,
    ) -> Result<FetchResponse, FetchError> {
        let max_attempts = policy.max_attempts.max(1);
        let mut backoff = policy.base_backoff;
        let mut last_err = None;

        for attempt in 1..=max_attempts {
            match self.transport.get(url, headers, timeout).await {
                Ok(resp) if (200..300).contains(&resp.status) => return Ok(resp),
                Ok(resp) if policy.retry_on.contains(&resp.status) => {
                    tracing::debug!(url, attempt, status = resp.status, "retryable status");
                    last_err = Some(FetchError::Status {
                        status: resp.status,
                        body: resp.body,
                        attempts: attempt,
                    });
                }
                Ok(resp) => {
                    return Err(FetchError::Status {
                        status: resp.status,
                        body: resp.body,
                        attempts: attempt,
                    })
                }
                Err(e) => {
                    tracing::debug!(url, attempt, error = %e, "transport error");
                    last_err = Some(FetchError::Transport {
                        attempts: attempt,
                        source: e,
                    });
                }
            }

            if attempt < max_attempts {
                tokio::time::sleep(backoff + policy.jitter()).await;
                backoff = backoff.mul_f64(policy.multiplier);
            }
        }

        Err(last_err.unwrap_or_else(|| FetchError::Transport {
            attempts: max_attempts,
            source: TransportError::new("no attempt made"),
        }))
    }
}
