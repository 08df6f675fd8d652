// src/dedupe/mod.rs
//! Cross-poll duplicate suppression.
//!
//! Each message yields an ordered set of candidate keys (see [`KeyStrategy`]).
//! Only the first non-empty candidate is checked, with an atomic
//! set-if-absent plus TTL against a shared [`KeyValueStore`]; lower-priority
//! keys are never written.

pub mod memory;
pub mod redis;

use async_trait::async_trait;
use chrono::SecondsFormat;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{Config, DedupeBackend};
use crate::model::Message;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

pub const DEFAULT_TTL: Duration = Duration::from_secs(72 * 3600);

pub const DEFAULT_STRATEGY: [KeyStrategy; 4] = [
    KeyStrategy::Url,
    KeyStrategy::Id,
    KeyStrategy::SourceTitle,
    KeyStrategy::SourceTitleTime,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStrategy {
    Url,
    Id,
    SourceTitle,
    SourceTitleTime,
}

impl KeyStrategy {
    /// Candidate key for `msg`, or `None` when the field it derives from is empty.
    pub fn key_for(self, msg: &Message) -> Option<String> {
        let title = msg.title.trim();
        match self {
            KeyStrategy::Url => msg.url.as_deref().filter(|u| !u.is_empty()).map(|u| format!("url:{u}")),
            KeyStrategy::Id => msg.id.as_deref().filter(|i| !i.is_empty()).map(|i| format!("id:{i}")),
            KeyStrategy::SourceTitle => {
                (!title.is_empty()).then(|| format!("st:{}:{}", msg.source_name, msg.title))
            }
            KeyStrategy::SourceTitleTime => (!title.is_empty()).then(|| {
                format!(
                    "stt:{}:{}:{}",
                    msg.source_name,
                    msg.title,
                    msg.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true)
                )
            }),
        }
    }
}

/// Ordered non-empty candidate keys; an empty strategy means the default order.
pub fn build_keys(strategy: &[KeyStrategy], msg: &Message) -> Vec<String> {
    let strategy = if strategy.is_empty() {
        &DEFAULT_STRATEGY[..]
    } else {
        strategy
    };
    strategy.iter().filter_map(|s| s.key_for(msg)).collect()
}

#[derive(Debug, thiserror::Error)]
pub enum DedupeError {
    #[error("redis: {0}")]
    Redis(#[from] ::redis::RedisError),
    #[error("dedupe store unavailable: {0}")]
    Unavailable(String),
}

/// Atomic store used for first-seen checks.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Store `key` with `ttl` if absent. Returns true when the key was newly set.
    async fn set_if_absent(&self, key: &str, ttl: Duration) -> Result<bool, DedupeError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub was_already_seen: bool,
    /// Unprefixed key that decided the verdict, if any candidate existed.
    pub matched_key: Option<String>,
}

#[derive(Clone)]
pub struct DedupeStore {
    store: Arc<dyn KeyValueStore>,
    prefix: String,
    strategy: Vec<KeyStrategy>,
    ttl: Duration,
}

impl DedupeStore {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        prefix: impl Into<String>,
        strategy: Vec<KeyStrategy>,
        ttl: Duration,
    ) -> Self {
        Self {
            store,
            prefix: prefix.into(),
            strategy,
            ttl: if ttl.is_zero() { DEFAULT_TTL } else { ttl },
        }
    }

    /// Store chosen by `dedupe.backend`. Redis connects lazily on first use.
    pub fn from_config(cfg: &Config) -> Result<Self, DedupeError> {
        let store: Arc<dyn KeyValueStore> = match cfg.dedupe.backend {
            DedupeBackend::Redis => Arc::new(RedisStore::new(&cfg.redis)?),
            DedupeBackend::Memory => Arc::new(MemoryStore::new()),
        };
        Ok(Self::new(
            store,
            cfg.redis.key_prefix.clone(),
            cfg.dedupe.key_strategy.clone(),
            Duration::from_secs(cfg.dedupe.ttl_hours.saturating_mul(3600)),
        ))
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn seen(&self, msg: &Message) -> Result<Verdict, DedupeError> {
        let Some(key) = build_keys(&self.strategy, msg).into_iter().next() else {
            return Ok(Verdict {
                was_already_seen: false,
                matched_key: None,
            });
        };
        let full = format!("{}{}", self.prefix, key);
        let fresh = self.store.set_if_absent(&full, self.ttl).await?;
        Ok(Verdict {
            was_already_seen: !fresh,
            matched_key: Some(key),
        })
    }
}
