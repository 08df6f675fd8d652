// src/notify/mod.rs
//! Outbound notification: rendering, rate limiting and delivery.
//!
//! - `template`: `${key}` rendering of a scored message
//! - `ratelimit`: per-generation push budget
//! - `dingtalk`: signed DingTalk-style webhook
//! - `log`: fallback sink when no webhook is configured

pub mod dingtalk;
pub mod log;
pub mod ratelimit;
pub mod template;

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use crate::config::DingTalkConfig;

pub use self::dingtalk::DingTalkNotifier;
pub use self::log::LogNotifier;
pub use self::ratelimit::RateLimiter;
pub use self::template::Renderer;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    #[default]
    Markdown,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Markdown => "markdown",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("invalid webhook url {0}")]
    Webhook(String),
    #[error("webhook transport: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("webhook http status {status}")]
    Http { status: u16 },
    #[error("webhook provider error {code}: {message}")]
    Provider { code: i64, message: String },
    #[error("signing webhook request: {0}")]
    Signing(String),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, payload: &str, kind: MessageKind) -> Result<(), NotifyError>;

    fn name(&self) -> &'static str;
}

/// DingTalk when a webhook is configured, otherwise the log sink.
pub fn from_config(cfg: &DingTalkConfig) -> Result<Arc<dyn Notifier>, NotifyError> {
    if cfg.webhook.trim().is_empty() {
        return Ok(Arc::new(LogNotifier));
    }
    let notifier = DingTalkNotifier::new(cfg.webhook.trim(), cfg.secret.trim(), cfg.title.clone())?
        .with_timeout(Duration::from_millis(cfg.timeout_ms.max(1)));
    Ok(Arc::new(notifier))
}
