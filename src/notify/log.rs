// src/notify/log.rs
use async_trait::async_trait;
use tracing::info;

use super::{MessageKind, Notifier, NotifyError};

/// Logs the rendered payload instead of delivering it. Used when no webhook is set.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, payload: &str, kind: MessageKind) -> Result<(), NotifyError> {
        info!(target: "notify", kind = kind.as_str(), payload, "push (log only)");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "log"
    }
}
