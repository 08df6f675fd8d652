// src/notify/dingtalk.rs
//! DingTalk-style robot webhook.
//!
//! With a secret configured, every request carries `timestamp` (ms) and
//! `sign = base64(HMAC-SHA256(secret, "{timestamp}\n{secret}"))` as query
//! parameters. A 2xx reply with a non-zero `errcode` is a provider error.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::Duration;
use tracing::debug;

use super::{MessageKind, Notifier, NotifyError};

type HmacSha256 = Hmac<Sha256>;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct DingTalkNotifier {
    webhook: Url,
    secret: String,
    title: String,
    client: Client,
    timeout: Duration,
}

impl DingTalkNotifier {
    pub fn new(webhook: &str, secret: &str, title: String) -> Result<Self, NotifyError> {
        let webhook =
            Url::parse(webhook).map_err(|e| NotifyError::Webhook(format!("{webhook}: {e}")))?;
        Ok(Self {
            webhook,
            secret: secret.to_string(),
            title,
            client: Client::new(),
            timeout: DEFAULT_TIMEOUT,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Webhook URL with signature parameters for `timestamp_ms`, if signing.
    pub fn endpoint(&self, timestamp_ms: i64) -> Result<Url, NotifyError> {
        let mut url = self.webhook.clone();
        if !self.secret.is_empty() {
            let ts = timestamp_ms.to_string();
            let signature = sign(&ts, &self.secret)?;
            url.query_pairs_mut()
                .append_pair("timestamp", &ts)
                .append_pair("sign", &signature);
        }
        Ok(url)
    }

    fn body<'a>(&'a self, payload: &'a str, kind: MessageKind) -> RobotMessage<'a> {
        match kind {
            MessageKind::Markdown => RobotMessage::Markdown {
                markdown: MarkdownBody {
                    title: &self.title,
                    text: payload,
                },
            },
            MessageKind::Text => RobotMessage::Text {
                text: TextBody { content: payload },
            },
        }
    }
}

/// Base64 HMAC-SHA256 over `"{timestamp}\n{secret}"`, keyed by the secret.
pub fn sign(timestamp: &str, secret: &str) -> Result<String, NotifyError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| NotifyError::Signing(e.to_string()))?;
    mac.update(format!("{timestamp}\n{secret}").as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

#[derive(Serialize)]
#[serde(tag = "msgtype", rename_all = "lowercase")]
enum RobotMessage<'a> {
    Markdown { markdown: MarkdownBody<'a> },
    Text { text: TextBody<'a> },
}

#[derive(Serialize)]
struct MarkdownBody<'a> {
    title: &'a str,
    text: &'a str,
}

#[derive(Serialize)]
struct TextBody<'a> {
    content: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct RobotReply {
    #[serde(default)]
    errcode: i64,
    #[serde(default)]
    errmsg: String,
}

#[async_trait]
impl Notifier for DingTalkNotifier {
    async fn send(&self, payload: &str, kind: MessageKind) -> Result<(), NotifyError> {
        let url = self.endpoint(chrono::Utc::now().timestamp_millis())?;
        let rsp = self
            .client
            .post(url)
            .timeout(self.timeout)
            .json(&self.body(payload, kind))
            .send()
            .await?;

        let status = rsp.status();
        if !status.is_success() {
            return Err(NotifyError::Http {
                status: status.as_u16(),
            });
        }

        let bytes = rsp.bytes().await?;
        let reply = match serde_json::from_slice::<RobotReply>(&bytes) {
            Ok(r) => r,
            Err(e) => {
                debug!(target: "notify", error = %e, "webhook reply is not JSON; treating as success");
                RobotReply::default()
            }
        };
        if reply.errcode != 0 {
            return Err(NotifyError::Provider {
                code: reply.errcode,
                message: reply.errmsg,
            });
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "dingtalk"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOOK: &str = "https://oapi.example.test/robot/send?access_token=abc";

    #[test]
    fn signature_is_stable_base64() {
        let a = sign("1700000000000", "SECxyz").unwrap();
        assert_eq!(a, "0PUR1j8g85Xg3vlFV/UrEcxXfF5HpCAGzcjrNfyJoyg=");
        assert_ne!(a, sign("1700000000001", "SECxyz").unwrap());
        let raw = STANDARD.decode(&a).unwrap();
        assert_eq!(raw.len(), 32);
    }

    #[test]
    fn long_secrets_sign_without_error() {
        let secret = format!("SEC{}", "k".repeat(120));
        assert_eq!(
            sign("1", &secret).unwrap(),
            "zVivLD9M7XT+ncoKoWm9nGr8Th4dGDYZA8qTLgTh7x8="
        );
    }

    #[test]
    fn endpoint_keeps_token_and_appends_signature() {
        let n = DingTalkNotifier::new(HOOK, "SECxyz", "t".into()).unwrap();
        let url = n.endpoint(1_700_000_000_000).unwrap();
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs[0], ("access_token".into(), "abc".into()));
        assert_eq!(pairs[1], ("timestamp".into(), "1700000000000".into()));
        assert_eq!(pairs[2].0, "sign");
        assert_eq!(pairs[2].1, sign("1700000000000", "SECxyz").unwrap());
    }

    #[test]
    fn unsigned_endpoint_is_untouched() {
        let n = DingTalkNotifier::new(HOOK, "", "t".into()).unwrap();
        assert_eq!(n.endpoint(1).unwrap().as_str(), HOOK);
    }

    #[test]
    fn body_shapes() {
        let n = DingTalkNotifier::new(HOOK, "", "Alerts".into()).unwrap();
        let md = serde_json::to_value(n.body("**hi**", MessageKind::Markdown)).unwrap();
        assert_eq!(
            md,
            serde_json::json!({"msgtype": "markdown", "markdown": {"title": "Alerts", "text": "**hi**"}})
        );
        let txt = serde_json::to_value(n.body("hi", MessageKind::Text)).unwrap();
        assert_eq!(txt, serde_json::json!({"msgtype": "text", "text": {"content": "hi"}}));
    }

    #[test]
    fn invalid_webhook_is_rejected() {
        assert!(matches!(
            DingTalkNotifier::new("not a url", "", "t".into()),
            Err(NotifyError::Webhook(_))
        ));
    }
}
