// tests/common/mod.rs
// Shared fakes for integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

use pulsewire::config::{self, Config, Zone};
use pulsewire::dedupe::{DedupeError, DedupeStore, KeyValueStore, MemoryStore};
use pulsewire::fetch::{FetchClient, FetchResponse, Transport, TransportError};
use pulsewire::notify::{MessageKind, Notifier, NotifyError, RateLimiter, Renderer};
use pulsewire::scoring::ScoringEngine;
use pulsewire::worker::Pipeline;

pub fn utc() -> Zone {
    Zone::utc()
}

pub fn ok(body: &str) -> Result<FetchResponse, TransportError> {
    Ok(FetchResponse {
        status: 200,
        body: body.as_bytes().to_vec(),
    })
}

pub fn status(code: u16) -> Result<FetchResponse, TransportError> {
    Ok(FetchResponse {
        status: code,
        body: format!("status {code}").into_bytes(),
    })
}

/// Replays scripted responses; the last one repeats once the script runs out.
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Result<FetchResponse, TransportError>>>,
    last: Mutex<Option<Result<FetchResponse, TransportError>>>,
    calls: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new(script: Vec<Result<FetchResponse, TransportError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            last: Mutex::new(None),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn always(resp: Result<FetchResponse, TransportError>) -> Arc<Self> {
        Self::new(vec![resp])
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn get(
        &self,
        _url: &str,
        _headers: &BTreeMap<String, String>,
        _timeout: Duration,
    ) -> Result<FetchResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().pop_front();
        match next {
            Some(r) => {
                *self.last.lock() = Some(r.clone());
                r
            }
            None => self
                .last
                .lock()
                .clone()
                .unwrap_or_else(|| Err(TransportError::new("script empty"))),
        }
    }
}

/// Holds every request until `open` is called once per request.
pub struct GatedTransport {
    pub gate: Notify,
    body: String,
    calls: AtomicUsize,
}

impl GatedTransport {
    pub fn new(body: &str) -> Arc<Self> {
        Arc::new(Self {
            gate: Notify::new(),
            body: body.to_string(),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn open(&self) {
        self.gate.notify_one();
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for GatedTransport {
    async fn get(
        &self,
        _url: &str,
        _headers: &BTreeMap<String, String>,
        _timeout: Duration,
    ) -> Result<FetchResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.gate.notified().await;
        ok(&self.body)
    }
}

/// Records every payload; fails the sends whose index is listed in `fail_on`.
#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<(String, MessageKind)>>,
    fail_on: Vec<usize>,
    attempts: AtomicUsize,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing_on(fail_on: Vec<usize>) -> Arc<Self> {
        Arc::new(Self {
            fail_on,
            ..Self::default()
        })
    }

    pub fn payloads(&self) -> Vec<String> {
        self.sent.lock().iter().map(|(p, _)| p.clone()).collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, payload: &str, kind: MessageKind) -> Result<(), NotifyError> {
        let n = self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_on.contains(&n) {
            return Err(NotifyError::Http { status: 502 });
        }
        self.sent.lock().push((payload.to_string(), kind));
        Ok(())
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

/// Memory store that errors for keys containing `poison`.
pub struct FlakyStore {
    inner: MemoryStore,
    poison: String,
}

impl FlakyStore {
    pub fn new(poison: &str) -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryStore::new(),
            poison: poison.to_string(),
        })
    }
}

#[async_trait]
impl KeyValueStore for FlakyStore {
    async fn set_if_absent(&self, key: &str, ttl: Duration) -> Result<bool, DedupeError> {
        if key.contains(&self.poison) {
            return Err(DedupeError::Unavailable("connection refused".into()));
        }
        self.inner.set_if_absent(key, ttl).await
    }
}

/// One JSON source, memory dedupe, no webhook; `extra` is appended verbatim.
pub fn test_config(extra: &str) -> Config {
    let raw = format!(
        r#"
[runtime]
timezone = "UTC"
default_poll_interval_seconds = 60

[network]
default_timeout_ms = 1000
[network.retry]
max_attempts = 1

[scoring]
push_threshold = 10

[dedupe]
backend = "memory"

[[sources]]
name = "wire"
type = "json"
url = "http://wire.test/feed"

[[topics]]
name = "rates"
weight = 10
keywords = ["rate cut"]
{extra}
"#
    );
    config::from_toml_str(&raw).expect("test config")
}

pub struct PipelineParts {
    pub transport: Arc<dyn Transport>,
    pub store: Arc<dyn KeyValueStore>,
    pub notifier: Arc<dyn Notifier>,
    pub max_per_minute: i64,
}

pub fn pipeline(cfg: &Config, parts: PipelineParts) -> Arc<Pipeline> {
    Arc::new(Pipeline {
        fetcher: FetchClient::new(parts.transport),
        scoring: ScoringEngine::from_config(cfg, utc()).unwrap(),
        dedupe: DedupeStore::new(parts.store, "test:", vec![], Duration::from_secs(3600)),
        limiter: Arc::new(RateLimiter::new(parts.max_per_minute)),
        notifier: parts.notifier,
        renderer: Renderer::new(&cfg.push.template.markdown, utc()),
        msg_kind: cfg.dingtalk.msg_type,
        zone: utc(),
    })
}

pub fn fixture(name: &str) -> Vec<u8> {
    let path = format!("{}/tests/fixtures/{name}", env!("CARGO_MANIFEST_DIR"));
    std::fs::read(&path).unwrap_or_else(|e| panic!("reading {path}: {e}"))
}
