// src/worker.rs
//! Per-source poll loop.
//!
//! Each tick either starts a pass in its own task or, when the previous pass
//! is still running, is counted as missed and skipped. A pass runs
//! fetch → normalize → per message: score → threshold → dedupe → rate limit →
//! render → notify. Fetch and parse failures end the pass; dedupe and notify
//! failures only affect their message.

use chrono::Utc;
use metrics::{counter, histogram};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::cancel::{self, CancelRx};
use crate::config::{Config, SourceConfig, Zone};
use crate::dedupe::DedupeStore;
use crate::fetch::{effective_timeout, FetchClient, FetchError, RetryPolicy};
use crate::ingest::{self, ParseError};
use crate::notify::{MessageKind, Notifier, RateLimiter, Renderer};
use crate::scoring::ScoringEngine;

/// Collaborators shared by every worker of one generation.
pub struct Pipeline {
    pub fetcher: FetchClient,
    pub scoring: ScoringEngine,
    pub dedupe: DedupeStore,
    pub limiter: Arc<RateLimiter>,
    pub notifier: Arc<dyn Notifier>,
    pub renderer: Renderer,
    pub msg_kind: MessageKind,
    pub zone: Zone,
}

/// Per-stage counts for one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    pub fetched: usize,
    pub below_threshold: usize,
    pub duplicates: usize,
    pub dedupe_errors: usize,
    pub rate_limited: usize,
    pub notified: usize,
    pub notify_errors: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum PassError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("pass cancelled")]
    Cancelled,
}

pub type PassHandle = JoinHandle<Result<PassReport, PassError>>;

#[derive(Debug)]
pub enum TickOutcome {
    Started(PassHandle),
    /// Previous pass still running; `missed` is the running total.
    Skipped { missed: u64 },
}

pub struct SourceWorker {
    source: SourceConfig,
    interval: Duration,
    timeout: Duration,
    retry: RetryPolicy,
    pipeline: Arc<Pipeline>,
    busy: AtomicBool,
    missed: AtomicU64,
}

/// Clears the busy flag when a pass ends, however it ends.
struct BusyGuard(Arc<SourceWorker>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.busy.store(false, Ordering::Release);
    }
}

impl SourceWorker {
    /// Resolve the source's effective interval, timeout and retry policy.
    pub fn new(cfg: &Config, source: SourceConfig, pipeline: Arc<Pipeline>) -> Self {
        let interval = Duration::from_secs(cfg.poll_interval_secs(&source).max(1));
        let timeout = effective_timeout(source.timeout_ms, cfg.network.default_timeout_ms);
        let retry = RetryPolicy::effective(&source.retry, &cfg.network.retry);
        Self {
            source,
            interval,
            timeout,
            retry,
            pipeline,
            busy: AtomicBool::new(false),
            missed: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.source.name
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn missed_ticks(&self) -> u64 {
        self.missed.load(Ordering::Relaxed)
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Poll until cancelled. The first tick fires one interval after start.
    pub async fn run(self: Arc<Self>, mut cancel: CancelRx) {
        let start = tokio::time::Instant::now() + self.interval;
        let mut ticker = interval_at(start, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(target: "worker", source = %self.source.name, interval_s = self.interval.as_secs(), "worker started");

        loop {
            tokio::select! {
                _ = cancel::cancelled(&mut cancel) => break,
                _ = ticker.tick() => {
                    // Detached: the pass reports through logs and metrics.
                    let _ = self.tick(&cancel);
                }
            }
        }
        info!(target: "worker", source = %self.source.name, "worker stopped");
    }

    /// Handle one timer firing.
    pub fn tick(self: &Arc<Self>, cancel: &CancelRx) -> TickOutcome {
        let source = self.source.name.clone();
        counter!("pulsewire_ticks_total", "source" => source.clone()).increment(1);

        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            let missed = self.missed.fetch_add(1, Ordering::Relaxed) + 1;
            counter!("pulsewire_ticks_missed_total", "source" => source.clone()).increment(1);
            warn!(target: "worker", source = %source, missed, "previous pass still running; tick skipped");
            return TickOutcome::Skipped { missed };
        }

        let guard = BusyGuard(Arc::clone(self));
        let cancel = cancel.clone();
        TickOutcome::Started(tokio::spawn(async move {
            let worker = Arc::clone(&guard.0);
            let started = Instant::now();
            let result = worker.run_pass(cancel).await;
            let elapsed_ms = started.elapsed().as_millis() as u64;
            histogram!("pulsewire_pass_ms", "source" => source.clone()).record(elapsed_ms as f64);
            match &result {
                Ok(r) => info!(
                    target: "worker",
                    source = %source,
                    elapsed_ms,
                    fetched = r.fetched,
                    below_threshold = r.below_threshold,
                    duplicates = r.duplicates,
                    rate_limited = r.rate_limited,
                    notified = r.notified,
                    notify_errors = r.notify_errors,
                    "pass done"
                ),
                Err(PassError::Cancelled) => {
                    debug!(target: "worker", source = %source, elapsed_ms, "pass cancelled")
                }
                Err(e) => error!(target: "worker", source = %source, elapsed_ms, error = %e, "pass failed"),
            }
            drop(guard);
            result
        }))
    }

    /// One full pass over the source. Checks cancellation between stages and
    /// between messages; an in-flight fetch is abandoned on cancellation.
    pub async fn run_pass(&self, mut cancel: CancelRx) -> Result<PassReport, PassError> {
        let p = &self.pipeline;
        let src = &self.source;
        let mut report = PassReport::default();

        let fetched = tokio::select! {
            _ = cancel::cancelled(&mut cancel) => return Err(PassError::Cancelled),
            r = p.fetcher.fetch(&src.url, &src.headers, self.timeout, &self.retry) => r,
        };
        let response = fetched.inspect_err(|e| {
            counter!("pulsewire_fetch_errors_total", "source" => src.name.clone()).increment(1);
            error!(target: "worker", source = %src.name, stage = "fetch", status = ?e.status(), attempts = e.attempts(), error = %e, "fetch failed");
        })?;
        if cancel::is_cancelled(&cancel) {
            return Err(PassError::Cancelled);
        }

        let messages = ingest::normalize(src, &response.body, &p.zone, Utc::now()).inspect_err(|e| {
            counter!("pulsewire_parse_errors_total", "source" => src.name.clone()).increment(1);
            error!(target: "worker", source = %src.name, stage = "parse", error = %e, "parse failed");
        })?;
        report.fetched = messages.len();
        counter!("pulsewire_messages_total", "source" => src.name.clone()).increment(messages.len() as u64);
        debug!(target: "worker", source = %src.name, count = messages.len(), "parsed");

        for message in messages {
            if cancel::is_cancelled(&cancel) {
                return Err(PassError::Cancelled);
            }

            let scored = p.scoring.score(message);
            if !p.scoring.passes(&scored) {
                report.below_threshold += 1;
                continue;
            }

            match p.dedupe.seen(&scored).await {
                Ok(v) if v.was_already_seen => {
                    report.duplicates += 1;
                    counter!("pulsewire_dedupe_hits_total", "source" => src.name.clone()).increment(1);
                    debug!(target: "worker", source = %src.name, key = ?v.matched_key, "dedupe hit");
                    continue;
                }
                Ok(_) => {}
                Err(e) => {
                    report.dedupe_errors += 1;
                    counter!("pulsewire_dedupe_errors_total", "source" => src.name.clone()).increment(1);
                    error!(target: "worker", source = %src.name, stage = "dedupe", error = %e, "dedupe failed");
                    continue;
                }
            }

            if !p.limiter.try_acquire() {
                report.rate_limited += 1;
                counter!("pulsewire_rate_limited_total", "source" => src.name.clone()).increment(1);
                warn!(target: "worker", source = %src.name, title = %scored.title, "rate limited");
                continue;
            }

            let text = p.renderer.render(&scored);
            match p.notifier.send(&text, p.msg_kind).await {
                Ok(()) => {
                    report.notified += 1;
                    counter!("pulsewire_pushed_total", "source" => src.name.clone()).increment(1);
                    info!(target: "worker", source = %src.name, score = scored.score, reasons = ?scored.reasons, "pushed");
                }
                Err(e) => {
                    report.notify_errors += 1;
                    counter!("pulsewire_push_errors_total", "source" => src.name.clone()).increment(1);
                    error!(target: "worker", source = %src.name, stage = "notify", notifier = p.notifier.name(), error = %e, "push failed");
                }
            }
        }

        Ok(report)
    }
}
