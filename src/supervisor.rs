// src/supervisor.rs
//! Generation lifecycle: start, hot reload, shutdown.
//!
//! A generation is every worker built from one config load, plus the refill
//! task of its rate limiter, all under one cancellation signal. Reload builds
//! a complete new generation first and only then cancels the old one, so a
//! config that fails to load or build leaves the running generation alone.
//! In-flight passes of the old generation are not awaited.

use metrics::gauge;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::cancel::{self, CancelTx};
use crate::config::{self, Config, ConfigError};
use crate::dedupe::{DedupeError, DedupeStore};
use crate::fetch::{FetchClient, ReqwestTransport, Transport};
use crate::notify::{self, NotifyError, RateLimiter, Renderer};
use crate::scoring::ScoringEngine;
use crate::telemetry;
use crate::worker::{Pipeline, SourceWorker};

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("building dedupe store: {0}")]
    Dedupe(#[from] DedupeError),
    #[error("building notifier: {0}")]
    Notify(#[from] NotifyError),
}

struct Generation {
    id: u64,
    cancel: CancelTx,
    workers: Vec<Arc<SourceWorker>>,
    handles: Vec<JoinHandle<()>>,
}

pub struct Supervisor {
    config_path: PathBuf,
    transport: Arc<dyn Transport>,
    current: Mutex<Option<Generation>>,
    next_id: AtomicU64,
    /// Captured at start; later reloads do not change it.
    reload_every: AtomicU64,
}

impl Supervisor {
    pub fn new(config_path: impl Into<PathBuf>) -> Self {
        Self::with_transport(config_path, Arc::new(ReqwestTransport::new()))
    }

    pub fn with_transport(config_path: impl Into<PathBuf>, transport: Arc<dyn Transport>) -> Self {
        Self {
            config_path: config_path.into(),
            transport,
            current: Mutex::new(None),
            next_id: AtomicU64::new(1),
            reload_every: AtomicU64::new(0),
        }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Load the config and launch the first generation. Errors are fatal to the caller.
    pub fn start(&self) -> Result<u64, SupervisorError> {
        let cfg = config::load(&self.config_path)?;
        self.reload_every
            .store(cfg.runtime.reload_interval_seconds, Ordering::Relaxed);
        let id = self.launch(&cfg)?;
        info!(target: "supervisor", generation = id, sources = cfg.sources.len(), "started");
        Ok(id)
    }

    /// Re-read the config and replace the running generation. On failure the
    /// current generation and log level stay as they are.
    pub fn reload(&self, reason: &str) -> Result<u64, SupervisorError> {
        let result = config::load(&self.config_path)
            .map_err(SupervisorError::from)
            .and_then(|cfg| {
                let id = self.launch(&cfg)?;
                if let Err(e) = telemetry::apply_log_level(&cfg.logging) {
                    warn!(target: "supervisor", error = %e, "log level not applied");
                }
                Ok(id)
            });
        match &result {
            Ok(id) => info!(target: "supervisor", reason, generation = id, "reloaded"),
            Err(e) => error!(
                target: "supervisor",
                reason,
                generation = ?self.current_generation(),
                error = %e,
                "reload failed; keeping current generation"
            ),
        }
        result
    }

    /// Build and start a generation from `cfg`, then cancel the previous one.
    pub fn launch(&self, cfg: &Config) -> Result<u64, SupervisorError> {
        let zone = cfg.zone()?;
        let scoring = ScoringEngine::from_config(cfg, zone)?;
        let dedupe = DedupeStore::from_config(cfg)?;
        let notifier = notify::from_config(&cfg.dingtalk)?;

        let (cancel_tx, cancel_rx) = cancel::channel();
        let limiter = Arc::new(RateLimiter::new(cfg.push.max_push_per_minute));
        let mut handles: Vec<JoinHandle<()>> = limiter.spawn_refill(cancel_rx.clone()).into_iter().collect();

        let pipeline = Arc::new(Pipeline {
            fetcher: FetchClient::new(Arc::clone(&self.transport)),
            scoring,
            dedupe,
            limiter,
            notifier,
            renderer: Renderer::new(&cfg.push.template.markdown, zone),
            msg_kind: cfg.dingtalk.msg_type,
            zone,
        });

        let workers: Vec<Arc<SourceWorker>> = cfg
            .sources
            .iter()
            .map(|src| Arc::new(SourceWorker::new(cfg, src.clone(), Arc::clone(&pipeline))))
            .collect();
        handles.extend(
            workers
                .iter()
                .map(|w| tokio::spawn(Arc::clone(w).run(cancel_rx.clone()))),
        );

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let previous = self.lock().replace(Generation {
            id,
            cancel: cancel_tx,
            workers,
            handles,
        });
        if let Some(old) = previous {
            old.cancel.send_replace(true);
            info!(target: "supervisor", generation = old.id, "previous generation cancelled");
        }
        gauge!("pulsewire_generation").set(id as f64);
        info!(
            target: "supervisor",
            generation = id,
            sources = cfg.sources.len(),
            zone = %zone,
            notifier = pipeline.notifier.name(),
            "workers started"
        );
        Ok(id)
    }

    pub fn current_generation(&self) -> Option<u64> {
        self.lock().as_ref().map(|g| g.id)
    }

    /// Workers of the current generation, in config order.
    pub fn workers(&self) -> Vec<Arc<SourceWorker>> {
        self.lock()
            .as_ref()
            .map(|g| g.workers.clone())
            .unwrap_or_default()
    }

    /// Cancel the current generation and wait for its loops to exit.
    pub async fn shutdown(&self) {
        let Some(generation) = self.lock().take() else {
            return;
        };
        generation.cancel.send_replace(true);
        for handle in generation.handles {
            let _ = handle.await;
        }
        info!(target: "supervisor", generation = generation.id, "stopped");
    }

    /// Serve reloads (SIGHUP and the optional timer) until `shutdown` resolves.
    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut timer = match self.reload_every.load(Ordering::Relaxed) {
            0 => None,
            secs => {
                let every = Duration::from_secs(secs);
                let mut t = interval_at(Instant::now() + every, every);
                t.set_missed_tick_behavior(MissedTickBehavior::Delay);
                Some(t)
            }
        };
        let mut hangup = HangupSignal::new();

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = hangup.recv() => { let _ = self.reload("signal"); }
                _ = next_tick(&mut timer) => { let _ = self.reload("timer"); }
            }
        }
        self.shutdown().await;
    }

    fn lock(&self) -> MutexGuard<'_, Option<Generation>> {
        self.current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

async fn next_tick(timer: &mut Option<Interval>) {
    match timer {
        Some(t) => {
            t.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(unix)]
struct HangupSignal(Option<tokio::signal::unix::Signal>);

#[cfg(unix)]
impl HangupSignal {
    fn new() -> Self {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::hangup()) {
            Ok(s) => Self(Some(s)),
            Err(e) => {
                warn!(target: "supervisor", error = %e, "SIGHUP reload unavailable");
                Self(None)
            }
        }
    }

    async fn recv(&mut self) {
        let delivered = match &mut self.0 {
            Some(s) => s.recv().await.is_some(),
            None => false,
        };
        if !delivered {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
struct HangupSignal;

#[cfg(not(unix))]
impl HangupSignal {
    fn new() -> Self {
        Self
    }

    async fn recv(&mut self) {
        std::future::pending().await
    }
}
