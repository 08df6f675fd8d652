// src/notify/ratelimit.rs
//! Per-generation push budget.
//!
//! The counter starts full and a single periodic task resets it to capacity
//! once per period. `try_acquire` never blocks: it takes a slot with a CAS
//! loop or reports the budget exhausted.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::trace;

use crate::cancel::{self, CancelRx};

pub const REFILL_PERIOD: Duration = Duration::from_secs(60);

#[derive(Debug)]
pub struct RateLimiter {
    /// <= 0 disables limiting.
    capacity: i64,
    available: AtomicI64,
}

impl RateLimiter {
    pub fn new(max_per_minute: i64) -> Self {
        Self {
            capacity: max_per_minute,
            available: AtomicI64::new(max_per_minute.max(0)),
        }
    }

    pub fn is_unlimited(&self) -> bool {
        self.capacity <= 0
    }

    pub fn available(&self) -> i64 {
        self.available.load(Ordering::Acquire)
    }

    pub fn try_acquire(&self) -> bool {
        if self.is_unlimited() {
            return true;
        }
        let mut cur = self.available.load(Ordering::Acquire);
        loop {
            if cur <= 0 {
                return false;
            }
            match self.available.compare_exchange_weak(
                cur,
                cur - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => cur = actual,
            }
        }
    }

    /// Reset to capacity (never beyond).
    pub fn refill(&self) {
        if !self.is_unlimited() {
            self.available.store(self.capacity, Ordering::Release);
        }
    }

    /// Start the refill task. It stops on cancellation or once the limiter is
    /// dropped. No task is spawned for an unlimited limiter.
    pub fn spawn_refill(self: &Arc<Self>, cancel: CancelRx) -> Option<JoinHandle<()>> {
        self.spawn_refill_every(REFILL_PERIOD, cancel)
    }

    pub fn spawn_refill_every(
        self: &Arc<Self>,
        period: Duration,
        mut cancel: CancelRx,
    ) -> Option<JoinHandle<()>> {
        if self.is_unlimited() {
            return None;
        }
        let weak: Weak<Self> = Arc::downgrade(self);
        Some(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel::cancelled(&mut cancel) => break,
                    _ = ticker.tick() => {
                        let Some(limiter) = weak.upgrade() else { break };
                        limiter.refill();
                        trace!(target: "notify", capacity = limiter.capacity, "rate budget refilled");
                    }
                }
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_then_exhausted() {
        let rl = RateLimiter::new(3);
        assert!((0..3).all(|_| rl.try_acquire()));
        assert!(!rl.try_acquire());
        rl.refill();
        assert_eq!(rl.available(), 3);
    }

    #[test]
    fn non_positive_is_unlimited() {
        for cap in [0, -5] {
            let rl = RateLimiter::new(cap);
            assert!((0..1000).all(|_| rl.try_acquire()));
        }
    }

    #[test]
    fn concurrent_acquire_never_oversubscribes() {
        let rl = Arc::new(RateLimiter::new(50));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let rl = rl.clone();
                std::thread::spawn(move || (0..20).filter(|_| rl.try_acquire()).count())
            })
            .collect();
        let granted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(granted, 50);
        assert_eq!(rl.available(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn refill_task_stops_when_limiter_dropped() {
        let (_tx, rx) = cancel::channel();
        let rl = Arc::new(RateLimiter::new(1));
        let handle = rl.spawn_refill_every(Duration::from_secs(1), rx).unwrap();
        drop(rl);
        tokio::time::advance(Duration::from_secs(2)).await;
        handle.await.unwrap();
    }
}
