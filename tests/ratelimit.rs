// tests/ratelimit.rs
use pulsewire::cancel;
use pulsewire::notify::RateLimiter;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn n_of_n_plus_one_then_refill_restores_capacity() {
    let (tx, rx) = cancel::channel();
    let limiter = Arc::new(RateLimiter::new(3));
    let refill = limiter.spawn_refill(rx).expect("limited limiter spawns a refill task");

    let granted = (0..4).filter(|_| limiter.try_acquire()).count();
    assert_eq!(granted, 3);

    // No refill before a full period has passed.
    tokio::time::sleep(Duration::from_secs(59)).await;
    assert!(!limiter.try_acquire());

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(limiter.available(), 3);
    assert_eq!((0..5).filter(|_| limiter.try_acquire()).count(), 3);

    tx.send_replace(true);
    refill.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn refill_never_exceeds_capacity() {
    let (_tx, rx) = cancel::channel();
    let limiter = Arc::new(RateLimiter::new(2));
    let _refill = limiter.spawn_refill(rx);

    tokio::time::sleep(Duration::from_secs(185)).await;
    assert_eq!(limiter.available(), 2);
}

#[tokio::test]
async fn unlimited_has_no_refill_task() {
    let (_tx, rx) = cancel::channel();
    let limiter = Arc::new(RateLimiter::new(0));
    assert!(limiter.spawn_refill(rx).is_none());
    assert!((0..100).all(|_| limiter.try_acquire()));
}
