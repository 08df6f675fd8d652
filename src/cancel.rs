// src/cancel.rs
//! Generation cancellation signal over `tokio::sync::watch`.
//!
//! The supervisor holds the sender; workers, passes and the refill task hold
//! receivers. Sending `true` or dropping the sender both count as cancelled.

use tokio::sync::watch;

pub type CancelTx = watch::Sender<bool>;
pub type CancelRx = watch::Receiver<bool>;

pub fn channel() -> (CancelTx, CancelRx) {
    watch::channel(false)
}

/// Resolves once the generation is cancelled.
pub async fn cancelled(rx: &mut CancelRx) {
    let _ = rx.wait_for(|c| *c).await;
}

pub fn is_cancelled(rx: &CancelRx) -> bool {
    *rx.borrow() || rx.has_changed().is_err()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dropping_the_sender_cancels() {
        let (tx, mut rx) = channel();
        assert!(!is_cancelled(&rx));
        drop(tx);
        assert!(is_cancelled(&rx));
        cancelled(&mut rx).await;
    }

    #[tokio::test]
    async fn sending_true_cancels() {
        let (tx, mut rx) = channel();
        tx.send_replace(true);
        assert!(is_cancelled(&rx));
        cancelled(&mut rx).await;
    }
}
