//! Deferred, cancellable work for the daemon loop
//!
//! Nothing in the dispatch path sleeps. Work that has to happen later is
//! scheduled here and comes back to the loop as `(TimerToken, Deferred)`; the
//! loop only runs it if the token is still live.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::injector::ClipboardCheck;

/// Handle for one scheduled piece of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerToken(pub u64);

/// Work the loop runs once a timer fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Deferred {
    /// The pending diacritic waited too long
    DiacriticTimeout,
    /// The injection window is over
    ReleaseGuard,
    /// Check whether the clipboard still holds what we pasted, and restore
    VerifyClipboard(ClipboardCheck),
}

pub trait Scheduler: Send {
    fn schedule(&mut self, delay: Duration, work: Deferred) -> TimerToken;

    /// Cancel pending work. Unknown or already fired tokens are ignored.
    fn cancel(&mut self, token: TimerToken);

    /// Consume a fired token. Returns false if it was cancelled in the meantime.
    fn claim(&mut self, token: TimerToken) -> bool;
}

/// Scheduler that sleeps on the tokio runtime and reports back over a channel.
pub struct TokioScheduler {
    next_token: u64,
    pending: HashMap<TimerToken, JoinHandle<()>>,
    tx: mpsc::UnboundedSender<(TimerToken, Deferred)>,
}

impl TokioScheduler {
    /// Create a scheduler and the receiver the daemon loop drains.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(TimerToken, Deferred)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let scheduler = Self {
            next_token: 0,
            pending: HashMap::new(),
            tx,
        };
        (scheduler, rx)
    }

    #[cfg(test)]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&mut self, delay: Duration, work: Deferred) -> TimerToken {
        self.next_token += 1;
        let token = TimerToken(self.next_token);
        let tx = self.tx.clone();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // The loop may already be gone during shutdown
            let _ = tx.send((token, work));
        });
        self.pending.insert(token, handle);

        token
    }

    fn cancel(&mut self, token: TimerToken) {
        if let Some(handle) = self.pending.remove(&token) {
            handle.abort();
        }
    }

    fn claim(&mut self, token: TimerToken) -> bool {
        self.pending.remove(&token).is_some()
    }
}

impl Drop for TokioScheduler {
    fn drop(&mut self) {
        for (_, handle) in self.pending.drain() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_scheduled_work_arrives_after_delay() {
        let (mut scheduler, mut rx) = TokioScheduler::new();
        let token = scheduler.schedule(Duration::from_millis(50), Deferred::ReleaseGuard);

        tokio::time::sleep(Duration::from_millis(49)).await;
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_millis(2)).await;
        let (fired, work) = rx.recv().await.unwrap();
        assert_eq!(fired, token);
        assert_eq!(work, Deferred::ReleaseGuard);
        assert!(scheduler.claim(fired));
        assert!(!scheduler.claim(fired));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_work_never_arrives() {
        let (mut scheduler, mut rx) = TokioScheduler::new();
        let token = scheduler.schedule(Duration::from_millis(10), Deferred::DiacriticTimeout);
        scheduler.cancel(token);
        assert_eq!(scheduler.pending_count(), 0);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
        assert!(!scheduler.claim(token));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokens_are_unique() {
        let (mut scheduler, _rx) = TokioScheduler::new();
        let a = scheduler.schedule(Duration::from_secs(1), Deferred::ReleaseGuard);
        let b = scheduler.schedule(Duration::from_secs(1), Deferred::ReleaseGuard);
        assert_ne!(a, b);
        assert_eq!(scheduler.pending_count(), 2);
    }
}
