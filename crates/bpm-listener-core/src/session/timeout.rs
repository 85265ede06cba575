//! Detection timeout guard

use std::time::Duration;

use tokio::task::JoinHandle;

use crate::session::event::{InboxSender, SessionEvent, SessionMessage};

/// Default time to wait for an accepted detection
pub const DEFAULT_DETECTION_TIMEOUT: Duration = Duration::from_millis(15_000);

/// At most one pending timeout per session
///
/// When it fires a `TimedOut` message tagged with the session generation is
/// pushed into the controller inbox. Must be armed from within a tokio
/// runtime.
#[derive(Debug, Default)]
pub struct TimeoutGuard {
    pending: Option<JoinHandle<()>>,
}

impl TimeoutGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule the timeout, replacing any pending one
    pub fn arm(&mut self, after: Duration, inbox: InboxSender, generation: u64) {
        self.cancel();
        self.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = inbox.send(SessionMessage {
                generation,
                event: SessionEvent::TimedOut,
            });
        }));
    }

    /// Cancel the pending timeout; returns whether one was pending
    pub fn cancel(&mut self) -> bool {
        match self.pending.take() {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Whether a timeout is scheduled and has not fired yet
    pub fn is_armed(&self) -> bool {
        self.pending.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for TimeoutGuard {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test(start_paused = true)]
    async fn test_fires_after_duration() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut guard = TimeoutGuard::new();
        guard.arm(Duration::from_millis(100), tx, 3);
        assert!(guard.is_armed());

        tokio::time::sleep(Duration::from_millis(99)).await;
        assert!(rx.try_recv().is_err());

        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.generation, 3);
        assert_eq!(msg.event, SessionEvent::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_firing() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut guard = TimeoutGuard::new();
        guard.arm(Duration::from_millis(100), tx, 1);

        assert!(guard.cancel());
        assert!(!guard.cancel());
        assert!(!guard.is_armed());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_replaces_pending() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut guard = TimeoutGuard::new();
        guard.arm(Duration::from_millis(100), tx.clone(), 1);
        guard.arm(Duration::from_millis(200), tx, 2);

        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.generation, 2);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(rx.try_recv().is_err());
    }
}
