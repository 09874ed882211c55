//! Single-slot cancellable timer.
//!
//! At most one deadline is armed at a time. Expiry is reported as a
//! [`TimerToken`] on a channel so the owner can handle it on its own task;
//! a token that no longer matches the armed slot is stale and must be ignored.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Identifies one arming of a [`TimerSlot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerToken(u64);

pub struct TimerSlot {
    fired_tx: mpsc::UnboundedSender<TimerToken>,
    armed: Option<(TimerToken, JoinHandle<()>)>,
    next: u64,
}

impl TimerSlot {
    pub fn new(fired_tx: mpsc::UnboundedSender<TimerToken>) -> Self {
        Self {
            fired_tx,
            armed: None,
            next: 0,
        }
    }

    /// Slot plus the receiver its expiries are delivered on.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<TimerToken>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    /// Arm the slot, replacing any pending deadline. Must be called within a tokio runtime.
    pub fn schedule(&mut self, delay: Duration) -> TimerToken {
        self.cancel();
        self.next += 1;
        let token = TimerToken(self.next);
        let tx = self.fired_tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(token);
        });
        self.armed = Some((token, handle));
        token
    }

    pub fn cancel(&mut self) {
        if let Some((token, handle)) = self.armed.take() {
            debug!("timer {:?} cancelled", token);
            handle.abort();
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed.is_some()
    }

    /// Accept a fired token. True only for the currently armed one, which disarms the slot.
    pub fn take_fired(&mut self, token: TimerToken) -> bool {
        match &self.armed {
            Some((armed, _)) if *armed == token => {
                self.armed = None;
                true
            }
            _ => false,
        }
    }
}

impl Drop for TimerSlot {
    fn drop(&mut self) {
        self.cancel();
    }
}
