//! Reconnect scheduling for the stream connection.
//!
//! One fixed-delay timer at a time. The timer does not reconnect by itself;
//! it posts an event into the owner's queue and the owner reconnects.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

pub struct ReconnectSupervisor {
    delay: Duration,
    pending: Option<JoinHandle<()>>,
    scheduled: u64,
}

impl ReconnectSupervisor {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: None,
            scheduled: 0,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// A timer is armed and hasn't been acknowledged via [`Self::timer_fired`].
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Timers created over the supervisor's lifetime.
    pub fn scheduled_count(&self) -> u64 {
        self.scheduled
    }

    /// Record a connection loss. Arms a timer that delivers `event` on `tx`
    /// after the delay, unless one is already pending.
    ///
    /// Returns whether a new timer was armed.
    pub fn notify_lost<E>(&mut self, tx: &mpsc::Sender<E>, event: E) -> bool
    where
        E: Send + 'static,
    {
        if self.pending.is_some() {
            debug!(
                component = "reconnect",
                event = "reconnect.already_pending",
                "Reconnect already scheduled"
            );
            return false;
        }

        let delay = self.delay;
        let tx = tx.clone();
        self.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(event).await;
        }));
        self.scheduled += 1;

        debug!(
            component = "reconnect",
            event = "reconnect.scheduled",
            delay_ms = delay.as_millis() as u64,
            attempt = self.scheduled,
            "Reconnect scheduled"
        );
        true
    }

    /// The owner received the timer's event; a new loss may arm a new timer.
    pub fn timer_fired(&mut self) {
        self.pending = None;
    }

    /// Drop any pending timer without firing it.
    pub fn cancel(&mut self) {
        if let Some(handle) = self.pending.take() {
            handle.abort();
            debug!(
                component = "reconnect",
                event = "reconnect.cancelled",
                "Pending reconnect cancelled"
            );
        }
    }
}

impl Drop for ReconnectSupervisor {
    fn drop(&mut self) {
        if let Some(handle) = self.pending.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn repeated_losses_arm_one_timer() {
        let (tx, mut rx) = mpsc::channel::<u32>(8);
        let mut supervisor = ReconnectSupervisor::new(Duration::from_millis(3000));

        assert!(supervisor.notify_lost(&tx, 1));
        for n in 2..=5 {
            assert!(!supervisor.notify_lost(&tx, n));
        }
        assert_eq!(supervisor.scheduled_count(), 1);

        assert_eq!(rx.recv().await, Some(1));
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(rx.try_recv().is_err());

        // Still pending until the owner acknowledges it.
        assert!(!supervisor.notify_lost(&tx, 6));
        supervisor.timer_fired();
        assert!(supervisor.notify_lost(&tx, 7));
        assert_eq!(rx.recv().await, Some(7));
        assert_eq!(supervisor.scheduled_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn timer_waits_for_delay() {
        let (tx, mut rx) = mpsc::channel::<&'static str>(1);
        let mut supervisor = ReconnectSupervisor::new(Duration::from_millis(3000));
        supervisor.notify_lost(&tx, "due");
        tokio::task::yield_now().await;

        tokio::time::advance(Duration::from_millis(2999)).await;
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());

        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(rx.recv().await, Some("due"));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_prevents_delivery() {
        let (tx, mut rx) = mpsc::channel::<u32>(1);
        let mut supervisor = ReconnectSupervisor::new(Duration::from_millis(3000));

        supervisor.notify_lost(&tx, 1);
        supervisor.cancel();
        assert!(!supervisor.is_pending());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(rx.try_recv().is_err());
    }
}
