//! # Backoff Scheduler
//!
//! Runs reconnect actions after the current backoff delay.

use crate::algorithms::ReconnectBackoff;
use billing_telemetry::RECONNECT_DELAY_SECONDS;
use parking_lot::Mutex;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::info;

/// Timer-driven retry scheduler.
///
/// `reset` may race with a pending retry: the pending retry still fires
/// once, later ones start again from the floor.
pub struct BackoffScheduler {
    policy: Mutex<ReconnectBackoff>,
    last_scheduled: Mutex<Option<Duration>>,
    pending: Mutex<Vec<JoinHandle<()>>>,
}

impl BackoffScheduler {
    /// Scheduler starting at `floor`.
    pub fn new(floor: Duration, ceiling: Duration) -> Self {
        let policy = ReconnectBackoff::new(floor, ceiling);
        RECONNECT_DELAY_SECONDS.set(policy.current_delay().as_secs_f64());
        Self {
            policy: Mutex::new(policy),
            last_scheduled: Mutex::new(None),
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Run `retry` after the current delay, then double the delay.
    ///
    /// Returns the delay used. Must be called inside a tokio runtime.
    pub fn schedule<F>(&self, retry: F) -> Duration
    where
        F: FnOnce() + Send + 'static,
    {
        let (delay, next, failures) = {
            let mut policy = self.policy.lock();
            let delay = policy.next_delay();
            (delay, policy.current_delay(), policy.consecutive_failures())
        };
        *self.last_scheduled.lock() = Some(delay);
        RECONNECT_DELAY_SECONDS.set(next.as_secs_f64());
        info!(
            delay_ms = delay.as_millis() as u64,
            failures, "[billing] Scheduling reconnect"
        );

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            retry();
        });

        let mut pending = self.pending.lock();
        pending.retain(|h| !h.is_finished());
        pending.push(handle);
        delay
    }

    /// Restore the delay to the floor.
    pub fn reset(&self) {
        let mut policy = self.policy.lock();
        policy.reset();
        RECONNECT_DELAY_SECONDS.set(policy.current_delay().as_secs_f64());
    }

    /// Delay the next `schedule` call would use.
    pub fn current_delay(&self) -> Duration {
        self.policy.lock().current_delay()
    }

    /// Failures since the last reset.
    pub fn consecutive_failures(&self) -> u32 {
        self.policy.lock().consecutive_failures()
    }

    /// Delay used by the most recent `schedule` call.
    pub fn last_scheduled(&self) -> Option<Duration> {
        *self.last_scheduled.lock()
    }

    /// Retries scheduled but not yet fired.
    pub fn pending_retries(&self) -> usize {
        self.pending.lock().iter().filter(|h| !h.is_finished()).count()
    }

    /// Abort every pending retry.
    pub fn cancel_all(&self) {
        let handles: Vec<_> = self.pending.lock().drain(..).collect();
        for handle in &handles {
            handle.abort();
        }
        if !handles.is_empty() {
            info!(cancelled = handles.len(), "Pending reconnects cancelled");
        }
    }
}
