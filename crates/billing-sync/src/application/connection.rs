//! # Connection Tracker
//!
//! Connection state plus the connection-attempt counter used as the
//! stale-result guard.
//!
//! Every entry into `Connecting` starts a new attempt. Results of backend
//! calls made under an older attempt are discarded by the catalog cache,
//! the reconciler and the acknowledgment pipeline.

use crate::domain::ConnectionState;
use crate::events::{publish, BillingEvent, BillingEventBus};
use billing_telemetry::CONNECTION_STATE;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Shared connection state and attempt counter.
pub struct ConnectionTracker {
    state: RwLock<ConnectionState>,
    attempt: AtomicU64,
    shut_down: AtomicBool,
    bus: Arc<BillingEventBus>,
}

impl ConnectionTracker {
    /// Disconnected tracker at attempt zero.
    pub fn new(bus: Arc<BillingEventBus>) -> Self {
        Self {
            state: RwLock::new(ConnectionState::Disconnected),
            attempt: AtomicU64::new(0),
            shut_down: AtomicBool::new(false),
            bus,
        }
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Current attempt number.
    pub fn current_attempt(&self) -> u64 {
        self.attempt.load(Ordering::SeqCst)
    }

    /// Is `attempt` still the latest attempt?
    pub fn is_current(&self, attempt: u64) -> bool {
        self.current_attempt() == attempt
    }

    /// Has the engine been shut down?
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// `Disconnected -> Connecting`. Returns the new attempt number, or
    /// `None` when an attempt is already running, the client is connected,
    /// or the engine is shut down.
    pub fn begin_attempt(&self) -> Option<u64> {
        let mut state = self.state.write();
        if self.is_shut_down() || *state != ConnectionState::Disconnected {
            return None;
        }
        let attempt = self.attempt.fetch_add(1, Ordering::SeqCst) + 1;
        self.transition(&mut state, ConnectionState::Connecting);
        Some(attempt)
    }

    /// `Connecting -> Connected` for the current attempt.
    pub fn mark_connected(&self, attempt: u64) -> bool {
        let mut state = self.state.write();
        if !self.is_current(attempt) || *state != ConnectionState::Connecting {
            return false;
        }
        self.transition(&mut state, ConnectionState::Connected);
        true
    }

    /// Fall back to `Disconnected`.
    ///
    /// With `Some(attempt)`, only applies while that attempt is current.
    /// Returns whether the state changed.
    pub fn mark_disconnected(&self, attempt: Option<u64>) -> bool {
        let mut state = self.state.write();
        if attempt.is_some_and(|a| !self.is_current(a)) {
            return false;
        }
        if *state == ConnectionState::Disconnected {
            return false;
        }
        self.transition(&mut state, ConnectionState::Disconnected);
        true
    }

    /// Stop for good: disconnect and invalidate every in-flight result.
    pub fn shutdown(&self) {
        let mut state = self.state.write();
        self.shut_down.store(true, Ordering::SeqCst);
        self.attempt.fetch_add(1, Ordering::SeqCst);
        if *state != ConnectionState::Disconnected {
            self.transition(&mut state, ConnectionState::Disconnected);
        }
    }

    // Publishes while the state lock is held so event order follows
    // transition order.
    fn transition(&self, state: &mut ConnectionState, next: ConnectionState) {
        debug!(from = ?*state, to = ?next, attempt = self.current_attempt(), "Connection state change");
        *state = next;
        CONNECTION_STATE.set(next.as_gauge());
        publish(&self.bus, BillingEvent::ConnectionStateChanged(next));
    }
}
