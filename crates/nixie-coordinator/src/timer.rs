//! Node expiry timers
//!
//! TigerStyle: Time is a capability, never an ambient dependency.
//!
//! The state machine arms a timer when a node disconnects; if the timer
//! fires before the node re-joins, the node is removed as if it had left.
//! The capability is a trait so tests schedule deterministically instead of
//! sleeping.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Handle to a scheduled expiry callback
pub trait TimerHandle: Send {
    /// Cancel the pending callback. Stopping an already-fired timer is a
    /// no-op.
    fn stop(&mut self);
}

/// Schedules expiry callbacks for a group's nodes
pub trait TimerFactory: Send + Sync {
    /// Schedule the expiry callback for `node` after `after`.
    fn schedule(&self, node: &str, after: Duration) -> Box<dyn TimerHandle>;
}

/// Timer handle backed by a spawned tokio task
pub struct TokioTimerHandle {
    handle: tokio::task::JoinHandle<()>,
}

impl TokioTimerHandle {
    /// Wrap a spawned task so `stop` aborts it
    pub fn new(handle: tokio::task::JoinHandle<()>) -> Self {
        Self { handle }
    }
}

impl TimerHandle for TokioTimerHandle {
    fn stop(&mut self) {
        self.handle.abort();
    }
}

/// Recording factory for deterministic tests
///
/// Never fires; tests drive expiry explicitly and assert on the recorded
/// schedule and stop calls.
#[derive(Default)]
pub struct MockTimerFactory {
    scheduled: Mutex<Vec<(String, Duration)>>,
    stops: Arc<AtomicUsize>,
}

impl MockTimerFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every `(node, duration)` pair passed to `schedule` so far
    pub fn scheduled(&self) -> Vec<(String, Duration)> {
        self.scheduled.lock().map(|v| v.clone()).unwrap_or_default()
    }

    /// Number of handles that were stopped
    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

impl TimerFactory for MockTimerFactory {
    fn schedule(&self, node: &str, after: Duration) -> Box<dyn TimerHandle> {
        if let Ok(mut scheduled) = self.scheduled.lock() {
            scheduled.push((node.to_string(), after));
        }
        Box::new(MockTimerHandle {
            stops: Arc::clone(&self.stops),
        })
    }
}

struct MockTimerHandle {
    stops: Arc<AtomicUsize>,
}

impl TimerHandle for MockTimerHandle {
    fn stop(&mut self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}
