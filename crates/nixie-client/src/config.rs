//! Client options

use crate::dial::{DefaultDialer, Dialer};
use nixie_coordinator::PartitionId;
use nixie_core::constants::CLIENT_RETRY_MS_DEFAULT;
use nixie_core::io::{TimeProvider, WallClockTime};
use std::sync::Arc;
use std::time::Duration;

/// Callback invoked when the group's member list changes
pub type NodeListener = Arc<dyn Fn(&[String]) + Send + Sync>;

/// Callback invoked when a partition's effective owner changes
///
/// The owner is empty while the partition is not running anywhere.
pub type PartitionListener = Arc<dyn Fn(PartitionId, &str) + Send + Sync>;

/// Options of the worker-side runtime
#[derive(Clone)]
pub struct ClientOptions {
    /// Pause between reconnect attempts
    pub retry_duration: Duration,
    /// Write secret sent with the join command
    pub secret: String,
    /// Member-list change callback (default no-op)
    pub node_listener: NodeListener,
    /// Effective-owner change callback (default no-op)
    pub partition_listener: PartitionListener,
    /// Websocket dialer
    pub dialer: Arc<dyn Dialer>,
    /// Clock used for the retry sleep
    pub time: Arc<dyn TimeProvider>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            retry_duration: Duration::from_millis(CLIENT_RETRY_MS_DEFAULT),
            secret: String::new(),
            node_listener: Arc::new(|_nodes| {}),
            partition_listener: Arc::new(|_partition, _owner| {}),
            dialer: Arc::new(DefaultDialer),
            time: Arc::new(WallClockTime::new()),
        }
    }
}

impl ClientOptions {
    /// Create the default options
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the reconnect pause
    pub fn with_retry_duration(mut self, duration: Duration) -> Self {
        self.retry_duration = duration;
        self
    }

    /// Set the write secret
    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = secret.into();
        self
    }

    /// Set the member-list change callback
    pub fn with_node_listener(
        mut self,
        listener: impl Fn(&[String]) + Send + Sync + 'static,
    ) -> Self {
        self.node_listener = Arc::new(listener);
        self
    }

    /// Set the effective-owner change callback
    pub fn with_partition_listener(
        mut self,
        listener: impl Fn(PartitionId, &str) + Send + Sync + 'static,
    ) -> Self {
        self.partition_listener = Arc::new(listener);
        self
    }

    /// Set the websocket dialer
    pub fn with_dialer(mut self, dialer: Arc<dyn Dialer>) -> Self {
        self.dialer = dialer;
        self
    }

    /// Inject a clock, for tests
    pub fn with_time_provider(mut self, time: Arc<dyn TimeProvider>) -> Self {
        self.time = time;
        self
    }

    /// Options for tests: near-immediate reconnects
    pub fn for_testing() -> Self {
        Self::default().with_retry_duration(Duration::from_millis(10))
    }
}

impl std::fmt::Debug for ClientOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientOptions")
            .field("retry_duration", &self.retry_duration)
            .field("secret", &if self.secret.is_empty() { "" } else { "***" })
            .field("time", &self.time)
            .finish()
    }
}
