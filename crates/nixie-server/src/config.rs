//! Server configuration

use nixie_core::constants::NODE_EXPIRED_MS_DEFAULT;
use nixie_proto::GroupSecret;
use std::collections::HashMap;
use std::time::Duration;

/// Configuration of the coordinator server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Grace period before a disconnected (zombie) node is removed from its
    /// group
    pub node_expired_duration: Duration,
    /// Per-group shared secrets; empty disables auth
    pub group_secrets: HashMap<String, GroupSecret>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            node_expired_duration: Duration::from_millis(NODE_EXPIRED_MS_DEFAULT),
            group_secrets: HashMap::new(),
        }
    }
}

impl ServerConfig {
    /// Create the default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the zombie expiry grace period
    pub fn with_node_expired_duration(mut self, duration: Duration) -> Self {
        self.node_expired_duration = duration;
        self
    }

    /// Configure the secret pair for one group
    pub fn with_group_secret(mut self, group: impl Into<String>, secret: GroupSecret) -> Self {
        self.group_secrets.insert(group.into(), secret);
        self
    }

    /// Replace the whole secret map
    pub fn with_group_secrets(mut self, secrets: HashMap<String, GroupSecret>) -> Self {
        self.group_secrets = secrets;
        self
    }

    /// Configuration for tests: short expiry so zombies vanish quickly
    pub fn for_testing() -> Self {
        Self {
            node_expired_duration: Duration::from_millis(50),
            group_secrets: HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = ServerConfig::default();
        assert_eq!(
            config.node_expired_duration,
            Duration::from_millis(NODE_EXPIRED_MS_DEFAULT)
        );
        assert!(config.group_secrets.is_empty());
    }

    #[test]
    fn test_config_builders() {
        let config = ServerConfig::new()
            .with_node_expired_duration(Duration::from_secs(5))
            .with_group_secret(
                "group01",
                GroupSecret {
                    write: "w".into(),
                    read: "r".into(),
                },
            );

        assert_eq!(config.node_expired_duration, Duration::from_secs(5));
        assert_eq!(config.group_secrets["group01"].write, "w");
    }
}
