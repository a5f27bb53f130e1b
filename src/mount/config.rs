//! Mount registry configuration

use std::time::Duration;

/// Configuration for the mount registry
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// How often the cleanup task runs
    pub cleanup_interval: Duration,

    /// A mount with no sources and no listeners is removed after this long
    pub idle_mount_timeout: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            cleanup_interval: Duration::from_secs(10),
            idle_mount_timeout: Duration::from_secs(60),
        }
    }
}

impl RegistryConfig {
    /// Set the cleanup interval
    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    /// Set how long an unused mount is kept
    pub fn idle_mount_timeout(mut self, timeout: Duration) -> Self {
        self.idle_mount_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RegistryConfig::default();
        assert_eq!(config.cleanup_interval, Duration::from_secs(10));
        assert_eq!(config.idle_mount_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_builder() {
        let config = RegistryConfig::default()
            .cleanup_interval(Duration::from_millis(50))
            .idle_mount_timeout(Duration::ZERO);
        assert_eq!(config.cleanup_interval, Duration::from_millis(50));
        assert_eq!(config.idle_mount_timeout, Duration::ZERO);
    }
}
