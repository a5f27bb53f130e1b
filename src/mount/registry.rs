//! Mount registry implementation
//!
//! The central map from mount name to [`Mountpoint`]. Mounts are created by
//! the first source that connects to a name and removed either explicitly or
//! by the cleanup task once they sit unused.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;

use super::config::RegistryConfig;
use super::error::MountError;
use super::mountpoint::{MountPhase, Mountpoint, StreamProperties};
use super::source::Source;
use crate::stats::MountStats;

/// Central registry for all mounts
///
/// Lookups take the read lock; only creation and removal take the write lock.
/// Neither is ever held across an `.await`.
pub struct MountRegistry {
    mounts: RwLock<HashMap<String, Arc<Mountpoint>>>,
    config: RegistryConfig,
}

impl MountRegistry {
    /// Create a new mount registry with default configuration
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    /// Create a new mount registry with custom configuration
    pub fn with_config(config: RegistryConfig) -> Self {
        Self {
            mounts: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Get the registry configuration
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Mount a source connecting to `name` will feed
    ///
    /// Creates the mount if it does not exist or was closed. An existing mount
    /// only accepts sources of the content type it was created with.
    pub fn open_for_source(
        &self,
        name: &str,
        content_type: &str,
        properties: StreamProperties,
    ) -> Result<Arc<Mountpoint>, MountError> {
        if let Some(mount) = self.get(name).filter(|m| !m.is_closed()) {
            return check_content_type(mount, content_type);
        }

        let mut mounts = self.mounts.write();

        // Another source may have created it meanwhile
        if let Some(mount) = mounts.get(name).filter(|m| !m.is_closed()) {
            return check_content_type(Arc::clone(mount), content_type);
        }

        let mount = Mountpoint::new(name, content_type, properties);
        mounts.insert(name.to_string(), Arc::clone(&mount));

        tracing::info!(
            mount = %name,
            content_type = %content_type,
            "Mount created"
        );

        Ok(mount)
    }

    /// Open the mount for `source` and queue it there
    ///
    /// A mount closed between lookup and queueing (cleanup, removal) is
    /// replaced once.
    pub fn attach_source(
        &self,
        name: &str,
        content_type: &str,
        properties: StreamProperties,
        source: &Arc<Source>,
    ) -> Result<Arc<Mountpoint>, MountError> {
        let mut retried = false;
        loop {
            let mount = self.open_for_source(name, content_type, properties.clone())?;
            match mount.add_source(Arc::clone(source)) {
                Ok(()) => return Ok(mount),
                Err(MountError::Closed(_)) if !retried => {
                    tracing::debug!(mount = %name, "Mount closed while joining, reopening");
                    retried = true;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Look up a mount
    pub fn get(&self, name: &str) -> Option<Arc<Mountpoint>> {
        self.mounts.read().get(name).cloned()
    }

    /// Check if a mount exists
    pub fn exists(&self, name: &str) -> bool {
        self.mounts.read().contains_key(name)
    }

    /// Remove and destroy a mount
    pub fn remove(&self, name: &str) -> Result<(), MountError> {
        let mount = self
            .mounts
            .write()
            .remove(name)
            .ok_or_else(|| MountError::NotFound(name.to_string()))?;

        mount.destroy();
        tracing::info!(mount = %name, "Mount removed");
        Ok(())
    }

    /// Names of all mounts
    pub fn mount_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.mounts.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Get mount statistics
    pub fn get_mount_stats(&self, name: &str) -> Option<MountStats> {
        self.get(name).map(|mount| mount.stats())
    }

    /// Get total number of mounts
    pub fn mount_count(&self) -> usize {
        self.mounts.read().len()
    }

    /// Run cleanup task once
    ///
    /// Removes mounts that have been idle, with no sources or listeners, for
    /// longer than `idle_mount_timeout`. Each mount is closed under the
    /// registry write lock, so a source that looked it up meanwhile sees it
    /// closed and reopens the name.
    pub fn cleanup(&self) {
        let now = Instant::now();
        let timeout = self.config.idle_mount_timeout;

        let mut mounts = self.mounts.write();
        mounts.retain(|name, mount| {
            let status = mount.status();
            let idle_long_enough = status.phase == MountPhase::Idle
                && status
                    .idle_since
                    .is_some_and(|since| now.duration_since(since) >= timeout);

            if idle_long_enough && mount.close_if_unused() {
                tracing::info!(mount = %name, "Mount removed by cleanup");
                false
            } else {
                true
            }
        });
    }

    /// Spawn background cleanup task
    ///
    /// Returns a handle that can be used to abort the task.
    pub fn spawn_cleanup_task(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let registry = Arc::clone(self);
        let interval = registry.config.cleanup_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                registry.cleanup();
            }
        })
    }
}

impl Default for MountRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn check_content_type(
    mount: Arc<Mountpoint>,
    content_type: &str,
) -> Result<Arc<Mountpoint>, MountError> {
    if mount.content_type().eq_ignore_ascii_case(content_type) {
        Ok(mount)
    } else {
        Err(MountError::ContentTypeConflict {
            mount: mount.name().to_string(),
            expected: mount.content_type().to_string(),
            got: content_type.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::mount::{Source, SourceId};

    fn props() -> StreamProperties {
        StreamProperties::default()
    }

    #[tokio::test]
    async fn test_open_creates_once() {
        let registry = MountRegistry::new();
        let a = registry.open_for_source("/live", "audio/mpeg", props()).unwrap();
        let b = registry.open_for_source("/live", "audio/mpeg", props()).unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert!(registry.exists("/live"));
        assert_eq!(registry.mount_count(), 1);
        assert_eq!(registry.mount_names(), vec!["/live".to_string()]);
    }

    #[tokio::test]
    async fn test_content_type_conflict() {
        let registry = MountRegistry::new();
        registry.open_for_source("/live", "audio/mpeg", props()).unwrap();

        let result = registry.open_for_source("/live", "audio/ogg", props());
        assert_eq!(
            result.err(),
            Some(MountError::ContentTypeConflict {
                mount: "/live".into(),
                expected: "audio/mpeg".into(),
                got: "audio/ogg".into(),
            })
        );

        // Case differences are not a conflict
        assert!(registry.open_for_source("/live", "Audio/MPEG", props()).is_ok());
    }

    #[tokio::test]
    async fn test_remove_destroys() {
        let registry = MountRegistry::new();
        let mount = registry.open_for_source("/live", "audio/mpeg", props()).unwrap();

        registry.remove("/live").unwrap();
        assert!(!registry.exists("/live"));
        assert!(mount.is_closed());

        assert_eq!(
            registry.remove("/live"),
            Err(MountError::NotFound("/live".into()))
        );
    }

    #[tokio::test]
    async fn test_cleanup_removes_unused_idle_mounts() {
        let config = RegistryConfig::default().idle_mount_timeout(Duration::from_millis(20));
        let registry = MountRegistry::with_config(config);

        registry.open_for_source("/idle", "audio/mpeg", props()).unwrap();
        let watched = registry.open_for_source("/watched", "audio/mpeg", props()).unwrap();
        let _feed = watched.attach_listener(4).unwrap();
        let live = registry.open_for_source("/live", "audio/mpeg", props()).unwrap();
        live.add_source(Arc::new(Source::new(SourceId::new("/live", "h"), 0)))
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        registry.cleanup();

        assert!(!registry.exists("/idle"));
        assert!(registry.exists("/watched"));
        assert!(registry.exists("/live"));
    }

    #[tokio::test]
    async fn test_source_joining_cleaned_up_mount_reopens_it() {
        let config = RegistryConfig::default().idle_mount_timeout(Duration::from_millis(10));
        let registry = MountRegistry::with_config(config);
        registry.open_for_source("/live", "audio/mpeg", props()).unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        // Encoder looks the mount up, cleanup runs before it is queued
        let stale = registry.open_for_source("/live", "audio/mpeg", props()).unwrap();
        registry.cleanup();
        assert!(stale.is_closed());
        assert!(!registry.exists("/live"));

        let source = Arc::new(Source::new(SourceId::new("/live", "h"), 0));
        assert_eq!(
            stale.add_source(Arc::clone(&source)),
            Err(MountError::Closed("/live".into()))
        );

        let mount = registry
            .attach_source("/live", "audio/mpeg", props(), &source)
            .unwrap();
        assert!(!Arc::ptr_eq(&mount, &stale));
        assert!(!mount.is_closed());
        assert!(Arc::ptr_eq(&registry.get("/live").unwrap(), &mount));
        assert_eq!(mount.sources().len(), 1);
    }

    #[tokio::test]
    async fn test_cleanup_spares_mount_with_queued_source() {
        let config = RegistryConfig::default().idle_mount_timeout(Duration::from_millis(10));
        let registry = MountRegistry::with_config(config);
        registry.open_for_source("/live", "audio/mpeg", props()).unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        let source = Arc::new(Source::new(SourceId::new("/live", "h"), 0));
        let mount = registry
            .attach_source("/live", "audio/mpeg", props(), &source)
            .unwrap();
        registry.cleanup();

        assert!(registry.exists("/live"));
        assert!(!mount.is_closed());
    }

    #[tokio::test]
    async fn test_open_replaces_closed_mount() {
        let registry = MountRegistry::new();
        let old = registry.open_for_source("/live", "audio/mpeg", props()).unwrap();
        old.destroy();

        // A different content type is fine, the old mount is gone
        let new = registry.open_for_source("/live", "audio/ogg", props()).unwrap();
        assert!(!Arc::ptr_eq(&old, &new));
        assert_eq!(new.content_type(), "audio/ogg");
        assert_eq!(registry.mount_count(), 1);
    }

    #[tokio::test]
    async fn test_cleanup_keeps_fresh_mounts() {
        let registry = MountRegistry::new();
        registry.open_for_source("/fresh", "audio/mpeg", props()).unwrap();

        registry.cleanup();
        assert!(registry.exists("/fresh"));
    }

    #[tokio::test]
    async fn test_stats() {
        let registry = MountRegistry::new();
        let mount = registry.open_for_source("/live", "audio/mpeg", props()).unwrap();
        let _feed = mount.attach_listener(4).unwrap();

        let stats = registry.get_mount_stats("/live").unwrap();
        assert_eq!(stats.name, "/live");
        assert_eq!(stats.content_type, "audio/mpeg");
        assert_eq!(stats.listeners, 1);
        assert_eq!(stats.sources, 0);
        assert_eq!(stats.phase, MountPhase::Idle);

        assert!(registry.get_mount_stats("/missing").is_none());
    }
}
