//! Mountpoint state machine
//!
//! A mountpoint owns the priority queue of its sources, the fan-out its
//! listeners attach to, and the current now-playing title. Connection tasks
//! mutate the queue directly and then post an event; a single worker task per
//! mount handles those events in arrival order and is the only place that
//! decides which source is active.
//!
//! ```text
//!   SOURCE conn ──► add_source ──┐
//!   SOURCE ends ──► remove_source┤     ┌──────────────┐
//!   admin meta  ──► set_metadata ├───► │ mount worker │ ──► redirect(top → fanout,
//!   registry    ──► destroy ─────┘     └──────────────┘              old → discard)
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};

use super::error::MountError;
use super::queue::SourceQueue;
use super::source::{Source, SourceId};
use crate::fanout::{discard, Fanout, RingBuffer};
use crate::stats::MountStats;

/// Lifecycle phase of a mount
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountPhase {
    /// No active source
    Idle,
    /// A source is feeding listeners
    Live,
    /// Destroyed; no further sources or listeners are accepted
    Closed,
}

/// Observable mount status
#[derive(Debug, Clone)]
pub struct MountStatus {
    pub phase: MountPhase,
    /// Serial of the active source
    pub active: Option<u64>,
    /// Set while idle
    pub idle_since: Option<Instant>,
}

/// Stream description supplied by the first source
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamProperties {
    pub name: Option<String>,
    pub description: Option<String>,
    pub genre: Option<String>,
    pub url: Option<String>,
    pub bitrate: Option<String>,
    pub public: Option<String>,
}

impl StreamProperties {
    /// Response headers announcing these properties to listeners
    pub fn icy_headers(&self) -> Vec<(&'static str, &str)> {
        [
            ("icy-name", &self.name),
            ("icy-description", &self.description),
            ("icy-genre", &self.genre),
            ("icy-url", &self.url),
            ("icy-br", &self.bitrate),
            ("icy-pub", &self.public),
        ]
        .into_iter()
        .filter_map(|(header, value)| value.as_deref().map(|v| (header, v)))
        .collect()
    }
}

#[derive(Debug)]
enum MountEvent {
    NewSource,
    RemoveSource,
    NewMetadata,
    Destroy,
}

/// Everything a listener session needs from its mount
pub struct ListenerFeed {
    pub ring: RingBuffer,
    pub now_playing: watch::Receiver<Arc<str>>,
    /// Counts the listener until dropped
    pub guard: ListenerGuard,
}

/// Keeps a listener counted on its mount
pub struct ListenerGuard {
    count: Arc<AtomicUsize>,
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        self.count.fetch_sub(1, Ordering::AcqRel);
    }
}

/// A named broadcast point
pub struct Mountpoint {
    name: String,
    content_type: String,
    properties: StreamProperties,
    sources: SourceQueue<Source>,
    fanout: Arc<Fanout>,
    source_metadata: Mutex<HashMap<SourceId, String>>,
    now_playing: watch::Sender<Arc<str>>,
    status: watch::Sender<MountStatus>,
    events: mpsc::UnboundedSender<MountEvent>,
    listeners: Arc<AtomicUsize>,
    closed: AtomicBool,
    /// Serializes joining the mount against closing it
    gate: Mutex<()>,
}

impl Mountpoint {
    /// Create a mount and spawn its worker
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        name: impl Into<String>,
        content_type: impl Into<String>,
        properties: StreamProperties,
    ) -> Arc<Self> {
        let (events, rx) = mpsc::unbounded_channel();
        let (now_playing, _) = watch::channel(Arc::<str>::from(""));
        let (status, _) = watch::channel(MountStatus {
            phase: MountPhase::Idle,
            active: None,
            idle_since: Some(Instant::now()),
        });

        let mount = Arc::new(Self {
            name: name.into(),
            content_type: content_type.into(),
            properties,
            sources: SourceQueue::new(),
            fanout: Arc::new(Fanout::new()),
            source_metadata: Mutex::new(HashMap::new()),
            now_playing,
            status,
            events,
            listeners: Arc::new(AtomicUsize::new(0)),
            closed: AtomicBool::new(false),
            gate: Mutex::new(()),
        });

        tokio::spawn(run_worker(Arc::downgrade(&mount), rx));
        mount
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn properties(&self) -> &StreamProperties {
        &self.properties
    }

    /// The mount's source queue
    pub fn sources(&self) -> &SourceQueue<Source> {
        &self.sources
    }

    /// Queue a source and let the worker decide whether it becomes active
    pub fn add_source(&self, source: Arc<Source>) -> Result<(), MountError> {
        {
            let _gate = self.gate.lock();
            if self.is_closed() {
                return Err(MountError::Closed(self.name.clone()));
            }
            self.sources.add(Arc::clone(&source), source.priority());
        }

        tracing::debug!(
            mount = %self.name,
            serial = source.serial(),
            priority = source.priority(),
            "Source queued"
        );
        self.post(MountEvent::NewSource);
        Ok(())
    }

    /// Remove a source; if it was active the next one takes over
    pub fn remove_source(&self, source: &Arc<Source>) -> bool {
        let removed = self.sources.remove(source, source.priority());
        if removed {
            tracing::debug!(mount = %self.name, serial = source.serial(), "Source dequeued");
            self.post(MountEvent::RemoveSource);
        }
        removed
    }

    /// Store `title` for the source identified by `id`
    ///
    /// An empty title clears the entry. Listeners see the title only while
    /// a source with that id is active.
    pub fn set_metadata(&self, id: SourceId, title: impl Into<String>) {
        let title = title.into();
        {
            let mut table = self.source_metadata.lock();
            if title.is_empty() {
                table.remove(&id);
            } else {
                table.insert(id, title);
            }
        }
        self.post(MountEvent::NewMetadata);
    }

    /// Attach a listener with a ring buffer of `capacity` chunks
    pub fn attach_listener(&self, capacity: usize) -> Result<ListenerFeed, MountError> {
        let ring = RingBuffer::new(capacity);
        {
            let _gate = self.gate.lock();
            if self.is_closed() {
                return Err(MountError::Closed(self.name.clone()));
            }
            self.listeners.fetch_add(1, Ordering::AcqRel);
        }
        self.fanout.add(Arc::new(ring.writer()));

        Ok(ListenerFeed {
            ring,
            now_playing: self.now_playing.subscribe(),
            guard: ListenerGuard {
                count: Arc::clone(&self.listeners),
            },
        })
    }

    /// Stop all sources and listeners
    ///
    /// The mount rejects new sources and listeners from this call on.
    pub fn destroy(&self) {
        let first = {
            let _gate = self.gate.lock();
            !self.closed.swap(true, Ordering::AcqRel)
        };
        if first {
            self.begin_teardown();
        }
    }

    /// Close the mount if no source is queued and no listener attached
    ///
    /// Decided under the same lock that admits sources and listeners, so a
    /// joining connection either lands before the check or sees the mount
    /// closed.
    pub fn close_if_unused(&self) -> bool {
        {
            let _gate = self.gate.lock();
            if self.is_closed() || !self.sources.is_empty() || self.listener_count() > 0 {
                return false;
            }
            self.closed.store(true, Ordering::Release);
        }
        self.begin_teardown();
        true
    }

    fn begin_teardown(&self) {
        if self.events.send(MountEvent::Destroy).is_err() {
            // Worker already gone; tear down inline
            self.teardown(None);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Current now-playing title
    pub fn now_playing(&self) -> Arc<str> {
        Arc::clone(&self.now_playing.borrow())
    }

    pub fn status(&self) -> MountStatus {
        self.status.borrow().clone()
    }

    /// Follow status changes
    pub fn watch_status(&self) -> watch::Receiver<MountStatus> {
        self.status.subscribe()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> MountStats {
        let status = self.status();
        MountStats {
            name: self.name.clone(),
            content_type: self.content_type.clone(),
            phase: status.phase,
            active_source: status.active,
            sources: self.sources.len(),
            listeners: self.listener_count(),
            now_playing: self.now_playing().to_string(),
            evicted_listeners: self.fanout.evicted(),
            idle_since: status.idle_since,
        }
    }

    fn post(&self, event: MountEvent) {
        if self.events.send(event).is_err() {
            tracing::debug!(mount = %self.name, "Mount worker gone, event dropped");
        }
    }

    /// Make the queue's top the active source
    fn promote(&self, active: &mut Option<Arc<Source>>) {
        if self.is_closed() {
            return;
        }

        let top = self.sources.top();
        let unchanged = match (active.as_ref(), top.as_ref()) {
            (Some(current), Some(next)) => Arc::ptr_eq(current, next),
            (None, None) => true,
            _ => false,
        };
        if unchanged {
            return;
        }

        if let Some(previous) = active.take() {
            previous.redirect(discard());
        }

        match top {
            Some(next) => {
                next.redirect(self.fanout.clone());
                tracing::info!(
                    mount = %self.name,
                    serial = next.serial(),
                    source = %next.id(),
                    priority = next.priority(),
                    "Source promoted"
                );
                self.status.send_replace(MountStatus {
                    phase: MountPhase::Live,
                    active: Some(next.serial()),
                    idle_since: None,
                });
                *active = Some(next);
            }
            None => {
                tracing::info!(mount = %self.name, "Mount idle, no sources left");
                self.status.send_replace(MountStatus {
                    phase: MountPhase::Idle,
                    active: None,
                    idle_since: Some(Instant::now()),
                });
            }
        }

        self.refresh_now_playing(active.as_ref());
    }

    /// Copy the active source's stored title into the now-playing cell
    fn refresh_now_playing(&self, active: Option<&Arc<Source>>) {
        let title = active
            .and_then(|source| self.source_metadata.lock().get(source.id()).cloned())
            .unwrap_or_default();

        self.now_playing.send_if_modified(|current| {
            if **current == *title {
                return false;
            }
            *current = Arc::from(title.as_str());
            true
        });
    }

    /// Drop titles whose source is no longer queued
    fn prune_metadata(&self) {
        let mut table = self.source_metadata.lock();
        table.retain(|id, _| self.sources.contains_name(id));
    }

    fn teardown(&self, active: Option<Arc<Source>>) {
        if let Some(source) = active {
            source.redirect(discard());
        }
        for source in self.sources.snapshot() {
            source.shutdown();
        }
        self.fanout.close();
        self.source_metadata.lock().clear();
        self.status.send_replace(MountStatus {
            phase: MountPhase::Closed,
            active: None,
            idle_since: None,
        });
        tracing::info!(mount = %self.name, "Mount destroyed");
    }
}

async fn run_worker(mount: Weak<Mountpoint>, mut events: mpsc::UnboundedReceiver<MountEvent>) {
    let mut active: Option<Arc<Source>> = None;

    while let Some(event) = events.recv().await {
        let Some(mount) = mount.upgrade() else {
            break;
        };

        match event {
            MountEvent::NewSource => mount.promote(&mut active),
            MountEvent::RemoveSource => {
                mount.promote(&mut active);
                mount.prune_metadata();
            }
            MountEvent::NewMetadata => {
                mount.prune_metadata();
                mount.refresh_now_playing(active.as_ref());
            }
            MountEvent::Destroy => {
                mount.teardown(active.take());
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    async fn eventually(cond: impl Fn() -> bool) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !cond() {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("condition not reached");
    }

    fn source(host: &str, priority: i32) -> Arc<Source> {
        Arc::new(Source::new(SourceId::new("/live", host), priority))
    }

    fn mount() -> Arc<Mountpoint> {
        Mountpoint::new("/live", "audio/mpeg", StreamProperties::default())
    }

    #[tokio::test]
    async fn test_first_source_becomes_active() {
        let mount = mount();
        assert_eq!(mount.status().phase, MountPhase::Idle);

        let a = source("a", 0);
        mount.add_source(a.clone()).unwrap();

        eventually(|| mount.status().active == Some(a.serial())).await;
        assert_eq!(mount.status().phase, MountPhase::Live);
        assert!(a.is_active());
    }

    #[tokio::test]
    async fn test_higher_priority_preempts_and_failover() {
        let mount = mount();
        let low = source("low", 0);
        let high = source("high", 10);

        mount.add_source(low.clone()).unwrap();
        eventually(|| low.is_active()).await;

        mount.add_source(high.clone()).unwrap();
        eventually(|| mount.status().active == Some(high.serial())).await;
        assert!(high.is_active());
        assert!(!low.is_active());

        // Active top leaves, the remaining source takes over
        assert!(mount.remove_source(&high));
        eventually(|| mount.status().active == Some(low.serial())).await;
        assert!(low.is_active());
        assert!(!high.is_active());

        assert!(mount.remove_source(&low));
        eventually(|| mount.status().phase == MountPhase::Idle).await;
        assert!(!low.is_active());
        assert!(mount.status().idle_since.is_some());
    }

    #[tokio::test]
    async fn test_only_active_source_reaches_listeners() {
        let mount = mount();
        let mut feed = mount.attach_listener(16).unwrap();

        let main = source("main", 5);
        let backup = source("backup", 1);
        mount.add_source(main.clone()).unwrap();
        mount.add_source(backup.clone()).unwrap();
        eventually(|| main.is_active()).await;

        backup.write(b"BBBB").unwrap();
        main.write(b"MMMM").unwrap();

        mount.remove_source(&main);
        eventually(|| backup.is_active()).await;
        backup.write(b"bbbb").unwrap();

        let mut buf = [0u8; 8];
        feed.ring.read_full(&mut buf).await.unwrap();
        assert_eq!(&buf, b"MMMMbbbb");
    }

    #[tokio::test]
    async fn test_metadata_follows_active_source() {
        let mount = mount();
        let main = source("main", 5);
        let backup = source("backup", 1);
        mount.add_source(main.clone()).unwrap();
        mount.add_source(backup.clone()).unwrap();
        eventually(|| main.is_active()).await;

        mount.set_metadata(main.id().clone(), "Main Show");
        eventually(|| &*mount.now_playing() == "Main Show").await;

        // Stored, but not visible while backup is inactive
        mount.set_metadata(backup.id().clone(), "Backup Loop");
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(&*mount.now_playing(), "Main Show");

        mount.remove_source(&main);
        eventually(|| &*mount.now_playing() == "Backup Loop").await;
    }

    #[tokio::test]
    async fn test_metadata_for_unqueued_source_is_pruned() {
        let mount = mount();
        let main = source("main", 0);
        mount.add_source(main.clone()).unwrap();
        eventually(|| main.is_active()).await;

        mount.set_metadata(SourceId::new("/live", "stranger"), "Nope");
        mount.set_metadata(main.id().clone(), "Yes");
        eventually(|| &*mount.now_playing() == "Yes").await;
        assert_eq!(mount.source_metadata.lock().len(), 1);

        mount.remove_source(&main);
        eventually(|| mount.source_metadata.lock().is_empty()).await;
        eventually(|| mount.now_playing().is_empty()).await;
    }

    #[tokio::test]
    async fn test_empty_title_clears() {
        let mount = mount();
        let main = source("main", 0);
        mount.add_source(main.clone()).unwrap();

        mount.set_metadata(main.id().clone(), "Something");
        eventually(|| &*mount.now_playing() == "Something").await;

        mount.set_metadata(main.id().clone(), "");
        eventually(|| mount.now_playing().is_empty()).await;
    }

    #[tokio::test]
    async fn test_listener_count_tracks_feeds() {
        let mount = mount();
        let a = mount.attach_listener(4).unwrap();
        let b = mount.attach_listener(4).unwrap();
        assert_eq!(mount.listener_count(), 2);

        drop(a);
        assert_eq!(mount.listener_count(), 1);
        drop(b);
        assert_eq!(mount.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_destroy_stops_everything() {
        let mount = mount();
        let mut feed = mount.attach_listener(4).unwrap();
        let a = source("a", 0);
        let b = source("b", 0);
        mount.add_source(a.clone()).unwrap();
        mount.add_source(b.clone()).unwrap();
        eventually(|| a.is_active()).await;

        mount.destroy();
        eventually(|| mount.status().phase == MountPhase::Closed).await;

        assert!(!a.is_active());
        tokio::time::timeout(Duration::from_secs(1), a.shutdown_requested())
            .await
            .unwrap();
        tokio::time::timeout(Duration::from_secs(1), b.shutdown_requested())
            .await
            .unwrap();

        let mut buf = [0u8; 4];
        assert_eq!(feed.ring.read(&mut buf).await.unwrap(), 0);

        assert!(matches!(
            mount.add_source(source("late", 0)),
            Err(MountError::Closed(_))
        ));
        assert!(mount.attach_listener(4).is_err());
    }

    #[tokio::test]
    async fn test_close_if_unused() {
        let mount = mount();

        let feed = mount.attach_listener(4).unwrap();
        assert!(!mount.close_if_unused());
        drop(feed);

        let a = source("a", 0);
        mount.add_source(a.clone()).unwrap();
        assert!(!mount.close_if_unused());
        assert!(mount.remove_source(&a));

        assert!(mount.close_if_unused());
        assert!(mount.is_closed());
        assert!(!mount.close_if_unused());
        assert!(matches!(
            mount.add_source(source("late", 0)),
            Err(MountError::Closed(_))
        ));
        eventually(|| mount.status().phase == MountPhase::Closed).await;
    }

    #[test]
    fn test_icy_headers_skip_missing() {
        let props = StreamProperties {
            name: Some("Radio".into()),
            bitrate: Some("128".into()),
            ..Default::default()
        };
        assert_eq!(
            props.icy_headers(),
            vec![("icy-name", "Radio"), ("icy-br", "128")]
        );
    }
}
