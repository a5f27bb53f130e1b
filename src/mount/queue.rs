//! Per-mount priority queue of sources
//!
//! Sources are bucketed by priority. The top of the queue is the first
//! source, in arrival order, of the greatest priority that still has one.
//! A second index maps each source name to the source most recently added
//! under it, for routing out-of-band metadata.

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex;

/// Entries addressable by name
///
/// Names need not be unique: adding a second entry under a name makes it the
/// one [`SourceQueue::get_by_name`] returns.
pub trait Named {
    type Name: Eq + Hash + Clone;

    fn name(&self) -> &Self::Name;
}

struct Inner<T: Named> {
    /// Non-empty buckets only
    buckets: BTreeMap<i32, Vec<Arc<T>>>,
    names: HashMap<T::Name, Arc<T>>,
    len: usize,
}

/// Priority container for a mount's sources
///
/// Every operation takes the same lock, so the queue can be shared freely
/// between the connection tasks that add and remove sources and the mount
/// worker that reads the top.
pub struct SourceQueue<T: Named> {
    inner: Mutex<Inner<T>>,
}

impl<T: Named> SourceQueue<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                buckets: BTreeMap::new(),
                names: HashMap::new(),
                len: 0,
            }),
        }
    }

    /// Queue `entry` behind existing entries of the same priority
    pub fn add(&self, entry: Arc<T>, priority: i32) {
        let mut inner = self.inner.lock();
        inner.names.insert(entry.name().clone(), Arc::clone(&entry));
        inner.buckets.entry(priority).or_default().push(entry);
        inner.len += 1;
    }

    /// Remove `entry` from the given priority
    ///
    /// The name index is only cleared if it still points at `entry`.
    /// Returns `false` if the entry was not queued at that priority.
    pub fn remove(&self, entry: &Arc<T>, priority: i32) -> bool {
        let mut inner = self.inner.lock();

        if inner
            .names
            .get(entry.name())
            .is_some_and(|named| Arc::ptr_eq(named, entry))
        {
            inner.names.remove(entry.name());
        }

        let Some(bucket) = inner.buckets.get_mut(&priority) else {
            return false;
        };
        let Some(pos) = bucket.iter().position(|queued| Arc::ptr_eq(queued, entry)) else {
            return false;
        };

        bucket.remove(pos);
        if bucket.is_empty() {
            inner.buckets.remove(&priority);
        }
        inner.len -= 1;
        true
    }

    /// Entry with the highest rank
    pub fn top(&self) -> Option<Arc<T>> {
        let inner = self.inner.lock();
        inner
            .buckets
            .iter()
            .next_back()
            .and_then(|(_, bucket)| bucket.first().cloned())
    }

    /// First-added entry at `priority`
    pub fn get_by_priority(&self, priority: i32) -> Option<Arc<T>> {
        let inner = self.inner.lock();
        inner
            .buckets
            .get(&priority)
            .and_then(|bucket| bucket.first().cloned())
    }

    /// Most recently added entry under `name`
    pub fn get_by_name(&self, name: &T::Name) -> Option<Arc<T>> {
        self.inner.lock().names.get(name).cloned()
    }

    /// Whether any queued entry carries `name`
    pub fn contains_name(&self, name: &T::Name) -> bool {
        let inner = self.inner.lock();
        inner
            .buckets
            .values()
            .flatten()
            .any(|entry| entry.name() == name)
    }

    /// Priorities that currently hold entries, highest first
    pub fn priorities(&self) -> Vec<i32> {
        self.inner.lock().buckets.keys().rev().copied().collect()
    }

    /// All entries in rank order
    pub fn snapshot(&self) -> Vec<Arc<T>> {
        let inner = self.inner.lock();
        inner.buckets.values().rev().flatten().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Named> Default for SourceQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
