//! Checked-out resource handles.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::manager::Manager;
use crate::pool::Shared;

/// A resource plus the pool's bookkeeping for it.
pub(crate) struct Entry<T> {
    pub(crate) id: u64,
    pub(crate) resource: T,
    pub(crate) created_at: Instant,
    pub(crate) last_used_at: Instant,
}

impl<T> Entry<T> {
    pub(crate) fn new(id: u64, resource: T) -> Self {
        let now = Instant::now();
        Self {
            id,
            resource,
            created_at: now,
            last_used_at: now,
        }
    }

    pub(crate) fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_used_at)
    }

    pub(crate) fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.created_at)
    }
}

/// A resource checked out of a [`Pool`](crate::Pool).
///
/// The caller owns the resource exclusively until the handle is released,
/// either explicitly via [`Pooled::release`] / [`Pool::release`](crate::Pool::release)
/// or implicitly on drop. On drop, any destruction the release calls for is
/// spawned onto the runtime the pool was built in.
pub struct Pooled<M: Manager> {
    entry: Option<Entry<M::Resource>>,
    shared: Arc<Shared<M>>,
}

impl<M: Manager> Pooled<M> {
    pub(crate) fn new(entry: Entry<M::Resource>, shared: Arc<Shared<M>>) -> Self {
        Self {
            entry: Some(entry),
            shared,
        }
    }

    fn entry(&self) -> &Entry<M::Resource> {
        self.entry.as_ref().expect("handle used after release")
    }

    /// Pool-unique id of this resource. Stable across reuse.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.entry().id
    }

    /// When the resource was created.
    #[must_use]
    pub fn created_at(&self) -> Instant {
        self.entry().created_at
    }

    /// When the resource was last released to the pool (creation time if
    /// it never was).
    #[must_use]
    pub fn last_used_at(&self) -> Instant {
        self.entry().last_used_at
    }

    /// Hand the resource back, awaiting any destruction this triggers.
    pub async fn release(mut self) {
        if let Some(entry) = self.entry.take() {
            let shared = Arc::clone(&self.shared);
            shared.release(entry).await;
        }
    }

    pub(crate) fn belongs_to(&self, shared: &Arc<Shared<M>>) -> bool {
        Arc::ptr_eq(&self.shared, shared)
    }
}

impl<M: Manager> std::ops::Deref for Pooled<M> {
    type Target = M::Resource;

    fn deref(&self) -> &M::Resource {
        &self.entry().resource
    }
}

impl<M: Manager> std::ops::DerefMut for Pooled<M> {
    fn deref_mut(&mut self) -> &mut M::Resource {
        &mut self
            .entry
            .as_mut()
            .expect("handle used after release")
            .resource
    }
}

impl<M: Manager> Drop for Pooled<M> {
    fn drop(&mut self) {
        if let Some(entry) = self.entry.take() {
            self.shared.release_detached(entry);
        }
    }
}

impl<M: Manager> std::fmt::Debug for Pooled<M>
where
    M::Resource: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct("Pooled");
        if let Some(entry) = &self.entry {
            s.field("id", &entry.id).field("resource", &entry.resource);
        }
        s.finish()
    }
}
