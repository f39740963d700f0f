//! Resource pool: bounded, cancellation-aware, with idle expiry.
//!
//! All mutable state (capacity counter, idle set, closed flag and the wait
//! queue) sits behind one `parking_lot::Mutex`. Manager calls (`create`,
//! `destroy`) always run with the lock released.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::PoolConfig;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::handle::{Entry, Pooled};
use crate::manager::Manager;
use crate::reaper;
use crate::sink::{ErrorSink, LogSink};
use crate::waiter::{WaitQueue, Waiter};

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

/// Point-in-time pool statistics.
///
/// `created + creating == destroyed + active` holds for every snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Live resources, idle or checked out, plus creations in flight.
    pub active: usize,
    /// Factory calls in flight (counted in `active`).
    pub creating: usize,
    /// Resources sitting in the idle set.
    pub idle: usize,
    /// Acquires currently blocked waiting for a resource.
    pub waiters: usize,
    /// Configured capacity.
    pub max_active: usize,
    /// Total resources ever created.
    pub created: u64,
    /// Total resources handed to the destructor.
    pub destroyed: u64,
    /// Of `destroyed`, how many were evicted by the reaper.
    pub reaped: u64,
    /// Total successful acquisitions.
    pub acquisitions: u64,
    /// Total releases back to the pool.
    pub releases: u64,
    /// Acquires that hit their deadline.
    pub timeouts: u64,
    /// Factory calls that failed.
    pub create_failures: u64,
    /// Whether the pool has been closed.
    pub closed: bool,
}

impl PoolStats {
    /// Resources currently held by callers.
    #[must_use]
    pub fn in_use(&self) -> usize {
        self.active - self.idle - self.creating
    }
}

// ---------------------------------------------------------------------------
// Pool internals
// ---------------------------------------------------------------------------

/// Why a resource is leaving the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DestroyReason {
    /// Idle past `max_idle_time` or older than `max_lifetime`.
    Expired,
    /// Released while the idle set was full.
    Excess,
    /// Failed the manager's health check on release.
    Unhealthy,
    /// The pool is closed.
    Closed,
}

impl DestroyReason {
    fn as_str(self) -> &'static str {
        match self {
            Self::Expired => "expired",
            Self::Excess => "excess",
            Self::Unhealthy => "unhealthy",
            Self::Closed => "closed",
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    created: u64,
    destroyed: u64,
    reaped: u64,
    acquisitions: u64,
    releases: u64,
    timeouts: u64,
    create_failures: u64,
}

/// Everything guarded by the pool lock.
struct State<T> {
    /// Live resources: idle plus checked out plus creations in flight.
    active: usize,
    creating: usize,
    /// Most recently released first.
    idle: VecDeque<Entry<T>>,
    closed: bool,
    waiters: WaitQueue,
    next_resource_id: u64,
    counters: Counters,
}

impl<T> State<T> {
    fn new(max_idle: usize) -> Self {
        Self {
            active: 0,
            creating: 0,
            idle: VecDeque::with_capacity(max_idle),
            closed: false,
            waiters: WaitQueue::default(),
            next_resource_id: 0,
            counters: Counters::default(),
        }
    }

    /// Account for `n` resources that are about to be destroyed.
    fn retire(&mut self, n: usize) {
        debug_assert!(n <= self.active, "retiring more resources than are live");
        self.active -= n;
        self.counters.destroyed += n as u64;
    }

    /// Pull every expired entry out of the idle set, keeping MRU order.
    fn take_expired(&mut self, config: &PoolConfig, now: Instant) -> VecDeque<Entry<T>> {
        if self.idle.is_empty() {
            return VecDeque::new();
        }
        let (expired, kept): (VecDeque<_>, VecDeque<_>) = std::mem::take(&mut self.idle)
            .into_iter()
            .partition(|entry| config.is_expired(entry.idle_for(now), entry.age(now)));
        self.idle = kept;
        expired
    }

    fn check_invariants(&self, config: &PoolConfig) {
        debug_assert!(self.active <= config.max_active);
        debug_assert!(self.idle.len() <= self.active.min(config.max_idle));
        debug_assert_eq!(
            self.counters.created + self.creating as u64,
            self.counters.destroyed + self.active as u64,
        );
    }
}

/// Outcome of one locked pass over the pool state.
enum Checkout<T> {
    /// Reuse an idle resource.
    Ready(Entry<T>),
    /// A capacity slot was reserved; call the factory.
    Create,
    /// At capacity; wait for a signal.
    Wait(Waiter),
    /// At capacity and the caller does not wait.
    Exhausted,
}

/// Shared state behind every [`Pool`] clone and checked-out handle.
pub(crate) struct Shared<M: Manager> {
    manager: M,
    config: PoolConfig,
    state: Mutex<State<M::Resource>>,
    sink: Arc<dyn ErrorSink>,
    runtime: Option<Handle>,
    reaper: Mutex<Option<JoinHandle<()>>>,
    shutdown: CancellationToken,
}

impl<M: Manager> Shared<M> {
    /// One locked decision: reuse, reserve a creation slot, or wait.
    fn checkout(self: &Arc<Self>, wait: bool) -> Result<Checkout<M::Resource>> {
        let now = Instant::now();
        let (step, expired) = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(Error::Closed);
            }

            let expired = state.take_expired(&self.config, now);
            state.retire(expired.len());

            let step = if let Some(entry) = state.idle.pop_front() {
                state.counters.acquisitions += 1;
                Checkout::Ready(entry)
            } else if state.active < self.config.max_active {
                state.active += 1;
                state.creating += 1;
                Checkout::Create
            } else if wait {
                Checkout::Wait(state.waiters.register())
            } else {
                Checkout::Exhausted
            };

            // Evicting expired entries freed slots; the one we just reserved
            // is ours, the rest belong to whoever is waiting.
            let reserved = usize::from(matches!(step, Checkout::Create));
            state
                .waiters
                .notify(expired.len().saturating_sub(reserved));
            state.check_invariants(&self.config);
            (step, expired)
        };

        if !expired.is_empty() {
            tracing::trace!(count = expired.len(), "Evicting expired idle resources on acquire");
            self.destroy_detached(expired.into(), DestroyReason::Expired);
        }
        Ok(step)
    }

    /// Take a released resource back. Returns it if it must be destroyed.
    fn admit(&self, mut entry: Entry<M::Resource>) -> Option<(Entry<M::Resource>, DestroyReason)> {
        let healthy = self.manager.is_healthy(&entry.resource);
        let now = Instant::now();

        let mut state = self.state.lock();
        state.counters.releases += 1;
        if state.closed {
            state.retire(1);
            return Some((entry, DestroyReason::Closed));
        }

        entry.last_used_at = now;
        let reason = if !healthy {
            Some(DestroyReason::Unhealthy)
        } else if self.config.is_past_lifetime(entry.age(now)) {
            Some(DestroyReason::Expired)
        } else if state.idle.len() >= self.config.max_idle {
            Some(DestroyReason::Excess)
        } else {
            None
        };

        let doomed = match reason {
            None => {
                tracing::trace!(resource_id = entry.id, "Resource returned to idle set");
                state.idle.push_front(entry);
                None
            }
            Some(reason) => {
                state.retire(1);
                Some((entry, reason))
            }
        };
        // Either an idle resource or a free slot appeared.
        state.waiters.notify_one();
        state.check_invariants(&self.config);
        doomed
    }

    pub(crate) async fn release(self: &Arc<Self>, entry: Entry<M::Resource>) {
        if let Some((entry, reason)) = self.admit(entry) {
            self.destroy_retired(vec![entry], reason).await;
        }
    }

    pub(crate) fn release_detached(self: &Arc<Self>, entry: Entry<M::Resource>) {
        if let Some((entry, reason)) = self.admit(entry) {
            self.destroy_detached(vec![entry], reason);
        }
    }

    async fn destroy(&self, entry: Entry<M::Resource>, reason: DestroyReason) {
        let resource_id = entry.id;
        tracing::debug!(resource_id, reason = reason.as_str(), "Destroying pooled resource");
        if let Err(e) = self.manager.destroy(entry.resource).await {
            self.sink.report(&Error::destroy(resource_id, e));
        }
    }

    /// Run the destructors for `entries` on a task of their own.
    ///
    /// Hands the entries back if there is no runtime to spawn on.
    fn spawn_teardown(
        self: &Arc<Self>,
        entries: Vec<Entry<M::Resource>>,
        reason: DestroyReason,
    ) -> std::result::Result<JoinHandle<()>, Vec<Entry<M::Resource>>> {
        let Some(runtime) = self.runtime.clone().or_else(|| Handle::try_current().ok()) else {
            return Err(entries);
        };
        let shared = Arc::clone(self);
        Ok(runtime.spawn(async move {
            for entry in entries {
                shared.destroy(entry, reason).await;
            }
        }))
    }

    /// Destroy entries already retired from the accounting, awaiting the
    /// teardown.
    ///
    /// The destructors run on a spawned task, so dropping the caller's
    /// future part way through still destroys every entry.
    async fn destroy_retired(self: &Arc<Self>, entries: Vec<Entry<M::Resource>>, reason: DestroyReason) {
        if entries.is_empty() {
            return;
        }
        match self.spawn_teardown(entries, reason) {
            Ok(task) => {
                if let Err(e) = task.await
                    && e.is_panic()
                {
                    tracing::error!(error = %e, reason = reason.as_str(), "Teardown task panicked");
                }
            }
            Err(entries) => {
                for entry in entries {
                    self.destroy(entry, reason).await;
                }
            }
        }
    }

    /// Destroy off the caller's path, on the pool's runtime.
    fn destroy_detached(self: &Arc<Self>, entries: Vec<Entry<M::Resource>>, reason: DestroyReason) {
        if let Err(entries) = self.spawn_teardown(entries, reason) {
            tracing::warn!(
                count = entries.len(),
                reason = reason.as_str(),
                "No Tokio runtime to run destructors on; dropping resources"
            );
        }
    }

    /// Evict every expired idle resource. Returns how many were destroyed.
    pub(crate) async fn reap(self: &Arc<Self>) -> usize {
        let now = Instant::now();
        let expired = {
            let mut state = self.state.lock();
            if state.closed {
                return 0;
            }
            let expired = state.take_expired(&self.config, now);
            let n = expired.len();
            state.retire(n);
            state.counters.reaped += n as u64;
            state.waiters.notify(n);
            state.check_invariants(&self.config);
            expired
        };

        let n = expired.len();
        self.destroy_retired(expired.into(), DestroyReason::Expired).await;
        if n > 0 {
            tracing::debug!(reaped = n, "Reaped expired idle resources");
        }
        n
    }

    fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        PoolStats {
            active: state.active,
            creating: state.creating,
            idle: state.idle.len(),
            waiters: state.waiters.len(),
            max_active: self.config.max_active,
            created: state.counters.created,
            destroyed: state.counters.destroyed,
            reaped: state.counters.reaped,
            acquisitions: state.counters.acquisitions,
            releases: state.counters.releases,
            timeouts: state.counters.timeouts,
            create_failures: state.counters.create_failures,
            closed: state.closed,
        }
    }
}

impl<M: Manager> Drop for Shared<M> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// A reserved `active` slot for an in-flight factory call.
///
/// Dropping it unused (the acquire was cancelled or timed out mid-create)
/// gives the slot back and wakes one waiter.
struct CreateSlot<'a, M: Manager> {
    shared: &'a Shared<M>,
    armed: bool,
}

impl<M: Manager> CreateSlot<'_, M> {
    fn give_back(&mut self, failed: bool) {
        if !self.armed {
            return;
        }
        self.armed = false;
        let mut state = self.shared.state.lock();
        state.active -= 1;
        state.creating -= 1;
        if failed {
            state.counters.create_failures += 1;
        }
        state.waiters.notify_one();
    }
}

impl<M: Manager> Drop for CreateSlot<'_, M> {
    fn drop(&mut self) {
        self.give_back(false);
    }
}

/// A queued waiter. Dropped before it used its signal, it either leaves
/// the queue or, if it was already signalled, forwards the signal.
struct WaitSlot<'a, M: Manager> {
    shared: &'a Shared<M>,
    id: u64,
    pending: bool,
}

impl<M: Manager> Drop for WaitSlot<'_, M> {
    fn drop(&mut self) {
        if !self.pending {
            return;
        }
        let mut state = self.shared.state.lock();
        if !state.waiters.deregister(self.id) {
            state.waiters.notify_one();
        }
    }
}

async fn deadline_elapsed(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

// ---------------------------------------------------------------------------
// Pool<M>
// ---------------------------------------------------------------------------

/// Generic resource pool.
///
/// Manages up to `max_active` resources produced by a [`Manager`], keeps up
/// to `max_idle` of them for reuse (most recently released first), and
/// destroys those that sit idle longer than `max_idle_time`.
///
/// Waiters are woken in FIFO order, but a caller arriving between a wake-up
/// and the woken waiter re-checking may take the resource first; acquisition
/// order is therefore not guaranteed.
pub struct Pool<M: Manager> {
    shared: Arc<Shared<M>>,
}

impl<M: Manager> Clone for Pool<M> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<M: Manager> std::fmt::Debug for Pool<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("config", &self.shared.config)
            .field("stats", &self.shared.stats())
            .finish()
    }
}

impl<M: Manager> Pool<M> {
    /// Create a pool that logs teardown errors through `tracing`.
    ///
    /// # Errors
    /// Returns error if `config` is invalid, or if it asks for reaping and
    /// no Tokio runtime is running.
    pub fn new(manager: M, config: PoolConfig) -> Result<Self> {
        Self::with_sink(manager, config, LogSink)
    }

    /// Create a pool that reports teardown errors to `sink`.
    pub fn with_sink(manager: M, config: PoolConfig, sink: impl ErrorSink) -> Result<Self> {
        config.validate()?;
        let runtime = Handle::try_current().ok();
        let reap_interval = config.effective_reap_interval();
        if reap_interval.is_some() && runtime.is_none() {
            return Err(Error::configuration(
                "idle reaping requires a running Tokio runtime",
            ));
        }

        let shared = Arc::new(Shared {
            manager,
            state: Mutex::new(State::new(config.max_idle)),
            config,
            sink: Arc::new(sink),
            runtime,
            reaper: Mutex::new(None),
            shutdown: CancellationToken::new(),
        });

        if let (Some(interval), Some(runtime)) = (reap_interval, &shared.runtime) {
            let task = runtime.spawn(reaper::run(
                Arc::downgrade(&shared),
                interval,
                shared.shutdown.clone(),
            ));
            *shared.reaper.lock() = Some(task);
        }

        Ok(Self { shared })
    }

    /// Acquire a resource, waiting while the pool is at capacity.
    ///
    /// Reuses the most recently released idle resource if there is one,
    /// otherwise creates a new one if capacity allows, otherwise waits until
    /// a release, a reap or `close` frees something up, or until `ctx` is
    /// cancelled or its deadline (or the pool's `acquire_timeout`) passes.
    pub async fn acquire(&self, ctx: &Context) -> Result<Pooled<M>> {
        let started = Instant::now();
        let deadline = ctx.deadline().or_else(|| {
            self.shared
                .config
                .acquire_timeout
                .map(|timeout| started + timeout)
        });

        let result = self.acquire_until(ctx, deadline, started).await;
        if matches!(result, Err(Error::Timeout { .. })) {
            self.shared.state.lock().counters.timeouts += 1;
        }
        result
    }

    /// Acquire without waiting.
    ///
    /// Fails with [`Error::Exhausted`] instead of queueing when the pool is
    /// at capacity. May still call the factory.
    pub async fn try_acquire(&self) -> Result<Pooled<M>> {
        match self.shared.checkout(false)? {
            Checkout::Ready(entry) => Ok(Pooled::new(entry, Arc::clone(&self.shared))),
            Checkout::Create => self.create(&Context::new(), None, Instant::now()).await,
            Checkout::Exhausted => Err(Error::Exhausted {
                max_active: self.shared.config.max_active,
            }),
            Checkout::Wait(_) => unreachable!("non-waiting checkout never queues"),
        }
    }

    async fn acquire_until(
        &self,
        ctx: &Context,
        deadline: Option<Instant>,
        started: Instant,
    ) -> Result<Pooled<M>> {
        loop {
            let waiter = match self.shared.checkout(true)? {
                Checkout::Ready(entry) => {
                    tracing::trace!(resource_id = entry.id, "Reusing idle resource");
                    return Ok(Pooled::new(entry, Arc::clone(&self.shared)));
                }
                Checkout::Create => return self.create(ctx, deadline, started).await,
                Checkout::Wait(waiter) => waiter,
                Checkout::Exhausted => unreachable!("waiting checkout never reports exhaustion"),
            };
            self.wait(waiter, ctx, deadline, started).await?;
        }
    }

    /// Call the factory for an already-reserved slot.
    async fn create(
        &self,
        ctx: &Context,
        deadline: Option<Instant>,
        started: Instant,
    ) -> Result<Pooled<M>> {
        let shared = &*self.shared;
        let mut slot = CreateSlot {
            shared,
            armed: true,
        };

        let created = tokio::select! {
            biased;
            () = ctx.cancellation().cancelled() => return Err(Error::Cancelled),
            () = deadline_elapsed(deadline) => {
                return Err(Error::Timeout { waited: started.elapsed() });
            }
            created = shared.manager.create() => created,
        };

        let resource = match created {
            Ok(resource) => resource,
            Err(e) => {
                slot.give_back(true);
                tracing::debug!(error = %e, "Resource factory failed");
                return Err(Error::create(e));
            }
        };
        slot.armed = false;

        let (entry, closed) = {
            let mut state = shared.state.lock();
            let id = state.next_resource_id;
            state.next_resource_id += 1;
            state.creating -= 1;
            state.counters.created += 1;
            if state.closed {
                state.retire(1);
            } else {
                state.counters.acquisitions += 1;
            }
            (Entry::new(id, resource), state.closed)
        };

        if closed {
            self.shared
                .destroy_retired(vec![entry], DestroyReason::Closed)
                .await;
            return Err(Error::Closed);
        }
        tracing::debug!(resource_id = entry.id, "Created pooled resource");
        Ok(Pooled::new(entry, Arc::clone(&self.shared)))
    }

    /// Block until signalled, cancelled or past the deadline.
    async fn wait(
        &self,
        waiter: Waiter,
        ctx: &Context,
        deadline: Option<Instant>,
        started: Instant,
    ) -> Result<()> {
        let Waiter { id, rx } = waiter;
        let mut slot = WaitSlot {
            shared: &*self.shared,
            id,
            pending: true,
        };
        tracing::trace!(waiter = id, "Pool at capacity, waiting");

        let outcome = tokio::select! {
            biased;
            _ = rx => Ok(()),
            () = ctx.cancellation().cancelled() => Err(Error::Cancelled),
            () = deadline_elapsed(deadline) => Err(Error::Timeout { waited: started.elapsed() }),
        };
        if outcome.is_ok() {
            slot.pending = false;
        }
        outcome
    }

    /// Return a resource to the pool, awaiting any destruction it triggers.
    ///
    /// The handle must come from this pool; passing a foreign handle is a
    /// bug (caught by a debug assertion, otherwise routed to its own pool).
    pub async fn release(&self, handle: Pooled<M>) {
        debug_assert!(
            handle.belongs_to(&self.shared),
            "released a handle into a pool it did not come from"
        );
        handle.release().await;
    }

    /// Close the pool.
    ///
    /// Fails every current and future acquire with [`Error::Closed`],
    /// destroys the idle set and stops the reaper. Resources still checked
    /// out are destroyed when they are released. Calling `close` again is a
    /// no-op.
    pub async fn close(&self) -> Result<()> {
        let shared = &*self.shared;
        let (drained, woken) = {
            let mut state = shared.state.lock();
            if state.closed {
                return Ok(());
            }
            state.closed = true;
            let drained: Vec<_> = state.idle.drain(..).collect();
            state.retire(drained.len());
            let woken = state.waiters.notify_all();
            (drained, woken)
        };
        shared.shutdown.cancel();
        tracing::info!(idle = drained.len(), woken, "Closing pool");

        self.shared
            .destroy_retired(drained, DestroyReason::Closed)
            .await;

        let reaper = shared.reaper.lock().take();
        if let Some(task) = reaper
            && let Err(e) = task.await
            && e.is_panic()
        {
            tracing::error!(error = %e, "Reaper task panicked");
        }
        Ok(())
    }

    /// Run one reaper pass now. Returns how many resources were destroyed.
    pub async fn reap(&self) -> usize {
        self.shared.reap().await
    }

    /// Get current pool statistics.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.shared.stats()
    }

    /// The pool's configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    /// Whether `close` has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }
}
