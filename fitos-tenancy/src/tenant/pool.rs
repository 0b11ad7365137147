//! Coalescing provisioning cache shared by the schema factory and the
//! dedicated pool manager.
//!
//! Each key owns at most one slot. A slot is either *provisioning*, with a
//! shared future every concurrent requester awaits, or *ready*, holding the
//! handle and a usage tracker. The check-and-mark step runs under one
//! `parking_lot::Mutex`, so two concurrent misses can never both start a
//! creation for the same key.
//!
//! Provisioning runs on a spawned task. A caller that gives up does not
//! cancel it; the task finalises the slot itself, either publishing the
//! handle or removing the slot on failure so the next request retries from
//! scratch.
//!
//! Handles are handed out as [`Lease`]s. Eviction first flips the entry to
//! `Evicting` (no more leases), removes it from the map, then waits for
//! outstanding leases to drop before the handle is closed.
//!
//! | Event | Slot transition |
//! |-------|-----------------|
//! | miss | none → provisioning |
//! | create ok | provisioning → ready |
//! | create failed / timed out | provisioning → none |
//! | idle sweep, forced evict, capacity | ready → evicting → closed |

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::{TenancyError, TenancyResult};

use super::config::ProvisionConfig;

/// How often a caller retries when its handle is evicted between becoming
/// ready and being leased.
const MAX_ATTEMPTS: usize = 3;

/// Closes a handle once its last lease is gone.
pub type CloseFn<H> = Arc<dyn Fn(H) -> BoxFuture<'static, ()> + Send + Sync>;

/// State of a cached entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// Creation is in flight.
    Provisioning,
    /// Handle is available for leasing.
    Ready,
    /// No new leases; waiting for outstanding ones to drain.
    Evicting,
    /// Handle has been closed.
    Closed,
}

#[derive(Debug)]
struct UsageState {
    state: EntryState,
    in_use: usize,
    last_used: Instant,
    acquisitions: u64,
}

/// Lease accounting for one ready entry.
#[derive(Debug)]
struct Usage {
    state: Mutex<UsageState>,
    drained: Notify,
}

impl Usage {
    fn new() -> Self {
        Self {
            state: Mutex::new(UsageState {
                state: EntryState::Ready,
                in_use: 0,
                last_used: Instant::now(),
                acquisitions: 0,
            }),
            drained: Notify::new(),
        }
    }

    fn try_acquire(&self) -> bool {
        let mut usage = self.state.lock();
        if usage.state != EntryState::Ready {
            return false;
        }
        usage.in_use += 1;
        usage.acquisitions += 1;
        usage.last_used = Instant::now();
        true
    }

    fn retain(&self) {
        self.state.lock().in_use += 1;
    }

    fn release(&self) {
        let mut usage = self.state.lock();
        usage.in_use = usage.in_use.saturating_sub(1);
        usage.last_used = Instant::now();
        if usage.in_use == 0 {
            drop(usage);
            self.drained.notify_waiters();
        }
    }

    /// Flip to `Evicting` if nobody has used the entry for `idle`.
    fn begin_evict_if_idle(&self, now: Instant, idle: Duration) -> bool {
        let mut usage = self.state.lock();
        if usage.state == EntryState::Ready
            && usage.in_use == 0
            && now.saturating_duration_since(usage.last_used) >= idle
        {
            usage.state = EntryState::Evicting;
            true
        } else {
            false
        }
    }

    fn begin_evict(&self) {
        let mut usage = self.state.lock();
        if usage.state == EntryState::Ready {
            usage.state = EntryState::Evicting;
        }
    }

    fn idle_since(&self) -> Option<Instant> {
        let usage = self.state.lock();
        (usage.state == EntryState::Ready && usage.in_use == 0).then_some(usage.last_used)
    }

    async fn drain(&self) {
        loop {
            let notified = self.drained.notified();
            if self.state.lock().in_use == 0 {
                return;
            }
            notified.await;
        }
    }

    fn mark_closed(&self) {
        self.state.lock().state = EntryState::Closed;
    }

    fn snapshot(&self) -> (EntryState, usize, u64) {
        let usage = self.state.lock();
        (usage.state, usage.in_use, usage.acquisitions)
    }
}

/// A ready handle together with its lease accounting.
#[derive(Debug)]
struct ReadyEntry<H> {
    label: String,
    handle: H,
    usage: Arc<Usage>,
}

impl<H: Clone> ReadyEntry<H> {
    fn lease(&self) -> Option<(H, Lease)> {
        self.usage.try_acquire().then(|| {
            (
                self.handle.clone(),
                Lease {
                    usage: Arc::clone(&self.usage),
                },
            )
        })
    }
}

/// Marks a cached handle as in use.
///
/// Eviction waits until every lease (and every clone of it) is dropped
/// before closing the handle.
#[derive(Debug)]
pub struct Lease {
    usage: Arc<Usage>,
}

impl Lease {
    /// Number of leases currently held on the same entry.
    pub fn in_use(&self) -> usize {
        self.usage.snapshot().1
    }
}

impl Clone for Lease {
    fn clone(&self) -> Self {
        self.usage.retain();
        Self {
            usage: Arc::clone(&self.usage),
        }
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.usage.release();
    }
}

/// Background close of an evicted handle.
#[derive(Debug)]
pub struct Retirement {
    label: String,
    task: JoinHandle<()>,
}

impl Retirement {
    /// Wait until the handle has been drained and closed.
    pub async fn wait(self) {
        if let Err(e) = self.task.await {
            warn!(key = %self.label, error = %e, "Handle close task failed");
        }
    }
}

/// Wait for a batch of retirements.
pub async fn wait_all(retirements: Vec<Retirement>) -> usize {
    let count = retirements.len();
    for retirement in retirements {
        retirement.wait().await;
    }
    count
}

type SharedProvision<H> = Shared<BoxFuture<'static, TenancyResult<Arc<ReadyEntry<H>>>>>;

enum Slot<H> {
    Provisioning {
        generation: u64,
        future: SharedProvision<H>,
    },
    Ready(Arc<ReadyEntry<H>>),
}

/// Counters for one provisioning cache.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvisionStats {
    /// Handles successfully created.
    pub provisioned: u64,
    /// Creations that failed, including timeouts.
    pub failures: u64,
    /// Creations that hit the deadline.
    pub timeouts: u64,
    /// Leases served from a ready entry.
    pub hits: u64,
    /// Requests that joined a creation already in flight.
    pub coalesced: u64,
    /// Entries evicted for any reason.
    pub evictions: u64,
    /// Requests rejected because every slot was busy.
    pub capacity_rejections: u64,
    /// Ready entries.
    pub open: usize,
    /// Creations in flight.
    pub in_flight: usize,
}

#[derive(Debug, Default)]
struct AtomicProvisionStats {
    provisioned: AtomicU64,
    failures: AtomicU64,
    timeouts: AtomicU64,
    hits: AtomicU64,
    coalesced: AtomicU64,
    evictions: AtomicU64,
    capacity_rejections: AtomicU64,
}

impl AtomicProvisionStats {
    #[inline]
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self, open: usize, in_flight: usize) -> ProvisionStats {
        ProvisionStats {
            provisioned: self.provisioned.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            capacity_rejections: self.capacity_rejections.load(Ordering::Relaxed),
            open,
            in_flight,
        }
    }
}

struct Inner<K, H> {
    kind: &'static str,
    config: ProvisionConfig,
    slots: Mutex<HashMap<K, Slot<H>>>,
    generation: AtomicU64,
    closed: AtomicBool,
    closer: CloseFn<H>,
    stats: AtomicProvisionStats,
}

/// Keyed cache of handles with single-flight creation.
pub struct ProvisioningCache<K, H> {
    inner: Arc<Inner<K, H>>,
}

impl<K, H> Clone for ProvisioningCache<K, H> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, H> fmt::Debug for ProvisioningCache<K, H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProvisioningCache")
            .field("kind", &self.inner.kind)
            .field("config", &self.inner.config)
            .field("slots", &self.inner.slots.lock().len())
            .finish()
    }
}

enum Step<H> {
    Leased(H, Lease),
    Wait(SharedProvision<H>),
}

impl<K, H> ProvisioningCache<K, H>
where
    K: Eq + Hash + Clone + fmt::Display + Send + Sync + 'static,
    H: Clone + Send + Sync + 'static,
{
    /// Create a cache. `kind` names the handles in logs and errors.
    pub fn new(kind: &'static str, config: ProvisionConfig, closer: CloseFn<H>) -> Self {
        Self {
            inner: Arc::new(Inner {
                kind,
                config,
                slots: Mutex::new(HashMap::new()),
                generation: AtomicU64::new(0),
                closed: AtomicBool::new(false),
                closer,
                stats: AtomicProvisionStats::default(),
            }),
        }
    }

    /// The limits this cache runs with.
    pub fn config(&self) -> &ProvisionConfig {
        &self.inner.config
    }

    /// Lease the handle for `key`, creating it with `create` on a miss.
    ///
    /// Concurrent callers for the same key share one call to `create` and
    /// all observe the same handle or the same error.
    pub async fn get_or_provision<F, Fut>(&self, key: &K, create: F) -> TenancyResult<(H, Lease)>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = TenancyResult<H>> + Send + 'static,
    {
        for _ in 0..MAX_ATTEMPTS {
            if self.inner.closed.load(Ordering::Acquire) {
                return Err(TenancyError::handle_closed(key));
            }

            let (step, victim) = self.begin(key, &create)?;
            if let Some(victim) = victim {
                // Capacity eviction; the caller does not wait for the close.
                drop(self.inner.retire(victim));
            }

            let entry = match step {
                Step::Leased(handle, lease) => return Ok((handle, lease)),
                Step::Wait(future) => future.await?,
            };
            if let Some(leased) = entry.lease() {
                return Ok(leased);
            }
            debug!(key = %key, kind = self.inner.kind, "Handle evicted before lease, retrying");
        }
        Err(TenancyError::handle_closed(key))
    }

    fn begin<F, Fut>(
        &self,
        key: &K,
        create: &F,
    ) -> TenancyResult<(Step<H>, Option<Arc<ReadyEntry<H>>>)>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = TenancyResult<H>> + Send + 'static,
    {
        let inner = &self.inner;
        let mut slots = inner.slots.lock();

        match slots.get(key) {
            Some(Slot::Ready(entry)) => {
                if let Some((handle, lease)) = entry.lease() {
                    AtomicProvisionStats::bump(&inner.stats.hits);
                    return Ok((Step::Leased(handle, lease), None));
                }
                // Ready slots are removed before they stop leasing; treat as a miss.
                slots.remove(key);
            }
            Some(Slot::Provisioning { future, .. }) => {
                AtomicProvisionStats::bump(&inner.stats.coalesced);
                return Ok((Step::Wait(future.clone()), None));
            }
            None => {}
        }

        let mut victim = None;
        if slots.len() >= inner.config.max_entries {
            match inner.take_lru_idle(&mut slots) {
                Some(entry) => victim = Some(entry),
                None => {
                    AtomicProvisionStats::bump(&inner.stats.capacity_rejections);
                    warn!(
                        key = %key,
                        kind = inner.kind,
                        max_entries = inner.config.max_entries,
                        "Every slot is busy, rejecting request"
                    );
                    return Err(TenancyError::capacity_exceeded(
                        inner.kind,
                        inner.config.max_entries,
                    ));
                }
            }
        }

        let generation = inner.generation.fetch_add(1, Ordering::Relaxed);
        let future = Inner::spawn_provision(Arc::clone(inner), key.clone(), generation, create());
        slots.insert(
            key.clone(),
            Slot::Provisioning {
                generation,
                future: future.clone(),
            },
        );
        debug!(key = %key, kind = inner.kind, generation, "Provisioning handle");
        Ok((Step::Wait(future), victim))
    }

    /// Force out the entry for `key`.
    ///
    /// A ready handle is closed once its leases drain. A creation in flight
    /// is detached: its waiters get [`HandleClosed`](crate::ErrorCode::HandleClosed)
    /// and the handle is closed when it arrives.
    pub fn evict(&self, key: &K) -> Option<Retirement> {
        let removed = self.inner.slots.lock().remove(key)?;
        match removed {
            Slot::Ready(entry) => {
                entry.usage.begin_evict();
                info!(key = %key, kind = self.inner.kind, "Evicting handle");
                Some(self.inner.retire(entry))
            }
            Slot::Provisioning { .. } => {
                info!(key = %key, kind = self.inner.kind, "Detached in-flight provisioning");
                None
            }
        }
    }

    /// Evict every ready entry unused for longer than the idle timeout.
    pub fn sweep_idle(&self) -> Vec<Retirement> {
        self.sweep_idle_at(Instant::now())
    }

    fn sweep_idle_at(&self, now: Instant) -> Vec<Retirement> {
        let idle = self.inner.config.idle_timeout;
        let victims: Vec<_> = {
            let mut slots = self.inner.slots.lock();
            let keys: Vec<K> = slots
                .iter()
                .filter_map(|(key, slot)| match slot {
                    Slot::Ready(entry) if entry.usage.begin_evict_if_idle(now, idle) => {
                        Some(key.clone())
                    }
                    _ => None,
                })
                .collect();
            keys.into_iter()
                .filter_map(|key| match slots.remove(&key) {
                    Some(Slot::Ready(entry)) => Some(entry),
                    _ => None,
                })
                .collect()
        };

        victims
            .into_iter()
            .map(|entry| {
                info!(
                    key = %entry.label,
                    kind = self.inner.kind,
                    idle_ms = idle.as_millis() as u64,
                    "Evicting idle handle"
                );
                self.inner.retire(entry)
            })
            .collect()
    }

    /// Close everything and refuse further requests.
    pub async fn shutdown(&self) -> usize {
        self.inner.closed.store(true, Ordering::Release);
        let drained: Vec<_> = self.inner.slots.lock().drain().map(|(_, slot)| slot).collect();
        let retirements = drained
            .into_iter()
            .filter_map(|slot| match slot {
                Slot::Ready(entry) => {
                    entry.usage.begin_evict();
                    Some(self.inner.retire(entry))
                }
                Slot::Provisioning { .. } => None,
            })
            .collect();
        let closed = wait_all(retirements).await;
        info!(kind = self.inner.kind, closed, "Provisioning cache shut down");
        closed
    }

    /// State of the entry for `key`, if any.
    pub fn state(&self, key: &K) -> Option<EntryState> {
        match self.inner.slots.lock().get(key)? {
            Slot::Provisioning { .. } => Some(EntryState::Provisioning),
            Slot::Ready(entry) => Some(entry.usage.snapshot().0),
        }
    }

    /// Number of slots, ready or provisioning.
    pub fn len(&self) -> usize {
        self.inner.slots.lock().len()
    }

    /// Check if the cache holds nothing.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Counters snapshot.
    pub fn stats(&self) -> ProvisionStats {
        let (open, in_flight) = {
            let slots = self.inner.slots.lock();
            let in_flight = slots
                .values()
                .filter(|s| matches!(s, Slot::Provisioning { .. }))
                .count();
            (slots.len() - in_flight, in_flight)
        };
        self.inner.stats.snapshot(open, in_flight)
    }
}

impl<K, H> Inner<K, H>
where
    K: Eq + Hash + Clone + fmt::Display + Send + Sync + 'static,
    H: Clone + Send + Sync + 'static,
{
    fn spawn_provision<Fut>(
        inner: Arc<Self>,
        key: K,
        generation: u64,
        create: Fut,
    ) -> SharedProvision<H>
    where
        Fut: Future<Output = TenancyResult<H>> + Send + 'static,
    {
        let timeout = inner.config.provision_timeout;
        let task_inner = Arc::clone(&inner);
        let task_key = key.clone();
        let task = tokio::spawn(async move {
            let outcome = match tokio::time::timeout(timeout, create).await {
                Ok(result) => result,
                Err(_) => {
                    AtomicProvisionStats::bump(&task_inner.stats.timeouts);
                    Err(TenancyError::provisioning_timeout(&task_key, timeout))
                }
            };
            task_inner.finish(task_key, generation, outcome)
        });

        async move {
            match task.await {
                Ok(result) => result,
                Err(e) => {
                    inner.abandon(&key, generation);
                    error!(key = %key, kind = inner.kind, error = %e, "Provisioning task aborted");
                    Err(TenancyError::internal(format!("provisioning '{}' aborted", key)))
                }
            }
        }
        .boxed()
        .shared()
    }

    fn finish(
        &self,
        key: K,
        generation: u64,
        outcome: TenancyResult<H>,
    ) -> TenancyResult<Arc<ReadyEntry<H>>> {
        let mut slots = self.slots.lock();
        let current = matches!(
            slots.get(&key),
            Some(Slot::Provisioning { generation: g, .. }) if *g == generation
        );

        match outcome {
            Ok(handle) if current => {
                let entry = Arc::new(ReadyEntry {
                    label: key.to_string(),
                    handle,
                    usage: Arc::new(Usage::new()),
                });
                slots.insert(key.clone(), Slot::Ready(Arc::clone(&entry)));
                drop(slots);
                AtomicProvisionStats::bump(&self.stats.provisioned);
                info!(key = %key, kind = self.kind, "Handle ready");
                Ok(entry)
            }
            Ok(handle) => {
                drop(slots);
                debug!(key = %key, kind = self.kind, "Closing handle for detached provisioning");
                tokio::spawn((self.closer)(handle));
                Err(TenancyError::handle_closed(&key))
            }
            Err(err) => {
                if current {
                    slots.remove(&key);
                }
                drop(slots);
                AtomicProvisionStats::bump(&self.stats.failures);
                error!(
                    key = %key,
                    kind = self.kind,
                    code = %err.code,
                    error = %err,
                    "Provisioning failed"
                );
                Err(err)
            }
        }
    }

    fn abandon(&self, key: &K, generation: u64) {
        let mut slots = self.slots.lock();
        if matches!(
            slots.get(key),
            Some(Slot::Provisioning { generation: g, .. }) if *g == generation
        ) {
            slots.remove(key);
        }
    }

    /// Remove the least recently used idle ready entry, marking it evicting.
    fn take_lru_idle(&self, slots: &mut HashMap<K, Slot<H>>) -> Option<Arc<ReadyEntry<H>>> {
        loop {
            let key = slots
                .iter()
                .filter_map(|(key, slot)| match slot {
                    Slot::Ready(entry) => entry.usage.idle_since().map(|since| (key, since)),
                    Slot::Provisioning { .. } => None,
                })
                .min_by_key(|(_, since)| *since)
                .map(|(key, _)| key.clone())?;

            // A waiter may have leased it since we looked; pick again if so.
            let now = Instant::now();
            let claimed = matches!(
                slots.get(&key),
                Some(Slot::Ready(entry)) if entry.usage.begin_evict_if_idle(now, Duration::ZERO)
            );
            if claimed {
                if let Some(Slot::Ready(entry)) = slots.remove(&key) {
                    info!(
                        key = %key,
                        kind = self.kind,
                        "Evicting least recently used handle to make room"
                    );
                    return Some(entry);
                }
            }
        }
    }

    fn retire(&self, entry: Arc<ReadyEntry<H>>) -> Retirement {
        AtomicProvisionStats::bump(&self.stats.evictions);
        let closer = Arc::clone(&self.closer);
        let kind = self.kind;
        let label = entry.label.clone();
        let task = tokio::spawn(async move {
            entry.usage.drain().await;
            (closer)(entry.handle.clone()).await;
            entry.usage.mark_closed();
            debug!(key = %entry.label, kind, "Handle closed");
        });
        Retirement { label, task }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::AtomicUsize;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct FakeHandle(usize);

    struct Harness {
        cache: ProvisioningCache<String, FakeHandle>,
        created: Arc<AtomicUsize>,
        closed: Arc<Mutex<Vec<usize>>>,
    }

    fn harness(config: ProvisionConfig) -> Harness {
        let closed = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&closed);
        let closer: CloseFn<FakeHandle> = Arc::new(move |h: FakeHandle| {
            let sink = Arc::clone(&sink);
            async move { sink.lock().push(h.0) }.boxed()
        });
        Harness {
            cache: ProvisioningCache::new("test", config, closer),
            created: Arc::new(AtomicUsize::new(0)),
            closed,
        }
    }

    fn config(max_entries: usize) -> ProvisionConfig {
        ProvisionConfig::builder()
            .max_entries(max_entries)
            .idle_timeout(Duration::from_secs(60))
            .provision_timeout(Duration::from_secs(5))
            .build()
            .unwrap()
    }

    impl Harness {
        fn creator(
            &self,
            delay: Duration,
        ) -> impl Fn() -> BoxFuture<'static, TenancyResult<FakeHandle>> + use<> {
            let created = Arc::clone(&self.created);
            move || {
                let created = Arc::clone(&created);
                async move {
                    tokio::time::sleep(delay).await;
                    Ok(FakeHandle(created.fetch_add(1, Ordering::SeqCst) + 1))
                }
                .boxed()
            }
        }

        async fn get(&self, key: &str) -> TenancyResult<(FakeHandle, Lease)> {
            self.cache
                .get_or_provision(&key.to_string(), self.creator(Duration::ZERO))
                .await
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_misses_coalesce() {
        let h = Arc::new(harness(config(8)));
        let mut tasks = Vec::new();
        for _ in 0..20 {
            let h = Arc::clone(&h);
            tasks.push(tokio::spawn(async move {
                let key = "t4".to_string();
                let (handle, _lease) = h
                    .cache
                    .get_or_provision(&key, h.creator(Duration::from_millis(50)))
                    .await
                    .unwrap();
                handle
            }));
        }
        for task in tasks {
            assert_eq!(task.await.unwrap(), FakeHandle(1));
        }
        assert_eq!(h.created.load(Ordering::SeqCst), 1);
        assert_eq!(h.cache.stats().provisioned, 1);
    }

    #[tokio::test]
    async fn test_failure_leaves_no_entry() {
        let h = harness(config(8));
        let key = "t5".to_string();
        let err = h
            .cache
            .get_or_provision(&key, || async {
                Err::<FakeHandle, _>(TenancyError::provisioning("connection refused"))
            })
            .await
            .unwrap_err();
        assert!(err.is_provisioning());
        assert!(h.cache.is_empty());

        let (handle, _lease) = h.get("t5").await.unwrap();
        assert_eq!(handle, FakeHandle(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_clears_entry() {
        let h = harness(
            ProvisionConfig::builder()
                .provision_timeout(Duration::from_millis(100))
                .build()
                .unwrap(),
        );
        let key = "slow".to_string();
        let err = h
            .cache
            .get_or_provision(&key, h.creator(Duration::from_secs(10)))
            .await
            .unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::ProvisioningTimeout);
        assert!(h.cache.state(&key).is_none());
        assert_eq!(h.cache.stats().timeouts, 1);
    }

    #[tokio::test]
    async fn test_cancelled_caller_does_not_cancel_provisioning() {
        let h = harness(config(8));
        let key = "t6".to_string();
        let attempt = h
            .cache
            .get_or_provision(&key, h.creator(Duration::from_millis(50)));
        let timed_out = tokio::time::timeout(Duration::from_millis(5), attempt).await;
        assert!(timed_out.is_err());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(h.cache.state(&key), Some(EntryState::Ready));
        assert_eq!(h.created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_sweep_skips_leased_entries() {
        let h = harness(config(8));
        let (_busy, busy_lease) = h.get("busy").await.unwrap();
        let (_idle, idle_lease) = h.get("idle").await.unwrap();
        drop(idle_lease);

        tokio::time::advance(Duration::from_secs(61)).await;
        let retired = wait_all(h.cache.sweep_idle()).await;
        assert_eq!(retired, 1);
        assert_eq!(h.cache.state(&"busy".to_string()), Some(EntryState::Ready));
        assert!(h.cache.state(&"idle".to_string()).is_none());
        assert_eq!(*h.closed.lock(), vec![2]);
        drop(busy_lease);
    }

    #[tokio::test]
    async fn test_forced_evict_drains_leases() {
        let h = harness(config(8));
        let (handle, lease) = h.get("t7").await.unwrap();
        let second = lease.clone();
        assert_eq!(lease.in_use(), 2);

        let retirement = h.cache.evict(&"t7".to_string()).unwrap();
        tokio::task::yield_now().await;
        assert!(h.closed.lock().is_empty());

        drop(lease);
        drop(second);
        retirement.wait().await;
        assert_eq!(*h.closed.lock(), vec![handle.0]);

        let (fresh, _lease) = h.get("t7").await.unwrap();
        assert_eq!(fresh, FakeHandle(2));
    }

    #[tokio::test]
    async fn test_capacity_evicts_lru_idle() {
        let h = harness(config(2));
        let (_a, a) = h.get("a").await.unwrap();
        drop(a);
        let (_b, _b_lease) = h.get("b").await.unwrap();

        let (c, _c_lease) = h.get("c").await.unwrap();
        assert_eq!(c, FakeHandle(3));
        assert!(h.cache.state(&"a".to_string()).is_none());
        assert_eq!(h.cache.len(), 2);
    }

    #[tokio::test]
    async fn test_capacity_rejects_when_all_busy() {
        let h = harness(config(1));
        let (_a, _lease) = h.get("a").await.unwrap();

        let err = h.get("b").await.unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::CapacityExceeded);
        assert!(err.is_retryable());
        assert_eq!(h.cache.stats().capacity_rejections, 1);
    }

    #[tokio::test]
    async fn test_shutdown_closes_everything() {
        let h = harness(config(8));
        drop(h.get("a").await.unwrap());
        drop(h.get("b").await.unwrap());

        assert_eq!(h.cache.shutdown().await, 2);
        assert!(h.cache.is_empty());
        assert_eq!(h.closed.lock().len(), 2);
        assert!(h.get("a").await.is_err());
    }
}
