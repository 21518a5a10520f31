//! Resource Cache
//!
//! Owns every buffer and texture the overlay creates after initialization
//! and keeps their combined size under a memory ceiling.
//!
//! # Policy
//!
//! - Each entry carries a [`ResourceUsageRecord`]. [`mark_used`] refreshes
//!   its timestamp.
//! - When a creation pushes the total over the ceiling, unpinned entries
//!   are evicted oldest first until at least
//!   `total - ceiling + ceiling / 10` bytes have been reclaimed.
//! - [`release_unused`] drops unpinned entries idle for longer than a
//!   given age.
//! - Entries handed back with [`recycle`] stay allocated and are reused by
//!   later creations with a compatible description: textures must match
//!   exactly, buffers must be at least as large with the same usage and heap.
//!   A recycled entry becomes reusable only once the GPU passes the retire
//!   fence current at the time it was recycled.
//!
//! # Deferred destruction
//!
//! Evicted and released resources are not destroyed on the spot. They are
//! tagged with the fence value that will cover all work recorded so far
//! ([`set_retire_fence`]) and destroyed by [`collect_garbage`] once the GPU
//! has passed it.
//!
//! All bookkeeping sits behind one mutex. The lock is never held across a
//! device call.
//!
//! [`mark_used`]: ResourceCache::mark_used
//! [`release_unused`]: ResourceCache::release_unused
//! [`recycle`]: ResourceCache::recycle
//! [`set_retire_fence`]: ResourceCache::set_retire_fence
//! [`collect_garbage`]: ResourceCache::collect_garbage

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::errors::{GlazeError, Result};
use crate::hal::{
    BufferDesc, FenceValue, GpuDevice, GpuResource, RawResource, ResourceClass, ResourceDesc,
    ResourceState, TextureDesc,
};
use crate::renderer::state_tracker::ResourceStateTracker;
use crate::time::{Clock, SystemClock};

/// Per-resource accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceUsageRecord {
    pub last_used: Instant,
    pub size: u64,
    pub pinned: bool,
    pub class: ResourceClass,
}

/// Point-in-time snapshot of the cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub tracked: usize,
    pub idle: usize,
    pub pinned: usize,
    pub total_bytes: u64,
    pub bytes_by_class: [u64; ResourceClass::COUNT],
    pub pending_destruction: usize,
    pub counters: CacheCounters,
}

/// Lifetime counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheCounters {
    pub created: u64,
    pub reuse_hits: u64,
    pub evicted: u64,
    pub released: u64,
    pub destroyed: u64,
}

/// Outcome of a sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub resources: usize,
    pub bytes: u64,
}

struct CacheEntry {
    resource: GpuResource,
    record: ResourceUsageRecord,
    idle: bool,
    /// Fence the GPU must pass before an idle entry may be handed out again.
    reusable_after: FenceValue,
    /// Orders entries touched within the same clock tick.
    sequence: u64,
}

struct Retired {
    raw: RawResource,
    fence: FenceValue,
}

struct CacheInner {
    entries: FxHashMap<RawResource, CacheEntry>,
    usage_by_class: [u64; ResourceClass::COUNT],
    total: u64,
    ceiling: u64,
    retire_fence: FenceValue,
    retired: Vec<Retired>,
    next_sequence: u64,
    counters: CacheCounters,
}

impl CacheInner {
    fn bump_sequence(&mut self) -> u64 {
        self.next_sequence += 1;
        self.next_sequence
    }

    fn insert(&mut self, resource: GpuResource, now: Instant) {
        let size = resource.size();
        let class = resource.desc.class();
        let sequence = self.bump_sequence();
        self.entries.insert(
            resource.raw,
            CacheEntry {
                resource,
                record: ResourceUsageRecord {
                    last_used: now,
                    size,
                    pinned: false,
                    class,
                },
                idle: false,
                reusable_after: 0,
                sequence,
            },
        );
        self.usage_by_class[class.index()] += size;
        self.total += size;
        self.counters.created += 1;
    }

    /// Moves an entry to the retired list. Returns its size.
    fn retire(&mut self, raw: RawResource) -> u64 {
        let Some(entry) = self.entries.remove(&raw) else {
            return 0;
        };
        let size = entry.record.size;
        self.usage_by_class[entry.record.class.index()] -= size;
        self.total -= size;
        self.retired.push(Retired {
            raw,
            fence: self.retire_fence,
        });
        size
    }

    fn take_idle(
        &mut self,
        desc: &ResourceDesc,
        now: Instant,
        completed: FenceValue,
    ) -> Option<GpuResource> {
        let raw = self
            .entries
            .values()
            .filter(|e| {
                e.idle && e.reusable_after <= completed && is_compatible(&e.resource.desc, desc)
            })
            .min_by_key(|e| (e.record.size, e.sequence))
            .map(|e| e.resource.raw)?;
        let sequence = self.bump_sequence();
        let entry = self.entries.get_mut(&raw)?;
        entry.idle = false;
        entry.record.last_used = now;
        entry.sequence = sequence;
        let resource = entry.resource;
        self.counters.reuse_hits += 1;
        Some(resource)
    }

    fn trim(&mut self, exclude: Option<RawResource>) -> SweepReport {
        if self.total <= self.ceiling {
            return SweepReport::default();
        }
        let need = self.total - self.ceiling + self.ceiling / 10;

        let mut candidates: Vec<(Instant, u64, RawResource)> = self
            .entries
            .iter()
            .filter(|(raw, e)| !e.record.pinned && Some(**raw) != exclude)
            .map(|(raw, e)| (e.record.last_used, e.sequence, *raw))
            .collect();
        candidates.sort_unstable_by_key(|&(t, seq, _)| (t, seq));

        let mut report = SweepReport::default();
        for (_, _, raw) in candidates {
            if report.bytes >= need {
                break;
            }
            report.bytes += self.retire(raw);
            report.resources += 1;
        }
        self.counters.evicted += report.resources as u64;

        if report.bytes < need {
            log::warn!(
                "Resource cache still over budget after eviction: {} / {} bytes (pinned resources)",
                self.total,
                self.ceiling
            );
        }
        report
    }
}

fn is_compatible(cached: &ResourceDesc, wanted: &ResourceDesc) -> bool {
    match (cached, wanted) {
        (ResourceDesc::Texture(a), ResourceDesc::Texture(b)) => {
            a.width == b.width
                && a.height == b.height
                && a.format == b.format
                && a.usage == b.usage
                && a.heap == b.heap
        }
        (ResourceDesc::Buffer(a), ResourceDesc::Buffer(b)) => {
            a.size >= b.size && a.usage == b.usage && a.heap == b.heap
        }
        _ => false,
    }
}

pub struct ResourceCache {
    device: Arc<dyn GpuDevice>,
    tracker: Arc<ResourceStateTracker>,
    clock: Arc<dyn Clock>,
    inner: Mutex<CacheInner>,
}

impl ResourceCache {
    #[must_use]
    pub fn new(
        device: Arc<dyn GpuDevice>,
        tracker: Arc<ResourceStateTracker>,
        ceiling_bytes: u64,
    ) -> Self {
        Self::with_clock(device, tracker, Arc::new(SystemClock), ceiling_bytes)
    }

    #[must_use]
    pub fn with_clock(
        device: Arc<dyn GpuDevice>,
        tracker: Arc<ResourceStateTracker>,
        clock: Arc<dyn Clock>,
        ceiling_bytes: u64,
    ) -> Self {
        Self {
            device,
            tracker,
            clock,
            inner: Mutex::new(CacheInner {
                entries: FxHashMap::default(),
                usage_by_class: [0; ResourceClass::COUNT],
                total: 0,
                ceiling: ceiling_bytes,
                retire_fence: 0,
                retired: Vec::new(),
                next_sequence: 0,
                counters: CacheCounters::default(),
            }),
        }
    }

    // ========================================================================
    // Creation
    // ========================================================================

    pub fn create_texture(
        &self,
        desc: &TextureDesc,
        initial_state: ResourceState,
    ) -> Result<GpuResource> {
        self.create(ResourceDesc::Texture(*desc), initial_state)
    }

    pub fn create_buffer(
        &self,
        desc: &BufferDesc,
        initial_state: ResourceState,
    ) -> Result<GpuResource> {
        self.create(ResourceDesc::Buffer(*desc), initial_state)
    }

    /// Reuses an idle compatible resource or creates a new one.
    ///
    /// A reused resource keeps the state the tracker last recorded for it;
    /// `initial_state` only applies to fresh allocations.
    fn create(&self, desc: ResourceDesc, initial_state: ResourceState) -> Result<GpuResource> {
        let now = self.clock.now();
        let completed = self.device.completed_fence_value();
        if let Some(reused) = self.inner.lock().take_idle(&desc, now, completed) {
            log::trace!("Reusing cached '{}' {:?}", desc.label(), reused.raw);
            return Ok(reused);
        }

        self.check_budget(&desc)?;
        let raw = self.device.create_resource(&desc, initial_state)?;
        self.tracker.register(raw, initial_state);
        let resource = GpuResource { raw, desc };

        let mut inner = self.inner.lock();
        inner.insert(resource, now);
        if inner.total > inner.ceiling {
            let report = inner.trim(Some(raw));
            log::debug!(
                "Evicted {} resource(s), {} bytes, after creating '{}'",
                report.resources,
                report.bytes,
                desc.label()
            );
        }
        Ok(resource)
    }

    /// Fails when `desc` could not fit even if every unpinned entry were evicted.
    fn check_budget(&self, desc: &ResourceDesc) -> Result<()> {
        let inner = self.inner.lock();
        let requested = desc.byte_size();
        let pinned: u64 = inner
            .entries
            .values()
            .filter(|e| e.record.pinned)
            .map(|e| e.record.size)
            .sum();
        let limit = inner.ceiling + inner.ceiling / 10;
        if pinned + requested > limit {
            log::warn!(
                "Refusing '{}': {requested} bytes on top of {pinned} pinned exceeds {limit}",
                desc.label()
            );
            return Err(GlazeError::BudgetExceeded {
                requested,
                pinned,
                ceiling: inner.ceiling,
            });
        }
        Ok(())
    }

    // ========================================================================
    // Usage
    // ========================================================================

    /// Refreshes the usage timestamp. Returns `false` for unknown resources.
    pub fn mark_used(&self, raw: RawResource) -> bool {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        let sequence = inner.bump_sequence();
        match inner.entries.get_mut(&raw) {
            Some(entry) => {
                entry.record.last_used = now;
                entry.sequence = sequence;
                true
            }
            None => {
                log::debug!("mark_used: {raw:?} is not cached");
                false
            }
        }
    }

    /// Pinned resources are never evicted or released by age.
    pub fn pin(&self, raw: RawResource, pinned: bool) -> bool {
        match self.inner.lock().entries.get_mut(&raw) {
            Some(entry) => {
                entry.record.pinned = pinned;
                true
            }
            None => {
                log::warn!("pin: {raw:?} is not cached");
                false
            }
        }
    }

    #[must_use]
    pub fn is_pinned(&self, raw: RawResource) -> bool {
        self.inner
            .lock()
            .entries
            .get(&raw)
            .is_some_and(|e| e.record.pinned)
    }

    /// Hands a resource back for reuse without freeing its memory.
    ///
    /// The entry is not handed out again until the GPU has passed the
    /// current retire fence, since submitted work may still read it.
    pub fn recycle(&self, raw: RawResource) -> bool {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        let retire_fence = inner.retire_fence;
        match inner.entries.get_mut(&raw) {
            Some(entry) => {
                entry.idle = true;
                entry.reusable_after = retire_fence;
                entry.record.pinned = false;
                entry.record.last_used = now;
                true
            }
            None => false,
        }
    }

    /// Removes a resource from the cache and schedules its destruction.
    pub fn release(&self, raw: RawResource) -> bool {
        let mut inner = self.inner.lock();
        if !inner.entries.contains_key(&raw) {
            log::warn!("release: {raw:?} is not cached");
            return false;
        }
        inner.retire(raw);
        inner.counters.released += 1;
        true
    }

    // ========================================================================
    // Sweeps
    // ========================================================================

    /// Retires unpinned resources unused for longer than `max_age`.
    pub fn release_unused(&self, max_age: Duration) -> SweepReport {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        let stale: Vec<RawResource> = inner
            .entries
            .iter()
            .filter(|(_, e)| {
                !e.record.pinned && now.saturating_duration_since(e.record.last_used) > max_age
            })
            .map(|(raw, _)| *raw)
            .collect();

        let mut report = SweepReport::default();
        for raw in stale {
            report.bytes += inner.retire(raw);
            report.resources += 1;
        }
        inner.counters.released += report.resources as u64;
        if report.resources > 0 {
            log::debug!(
                "Released {} unused resource(s) ({} bytes) older than {max_age:?}",
                report.resources,
                report.bytes
            );
        }
        report
    }

    /// Evicts down to the ceiling if currently above it.
    pub fn trim(&self) -> SweepReport {
        self.inner.lock().trim(None)
    }

    pub fn set_ceiling(&self, bytes: u64) -> SweepReport {
        let mut inner = self.inner.lock();
        inner.ceiling = bytes;
        inner.trim(None)
    }

    /// Retires everything, pinned entries included.
    pub fn clear(&self) -> usize {
        let mut inner = self.inner.lock();
        let all: Vec<RawResource> = inner.entries.keys().copied().collect();
        for &raw in &all {
            inner.retire(raw);
        }
        all.len()
    }

    // ========================================================================
    // Deferred Destruction
    // ========================================================================

    /// Fence value covering all GPU work recorded so far.
    pub fn set_retire_fence(&self, fence: FenceValue) {
        self.inner.lock().retire_fence = fence;
    }

    /// Destroys retired resources whose fence the GPU has passed.
    pub fn collect_garbage(&self, completed: FenceValue) -> usize {
        let ready: Vec<RawResource> = {
            let mut inner = self.inner.lock();
            let (ready, pending): (Vec<_>, Vec<_>) = inner
                .retired
                .drain(..)
                .partition(|r| r.fence <= completed);
            inner.retired = pending;
            inner.counters.destroyed += ready.len() as u64;
            ready.into_iter().map(|r| r.raw).collect()
        };
        for &raw in &ready {
            self.tracker.unregister(raw);
            self.device.destroy_resource(raw);
        }
        ready.len()
    }

    // ========================================================================
    // Queries
    // ========================================================================

    #[must_use]
    pub fn total_memory_usage(&self) -> u64 {
        self.inner.lock().total
    }

    #[must_use]
    pub fn memory_usage(&self, class: ResourceClass) -> u64 {
        self.inner.lock().usage_by_class[class.index()]
    }

    #[must_use]
    pub fn ceiling(&self) -> u64 {
        self.inner.lock().ceiling
    }

    #[must_use]
    pub fn contains(&self, raw: RawResource) -> bool {
        self.inner.lock().entries.contains_key(&raw)
    }

    #[must_use]
    pub fn usage_record(&self, raw: RawResource) -> Option<ResourceUsageRecord> {
        self.inner.lock().entries.get(&raw).map(|e| e.record)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resources waiting for their fence before destruction.
    #[must_use]
    pub fn pending_destruction(&self) -> usize {
        self.inner.lock().retired.len()
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            tracked: inner.entries.len(),
            idle: inner.entries.values().filter(|e| e.idle).count(),
            pinned: inner.entries.values().filter(|e| e.record.pinned).count(),
            total_bytes: inner.total,
            bytes_by_class: inner.usage_by_class,
            pending_destruction: inner.retired.len(),
            counters: inner.counters,
        }
    }
}

impl Drop for ResourceCache {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        let live: Vec<RawResource> = inner.entries.keys().copied().collect();
        let retired: Vec<RawResource> = inner.retired.drain(..).map(|r| r.raw).collect();
        inner.entries.clear();
        for raw in live.into_iter().chain(retired) {
            self.tracker.unregister(raw);
            self.device.destroy_resource(raw);
        }
    }
}
