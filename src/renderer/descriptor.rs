//! Descriptor Allocator
//!
//! One fixed-capacity heap per [`DescriptorCategory`]. Slots are tracked in
//! a bitmap (one bit per slot, set = allocated) and searched with
//! `trailing_zeros` starting from the word that last had room.
//!
//! Handles are pure arithmetic: `base + index * stride`.
//!
//! The allocator is owned by the submission thread and takes `&mut self`.

use crate::errors::{GlazeError, Result};
use crate::hal::{
    CpuDescriptorHandle, DescriptorCategory, DescriptorHeapInfo, GpuDescriptorHandle, GpuDevice,
};
use crate::settings::DescriptorCapacities;

/// An allocated slot within one heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorSlot {
    pub category: DescriptorCategory,
    pub index: u32,
}

struct DescriptorPool {
    heap: DescriptorHeapInfo,
    capacity: u32,
    words: Vec<u64>,
    allocated: u32,
    /// First word that may contain a free bit.
    search_hint: usize,
}

impl DescriptorPool {
    fn new(heap: DescriptorHeapInfo, capacity: u32) -> Self {
        let word_count = capacity.div_ceil(64) as usize;
        let mut words = vec![0u64; word_count];
        // Bits past `capacity` in the final word are permanently set.
        let tail = capacity % 64;
        if tail != 0 {
            if let Some(last) = words.last_mut() {
                *last = !0u64 << tail;
            }
        }
        Self {
            heap,
            capacity,
            words,
            allocated: 0,
            search_hint: 0,
        }
    }

    fn allocate(&mut self) -> Option<u32> {
        if self.allocated == self.capacity {
            return None;
        }
        let count = self.words.len();
        for offset in 0..count {
            let w = (self.search_hint + offset) % count;
            let word = self.words[w];
            if word != u64::MAX {
                let bit = (!word).trailing_zeros();
                self.words[w] |= 1u64 << bit;
                self.allocated += 1;
                self.search_hint = w;
                return Some(w as u32 * 64 + bit);
            }
        }
        None
    }

    fn free(&mut self, index: u32) -> bool {
        if index >= self.capacity {
            return false;
        }
        let (w, bit) = ((index / 64) as usize, index % 64);
        let mask = 1u64 << bit;
        if self.words[w] & mask == 0 {
            return false;
        }
        self.words[w] &= !mask;
        self.allocated -= 1;
        self.search_hint = self.search_hint.min(w);
        true
    }

    fn is_allocated(&self, index: u32) -> bool {
        index < self.capacity && self.words[(index / 64) as usize] & (1u64 << (index % 64)) != 0
    }
}

pub struct DescriptorAllocator {
    pools: [DescriptorPool; DescriptorCategory::COUNT],
}

impl DescriptorAllocator {
    /// Creates the four heaps. Heap creation failure is fatal.
    pub fn new(device: &dyn GpuDevice, capacities: &DescriptorCapacities) -> Result<Self> {
        let make = |category: DescriptorCategory| -> Result<DescriptorPool> {
            let capacity = capacities.get(category);
            let heap = device.create_descriptor_heap(category, capacity)?;
            log::debug!("{category:?} descriptor heap: {capacity} slots");
            Ok(DescriptorPool::new(heap, capacity))
        };
        Ok(Self {
            pools: [
                make(DescriptorCategory::RenderTarget)?,
                make(DescriptorCategory::DepthStencil)?,
                make(DescriptorCategory::ShaderResource)?,
                make(DescriptorCategory::Sampler)?,
            ],
        })
    }

    #[inline]
    fn pool(&self, category: DescriptorCategory) -> &DescriptorPool {
        &self.pools[category.index()]
    }

    /// Reserves a free slot, or fails with `OutOfDescriptors`.
    pub fn allocate(&mut self, category: DescriptorCategory) -> Result<DescriptorSlot> {
        let pool = &mut self.pools[category.index()];
        match pool.allocate() {
            Some(index) => Ok(DescriptorSlot { category, index }),
            None => {
                log::warn!("{category:?} descriptor heap exhausted ({} slots)", pool.capacity);
                Err(GlazeError::OutOfDescriptors {
                    category,
                    capacity: pool.capacity,
                })
            }
        }
    }

    /// Returns a slot to its heap.
    ///
    /// Freeing an out-of-range or already free slot is a no-op that logs a
    /// warning and returns `false`.
    pub fn free(&mut self, slot: DescriptorSlot) -> bool {
        let freed = self.pools[slot.category.index()].free(slot.index);
        if !freed {
            log::warn!(
                "Ignoring free of {:?} slot {}: not allocated",
                slot.category,
                slot.index
            );
        }
        freed
    }

    #[must_use]
    pub fn cpu_handle(&self, slot: DescriptorSlot) -> CpuDescriptorHandle {
        let heap = &self.pool(slot.category).heap;
        CpuDescriptorHandle(heap.cpu_base + u64::from(slot.index) * heap.stride)
    }

    /// GPU handle for shader-visible categories, `None` otherwise.
    #[must_use]
    pub fn gpu_handle(&self, slot: DescriptorSlot) -> Option<GpuDescriptorHandle> {
        let heap = &self.pool(slot.category).heap;
        heap.gpu_base
            .map(|base| GpuDescriptorHandle(base + u64::from(slot.index) * heap.stride))
    }

    #[must_use]
    pub fn is_allocated(&self, slot: DescriptorSlot) -> bool {
        self.pool(slot.category).is_allocated(slot.index)
    }

    #[must_use]
    pub fn allocated_count(&self, category: DescriptorCategory) -> u32 {
        self.pool(category).allocated
    }

    #[must_use]
    pub fn capacity(&self, category: DescriptorCategory) -> u32 {
        self.pool(category).capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heap() -> DescriptorHeapInfo {
        DescriptorHeapInfo {
            cpu_base: 0x1000,
            gpu_base: Some(0x10_0000),
            stride: 32,
        }
    }

    #[test]
    fn tail_bits_are_never_handed_out() {
        let mut pool = DescriptorPool::new(heap(), 70);
        let got: Vec<u32> = std::iter::from_fn(|| pool.allocate()).collect();
        assert_eq!(got.len(), 70);
        assert_eq!(*got.iter().max().unwrap(), 69);
    }

    #[test]
    fn freed_slot_is_found_again() {
        let mut pool = DescriptorPool::new(heap(), 128);
        for _ in 0..128 {
            pool.allocate().unwrap();
        }
        assert!(pool.free(100));
        assert_eq!(pool.allocate(), Some(100));
        assert_eq!(pool.allocate(), None);
    }

    #[test]
    fn double_free_is_rejected() {
        let mut pool = DescriptorPool::new(heap(), 8);
        let i = pool.allocate().unwrap();
        assert!(pool.free(i));
        assert!(!pool.free(i));
        assert!(!pool.free(8));
        assert_eq!(pool.allocated, 0);
    }
}
