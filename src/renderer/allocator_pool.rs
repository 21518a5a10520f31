//! Command Allocator Pool
//!
//! Recycles command allocators between submissions. An allocator is handed
//! out only when it is not in use and the fence value of its last
//! submission has completed, so recorded memory is never reset under the
//! GPU.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::errors::Result;
use crate::hal::{FenceValue, GpuDevice, RawAllocator};

/// Allocators created up front.
pub const INITIAL_ALLOCATORS: usize = 3;

struct PoolEntry {
    raw: RawAllocator,
    /// Fence of the last submission recorded from this allocator.
    fence: FenceValue,
    in_use: bool,
}

pub struct CommandAllocatorPool {
    device: Arc<dyn GpuDevice>,
    entries: Vec<PoolEntry>,
    /// Released entries, oldest release first.
    available: VecDeque<usize>,
}

impl CommandAllocatorPool {
    pub fn new(device: Arc<dyn GpuDevice>) -> Result<Self> {
        let mut pool = Self {
            device,
            entries: Vec::with_capacity(INITIAL_ALLOCATORS),
            available: VecDeque::with_capacity(INITIAL_ALLOCATORS),
        };
        for _ in 0..INITIAL_ALLOCATORS {
            let raw = pool.device.create_command_allocator()?;
            pool.available.push_back(pool.entries.len());
            pool.entries.push(PoolEntry {
                raw,
                fence: 0,
                in_use: false,
            });
        }
        Ok(pool)
    }

    /// Returns a reset allocator whose previous work has completed.
    ///
    /// Checks the head of the release queue first, then scans every idle
    /// entry, and creates a new allocator only if none qualifies.
    pub fn acquire(&mut self, completed: FenceValue) -> Result<RawAllocator> {
        let front_ready = self
            .available
            .front()
            .is_some_and(|&i| self.entries[i].fence <= completed);
        let index = if front_ready {
            self.available.pop_front()
        } else {
            self.scan(completed)
        };

        let index = match index {
            Some(i) => {
                self.device.reset_command_allocator(self.entries[i].raw)?;
                i
            }
            None => {
                let raw = self.device.create_command_allocator()?;
                log::debug!(
                    "Command allocator pool grew to {} (completed fence {completed})",
                    self.entries.len() + 1
                );
                self.entries.push(PoolEntry {
                    raw,
                    fence: 0,
                    in_use: false,
                });
                self.entries.len() - 1
            }
        };

        self.entries[index].in_use = true;
        Ok(self.entries[index].raw)
    }

    /// Any idle entry whose fence has completed, wherever it sits in the queue.
    fn scan(&mut self, completed: FenceValue) -> Option<usize> {
        let index = self
            .entries
            .iter()
            .position(|e| !e.in_use && e.fence <= completed)?;
        self.available.retain(|&i| i != index);
        Some(index)
    }

    /// Returns an allocator whose last submission signals `fence`.
    ///
    /// Allocators the pool did not create are adopted.
    pub fn release(&mut self, fence: FenceValue, allocator: RawAllocator) {
        let index = match self.entries.iter().position(|e| e.raw == allocator) {
            Some(i) => {
                if !self.entries[i].in_use {
                    log::warn!("Allocator {allocator:?} released twice");
                    return;
                }
                i
            }
            None => {
                log::debug!("Adopting foreign command allocator {allocator:?}");
                self.entries.push(PoolEntry {
                    raw: allocator,
                    fence,
                    in_use: true,
                });
                self.entries.len() - 1
            }
        };
        let entry = &mut self.entries[index];
        entry.fence = fence;
        entry.in_use = false;
        self.available.push_back(index);
    }

    /// Destroys every pooled allocator. The GPU must be idle.
    ///
    /// Returns how many were destroyed.
    pub fn clear(&mut self) -> usize {
        let in_use = self.in_use_count();
        if in_use > 0 {
            log::warn!("Clearing command allocator pool with {in_use} allocator(s) still in use");
        }
        self.available.clear();
        let count = self.entries.len();
        for entry in self.entries.drain(..) {
            self.device.destroy_command_allocator(entry.raw);
        }
        count
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn available_count(&self) -> usize {
        self.available.len()
    }

    #[must_use]
    pub fn in_use_count(&self) -> usize {
        self.entries.iter().filter(|e| e.in_use).count()
    }
}

impl Drop for CommandAllocatorPool {
    fn drop(&mut self) {
        self.clear();
    }
}
