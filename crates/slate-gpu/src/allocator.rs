//! Descriptor set allocation from a growable list of fixed-capacity pools.
//!
//! Pools are bump-allocated: a pool fills to capacity, waits for every set
//! drawn from it to be released, then is destroyed. Freed slots in a spent
//! pool are never reused.

use crate::descriptors::DescriptorSetLayoutBuilder;
use crate::error::{GpuError, Result};
use ash::vk;

/// Outcome of returning one set's accounting to a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// The pool still has live allocations.
    Retained,
    /// Every slot drawn from the pool has been returned; destroy it now.
    Drained,
    /// The pool was already fully drained; nothing to destroy.
    AlreadyDrained,
}

/// Per-pool counters.
struct PoolSlot {
    remaining: u32,
    freed: u32,
}

/// Pure bookkeeping for a growable set of fixed-capacity pools.
///
/// Tracks which pool is current, how many write units each pool has left,
/// and how many sets have been returned to each pool. Holds no Vulkan
/// handles, so the growth and drain rules are testable on their own.
pub struct PoolLedger {
    capacity: u32,
    pools: Vec<PoolSlot>,
    current: usize,
}

impl PoolLedger {
    /// Create a ledger with one fresh pool of the given capacity.
    pub fn new(capacity: u32) -> Self {
        Self {
            capacity,
            pools: vec![PoolSlot {
                remaining: capacity,
                freed: 0,
            }],
            current: 0,
        }
    }

    /// Declared capacity of every pool.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Number of pools ever created, destroyed ones included.
    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }

    /// Index of the pool allocations are currently drawn from.
    pub fn current_pool(&self) -> usize {
        self.current
    }

    /// Write units left in the given pool.
    pub fn remaining(&self, index: usize) -> u32 {
        self.pools[index].remaining
    }

    /// Sets returned to the given pool so far.
    pub fn freed(&self, index: usize) -> u32 {
        self.pools[index].freed
    }

    /// Ensure the current pool can serve an allocation.
    ///
    /// When the current pool is spent a fresh slot is appended and becomes
    /// current. Returns `true` if the caller must create a matching native
    /// pool. The spent pool keeps its counters; it is never drawn from again.
    pub fn ensure_available(&mut self) -> bool {
        if self.pools[self.current].remaining > 0 {
            return false;
        }
        self.pools.push(PoolSlot {
            remaining: self.capacity,
            freed: 0,
        });
        self.current += 1;
        true
    }

    /// Record `writes` write units drawn from the current pool.
    ///
    /// Returns the index of the pool the allocation was served from.
    pub fn record(&mut self, writes: u32) -> usize {
        let slot = &mut self.pools[self.current];
        slot.remaining = slot.remaining.saturating_sub(writes);
        self.current
    }

    /// Return one set's accounting to the pool at `index`.
    ///
    /// The freed counter saturates at the pool capacity, so over-releasing
    /// reports [`ReleaseOutcome::AlreadyDrained`] instead of corrupting the
    /// drain condition.
    pub fn release(&mut self, index: usize) -> ReleaseOutcome {
        let slot = &mut self.pools[index];
        if slot.freed >= self.capacity {
            tracing::warn!(pool = index, "released more sets than pool capacity");
            return ReleaseOutcome::AlreadyDrained;
        }
        slot.freed += 1;
        if slot.freed == self.capacity {
            ReleaseOutcome::Drained
        } else {
            ReleaseOutcome::Retained
        }
    }
}

/// A batch of descriptor sets plus the pool index they were drawn from.
///
/// The pool index must be handed back via [`DescriptorAllocator::release`]
/// when the sets go out of use.
pub struct DescriptorBatch {
    pub sets: Vec<vk::DescriptorSet>,
    pub pool_index: usize,
}

/// A sampled image bound into a descriptor set.
#[derive(Clone, Copy)]
pub struct SampledImage {
    pub view: vk::ImageView,
    pub sampler: vk::Sampler,
}

/// Descriptor set allocator backed by a growable list of fixed-size pools.
///
/// Every set it hands out shares one layout: an optional uniform buffer at
/// binding 0 plus one combined image sampler per texture slot. Pools grow on
/// demand and are destroyed once fully drained, never reset or reused.
pub struct DescriptorAllocator {
    layout: vk::DescriptorSetLayout,
    pool_sizes: Vec<vk::DescriptorPoolSize>,
    pool_flags: vk::DescriptorPoolCreateFlags,
    max_sets: u32,
    pools: Vec<vk::DescriptorPool>,
    ledger: PoolLedger,
}

/// Default number of sets each pool is sized for.
pub const DEFAULT_SETS_PER_POOL: u32 = 50;

impl DescriptorAllocator {
    /// Create an allocator with the default material layout: one uniform
    /// buffer binding (vertex stage) plus `texture_count` combined image
    /// sampler bindings (fragment stage).
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn new(
        device: &ash::Device,
        texture_count: u32,
        sets_per_pool: u32,
    ) -> Result<Self> {
        let mut builder = DescriptorSetLayoutBuilder::new().uniform_buffer(
            0,
            vk::ShaderStageFlags::VERTEX,
        );
        for i in 0..texture_count {
            builder = builder.sampled_image(i + 1, vk::ShaderStageFlags::FRAGMENT);
        }
        let layout = builder.build(device)?;

        let mut pool_sizes = vec![vk::DescriptorPoolSize {
            ty: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: sets_per_pool,
        }];
        for _ in 0..texture_count {
            pool_sizes.push(vk::DescriptorPoolSize {
                ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                descriptor_count: sets_per_pool,
            });
        }

        Self::from_parts(
            device,
            layout,
            pool_sizes,
            sets_per_pool,
            vk::DescriptorPoolCreateFlags::empty(),
        )
    }

    /// Create an allocator with caller-supplied layout bindings and pool
    /// sizing. Used by the GUI bridge, whose backend wants a large pool of
    /// mixed descriptor types with freeable sets.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn with_config(
        device: &ash::Device,
        bindings: &[vk::DescriptorSetLayoutBinding],
        pool_sizes: Vec<vk::DescriptorPoolSize>,
        max_sets: u32,
        pool_flags: vk::DescriptorPoolCreateFlags,
    ) -> Result<Self> {
        let layout_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(bindings);
        let layout = device.create_descriptor_set_layout(&layout_info, None)?;
        Self::from_parts(device, layout, pool_sizes, max_sets, pool_flags)
    }

    unsafe fn from_parts(
        device: &ash::Device,
        layout: vk::DescriptorSetLayout,
        pool_sizes: Vec<vk::DescriptorPoolSize>,
        max_sets: u32,
        pool_flags: vk::DescriptorPoolCreateFlags,
    ) -> Result<Self> {
        let mut allocator = Self {
            layout,
            pool_sizes,
            pool_flags,
            max_sets,
            pools: Vec::new(),
            ledger: PoolLedger::new(max_sets),
        };
        let first = allocator.create_pool(device)?;
        allocator.pools.push(first);
        Ok(allocator)
    }

    /// The layout every set from this allocator uses.
    pub fn layout(&self) -> vk::DescriptorSetLayout {
        self.layout
    }

    /// Read access to the pool bookkeeping.
    pub fn ledger(&self) -> &PoolLedger {
        &self.ledger
    }

    /// Create one standalone pool from the current configuration. The
    /// caller owns it; the ledger does not track it. The GUI backend init
    /// takes ownership of such a pool.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn create_raw_pool(&self, device: &ash::Device) -> Result<vk::DescriptorPool> {
        self.create_pool(device)
    }

    unsafe fn create_pool(&self, device: &ash::Device) -> Result<vk::DescriptorPool> {
        let create_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(self.max_sets)
            .pool_sizes(&self.pool_sizes)
            .flags(self.pool_flags);
        let pool = device.create_descriptor_pool(&create_info, None)?;
        Ok(pool)
    }

    /// Allocate one descriptor set per frame in flight and write its
    /// bindings.
    ///
    /// `uniform_buffers`, when supplied, holds one buffer per frame bound at
    /// binding 0 with the given range. Each entry of `images` is bound as a
    /// combined image sampler at the following bindings. The current pool's
    /// remaining counter drops by the number of writes recorded; when it was
    /// already spent a new pool is appended first.
    ///
    /// On failure the sets must not be used and no bookkeeping is rolled
    /// back; the caller keeps no pool index.
    ///
    /// # Safety
    /// The device and all supplied handles must be valid.
    pub unsafe fn allocate_sets(
        &mut self,
        device: &ash::Device,
        frames_in_flight: usize,
        uniform_buffers: Option<(&[vk::Buffer], u64)>,
        images: &[SampledImage],
    ) -> Result<DescriptorBatch> {
        if self.ledger.ensure_available() {
            let pool = self.create_pool(device)?;
            self.pools.push(pool);
            tracing::debug!(pools = self.pools.len(), "descriptor pool list grew");
        }

        let pool = self.pools[self.ledger.current_pool()];
        let layouts = vec![self.layout; frames_in_flight];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(pool)
            .set_layouts(&layouts);

        let sets = device.allocate_descriptor_sets(&alloc_info).map_err(|e| {
            tracing::error!("failed to allocate descriptor sets: {e}");
            GpuError::DescriptorAllocation(e.to_string())
        })?;

        let mut pool_index = self.ledger.current_pool();
        for (frame, &set) in sets.iter().enumerate() {
            let mut writes = Vec::with_capacity(1 + images.len());
            let mut binding = 0;

            let buffer_info;
            if let Some((buffers, range)) = uniform_buffers {
                buffer_info = vk::DescriptorBufferInfo::default()
                    .buffer(buffers[frame])
                    .offset(0)
                    .range(range);
                writes.push(
                    vk::WriteDescriptorSet::default()
                        .dst_set(set)
                        .dst_binding(binding)
                        .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                        .buffer_info(std::slice::from_ref(&buffer_info)),
                );
                binding += 1;
            }

            let image_infos: Vec<_> = images
                .iter()
                .map(|image| {
                    vk::DescriptorImageInfo::default()
                        .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                        .image_view(image.view)
                        .sampler(image.sampler)
                })
                .collect();
            for info in &image_infos {
                writes.push(
                    vk::WriteDescriptorSet::default()
                        .dst_set(set)
                        .dst_binding(binding)
                        .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                        .image_info(std::slice::from_ref(info)),
                );
                binding += 1;
            }

            device.update_descriptor_sets(&writes, &[]);
            pool_index = self.ledger.record(writes.len() as u32);
        }

        Ok(DescriptorBatch { sets, pool_index })
    }

    /// Return `sets` sets' accounting to the pool at `pool_index`,
    /// destroying the native pool once every set drawn from it is back.
    ///
    /// # Safety
    /// The device must be valid and the released sets must not be in use.
    pub unsafe fn release(&mut self, device: &ash::Device, pool_index: usize, sets: u32) {
        for _ in 0..sets {
            if self.ledger.release(pool_index) == ReleaseOutcome::Drained {
                device.destroy_descriptor_pool(self.pools[pool_index], None);
                self.pools[pool_index] = vk::DescriptorPool::null();
                tracing::debug!(pool = pool_index, "drained descriptor pool destroyed");
            }
        }
    }

    /// Destroy every live pool and the set layout.
    ///
    /// # Safety
    /// The device must be valid and no set from this allocator may be in use.
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        for &pool in &self.pools {
            if pool != vk::DescriptorPool::null() {
                device.destroy_descriptor_pool(pool, None);
            }
        }
        self.pools.clear();
        device.destroy_descriptor_set_layout(self.layout, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn growth_happens_exactly_at_exhaustion() {
        let mut ledger = PoolLedger::new(50);

        for _ in 0..50 {
            assert!(!ledger.ensure_available());
            ledger.record(1);
        }
        assert_eq!(ledger.pool_count(), 1);
        assert_eq!(ledger.remaining(0), 0);

        // 51st allocation appends pool 1 before reserving; pool 0 untouched.
        assert!(ledger.ensure_available());
        assert_eq!(ledger.current_pool(), 1);
        assert_eq!(ledger.record(1), 1);
        assert_eq!(ledger.pool_count(), 2);
        assert_eq!(ledger.remaining(0), 0);
        assert_eq!(ledger.remaining(1), 49);
    }

    #[test]
    fn pool_drains_exactly_at_capacity() {
        let mut ledger = PoolLedger::new(2);
        ledger.record(2);

        assert_eq!(ledger.release(0), ReleaseOutcome::Retained);
        assert_eq!(ledger.freed(0), 1);
        assert_eq!(ledger.release(0), ReleaseOutcome::Drained);
        assert_eq!(ledger.freed(0), 2);
    }

    #[test]
    fn over_release_saturates() {
        let mut ledger = PoolLedger::new(2);
        ledger.record(2);
        ledger.release(0);
        ledger.release(0);

        // Extra releases never push freed past capacity or drain twice.
        assert_eq!(ledger.release(0), ReleaseOutcome::AlreadyDrained);
        assert_eq!(ledger.release(0), ReleaseOutcome::AlreadyDrained);
        assert_eq!(ledger.freed(0), 2);
    }

    #[test]
    fn spent_pool_is_never_drawn_from_again() {
        let mut ledger = PoolLedger::new(3);
        ledger.record(3);
        assert!(ledger.ensure_available());

        // Releases against pool 0 do not move the current pool back.
        ledger.release(0);
        assert!(!ledger.ensure_available());
        assert_eq!(ledger.current_pool(), 1);
    }

    #[test]
    fn multi_write_batches_spend_faster() {
        // A set with a uniform plus two samplers records three writes.
        let mut ledger = PoolLedger::new(6);
        ledger.record(3);
        ledger.record(3);
        assert_eq!(ledger.remaining(0), 0);
        assert!(ledger.ensure_available());
        assert_eq!(ledger.pool_count(), 2);
    }

    #[test]
    fn freed_counter_only_affects_its_own_pool() {
        let mut ledger = PoolLedger::new(1);
        ledger.record(1);
        ledger.ensure_available();
        ledger.record(1);

        assert_eq!(ledger.release(1), ReleaseOutcome::Drained);
        assert_eq!(ledger.freed(0), 0);
        assert_eq!(ledger.release(0), ReleaseOutcome::Drained);
    }
}
