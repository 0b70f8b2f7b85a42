//! Pools from which descriptor sets are allocated.
//!
//! A pool owns three fixed-capacity arenas: a surface heap and a sampler heap holding the
//! hardware-visible descriptor bytes, and a host budget covering the CPU bookkeeping of its
//! sets. Capacities are computed up front from the pool's declared contents, so an allocation
//! never grows the pool; it either fits or fails with a recoverable error.
//!
//! Host access to a pool and to all sets allocated from it must be externally synchronized.

use super::{
    kind,
    layout::{DescriptorSetLayout, DescriptorSetLayoutCreateFlags, DescriptorType},
    set::{DescriptorSet, SetAllocation},
};
use crate::{
    device::{Device, DeviceOwned},
    memory::{
        suballocator::{BumpHeap, FreeListHeap, Suballocation, SuballocatorError},
        DeviceLayout,
    },
    DeviceSize, NonExhaustive, RuntimeError, Validated, ValidationError,
};
use foldhash::HashMap;
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::{
    fmt::{Debug, Error as FmtError, Formatter},
    num::NonZeroU64,
    sync::Arc,
};

// Host-side cost estimates for the worst-case pool budget: one per set, one per descriptor.
const HOST_SET_OVERHEAD: DeviceSize = 256;
const HOST_DESCRIPTOR_SIZE: DeviceSize = 48;

crate::macros::bitflags_type! {
    /// Flags that control how a descriptor pool is created.
    DescriptorPoolCreateFlags = u32;

    /// Whether individual descriptor sets can be freed from the pool. Otherwise, the only way to
    /// reclaim their memory is to reset or destroy the whole pool.
    FREE_DESCRIPTOR_SET = 1 << 0,

    /// Whether the pool can allocate sets whose layout was created with the
    /// `DescriptorSetLayoutCreateFlags::UPDATE_AFTER_BIND_POOL` flag.
    UPDATE_AFTER_BIND = 1 << 1,
}

/// Parameters to create a new `DescriptorPool`.
#[derive(Clone, Debug)]
pub struct DescriptorPoolCreateInfo {
    /// Specifies how to create the descriptor pool.
    pub flags: DescriptorPoolCreateFlags,

    /// The maximum number of descriptor sets that can be live at once.
    ///
    /// The default value is `0`, which must be overridden.
    pub max_sets: u32,

    /// The number of descriptors of each type that the pool can hold across all of its sets.
    /// For [`DescriptorType::InlineUniformBlock`], the count is a byte count.
    ///
    /// The default value is empty, which must be overridden.
    pub pool_sizes: HashMap<DescriptorType, u32>,

    pub _ne: NonExhaustive,
}

impl Default for DescriptorPoolCreateInfo {
    #[inline]
    fn default() -> Self {
        Self {
            flags: DescriptorPoolCreateFlags::empty(),
            max_sets: 0,
            pool_sizes: HashMap::default(),
            _ne: NonExhaustive(()),
        }
    }
}

impl DescriptorPoolCreateInfo {
    pub(crate) fn validate(&self) -> Result<(), Box<ValidationError>> {
        let &Self {
            flags: _,
            max_sets,
            ref pool_sizes,
            _ne: _,
        } = self;

        if max_sets == 0 {
            return Err(ValidationError::new("is zero").add_context("max_sets"));
        }

        if pool_sizes.is_empty() {
            return Err(ValidationError::new("is empty").add_context("pool_sizes"));
        }

        for (&descriptor_type, &count) in pool_sizes {
            if count == 0 {
                return Err(ValidationError::new(format!(
                    "the count for `DescriptorType::{:?}` is zero",
                    descriptor_type,
                ))
                .add_context("pool_sizes"));
            }
        }

        Ok(())
    }
}

/// Parameters to allocate one descriptor set from a pool.
#[derive(Clone, Debug)]
pub struct DescriptorSetAllocateInfo {
    /// The layout of the set to allocate.
    ///
    /// There is no default value.
    pub layout: Arc<DescriptorSetLayout>,

    /// For layouts whose highest binding has a variable descriptor count, the actual count to
    /// allocate. For an inline uniform block binding this is a byte count. Must not exceed the
    /// declared maximum.
    ///
    /// The default value is `0`.
    pub variable_descriptor_count: u32,

    pub _ne: NonExhaustive,
}

impl DescriptorSetAllocateInfo {
    /// Returns a `DescriptorSetAllocateInfo` with the given layout.
    #[inline]
    pub fn new(layout: Arc<DescriptorSetLayout>) -> Self {
        Self {
            layout,
            variable_descriptor_count: 0,
            _ne: NonExhaustive(()),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum HeapKind {
    Surface,
    Sampler,
}

struct Heap {
    storage: Box<[u8]>,
    allocator: FreeListHeap,
}

impl Heap {
    fn new(device: &Device, base: DeviceSize, capacity: DeviceSize) -> Self {
        Self {
            storage: device.allocate_heap_storage(capacity),
            allocator: FreeListHeap::new(base, capacity),
        }
    }

    fn bytes_mut(&mut self, region: &Suballocation) -> &mut [u8] {
        let start = (region.offset - self.allocator.base()) as usize;
        &mut self.storage[start..start + region.size as usize]
    }
}

struct PoolState {
    surface: Heap,
    sampler: Heap,
    host: BumpHeap,
    set_count: u32,
    generation: u64,
}

#[derive(Default)]
struct Reservation {
    surface: Option<Suballocation>,
    sampler: Option<Suballocation>,
    host_size: DeviceSize,
    embedded: bool,
}

impl PoolState {
    fn release(&mut self, reservation: &Reservation) {
        if reservation.embedded {
            return;
        }

        if let Some(region) = reservation.surface {
            self.surface.allocator.free(region);
        }
        if let Some(region) = reservation.sampler {
            self.sampler.allocator.free(region);
        }
        // Host bookkeeping is bump-allocated; its bytes come back at the next reset.
        self.set_count -= 1;
    }
}

/// Pool from which descriptor sets are allocated.
///
/// A pool has a maximum number of live sets and a maximum number of descriptors (one count per
/// descriptor type); both are fixed at creation.
pub struct DescriptorPool {
    device: Arc<Device>,
    id: NonZeroU64,
    flags: DescriptorPoolCreateFlags,
    max_sets: u32,
    surface_alignment: DeviceSize,
    state: Mutex<PoolState>,
}

impl DescriptorPool {
    /// Creates a new `DescriptorPool`.
    pub fn new(
        device: Arc<Device>,
        create_info: DescriptorPoolCreateInfo,
    ) -> Result<Arc<DescriptorPool>, Validated<RuntimeError>> {
        create_info
            .validate()
            .map_err(|err| err.add_context("create_info"))?;

        let DescriptorPoolCreateInfo {
            flags,
            max_sets,
            pool_sizes,
            _ne: _,
        } = create_info;

        let properties = device.properties();

        // Worst-case heap capacities: the declared descriptors at their largest possible
        // encoding, plus per-set alignment slop.
        let surface_alignment = properties
            .surface_record_alignment
            .max(properties.constant_buffer_alignment)
            .max(properties.inline_block_alignment);
        let sampler_alignment = properties.sampler_record_alignment;

        let mut surface_capacity = 0;
        let mut sampler_capacity = 0;
        let mut descriptor_total: DeviceSize = 0;

        for (&descriptor_type, &count) in &pool_sizes {
            surface_capacity += kind::pool_surface_contribution(descriptor_type, count, properties);
            sampler_capacity += kind::pool_sampler_contribution(descriptor_type, count, properties);
            descriptor_total += DeviceSize::from(count);
        }

        surface_capacity += DeviceSize::from(max_sets) * surface_alignment;
        sampler_capacity += DeviceSize::from(max_sets) * sampler_alignment;

        let host_capacity = DeviceSize::from(max_sets) * HOST_SET_OVERHEAD
            + descriptor_total * HOST_DESCRIPTOR_SIZE;

        log::trace!(
            "created descriptor pool: max_sets {}, surface heap {}B, sampler heap {}B, \
            host heap {}B",
            max_sets,
            surface_capacity,
            sampler_capacity,
            host_capacity,
        );

        let state = Mutex::new(PoolState {
            surface: Heap::new(&device, surface_alignment, surface_capacity),
            sampler: Heap::new(&device, sampler_alignment, sampler_capacity),
            host: BumpHeap::new(HOST_SET_OVERHEAD, host_capacity),
            set_count: 0,
            generation: 0,
        });

        Ok(Arc::new(DescriptorPool {
            device,
            id: Self::next_id(),
            flags,
            max_sets,
            surface_alignment,
            state,
        }))
    }

    /// Returns the flags that the pool was created with.
    #[inline]
    pub fn flags(&self) -> DescriptorPoolCreateFlags {
        self.flags
    }

    /// Returns the maximum number of live sets of the pool.
    #[inline]
    pub fn max_sets(&self) -> u32 {
        self.max_sets
    }

    /// Returns the number of currently live sets of the pool.
    #[inline]
    pub fn set_count(&self) -> u32 {
        self.state.lock().set_count
    }

    /// Returns the free byte counts of the surface and sampler heaps.
    #[inline]
    pub fn free_sizes(&self) -> (DeviceSize, DeviceSize) {
        let state = self.state.lock();
        (
            state.surface.allocator.free_size(),
            state.sampler.allocator.free_size(),
        )
    }

    /// Allocates descriptor sets from the pool, one for each element of `allocate_infos`.
    ///
    /// The batch is all-or-nothing: if any allocation fails, everything allocated earlier in the
    /// same call is destroyed before returning and the error is surfaced. A
    /// [`RuntimeError::FragmentedPool`] failure can be resolved by [`reset`](Self::reset); a
    /// [`RuntimeError::OutOfPoolMemory`] failure needs a larger pool.
    ///
    /// # Panics
    ///
    /// - Panics if one of the layouts wasn't created with the same device as the pool.
    /// - Panics if one of the layouts is a push descriptor layout.
    pub fn allocate_descriptor_sets(
        self: &Arc<Self>,
        allocate_infos: impl IntoIterator<Item = DescriptorSetAllocateInfo>,
    ) -> Result<Vec<Arc<DescriptorSet>>, Validated<RuntimeError>> {
        let allocate_infos: SmallVec<[_; 1]> = allocate_infos.into_iter().collect();

        for info in &allocate_infos {
            let layout = &info.layout;

            assert_eq!(
                self.device.as_ref(),
                layout.device().as_ref(),
                "the descriptor set layout belongs to a different device than the pool",
            );
            assert!(
                !layout.is_push_descriptor(),
                "a push descriptor layout cannot be used to allocate a descriptor set",
            );

            if info.variable_descriptor_count > layout.variable_descriptor_count() {
                return Err(ValidationError::new(
                    "exceeds the layout's maximum variable descriptor count",
                )
                .add_context("allocate_infos.variable_descriptor_count")
                .into());
            }

            if layout
                .flags()
                .intersects(DescriptorSetLayoutCreateFlags::UPDATE_AFTER_BIND_POOL)
                && !self
                    .flags
                    .intersects(DescriptorPoolCreateFlags::UPDATE_AFTER_BIND)
            {
                return Err(ValidationError::new(
                    "the layout requires a pool created with \
                    `DescriptorPoolCreateFlags::UPDATE_AFTER_BIND`",
                )
                .add_context("allocate_infos.layout")
                .into());
            }
        }

        let mut state = self.state.lock();
        let generation = state.generation;

        let mut reservations: SmallVec<[Reservation; 1]> =
            SmallVec::with_capacity(allocate_infos.len());
        let mut failure = None;

        for info in &allocate_infos {
            match self.reserve(&mut state, info) {
                Ok(reservation) => reservations.push(reservation),
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }

        if let Some(err) = failure {
            // All-or-nothing: everything reserved earlier in this batch goes back.
            for reservation in &reservations {
                state.release(reservation);
            }

            log::debug!("descriptor set allocation failed: {}", err);

            return Err(Validated::Error(err));
        }

        drop(state);

        Ok(allocate_infos
            .into_iter()
            .zip(reservations)
            .map(|(info, reservation)| {
                if reservation.embedded {
                    let storage = info.layout.embedded_storage().unwrap().clone();
                    DescriptorSet::new_embedded(info.layout, storage)
                } else {
                    DescriptorSet::new_pooled(
                        self.clone(),
                        generation,
                        info.layout,
                        info.variable_descriptor_count,
                        reservation.surface,
                        reservation.sampler,
                        reservation.host_size,
                    )
                }
            })
            .collect())
    }

    fn reserve(
        &self,
        state: &mut PoolState,
        info: &DescriptorSetAllocateInfo,
    ) -> Result<Reservation, RuntimeError> {
        let layout = &info.layout;

        // A layout made entirely of immutable samplers is served by its pre-baked storage and
        // takes nothing from the pool.
        if layout.embedded_storage().is_some() {
            return Ok(Reservation {
                embedded: true,
                ..Default::default()
            });
        }

        if state.set_count >= self.max_sets {
            return Err(RuntimeError::OutOfPoolMemory);
        }

        let properties = self.device.properties();
        let (surface_size, sampler_size) = set_footprint(layout, info.variable_descriptor_count);

        let surface = if surface_size != 0 {
            let device_layout =
                DeviceLayout::from_size_alignment(surface_size, self.surface_alignment).unwrap();

            Some(
                state
                    .surface
                    .allocator
                    .allocate(device_layout)
                    .map_err(heap_error)?,
            )
        } else {
            None
        };

        let sampler = if sampler_size != 0 {
            let device_layout = DeviceLayout::from_size_alignment(
                sampler_size,
                properties.sampler_record_alignment,
            )
            .unwrap();

            match state.sampler.allocator.allocate(device_layout) {
                Ok(region) => Some(region),
                Err(err) => {
                    // Cross-heap rollback: give back what the other heap already granted.
                    if let Some(region) = surface {
                        state.surface.allocator.free(region);
                    }

                    return Err(heap_error(err));
                }
            }
        } else {
            None
        };

        let host_size = HOST_SET_OVERHEAD
            + DeviceSize::from(layout.descriptor_count()) * HOST_DESCRIPTOR_SIZE;
        let host_layout = DeviceLayout::from_size_alignment(host_size, 8).unwrap();

        if state.host.allocate(host_layout).is_err() {
            if let Some(region) = surface {
                state.surface.allocator.free(region);
            }
            if let Some(region) = sampler {
                state.sampler.allocator.free(region);
            }

            return Err(RuntimeError::OutOfPoolMemory);
        }

        state.set_count += 1;

        Ok(Reservation {
            surface,
            sampler,
            host_size,
            embedded: false,
        })
    }

    /// Frees individual descriptor sets.
    ///
    /// The pool must have been created with the
    /// [`DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET`] flag, and the sets must have been
    /// allocated from this pool.
    pub fn free_descriptor_sets(
        &self,
        descriptor_sets: impl IntoIterator<Item = Arc<DescriptorSet>>,
    ) -> Result<(), Validated<RuntimeError>> {
        if !self
            .flags
            .intersects(DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
        {
            return Err(ValidationError::new(
                "the pool was not created with \
                `DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET`",
            )
            .add_context("self.flags")
            .into());
        }

        for set in descriptor_sets {
            match set.allocation() {
                SetAllocation::Pool {
                    pool,
                    generation,
                    surface,
                    sampler,
                    ..
                } => {
                    if !std::ptr::eq::<DescriptorPool>(&**pool, self) {
                        return Err(Validated::Error(RuntimeError::InvalidExternalHandle));
                    }

                    if set.mark_released() {
                        let mut state = self.state.lock();

                        if state.generation == *generation {
                            if let Some(region) = surface {
                                state.surface.allocator.free(*region);
                            }
                            if let Some(region) = sampler {
                                state.sampler.allocator.free(*region);
                            }
                            state.set_count -= 1;
                        }
                    }
                }
                // Sets of an all-immutable-sampler layout own nothing in the pool.
                SetAllocation::Embedded { .. } => {}
            }
        }

        Ok(())
    }

    /// Resets the pool: every set allocated from it is destroyed and both heaps become one
    /// contiguous free run again.
    ///
    /// Resetting is idempotent, and does not destroy the pool itself.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.generation += 1;
        state.surface.allocator.reset();
        state.sampler.allocator.reset();
        state.host.reset();
        state.set_count = 0;

        log::trace!("reset descriptor pool");
    }

    pub(crate) fn with_heap_bytes<R>(
        &self,
        generation: u64,
        heap: HeapKind,
        region: Option<&Suballocation>,
        f: impl FnOnce(&mut [u8]) -> R,
    ) -> R {
        let mut state = self.state.lock();

        assert_eq!(
            generation, state.generation,
            "the descriptor set's pool was reset",
        );

        match region {
            Some(region) => {
                let heap = match heap {
                    HeapKind::Surface => &mut state.surface,
                    HeapKind::Sampler => &mut state.sampler,
                };

                f(heap.bytes_mut(region))
            }
            None => {
                let mut empty: [u8; 0] = [];
                f(&mut empty)
            }
        }
    }

    pub(crate) fn release_dropped_set(
        &self,
        generation: u64,
        surface: Option<Suballocation>,
        sampler: Option<Suballocation>,
        _host_size: DeviceSize,
    ) {
        // Without the free flag, a dropped set's memory comes back only at the next reset.
        if !self
            .flags
            .intersects(DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
        {
            return;
        }

        let mut state = self.state.lock();

        if state.generation != generation {
            return;
        }

        if let Some(region) = surface {
            state.surface.allocator.free(region);
        }
        if let Some(region) = sampler {
            state.sampler.allocator.free(region);
        }
        state.set_count -= 1;
    }
}

impl Debug for DescriptorPool {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        f.debug_struct("DescriptorPool")
            .field("id", &self.id)
            .field("flags", &self.flags)
            .field("max_sets", &self.max_sets)
            .finish_non_exhaustive()
    }
}

unsafe impl DeviceOwned for DescriptorPool {
    #[inline]
    fn device(&self) -> &Arc<Device> {
        &self.device
    }
}

impl_id_counter!(DescriptorPool);

fn heap_error(err: SuballocatorError) -> RuntimeError {
    match err {
        SuballocatorError::OutOfRegionMemory => RuntimeError::OutOfPoolMemory,
        SuballocatorError::FragmentedRegion => RuntimeError::FragmentedPool,
    }
}

/// Computes the actual per-set heap footprint, shrinking the highest binding by the unused part
/// of its variable count.
fn set_footprint(layout: &DescriptorSetLayout, variable_count: u32) -> (DeviceSize, DeviceSize) {
    let mut surface = layout.surface_size();
    let mut sampler = layout.sampler_size();

    if let Some(binding) = layout
        .bindings()
        .iter()
        .rev()
        .find_map(|binding| binding.as_ref())
    {
        if binding.is_variable() {
            let unused = DeviceSize::from(binding.descriptor_count - variable_count);
            surface -= unused * binding.surface_stride;
            sampler -= unused * binding.sampler_stride;
        }
    }

    (surface, sampler)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        descriptor_set::layout::{
            DescriptorBindingFlags, DescriptorSetLayoutBinding, DescriptorSetLayoutCreateInfo,
        },
        device::DeviceCreateInfo,
        sampler::{Sampler, SamplerCreateInfo},
        shader::ShaderStages,
    };

    fn device() -> Arc<Device> {
        Device::new(DeviceCreateInfo::default())
    }

    fn simple_layout(
        device: &Arc<Device>,
        descriptor_type: DescriptorType,
        count: u32,
    ) -> Arc<DescriptorSetLayout> {
        DescriptorSetLayout::new(
            device.clone(),
            DescriptorSetLayoutCreateInfo {
                bindings: [(
                    0,
                    DescriptorSetLayoutBinding {
                        descriptor_count: count,
                        stages: ShaderStages::all_graphics(),
                        ..DescriptorSetLayoutBinding::descriptor_type(descriptor_type)
                    },
                )]
                .into(),
                ..Default::default()
            },
        )
        .unwrap()
    }

    fn pool(
        device: &Arc<Device>,
        flags: DescriptorPoolCreateFlags,
        max_sets: u32,
        sizes: &[(DescriptorType, u32)],
    ) -> Arc<DescriptorPool> {
        DescriptorPool::new(
            device.clone(),
            DescriptorPoolCreateInfo {
                flags,
                max_sets,
                pool_sizes: sizes.iter().copied().collect(),
                ..Default::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn basic_alloc() {
        let device = device();
        let layout = simple_layout(&device, DescriptorType::UniformBuffer, 2);
        let pool = pool(
            &device,
            DescriptorPoolCreateFlags::empty(),
            4,
            &[(DescriptorType::UniformBuffer, 8)],
        );

        let sets = pool
            .allocate_descriptor_sets([DescriptorSetAllocateInfo::new(layout.clone())])
            .unwrap();

        assert_eq!(sets.len(), 1);
        assert_eq!(pool.set_count(), 1);
        assert_eq!(sets[0].surface_bytes().len() as DeviceSize, layout.surface_size());
        // All descriptor bytes start as the canonical null record.
        assert!(sets[0].surface_bytes().iter().all(|&byte| byte == 0));
    }

    #[test]
    fn zero_create_info_is_rejected() {
        let device = device();
        let result = DescriptorPool::new(device, DescriptorPoolCreateInfo::default());

        assert!(matches!(result, Err(Validated::ValidationError(_))));
    }

    #[test]
    fn batch_allocation_is_all_or_nothing() {
        let device = device();
        let layout = simple_layout(&device, DescriptorType::UniformBuffer, 1);
        // Room for two sets only.
        let pool = pool(
            &device,
            DescriptorPoolCreateFlags::empty(),
            2,
            &[(DescriptorType::UniformBuffer, 2)],
        );

        let err = pool
            .allocate_descriptor_sets(vec![
                DescriptorSetAllocateInfo::new(layout.clone());
                4
            ])
            .unwrap_err();

        assert_eq!(err.unwrap(), RuntimeError::OutOfPoolMemory);
        assert_eq!(pool.set_count(), 0);

        // The failed batch returned everything, so a batch that fits now succeeds.
        let sets = pool
            .allocate_descriptor_sets(vec![
                DescriptorSetAllocateInfo::new(layout.clone());
                2
            ])
            .unwrap();
        assert_eq!(sets.len(), 2);
    }

    #[test]
    fn reset_is_idempotent_and_restores_capacity() {
        let device = device();
        let layout = simple_layout(&device, DescriptorType::StorageBuffer, 4);
        let pool = pool(
            &device,
            DescriptorPoolCreateFlags::empty(),
            3,
            &[(DescriptorType::StorageBuffer, 12)],
        );

        let _sets = pool
            .allocate_descriptor_sets(vec![
                DescriptorSetAllocateInfo::new(layout.clone());
                3
            ])
            .unwrap();

        pool.reset();
        let after_once = pool.free_sizes();
        pool.reset();
        let after_twice = pool.free_sizes();

        assert_eq!(after_once, after_twice);
        assert_eq!(pool.set_count(), 0);

        // The full configured capacity is usable again with no intervening frees.
        let sets = pool
            .allocate_descriptor_sets(vec![
                DescriptorSetAllocateInfo::new(layout.clone());
                3
            ])
            .unwrap();
        assert_eq!(sets.len(), 3);
    }

    #[test]
    fn individual_free_requires_the_flag() {
        let device = device();
        let layout = simple_layout(&device, DescriptorType::UniformBuffer, 1);

        let fixed_pool = pool(
            &device,
            DescriptorPoolCreateFlags::empty(),
            1,
            &[(DescriptorType::UniformBuffer, 1)],
        );
        let sets = fixed_pool
            .allocate_descriptor_sets([DescriptorSetAllocateInfo::new(layout.clone())])
            .unwrap();
        assert!(matches!(
            fixed_pool.free_descriptor_sets(sets),
            Err(Validated::ValidationError(_)),
        ));

        let free_pool = pool(
            &device,
            DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET,
            1,
            &[(DescriptorType::UniformBuffer, 1)],
        );

        // Free/allocate cycles of one layout succeed indefinitely.
        for _ in 0..100 {
            let sets = free_pool
                .allocate_descriptor_sets([DescriptorSetAllocateInfo::new(layout.clone())])
                .unwrap();
            free_pool.free_descriptor_sets(sets).unwrap();
        }

        assert_eq!(free_pool.set_count(), 0);
    }

    #[test]
    fn dropping_a_set_returns_its_memory_with_the_free_flag() {
        let device = device();
        let layout = simple_layout(&device, DescriptorType::UniformBuffer, 1);
        let pool = pool(
            &device,
            DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET,
            1,
            &[(DescriptorType::UniformBuffer, 1)],
        );

        for _ in 0..10 {
            let sets = pool
                .allocate_descriptor_sets([DescriptorSetAllocateInfo::new(layout.clone())])
                .unwrap();
            drop(sets);
        }

        assert_eq!(pool.set_count(), 0);
    }

    #[test]
    fn variable_count_shrinks_the_footprint() {
        let device = device();
        let layout = DescriptorSetLayout::new(
            device.clone(),
            DescriptorSetLayoutCreateInfo {
                bindings: [(
                    0,
                    DescriptorSetLayoutBinding {
                        binding_flags: DescriptorBindingFlags::VARIABLE_DESCRIPTOR_COUNT,
                        descriptor_count: 16,
                        stages: ShaderStages::FRAGMENT,
                        ..DescriptorSetLayoutBinding::descriptor_type(
                            DescriptorType::SampledImage,
                        )
                    },
                )]
                .into(),
                ..Default::default()
            },
        )
        .unwrap();

        let pool = pool(
            &device,
            DescriptorPoolCreateFlags::empty(),
            1,
            &[(DescriptorType::SampledImage, 16)],
        );

        let sets = pool
            .allocate_descriptor_sets([DescriptorSetAllocateInfo {
                variable_descriptor_count: 3,
                ..DescriptorSetAllocateInfo::new(layout.clone())
            }])
            .unwrap();

        let stride = layout.binding(0).unwrap().surface_stride;
        assert_eq!(sets[0].surface_bytes().len() as DeviceSize, 3 * stride);
        assert_eq!(sets[0].variable_descriptor_count(), 3);

        // Requesting more than the declared maximum is a validation error.
        let err = pool
            .allocate_descriptor_sets([DescriptorSetAllocateInfo {
                variable_descriptor_count: 17,
                ..DescriptorSetAllocateInfo::new(layout)
            }])
            .unwrap_err();
        assert!(matches!(err, Validated::ValidationError(_)));
    }

    #[test]
    fn immutable_sampler_layouts_bypass_the_pool() {
        let device = device();
        let samplers: Vec<_> = (0..2)
            .map(|_| Sampler::new(device.clone(), SamplerCreateInfo::default()))
            .collect();

        let layout = DescriptorSetLayout::new(
            device.clone(),
            DescriptorSetLayoutCreateInfo {
                bindings: [(
                    0,
                    DescriptorSetLayoutBinding {
                        descriptor_count: 2,
                        stages: ShaderStages::FRAGMENT,
                        immutable_samplers: samplers,
                        ..DescriptorSetLayoutBinding::descriptor_type(DescriptorType::Sampler)
                    },
                )]
                .into(),
                ..Default::default()
            },
        )
        .unwrap();

        let pool = pool(
            &device,
            DescriptorPoolCreateFlags::empty(),
            1,
            &[(DescriptorType::Sampler, 2)],
        );
        let free_before = pool.free_sizes();

        let sets = pool
            .allocate_descriptor_sets(vec![DescriptorSetAllocateInfo::new(layout.clone()); 3])
            .unwrap();

        // No pool memory was touched, and the sets are bindable without any update: the sampler
        // records were baked at layout creation.
        assert_eq!(pool.free_sizes(), free_before);
        assert_eq!(pool.set_count(), 0);
        for set in &sets {
            assert!(set.pool().is_none());
            assert_eq!(
                set.sampler_bytes().len() as DeviceSize,
                layout.sampler_size(),
            );
            assert!(set.sampler_bytes().iter().any(|&byte| byte != 0));
        }

        // Every allocation shares the same baked bytes.
        assert_eq!(sets[0].sampler_bytes(), sets[1].sampler_bytes());
    }

    #[test]
    fn update_after_bind_layouts_need_a_matching_pool() {
        let device = device();
        let layout = DescriptorSetLayout::new(
            device.clone(),
            DescriptorSetLayoutCreateInfo {
                flags: DescriptorSetLayoutCreateFlags::UPDATE_AFTER_BIND_POOL,
                bindings: [(
                    0,
                    DescriptorSetLayoutBinding {
                        binding_flags: DescriptorBindingFlags::UPDATE_AFTER_BIND,
                        stages: ShaderStages::COMPUTE,
                        ..DescriptorSetLayoutBinding::descriptor_type(
                            DescriptorType::StorageBuffer,
                        )
                    },
                )]
                .into(),
                ..Default::default()
            },
        )
        .unwrap();

        let plain_pool = pool(
            &device,
            DescriptorPoolCreateFlags::empty(),
            1,
            &[(DescriptorType::StorageBuffer, 1)],
        );
        assert!(matches!(
            plain_pool.allocate_descriptor_sets([DescriptorSetAllocateInfo::new(layout.clone())]),
            Err(Validated::ValidationError(_)),
        ));

        let matching_pool = pool(
            &device,
            DescriptorPoolCreateFlags::UPDATE_AFTER_BIND,
            1,
            &[(DescriptorType::StorageBuffer, 1)],
        );
        assert!(matching_pool
            .allocate_descriptor_sets([DescriptorSetAllocateInfo::new(layout)])
            .is_ok());
    }
}
