//! Descriptor set objects.
//!
//! A set is a CPU object bound to one layout plus an allocation inside a pool's heaps. The byte
//! contents live in the pool; the set additionally keeps one CPU bookkeeping record per
//! descriptor, storing the live resource reference, so that copies between sets and
//! introspection can find the resource and not just its encoded bytes.

use super::{
    layout::{BindingLayout, DescriptorSetLayout, DescriptorType},
    pool::{DescriptorPool, HeapKind},
    update::{self, CopyDescriptorSet, WriteDescriptorSet},
};
use crate::{
    acceleration_structure::AccelerationStructure,
    buffer::{Buffer, BufferView},
    device::{Device, DeviceOwned},
    image::ImageView,
    memory::suballocator::Suballocation,
    sampler::Sampler,
    DeviceSize, ValidationError,
};
use parking_lot::Mutex;
use std::{
    num::NonZeroU64,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

/// An allocated, writable instance of a descriptor set layout.
#[derive(Debug)]
pub struct DescriptorSet {
    id: NonZeroU64,
    layout: Arc<DescriptorSetLayout>,
    variable_descriptor_count: u32,
    allocation: SetAllocation,
    resources: Mutex<Vec<BoundDescriptor>>,
    released: AtomicBool,
}

#[derive(Debug)]
pub(crate) enum SetAllocation {
    /// Regions inside a pool's heaps.
    Pool {
        pool: Arc<DescriptorPool>,
        generation: u64,
        surface: Option<Suballocation>,
        sampler: Option<Suballocation>,
        host_size: DeviceSize,
    },

    /// Storage pre-baked at layout creation, shared by every set of an all-immutable-sampler
    /// layout.
    Embedded { storage: Arc<EmbeddedStorage> },
}

impl DescriptorSet {
    pub(crate) fn new_pooled(
        pool: Arc<DescriptorPool>,
        generation: u64,
        layout: Arc<DescriptorSetLayout>,
        variable_descriptor_count: u32,
        surface: Option<Suballocation>,
        sampler: Option<Suballocation>,
        host_size: DeviceSize,
    ) -> Arc<DescriptorSet> {
        let resources = initial_resources(&layout, variable_descriptor_count);

        let set = Arc::new(DescriptorSet {
            id: Self::next_id(),
            layout,
            variable_descriptor_count,
            allocation: SetAllocation::Pool {
                pool,
                generation,
                surface,
                sampler,
                host_size,
            },
            resources: Mutex::new(resources),
            released: AtomicBool::new(false),
        });
        set.initialize_bytes();

        set
    }

    pub(crate) fn new_embedded(
        layout: Arc<DescriptorSetLayout>,
        storage: Arc<EmbeddedStorage>,
    ) -> Arc<DescriptorSet> {
        let resources = initial_resources(&layout, 0);

        Arc::new(DescriptorSet {
            id: Self::next_id(),
            layout,
            variable_descriptor_count: 0,
            allocation: SetAllocation::Embedded { storage },
            resources: Mutex::new(resources),
            released: AtomicBool::new(false),
        })
    }

    /// All descriptor bytes start zeroed, which is the canonical null record, and immutable
    /// sampler slots are then stamped with their pre-baked records.
    fn initialize_bytes(&self) {
        self.with_surface_bytes_mut(|bytes| bytes.fill(0));
        self.with_sampler_bytes_mut(|bytes| {
            bytes.fill(0);

            for binding in self.layout.bindings().iter().flatten() {
                if binding.baked_sampler_records.is_empty() {
                    continue;
                }

                let offset = binding.sampler_offset as usize;
                let len = binding
                    .baked_sampler_records
                    .len()
                    .min(bytes.len().saturating_sub(offset));
                bytes[offset..offset + len]
                    .copy_from_slice(&binding.baked_sampler_records[..len]);
            }
        });
    }

    /// Returns the layout of this descriptor set.
    #[inline]
    pub fn layout(&self) -> &Arc<DescriptorSetLayout> {
        &self.layout
    }

    /// Returns the variable descriptor count that this descriptor set was allocated with.
    #[inline]
    pub fn variable_descriptor_count(&self) -> u32 {
        self.variable_descriptor_count
    }

    /// Returns the pool this set was allocated from, or `None` for a set of an
    /// all-immutable-sampler layout.
    #[inline]
    pub fn pool(&self) -> Option<&Arc<DescriptorPool>> {
        match &self.allocation {
            SetAllocation::Pool { pool, .. } => Some(pool),
            SetAllocation::Embedded { .. } => None,
        }
    }

    /// Returns the number of descriptors a write may address in `binding`, taking the set's
    /// variable descriptor count into account.
    pub(crate) fn effective_descriptor_count(&self, binding: &BindingLayout) -> u32 {
        if binding.is_variable() {
            self.variable_descriptor_count
        } else {
            binding.descriptor_count
        }
    }

    /// Updates the descriptor set with new values.
    ///
    /// The whole batch is validated before any byte is written; on error, the set is unchanged.
    pub fn update(
        &self,
        descriptor_writes: &[WriteDescriptorSet],
        descriptor_copies: &[CopyDescriptorSet],
    ) -> Result<(), Box<ValidationError>> {
        for (index, write) in descriptor_writes.iter().enumerate() {
            write
                .validate(self)
                .map_err(|err| err.add_context(format!("descriptor_writes[{}]", index)))?;
        }

        for (index, copy) in descriptor_copies.iter().enumerate() {
            copy.validate(self)
                .map_err(|err| err.add_context(format!("descriptor_copies[{}]", index)))?;
        }

        for write in descriptor_writes {
            update::apply_write(self, write);
        }

        for copy in descriptor_copies {
            update::apply_copy(self, copy);
        }

        Ok(())
    }

    /// Returns a copy of the bookkeeping record of one descriptor.
    ///
    /// Returns `None` if the binding does not exist or the element is out of range.
    pub fn resource(&self, binding_num: u32, array_element: u32) -> Option<BoundDescriptor> {
        let binding = self.layout.binding(binding_num)?;

        let count = if binding.descriptor_type == DescriptorType::InlineUniformBlock {
            1
        } else {
            self.effective_descriptor_count(binding)
        };
        if array_element >= count {
            return None;
        }

        let index = binding.descriptor_index as usize + array_element as usize;
        self.resources.lock().get(index).cloned()
    }

    pub(crate) fn set_resource(&self, index: usize, value: BoundDescriptor) {
        self.resources.lock()[index] = value;
    }

    /// Returns a copy of the set's bytes in the surface heap.
    pub fn surface_bytes(&self) -> Vec<u8> {
        self.with_surface_bytes_mut(|bytes| bytes.to_vec())
    }

    /// Returns a copy of the set's bytes in the sampler heap.
    pub fn sampler_bytes(&self) -> Vec<u8> {
        self.with_sampler_bytes_mut(|bytes| bytes.to_vec())
    }

    pub(crate) fn with_surface_bytes_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        self.with_heap_bytes_mut(HeapKind::Surface, f)
    }

    pub(crate) fn with_sampler_bytes_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        self.with_heap_bytes_mut(HeapKind::Sampler, f)
    }

    fn with_heap_bytes_mut<R>(&self, heap: HeapKind, f: impl FnOnce(&mut [u8]) -> R) -> R {
        assert!(
            !self.released.load(Ordering::Acquire),
            "the descriptor set was already freed",
        );

        match &self.allocation {
            SetAllocation::Pool {
                pool,
                generation,
                surface,
                sampler,
                ..
            } => {
                let region = match heap {
                    HeapKind::Surface => surface.as_ref(),
                    HeapKind::Sampler => sampler.as_ref(),
                };

                pool.with_heap_bytes(*generation, heap, region, f)
            }
            SetAllocation::Embedded { storage } => {
                let mut guard = storage.heap_bytes(heap).lock();
                f(&mut guard[..])
            }
        }
    }

    pub(crate) fn allocation(&self) -> &SetAllocation {
        &self.allocation
    }

    pub(crate) fn mark_released(&self) -> bool {
        !self.released.swap(true, Ordering::AcqRel)
    }
}

impl Drop for DescriptorSet {
    fn drop(&mut self) {
        if let SetAllocation::Pool {
            pool,
            generation,
            surface,
            sampler,
            host_size,
        } = &self.allocation
        {
            if !self.released.load(Ordering::Acquire) {
                pool.release_dropped_set(*generation, *surface, *sampler, *host_size);
            }
        }
    }
}

unsafe impl DeviceOwned for DescriptorSet {
    #[inline]
    fn device(&self) -> &Arc<Device> {
        self.layout.device()
    }
}

impl_id_counter!(DescriptorSet);

fn initial_resources(
    layout: &DescriptorSetLayout,
    variable_descriptor_count: u32,
) -> Vec<BoundDescriptor> {
    let mut resources = Vec::new();

    for binding in layout.bindings().iter().flatten() {
        let count = if binding.descriptor_type == DescriptorType::InlineUniformBlock {
            1
        } else if binding.is_variable() {
            variable_descriptor_count
        } else {
            binding.descriptor_count
        };

        for element in 0..count as usize {
            let resource = if binding.descriptor_type == DescriptorType::Sampler
                && binding.has_immutable_samplers()
            {
                binding.immutable_samplers[element]
                    .upgrade()
                    .map_or(BoundDescriptor::None, BoundDescriptor::Sampler)
            } else if binding.descriptor_type == DescriptorType::InlineUniformBlock {
                BoundDescriptor::InlineUniformBlock
            } else {
                BoundDescriptor::None
            };

            resources.push(resource);
        }
    }

    resources
}

/// The resource recorded for one descriptor of a set.
#[derive(Clone, Debug)]
pub enum BoundDescriptor {
    /// Nothing is bound, or the slot was written with a null resource.
    None,

    Sampler(Arc<Sampler>),

    ImageView(Arc<ImageView>),

    ImageViewSampler(Arc<ImageView>, Arc<Sampler>),

    Buffer {
        buffer: Arc<Buffer>,
        offset: DeviceSize,
        range: DeviceSize,
    },

    BufferView(Arc<BufferView>),

    AccelerationStructure(Arc<AccelerationStructure>),

    /// The slot belongs to an inline uniform block; its payload lives in the heap bytes.
    InlineUniformBlock,
}

/// Backing bytes for sets of an all-immutable-sampler layout, baked once at layout creation.
#[derive(Debug)]
pub struct EmbeddedStorage {
    surface: Mutex<Box<[u8]>>,
    sampler: Mutex<Box<[u8]>>,
}

impl EmbeddedStorage {
    pub(crate) fn new(
        total_surface_size: DeviceSize,
        total_sampler_size: DeviceSize,
        bindings: &[Option<BindingLayout>],
    ) -> Self {
        let surface = vec![0u8; total_surface_size as usize].into_boxed_slice();
        let mut sampler = vec![0u8; total_sampler_size as usize].into_boxed_slice();

        for binding in bindings.iter().flatten() {
            if binding.baked_sampler_records.is_empty() {
                continue;
            }

            let offset = binding.sampler_offset as usize;
            sampler[offset..offset + binding.baked_sampler_records.len()]
                .copy_from_slice(&binding.baked_sampler_records);
        }

        Self {
            surface: Mutex::new(surface),
            sampler: Mutex::new(sampler),
        }
    }

    fn heap_bytes(&self, heap: HeapKind) -> &Mutex<Box<[u8]>> {
        match heap {
            HeapKind::Surface => &self.surface,
            HeapKind::Sampler => &self.sampler,
        }
    }
}
