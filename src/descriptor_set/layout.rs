//! Describes the layout of all descriptors within a descriptor set.
//!
//! When creating a new descriptor set, you must provide a *layout* object to create it from.
//! Building the layout computes, once, every byte figure the rest of the subsystem relies on:
//! per-binding offsets and strides within the set's surface and sampler heaps, the set's total
//! heap footprint, and the flat descriptor indices used by the write and copy paths.

use super::{
    kind::{self, DescriptorDataKinds, MUTABLE_DEFAULT_CANDIDATES},
    set::EmbeddedStorage,
};
use crate::{
    device::{Device, DeviceOwned},
    memory::align_up,
    sampler::Sampler,
    shader::ShaderStages,
    DeviceSize, NonExhaustive, Validated, ValidationError,
};
use foldhash::HashMap;
use std::{
    collections::BTreeMap,
    error::Error,
    fmt::{Display, Error as FmtError, Formatter},
    num::NonZeroU64,
    sync::{Arc, Weak},
};

/// Describes to the driver the layout of all descriptors within a descriptor set.
#[derive(Debug)]
pub struct DescriptorSetLayout {
    device: Arc<Device>,
    id: NonZeroU64,

    flags: DescriptorSetLayoutCreateFlags,
    bindings: Vec<Option<BindingLayout>>,

    descriptor_count: u32,
    buffer_view_count: u32,
    dynamic_offset_count: u32,
    total_surface_size: DeviceSize,
    total_sampler_size: DeviceSize,
    stages: ShaderStages,
    descriptor_counts: HashMap<DescriptorType, u32>,

    // Pre-baked backing storage shared by every set allocated against a layout made entirely of
    // immutable samplers. Such sets never receive writes, so one copy of the bytes serves all
    // callers and the pool heap allocator is never involved.
    embedded_storage: Option<Arc<EmbeddedStorage>>,
}

impl DescriptorSetLayout {
    /// Creates a new `DescriptorSetLayout`.
    pub fn new(
        device: Arc<Device>,
        create_info: DescriptorSetLayoutCreateInfo,
    ) -> Result<Arc<DescriptorSetLayout>, Validated<DescriptorSetLayoutCreateError>> {
        create_info
            .validate(&device)
            .map_err(|err| err.add_context("create_info"))?;

        Self::build(device, create_info)
    }

    fn build(
        device: Arc<Device>,
        create_info: DescriptorSetLayoutCreateInfo,
    ) -> Result<Arc<DescriptorSetLayout>, Validated<DescriptorSetLayoutCreateError>> {
        let DescriptorSetLayoutCreateInfo {
            flags,
            bindings: declared,
            _ne: _,
        } = create_info;

        let properties = device.properties().clone();
        let mode = properties.descriptor_mode;

        let highest_binding_num = declared.keys().copied().next_back();
        let binding_count = highest_binding_num.map_or(0, |num| num as usize + 1);

        let mut bindings: Vec<Option<BindingLayout>> = Vec::new();
        bindings.resize_with(binding_count, || None);

        let mut descriptor_count = 0u32;
        let mut buffer_view_count = 0u32;
        let mut dynamic_offset_count = 0u32;
        let mut total_surface_size = 0;
        let mut total_sampler_size = 0;
        let mut stages = ShaderStages::empty();
        let mut descriptor_counts = HashMap::default();

        // Binding regions are packed in ascending binding-number order. The order is
        // load-bearing: byte-offset queries must be reproducible across layout rebuilds.
        for (&binding_num, binding) in declared.iter() {
            if binding
                .binding_flags
                .intersects(DescriptorBindingFlags::VARIABLE_DESCRIPTOR_COUNT)
                && Some(binding_num) != highest_binding_num
            {
                return Err(Validated::Error(DescriptorSetLayoutCreateError::BindingOverflow));
            }

            let candidates: Vec<DescriptorType> =
                if binding.descriptor_type == DescriptorType::Mutable {
                    if binding.mutable_descriptor_types.is_empty() {
                        MUTABLE_DEFAULT_CANDIDATES.to_vec()
                    } else {
                        binding.mutable_descriptor_types.clone()
                    }
                } else {
                    vec![binding.descriptor_type]
                };

            let data_kinds = DescriptorDataKinds::for_candidates(&candidates, mode);

            let max_plane_count = binding
                .immutable_samplers
                .iter()
                .map(|sampler| sampler.plane_count())
                .max()
                .unwrap_or(1);

            let is_inline = binding.descriptor_type == DescriptorType::InlineUniformBlock;

            // An inline uniform block's "array size" is its byte size: the region is a flat run
            // of descriptor_count bytes, expressed here as a one-byte stride.
            let surface_stride = if is_inline {
                1
            } else {
                DeviceSize::from(max_plane_count) * data_kinds.surface_record_size(&properties)
            };
            let sampler_stride =
                DeviceSize::from(max_plane_count) * data_kinds.sampler_record_size(&properties);

            let surface_region = DeviceSize::from(binding.descriptor_count) * surface_stride;
            let sampler_region = DeviceSize::from(binding.descriptor_count) * sampler_stride;

            // Zero-sized bindings occupy a slot but contribute no bytes, and must not push the
            // totals forward through alignment.
            let surface_offset = if surface_region != 0 {
                align_up(
                    total_surface_size,
                    kind::surface_region_alignment(data_kinds, &candidates, &properties),
                )
            } else {
                total_surface_size
            };
            let sampler_offset = if sampler_region != 0 {
                align_up(total_sampler_size, properties.sampler_record_alignment)
            } else {
                total_sampler_size
            };

            total_surface_size = surface_offset + surface_region;
            total_sampler_size = sampler_offset + sampler_region;

            let descriptor_index = descriptor_count;
            descriptor_count += if is_inline { 1 } else { binding.descriptor_count };

            if data_kinds.intersects(DescriptorDataKinds::BUFFER_VIEW) {
                buffer_view_count += binding.descriptor_count;
            }

            let dynamic_offset_index = if binding.descriptor_type.is_dynamic() {
                let index = dynamic_offset_count;
                dynamic_offset_count += binding.descriptor_count;
                Some(index)
            } else {
                None
            };

            // Immutable sampler records are baked once, here, so that sets created from this
            // layout are bindable without any descriptor write touching these slots.
            let mut baked_sampler_records = Vec::new();
            if !binding.immutable_samplers.is_empty() && sampler_stride != 0 {
                let record_size = data_kinds.sampler_record_size(&properties) as usize;
                baked_sampler_records = vec![0u8; sampler_region as usize];

                for (index, sampler) in binding.immutable_samplers.iter().enumerate() {
                    let element = &mut baked_sampler_records
                        [index * sampler_stride as usize..(index + 1) * sampler_stride as usize];

                    for plane in 0..max_plane_count {
                        let out =
                            &mut element[plane as usize * record_size..][..record_size];
                        if plane < sampler.plane_count() {
                            device.encoder().encode_sampler(sampler.as_ref(), plane, out);
                        } else {
                            device.encoder().encode_null_sampler(out);
                        }
                    }
                }
            }

            stages |= binding.stages;
            if binding.descriptor_count != 0 {
                *descriptor_counts
                    .entry(binding.descriptor_type)
                    .or_default() += binding.descriptor_count;
            }

            bindings[binding_num as usize] = Some(BindingLayout {
                binding_flags: binding.binding_flags,
                descriptor_type: binding.descriptor_type,
                descriptor_count: binding.descriptor_count,
                stages: binding.stages,
                data_kinds,
                descriptor_index,
                max_plane_count,
                surface_offset,
                surface_stride,
                sampler_offset,
                sampler_stride,
                dynamic_offset_index,
                immutable_samplers: binding
                    .immutable_samplers
                    .iter()
                    .map(Arc::downgrade)
                    .collect(),
                baked_sampler_records,
                mutable_candidates: if binding.descriptor_type == DescriptorType::Mutable {
                    candidates
                } else {
                    Vec::new()
                },
            });
        }

        if dynamic_offset_count > properties.max_dynamic_buffers {
            return Err(Validated::Error(DescriptorSetLayoutCreateError::TooManyDynamicBuffers));
        }

        log::trace!(
            "created descriptor set layout: {} bindings, {} descriptors, surface {}B, sampler {}B",
            declared.len(),
            descriptor_count,
            total_surface_size,
            total_sampler_size,
        );

        let all_immutable_samplers = !declared.is_empty()
            && !flags.intersects(DescriptorSetLayoutCreateFlags::PUSH_DESCRIPTOR)
            && declared.values().all(|binding| {
                binding.descriptor_type == DescriptorType::Sampler
                    && binding.descriptor_count != 0
                    && binding.immutable_samplers.len() == binding.descriptor_count as usize
                    && binding.binding_flags.is_empty()
            });

        let embedded_storage = all_immutable_samplers.then(|| {
            Arc::new(EmbeddedStorage::new(
                total_surface_size,
                total_sampler_size,
                &bindings,
            ))
        });

        Ok(Arc::new(DescriptorSetLayout {
            device,
            id: Self::next_id(),
            flags,
            bindings,
            descriptor_count,
            buffer_view_count,
            dynamic_offset_count,
            total_surface_size,
            total_sampler_size,
            stages,
            descriptor_counts,
            embedded_storage,
        }))
    }

    /// Queries whether the device supports the given layout, without creating it.
    ///
    /// Returns `None` if the layout is unsupported. On success, the returned structure reports
    /// the maximum variable descriptor count usable with the layout.
    pub fn support(
        device: &Device,
        create_info: &DescriptorSetLayoutCreateInfo,
    ) -> Option<DescriptorSetLayoutSupport> {
        let properties = device.properties();

        let total_descriptor_count: u32 = create_info
            .bindings
            .values()
            .map(|binding| binding.descriptor_count)
            .sum();

        if total_descriptor_count > properties.max_per_set_descriptors {
            return None;
        }

        let dynamic_count: u32 = create_info
            .bindings
            .values()
            .filter(|binding| binding.descriptor_type.is_dynamic())
            .map(|binding| binding.descriptor_count)
            .sum();

        if dynamic_count > properties.max_dynamic_buffers {
            return None;
        }

        let max_variable_descriptor_count = create_info
            .bindings
            .values()
            .next_back()
            .filter(|binding| {
                binding
                    .binding_flags
                    .intersects(DescriptorBindingFlags::VARIABLE_DESCRIPTOR_COUNT)
            })
            .map_or(0, |binding| binding.descriptor_count);

        Some(DescriptorSetLayoutSupport {
            max_variable_descriptor_count,
        })
    }

    /// Returns the flags that the descriptor set layout was created with.
    #[inline]
    pub fn flags(&self) -> DescriptorSetLayoutCreateFlags {
        self.flags
    }

    /// Returns the bindings of the layout as a dense array indexed by binding number.
    ///
    /// Gaps in the declared binding numbers are `None`.
    #[inline]
    pub fn bindings(&self) -> &[Option<BindingLayout>] {
        &self.bindings
    }

    /// Returns the layout of the given binding number, if it was declared.
    #[inline]
    pub fn binding(&self, binding_num: u32) -> Option<&BindingLayout> {
        self.bindings.get(binding_num as usize)?.as_ref()
    }

    /// Returns the total number of descriptors across all bindings, with inline uniform block
    /// bindings counted as one descriptor each.
    #[inline]
    pub fn descriptor_count(&self) -> u32 {
        self.descriptor_count
    }

    /// Returns the number of texel buffer view sub-objects a set of this layout carries.
    #[inline]
    pub fn buffer_view_count(&self) -> u32 {
        self.buffer_view_count
    }

    /// Returns the number of dynamic offsets bound alongside a set of this layout.
    #[inline]
    pub fn dynamic_offset_count(&self) -> u32 {
        self.dynamic_offset_count
    }

    /// Returns the byte size of a full-size set's region in the surface heap.
    #[inline]
    pub fn surface_size(&self) -> DeviceSize {
        self.total_surface_size
    }

    /// Returns the byte size of a full-size set's region in the sampler heap.
    #[inline]
    pub fn sampler_size(&self) -> DeviceSize {
        self.total_sampler_size
    }

    /// Returns the byte offsets of the given binding's region within a set's surface and sampler
    /// heap regions.
    #[inline]
    pub fn binding_offset(&self, binding_num: u32) -> Option<(DeviceSize, DeviceSize)> {
        self.binding(binding_num)
            .map(|binding| (binding.surface_offset, binding.sampler_offset))
    }

    /// Returns the union of the shader stages of all bindings.
    #[inline]
    pub fn stages(&self) -> ShaderStages {
        self.stages
    }

    /// Returns the number of descriptors of each type.
    ///
    /// The map is guaranteed to not contain any elements with a count of `0`.
    #[inline]
    pub fn descriptor_counts(&self) -> &HashMap<DescriptorType, u32> {
        &self.descriptor_counts
    }

    /// If the highest-numbered binding has a variable count, returns its declared maximum
    /// `descriptor_count`. Otherwise returns `0`.
    pub fn variable_descriptor_count(&self) -> u32 {
        self.bindings
            .iter()
            .rev()
            .find_map(|binding| binding.as_ref())
            .map(|binding| {
                if binding
                    .binding_flags
                    .intersects(DescriptorBindingFlags::VARIABLE_DESCRIPTOR_COUNT)
                {
                    binding.descriptor_count
                } else {
                    0
                }
            })
            .unwrap_or(0)
    }

    /// Returns whether the layout was created for push descriptors.
    #[inline]
    pub fn is_push_descriptor(&self) -> bool {
        self.flags
            .intersects(DescriptorSetLayoutCreateFlags::PUSH_DESCRIPTOR)
    }

    /// Returns whether `self` is compatible with `other`: either they are the same object, or
    /// they were identically defined.
    #[inline]
    pub fn is_compatible_with(&self, other: &DescriptorSetLayout) -> bool {
        self == other || (self.flags == other.flags && self.bindings == other.bindings)
    }

    pub(crate) fn embedded_storage(&self) -> Option<&Arc<EmbeddedStorage>> {
        self.embedded_storage.as_ref()
    }
}

unsafe impl DeviceOwned for DescriptorSetLayout {
    #[inline]
    fn device(&self) -> &Arc<Device> {
        &self.device
    }
}

impl_id_counter!(DescriptorSetLayout);

/// Error that can happen when creating a `DescriptorSetLayout`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DescriptorSetLayoutCreateError {
    /// The total number of dynamic buffer descriptors exceeds the device's dynamic-offset budget.
    TooManyDynamicBuffers,

    /// A binding's descriptor range cannot be represented within the set, such as a
    /// variable-count flag on a binding other than the highest-numbered one.
    BindingOverflow,
}

impl Display for DescriptorSetLayoutCreateError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        write!(
            f,
            "{}",
            match self {
                Self::TooManyDynamicBuffers =>
                    "the total number of dynamic buffer descriptors exceeds the device budget",
                Self::BindingOverflow =>
                    "a binding's descriptor range cannot be represented within the set",
            }
        )
    }
}

impl Error for DescriptorSetLayoutCreateError {}

/// Parameters to create a new `DescriptorSetLayout`.
#[derive(Clone, Debug)]
pub struct DescriptorSetLayoutCreateInfo {
    /// Specifies how to create the descriptor set layout.
    pub flags: DescriptorSetLayoutCreateFlags,

    /// The bindings of the descriptor set layout. These are specified according to binding
    /// number.
    ///
    /// It is generally advisable to keep the binding numbers low. Higher binding numbers use
    /// more memory inside the driver.
    ///
    /// The default value is empty.
    pub bindings: BTreeMap<u32, DescriptorSetLayoutBinding>,

    pub _ne: NonExhaustive,
}

impl Default for DescriptorSetLayoutCreateInfo {
    #[inline]
    fn default() -> Self {
        Self {
            flags: DescriptorSetLayoutCreateFlags::empty(),
            bindings: BTreeMap::new(),
            _ne: NonExhaustive(()),
        }
    }
}

impl DescriptorSetLayoutCreateInfo {
    pub(crate) fn validate(&self, device: &Device) -> Result<(), Box<ValidationError>> {
        let &Self {
            flags,
            ref bindings,
            _ne: _,
        } = self;

        let mut total_descriptor_count = 0;

        for (&binding_num, binding) in bindings.iter() {
            binding
                .validate(device)
                .map_err(|err| err.add_context(format!("bindings[{}]", binding_num)))?;

            total_descriptor_count += binding.descriptor_count;

            if flags.intersects(DescriptorSetLayoutCreateFlags::PUSH_DESCRIPTOR) {
                if matches!(
                    binding.descriptor_type,
                    DescriptorType::UniformBufferDynamic
                        | DescriptorType::StorageBufferDynamic
                        | DescriptorType::InlineUniformBlock
                ) {
                    return Err(Box::new(ValidationError {
                        problem: format!(
                            "`flags` contains `DescriptorSetLayoutCreateFlags::PUSH_DESCRIPTOR`, \
                            and `bindings[{}].descriptor_type` is \
                            `DescriptorType::UniformBufferDynamic`, \
                            `DescriptorType::StorageBufferDynamic` or \
                            `DescriptorType::InlineUniformBlock`",
                            binding_num,
                        )
                        .into(),
                        ..Default::default()
                    }));
                }

                if !binding.binding_flags.is_empty() {
                    return Err(Box::new(ValidationError {
                        problem: format!(
                            "`flags` contains `DescriptorSetLayoutCreateFlags::PUSH_DESCRIPTOR`, \
                            and `bindings[{}].binding_flags` is not empty",
                            binding_num,
                        )
                        .into(),
                        ..Default::default()
                    }));
                }
            }

            if binding
                .binding_flags
                .intersects(DescriptorBindingFlags::UPDATE_AFTER_BIND)
                && !flags.intersects(DescriptorSetLayoutCreateFlags::UPDATE_AFTER_BIND_POOL)
            {
                return Err(Box::new(ValidationError {
                    problem: format!(
                        "`bindings[{}].binding_flags` contains \
                        `DescriptorBindingFlags::UPDATE_AFTER_BIND`, but `flags` does not \
                        contain `DescriptorSetLayoutCreateFlags::UPDATE_AFTER_BIND_POOL`",
                        binding_num,
                    )
                    .into(),
                    ..Default::default()
                }));
            }
        }

        if flags.intersects(DescriptorSetLayoutCreateFlags::PUSH_DESCRIPTOR)
            && total_descriptor_count > device.properties().max_push_descriptors
        {
            return Err(Box::new(ValidationError {
                problem: "`flags` contains `DescriptorSetLayoutCreateFlags::PUSH_DESCRIPTOR`, \
                    and the total number of descriptors in `bindings` exceeds the \
                    `max_push_descriptors` limit"
                    .into(),
                ..Default::default()
            }));
        }

        Ok(())
    }
}

crate::macros::bitflags_type! {
    /// Flags that control how a descriptor set layout is created.
    DescriptorSetLayoutCreateFlags = u32;

    /// Whether descriptor sets using this layout must be allocated from a descriptor pool whose
    /// flags contain `DescriptorPoolCreateFlags::UPDATE_AFTER_BIND`. Must be specified whenever
    /// the layout contains one or more bindings with the
    /// `DescriptorBindingFlags::UPDATE_AFTER_BIND` flag.
    UPDATE_AFTER_BIND_POOL = 1 << 0,

    /// Whether the layout should be created for push descriptors.
    ///
    /// If set, the layout can only be used for push descriptors, and if not set, it can only be
    /// used for regular descriptor sets. A push descriptor layout must not contain dynamic
    /// buffer or inline uniform block bindings, must not use binding flags, and is limited to
    /// the `max_push_descriptors` device limit.
    PUSH_DESCRIPTOR = 1 << 1,
}

crate::macros::bitflags_type! {
    /// Flags that control how a binding in a descriptor set layout is created.
    DescriptorBindingFlags = u32;

    /// Allows descriptors in this binding to be updated after a command buffer has already
    /// recorded a bind command containing a descriptor set with this layout, as long as the
    /// command buffer is not executing.
    ///
    /// The layout must then be created with the
    /// `DescriptorSetLayoutCreateFlags::UPDATE_AFTER_BIND_POOL` flag, and sets using it must be
    /// allocated from a pool with the `DescriptorPoolCreateFlags::UPDATE_AFTER_BIND` flag.
    UPDATE_AFTER_BIND = 1 << 0,

    /// Allows descriptors in this binding to be updated while a recorded command buffer is
    /// pending, as long as no recorded command uses the descriptor.
    UPDATE_UNUSED_WHILE_PENDING = 1 << 1,

    /// Allows descriptors to be left empty or invalid, as long as they are not dynamically used
    /// by a shader invocation.
    PARTIALLY_BOUND = 1 << 2,

    /// Whether the binding has a variable number of descriptors.
    ///
    /// The value of `descriptor_count` then specifies the maximum number of descriptors allowed;
    /// the actual count is chosen when a set is allocated. Only the binding with the highest
    /// binding number may have a variable count, and its `descriptor_type` must not be a dynamic
    /// buffer type.
    VARIABLE_DESCRIPTOR_COUNT = 1 << 3,
}

/// A binding in a descriptor set layout.
#[derive(Clone, Debug)]
pub struct DescriptorSetLayoutBinding {
    /// Specifies how to create the binding.
    ///
    /// The default value is empty.
    pub binding_flags: DescriptorBindingFlags,

    /// The content and layout of each array element of a binding.
    ///
    /// There is no default value.
    pub descriptor_type: DescriptorType,

    /// How many descriptors (array elements) this binding is made of.
    ///
    /// If `descriptor_type` is [`DescriptorType::InlineUniformBlock`], this value instead
    /// specifies the number of bytes available in the inline uniform block, and must be a
    /// multiple of 4.
    ///
    /// The default value is `1`.
    pub descriptor_count: u32,

    /// Which shader stages are going to access the descriptors in this binding.
    ///
    /// The default value is [`ShaderStages::empty()`].
    pub stages: ShaderStages,

    /// Samplers that are included as a fixed part of the descriptor set layout. Once baked, they
    /// do not need to be provided when writing the descriptor set.
    ///
    /// The list must be either empty, or contain exactly `descriptor_count` samplers. It can
    /// only be non-empty if `descriptor_type` is [`DescriptorType::Sampler`] or
    /// [`DescriptorType::CombinedImageSampler`]. If any of the samplers has an attached sampler
    /// Y′CbCr conversion, then only [`DescriptorType::CombinedImageSampler`] is allowed.
    ///
    /// The default value is empty.
    pub immutable_samplers: Vec<Arc<Sampler>>,

    /// For a [`DescriptorType::Mutable`] binding, the concrete types that descriptors in this
    /// binding may later be written with. If empty, the
    /// [`MUTABLE_DEFAULT_CANDIDATES`] list is assumed.
    ///
    /// The binding is sized for the largest candidate, so any candidate fits at write time.
    ///
    /// The default value is empty.
    pub mutable_descriptor_types: Vec<DescriptorType>,

    pub _ne: NonExhaustive,
}

impl DescriptorSetLayoutBinding {
    /// Returns a `DescriptorSetLayoutBinding` with the given type.
    #[inline]
    pub fn descriptor_type(descriptor_type: DescriptorType) -> Self {
        Self {
            binding_flags: DescriptorBindingFlags::empty(),
            descriptor_type,
            descriptor_count: 1,
            stages: ShaderStages::empty(),
            immutable_samplers: Vec::new(),
            mutable_descriptor_types: Vec::new(),
            _ne: NonExhaustive(()),
        }
    }

    pub(crate) fn validate(&self, device: &Device) -> Result<(), Box<ValidationError>> {
        let &Self {
            binding_flags,
            descriptor_type,
            descriptor_count,
            stages: _,
            ref immutable_samplers,
            ref mutable_descriptor_types,
            _ne: _,
        } = self;

        if descriptor_type == DescriptorType::InlineUniformBlock {
            if descriptor_count % 4 != 0 {
                return Err(Box::new(ValidationError {
                    problem: "`descriptor_type` is `DescriptorType::InlineUniformBlock`, and \
                        `descriptor_count` is not a multiple of 4"
                        .into(),
                    ..Default::default()
                }));
            }

            if descriptor_count > device.properties().max_inline_uniform_block_size {
                return Err(Box::new(ValidationError {
                    problem: "`descriptor_type` is `DescriptorType::InlineUniformBlock`, and \
                        `descriptor_count` is greater than the `max_inline_uniform_block_size` \
                        limit"
                        .into(),
                    ..Default::default()
                }));
            }
        }

        if !immutable_samplers.is_empty() {
            if descriptor_count != immutable_samplers.len() as u32 {
                return Err(Box::new(ValidationError {
                    problem: "`immutable_samplers` is not empty, but its length does not equal \
                        `descriptor_count`"
                        .into(),
                    ..Default::default()
                }));
            }

            let mut has_ycbcr_conversion = false;

            for sampler in immutable_samplers {
                assert_eq!(
                    device,
                    sampler.device().as_ref(),
                    "an immutable sampler belongs to a different device than the layout",
                );

                has_ycbcr_conversion |= sampler.ycbcr_conversion().is_some();
            }

            if has_ycbcr_conversion {
                if descriptor_type != DescriptorType::CombinedImageSampler {
                    return Err(Box::new(ValidationError {
                        problem: "`immutable_samplers` contains a sampler with a sampler \
                            Y\u{2032}CbCr conversion, but `descriptor_type` is not \
                            `DescriptorType::CombinedImageSampler`"
                            .into(),
                        ..Default::default()
                    }));
                }
            } else if !matches!(
                descriptor_type,
                DescriptorType::Sampler | DescriptorType::CombinedImageSampler
            ) {
                return Err(Box::new(ValidationError {
                    problem: "`immutable_samplers` is not empty, but `descriptor_type` is not \
                        `DescriptorType::Sampler` or `DescriptorType::CombinedImageSampler`"
                        .into(),
                    ..Default::default()
                }));
            }
        }

        if !mutable_descriptor_types.is_empty() {
            if descriptor_type != DescriptorType::Mutable {
                return Err(Box::new(ValidationError {
                    problem: "`mutable_descriptor_types` is not empty, but `descriptor_type` is \
                        not `DescriptorType::Mutable`"
                        .into(),
                    ..Default::default()
                }));
            }

            for &candidate in mutable_descriptor_types {
                if matches!(
                    candidate,
                    DescriptorType::Mutable
                        | DescriptorType::UniformBufferDynamic
                        | DescriptorType::StorageBufferDynamic
                        | DescriptorType::InlineUniformBlock
                ) {
                    return Err(Box::new(ValidationError {
                        problem: "`mutable_descriptor_types` contains \
                            `DescriptorType::Mutable`, a dynamic buffer type or \
                            `DescriptorType::InlineUniformBlock`"
                            .into(),
                        ..Default::default()
                    }));
                }
            }
        }

        if binding_flags.intersects(DescriptorBindingFlags::UPDATE_AFTER_BIND)
            && matches!(
                descriptor_type,
                DescriptorType::InputAttachment
                    | DescriptorType::UniformBufferDynamic
                    | DescriptorType::StorageBufferDynamic
            )
        {
            return Err(Box::new(ValidationError {
                problem: "`binding_flags` contains \
                    `DescriptorBindingFlags::UPDATE_AFTER_BIND`, and `descriptor_type` is \
                    `DescriptorType::InputAttachment`, `DescriptorType::UniformBufferDynamic` \
                    or `DescriptorType::StorageBufferDynamic`"
                    .into(),
                ..Default::default()
            }));
        }

        if binding_flags.intersects(DescriptorBindingFlags::VARIABLE_DESCRIPTOR_COUNT)
            && descriptor_type.is_dynamic()
        {
            return Err(Box::new(ValidationError {
                problem: "`binding_flags` contains \
                    `DescriptorBindingFlags::VARIABLE_DESCRIPTOR_COUNT`, and \
                    `descriptor_type` is `DescriptorType::UniformBufferDynamic` or \
                    `DescriptorType::StorageBufferDynamic`"
                    .into(),
                ..Default::default()
            }));
        }

        Ok(())
    }
}

/// The layout of one binding within a built descriptor set layout.
///
/// All offsets are relative to the start of a set's region in the respective heap. Strides are
/// per descriptor and already multiplied by [`max_plane_count`](Self::max_plane_count).
#[derive(Clone, Debug)]
pub struct BindingLayout {
    /// The flags the binding was declared with.
    pub binding_flags: DescriptorBindingFlags,

    /// The declared descriptor type.
    pub descriptor_type: DescriptorType,

    /// The declared number of descriptors. For a variable-count binding this is the maximum; for
    /// an inline uniform block it is the byte size of the block.
    pub descriptor_count: u32,

    /// The shader stages that access the binding.
    pub stages: ShaderStages,

    /// The physical record kinds the binding needs. For a mutable binding, the union over its
    /// candidate types.
    pub data_kinds: DescriptorDataKinds,

    /// The position of this binding's first descriptor within the set's flat descriptor array.
    pub descriptor_index: u32,

    /// The number of record planes per descriptor. Greater than 1 only when an immutable sampler
    /// uses a multi-planar format conversion.
    pub max_plane_count: u32,

    /// Byte offset of the binding's region within the set's surface heap region.
    pub surface_offset: DeviceSize,

    /// Byte stride between array elements in the surface heap. 1 for inline uniform blocks.
    pub surface_stride: DeviceSize,

    /// Byte offset of the binding's region within the set's sampler heap region.
    pub sampler_offset: DeviceSize,

    /// Byte stride between array elements in the sampler heap.
    pub sampler_stride: DeviceSize,

    /// The first dynamic-offset slot of the binding, for dynamic buffer types.
    pub dynamic_offset_index: Option<u32>,

    pub(crate) immutable_samplers: Vec<Weak<Sampler>>,
    pub(crate) baked_sampler_records: Vec<u8>,
    pub(crate) mutable_candidates: Vec<DescriptorType>,
}

impl BindingLayout {
    /// Returns whether the binding was declared with immutable samplers.
    #[inline]
    pub fn has_immutable_samplers(&self) -> bool {
        !self.immutable_samplers.is_empty()
    }

    /// Returns whether the binding has a variable descriptor count.
    #[inline]
    pub fn is_variable(&self) -> bool {
        self.binding_flags
            .intersects(DescriptorBindingFlags::VARIABLE_DESCRIPTOR_COUNT)
    }

    /// Returns the concrete types a write to this binding may use.
    pub(crate) fn write_candidates(&self) -> &[DescriptorType] {
        if self.descriptor_type == DescriptorType::Mutable {
            &self.mutable_candidates
        } else {
            std::slice::from_ref(&self.descriptor_type)
        }
    }
}

impl PartialEq for BindingLayout {
    fn eq(&self, other: &Self) -> bool {
        // Identity of the declaration; baked records follow from it.
        self.binding_flags == other.binding_flags
            && self.descriptor_type == other.descriptor_type
            && self.descriptor_count == other.descriptor_count
            && self.stages == other.stages
            && self.mutable_candidates == other.mutable_candidates
            && self.immutable_samplers.len() == other.immutable_samplers.len()
            && self
                .immutable_samplers
                .iter()
                .zip(other.immutable_samplers.iter())
                .all(|(a, b)| Weak::ptr_eq(a, b))
    }
}

impl Eq for BindingLayout {}

/// Describes what kind of resource may later be bound to a descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum DescriptorType {
    /// Describes how a `SampledImage` descriptor should be read.
    Sampler,

    /// Combines `SampledImage` and `Sampler` in one descriptor.
    CombinedImageSampler,

    /// Gives read-only access to an image via a sampler. The image must be combined with a
    /// sampler inside the shader.
    SampledImage,

    /// Gives read and/or write access to individual texels in an image.
    StorageImage,

    /// Gives read-only access to the content of a buffer, interpreted as an array of texel data.
    UniformTexelBuffer,

    /// Gives read and/or write access to the content of a buffer, interpreted as an array of
    /// texel data.
    StorageTexelBuffer,

    /// Gives read-only access to the content of a buffer, interpreted as a structure.
    UniformBuffer,

    /// Gives read and/or write access to the content of a buffer, interpreted as a structure.
    StorageBuffer,

    /// As `UniformBuffer`, but the offset within the buffer is specified at the time the
    /// descriptor set is bound, rather than when the descriptor set is updated.
    UniformBufferDynamic,

    /// As `StorageBuffer`, but the offset within the buffer is specified at the time the
    /// descriptor set is bound, rather than when the descriptor set is updated.
    StorageBufferDynamic,

    /// Gives access to an image inside a fragment shader via a render pass. You can only access
    /// the texel that is currently being processed by the fragment shader.
    InputAttachment,

    /// Very similar to `UniformBuffer`, but the data is written directly into an inline buffer
    /// inside the descriptor set, instead of writing a reference to a buffer.
    ///
    /// The driver acts as if every byte in the inline buffer were its own descriptor: the
    /// `descriptor_count` of the binding specifies the number of bytes available, and the
    /// `first_array_element` of a write specifies the byte offset into the block. These values
    /// must always be a multiple of 4.
    InlineUniformBlock,

    /// Gives read access to an acceleration structure, for performing ray queries.
    AccelerationStructure,

    /// A descriptor whose concrete type is chosen at write time, from the candidate list the
    /// binding was declared with.
    Mutable,
}

impl DescriptorType {
    /// Returns whether the descriptor type is one of the dynamic buffer types.
    #[inline]
    pub const fn is_dynamic(self) -> bool {
        matches!(
            self,
            DescriptorType::UniformBufferDynamic | DescriptorType::StorageBufferDynamic
        )
    }

    /// Returns whether descriptors of this type reference a plain buffer range.
    #[inline]
    pub const fn is_buffer(self) -> bool {
        matches!(
            self,
            DescriptorType::UniformBuffer
                | DescriptorType::StorageBuffer
                | DescriptorType::UniformBufferDynamic
                | DescriptorType::StorageBufferDynamic
        )
    }
}

/// Contains information about the level of support a device has for a particular descriptor set
/// layout.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct DescriptorSetLayoutSupport {
    /// If the queried layout has a binding with the
    /// [`DescriptorBindingFlags::VARIABLE_DESCRIPTOR_COUNT`] flag set, the maximum number of
    /// descriptors that binding can be allocated with. Otherwise 0.
    pub max_variable_descriptor_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        device::{DescriptorMode, DeviceCreateInfo, DeviceProperties},
        sampler::{SamplerCreateInfo, SamplerYcbcrConversion, SamplerYcbcrConversionCreateInfo},
        image::Format,
    };

    fn direct_device() -> Arc<Device> {
        Device::new(DeviceCreateInfo::default())
    }

    fn binding(
        descriptor_type: DescriptorType,
        count: u32,
    ) -> DescriptorSetLayoutBinding {
        DescriptorSetLayoutBinding {
            descriptor_count: count,
            stages: ShaderStages::all_graphics(),
            ..DescriptorSetLayoutBinding::descriptor_type(descriptor_type)
        }
    }

    #[test]
    fn empty() {
        let device = direct_device();
        let layout = DescriptorSetLayout::new(device, Default::default()).unwrap();

        assert_eq!(layout.descriptor_count(), 0);
        assert_eq!(layout.surface_size(), 0);
        assert_eq!(layout.sampler_size(), 0);
    }

    #[test]
    fn packs_bindings_in_ascending_order() {
        // One uniform buffer followed by four combined image samplers, on the default direct
        // device: 128-byte surface records aligned to 64, 32-byte sampler records.
        let device = direct_device();
        let layout = DescriptorSetLayout::new(
            device,
            DescriptorSetLayoutCreateInfo {
                bindings: [
                    (0, binding(DescriptorType::UniformBuffer, 1)),
                    (1, binding(DescriptorType::CombinedImageSampler, 4)),
                ]
                .into(),
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(layout.surface_size(), 640);
        assert_eq!(layout.sampler_size(), 128);
        assert_eq!(layout.binding_offset(0), Some((0, 0)));
        assert_eq!(layout.binding_offset(1), Some((128, 0)));
        assert_eq!(layout.descriptor_count(), 5);
        assert_eq!(
            layout.descriptor_counts(),
            &[
                (DescriptorType::UniformBuffer, 1),
                (DescriptorType::CombinedImageSampler, 4),
            ]
            .into_iter()
            .collect::<HashMap<_, _>>(),
        );
    }

    #[test]
    fn binding_ranges_stay_within_totals() {
        let device = direct_device();
        let layout = DescriptorSetLayout::new(
            device,
            DescriptorSetLayoutCreateInfo {
                bindings: [
                    (0, binding(DescriptorType::Sampler, 3)),
                    (2, binding(DescriptorType::StorageBuffer, 7)),
                    (3, binding(DescriptorType::InlineUniformBlock, 32)),
                    (5, binding(DescriptorType::UniformTexelBuffer, 2)),
                ]
                .into(),
                ..Default::default()
            },
        )
        .unwrap();

        for binding in layout.bindings().iter().flatten() {
            let surface_end = binding.surface_offset
                + DeviceSize::from(binding.descriptor_count) * binding.surface_stride;
            let sampler_end = binding.sampler_offset
                + DeviceSize::from(binding.descriptor_count) * binding.sampler_stride;

            assert!(surface_end <= layout.surface_size());
            assert!(sampler_end <= layout.sampler_size());
        }

        assert_eq!(layout.buffer_view_count(), 2);
    }

    #[test]
    fn gaps_are_representable() {
        let device = direct_device();
        let layout = DescriptorSetLayout::new(
            device,
            DescriptorSetLayoutCreateInfo {
                bindings: [(4, binding(DescriptorType::UniformBuffer, 1))].into(),
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(layout.bindings().len(), 5);
        assert!(layout.binding(0).is_none());
        assert!(layout.binding(3).is_none());
        assert!(layout.binding(4).is_some());
        assert!(layout.binding(5).is_none());
    }

    #[test]
    fn descriptor_indices_are_strictly_increasing() {
        let device = direct_device();
        let layout = DescriptorSetLayout::new(
            device,
            DescriptorSetLayoutCreateInfo {
                bindings: [
                    (0, binding(DescriptorType::SampledImage, 4)),
                    (1, binding(DescriptorType::InlineUniformBlock, 64)),
                    (2, binding(DescriptorType::StorageBuffer, 2)),
                ]
                .into(),
                ..Default::default()
            },
        )
        .unwrap();

        let indices: Vec<u32> = layout
            .bindings()
            .iter()
            .flatten()
            .map(|binding| binding.descriptor_index)
            .collect();

        // An inline uniform block counts as a single descriptor.
        assert_eq!(indices, [0, 4, 5]);
        assert_eq!(layout.descriptor_count(), 7);
    }

    #[test]
    fn zero_count_bindings_occupy_a_slot_only() {
        let device = direct_device();
        let layout = DescriptorSetLayout::new(
            device,
            DescriptorSetLayoutCreateInfo {
                bindings: [
                    (0, binding(DescriptorType::UniformBuffer, 1)),
                    (1, binding(DescriptorType::SampledImage, 0)),
                ]
                .into(),
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(layout.surface_size(), 128);
        assert_eq!(layout.descriptor_count(), 1);

        let empty = layout.binding(1).unwrap();
        assert_eq!(empty.descriptor_count, 0);
        assert!(empty.surface_offset <= layout.surface_size());
    }

    #[test]
    fn dynamic_offsets_are_budgeted() {
        let device = direct_device();

        let layout = DescriptorSetLayout::new(
            device.clone(),
            DescriptorSetLayoutCreateInfo {
                bindings: [
                    (0, binding(DescriptorType::UniformBufferDynamic, 2)),
                    (1, binding(DescriptorType::StorageBufferDynamic, 3)),
                ]
                .into(),
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(layout.dynamic_offset_count(), 5);
        assert_eq!(layout.binding(0).unwrap().dynamic_offset_index, Some(0));
        assert_eq!(layout.binding(1).unwrap().dynamic_offset_index, Some(2));

        let err = DescriptorSetLayout::new(
            device,
            DescriptorSetLayoutCreateInfo {
                bindings: [(
                    0,
                    binding(
                        DescriptorType::UniformBufferDynamic,
                        DeviceProperties::default().max_dynamic_buffers + 1,
                    ),
                )]
                .into(),
                ..Default::default()
            },
        )
        .unwrap_err();

        assert_eq!(
            err.unwrap(),
            DescriptorSetLayoutCreateError::TooManyDynamicBuffers,
        );
    }

    #[test]
    fn variable_count_must_be_the_last_binding() {
        let device = direct_device();

        let err = DescriptorSetLayout::new(
            device,
            DescriptorSetLayoutCreateInfo {
                bindings: [
                    (
                        0,
                        DescriptorSetLayoutBinding {
                            binding_flags: DescriptorBindingFlags::VARIABLE_DESCRIPTOR_COUNT,
                            ..binding(DescriptorType::SampledImage, 16)
                        },
                    ),
                    (1, binding(DescriptorType::UniformBuffer, 1)),
                ]
                .into(),
                ..Default::default()
            },
        )
        .unwrap_err();

        assert_eq!(err.unwrap(), DescriptorSetLayoutCreateError::BindingOverflow);
    }

    #[test]
    fn multi_planar_immutable_samplers_widen_the_stride() {
        let device = direct_device();
        let conversion = SamplerYcbcrConversion::new(
            device.clone(),
            SamplerYcbcrConversionCreateInfo::format(Format::G8_B8_R8_3PLANE_420_UNORM),
        )
        .unwrap();
        let sampler = crate::sampler::Sampler::new(
            device.clone(),
            SamplerCreateInfo {
                ycbcr_conversion: Some(conversion),
                ..Default::default()
            },
        );

        let layout = DescriptorSetLayout::new(
            device,
            DescriptorSetLayoutCreateInfo {
                bindings: [(
                    0,
                    DescriptorSetLayoutBinding {
                        immutable_samplers: vec![sampler],
                        ..binding(DescriptorType::CombinedImageSampler, 1)
                    },
                )]
                .into(),
                ..Default::default()
            },
        )
        .unwrap();

        let built = layout.binding(0).unwrap();
        assert_eq!(built.max_plane_count, 3);
        assert_eq!(built.surface_stride, 3 * 128);
        assert_eq!(built.sampler_stride, 3 * 32);
        assert_eq!(layout.surface_size(), 384);
        assert_eq!(layout.sampler_size(), 96);
    }

    #[test]
    fn mutable_bindings_are_sized_for_the_largest_candidate() {
        let device = direct_device();
        let layout = DescriptorSetLayout::new(
            device,
            DescriptorSetLayoutCreateInfo {
                bindings: [(
                    0,
                    DescriptorSetLayoutBinding {
                        mutable_descriptor_types: vec![
                            DescriptorType::UniformBuffer,
                            DescriptorType::SampledImage,
                        ],
                        ..binding(DescriptorType::Mutable, 2)
                    },
                )]
                .into(),
                ..Default::default()
            },
        )
        .unwrap();

        let built = layout.binding(0).unwrap();
        assert_eq!(built.surface_stride, 128);
        assert_eq!(built.sampler_stride, 0);
        assert_eq!(layout.surface_size(), 256);
    }

    #[test]
    fn support_reports_the_variable_count_maximum() {
        let device = direct_device();
        let create_info = DescriptorSetLayoutCreateInfo {
            bindings: [(
                0,
                DescriptorSetLayoutBinding {
                    binding_flags: DescriptorBindingFlags::VARIABLE_DESCRIPTOR_COUNT,
                    ..binding(DescriptorType::SampledImage, 16)
                },
            )]
            .into(),
            ..Default::default()
        };

        let support = DescriptorSetLayout::support(&device, &create_info).unwrap();
        assert_eq!(support.max_variable_descriptor_count, 16);

        let too_large = DescriptorSetLayoutCreateInfo {
            bindings: [(
                0,
                binding(
                    DescriptorType::SampledImage,
                    DeviceProperties::default().max_per_set_descriptors + 1,
                ),
            )]
            .into(),
            ..Default::default()
        };
        assert!(DescriptorSetLayout::support(&device, &too_large).is_none());
    }

    #[test]
    fn indirect_mode_shrinks_buffer_bindings() {
        let device = Device::new(DeviceCreateInfo {
            properties: DeviceProperties {
                descriptor_mode: DescriptorMode::Indirect,
                ..Default::default()
            },
            ..Default::default()
        });

        let layout = DescriptorSetLayout::new(
            device,
            DescriptorSetLayoutCreateInfo {
                bindings: [(0, binding(DescriptorType::UniformBuffer, 4))].into(),
                ..Default::default()
            },
        )
        .unwrap();

        let built = layout.binding(0).unwrap();
        assert_eq!(built.surface_stride, 16);
        assert_eq!(layout.surface_size(), 64);
    }

    #[test]
    fn identically_defined_layouts_are_compatible() {
        let device = direct_device();
        let create_info = DescriptorSetLayoutCreateInfo {
            bindings: [(0, binding(DescriptorType::StorageBuffer, 2))].into(),
            ..Default::default()
        };

        let a = DescriptorSetLayout::new(device.clone(), create_info.clone()).unwrap();
        let b = DescriptorSetLayout::new(device, create_info).unwrap();

        assert_ne!(a, b);
        assert!(a.is_compatible_with(&b));
    }

    #[test]
    fn push_descriptor_layouts_reject_dynamic_bindings() {
        let device = direct_device();
        let result = DescriptorSetLayout::new(
            device,
            DescriptorSetLayoutCreateInfo {
                flags: DescriptorSetLayoutCreateFlags::PUSH_DESCRIPTOR,
                bindings: [(0, binding(DescriptorType::UniformBufferDynamic, 1))].into(),
                ..Default::default()
            },
        );

        assert!(matches!(result, Err(Validated::ValidationError(_))));
    }
}
