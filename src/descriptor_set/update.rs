//! Writing and copying descriptors.
//!
//! A [`WriteDescriptorSet`] carries the resource references for one binding range; applying it
//! encodes each resource into the set's heap bytes and records it in the set's CPU bookkeeping.
//! Dispatch is keyed by the binding's [`DescriptorDataKinds`], not its API-level type, so every
//! descriptor type with the same physical encoding shares one code path.

use super::{
    kind::DescriptorDataKinds,
    layout::{BindingLayout, DescriptorType},
    set::{BoundDescriptor, DescriptorSet},
};
use crate::{
    acceleration_structure::AccelerationStructure,
    buffer::{Buffer, BufferView},
    device::DeviceOwned,
    image::ImageView,
    sampler::Sampler,
    DeviceSize, NonExhaustive, ValidationError,
};
use smallvec::SmallVec;
use std::sync::Arc;

/// Represents a single write operation to the binding of a descriptor set.
///
/// `WriteDescriptorSet` specifies the binding number and target array index, and includes one or
/// more resources of a given type that need to be written to that location. Two constructors are
/// provided for each resource type: a basic variant that writes a single element to array index
/// 0, and an `_array` variant that writes several elements starting at a given array index.
#[derive(Clone, Debug)]
pub struct WriteDescriptorSet {
    binding: u32,
    first_array_element: u32,
    elements: WriteDescriptorSetElements,
}

impl WriteDescriptorSet {
    /// Write an empty element to array element 0.
    ///
    /// A descriptor written with an empty element holds the driver's canonical null records:
    /// sampling or fetching through it is defined and reads as nothing bound.
    #[inline]
    pub fn none(binding: u32) -> Self {
        Self::none_array(binding, 0, 1)
    }

    /// Write a number of consecutive empty elements.
    ///
    /// See [`none`](Self::none) for more information.
    #[inline]
    pub fn none_array(binding: u32, first_array_element: u32, num_elements: u32) -> Self {
        assert!(num_elements != 0);

        Self {
            binding,
            first_array_element,
            elements: WriteDescriptorSetElements::None(num_elements),
        }
    }

    /// Write a single buffer to array element 0, with the bound range covering the whole buffer.
    #[inline]
    pub fn buffer(binding: u32, buffer: Arc<Buffer>) -> Self {
        let range = buffer.size();
        Self::buffer_with_range_array(
            binding,
            0,
            [DescriptorBufferInfo {
                buffer,
                offset: 0,
                range,
            }],
        )
    }

    /// Write a number of consecutive buffer elements, each covering its whole buffer.
    #[inline]
    pub fn buffer_array(
        binding: u32,
        first_array_element: u32,
        elements: impl IntoIterator<Item = Arc<Buffer>>,
    ) -> Self {
        Self::buffer_with_range_array(
            binding,
            first_array_element,
            elements.into_iter().map(|buffer| {
                let range = buffer.size();
                DescriptorBufferInfo {
                    buffer,
                    offset: 0,
                    range,
                }
            }),
        )
    }

    /// Write a single buffer to array element 0, specifying the range of the buffer to be bound.
    #[inline]
    pub fn buffer_with_range(binding: u32, buffer_info: DescriptorBufferInfo) -> Self {
        Self::buffer_with_range_array(binding, 0, [buffer_info])
    }

    /// Write a number of consecutive buffer elements, specifying the range of each buffer.
    pub fn buffer_with_range_array(
        binding: u32,
        first_array_element: u32,
        elements: impl IntoIterator<Item = DescriptorBufferInfo>,
    ) -> Self {
        let elements: SmallVec<_> = elements.into_iter().collect();
        assert!(!elements.is_empty());

        Self {
            binding,
            first_array_element,
            elements: WriteDescriptorSetElements::Buffer(elements),
        }
    }

    /// Write a single buffer view to array element 0.
    #[inline]
    pub fn buffer_view(binding: u32, buffer_view: Arc<BufferView>) -> Self {
        Self::buffer_view_array(binding, 0, [buffer_view])
    }

    /// Write a number of consecutive buffer view elements.
    pub fn buffer_view_array(
        binding: u32,
        first_array_element: u32,
        elements: impl IntoIterator<Item = Arc<BufferView>>,
    ) -> Self {
        let elements: SmallVec<_> = elements.into_iter().collect();
        assert!(!elements.is_empty());

        Self {
            binding,
            first_array_element,
            elements: WriteDescriptorSetElements::BufferView(elements),
        }
    }

    /// Write a single image view to array element 0.
    #[inline]
    pub fn image_view(binding: u32, image_view: Arc<ImageView>) -> Self {
        Self::image_view_array(binding, 0, [image_view])
    }

    /// Write a number of consecutive image view elements.
    pub fn image_view_array(
        binding: u32,
        first_array_element: u32,
        elements: impl IntoIterator<Item = Arc<ImageView>>,
    ) -> Self {
        let elements: SmallVec<_> = elements.into_iter().collect();
        assert!(!elements.is_empty());

        Self {
            binding,
            first_array_element,
            elements: WriteDescriptorSetElements::ImageView(elements),
        }
    }

    /// Write a single image view and sampler to array element 0.
    #[inline]
    pub fn image_view_sampler(
        binding: u32,
        image_view: Arc<ImageView>,
        sampler: Arc<Sampler>,
    ) -> Self {
        Self::image_view_sampler_array(binding, 0, [(image_view, sampler)])
    }

    /// Write a number of consecutive image view and sampler elements.
    pub fn image_view_sampler_array(
        binding: u32,
        first_array_element: u32,
        elements: impl IntoIterator<Item = (Arc<ImageView>, Arc<Sampler>)>,
    ) -> Self {
        let elements: SmallVec<_> = elements.into_iter().collect();
        assert!(!elements.is_empty());

        Self {
            binding,
            first_array_element,
            elements: WriteDescriptorSetElements::ImageViewSampler(elements),
        }
    }

    /// Write a single sampler to array element 0.
    #[inline]
    pub fn sampler(binding: u32, sampler: Arc<Sampler>) -> Self {
        Self::sampler_array(binding, 0, [sampler])
    }

    /// Write a number of consecutive sampler elements.
    pub fn sampler_array(
        binding: u32,
        first_array_element: u32,
        elements: impl IntoIterator<Item = Arc<Sampler>>,
    ) -> Self {
        let elements: SmallVec<_> = elements.into_iter().collect();
        assert!(!elements.is_empty());

        Self {
            binding,
            first_array_element,
            elements: WriteDescriptorSetElements::Sampler(elements),
        }
    }

    /// Write data to an inline uniform block.
    ///
    /// `offset` and the length of `data` must be a multiple of 4.
    pub fn inline_uniform_block(binding: u32, offset: u32, data: Vec<u8>) -> Self {
        assert!(!data.is_empty());

        Self {
            binding,
            first_array_element: offset,
            elements: WriteDescriptorSetElements::InlineUniformBlock(data),
        }
    }

    /// Write a single acceleration structure to array element 0.
    #[inline]
    pub fn acceleration_structure(
        binding: u32,
        acceleration_structure: Arc<AccelerationStructure>,
    ) -> Self {
        Self::acceleration_structure_array(binding, 0, [acceleration_structure])
    }

    /// Write a number of consecutive acceleration structure elements.
    pub fn acceleration_structure_array(
        binding: u32,
        first_array_element: u32,
        elements: impl IntoIterator<Item = Arc<AccelerationStructure>>,
    ) -> Self {
        let elements: SmallVec<_> = elements.into_iter().collect();
        assert!(!elements.is_empty());

        Self {
            binding,
            first_array_element,
            elements: WriteDescriptorSetElements::AccelerationStructure(elements),
        }
    }

    pub(crate) fn from_elements(
        binding: u32,
        first_array_element: u32,
        elements: WriteDescriptorSetElements,
    ) -> Self {
        Self {
            binding,
            first_array_element,
            elements,
        }
    }

    /// Returns the binding number that is updated by this descriptor write.
    #[inline]
    pub fn binding(&self) -> u32 {
        self.binding
    }

    /// Returns the first array element in the binding that is updated by this descriptor write.
    ///
    /// For inline uniform block bindings, this is the byte offset into the block instead.
    #[inline]
    pub fn first_array_element(&self) -> u32 {
        self.first_array_element
    }

    /// Returns a reference to the elements held by this descriptor write.
    #[inline]
    pub fn elements(&self) -> &WriteDescriptorSetElements {
        &self.elements
    }

    pub(crate) fn validate(&self, set: &DescriptorSet) -> Result<(), Box<ValidationError>> {
        let &Self {
            binding: binding_num,
            first_array_element,
            ref elements,
        } = self;

        let Some(binding) = set.layout().binding(binding_num) else {
            return Err(ValidationError::new(
                "does not exist in the descriptor set layout",
            )
            .add_context("binding"));
        };

        if binding.descriptor_type == DescriptorType::Sampler
            && binding.has_immutable_samplers()
        {
            return Err(ValidationError::new(
                "the binding consists entirely of immutable samplers and cannot be written",
            )
            .add_context("binding"));
        }

        if binding.descriptor_type == DescriptorType::InlineUniformBlock {
            let WriteDescriptorSetElements::InlineUniformBlock(data) = elements else {
                return Err(ValidationError::new(
                    "the binding is an inline uniform block, but the elements are not inline \
                    data",
                )
                .add_context("elements"));
            };

            if first_array_element % 4 != 0 {
                return Err(ValidationError::new("is not a multiple of 4")
                    .add_context("first_array_element"));
            }

            if data.len() % 4 != 0 {
                return Err(
                    ValidationError::new("the length is not a multiple of 4")
                        .add_context("elements"),
                );
            }

            let available = set.effective_descriptor_count(binding);
            if first_array_element as usize + data.len() > available as usize {
                return Err(ValidationError::new(
                    "the written byte range extends past the size of the inline uniform block",
                )
                .add_context("elements"));
            }

            return Ok(());
        }

        let element_count = elements.len();
        let available = set.effective_descriptor_count(binding);

        if first_array_element + element_count > available {
            return Err(ValidationError::new(
                "the written element range extends past the descriptor count of the binding",
            )
            .add_context("elements"));
        }

        let candidates = binding.write_candidates();
        let compatible = match elements {
            WriteDescriptorSetElements::None(_) => true,
            WriteDescriptorSetElements::Buffer(infos) => {
                for (index, info) in infos.iter().enumerate() {
                    assert_eq!(
                        set.device(),
                        info.buffer.device(),
                        "the buffer belongs to a different device than the descriptor set",
                    );

                    if info.offset + info.range > info.buffer.size() {
                        return Err(ValidationError::new(
                            "the bound range extends past the end of the buffer",
                        )
                        .add_context(format!("elements[{}]", index)));
                    }
                }

                candidates.iter().any(|candidate| candidate.is_buffer())
            }
            WriteDescriptorSetElements::BufferView(_) => candidates.iter().any(|candidate| {
                matches!(
                    candidate,
                    DescriptorType::UniformTexelBuffer | DescriptorType::StorageTexelBuffer
                )
            }),
            WriteDescriptorSetElements::ImageView(_) => candidates.iter().any(|candidate| {
                matches!(
                    candidate,
                    DescriptorType::SampledImage
                        | DescriptorType::StorageImage
                        | DescriptorType::InputAttachment
                ) || (*candidate == DescriptorType::CombinedImageSampler
                    && binding.has_immutable_samplers())
            }),
            WriteDescriptorSetElements::ImageViewSampler(_) => {
                candidates.contains(&DescriptorType::CombinedImageSampler)
                    && !binding.has_immutable_samplers()
            }
            WriteDescriptorSetElements::Sampler(_) => {
                candidates.contains(&DescriptorType::Sampler)
                    && !binding.has_immutable_samplers()
            }
            WriteDescriptorSetElements::InlineUniformBlock(_) => false,
            WriteDescriptorSetElements::AccelerationStructure(_) => {
                candidates.contains(&DescriptorType::AccelerationStructure)
            }
        };

        if !compatible {
            return Err(ValidationError::new(format!(
                "the provided elements cannot be written to a binding of type \
                `DescriptorType::{:?}`",
                binding.descriptor_type,
            ))
            .add_context("elements"));
        }

        Ok(())
    }
}

/// The elements held by a `WriteDescriptorSet`.
#[derive(Clone, Debug)]
pub enum WriteDescriptorSetElements {
    None(u32),
    Buffer(SmallVec<[DescriptorBufferInfo; 1]>),
    BufferView(SmallVec<[Arc<BufferView>; 1]>),
    ImageView(SmallVec<[Arc<ImageView>; 1]>),
    ImageViewSampler(SmallVec<[(Arc<ImageView>, Arc<Sampler>); 1]>),
    Sampler(SmallVec<[Arc<Sampler>; 1]>),
    InlineUniformBlock(Vec<u8>),
    AccelerationStructure(SmallVec<[Arc<AccelerationStructure>; 1]>),
}

impl WriteDescriptorSetElements {
    /// Returns the number of elements.
    #[inline]
    pub fn len(&self) -> u32 {
        match self {
            Self::None(num_elements) => *num_elements,
            Self::Buffer(elements) => elements.len() as u32,
            Self::BufferView(elements) => elements.len() as u32,
            Self::ImageView(elements) => elements.len() as u32,
            Self::ImageViewSampler(elements) => elements.len() as u32,
            Self::Sampler(elements) => elements.len() as u32,
            Self::InlineUniformBlock(data) => data.len() as u32,
            Self::AccelerationStructure(elements) => elements.len() as u32,
        }
    }

    /// Returns whether there are no elements.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The buffer range bound by one buffer descriptor.
#[derive(Clone, Debug)]
pub struct DescriptorBufferInfo {
    /// The buffer to bind.
    pub buffer: Arc<Buffer>,

    /// The byte offset of the bound range within the buffer.
    pub offset: DeviceSize,

    /// The byte size of the bound range.
    pub range: DeviceSize,
}

/// Represents a copy operation of descriptors between two sets.
#[derive(Clone, Debug)]
pub struct CopyDescriptorSet {
    /// The set to copy from.
    ///
    /// There is no default value.
    pub src_set: Arc<DescriptorSet>,

    /// The binding number in `src_set` to copy from.
    ///
    /// The default value is `0`.
    pub src_binding: u32,

    /// The first array element in `src_binding` to copy from. For inline uniform block bindings,
    /// a byte offset instead.
    ///
    /// The default value is `0`.
    pub src_first_array_element: u32,

    /// The binding number in the destination set to copy into.
    ///
    /// The default value is `0`.
    pub dst_binding: u32,

    /// The first array element in `dst_binding` to copy into. For inline uniform block bindings,
    /// a byte offset instead.
    ///
    /// The default value is `0`.
    pub dst_first_array_element: u32,

    /// The number of descriptors (or bytes, for inline uniform block bindings) to copy.
    ///
    /// The default value is `1`.
    pub descriptor_count: u32,

    pub _ne: NonExhaustive,
}

impl CopyDescriptorSet {
    /// Returns a `CopyDescriptorSet` with the given source set.
    #[inline]
    pub fn new(src_set: Arc<DescriptorSet>) -> Self {
        Self {
            src_set,
            src_binding: 0,
            src_first_array_element: 0,
            dst_binding: 0,
            dst_first_array_element: 0,
            descriptor_count: 1,
            _ne: NonExhaustive(()),
        }
    }

    pub(crate) fn validate(&self, dst_set: &DescriptorSet) -> Result<(), Box<ValidationError>> {
        let &Self {
            ref src_set,
            src_binding,
            src_first_array_element,
            dst_binding,
            dst_first_array_element,
            descriptor_count,
            _ne: _,
        } = self;

        assert_eq!(
            src_set.device(),
            dst_set.device(),
            "the source set belongs to a different device than the destination set",
        );

        let Some(src) = src_set.layout().binding(src_binding) else {
            return Err(ValidationError::new(
                "does not exist in the source descriptor set layout",
            )
            .add_context("src_binding"));
        };

        let Some(dst) = dst_set.layout().binding(dst_binding) else {
            return Err(ValidationError::new(
                "does not exist in the destination descriptor set layout",
            )
            .add_context("dst_binding"));
        };

        let compatible = src
            .write_candidates()
            .iter()
            .any(|candidate| dst.write_candidates().contains(candidate));

        if !compatible {
            return Err(ValidationError::new(format!(
                "descriptors of type `DescriptorType::{:?}` cannot be copied into a binding of \
                type `DescriptorType::{:?}`",
                src.descriptor_type, dst.descriptor_type,
            ))
            .add_context("dst_binding"));
        }

        if dst.descriptor_type == DescriptorType::Sampler && dst.has_immutable_samplers() {
            return Err(ValidationError::new(
                "the destination binding consists entirely of immutable samplers and cannot \
                be written",
            )
            .add_context("dst_binding"));
        }

        if dst.descriptor_type == DescriptorType::InlineUniformBlock {
            if src_first_array_element % 4 != 0
                || dst_first_array_element % 4 != 0
                || descriptor_count % 4 != 0
            {
                return Err(ValidationError::new(
                    "the copied byte range of an inline uniform block is not aligned to 4",
                )
                .add_context("descriptor_count"));
            }
        }

        if src_first_array_element + descriptor_count
            > src_set.effective_descriptor_count(src)
        {
            return Err(ValidationError::new(
                "the copied range extends past the descriptor count of the source binding",
            )
            .add_context("descriptor_count"));
        }

        if dst_first_array_element + descriptor_count
            > dst_set.effective_descriptor_count(dst)
        {
            return Err(ValidationError::new(
                "the copied range extends past the descriptor count of the destination binding",
            )
            .add_context("descriptor_count"));
        }

        Ok(())
    }
}

/// Applies one validated write to a set: encodes the heap bytes and updates the bookkeeping.
pub(crate) fn apply_write(set: &DescriptorSet, write: &WriteDescriptorSet) {
    let layout = set.layout().clone();
    let binding = layout.binding(write.binding).unwrap();

    if let WriteDescriptorSetElements::InlineUniformBlock(data) = &write.elements {
        let offset = binding.surface_offset as usize + write.first_array_element as usize;

        set.with_surface_bytes_mut(|bytes| {
            bytes[offset..offset + data.len()].copy_from_slice(data);
        });

        return;
    }

    for index in 0..write.elements.len() {
        let element = write.first_array_element + index;
        let resource = match &write.elements {
            WriteDescriptorSetElements::None(_) => BoundDescriptor::None,
            WriteDescriptorSetElements::Buffer(infos) => {
                let info = &infos[index as usize];
                BoundDescriptor::Buffer {
                    buffer: info.buffer.clone(),
                    offset: info.offset,
                    range: info.range,
                }
            }
            WriteDescriptorSetElements::BufferView(views) => {
                BoundDescriptor::BufferView(views[index as usize].clone())
            }
            WriteDescriptorSetElements::ImageView(views) => {
                BoundDescriptor::ImageView(views[index as usize].clone())
            }
            WriteDescriptorSetElements::ImageViewSampler(pairs) => {
                let (view, sampler) = &pairs[index as usize];
                BoundDescriptor::ImageViewSampler(view.clone(), sampler.clone())
            }
            WriteDescriptorSetElements::Sampler(samplers) => {
                BoundDescriptor::Sampler(samplers[index as usize].clone())
            }
            WriteDescriptorSetElements::InlineUniformBlock(_) => unreachable!(),
            WriteDescriptorSetElements::AccelerationStructure(structures) => {
                BoundDescriptor::AccelerationStructure(structures[index as usize].clone())
            }
        };

        encode_descriptor(set, binding, element, &resource);
        set.set_resource(binding.descriptor_index as usize + element as usize, resource);
    }
}

/// Applies one validated copy: re-encodes the source's live resources into the destination.
pub(crate) fn apply_copy(dst_set: &DescriptorSet, copy: &CopyDescriptorSet) {
    let dst_layout = dst_set.layout().clone();
    let dst = dst_layout.binding(copy.dst_binding).unwrap();

    if dst.descriptor_type == DescriptorType::InlineUniformBlock {
        let src_layout = copy.src_set.layout().clone();
        let src = src_layout.binding(copy.src_binding).unwrap();

        // Read out the source bytes first: source and destination may share a pool, whose
        // storage is behind one lock.
        let src_offset = src.surface_offset as usize + copy.src_first_array_element as usize;
        let data = copy.src_set.with_surface_bytes_mut(|bytes| {
            bytes[src_offset..src_offset + copy.descriptor_count as usize].to_vec()
        });

        let dst_offset = dst.surface_offset as usize + copy.dst_first_array_element as usize;
        dst_set.with_surface_bytes_mut(|bytes| {
            bytes[dst_offset..dst_offset + data.len()].copy_from_slice(&data);
        });

        return;
    }

    for index in 0..copy.descriptor_count {
        let resource = copy
            .src_set
            .resource(copy.src_binding, copy.src_first_array_element + index)
            .unwrap_or(BoundDescriptor::None);

        let element = copy.dst_first_array_element + index;
        encode_descriptor(dst_set, dst, element, &resource);
        dst_set.set_resource(dst.descriptor_index as usize + element as usize, resource);
    }
}

/// Resolves the concrete descriptor type a resource is written as. Only relevant for mutable
/// bindings, where the first matching candidate in declaration order wins.
fn written_type(binding: &BindingLayout, resource: &BoundDescriptor) -> DescriptorType {
    let candidates = binding.write_candidates();

    let matched = match resource {
        BoundDescriptor::Buffer { .. } => {
            candidates.iter().find(|candidate| candidate.is_buffer())
        }
        BoundDescriptor::BufferView(_) => candidates.iter().find(|candidate| {
            matches!(
                candidate,
                DescriptorType::UniformTexelBuffer | DescriptorType::StorageTexelBuffer
            )
        }),
        BoundDescriptor::ImageView(_) | BoundDescriptor::ImageViewSampler(_, _) => {
            candidates.iter().find(|candidate| {
                matches!(
                    candidate,
                    DescriptorType::SampledImage
                        | DescriptorType::StorageImage
                        | DescriptorType::InputAttachment
                        | DescriptorType::CombinedImageSampler
                )
            })
        }
        BoundDescriptor::AccelerationStructure(_) => candidates
            .iter()
            .find(|&&candidate| candidate == DescriptorType::AccelerationStructure),
        BoundDescriptor::Sampler(_)
        | BoundDescriptor::None
        | BoundDescriptor::InlineUniformBlock => None,
    };

    matched.copied().unwrap_or(binding.descriptor_type)
}

/// Encodes one descriptor's records into the set's heap bytes.
///
/// Overwrites exactly the descriptor's stride in each heap the binding uses: the region is
/// zeroed first, then the live planes are encoded, so an absent resource leaves the canonical
/// null record in every plane slot.
pub(crate) fn encode_descriptor(
    set: &DescriptorSet,
    binding: &BindingLayout,
    element: u32,
    resource: &BoundDescriptor,
) {
    let device = set.device().clone();
    let encoder = device.encoder();
    let descriptor_type = written_type(binding, resource);
    let planes = binding.max_plane_count;

    if binding.surface_stride != 0 {
        let offset = binding.surface_offset + DeviceSize::from(element) * binding.surface_stride;
        let per_plane = (binding.surface_stride / DeviceSize::from(planes)) as usize;

        set.with_surface_bytes_mut(|bytes| {
            let region =
                &mut bytes[offset as usize..(offset + binding.surface_stride) as usize];
            region.fill(0);

            match resource {
                BoundDescriptor::None | BoundDescriptor::InlineUniformBlock => {
                    for plane in 0..planes as usize {
                        encoder.encode_null_surface(
                            &mut region[plane * per_plane..][..per_plane],
                        );
                    }
                }
                BoundDescriptor::ImageView(view)
                | BoundDescriptor::ImageViewSampler(view, _) => {
                    for plane in 0..planes {
                        let out = &mut region[plane as usize * per_plane..][..per_plane];

                        if plane >= view.plane_count() {
                            encoder.encode_null_surface(out);
                        } else if binding
                            .data_kinds
                            .intersects(DescriptorDataKinds::SAMPLED_IMAGE_HANDLE)
                        {
                            encoder.encode_sampled_image_handle(view.as_ref(), plane, out);
                        } else if binding
                            .data_kinds
                            .intersects(DescriptorDataKinds::STORAGE_IMAGE_HANDLE)
                            && descriptor_type == DescriptorType::StorageImage
                        {
                            encoder.encode_storage_image_handle(view.as_ref(), plane, out);
                        } else {
                            encoder.encode_image_surface(
                                descriptor_type,
                                view.as_ref(),
                                plane,
                                out,
                            );
                        }
                    }
                }
                BoundDescriptor::Buffer {
                    buffer,
                    offset: buffer_offset,
                    range,
                } => {
                    let out = &mut region[..per_plane];

                    if binding
                        .data_kinds
                        .intersects(DescriptorDataKinds::ADDRESS_RANGE)
                        && !binding.data_kinds.intersects(DescriptorDataKinds::SURFACE)
                    {
                        encoder.encode_address_range(
                            buffer.device_address() + buffer_offset,
                            *range,
                            out,
                        );
                    } else {
                        encoder.encode_buffer_surface(
                            descriptor_type,
                            buffer.as_ref(),
                            *buffer_offset,
                            *range,
                            out,
                        );
                    }
                }
                BoundDescriptor::BufferView(view) => {
                    let out = &mut region[..per_plane];

                    if binding
                        .data_kinds
                        .intersects(DescriptorDataKinds::ADDRESS_RANGE)
                        && !binding.data_kinds.intersects(DescriptorDataKinds::SURFACE)
                    {
                        encoder.encode_address_range(
                            view.buffer().device_address() + view.offset(),
                            view.range(),
                            out,
                        );
                    } else {
                        encoder.encode_texel_buffer_surface(view.as_ref(), out);
                    }
                }
                BoundDescriptor::AccelerationStructure(acceleration_structure) => {
                    encoder.encode_address_range(
                        acceleration_structure.device_address(),
                        acceleration_structure.size(),
                        &mut region[..per_plane],
                    );
                }
                BoundDescriptor::Sampler(_) => {}
            }
        });
    }

    if binding.sampler_stride != 0 && !binding.has_immutable_samplers() {
        let offset = binding.sampler_offset + DeviceSize::from(element) * binding.sampler_stride;
        let per_plane = (binding.sampler_stride / DeviceSize::from(planes)) as usize;

        set.with_sampler_bytes_mut(|bytes| {
            let region =
                &mut bytes[offset as usize..(offset + binding.sampler_stride) as usize];
            region.fill(0);

            let sampler = match resource {
                BoundDescriptor::Sampler(sampler)
                | BoundDescriptor::ImageViewSampler(_, sampler) => Some(sampler),
                _ => None,
            };

            for plane in 0..planes {
                let out = &mut region[plane as usize * per_plane..][..per_plane];

                match sampler {
                    Some(sampler) if plane < sampler.plane_count() => {
                        encoder.encode_sampler(sampler.as_ref(), plane, out);
                    }
                    // A slot with no sampler still has to sample validly.
                    _ => encoder.encode_null_sampler(out),
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        buffer::BufferCreateInfo,
        descriptor_set::{
            layout::{
                DescriptorSetLayout, DescriptorSetLayoutBinding, DescriptorSetLayoutCreateInfo,
            },
            pool::{DescriptorPool, DescriptorPoolCreateInfo, DescriptorSetAllocateInfo},
        },
        device::{Device, DeviceCreateInfo},
        image::{Format, ImageViewCreateInfo},
        sampler::SamplerCreateInfo,
        shader::ShaderStages,
        DeviceSize,
    };

    fn device() -> Arc<Device> {
        Device::new(DeviceCreateInfo::default())
    }

    fn layout_of(
        device: &Arc<Device>,
        bindings: impl IntoIterator<Item = (u32, DescriptorSetLayoutBinding)>,
    ) -> Arc<DescriptorSetLayout> {
        DescriptorSetLayout::new(
            device.clone(),
            DescriptorSetLayoutCreateInfo {
                bindings: bindings.into_iter().collect(),
                ..Default::default()
            },
        )
        .unwrap()
    }

    fn binding(descriptor_type: DescriptorType, count: u32) -> DescriptorSetLayoutBinding {
        DescriptorSetLayoutBinding {
            descriptor_count: count,
            stages: ShaderStages::all_graphics(),
            ..DescriptorSetLayoutBinding::descriptor_type(descriptor_type)
        }
    }

    fn alloc_set(device: &Arc<Device>, layout: &Arc<DescriptorSetLayout>) -> Arc<DescriptorSet> {
        let pool = DescriptorPool::new(
            device.clone(),
            DescriptorPoolCreateInfo {
                max_sets: 4,
                pool_sizes: layout
                    .descriptor_counts()
                    .iter()
                    .map(|(&descriptor_type, &count)| (descriptor_type, count * 4))
                    .collect(),
                ..Default::default()
            },
        )
        .unwrap();

        pool.allocate_descriptor_sets([DescriptorSetAllocateInfo::new(layout.clone())])
            .unwrap()
            .remove(0)
    }

    #[test]
    fn buffer_write_lands_at_the_binding_offset() {
        let device = device();
        let layout = layout_of(
            &device,
            [
                (0, binding(DescriptorType::SampledImage, 1)),
                (1, binding(DescriptorType::UniformBuffer, 2)),
            ],
        );
        let set = alloc_set(&device, &layout);

        let buffer = Buffer::new(device.clone(), BufferCreateInfo::size(1024)).unwrap();
        set.update(
            &[WriteDescriptorSet::buffer_with_range_array(
                1,
                1,
                [DescriptorBufferInfo {
                    buffer: buffer.clone(),
                    offset: 256,
                    range: 128,
                }],
            )],
            &[],
        )
        .unwrap();

        let built = layout.binding(1).unwrap();
        let element_offset = (built.surface_offset + built.surface_stride) as usize;
        let stride = built.surface_stride as usize;

        let mut expected = vec![0u8; stride];
        device.encoder().encode_buffer_surface(
            DescriptorType::UniformBuffer,
            buffer.as_ref(),
            256,
            128,
            &mut expected,
        );

        let bytes = set.surface_bytes();
        assert_eq!(&bytes[element_offset..element_offset + stride], &expected[..]);
        // Element 0 of the binding was not touched.
        assert!(bytes[built.surface_offset as usize..element_offset]
            .iter()
            .all(|&byte| byte == 0));

        assert!(matches!(
            set.resource(1, 1),
            Some(BoundDescriptor::Buffer { offset: 256, range: 128, .. }),
        ));
        assert!(matches!(set.resource(1, 0), Some(BoundDescriptor::None)));
    }

    #[test]
    fn null_write_produces_null_surface_and_default_sampler() {
        let device = device();
        let layout = layout_of(
            &device,
            [(0, binding(DescriptorType::CombinedImageSampler, 1))],
        );
        let set = alloc_set(&device, &layout);

        // Dirty the slot first so the null write has something to overwrite.
        let view = ImageView::new(
            device.clone(),
            ImageViewCreateInfo::format(Format::R8G8B8A8_UNORM),
        );
        let sampler = Sampler::new(device.clone(), SamplerCreateInfo::default());
        set.update(
            &[WriteDescriptorSet::image_view_sampler(0, view, sampler)],
            &[],
        )
        .unwrap();
        assert!(set.surface_bytes().iter().any(|&byte| byte != 0));

        set.update(&[WriteDescriptorSet::none(0)], &[]).unwrap();

        let built = layout.binding(0).unwrap();
        // Null surface record in every plane slot.
        assert!(set.surface_bytes()[..built.surface_stride as usize]
            .iter()
            .all(|&byte| byte == 0));

        // A null image is still legal to sample: the sampler slot holds a valid default.
        let mut expected = vec![0u8; built.sampler_stride as usize];
        device.encoder().encode_null_sampler(&mut expected);
        assert_eq!(
            &set.sampler_bytes()[..built.sampler_stride as usize],
            &expected[..],
        );

        assert!(matches!(set.resource(0, 0), Some(BoundDescriptor::None)));
    }

    #[test]
    fn immutable_samplers_make_sampler_writes_no_ops() {
        let device = device();
        let sampler = Sampler::new(device.clone(), SamplerCreateInfo::default());
        let layout = layout_of(
            &device,
            [(
                0,
                DescriptorSetLayoutBinding {
                    immutable_samplers: vec![sampler],
                    ..binding(DescriptorType::CombinedImageSampler, 1)
                },
            )],
        );
        let set = alloc_set(&device, &layout);

        // Pre-baked at allocation, before any update.
        let baked = set.sampler_bytes();
        assert!(baked.iter().any(|&byte| byte != 0));

        let view = ImageView::new(
            device.clone(),
            ImageViewCreateInfo::format(Format::R8G8B8A8_UNORM),
        );
        set.update(&[WriteDescriptorSet::image_view(0, view)], &[])
            .unwrap();

        // The image write landed, the sampler bytes did not move.
        assert!(set.surface_bytes().iter().any(|&byte| byte != 0));
        assert_eq!(set.sampler_bytes(), baked);
    }

    #[test]
    fn copies_reencode_the_live_resource() {
        let device = device();
        let layout = layout_of(
            &device,
            [
                (0, binding(DescriptorType::UniformBuffer, 4)),
                (1, binding(DescriptorType::InlineUniformBlock, 16)),
            ],
        );
        let src = alloc_set(&device, &layout);
        let dst = alloc_set(&device, &layout);

        let buffer = Buffer::new(device.clone(), BufferCreateInfo::size(512)).unwrap();
        src.update(
            &[
                WriteDescriptorSet::buffer_array(0, 0, [buffer.clone(), buffer.clone()]),
                WriteDescriptorSet::inline_uniform_block(1, 4, vec![7u8; 8]),
            ],
            &[],
        )
        .unwrap();

        dst.update(
            &[],
            &[
                CopyDescriptorSet {
                    src_binding: 0,
                    dst_binding: 0,
                    descriptor_count: 2,
                    ..CopyDescriptorSet::new(src.clone())
                },
                CopyDescriptorSet {
                    src_binding: 1,
                    dst_binding: 1,
                    src_first_array_element: 4,
                    dst_first_array_element: 4,
                    descriptor_count: 8,
                    ..CopyDescriptorSet::new(src.clone())
                },
            ],
        )
        .unwrap();

        assert_eq!(src.surface_bytes(), dst.surface_bytes());
        assert!(matches!(
            dst.resource(0, 1),
            Some(BoundDescriptor::Buffer { .. }),
        ));
    }

    #[test]
    fn mutable_bindings_accept_every_candidate_type() {
        let device = device();
        let layout = layout_of(
            &device,
            [(
                0,
                DescriptorSetLayoutBinding {
                    mutable_descriptor_types: vec![
                        DescriptorType::UniformBuffer,
                        DescriptorType::SampledImage,
                    ],
                    ..binding(DescriptorType::Mutable, 1)
                },
            )],
        );
        let set = alloc_set(&device, &layout);

        let buffer = Buffer::new(device.clone(), BufferCreateInfo::size(64)).unwrap();
        set.update(&[WriteDescriptorSet::buffer(0, buffer)], &[])
            .unwrap();
        let as_buffer = set.surface_bytes();

        let view = ImageView::new(
            device.clone(),
            ImageViewCreateInfo::format(Format::R8G8B8A8_UNORM),
        );
        set.update(&[WriteDescriptorSet::image_view(0, view)], &[])
            .unwrap();
        let as_image = set.surface_bytes();

        assert_ne!(as_buffer, as_image);
        assert!(matches!(
            set.resource(0, 0),
            Some(BoundDescriptor::ImageView(_)),
        ));

        // A type outside the candidate list is rejected.
        let sampler = Sampler::new(device.clone(), SamplerCreateInfo::default());
        assert!(set
            .update(&[WriteDescriptorSet::sampler(0, sampler)], &[])
            .is_err());
    }

    #[test]
    fn writes_are_validated_against_the_layout() {
        let device = device();
        let layout = layout_of(&device, [(0, binding(DescriptorType::UniformBuffer, 2))]);
        let set = alloc_set(&device, &layout);

        let buffer = Buffer::new(device.clone(), BufferCreateInfo::size(64)).unwrap();

        // Unknown binding.
        assert!(set
            .update(&[WriteDescriptorSet::buffer(7, buffer.clone())], &[])
            .is_err());

        // Array overflow.
        assert!(set
            .update(
                &[WriteDescriptorSet::buffer_array(
                    0,
                    1,
                    [buffer.clone(), buffer.clone()],
                )],
                &[],
            )
            .is_err());

        // Element kind mismatch.
        let view = ImageView::new(
            device.clone(),
            ImageViewCreateInfo::format(Format::R8G8B8A8_UNORM),
        );
        assert!(set
            .update(&[WriteDescriptorSet::image_view(0, view)], &[])
            .is_err());

        // A failed batch leaves the set untouched.
        assert!(set.surface_bytes().iter().all(|&byte| byte == 0));
    }

    #[test]
    fn inline_writes_are_byte_addressed() {
        let device = device();
        let layout = layout_of(&device, [(0, binding(DescriptorType::InlineUniformBlock, 32))]);
        let set = alloc_set(&device, &layout);

        set.update(
            &[WriteDescriptorSet::inline_uniform_block(
                0,
                8,
                vec![0xAB; 12],
            )],
            &[],
        )
        .unwrap();

        let built = layout.binding(0).unwrap();
        let base = built.surface_offset as usize;
        let bytes = set.surface_bytes();

        assert!(bytes[base..base + 8].iter().all(|&byte| byte == 0));
        assert!(bytes[base + 8..base + 20].iter().all(|&byte| byte == 0xAB));
        assert!(bytes[base + 20..base + 32].iter().all(|&byte| byte == 0));

        // Unaligned offsets and ranges past the block are rejected.
        assert!(set
            .update(
                &[WriteDescriptorSet::inline_uniform_block(0, 2, vec![0; 4])],
                &[],
            )
            .is_err());
        assert!(set
            .update(
                &[WriteDescriptorSet::inline_uniform_block(0, 28, vec![0; 8])],
                &[],
            )
            .is_err());
    }

    #[test]
    fn multi_plane_writes_null_fill_missing_planes() {
        let device = device();
        let conversion = crate::sampler::SamplerYcbcrConversion::new(
            device.clone(),
            crate::sampler::SamplerYcbcrConversionCreateInfo::format(
                Format::G8_B8_R8_3PLANE_420_UNORM,
            ),
        )
        .unwrap();
        let sampler = Sampler::new(
            device.clone(),
            SamplerCreateInfo {
                ycbcr_conversion: Some(conversion),
                ..Default::default()
            },
        );
        let layout = layout_of(
            &device,
            [(
                0,
                DescriptorSetLayoutBinding {
                    immutable_samplers: vec![sampler],
                    ..binding(DescriptorType::CombinedImageSampler, 1)
                },
            )],
        );
        let set = alloc_set(&device, &layout);

        // Write a single-plane view into a three-plane slot.
        let view = ImageView::new(
            device.clone(),
            ImageViewCreateInfo::format(Format::R8G8B8A8_UNORM),
        );
        set.update(&[WriteDescriptorSet::image_view(0, view.clone())], &[])
            .unwrap();

        let built = layout.binding(0).unwrap();
        let per_plane = (built.surface_stride / DeviceSize::from(built.max_plane_count)) as usize;
        let bytes = set.surface_bytes();

        let mut expected = vec![0u8; per_plane];
        device.encoder().encode_image_surface(
            DescriptorType::CombinedImageSampler,
            view.as_ref(),
            0,
            &mut expected,
        );

        assert_eq!(&bytes[..per_plane], &expected[..]);
        // Planes 1 and 2 hold the canonical null surface record.
        assert!(bytes[per_plane..3 * per_plane].iter().all(|&byte| byte == 0));
    }
}
