//! Batched descriptor updates from a caller-supplied data blob.
//!
//! An update template is a precompiled description of how to translate an opaque byte blob into
//! a batch of descriptor writes: each entry names a binding range, a descriptor type, and where
//! in the blob that range's source structures live. Applying a template produces byte-for-byte
//! the same set contents as issuing the equivalent sequence of direct writes.
//!
//! The blob references resources by their raw driver [`Handle`](crate::handle::Handle) values,
//! resolved through the device's handle table at apply time. A raw value of zero means no
//! resource, and produces the canonical null records.

use super::{
    layout::DescriptorType,
    set::DescriptorSet,
    update::{self, DescriptorBufferInfo, WriteDescriptorSet, WriteDescriptorSetElements},
};
use crate::{
    acceleration_structure::AccelerationStructure,
    buffer::{Buffer, BufferView},
    device::{Device, DeviceOwned},
    image::ImageView,
    sampler::Sampler,
    NonExhaustive, RuntimeError, Validated, ValidationError,
};
use bytemuck::{pod_read_unaligned, Pod, Zeroable};
use smallvec::{smallvec, SmallVec};
use std::{mem::size_of, num::NonZeroU64, sync::Arc};

/// How the source stride between array elements is chosen when applying a template.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum DescriptorUpdateTemplateType {
    /// The stride declared in each entry is used.
    #[default]
    DescriptorSet,

    /// The template describes push descriptor updates: elements are tightly packed, using the
    /// fixed per-type source structure size.
    PushDescriptors,
}

/// One entry of an update template: a binding range and where its source data lives in the blob.
#[derive(Clone, Debug)]
pub struct DescriptorUpdateTemplateEntry {
    /// The binding number to write.
    pub binding: u32,

    /// The first array element to write. For inline uniform block bindings, a byte offset.
    pub first_array_element: u32,

    /// The number of descriptors to write. For inline uniform block bindings, a byte count.
    pub descriptor_count: u32,

    /// The type of descriptor to write. For a mutable binding this names the concrete type.
    pub descriptor_type: DescriptorType,

    /// Byte offset of the first source structure within the data blob.
    pub offset: usize,

    /// Byte stride between consecutive source structures. Ignored for push descriptor templates
    /// and for inline uniform block entries, whose source bytes are tightly packed.
    pub stride: usize,
}

/// Parameters to create a new `DescriptorUpdateTemplate`.
#[derive(Clone, Debug)]
pub struct DescriptorUpdateTemplateCreateInfo {
    /// The entries of the template.
    ///
    /// The default value is empty.
    pub entries: Vec<DescriptorUpdateTemplateEntry>,

    /// How source strides are chosen when the template is applied.
    ///
    /// The default value is [`DescriptorUpdateTemplateType::DescriptorSet`].
    pub template_type: DescriptorUpdateTemplateType,

    pub _ne: NonExhaustive,
}

impl Default for DescriptorUpdateTemplateCreateInfo {
    #[inline]
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            template_type: DescriptorUpdateTemplateType::DescriptorSet,
            _ne: NonExhaustive(()),
        }
    }
}

/// A precompiled description of a batch of descriptor writes.
///
/// The template stores its entries verbatim; they are not validated against any particular set
/// layout, since one template may be applied to many layout-compatible sets.
#[derive(Debug)]
pub struct DescriptorUpdateTemplate {
    device: Arc<Device>,
    id: NonZeroU64,
    entries: Vec<DescriptorUpdateTemplateEntry>,
    template_type: DescriptorUpdateTemplateType,
}

impl DescriptorUpdateTemplate {
    /// Creates a new `DescriptorUpdateTemplate`.
    pub fn new(
        device: Arc<Device>,
        create_info: DescriptorUpdateTemplateCreateInfo,
    ) -> Result<Arc<DescriptorUpdateTemplate>, Box<ValidationError>> {
        let DescriptorUpdateTemplateCreateInfo {
            entries,
            template_type,
            _ne: _,
        } = create_info;

        for (index, entry) in entries.iter().enumerate() {
            if entry.descriptor_count == 0 {
                return Err(ValidationError::new("the descriptor count is zero")
                    .add_context(format!("create_info.entries[{}]", index)));
            }

            if entry.descriptor_type == DescriptorType::InlineUniformBlock
                && (entry.first_array_element % 4 != 0 || entry.descriptor_count % 4 != 0)
            {
                return Err(ValidationError::new(
                    "the byte range of an inline uniform block entry is not aligned to 4",
                )
                .add_context(format!("create_info.entries[{}]", index)));
            }
        }

        Ok(Arc::new(DescriptorUpdateTemplate {
            device,
            id: Self::next_id(),
            entries,
            template_type,
        }))
    }

    /// Returns the entries of the template.
    #[inline]
    pub fn entries(&self) -> &[DescriptorUpdateTemplateEntry] {
        &self.entries
    }

    /// Returns the template type.
    #[inline]
    pub fn template_type(&self) -> DescriptorUpdateTemplateType {
        self.template_type
    }
}

unsafe impl DeviceOwned for DescriptorUpdateTemplate {
    #[inline]
    fn device(&self) -> &Arc<Device> {
        &self.device
    }
}

impl_id_counter!(DescriptorUpdateTemplate);

/// Source structure for image, combined image sampler and plain sampler entries.
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
#[repr(C)]
pub struct TemplateImageInfo {
    /// Raw handle of the sampler, or zero.
    pub sampler: u64,

    /// Raw handle of the image view, or zero.
    pub image_view: u64,
}

/// Source structure for buffer entries.
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
#[repr(C)]
pub struct TemplateBufferInfo {
    /// Raw handle of the buffer, or zero.
    pub buffer: u64,

    /// Byte offset of the bound range within the buffer.
    pub offset: u64,

    /// Byte size of the bound range.
    pub range: u64,
}

/// Source structure for texel buffer entries.
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
#[repr(C)]
pub struct TemplateBufferViewInfo {
    /// Raw handle of the buffer view, or zero.
    pub buffer_view: u64,
}

/// Source structure for acceleration structure entries.
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
#[repr(C)]
pub struct TemplateAccelerationStructureInfo {
    /// Raw handle of the acceleration structure, or zero.
    pub acceleration_structure: u64,
}

/// The packed source structure size used for push descriptor templates.
pub fn packed_source_stride(descriptor_type: DescriptorType) -> usize {
    match descriptor_type {
        DescriptorType::Sampler
        | DescriptorType::CombinedImageSampler
        | DescriptorType::SampledImage
        | DescriptorType::StorageImage
        | DescriptorType::InputAttachment => size_of::<TemplateImageInfo>(),
        DescriptorType::UniformTexelBuffer | DescriptorType::StorageTexelBuffer => {
            size_of::<TemplateBufferViewInfo>()
        }
        DescriptorType::UniformBuffer
        | DescriptorType::StorageBuffer
        | DescriptorType::UniformBufferDynamic
        | DescriptorType::StorageBufferDynamic => size_of::<TemplateBufferInfo>(),
        DescriptorType::InlineUniformBlock => 1,
        DescriptorType::AccelerationStructure | DescriptorType::Mutable => {
            size_of::<TemplateAccelerationStructureInfo>()
        }
    }
}

impl DescriptorSet {
    /// Updates the descriptor set from `data`, as described by `template`.
    ///
    /// The decoded writes are validated as a whole before any byte is written; on error, the set
    /// is unchanged. A raw handle in `data` that does not resolve to a live object of the
    /// expected kind fails with [`RuntimeError::InvalidExternalHandle`].
    pub fn update_with_template(
        &self,
        template: &DescriptorUpdateTemplate,
        data: &[u8],
    ) -> Result<(), Validated<RuntimeError>> {
        assert_eq!(
            self.device(),
            template.device(),
            "the update template belongs to a different device than the descriptor set",
        );

        let mut writes: SmallVec<[WriteDescriptorSet; 8]> = SmallVec::new();

        for (index, entry) in template.entries.iter().enumerate() {
            decode_entry(self, template.template_type, entry, data, &mut writes)
                .map_err(|err| match err {
                    Validated::ValidationError(err) => Validated::ValidationError(
                        err.add_context(format!("template.entries[{}]", index)),
                    ),
                    other => other,
                })?;
        }

        for (index, write) in writes.iter().enumerate() {
            write
                .validate(self)
                .map_err(|err| err.add_context(format!("template.writes[{}]", index)))?;
        }

        for write in &writes {
            update::apply_write(self, write);
        }

        Ok(())
    }
}

fn read_source<T: Pod>(
    data: &[u8],
    offset: usize,
) -> Result<T, Validated<RuntimeError>> {
    let end = offset + size_of::<T>();

    if end > data.len() {
        return Err(ValidationError::new(
            "the source structure extends past the end of the data blob",
        )
        .add_context("data")
        .into());
    }

    Ok(pod_read_unaligned(&data[offset..end]))
}

fn lookup<T>(device: &Device, raw: u64) -> Result<Option<Arc<T>>, Validated<RuntimeError>>
where
    T: std::any::Any + Send + Sync,
{
    if raw == 0 {
        return Ok(None);
    }

    device
        .handles()
        .lookup::<T>(raw)
        .map(Some)
        .map_err(Validated::Error)
}

fn decode_entry(
    set: &DescriptorSet,
    template_type: DescriptorUpdateTemplateType,
    entry: &DescriptorUpdateTemplateEntry,
    data: &[u8],
    writes: &mut SmallVec<[WriteDescriptorSet; 8]>,
) -> Result<(), Validated<RuntimeError>> {
    let device = set.device().clone();

    if entry.descriptor_type == DescriptorType::InlineUniformBlock {
        let end = entry.offset + entry.descriptor_count as usize;

        if end > data.len() {
            return Err(ValidationError::new(
                "the inline data extends past the end of the data blob",
            )
            .add_context("data")
            .into());
        }

        writes.push(WriteDescriptorSet::inline_uniform_block(
            entry.binding,
            entry.first_array_element,
            data[entry.offset..end].to_vec(),
        ));

        return Ok(());
    }

    let Some(binding) = set.layout().binding(entry.binding) else {
        return Err(ValidationError::new(
            "does not exist in the descriptor set layout",
        )
        .add_context("binding")
        .into());
    };

    let stride = match template_type {
        DescriptorUpdateTemplateType::PushDescriptors => {
            packed_source_stride(entry.descriptor_type)
        }
        DescriptorUpdateTemplateType::DescriptorSet => entry.stride,
    };

    // Each element becomes its own single-element write, which keeps mixed null and non-null
    // handles simple and produces the same bytes as the equivalent direct writes.
    for index in 0..entry.descriptor_count {
        let source_offset = entry.offset + index as usize * stride;
        let element = entry.first_array_element + index;

        let elements = match entry.descriptor_type {
            DescriptorType::Sampler => {
                let info: TemplateImageInfo = read_source(data, source_offset)?;

                match lookup::<Sampler>(&device, info.sampler)? {
                    Some(sampler) => WriteDescriptorSetElements::Sampler(smallvec![sampler]),
                    None => WriteDescriptorSetElements::None(1),
                }
            }
            DescriptorType::CombinedImageSampler => {
                let info: TemplateImageInfo = read_source(data, source_offset)?;

                match lookup::<ImageView>(&device, info.image_view)? {
                    Some(view) if binding.has_immutable_samplers() => {
                        WriteDescriptorSetElements::ImageView(smallvec![view])
                    }
                    Some(view) => match lookup::<Sampler>(&device, info.sampler)? {
                        Some(sampler) => WriteDescriptorSetElements::ImageViewSampler(
                            smallvec![(view, sampler)],
                        ),
                        None => WriteDescriptorSetElements::None(1),
                    },
                    None => WriteDescriptorSetElements::None(1),
                }
            }
            DescriptorType::SampledImage
            | DescriptorType::StorageImage
            | DescriptorType::InputAttachment => {
                let info: TemplateImageInfo = read_source(data, source_offset)?;

                match lookup::<ImageView>(&device, info.image_view)? {
                    Some(view) => WriteDescriptorSetElements::ImageView(smallvec![view]),
                    None => WriteDescriptorSetElements::None(1),
                }
            }
            DescriptorType::UniformTexelBuffer | DescriptorType::StorageTexelBuffer => {
                let info: TemplateBufferViewInfo = read_source(data, source_offset)?;

                match lookup::<BufferView>(&device, info.buffer_view)? {
                    Some(view) => WriteDescriptorSetElements::BufferView(smallvec![view]),
                    None => WriteDescriptorSetElements::None(1),
                }
            }
            DescriptorType::UniformBuffer
            | DescriptorType::StorageBuffer
            | DescriptorType::UniformBufferDynamic
            | DescriptorType::StorageBufferDynamic => {
                let info: TemplateBufferInfo = read_source(data, source_offset)?;

                match lookup::<Buffer>(&device, info.buffer)? {
                    Some(buffer) => {
                        WriteDescriptorSetElements::Buffer(smallvec![DescriptorBufferInfo {
                            buffer,
                            offset: info.offset,
                            range: info.range,
                        }])
                    }
                    None => WriteDescriptorSetElements::None(1),
                }
            }
            DescriptorType::AccelerationStructure => {
                let info: TemplateAccelerationStructureInfo = read_source(data, source_offset)?;

                match lookup::<AccelerationStructure>(&device, info.acceleration_structure)? {
                    Some(acceleration_structure) => {
                        WriteDescriptorSetElements::AccelerationStructure(smallvec![
                            acceleration_structure
                        ])
                    }
                    None => WriteDescriptorSetElements::None(1),
                }
            }
            DescriptorType::InlineUniformBlock | DescriptorType::Mutable => {
                return Err(ValidationError::new(
                    "the entry's descriptor type must be a concrete resource type",
                )
                .add_context("descriptor_type")
                .into());
            }
        };

        writes.push(WriteDescriptorSet::from_elements(
            entry.binding,
            element,
            elements,
        ));
    }

    Ok(())
}
