//! Classification of descriptor types into physical record kinds.
//!
//! The hardware does not care about the API-level descriptor type of a binding, only about which
//! physical records the binding occupies: surface records, sampler records, bindless handles,
//! address ranges, or raw inline bytes. The classifier maps a descriptor type and the device's
//! [`DescriptorMode`] to a [`DescriptorDataKinds`] mask; everything downstream (strides,
//! alignments, write routing) is keyed off that mask, so one code path serves every descriptor
//! type with the same physical encoding.

use super::layout::DescriptorType;
use crate::{
    device::{DescriptorMode, DeviceProperties},
    DeviceSize,
};

crate::macros::bitflags_type! {
    /// The set of physical record kinds that a binding needs.
    DescriptorDataKinds = u32;

    /// A full surface record in the surface heap.
    SURFACE = 1 << 0,

    /// A sampler record in the sampler heap.
    SAMPLER = 1 << 1,

    /// A surface record and a sampler record written together.
    COMBINED_SURFACE_SAMPLER = 1 << 2,

    /// A texel buffer view sub-object accompanies each descriptor.
    BUFFER_VIEW = 1 << 3,

    /// A bindless address range record in the surface heap.
    ADDRESS_RANGE = 1 << 4,

    /// A bindless sampled-image handle in the surface heap.
    SAMPLED_IMAGE_HANDLE = 1 << 5,

    /// A bindless storage-image handle in the surface heap.
    STORAGE_IMAGE_HANDLE = 1 << 6,

    /// Raw bytes copied directly into the surface heap.
    INLINE_UNIFORM_BLOCK = 1 << 7,
}

/// The candidate types assumed for a mutable binding that was declared without an explicit
/// candidate list.
///
/// Sizing such a binding takes the maximum over all of these, including the
/// acceleration-structure candidate, so that any later write of any candidate type fits.
pub const MUTABLE_DEFAULT_CANDIDATES: &[DescriptorType] = &[
    DescriptorType::SampledImage,
    DescriptorType::StorageImage,
    DescriptorType::UniformTexelBuffer,
    DescriptorType::StorageTexelBuffer,
    DescriptorType::UniformBuffer,
    DescriptorType::StorageBuffer,
    DescriptorType::AccelerationStructure,
];

impl DescriptorDataKinds {
    /// Returns the record kinds that a binding of type `descriptor_type` needs.
    ///
    /// For [`DescriptorType::Mutable`] this is the union over
    /// [`MUTABLE_DEFAULT_CANDIDATES`]; use [`for_candidates`](Self::for_candidates) when the
    /// binding declared an explicit candidate list.
    pub fn for_type(descriptor_type: DescriptorType, mode: DescriptorMode) -> Self {
        match mode {
            DescriptorMode::Direct => match descriptor_type {
                DescriptorType::Sampler => Self::SAMPLER,
                DescriptorType::CombinedImageSampler => Self::COMBINED_SURFACE_SAMPLER,
                DescriptorType::SampledImage
                | DescriptorType::StorageImage
                | DescriptorType::InputAttachment
                | DescriptorType::UniformBuffer
                | DescriptorType::StorageBuffer
                | DescriptorType::UniformBufferDynamic
                | DescriptorType::StorageBufferDynamic => Self::SURFACE,
                DescriptorType::UniformTexelBuffer | DescriptorType::StorageTexelBuffer => {
                    Self::SURFACE | Self::BUFFER_VIEW
                }
                DescriptorType::InlineUniformBlock => Self::INLINE_UNIFORM_BLOCK,
                DescriptorType::AccelerationStructure => Self::ADDRESS_RANGE,
                DescriptorType::Mutable => {
                    Self::for_candidates(MUTABLE_DEFAULT_CANDIDATES, mode)
                }
            },
            DescriptorMode::Indirect => match descriptor_type {
                DescriptorType::Sampler => Self::SAMPLER,
                DescriptorType::CombinedImageSampler => {
                    Self::SAMPLED_IMAGE_HANDLE | Self::SAMPLER
                }
                DescriptorType::SampledImage | DescriptorType::InputAttachment => {
                    Self::SAMPLED_IMAGE_HANDLE
                }
                DescriptorType::StorageImage => Self::STORAGE_IMAGE_HANDLE,
                DescriptorType::UniformBuffer
                | DescriptorType::StorageBuffer
                | DescriptorType::UniformBufferDynamic
                | DescriptorType::StorageBufferDynamic => Self::ADDRESS_RANGE,
                DescriptorType::UniformTexelBuffer | DescriptorType::StorageTexelBuffer => {
                    Self::ADDRESS_RANGE | Self::BUFFER_VIEW
                }
                DescriptorType::InlineUniformBlock => Self::INLINE_UNIFORM_BLOCK,
                DescriptorType::AccelerationStructure => Self::ADDRESS_RANGE,
                DescriptorType::Mutable => {
                    Self::for_candidates(MUTABLE_DEFAULT_CANDIDATES, mode)
                }
            },
        }
    }

    /// Returns the union of the record kinds of every type in `candidates`.
    pub fn for_candidates(candidates: &[DescriptorType], mode: DescriptorMode) -> Self {
        candidates
            .iter()
            .fold(Self::empty(), |kinds, &candidate| {
                kinds | Self::for_type(candidate, mode)
            })
    }

    /// Returns the per-plane byte size of this kind set's record in the surface heap.
    ///
    /// For a union of several kinds (a mutable binding) this is the maximum over the participating
    /// kinds, never the sum, because only one of them is live at a time.
    pub fn surface_record_size(self, properties: &DeviceProperties) -> DeviceSize {
        let mut size = 0;

        if self.intersects(Self::SURFACE | Self::COMBINED_SURFACE_SAMPLER) {
            size = size.max(properties.surface_record_size);
        }
        if self.intersects(Self::SAMPLED_IMAGE_HANDLE) {
            size = size.max(properties.sampled_image_handle_size);
        }
        if self.intersects(Self::STORAGE_IMAGE_HANDLE) {
            size = size.max(properties.storage_image_handle_size);
        }
        if self.intersects(Self::ADDRESS_RANGE) {
            size = size.max(properties.address_range_size);
        }

        size
    }

    /// Returns the per-plane byte size of this kind set's record in the sampler heap.
    pub fn sampler_record_size(self, properties: &DeviceProperties) -> DeviceSize {
        if self.intersects(Self::SAMPLER | Self::COMBINED_SURFACE_SAMPLER) {
            properties.sampler_record_size
        } else {
            0
        }
    }
}

/// Returns the minimum alignment of a binding's surface-heap region.
///
/// The alignment is the union of the kind-specific minimums: any buffer record in the candidate
/// set pulls in the constant-buffer alignment, inline uniform blocks use their own alignment,
/// everything else uses the base surface record alignment.
pub(crate) fn surface_region_alignment(
    kinds: DescriptorDataKinds,
    candidates: &[DescriptorType],
    properties: &DeviceProperties,
) -> DeviceSize {
    if kinds.intersects(DescriptorDataKinds::INLINE_UNIFORM_BLOCK) {
        return properties.inline_block_alignment;
    }

    let mut alignment = properties.surface_record_alignment;

    if candidates.iter().any(|candidate| candidate.is_buffer()) {
        alignment = alignment.max(properties.constant_buffer_alignment);
    }

    alignment
}

/// Returns the worst-case surface-heap bytes that `count` descriptors of `descriptor_type`
/// contribute to a pool, assuming the maximum plane count the type can reach.
pub(crate) fn pool_surface_contribution(
    descriptor_type: DescriptorType,
    count: u32,
    properties: &DeviceProperties,
) -> DeviceSize {
    if descriptor_type == DescriptorType::InlineUniformBlock {
        // The pool size count for inline uniform blocks is a byte count.
        return DeviceSize::from(count);
    }

    let kinds = DescriptorDataKinds::for_type(descriptor_type, properties.descriptor_mode);
    let planes = max_plane_count_for(descriptor_type);

    DeviceSize::from(count) * DeviceSize::from(planes) * kinds.surface_record_size(properties)
}

/// Returns the worst-case sampler-heap bytes that `count` descriptors of `descriptor_type`
/// contribute to a pool.
pub(crate) fn pool_sampler_contribution(
    descriptor_type: DescriptorType,
    count: u32,
    properties: &DeviceProperties,
) -> DeviceSize {
    let kinds = DescriptorDataKinds::for_type(descriptor_type, properties.descriptor_mode);
    let planes = max_plane_count_for(descriptor_type);

    DeviceSize::from(count) * DeviceSize::from(planes) * kinds.sampler_record_size(properties)
}

/// The largest plane count a binding of this type can be built with. Only combined image
/// samplers can carry a multi-planar sampler conversion.
fn max_plane_count_for(descriptor_type: DescriptorType) -> u32 {
    match descriptor_type {
        DescriptorType::CombinedImageSampler => 3,
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_TYPES: &[DescriptorType] = &[
        DescriptorType::Sampler,
        DescriptorType::CombinedImageSampler,
        DescriptorType::SampledImage,
        DescriptorType::StorageImage,
        DescriptorType::UniformTexelBuffer,
        DescriptorType::StorageTexelBuffer,
        DescriptorType::UniformBuffer,
        DescriptorType::StorageBuffer,
        DescriptorType::UniformBufferDynamic,
        DescriptorType::StorageBufferDynamic,
        DescriptorType::InputAttachment,
        DescriptorType::InlineUniformBlock,
        DescriptorType::AccelerationStructure,
        DescriptorType::Mutable,
    ];

    #[test]
    fn classification_is_total() {
        for &descriptor_type in ALL_TYPES {
            for mode in [DescriptorMode::Direct, DescriptorMode::Indirect] {
                let kinds = DescriptorDataKinds::for_type(descriptor_type, mode);
                assert!(
                    !kinds.is_empty(),
                    "{:?} in {:?} mode classified to nothing",
                    descriptor_type,
                    mode,
                );
            }
        }
    }

    #[test]
    fn combined_image_sampler_uses_both_heaps_in_direct_mode() {
        let properties = DeviceProperties::default();
        let kinds = DescriptorDataKinds::for_type(
            DescriptorType::CombinedImageSampler,
            DescriptorMode::Direct,
        );

        assert_eq!(
            kinds.surface_record_size(&properties),
            properties.surface_record_size,
        );
        assert_eq!(
            kinds.sampler_record_size(&properties),
            properties.sampler_record_size,
        );
    }

    #[test]
    fn buffers_become_address_ranges_in_indirect_mode() {
        for descriptor_type in [
            DescriptorType::UniformBuffer,
            DescriptorType::StorageBuffer,
            DescriptorType::UniformBufferDynamic,
            DescriptorType::StorageBufferDynamic,
        ] {
            let kinds = DescriptorDataKinds::for_type(descriptor_type, DescriptorMode::Indirect);
            assert!(kinds.contains(DescriptorDataKinds::ADDRESS_RANGE));
            assert!(!kinds.intersects(DescriptorDataKinds::SURFACE));
        }
    }

    #[test]
    fn mutable_union_takes_the_maximum_record_size() {
        let properties = DeviceProperties::default();
        let kinds = DescriptorDataKinds::for_candidates(
            &[DescriptorType::UniformBuffer, DescriptorType::AccelerationStructure],
            DescriptorMode::Direct,
        );

        assert!(kinds.contains(DescriptorDataKinds::SURFACE));
        assert!(kinds.contains(DescriptorDataKinds::ADDRESS_RANGE));
        // Maximum over the candidates, not the sum.
        assert_eq!(
            kinds.surface_record_size(&properties),
            properties
                .surface_record_size
                .max(properties.address_range_size),
        );
    }

    #[test]
    fn default_mutable_candidates_include_acceleration_structures() {
        assert!(MUTABLE_DEFAULT_CANDIDATES.contains(&DescriptorType::AccelerationStructure));

        let kinds = DescriptorDataKinds::for_type(DescriptorType::Mutable, DescriptorMode::Direct);
        assert!(kinds.contains(DescriptorDataKinds::ADDRESS_RANGE));
    }

    #[test]
    fn texel_buffers_need_buffer_view_objects_in_both_modes() {
        for mode in [DescriptorMode::Direct, DescriptorMode::Indirect] {
            for descriptor_type in [
                DescriptorType::UniformTexelBuffer,
                DescriptorType::StorageTexelBuffer,
            ] {
                let kinds = DescriptorDataKinds::for_type(descriptor_type, mode);
                assert!(kinds.contains(DescriptorDataKinds::BUFFER_VIEW));
            }
        }
    }
}
