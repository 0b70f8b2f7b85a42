//! Pipeline layouts: the sequence of descriptor set layouts a pipeline binds, plus its push
//! constant ranges.
//!
//! A pipeline layout is a thin composition object. It holds references to its set layouts, which
//! keeps them alive for as long as any pipeline needs them; everything byte-related was already
//! computed when the set layouts were built.

use crate::{
    descriptor_set::layout::DescriptorSetLayout,
    device::{Device, DeviceOwned},
    shader::ShaderStages,
    NonExhaustive, ValidationError,
};
use smallvec::SmallVec;
use std::{num::NonZeroU64, sync::Arc};

/// A range of push constants accessible to one or more shader stages.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PushConstantRange {
    /// The stages that can access the range.
    ///
    /// The default value is [`ShaderStages::empty()`], which must be overridden.
    pub stages: ShaderStages,

    /// Byte offset of the range. Must be a multiple of 4.
    ///
    /// The default value is `0`.
    pub offset: u32,

    /// Byte size of the range. Must be a multiple of 4 and nonzero.
    ///
    /// The default value is `0`, which must be overridden.
    pub size: u32,
}

impl Default for PushConstantRange {
    #[inline]
    fn default() -> Self {
        Self {
            stages: ShaderStages::empty(),
            offset: 0,
            size: 0,
        }
    }
}

/// Parameters to create a new `PipelineLayout`.
#[derive(Clone, Debug)]
pub struct PipelineLayoutCreateInfo {
    /// The descriptor set layouts that should be part of the pipeline layout, in set-number
    /// order.
    ///
    /// The default value is empty.
    pub set_layouts: Vec<Arc<DescriptorSetLayout>>,

    /// The push constant ranges accessible to shaders.
    ///
    /// The default value is empty.
    pub push_constant_ranges: Vec<PushConstantRange>,

    pub _ne: NonExhaustive,
}

impl Default for PipelineLayoutCreateInfo {
    #[inline]
    fn default() -> Self {
        Self {
            set_layouts: Vec::new(),
            push_constant_ranges: Vec::new(),
            _ne: NonExhaustive(()),
        }
    }
}

impl PipelineLayoutCreateInfo {
    pub(crate) fn validate(&self, device: &Device) -> Result<(), Box<ValidationError>> {
        let Self {
            set_layouts,
            push_constant_ranges,
            _ne: _,
        } = self;

        let properties = device.properties();

        if set_layouts.len() > properties.max_bound_descriptor_sets as usize {
            return Err(ValidationError::new(
                "the number of set layouts exceeds the `max_bound_descriptor_sets` limit",
            )
            .add_context("set_layouts"));
        }

        for (index, set_layout) in set_layouts.iter().enumerate() {
            assert_eq!(
                device,
                set_layout.device().as_ref(),
                "a set layout belongs to a different device than the pipeline layout",
            );

            if set_layout.is_push_descriptor()
                && set_layouts
                    .iter()
                    .enumerate()
                    .any(|(other, layout)| other != index && layout.is_push_descriptor())
            {
                return Err(ValidationError::new(
                    "contains more than one push descriptor set layout",
                )
                .add_context("set_layouts"));
            }
        }

        let mut seen_stages = ShaderStages::empty();

        for (index, range) in push_constant_ranges.iter().enumerate() {
            let context = || format!("push_constant_ranges[{}]", index);

            if range.stages.is_empty() {
                return Err(ValidationError::new("is empty")
                    .add_context(format!("{}.stages", context())));
            }

            if range.size == 0 || range.size % 4 != 0 || range.offset % 4 != 0 {
                return Err(ValidationError::new(
                    "the offset and size must be nonzero multiples of 4",
                )
                .add_context(context()));
            }

            if range.offset + range.size > properties.max_push_constants_size {
                return Err(ValidationError::new(
                    "the range extends past the `max_push_constants_size` limit",
                )
                .add_context(context()));
            }

            // Each shader stage may appear in at most one range.
            if seen_stages.intersects(range.stages) {
                return Err(ValidationError::new(
                    "a shader stage appears in more than one push constant range",
                )
                .add_context(context()));
            }

            seen_stages |= range.stages;
        }

        Ok(())
    }
}

/// Describes the full layout of resources bound to a pipeline: its descriptor set layouts and
/// push constant ranges.
#[derive(Debug)]
pub struct PipelineLayout {
    device: Arc<Device>,
    id: NonZeroU64,
    set_layouts: SmallVec<[Arc<DescriptorSetLayout>; 4]>,
    push_constant_ranges: SmallVec<[PushConstantRange; 4]>,
}

impl PipelineLayout {
    /// Creates a new `PipelineLayout`.
    pub fn new(
        device: Arc<Device>,
        create_info: PipelineLayoutCreateInfo,
    ) -> Result<Arc<PipelineLayout>, Box<ValidationError>> {
        create_info
            .validate(&device)
            .map_err(|err| err.add_context("create_info"))?;

        let PipelineLayoutCreateInfo {
            set_layouts,
            push_constant_ranges,
            _ne: _,
        } = create_info;

        Ok(Arc::new(PipelineLayout {
            device,
            id: Self::next_id(),
            set_layouts: set_layouts.into(),
            push_constant_ranges: push_constant_ranges.into(),
        }))
    }

    /// Returns the descriptor set layouts of the pipeline layout.
    #[inline]
    pub fn set_layouts(&self) -> &[Arc<DescriptorSetLayout>] {
        &self.set_layouts
    }

    /// Returns the push constant ranges of the pipeline layout.
    #[inline]
    pub fn push_constant_ranges(&self) -> &[PushConstantRange] {
        &self.push_constant_ranges
    }

    /// Returns whether `self` is compatible with `other` for the first `num_sets` sets.
    pub fn is_compatible_with(&self, other: &PipelineLayout, num_sets: u32) -> bool {
        let num_sets = num_sets as usize;

        if num_sets > self.set_layouts.len() || num_sets > other.set_layouts.len() {
            return false;
        }

        if self.push_constant_ranges != other.push_constant_ranges {
            return false;
        }

        self.set_layouts
            .iter()
            .zip(other.set_layouts.iter())
            .take(num_sets)
            .all(|(a, b)| a.is_compatible_with(b))
    }
}

unsafe impl DeviceOwned for PipelineLayout {
    #[inline]
    fn device(&self) -> &Arc<Device> {
        &self.device
    }
}

impl_id_counter!(PipelineLayout);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        descriptor_set::layout::{
            DescriptorSetLayoutBinding, DescriptorSetLayoutCreateInfo, DescriptorType,
        },
        device::DeviceCreateInfo,
    };

    fn device() -> Arc<Device> {
        Device::new(DeviceCreateInfo::default())
    }

    fn uniform_layout(device: &Arc<Device>) -> Arc<DescriptorSetLayout> {
        DescriptorSetLayout::new(
            device.clone(),
            DescriptorSetLayoutCreateInfo {
                bindings: [(
                    0,
                    DescriptorSetLayoutBinding {
                        stages: ShaderStages::all_graphics(),
                        ..DescriptorSetLayoutBinding::descriptor_type(
                            DescriptorType::UniformBuffer,
                        )
                    },
                )]
                .into(),
                ..Default::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn holds_references_to_its_set_layouts() {
        let device = device();
        let set_layout = uniform_layout(&device);

        let pipeline_layout = PipelineLayout::new(
            device,
            PipelineLayoutCreateInfo {
                set_layouts: vec![set_layout.clone()],
                ..Default::default()
            },
        )
        .unwrap();

        drop(set_layout);
        assert_eq!(pipeline_layout.set_layouts().len(), 1);
    }

    #[test]
    fn compatible_prefixes() {
        let device = device();
        let a = PipelineLayout::new(
            device.clone(),
            PipelineLayoutCreateInfo {
                set_layouts: vec![uniform_layout(&device)],
                ..Default::default()
            },
        )
        .unwrap();
        let b = PipelineLayout::new(
            device.clone(),
            PipelineLayoutCreateInfo {
                set_layouts: vec![uniform_layout(&device)],
                ..Default::default()
            },
        )
        .unwrap();

        assert!(a.is_compatible_with(&b, 1));
        assert!(!a.is_compatible_with(&b, 2));
    }

    #[test]
    fn overlapping_push_constant_stages_are_rejected() {
        let device = device();
        let result = PipelineLayout::new(
            device,
            PipelineLayoutCreateInfo {
                push_constant_ranges: vec![
                    PushConstantRange {
                        stages: ShaderStages::VERTEX,
                        offset: 0,
                        size: 16,
                    },
                    PushConstantRange {
                        stages: ShaderStages::VERTEX | ShaderStages::FRAGMENT,
                        offset: 16,
                        size: 16,
                    },
                ],
                ..Default::default()
            },
        );

        assert!(result.is_err());
    }
}
