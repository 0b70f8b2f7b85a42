//! Bindings between shaders and the resources they access.
//!
//! # Overview
//!
//! In order to access a buffer or an image from a shader, that resource must be put in a
//! *descriptor*: a small hardware-readable record describing one bound resource. Descriptors are
//! grouped into *descriptor sets*; binding happens at set granularity, so resources that are
//! used together belong in the same set.
//!
//! There are three driver objects involved:
//!
//! - A [`DescriptorSetLayout`] describes the shape of a future descriptor set: the type, count
//!   and flags of every binding. Building it computes the exact byte offsets and strides of each
//!   binding within the two per-set hardware heaps (surface state and sampler state), which is
//!   where all of the subtlety of this subsystem lives.
//! - A [`DescriptorPool`] owns the backing memory of descriptor sets and grants/reclaims it
//!   per set or in bulk.
//! - A [`DescriptorSet`] is an allocated, writable instance of a layout. Its bytes are written
//!   through [`WriteDescriptorSet`]/[`CopyDescriptorSet`] batches, or in bulk through a
//!   [`DescriptorUpdateTemplate`].
//!
//! A layout is shared: every set allocated from it and every pipeline layout embedding it holds
//! a reference, and the layout's storage is released exactly when the last reference goes away.
//!
//! [`DescriptorSetLayout`]: layout::DescriptorSetLayout
//! [`DescriptorPool`]: pool::DescriptorPool
//! [`DescriptorUpdateTemplate`]: update_template::DescriptorUpdateTemplate

pub mod kind;
pub mod layout;
pub mod pool;
mod set;
mod update;
pub mod update_template;

pub use self::{
    set::{BoundDescriptor, DescriptorSet},
    update::{
        CopyDescriptorSet, DescriptorBufferInfo, WriteDescriptorSet, WriteDescriptorSetElements,
    },
};
