//! Descriptor set, layout and pool management core for the karst software GPU driver.
//!
//! # Overview
//!
//! In order to access a buffer or an image from a shader, that resource must be put in a
//! *descriptor*: a small hardware-readable record describing one bound resource. Descriptors are
//! grouped into *descriptor sets*, which are allocated out of *descriptor pools* and described by
//! shared *descriptor set layouts*.
//!
//! This crate implements the CPU side of that machinery for a driver:
//!
//! - [`DescriptorSetLayout`](descriptor_set::layout::DescriptorSetLayout) turns an ordered list of
//!   binding declarations into exact byte offsets and strides within the two hardware heaps that
//!   back a set (one for surface/buffer state, one for sampler state), along with the total heap
//!   footprint of a set.
//! - [`DescriptorPool`](descriptor_set::pool::DescriptorPool) owns the backing storage for many
//!   sets and grants/reclaims it per set or in bulk.
//! - [`DescriptorSet`](descriptor_set::DescriptorSet) is a writable instance of a layout.
//!   [`WriteDescriptorSet`](descriptor_set::WriteDescriptorSet) and
//!   [`CopyDescriptorSet`](descriptor_set::CopyDescriptorSet) encode concrete resource references
//!   into a set's byte ranges, and
//!   [`DescriptorUpdateTemplate`](descriptor_set::update_template::DescriptorUpdateTemplate)
//!   batch-applies many such writes from a caller-supplied data blob.
//!
//! The actual hardware record encoding is behind the [`StateEncoder`](device::StateEncoder) seam;
//! this crate only decides how many bytes each record occupies, where those bytes live, and how
//! writes are routed. Command recording, shader compilation and presentation live elsewhere in the
//! driver.
//!
//! # Host synchronization
//!
//! Host access to a [`DescriptorPool`](descriptor_set::pool::DescriptorPool) and to the sets
//! allocated from it must be externally synchronized by the caller, matching the originating API
//! contract. The internal locks exist to make that contract memory-safe, not to make concurrent
//! use of one pool meaningful.

use std::{
    borrow::Cow,
    error::Error,
    fmt::{Display, Error as FmtError, Formatter},
};

#[macro_use]
mod macros;

pub mod acceleration_structure;
pub mod buffer;
pub mod descriptor_set;
pub mod device;
pub mod handle;
pub mod image;
pub mod memory;
pub mod pipeline_layout;
pub mod sampler;
pub mod shader;

/// Represents memory size and offset values on the device.
/// Analogous to the Rust `usize` type on the host.
pub type DeviceSize = u64;

/// A helper type for non-exhaustive structs.
///
/// This type cannot be constructed outside karst. Structs with a field of this type can only be
/// constructed by calling a constructor function or `Default::default()`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NonExhaustive(pub(crate) ());

/// The arguments or other context of a call did not meet the requirements of the operation.
#[derive(Clone, Debug, Default)]
pub struct ValidationError {
    /// The context in which the problem exists (e.g. a specific parameter).
    pub context: Cow<'static, str>,

    /// A description of the problem.
    pub problem: Cow<'static, str>,
}

impl ValidationError {
    pub(crate) fn new(problem: impl Into<Cow<'static, str>>) -> Box<Self> {
        Box::new(Self {
            context: "".into(),
            problem: problem.into(),
        })
    }

    pub(crate) fn add_context(mut self: Box<Self>, context: impl Into<Cow<'static, str>>) -> Box<Self> {
        if self.context.is_empty() {
            self.context = context.into();
        } else {
            self.context = format!("{}.{}", context.into(), self.context).into();
        }

        self
    }
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        if self.context.is_empty() {
            write!(f, "{}", self.problem)
        } else {
            write!(f, "`{}`: {}", self.context, self.problem)
        }
    }
}

impl Error for ValidationError {}

/// A wrapper for error types of functions that can return validation errors.
#[derive(Clone, Debug)]
pub enum Validated<E> {
    /// An error ocurred during execution.
    Error(E),

    /// A validation error occurred.
    ValidationError(Box<ValidationError>),
}

impl<E> Validated<E> {
    /// Maps the inner `Error` value using the provided function.
    pub fn map<F>(self, f: impl FnOnce(E) -> F) -> Validated<F> {
        match self {
            Self::Error(err) => Validated::Error(f(err)),
            Self::ValidationError(err) => Validated::ValidationError(err),
        }
    }

    /// Returns the inner `Error` value, panicking if a validation error occurred.
    #[track_caller]
    pub fn unwrap(self) -> E {
        match self {
            Self::Error(err) => err,
            Self::ValidationError(err) => {
                panic!("unexpected validation error: {}", err)
            }
        }
    }
}

impl<E> Display for Validated<E>
where
    E: Display,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        match self {
            Self::Error(err) => write!(f, "a runtime error occurred: {}", err),
            Self::ValidationError(err) => write!(f, "a validation error occurred: {}", err),
        }
    }
}

impl<E> Error for Validated<E> where E: Error {}

impl<E> From<Box<ValidationError>> for Validated<E> {
    fn from(err: Box<ValidationError>) -> Self {
        Self::ValidationError(err)
    }
}

/// An error that can happen while executing a driver entry point.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum RuntimeError {
    /// There is no memory available on the host (ie. the CPU, RAM, etc.).
    OutOfHostMemory,

    /// There is no more space available in the descriptor pool for the requested allocation.
    OutOfPoolMemory,

    /// The pool has enough total free capacity, but no single free run is large enough. Resetting
    /// the pool makes the capacity contiguous again.
    FragmentedPool,

    /// A handle did not refer to a live object of the expected kind.
    InvalidExternalHandle,
}

impl Display for RuntimeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        write!(
            f,
            "{}",
            match self {
                Self::OutOfHostMemory => "no memory available on the host",
                Self::OutOfPoolMemory => "there is no more space available in the descriptor pool",
                Self::FragmentedPool => "the descriptor pool is too fragmented",
                Self::InvalidExternalHandle =>
                    "a handle did not refer to a live object of the expected kind",
            }
        )
    }
}

impl Error for RuntimeError {}
