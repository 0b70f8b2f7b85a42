//! Image views, as seen by descriptor writes.
//!
//! Images themselves (memory binding, mip chains, tiling) are owned by another part of the
//! driver; the descriptor subsystem only consumes views, and only reads the properties that
//! affect descriptor encoding.

use crate::{
    device::{Device, DeviceOwned},
    handle::Handle,
    NonExhaustive,
};
use std::{num::NonZeroU64, sync::Arc};

/// The format of an image view, reduced to the properties the descriptor subsystem reads.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[allow(non_camel_case_types)]
pub enum Format {
    R8G8B8A8_UNORM,
    B8G8R8A8_UNORM,
    R16G16B16A16_SFLOAT,
    R32G32B32A32_SFLOAT,
    R32_UINT,
    D32_SFLOAT,
    /// A two-plane Y′CbCr format with 2x2 subsampled chroma.
    G8_B8R8_2PLANE_420_UNORM,
    /// A three-plane Y′CbCr format with 2x2 subsampled chroma.
    G8_B8_R8_3PLANE_420_UNORM,
}

impl Format {
    /// Returns the number of memory planes of the format.
    #[inline]
    pub const fn plane_count(self) -> u32 {
        match self {
            Format::G8_B8R8_2PLANE_420_UNORM => 2,
            Format::G8_B8_R8_3PLANE_420_UNORM => 3,
            _ => 1,
        }
    }
}

/// Parameters to create a new `ImageView`.
#[derive(Clone, Debug)]
pub struct ImageViewCreateInfo {
    /// The format of the view.
    ///
    /// There is no default value.
    pub format: Format,

    pub _ne: NonExhaustive,
}

impl ImageViewCreateInfo {
    /// Returns an `ImageViewCreateInfo` with the given format.
    #[inline]
    pub fn format(format: Format) -> Self {
        Self {
            format,
            _ne: NonExhaustive(()),
        }
    }
}

/// A view of an image that descriptors can reference.
#[derive(Debug)]
pub struct ImageView {
    device: Arc<Device>,
    id: NonZeroU64,
    format: Format,
}

impl ImageView {
    /// Creates a new `ImageView`.
    pub fn new(device: Arc<Device>, create_info: ImageViewCreateInfo) -> Arc<ImageView> {
        let ImageViewCreateInfo { format, _ne: _ } = create_info;

        let view = Arc::new(ImageView {
            device,
            id: Self::next_id(),
            format,
        });
        view.device.handles().register(view.id, &view);

        view
    }

    /// Returns the raw driver handle of the view, for use in update-template data blobs.
    #[inline]
    pub fn handle(&self) -> Handle {
        Handle::from_id(self.id)
    }

    /// Returns the format of the view.
    #[inline]
    pub fn format(&self) -> Format {
        self.format
    }

    /// Returns the number of memory planes of the view's format.
    #[inline]
    pub fn plane_count(&self) -> u32 {
        self.format.plane_count()
    }
}

impl Drop for ImageView {
    #[inline]
    fn drop(&mut self) {
        self.device.handles().unregister(self.id);
    }
}

unsafe impl DeviceOwned for ImageView {
    #[inline]
    fn device(&self) -> &Arc<Device> {
        &self.device
    }
}

impl_id_counter!(ImageView);
