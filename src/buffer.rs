//! Buffers and texel buffer views, as seen by descriptor writes.

use crate::{
    device::{Device, DeviceOwned},
    handle::Handle,
    image::Format,
    DeviceSize, NonExhaustive, ValidationError,
};
use std::{num::NonZeroU64, sync::Arc};

/// Parameters to create a new `Buffer`.
#[derive(Clone, Debug)]
pub struct BufferCreateInfo {
    /// The size of the buffer in bytes.
    ///
    /// There is no default value.
    pub size: DeviceSize,

    pub _ne: NonExhaustive,
}

impl BufferCreateInfo {
    /// Returns a `BufferCreateInfo` with the given size.
    #[inline]
    pub fn size(size: DeviceSize) -> Self {
        Self {
            size,
            _ne: NonExhaustive(()),
        }
    }
}

/// A region of device-visible memory that descriptors can reference.
///
/// Memory binding and mapping are owned by another part of the driver; the descriptor subsystem
/// only reads the buffer's size and device address.
#[derive(Debug)]
pub struct Buffer {
    device: Arc<Device>,
    id: NonZeroU64,
    size: DeviceSize,
    device_address: DeviceSize,
}

impl Buffer {
    /// Creates a new `Buffer`.
    pub fn new(
        device: Arc<Device>,
        create_info: BufferCreateInfo,
    ) -> Result<Arc<Buffer>, Box<ValidationError>> {
        let BufferCreateInfo { size, _ne: _ } = create_info;

        if size == 0 {
            return Err(
                ValidationError::new("the size of a buffer must not be zero")
                    .add_context("create_info.size"),
            );
        }

        let id = Self::next_id();
        let buffer = Arc::new(Buffer {
            device,
            id,
            size,
            // Each buffer gets a disjoint 4 GiB address window; real placement is owned by the
            // device memory code.
            device_address: id.get() << 32,
        });
        buffer.device.handles().register(buffer.id, &buffer);

        Ok(buffer)
    }

    /// Returns the raw driver handle of the buffer, for use in update-template data blobs.
    #[inline]
    pub fn handle(&self) -> Handle {
        Handle::from_id(self.id)
    }

    /// Returns the size of the buffer in bytes.
    #[inline]
    pub fn size(&self) -> DeviceSize {
        self.size
    }

    /// Returns the device address of the start of the buffer.
    #[inline]
    pub fn device_address(&self) -> DeviceSize {
        self.device_address
    }
}

impl Drop for Buffer {
    #[inline]
    fn drop(&mut self) {
        self.device.handles().unregister(self.id);
    }
}

unsafe impl DeviceOwned for Buffer {
    #[inline]
    fn device(&self) -> &Arc<Device> {
        &self.device
    }
}

impl_id_counter!(Buffer);

/// Parameters to create a new `BufferView`.
#[derive(Clone, Debug)]
pub struct BufferViewCreateInfo {
    /// The texel format of the view.
    ///
    /// There is no default value.
    pub format: Format,

    /// The byte offset of the view within the buffer.
    ///
    /// The default value is `0`.
    pub offset: DeviceSize,

    /// The byte size of the view.
    ///
    /// There is no default value.
    pub range: DeviceSize,

    pub _ne: NonExhaustive,
}

impl BufferViewCreateInfo {
    /// Returns a `BufferViewCreateInfo` with the given format, covering `range` bytes at offset
    /// zero.
    #[inline]
    pub fn format_range(format: Format, range: DeviceSize) -> Self {
        Self {
            format,
            offset: 0,
            range,
            _ne: NonExhaustive(()),
        }
    }
}

/// A view of a buffer's contents interpreted as an array of texels.
#[derive(Debug)]
pub struct BufferView {
    id: NonZeroU64,
    buffer: Arc<Buffer>,
    format: Format,
    offset: DeviceSize,
    range: DeviceSize,
}

impl BufferView {
    /// Creates a new `BufferView`.
    pub fn new(
        buffer: Arc<Buffer>,
        create_info: BufferViewCreateInfo,
    ) -> Result<Arc<BufferView>, Box<ValidationError>> {
        let BufferViewCreateInfo {
            format,
            offset,
            range,
            _ne: _,
        } = create_info;

        if range == 0 {
            return Err(
                ValidationError::new("the range of a buffer view must not be zero")
                    .add_context("create_info.range"),
            );
        }

        if offset + range > buffer.size() {
            return Err(ValidationError::new(
                "the view range extends past the end of the buffer",
            )
            .add_context("create_info.range"));
        }

        let view = Arc::new(BufferView {
            id: Self::next_id(),
            buffer,
            format,
            offset,
            range,
        });
        view.device().handles().register(view.id, &view);

        Ok(view)
    }

    /// Returns the raw driver handle of the view, for use in update-template data blobs.
    #[inline]
    pub fn handle(&self) -> Handle {
        Handle::from_id(self.id)
    }

    /// Returns the buffer that the view was created from.
    #[inline]
    pub fn buffer(&self) -> &Arc<Buffer> {
        &self.buffer
    }

    /// Returns the texel format of the view.
    #[inline]
    pub fn format(&self) -> Format {
        self.format
    }

    /// Returns the byte offset of the view within the buffer.
    #[inline]
    pub fn offset(&self) -> DeviceSize {
        self.offset
    }

    /// Returns the byte size of the view.
    #[inline]
    pub fn range(&self) -> DeviceSize {
        self.range
    }
}

impl Drop for BufferView {
    #[inline]
    fn drop(&mut self) {
        self.buffer.device().handles().unregister(self.id);
    }
}

unsafe impl DeviceOwned for BufferView {
    #[inline]
    fn device(&self) -> &Arc<Device> {
        self.buffer.device()
    }
}

impl_id_counter!(BufferView);
