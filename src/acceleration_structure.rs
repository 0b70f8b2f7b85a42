//! Acceleration structures, as seen by descriptor writes.
//!
//! Building and traversal live elsewhere in the driver; a descriptor only needs the structure's
//! device address range.

use crate::{
    device::{Device, DeviceOwned},
    handle::Handle,
    DeviceSize, NonExhaustive, ValidationError,
};
use std::{num::NonZeroU64, sync::Arc};

/// Parameters to create a new `AccelerationStructure`.
#[derive(Clone, Debug)]
pub struct AccelerationStructureCreateInfo {
    /// The size of the structure's backing storage in bytes.
    ///
    /// There is no default value.
    pub size: DeviceSize,

    pub _ne: NonExhaustive,
}

impl AccelerationStructureCreateInfo {
    /// Returns an `AccelerationStructureCreateInfo` with the given size.
    #[inline]
    pub fn size(size: DeviceSize) -> Self {
        Self {
            size,
            _ne: NonExhaustive(()),
        }
    }
}

/// An acceleration structure that ray queries can traverse.
#[derive(Debug)]
pub struct AccelerationStructure {
    device: Arc<Device>,
    id: NonZeroU64,
    size: DeviceSize,
    device_address: DeviceSize,
}

impl AccelerationStructure {
    /// Creates a new `AccelerationStructure`.
    pub fn new(
        device: Arc<Device>,
        create_info: AccelerationStructureCreateInfo,
    ) -> Result<Arc<AccelerationStructure>, Box<ValidationError>> {
        let AccelerationStructureCreateInfo { size, _ne: _ } = create_info;

        if size == 0 {
            return Err(ValidationError::new(
                "the size of an acceleration structure must not be zero",
            )
            .add_context("create_info.size"));
        }

        let id = Self::next_id();
        let acceleration_structure = Arc::new(AccelerationStructure {
            device,
            id,
            size,
            device_address: id.get() << 32,
        });
        acceleration_structure
            .device
            .handles()
            .register(acceleration_structure.id, &acceleration_structure);

        Ok(acceleration_structure)
    }

    /// Returns the raw driver handle of the structure, for use in update-template data blobs.
    #[inline]
    pub fn handle(&self) -> Handle {
        Handle::from_id(self.id)
    }

    /// Returns the size of the structure's backing storage in bytes.
    #[inline]
    pub fn size(&self) -> DeviceSize {
        self.size
    }

    /// Returns the device address of the structure.
    #[inline]
    pub fn device_address(&self) -> DeviceSize {
        self.device_address
    }
}

impl Drop for AccelerationStructure {
    #[inline]
    fn drop(&mut self) {
        self.device.handles().unregister(self.id);
    }
}

unsafe impl DeviceOwned for AccelerationStructure {
    #[inline]
    fn device(&self) -> &Arc<Device> {
        &self.device
    }
}

impl_id_counter!(AccelerationStructure);
