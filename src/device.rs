//! The driver device: hardware parameters and the surface-state encoding seam.
//!
//! A [`Device`] owns everything the descriptor subsystem needs to compute byte layouts: the
//! [`DeviceProperties`] describing record sizes, alignments and limits of the hardware, the
//! [`StateEncoder`] that packs concrete resource references into hardware records, and the
//! [`HandleTable`] used to resolve raw handles from update-template data blobs.

use crate::{
    buffer::{Buffer, BufferView},
    descriptor_set::layout::DescriptorType,
    handle::HandleTable,
    image::ImageView,
    sampler::Sampler,
    DeviceSize, NonExhaustive,
};
use bytemuck::{bytes_of, Pod, Zeroable};
use std::{fmt::Debug, num::NonZeroU64, sync::Arc};

/// How descriptors are physically represented by the hardware.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum DescriptorMode {
    /// Descriptors embed the full hardware surface/sampler record inline.
    #[default]
    Direct,

    /// Descriptors are small bindless handles or address ranges into a side table.
    Indirect,
}

/// Hardware parameters read by the descriptor subsystem.
///
/// All `*_size` and `*_alignment` values are in bytes; alignments must be powers of two.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceProperties {
    /// How descriptors are physically represented.
    pub descriptor_mode: DescriptorMode,

    /// Size of one surface record (per plane) in the surface heap.
    pub surface_record_size: DeviceSize,

    /// Minimum alignment of a surface record.
    pub surface_record_alignment: DeviceSize,

    /// Size of one sampler record (per plane) in the sampler heap.
    pub sampler_record_size: DeviceSize,

    /// Minimum alignment of a sampler record.
    pub sampler_record_alignment: DeviceSize,

    /// Size of one sampled-image handle in indirect mode.
    pub sampled_image_handle_size: DeviceSize,

    /// Size of one storage-image handle in indirect mode.
    pub storage_image_handle_size: DeviceSize,

    /// Size of one bindless address-range record.
    pub address_range_size: DeviceSize,

    /// Minimum alignment of any descriptor region that contains a buffer record.
    pub constant_buffer_alignment: DeviceSize,

    /// Alignment of inline uniform block regions.
    pub inline_block_alignment: DeviceSize,

    /// Maximum number of descriptor set layouts in a pipeline layout.
    pub max_bound_descriptor_sets: u32,

    /// Maximum total number of descriptors in a single set.
    pub max_per_set_descriptors: u32,

    /// Maximum number of dynamic buffer descriptors in a single set.
    pub max_dynamic_buffers: u32,

    /// Maximum byte size of an inline uniform block binding.
    pub max_inline_uniform_block_size: u32,

    /// Maximum total number of descriptors in a push descriptor layout.
    pub max_push_descriptors: u32,

    /// Maximum byte size of the push constant range of a pipeline layout.
    pub max_push_constants_size: u32,
}

impl Default for DeviceProperties {
    #[inline]
    fn default() -> Self {
        Self {
            descriptor_mode: DescriptorMode::Direct,
            surface_record_size: 128,
            surface_record_alignment: 64,
            sampler_record_size: 32,
            sampler_record_alignment: 32,
            sampled_image_handle_size: 32,
            storage_image_handle_size: 32,
            address_range_size: 16,
            constant_buffer_alignment: 64,
            inline_block_alignment: 8,
            max_bound_descriptor_sets: 8,
            max_per_set_descriptors: 1024,
            max_dynamic_buffers: 16,
            max_inline_uniform_block_size: 4096,
            max_push_descriptors: 32,
            max_push_constants_size: 128,
        }
    }
}

/// Parameters to create a new `Device`.
#[derive(Debug)]
pub struct DeviceCreateInfo {
    /// The hardware parameters of the device.
    ///
    /// The default value is `DeviceProperties::default()`.
    pub properties: DeviceProperties,

    /// The surface-state encoder to use. If `None`, the built-in [`PackedStateEncoder`] is used.
    ///
    /// The default value is `None`.
    pub encoder: Option<Arc<dyn StateEncoder>>,

    pub _ne: NonExhaustive,
}

impl Default for DeviceCreateInfo {
    #[inline]
    fn default() -> Self {
        Self {
            properties: DeviceProperties::default(),
            encoder: None,
            _ne: NonExhaustive(()),
        }
    }
}

/// An open channel of communication with the hardware.
///
/// Only the parts relevant to descriptor management are modelled here; queues, command streams
/// and presentation are owned by other parts of the driver.
#[derive(Debug)]
pub struct Device {
    id: NonZeroU64,
    properties: DeviceProperties,
    encoder: Arc<dyn StateEncoder>,
    handles: HandleTable,
}

impl Device {
    /// Creates a new `Device`.
    ///
    /// # Panics
    ///
    /// - Panics if any alignment in `create_info.properties` is zero or not a power of two.
    pub fn new(create_info: DeviceCreateInfo) -> Arc<Device> {
        let DeviceCreateInfo {
            properties,
            encoder,
            _ne: _,
        } = create_info;

        for alignment in [
            properties.surface_record_alignment,
            properties.sampler_record_alignment,
            properties.constant_buffer_alignment,
            properties.inline_block_alignment,
        ] {
            assert!(
                alignment.is_power_of_two(),
                "device alignments must be nonzero powers of two",
            );
        }

        Arc::new(Device {
            id: Self::next_id(),
            properties,
            encoder: encoder.unwrap_or_else(|| Arc::new(PackedStateEncoder)),
            handles: HandleTable::new(),
        })
    }

    /// Returns the hardware parameters of the device.
    #[inline]
    pub fn properties(&self) -> &DeviceProperties {
        &self.properties
    }

    /// Returns the surface-state encoder of the device.
    #[inline]
    pub fn encoder(&self) -> &dyn StateEncoder {
        &*self.encoder
    }

    /// Returns the handle table of the device.
    #[inline]
    pub fn handles(&self) -> &HandleTable {
        &self.handles
    }

    /// Allocates zeroed backing storage for a descriptor heap.
    ///
    /// On this software device all heaps are host memory; a hardware backend would place the
    /// surface and sampler heaps in device-visible memory instead.
    pub(crate) fn allocate_heap_storage(&self, size: DeviceSize) -> Box<[u8]> {
        vec![0u8; size as usize].into_boxed_slice()
    }
}

impl_id_counter!(Device);

/// Trait for objects that belong to a `Device`.
///
/// # Safety
///
/// - `device` must return the device that owns `self`, and the same device every time.
pub unsafe trait DeviceOwned {
    /// Returns the device that owns `self`.
    fn device(&self) -> &Arc<Device>;
}

/// Produces fixed-size, hardware-specific byte records from resource references.
///
/// Implementations must write deterministic contents into `out` and must not read the previous
/// contents of `out`. The caller zeroes the destination and sizes `out` to the record size
/// configured in [`DeviceProperties`]; an encoder that writes fewer bytes leaves the rest zero.
pub trait StateEncoder: Debug + Send + Sync {
    /// Encodes one plane of an image surface record.
    fn encode_image_surface(
        &self,
        descriptor_type: DescriptorType,
        view: &ImageView,
        plane: u32,
        out: &mut [u8],
    );

    /// Encodes a buffer surface record covering `range` bytes at `offset` within `buffer`.
    fn encode_buffer_surface(
        &self,
        descriptor_type: DescriptorType,
        buffer: &Buffer,
        offset: DeviceSize,
        range: DeviceSize,
        out: &mut [u8],
    );

    /// Encodes a texel buffer surface record.
    fn encode_texel_buffer_surface(&self, view: &BufferView, out: &mut [u8]);

    /// Encodes one plane of a sampler record.
    fn encode_sampler(&self, sampler: &Sampler, plane: u32, out: &mut [u8]);

    /// Encodes one plane of a bindless sampled-image handle.
    fn encode_sampled_image_handle(&self, view: &ImageView, plane: u32, out: &mut [u8]);

    /// Encodes one plane of a bindless storage-image handle.
    fn encode_storage_image_handle(&self, view: &ImageView, plane: u32, out: &mut [u8]);

    /// Encodes a bindless address range record.
    fn encode_address_range(&self, base: DeviceSize, size: DeviceSize, out: &mut [u8]);

    /// Encodes the canonical null surface record. Sampling or fetching through this record must
    /// be defined behavior on the target hardware.
    fn encode_null_surface(&self, out: &mut [u8]);

    /// Encodes a sampler record that is valid to sample with, for slots whose resource is absent.
    fn encode_null_sampler(&self, out: &mut [u8]);
}

const TAG_IMAGE_SURFACE: u32 = 1;
const TAG_BUFFER_SURFACE: u32 = 2;
const TAG_TEXEL_BUFFER: u32 = 3;
const TAG_SAMPLER: u32 = 4;
const TAG_SAMPLED_IMAGE_HANDLE: u32 = 5;
const TAG_STORAGE_IMAGE_HANDLE: u32 = 6;
const TAG_DEFAULT_SAMPLER: u32 = 7;

#[derive(Clone, Copy, Debug, Pod, Zeroable)]
#[repr(C)]
struct PackedRecord {
    tag: u32,
    plane: u32,
    object: u64,
    base: u64,
    extent: u64,
}

#[derive(Clone, Copy, Debug, Pod, Zeroable)]
#[repr(C)]
struct PackedAddressRange {
    base: u64,
    size: u64,
}

fn write_record(out: &mut [u8], record: &PackedRecord) {
    out.fill(0);
    let bytes = bytes_of(record);
    let len = bytes.len().min(out.len());
    out[..len].copy_from_slice(&bytes[..len]);
}

/// The built-in software encoder.
///
/// Packs a tagged, deterministic representation of each record, suitable for a CPU rasterizer
/// backend and for tests. The canonical null surface record is all zeroes.
#[derive(Clone, Copy, Debug, Default)]
pub struct PackedStateEncoder;

impl StateEncoder for PackedStateEncoder {
    fn encode_image_surface(
        &self,
        descriptor_type: DescriptorType,
        view: &ImageView,
        plane: u32,
        out: &mut [u8],
    ) {
        write_record(
            out,
            &PackedRecord {
                tag: TAG_IMAGE_SURFACE,
                plane,
                object: view.id().get(),
                base: descriptor_type as u32 as u64,
                extent: view.format() as u32 as u64,
            },
        );
    }

    fn encode_buffer_surface(
        &self,
        descriptor_type: DescriptorType,
        buffer: &Buffer,
        offset: DeviceSize,
        range: DeviceSize,
        out: &mut [u8],
    ) {
        write_record(
            out,
            &PackedRecord {
                tag: TAG_BUFFER_SURFACE,
                plane: descriptor_type as u32,
                object: buffer.id().get(),
                base: buffer.device_address() + offset,
                extent: range,
            },
        );
    }

    fn encode_texel_buffer_surface(&self, view: &BufferView, out: &mut [u8]) {
        write_record(
            out,
            &PackedRecord {
                tag: TAG_TEXEL_BUFFER,
                plane: view.format() as u32,
                object: view.id().get(),
                base: view.offset(),
                extent: view.range(),
            },
        );
    }

    fn encode_sampler(&self, sampler: &Sampler, plane: u32, out: &mut [u8]) {
        write_record(
            out,
            &PackedRecord {
                tag: TAG_SAMPLER,
                plane,
                object: sampler.id().get(),
                base: 0,
                extent: 0,
            },
        );
    }

    fn encode_sampled_image_handle(&self, view: &ImageView, plane: u32, out: &mut [u8]) {
        write_record(
            out,
            &PackedRecord {
                tag: TAG_SAMPLED_IMAGE_HANDLE,
                plane,
                object: view.id().get(),
                base: 0,
                extent: 0,
            },
        );
    }

    fn encode_storage_image_handle(&self, view: &ImageView, plane: u32, out: &mut [u8]) {
        write_record(
            out,
            &PackedRecord {
                tag: TAG_STORAGE_IMAGE_HANDLE,
                plane,
                object: view.id().get(),
                base: 0,
                extent: 0,
            },
        );
    }

    fn encode_address_range(&self, base: DeviceSize, size: DeviceSize, out: &mut [u8]) {
        out.fill(0);
        let record = PackedAddressRange { base, size };
        let bytes = bytes_of(&record);
        let len = bytes.len().min(out.len());
        out[..len].copy_from_slice(&bytes[..len]);
    }

    fn encode_null_surface(&self, out: &mut [u8]) {
        out.fill(0);
    }

    fn encode_null_sampler(&self, out: &mut [u8]) {
        write_record(
            out,
            &PackedRecord {
                tag: TAG_DEFAULT_SAMPLER,
                plane: 0,
                object: 0,
                base: 0,
                extent: 0,
            },
        );
    }
}
