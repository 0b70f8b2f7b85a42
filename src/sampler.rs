//! Samplers and sampler Y′CbCr conversions.
//!
//! Only the properties that affect descriptor encoding are modelled. A sampler with an attached
//! Y′CbCr conversion samples a multi-planar format and occupies one sampler record per plane in
//! a descriptor set.

use crate::{
    device::{Device, DeviceOwned},
    handle::Handle,
    image::Format,
    NonExhaustive, ValidationError,
};
use std::{num::NonZeroU64, sync::Arc};

/// How a sampled texel is filtered.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Filter {
    #[default]
    Nearest,
    Linear,
}

/// Parameters to create a new `SamplerYcbcrConversion`.
#[derive(Clone, Debug)]
pub struct SamplerYcbcrConversionCreateInfo {
    /// The multi-planar format the conversion samples.
    ///
    /// There is no default value.
    pub format: Format,

    pub _ne: NonExhaustive,
}

impl SamplerYcbcrConversionCreateInfo {
    /// Returns a `SamplerYcbcrConversionCreateInfo` with the given format.
    #[inline]
    pub fn format(format: Format) -> Self {
        Self {
            format,
            _ne: NonExhaustive(()),
        }
    }
}

/// Converts multi-planar Y′CbCr image data to RGB while sampling.
#[derive(Debug)]
pub struct SamplerYcbcrConversion {
    device: Arc<Device>,
    id: NonZeroU64,
    format: Format,
}

impl SamplerYcbcrConversion {
    /// Creates a new `SamplerYcbcrConversion`.
    pub fn new(
        device: Arc<Device>,
        create_info: SamplerYcbcrConversionCreateInfo,
    ) -> Result<Arc<SamplerYcbcrConversion>, Box<ValidationError>> {
        let SamplerYcbcrConversionCreateInfo { format, _ne: _ } = create_info;

        if format.plane_count() < 2 {
            return Err(ValidationError::new(
                "the format of a sampler Y\u{2032}CbCr conversion must be multi-planar",
            )
            .add_context("create_info.format"));
        }

        Ok(Arc::new(SamplerYcbcrConversion {
            device,
            id: Self::next_id(),
            format,
        }))
    }

    /// Returns the format that the conversion samples.
    #[inline]
    pub fn format(&self) -> Format {
        self.format
    }
}

unsafe impl DeviceOwned for SamplerYcbcrConversion {
    #[inline]
    fn device(&self) -> &Arc<Device> {
        &self.device
    }
}

impl_id_counter!(SamplerYcbcrConversion);

/// Parameters to create a new `Sampler`.
#[derive(Clone, Debug)]
pub struct SamplerCreateInfo {
    /// How magnified texels are filtered.
    ///
    /// The default value is [`Filter::Nearest`].
    pub mag_filter: Filter,

    /// How minified texels are filtered.
    ///
    /// The default value is [`Filter::Nearest`].
    pub min_filter: Filter,

    /// An optional Y′CbCr conversion sampled through this sampler.
    ///
    /// The default value is `None`.
    pub ycbcr_conversion: Option<Arc<SamplerYcbcrConversion>>,

    pub _ne: NonExhaustive,
}

impl Default for SamplerCreateInfo {
    #[inline]
    fn default() -> Self {
        Self {
            mag_filter: Filter::Nearest,
            min_filter: Filter::Nearest,
            ycbcr_conversion: None,
            _ne: NonExhaustive(()),
        }
    }
}

/// Describes how texels of an image are read inside a shader.
#[derive(Debug)]
pub struct Sampler {
    device: Arc<Device>,
    id: NonZeroU64,
    mag_filter: Filter,
    min_filter: Filter,
    ycbcr_conversion: Option<Arc<SamplerYcbcrConversion>>,
}

impl Sampler {
    /// Creates a new `Sampler`.
    pub fn new(device: Arc<Device>, create_info: SamplerCreateInfo) -> Arc<Sampler> {
        let SamplerCreateInfo {
            mag_filter,
            min_filter,
            ycbcr_conversion,
            _ne: _,
        } = create_info;

        let sampler = Arc::new(Sampler {
            device,
            id: Self::next_id(),
            mag_filter,
            min_filter,
            ycbcr_conversion,
        });
        sampler.device.handles().register(sampler.id, &sampler);

        sampler
    }

    /// Returns the raw driver handle of the sampler, for use in update-template data blobs.
    #[inline]
    pub fn handle(&self) -> Handle {
        Handle::from_id(self.id)
    }

    /// Returns how magnified texels are filtered.
    #[inline]
    pub fn mag_filter(&self) -> Filter {
        self.mag_filter
    }

    /// Returns how minified texels are filtered.
    #[inline]
    pub fn min_filter(&self) -> Filter {
        self.min_filter
    }

    /// Returns the attached Y′CbCr conversion, if any.
    #[inline]
    pub fn ycbcr_conversion(&self) -> Option<&Arc<SamplerYcbcrConversion>> {
        self.ycbcr_conversion.as_ref()
    }

    /// Returns the number of sampler record planes this sampler occupies in a descriptor.
    #[inline]
    pub fn plane_count(&self) -> u32 {
        self.ycbcr_conversion
            .as_ref()
            .map_or(1, |conversion| conversion.format().plane_count())
    }
}

impl Drop for Sampler {
    #[inline]
    fn drop(&mut self) {
        self.device.handles().unregister(self.id);
    }
}

unsafe impl DeviceOwned for Sampler {
    #[inline]
    fn device(&self) -> &Arc<Device> {
        &self.device
    }
}

impl_id_counter!(Sampler);
