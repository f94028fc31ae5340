//! Image decoding and the cache file encoding

use crate::error::CodecError;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ExtendedColorType};

/// Turns downloaded or cached bytes into an image, and an image into the
/// bytes stored in the cache
pub trait ImageCodec: Send + Sync + 'static {
    type Image: Send + 'static;

    fn decode(&self, bytes: &[u8]) -> Result<Self::Image, CodecError>;

    fn encode(&self, image: &Self::Image) -> Result<Vec<u8>, CodecError>;
}

/// Decodes any supported format; caches as JPEG
#[derive(Debug, Clone, Copy)]
pub struct JpegCodec {
    quality: u8,
}

impl JpegCodec {
    pub const MAX_QUALITY: u8 = 100;

    pub fn new() -> Self {
        Self::with_quality(Self::MAX_QUALITY)
    }

    pub fn with_quality(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, Self::MAX_QUALITY),
        }
    }
}

impl Default for JpegCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageCodec for JpegCodec {
    type Image = DynamicImage;

    fn decode(&self, bytes: &[u8]) -> Result<DynamicImage, CodecError> {
        image::load_from_memory(bytes).map_err(|e| CodecError::Decode(e.to_string()))
    }

    fn encode(&self, image: &DynamicImage) -> Result<Vec<u8>, CodecError> {
        // JPEG has no alpha channel
        let rgb = image.to_rgb8();
        let mut out = Vec::new();

        JpegEncoder::new_with_quality(&mut out, self.quality)
            .encode(rgb.as_raw(), rgb.width(), rgb.height(), ExtendedColorType::Rgb8)
            .map_err(|e| CodecError::Encode(e.to_string()))?;

        Ok(out)
    }
}
