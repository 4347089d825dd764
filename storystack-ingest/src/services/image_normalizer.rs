//! Image normalization for upload
//!
//! Photos already in a storage format and under the byte ceiling pass
//! through untouched. Everything else is decoded and re-encoded as JPEG,
//! stepping quality down and then dimensions down until the result fits.

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use thiserror::Error;

/// Formats stored as-is when small enough
pub const STORAGE_FORMATS: &[ImageFormat] = &[ImageFormat::Jpeg, ImageFormat::Png, ImageFormat::WebP];

const JPEG_QUALITY_STEPS: &[u8] = &[85, 75, 65, 55];
const DOWNSCALE_FACTOR: f32 = 0.75;
const MIN_DIMENSION: u32 = 32;

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("Unrecognized image format")]
    UnknownFormat,

    #[error("Could not decode {format:?} image: {message}")]
    Decode { format: ImageFormat, message: String },

    #[error("Could not encode image: {0}")]
    Encode(String),

    #[error("Image still {size} bytes at minimum size (ceiling {ceiling})")]
    TooLarge { size: usize, ceiling: usize },
}

/// Upload-ready image bytes
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedImage {
    pub bytes: Vec<u8>,
    pub format: ImageFormat,
    /// False when the input was passed through unchanged
    pub transcoded: bool,
}

impl NormalizedImage {
    pub fn content_type(&self) -> &'static str {
        self.format.to_mime_type()
    }

    pub fn extension(&self) -> &'static str {
        match self.format {
            ImageFormat::Jpeg => "jpg",
            ImageFormat::Png => "png",
            ImageFormat::WebP => "webp",
            other => other.extensions_str().first().copied().unwrap_or("bin"),
        }
    }
}

/// Normalizes picked photos to a storage format under a byte ceiling
#[derive(Debug, Clone, Copy)]
pub struct ImageNormalizer {
    max_bytes: usize,
}

impl ImageNormalizer {
    pub fn new(max_bytes: usize) -> Self {
        Self { max_bytes }
    }

    /// CPU-bound; call from a blocking context
    pub fn normalize(&self, raw: &[u8]) -> Result<NormalizedImage, NormalizeError> {
        let format = image::guess_format(raw).map_err(|_| NormalizeError::UnknownFormat)?;

        if STORAGE_FORMATS.contains(&format) && raw.len() <= self.max_bytes {
            return Ok(NormalizedImage {
                bytes: raw.to_vec(),
                format,
                transcoded: false,
            });
        }

        let decoded = image::load_from_memory_with_format(raw, format).map_err(|e| {
            NormalizeError::Decode {
                format,
                message: e.to_string(),
            }
        })?;

        let bytes = self.compress(DynamicImage::ImageRgb8(decoded.to_rgb8()))?;
        tracing::debug!(
            from = ?format,
            input_bytes = raw.len(),
            output_bytes = bytes.len(),
            "Transcoded image to JPEG"
        );

        Ok(NormalizedImage {
            bytes,
            format: ImageFormat::Jpeg,
            transcoded: true,
        })
    }

    fn compress(&self, mut image: DynamicImage) -> Result<Vec<u8>, NormalizeError> {
        loop {
            let mut smallest = 0;
            for &quality in JPEG_QUALITY_STEPS {
                let encoded = encode_jpeg(&image, quality)?;
                if encoded.len() <= self.max_bytes {
                    return Ok(encoded);
                }
                smallest = encoded.len();
            }

            let width = (image.width() as f32 * DOWNSCALE_FACTOR) as u32;
            let height = (image.height() as f32 * DOWNSCALE_FACTOR) as u32;
            if width < MIN_DIMENSION || height < MIN_DIMENSION {
                return Err(NormalizeError::TooLarge {
                    size: smallest,
                    ceiling: self.max_bytes,
                });
            }
            image = image.resize_exact(width, height, FilterType::Triangle);
        }
    }
}

fn encode_jpeg(image: &DynamicImage, quality: u8) -> Result<Vec<u8>, NormalizeError> {
    let mut buffer = Vec::new();
    image
        .write_with_encoder(JpegEncoder::new_with_quality(&mut buffer, quality))
        .map_err(|e| NormalizeError::Encode(e.to_string()))?;
    Ok(buffer)
}
