use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::RgbImage;

const QUALITY_STEP: u8 = 10;
const MIN_QUALITY: u8 = 10;
const MAX_DOWNSCALE_ROUNDS: u32 = 4;

/// Recompresses decoded images to JPEG within a byte budget.
///
/// Output depends only on the input bytes and settings, so identical input
/// always yields identical artifacts.
#[derive(Debug, Clone, Copy)]
pub struct Transformer {
    quality: u8,
    max_output_bytes: usize,
}

impl Transformer {
    pub fn new(quality: u8, max_output_bytes: usize) -> Result<Self, TransformError> {
        if !(1..=100).contains(&quality) {
            return Err(TransformError::InvalidQuality(quality));
        }
        Ok(Self {
            quality,
            max_output_bytes,
        })
    }

    /// Decode `bytes` and re-encode as JPEG.
    ///
    /// Quality steps down, then the image is downscaled, until the result
    /// fits `max_output_bytes`. If nothing fits, the smallest encoding
    /// produced is returned.
    pub fn transform(&self, bytes: &[u8]) -> Result<Vec<u8>, TransformError> {
        let decoded = image::load_from_memory(bytes).map_err(TransformError::Decode)?;
        // JPEG has no alpha channel.
        let mut rgb = decoded.to_rgb8();

        let mut smallest: Option<Vec<u8>> = None;

        for round in 0..=MAX_DOWNSCALE_ROUNDS {
            if round > 0 {
                let (w, h) = (rgb.width(), rgb.height());
                if w <= 1 || h <= 1 {
                    break;
                }
                rgb = imageops::resize(
                    &rgb,
                    (w * 3 / 4).max(1),
                    (h * 3 / 4).max(1),
                    FilterType::Triangle,
                );
            }

            let mut quality = self.quality;
            loop {
                let encoded = encode_jpeg(&rgb, quality)?;
                if encoded.len() <= self.max_output_bytes {
                    return Ok(encoded);
                }

                if smallest.as_ref().map_or(true, |s| encoded.len() < s.len()) {
                    smallest = Some(encoded);
                }

                if quality <= MIN_QUALITY {
                    break;
                }
                quality = quality.saturating_sub(QUALITY_STEP).max(MIN_QUALITY);
            }
        }

        tracing::debug!(
            budget = self.max_output_bytes,
            "Image does not fit byte budget, keeping smallest encoding"
        );
        smallest.ok_or_else(|| TransformError::Encode("no encoding produced".to_string()))
    }

    /// Run [`Transformer::transform`] on the blocking pool.
    pub async fn transform_blocking(&self, bytes: Vec<u8>) -> Result<Vec<u8>, TransformError> {
        let transformer = *self;
        tokio::task::spawn_blocking(move || transformer.transform(&bytes))
            .await
            .map_err(|e| TransformError::Encode(format!("transform task failed: {e}")))?
    }
}

fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, TransformError> {
    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(&mut buffer, quality)
        .encode_image(image)
        .map_err(|e| TransformError::Encode(e.to_string()))?;
    Ok(buffer)
}

#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("Failed to decode image: {0}")]
    Decode(#[source] image::ImageError),

    #[error("Failed to encode image: {0}")]
    Encode(String),

    #[error("JPEG quality must be within 1..=100, got {0}")]
    InvalidQuality(u8),
}
