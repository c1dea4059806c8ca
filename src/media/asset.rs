/// Image asset codec
///
/// Turns a raw image payload (a base64 data URL as returned by the image
/// model) into an `ImageAsset`: the untouched original plus a downscaled
/// JPEG preview, each with its decoded byte size.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::{imageops::FilterType, DynamicImage, GenericImageView};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::PreviewConfig;
use crate::state::data::{new_id, now_millis, ImageAsset};

/// Why a preview could not be rendered (never surfaced to callers)
#[derive(Debug, Error)]
enum PreviewError {
    #[error("payload is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("image codec failed: {0}")]
    Image(#[from] image::ImageError),
}

/// Strip a `data:<mime>;base64,` prefix if present
pub fn payload_body(payload: &str) -> &str {
    match payload.split_once(',') {
        Some((_, body)) => body,
        None => payload,
    }
}

/// Decoded byte size of a base64 payload
///
/// ⌈len × 3/4⌉ minus one byte per trailing padding character.
pub fn calculate_size(payload: &str) -> u64 {
    let body = payload_body(payload);
    let padding = if body.ends_with("==") {
        2
    } else if body.ends_with('=') {
        1
    } else {
        0
    };
    (body.len() as u64 * 3).div_ceil(4).saturating_sub(padding)
}

/// Builds image assets and their previews
#[derive(Debug, Clone, Copy)]
pub struct AssetCodec {
    max_dimension: u32,
    jpeg_quality: u8,
}

impl Default for AssetCodec {
    fn default() -> Self {
        Self::new(&PreviewConfig::default())
    }
}

impl AssetCodec {
    pub fn new(config: &PreviewConfig) -> Self {
        Self {
            max_dimension: config.max_dimension.max(1),
            jpeg_quality: config.jpeg_quality.clamp(1, 100),
        }
    }

    /// Build an asset from a raw payload
    ///
    /// Preview failures are not errors: the original payload doubles as the
    /// preview instead.
    pub fn create_asset(&self, raw: String) -> ImageAsset {
        let (preview_url, preview_file_size) = self.preview(&raw);
        ImageAsset {
            id: new_id(),
            original_file_size: calculate_size(&raw),
            original_url: raw,
            preview_url,
            preview_file_size,
            created_at: now_millis(),
        }
    }

    /// `create_asset` on the blocking pool, since resizing is CPU-bound
    pub async fn encode(&self, raw: String) -> ImageAsset {
        let codec = *self;
        let fallback = raw.clone();
        match tokio::task::spawn_blocking(move || codec.create_asset(raw)).await {
            Ok(asset) => asset,
            Err(e) => {
                warn!(error = %e, "preview task failed, keeping original as preview");
                self.asset_from_parts(fallback.clone(), fallback, None, None)
            }
        }
    }

    /// Assemble an asset from already-known parts
    ///
    /// Missing sizes are computed from the payloads. Sizes that are given
    /// are trusted as-is.
    pub fn asset_from_parts(
        &self,
        original_url: String,
        preview_url: String,
        original_file_size: Option<u64>,
        preview_file_size: Option<u64>,
    ) -> ImageAsset {
        ImageAsset {
            id: new_id(),
            original_file_size: original_file_size.unwrap_or_else(|| calculate_size(&original_url)),
            preview_file_size: preview_file_size.unwrap_or_else(|| calculate_size(&preview_url)),
            original_url,
            preview_url,
            created_at: now_millis(),
        }
    }

    /// Compressed preview of `payload` and its size, or the original on failure
    pub fn preview(&self, payload: &str) -> (String, u64) {
        match self.render_preview(payload) {
            Ok(preview) => {
                let size = calculate_size(&preview);
                (preview, size)
            }
            Err(e) => {
                warn!(error = %e, "could not render preview, keeping original");
                (payload.to_string(), calculate_size(payload))
            }
        }
    }

    fn render_preview(&self, payload: &str) -> Result<String, PreviewError> {
        let bytes = STANDARD.decode(payload_body(payload))?;
        let img = image::load_from_memory(&bytes)?;
        let (width, height) = img.dimensions();

        // Only ever shrink
        let img = if width.max(height) > self.max_dimension {
            img.resize(self.max_dimension, self.max_dimension, FilterType::Lanczos3)
        } else {
            img
        };
        debug!(width, height, preview_width = img.width(), preview_height = img.height(), "rendered preview");

        // JPEG has no alpha channel
        let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
        let mut out = Vec::new();
        rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut out, self.jpeg_quality))?;

        Ok(format!("data:image/jpeg;base64,{}", STANDARD.encode(&out)))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{ImageFormat, RgbImage};
    use std::io::Cursor;

    /// A PNG data URL of the given size
    pub(crate) fn png_payload(width: u32, height: u32) -> String {
        let img = RgbImage::from_fn(width, height, |x, y| image::Rgb([(x % 256) as u8, (y % 256) as u8, 128]));
        let mut bytes = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut bytes, ImageFormat::Png)
            .unwrap();
        format!("data:image/png;base64,{}", STANDARD.encode(bytes.into_inner()))
    }

    fn decode_dimensions(payload: &str) -> (u32, u32) {
        let bytes = STANDARD.decode(payload_body(payload)).unwrap();
        image::load_from_memory(&bytes).unwrap().dimensions()
    }

    #[test]
    fn test_calculate_size_padding() {
        assert_eq!(calculate_size(""), 0);
        // "Man", "Ma", "M"
        assert_eq!(calculate_size("TWFu"), 3);
        assert_eq!(calculate_size("TWE="), 2);
        assert_eq!(calculate_size("TQ=="), 1);
        assert_eq!(calculate_size("data:image/png;base64,TWFuTWE="), 5);
    }

    #[test]
    fn test_calculate_size_matches_decoded_length() {
        for len in 0..40 {
            let data = vec![7u8; len];
            let encoded = STANDARD.encode(&data);
            assert_eq!(calculate_size(&encoded), len as u64, "len {len}");
        }
    }

    #[test]
    fn test_preview_is_downscaled() {
        let codec = AssetCodec::default();
        let raw = png_payload(1600, 1200);
        let asset = codec.create_asset(raw.clone());

        assert_eq!(asset.original_url, raw);
        assert!(asset.preview_url.starts_with("data:image/jpeg;base64,"));
        assert_eq!(decode_dimensions(&asset.preview_url), (800, 600));
        assert_eq!(asset.original_file_size, calculate_size(&raw));
        assert_eq!(asset.preview_file_size, calculate_size(&asset.preview_url));
    }

    #[test]
    fn test_small_image_is_not_upscaled() {
        let codec = AssetCodec::default();
        let asset = codec.create_asset(png_payload(120, 300));
        assert_eq!(decode_dimensions(&asset.preview_url), (120, 300));
    }

    #[test]
    fn test_undecodable_payload_falls_back_to_original() {
        let codec = AssetCodec::default();
        let raw = "data:image/png;base64,bm90IGFuIGltYWdl".to_string();
        let asset = codec.create_asset(raw.clone());

        assert_eq!(asset.preview_url, raw);
        assert_eq!(asset.preview_file_size, asset.original_file_size);
    }

    #[test]
    fn test_each_asset_gets_a_fresh_id() {
        let codec = AssetCodec::default();
        let a = codec.create_asset("TWFu".to_string());
        let b = codec.create_asset("TWFu".to_string());
        assert_ne!(a.id, b.id);
    }

    #[tokio::test]
    async fn test_encode_runs_off_thread() {
        let codec = AssetCodec::default();
        let asset = codec.encode(png_payload(1000, 200)).await;
        assert_eq!(decode_dimensions(&asset.preview_url), (800, 160));
    }
}
