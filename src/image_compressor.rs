use crate::constants::{
    DEFAULT_IMAGE_MAX_HEIGHT, DEFAULT_IMAGE_MAX_WIDTH, DEFAULT_IMAGE_QUALITY, MAX_SURFACE_PIXELS,
    MIME_JPEG, MIME_WEBP,
};
use crate::error::{IngestError, Result};
use crate::media::{CompressedResult, MediaBlob, RawMedia};
use image::buffer::ConvertBuffer;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageReader, RgbImage, RgbaImage};
use std::io::Cursor;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct ImageOptions {
    pub max_width: u32,
    pub max_height: u32,
    pub quality: f32,
}

impl Default for ImageOptions {
    fn default() -> Self {
        Self {
            max_width: DEFAULT_IMAGE_MAX_WIDTH,
            max_height: DEFAULT_IMAGE_MAX_HEIGHT,
            quality: DEFAULT_IMAGE_QUALITY,
        }
    }
}

impl ImageOptions {
    pub fn new(max_width: Option<u32>, max_height: Option<u32>, quality: Option<f32>) -> Result<Self> {
        let max_width = max_width.unwrap_or(DEFAULT_IMAGE_MAX_WIDTH);
        let max_height = max_height.unwrap_or(DEFAULT_IMAGE_MAX_HEIGHT);
        let quality = quality.unwrap_or(DEFAULT_IMAGE_QUALITY);

        if max_width == 0 {
            return Err(IngestError::InvalidDimension("max width"));
        }
        if max_height == 0 {
            return Err(IngestError::InvalidDimension("max height"));
        }
        if !(quality > 0.0 && quality <= 1.0) {
            return Err(IngestError::InvalidQuality(quality));
        }

        Ok(Self {
            max_width,
            max_height,
            quality,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetFormat {
    WebP,
    Jpeg,
}

impl TargetFormat {
    pub fn mime_type(&self) -> &'static str {
        match self {
            TargetFormat::WebP => MIME_WEBP,
            TargetFormat::Jpeg => MIME_JPEG,
        }
    }
}

/// Turns a rendered surface into encoded bytes.
///
/// `Ok(None)` means the encoder ran but produced nothing. The returned blob's
/// `mime_type` is whatever the encoder actually produced, which is not
/// necessarily the requested format.
pub trait RasterEncoder: Send + Sync {
    fn encode(&self, surface: &RgbaImage, format: TargetFormat, quality: f32) -> Result<Option<MediaBlob>>;
}

/// Lossy WebP through libwebp, baseline JPEG through the `image` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeEncoder;

impl RasterEncoder for NativeEncoder {
    fn encode(&self, surface: &RgbaImage, format: TargetFormat, quality: f32) -> Result<Option<MediaBlob>> {
        let (width, height) = surface.dimensions();
        match format {
            TargetFormat::WebP => {
                let encoded = webp::Encoder::from_rgba(surface.as_raw(), width, height)
                    .encode_simple(false, quality * 100.0)
                    .map_err(|e| IngestError::Encode(format!("WebP: {e:?}")))?
                    .to_vec();
                if encoded.is_empty() {
                    return Ok(None);
                }
                Ok(Some(MediaBlob::new(encoded, MIME_WEBP)))
            }
            TargetFormat::Jpeg => {
                let rgb: RgbImage = surface.convert();
                let jpeg_quality = (quality * 100.0).round().clamp(1.0, 100.0) as u8;
                let mut buf = Vec::new();
                JpegEncoder::new_with_quality(&mut buf, jpeg_quality)
                    .encode_image(&rgb)
                    .map_err(|e| IngestError::Encode(e.to_string()))?;
                if buf.is_empty() {
                    return Ok(None);
                }
                Ok(Some(MediaBlob::new(buf, MIME_JPEG)))
            }
        }
    }
}

/// Bounds `width`x`height` to `max_width`x`max_height`, preserving aspect ratio.
///
/// Width is clamped first, then the (possibly rescaled) height. Each step
/// rounds independently, so the result is order-dependent. A side never
/// rounds below one pixel.
pub fn compute_target_dimensions(width: u32, height: u32, max_width: u32, max_height: u32) -> (u32, u32) {
    let (mut w, mut h) = (width, height);

    if w > max_width {
        h = ((h as f64 * max_width as f64 / w as f64).round() as u32).max(1);
        w = max_width;
    }

    if h > max_height {
        w = ((w as f64 * max_height as f64 / h as f64).round() as u32).max(1);
        h = max_height;
    }

    (w, h)
}

pub fn decode_image(data: &[u8]) -> Result<DynamicImage> {
    ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .map_err(|e| IngestError::Decode(e.to_string()))?
        .decode()
        .map_err(|e| IngestError::Decode(e.to_string()))
}

/// Draws `img` onto an RGBA surface of the given size in a single scaling pass.
pub fn render_surface(img: &DynamicImage, width: u32, height: u32) -> Result<RgbaImage> {
    let pixels = width as u64 * height as u64;
    if pixels == 0 || pixels > MAX_SURFACE_PIXELS {
        return Err(IngestError::Surface(width, height));
    }

    if img.dimensions() == (width, height) {
        return Ok(img.to_rgba8());
    }

    Ok(img.resize_exact(width, height, FilterType::Triangle).into_rgba8())
}

/// WebP first; JPEG at the same quality if WebP fails, yields nothing, or
/// yields a blob that is not actually WebP.
pub fn encode_with_fallback(encoder: &dyn RasterEncoder, surface: &RgbaImage, quality: f32) -> Result<MediaBlob> {
    match encoder.encode(surface, TargetFormat::WebP, quality) {
        Ok(Some(blob)) if blob.mime_type == MIME_WEBP => return Ok(blob),
        Ok(Some(blob)) => {
            warn!(produced = %blob.mime_type, "WebP encoder produced a different type, falling back to JPEG")
        }
        Ok(None) => warn!("WebP encoder produced no output, falling back to JPEG"),
        Err(e) => warn!(error = %e, "WebP encoding failed, falling back to JPEG"),
    }

    match encoder.encode(surface, TargetFormat::Jpeg, quality) {
        Ok(Some(blob)) => Ok(blob),
        Ok(None) => Err(IngestError::Encode("JPEG encoder produced no output".to_string())),
        Err(IngestError::Encode(msg)) => Err(IngestError::Encode(msg)),
        Err(e) => Err(IngestError::Encode(e.to_string())),
    }
}

/// Synchronous core of [`ImageCompressor::compress`].
pub fn compress_image(encoder: &dyn RasterEncoder, media: &RawMedia, options: &ImageOptions) -> Result<CompressedResult> {
    let img = decode_image(media.data())?;
    let (width, height) = img.dimensions();
    let (target_width, target_height) =
        compute_target_dimensions(width, height, options.max_width, options.max_height);

    if (target_width, target_height) != (width, height) {
        debug!(width, height, target_width, target_height, "Resizing image");
    }

    let surface = render_surface(&img, target_width, target_height)?;
    drop(img);

    let blob = encode_with_fallback(encoder, &surface, options.quality)?;
    Ok(CompressedResult::new(blob, media.size()))
}

/// Re-encodes images to bounded-size WebP (or JPEG).
#[derive(Clone)]
pub struct ImageCompressor {
    encoder: Arc<dyn RasterEncoder>,
}

impl Default for ImageCompressor {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageCompressor {
    pub fn new() -> Self {
        Self::with_encoder(Arc::new(NativeEncoder))
    }

    pub fn with_encoder(encoder: Arc<dyn RasterEncoder>) -> Self {
        Self { encoder }
    }

    #[instrument(skip_all, fields(name = %media.name(), size = media.size()))]
    pub async fn compress(&self, media: &RawMedia, options: &ImageOptions) -> Result<CompressedResult> {
        let encoder = Arc::clone(&self.encoder);
        let media = media.clone();
        let options = options.clone();

        let result = tokio::task::spawn_blocking(move || compress_image(encoder.as_ref(), &media, &options))
            .await
            .map_err(|e| IngestError::Encode(format!("image worker failed: {e}")))??;

        info!(
            original = result.original_size,
            compressed = result.compressed_size,
            mime = %result.blob.mime_type,
            "Image compressed"
        );
        Ok(result)
    }
}
