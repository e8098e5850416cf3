//! classify → compress → presign → upload, reported as one progress value
//! and one outcome.

use crate::classifier::{get_media_type, MediaType};
use crate::constants::extension_for_mime;
use crate::error::Result;
use crate::image_compressor::{ImageCompressor, ImageOptions};
use crate::media::{CompressedResult, RawMedia, UploadTarget};
use crate::uploader::{UploadOptions, Uploader};
use crate::video_compressor::{PercentCallback, VideoCompressor, VideoOptions};
use async_trait::async_trait;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

/// Share of the overall percentage given to compression; upload gets the rest.
const COMPRESS_SHARE: u8 = 50;

/// Issues upload targets for a file name and content type.
#[async_trait]
pub trait Presigner: Send + Sync {
    async fn presign(&self, file_name: &str, content_type: &str) -> Result<UploadTarget>;
}

/// Hands out one pre-issued URL.
#[derive(Debug, Clone)]
pub struct StaticPresigner {
    url: String,
}

impl StaticPresigner {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl Presigner for StaticPresigner {
    async fn presign(&self, _file_name: &str, content_type: &str) -> Result<UploadTarget> {
        Ok(UploadTarget::new(self.url.clone(), content_type))
    }
}

#[derive(Clone, Default)]
pub struct PipelineOptions {
    pub image: ImageOptions,
    pub video: VideoOptions,
    pub on_progress: Option<PercentCallback>,
    pub cancel: Option<CancellationToken>,
}

impl fmt::Debug for PipelineOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineOptions")
            .field("image", &self.image)
            .field("video", &self.video)
            .field("on_progress", &self.on_progress.is_some())
            .field("cancel", &self.cancel)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestOutcome {
    pub media_type: MediaType,
    pub object_url: String,
    pub content_type: String,
    pub original_size: u64,
    pub compressed_size: u64,
}

/// Maps a stage-local percentage into `[base, base + span]`.
fn scale_percent(base: u8, span: u8, percent: u8) -> u8 {
    base + ((span as u16 * percent.min(100) as u16 + 50) / 100) as u8
}

/// Name under which the compressed file is presigned
///
/// # Arguments
/// * `original` - File name the user picked
/// * `mime_type` - Type the compressor actually produced
///
/// # Returns
/// * The original stem with the produced type's extension (`upload` if there is no stem)
pub fn upload_file_name(original: &str, mime_type: &str) -> String {
    let stem = Path::new(original)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "upload".to_string());
    format!("{}.{}", stem, extension_for_mime(mime_type))
}

#[derive(Clone)]
pub struct MediaPipeline {
    images: ImageCompressor,
    videos: Arc<VideoCompressor>,
    uploader: Uploader,
}

impl Default for MediaPipeline {
    fn default() -> Self {
        Self::new(ImageCompressor::new(), VideoCompressor::shared(), Uploader::new())
    }
}

impl MediaPipeline {
    pub fn new(images: ImageCompressor, videos: Arc<VideoCompressor>, uploader: Uploader) -> Self {
        Self {
            images,
            videos,
            uploader,
        }
    }

    pub fn videos(&self) -> &VideoCompressor {
        &self.videos
    }

    /// Classifies by file name and runs the matching compressor.
    pub async fn compress(&self, media: &RawMedia, options: &PipelineOptions) -> Result<(MediaType, CompressedResult)> {
        let media_type = get_media_type(media.name());
        let result = match media_type {
            MediaType::Image => self.images.compress(media, &options.image).await?,
            MediaType::Video => {
                let mut video = options.video.clone();
                if let Some(callback) = &options.on_progress {
                    let callback = Arc::clone(callback);
                    video.on_progress =
                        Some(Arc::new(move |p| callback(scale_percent(0, COMPRESS_SHARE, p))));
                }
                self.videos.compress(media, &video).await?
            }
        };
        Ok((media_type, result))
    }

    /// Compress `media`, presign a target for the result and upload it
    ///
    /// # Arguments
    /// * `media` - Raw user media; its name decides image vs video
    /// * `presigner` - Issues the upload target for the compressed file
    /// * `options` - Per-kind options, overall progress (0-50 compress, 50-100 upload), cancellation
    ///
    /// # Returns
    /// * The stored object's URL, content type and sizes
    /// * The first error from any stage; nothing is uploaded after a compression failure
    #[instrument(skip_all, fields(name = %media.name(), size = media.size()))]
    pub async fn ingest(
        &self,
        media: &RawMedia,
        presigner: &dyn Presigner,
        options: &PipelineOptions,
    ) -> Result<IngestOutcome> {
        let (media_type, compressed) = self.compress(media, options).await?;
        if let Some(callback) = &options.on_progress {
            callback(COMPRESS_SHARE);
        }

        let file_name = upload_file_name(media.name(), &compressed.blob.mime_type);
        let target = presigner.presign(&file_name, &compressed.blob.mime_type).await?;

        let mut upload = UploadOptions {
            on_progress: None,
            cancel: options.cancel.clone(),
        };
        if let Some(callback) = &options.on_progress {
            let callback = Arc::clone(callback);
            upload.on_progress = Some(Arc::new(move |p| {
                callback(scale_percent(COMPRESS_SHARE, 100 - COMPRESS_SHARE, p))
            }));
        }

        self.uploader
            .upload(&target.presigned_url, &compressed.blob, &target.content_type, &upload)
            .await?;

        let outcome = IngestOutcome {
            media_type,
            object_url: target.object_url().to_string(),
            content_type: target.content_type.clone(),
            original_size: compressed.original_size,
            compressed_size: compressed.compressed_size,
        };
        info!(url = %outcome.object_url, %media_type, "Media ingested");
        Ok(outcome)
    }
}
