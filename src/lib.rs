pub mod classifier;
pub mod cli;
pub mod constants;
pub mod engine;
pub mod error;
pub mod image_compressor;
pub mod logging;
pub mod media;
pub mod pipeline;
pub mod uploader;
pub mod utils;
pub mod video_compressor;

pub use classifier::{get_media_type, is_video_url, media_type_for_path, MediaType};
pub use engine::{EngineLoader, FfmpegEngine, FfmpegLoader, ProgressListener, TranscodeEngine};
pub use error::{IngestError, Result};
pub use image_compressor::{
    compute_target_dimensions, ImageCompressor, ImageOptions, NativeEncoder, RasterEncoder,
    TargetFormat,
};
pub use media::{CompressedResult, MediaBlob, RawMedia, UploadTarget};
pub use pipeline::{IngestOutcome, MediaPipeline, PipelineOptions, Presigner, StaticPresigner};
pub use uploader::{UploadOptions, Uploader};
pub use video_compressor::{PercentCallback, VideoCompressor, VideoOptions};
