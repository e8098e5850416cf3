pub const DEFAULT_IMAGE_MAX_WIDTH: u32 = 1920;
pub const DEFAULT_IMAGE_MAX_HEIGHT: u32 = 1920;
pub const DEFAULT_IMAGE_QUALITY: f32 = 0.8;

/// Upper bound on the raster surface, in pixels (width * height).
pub const MAX_SURFACE_PIXELS: u64 = 268_435_456;

pub const DEFAULT_VIDEO_CRF: u8 = 28;
pub const MAX_VIDEO_CRF: u8 = 51;
pub const DEFAULT_VIDEO_MAX_WIDTH: u32 = 1280;

pub const VIDEO_CODEC: &str = "libx264";
pub const VIDEO_PRESET: &str = "ultrafast";
pub const AUDIO_CODEC: &str = "aac";
pub const AUDIO_BITRATE: &str = "128k";
pub const MOVFLAGS_FASTSTART: &str = "+faststart";

// Virtual file names inside the transcoder's scratch filesystem
pub const TRANSCODE_INPUT_FILE: &str = "input.mp4";
pub const TRANSCODE_OUTPUT_FILE: &str = "output.mp4";

pub const DEFAULT_FFMPEG_BINARY: &str = "ffmpeg";

pub const VIDEO_EXTENSIONS: &[&str] = &[".mp4", ".mov", ".webm"];

pub const MIME_WEBP: &str = "image/webp";
pub const MIME_JPEG: &str = "image/jpeg";
pub const MIME_MP4: &str = "video/mp4";
pub const MIME_OCTET_STREAM: &str = "application/octet-stream";

/// Size of each body chunk handed to the transport during upload.
pub const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;

pub const PROGRESS_BAR_TEMPLATE: &str =
    "{spinner:.green} [{bar:40.cyan/blue}] {pos:>3}% {msg}";
pub const PROGRESS_SPINNER_TEMPLATE: &str = "{spinner:.green} {msg}";

// Common output message prefixes
pub const ORIGINAL_SIZE_PREFIX: &str = "📊 Original size:";
pub const COMPRESSED_SIZE_PREFIX: &str = "📈 Compressed size:";
pub const COMPRESSION_RATIO_PREFIX: &str = "🎯 Compression ratio:";
pub const SUCCESS_PREFIX: &str = "✅";
pub const WARNING_PREFIX: &str = "⚠️";
pub const INFO_PREFIX: &str = "📋";

/// Maps a file extension (without the dot) to the MIME type the pipeline
/// declares for it.
pub fn mime_for_extension(extension: &str) -> Option<&'static str> {
    match extension.to_lowercase().as_str() {
        "jpg" | "jpeg" => Some(MIME_JPEG),
        "png" => Some("image/png"),
        "webp" => Some(MIME_WEBP),
        "gif" => Some("image/gif"),
        "bmp" => Some("image/bmp"),
        "mp4" => Some(MIME_MP4),
        "mov" => Some("video/quicktime"),
        "webm" => Some("video/webm"),
        _ => None,
    }
}

/// Inverse of [`mime_for_extension`] for the types the compressors emit.
pub fn extension_for_mime(mime: &str) -> &'static str {
    match mime {
        MIME_WEBP => "webp",
        MIME_JPEG => "jpg",
        "image/png" => "png",
        MIME_MP4 => "mp4",
        "video/quicktime" => "mov",
        "video/webm" => "webm",
        _ => "bin",
    }
}
