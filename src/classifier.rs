//! Filename-driven media classification.
//!
//! No content sniffing happens here: a video renamed to `.jpg` is reported as
//! an image.

use crate::constants::VIDEO_EXTENSIONS;
use std::fmt;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaType {
    Image,
    Video,
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaType::Image => write!(f, "image"),
            MediaType::Video => write!(f, "video"),
        }
    }
}

/// Returns true when the path part of `url` (everything before `?`) ends
/// with a known video extension, compared case-insensitively.
pub fn is_video_url(url: &str) -> bool {
    let path = url.split('?').next().unwrap_or(url).to_lowercase();
    VIDEO_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

pub fn get_media_type(url: &str) -> MediaType {
    if is_video_url(url) {
        MediaType::Video
    } else {
        MediaType::Image
    }
}

/// Classifies a local file by its name.
pub fn media_type_for_path(path: &Path) -> MediaType {
    get_media_type(&path.to_string_lossy())
}
