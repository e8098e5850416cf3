//! Request-scoped media values passed between the pipeline stages.

use crate::constants::{mime_for_extension, MIME_OCTET_STREAM};
use crate::error::{IngestError, Result};
use bytes::Bytes;
use std::path::Path;

/// A user-selected file: bytes plus the size and MIME type it was declared with.
///
/// Cloning is cheap; the byte buffer is shared and never mutated.
#[derive(Debug, Clone)]
pub struct RawMedia {
    name: String,
    data: Bytes,
    size: u64,
    mime_type: String,
}

impl RawMedia {
    pub fn new(name: impl Into<String>, data: impl Into<Bytes>, mime_type: impl Into<String>) -> Self {
        let data = data.into();
        Self {
            name: name.into(),
            size: data.len() as u64,
            data,
            mime_type: mime_type.into(),
        }
    }

    /// Reads a local file, inferring the declared MIME type from its extension.
    pub async fn from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(IngestError::FileNotFound(path.to_path_buf()));
        }

        let data = tokio::fs::read(path).await?;
        let mime_type = path
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(mime_for_extension)
            .unwrap_or(MIME_OCTET_STREAM);
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok(Self::new(name, data, mime_type))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    /// The file contents as a typed blob, unchanged.
    pub fn to_blob(&self) -> MediaBlob {
        MediaBlob::new(self.data.clone(), self.mime_type.clone())
    }
}

/// Bytes plus the MIME type they are encoded as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaBlob {
    pub data: Bytes,
    pub mime_type: String,
}

impl MediaBlob {
    pub fn new(data: impl Into<Bytes>, mime_type: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            mime_type: mime_type.into(),
        }
    }

    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Output of either compressor.
///
/// `compressed_size` is always the byte length of `blob`.
#[derive(Debug, Clone)]
pub struct CompressedResult {
    pub blob: MediaBlob,
    pub original_size: u64,
    pub compressed_size: u64,
}

impl CompressedResult {
    pub fn new(blob: MediaBlob, original_size: u64) -> Self {
        Self {
            compressed_size: blob.len(),
            blob,
            original_size,
        }
    }
}

/// A pre-signed write URL plus the content type it was issued for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTarget {
    pub presigned_url: String,
    pub content_type: String,
}

impl UploadTarget {
    pub fn new(presigned_url: impl Into<String>, content_type: impl Into<String>) -> Self {
        Self {
            presigned_url: presigned_url.into(),
            content_type: content_type.into(),
        }
    }

    /// The stored object's address: the pre-signed URL without its query string.
    pub fn object_url(&self) -> &str {
        self.presigned_url
            .split(['?', '#'])
            .next()
            .unwrap_or(&self.presigned_url)
    }
}
