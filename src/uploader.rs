use crate::constants::UPLOAD_CHUNK_SIZE;
use crate::error::{IngestError, Result};
use crate::media::MediaBlob;
use crate::video_compressor::PercentCallback;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use std::fmt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

#[derive(Clone, Default)]
pub struct UploadOptions {
    pub on_progress: Option<PercentCallback>,
    pub cancel: Option<CancellationToken>,
}

impl fmt::Debug for UploadOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadOptions")
            .field("on_progress", &self.on_progress.is_some())
            .field("cancel", &self.cancel)
            .finish()
    }
}

impl UploadOptions {
    pub fn with_progress(mut self, callback: PercentCallback) -> Self {
        self.on_progress = Some(callback);
        self
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// Percentage of the body sent so far
///
/// # Arguments
/// * `loaded` - Bytes handed to the transport
/// * `total` - Body length, if known
///
/// # Returns
/// * Rounded percentage capped at 100, or `None` when the total is unknown or zero
pub fn upload_percent(loaded: u64, total: Option<u64>) -> Option<u8> {
    let total = total.filter(|t| *t > 0)?;
    Some((loaded as f64 / total as f64 * 100.0).round().min(100.0) as u8)
}

/// Splits a blob into transport-sized chunks without copying.
fn chunk_blob(data: &Bytes) -> Vec<Bytes> {
    (0..data.len())
        .step_by(UPLOAD_CHUNK_SIZE)
        .map(|start| data.slice(start..(start + UPLOAD_CHUNK_SIZE).min(data.len())))
        .collect()
}

/// Single-request `PUT` uploads to pre-signed object storage URLs.
///
/// No retries and no chunked resumption: every call is one request that
/// either succeeds or fails.
#[derive(Debug, Clone, Default)]
pub struct Uploader {
    client: reqwest::Client,
}

impl Uploader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// PUT `blob` to a pre-signed URL
    ///
    /// # Arguments
    /// * `presigned_url` - Write URL issued by the storage backend
    /// * `blob` - Payload, sent as-is
    /// * `content_type` - Value of the `Content-Type` header
    /// * `options` - Progress callback and cancellation token
    ///
    /// # Returns
    /// * `Ok(())` on any 2xx status
    /// * `Err(IngestError::Http)` on other statuses, `Err(IngestError::Network)`
    ///   on transport failure, `Err(IngestError::Abort)` when cancelled
    #[instrument(skip_all, fields(size = blob.len(), content_type = %content_type))]
    pub async fn upload(
        &self,
        presigned_url: &str,
        blob: &MediaBlob,
        content_type: &str,
        options: &UploadOptions,
    ) -> Result<()> {
        let chunks = chunk_blob(&blob.data);
        let body = futures::stream::iter(chunks.into_iter().map(Ok::<_, std::io::Error>));
        self.upload_stream(presigned_url, body, content_type, Some(blob.len()), options)
            .await
    }

    /// Streams `body` as the request payload. Progress is only reported when
    /// `content_length` is known.
    pub async fn upload_stream<S>(
        &self,
        presigned_url: &str,
        body: S,
        content_type: &str,
        content_length: Option<u64>,
        options: &UploadOptions,
    ) -> Result<()>
    where
        S: Stream<Item = std::io::Result<Bytes>> + Send + Sync + 'static,
    {
        if options.cancel.as_ref().is_some_and(|t| t.is_cancelled()) {
            return Err(IngestError::Abort);
        }

        let on_progress = options.on_progress.clone();
        let mut loaded = 0u64;
        let tracked = body.inspect(move |chunk| {
            if let Ok(chunk) = chunk {
                loaded += chunk.len() as u64;
                if let (Some(callback), Some(percent)) =
                    (&on_progress, upload_percent(loaded, content_length))
                {
                    callback(percent);
                }
            }
        });

        let mut request = self
            .client
            .put(presigned_url)
            .header(CONTENT_TYPE, content_type)
            .body(reqwest::Body::wrap_stream(tracked));
        if let Some(length) = content_length {
            request = request.header(CONTENT_LENGTH, length);
        }

        debug!(?content_length, "Sending upload");
        let send = request.send();
        let response = match &options.cancel {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => return Err(IngestError::Abort),
                response = send => response,
            },
            None => send.await,
        }
        .map_err(|e| IngestError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(IngestError::Http {
                status: status.as_u16(),
            });
        }

        info!(status = status.as_u16(), "Upload complete");
        Ok(())
    }
}
