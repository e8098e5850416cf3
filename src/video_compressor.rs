use crate::constants::{
    AUDIO_BITRATE, AUDIO_CODEC, DEFAULT_VIDEO_CRF, DEFAULT_VIDEO_MAX_WIDTH, MAX_VIDEO_CRF,
    MIME_MP4, MOVFLAGS_FASTSTART, TRANSCODE_INPUT_FILE, TRANSCODE_OUTPUT_FILE, VIDEO_CODEC,
    VIDEO_PRESET,
};
use crate::engine::{EngineLoader, FfmpegLoader, ListenerId, TranscodeEngine};
use crate::error::{IngestError, Result};
use crate::media::{CompressedResult, MediaBlob, RawMedia};
use std::fmt;
use std::sync::{Arc, OnceLock};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, instrument, warn};

/// Receives integer percentages in `0..=100`.
pub type PercentCallback = Arc<dyn Fn(u8) + Send + Sync>;

#[derive(Clone)]
pub struct VideoOptions {
    pub crf: u8,
    pub max_width: u32,
    /// MP4 inputs at or below this many bytes are passed through untouched.
    pub skip_below_size: Option<u64>,
    pub on_progress: Option<PercentCallback>,
}

impl Default for VideoOptions {
    fn default() -> Self {
        Self {
            crf: DEFAULT_VIDEO_CRF,
            max_width: DEFAULT_VIDEO_MAX_WIDTH,
            skip_below_size: None,
            on_progress: None,
        }
    }
}

impl fmt::Debug for VideoOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VideoOptions")
            .field("crf", &self.crf)
            .field("max_width", &self.max_width)
            .field("skip_below_size", &self.skip_below_size)
            .field("on_progress", &self.on_progress.is_some())
            .finish()
    }
}

impl VideoOptions {
    pub fn new(crf: Option<u8>, max_width: Option<u32>, skip_below_size: Option<u64>) -> Result<Self> {
        let crf = crf.unwrap_or(DEFAULT_VIDEO_CRF);
        if crf > MAX_VIDEO_CRF {
            return Err(IngestError::InvalidCrf(crf));
        }

        let max_width = max_width.unwrap_or(DEFAULT_VIDEO_MAX_WIDTH);
        if max_width == 0 {
            return Err(IngestError::InvalidDimension("max width"));
        }

        Ok(Self {
            crf,
            max_width,
            skip_below_size,
            on_progress: None,
        })
    }

    pub fn with_progress(mut self, callback: PercentCallback) -> Self {
        self.on_progress = Some(callback);
        self
    }
}

/// Engine progress fraction to a whole percentage in `0..=100`.
pub fn progress_percent(progress: f64) -> u8 {
    if !progress.is_finite() {
        return if progress > 0.0 { 100 } else { 0 };
    }
    (progress * 100.0).round().clamp(0.0, 100.0) as u8
}

/// The argument list for one transcode. Order is fixed so output sizes are
/// reproducible across engines.
pub fn build_transcode_args(crf: u8, max_width: u32) -> Vec<String> {
    vec![
        "-i".to_string(),
        TRANSCODE_INPUT_FILE.to_string(),
        "-vf".to_string(),
        format!("scale='min({max_width},iw)':-2"),
        "-c:v".to_string(),
        VIDEO_CODEC.to_string(),
        "-crf".to_string(),
        crf.to_string(),
        "-preset".to_string(),
        VIDEO_PRESET.to_string(),
        "-c:a".to_string(),
        AUDIO_CODEC.to_string(),
        "-b:a".to_string(),
        AUDIO_BITRATE.to_string(),
        "-movflags".to_string(),
        MOVFLAGS_FASTSTART.to_string(),
        TRANSCODE_OUTPUT_FILE.to_string(),
    ]
}

pub fn should_skip(media: &RawMedia, options: &VideoOptions) -> bool {
    match options.skip_below_size {
        Some(threshold) => media.mime_type() == MIME_MP4 && media.size() <= threshold,
        None => false,
    }
}

/// A loaded engine plus the lock that serializes transcodes against its
/// shared scratch filesystem.
struct TranscoderSession {
    engine: Arc<dyn TranscodeEngine>,
    exec_lock: Arc<Mutex<()>>,
}

/// Unsubscribes a progress listener when dropped.
struct ProgressSubscription<'a> {
    engine: &'a dyn TranscodeEngine,
    id: ListenerId,
}

impl Drop for ProgressSubscription<'_> {
    fn drop(&mut self) {
        self.engine.off_progress(self.id);
    }
}

/// Exclusive use of a session's scratch files for one transcode.
///
/// [`ScratchLease::release`] deletes both files and then unlocks. If the lease
/// is dropped first (the compress future was cancelled), the deletes run on a
/// spawned task that keeps the session locked until they finish.
struct ScratchLease {
    engine: Arc<dyn TranscodeEngine>,
    exclusive: Option<OwnedMutexGuard<()>>,
}

impl ScratchLease {
    async fn acquire(session: &TranscoderSession) -> Self {
        Self {
            engine: Arc::clone(&session.engine),
            exclusive: Some(Arc::clone(&session.exec_lock).lock_owned().await),
        }
    }

    async fn release(mut self) {
        cleanup(self.engine.as_ref()).await;
        self.exclusive.take();
    }
}

impl Drop for ScratchLease {
    fn drop(&mut self) {
        let Some(exclusive) = self.exclusive.take() else {
            return;
        };
        let engine = Arc::clone(&self.engine);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!("Transcode interrupted, cleaning up scratch files");
                handle.spawn(async move {
                    cleanup(engine.as_ref()).await;
                    drop(exclusive);
                });
            }
            Err(_) => warn!("No runtime left to clean up scratch files"),
        }
    }
}

/// Re-encodes videos to a bounded width and bitrate.
///
/// The engine is loaded on first use and kept for the compressor's lifetime.
/// Concurrent first calls wait on the same load.
pub struct VideoCompressor {
    loader: Arc<dyn EngineLoader>,
    session: Mutex<Option<Arc<TranscoderSession>>>,
}

impl Default for VideoCompressor {
    fn default() -> Self {
        Self::new(Arc::new(FfmpegLoader::default()))
    }
}

static SHARED: OnceLock<Arc<VideoCompressor>> = OnceLock::new();

impl VideoCompressor {
    pub fn new(loader: Arc<dyn EngineLoader>) -> Self {
        Self {
            loader,
            session: Mutex::new(None),
        }
    }

    /// Process-wide compressor backed by the default `ffmpeg` loader.
    pub fn shared() -> Arc<VideoCompressor> {
        Arc::clone(SHARED.get_or_init(|| Arc::new(VideoCompressor::default())))
    }

    pub fn is_supported(&self) -> bool {
        self.loader.is_supported()
    }

    pub async fn is_loaded(&self) -> bool {
        self.session.lock().await.is_some()
    }

    /// Drops the cached engine; the next compression loads a fresh one.
    /// Transcodes already holding the session finish on the old engine.
    pub async fn reset(&self) {
        if self.session.lock().await.take().is_some() {
            info!("Transcoding session released");
        }
    }

    async fn session(&self) -> Result<Arc<TranscoderSession>> {
        let mut slot = self.session.lock().await;
        if let Some(session) = slot.as_ref() {
            return Ok(Arc::clone(session));
        }

        debug!("Loading transcoding engine");
        let engine = self.loader.load().await?;
        let session = Arc::new(TranscoderSession {
            engine,
            exec_lock: Arc::new(Mutex::new(())),
        });
        *slot = Some(Arc::clone(&session));
        Ok(session)
    }

    #[instrument(skip_all, fields(name = %media.name(), size = media.size()))]
    pub async fn compress(&self, media: &RawMedia, options: &VideoOptions) -> Result<CompressedResult> {
        if !self.is_supported() {
            return Err(IngestError::Unsupported("no transcoding engine available".to_string()));
        }

        if should_skip(media, options) {
            debug!("MP4 already under the size threshold, skipping transcode");
            if let Some(callback) = &options.on_progress {
                callback(100);
            }
            return Ok(CompressedResult::new(media.to_blob(), media.size()));
        }

        let session = self.session().await?;
        let lease = ScratchLease::acquire(&session).await;
        let engine = session.engine.as_ref();

        let subscription = options.on_progress.as_ref().map(|callback| {
            let callback = Arc::clone(callback);
            ProgressSubscription {
                engine,
                id: engine.on_progress(Arc::new(move |p| callback(progress_percent(p)))),
            }
        });

        let outcome = transcode(engine, media, options).await;
        drop(subscription);
        lease.release().await;

        let data = outcome?;
        let result = CompressedResult::new(MediaBlob::new(data, MIME_MP4), media.size());
        info!(
            original = result.original_size,
            compressed = result.compressed_size,
            "Video compressed"
        );
        Ok(result)
    }
}

async fn transcode(engine: &dyn TranscodeEngine, media: &RawMedia, options: &VideoOptions) -> Result<Vec<u8>> {
    engine.write_file(TRANSCODE_INPUT_FILE, media.data()).await?;
    engine
        .exec(&build_transcode_args(options.crf, options.max_width))
        .await
        .map_err(|e| match e {
            IngestError::Transcode(msg) => IngestError::Transcode(msg),
            other => IngestError::Transcode(other.to_string()),
        })?;
    engine.read_file(TRANSCODE_OUTPUT_FILE).await
}

/// Best-effort removal of both scratch files; never fails.
async fn cleanup(engine: &dyn TranscodeEngine) {
    for name in [TRANSCODE_INPUT_FILE, TRANSCODE_OUTPUT_FILE] {
        if let Err(e) = engine.delete_file(name).await {
            debug!(file = name, error = %e, "Scratch file cleanup skipped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ProgressListeners;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    #[derive(Default)]
    struct FakeEngine {
        files: StdMutex<HashMap<String, Vec<u8>>>,
        exec_args: StdMutex<Vec<Vec<String>>>,
        deleted: StdMutex<Vec<String>>,
        listeners: ProgressListeners,
        fail_exec: bool,
        progress_script: Vec<f64>,
        exec_delay: Option<Duration>,
        running: AtomicUsize,
        max_running: AtomicUsize,
    }

    #[async_trait]
    impl TranscodeEngine for FakeEngine {
        async fn write_file(&self, name: &str, data: &[u8]) -> Result<()> {
            self.files.lock().unwrap().insert(name.to_string(), data.to_vec());
            Ok(())
        }

        async fn exec(&self, args: &[String]) -> Result<()> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_running.fetch_max(now, Ordering::SeqCst);
            self.exec_args.lock().unwrap().push(args.to_vec());
            tokio::time::sleep(self.exec_delay.unwrap_or(Duration::from_millis(10))).await;

            for p in &self.progress_script {
                self.listeners.emit(*p);
            }
            self.running.fetch_sub(1, Ordering::SeqCst);

            if self.fail_exec {
                return Err(IngestError::Transcode("engine crashed".to_string()));
            }
            self.files
                .lock()
                .unwrap()
                .insert(TRANSCODE_OUTPUT_FILE.to_string(), b"transcoded".to_vec());
            Ok(())
        }

        async fn read_file(&self, name: &str) -> Result<Vec<u8>> {
            self.files
                .lock()
                .unwrap()
                .get(name)
                .cloned()
                .ok_or_else(|| IngestError::Transcode(format!("{name} was not produced")))
        }

        async fn delete_file(&self, name: &str) -> Result<()> {
            self.deleted.lock().unwrap().push(name.to_string());
            match self.files.lock().unwrap().remove(name) {
                Some(_) => Ok(()),
                None => Err(IngestError::Io(std::io::ErrorKind::NotFound.into())),
            }
        }

        fn on_progress(&self, listener: crate::engine::ProgressListener) -> ListenerId {
            self.listeners.add(listener)
        }

        fn off_progress(&self, id: ListenerId) {
            self.listeners.remove(id);
        }
    }

    struct FakeLoader {
        engine: Arc<FakeEngine>,
        supported: bool,
        loads: AtomicUsize,
    }

    impl FakeLoader {
        fn new(engine: FakeEngine) -> Arc<Self> {
            Arc::new(Self {
                engine: Arc::new(engine),
                supported: true,
                loads: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl EngineLoader for FakeLoader {
        fn is_supported(&self) -> bool {
            self.supported
        }

        async fn load(&self) -> Result<Arc<dyn TranscodeEngine>> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            let engine: Arc<dyn TranscodeEngine> = self.engine.clone();
            Ok(engine)
        }
    }

    fn mp4(size: usize) -> RawMedia {
        RawMedia::new("clip.mp4", vec![7u8; size], MIME_MP4)
    }

    fn recording_callback() -> (PercentCallback, Arc<StdMutex<Vec<u8>>>) {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (Arc::new(move |p| sink.lock().unwrap().push(p)), seen)
    }

    #[test]
    fn test_default_transcode_args() {
        let args = build_transcode_args(DEFAULT_VIDEO_CRF, DEFAULT_VIDEO_MAX_WIDTH);
        assert_eq!(
            args,
            vec![
                "-i", "input.mp4",
                "-vf", "scale='min(1280,iw)':-2",
                "-c:v", "libx264",
                "-crf", "28",
                "-preset", "ultrafast",
                "-c:a", "aac",
                "-b:a", "128k",
                "-movflags", "+faststart",
                "output.mp4",
            ]
        );
    }

    #[test]
    fn test_progress_percent_clamps() {
        assert_eq!(progress_percent(0.0), 0);
        assert_eq!(progress_percent(0.424), 42);
        assert_eq!(progress_percent(0.995), 100);
        assert_eq!(progress_percent(1.37), 100);
        assert_eq!(progress_percent(-0.2), 0);
        assert_eq!(progress_percent(f64::NAN), 0);
    }

    #[test]
    fn test_video_options_validation() {
        let options = VideoOptions::new(None, None, None).unwrap();
        assert_eq!(options.crf, 28);
        assert_eq!(options.max_width, 1280);
        assert!(matches!(
            VideoOptions::new(Some(52), None, None),
            Err(IngestError::InvalidCrf(52))
        ));
        assert!(matches!(
            VideoOptions::new(None, Some(0), None),
            Err(IngestError::InvalidDimension(_))
        ));
    }

    #[tokio::test]
    async fn test_unsupported_fails_before_any_work() {
        let loader = Arc::new(FakeLoader {
            engine: Arc::new(FakeEngine::default()),
            supported: false,
            loads: AtomicUsize::new(0),
        });
        let compressor = VideoCompressor::new(loader.clone());

        let result = compressor.compress(&mp4(10), &VideoOptions::default()).await;
        assert!(matches!(result, Err(IngestError::Unsupported(_))));
        assert_eq!(loader.loads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_small_mp4_skips_engine() {
        let loader = FakeLoader::new(FakeEngine::default());
        let compressor = VideoCompressor::new(loader.clone());
        let (callback, seen) = recording_callback();
        let options = VideoOptions::new(None, None, Some(1024)).unwrap().with_progress(callback);

        let media = mp4(1024);
        let result = compressor.compress(&media, &options).await.unwrap();

        assert_eq!(result.blob.data, *media.data());
        assert_eq!(result.blob.mime_type, MIME_MP4);
        assert_eq!(result.compressed_size, result.original_size);
        assert_eq!(*seen.lock().unwrap(), vec![100]);
        assert_eq!(loader.loads.load(Ordering::SeqCst), 0);
        assert!(loader.engine.exec_args.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_large_mp4_is_transcoded() {
        let loader = FakeLoader::new(FakeEngine::default());
        let compressor = VideoCompressor::new(loader.clone());
        let options = VideoOptions::new(None, None, Some(1024)).unwrap();

        let result = compressor.compress(&mp4(1025), &options).await.unwrap();
        assert_eq!(result.blob.data.as_ref(), b"transcoded");
        assert_eq!(result.original_size, 1025);
        assert_eq!(result.compressed_size, 10);
        assert_eq!(loader.engine.exec_args.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_small_non_mp4_is_transcoded() {
        let loader = FakeLoader::new(FakeEngine::default());
        let compressor = VideoCompressor::new(loader.clone());
        let options = VideoOptions::new(None, None, Some(1024 * 1024)).unwrap();

        let media = RawMedia::new("clip.mov", vec![1u8; 16], "video/quicktime");
        let result = compressor.compress(&media, &options).await.unwrap();
        assert_eq!(result.blob.mime_type, MIME_MP4);
        assert_eq!(loader.engine.exec_args.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_progress_mapped_and_unsubscribed() {
        let engine = FakeEngine {
            progress_script: vec![0.0, 0.254, 0.5, 1.2],
            ..Default::default()
        };
        let loader = FakeLoader::new(engine);
        let compressor = VideoCompressor::new(loader.clone());
        let (callback, seen) = recording_callback();
        let options = VideoOptions::default().with_progress(callback);

        compressor.compress(&mp4(64), &options).await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![0, 25, 50, 100]);
        assert!(loader.engine.listeners.is_empty());
    }

    #[tokio::test]
    async fn test_exec_failure_still_cleans_up() {
        let engine = FakeEngine {
            fail_exec: true,
            ..Default::default()
        };
        let loader = FakeLoader::new(engine);
        let compressor = VideoCompressor::new(loader.clone());
        let (callback, _) = recording_callback();
        let options = VideoOptions::default().with_progress(callback);

        let result = compressor.compress(&mp4(64), &options).await;
        assert!(matches!(result, Err(IngestError::Transcode(_))));

        let deleted = loader.engine.deleted.lock().unwrap().clone();
        assert_eq!(deleted, vec![TRANSCODE_INPUT_FILE, TRANSCODE_OUTPUT_FILE]);
        assert!(loader.engine.files.lock().unwrap().is_empty());
        assert!(loader.engine.listeners.is_empty());
    }

    #[tokio::test]
    async fn test_success_leaves_no_scratch_files() {
        let loader = FakeLoader::new(FakeEngine::default());
        let compressor = VideoCompressor::new(loader.clone());

        compressor.compress(&mp4(64), &VideoOptions::default()).await.unwrap();
        assert!(loader.engine.files.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_transcode_still_cleans_up() {
        let loader = FakeLoader::new(FakeEngine {
            exec_delay: Some(Duration::from_secs(5)),
            ..Default::default()
        });
        let compressor = VideoCompressor::new(loader.clone());

        let options = VideoOptions::default();
        let result =
            tokio::time::timeout(Duration::from_millis(50), compressor.compress(&mp4(64), &options)).await;
        assert!(result.is_err());

        // The next transcode waits for the interrupted one's cleanup.
        let session = compressor.session().await.unwrap();
        let _exclusive = session.exec_lock.lock().await;
        assert!(loader.engine.files.lock().unwrap().is_empty());
        assert!(loader.engine.deleted.lock().unwrap().contains(&"input.mp4".to_string()));
        assert!(loader.engine.listeners.is_empty());
    }

    #[tokio::test]
    async fn test_session_loaded_once_across_calls() {
        let loader = FakeLoader::new(FakeEngine::default());
        let compressor = VideoCompressor::new(loader.clone());

        compressor.compress(&mp4(64), &VideoOptions::default()).await.unwrap();
        compressor.compress(&mp4(64), &VideoOptions::default()).await.unwrap();
        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
        assert!(compressor.is_loaded().await);
    }

    #[tokio::test]
    async fn test_concurrent_first_calls_share_load_and_serialize() {
        let loader = FakeLoader::new(FakeEngine::default());
        let compressor = Arc::new(VideoCompressor::new(loader.clone()));

        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let compressor = Arc::clone(&compressor);
                tokio::spawn(async move {
                    compressor.compress(&mp4(64), &VideoOptions::default()).await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
        assert_eq!(loader.engine.max_running.load(Ordering::SeqCst), 1);
        assert_eq!(loader.engine.exec_args.lock().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_reset_forces_reload() {
        let loader = FakeLoader::new(FakeEngine::default());
        let compressor = VideoCompressor::new(loader.clone());

        compressor.compress(&mp4(64), &VideoOptions::default()).await.unwrap();
        compressor.reset().await;
        assert!(!compressor.is_loaded().await);

        compressor.compress(&mp4(64), &VideoOptions::default()).await.unwrap();
        assert_eq!(loader.loads.load(Ordering::SeqCst), 2);
    }
}
