//! Transcoding engine seam.
//!
//! An engine owns a private scratch filesystem addressed by bare file names,
//! executes ffmpeg-style argument lists against it, and reports fractional
//! progress to subscribed listeners. [`FfmpegEngine`] drives a native
//! `ffmpeg` binary.

use crate::constants::DEFAULT_FFMPEG_BINARY;
use crate::error::{IngestError, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, instrument};

/// Receives engine progress as a fraction. Values may exceed 1.0.
pub type ProgressListener = Arc<dyn Fn(f64) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[async_trait]
pub trait TranscodeEngine: Send + Sync {
    async fn write_file(&self, name: &str, data: &[u8]) -> Result<()>;

    /// Runs one transcode. Failures surface as [`IngestError::Transcode`].
    async fn exec(&self, args: &[String]) -> Result<()>;

    async fn read_file(&self, name: &str) -> Result<Vec<u8>>;

    async fn delete_file(&self, name: &str) -> Result<()>;

    fn on_progress(&self, listener: ProgressListener) -> ListenerId;

    fn off_progress(&self, id: ListenerId);
}

/// Produces engines. Loading is expensive and happens at most once per
/// compressor session.
#[async_trait]
pub trait EngineLoader: Send + Sync {
    /// Cheap capability probe; never loads anything.
    fn is_supported(&self) -> bool;

    async fn load(&self) -> Result<Arc<dyn TranscodeEngine>>;
}

/// Listener registry shared by engine implementations.
#[derive(Default)]
pub struct ProgressListeners {
    next_id: AtomicU64,
    entries: Mutex<Vec<(ListenerId, ProgressListener)>>,
}

impl ProgressListeners {
    pub fn add(&self, listener: ProgressListener) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().push((id, listener));
        id
    }

    pub fn remove(&self, id: ListenerId) {
        self.lock().retain(|(entry_id, _)| *entry_id != id);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn emit(&self, progress: f64) {
        // Snapshot so listeners can (un)subscribe without deadlocking.
        let listeners: Vec<ProgressListener> =
            self.lock().iter().map(|(_, l)| Arc::clone(l)).collect();
        for listener in listeners {
            listener(progress);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(ListenerId, ProgressListener)>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Rejects anything that is not a plain file name.
pub fn validate_virtual_name(name: &str) -> Result<()> {
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\'])
        || name.contains('\0');
    if invalid {
        return Err(IngestError::InvalidFileName(name.to_string()));
    }
    Ok(())
}

/// Parses the `Duration: HH:MM:SS.cc` banner ffmpeg prints for its input,
/// returning microseconds.
pub fn parse_duration_line(line: &str) -> Option<u64> {
    let rest = line.trim_start().strip_prefix("Duration:")?.trim_start();
    let stamp = rest.split(',').next()?.trim();
    parse_timestamp(stamp)
}

fn parse_timestamp(stamp: &str) -> Option<u64> {
    let mut parts = stamp.split(':');
    let hours: f64 = parts.next()?.parse().ok()?;
    let minutes: f64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    let total = (hours * 3600.0 + minutes * 60.0 + seconds) * 1_000_000.0;
    Some(total.round() as u64)
}

/// Parses an `out_time_us=` / `out_time_ms=` line from `-progress` output.
/// Both keys carry microseconds.
pub fn parse_progress_line(line: &str) -> Option<u64> {
    let value = line
        .strip_prefix("out_time_us=")
        .or_else(|| line.strip_prefix("out_time_ms="))?;
    value.trim().parse::<i64>().ok().map(|v| v.max(0) as u64)
}

const STDERR_TAIL_LINES: usize = 20;

pub struct FfmpegEngine {
    binary: PathBuf,
    version: String,
    scratch: TempDir,
    listeners: ProgressListeners,
}

impl FfmpegEngine {
    pub(crate) fn new(binary: PathBuf, version: String) -> Result<Self> {
        let scratch = tempfile::Builder::new().prefix("media-ingest-").tempdir()?;
        Ok(Self {
            binary,
            version,
            scratch,
            listeners: ProgressListeners::default(),
        })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn scratch_dir(&self) -> &Path {
        self.scratch.path()
    }

    fn resolve(&self, name: &str) -> Result<PathBuf> {
        validate_virtual_name(name)?;
        Ok(self.scratch.path().join(name))
    }
}

#[async_trait]
impl TranscodeEngine for FfmpegEngine {
    async fn write_file(&self, name: &str, data: &[u8]) -> Result<()> {
        let path = self.resolve(name)?;
        tokio::fs::write(path, data).await?;
        Ok(())
    }

    #[instrument(skip_all)]
    async fn exec(&self, args: &[String]) -> Result<()> {
        debug!(binary = %self.binary.display(), ?args, "Starting ffmpeg");

        let mut child = Command::new(&self.binary)
            .args(["-hide_banner", "-nostdin", "-y", "-nostats", "-progress", "pipe:1"])
            .args(args)
            .current_dir(self.scratch.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                IngestError::Transcode(format!("failed to start {}: {}", self.binary.display(), e))
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| IngestError::Transcode("ffmpeg stdout unavailable".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| IngestError::Transcode("ffmpeg stderr unavailable".to_string()))?;

        let duration_us = AtomicU64::new(0);

        let read_stderr = async {
            let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if duration_us.load(Ordering::Relaxed) == 0 {
                    if let Some(us) = parse_duration_line(&line) {
                        duration_us.store(us, Ordering::Relaxed);
                    }
                }
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
            tail
        };

        let read_progress = async {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let Some(out_us) = parse_progress_line(&line) else {
                    continue;
                };
                let total = duration_us.load(Ordering::Relaxed);
                if total > 0 {
                    self.listeners.emit(out_us as f64 / total as f64);
                }
            }
        };

        let (tail, _, status) = tokio::join!(read_stderr, read_progress, child.wait());
        let status = status.map_err(|e| IngestError::Transcode(e.to_string()))?;

        if !status.success() {
            let detail = tail.into_iter().collect::<Vec<_>>().join("\n");
            return Err(IngestError::Transcode(format!("ffmpeg exited with {status}: {detail}")));
        }

        Ok(())
    }

    async fn read_file(&self, name: &str) -> Result<Vec<u8>> {
        let path = self.resolve(name)?;
        tokio::fs::read(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                IngestError::Transcode(format!("{name} was not produced"))
            }
            _ => IngestError::Io(e),
        })
    }

    async fn delete_file(&self, name: &str) -> Result<()> {
        let path = self.resolve(name)?;
        tokio::fs::remove_file(path).await?;
        Ok(())
    }

    fn on_progress(&self, listener: ProgressListener) -> ListenerId {
        self.listeners.add(listener)
    }

    fn off_progress(&self, id: ListenerId) {
        self.listeners.remove(id);
    }
}

/// Loads [`FfmpegEngine`]s for a configured binary.
#[derive(Debug, Clone)]
pub struct FfmpegLoader {
    binary: PathBuf,
}

impl Default for FfmpegLoader {
    fn default() -> Self {
        Self::new(DEFAULT_FFMPEG_BINARY)
    }
}

impl FfmpegLoader {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Resolves the binary the way a shell would: explicit paths as-is,
    /// bare names against `PATH`.
    pub fn resolve_binary(&self) -> Option<PathBuf> {
        if self.binary.components().count() > 1 || self.binary.is_absolute() {
            return self.binary.is_file().then(|| self.binary.clone());
        }

        let path_var = std::env::var_os("PATH")?;
        std::env::split_paths(&path_var).find_map(|dir| {
            let candidate = dir.join(&self.binary);
            if candidate.is_file() {
                return Some(candidate);
            }
            let exe = candidate.with_extension("exe");
            exe.is_file().then_some(exe)
        })
    }
}

#[async_trait]
impl EngineLoader for FfmpegLoader {
    fn is_supported(&self) -> bool {
        self.resolve_binary().is_some()
    }

    #[instrument(skip_all, fields(binary = %self.binary.display()))]
    async fn load(&self) -> Result<Arc<dyn TranscodeEngine>> {
        let binary = self.resolve_binary().ok_or_else(|| {
            IngestError::Unsupported(format!("{} not found", self.binary.display()))
        })?;

        let output = Command::new(&binary)
            .arg("-version")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| IngestError::Unsupported(format!("{}: {}", binary.display(), e)))?;

        if !output.status.success() {
            return Err(IngestError::Unsupported(format!(
                "{} -version exited with {}",
                binary.display(),
                output.status
            )));
        }

        let version = String::from_utf8_lossy(&output.stdout)
            .lines()
            .next()
            .unwrap_or_default()
            .to_string();

        let engine = FfmpegEngine::new(binary, version)?;
        info!(version = %engine.version(), scratch = %engine.scratch_dir().display(), "Transcoding engine loaded");
        Ok(Arc::new(engine))
    }
}
