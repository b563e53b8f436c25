/// Capture worker: owns one live-capture attempt for one model.
///
/// The lifecycle is a straight line — probe, confirm live, record, done —
/// and "done" is reachable from every earlier point via the cleanup guard:
/// registry removal, undersized-file deletion, and the terminated-flag
/// publication all happen in its `Drop`, so they run exactly once no matter
/// how the attempt ends.
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Local;
use log::{debug, info, warn};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, watch};

use crate::config::Settings;
use crate::processing::ProcessingItem;
use crate::registry::{WorkerId, WorkerRegistry, WorkerSeed};
use crate::resolver::{StreamReader, StreamResolver};

/// Bytes copied per iteration; also the cancellation-latency bound.
const CHUNK_SIZE: usize = 1024;

/// Everything a capture worker (and the reconciler that spawns it) needs.
pub struct WorkerContext {
    pub settings: Arc<Settings>,
    pub registry: Arc<WorkerRegistry>,
    pub resolver: Arc<dyn StreamResolver>,
    pub reader: Arc<dyn StreamReader>,
    pub queue_tx: mpsc::UnboundedSender<ProcessingItem>,
}

/// Terminal outcome of one capture attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Probe said not live (or failed); no file was ever created.
    Offline,
    /// Another worker already holds this model's recording slot.
    Duplicate,
    /// The stream ended on its own.
    Completed,
    /// Stopped cooperatively: cancellation flag or external file deletion.
    Stopped,
    /// I/O error during recording; logged, treated as a stop, no hand-off.
    Failed,
}

/// Why the copy loop ended. All three are clean exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopReason {
    Cancelled,
    FileDeleted,
    EndOfStream,
}

pub struct CaptureWorker {
    id: WorkerId,
    model: String,
    stop_rx: watch::Receiver<bool>,
    stop_tx: watch::Sender<bool>,
    terminated: Arc<AtomicBool>,
}

impl CaptureWorker {
    pub fn new(seed: WorkerSeed) -> Self {
        Self {
            id: seed.id,
            model: seed.model,
            stop_rx: seed.stop_rx,
            stop_tx: seed.stop_tx,
            terminated: seed.terminated,
        }
    }

    /// Runs the attempt to completion. The cleanup guard is armed before the
    /// first fallible step, so every return path below is covered by it.
    pub async fn run(mut self, ctx: Arc<WorkerContext>) -> Outcome {
        let mut guard = CleanupGuard {
            id: self.id,
            model: self.model.clone(),
            registry: Arc::clone(&ctx.registry),
            file: None,
            min_viable_bytes: ctx.settings.min_viable_bytes,
            terminated: Arc::clone(&self.terminated),
        };

        // ── Probing ───────────────────────────────────────────────────────────
        let locator = match ctx.resolver.probe(&self.model).await {
            Ok(Some(locator)) => locator,
            Ok(None) => {
                debug!("'{}' is offline", self.model);
                return Outcome::Offline;
            }
            Err(e) => {
                warn!("probe failed for '{}', treating as offline: {e:#}", self.model);
                return Outcome::Offline;
            }
        };

        // ── Live confirmed ────────────────────────────────────────────────────
        let model_dir = ctx.settings.save_directory.join(&self.model);
        let file_path = model_dir.join(format!(
            "{}_{}.mp4",
            Local::now().format("%Y.%m.%d_%H.%M.%S"),
            self.model
        ));

        if !ctx.registry.try_promote(&self.model, self.id, file_path.clone(), self.stop_tx.clone()) {
            debug!("'{}' already recording elsewhere, backing off", self.model);
            return Outcome::Duplicate;
        }
        guard.file = Some(file_path.clone());

        // ── Recording ─────────────────────────────────────────────────────────
        info!("recording '{}' to {}", self.model, file_path.display());
        match self.record(&ctx, &locator, &model_dir, &file_path).await {
            Ok(reason) => {
                if ctx.settings.post_processing_enabled() {
                    // Pool may already be gone during shutdown.
                    let _ = ctx
                        .queue_tx
                        .send(ProcessingItem { model: self.model.clone(), path: file_path });
                }
                match reason {
                    StopReason::EndOfStream => {
                        info!("stream ended for '{}'", self.model);
                        Outcome::Completed
                    }
                    StopReason::Cancelled | StopReason::FileDeleted => {
                        info!("recording stopped for '{}' ({reason:?})", self.model);
                        Outcome::Stopped
                    }
                }
            }
            Err(e) => {
                warn!("recording failed for '{}': {e:#}", self.model);
                Outcome::Failed
            }
        }
    }

    /// The copy loop. Each iteration observes the two stop conditions — the
    /// cooperative cancellation flag and external deletion of the output
    /// file — before reading the next chunk.
    async fn record(
        &mut self,
        ctx: &WorkerContext,
        locator: &crate::resolver::StreamLocator,
        model_dir: &std::path::Path,
        file_path: &std::path::Path,
    ) -> Result<StopReason> {
        tokio::fs::create_dir_all(model_dir)
            .await
            .with_context(|| format!("Failed to create model directory: {}", model_dir.display()))?;

        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(file_path)
            .await
            .with_context(|| format!("Failed to create output file: {}", file_path.display()))?;

        let mut source = ctx
            .reader
            .open(locator)
            .await
            .with_context(|| format!("Failed to open stream for '{}'", self.model))?;

        loop {
            if *self.stop_rx.borrow_and_update() {
                return Ok(StopReason::Cancelled);
            }
            if tokio::fs::metadata(file_path).await.is_err() {
                return Ok(StopReason::FileDeleted);
            }

            let chunk = source.read(CHUNK_SIZE).await.context("Stream read failed")?;
            if chunk.is_empty() {
                return Ok(StopReason::EndOfStream);
            }
            file.write_all(&chunk).await.context("Output write failed")?;
        }
    }
}

/// Scoped cleanup for one capture attempt. Dropping the guard removes this
/// worker's registry entries, deletes an undersized output file, and
/// publishes termination for the janitor.
struct CleanupGuard {
    id: WorkerId,
    model: String,
    registry: Arc<WorkerRegistry>,
    file: Option<PathBuf>,
    min_viable_bytes: u64,
    terminated: Arc<AtomicBool>,
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        self.registry.remove(&self.model, self.id);

        if let Some(path) = &self.file {
            if let Ok(meta) = std::fs::metadata(path) {
                if meta.len() <= self.min_viable_bytes {
                    match std::fs::remove_file(path) {
                        Ok(()) => debug!(
                            "removed undersized recording for '{}': {}",
                            self.model,
                            path.display()
                        ),
                        Err(e) => warn!(
                            "failed to remove undersized recording {}: {e}",
                            path.display()
                        ),
                    }
                }
            }
        }

        self.terminated.store(true, Ordering::Release);
    }
}
