/// Post-processing pool: a fixed number of workers draining one shared queue
/// of finished recordings, each invoking the configured external command once
/// per item. At-most-once, best-effort: failures are logged and the item is
/// dropped, never retried.
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{info, warn};
use tokio::process::Command;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::config::Settings;

/// Platform tag appended as the last post-processing argument.
pub const PLATFORM_TAG: &str = "cam4";

/// A finished (or externally stopped) recording handed off for processing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessingItem {
    pub model: String,
    pub path: PathBuf,
}

/// Spawns the processing pool: `post_processing_threads` tasks sharing one
/// queue receiver. Returns no handles when post-processing is disabled —
/// nothing enqueues in that case either, so the queue simply goes unused.
pub fn spawn_pool(
    settings: &Arc<Settings>,
    queue_rx: mpsc::UnboundedReceiver<ProcessingItem>,
) -> Vec<JoinHandle<()>> {
    if !settings.post_processing_enabled() {
        return Vec::new();
    }

    let queue_rx = Arc::new(Mutex::new(queue_rx));
    (0..settings.post_processing_threads.max(1))
        .map(|_| {
            let queue_rx = Arc::clone(&queue_rx);
            let settings = Arc::clone(settings);
            tokio::spawn(async move {
                loop {
                    // Lock held only while waiting for the next item, so the
                    // pool drains the queue one claimant at a time.
                    let item = { queue_rx.lock().await.recv().await };
                    let Some(item) = item else { break };
                    process_item(&settings.post_processing_command, &item).await;
                }
            })
        })
        .collect()
}

async fn process_item(command: &str, item: &ProcessingItem) {
    let argv = build_argv(command, item);
    let Some((program, args)) = argv.split_first() else {
        return;
    };

    info!("post-processing '{}' ({})", item.model, item.path.display());
    match Command::new(program).args(args).status().await {
        Ok(status) if status.success() => {}
        Ok(status) => warn!(
            "post-processing for '{}' exited with {status}: {}",
            item.model,
            item.path.display()
        ),
        Err(e) => warn!(
            "post-processing for '{}' failed to launch: {e:#} ({})",
            item.model,
            item.path.display()
        ),
    }
}

/// Argument vector contract: whitespace-split command tokens followed by
/// [full path, file name, directory, model, file stem, platform tag].
pub fn build_argv(command: &str, item: &ProcessingItem) -> Vec<String> {
    let mut argv: Vec<String> = command.split_whitespace().map(str::to_string).collect();
    argv.push(item.path.to_string_lossy().into_owned());
    argv.push(component(&item.path, Path::file_name));
    argv.push(item.path.parent().map(|p| p.to_string_lossy().into_owned()).unwrap_or_default());
    argv.push(item.model.clone());
    argv.push(component(&item.path, Path::file_stem));
    argv.push(PLATFORM_TAG.to_string());
    argv
}

fn component(path: &Path, extract: impl Fn(&Path) -> Option<&std::ffi::OsStr>) -> String {
    extract(path).map(|s| s.to_string_lossy().into_owned()).unwrap_or_default()
}
