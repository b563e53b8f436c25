mod config;
mod janitor;
mod processing;
mod reconciler;
mod registry;
mod resolver;
mod status;
mod wishlist;
mod worker;

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::time::{interval, Duration};

use crate::registry::WorkerRegistry;
use crate::resolver::{CamApiResolver, HttpStreamReader};
use crate::worker::WorkerContext;

const DEFAULT_CONFIG_FILE: &str = "config.toml";
const LOG_FILE: &str = "camwatch.log";

#[tokio::main]
async fn main() {
    init_logging();

    // ── Configuration ─────────────────────────────────────────────────────────
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
    let settings = match config::load(&config_path) {
        Ok(settings) => Arc::new(settings),
        Err(e) => {
            eprintln!("[config] Error: {e:#}");
            std::process::exit(1);
        }
    };

    // ── Shared state ──────────────────────────────────────────────────────────
    let registry = Arc::new(WorkerRegistry::new());
    let client = reqwest::Client::new();
    let (queue_tx, queue_rx) = mpsc::unbounded_channel();
    let ctx = Arc::new(WorkerContext {
        settings: Arc::clone(&settings),
        registry: Arc::clone(&registry),
        resolver: Arc::new(CamApiResolver::new(client.clone())),
        reader: Arc::new(HttpStreamReader::new(client)),
        queue_tx,
    });

    // ── Background tasks ──────────────────────────────────────────────────────
    let _pool = processing::spawn_pool(&settings, queue_rx);
    tokio::spawn(janitor::run(Arc::clone(&registry)));
    tokio::spawn(reconciler::run(Arc::clone(&ctx)));

    // Graceful shutdown on Ctrl+C.
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(true);
        }
    });

    log::info!("camwatch-daemon v{} started", env!("CARGO_PKG_VERSION"));

    // ── Status display loop ───────────────────────────────────────────────────
    let mut ticker = interval(Duration::from_secs(settings.check_interval_secs));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let snapshot = registry.snapshot();
                // Clear screen, home the cursor, repaint.
                print!("\x1b[2J\x1b[H{}", status::render(&snapshot, settings.check_interval_secs));
                let _ = std::io::stdout().flush();
            }
            _ = shutdown_rx.changed() => {
                // In-flight captures and queued post-processing are not
                // awaited; the process exits immediately.
                log::info!("interrupt received, shutting down");
                println!("Shutting down");
                break;
            }
        }
    }
}

/// Diagnostics go to a log file so the console stays free for the status
/// display; if the file cannot be created, fall back to stderr.
fn init_logging() {
    let target = match std::fs::File::create(LOG_FILE) {
        Ok(file) => env_logger::Target::Pipe(Box::new(file)),
        Err(_) => env_logger::Target::Stderr,
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(target)
        .init();
}
