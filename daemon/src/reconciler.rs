/// Reconciles registry membership against the watch-list, once per poll
/// period: spawns a capture worker for every newly listed model and signals
/// stop to recording workers whose model was de-listed.
///
/// The membership diff and both mutations happen inside the registry's
/// `begin_cycle`, so a cycle is atomic with respect to worker promotions and
/// the janitor's pruning. A watch-list read failure skips the cycle and
/// leaves previous membership untouched.
use std::sync::Arc;

use log::{debug, warn};
use tokio::time::{interval, Duration};

use crate::wishlist;
use crate::worker::{CaptureWorker, WorkerContext};

/// Runs forever on the configured poll period.
pub async fn run(ctx: Arc<WorkerContext>) {
    let mut ticker = interval(Duration::from_secs(ctx.settings.check_interval_secs));
    loop {
        ticker.tick().await;
        run_cycle(&ctx);
    }
}

/// One reconciler cycle. Returns the number of workers started, for logging
/// and tests.
pub fn run_cycle(ctx: &Arc<WorkerContext>) -> usize {
    let watchlist = match wishlist::load(&ctx.settings.wishlist) {
        Ok(watchlist) => watchlist,
        Err(e) => {
            warn!("skipping cycle: {e:#}");
            return 0;
        }
    };

    let seeds = ctx.registry.begin_cycle(&watchlist);
    let started = seeds.len();
    for seed in seeds {
        let ctx = Arc::clone(ctx);
        let model = seed.model.clone();
        tokio::spawn(async move {
            let outcome = CaptureWorker::new(seed).run(ctx).await;
            debug!("worker for '{model}' finished: {outcome:?}");
        });
    }
    if started > 0 {
        debug!("started {started} capture worker(s)");
    }
    started
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::registry::WorkerRegistry;
    use crate::resolver::{ByteSource, StreamLocator, StreamReader, StreamResolver};
    use anyhow::Result;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::path::Path;
    use std::time::Duration;
    use tokio::sync::mpsc;

    /// Only "alice" is live; everyone else is offline.
    struct AliceOnlyResolver;

    #[async_trait]
    impl StreamResolver for AliceOnlyResolver {
        async fn probe(&self, model: &str) -> Result<Option<StreamLocator>> {
            Ok((model == "alice").then(|| StreamLocator::new("https://example.test/alice.m3u8")))
        }
    }

    /// Endless trickle so a recording stays open until stopped.
    struct TrickleReader;

    #[async_trait]
    impl StreamReader for TrickleReader {
        async fn open(&self, _locator: &StreamLocator) -> Result<Box<dyn ByteSource>> {
            Ok(Box::new(TrickleSource { sent_header: false }))
        }
    }

    struct TrickleSource {
        sent_header: bool,
    }

    #[async_trait]
    impl ByteSource for TrickleSource {
        async fn read(&mut self, _max: usize) -> Result<Bytes> {
            if !self.sent_header {
                self.sent_header = true;
                return Ok(Bytes::from(vec![0u8; 2000]));
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok(Bytes::from_static(b"x"))
        }
    }

    fn context(dir: &Path, wishlist_body: &str) -> Arc<WorkerContext> {
        let wishlist = dir.join("wishlist.txt");
        std::fs::write(&wishlist, wishlist_body).unwrap();
        let (queue_tx, _queue_rx) = mpsc::unbounded_channel();
        Arc::new(WorkerContext {
            settings: Arc::new(Settings {
                save_directory: dir.to_path_buf(),
                wishlist,
                check_interval_secs: 1,
                post_processing_command: String::new(),
                post_processing_threads: 1,
                min_viable_bytes: 1024,
            }),
            registry: Arc::new(WorkerRegistry::new()),
            resolver: Arc::new(AliceOnlyResolver),
            reader: Arc::new(TrickleReader),
            queue_tx,
        })
    }

    async fn wait_for(registry: &WorkerRegistry, check: impl Fn(&crate::registry::Snapshot) -> bool) {
        for _ in 0..400 {
            if check(&registry.snapshot()) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached: {:?}", registry.snapshot());
    }

    #[tokio::test]
    async fn cycle_records_live_models_and_drops_offline_ones() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), "Alice\nbob\n");

        let started = run_cycle(&ctx);
        assert_eq!(started, 2);

        // "alice" confirms a live stream; "bob" probes offline and vacates.
        wait_for(&ctx.registry, |snap| {
            snap.recording.len() == 1
                && snap.recording[0].model == "alice"
                && snap.pending.is_empty()
        })
        .await;

        // Stop the recording so the spawned task does not outlive the test.
        ctx.registry.begin_cycle(&std::collections::BTreeSet::new());
        wait_for(&ctx.registry, |snap| snap.recording.is_empty()).await;
    }

    #[tokio::test]
    async fn unreadable_wishlist_skips_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), "alice\n");
        std::fs::remove_file(&ctx.settings.wishlist).unwrap();

        assert_eq!(run_cycle(&ctx), 0);
        let snap = ctx.registry.snapshot();
        assert!(snap.pending.is_empty());
        assert!(snap.recording.is_empty());
    }

    #[tokio::test]
    async fn delisting_a_model_stops_its_recording() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), "alice\n");

        run_cycle(&ctx);
        wait_for(&ctx.registry, |snap| snap.recording.len() == 1).await;

        // Next cycle with an emptied watch-list flags the worker to stop.
        std::fs::write(&ctx.settings.wishlist, "").unwrap();
        assert_eq!(run_cycle(&ctx), 0);

        wait_for(&ctx.registry, |snap| snap.recording.is_empty() && snap.pending.is_empty()).await;
    }

    #[tokio::test]
    async fn repeated_cycles_do_not_duplicate_workers() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), "alice\n");

        run_cycle(&ctx);
        wait_for(&ctx.registry, |snap| snap.recording.len() == 1).await;

        // The model is already recording; further cycles start nothing.
        assert_eq!(run_cycle(&ctx), 0);
        assert_eq!(run_cycle(&ctx), 0);
        assert_eq!(ctx.registry.snapshot().recording.len(), 1);

        ctx.registry.begin_cycle(&std::collections::BTreeSet::new());
        wait_for(&ctx.registry, |snap| snap.recording.is_empty()).await;
    }
}
