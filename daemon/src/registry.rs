/// Shared bookkeeping for in-flight capture workers.
///
/// Two logical sets live behind one mutex: *pending* (workers spawned but not
/// yet confirmed recording) and *recording* (workers that confirmed a live
/// stream and own an output file). Every membership read and mutation — the
/// reconciler's cycle diff, the worker's promotion, cleanup removal, and the
/// janitor's prune — goes through this lock, so the dedup invariant (at most
/// one recording worker per model) holds across all of them.
///
/// Entries carry the id of the worker instance that created them, and
/// `try_promote`/`remove` are scoped to that id: a superseding worker that
/// loses the promotion race exits without touching the winner's entry.
///
/// Critical sections are lock-only; nothing awaits while holding the mutex.
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

/// Identifies one capture attempt. Names repeat across time; ids never do.
pub type WorkerId = u64;

/// Everything a freshly spawned capture worker needs from its registry entry.
/// The worker keeps the stop receiver and hands the sender back to the
/// registry at promotion, so stop signaling for recording workers flows
/// through registry entries, never through worker internals.
pub struct WorkerSeed {
    pub id: WorkerId,
    pub model: String,
    pub stop_rx: watch::Receiver<bool>,
    pub stop_tx: watch::Sender<bool>,
    pub terminated: Arc<AtomicBool>,
}

struct PendingEntry {
    id: WorkerId,
    terminated: Arc<AtomicBool>,
}

struct RecordingEntry {
    id: WorkerId,
    stop_tx: watch::Sender<bool>,
    file: PathBuf,
}

#[derive(Default)]
struct Sets {
    pending: HashMap<String, PendingEntry>,
    recording: HashMap<String, RecordingEntry>,
}

/// Point-in-time copy of registry membership for status display and tests.
/// Taken under the lock, read without it.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub pending: Vec<String>,
    pub recording: Vec<RecordingStatus>,
}

#[derive(Debug, Clone)]
pub struct RecordingStatus {
    pub model: String,
    pub file: PathBuf,
}

#[derive(Default)]
pub struct WorkerRegistry {
    sets: Mutex<Sets>,
    next_id: AtomicU64,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// One reconciler cycle, atomic with respect to promotions and pruning:
    /// inserts a pending entry for every watch-list name with no live worker
    /// and returns the matching seeds for the caller to spawn; signals stop
    /// to every recording worker whose name left the watch-list.
    pub fn begin_cycle(&self, watchlist: &BTreeSet<String>) -> Vec<WorkerSeed> {
        let mut sets = self.sets.lock().unwrap();
        let mut seeds = Vec::new();

        for model in watchlist {
            if sets.pending.contains_key(model) || sets.recording.contains_key(model) {
                continue;
            }
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            let (stop_tx, stop_rx) = watch::channel(false);
            let terminated = Arc::new(AtomicBool::new(false));
            sets.pending
                .insert(model.clone(), PendingEntry { id, terminated: Arc::clone(&terminated) });
            seeds.push(WorkerSeed { id, model: model.clone(), stop_rx, stop_tx, terminated });
        }

        for (model, entry) in &sets.recording {
            if !watchlist.contains(model) {
                // Receiver may already be gone if the worker just finished.
                let _ = entry.stop_tx.send(true);
            }
        }

        seeds
    }

    /// The dedup guard: atomically moves worker `id` from *pending* to
    /// *recording* for `model`, claiming `file` as its output. Returns
    /// `false` — and changes nothing — if another worker already holds the
    /// recording slot.
    pub fn try_promote(
        &self,
        model: &str,
        id: WorkerId,
        file: PathBuf,
        stop_tx: watch::Sender<bool>,
    ) -> bool {
        let mut sets = self.sets.lock().unwrap();
        if sets.recording.contains_key(model) {
            return false;
        }
        if sets.pending.get(model).is_some_and(|entry| entry.id == id) {
            sets.pending.remove(model);
        }
        sets.recording.insert(model.to_string(), RecordingEntry { id, stop_tx, file });
        true
    }

    /// Drops worker `id`'s entries for `model`, wherever they are. Idempotent,
    /// and blind to entries owned by other instances of the same name: a
    /// duplicate loser cleaning up must not evict the winner.
    pub fn remove(&self, model: &str, id: WorkerId) {
        let mut sets = self.sets.lock().unwrap();
        if sets.pending.get(model).is_some_and(|entry| entry.id == id) {
            sets.pending.remove(model);
        }
        if sets.recording.get(model).is_some_and(|entry| entry.id == id) {
            sets.recording.remove(model);
        }
    }

    /// Drops pending entries whose worker terminated without ever being
    /// promoted. Defends against workers that died before their cleanup ran.
    pub fn prune_dead(&self) {
        let mut sets = self.sets.lock().unwrap();
        sets.pending.retain(|_, entry| !entry.terminated.load(Ordering::Acquire));
    }

    pub fn snapshot(&self) -> Snapshot {
        let sets = self.sets.lock().unwrap();
        let mut pending: Vec<String> = sets.pending.keys().cloned().collect();
        pending.sort();
        let mut recording: Vec<RecordingStatus> = sets
            .recording
            .iter()
            .map(|(model, entry)| RecordingStatus { model: model.clone(), file: entry.file.clone() })
            .collect();
        recording.sort_by(|a, b| a.model.cmp(&b.model));
        Snapshot { pending, recording }
    }
}
