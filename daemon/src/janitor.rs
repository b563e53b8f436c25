/// Prunes dead pending entries out of the registry on a short fixed period.
///
/// Workers normally remove themselves via their cleanup guard; the janitor is
/// the backstop that keeps the *pending* set bounded when a worker dies
/// before its guard was armed.
use std::sync::Arc;

use tokio::time::{interval, Duration};

use crate::registry::WorkerRegistry;

const PRUNE_INTERVAL_SECS: u64 = 10;

pub async fn run(registry: Arc<WorkerRegistry>) {
    let mut ticker = interval(Duration::from_secs(PRUNE_INTERVAL_SECS));
    loop {
        ticker.tick().await;
        registry.prune_dead();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn janitor_clears_terminated_pending_entries() {
        let registry = Arc::new(WorkerRegistry::new());
        let seeds = registry.begin_cycle(&BTreeSet::from(["alice".to_string()]));
        seeds[0].terminated.store(true, Ordering::Release);

        let handle = tokio::spawn(run(Arc::clone(&registry)));
        // First tick fires immediately.
        for _ in 0..200 {
            if registry.snapshot().pending.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        handle.abort();
        assert!(registry.snapshot().pending.is_empty());
    }
}
