//! Periodic pruning of expired in-memory state (rate-limit counters,
//! sessions).

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::timer_period;

/// Spawn a task that calls `prune` every `every` until `cancel` fires.
///
/// `prune` returns how many entries it removed. The first sweep runs one
/// period after start; `every` is clamped to a sane timer range.
pub fn spawn_sweeper<F, Fut>(
    what: &'static str,
    every: Duration,
    cancel: CancellationToken,
    prune: F,
) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = usize> + Send + 'static,
{
    let every = timer_period(every);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(what, "Sweeper stopped");
                    break;
                }
                _ = interval.tick() => {
                    let removed = prune().await;
                    if removed > 0 {
                        info!(what, removed, "Pruned expired entries");
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn zero_period_is_clamped_not_fatal() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();
        let counter = Arc::clone(&calls);
        let handle = spawn_sweeper("test", Duration::ZERO, cancel.clone(), move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                0
            }
        });

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        cancel.cancel();
        handle.await.unwrap();
    }
}
