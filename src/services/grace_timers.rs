use dashmap::DashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

struct PendingTimer {
    generation: u64,
    cancel: CancellationToken,
}

#[derive(Default)]
struct Registry {
    pending: DashMap<Uuid, PendingTimer>,
    next_generation: AtomicU64,
    shutdown: CancellationToken,
}

/// Cancellable per-attempt delayed tasks. At most one timer is pending per attempt;
/// scheduling again replaces the previous one.
#[derive(Clone, Default)]
pub struct GraceTimers {
    inner: Arc<Registry>,
}

impl GraceTimers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule<F>(&self, attempt_id: Uuid, delay: Duration, on_fire: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.inner.shutdown.is_cancelled() {
            return;
        }
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let cancel = self.inner.shutdown.child_token();
        let replaced = self.inner.pending.insert(
            attempt_id,
            PendingTimer {
                generation,
                cancel: cancel.clone(),
            },
        );
        if let Some(previous) = replaced {
            previous.cancel.cancel();
        }

        let registry = Arc::clone(&self.inner);
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!(%attempt_id, generation, "grace timer cancelled");
                }
                _ = tokio::time::sleep(delay) => {
                    registry
                        .pending
                        .remove_if(&attempt_id, |_, timer| timer.generation == generation);
                    on_fire.await;
                }
            }
        });
    }

    /// Cancels the pending timer for the attempt. Returns whether one was pending.
    pub fn cancel(&self, attempt_id: Uuid) -> bool {
        match self.inner.pending.remove(&attempt_id) {
            Some((_, timer)) => {
                timer.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancels every pending timer and refuses new ones.
    pub fn cancel_all(&self) {
        self.inner.shutdown.cancel();
        self.inner.pending.clear();
    }

    pub fn is_pending(&self, attempt_id: Uuid) -> bool {
        self.inner.pending.contains_key(&attempt_id)
    }

    pub fn pending(&self) -> usize {
        self.inner.pending.len()
    }
}
