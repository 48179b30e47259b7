use chrono::Utc;

use crate::cache::SessionCache;
use crate::database::attempt_store::AttemptStore;
use crate::error::Result;

/// Moves autosaved progress from the cache into the attempt rows.
#[derive(Clone)]
pub struct AutosaveService {
    store: AttemptStore,
    cache: SessionCache,
}

impl AutosaveService {
    pub fn new(store: AttemptStore, cache: SessionCache) -> Self {
        Self { store, cache }
    }

    /// One reconciliation pass. Returns the number of attempt rows updated.
    ///
    /// The dirty marker is cleared before reading so a write landing mid-flush marks the
    /// attempt again for the next pass. A failed write restores the marker. Cached answers never
    /// replace stored answers that were written later.
    pub async fn flush_once(&self) -> Result<usize> {
        let dirty = self.cache.dirty_attempts().await?;
        let mut flushed = 0;

        for attempt_id in dirty {
            self.cache.clear_dirty(attempt_id).await?;

            let answers = match self.cache.answers(attempt_id).await {
                Ok(answers) => answers,
                Err(err) => {
                    tracing::warn!(%attempt_id, error = %err, "skipping unreadable cached answers");
                    None
                }
            };
            let tab_switches = match self.cache.tab_switches(attempt_id).await {
                Ok(count) => count,
                Err(err) => {
                    tracing::warn!(%attempt_id, error = %err, "skipping unreadable tab counter");
                    None
                }
            };
            if answers.is_none() && tab_switches.is_none() {
                continue;
            }
            let saved_at = answers.as_ref().map_or_else(Utc::now, |stamped| stamped.saved_at);

            match self
                .store
                .apply_flush(
                    attempt_id,
                    answers.as_ref().map(|stamped| &stamped.answers),
                    saved_at,
                    tab_switches,
                )
                .await
            {
                Ok(true) => flushed += 1,
                Ok(false) => {
                    tracing::debug!(%attempt_id, "attempt finalized before flush; dropping cached progress");
                }
                Err(err) => {
                    tracing::error!(%attempt_id, error = %err, "autosave flush failed");
                    if let Err(err) = self.cache.mark_dirty(attempt_id).await {
                        tracing::error!(%attempt_id, error = %err, "could not restore dirty marker");
                    }
                }
            }
        }

        if flushed > 0 {
            tracing::debug!(flushed, "autosave flush complete");
        }
        Ok(flushed)
    }
}
