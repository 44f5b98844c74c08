use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use cronfleet_store::{Job, JobStore};

use crate::error::Result;
use crate::schedule::next_occurrence;

/// A claimed job with its lease kept alive by a background heartbeat.
///
/// Exactly one `ClaimedJob` exists per successful claim. The heartbeat
/// task stamps `update_time` every `renew_interval` until the claim is
/// completed or released; both teardown paths (and `Drop`, as a safety
/// net) cancel it through the same token.
///
/// Heartbeats are not fenced: if the lease already expired and another
/// instance reclaimed the job, our renewals and the final reschedule
/// write over theirs silently. That is the accepted at-most-one-likely
/// contract.
pub struct ClaimedJob {
    pub job: Job,
    store: Arc<dyn JobStore>,
    heartbeat: CancellationToken,
}

impl ClaimedJob {
    /// Wrap a freshly claimed job and start its heartbeat.
    ///
    /// The claim itself already stamped `update_time`, so the first
    /// renewal happens one full interval later.
    pub fn new(store: Arc<dyn JobStore>, job: Job, renew_interval: Duration) -> Self {
        let heartbeat = CancellationToken::new();
        let token = heartbeat.clone();
        let renew_store = Arc::clone(&store);
        let id = job.id.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(renew_interval);
            // interval fires immediately; skip the zeroth tick.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = renew_store.renew_lease(&id).await {
                            warn!(job_id = %id, err = %e, "lease renewal failed");
                        } else {
                            debug!(job_id = %id, "lease renewed");
                        }
                    }
                }
            }
        });

        Self {
            job,
            store,
            heartbeat,
        }
    }

    /// Finish the claim after execution: stop the heartbeat, then move
    /// the job to its next cron occurrence — or park it when the
    /// expression has none left.
    ///
    /// Called for failed executions too; failure does not change the
    /// next occurrence.
    pub async fn complete(self) -> Result<()> {
        self.heartbeat.cancel();

        let next = match next_occurrence(&self.job.cron_expr, Utc::now()) {
            Ok(next) => next,
            Err(e) => {
                // An unparseable expression at runtime is treated as
                // exhausted: park the job rather than loop on it.
                warn!(job_id = %self.job.id, err = %e, "cron expression unusable, pausing job");
                None
            }
        };

        match next {
            Some(at) => {
                self.store
                    .reschedule(&self.job.id, at.timestamp_millis())
                    .await?
            }
            None => self.store.stop(&self.job.id).await?,
        }
        Ok(())
    }

    /// Voluntarily hand the job back without rescheduling (shutdown
    /// path): stop the heartbeat and return the job to `Waiting` with
    /// its schedule untouched.
    pub async fn release(self) -> Result<()> {
        self.heartbeat.cancel();
        self.store.release(&self.job.id).await?;
        Ok(())
    }
}

impl Drop for ClaimedJob {
    fn drop(&mut self) {
        // Idempotent; ensures no orphaned heartbeat if the owner is
        // dropped without complete()/release().
        self.heartbeat.cancel();
    }
}
