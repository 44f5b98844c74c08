use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use cronfleet_store::JobStore;

use crate::executor::Executor;
use crate::lease::ClaimedJob;

/// Tunables for one scheduler instance. All are per-process: a fleet of
/// N instances has an effective concurrency ceiling of N × `max_concurrent`.
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    /// Concurrent executions this process will run at once.
    pub max_concurrent: usize,
    /// Budget for a single claim call, independent of the run token, so
    /// a slow store cannot starve cancellation responsiveness.
    pub claim_timeout: Duration,
    /// Heartbeat cadence for claimed jobs. Must be well below the
    /// store's lease timeout.
    pub renew_interval: Duration,
    /// Sleep between polls when no job is eligible.
    pub idle_backoff: Duration,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            max_concurrent: 200,
            claim_timeout: Duration::from_secs(1),
            renew_interval: Duration::from_secs(60),
            idle_backoff: Duration::from_millis(500),
        }
    }
}

/// The polling control loop: claim → resolve executor → detached
/// execution → reschedule.
///
/// Executors are registered before [`run`](Scheduler::run); the
/// registry is read-only while the loop is live. The loop itself never
/// blocks on an execution — each claim runs in its own task, bounded
/// by the semaphore.
pub struct Scheduler {
    store: Arc<dyn JobStore>,
    executors: HashMap<String, Arc<dyn Executor>>,
    limiter: Arc<Semaphore>,
    opts: SchedulerOptions,
}

impl Scheduler {
    pub fn new(store: Arc<dyn JobStore>, opts: SchedulerOptions) -> Self {
        Self {
            store,
            executors: HashMap::new(),
            limiter: Arc::new(Semaphore::new(opts.max_concurrent)),
            opts,
        }
    }

    /// Register an executor under its kind. Later registrations of the
    /// same kind win.
    pub fn register_executor(&mut self, exec: Arc<dyn Executor>) {
        self.executors.insert(exec.name().to_string(), exec);
    }

    /// Drive the claim loop until `cancel` fires.
    ///
    /// Cancellation stops new claims and is propagated to in-flight
    /// executions; an executor that ignores it keeps its job `Running`
    /// until it returns or the lease expires elsewhere.
    pub async fn run(self, cancel: CancellationToken) {
        info!(
            max_concurrent = self.opts.max_concurrent,
            executors = self.executors.len(),
            "scheduler started"
        );

        loop {
            if cancel.is_cancelled() {
                break;
            }

            // Admission first: waiting for a free slot before claiming
            // means a claimed job is never parked behind the limiter
            // with its lease burning down.
            let permit = tokio::select! {
                _ = cancel.cancelled() => break,
                permit = Arc::clone(&self.limiter).acquire_owned() => {
                    match permit {
                        Ok(p) => p,
                        // Semaphore closed only happens on teardown.
                        Err(_) => break,
                    }
                }
            };

            let claimed =
                match tokio::time::timeout(self.opts.claim_timeout, self.store.claim()).await {
                    Ok(Ok(Some(job))) => job,
                    Ok(Ok(None)) => {
                        // Steady state: nothing due. Back off briefly.
                        drop(permit);
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = tokio::time::sleep(self.opts.idle_backoff) => {}
                        }
                        continue;
                    }
                    Ok(Err(e)) => {
                        error!(err = %e, "claim failed");
                        drop(permit);
                        continue;
                    }
                    Err(_) => {
                        warn!(timeout_ms = self.opts.claim_timeout.as_millis() as u64, "claim timed out");
                        drop(permit);
                        continue;
                    }
                };

            let Some(exec) = self.executors.get(&claimed.executor_kind) else {
                // Not fatal: the job stays Running and self-heals via
                // lease expiry — possibly on an instance that has this
                // executor registered.
                error!(
                    job_id = %claimed.id,
                    kind = %claimed.executor_kind,
                    "no executor registered for kind, leaving job to lease expiry"
                );
                drop(permit);
                continue;
            };
            let exec = Arc::clone(exec);

            let claim = ClaimedJob::new(
                Arc::clone(&self.store),
                claimed,
                self.opts.renew_interval,
            );
            let exec_cancel = cancel.clone();

            // Detached: a slow job must not stall claiming of others.
            tokio::spawn(async move {
                let _permit = permit;
                let job = claim.job.clone();

                match exec.execute(exec_cancel, &job).await {
                    // A run the executor aborted for shutdown never
                    // happened: give the claim back with the schedule
                    // untouched so another instance can pick it up.
                    Err(crate::executor::ExecuteError::Cancelled) => {
                        info!(job_id = %job.id, name = %job.name, "execution cancelled, releasing claim");
                        if let Err(e) = claim.release().await {
                            error!(job_id = %job.id, err = %e, "release failed");
                        }
                        return;
                    }
                    Err(e) => {
                        error!(job_id = %job.id, name = %job.name, err = %e, "job execution failed");
                    }
                    Ok(()) => {}
                }

                // Success and failure both reschedule; a reschedule
                // failure leaves the job Running for lease-expiry
                // self-healing.
                if let Err(e) = claim.complete().await {
                    error!(job_id = %job.id, err = %e, "reschedule failed");
                }
            });
        }

        info!("scheduler stopped");
    }
}
