use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use cronfleet_store::Job;

/// Failure reported by an executor. Execution errors never escalate —
/// the scheduler logs them and reschedules the job regardless.
#[derive(Debug, Error)]
pub enum ExecuteError {
    /// The job's name has no registered function in this process.
    #[error("No function registered for task: {name}")]
    UnknownTask { name: String },

    /// The task ran and reported failure.
    #[error("Task failed: {0}")]
    Failed(String),

    /// The task observed cancellation and aborted early.
    #[error("Task cancelled")]
    Cancelled,
}

/// A pluggable runner for one `executor_kind`.
///
/// `execute` must honor `cancel`: when the token fires the executor
/// should abort promptly. Ignoring it only delays shutdown — the
/// scheduler never force-kills an execution, it just leaves the job
/// `Running` until the lease expires.
#[async_trait]
pub trait Executor: Send + Sync {
    /// The `executor_kind` this instance serves.
    fn name(&self) -> &str;

    /// Run the job's payload.
    async fn execute(&self, cancel: CancellationToken, job: &Job) -> Result<(), ExecuteError>;
}

type TaskFuture = Pin<Box<dyn Future<Output = Result<(), ExecuteError>> + Send>>;
type TaskFn = Arc<dyn Fn(CancellationToken, Job) -> TaskFuture + Send + Sync>;

/// In-process executor: a registry of named async functions.
///
/// Functions are keyed by *job name*, not executor kind — two jobs with
/// different names need two registrations even if they do the same
/// work. Registration happens at startup before the scheduler runs;
/// the map is read-only afterwards.
#[derive(Default)]
pub struct LocalFuncExecutor {
    funcs: HashMap<String, TaskFn>,
}

impl LocalFuncExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or overwrite) the function for `name`.
    pub fn register_fn<F, Fut>(&mut self, name: &str, f: F)
    where
        F: Fn(CancellationToken, Job) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ExecuteError>> + Send + 'static,
    {
        self.funcs.insert(
            name.to_string(),
            Arc::new(move |cancel, job| Box::pin(f(cancel, job))),
        );
    }

    /// Names with a registered function, for startup logging.
    pub fn registered(&self) -> impl Iterator<Item = &str> {
        self.funcs.keys().map(String::as_str)
    }
}

#[async_trait]
impl Executor for LocalFuncExecutor {
    fn name(&self) -> &str {
        "local"
    }

    async fn execute(&self, cancel: CancellationToken, job: &Job) -> Result<(), ExecuteError> {
        let f = self
            .funcs
            .get(&job.name)
            .ok_or_else(|| ExecuteError::UnknownTask {
                name: job.name.clone(),
            })?;
        f(cancel, job.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cronfleet_store::JobStatus;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn job(name: &str) -> Job {
        Job {
            id: "j-1".to_string(),
            name: name.to_string(),
            executor_kind: "local".to_string(),
            cron_expr: "* * * * *".to_string(),
            config: "{}".to_string(),
            status: JobStatus::Running,
            next_time_ms: 0,
            update_time_ms: 0,
            version: 1,
            created_at_ms: 0,
        }
    }

    #[tokio::test]
    async fn runs_registered_function() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);

        let mut exec = LocalFuncExecutor::new();
        exec.register_fn("tick", move |_cancel, _job| {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        exec.execute(CancellationToken::new(), &job("tick"))
            .await
            .unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unregistered_name_is_unknown_task() {
        let exec = LocalFuncExecutor::new();
        let err = exec
            .execute(CancellationToken::new(), &job("ghost"))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecuteError::UnknownTask { name } if name == "ghost"));
    }

    #[tokio::test]
    async fn reregistering_overwrites() {
        let mut exec = LocalFuncExecutor::new();
        exec.register_fn("task", |_c, _j| async { Err(ExecuteError::Failed("old".into())) });
        exec.register_fn("task", |_c, _j| async { Ok(()) });

        exec.execute(CancellationToken::new(), &job("task"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn function_observes_cancellation() {
        let mut exec = LocalFuncExecutor::new();
        exec.register_fn("patient", |cancel, _job| async move {
            tokio::select! {
                _ = cancel.cancelled() => Err(ExecuteError::Cancelled),
                _ = tokio::time::sleep(std::time::Duration::from_secs(60)) => Ok(()),
            }
        });

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = exec.execute(cancel, &job("patient")).await.unwrap_err();
        assert!(matches!(err, ExecuteError::Cancelled));
    }
}
