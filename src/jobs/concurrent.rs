

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::{self, JoinError, JoinSet};
use tracing::{debug, error, info, warn};

use super::{
    EnqueueOptions, Job, JobHandler, JobQueue, JobSpec, JobTable, Readiness, RunSummary,
};
use crate::core::config::CascadeConfig;
use crate::core::error::{CascadeError, Result};


/// Dispatches every ready job onto its own task, at most `concurrency` at a
/// time. Dependency gating matches `LocalJobQueue`.
pub struct ConcurrentJobQueue {
    table: Arc<Mutex<JobTable>>,
    concurrency: usize,
}

impl ConcurrentJobQueue {

    #[must_use]
    pub fn new(concurrency: usize) -> Self {
        Self {
            table: Arc::new(Mutex::new(JobTable::default())),
            concurrency: concurrency.max(1),
        }
    }

    pub fn from_config(config: &CascadeConfig) -> Self {
        Self::new(config.queue_concurrency)
    }


    /// Takes every pending job that can be decided now: ready ones are
    /// marked started, blocked ones failed.
    fn scan(&self) -> (Vec<Job>, Vec<(Job, Vec<String>)>) {
        let mut table = self.table.lock();
        let mut ready = Vec::new();
        let mut blocked = Vec::new();
        let mut waiting = Vec::new();

        for id in table.drain_pending() {
            match table.readiness_of(&id) {
                Readiness::Ready => {
                    if let Some(job) = table.start(&id) {
                        ready.push(job);
                    }
                }
                Readiness::Blocked(failed) => {
                    if let Some(job) = table.block(&id, &failed) {
                        blocked.push((job, failed));
                    }
                }
                Readiness::Waiting => waiting.push(id),
            }
        }
        for id in waiting {
            table.push_pending(id);
        }
        (ready, blocked)
    }

    /// A task that died outside the handler still settles its job, so
    /// dependents see the failure.
    fn settle_lost(&self, job_id: &str, error: &JoinError, summary: &mut RunSummary) {
        error!("Job {} task aborted: {}", job_id, error);
        self.table
            .lock()
            .settle(job_id, Err(format!("job task aborted: {}", error)));
        summary.record(job_id, false);
    }
}

#[async_trait]
impl JobQueue for ConcurrentJobQueue {
    fn name(&self) -> &str {
        "concurrent"
    }

    async fn enqueue(&self, spec: JobSpec, options: EnqueueOptions) -> Result<String> {
        let job_type = spec.job_type;
        let id = self.table.lock().insert(spec, options);
        debug!("Enqueued {} job {} (dryrun: {})", job_type, id, options.dryrun);
        Ok(id)
    }

    async fn job(&self, id: &str) -> Result<Job> {
        self.table.lock().get(id)
    }

    async fn jobs(&self) -> Vec<Job> {
        self.table.lock().all()
    }

    async fn run_until_idle(&self, handler: Arc<dyn JobHandler>) -> Result<RunSummary> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut running: JoinSet<(String, std::result::Result<Value, String>)> = JoinSet::new();
        let mut tasks: HashMap<task::Id, String> = HashMap::new();
        let mut summary = RunSummary::default();

        loop {
            let (ready, blocked) = self.scan();

            if !ready.is_empty() || !blocked.is_empty() {
                for (job, failed) in blocked {
                    warn!(
                        "Job {} ({}) not run, dependencies failed: {}",
                        job.id,
                        job.job_type,
                        failed.join(", ")
                    );
                    if let Err(e) = handler.on_dependency_failed(&job, &failed).await {
                        error!("Dependency failure hook for job {} failed: {}", job.id, e);
                    }
                    summary.record(&job.id, false);
                }

                for job in ready {
                    let permit = Arc::clone(&semaphore)
                        .acquire_owned()
                        .await
                        .map_err(|e| CascadeError::Storage(format!("queue semaphore closed: {}", e)))?;
                    let handler = Arc::clone(&handler);
                    let job_id = job.id.clone();
                    debug!("Dispatching {} job {}", job.job_type, job.id);

                    let handle = running.spawn(async move {
                        let _permit = permit;
                        let outcome = match AssertUnwindSafe(handler.handle(&job)).catch_unwind().await {
                            Ok(Ok(value)) => Ok(value),
                            Ok(Err(e)) => {
                                error!("Job {} ({}) failed: {}", job.id, job.job_type, e);
                                Err(e.to_string())
                            }
                            Err(_) => {
                                error!("Job {} ({}) panicked", job.id, job.job_type);
                                Err("job handler panicked".to_string())
                            }
                        };
                        (job.id, outcome)
                    });
                    tasks.insert(handle.id(), job_id);
                }
                continue;
            }

            match running.join_next_with_id().await {
                Some(Ok((task_id, (id, outcome)))) => {
                    tasks.remove(&task_id);
                    let ok = outcome.is_ok();
                    self.table.lock().settle(&id, outcome);
                    summary.record(&id, ok);
                }
                Some(Err(e)) => match tasks.remove(&e.id()) {
                    Some(job_id) => self.settle_lost(&job_id, &e, &mut summary),
                    None => error!("Untracked job task aborted: {}", e),
                },
                None => {
                    let stuck = self.table.lock().drain_pending();
                    if !stuck.is_empty() {
                        warn!("{} jobs can never become ready, failing them", stuck.len());
                        let mut table = self.table.lock();
                        for id in stuck {
                            table.settle(&id, Err("dependencies can never be satisfied".to_string()));
                            summary.record(&id, false);
                        }
                    }
                    break;
                }
            }
        }

        if summary.processed > 0 {
            info!(
                "Concurrent queue idle: {} processed ({} finished, {} failed)",
                summary.processed, summary.finished, summary.failed
            );
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{JobInput, JobStatus, JobType};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Gauge {
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl JobHandler for Gauge {
        async fn handle(&self, job: &Job) -> Result<Value> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            if job.input.model_name == "Bad" {
                return Err(CascadeError::Storage("boom".into()));
            }
            Ok(json!(job.input.model_id))
        }
    }

    fn gauge() -> Arc<Gauge> {
        Arc::new(Gauge {
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        })
    }

    fn spec(model: &str, id: &str) -> JobSpec {
        JobSpec::new(JobType::InitiateDeletion, JobInput::new(model, id))
    }

    #[tokio::test]
    async fn test_runs_independent_jobs_in_parallel_within_limit() {
        let queue = ConcurrentJobQueue::new(2);
        for i in 0..6 {
            queue.enqueue(spec("Post", &i.to_string()), EnqueueOptions::live()).await.unwrap();
        }

        let handler = gauge();
        let summary = queue.run_until_idle(handler.clone()).await.unwrap();

        assert_eq!(summary.finished, 6);
        assert_eq!(handler.peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_dependency_gating() {
        let queue = ConcurrentJobQueue::new(4);
        let parent = queue.enqueue(spec("Post", "parent"), EnqueueOptions::live()).await.unwrap();
        let child = queue
            .enqueue(spec("Post", "child").after(vec![parent.clone()]), EnqueueOptions::live())
            .await
            .unwrap();
        let bad = queue.enqueue(spec("Bad", "bad"), EnqueueOptions::live()).await.unwrap();
        let orphan = queue
            .enqueue(spec("Post", "orphan").after(vec![bad]), EnqueueOptions::live())
            .await
            .unwrap();

        let summary = queue.run_until_idle(gauge()).await.unwrap();

        assert_eq!(summary.processed, 4);
        let order: Vec<_> = summary.job_ids.clone();
        let pos = |id: &str| order.iter().position(|j| j == id).unwrap();
        assert!(pos(&parent) < pos(&child));
        assert_eq!(queue.job(&child).await.unwrap().status, JobStatus::Finished);
        assert_eq!(queue.job(&orphan).await.unwrap().status, JobStatus::Failed);
    }

    struct Recorder {
        blocked: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl JobHandler for Recorder {
        async fn handle(&self, job: &Job) -> Result<Value> {
            Ok(json!(job.input.model_id))
        }

        async fn on_dependency_failed(&self, job: &Job, _failed: &[String]) -> Result<()> {
            self.blocked.lock().push(job.id.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_aborted_task_fails_job_and_blocks_dependents() {
        let queue = ConcurrentJobQueue::new(2);
        let lost = queue.enqueue(spec("Post", "lost"), EnqueueOptions::live()).await.unwrap();
        let child = queue
            .enqueue(spec("Post", "child").after(vec![lost.clone()]), EnqueueOptions::live())
            .await
            .unwrap();
        {
            let mut table = queue.table.lock();
            assert_eq!(table.pop_pending().as_deref(), Some(lost.as_str()));
            table.start(&lost).unwrap();
        }

        let task = tokio::spawn(std::future::pending::<()>());
        task.abort();
        let aborted = task.await.unwrap_err();
        let mut summary = RunSummary::default();
        queue.settle_lost(&lost, &aborted, &mut summary);
        assert_eq!(summary.failed, 1);

        let lost_job = queue.job(&lost).await.unwrap();
        assert_eq!(lost_job.status, JobStatus::Failed);
        assert!(lost_job.error.unwrap().contains("job task aborted"));

        let recorder = Arc::new(Recorder {
            blocked: Mutex::new(Vec::new()),
        });
        queue.run_until_idle(recorder.clone()).await.unwrap();
        assert_eq!(queue.job(&child).await.unwrap().status, JobStatus::Failed);
        assert_eq!(*recorder.blocked.lock(), vec![child]);
    }
}
