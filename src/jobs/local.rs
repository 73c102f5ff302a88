

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use super::{
    EnqueueOptions, Job, JobHandler, JobQueue, JobSpec, JobTable, Readiness, RunSummary,
};
use crate::core::error::Result;


enum Step {
    Run(Job),
    Blocked(Job, Vec<String>),
    Requeued,
    Stalled(Vec<String>),
    Idle,
}


/// In-process queue running one job at a time in FIFO order. Jobs whose
/// dependencies are still pending go back to the tail.
pub struct LocalJobQueue {
    table: Arc<Mutex<JobTable>>,
}

impl LocalJobQueue {

    #[must_use]
    pub fn new() -> Self {
        Self {
            table: Arc::new(Mutex::new(JobTable::default())),
        }
    }


    fn next_step(&self, requeued_in_a_row: usize) -> Step {
        let mut table = self.table.lock();
        let Some(id) = table.pop_pending() else {
            return Step::Idle;
        };

        match table.readiness_of(&id) {
            Readiness::Ready => match table.start(&id) {
                Some(job) => Step::Run(job),
                None => Step::Requeued,
            },
            Readiness::Blocked(failed) => match table.block(&id, &failed) {
                Some(job) => Step::Blocked(job, failed),
                None => Step::Requeued,
            },
            Readiness::Waiting => {
                table.push_pending(id);
                // a full pass with nothing runnable means the rest can never run
                if requeued_in_a_row >= table.pending_len() {
                    Step::Stalled(table.drain_pending())
                } else {
                    Step::Requeued
                }
            }
        }
    }
}

impl Default for LocalJobQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobQueue for LocalJobQueue {
    fn name(&self) -> &str {
        "local"
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
        let mut summary = RunSummary::default();
        let mut requeued_in_a_row = 0usize;

        loop {
            match self.next_step(requeued_in_a_row) {
                Step::Idle => break,
                Step::Requeued => {
                    requeued_in_a_row += 1;
                }
                Step::Run(job) => {
                    requeued_in_a_row = 0;
                    debug!("Running {} job {}", job.job_type, job.id);

                    let outcome = handler.handle(&job).await;
                    let ok = outcome.is_ok();
                    if let Err(e) = &outcome {
                        error!("Job {} ({}) failed: {}", job.id, job.job_type, e);
                    }
                    self.table
                        .lock()
                        .settle(&job.id, outcome.map_err(|e| e.to_string()));
                    summary.record(&job.id, ok);
                }
                Step::Blocked(job, failed) => {
                    requeued_in_a_row = 0;
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
                Step::Stalled(ids) => {
                    warn!("{} jobs can never become ready, failing them", ids.len());
                    let mut table = self.table.lock();
                    for id in ids {
                        table.settle(&id, Err("dependencies can never be satisfied".to_string()));
                        summary.record(&id, false);
                    }
                    break;
                }
            }
        }

        if summary.processed > 0 {
            info!(
                "Local queue idle: {} processed ({} finished, {} failed)",
                summary.processed, summary.finished, summary.failed
            );
        }
        Ok(summary)
    }
}
