

use std::sync::Arc;

use tracing::info;

use super::models::{DELETED, DeletedRef, DeletionReport, RestoreReport, SweepStats, Tombstone};
use super::repository::ManagedRepository;
use super::ttl::TtlSweeper;
use super::worker::{DeletionWorker, Outcome};
use crate::core::config::CascadeConfig;
use crate::core::error::Result;
use crate::core::events::EventBus;
use crate::db::{RepositoryFactory, ShadowStore, Store, TransactionPolicy};
use crate::jobs::{
    EnqueueOptions, Job, JobInput, JobQueue, JobSpec, JobStatus, JobType, LocalJobQueue, RunSummary,
};
use crate::schema::ModelRegistry;
use crate::utils::{ROOT, gen_id};


pub struct DeletionManager {
    registry: Arc<ModelRegistry>,
    stores: RepositoryFactory,
    queue: Arc<dyn JobQueue>,
    worker: Arc<DeletionWorker>,
    sweeper: Arc<TtlSweeper>,
    config: Arc<CascadeConfig>,
    events: Option<Arc<EventBus>>,
}

impl DeletionManager {

    /// Fails when the registered deletion rules do not form a valid graph.
    pub fn new(
        registry: Arc<ModelRegistry>,
        live: Arc<dyn Store>,
        queue: Arc<dyn JobQueue>,
        config: CascadeConfig,
    ) -> Result<Self> {
        config.validate()?;
        let graph = registry.graph()?;
        info!(
            "Initializing DeletionManager ({} store, {} queue, {} edges)",
            live.name(),
            queue.name(),
            graph.edge_count()
        );

        let config = Arc::new(config);
        let stores = RepositoryFactory::new(Arc::clone(&live));
        let worker = Arc::new(DeletionWorker::new(
            Arc::clone(&registry),
            stores.clone(),
            Arc::clone(&queue),
            Arc::clone(&config),
        ));
        let sweeper = Arc::new(TtlSweeper::new(
            Arc::clone(&registry),
            live,
            Arc::clone(&queue),
            &config,
        ));

        Ok(Self {
            registry,
            stores,
            queue,
            worker,
            sweeper,
            config,
            events: None,
        })
    }

    /// Lifecycle events are published on `events` from then on.
    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.worker = Arc::new(
            DeletionWorker::new(
                Arc::clone(&self.registry),
                self.stores.clone(),
                Arc::clone(&self.queue),
                Arc::clone(&self.config),
            )
            .with_events(Arc::clone(&events)),
        );
        self.events = Some(events);
        self
    }


    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    pub fn events(&self) -> Option<&Arc<EventBus>> {
        self.events.as_ref()
    }

    pub fn worker(&self) -> Arc<DeletionWorker> {
        Arc::clone(&self.worker)
    }

    pub fn sweeper(&self) -> Arc<TtlSweeper> {
        Arc::clone(&self.sweeper)
    }

    pub fn repository(&self, model: &str) -> Result<ManagedRepository> {
        ManagedRepository::new(
            &self.registry,
            model,
            Arc::clone(self.stores.live()),
            Arc::clone(&self.queue),
            TransactionPolicy::from_config(&self.config),
        )
    }


    /// Exposed job API: `{type, input, deps}` plus `{dryrun}`.
    pub async fn enqueue(&self, spec: JobSpec, options: EnqueueOptions) -> Result<String> {
        self.queue.enqueue(spec, options).await
    }

    pub async fn run_pending(&self) -> Result<RunSummary> {
        self.queue.run_until_idle(self.worker.clone()).await
    }

    pub async fn job(&self, id: &str) -> Result<Job> {
        self.queue.job(id).await
    }


    /// Deletes a record and everything its rules cascade to, running the
    /// queue until idle.
    pub async fn delete(&self, model_name: &str, model_id: &str) -> Result<DeletionReport> {
        self.registry.descriptor(model_name)?;
        self.enqueue(initiate(JobType::InitiateDeletion, model_name, model_id), EnqueueOptions::live())
            .await?;
        let summary = self.run_pending().await?;
        let jobs = collect_jobs(self.queue.as_ref(), &summary).await?;
        Ok(deletion_report(model_name, model_id, false, &jobs))
    }

    /// Runs the same cascade against a fresh shadow of the live store and a
    /// private local queue. Nothing reaches the live store.
    pub async fn simulate_deletion(&self, model_name: &str, model_id: &str) -> Result<DeletionReport> {
        self.registry.descriptor(model_name)?;
        let (jobs, _) = self
            .run_dry(initiate(JobType::InitiateDeletion, model_name, model_id))
            .await?;
        let report = deletion_report(model_name, model_id, true, &jobs);

        info!(
            "Dry run of {} would delete {} records",
            report.root,
            report.count()
        );
        Ok(report)
    }

    /// Dry-run counterpart of `restore`. External restore hooks never run.
    pub async fn simulate_restoration(&self, model_name: &str, model_id: &str) -> Result<RestoreReport> {
        self.registry.descriptor(model_name)?;
        let (jobs, summary) = self
            .run_dry(initiate(JobType::InitiateRestoration, model_name, model_id))
            .await?;
        let report = restore_report(model_name, model_id, &jobs, &summary);

        info!(
            "Dry run of {} would restore {} records",
            report.root,
            report.restored.len()
        );
        Ok(report)
    }

    async fn run_dry(&self, spec: JobSpec) -> Result<(Vec<Job>, RunSummary)> {
        let live = Arc::clone(self.stores.live());
        let shadow = Arc::new(ShadowStore::new(Arc::clone(&live)));
        let queue: Arc<dyn JobQueue> = Arc::new(LocalJobQueue::new());
        let worker = Arc::new(DeletionWorker::new(
            Arc::clone(&self.registry),
            RepositoryFactory::with_shadow(live, shadow),
            Arc::clone(&queue),
            Arc::clone(&self.config),
        ));

        queue.enqueue(spec, EnqueueOptions::dry_run()).await?;
        let summary = queue.run_until_idle(worker).await?;
        let jobs = collect_jobs(queue.as_ref(), &summary).await?;
        Ok((jobs, summary))
    }

    pub async fn restore(&self, model_name: &str, model_id: &str) -> Result<RestoreReport> {
        self.registry.descriptor(model_name)?;
        self.enqueue(initiate(JobType::InitiateRestoration, model_name, model_id), EnqueueOptions::live())
            .await?;
        let summary = self.run_pending().await?;
        let jobs = collect_jobs(self.queue.as_ref(), &summary).await?;
        Ok(restore_report(model_name, model_id, &jobs, &summary))
    }


    pub async fn tombstone(&self, model_name: &str, model_id: &str) -> Result<Option<Tombstone>> {
        let id = gen_id(model_name, model_id);
        match self.stores.live().get(DELETED, &id).await? {
            Some(record) => Ok(Some(Tombstone::from_record(record)?)),
            None => Ok(None),
        }
    }

    /// Schedules due TTL deletions and runs them.
    pub async fn sweep_expired(&self, now: i64) -> Result<SweepStats> {
        let stats = self.sweeper.sweep_expired(now).await?;
        if stats.scheduled > 0 {
            self.run_pending().await?;
        }
        Ok(stats)
    }

    pub async fn purge_tombstones(&self, now: i64) -> Result<SweepStats> {
        self.sweeper.purge_tombstones(now).await
    }
}


fn initiate(job_type: JobType, model_name: &str, model_id: &str) -> JobSpec {
    JobSpec::new(job_type, JobInput::new(model_name, model_id).with_reason(ROOT))
}

async fn collect_jobs(queue: &dyn JobQueue, summary: &RunSummary) -> Result<Vec<Job>> {
    let mut jobs = Vec::with_capacity(summary.job_ids.len());
    for id in &summary.job_ids {
        jobs.push(queue.job(id).await?);
    }
    Ok(jobs)
}

fn settled_with(jobs: &[Job], job_type: JobType, outcome: Outcome) -> Vec<DeletedRef> {
    let mut refs: Vec<DeletedRef> = jobs
        .iter()
        .filter(|job| job.job_type == job_type && job.status == JobStatus::Finished)
        .filter(|job| Outcome::of(job) == Some(outcome))
        .map(|job| DeletedRef {
            model_name: job.input.model_name.clone(),
            model_id: job.input.model_id.clone(),
        })
        .collect();
    refs.sort();
    refs.dedup();
    refs
}

fn restore_report(model_name: &str, model_id: &str, jobs: &[Job], summary: &RunSummary) -> RestoreReport {
    RestoreReport {
        root: gen_id(model_name, model_id),
        restored: settled_with(jobs, JobType::InitiateRestoration, Outcome::Restored),
        jobs_finished: summary.finished,
        jobs_failed: summary.failed,
    }
}

fn deletion_report(model_name: &str, model_id: &str, dry_run: bool, jobs: &[Job]) -> DeletionReport {
    DeletionReport {
        root: gen_id(model_name, model_id),
        dry_run,
        deleted: settled_with(jobs, JobType::InitiateDeletion, Outcome::Created),
        jobs_finished: jobs.iter().filter(|j| j.status == JobStatus::Finished).count(),
        jobs_failed: jobs.iter().filter(|j| j.status == JobStatus::Failed).count(),
    }
}
