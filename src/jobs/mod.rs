

pub mod concurrent;
pub mod local;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, EnumString, IntoStaticStr};
use uuid::Uuid;

use crate::core::error::{CascadeError, Result};
use crate::deletion::graph::DeletionGraphEdge;

pub use concurrent::ConcurrentJobQueue;
pub use local::LocalJobQueue;


#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, IntoStaticStr)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum JobType {
    InitiateDeletion,
    StartGraphDeletion,
    #[serde(rename = "processTriggerOUTNODE")]
    #[strum(serialize = "processTriggerOUTNODE")]
    ProcessTriggerOutNode,
    #[serde(rename = "processTriggerINNODE")]
    #[strum(serialize = "processTriggerINNODE")]
    ProcessTriggerInNode,
    FinishGraphDeletion,
    StartExternalDeletion,
    RunFieldExternalDeletion,
    InitiateRestoration,
    StartGraphRestoration,
    StartExternalRestoration,
    RunFieldExternalRestoration,
}


#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobInput {
    pub model_name: String,
    pub model_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edge: Option<DeletionGraphEdge>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl JobInput {
    pub fn new(model_name: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            model_name: model_name.into(),
            model_id: model_id.into(),
            reason: None,
            edge: None,
            field: None,
        }
    }

    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    #[must_use]
    pub fn with_edge(mut self, edge: DeletionGraphEdge) -> Self {
        self.edge = Some(edge);
        self
    }

    #[must_use]
    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }


    pub fn require_edge(&self) -> Result<&DeletionGraphEdge> {
        self.edge.as_ref().ok_or_else(|| {
            CascadeError::InvalidJobInput(format!(
                "{}({}) has no edge",
                self.model_name, self.model_id
            ))
        })
    }

    pub fn require_field(&self) -> Result<&str> {
        self.field.as_deref().ok_or_else(|| {
            CascadeError::InvalidJobInput(format!(
                "{}({}) has no field",
                self.model_name, self.model_id
            ))
        })
    }
}


#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub input: JobInput,
    #[serde(default)]
    pub deps: Vec<String>,
}

impl JobSpec {
    pub fn new(job_type: JobType, input: JobInput) -> Self {
        Self {
            job_type,
            input,
            deps: Vec::new(),
        }
    }

    #[must_use]
    pub fn after(mut self, deps: Vec<String>) -> Self {
        self.deps = deps;
        self
    }
}


#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnqueueOptions {
    pub dryrun: bool,
}

impl EnqueueOptions {
    pub fn live() -> Self {
        Self { dryrun: false }
    }

    pub fn dry_run() -> Self {
        Self { dryrun: true }
    }
}


#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Queued,
    Started,
    Finished,
    Failed,
}


#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub input: JobInput,
    pub deps: Vec<String>,
    pub status: JobStatus,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub dryrun: bool,
}

impl Job {
    fn from_spec(spec: JobSpec, options: EnqueueOptions) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            job_type: spec.job_type,
            input: spec.input,
            deps: spec.deps,
            status: JobStatus::Queued,
            result: None,
            error: None,
            dryrun: options.dryrun,
        }
    }

    pub fn options(&self) -> EnqueueOptions {
        EnqueueOptions { dryrun: self.dryrun }
    }
}


#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSummary {
    pub processed: usize,
    pub finished: usize,
    pub failed: usize,
    /// Jobs settled during this run, in completion order.
    pub job_ids: Vec<String>,
}

impl RunSummary {
    fn record(&mut self, job_id: &str, ok: bool) {
        self.processed += 1;
        if ok {
            self.finished += 1;
        } else {
            self.failed += 1;
        }
        self.job_ids.push(job_id.to_string());
    }
}


#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &Job) -> Result<Value>;

    /// Called instead of `handle` when the queue fails `job` because one of
    /// its dependencies failed.
    async fn on_dependency_failed(&self, _job: &Job, _failed: &[String]) -> Result<()> {
        Ok(())
    }
}


#[async_trait]
pub trait JobQueue: Send + Sync {
    fn name(&self) -> &str;

    async fn enqueue(&self, spec: JobSpec, options: EnqueueOptions) -> Result<String>;

    async fn enqueue_batch(&self, specs: Vec<JobSpec>, options: EnqueueOptions) -> Result<Vec<String>> {
        let mut ids = Vec::with_capacity(specs.len());
        for spec in specs {
            ids.push(self.enqueue(spec, options).await?);
        }
        Ok(ids)
    }

    async fn job(&self, id: &str) -> Result<Job>;

    async fn jobs(&self) -> Vec<Job>;

    async fn run_until_idle(&self, handler: Arc<dyn JobHandler>) -> Result<RunSummary>;
}


#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Readiness {
    Ready,
    Waiting,
    /// Failed or unknown dependencies.
    Blocked(Vec<String>),
}


/// Job records plus the FIFO of ids not yet dispatched.
#[derive(Debug, Default)]
pub(crate) struct JobTable {
    jobs: HashMap<String, Job>,
    pending: VecDeque<String>,
}

impl JobTable {

    pub(crate) fn insert(&mut self, spec: JobSpec, options: EnqueueOptions) -> String {
        let job = Job::from_spec(spec, options);
        let id = job.id.clone();
        self.pending.push_back(id.clone());
        self.jobs.insert(id.clone(), job);
        id
    }

    pub(crate) fn get(&self, id: &str) -> Result<Job> {
        self.jobs
            .get(id)
            .cloned()
            .ok_or_else(|| CascadeError::UnknownJob(id.to_string()))
    }

    pub(crate) fn all(&self) -> Vec<Job> {
        self.jobs.values().cloned().collect()
    }


    pub(crate) fn readiness(&self, job: &Job) -> Readiness {
        let mut waiting = false;
        let mut blocked = Vec::new();
        for dep in &job.deps {
            match self.jobs.get(dep).map(|d| d.status) {
                Some(JobStatus::Finished) => {}
                Some(JobStatus::Failed) | None => blocked.push(dep.clone()),
                Some(JobStatus::Queued | JobStatus::Started) => waiting = true,
            }
        }
        if !blocked.is_empty() {
            Readiness::Blocked(blocked)
        } else if waiting {
            Readiness::Waiting
        } else {
            Readiness::Ready
        }
    }

    pub(crate) fn readiness_of(&self, id: &str) -> Readiness {
        match self.jobs.get(id) {
            Some(job) => self.readiness(job),
            None => Readiness::Blocked(vec![id.to_string()]),
        }
    }


    pub(crate) fn pop_pending(&mut self) -> Option<String> {
        self.pending.pop_front()
    }

    pub(crate) fn push_pending(&mut self, id: String) {
        self.pending.push_back(id);
    }

    pub(crate) fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn drain_pending(&mut self) -> Vec<String> {
        self.pending.drain(..).collect()
    }


    pub(crate) fn start(&mut self, id: &str) -> Option<Job> {
        let job = self.jobs.get_mut(id)?;
        job.status = JobStatus::Started;
        Some(job.clone())
    }

    pub(crate) fn settle(&mut self, id: &str, outcome: std::result::Result<Value, String>) {
        if let Some(job) = self.jobs.get_mut(id) {
            match outcome {
                Ok(result) => {
                    job.status = JobStatus::Finished;
                    job.result = Some(result);
                    job.error = None;
                }
                Err(error) => {
                    job.status = JobStatus::Failed;
                    job.error = Some(error);
                }
            }
        }
    }

    pub(crate) fn block(&mut self, id: &str, failed: &[String]) -> Option<Job> {
        let error = CascadeError::DependencyFailed {
            job_id: id.to_string(),
            dependencies: failed.to_vec(),
        };
        self.settle(id, Err(error.to_string()));
        self.jobs.get(id).cloned()
    }
}
