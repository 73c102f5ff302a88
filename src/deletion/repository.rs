

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use super::models::{TODELETE, ToDelete};
use crate::core::error::{CascadeError, Result};
use crate::db::{Query, Record, Store, TransactionPolicy, record_id, run_with_transaction};
use crate::jobs::{EnqueueOptions, JobInput, JobQueue, JobSpec, JobType};
use crate::schema::ModelRegistry;
use crate::utils::{ROOT, now_millis};


pub const CREATED_AT_FIELD: &str = "createdAt";


/// Per-model repository whose deletes go through the deletion workflow.
pub struct ManagedRepository {
    model: String,
    ttl_seconds: Option<u64>,
    store: Arc<dyn Store>,
    queue: Arc<dyn JobQueue>,
    policy: TransactionPolicy,
}

impl ManagedRepository {

    pub fn new(
        registry: &ModelRegistry,
        model: &str,
        store: Arc<dyn Store>,
        queue: Arc<dyn JobQueue>,
        policy: TransactionPolicy,
    ) -> Result<Self> {
        let descriptor = registry.descriptor(model)?;
        Ok(Self {
            model: model.to_string(),
            ttl_seconds: descriptor.ttl_seconds(),
            store,
            queue,
            policy,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }


    /// Stamps `createdAt` and, for TTL models, schedules the expiry in the
    /// same transaction.
    pub async fn create(&self, mut record: Record) -> Result<Record> {
        let created_at = match record.get(CREATED_AT_FIELD).and_then(Value::as_i64) {
            Some(ts) => ts,
            None => {
                let now = now_millis();
                record.insert(CREATED_AT_FIELD.to_string(), Value::from(now));
                now
            }
        };

        let model = self.model.clone();
        let ttl_seconds = self.ttl_seconds;
        let created = run_with_transaction(self.store.as_ref(), &self.policy, |tx| {
            let model = model.clone();
            let record = record.clone();
            Box::pin(async move {
                let created = tx.create(&model, record).await?;
                if let Some(seconds) = ttl_seconds {
                    let id = record_id(&created)?;
                    let delete_at = created_at.saturating_add(ttl_millis(seconds));
                    tx.put(TODELETE, ToDelete::new(&model, id, delete_at).to_record()?)?;
                }
                Ok(created)
            })
        })
        .await?;

        if let Some(seconds) = self.ttl_seconds {
            debug!("{} created with TTL {}s", self.model, seconds);
        }
        Ok(created)
    }

    pub async fn get(&self, id: &str) -> Result<Option<Record>> {
        self.store.get(&self.model, id).await
    }

    pub async fn update(&self, id: &str, patch: Record) -> Result<Record> {
        let model = self.model.clone();
        let id = id.to_string();
        run_with_transaction(self.store.as_ref(), &self.policy, |tx| {
            let model = model.clone();
            let id = id.clone();
            let patch = patch.clone();
            Box::pin(async move { tx.update(&model, &id, patch).await })
        })
        .await
    }

    pub async fn query(&self, query: &Query) -> Result<Vec<Record>> {
        self.store.query(&self.model, query).await
    }


    /// Enqueues a root deletion; returns the job id.
    pub async fn delete(&self, id: &str) -> Result<String> {
        self.enqueue(JobType::InitiateDeletion, id).await
    }

    pub async fn restore(&self, id: &str) -> Result<String> {
        self.enqueue(JobType::InitiateRestoration, id).await
    }

    async fn enqueue(&self, job_type: JobType, id: &str) -> Result<String> {
        if id.is_empty() {
            return Err(CascadeError::InvalidJobInput(format!("{} id is empty", self.model)));
        }
        self.queue
            .enqueue(
                JobSpec::new(job_type, JobInput::new(&self.model, id).with_reason(ROOT)),
                EnqueueOptions::live(),
            )
            .await
    }
}


fn ttl_millis(seconds: u64) -> i64 {
    i64::try_from(seconds.saturating_mul(1000)).unwrap_or(i64::MAX)
}
