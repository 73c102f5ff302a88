

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use strum::Display;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::graph::Trigger;
use super::models::{DELETED, DeletionStatus, Tombstone};
use crate::core::config::CascadeConfig;
use crate::core::error::{CascadeError, Result};
use crate::core::events::{Event, EventBus, LifecycleKind};
use crate::db::{ID_FIELD, Query, Record, RepositoryFactory, Store, TransactionPolicy, record_id, run_with_transaction};
use crate::jobs::{Job, JobHandler, JobInput, JobQueue, JobSpec, JobStatus, JobType};
use crate::schema::{Condition, ExternalFieldContext, FieldKind, ModelRegistry};
use crate::utils::{ROOT, gen_id, now_millis, safe_truncate_ellipsis};


const MAX_ERROR_CHARS: usize = 500;


#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum Outcome {
    Created,
    ReasonAdded,
    AlreadyDeleted,
    Missing,
    Skipped,
    Started,
    Propagated,
    Finished,
    Failed,
    ReasonRemoved,
    Restored,
    Scheduled,
    Applied,
}

impl Outcome {
    pub fn of(job: &Job) -> Option<Self> {
        let outcome = job.result.as_ref()?.get("outcome")?;
        serde_json::from_value(outcome.clone()).ok()
    }
}


enum Transition {
    Applied(Tombstone),
    Missing,
    Unexpected(DeletionStatus),
}


enum RestoreStep {
    Proceed,
    ReasonRemoved,
    UnknownReason,
    Missing,
    Unexpected(DeletionStatus),
}


/// Executes deletion and restoration jobs. Every handler tolerates replay:
/// a tombstone in an unexpected state is logged and left alone.
pub struct DeletionWorker {
    registry: Arc<ModelRegistry>,
    stores: RepositoryFactory,
    queue: Arc<dyn JobQueue>,
    config: Arc<CascadeConfig>,
    policy: TransactionPolicy,
    events: Option<Arc<EventBus>>,
}

impl DeletionWorker {

    pub fn new(
        registry: Arc<ModelRegistry>,
        stores: RepositoryFactory,
        queue: Arc<dyn JobQueue>,
        config: Arc<CascadeConfig>,
    ) -> Self {
        let policy = TransactionPolicy::from_config(&config);
        Self {
            registry,
            stores,
            queue,
            config,
            policy,
            events: None,
        }
    }

    #[must_use]
    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }


    async fn initiate_deletion(&self, job: &Job) -> Result<Value> {
        let input = &job.input;
        self.registry.descriptor(&input.model_name)?;

        let store = self.stores.select(job.dryrun);
        let tombstone_id = gen_id(&input.model_name, &input.model_id);
        let deleted_at = now_millis();
        let ttl_ms = i64::try_from(self.config.tombstone_ttl().as_millis()).unwrap_or(i64::MAX);

        let outcome = run_with_transaction(store.as_ref(), &self.policy, |tx| {
            let input = input.clone();
            let tombstone_id = tombstone_id.clone();
            Box::pin(async move {
                let existing = match tx.get(DELETED, &tombstone_id).await? {
                    Some(record) => Some(Tombstone::from_record(record)?),
                    None => None,
                };

                if let Some(record) = tx.get(&input.model_name, &input.model_id).await? {
                    // a live record next to a settled tombstone was recreated
                    // after that deletion; anything else is still in flight
                    if let Some(stale) = &existing {
                        if !matches!(
                            stale.status,
                            DeletionStatus::Finished | DeletionStatus::Failed | DeletionStatus::RestoreFailed
                        ) {
                            return Ok((Outcome::Skipped, Some(stale.status)));
                        }
                    }
                    tx.remove(&input.model_name, &input.model_id);
                    let tombstone = Tombstone::new(
                        &input.model_name,
                        &input.model_id,
                        record,
                        input.reason.clone(),
                        deleted_at,
                        ttl_ms,
                    );
                    tx.put(DELETED, tombstone.to_record()?)?;
                    return Ok((Outcome::Created, existing.map(|stale| stale.status)));
                }

                let Some(mut tombstone) = existing else {
                    return Ok((Outcome::Missing, None));
                };
                match input.reason.as_deref() {
                    Some(reason) if tombstone.add_reason(reason) => {
                        tx.put(DELETED, tombstone.to_record()?)?;
                        Ok((Outcome::ReasonAdded, None))
                    }
                    _ => Ok((Outcome::AlreadyDeleted, None)),
                }
            })
        })
        .await?;

        let (outcome, replaced) = outcome;
        match outcome {
            Outcome::Created => {
                if let Some(status) = replaced {
                    info!("Replacing {} tombstone {} of a recreated record", status, tombstone_id);
                }
                info!(
                    "Tombstone {} created (reason: {})",
                    tombstone_id,
                    input.reason.as_deref().unwrap_or("none")
                );
                let base = JobInput::new(&input.model_name, &input.model_id);
                self.queue
                    .enqueue(JobSpec::new(JobType::StartGraphDeletion, base.clone()), job.options())
                    .await?;
                if !job.dryrun {
                    self.queue
                        .enqueue(JobSpec::new(JobType::StartExternalDeletion, base), job.options())
                        .await?;
                }
            }
            Outcome::ReasonAdded => {
                debug!("Added reason to existing tombstone {}", tombstone_id);
            }
            Outcome::Missing => {
                warn!("Nothing to delete for {}: no record and no tombstone", tombstone_id);
            }
            Outcome::Skipped => {
                warn!(
                    "initiateDeletion: {} is live but its tombstone is still {}, left alone",
                    tombstone_id,
                    replaced.map_or_else(String::new, |status| status.to_string())
                );
            }
            _ => {
                debug!("{} already deleted, nothing to do", tombstone_id);
            }
        }

        Ok(json!({ "outcome": outcome, "tombstoneId": tombstone_id }))
    }


    async fn start_graph_deletion(&self, job: &Job) -> Result<Value> {
        let input = &job.input;
        let store = self.stores.select(job.dryrun);
        let tombstone_id = gen_id(&input.model_name, &input.model_id);

        match self
            .transition(&store, &tombstone_id, DeletionStatus::Init, DeletionStatus::Started, None)
            .await?
        {
            Transition::Applied(_) => {}
            Transition::Missing => {
                warn!("startGraphDeletion: tombstone {} not found", tombstone_id);
                return Ok(skipped(&tombstone_id));
            }
            Transition::Unexpected(status) => {
                warn!(
                    "startGraphDeletion: tombstone {} is {}, expected INIT",
                    tombstone_id, status
                );
                return Ok(skipped(&tombstone_id));
            }
        }

        let graph = self.registry.graph()?;
        let triggers: Vec<JobSpec> = graph
            .edges(&input.model_name)
            .iter()
            .map(|edge| {
                let job_type = match edge.trigger {
                    Trigger::OutNode => JobType::ProcessTriggerOutNode,
                    Trigger::InNode => JobType::ProcessTriggerInNode,
                };
                JobSpec::new(
                    job_type,
                    JobInput::new(&input.model_name, &input.model_id).with_edge(edge.clone()),
                )
            })
            .collect();

        let trigger_count = triggers.len();
        let trigger_ids = self.queue.enqueue_batch(triggers, job.options()).await?;
        self.queue
            .enqueue(
                JobSpec::new(
                    JobType::FinishGraphDeletion,
                    JobInput::new(&input.model_name, &input.model_id),
                )
                .after(trigger_ids),
                job.options(),
            )
            .await?;

        debug!("Fanned out {} triggers for {}", trigger_count, tombstone_id);
        Ok(json!({ "outcome": Outcome::Started, "tombstoneId": tombstone_id, "triggers": trigger_count }))
    }


    /// The deleted record is referenced by `edge.model_name` records through
    /// `edge.field`.
    async fn process_trigger_out_node(&self, job: &Job) -> Result<Value> {
        let input = &job.input;
        let edge = input.require_edge()?;
        let store = self.stores.select(job.dryrun);
        let reason = gen_id(&input.model_name, &input.model_id);

        let is_array = self.field_is_array(&edge.model_name, &edge.field)?;
        let query = reference_query(&edge.field, is_array, &input.model_id);
        let children = store.query(&edge.model_name, &query).await?;

        let mut specs = Vec::new();
        for child in &children {
            let child_id = record_id(child)?;
            let qualifies = match edge.condition {
                Condition::Deleted | Condition::AnyDeleted => true,
                Condition::AllDeleted => {
                    all_gone(store.as_ref(), &input.model_name, child.get(&edge.field)).await?
                }
            };
            if qualifies {
                specs.push(JobSpec::new(
                    JobType::InitiateDeletion,
                    JobInput::new(&edge.model_name, child_id).with_reason(reason.clone()),
                ));
            } else {
                debug!(
                    "{}({}) still references live {} records, kept",
                    edge.model_name, child_id, input.model_name
                );
            }
        }

        let cascaded = specs.len();
        self.queue.enqueue_batch(specs, job.options()).await?;
        Ok(json!({
            "outcome": Outcome::Propagated,
            "tombstoneId": reason,
            "candidates": children.len(),
            "cascaded": cascaded,
        }))
    }


    /// The deleted record referenced `edge.model_name` records through its own
    /// `edge.field`; the ids come from the tombstone snapshot.
    async fn process_trigger_in_node(&self, job: &Job) -> Result<Value> {
        let input = &job.input;
        let edge = input.require_edge()?;
        let store = self.stores.select(job.dryrun);
        let tombstone_id = gen_id(&input.model_name, &input.model_id);

        let Some(record) = store.get(DELETED, &tombstone_id).await? else {
            warn!("processTriggerINNODE: tombstone {} not found", tombstone_id);
            return Ok(skipped(&tombstone_id));
        };
        let tombstone = Tombstone::from_record(record)?;
        let parent_ids = reference_ids(tombstone.field(&edge.field));
        let is_array = self.field_is_array(&input.model_name, &edge.field)?;

        let mut specs = Vec::new();
        for parent_id in &parent_ids {
            let qualifies = match edge.condition {
                Condition::Deleted | Condition::AnyDeleted => true,
                Condition::AllDeleted => {
                    let query = reference_query(&edge.field, is_array, parent_id);
                    store.query(&input.model_name, &query).await?.is_empty()
                }
            };
            if qualifies {
                specs.push(JobSpec::new(
                    JobType::InitiateDeletion,
                    JobInput::new(&edge.model_name, parent_id).with_reason(tombstone_id.clone()),
                ));
            } else {
                debug!(
                    "{}({}) still referenced by live {} records, kept",
                    edge.model_name, parent_id, input.model_name
                );
            }
        }

        let cascaded = specs.len();
        self.queue.enqueue_batch(specs, job.options()).await?;
        Ok(json!({
            "outcome": Outcome::Propagated,
            "tombstoneId": tombstone_id,
            "candidates": parent_ids.len(),
            "cascaded": cascaded,
        }))
    }


    async fn finish_graph_deletion(&self, job: &Job) -> Result<Value> {
        let mut failed = Vec::new();
        for dep in &job.deps {
            match self.queue.job(dep).await {
                Ok(dep_job) if dep_job.status == JobStatus::Finished => {}
                _ => failed.push(dep.clone()),
            }
        }
        self.finalize_deletion(job, &failed).await
    }

    async fn finalize_deletion(&self, job: &Job, failed: &[String]) -> Result<Value> {
        let input = &job.input;
        let store = self.stores.select(job.dryrun);
        let tombstone_id = gen_id(&input.model_name, &input.model_id);

        let (target, error) = if failed.is_empty() {
            (DeletionStatus::Finished, None)
        } else {
            (
                DeletionStatus::Failed,
                Some(format!("propagation jobs failed: {}", failed.join(", "))),
            )
        };

        match self
            .transition(&store, &tombstone_id, DeletionStatus::Started, target, error.clone())
            .await?
        {
            Transition::Applied(tombstone) => {
                let (kind, outcome) = if target == DeletionStatus::Finished {
                    info!("Deletion of {} finished", tombstone_id);
                    (LifecycleKind::DeletionFinished, Outcome::Finished)
                } else {
                    error!("Deletion of {} failed: {}", tombstone_id, error.as_deref().unwrap_or(""));
                    (LifecycleKind::DeletionFailed, Outcome::Failed)
                };
                self.emit(
                    kind,
                    job,
                    json!({ "tombstoneId": tombstone.id, "reasons": tombstone.reasons, "error": error }),
                )
                .await;
                Ok(json!({ "outcome": outcome, "tombstoneId": tombstone_id }))
            }
            Transition::Missing => {
                warn!("finishGraphDeletion: tombstone {} not found", tombstone_id);
                Ok(skipped(&tombstone_id))
            }
            Transition::Unexpected(status) => {
                warn!(
                    "finishGraphDeletion: tombstone {} is {}, expected STARTED",
                    tombstone_id, status
                );
                Ok(skipped(&tombstone_id))
            }
        }
    }


    async fn start_external(&self, job: &Job, restoring: bool) -> Result<Value> {
        forbid_dry_run(job)?;
        let input = &job.input;
        let tombstone_id = gen_id(&input.model_name, &input.model_id);

        let Some(data) = self.external_source(input, restoring).await? else {
            warn!("{}: no data found for {}", job.job_type, tombstone_id);
            return Ok(skipped(&tombstone_id));
        };

        let field_job = if restoring {
            JobType::RunFieldExternalRestoration
        } else {
            JobType::RunFieldExternalDeletion
        };
        let descriptor = self.registry.descriptor(&input.model_name)?;
        let specs: Vec<JobSpec> = descriptor
            .external_fields()
            .filter(|(field, _)| data.get(*field).is_some_and(|v| !v.is_null()))
            .map(|(field, _)| {
                JobSpec::new(
                    field_job,
                    JobInput::new(&input.model_name, &input.model_id).with_field(field),
                )
            })
            .collect();

        let scheduled = specs.len();
        self.queue.enqueue_batch(specs, job.options()).await?;
        Ok(json!({ "outcome": Outcome::Scheduled, "tombstoneId": tombstone_id, "fields": scheduled }))
    }

    async fn run_field_external(&self, job: &Job, restoring: bool) -> Result<Value> {
        forbid_dry_run(job)?;
        let input = &job.input;
        let field = input.require_field()?;
        let tombstone_id = gen_id(&input.model_name, &input.model_id);

        let kind = self
            .registry
            .descriptor(&input.model_name)?
            .field_kind(field)
            .and_then(FieldKind::external_kind)
            .ok_or_else(|| {
                CascadeError::InvalidJobInput(format!(
                    "{}.{} is not an external field",
                    input.model_name, field
                ))
            })?
            .to_string();
        let resource = self.registry.external(&kind)?;

        let value = self
            .external_source(input, restoring)
            .await?
            .and_then(|mut data| data.remove(field))
            .filter(|value| !value.is_null());
        let Some(value) = value else {
            warn!("{}: {}.{} has no value", job.job_type, tombstone_id, field);
            return Ok(skipped(&tombstone_id));
        };

        let ctx = ExternalFieldContext {
            model_name: input.model_name.clone(),
            model_id: input.model_id.clone(),
            field: field.to_string(),
            value,
        };
        let hooked = if restoring {
            resource.on_restore(&ctx).await
        } else {
            resource.on_soft_delete(&ctx).await
        };
        hooked.map_err(|e| {
            CascadeError::External(format!("{} hook for {}.{}: {}", kind, tombstone_id, field, e))
        })?;

        debug!("External {} hook ran for {}.{}", kind, tombstone_id, field);
        Ok(json!({ "outcome": Outcome::Applied, "tombstoneId": tombstone_id, "field": field }))
    }

    /// Deletion hooks read the tombstone snapshot, restoration hooks the
    /// restored live record.
    async fn external_source(&self, input: &JobInput, restoring: bool) -> Result<Option<Record>> {
        let live = self.stores.live();
        if restoring {
            return live.get(&input.model_name, &input.model_id).await;
        }
        let tombstone_id = gen_id(&input.model_name, &input.model_id);
        match live.get(DELETED, &tombstone_id).await? {
            Some(record) => Ok(Some(Tombstone::from_record(record)?.model_data)),
            None => Ok(None),
        }
    }


    async fn initiate_restoration(&self, job: &Job) -> Result<Value> {
        let input = &job.input;
        self.registry.descriptor(&input.model_name)?;

        let store = self.stores.select(job.dryrun);
        let tombstone_id = gen_id(&input.model_name, &input.model_id);
        let reason = input.reason.clone().unwrap_or_else(|| ROOT.to_string());

        let step = run_with_transaction(store.as_ref(), &self.policy, |tx| {
            let tombstone_id = tombstone_id.clone();
            let reason = reason.clone();
            Box::pin(async move {
                let Some(record) = tx.get(DELETED, &tombstone_id).await? else {
                    return Ok(RestoreStep::Missing);
                };
                let mut tombstone = Tombstone::from_record(record)?;
                if tombstone.status != DeletionStatus::Finished {
                    return Ok(RestoreStep::Unexpected(tombstone.status));
                }

                if reason != ROOT {
                    if !tombstone.has_reason(&reason) {
                        return Ok(RestoreStep::UnknownReason);
                    }
                    if tombstone.reasons.len() > 1 {
                        tombstone.remove_reason(&reason);
                        tx.put(DELETED, tombstone.to_record()?)?;
                        return Ok(RestoreStep::ReasonRemoved);
                    }
                }

                tombstone.status = DeletionStatus::RestoreStarted;
                tombstone.error = None;
                tx.put(DELETED, tombstone.to_record()?)?;
                Ok(RestoreStep::Proceed)
            })
        })
        .await?;

        match step {
            RestoreStep::Proceed => {}
            RestoreStep::ReasonRemoved => {
                debug!("{} released reason {}, other causes remain", tombstone_id, reason);
                return Ok(json!({ "outcome": Outcome::ReasonRemoved, "tombstoneId": tombstone_id }));
            }
            RestoreStep::UnknownReason => {
                warn!("initiateRestoration: {} was not deleted because of {}", tombstone_id, reason);
                return Ok(skipped(&tombstone_id));
            }
            RestoreStep::Missing => {
                warn!("initiateRestoration: tombstone {} not found", tombstone_id);
                return Ok(skipped(&tombstone_id));
            }
            RestoreStep::Unexpected(status) => {
                warn!(
                    "initiateRestoration: tombstone {} is {}, expected FINISHED",
                    tombstone_id, status
                );
                return Ok(skipped(&tombstone_id));
            }
        }

        if let Err(e) = self.restore_record(store.as_ref(), &tombstone_id).await {
            let message = safe_truncate_ellipsis(&e.to_string(), MAX_ERROR_CHARS);
            error!("Restoration of {} failed: {}", tombstone_id, message);
            if let Err(mark_err) = self
                .transition(
                    &store,
                    &tombstone_id,
                    DeletionStatus::RestoreStarted,
                    DeletionStatus::RestoreFailed,
                    Some(message.clone()),
                )
                .await
            {
                error!("Could not record restore failure on {}: {}", tombstone_id, mark_err);
            }
            self.emit(
                LifecycleKind::RestorationFailed,
                job,
                json!({ "tombstoneId": tombstone_id, "error": message }),
            )
            .await;
            return Err(e);
        }

        info!("Restored {} (reason: {})", tombstone_id, reason);
        let base = JobInput::new(&input.model_name, &input.model_id);
        self.queue
            .enqueue(JobSpec::new(JobType::StartGraphRestoration, base.clone()), job.options())
            .await?;
        if !job.dryrun {
            self.queue
                .enqueue(JobSpec::new(JobType::StartExternalRestoration, base), job.options())
                .await?;
        }
        self.emit(
            LifecycleKind::RestorationFinished,
            job,
            json!({ "tombstoneId": tombstone_id, "reason": reason }),
        )
        .await;

        Ok(json!({ "outcome": Outcome::Restored, "tombstoneId": tombstone_id }))
    }

    async fn restore_record(&self, store: &dyn Store, tombstone_id: &str) -> Result<()> {
        let tombstone_id = tombstone_id.to_string();
        run_with_transaction(store, &self.policy, |tx| {
            let tombstone_id = tombstone_id.clone();
            Box::pin(async move {
                let record = tx
                    .get(DELETED, &tombstone_id)
                    .await?
                    .ok_or_else(|| CascadeError::NotFound(tombstone_id.clone()))?;
                let tombstone = Tombstone::from_record(record)?;
                tx.remove(DELETED, &tombstone_id);
                tx.create(&tombstone.model_name, tombstone.model_data).await?;
                Ok(())
            })
        })
        .await
    }


    async fn start_graph_restoration(&self, job: &Job) -> Result<Value> {
        let input = &job.input;
        let store = self.stores.select(job.dryrun);
        let tombstone_id = gen_id(&input.model_name, &input.model_id);

        let batch_size = self.config.restore_batch_size.max(1);
        let mut cursor: Option<String> = None;
        let mut total = 0usize;
        let mut batches = 0usize;

        loop {
            let mut query = Query::new()
                .contains("reasons", tombstone_id.clone())
                .order_by(ID_FIELD, true)
                .limit(batch_size);
            if let Some(after) = &cursor {
                query = query.gt(ID_FIELD, after.clone());
            }
            let page = store.query(DELETED, &query).await?;
            if page.is_empty() {
                break;
            }

            let page_len = page.len();
            let mut specs = Vec::with_capacity(page_len);
            for record in page {
                let tombstone = Tombstone::from_record(record)?;
                if cursor.as_ref().is_none_or(|after| tombstone.id > *after) {
                    cursor = Some(tombstone.id.clone());
                }
                specs.push(JobSpec::new(
                    JobType::InitiateRestoration,
                    JobInput::new(tombstone.model_name, tombstone.model_id)
                        .with_reason(tombstone_id.clone()),
                ));
            }
            self.queue.enqueue_batch(specs, job.options()).await?;
            total += page_len;
            batches += 1;

            if page_len < batch_size {
                break;
            }
        }

        debug!(
            "Scheduled restoration of {} dependents of {} in {} batches",
            total, tombstone_id, batches
        );
        Ok(json!({ "outcome": Outcome::Scheduled, "tombstoneId": tombstone_id, "dependents": total }))
    }


    async fn transition(
        &self,
        store: &Arc<dyn Store>,
        tombstone_id: &str,
        from: DeletionStatus,
        to: DeletionStatus,
        error: Option<String>,
    ) -> Result<Transition> {
        let tombstone_id = tombstone_id.to_string();
        run_with_transaction(store.as_ref(), &self.policy, |tx| {
            let tombstone_id = tombstone_id.clone();
            let error = error.clone();
            Box::pin(async move {
                let Some(record) = tx.get(DELETED, &tombstone_id).await? else {
                    return Ok(Transition::Missing);
                };
                let mut tombstone = Tombstone::from_record(record)?;
                if tombstone.status != from {
                    return Ok(Transition::Unexpected(tombstone.status));
                }
                tombstone.status = to;
                tombstone.error = error;
                tx.put(DELETED, tombstone.to_record()?)?;
                Ok(Transition::Applied(tombstone))
            })
        })
        .await
    }

    fn field_is_array(&self, model: &str, field: &str) -> Result<bool> {
        Ok(self
            .registry
            .descriptor(model)?
            .field_kind(field)
            .is_some_and(FieldKind::is_array))
    }

    async fn emit(&self, kind: LifecycleKind, job: &Job, payload: Value) {
        if let Some(events) = &self.events {
            let mut event = Event::lifecycle(kind, payload).with_dry_run(job.dryrun);
            // job ids are uuids; subscribers trace an event back to its job
            if let Ok(job_id) = Uuid::parse_str(&job.id) {
                event = event.with_correlation(job_id);
            }
            events.emit(event).await;
        }
    }
}

#[async_trait]
impl JobHandler for DeletionWorker {
    async fn handle(&self, job: &Job) -> Result<Value> {
        match job.job_type {
            JobType::InitiateDeletion => self.initiate_deletion(job).await,
            JobType::StartGraphDeletion => self.start_graph_deletion(job).await,
            JobType::ProcessTriggerOutNode => self.process_trigger_out_node(job).await,
            JobType::ProcessTriggerInNode => self.process_trigger_in_node(job).await,
            JobType::FinishGraphDeletion => self.finish_graph_deletion(job).await,
            JobType::StartExternalDeletion => self.start_external(job, false).await,
            JobType::RunFieldExternalDeletion => self.run_field_external(job, false).await,
            JobType::InitiateRestoration => self.initiate_restoration(job).await,
            JobType::StartGraphRestoration => self.start_graph_restoration(job).await,
            JobType::StartExternalRestoration => self.start_external(job, true).await,
            JobType::RunFieldExternalRestoration => self.run_field_external(job, true).await,
        }
    }

    async fn on_dependency_failed(&self, job: &Job, failed: &[String]) -> Result<()> {
        if job.job_type == JobType::FinishGraphDeletion {
            self.finalize_deletion(job, failed).await?;
        }
        Ok(())
    }
}


fn skipped(tombstone_id: &str) -> Value {
    json!({ "outcome": Outcome::Skipped, "tombstoneId": tombstone_id })
}

fn forbid_dry_run(job: &Job) -> Result<()> {
    if job.dryrun {
        return Err(CascadeError::DryRunMisuse(format!(
            "{} calls external resources",
            job.job_type
        )));
    }
    Ok(())
}

fn reference_query(field: &str, is_array: bool, id: &str) -> Query {
    if is_array {
        Query::new().contains(field, id)
    } else {
        Query::new().eq(field, id)
    }
}

fn reference_ids(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::String(id)) => vec![id.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

async fn all_gone(store: &dyn Store, model: &str, references: Option<&Value>) -> Result<bool> {
    for id in reference_ids(references) {
        if store.get(model, &id).await?.is_some() {
            return Ok(false);
        }
    }
    Ok(true)
}
