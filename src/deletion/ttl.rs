

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::models::{DELETED, DeletionStatus, ScheduleStatus, SweepStats, TODELETE, ToDelete, Tombstone};
use crate::core::config::CascadeConfig;
use crate::core::error::Result;
use crate::db::{Query, Store, TransactionPolicy, run_with_transaction};
use crate::jobs::{EnqueueOptions, JobHandler, JobInput, JobQueue, JobSpec, JobType};
use crate::schema::{ExternalFieldContext, ModelRegistry};
use crate::utils::{ROOT, now_millis};


/// Turns due `TODELETE` rows into deletion jobs and purges expired
/// tombstones. Always works against the live store.
pub struct TtlSweeper {
    registry: Arc<ModelRegistry>,
    store: Arc<dyn Store>,
    queue: Arc<dyn JobQueue>,
    policy: TransactionPolicy,
}

impl TtlSweeper {

    pub fn new(
        registry: Arc<ModelRegistry>,
        store: Arc<dyn Store>,
        queue: Arc<dyn JobQueue>,
        config: &CascadeConfig,
    ) -> Self {
        Self {
            registry,
            store,
            queue,
            policy: TransactionPolicy::from_config(config),
        }
    }


    pub async fn sweep_expired(&self, now: i64) -> Result<SweepStats> {
        let mut stats = SweepStats::default();
        let rows = self
            .store
            .query(TODELETE, &Query::new().eq("status", ScheduleStatus::Init.to_string()))
            .await?;

        for record in rows {
            let row = ToDelete::from_record(record)?;
            if !row.is_due(now) {
                continue;
            }

            if !self.registry.contains(&row.model_name) {
                warn!("TTL row {} names unregistered model {}", row.id, row.model_name);
                self.mark_failed(&row.id).await?;
                stats.failed += 1;
                continue;
            }

            if !self.claim(&row.id, now).await? {
                debug!("TTL row {} already claimed", row.id);
                continue;
            }

            let spec = JobSpec::new(
                JobType::InitiateDeletion,
                JobInput::new(&row.model_name, &row.model_id).with_reason(ROOT),
            );
            if let Err(e) = self.queue.enqueue(spec, EnqueueOptions::live()).await {
                error!("Could not schedule expiry of {}: {}", row.id, e);
                self.release(&row).await?;
                return Err(e);
            }
            stats.scheduled += 1;
        }

        if stats.scheduled > 0 || stats.failed > 0 {
            info!(
                "TTL sweep: {} deletions scheduled, {} rows failed",
                stats.scheduled, stats.failed
            );
        }
        Ok(stats)
    }

    /// Removes the row if it is still due; false when someone else got it.
    async fn claim(&self, row_id: &str, now: i64) -> Result<bool> {
        let row_id = row_id.to_string();
        run_with_transaction(self.store.as_ref(), &self.policy, |tx| {
            let row_id = row_id.clone();
            Box::pin(async move {
                let Some(record) = tx.get(TODELETE, &row_id).await? else {
                    return Ok(false);
                };
                if !ToDelete::from_record(record)?.is_due(now) {
                    return Ok(false);
                }
                tx.remove(TODELETE, &row_id);
                Ok(true)
            })
        })
        .await
    }

    /// Puts a claimed row back so a later sweep picks it up again.
    async fn release(&self, row: &ToDelete) -> Result<()> {
        let record = row.to_record()?;
        run_with_transaction(self.store.as_ref(), &self.policy, |tx| {
            let record = record.clone();
            Box::pin(async move { tx.put(TODELETE, record) })
        })
        .await
    }

    async fn mark_failed(&self, row_id: &str) -> Result<()> {
        let row_id = row_id.to_string();
        run_with_transaction(self.store.as_ref(), &self.policy, |tx| {
            let row_id = row_id.clone();
            Box::pin(async move {
                if let Some(record) = tx.get(TODELETE, &row_id).await? {
                    let mut row = ToDelete::from_record(record)?;
                    row.status = ScheduleStatus::Failed;
                    tx.put(TODELETE, row.to_record()?)?;
                }
                Ok(())
            })
        })
        .await
    }


    /// Permanently drops `FINISHED` tombstones past `expire_at`, running each
    /// external field's hard-delete hook first. A tombstone whose hook fails is
    /// kept for the next sweep.
    pub async fn purge_tombstones(&self, now: i64) -> Result<SweepStats> {
        let mut stats = SweepStats::default();
        let rows = self
            .store
            .query(DELETED, &Query::new().eq("status", DeletionStatus::Finished.to_string()))
            .await?;

        for record in rows {
            let tombstone = Tombstone::from_record(record)?;
            if tombstone.expire_at > now {
                continue;
            }

            if let Err(e) = self.hard_delete_externals(&tombstone).await {
                error!("Hard delete hooks for {} failed: {}", tombstone.id, e);
                stats.failed += 1;
                continue;
            }

            let tombstone_id = tombstone.id.clone();
            let removed = run_with_transaction(self.store.as_ref(), &self.policy, |tx| {
                let tombstone_id = tombstone_id.clone();
                Box::pin(async move {
                    let Some(record) = tx.get(DELETED, &tombstone_id).await? else {
                        return Ok(false);
                    };
                    if Tombstone::from_record(record)?.status != DeletionStatus::Finished {
                        return Ok(false);
                    }
                    tx.remove(DELETED, &tombstone_id);
                    Ok(true)
                })
            })
            .await?;

            if removed {
                debug!("Purged tombstone {}", tombstone_id);
                stats.purged += 1;
            }
        }

        if stats.purged > 0 {
            info!("Purged {} expired tombstones", stats.purged);
        }
        Ok(stats)
    }

    async fn hard_delete_externals(&self, tombstone: &Tombstone) -> Result<()> {
        // tombstones of models no longer registered have no hooks to run
        let Ok(descriptor) = self.registry.descriptor(&tombstone.model_name) else {
            return Ok(());
        };
        for (field, kind) in descriptor.external_fields() {
            let Some(value) = tombstone.field(field) else {
                continue;
            };
            let resource = self.registry.external(kind)?;
            let ctx = ExternalFieldContext {
                model_name: tombstone.model_name.clone(),
                model_id: tombstone.model_id.clone(),
                field: field.to_string(),
                value: value.clone(),
            };
            resource.on_hard_delete(&ctx).await?;
        }
        Ok(())
    }


    /// Sweeps, drains the queue and purges on every tick until `shutdown`
    /// flips to true or its sender is dropped.
    pub async fn run(
        self: Arc<Self>,
        handler: Arc<dyn JobHandler>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("TTL sweeper started (every {:?})", interval);
        let mut ticker = tokio::time::interval(interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let now = now_millis();
                    if let Err(e) = self.sweep_expired(now).await {
                        error!("TTL sweep failed: {}", e);
                    }
                    if let Err(e) = self.queue.run_until_idle(Arc::clone(&handler)).await {
                        error!("Running TTL deletions failed: {}", e);
                    }
                    if let Err(e) = self.purge_tombstones(now).await {
                        error!("Tombstone purge failed: {}", e);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("TTL sweeper stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{InMemoryStore, Record, RepositoryFactory};
    use crate::deletion::worker::DeletionWorker;
    use crate::core::error::CascadeError;
    use crate::jobs::{Job, LocalJobQueue, RunSummary};
    use crate::schema::{ExternalResource, ModelDescriptor};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::{Value, json};

    struct Fixture {
        live: Arc<InMemoryStore>,
        queue: Arc<LocalJobQueue>,
        sweeper: Arc<TtlSweeper>,
        worker: Arc<DeletionWorker>,
    }

    fn fixture(registry: ModelRegistry) -> Fixture {
        let registry = Arc::new(registry);
        let live = Arc::new(InMemoryStore::new());
        let queue = Arc::new(LocalJobQueue::new());
        let config = CascadeConfig::default();
        let sweeper = Arc::new(TtlSweeper::new(
            registry.clone(),
            live.clone(),
            queue.clone(),
            &config,
        ));
        let worker = Arc::new(DeletionWorker::new(
            registry,
            RepositoryFactory::new(live.clone()),
            queue.clone(),
            Arc::new(config),
        ));
        Fixture {
            live,
            queue,
            sweeper,
            worker,
        }
    }

    async fn seed(store: &InMemoryStore, model: &str, value: Value) {
        let mut tx = store.begin().await.unwrap();
        tx.put(model, value.as_object().cloned().unwrap()).unwrap();
        tx.commit().await.unwrap();
    }

    fn sessions() -> ModelRegistry {
        let mut registry = ModelRegistry::new();
        registry
            .register(ModelDescriptor::new("Session").scalar("token").ttl(3600))
            .unwrap();
        registry
    }

    #[tokio::test]
    async fn test_due_rows_become_deletions() {
        let f = fixture(sessions());
        seed(&f.live, "Session", json!({"id": "s1"})).await;
        seed(&f.live, "Session", json!({"id": "s2"})).await;
        seed(&f.live, TODELETE, Value::Object(ToDelete::new("Session", "s1", 1_000).to_record().unwrap())).await;
        seed(&f.live, TODELETE, Value::Object(ToDelete::new("Session", "s2", 9_000).to_record().unwrap())).await;

        let stats = f.sweeper.sweep_expired(5_000).await.unwrap();
        assert_eq!(stats.scheduled, 1);
        assert_eq!(f.live.len(TODELETE), 1);

        f.queue.run_until_idle(f.worker.clone()).await.unwrap();
        assert!(f.live.get("Session", "s1").await.unwrap().is_none());
        assert!(f.live.get("Session", "s2").await.unwrap().is_some());

        let tombstone = Tombstone::from_record(f.live.get(DELETED, "Session(s1)").await.unwrap().unwrap()).unwrap();
        assert_eq!(tombstone.reasons, vec![ROOT.to_string()]);

        assert_eq!(f.sweeper.sweep_expired(5_000).await.unwrap().scheduled, 0);
    }

    #[tokio::test]
    async fn test_unregistered_model_row_marked_failed() {
        let f = fixture(sessions());
        seed(&f.live, TODELETE, Value::Object(ToDelete::new("Ghost", "g1", 0).to_record().unwrap())).await;

        let stats = f.sweeper.sweep_expired(1).await.unwrap();
        assert_eq!(stats.failed, 1);
        let row = ToDelete::from_record(f.live.get(TODELETE, "Ghost(g1)").await.unwrap().unwrap()).unwrap();
        assert_eq!(row.status, ScheduleStatus::Failed);

        // failed rows are not retried
        assert_eq!(f.sweeper.sweep_expired(1).await.unwrap(), SweepStats::default());
    }

    struct Unreachable;

    #[async_trait]
    impl JobQueue for Unreachable {
        fn name(&self) -> &str {
            "unreachable"
        }

        async fn enqueue(&self, _spec: JobSpec, _options: EnqueueOptions) -> Result<String> {
            Err(CascadeError::Storage("queue unreachable".into()))
        }

        async fn job(&self, id: &str) -> Result<Job> {
            Err(CascadeError::NotFound(id.to_string()))
        }

        async fn jobs(&self) -> Vec<Job> {
            Vec::new()
        }

        async fn run_until_idle(&self, _handler: Arc<dyn JobHandler>) -> Result<RunSummary> {
            Ok(RunSummary::default())
        }
    }

    #[tokio::test]
    async fn test_row_survives_failed_enqueue() {
        let f = fixture(sessions());
        seed(&f.live, "Session", json!({"id": "s1"})).await;
        seed(&f.live, TODELETE, Value::Object(ToDelete::new("Session", "s1", 1_000).to_record().unwrap())).await;

        let broken = TtlSweeper::new(
            Arc::new(sessions()),
            f.live.clone(),
            Arc::new(Unreachable),
            &CascadeConfig::default(),
        );
        assert!(broken.sweep_expired(5_000).await.is_err());

        let row = ToDelete::from_record(f.live.get(TODELETE, "Session(s1)").await.unwrap().unwrap()).unwrap();
        assert_eq!(row.status, ScheduleStatus::Init);

        assert_eq!(f.sweeper.sweep_expired(5_000).await.unwrap().scheduled, 1);
        f.queue.run_until_idle(f.worker.clone()).await.unwrap();
        assert!(f.live.get("Session", "s1").await.unwrap().is_none());
        assert!(f.live.is_empty(TODELETE));
    }

    struct Recorder(Mutex<Vec<String>>);

    #[async_trait]
    impl ExternalResource for Recorder {
        async fn on_soft_delete(&self, _ctx: &ExternalFieldContext) -> Result<()> {
            Ok(())
        }
        async fn on_hard_delete(&self, ctx: &ExternalFieldContext) -> Result<()> {
            self.0.lock().push(ctx.model_id.clone());
            Ok(())
        }
        async fn on_restore(&self, _ctx: &ExternalFieldContext) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_purge_expired_tombstones() {
        let blobs = Arc::new(Recorder(Mutex::new(Vec::new())));
        let mut registry = ModelRegistry::new();
        registry.register_external("blob", blobs.clone());
        registry
            .register(ModelDescriptor::new("File").external("content", "blob"))
            .unwrap();
        let f = fixture(registry);

        let data = json!({"id": "f1", "content": "s3://x"}).as_object().cloned().unwrap();
        let mut old = Tombstone::new("File", "f1", data, Some(ROOT.into()), 0, 100);
        old.status = DeletionStatus::Finished;
        let mut fresh = Tombstone::new("File", "f2", Record::new(), Some(ROOT.into()), 0, 10_000);
        fresh.status = DeletionStatus::Finished;
        let mut failed = Tombstone::new("File", "f3", Record::new(), Some(ROOT.into()), 0, 100);
        failed.status = DeletionStatus::Failed;
        for tombstone in [&old, &fresh, &failed] {
            seed(&f.live, DELETED, Value::Object(tombstone.to_record().unwrap())).await;
        }

        let stats = f.sweeper.purge_tombstones(5_000).await.unwrap();
        assert_eq!(stats.purged, 1);
        assert_eq!(*blobs.0.lock(), vec!["f1".to_string()]);
        assert!(f.live.get(DELETED, "File(f1)").await.unwrap().is_none());
        assert_eq!(f.live.len(DELETED), 2);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let f = fixture(sessions());
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(f.sweeper.clone().run(
            f.worker.clone(),
            Duration::from_millis(5),
            rx,
        ));

        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
