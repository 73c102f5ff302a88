

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::mpsc;

use super::manager::DeletionManager;
use super::models::{DELETED, DeletedRef, DeletionStatus, ScheduleStatus, TODELETE, ToDelete};
use crate::core::config::CascadeConfig;
use crate::core::events::{Event, EventBus, LifecycleKind};
use crate::db::{InMemoryStore, Query, Record, Store};
use crate::jobs::{ConcurrentJobQueue, JobQueue, JobType, LocalJobQueue};
use crate::schema::{Condition, ModelDescriptor, ModelRegistry};


fn manager_with(registry: ModelRegistry, queue: Arc<dyn JobQueue>) -> (DeletionManager, Arc<InMemoryStore>) {
    let live = Arc::new(InMemoryStore::new());
    let manager = DeletionManager::new(
        Arc::new(registry),
        live.clone(),
        queue,
        CascadeConfig::default(),
    )
    .unwrap();
    (manager, live)
}

fn manager(registry: ModelRegistry) -> (DeletionManager, Arc<InMemoryStore>) {
    manager_with(registry, Arc::new(LocalJobQueue::new()))
}

async fn seed(store: &InMemoryStore, model: &str, value: Value) {
    let mut tx = store.begin().await.unwrap();
    tx.put(model, value.as_object().cloned().unwrap()).unwrap();
    tx.commit().await.unwrap();
}

fn refs(items: &[(&str, &str)]) -> Vec<DeletedRef> {
    let mut refs: Vec<DeletedRef> = items
        .iter()
        .map(|(model, id)| DeletedRef {
            model_name: model.to_string(),
            model_id: id.to_string(),
        })
        .collect();
    refs.sort();
    refs
}

/// `C.pArray` references many `P`s.
fn array_registry(condition: Condition) -> ModelRegistry {
    ModelRegistry::new()
        .with_model(ModelDescriptor::new("P").scalar("name"))
        .and_then(|r| {
            r.with_model(
                ModelDescriptor::new("C")
                    .references("pArray", "P")
                    .deleted_with("pArray", condition),
            )
        })
        .unwrap()
}

async fn seed_array(live: &InMemoryStore) {
    seed(live, "P", json!({"id": "p1", "name": "one"})).await;
    seed(live, "P", json!({"id": "p2", "name": "two"})).await;
    seed(live, "C", json!({"id": "c1", "pArray": ["p1", "p2"]})).await;
}

/// `C.a` references `A` and takes it down (in-edge); `B.a` references `A`
/// and goes down with it (out-edge).
fn chain_registry() -> ModelRegistry {
    let mut registry = ModelRegistry::new();
    registry
        .register(
            ModelDescriptor::new("A")
                .scalar("title")
                .map("meta")
                .deleted_by("C", "a", Condition::Deleted),
        )
        .unwrap();
    registry
        .register(
            ModelDescriptor::new("B")
                .scalar("body")
                .reference("a", "A")
                .deleted_with("a", Condition::Deleted),
        )
        .unwrap();
    registry
        .register(ModelDescriptor::new("C").reference("a", "A"))
        .unwrap();
    registry
}

async fn seed_chain(live: &InMemoryStore) -> Vec<(&'static str, Value)> {
    let rows = vec![
        ("A", json!({"id": "a1", "title": "root", "meta": {"tags": ["x", "y"]}, "createdAt": 7})),
        ("B", json!({"id": "b1", "body": "child", "a": "a1"})),
        ("C", json!({"id": "c1", "a": "a1"})),
    ];
    for (model, value) in &rows {
        seed(live, model, value.clone()).await;
    }
    rows
}


#[tokio::test]
async fn test_initiation_is_idempotent() {
    let (manager, live) = manager(array_registry(Condition::AnyDeleted));
    seed_array(&live).await;

    let first = manager.delete("P", "p1").await.unwrap();
    assert_eq!(first.count(), 2);

    let second = manager.delete("P", "p1").await.unwrap();
    assert_eq!(second.count(), 0);
    assert_eq!(second.jobs_finished, 1);
    assert_eq!(live.len(DELETED), 2);

    let tombstone = manager.tombstone("P", "p1").await.unwrap().unwrap();
    assert_eq!(tombstone.reasons, vec!["ROOT".to_string()]);
}

#[tokio::test]
async fn test_any_deleted_cascades_on_first_parent() {
    let (manager, live) = manager(array_registry(Condition::AnyDeleted));
    seed_array(&live).await;

    let report = manager.delete("P", "p1").await.unwrap();
    assert_eq!(report.deleted, refs(&[("C", "c1"), ("P", "p1")]));
    assert_eq!(report.jobs_failed, 0);
    assert_eq!(live.len(DELETED), 2);
    assert!(live.get("P", "p2").await.unwrap().is_some());
}

#[tokio::test]
async fn test_all_deleted_waits_for_every_parent() {
    let (manager, live) = manager(array_registry(Condition::AllDeleted));
    seed_array(&live).await;

    let first = manager.delete("P", "p1").await.unwrap();
    assert_eq!(first.deleted, refs(&[("P", "p1")]));
    assert!(live.get("C", "c1").await.unwrap().is_some());

    let second = manager.delete("P", "p2").await.unwrap();
    assert_eq!(second.deleted, refs(&[("C", "c1"), ("P", "p2")]));
    assert_eq!(live.len(DELETED), 3);

    let child = manager.tombstone("C", "c1").await.unwrap().unwrap();
    assert_eq!(child.reasons, vec!["P(p2)".to_string()]);
}

#[tokio::test]
async fn test_in_edge_all_deleted_waits_for_every_referrer() {
    let registry = ModelRegistry::new()
        .with_model(ModelDescriptor::new("P").deleted_by("C", "p", Condition::AllDeleted))
        .and_then(|r| r.with_model(ModelDescriptor::new("C").reference("p", "P")))
        .unwrap();
    let (manager, live) = manager(registry);
    seed(&live, "P", json!({"id": "p1"})).await;
    seed(&live, "C", json!({"id": "c1", "p": "p1"})).await;
    seed(&live, "C", json!({"id": "c2", "p": "p1"})).await;

    let first = manager.delete("C", "c1").await.unwrap();
    assert_eq!(first.count(), 1);
    assert!(live.get("P", "p1").await.unwrap().is_some());

    let second = manager.delete("C", "c2").await.unwrap();
    assert_eq!(second.deleted, refs(&[("C", "c2"), ("P", "p1")]));
    assert_eq!(live.len(DELETED), 3);
}

#[tokio::test]
async fn test_restore_reverses_delete_exactly() {
    let (manager, live) = manager(chain_registry());
    let rows = seed_chain(&live).await;

    let report = manager.delete("C", "c1").await.unwrap();
    assert_eq!(report.deleted, refs(&[("A", "a1"), ("B", "b1"), ("C", "c1")]));
    assert!(live.is_empty("A") && live.is_empty("B") && live.is_empty("C"));

    let restored = manager.restore("C", "c1").await.unwrap();
    assert_eq!(restored.restored, refs(&[("A", "a1"), ("B", "b1"), ("C", "c1")]));
    assert_eq!(restored.jobs_failed, 0);
    assert!(live.is_empty(DELETED));

    for (model, value) in rows {
        let id = value["id"].as_str().unwrap();
        let record = live.get(model, id).await.unwrap().unwrap();
        assert_eq!(Value::Object(record), value, "{}({}) differs after restore", model, id);
    }
}

#[tokio::test]
async fn test_cascade_restore_keeps_directly_deleted_record() {
    let (manager, live) = manager(chain_registry());
    seed_chain(&live).await;

    manager.delete("A", "a1").await.unwrap();
    let cascade = manager.delete("C", "c1").await.unwrap();
    assert_eq!(cascade.deleted, refs(&[("C", "c1")]));

    let a = manager.tombstone("A", "a1").await.unwrap().unwrap();
    assert_eq!(a.reasons, vec!["ROOT".to_string(), "C(c1)".to_string()]);

    let restored = manager.restore("C", "c1").await.unwrap();
    assert_eq!(restored.restored, refs(&[("C", "c1")]));
    let a = manager.tombstone("A", "a1").await.unwrap().unwrap();
    assert_eq!(a.reasons, vec!["ROOT".to_string()]);
    assert_eq!(a.status, DeletionStatus::Finished);
    assert!(live.get("A", "a1").await.unwrap().is_none());

    let restored = manager.restore("A", "a1").await.unwrap();
    assert_eq!(restored.restored, refs(&[("A", "a1"), ("B", "b1")]));
    assert!(live.is_empty(DELETED));
}

#[tokio::test]
async fn test_dry_run_matches_real_run_and_leaves_store_untouched() {
    let (manager, live) = manager(chain_registry());
    seed_chain(&live).await;

    let simulated = manager.simulate_deletion("C", "c1").await.unwrap();
    assert!(simulated.dry_run);
    assert!(live.is_empty(DELETED));
    assert_eq!(live.len("A"), 1);
    assert_eq!(live.len("B"), 1);

    let real = manager.delete("C", "c1").await.unwrap();
    assert!(!real.dry_run);
    assert_eq!(simulated.deleted, real.deleted);
    assert_eq!(simulated.count(), 3);
}

#[tokio::test]
async fn test_dry_run_restore_leaves_store_untouched() {
    let (manager, live) = manager(chain_registry());
    seed_chain(&live).await;
    manager.delete("C", "c1").await.unwrap();
    let tombstones_before = live.query(DELETED, &Query::new().order_by("id", true)).await.unwrap();

    let simulated = manager.simulate_restoration("C", "c1").await.unwrap();
    assert_eq!(simulated.restored, refs(&[("A", "a1"), ("B", "b1"), ("C", "c1")]));
    assert_eq!(simulated.jobs_failed, 0);

    assert!(live.is_empty("A") && live.is_empty("B") && live.is_empty("C"));
    let tombstones_after = live.query(DELETED, &Query::new().order_by("id", true)).await.unwrap();
    assert_eq!(tombstones_after, tombstones_before);
    let c = manager.tombstone("C", "c1").await.unwrap().unwrap();
    assert_eq!(c.status, DeletionStatus::Finished);

    let real = manager.restore("C", "c1").await.unwrap();
    assert_eq!(real.restored, simulated.restored);
    assert!(live.is_empty(DELETED));
}

#[tokio::test]
async fn test_ttl_scheduling_and_expiry() {
    let registry = ModelRegistry::new()
        .with_model(ModelDescriptor::new("Session").scalar("token").ttl(3600))
        .unwrap();
    let (manager, live) = manager(registry);
    let sessions = manager.repository("Session").unwrap();

    let record: Record = json!({"id": "s1", "token": "t"}).as_object().cloned().unwrap();
    let created = sessions.create(record).await.unwrap();
    let created_at = created["createdAt"].as_i64().unwrap();

    assert_eq!(live.len(TODELETE), 1);
    let row = ToDelete::from_record(live.records(TODELETE).remove(0)).unwrap();
    assert_eq!(row.status, ScheduleStatus::Init);
    assert_eq!(row.delete_at, created_at + 3_600_000);

    let early = manager.sweep_expired(created_at).await.unwrap();
    assert_eq!(early.scheduled, 0);
    assert!(live.get("Session", "s1").await.unwrap().is_some());

    let due = manager.sweep_expired(row.delete_at).await.unwrap();
    assert_eq!(due.scheduled, 1);
    assert!(live.is_empty(TODELETE));
    assert!(live.get("Session", "s1").await.unwrap().is_none());

    let tombstone = manager.tombstone("Session", "s1").await.unwrap().unwrap();
    assert_eq!(tombstone.status, DeletionStatus::Finished);

    let purged = manager.purge_tombstones(tombstone.expire_at).await.unwrap();
    assert_eq!(purged.purged, 1);
    assert!(live.is_empty(DELETED));
}

#[tokio::test]
async fn test_concurrent_queue_runs_the_same_cascade() {
    let (manager, live) = manager_with(chain_registry(), Arc::new(ConcurrentJobQueue::new(4)));
    seed_chain(&live).await;

    let report = manager.delete("C", "c1").await.unwrap();
    assert_eq!(report.deleted, refs(&[("A", "a1"), ("B", "b1"), ("C", "c1")]));
    assert_eq!(report.jobs_failed, 0);

    let restored = manager.restore("C", "c1").await.unwrap();
    assert_eq!(restored.restored.len(), 3);
    assert!(live.is_empty(DELETED));
}

#[tokio::test]
async fn test_lifecycle_events_are_published() {
    let bus = Arc::new(EventBus::new());
    let (tx, mut rx) = mpsc::unbounded_channel::<Event>();
    bus.on(
        LifecycleKind::DeletionFinished,
        Arc::new(move |event: Event| {
            let _ = tx.send(event);
        }),
    )
    .await;

    let (manager, live) = manager(array_registry(Condition::AnyDeleted));
    let manager = manager.with_events(bus);
    seed_array(&live).await;
    manager.delete("P", "p1").await.unwrap();

    let mut finished = Vec::new();
    for _ in 0..2 {
        let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        let correlation = event.metadata.correlation_id.unwrap();
        let job = manager.job(&correlation.to_string()).await.unwrap();
        assert_eq!(job.job_type, JobType::FinishGraphDeletion);
        assert_eq!(event.payload["tombstoneId"], format!("{}({})", job.input.model_name, job.input.model_id));
        finished.push(event.payload["tombstoneId"].as_str().unwrap().to_string());
    }
    finished.sort();
    assert_eq!(finished, vec!["C(c1)".to_string(), "P(p1)".to_string()]);
}

#[tokio::test]
async fn test_invalid_graph_rejected_at_construction() {
    let registry = ModelRegistry::new()
        .with_model(ModelDescriptor::new("C").scalar("p").deleted_with("p", Condition::Deleted))
        .unwrap();
    let result = DeletionManager::new(
        Arc::new(registry),
        Arc::new(InMemoryStore::new()),
        Arc::new(LocalJobQueue::new()),
        CascadeConfig::default(),
    );
    assert!(result.is_err());
}
