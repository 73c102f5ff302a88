

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use super::{Query, Record, Store, Transaction, WriteSet, record_id};
use crate::core::error::{CascadeError, Result};


#[derive(Debug, Default)]
struct Overlay {
    /// Simulated writes, overriding live rows with the same id.
    model_store: HashMap<String, BTreeMap<String, Record>>,
    /// Ids simulated as removed, hidden from live reads.
    deleted: HashMap<String, HashSet<String>>,
    /// Overlay version per (model, id); absent entries are at 0.
    versions: HashMap<(String, String), u64>,
    clock: u64,
}

enum Lookup {
    Written(Record),
    Deleted,
    Live,
}

impl Overlay {
    fn lookup(&self, model: &str, id: &str) -> Lookup {
        if let Some(record) = self.model_store.get(model).and_then(|table| table.get(id)) {
            return Lookup::Written(record.clone());
        }
        if self.deleted.get(model).is_some_and(|ids| ids.contains(id)) {
            return Lookup::Deleted;
        }
        Lookup::Live
    }

    fn shadows(&self, model: &str, id: &str) -> bool {
        !matches!(self.lookup(model, id), Lookup::Live)
    }

    fn version_of(&self, model: &str, id: &str) -> u64 {
        self.versions
            .get(&(model.to_string(), id.to_string()))
            .copied()
            .unwrap_or(0)
    }

    fn bump(&mut self, model: &str, id: &str) {
        self.clock += 1;
        self.versions
            .insert((model.to_string(), id.to_string()), self.clock);
    }

    fn put(&mut self, model: &str, id: String, record: Record) {
        self.bump(model, &id);
        if let Some(ids) = self.deleted.get_mut(model) {
            ids.remove(&id);
        }
        self.model_store
            .entry(model.to_string())
            .or_default()
            .insert(id, record);
    }

    fn remove(&mut self, model: &str, id: String) {
        self.bump(model, &id);
        if let Some(table) = self.model_store.get_mut(model) {
            table.remove(&id);
        }
        self.deleted.entry(model.to_string()).or_default().insert(id);
    }
}


/// Dry-run store: reads merge simulated writes over the live store, writes
/// land only in the overlay. The live store is never mutated.
///
/// Transactions are optimistic over the overlay: a commit fails with
/// `Conflict` when an entry it observed was rewritten in the meantime.
/// Queries honor `Eq`, `In` and `Contains` filters; ordering and limits are
/// ignored.
#[derive(Clone)]
pub struct ShadowStore {
    live: Arc<dyn Store>,
    overlay: Arc<RwLock<Overlay>>,
}

impl ShadowStore {

    pub fn new(live: Arc<dyn Store>) -> Self {
        Self {
            live,
            overlay: Arc::new(RwLock::new(Overlay::default())),
        }
    }


    pub fn written(&self, model: &str) -> Vec<Record> {
        self.overlay
            .read()
            .model_store
            .get(model)
            .map(|table| table.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn deleted_ids(&self, model: &str) -> Vec<String> {
        let mut ids: Vec<String> = self
            .overlay
            .read()
            .deleted
            .get(model)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    pub fn reset(&self) {
        let mut overlay = self.overlay.write();
        overlay.model_store.clear();
        overlay.deleted.clear();
        // versions stay, so transactions opened before the reset conflict
        let ids: Vec<(String, String)> = overlay.versions.keys().cloned().collect();
        for (model, id) in ids {
            overlay.bump(&model, &id);
        }
        debug!("Shadow overlay cleared");
    }


    /// Returns the row with the overlay version it was resolved at.
    async fn read(&self, model: &str, id: &str) -> Result<(u64, Option<Record>)> {
        let (version, lookup) = {
            let overlay = self.overlay.read();
            (overlay.version_of(model, id), overlay.lookup(model, id))
        };
        match lookup {
            Lookup::Written(record) => Ok((version, Some(record))),
            Lookup::Deleted => Ok((version, None)),
            Lookup::Live => Ok((version, self.live.get(model, id).await?)),
        }
    }

    async fn scan(&self, model: &str, query: &Query) -> Result<Vec<(String, u64, Record)>> {
        if query.has_window() {
            debug!("Shadow query on {} ignores ordering and limit", model);
        }
        let query = query.filters_only();
        let live = self.live.query(model, &query).await?;

        let overlay = self.overlay.read();
        let mut merged = Vec::with_capacity(live.len());
        for record in live {
            let id = record_id(&record)?.to_string();
            if !overlay.shadows(model, &id) {
                merged.push((id.clone(), overlay.version_of(model, &id), record));
            }
        }
        if let Some(table) = overlay.model_store.get(model) {
            merged.extend(
                table
                    .iter()
                    .filter(|(_, record)| query.matches(record))
                    .map(|(id, record)| (id.clone(), overlay.version_of(model, id), record.clone())),
            );
        }
        Ok(merged)
    }
}

#[async_trait]
impl Store for ShadowStore {
    fn name(&self) -> &str {
        "shadow"
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        Ok(Box::new(ShadowTransaction {
            store: self.clone(),
            reads: HashMap::new(),
            writes: WriteSet::default(),
        }))
    }

    async fn get(&self, model: &str, id: &str) -> Result<Option<Record>> {
        Ok(self.read(model, id).await?.1)
    }

    async fn query(&self, model: &str, query: &Query) -> Result<Vec<Record>> {
        let rows = self.scan(model, query).await?;
        Ok(rows.into_iter().map(|(_, _, record)| record).collect())
    }
}


struct ShadowTransaction {
    store: ShadowStore,
    /// Overlay version observed per (model, id).
    reads: HashMap<(String, String), u64>,
    writes: WriteSet,
}

impl ShadowTransaction {
    fn observe(&mut self, model: &str, id: &str, version: u64) {
        self.reads
            .entry((model.to_string(), id.to_string()))
            .or_insert(version);
    }
}

#[async_trait]
impl Transaction for ShadowTransaction {
    async fn get(&mut self, model: &str, id: &str) -> Result<Option<Record>> {
        if let Some(pending) = self.writes.lookup(model, id) {
            return Ok(pending.cloned());
        }
        let (version, record) = self.store.read(model, id).await?;
        self.observe(model, id, version);
        Ok(record)
    }

    async fn query(&mut self, model: &str, query: &Query) -> Result<Vec<Record>> {
        let scanned = self.store.scan(model, query).await?;
        let mut base = Vec::with_capacity(scanned.len());
        for (id, version, record) in scanned {
            self.observe(model, &id, version);
            base.push(record);
        }
        Ok(self.writes.overlay(model, &query.filters_only(), base))
    }

    fn put(&mut self, model: &str, record: Record) -> Result<()> {
        let id = record_id(&record)?.to_string();
        let version = self.store.overlay.read().version_of(model, &id);
        self.observe(model, &id, version);
        self.writes.put(model, record)
    }

    fn remove(&mut self, model: &str, id: &str) {
        let version = self.store.overlay.read().version_of(model, id);
        self.observe(model, id, version);
        self.writes.remove(model, id);
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let this = *self;
        // read-only transactions validate too
        let mut overlay = this.store.overlay.write();
        for ((model, id), seen) in &this.reads {
            let current = overlay.version_of(model, id);
            if current != *seen {
                debug!(
                    "Shadow commit rejected: {}/{} at version {} (read {})",
                    model, id, current, seen
                );
                return Err(CascadeError::Conflict(format!(
                    "{}/{} changed since it was read",
                    model, id
                )));
            }
        }
        for (model, id, record) in this.writes.into_writes() {
            match record {
                Some(record) => overlay.put(&model, id, record),
                None => overlay.remove(&model, id),
            }
        }
        Ok(())
    }
}
