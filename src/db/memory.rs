

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use super::{Query, Record, Store, Transaction, WriteSet};
use crate::core::error::{CascadeError, Result};


#[derive(Debug, Clone)]
struct Row {
    version: u64,
    record: Record,
}


#[derive(Debug, Default)]
struct Tables {
    rows: HashMap<String, BTreeMap<String, Row>>,
    clock: u64,
}

impl Tables {
    fn version_of(&self, model: &str, id: &str) -> u64 {
        self.rows
            .get(model)
            .and_then(|table| table.get(id))
            .map_or(0, |row| row.version)
    }
}


/// Process-local store with optimistic concurrency: every row carries a
/// version, and a transaction commits only if the rows it observed are
/// unchanged.
#[derive(Clone)]
pub struct InMemoryStore {
    name: String,
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryStore {

    #[must_use]
    pub fn new() -> Self {
        Self::named("memory")
    }

    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tables: Arc::new(RwLock::new(Tables::default())),
        }
    }


    pub fn len(&self, model: &str) -> usize {
        self.tables.read().rows.get(model).map_or(0, BTreeMap::len)
    }

    pub fn is_empty(&self, model: &str) -> bool {
        self.len(model) == 0
    }

    pub fn records(&self, model: &str) -> Vec<Record> {
        self.tables
            .read()
            .rows
            .get(model)
            .map(|table| table.values().map(|row| row.record.clone()).collect())
            .unwrap_or_default()
    }


    fn scan(&self, model: &str, query: &Query) -> Vec<(u64, Record)> {
        let tables = self.tables.read();
        tables
            .rows
            .get(model)
            .map(|table| {
                table
                    .values()
                    .filter(|row| query.matches(&row.record))
                    .map(|row| (row.version, row.record.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        Ok(Box::new(MemoryTransaction {
            tables: Arc::clone(&self.tables),
            reads: HashMap::new(),
            writes: WriteSet::default(),
        }))
    }

    async fn get(&self, model: &str, id: &str) -> Result<Option<Record>> {
        Ok(self
            .tables
            .read()
            .rows
            .get(model)
            .and_then(|table| table.get(id))
            .map(|row| row.record.clone()))
    }

    async fn query(&self, model: &str, query: &Query) -> Result<Vec<Record>> {
        let rows = self.scan(model, query).into_iter().map(|(_, record)| record).collect();
        Ok(query.apply_window(rows))
    }
}


struct MemoryTransaction {
    tables: Arc<RwLock<Tables>>,
    /// Version observed per (model, id); 0 when the row was absent.
    reads: HashMap<(String, String), u64>,
    writes: WriteSet,
}

impl MemoryTransaction {
    fn observe(&mut self, model: &str, id: &str, version: u64) {
        self.reads
            .entry((model.to_string(), id.to_string()))
            .or_insert(version);
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn get(&mut self, model: &str, id: &str) -> Result<Option<Record>> {
        if let Some(pending) = self.writes.lookup(model, id) {
            return Ok(pending.cloned());
        }

        let (version, record) = {
            let tables = self.tables.read();
            match tables.rows.get(model).and_then(|table| table.get(id)) {
                Some(row) => (row.version, Some(row.record.clone())),
                None => (0, None),
            }
        };
        self.observe(model, id, version);
        Ok(record)
    }

    async fn query(&mut self, model: &str, query: &Query) -> Result<Vec<Record>> {
        let scanned = {
            let tables = self.tables.read();
            tables
                .rows
                .get(model)
                .map(|table| {
                    table
                        .iter()
                        .filter(|(_, row)| query.matches(&row.record))
                        .map(|(id, row)| (id.clone(), row.version, row.record.clone()))
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default()
        };

        let mut base = Vec::with_capacity(scanned.len());
        for (id, version, record) in scanned {
            self.observe(model, &id, version);
            base.push(record);
        }

        let merged = self.writes.overlay(model, query, base);
        Ok(query.apply_window(merged))
    }

    fn put(&mut self, model: &str, record: Record) -> Result<()> {
        let id = super::record_id(&record)?.to_string();
        let version = self.tables.read().version_of(model, &id);
        self.observe(model, &id, version);
        self.writes.put(model, record)
    }

    fn remove(&mut self, model: &str, id: &str) {
        let version = self.tables.read().version_of(model, id);
        self.observe(model, id, version);
        self.writes.remove(model, id);
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let this = *self;
        let mut tables = this.tables.write();

        for ((model, id), seen) in &this.reads {
            let current = tables.version_of(model, id);
            if current != *seen {
                debug!(
                    "Commit rejected: {}/{} at version {} (read {})",
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
                Some(record) => {
                    tables.clock += 1;
                    let version = tables.clock;
                    tables
                        .rows
                        .entry(model)
                        .or_default()
                        .insert(id, Row { version, record });
                }
                None => {
                    if let Some(table) = tables.rows.get_mut(&model) {
                        table.remove(&id);
                    }
                }
            }
        }
        Ok(())
    }
}
