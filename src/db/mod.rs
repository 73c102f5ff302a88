

pub mod factory;
pub mod memory;
pub mod shadow;
pub mod transaction;

use std::cmp::Ordering;
use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::error::{CascadeError, Result};

pub use factory::RepositoryFactory;
pub use memory::InMemoryStore;
pub use shadow::ShadowStore;
pub use transaction::{TransactionPolicy, run_with_transaction};


pub type Record = Map<String, Value>;


pub const ID_FIELD: &str = "id";


pub fn record_id(record: &Record) -> Result<&str> {
    record
        .get(ID_FIELD)
        .and_then(Value::as_str)
        .ok_or_else(|| CascadeError::Storage("record has no string id".to_string()))
}


#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOp {
    Eq,
    /// Field value is one of the values in the filter's array.
    In,
    /// Field is an array holding the filter value.
    Contains,
    /// Field sorts strictly after the filter value; mixed types never match.
    Gt,
}


#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

impl Filter {
    pub fn matches(&self, record: &Record) -> bool {
        let Some(actual) = record.get(&self.field) else {
            return false;
        };
        match self.op {
            FilterOp::Eq => actual == &self.value,
            FilterOp::In => self
                .value
                .as_array()
                .is_some_and(|candidates| candidates.contains(actual)),
            FilterOp::Contains => actual
                .as_array()
                .is_some_and(|items| items.contains(&self.value)),
            FilterOp::Gt => {
                compare_values(Some(actual), Some(&self.value)) == Ordering::Greater
            }
        }
    }
}


#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub filters: Vec<Filter>,
    pub order_by: Option<(String, bool)>,
    pub limit: Option<usize>,
}

impl Query {

    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn filter(mut self, field: impl Into<String>, op: FilterOp, value: impl Into<Value>) -> Self {
        self.filters.push(Filter {
            field: field.into(),
            op,
            value: value.into(),
        });
        self
    }

    #[must_use]
    pub fn eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(field, FilterOp::Eq, value)
    }

    #[must_use]
    pub fn is_in(self, field: impl Into<String>, values: Vec<Value>) -> Self {
        self.filter(field, FilterOp::In, Value::Array(values))
    }

    #[must_use]
    pub fn contains(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(field, FilterOp::Contains, value)
    }

    #[must_use]
    pub fn gt(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(field, FilterOp::Gt, value)
    }

    /// `ascending = false` sorts descending.
    #[must_use]
    pub fn order_by(mut self, field: impl Into<String>, ascending: bool) -> Self {
        self.order_by = Some((field.into(), ascending));
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }


    pub fn matches(&self, record: &Record) -> bool {
        self.filters.iter().all(|filter| filter.matches(record))
    }

    pub fn filters_only(&self) -> Self {
        Self {
            filters: self.filters.clone(),
            order_by: None,
            limit: None,
        }
    }

    pub fn has_window(&self) -> bool {
        self.order_by.is_some() || self.limit.is_some()
    }


    pub fn apply_window(&self, mut records: Vec<Record>) -> Vec<Record> {
        if let Some((field, ascending)) = &self.order_by {
            records.sort_by(|a, b| {
                let ord = compare_values(a.get(field), b.get(field));
                if *ascending { ord } else { ord.reverse() }
            });
        }
        if let Some(limit) = self.limit {
            records.truncate(limit);
        }
        records
    }
}


fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}


#[async_trait]
pub trait Store: Send + Sync {
    fn name(&self) -> &str;

    async fn begin(&self) -> Result<Box<dyn Transaction>>;


    async fn get(&self, model: &str, id: &str) -> Result<Option<Record>> {
        let mut tx = self.begin().await?;
        tx.get(model, id).await
    }

    async fn query(&self, model: &str, query: &Query) -> Result<Vec<Record>> {
        let mut tx = self.begin().await?;
        tx.query(model, query).await
    }
}


/// Unit of work over a `Store`. Writes are buffered until `commit`;
/// a dropped transaction leaves the store untouched.
#[async_trait]
pub trait Transaction: Send {
    async fn get(&mut self, model: &str, id: &str) -> Result<Option<Record>>;

    async fn query(&mut self, model: &str, query: &Query) -> Result<Vec<Record>>;

    fn put(&mut self, model: &str, record: Record) -> Result<()>;

    fn remove(&mut self, model: &str, id: &str);

    async fn commit(self: Box<Self>) -> Result<()>;


    async fn create(&mut self, model: &str, record: Record) -> Result<Record> {
        let id = record_id(&record)?.to_string();
        if self.get(model, &id).await?.is_some() {
            return Err(CascadeError::AlreadyExists(format!("{}/{}", model, id)));
        }
        self.put(model, record.clone())?;
        Ok(record)
    }

    async fn update(&mut self, model: &str, id: &str, patch: Record) -> Result<Record> {
        let mut current = self
            .get(model, id)
            .await?
            .ok_or_else(|| CascadeError::NotFound(format!("{}/{}", model, id)))?;
        for (key, value) in patch {
            if key != ID_FIELD {
                current.insert(key, value);
            }
        }
        self.put(model, current.clone())?;
        Ok(current)
    }

    async fn delete(&mut self, model: &str, id: &str) -> Result<bool> {
        if self.get(model, id).await?.is_none() {
            return Ok(false);
        }
        self.remove(model, id);
        Ok(true)
    }
}


/// Buffered writes of an open transaction, `None` marking a removal.
#[derive(Debug, Default)]
pub struct WriteSet {
    writes: BTreeMap<(String, String), Option<Record>>,
}

impl WriteSet {

    pub fn put(&mut self, model: &str, record: Record) -> Result<()> {
        let id = record_id(&record)?.to_string();
        self.writes.insert((model.to_string(), id), Some(record));
        Ok(())
    }

    pub fn remove(&mut self, model: &str, id: &str) {
        self.writes.insert((model.to_string(), id.to_string()), None);
    }


    pub fn lookup(&self, model: &str, id: &str) -> Option<Option<&Record>> {
        self.writes
            .get(&(model.to_string(), id.to_string()))
            .map(Option::as_ref)
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }


    /// Rows from `base` with this transaction's own writes laid over them.
    pub fn overlay(&self, model: &str, query: &Query, base: Vec<Record>) -> Vec<Record> {
        let mut merged: Vec<Record> = base
            .into_iter()
            .filter(|record| match record_id(record) {
                Ok(id) => self.lookup(model, id).is_none(),
                Err(_) => true,
            })
            .collect();

        merged.extend(
            self.writes
                .iter()
                .filter(|((m, _), _)| m == model)
                .filter_map(|(_, record)| record.as_ref())
                .filter(|record| query.matches(record))
                .cloned(),
        );
        merged
    }


    pub fn into_writes(self) -> impl Iterator<Item = (String, String, Option<Record>)> {
        self.writes
            .into_iter()
            .map(|((model, id), record)| (model, id, record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_filter_ops() {
        let post = record(json!({"id": "p1", "author": "u1", "tags": ["a", "b"]}));

        assert!(Query::new().eq("author", "u1").matches(&post));
        assert!(!Query::new().eq("author", "u2").matches(&post));
        assert!(Query::new().is_in("author", vec![json!("u0"), json!("u1")]).matches(&post));
        assert!(Query::new().contains("tags", "b").matches(&post));
        assert!(!Query::new().contains("author", "u1").matches(&post));
        assert!(!Query::new().eq("missing", Value::Null).matches(&post));
        assert!(Query::new().gt("id", "p0").matches(&post));
        assert!(!Query::new().gt("id", "p1").matches(&post));
        assert!(!Query::new().gt("id", 0).matches(&post));
    }

    #[test]
    fn test_window_orders_and_limits() {
        let rows = vec![
            record(json!({"id": "a", "n": 3})),
            record(json!({"id": "b", "n": 1})),
            record(json!({"id": "c", "n": 2})),
        ];
        let query = Query::new().order_by("n", false).limit(2);
        let ids: Vec<_> = query
            .apply_window(rows)
            .iter()
            .map(|r| r["id"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(ids, vec!["a", "c"]);
        assert!(!query.filters_only().has_window());
    }

    #[test]
    fn test_write_set_overlay() {
        let mut writes = WriteSet::default();
        writes.put("Post", record(json!({"id": "p2", "author": "u1"}))).unwrap();
        writes.remove("Post", "p1");

        let base = vec![
            record(json!({"id": "p1", "author": "u1"})),
            record(json!({"id": "p3", "author": "u1"})),
        ];
        let merged = writes.overlay("Post", &Query::new().eq("author", "u1"), base);
        let mut ids: Vec<_> = merged.iter().map(|r| record_id(r).unwrap().to_string()).collect();
        ids.sort();
        assert_eq!(ids, vec!["p2", "p3"]);
        assert_eq!(writes.lookup("Post", "p1"), Some(None));
        assert!(writes.lookup("User", "p1").is_none());
    }

    #[test]
    fn test_put_requires_id() {
        let mut writes = WriteSet::default();
        tokio_test::assert_err!(writes.put("Post", record(json!({"title": "x"}))));
    }

    #[test]
    fn test_provided_transaction_helpers() {
        let store = InMemoryStore::new();
        tokio_test::block_on(async {
            let mut tx = tokio_test::assert_ok!(store.begin().await);
            tokio_test::assert_ok!(tx.create("Post", record(json!({"id": "p1", "title": "a"}))).await);
            let updated = tokio_test::assert_ok!(tx.update("Post", "p1", record(json!({"id": "zz", "title": "b"}))).await);
            assert_eq!(updated["id"], "p1");
            assert_eq!(updated["title"], "b");
            assert!(tokio_test::assert_ok!(tx.delete("Post", "p1").await));
            assert!(!tokio_test::assert_ok!(tx.delete("Post", "p1").await));
            tokio_test::assert_ok!(tx.commit().await);
        });
        assert_eq!(store.len("Post"), 0);
    }
}
