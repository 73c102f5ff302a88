

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use strum::{Display, EnumString};

use crate::core::error::{CascadeError, Result};
use crate::db::Record;
use crate::utils::gen_id;


/// Tombstone collection.
pub const DELETED: &str = "DELETED";

/// TTL schedule collection.
pub const TODELETE: &str = "TODELETE";


#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum DeletionStatus {
    Init,
    Started,
    Finished,
    Failed,
    RestoreStarted,
    RestoreFailed,
}


#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tombstone {
    pub id: String,
    pub model_name: String,
    pub model_id: String,
    pub model_data: Record,
    pub reasons: Vec<String>,
    pub status: DeletionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub deleted_at: i64,
    pub expire_at: i64,
}

impl Tombstone {
    pub fn new(
        model_name: &str,
        model_id: &str,
        model_data: Record,
        reason: Option<String>,
        deleted_at: i64,
        ttl_ms: i64,
    ) -> Self {
        Self {
            id: gen_id(model_name, model_id),
            model_name: model_name.to_string(),
            model_id: model_id.to_string(),
            model_data,
            reasons: reason.into_iter().collect(),
            status: DeletionStatus::Init,
            error: None,
            deleted_at,
            expire_at: deleted_at.saturating_add(ttl_ms),
        }
    }


    /// Returns false when `reason` was already recorded.
    pub fn add_reason(&mut self, reason: &str) -> bool {
        if self.reasons.iter().any(|r| r == reason) {
            return false;
        }
        self.reasons.push(reason.to_string());
        true
    }

    pub fn remove_reason(&mut self, reason: &str) -> bool {
        let before = self.reasons.len();
        self.reasons.retain(|r| r != reason);
        self.reasons.len() != before
    }

    pub fn has_reason(&self, reason: &str) -> bool {
        self.reasons.iter().any(|r| r == reason)
    }


    pub fn field(&self, field: &str) -> Option<&Value> {
        self.model_data.get(field).filter(|value| !value.is_null())
    }

    pub fn to_record(&self) -> Result<Record> {
        to_record(self)
    }

    pub fn from_record(record: Record) -> Result<Self> {
        from_record(record)
    }
}


#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ScheduleStatus {
    Init,
    Failed,
}


/// Pending TTL expiry for one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToDelete {
    pub id: String,
    pub model_name: String,
    pub model_id: String,
    pub delete_at: i64,
    pub status: ScheduleStatus,
}

impl ToDelete {
    pub fn new(model_name: &str, model_id: &str, delete_at: i64) -> Self {
        Self {
            id: gen_id(model_name, model_id),
            model_name: model_name.to_string(),
            model_id: model_id.to_string(),
            delete_at,
            status: ScheduleStatus::Init,
        }
    }

    pub fn is_due(&self, now: i64) -> bool {
        self.status == ScheduleStatus::Init && self.delete_at <= now
    }

    pub fn to_record(&self) -> Result<Record> {
        to_record(self)
    }

    pub fn from_record(record: Record) -> Result<Self> {
        from_record(record)
    }
}


#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletedRef {
    pub model_name: String,
    pub model_id: String,
}

impl DeletedRef {
    pub fn gen_id(&self) -> String {
        gen_id(&self.model_name, &self.model_id)
    }
}


#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletionReport {
    pub root: String,
    pub dry_run: bool,
    pub deleted: Vec<DeletedRef>,
    pub jobs_finished: usize,
    pub jobs_failed: usize,
}

impl DeletionReport {
    pub fn count(&self) -> usize {
        self.deleted.len()
    }
}


#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreReport {
    pub root: String,
    pub restored: Vec<DeletedRef>,
    pub jobs_finished: usize,
    pub jobs_failed: usize,
}


#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepStats {
    pub scheduled: usize,
    pub failed: usize,
    pub purged: usize,
}


fn to_record<T: Serialize>(value: &T) -> Result<Record> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(CascadeError::Storage(format!(
            "expected an object, serialized to {}",
            other
        ))),
    }
}

fn from_record<T: DeserializeOwned>(record: Record) -> Result<T> {
    Ok(serde_json::from_value(Value::Object(record))?)
}
