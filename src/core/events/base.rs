

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, EnumString, IntoStaticStr};
use uuid::Uuid;


#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, IntoStaticStr)]
pub enum LifecycleKind {
    #[strum(serialize = "deletion.finished")]
    #[serde(rename = "deletion.finished")]
    DeletionFinished,
    #[strum(serialize = "deletion.failed")]
    #[serde(rename = "deletion.failed")]
    DeletionFailed,
    #[strum(serialize = "restoration.finished")]
    #[serde(rename = "restoration.finished")]
    RestorationFinished,
    #[strum(serialize = "restoration.failed")]
    #[serde(rename = "restoration.failed")]
    RestorationFailed,
}

impl LifecycleKind {
    pub fn as_str(&self) -> &'static str {
        self.into()
    }
}


#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMetadata {

    pub correlation_id: Option<Uuid>,

    pub dry_run: bool,
}

impl Default for EventMetadata {
    fn default() -> Self {
        Self {
            correlation_id: None,
            dry_run: false,
        }
    }
}


#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {

    pub event_id: Uuid,

    pub event_type: String,

    pub timestamp: DateTime<Utc>,

    pub metadata: EventMetadata,

    pub payload: Value,
}

impl Event {

    #[must_use]
    pub fn new(event_type: impl Into<String>, payload: Value) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type: event_type.into(),
            timestamp: Utc::now(),
            metadata: EventMetadata::default(),
            payload,
        }
    }


    #[must_use]
    pub fn lifecycle(kind: LifecycleKind, payload: Value) -> Self {
        Self::new(kind.as_str(), payload)
    }


    #[must_use]
    pub fn with_correlation(mut self, correlation_id: Uuid) -> Self {
        self.metadata.correlation_id = Some(correlation_id);
        self
    }

    #[must_use]
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.metadata.dry_run = dry_run;
        self
    }


    pub fn kind(&self) -> Option<LifecycleKind> {
        self.event_type.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lifecycle_kind_round_trips_through_event_type() {
        let event = Event::lifecycle(LifecycleKind::RestorationFailed, json!({"tombstoneId": "Post(1)"}));
        assert_eq!(event.event_type, "restoration.failed");
        assert_eq!(event.kind(), Some(LifecycleKind::RestorationFailed));
    }

    #[test]
    fn test_unknown_event_type_has_no_kind() {
        let event = Event::new("custom.audit", json!({}));
        assert!(event.kind().is_none());
        assert!(!event.metadata.dry_run);
    }
}
