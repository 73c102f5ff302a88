

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};


#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "target", rename_all = "snake_case")]
pub enum FieldKind {
    Scalar,
    Reference(String),
    ReferenceArray(String),
    Map,
    /// Value owned by an external resource (blob, uploaded file) named by the
    /// registered `ExternalResource` kind.
    External(String),
}

impl FieldKind {
    pub fn reference_target(&self) -> Option<&str> {
        match self {
            Self::Reference(target) | Self::ReferenceArray(target) => Some(target),
            _ => None,
        }
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Self::ReferenceArray(_))
    }

    pub fn external_kind(&self) -> Option<&str> {
        match self {
            Self::External(kind) => Some(kind),
            _ => None,
        }
    }
}


#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, IntoStaticStr)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Condition {
    Deleted,
    AnyDeleted,
    AllDeleted,
}


#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeletionRule {
    /// Delete me when the record(s) referenced by my `field` satisfy `condition`.
    OutNode { field: String, condition: Condition },
    /// Delete me when the `model` records referencing me through their `field`
    /// satisfy `condition`.
    InNode {
        model: String,
        field: String,
        condition: Condition,
    },
    Ttl { seconds: u64 },
}


#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDescriptor {
    name: String,
    fields: BTreeMap<String, FieldKind>,
    rules: Vec<DeletionRule>,
}

impl ModelDescriptor {

    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: BTreeMap::new(),
            rules: Vec::new(),
        }
    }

    #[must_use]
    pub fn field(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.insert(name.into(), kind);
        self
    }

    #[must_use]
    pub fn scalar(self, name: impl Into<String>) -> Self {
        self.field(name, FieldKind::Scalar)
    }

    #[must_use]
    pub fn map(self, name: impl Into<String>) -> Self {
        self.field(name, FieldKind::Map)
    }

    #[must_use]
    pub fn reference(self, name: impl Into<String>, target: impl Into<String>) -> Self {
        self.field(name, FieldKind::Reference(target.into()))
    }

    #[must_use]
    pub fn references(self, name: impl Into<String>, target: impl Into<String>) -> Self {
        self.field(name, FieldKind::ReferenceArray(target.into()))
    }

    #[must_use]
    pub fn external(self, name: impl Into<String>, resource_kind: impl Into<String>) -> Self {
        self.field(name, FieldKind::External(resource_kind.into()))
    }


    #[must_use]
    pub fn rule(mut self, rule: DeletionRule) -> Self {
        self.rules.push(rule);
        self
    }

    #[must_use]
    pub fn deleted_with(self, field: impl Into<String>, condition: Condition) -> Self {
        self.rule(DeletionRule::OutNode {
            field: field.into(),
            condition,
        })
    }

    #[must_use]
    pub fn deleted_by(
        self,
        model: impl Into<String>,
        field: impl Into<String>,
        condition: Condition,
    ) -> Self {
        self.rule(DeletionRule::InNode {
            model: model.into(),
            field: field.into(),
            condition,
        })
    }

    #[must_use]
    pub fn ttl(self, seconds: u64) -> Self {
        self.rule(DeletionRule::Ttl { seconds })
    }


    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &BTreeMap<String, FieldKind> {
        &self.fields
    }

    pub fn field_kind(&self, field: &str) -> Option<&FieldKind> {
        self.fields.get(field)
    }

    pub fn deletion_rules(&self) -> &[DeletionRule] {
        &self.rules
    }

    pub fn ttl_seconds(&self) -> Option<u64> {
        self.rules.iter().find_map(|rule| match rule {
            DeletionRule::Ttl { seconds } => Some(*seconds),
            _ => None,
        })
    }

    pub fn external_fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields
            .iter()
            .filter_map(|(name, kind)| kind.external_kind().map(|k| (name.as_str(), k)))
    }
}
