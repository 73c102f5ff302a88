

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::OnceCell;
use serde_json::Value;
use tracing::{debug, info};

use super::model::ModelDescriptor;
use crate::core::error::{CascadeError, Result};
use crate::deletion::graph::{DeletionGraph, build_graph};
use crate::deletion::models::{DELETED, TODELETE};


#[derive(Debug, Clone)]
pub struct ExternalFieldContext {
    pub model_name: String,
    pub model_id: String,
    pub field: String,
    pub value: Value,
}


/// Side effects for field values living outside the store (blobs, uploads).
#[async_trait]
pub trait ExternalResource: Send + Sync {
    async fn on_soft_delete(&self, ctx: &ExternalFieldContext) -> Result<()>;

    async fn on_hard_delete(&self, ctx: &ExternalFieldContext) -> Result<()>;

    async fn on_restore(&self, ctx: &ExternalFieldContext) -> Result<()>;
}


pub struct ModelRegistry {
    models: BTreeMap<String, ModelDescriptor>,
    externals: HashMap<String, Arc<dyn ExternalResource>>,
    graph: OnceCell<Arc<DeletionGraph>>,
}

impl ModelRegistry {

    #[must_use]
    pub fn new() -> Self {
        Self {
            models: BTreeMap::new(),
            externals: HashMap::new(),
            graph: OnceCell::new(),
        }
    }


    pub fn register(&mut self, descriptor: ModelDescriptor) -> Result<()> {
        let name = descriptor.name().to_string();
        if name == DELETED || name == TODELETE {
            return Err(CascadeError::Configuration(format!(
                "model name {} is reserved",
                name
            )));
        }
        if self.models.contains_key(&name) {
            return Err(CascadeError::Configuration(format!(
                "model {} registered twice",
                name
            )));
        }

        debug!(
            "Registered model {} ({} fields, {} deletion rules)",
            name,
            descriptor.schema().len(),
            descriptor.deletion_rules().len()
        );
        self.models.insert(name, descriptor);
        self.graph = OnceCell::new();
        Ok(())
    }

    pub fn with_model(mut self, descriptor: ModelDescriptor) -> Result<Self> {
        self.register(descriptor)?;
        Ok(self)
    }


    pub fn register_external(&mut self, kind: impl Into<String>, resource: Arc<dyn ExternalResource>) {
        let kind = kind.into();
        debug!("Registered external resource kind: {}", kind);
        self.externals.insert(kind, resource);
    }


    pub fn descriptor(&self, name: &str) -> Result<&ModelDescriptor> {
        self.models
            .get(name)
            .ok_or_else(|| CascadeError::UnknownModel(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.models.contains_key(name)
    }

    pub fn models(&self) -> impl Iterator<Item = &ModelDescriptor> {
        self.models.values()
    }


    pub fn external(&self, kind: &str) -> Result<Arc<dyn ExternalResource>> {
        self.externals.get(kind).cloned().ok_or_else(|| {
            CascadeError::Configuration(format!("no external resource registered for kind {}", kind))
        })
    }

    pub fn has_external(&self, kind: &str) -> bool {
        self.externals.contains_key(kind)
    }


    pub fn graph(&self) -> Result<Arc<DeletionGraph>> {
        self.graph
            .get_or_try_init(|| {
                let graph = build_graph(self, None)?;
                info!(
                    "Deletion graph built: {} triggering models, {} edges",
                    graph.triggering_models().count(),
                    graph.edge_count()
                );
                Ok::<_, CascadeError>(Arc::new(graph))
            })
            .cloned()
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new()
    }
}
