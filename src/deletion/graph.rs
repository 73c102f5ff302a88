

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};
use tracing::debug;

use crate::core::error::{CascadeError, Result};
use crate::schema::{Condition, DeletionRule, FieldKind, ModelDescriptor, ModelRegistry};


#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, IntoStaticStr)]
pub enum Trigger {
    #[serde(rename = "OUTNODE")]
    #[strum(serialize = "OUTNODE")]
    OutNode,
    #[serde(rename = "INNODE")]
    #[strum(serialize = "INNODE")]
    InNode,
}


/// One propagation check, stored under the model whose deletion triggers it.
/// `model_name` is the model that may get deleted as a consequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletionGraphEdge {
    pub model_name: String,
    pub field: String,
    pub trigger: Trigger,
    pub condition: Condition,
}


#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeletionGraph {
    edges: BTreeMap<String, Vec<DeletionGraphEdge>>,
}

impl DeletionGraph {

    pub fn edges(&self, model_name: &str) -> &[DeletionGraphEdge] {
        self.edges.get(model_name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn triggering_models(&self) -> impl Iterator<Item = &str> {
        self.edges.keys().map(String::as_str)
    }

    pub fn edge_count(&self) -> usize {
        self.edges.values().map(Vec::len).sum()
    }

    fn push(&mut self, triggering_model: &str, edge: DeletionGraphEdge) {
        debug!(
            "Edge {} -[{} {}.{} {}]",
            triggering_model, edge.trigger, edge.model_name, edge.field, edge.condition
        );
        self.edges
            .entry(triggering_model.to_string())
            .or_default()
            .push(edge);
    }
}


pub fn build_graph(registry: &ModelRegistry, models: Option<&[&str]>) -> Result<DeletionGraph> {
    let selected: Vec<&ModelDescriptor> = match models {
        Some(names) => names
            .iter()
            .map(|name| registry.descriptor(name))
            .collect::<Result<_>>()?,
        None => registry.models().collect(),
    };

    let mut graph = DeletionGraph::default();

    for descriptor in selected {
        check_external_fields(registry, descriptor)?;

        for rule in descriptor.deletion_rules() {
            match rule {
                DeletionRule::OutNode { field, condition } => {
                    let target = out_node_target(registry, descriptor, field, *condition)?;
                    graph.push(
                        target,
                        DeletionGraphEdge {
                            model_name: descriptor.name().to_string(),
                            field: field.clone(),
                            trigger: Trigger::OutNode,
                            condition: *condition,
                        },
                    );
                }
                DeletionRule::InNode {
                    model,
                    field,
                    condition,
                } => {
                    check_in_node(registry, descriptor, model, field)?;
                    graph.push(
                        model,
                        DeletionGraphEdge {
                            model_name: descriptor.name().to_string(),
                            field: field.clone(),
                            trigger: Trigger::InNode,
                            condition: *condition,
                        },
                    );
                }
                DeletionRule::Ttl { seconds } => {
                    if *seconds == 0 {
                        return Err(CascadeError::invalid_rule(
                            descriptor.name(),
                            "ttl",
                            "TTL must be at least one second",
                        ));
                    }
                }
            }
        }
    }

    Ok(graph)
}


fn out_node_target<'a>(
    registry: &ModelRegistry,
    descriptor: &'a ModelDescriptor,
    field: &str,
    condition: Condition,
) -> Result<&'a str> {
    let kind = descriptor.field_kind(field).ok_or_else(|| {
        CascadeError::invalid_rule(descriptor.name(), field, "field is not declared in the schema")
    })?;
    let target = kind.reference_target().ok_or_else(|| {
        CascadeError::invalid_rule(descriptor.name(), field, "field is not a reference")
    })?;

    match (condition, kind.is_array()) {
        (Condition::Deleted, true) => {
            return Err(CascadeError::invalid_rule(
                descriptor.name(),
                field,
                "DELETED applies to a single reference, use ANY_DELETED or ALL_DELETED",
            ));
        }
        (Condition::AnyDeleted | Condition::AllDeleted, false) => {
            return Err(CascadeError::invalid_rule(
                descriptor.name(),
                field,
                format!("{} applies to an array of references", condition),
            ));
        }
        _ => {}
    }

    if !registry.contains(target) {
        return Err(CascadeError::UnknownModel(target.to_string()));
    }
    Ok(target)
}


fn check_in_node(
    registry: &ModelRegistry,
    descriptor: &ModelDescriptor,
    model: &str,
    field: &str,
) -> Result<()> {
    let source = registry.descriptor(model)?;
    let kind = source.field_kind(field).ok_or_else(|| {
        CascadeError::invalid_rule(model, field, "field is not declared in the schema")
    })?;
    let target = match kind {
        FieldKind::Reference(target) | FieldKind::ReferenceArray(target) => target,
        _ => {
            return Err(CascadeError::invalid_rule(model, field, "field is not a reference"));
        }
    };
    if target != descriptor.name() {
        return Err(CascadeError::invalid_rule(
            model,
            field,
            format!("references {}, expected {}", target, descriptor.name()),
        ));
    }
    Ok(())
}


fn check_external_fields(registry: &ModelRegistry, descriptor: &ModelDescriptor) -> Result<()> {
    for (field, kind) in descriptor.external_fields() {
        if !registry.has_external(kind) {
            return Err(CascadeError::invalid_rule(
                descriptor.name(),
                field,
                format!("no external resource registered for kind {}", kind),
            ));
        }
    }
    Ok(())
}
