

pub mod model;
pub mod registry;

pub use model::{Condition, DeletionRule, FieldKind, ModelDescriptor};
pub use registry::{ExternalFieldContext, ExternalResource, ModelRegistry};
