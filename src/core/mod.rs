

pub mod config;
pub mod error;
pub mod events;

pub use config::CascadeConfig;
pub use error::{CascadeError, Result};
pub use events::{Event, EventBus, EventHandler, LifecycleKind};
