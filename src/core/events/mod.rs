

pub mod base;
pub mod bus;

pub use base::{Event, EventMetadata, LifecycleKind};
pub use bus::{EventBus, EventHandler};
