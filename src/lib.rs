

pub mod core;
pub mod db;
pub mod deletion;
pub mod jobs;
pub mod schema;
pub mod utils;

pub use utils::{ROOT, gen_id, split_gen_id};


pub use core::config::CascadeConfig;
pub use core::error::{CascadeError, Result};
pub use db::{InMemoryStore, RepositoryFactory, ShadowStore, Store};
pub use deletion::{DeletionManager, DeletionReport, RestoreReport, Tombstone};
pub use jobs::{ConcurrentJobQueue, JobQueue, LocalJobQueue};
pub use schema::{Condition, ModelDescriptor, ModelRegistry};


pub const DEFAULT_TOMBSTONE_TTL_DAYS: u32 = 60;


pub const DEFAULT_RESTORE_BATCH_SIZE: usize = 50;
