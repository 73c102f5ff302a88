

pub mod graph;
pub mod manager;
pub mod models;
pub mod repository;
pub mod ttl;
pub mod worker;

#[cfg(test)]
mod workflow_tests;

pub use graph::{DeletionGraph, DeletionGraphEdge, Trigger, build_graph};
pub use manager::DeletionManager;
pub use models::{
    DELETED, DeletedRef, DeletionReport, DeletionStatus, RestoreReport, ScheduleStatus,
    SweepStats, TODELETE, ToDelete, Tombstone,
};
pub use repository::{CREATED_AT_FIELD, ManagedRepository};
pub use ttl::TtlSweeper;
pub use worker::{DeletionWorker, Outcome};
