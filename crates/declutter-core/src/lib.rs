//! # declutter-core
//!
//! Core engine for the declutter pipeline.
//!
//! Contains the worker bus, the session store, the pure stage trackers,
//! the pipeline orchestrator and its timeout sweeper, plus the on-disk
//! crop engine and report writer used by the crop and report workers.

pub mod bus;
pub mod config_loader;
pub mod crop;
pub mod orchestrator;
pub mod report;
pub mod security;
pub mod store;
pub mod sweeper;
pub mod tracker;

pub use bus::{WorkerBus, WorkerInbox};
pub use orchestrator::{Orchestrator, OrchestratorStats};
pub use store::SessionStore;
pub use sweeper::Sweeper;
