//! Services for the declutter pipeline.
//!
//! - [`collaborator`] -- HTTP clients for the detector, the resale
//!   classifier and the marketplace
//! - [`worker`] -- one bus actor per pipeline stage
//! - [`coordinator`] -- feeds stage results to the orchestrator
//! - [`pipeline`] -- wires everything from a config
//! - [`api`] -- upload and status HTTP endpoints

pub mod api;
pub mod collaborator;
pub mod coordinator;
pub mod error;
pub mod pipeline;
pub mod worker;

pub use error::{Result, ServiceError};
pub use pipeline::{Collaborators, Pipeline};
