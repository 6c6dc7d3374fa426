//! # declutter-types
//!
//! Core type definitions for the declutter listing pipeline.
//!
//! This crate is the foundation of the dependency graph -- all other
//! declutter crates depend on it. It contains:
//!
//! - **[`error`]** -- [`DeclutterError`] and the crate-wide [`Result`] alias
//! - **[`geometry`]** -- [`BoundingBox`], the four-integer box record
//! - **[`detection`]** -- per-image detection sets and the resellability filter
//! - **[`message`]** -- stage requests/results exchanged between workers
//! - **[`bus`]** -- the envelope carried by the worker bus
//! - **[`session`]** -- pipeline session state and the final outcome
//! - **[`config`]** -- configuration schema, including the routing table

pub mod bus;
pub mod config;
pub mod detection;
pub mod error;
pub mod geometry;
pub mod message;
pub mod session;

pub use error::{DeclutterError, Result};
pub use geometry::BoundingBox;
