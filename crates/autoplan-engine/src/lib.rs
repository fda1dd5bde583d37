//! Boundary crate for the external treatment-planning engine.
//!
//! Defines the domain value types exchanged with the engine, the
//! [`PlanningEngine`] trait every backend implements, and the
//! [`EngineError`] type for failures raised by the engine itself.

pub mod engine;
pub mod error;
pub mod models;

pub use engine::PlanningEngine;
pub use error::EngineError;
