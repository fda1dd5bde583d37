//! Core workflow logic for automated treatment-plan generation.
//!
//! The [`workflow`] module is the top-level controller; it drives the
//! structure resolver, the prescription gate, the stage [`pipeline`],
//! reporting, and the [`verification`] fan-out against the external
//! planning engine, persisting at every checkpoint.

pub mod interaction;
pub mod pipeline;
pub mod prescription;
pub mod report;
pub mod session;
pub mod structures;
pub mod verification;
pub mod workflow;
