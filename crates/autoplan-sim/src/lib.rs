//! In-memory substitutes for the external collaborators.
//!
//! [`engine::SimEngine`] is an in-memory planning engine that records
//! every call in order; [`scripted`] provides canned operator dialogs
//! and a recording reporter for integration tests; [`report`] is the
//! file-writing reporter used by the CLI's simulate mode.

pub mod engine;
pub mod report;
pub mod scripted;

pub use engine::{SimEngine, SimPatient};
pub use report::SvgReporter;
pub use scripted::{RecordingReporter, ScriptedInteraction};
