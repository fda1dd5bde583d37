//! Failures raised by the planning engine.

use thiserror::Error;

/// An unrecoverable failure reported by the planning engine.
///
/// The workflow never retries these; they propagate to the top level
/// and end the run, leaving already-persisted checkpoints intact.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("patient {0} not found")]
    PatientNotFound(String),

    #[error("no patient is open")]
    NoOpenPatient,

    #[error("modifications have not been enabled for this session")]
    ModificationsNotEnabled,

    #[error("structure set {0} not found")]
    StructureSetNotFound(String),

    #[error("plan {plan_id} not found in course {course_id}")]
    PlanNotFound { course_id: String, plan_id: String },

    #[error("plan {plan_id} already exists in course {course_id}")]
    DuplicatePlan { course_id: String, plan_id: String },

    #[error("image import from patient {patient_id} failed: {reason}")]
    ImportFailed { patient_id: String, reason: String },

    #[error("{operation} failed: {reason}")]
    OperationFailed { operation: String, reason: String },
}

impl EngineError {
    /// Build an [`EngineError::OperationFailed`] for a named operation.
    pub fn operation(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::OperationFailed {
            operation: operation.into(),
            reason: reason.into(),
        }
    }
}
