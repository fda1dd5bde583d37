//! Patient session: the explicit context value passed into every
//! workflow phase.
//!
//! A session is an opened patient record with modifications enabled.
//! It owns the single active modification transaction: only code
//! holding the session can persist, and every checkpoint goes through
//! [`Session::checkpoint`]. No stage runs outside an open session.

use std::sync::Arc;

use anyhow::{Context, Result};

use autoplan_engine::PlanningEngine;

/// An opened patient session with modifications enabled.
pub struct Session {
    engine: Arc<dyn PlanningEngine>,
    patient_id: String,
}

impl Session {
    /// Open the patient record and enable modifications.
    pub async fn open(engine: Arc<dyn PlanningEngine>, patient_id: &str) -> Result<Self> {
        engine
            .open_patient(patient_id)
            .await
            .with_context(|| format!("failed to open patient {patient_id}"))?;
        engine
            .begin_modifications()
            .await
            .with_context(|| format!("failed to enable modifications for patient {patient_id}"))?;

        tracing::info!(patient_id = %patient_id, "patient session opened");

        Ok(Self {
            engine,
            patient_id: patient_id.to_string(),
        })
    }

    /// The engine backing this session.
    pub fn engine(&self) -> &dyn PlanningEngine {
        self.engine.as_ref()
    }

    /// Id of the open patient.
    pub fn patient_id(&self) -> &str {
        &self.patient_id
    }

    /// Persist all pending modifications.
    ///
    /// The last successful checkpoint is the crash-recovery point;
    /// there is no rollback of work committed here.
    pub async fn checkpoint(&self) -> Result<()> {
        self.engine
            .save_modifications()
            .await
            .with_context(|| format!("failed to save modifications for {}", self.patient_id))?;
        tracing::debug!(patient_id = %self.patient_id, "modifications persisted");
        Ok(())
    }
}
