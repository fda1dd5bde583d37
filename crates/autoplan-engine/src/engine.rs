//! The planning-engine trait.
//!
//! One backend holds at most one open patient at a time; the workflow
//! opens the patient, enables modifications, and then drives the
//! planning operations in order, persisting with `save_modifications`
//! at each checkpoint.

use async_trait::async_trait;

use crate::error::EngineError;
use crate::models::{Beam, GeometryParams, PlanRef, StructureMatches, StructureSet};

/// The external treatment-planning engine.
///
/// Object-safe so the workflow can be driven against a substitute
/// implementation in tests and simulate mode.
#[async_trait]
pub trait PlanningEngine: Send + Sync {
    /// Open a patient record. Replaces any previously open patient.
    async fn open_patient(&self, patient_id: &str) -> Result<(), EngineError>;

    /// Enable the single modification transaction for the open patient.
    async fn begin_modifications(&self) -> Result<(), EngineError>;

    /// Persist all pending modifications (a checkpoint).
    async fn save_modifications(&self) -> Result<(), EngineError>;

    /// Structure sets of the open patient, including imported QA sets.
    async fn structure_sets(&self) -> Result<Vec<StructureSet>, EngineError>;

    /// Create a new external plan in the given course, backed by the
    /// given structure set. The plan id must be unique in the course.
    async fn add_plan(
        &self,
        course_id: &str,
        structure_set_id: &str,
        plan_id: &str,
    ) -> Result<PlanRef, EngineError>;

    /// Remove a plan by id. Returns `false` if no such plan existed.
    async fn remove_plan(&self, course_id: &str, plan_id: &str) -> Result<bool, EngineError>;

    /// Remove structures by id from a structure set, skipping ids that
    /// are not present. Returns the number actually removed.
    async fn remove_structures(
        &self,
        structure_set_id: &str,
        structure_ids: &[String],
    ) -> Result<usize, EngineError>;

    /// Generate beam geometry on the plan, producing its beams.
    async fn generate_beam_geometry(
        &self,
        plan: &PlanRef,
        params: &GeometryParams,
    ) -> Result<(), EngineError>;

    /// Derive the structure-match mapping from the generated geometry.
    async fn derive_structure_matches(
        &self,
        plan: &PlanRef,
    ) -> Result<StructureMatches, EngineError>;

    /// Calculate DVH estimates for the matched structures.
    async fn calculate_dvh_estimates(
        &self,
        plan: &PlanRef,
        matches: &StructureMatches,
    ) -> Result<(), EngineError>;

    /// Add the normal tissue objective to the plan.
    async fn add_normal_tissue_objective(&self, plan: &PlanRef) -> Result<(), EngineError>;

    /// Run the optimizer.
    async fn optimize(&self, plan: &PlanRef) -> Result<(), EngineError>;

    /// Run multi-criteria optimization.
    ///
    /// Takes ids rather than a [`PlanRef`]-resolved object because the
    /// engine re-resolves the plan by identity after optimization.
    async fn run_mco(
        &self,
        patient_id: &str,
        course_id: &str,
        plan_id: &str,
    ) -> Result<(), EngineError>;

    /// Calculate dose for the plan.
    async fn calculate_dose(&self, plan: &PlanRef) -> Result<(), EngineError>;

    /// Normalize the plan using the matched structures.
    async fn normalize(
        &self,
        plan: &PlanRef,
        matches: &StructureMatches,
    ) -> Result<(), EngineError>;

    /// Beams of the plan, in the plan's beam order.
    async fn beams(&self, plan: &PlanRef) -> Result<Vec<Beam>, EngineError>;

    /// Create a verification plan in the given course containing the
    /// given beams of the source plan, placed on the verification
    /// structure set. Dose is only computed when `calculate_dose` is
    /// set.
    #[allow(clippy::too_many_arguments)]
    async fn create_verification_plan(
        &self,
        course_id: &str,
        beam_ids: &[String],
        source_plan: &PlanRef,
        verification_set_id: &str,
        label: &str,
        calculate_dose: bool,
    ) -> Result<PlanRef, EngineError>;

    /// Import an image and its structure set from another patient
    /// record into the open patient. Returns the imported set.
    async fn copy_image_from_other_patient(
        &self,
        patient_id: &str,
        study_id: &str,
        image_id: &str,
    ) -> Result<StructureSet, EngineError>;
}
