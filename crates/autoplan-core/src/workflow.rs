//! Workflow orchestrator: the top-level controller for one planning
//! run against one patient.
//!
//! Runs end-to-end on a single logical thread: open session, resolve
//! structures, collect the prescription, clean stale state, create the
//! plan, run the stage pipeline, report, and optionally fan out
//! verification plans. The caller guarantees one orchestration per
//! patient at a time.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};

use autoplan_engine::PlanningEngine;
use autoplan_engine::models::{PlanRef, StructureMatches};

use crate::interaction::InteractionPort;
use crate::pipeline::{self, DERIVED_STRUCTURE_IDS};
use crate::prescription::{PrescriptionDefaults, PrescriptionRequest};
use crate::report::Reporter;
use crate::session::Session;
use crate::structures::{self, StructurePrerequisites};
use crate::verification::{self, QaIdentity};

pub const INVALID_PRESCRIPTION_TITLE: &str = "Invalid prescription";
pub const INVALID_PRESCRIPTION_MESSAGE: &str = "Please provide a valid prescription.";
pub const VERIFICATION_CONFIRM_TITLE: &str = "Quality assurance";
pub const VERIFICATION_CONFIRM_MESSAGE: &str = "Proceed to creation of verification plans?";

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Everything a single run needs: identifiers, prerequisites, QA
/// identity, prescription defaults, and report settings. All of it is
/// operator configuration, not workflow logic.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub patient_id: String,
    /// Course the generated plan is placed in.
    pub course_id: String,
    /// Course the verification plans are placed in.
    pub verification_course_id: String,
    /// Id of the generated plan, unique within its course.
    pub plan_id: String,
    pub prerequisites: StructurePrerequisites,
    pub qa: QaIdentity,
    pub defaults: PrescriptionDefaults,
    /// Directory the DVH chart and quality report are written to.
    pub report_dir: PathBuf,
    pub dvh_width: u32,
    pub dvh_height: u32,
    /// Fixed wait between opening the report and offering the
    /// verification confirmation, so the viewer has time to come up.
    /// The reporting collaborator has no viewer-ready signal.
    pub post_report_delay: Duration,
}

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

/// The workflow state machine.
///
/// Valid transition graph:
///
/// ```text
/// idle                    -> structures_checked
/// structures_checked      -> prescription_collected
/// prescription_collected  -> aborted_invalid_prescription
/// prescription_collected  -> planning_in_progress
/// planning_in_progress    -> reported
/// reported                -> verification_in_progress
/// reported                -> ended
/// verification_in_progress -> ended
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowState {
    Idle,
    StructuresChecked,
    PrescriptionCollected,
    AbortedInvalidPrescription,
    PlanningInProgress,
    Reported,
    VerificationInProgress,
    Ended,
}

impl WorkflowState {
    /// Check whether a transition from `from` to `to` is a valid edge
    /// in the state graph.
    pub fn is_valid_transition(from: WorkflowState, to: WorkflowState) -> bool {
        matches!(
            (from, to),
            (Self::Idle, Self::StructuresChecked)
                | (Self::StructuresChecked, Self::PrescriptionCollected)
                | (Self::PrescriptionCollected, Self::AbortedInvalidPrescription)
                | (Self::PrescriptionCollected, Self::PlanningInProgress)
                | (Self::PlanningInProgress, Self::Reported)
                | (Self::Reported, Self::VerificationInProgress)
                | (Self::Reported, Self::Ended)
                | (Self::VerificationInProgress, Self::Ended)
        )
    }

    /// Whether the state is terminal.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::AbortedInvalidPrescription | Self::Ended)
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::StructuresChecked => "structures_checked",
            Self::PrescriptionCollected => "prescription_collected",
            Self::AbortedInvalidPrescription => "aborted_invalid_prescription",
            Self::PlanningInProgress => "planning_in_progress",
            Self::Reported => "reported",
            Self::VerificationInProgress => "verification_in_progress",
            Self::Ended => "ended",
        };
        f.write_str(s)
    }
}

/// Tracks the current workflow state and enforces valid transitions.
struct StateTracker {
    state: WorkflowState,
}

impl StateTracker {
    fn new() -> Self {
        Self {
            state: WorkflowState::Idle,
        }
    }

    fn advance(&mut self, to: WorkflowState) -> Result<()> {
        if !WorkflowState::is_valid_transition(self.state, to) {
            bail!("invalid workflow transition: {} -> {}", self.state, to);
        }
        tracing::debug!(from = %self.state, to = %to, "workflow state transition");
        self.state = to;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// Result of running the workflow to a terminal state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The base structure set or a prerequisite structure was missing;
    /// nothing was modified.
    AbortedMissingStructures,
    /// The operator cancelled or supplied an incomplete prescription;
    /// nothing was modified.
    AbortedInvalidPrescription,
    /// The plan was generated and reported. `verification_plans` is
    /// zero when the operator declined verification.
    Completed { verification_plans: usize },
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Run the full planning workflow for one patient.
///
/// Fatal engine errors propagate to the caller; checkpoints already
/// persisted stay persisted (no rollback, no retry).
pub async fn run_workflow(
    engine: Arc<dyn PlanningEngine>,
    interaction: &dyn InteractionPort,
    reporter: &dyn Reporter,
    config: &RunConfig,
) -> Result<RunOutcome> {
    let mut state = StateTracker::new();

    // 1. Open the patient session (modifications enabled).
    let session = Session::open(engine, &config.patient_id).await?;

    // 2. Structure resolver. Missing prerequisites end the run before
    //    any mutation and before the prescription gate.
    let Some(structure_set) =
        structures::resolve_structure_set(&session, &config.prerequisites).await?
    else {
        return Ok(RunOutcome::AbortedMissingStructures);
    };
    state.advance(WorkflowState::StructuresChecked)?;

    // 3. Prescription gate: blocks until the operator closes it.
    let request = PrescriptionRequest {
        patient_id: config.patient_id.clone(),
        defaults: config.defaults.clone(),
        candidates: structure_set.structures.clone(),
    };
    let draft = interaction
        .collect_prescription(&request)
        .await
        .context("prescription gate failed")?;
    state.advance(WorkflowState::PrescriptionCollected)?;

    let Some(prescription) = draft.validate() else {
        interaction
            .show_error(INVALID_PRESCRIPTION_TITLE, INVALID_PRESCRIPTION_MESSAGE)
            .await?;
        state.advance(WorkflowState::AbortedInvalidPrescription)?;
        tracing::warn!(patient_id = %config.patient_id, "run aborted: invalid prescription");
        return Ok(RunOutcome::AbortedInvalidPrescription);
    };

    tracing::info!(
        patient_id = %config.patient_id,
        dose_per_fraction = prescription.dose_per_fraction,
        fractions = prescription.fractions,
        ptv_margin_mm = prescription.ptv_margin_mm,
        target_id = %prescription.target_id,
        "prescription collected"
    );

    // 4. Stale-state cleanup: at most one plan per id per course, and
    //    no derived structures from a previous run. Corrective, not an
    //    error.
    let removed = session
        .engine()
        .remove_plan(&config.course_id, &config.plan_id)
        .await
        .with_context(|| format!("failed to remove stale plan {}", config.plan_id))?;
    if removed {
        tracing::info!(
            course_id = %config.course_id,
            plan_id = %config.plan_id,
            "removed stale plan from a previous run"
        );
    }
    let derived: Vec<String> = DERIVED_STRUCTURE_IDS.iter().map(|s| s.to_string()).collect();
    session
        .engine()
        .remove_structures(&structure_set.id, &derived)
        .await
        .context("failed to remove derived structures from a previous run")?;

    // 5. Create the plan.
    let plan = session
        .engine()
        .add_plan(&config.course_id, &structure_set.id, &config.plan_id)
        .await
        .with_context(|| {
            format!(
                "failed to create plan {} in course {}",
                config.plan_id, config.course_id
            )
        })?;
    state.advance(WorkflowState::PlanningInProgress)?;

    // 6. Stage pipeline, checkpoints A-D.
    let matches = pipeline::run_pipeline(&session, &plan, &prescription, interaction).await?;

    // 7. Reporting: DVH chart for the matched structures that exist in
    //    the base set, then the quality report, opened in the viewer.
    generate_reports(&session, reporter, config, &plan, &matches, &structure_set.id).await?;
    state.advance(WorkflowState::Reported)?;

    // 8. Give the report viewer time to come up before prompting.
    tokio::time::sleep(config.post_report_delay).await;

    // 9. Verification is operator-gated.
    let proceed = interaction
        .confirm(VERIFICATION_CONFIRM_TITLE, VERIFICATION_CONFIRM_MESSAGE)
        .await?;

    if !proceed {
        state.advance(WorkflowState::Ended)?;
        tracing::info!(plan = %plan, "run ended without verification plans");
        return Ok(RunOutcome::Completed {
            verification_plans: 0,
        });
    }

    // 10. Verification fan-out, then the final checkpoint.
    state.advance(WorkflowState::VerificationInProgress)?;
    let verification_plans =
        verification::run_fan_out(&session, &plan, &config.verification_course_id, &config.qa)
            .await?;
    session.checkpoint().await?;
    tracing::info!(
        plan = %plan,
        verification_plans,
        "verification plans successfully created"
    );

    state.advance(WorkflowState::Ended)?;
    Ok(RunOutcome::Completed { verification_plans })
}

/// Render the DVH chart and the quality report, then open the report.
async fn generate_reports(
    session: &Session,
    reporter: &dyn Reporter,
    config: &RunConfig,
    plan: &PlanRef,
    matches: &StructureMatches,
    structure_set_id: &str,
) -> Result<()> {
    // Chart only the matched structures actually present in the set;
    // synthetic roles without a contour are skipped.
    let sets = session.engine().structure_sets().await?;
    let structure_ids: Vec<String> = sets
        .iter()
        .find(|s| s.id == structure_set_id)
        .map(|set| {
            set.structures
                .iter()
                .filter(|s| matches.contains_key(&s.id))
                .map(|s| s.id.clone())
                .collect()
        })
        .unwrap_or_default();

    let chart_path = config.report_dir.join("dvh_mco.svg");
    reporter
        .render_dvh_chart(
            &chart_path,
            plan,
            &structure_ids,
            config.dvh_width,
            config.dvh_height,
        )
        .await
        .context("failed to render the DVH chart")?;

    let report_path = reporter
        .generate_quality_report(plan, matches, &config.report_dir)
        .await
        .context("failed to generate the quality report")?;

    tracing::info!(report = %report_path.display(), "report successfully generated");

    reporter
        .open_report(&report_path)
        .await
        .context("failed to open the quality report")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_transitions_follow_the_graph() {
        use WorkflowState::*;
        let valid = [
            (Idle, StructuresChecked),
            (StructuresChecked, PrescriptionCollected),
            (PrescriptionCollected, AbortedInvalidPrescription),
            (PrescriptionCollected, PlanningInProgress),
            (PlanningInProgress, Reported),
            (Reported, VerificationInProgress),
            (Reported, Ended),
            (VerificationInProgress, Ended),
        ];
        for (from, to) in valid {
            assert!(
                WorkflowState::is_valid_transition(from, to),
                "{from} -> {to} should be valid"
            );
        }
    }

    #[test]
    fn invalid_transitions_are_rejected() {
        use WorkflowState::*;
        let invalid = [
            (Idle, PlanningInProgress),
            (Idle, Ended),
            (StructuresChecked, PlanningInProgress),
            (PlanningInProgress, VerificationInProgress),
            (Ended, Idle),
            (AbortedInvalidPrescription, PlanningInProgress),
            (Reported, PlanningInProgress),
        ];
        for (from, to) in invalid {
            assert!(
                !WorkflowState::is_valid_transition(from, to),
                "{from} -> {to} should be invalid"
            );
        }
    }

    #[test]
    fn terminal_states() {
        assert!(WorkflowState::Ended.is_terminal());
        assert!(WorkflowState::AbortedInvalidPrescription.is_terminal());
        assert!(!WorkflowState::Reported.is_terminal());
    }

    #[test]
    fn tracker_rejects_skipping_states() {
        let mut tracker = StateTracker::new();
        tracker.advance(WorkflowState::StructuresChecked).unwrap();
        let err = tracker
            .advance(WorkflowState::PlanningInProgress)
            .unwrap_err();
        assert!(err.to_string().contains("invalid workflow transition"));
    }
}
