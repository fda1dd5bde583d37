//! Verification (QA) fan-out.
//!
//! Creates one verification plan per beam of the completed plan (dose
//! calculation suppressed) plus one combined plan covering all beams
//! (dose calculated), in the verification course. The QA image set is
//! looked up before it is imported so repeated runs never create a
//! duplicate set.

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use autoplan_engine::models::{PlanRef, StructureSet};

use crate::session::Session;

/// Label of the combined verification plan covering all beams.
pub const ALL_FIELDS_LABEL: &str = "All fields";

/// Identity of the reference QA patient record the verification image
/// is imported from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QaIdentity {
    pub patient_id: String,
    pub study_id: String,
    pub image_id: String,
}

/// Find the QA structure set on the current patient, importing it from
/// the reference QA patient only when absent.
///
/// When an earlier run already imported the set it is reused as-is;
/// the engine offers no way to strip stale QA structures from an
/// imported set, so reuse is accepted and logged.
pub async fn resolve_qa_structure_set(
    session: &Session,
    qa: &QaIdentity,
) -> Result<StructureSet> {
    let existing = session
        .engine()
        .structure_sets()
        .await
        .context("failed to search for an existing QA structure set")?
        .into_iter()
        .find(|set| set.id == qa.image_id);

    if let Some(set) = existing {
        tracing::warn!(
            image_id = %qa.image_id,
            "reusing existing QA structure set; stale QA structures are kept as-is"
        );
        return Ok(set);
    }

    tracing::info!(
        qa_patient = %qa.patient_id,
        study_id = %qa.study_id,
        image_id = %qa.image_id,
        "retrieving CT image of the QA device"
    );
    session
        .engine()
        .copy_image_from_other_patient(&qa.patient_id, &qa.study_id, &qa.image_id)
        .await
        .with_context(|| format!("failed to import QA image {} from {}", qa.image_id, qa.patient_id))
}

/// Create the verification plans for a completed plan.
///
/// One plan per beam, named by the beam id, dose suppressed; then one
/// combined plan named [`ALL_FIELDS_LABEL`] with dose calculated.
/// Returns the number of verification plans created (`beams + 1`).
pub async fn run_fan_out(
    session: &Session,
    plan: &PlanRef,
    verification_course_id: &str,
    qa: &QaIdentity,
) -> Result<usize> {
    let qa_set = resolve_qa_structure_set(session, qa).await?;

    let beams = session
        .engine()
        .beams(plan)
        .await
        .with_context(|| format!("failed to list beams of plan {plan}"))?;

    if beams.is_empty() {
        bail!("plan {plan} has no beams to verify");
    }

    tracing::info!(
        plan = %plan,
        course_id = %verification_course_id,
        beams = beams.len(),
        "creating verification plans"
    );

    // One verification plan per beam, in the plan's beam order.
    for beam in &beams {
        session
            .engine()
            .create_verification_plan(
                verification_course_id,
                std::slice::from_ref(&beam.id),
                plan,
                &qa_set.id,
                &beam.id,
                false,
            )
            .await
            .with_context(|| format!("failed to create verification plan for beam {}", beam.id))?;
    }

    // One combined plan with every beam, dose calculated.
    let all_beam_ids: Vec<String> = beams.iter().map(|b| b.id.clone()).collect();
    session
        .engine()
        .create_verification_plan(
            verification_course_id,
            &all_beam_ids,
            plan,
            &qa_set.id,
            ALL_FIELDS_LABEL,
            true,
        )
        .await
        .context("failed to create the combined verification plan")?;

    Ok(beams.len() + 1)
}
