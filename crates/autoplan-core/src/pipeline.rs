//! The stage pipeline: fixed-order planning stages with checkpoints.
//!
//! Stage order is not negotiable; each stage consumes state the
//! previous one produced (normalization needs the post-DVH-estimate
//! structure matches, not the raw post-geometry ones). A checkpoint is
//! a persist-then-notify pair; the last persisted checkpoint is the
//! crash-recovery point.

use std::fmt;

use anyhow::{Context, Result};

use autoplan_engine::models::{ModelStructure, PlanRef, StructureMatches};

use crate::interaction::InteractionPort;
use crate::prescription::Prescription;
use crate::session::Session;

// ---------------------------------------------------------------------------
// Derived-structure ids and checkpoint messages
// ---------------------------------------------------------------------------

/// Id of the expansion target structure the pipeline defines.
pub const PTV_ID: &str = "PTV";

/// Id of the synthetic expanded-CTV structure produced by geometry
/// generation and dropped from the matches before DVH estimation.
pub const EXPANDED_CTV_ID: &str = "CTV+margin";

/// Id of the synthetic target-minus-organs-at-risk structure added to
/// the matches before DVH estimation.
pub const PTV_SUB_OARS_ID: &str = "PTV-OARs";

/// All structure ids the pipeline derives; removed during stale-state
/// cleanup before a new run.
pub const DERIVED_STRUCTURE_IDS: [&str; 3] = [PTV_ID, EXPANDED_CTV_ID, PTV_SUB_OARS_ID];

pub const GEOMETRY_DONE_MESSAGE: &str =
    "Beam geometry generation and DVH estimation completed.";
pub const OPTIMIZATION_DONE_MESSAGE: &str = "Optimization completed.";
pub const MCO_DONE_MESSAGE: &str = "Multicriteria Optimization completed.";

// ---------------------------------------------------------------------------
// Stages
// ---------------------------------------------------------------------------

/// A planning stage, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Geometry,
    MatchDerivation,
    DvhEstimation,
    NormalTissueObjective,
    Optimization,
    Mco,
    DoseCalculation,
    Normalization,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Geometry => "beam geometry generation",
            Self::MatchDerivation => "structure match derivation",
            Self::DvhEstimation => "DVH estimation",
            Self::NormalTissueObjective => "normal tissue objective",
            Self::Optimization => "optimization",
            Self::Mco => "multi-criteria optimization",
            Self::DoseCalculation => "dose calculation",
            Self::Normalization => "normalization",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Structure-match adjustment
// ---------------------------------------------------------------------------

/// Adjust the raw structure matches for DVH estimation.
///
/// Removes the expanded-CTV role and adds the PTV-minus-OARs role
/// mapped to a fresh target-type model structure. Exactly one role is
/// removed and exactly one added, whatever the raw derivation
/// produced.
pub fn adjust_structure_matches(matches: &mut StructureMatches) {
    if matches.remove(EXPANDED_CTV_ID).is_none() {
        tracing::warn!(
            role = EXPANDED_CTV_ID,
            "expanded-CTV role absent from derived matches"
        );
    }
    matches.insert(
        PTV_SUB_OARS_ID.to_string(),
        ModelStructure::target(PTV_ID),
    );
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Run the full stage pipeline for a created plan.
///
/// Stages, strictly in order:
/// 1. Beam geometry generation
/// 2. Structure-match derivation
/// 3. Structure-match adjustment
/// 4. DVH estimate calculation
/// 5. Normal tissue objective
/// 6. Checkpoint A: persist + geometry/DVH message
/// 7. Optimization
/// 8. Checkpoint B: persist + optimization message
/// 9. MCO (by patient/course/plan id)
/// 10. Checkpoint C: persist + MCO message
/// 11. Dose calculation
/// 12. Normalization (adjusted matches)
/// 13. Checkpoint D: persist, no message
///
/// Returns the adjusted structure matches for reporting. Engine
/// failures propagate; checkpoints already persisted stay persisted.
pub async fn run_pipeline(
    session: &Session,
    plan: &PlanRef,
    prescription: &Prescription,
    interaction: &dyn InteractionPort,
) -> Result<StructureMatches> {
    let engine = session.engine();

    // 1. Beam geometry.
    tracing::info!(plan = %plan, stage = %Stage::Geometry, "running stage");
    engine
        .generate_beam_geometry(plan, &prescription.geometry_params())
        .await
        .with_context(|| format!("{} failed for plan {plan}", Stage::Geometry))?;

    // 2-3. Derive and adjust structure matches.
    tracing::info!(plan = %plan, stage = %Stage::MatchDerivation, "running stage");
    let mut matches = engine
        .derive_structure_matches(plan)
        .await
        .with_context(|| format!("{} failed for plan {plan}", Stage::MatchDerivation))?;
    adjust_structure_matches(&mut matches);

    // 4. DVH estimates on the adjusted matches.
    tracing::info!(plan = %plan, stage = %Stage::DvhEstimation, "running stage");
    engine
        .calculate_dvh_estimates(plan, &matches)
        .await
        .with_context(|| format!("{} failed for plan {plan}", Stage::DvhEstimation))?;

    // 5. Normal tissue objective.
    tracing::info!(plan = %plan, stage = %Stage::NormalTissueObjective, "running stage");
    engine
        .add_normal_tissue_objective(plan)
        .await
        .with_context(|| format!("{} failed for plan {plan}", Stage::NormalTissueObjective))?;

    // 6. Checkpoint A.
    checkpoint(session, interaction, Some(GEOMETRY_DONE_MESSAGE)).await?;

    // 7. Optimization.
    tracing::info!(plan = %plan, stage = %Stage::Optimization, "running stage");
    engine
        .optimize(plan)
        .await
        .with_context(|| format!("{} failed for plan {plan}", Stage::Optimization))?;

    // 8. Checkpoint B.
    checkpoint(session, interaction, Some(OPTIMIZATION_DONE_MESSAGE)).await?;

    // 9. MCO, by identity: the engine re-resolves the plan after
    //    optimization, so it gets ids rather than the handle.
    tracing::info!(plan = %plan, stage = %Stage::Mco, "running stage");
    engine
        .run_mco(session.patient_id(), &plan.course_id, &plan.plan_id)
        .await
        .with_context(|| format!("{} failed for plan {plan}", Stage::Mco))?;

    // 10. Checkpoint C.
    checkpoint(session, interaction, Some(MCO_DONE_MESSAGE)).await?;

    // 11. Dose calculation.
    tracing::info!(plan = %plan, stage = %Stage::DoseCalculation, "running stage");
    engine
        .calculate_dose(plan)
        .await
        .with_context(|| format!("{} failed for plan {plan}", Stage::DoseCalculation))?;

    // 12. Normalization on the adjusted matches.
    tracing::info!(plan = %plan, stage = %Stage::Normalization, "running stage");
    engine
        .normalize(plan, &matches)
        .await
        .with_context(|| format!("{} failed for plan {plan}", Stage::Normalization))?;

    // 13. Checkpoint D: persist only.
    checkpoint(session, interaction, None).await?;

    tracing::info!(plan = %plan, "plan successfully generated");

    Ok(matches)
}

/// Persist pending modifications and optionally notify the operator.
///
/// The save always happens before the notification so an interrupted
/// process never reports progress it has not persisted.
async fn checkpoint(
    session: &Session,
    interaction: &dyn InteractionPort,
    message: Option<&str>,
) -> Result<()> {
    session.checkpoint().await?;
    if let Some(message) = message {
        tracing::info!(message, "checkpoint reached");
        interaction.show_info(message).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use autoplan_engine::models::ModelStructureKind;

    fn raw_matches() -> StructureMatches {
        let mut m = StructureMatches::new();
        m.insert("CTV".to_string(), ModelStructure::target("CTV"));
        m.insert("Rectum".to_string(), ModelStructure::organ_at_risk("Rectum"));
        m.insert(
            EXPANDED_CTV_ID.to_string(),
            ModelStructure::target(EXPANDED_CTV_ID),
        );
        m
    }

    #[test]
    fn adjustment_swaps_exactly_one_role() {
        let mut matches = raw_matches();
        let before = matches.len();

        adjust_structure_matches(&mut matches);

        assert_eq!(matches.len(), before);
        assert!(!matches.contains_key(EXPANDED_CTV_ID));
        let added = matches.get(PTV_SUB_OARS_ID).expect("PTV-OARs role added");
        assert_eq!(added.label, PTV_ID);
        assert_eq!(added.kind, ModelStructureKind::Target);
    }

    #[test]
    fn adjustment_keeps_unrelated_roles() {
        let mut matches = raw_matches();
        adjust_structure_matches(&mut matches);
        assert!(matches.contains_key("CTV"));
        assert!(matches.contains_key("Rectum"));
    }

    #[test]
    fn adjustment_without_expanded_role_still_adds_target() {
        let mut matches = StructureMatches::new();
        matches.insert("CTV".to_string(), ModelStructure::target("CTV"));

        adjust_structure_matches(&mut matches);

        assert_eq!(matches.len(), 2);
        assert!(matches.contains_key(PTV_SUB_OARS_ID));
    }

    #[test]
    fn stage_display_names() {
        assert_eq!(Stage::Geometry.to_string(), "beam geometry generation");
        assert_eq!(Stage::Mco.to_string(), "multi-criteria optimization");
    }
}
