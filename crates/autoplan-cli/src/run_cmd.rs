//! `autoplan run`: execute the full planning workflow against the
//! simulated engine backend.

use std::sync::Arc;

use anyhow::{Context, Result};

use autoplan_core::workflow::{self, RunOutcome};
use autoplan_engine::models::{Structure, StructureKind, StructureSet};
use autoplan_sim::{SimEngine, SimPatient, SvgReporter};

use crate::config::AutoplanConfig;
use crate::console::ConsoleInteraction;

/// Build the simulated engine from the configured patient record plus
/// the reference QA patient the verification image is imported from.
pub fn build_engine(config: &AutoplanConfig) -> SimEngine {
    let planning_patient = SimPatient::new(&config.run.patient_id).with_structure_set(
        StructureSet::new(&config.sim.structure_set_id, config.sim.structures.clone()),
    );

    let qa_patient = SimPatient::new(&config.run.qa.patient_id).with_structure_set(
        StructureSet::new(
            &config.run.qa.image_id,
            vec![Structure::new("QA phantom", StructureKind::Other)],
        ),
    );

    SimEngine::new()
        .with_patient(planning_patient)
        .with_patient(qa_patient)
        .with_beams_per_plan(config.sim.beams_per_plan)
}

pub async fn cmd_run(config: AutoplanConfig) -> Result<()> {
    std::fs::create_dir_all(&config.run.report_dir).with_context(|| {
        format!(
            "failed to create report directory {}",
            config.run.report_dir.display()
        )
    })?;

    let engine = Arc::new(build_engine(&config));
    let interaction = ConsoleInteraction::new();
    let reporter = SvgReporter::new(config.viewer.clone());

    tracing::info!(
        patient_id = %config.run.patient_id,
        course_id = %config.run.course_id,
        plan_id = %config.run.plan_id,
        "starting planning run"
    );

    let outcome = workflow::run_workflow(engine, &interaction, &reporter, &config.run).await?;

    match outcome {
        RunOutcome::AbortedMissingStructures => {
            println!("Run aborted: the base structure set or a required structure is missing.");
            println!("Nothing was modified.");
        }
        RunOutcome::AbortedInvalidPrescription => {
            println!("Run aborted: no valid prescription was provided.");
            println!("Nothing was modified.");
        }
        RunOutcome::Completed { verification_plans } => {
            println!(
                "Plan '{}' generated in course '{}'.",
                config.run.plan_id, config.run.course_id
            );
            println!("Reports written to {}.", config.run.report_dir.display());
            if verification_plans > 0 {
                println!(
                    "{} verification plans created in course '{}'.",
                    verification_plans, config.run.verification_course_id
                );
            } else {
                println!("No verification plans were created.");
            }
        }
    }

    Ok(())
}
