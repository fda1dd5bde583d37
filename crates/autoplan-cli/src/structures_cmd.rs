//! `autoplan check-structures`: dry-run the structure prerequisite
//! check without touching anything else.

use std::sync::Arc;

use anyhow::Result;

use autoplan_core::session::Session;
use autoplan_core::structures;

use crate::config::AutoplanConfig;
use crate::run_cmd::build_engine;

pub async fn cmd_check_structures(config: AutoplanConfig) -> Result<()> {
    let engine = Arc::new(build_engine(&config));
    let session = Session::open(engine, &config.run.patient_id).await?;

    match structures::resolve_structure_set(&session, &config.run.prerequisites).await? {
        Some(set) => {
            println!(
                "Structure set '{}' satisfies all prerequisites for patient '{}'.",
                set.id, config.run.patient_id
            );
            println!("Structures:");
            for structure in &set.structures {
                println!("  {} ({})", structure.id, structure.kind);
            }
        }
        None => {
            println!(
                "Prerequisites not satisfied for patient '{}'; see the log for the missing ids.",
                config.run.patient_id
            );
        }
    }

    Ok(())
}
