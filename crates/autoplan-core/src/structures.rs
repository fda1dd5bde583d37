//! Structure resolver: precondition check for the base structure set
//! and its prerequisite structures.
//!
//! This runs before anything else touches the patient. A missing set
//! or structure is not a recoverable error: the run aborts with no
//! further side effects and the prescription gate is never opened.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use autoplan_engine::models::StructureSet;

use crate::session::Session;

/// What the patient record must already contain before planning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructurePrerequisites {
    /// Id of the base structure set the plan will be built on.
    pub structure_set_id: String,
    /// Structure ids that must be present in that set.
    pub required_structures: Vec<String>,
}

/// Locate and validate the base structure set.
///
/// Returns `Ok(None)` when the set or any prerequisite structure is
/// missing; the missing ids are logged. Engine failures propagate.
pub async fn resolve_structure_set(
    session: &Session,
    prerequisites: &StructurePrerequisites,
) -> Result<Option<StructureSet>> {
    let sets = session
        .engine()
        .structure_sets()
        .await
        .with_context(|| format!("failed to list structure sets for {}", session.patient_id()))?;

    let Some(set) = sets
        .into_iter()
        .find(|s| s.id == prerequisites.structure_set_id)
    else {
        tracing::error!(
            patient_id = %session.patient_id(),
            structure_set = %prerequisites.structure_set_id,
            "base structure set not found"
        );
        return Ok(None);
    };

    let missing: Vec<&str> = prerequisites
        .required_structures
        .iter()
        .filter(|id| !set.contains(id))
        .map(String::as_str)
        .collect();

    if !missing.is_empty() {
        tracing::error!(
            patient_id = %session.patient_id(),
            structure_set = %set.id,
            missing = ?missing,
            "prerequisite structures missing"
        );
        return Ok(None);
    }

    tracing::info!(
        patient_id = %session.patient_id(),
        structure_set = %set.id,
        structures = set.structures.len(),
        "structure prerequisites satisfied"
    );

    Ok(Some(set))
}
