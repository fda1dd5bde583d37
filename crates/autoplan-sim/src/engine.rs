//! In-memory planning engine.
//!
//! Models patients, courses, plans, beams and structure-set imports
//! well enough to drive the whole workflow, and records every engine
//! call in order so tests can assert stage and checkpoint ordering.
//! Failures can be injected per operation name.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use autoplan_engine::models::{
    Beam, GeometryParams, ModelStructure, PlanRef, StructureKind, StructureMatches, StructureSet,
};
use autoplan_engine::{EngineError, PlanningEngine};

use autoplan_core::pipeline::EXPANDED_CTV_ID;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// A patient record known to the sim, including reference QA patients.
#[derive(Debug, Clone)]
pub struct SimPatient {
    pub id: String,
    pub structure_sets: Vec<StructureSet>,
}

impl SimPatient {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            structure_sets: Vec::new(),
        }
    }

    pub fn with_structure_set(mut self, set: StructureSet) -> Self {
        self.structure_sets.push(set);
        self
    }
}

/// A verification plan created through the fan-out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationPlanRecord {
    pub course_id: String,
    pub label: String,
    pub beam_ids: Vec<String>,
    pub source_plan: PlanRef,
    pub structure_set_id: String,
    pub dose_calculated: bool,
}

#[derive(Debug, Clone, Default)]
struct SimPlan {
    structure_set_id: String,
    beams: Vec<Beam>,
    target_id: Option<String>,
    dvh_estimated: bool,
    nto_added: bool,
    optimized: bool,
    mco_done: bool,
    dose_calculated: bool,
    normalized: bool,
}

#[derive(Default)]
struct Inner {
    patients: HashMap<String, SimPatient>,
    open_patient: Option<String>,
    modifications_enabled: bool,
    /// course id -> plan id -> plan, for the open patient.
    courses: BTreeMap<String, BTreeMap<String, SimPlan>>,
    verification_plans: Vec<VerificationPlanRecord>,
    calls: Vec<String>,
    saves: usize,
    imports: usize,
    beams_per_plan: usize,
    fail_on: HashSet<String>,
}

// ---------------------------------------------------------------------------
// SimEngine
// ---------------------------------------------------------------------------

/// In-memory [`PlanningEngine`] with call recording and failure
/// injection.
pub struct SimEngine {
    inner: Mutex<Inner>,
}

impl Default for SimEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SimEngine {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                beams_per_plan: 3,
                ..Inner::default()
            }),
        }
    }

    /// Register a patient record (planning patient or QA reference).
    pub fn with_patient(self, patient: SimPatient) -> Self {
        self.inner
            .lock()
            .unwrap()
            .patients
            .insert(patient.id.clone(), patient);
        self
    }

    /// Number of beams geometry generation produces per plan.
    pub fn with_beams_per_plan(self, beams: usize) -> Self {
        self.inner.lock().unwrap().beams_per_plan = beams;
        self
    }

    /// Make the named operation fail with an injected engine error.
    pub fn with_failure(self, operation: &str) -> Self {
        self.inner.lock().unwrap().fail_on.insert(operation.into());
        self
    }

    // -- inspection ---------------------------------------------------------

    /// Every engine call so far, in invocation order.
    pub fn calls(&self) -> Vec<String> {
        self.inner.lock().unwrap().calls.clone()
    }

    /// Position of the first call whose name starts with `prefix`.
    pub fn first_call_index(&self, prefix: &str) -> Option<usize> {
        self.inner
            .lock()
            .unwrap()
            .calls
            .iter()
            .position(|c| c.starts_with(prefix))
    }

    /// How many times `save_modifications` succeeded.
    pub fn save_count(&self) -> usize {
        self.inner.lock().unwrap().saves
    }

    /// How many QA image imports were performed.
    pub fn import_count(&self) -> usize {
        self.inner.lock().unwrap().imports
    }

    /// Plan ids in a course, verification plans included.
    pub fn plan_ids_in_course(&self, course_id: &str) -> Vec<String> {
        self.inner
            .lock()
            .unwrap()
            .courses
            .get(course_id)
            .map(|plans| plans.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn has_plan(&self, course_id: &str, plan_id: &str) -> bool {
        self.inner
            .lock()
            .unwrap()
            .courses
            .get(course_id)
            .is_some_and(|plans| plans.contains_key(plan_id))
    }

    /// Verification plans created so far, in creation order.
    pub fn verification_plans(&self) -> Vec<VerificationPlanRecord> {
        self.inner.lock().unwrap().verification_plans.clone()
    }

    /// Structure-set ids of the open patient.
    pub fn structure_set_ids(&self) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        let Some(open) = inner.open_patient.as_ref() else {
            return Vec::new();
        };
        inner
            .patients
            .get(open)
            .map(|p| p.structure_sets.iter().map(|s| s.id.clone()).collect())
            .unwrap_or_default()
    }

    /// Beams of a plan, in plan order.
    pub fn beams_of(&self, course_id: &str, plan_id: &str) -> Vec<Beam> {
        self.inner
            .lock()
            .unwrap()
            .courses
            .get(course_id)
            .and_then(|plans| plans.get(plan_id))
            .map(|p| p.beams.clone())
            .unwrap_or_default()
    }
}

impl Inner {
    fn record(&mut self, call: impl Into<String>) {
        self.calls.push(call.into());
    }

    fn check_failure(&self, operation: &str) -> Result<(), EngineError> {
        if self.fail_on.contains(operation) {
            return Err(EngineError::operation(operation, "injected failure"));
        }
        Ok(())
    }

    fn open_patient_mut(&mut self) -> Result<&mut SimPatient, EngineError> {
        let id = self.open_patient.clone().ok_or(EngineError::NoOpenPatient)?;
        self.patients
            .get_mut(&id)
            .ok_or(EngineError::PatientNotFound(id))
    }

    fn require_modifications(&self) -> Result<(), EngineError> {
        if self.open_patient.is_none() {
            return Err(EngineError::NoOpenPatient);
        }
        if !self.modifications_enabled {
            return Err(EngineError::ModificationsNotEnabled);
        }
        Ok(())
    }

    fn plan_mut(&mut self, plan: &PlanRef) -> Result<&mut SimPlan, EngineError> {
        self.courses
            .get_mut(&plan.course_id)
            .and_then(|plans| plans.get_mut(&plan.plan_id))
            .ok_or_else(|| EngineError::PlanNotFound {
                course_id: plan.course_id.clone(),
                plan_id: plan.plan_id.clone(),
            })
    }
}

#[async_trait]
impl PlanningEngine for SimEngine {
    async fn open_patient(&self, patient_id: &str) -> Result<(), EngineError> {
        let mut inner = self.inner.lock().unwrap();
        inner.record("open_patient");
        inner.check_failure("open_patient")?;
        if !inner.patients.contains_key(patient_id) {
            return Err(EngineError::PatientNotFound(patient_id.to_string()));
        }
        inner.open_patient = Some(patient_id.to_string());
        inner.modifications_enabled = false;
        Ok(())
    }

    async fn begin_modifications(&self) -> Result<(), EngineError> {
        let mut inner = self.inner.lock().unwrap();
        inner.record("begin_modifications");
        inner.check_failure("begin_modifications")?;
        if inner.open_patient.is_none() {
            return Err(EngineError::NoOpenPatient);
        }
        inner.modifications_enabled = true;
        Ok(())
    }

    async fn save_modifications(&self) -> Result<(), EngineError> {
        let mut inner = self.inner.lock().unwrap();
        inner.record("save_modifications");
        inner.check_failure("save_modifications")?;
        inner.require_modifications()?;
        inner.saves += 1;
        Ok(())
    }

    async fn structure_sets(&self) -> Result<Vec<StructureSet>, EngineError> {
        let mut inner = self.inner.lock().unwrap();
        inner.record("structure_sets");
        inner.check_failure("structure_sets")?;
        let patient = inner.open_patient_mut()?;
        Ok(patient.structure_sets.clone())
    }

    async fn add_plan(
        &self,
        course_id: &str,
        structure_set_id: &str,
        plan_id: &str,
    ) -> Result<PlanRef, EngineError> {
        let mut inner = self.inner.lock().unwrap();
        inner.record("add_plan");
        inner.check_failure("add_plan")?;
        inner.require_modifications()?;

        let patient = inner.open_patient_mut()?;
        if !patient.structure_sets.iter().any(|s| s.id == structure_set_id) {
            return Err(EngineError::StructureSetNotFound(
                structure_set_id.to_string(),
            ));
        }

        let plans = inner.courses.entry(course_id.to_string()).or_default();
        if plans.contains_key(plan_id) {
            return Err(EngineError::DuplicatePlan {
                course_id: course_id.to_string(),
                plan_id: plan_id.to_string(),
            });
        }
        plans.insert(
            plan_id.to_string(),
            SimPlan {
                structure_set_id: structure_set_id.to_string(),
                ..SimPlan::default()
            },
        );
        Ok(PlanRef::new(course_id, plan_id))
    }

    async fn remove_plan(&self, course_id: &str, plan_id: &str) -> Result<bool, EngineError> {
        let mut inner = self.inner.lock().unwrap();
        inner.record("remove_plan");
        inner.check_failure("remove_plan")?;
        inner.require_modifications()?;
        let removed = inner
            .courses
            .get_mut(course_id)
            .is_some_and(|plans| plans.remove(plan_id).is_some());
        Ok(removed)
    }

    async fn remove_structures(
        &self,
        structure_set_id: &str,
        structure_ids: &[String],
    ) -> Result<usize, EngineError> {
        let mut inner = self.inner.lock().unwrap();
        inner.record("remove_structures");
        inner.check_failure("remove_structures")?;
        inner.require_modifications()?;

        let patient = inner.open_patient_mut()?;
        let set = patient
            .structure_sets
            .iter_mut()
            .find(|s| s.id == structure_set_id)
            .ok_or_else(|| EngineError::StructureSetNotFound(structure_set_id.to_string()))?;
        let before = set.structures.len();
        set.structures.retain(|s| !structure_ids.contains(&s.id));
        Ok(before - set.structures.len())
    }

    async fn generate_beam_geometry(
        &self,
        plan: &PlanRef,
        params: &GeometryParams,
    ) -> Result<(), EngineError> {
        let mut inner = self.inner.lock().unwrap();
        inner.record("generate_beam_geometry");
        inner.check_failure("generate_beam_geometry")?;
        inner.require_modifications()?;

        let beams_per_plan = inner.beams_per_plan;
        let sim_plan = inner.plan_mut(plan)?;
        sim_plan.beams = (1..=beams_per_plan)
            .map(|i| Beam::new(format!("Field {i}")))
            .collect();
        sim_plan.target_id = Some(params.target_id.clone());
        Ok(())
    }

    async fn derive_structure_matches(
        &self,
        plan: &PlanRef,
    ) -> Result<StructureMatches, EngineError> {
        let mut inner = self.inner.lock().unwrap();
        inner.record("derive_structure_matches");
        inner.check_failure("derive_structure_matches")?;

        let sim_plan = inner.plan_mut(plan)?;
        if sim_plan.beams.is_empty() {
            return Err(EngineError::operation(
                "derive_structure_matches",
                "beam geometry has not been generated",
            ));
        }
        let target_id = sim_plan.target_id.clone().unwrap_or_default();
        let set_id = sim_plan.structure_set_id.clone();

        let patient = inner.open_patient_mut()?;
        let set = patient
            .structure_sets
            .iter()
            .find(|s| s.id == set_id)
            .ok_or_else(|| EngineError::StructureSetNotFound(set_id.clone()))?;

        let mut matches = StructureMatches::new();
        matches.insert(target_id.clone(), ModelStructure::target(&target_id));
        for structure in &set.structures {
            if structure.kind == StructureKind::OrganAtRisk {
                matches.insert(
                    structure.id.clone(),
                    ModelStructure::organ_at_risk(&structure.id),
                );
            }
        }
        // Geometry generation leaves its synthetic expansion behind.
        matches.insert(
            EXPANDED_CTV_ID.to_string(),
            ModelStructure::target(EXPANDED_CTV_ID),
        );
        Ok(matches)
    }

    async fn calculate_dvh_estimates(
        &self,
        plan: &PlanRef,
        _matches: &StructureMatches,
    ) -> Result<(), EngineError> {
        let mut inner = self.inner.lock().unwrap();
        inner.record("calculate_dvh_estimates");
        inner.check_failure("calculate_dvh_estimates")?;
        let sim_plan = inner.plan_mut(plan)?;
        if sim_plan.beams.is_empty() {
            return Err(EngineError::operation(
                "calculate_dvh_estimates",
                "beam geometry has not been generated",
            ));
        }
        sim_plan.dvh_estimated = true;
        Ok(())
    }

    async fn add_normal_tissue_objective(&self, plan: &PlanRef) -> Result<(), EngineError> {
        let mut inner = self.inner.lock().unwrap();
        inner.record("add_normal_tissue_objective");
        inner.check_failure("add_normal_tissue_objective")?;
        inner.plan_mut(plan)?.nto_added = true;
        Ok(())
    }

    async fn optimize(&self, plan: &PlanRef) -> Result<(), EngineError> {
        let mut inner = self.inner.lock().unwrap();
        inner.record("optimize");
        inner.check_failure("optimize")?;
        inner.plan_mut(plan)?.optimized = true;
        Ok(())
    }

    async fn run_mco(
        &self,
        _patient_id: &str,
        course_id: &str,
        plan_id: &str,
    ) -> Result<(), EngineError> {
        let mut inner = self.inner.lock().unwrap();
        inner.record("run_mco");
        inner.check_failure("run_mco")?;
        let plan = PlanRef::new(course_id, plan_id);
        let sim_plan = inner.plan_mut(&plan)?;
        if !sim_plan.optimized {
            return Err(EngineError::operation(
                "run_mco",
                "plan has not been optimized",
            ));
        }
        sim_plan.mco_done = true;
        Ok(())
    }

    async fn calculate_dose(&self, plan: &PlanRef) -> Result<(), EngineError> {
        let mut inner = self.inner.lock().unwrap();
        inner.record("calculate_dose");
        inner.check_failure("calculate_dose")?;
        let sim_plan = inner.plan_mut(plan)?;
        if !sim_plan.optimized {
            return Err(EngineError::operation(
                "calculate_dose",
                "plan has not been optimized",
            ));
        }
        sim_plan.dose_calculated = true;
        Ok(())
    }

    async fn normalize(
        &self,
        plan: &PlanRef,
        _matches: &StructureMatches,
    ) -> Result<(), EngineError> {
        let mut inner = self.inner.lock().unwrap();
        inner.record("normalize");
        inner.check_failure("normalize")?;
        let sim_plan = inner.plan_mut(plan)?;
        if !sim_plan.dose_calculated {
            return Err(EngineError::operation(
                "normalize",
                "dose has not been calculated",
            ));
        }
        sim_plan.normalized = true;
        Ok(())
    }

    async fn beams(&self, plan: &PlanRef) -> Result<Vec<Beam>, EngineError> {
        let mut inner = self.inner.lock().unwrap();
        inner.record("beams");
        inner.check_failure("beams")?;
        Ok(inner.plan_mut(plan)?.beams.clone())
    }

    async fn create_verification_plan(
        &self,
        course_id: &str,
        beam_ids: &[String],
        source_plan: &PlanRef,
        verification_set_id: &str,
        label: &str,
        calculate_dose: bool,
    ) -> Result<PlanRef, EngineError> {
        let mut inner = self.inner.lock().unwrap();
        inner.record(format!(
            "create_verification_plan:{label}:dose={calculate_dose}"
        ));
        inner.check_failure("create_verification_plan")?;
        inner.require_modifications()?;

        // The source plan must exist and actually own the beams.
        let source = inner.plan_mut(source_plan)?;
        for beam_id in beam_ids {
            if !source.beams.iter().any(|b| &b.id == beam_id) {
                return Err(EngineError::operation(
                    "create_verification_plan",
                    format!("beam {beam_id} not found on plan {source_plan}"),
                ));
            }
        }

        let patient = inner.open_patient_mut()?;
        if !patient
            .structure_sets
            .iter()
            .any(|s| s.id == verification_set_id)
        {
            return Err(EngineError::StructureSetNotFound(
                verification_set_id.to_string(),
            ));
        }

        let plans = inner.courses.entry(course_id.to_string()).or_default();
        if plans.contains_key(label) {
            return Err(EngineError::DuplicatePlan {
                course_id: course_id.to_string(),
                plan_id: label.to_string(),
            });
        }
        plans.insert(
            label.to_string(),
            SimPlan {
                structure_set_id: verification_set_id.to_string(),
                beams: beam_ids.iter().map(Beam::new).collect(),
                dose_calculated: calculate_dose,
                ..SimPlan::default()
            },
        );

        inner.verification_plans.push(VerificationPlanRecord {
            course_id: course_id.to_string(),
            label: label.to_string(),
            beam_ids: beam_ids.to_vec(),
            source_plan: source_plan.clone(),
            structure_set_id: verification_set_id.to_string(),
            dose_calculated: calculate_dose,
        });

        Ok(PlanRef::new(course_id, label))
    }

    async fn copy_image_from_other_patient(
        &self,
        patient_id: &str,
        _study_id: &str,
        image_id: &str,
    ) -> Result<StructureSet, EngineError> {
        let mut inner = self.inner.lock().unwrap();
        inner.record("copy_image_from_other_patient");
        inner.check_failure("copy_image_from_other_patient")?;
        inner.require_modifications()?;

        let set = inner
            .patients
            .get(patient_id)
            .ok_or_else(|| EngineError::ImportFailed {
                patient_id: patient_id.to_string(),
                reason: "reference patient not found".to_string(),
            })?
            .structure_sets
            .iter()
            .find(|s| s.id == image_id)
            .cloned()
            .ok_or_else(|| EngineError::ImportFailed {
                patient_id: patient_id.to_string(),
                reason: format!("image {image_id} not found"),
            })?;

        inner.open_patient_mut()?.structure_sets.push(set.clone());
        inner.imports += 1;
        Ok(set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autoplan_engine::models::Structure;

    fn engine_with_patient() -> SimEngine {
        SimEngine::new().with_patient(SimPatient::new("RapidPlan-01").with_structure_set(
            StructureSet::new(
                "Prost30Oct2012",
                vec![
                    Structure::new("CTV", StructureKind::Target),
                    Structure::new("Rectum", StructureKind::OrganAtRisk),
                ],
            ),
        ))
    }

    #[tokio::test]
    async fn open_unknown_patient_fails() {
        let engine = SimEngine::new();
        let err = engine.open_patient("nobody").await.unwrap_err();
        assert!(matches!(err, EngineError::PatientNotFound(_)));
    }

    #[tokio::test]
    async fn save_requires_modifications() {
        let engine = engine_with_patient();
        engine.open_patient("RapidPlan-01").await.unwrap();
        let err = engine.save_modifications().await.unwrap_err();
        assert!(matches!(err, EngineError::ModificationsNotEnabled));
    }

    #[tokio::test]
    async fn duplicate_plan_is_rejected() {
        let engine = engine_with_patient();
        engine.open_patient("RapidPlan-01").await.unwrap();
        engine.begin_modifications().await.unwrap();
        engine
            .add_plan("Demo", "Prost30Oct2012", "Demo plan")
            .await
            .unwrap();
        let err = engine
            .add_plan("Demo", "Prost30Oct2012", "Demo plan")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::DuplicatePlan { .. }));
    }

    #[tokio::test]
    async fn dvh_estimates_require_geometry() {
        let engine = engine_with_patient();
        engine.open_patient("RapidPlan-01").await.unwrap();
        engine.begin_modifications().await.unwrap();
        let plan = engine
            .add_plan("Demo", "Prost30Oct2012", "Demo plan")
            .await
            .unwrap();
        let err = engine
            .calculate_dvh_estimates(&plan, &StructureMatches::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("beam geometry"));
    }

    #[tokio::test]
    async fn injected_failure_surfaces() {
        let engine = engine_with_patient().with_failure("optimize");
        engine.open_patient("RapidPlan-01").await.unwrap();
        engine.begin_modifications().await.unwrap();
        let plan = engine
            .add_plan("Demo", "Prost30Oct2012", "Demo plan")
            .await
            .unwrap();
        let err = engine.optimize(&plan).await.unwrap_err();
        assert!(err.to_string().contains("injected failure"));
    }
}
