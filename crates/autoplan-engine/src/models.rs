//! Domain value types exchanged with the planning engine.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Clinical kind of an anatomical structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StructureKind {
    Target,
    OrganAtRisk,
    Other,
}

impl fmt::Display for StructureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Target => "target",
            Self::OrganAtRisk => "organ_at_risk",
            Self::Other => "other",
        };
        f.write_str(s)
    }
}

impl FromStr for StructureKind {
    type Err = StructureKindParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "target" => Ok(Self::Target),
            "organ_at_risk" => Ok(Self::OrganAtRisk),
            "other" => Ok(Self::Other),
            other => Err(StructureKindParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`StructureKind`] string.
#[derive(Debug, Clone)]
pub struct StructureKindParseError(pub String);

impl fmt::Display for StructureKindParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid structure kind: {:?}", self.0)
    }
}

impl std::error::Error for StructureKindParseError {}

// ---------------------------------------------------------------------------
// Structures
// ---------------------------------------------------------------------------

/// A single contoured anatomical structure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Structure {
    /// Structure id, unique within its structure set.
    pub id: String,
    pub kind: StructureKind,
}

impl Structure {
    pub fn new(id: impl Into<String>, kind: StructureKind) -> Self {
        Self {
            id: id.into(),
            kind,
        }
    }
}

/// A snapshot of a patient's contoured structure set.
///
/// The pipeline never mutates a structure set directly; derived
/// structures are added and removed through engine operations only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructureSet {
    /// Stable id of the structure set (for QA sets, the image id).
    pub id: String,
    pub structures: Vec<Structure>,
}

impl StructureSet {
    pub fn new(id: impl Into<String>, structures: Vec<Structure>) -> Self {
        Self {
            id: id.into(),
            structures,
        }
    }

    /// Whether a structure with the given id is present.
    pub fn contains(&self, structure_id: &str) -> bool {
        self.structures.iter().any(|s| s.id == structure_id)
    }

    /// Look up a structure by id.
    pub fn structure(&self, structure_id: &str) -> Option<&Structure> {
        self.structures.iter().find(|s| s.id == structure_id)
    }
}

// ---------------------------------------------------------------------------
// Plans and beams
// ---------------------------------------------------------------------------

/// Identity handle for a plan within a course.
///
/// The engine re-resolves plans by identity after optimization, so
/// downstream operations (MCO in particular) carry ids rather than
/// object references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanRef {
    pub course_id: String,
    pub plan_id: String,
}

impl PlanRef {
    pub fn new(course_id: impl Into<String>, plan_id: impl Into<String>) -> Self {
        Self {
            course_id: course_id.into(),
            plan_id: plan_id.into(),
        }
    }
}

impl fmt::Display for PlanRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.course_id, self.plan_id)
    }
}

/// One radiation delivery unit belonging to a plan.
///
/// Beam identity is fixed once geometry generation produces it; each
/// beam is the fan-out unit for per-beam verification plans.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Beam {
    pub id: String,
}

impl Beam {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

// ---------------------------------------------------------------------------
// Structure matches
// ---------------------------------------------------------------------------

/// Kind of a model structure referenced by the DVH estimation model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelStructureKind {
    Target,
    OrganAtRisk,
}

impl fmt::Display for ModelStructureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Target => "target",
            Self::OrganAtRisk => "organ_at_risk",
        };
        f.write_str(s)
    }
}

/// A model-side structure role that a patient structure is matched to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelStructure {
    /// Model-side label, e.g. `"PTV"` or `"Rectum"`.
    pub label: String,
    pub kind: ModelStructureKind,
}

impl ModelStructure {
    pub fn target(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            kind: ModelStructureKind::Target,
        }
    }

    pub fn organ_at_risk(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            kind: ModelStructureKind::OrganAtRisk,
        }
    }
}

/// Mapping from patient structure id to the matched model structure.
///
/// Derived from the plan after geometry generation, adjusted once by
/// the pipeline, then consumed by DVH estimation and normalization.
pub type StructureMatches = BTreeMap<String, ModelStructure>;

// ---------------------------------------------------------------------------
// Geometry parameters
// ---------------------------------------------------------------------------

/// Prescription-derived parameters for beam geometry generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeometryParams {
    /// Dose per fraction in Gy.
    pub dose_per_fraction: f64,
    pub fractions: u32,
    /// CTV-to-PTV expansion margin in millimeters.
    pub ptv_margin_mm: f64,
    /// Id of the target structure the expansion starts from.
    pub target_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structure_kind_display_roundtrip() {
        for kind in [
            StructureKind::Target,
            StructureKind::OrganAtRisk,
            StructureKind::Other,
        ] {
            let parsed: StructureKind = kind.to_string().parse().unwrap();
            assert_eq!(parsed, kind);
        }
    }

    #[test]
    fn structure_kind_parse_rejects_unknown() {
        let err = "ptv".parse::<StructureKind>().unwrap_err();
        assert!(err.to_string().contains("ptv"));
    }

    #[test]
    fn structure_set_lookup() {
        let set = StructureSet::new(
            "Prost30Oct2012",
            vec![
                Structure::new("CTV", StructureKind::Target),
                Structure::new("Rectum", StructureKind::OrganAtRisk),
            ],
        );
        assert!(set.contains("CTV"));
        assert!(!set.contains("Bladder"));
        assert_eq!(
            set.structure("Rectum").map(|s| s.kind),
            Some(StructureKind::OrganAtRisk)
        );
    }

    #[test]
    fn plan_ref_display_is_course_slash_plan() {
        let plan = PlanRef::new("Demo", "Demo plan");
        assert_eq!(plan.to_string(), "Demo/Demo plan");
    }

    #[test]
    fn model_structure_constructors_set_kind() {
        assert_eq!(
            ModelStructure::target("PTV").kind,
            ModelStructureKind::Target
        );
        assert_eq!(
            ModelStructure::organ_at_risk("Rectum").kind,
            ModelStructureKind::OrganAtRisk
        );
    }

    #[test]
    fn geometry_params_serialize_snake_case() {
        let params = GeometryParams {
            dose_per_fraction: 1.8,
            fractions: 44,
            ptv_margin_mm: 5.0,
            target_id: "CTV".to_string(),
        };
        let json = serde_json::to_value(&params).unwrap();
        assert_eq!(json["dose_per_fraction"], 1.8);
        assert_eq!(json["target_id"], "CTV");
    }
}
