//! Configuration file management for autoplan.
//!
//! Provides a TOML-based config file at `~/.config/autoplan/config.toml`
//! and a resolution chain: CLI flag > env var > config file > default.
//! All clinical identifiers (patient, courses, plan, QA identities) and
//! defaults live here, not in the workflow.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use autoplan_core::prescription::PrescriptionDefaults;
use autoplan_core::structures::StructurePrerequisites;
use autoplan_core::verification::QaIdentity;
use autoplan_core::workflow::RunConfig;
use autoplan_engine::models::{Structure, StructureKind};

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub patient: PatientSection,
    pub courses: CourseSection,
    pub qa: QaSection,
    pub prescription: PrescriptionDefaults,
    pub report: ReportSection,
    pub simulation: SimulationSection,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PatientSection {
    pub id: String,
    /// Id of the base structure set the plan is built on.
    pub structure_set: String,
    /// Structure ids that must already be contoured.
    pub required_structures: Vec<String>,
    /// Contours of the simulated patient record (simulate mode only).
    pub structures: Vec<Structure>,
}

impl Default for PatientSection {
    fn default() -> Self {
        Self {
            id: "RapidPlan-01".to_string(),
            structure_set: "Prost30Oct2012".to_string(),
            required_structures: vec!["CTV".to_string(), "Rectum".to_string()],
            structures: vec![
                Structure::new("CTV", StructureKind::Target),
                Structure::new("Rectum", StructureKind::OrganAtRisk),
                Structure::new("Bladder", StructureKind::OrganAtRisk),
            ],
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CourseSection {
    pub planning: String,
    pub verification: String,
    pub plan_id: String,
}

impl Default for CourseSection {
    fn default() -> Self {
        Self {
            planning: "Demo".to_string(),
            verification: "QA".to_string(),
            plan_id: "Demo plan".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct QaSection {
    pub patient_id: String,
    pub study_id: String,
    pub image_id: String,
}

impl Default for QaSection {
    fn default() -> Self {
        Self {
            patient_id: "PH".to_string(),
            study_id: "7542".to_string(),
            image_id: "Queasy(v2)155".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportSection {
    pub output_dir: PathBuf,
    pub dvh_width: u32,
    pub dvh_height: u32,
    /// Viewer command the report is opened with, e.g. `xdg-open`.
    pub viewer: Option<String>,
    /// Wait between opening the report and the verification prompt.
    pub post_report_delay_ms: u64,
}

impl Default for ReportSection {
    fn default() -> Self {
        Self {
            output_dir: std::env::temp_dir().join("autoplan"),
            dvh_width: 512,
            dvh_height: 256,
            viewer: None,
            post_report_delay_ms: 1000,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationSection {
    /// Beams the simulated engine generates per plan.
    pub beams_per_plan: usize,
}

impl Default for SimulationSection {
    fn default() -> Self {
        Self { beams_per_plan: 3 }
    }
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the autoplan config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/autoplan` or
/// `~/.config/autoplan`, ignoring the platform-specific config dir.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("autoplan");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("autoplan")
}

/// Return the path to the autoplan config file.
pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

// -----------------------------------------------------------------------
// Read / write
// -----------------------------------------------------------------------

/// Load and parse a config file. Returns an error if it does not exist.
pub fn load_config(path: &Path) -> Result<ConfigFile> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    let config: ConfigFile = toml::from_str(&contents).context("failed to parse config file")?;
    Ok(config)
}

/// Serialize and write the config file, creating parent dirs as needed.
pub fn save_config(config: &ConfigFile, path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create config directory {}", dir.display()))?;
    }
    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(path, &contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;
    Ok(())
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

/// Seed data for the simulated engine backend.
#[derive(Debug, Clone)]
pub struct SimSeed {
    pub structure_set_id: String,
    pub structures: Vec<Structure>,
    pub beams_per_plan: usize,
}

/// Fully resolved configuration, ready for use.
#[derive(Debug)]
pub struct AutoplanConfig {
    pub run: RunConfig,
    pub viewer: Option<String>,
    pub sim: SimSeed,
}

impl AutoplanConfig {
    /// Resolve configuration using the chain:
    /// CLI flag > env var > config file > default.
    ///
    /// - Config path: `cli_config` > `AUTOPLAN_CONFIG` env > XDG path.
    ///   A missing file falls back to built-in defaults.
    /// - Patient id: `cli_patient_id` > `AUTOPLAN_PATIENT_ID` env >
    ///   `config.patient.id`.
    pub fn resolve(cli_patient_id: Option<&str>, cli_config: Option<&Path>) -> Result<Self> {
        let path = if let Some(p) = cli_config {
            p.to_path_buf()
        } else if let Ok(p) = std::env::var("AUTOPLAN_CONFIG") {
            PathBuf::from(p)
        } else {
            config_path()
        };

        let file = if path.exists() {
            load_config(&path)?
        } else {
            ConfigFile::default()
        };

        let patient_id = if let Some(id) = cli_patient_id {
            id.to_string()
        } else if let Ok(id) = std::env::var("AUTOPLAN_PATIENT_ID") {
            id
        } else {
            file.patient.id.clone()
        };

        let run = RunConfig {
            patient_id,
            course_id: file.courses.planning.clone(),
            verification_course_id: file.courses.verification.clone(),
            plan_id: file.courses.plan_id.clone(),
            prerequisites: StructurePrerequisites {
                structure_set_id: file.patient.structure_set.clone(),
                required_structures: file.patient.required_structures.clone(),
            },
            qa: QaIdentity {
                patient_id: file.qa.patient_id.clone(),
                study_id: file.qa.study_id.clone(),
                image_id: file.qa.image_id.clone(),
            },
            defaults: file.prescription.clone(),
            report_dir: file.report.output_dir.clone(),
            dvh_width: file.report.dvh_width,
            dvh_height: file.report.dvh_height,
            post_report_delay: Duration::from_millis(file.report.post_report_delay_ms),
        };

        Ok(Self {
            run,
            viewer: file.report.viewer.clone(),
            sim: SimSeed {
                structure_set_id: file.patient.structure_set,
                structures: file.patient.structures,
                beams_per_plan: file.simulation.beams_per_plan,
            },
        })
    }
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn lock_env() -> std::sync::MutexGuard<'static, ()> {
        crate::test_util::lock_env()
    }

    #[test]
    fn default_config_roundtrips_through_toml() {
        let original = ConfigFile::default();
        let contents = toml::to_string_pretty(&original).unwrap();
        let loaded: ConfigFile = toml::from_str(&contents).unwrap();

        assert_eq!(loaded.patient.id, original.patient.id);
        assert_eq!(loaded.courses.plan_id, original.courses.plan_id);
        assert_eq!(loaded.qa.image_id, original.qa.image_id);
        assert_eq!(
            loaded.prescription.dose_per_fraction,
            original.prescription.dose_per_fraction
        );
        assert_eq!(loaded.simulation.beams_per_plan, 3);
    }

    #[test]
    fn save_and_load_config_roundtrip() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("autoplan").join("config.toml");

        let mut original = ConfigFile::default();
        original.patient.id = "Test-02".to_string();
        original.report.viewer = Some("firefox".to_string());
        save_config(&original, &path).unwrap();

        let loaded = load_config(&path).unwrap();
        assert_eq!(loaded.patient.id, "Test-02");
        assert_eq!(loaded.report.viewer.as_deref(), Some("firefox"));
    }

    #[test]
    fn partial_config_file_fills_in_defaults() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "[patient]\nid = \"Other-01\"\n").unwrap();

        let loaded = load_config(&path).unwrap();
        assert_eq!(loaded.patient.id, "Other-01");
        // Everything else defaults.
        assert_eq!(loaded.courses.planning, "Demo");
        assert_eq!(loaded.prescription.fractions, 44);
    }

    #[test]
    fn resolve_with_cli_flag_overrides_env() {
        let _lock = lock_env();

        unsafe { std::env::set_var("AUTOPLAN_PATIENT_ID", "Env-01") };
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("missing.toml");

        let config = AutoplanConfig::resolve(Some("Cli-01"), Some(&path)).unwrap();
        assert_eq!(config.run.patient_id, "Cli-01");

        unsafe { std::env::remove_var("AUTOPLAN_PATIENT_ID") };
    }

    #[test]
    fn resolve_with_env_var_overrides_config_file() {
        let _lock = lock_env();

        unsafe { std::env::set_var("AUTOPLAN_PATIENT_ID", "Env-01") };
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        save_config(&ConfigFile::default(), &path).unwrap();

        let config = AutoplanConfig::resolve(None, Some(&path)).unwrap();
        assert_eq!(config.run.patient_id, "Env-01");

        unsafe { std::env::remove_var("AUTOPLAN_PATIENT_ID") };
    }

    #[test]
    fn resolve_defaults_when_nothing_set() {
        let _lock = lock_env();

        unsafe { std::env::remove_var("AUTOPLAN_PATIENT_ID") };
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("missing.toml");

        let config = AutoplanConfig::resolve(None, Some(&path)).unwrap();
        assert_eq!(config.run.patient_id, "RapidPlan-01");
        assert_eq!(config.run.plan_id, "Demo plan");
        assert_eq!(config.run.post_report_delay.as_millis(), 1000);
        assert_eq!(config.sim.beams_per_plan, 3);
    }

    #[test]
    fn config_path_ends_with_expected_filename() {
        let path = config_path();
        assert!(
            path.ends_with("autoplan/config.toml"),
            "unexpected config path: {}",
            path.display()
        );
    }
}
