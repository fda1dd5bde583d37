//! Reporting collaborator port.
//!
//! DVH chart rendering and quality-report generation live outside the
//! workflow; the orchestrator only sequences them and opens the
//! resulting report in the operator's viewer.

use std::path::{Path, PathBuf};

use anyhow::Result;
use async_trait::async_trait;

use autoplan_engine::models::{PlanRef, StructureMatches};

/// Renders reporting artifacts for a completed plan.
#[async_trait]
pub trait Reporter: Send + Sync {
    /// Render a DVH chart for the given structures to `output`.
    async fn render_dvh_chart(
        &self,
        output: &Path,
        plan: &PlanRef,
        structure_ids: &[String],
        width: u32,
        height: u32,
    ) -> Result<()>;

    /// Generate the plan quality report under `out_dir` and return the
    /// path of the generated report document.
    async fn generate_quality_report(
        &self,
        plan: &PlanRef,
        matches: &StructureMatches,
        out_dir: &Path,
    ) -> Result<PathBuf>;

    /// Open a generated report in the operator's default viewer.
    async fn open_report(&self, path: &Path) -> Result<()>;
}
