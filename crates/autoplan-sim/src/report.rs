//! File-writing reporter for simulate mode.
//!
//! Writes a sketch DVH chart as SVG, a quality report as HTML with a
//! machine-readable JSON summary next to it, and optionally hands the
//! report to an external viewer command. Real chart rendering belongs
//! to the clinical reporting collaborator; this exists so simulate
//! runs produce inspectable artifacts.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result};
use async_trait::async_trait;

use autoplan_core::report::Reporter;
use autoplan_engine::models::{PlanRef, StructureMatches};

/// Reporter that writes SVG/HTML/JSON artifacts to disk.
pub struct SvgReporter {
    /// Viewer command the report path is passed to, e.g. `xdg-open`.
    /// `None` leaves opening to the operator.
    viewer: Option<String>,
}

impl SvgReporter {
    pub fn new(viewer: Option<String>) -> Self {
        Self { viewer }
    }

    fn render_svg(structure_ids: &[String], width: u32, height: u32) -> String {
        let mut svg = String::new();
        let _ = writeln!(
            svg,
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="{width}" height="{height}" viewBox="0 0 {width} {height}">"#
        );
        let _ = writeln!(
            svg,
            r#"  <rect width="{width}" height="{height}" fill="white"/>"#
        );
        // Axes.
        let _ = writeln!(
            svg,
            r#"  <line x1="40" y1="{0}" x2="{1}" y2="{0}" stroke="black"/>"#,
            height - 30,
            width - 10
        );
        let _ = writeln!(
            svg,
            r#"  <line x1="40" y1="10" x2="40" y2="{}" stroke="black"/>"#,
            height - 30
        );

        // One sketched falloff curve per structure. Steeper and later
        // falloff for earlier (target-like) entries.
        let plot_w = f64::from(width - 50);
        let plot_h = f64::from(height - 40);
        for (index, id) in structure_ids.iter().enumerate() {
            let midpoint = 0.85 - 0.12 * index as f64;
            let mut points = String::new();
            for step in 0..=100 {
                let x = f64::from(step) / 100.0;
                let volume = 1.0 / (1.0 + ((x - midpoint) / 0.04).exp());
                let px = 40.0 + x * plot_w;
                let py = 10.0 + (1.0 - volume) * plot_h;
                let _ = write!(points, "{px:.1},{py:.1} ");
            }
            let hue = (index * 67) % 360;
            let _ = writeln!(
                svg,
                r#"  <polyline points="{}" fill="none" stroke="hsl({hue},70%,40%)"/>"#,
                points.trim_end()
            );
            let _ = writeln!(
                svg,
                r#"  <text x="{}" y="{}" font-size="11" fill="hsl({hue},70%,40%)">{id}</text>"#,
                width - 120,
                20 + 14 * index as u32
            );
        }
        svg.push_str("</svg>\n");
        svg
    }

    fn render_html(plan: &PlanRef, matches: &StructureMatches) -> String {
        let mut html = String::new();
        html.push_str("<!DOCTYPE html>\n<html>\n<head>\n");
        let _ = writeln!(html, "<title>Plan quality report - {plan}</title>");
        html.push_str("</head>\n<body>\n");
        let _ = writeln!(html, "<h1>Plan quality report</h1>");
        let _ = writeln!(
            html,
            "<p>Course: {} &mdash; Plan: {}</p>",
            plan.course_id, plan.plan_id
        );
        html.push_str("<img src=\"dvh_mco.svg\" alt=\"DVH\"/>\n");
        html.push_str("<table border=\"1\">\n");
        html.push_str("<tr><th>Structure</th><th>Model structure</th><th>Kind</th></tr>\n");
        for (structure_id, model) in matches {
            let _ = writeln!(
                html,
                "<tr><td>{structure_id}</td><td>{}</td><td>{}</td></tr>",
                model.label, model.kind
            );
        }
        html.push_str("</table>\n</body>\n</html>\n");
        html
    }
}

#[async_trait]
impl Reporter for SvgReporter {
    async fn render_dvh_chart(
        &self,
        output: &Path,
        plan: &PlanRef,
        structure_ids: &[String],
        width: u32,
        height: u32,
    ) -> Result<()> {
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let svg = Self::render_svg(structure_ids, width, height);
        tokio::fs::write(output, svg)
            .await
            .with_context(|| format!("failed to write DVH chart to {}", output.display()))?;
        tracing::info!(
            plan = %plan,
            chart = %output.display(),
            structures = structure_ids.len(),
            "DVH chart written"
        );
        Ok(())
    }

    async fn generate_quality_report(
        &self,
        plan: &PlanRef,
        matches: &StructureMatches,
        out_dir: &Path,
    ) -> Result<PathBuf> {
        tokio::fs::create_dir_all(out_dir)
            .await
            .with_context(|| format!("failed to create {}", out_dir.display()))?;

        let html_path = out_dir.join("plan_quality.html");
        tokio::fs::write(&html_path, Self::render_html(plan, matches))
            .await
            .with_context(|| format!("failed to write {}", html_path.display()))?;

        let summary = serde_json::json!({
            "course_id": plan.course_id,
            "plan_id": plan.plan_id,
            "structure_matches": matches,
        });
        let json_path = out_dir.join("plan_quality.json");
        tokio::fs::write(&json_path, serde_json::to_vec_pretty(&summary)?)
            .await
            .with_context(|| format!("failed to write {}", json_path.display()))?;

        Ok(html_path)
    }

    async fn open_report(&self, path: &Path) -> Result<()> {
        match &self.viewer {
            Some(viewer) => {
                // Spawn and forget; a missing viewer should not kill a
                // run that already produced the report.
                if let Err(e) = Command::new(viewer).arg(path).spawn() {
                    tracing::warn!(
                        viewer = %viewer,
                        error = %e,
                        "failed to launch report viewer"
                    );
                }
            }
            None => {
                tracing::info!(report = %path.display(), "report ready (no viewer configured)");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autoplan_engine::models::ModelStructure;

    #[tokio::test]
    async fn writes_chart_report_and_summary() {
        let tmp = tempfile::TempDir::new().unwrap();
        let reporter = SvgReporter::new(None);
        let plan = PlanRef::new("Demo", "Demo plan");

        let chart = tmp.path().join("dvh_mco.svg");
        reporter
            .render_dvh_chart(&chart, &plan, &["CTV".to_string()], 512, 256)
            .await
            .unwrap();
        let svg = std::fs::read_to_string(&chart).unwrap();
        assert!(svg.starts_with("<svg"));
        assert!(svg.contains("CTV"));

        let mut matches = StructureMatches::new();
        matches.insert("CTV".to_string(), ModelStructure::target("CTV"));
        let report = reporter
            .generate_quality_report(&plan, &matches, tmp.path())
            .await
            .unwrap();
        assert!(report.ends_with("plan_quality.html"));
        let html = std::fs::read_to_string(&report).unwrap();
        assert!(html.contains("Demo plan"));

        let json = std::fs::read_to_string(tmp.path().join("plan_quality.json")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["plan_id"], "Demo plan");
    }
}
