//! Scripted operator dialogs and a recording reporter.
//!
//! These stand in for the modal UI and the report renderer so the
//! workflow's control flow can be exercised end-to-end in tests.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;

use autoplan_core::interaction::InteractionPort;
use autoplan_core::prescription::{PrescriptionDraft, PrescriptionRequest};
use autoplan_core::report::Reporter;

use autoplan_engine::models::{PlanRef, StructureMatches};

use crate::engine::SimEngine;

// ---------------------------------------------------------------------------
// ScriptedInteraction
// ---------------------------------------------------------------------------

/// An [`InteractionPort`] that returns canned operator answers and
/// records every dialog it was asked to show.
pub struct ScriptedInteraction {
    draft: PrescriptionDraft,
    confirm_answers: Mutex<VecDeque<bool>>,
    gate_openings: Mutex<usize>,
    infos: Mutex<Vec<String>>,
    errors: Mutex<Vec<(String, String)>>,
    confirm_prompts: Mutex<Vec<String>>,
}

impl ScriptedInteraction {
    /// Script the prescription gate to return `draft`.
    pub fn new(draft: PrescriptionDraft) -> Self {
        Self {
            draft,
            confirm_answers: Mutex::new(VecDeque::new()),
            gate_openings: Mutex::new(0),
            infos: Mutex::new(Vec::new()),
            errors: Mutex::new(Vec::new()),
            confirm_prompts: Mutex::new(Vec::new()),
        }
    }

    /// Queue an answer for the next yes/no confirmation. Unanswered
    /// confirmations default to "no".
    pub fn with_confirm(self, answer: bool) -> Self {
        self.confirm_answers.lock().unwrap().push_back(answer);
        self
    }

    /// How many times the prescription gate was opened.
    pub fn gate_openings(&self) -> usize {
        *self.gate_openings.lock().unwrap()
    }

    /// Info messages shown so far, in order.
    pub fn infos(&self) -> Vec<String> {
        self.infos.lock().unwrap().clone()
    }

    /// Error dialogs shown so far, as (title, message) pairs.
    pub fn errors(&self) -> Vec<(String, String)> {
        self.errors.lock().unwrap().clone()
    }

    /// Titles of the yes/no confirmations asked so far.
    pub fn confirm_prompts(&self) -> Vec<String> {
        self.confirm_prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl InteractionPort for ScriptedInteraction {
    async fn collect_prescription(
        &self,
        _request: &PrescriptionRequest,
    ) -> Result<PrescriptionDraft> {
        *self.gate_openings.lock().unwrap() += 1;
        Ok(self.draft.clone())
    }

    async fn show_info(&self, message: &str) -> Result<()> {
        self.infos.lock().unwrap().push(message.to_string());
        Ok(())
    }

    async fn show_error(&self, title: &str, message: &str) -> Result<()> {
        self.errors
            .lock()
            .unwrap()
            .push((title.to_string(), message.to_string()));
        Ok(())
    }

    async fn confirm(&self, title: &str, _message: &str) -> Result<bool> {
        self.confirm_prompts.lock().unwrap().push(title.to_string());
        Ok(self
            .confirm_answers
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(false))
    }
}

// ---------------------------------------------------------------------------
// RecordingReporter
// ---------------------------------------------------------------------------

/// A [`Reporter`] that writes nothing and records what it was asked to
/// render.
///
/// When built with [`RecordingReporter::watching`], it snapshots the
/// engine's save count at the moment the quality report is generated,
/// so tests can assert that every checkpoint was persisted before any
/// report came out.
#[derive(Default)]
pub struct RecordingReporter {
    engine: Option<Arc<SimEngine>>,
    charts: Mutex<Vec<(PathBuf, Vec<String>)>>,
    reports: Mutex<Vec<PathBuf>>,
    opened: Mutex<Vec<PathBuf>>,
    saves_at_report: Mutex<Option<usize>>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the engine's save count when the report is generated.
    pub fn watching(engine: Arc<SimEngine>) -> Self {
        Self {
            engine: Some(engine),
            ..Self::default()
        }
    }

    /// DVH charts rendered so far, as (path, structure ids).
    pub fn charts(&self) -> Vec<(PathBuf, Vec<String>)> {
        self.charts.lock().unwrap().clone()
    }

    /// Quality reports generated so far.
    pub fn reports(&self) -> Vec<PathBuf> {
        self.reports.lock().unwrap().clone()
    }

    /// Reports opened in the viewer so far.
    pub fn opened(&self) -> Vec<PathBuf> {
        self.opened.lock().unwrap().clone()
    }

    /// Engine save count when the first quality report was generated.
    pub fn saves_at_report(&self) -> Option<usize> {
        *self.saves_at_report.lock().unwrap()
    }
}

#[async_trait]
impl Reporter for RecordingReporter {
    async fn render_dvh_chart(
        &self,
        output: &Path,
        _plan: &PlanRef,
        structure_ids: &[String],
        _width: u32,
        _height: u32,
    ) -> Result<()> {
        self.charts
            .lock()
            .unwrap()
            .push((output.to_path_buf(), structure_ids.to_vec()));
        Ok(())
    }

    async fn generate_quality_report(
        &self,
        _plan: &PlanRef,
        _matches: &StructureMatches,
        out_dir: &Path,
    ) -> Result<PathBuf> {
        if let Some(engine) = &self.engine {
            let mut snapshot = self.saves_at_report.lock().unwrap();
            if snapshot.is_none() {
                *snapshot = Some(engine.save_count());
            }
        }
        let path = out_dir.join("plan_quality.html");
        self.reports.lock().unwrap().push(path.clone());
        Ok(path)
    }

    async fn open_report(&self, path: &Path) -> Result<()> {
        self.opened.lock().unwrap().push(path.to_path_buf());
        Ok(())
    }
}
