//! Terminal implementation of the operator dialogs.
//!
//! The workflow was written against modal dialogs; on a terminal the
//! same contract maps to blocking prompts on stdin. Reads go through
//! `spawn_blocking` so they do not stall the async runtime.

use std::io::Write;

use anyhow::{Context, Result};
use async_trait::async_trait;

use autoplan_core::interaction::InteractionPort;
use autoplan_core::prescription::{PrescriptionDraft, PrescriptionRequest};

pub struct ConsoleInteraction;

impl ConsoleInteraction {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ConsoleInteraction {
    fn default() -> Self {
        Self::new()
    }
}

/// Read one line from stdin, trimmed. `None` on EOF.
async fn read_line() -> Result<Option<String>> {
    tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        let n = std::io::stdin()
            .read_line(&mut line)
            .context("failed to read from stdin")?;
        if n == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim().to_string()))
    })
    .await
    .context("stdin reader task failed")?
}

fn prompt(text: &str) -> Result<()> {
    print!("{text}");
    std::io::stdout().flush().context("failed to flush stdout")
}

/// Prompt for one field. Empty input takes the default; unparsable
/// input leaves the field unset so validation rejects the draft.
async fn ask_field<T: std::str::FromStr>(label: &str, default: T) -> Result<Option<T>>
where
    T: std::fmt::Display,
{
    prompt(&format!("{label} [{default}]: "))?;
    let Some(line) = read_line().await? else {
        return Ok(None);
    };
    if line.is_empty() {
        return Ok(Some(default));
    }
    Ok(line.parse().ok())
}

#[async_trait]
impl InteractionPort for ConsoleInteraction {
    async fn collect_prescription(
        &self,
        request: &PrescriptionRequest,
    ) -> Result<PrescriptionDraft> {
        println!();
        println!("Prescription for patient {}", request.patient_id);
        println!("Available structures:");
        for structure in &request.candidates {
            println!("  {} ({})", structure.id, structure.kind);
        }
        println!();

        let dose_per_fraction =
            ask_field("Dose per fraction (Gy)", request.defaults.dose_per_fraction).await?;
        let fractions = ask_field("Number of fractions", request.defaults.fractions).await?;
        let ptv_margin_mm = ask_field("PTV margin (mm)", request.defaults.ptv_margin_mm).await?;

        prompt("Target structure id: ")?;
        let target_id = read_line().await?.filter(|s| !s.is_empty());

        Ok(PrescriptionDraft {
            dose_per_fraction,
            fractions,
            ptv_margin_mm,
            target_id,
        })
    }

    async fn show_info(&self, message: &str) -> Result<()> {
        println!();
        println!("{message}");
        prompt("Press Enter to continue...")?;
        read_line().await?;
        Ok(())
    }

    async fn show_error(&self, title: &str, message: &str) -> Result<()> {
        eprintln!();
        eprintln!("{title}: {message}");
        Ok(())
    }

    async fn confirm(&self, title: &str, message: &str) -> Result<bool> {
        println!();
        println!("{title}");
        prompt(&format!("{message} [y/N]: "))?;
        let answer = read_line().await?.unwrap_or_default();
        Ok(matches!(answer.to_lowercase().as_str(), "y" | "yes"))
    }
}
