//! Operator interaction port.
//!
//! The workflow blocks on modal operator dialogs at a few points: the
//! prescription gate, progress messages, and the verification
//! confirmation. They are modeled as one capability trait so the
//! control flow can be tested with a scripted implementation instead
//! of a UI toolkit. Calls block (are awaited) with no timeout; the
//! operator may leave a dialog open indefinitely.

use anyhow::Result;
use async_trait::async_trait;

use crate::prescription::{PrescriptionDraft, PrescriptionRequest};

/// Blocking operator dialogs.
#[async_trait]
pub trait InteractionPort: Send + Sync {
    /// Present the prescription gate and block until the operator
    /// closes it. Pure input collection: no planning side effects.
    async fn collect_prescription(
        &self,
        request: &PrescriptionRequest,
    ) -> Result<PrescriptionDraft>;

    /// Show an informational message and block until acknowledged.
    async fn show_info(&self, message: &str) -> Result<()>;

    /// Show an error message with a title and block until acknowledged.
    async fn show_error(&self, title: &str, message: &str) -> Result<()>;

    /// Ask a yes/no question and block until answered.
    async fn confirm(&self, title: &str, message: &str) -> Result<bool>;
}
