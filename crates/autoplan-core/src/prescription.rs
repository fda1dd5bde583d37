//! Prescription value object and the draft collected from the
//! prescription gate.
//!
//! The gate returns a [`PrescriptionDraft`] whose fields are all
//! optional; any absent or out-of-range field invalidates the whole
//! draft and the run aborts without planning side effects.

use serde::{Deserialize, Serialize};

use autoplan_engine::models::{GeometryParams, Structure};

/// A fully validated prescription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prescription {
    /// Dose per fraction in Gy. Positive.
    pub dose_per_fraction: f64,
    /// Number of fractions. Positive.
    pub fractions: u32,
    /// CTV-to-PTV margin in millimeters. Non-negative.
    pub ptv_margin_mm: f64,
    /// Id of the selected target structure. Non-empty.
    pub target_id: String,
}

impl Prescription {
    /// Total prescribed dose in Gy.
    pub fn total_dose(&self) -> f64 {
        self.dose_per_fraction * f64::from(self.fractions)
    }

    /// Parameters for beam geometry generation.
    pub fn geometry_params(&self) -> GeometryParams {
        GeometryParams {
            dose_per_fraction: self.dose_per_fraction,
            fractions: self.fractions,
            ptv_margin_mm: self.ptv_margin_mm,
            target_id: self.target_id.clone(),
        }
    }
}

/// Raw operator input from the prescription gate.
///
/// Every field may be absent: the operator can cancel the dialog or
/// leave a field invalid, and the gate reports exactly what it got.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PrescriptionDraft {
    pub dose_per_fraction: Option<f64>,
    pub fractions: Option<u32>,
    pub ptv_margin_mm: Option<f64>,
    pub target_id: Option<String>,
}

impl PrescriptionDraft {
    /// Validate the draft into a [`Prescription`].
    ///
    /// Returns `None` if any field is absent, the dose or fraction
    /// count is not positive, the margin is negative or non-finite,
    /// or the target id is empty.
    pub fn validate(&self) -> Option<Prescription> {
        let dose_per_fraction = self.dose_per_fraction?;
        let fractions = self.fractions?;
        let ptv_margin_mm = self.ptv_margin_mm?;
        let target_id = self.target_id.clone()?;

        if !(dose_per_fraction.is_finite() && dose_per_fraction > 0.0) {
            return None;
        }
        if fractions == 0 {
            return None;
        }
        if !(ptv_margin_mm.is_finite() && ptv_margin_mm >= 0.0) {
            return None;
        }
        if target_id.is_empty() {
            return None;
        }

        Some(Prescription {
            dose_per_fraction,
            fractions,
            ptv_margin_mm,
            target_id,
        })
    }
}

/// Default clinical values the gate presents to the operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrescriptionDefaults {
    pub dose_per_fraction: f64,
    pub fractions: u32,
    pub ptv_margin_mm: f64,
}

impl Default for PrescriptionDefaults {
    fn default() -> Self {
        Self {
            dose_per_fraction: 1.8,
            fractions: 44,
            ptv_margin_mm: 5.0,
        }
    }
}

/// Everything the prescription gate needs to present to the operator.
#[derive(Debug, Clone)]
pub struct PrescriptionRequest {
    pub patient_id: String,
    pub defaults: PrescriptionDefaults,
    /// Candidate target structures, in structure-set order.
    pub candidates: Vec<Structure>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_draft() -> PrescriptionDraft {
        PrescriptionDraft {
            dose_per_fraction: Some(1.8),
            fractions: Some(44),
            ptv_margin_mm: Some(5.0),
            target_id: Some("CTV".to_string()),
        }
    }

    #[test]
    fn full_draft_validates() {
        let rx = full_draft().validate().expect("draft should validate");
        assert_eq!(rx.dose_per_fraction, 1.8);
        assert_eq!(rx.fractions, 44);
        assert_eq!(rx.ptv_margin_mm, 5.0);
        assert_eq!(rx.target_id, "CTV");
    }

    #[test]
    fn any_missing_field_invalidates() {
        let mut d = full_draft();
        d.dose_per_fraction = None;
        assert!(d.validate().is_none());

        let mut d = full_draft();
        d.fractions = None;
        assert!(d.validate().is_none());

        let mut d = full_draft();
        d.ptv_margin_mm = None;
        assert!(d.validate().is_none());

        let mut d = full_draft();
        d.target_id = None;
        assert!(d.validate().is_none());
    }

    #[test]
    fn out_of_range_fields_invalidate() {
        let mut d = full_draft();
        d.dose_per_fraction = Some(0.0);
        assert!(d.validate().is_none());

        let mut d = full_draft();
        d.dose_per_fraction = Some(f64::NAN);
        assert!(d.validate().is_none());

        let mut d = full_draft();
        d.fractions = Some(0);
        assert!(d.validate().is_none());

        let mut d = full_draft();
        d.ptv_margin_mm = Some(-1.0);
        assert!(d.validate().is_none());

        let mut d = full_draft();
        d.target_id = Some(String::new());
        assert!(d.validate().is_none());
    }

    #[test]
    fn zero_margin_is_valid() {
        let mut d = full_draft();
        d.ptv_margin_mm = Some(0.0);
        assert!(d.validate().is_some());
    }

    #[test]
    fn total_dose_is_dose_times_fractions() {
        let rx = full_draft().validate().unwrap();
        assert!((rx.total_dose() - 79.2).abs() < 1e-9);
    }

    #[test]
    fn defaults_match_protocol() {
        let defaults = PrescriptionDefaults::default();
        assert_eq!(defaults.dose_per_fraction, 1.8);
        assert_eq!(defaults.fractions, 44);
        assert_eq!(defaults.ptv_margin_mm, 5.0);
    }
}
