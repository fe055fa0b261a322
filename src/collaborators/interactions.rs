//! Built-in drug-interaction table.
//!
//! Small curated set of known pairs. Names are normalised before lookup
//! (case, dose suffixes, brand names), and a pair matches in either order.

use async_trait::async_trait;
use regex::Regex;

use super::{DrugInteractionChecker, InteractionSeverity, InteractionWarning};
use crate::error::CollaboratorError;

struct DrugEntry {
    drug: &'static str,
    major: &'static [&'static str],
    moderate: &'static [&'static str],
    effects: &'static [(&'static str, &'static str)],
}

const TABLE: &[DrugEntry] = &[
    DrugEntry {
        drug: "warfarin",
        major: &[
            "aspirin",
            "ibuprofen",
            "naproxen",
            "diclofenac",
            "amiodarone",
            "fluconazole",
            "metronidazole",
        ],
        moderate: &["acetaminophen", "omeprazole", "simvastatin"],
        effects: &[
            ("aspirin", "Increased bleeding risk"),
            ("ibuprofen", "Increased bleeding risk"),
            ("amiodarone", "Increased anticoagulation effect"),
        ],
    },
    DrugEntry {
        drug: "metformin",
        major: &["contrast_dye", "alcohol"],
        moderate: &["furosemide", "nifedipine", "prednisone"],
        effects: &[
            ("contrast_dye", "Risk of lactic acidosis"),
            ("alcohol", "Risk of lactic acidosis"),
        ],
    },
    DrugEntry {
        drug: "lisinopril",
        major: &["potassium_supplements", "spironolactone", "amiloride"],
        moderate: &["ibuprofen", "naproxen", "lithium"],
        effects: &[
            ("potassium_supplements", "Hyperkalemia risk"),
            ("ibuprofen", "Reduced antihypertensive effect"),
        ],
    },
    DrugEntry {
        drug: "simvastatin",
        major: &["gemfibrozil", "cyclosporine", "danazol"],
        moderate: &["amlodipine", "diltiazem", "verapamil"],
        effects: &[
            ("gemfibrozil", "Increased risk of myopathy"),
            ("cyclosporine", "Increased risk of rhabdomyolysis"),
        ],
    },
];

const BRAND_NAMES: &[(&str, &str)] = &[
    ("paracetamol", "acetaminophen"),
    ("tylenol", "acetaminophen"),
    ("advil", "ibuprofen"),
    ("motrin", "ibuprofen"),
    ("aleve", "naproxen"),
    ("coumadin", "warfarin"),
    ("glucophage", "metformin"),
    ("prinivil", "lisinopril"),
    ("zestril", "lisinopril"),
    ("zocor", "simvastatin"),
];

fn lookup(drug: &str, other: &str) -> Option<InteractionWarning> {
    let entry = TABLE.iter().find(|e| e.drug == drug)?;
    let (severity, fallback_effect, recommendation) = if entry.major.contains(&other) {
        (
            InteractionSeverity::Major,
            "Significant interaction",
            "Avoid combination or monitor closely",
        )
    } else if entry.moderate.contains(&other) {
        (
            InteractionSeverity::Moderate,
            "Moderate interaction",
            "Monitor for adverse effects",
        )
    } else {
        return None;
    };

    let effect = entry
        .effects
        .iter()
        .find(|(drug, _)| *drug == other)
        .map_or(fallback_effect, |(_, effect)| *effect);

    Some(InteractionWarning {
        drug1: drug.to_string(),
        drug2: other.to_string(),
        severity,
        effect: effect.to_string(),
        recommendation: recommendation.to_string(),
    })
}

/// [`DrugInteractionChecker`] over the built-in table.
#[derive(Debug, Clone)]
pub struct InteractionTable {
    dose_suffix: Regex,
    dose_amount: Regex,
    whitespace: Regex,
}

impl InteractionTable {
    pub fn new() -> Self {
        Self {
            dose_suffix: Regex::new(
                r"\s+(\d+(\.\d+)?\s*)?(mg|mcg|g|ml|tablets?|capsules?|injection)\b.*$",
            )
            .unwrap(),
            dose_amount: Regex::new(r"\s+\d+(\.\d+)?$").unwrap(),
            whitespace: Regex::new(r"\s+").unwrap(),
        }
    }

    /// Lowercase, drop dose/form suffixes, join words with `_`, map brands
    /// to generics.
    pub fn normalize(&self, name: &str) -> String {
        let lowered = name.trim().to_lowercase();
        let without_form = self.dose_suffix.replace(&lowered, "");
        let without_dose = self.dose_amount.replace(&without_form, "");
        let normalized = self
            .whitespace
            .replace_all(without_dose.trim(), "_")
            .into_owned();
        BRAND_NAMES
            .iter()
            .find(|(brand, _)| *brand == normalized)
            .map(|(_, generic)| generic.to_string())
            .unwrap_or(normalized)
    }

    /// Synchronous pairwise check.
    pub fn check_pairs(&self, medications: &[String]) -> Vec<InteractionWarning> {
        let normalized: Vec<String> = medications.iter().map(|m| self.normalize(m)).collect();
        let mut warnings = Vec::new();
        for (i, first) in normalized.iter().enumerate() {
            for second in &normalized[i + 1..] {
                if let Some(warning) = lookup(first, second).or_else(|| lookup(second, first)) {
                    warnings.push(warning);
                }
            }
        }
        warnings
    }
}

impl Default for InteractionTable {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DrugInteractionChecker for InteractionTable {
    async fn check(&self, medications: &[String]) -> Result<Vec<InteractionWarning>, CollaboratorError> {
        Ok(self.check_pairs(medications))
    }
}
