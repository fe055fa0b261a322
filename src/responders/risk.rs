//! Deterministic symptom risk scoring.
//!
//! The score is the larger of the symptom score (mean symptom weight, boosted
//! when more than three symptoms are reported) and the condition score
//! (highest weight among conditions suggested by the symptoms). It is then
//! scaled by age and medical-history multipliers, and every red flag adds 20.
//! The result is clamped to 0–100.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::model::{RiskLevel, RiskScore};

const SYMPTOM_WEIGHTS: &[(&str, f64)] = &[
    ("chest pain", 85.0),
    ("difficulty breathing", 80.0),
    ("severe headache", 75.0),
    ("blood in stool", 70.0),
    ("blood in urine", 70.0),
    ("high fever", 65.0),
    ("severe abdominal pain", 65.0),
    ("loss of consciousness", 95.0),
    ("stroke symptoms", 95.0),
    ("heart attack symptoms", 95.0),
    ("severe allergic reaction", 90.0),
    ("shortness of breath", 60.0),
    ("persistent cough", 40.0),
    ("nausea", 30.0),
    ("headache", 35.0),
    ("fatigue", 25.0),
    ("mild fever", 30.0),
    ("sore throat", 20.0),
    ("runny nose", 15.0),
];
const UNKNOWN_SYMPTOM_WEIGHT: f64 = 25.0;

const SYMPTOM_CONDITIONS: &[(&str, &[&str])] = &[
    ("fever", &["viral infection", "bacterial infection", "flu", "covid-19"]),
    ("cough", &["cold", "flu", "pneumonia", "bronchitis", "covid-19"]),
    ("headache", &["tension headache", "migraine", "sinusitis", "hypertension"]),
    ("chest pain", &["heart attack", "angina", "pneumonia", "acid reflux"]),
    ("shortness of breath", &["asthma", "pneumonia", "heart failure", "anxiety"]),
    ("nausea", &["gastroenteritis", "food poisoning", "pregnancy", "migraine"]),
    ("vomiting", &["gastroenteritis", "food poisoning", "appendicitis", "migraine"]),
    ("abdominal pain", &["appendicitis", "gastroenteritis", "gallstones", "ulcer"]),
    ("diarrhea", &["gastroenteritis", "food poisoning", "IBS", "infection"]),
    ("fatigue", &["anemia", "depression", "thyroid disorder", "chronic fatigue syndrome"]),
    ("dizziness", &["vertigo", "low blood pressure", "dehydration", "inner ear infection"]),
    ("rash", &["allergic reaction", "eczema", "viral infection", "contact dermatitis"]),
    ("joint pain", &["arthritis", "injury", "autoimmune disorder", "infection"]),
    ("back pain", &["muscle strain", "herniated disc", "arthritis", "kidney stones"]),
    ("sore throat", &["viral infection", "strep throat", "allergies", "acid reflux"]),
];

const HIGH_RISK_CONDITIONS: &[(&str, f64)] = &[
    ("heart attack", 95.0),
    ("stroke", 95.0),
    ("pulmonary embolism", 90.0),
    ("sepsis", 90.0),
    ("anaphylaxis", 90.0),
    ("pneumonia", 70.0),
    ("appendicitis", 75.0),
    ("meningitis", 85.0),
    ("diabetic ketoacidosis", 80.0),
];
const OTHER_CONDITION_WEIGHT: f64 = 40.0;

const RED_FLAG_SYMPTOMS: &[&str] = &[
    "severe chest pain",
    "difficulty breathing",
    "loss of consciousness",
    "severe headache",
    "high fever",
    "severe abdominal pain",
    "blood in stool",
    "blood in urine",
    "severe allergic reaction",
    "stroke symptoms",
    "heart attack symptoms",
];
const RED_FLAG_BONUS: f64 = 20.0;

const HIGH_RISK_HISTORY: &[&str] = &[
    "diabetes",
    "hypertension",
    "heart disease",
    "cancer",
    "kidney disease",
    "liver disease",
    "autoimmune",
    "copd",
    "asthma",
    "stroke",
    "heart attack",
];

const SYMPTOM_SPECIALIZATIONS: &[(&str, &[&str])] = &[
    ("heart", &["cardiology"]),
    ("chest", &["cardiology", "pulmonology"]),
    ("lung", &["pulmonology"]),
    ("stomach", &["gastroenterology"]),
    ("abdominal", &["gastroenterology"]),
    ("skin", &["dermatology"]),
    ("joint", &["rheumatology", "orthopedics"]),
    ("bone", &["orthopedics"]),
    ("neurological", &["neurology"]),
    ("mental", &["psychiatry", "psychology"]),
    ("eye", &["ophthalmology"]),
    ("ear", &["ENT"]),
    ("throat", &["ENT"]),
    ("kidney", &["nephrology"]),
    ("diabetes", &["endocrinology"]),
];

const CONDITION_SPECIALIZATIONS: &[(&str, &str)] = &[
    ("heart", "cardiology"),
    ("cardiac", "cardiology"),
    ("lung", "pulmonology"),
    ("respiratory", "pulmonology"),
    ("gastro", "gastroenterology"),
    ("stomach", "gastroenterology"),
    ("skin", "dermatology"),
    ("joint", "rheumatology"),
    ("bone", "orthopedics"),
    ("neuro", "neurology"),
    ("mental", "psychiatry"),
    ("diabetes", "endocrinology"),
    ("kidney", "nephrology"),
];
const DEFAULT_SPECIALIZATION: &str = "general_medicine";

/// How many suggested conditions are reported.
const MAX_REPORTED_CONDITIONS: usize = 5;

/// How soon the patient should be seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Emergency,
    Urgent,
    SemiUrgent,
    Routine,
}

impl Urgency {
    fn classify(score: u8, has_red_flags: bool) -> Self {
        if has_red_flags || score >= 85 {
            Urgency::Emergency
        } else if score >= 70 {
            Urgency::Urgent
        } else if score >= 50 {
            Urgency::SemiUrgent
        } else {
            Urgency::Routine
        }
    }

    pub fn recommendation(&self) -> &'static str {
        match self {
            Urgency::Emergency => "Seek immediate emergency medical attention",
            Urgency::Urgent => "Schedule urgent medical consultation within 24 hours",
            Urgency::SemiUrgent => "Schedule medical consultation within 2-3 days",
            Urgency::Routine => "Schedule routine medical consultation",
        }
    }
}

/// Inputs read from a symptom-analysis message.
#[derive(Debug, Clone, Default)]
pub struct RiskInput {
    pub symptoms: Vec<String>,
    pub patient_age: Option<u32>,
    pub medical_history: Vec<String>,
}

/// Full scoring result. `score` is what goes into message metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskAssessment {
    pub score: RiskScore,
    pub urgency: Urgency,
    pub possible_conditions: Vec<String>,
    pub red_flags: Vec<String>,
    pub recommended_specializations: Vec<String>,
}

impl RiskAssessment {
    /// Copy of this assessment with the level raised to at least `floor`.
    ///
    /// The numeric score is raised to the bottom of that level's band so the
    /// two stay consistent.
    pub fn floored_at(&self, floor: RiskLevel) -> Self {
        let mut floored = self.clone();
        if floored.score.level < floor {
            floored.score.level = floor;
            floored.score.score = floored.score.score.max(band_floor(floor));
        }
        floored
    }
}

fn band_floor(level: RiskLevel) -> u8 {
    match level {
        RiskLevel::Low => 0,
        RiskLevel::Medium => 40,
        RiskLevel::High => 60,
        RiskLevel::Critical => 80,
    }
}

/// Leading qualifiers stripped before condition matching.
static SYMPTOM_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(i have|experiencing|feeling|severe|mild|chronic)\s+").unwrap()
});

/// Trailing nouns stripped before condition matching.
static SYMPTOM_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+(pain|ache|aches|symptoms?)$").unwrap());

/// Rule-based scorer.
#[derive(Debug, Clone, Copy, Default)]
pub struct RiskScorer;

impl RiskScorer {
    pub fn new() -> Self {
        Self
    }

    pub fn assess(&self, input: &RiskInput) -> RiskAssessment {
        let symptoms: Vec<String> = input
            .symptoms
            .iter()
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect();
        let normalized: Vec<String> = symptoms.iter().map(|s| self.normalize(s)).collect();

        let conditions = suggest_conditions(&normalized);
        let red_flags = red_flags(&symptoms);

        let symptom_risk = symptom_risk(&symptoms);
        let condition_risk = condition_risk(&conditions);
        let age_multiplier = age_multiplier(input.patient_age);
        let (history_multiplier, history_matches) = history_multiplier(&input.medical_history);

        let base = symptom_risk.max(condition_risk);
        let adjusted = base * age_multiplier * history_multiplier
            + RED_FLAG_BONUS * red_flags.len() as f64;
        // Nudge before truncating: 40 × 1.4 is 55.99… in binary floating point.
        let score = (adjusted + 1e-9).clamp(0.0, 100.0) as u8;

        let level = RiskLevel::from_score(score);
        let urgency = Urgency::classify(score, !red_flags.is_empty());

        let mut factors = symptoms.clone();
        if condition_risk > symptom_risk {
            if let Some(top) = highest_risk_condition(&conditions) {
                factors.push(format!("possible {top}"));
            }
        }
        if age_multiplier != 1.0 {
            if let Some(age) = input.patient_age {
                factors.push(format!("age {age}"));
            }
        }
        factors.extend(history_matches.into_iter().map(|h| format!("history of {h}")));
        factors.extend(red_flags.iter().cloned());

        RiskAssessment {
            score: RiskScore {
                level,
                score,
                factors,
                recommendation: urgency.recommendation().to_string(),
            },
            urgency,
            possible_conditions: conditions.iter().take(MAX_REPORTED_CONDITIONS).cloned().collect(),
            recommended_specializations: specializations(&normalized, &conditions),
            red_flags,
        }
    }

    fn normalize(&self, symptom: &str) -> String {
        let without_prefix = SYMPTOM_PREFIX.replace(symptom, "");
        SYMPTOM_SUFFIX.replace(&without_prefix, "").into_owned()
    }
}

fn symptom_risk(symptoms: &[String]) -> f64 {
    if symptoms.is_empty() {
        return 0.0;
    }
    let mut total: f64 = symptoms
        .iter()
        .map(|symptom| {
            SYMPTOM_WEIGHTS
                .iter()
                .find(|(key, _)| symptom.contains(key))
                .map_or(UNKNOWN_SYMPTOM_WEIGHT, |(_, weight)| *weight)
        })
        .sum();
    if symptoms.len() > 3 {
        total *= 1.2;
    }
    (total / symptoms.len() as f64).min(100.0)
}

/// Conditions ranked by how strongly the symptoms suggest them. Ties keep
/// first-seen order.
fn suggest_conditions(normalized: &[String]) -> Vec<String> {
    let mut scores: Vec<(&str, u32)> = Vec::new();
    let mut bump = |condition: &'static str, by: u32| match scores.iter_mut().find(|(c, _)| *c == condition) {
        Some((_, score)) => *score += by,
        None => scores.push((condition, by)),
    };

    for symptom in normalized {
        for (key, conditions) in SYMPTOM_CONDITIONS {
            if *key == symptom.as_str() {
                conditions.iter().for_each(|c| bump(*c, 2));
            }
        }
        for (key, conditions) in SYMPTOM_CONDITIONS {
            if symptom.contains(key) || key.contains(symptom.as_str()) {
                conditions.iter().for_each(|c| bump(*c, 1));
            }
        }
    }

    scores.sort_by(|a, b| b.1.cmp(&a.1));
    scores.into_iter().map(|(c, _)| c.to_string()).collect()
}

fn condition_weight(condition: &str) -> f64 {
    let lower = condition.to_lowercase();
    HIGH_RISK_CONDITIONS
        .iter()
        .find(|(key, _)| lower.contains(key))
        .map_or(OTHER_CONDITION_WEIGHT, |(_, weight)| *weight)
}

fn condition_risk(conditions: &[String]) -> f64 {
    conditions
        .iter()
        .map(|c| condition_weight(c))
        .fold(0.0, f64::max)
}

fn highest_risk_condition(conditions: &[String]) -> Option<&str> {
    conditions
        .iter()
        .max_by(|a, b| condition_weight(a).total_cmp(&condition_weight(b)))
        .map(String::as_str)
}

fn age_multiplier(age: Option<u32>) -> f64 {
    match age {
        Some(0..=1) => 1.3,
        Some(2..=11) => 1.1,
        Some(65..=79) => 1.2,
        Some(80..) => 1.4,
        _ => 1.0,
    }
}

/// 1.0 plus 0.1 for each history entry naming a high-risk condition.
fn history_multiplier(history: &[String]) -> (f64, Vec<String>) {
    let matches: Vec<String> = history
        .iter()
        .filter_map(|entry| {
            let lower = entry.to_lowercase();
            HIGH_RISK_HISTORY
                .iter()
                .find(|risk| lower.contains(*risk))
                .map(|risk| risk.to_string())
        })
        .collect();
    (1.0 + 0.1 * matches.len() as f64, matches)
}

fn red_flags(symptoms: &[String]) -> Vec<String> {
    let mut flags = Vec::new();
    for symptom in symptoms {
        for flag in RED_FLAG_SYMPTOMS {
            let entry = format!("Critical symptom: {flag}");
            if symptom.contains(flag) && !flags.contains(&entry) {
                flags.push(entry);
            }
        }
    }
    flags
}

fn specializations(normalized: &[String], conditions: &[String]) -> Vec<String> {
    let mut specs: Vec<String> = Vec::new();
    let mut add = |spec: &str| {
        if !specs.iter().any(|s| s == spec) {
            specs.push(spec.to_string());
        }
    };

    for symptom in normalized {
        for (body_part, mapped) in SYMPTOM_SPECIALIZATIONS {
            if symptom.contains(body_part) {
                mapped.iter().for_each(|s| add(s));
            }
        }
    }
    for condition in conditions {
        let lower = condition.to_lowercase();
        for (keyword, spec) in CONDITION_SPECIALIZATIONS {
            if lower.contains(keyword) {
                add(spec);
            }
        }
    }

    if specs.is_empty() {
        specs.push(DEFAULT_SPECIALIZATION.to_string());
    }
    specs
}
