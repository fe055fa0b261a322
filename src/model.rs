//! Core data model — messages, risk scores, and system alerts.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RoutingError;

/// Open key/value payload carried by a message.
pub type Metadata = serde_json::Map<String, Value>;

/// Well-known metadata keys.
pub mod keys {
    pub const ANALYSIS: &str = "analysis";
    pub const RISK_SCORE: &str = "riskScore";
    pub const SYMPTOMS: &str = "symptoms";
    pub const PATIENT_AGE: &str = "patientAge";
    pub const MEDICAL_HISTORY: &str = "medicalHistory";
    pub const APPOINTMENT: &str = "appointment";
    pub const AUTO_BOOKING: &str = "autoBooking";
    pub const CLINICIAN_ID: &str = "clinicianId";
    pub const PATIENT_ID: &str = "patientId";
    pub const MEDICATIONS: &str = "medications";
    pub const PRESCRIPTION: &str = "prescription";
    pub const INTERACTION_WARNINGS: &str = "interactionWarnings";
    pub const INTERACTION_CHECK_FAILED: &str = "interactionCheckFailed";
    pub const ALERT_TYPE: &str = "alertType";
    pub const ALERT: &str = "alert";
    pub const URGENCY: &str = "urgency";
    pub const ORIGINAL_MESSAGE_ID: &str = "originalMessageId";
    pub const ERROR: &str = "error";
}

// ── Roles ───────────────────────────────────────────────────────────

/// Responder category a message is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoleType {
    Patient,
    Clinician,
    Admin,
}

impl RoleType {
    pub const ALL: [RoleType; 3] = [RoleType::Patient, RoleType::Clinician, RoleType::Admin];

    pub fn as_str(&self) -> &'static str {
        match self {
            RoleType::Patient => "patient",
            RoleType::Clinician => "clinician",
            RoleType::Admin => "admin",
        }
    }

    /// Identity stamped as `fromId` on replies produced for this role.
    pub fn responder_id(&self) -> String {
        format!("{}-responder", self.as_str())
    }
}

impl fmt::Display for RoleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoleType {
    type Err = RoutingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "patient" => Ok(RoleType::Patient),
            "clinician" => Ok(RoleType::Clinician),
            "admin" => Ok(RoleType::Admin),
            other => Err(RoutingError::UnknownRole(other.to_string())),
        }
    }
}

// ── Message ─────────────────────────────────────────────────────────

/// Category of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    #[default]
    PlainText,
    SymptomAnalysis,
    AppointmentBooking,
    Prescription,
    Alert,
}

impl MessageKind {
    pub fn label(&self) -> &'static str {
        match self {
            MessageKind::PlainText => "plain_text",
            MessageKind::SymptomAnalysis => "symptom_analysis",
            MessageKind::AppointmentBooking => "appointment_booking",
            MessageKind::Prescription => "prescription",
            MessageKind::Alert => "alert",
        }
    }
}

/// The unit of communication between clients and responders.
///
/// `role_type` stays a raw string: inbound payloads may name roles this
/// system does not know, and that has to surface as a routing error rather
/// than a parse failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(default = "generate_message_id")]
    pub id: String,
    pub role_type: String,
    pub from_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_id: Option<String>,
    pub content: String,
    #[serde(default)]
    pub kind: MessageKind,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub processed: bool,
}

impl Message {
    /// Create a new message with a fresh id and timestamp.
    pub fn new(
        role: RoleType,
        from_id: impl Into<String>,
        content: impl Into<String>,
        kind: MessageKind,
    ) -> Self {
        Self {
            id: generate_message_id(),
            role_type: role.as_str().to_string(),
            from_id: from_id.into(),
            to_id: None,
            content: content.into(),
            kind,
            metadata: Metadata::new(),
            timestamp: Utc::now(),
            processed: false,
        }
    }

    pub fn with_to(mut self, to_id: impl Into<String>) -> Self {
        self.to_id = Some(to_id.into());
        self
    }

    pub fn with_metadata(mut self, key: &str, value: Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    /// Parse the declared role.
    pub fn role(&self) -> Result<RoleType, RoutingError> {
        self.role_type.parse()
    }

    /// Read `metadata.<key>` as a string.
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }

    /// Read `metadata.<key>` as a list of strings. Non-string items are skipped.
    pub fn metadata_strings(&self, key: &str) -> Vec<String> {
        self.metadata
            .get(key)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The risk score at `metadata.analysis.riskScore`, if present and well formed.
    pub fn risk_score(&self) -> Option<RiskScore> {
        let raw = self
            .metadata
            .get(keys::ANALYSIS)?
            .get(keys::RISK_SCORE)?
            .clone();
        serde_json::from_value(raw).ok()
    }

    /// Attach a risk score at `metadata.analysis.riskScore`, keeping any
    /// other analysis fields.
    pub fn set_risk_score(&mut self, risk: &RiskScore) {
        let analysis = self
            .metadata
            .entry(keys::ANALYSIS.to_string())
            .or_insert_with(|| Value::Object(Metadata::new()));
        if !analysis.is_object() {
            *analysis = Value::Object(Metadata::new());
        }
        if let Value::Object(map) = analysis {
            map.insert(
                keys::RISK_SCORE.to_string(),
                serde_json::to_value(risk).unwrap_or(Value::Null),
            );
        }
    }
}

/// Generate a message id: millisecond timestamp plus a random suffix.
pub fn generate_message_id() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(9)
        .map(char::from)
        .collect();
    format!("msg_{}_{}", Utc::now().timestamp_millis(), suffix.to_lowercase())
}

// ── Risk ────────────────────────────────────────────────────────────

/// Categorical severity of a symptom analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// Map a 0–100 score to a level.
    pub fn from_score(score: u8) -> Self {
        match score {
            80.. => RiskLevel::Critical,
            60..=79 => RiskLevel::High,
            40..=59 => RiskLevel::Medium,
            _ => RiskLevel::Low,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }

    /// Whether this level calls for an urgent auto-booking attempt.
    pub fn is_urgent(&self) -> bool {
        matches!(self, RiskLevel::High | RiskLevel::Critical)
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a symptom analysis, embedded at `metadata.analysis.riskScore`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskScore {
    pub level: RiskLevel,
    /// 0–100.
    pub score: u8,
    #[serde(default)]
    pub factors: Vec<String>,
    #[serde(default)]
    pub recommendation: String,
}

// ── System alerts ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertCategory {
    Fraud,
    Compliance,
    SystemError,
    Performance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// An administrative alert. Never deleted, only marked resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemAlert {
    pub id: String,
    pub category: AlertCategory,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affected_entity_id: Option<String>,
    #[serde(default)]
    pub resolved: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl SystemAlert {
    pub fn new(
        category: AlertCategory,
        severity: Severity,
        title: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: format!("alert_{}", uuid::Uuid::new_v4().simple()),
            category,
            severity,
            title: title.into(),
            description: description.into(),
            affected_entity_id: None,
            resolved: false,
            created_at: Utc::now(),
            resolved_at: None,
        }
    }

    pub fn with_affected_entity(mut self, entity_id: impl Into<String>) -> Self {
        self.affected_entity_id = Some(entity_id.into());
        self
    }

    /// Mark resolved. Resolving twice keeps the first resolution time.
    pub fn resolve(&mut self) {
        if !self.resolved {
            self.resolved = true;
            self.resolved_at = Some(Utc::now());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn role_parse_rejects_unknown() {
        assert_eq!("patient".parse::<RoleType>().unwrap(), RoleType::Patient);
        assert_eq!(
            "pharmacist".parse::<RoleType>(),
            Err(RoutingError::UnknownRole("pharmacist".into()))
        );
    }

    #[test]
    fn message_ids_are_unique() {
        let a = generate_message_id();
        let b = generate_message_id();
        assert_ne!(a, b);
        assert!(a.starts_with("msg_"));
    }

    #[test]
    fn inbound_json_fills_defaults() {
        let msg: Message = serde_json::from_value(json!({
            "roleType": "patient",
            "fromId": "p-1",
            "content": "I feel unwell",
            "kind": "symptom_analysis",
            "metadata": {"symptoms": ["chest pain", 3, "nausea"]}
        }))
        .unwrap();
        assert!(!msg.id.is_empty());
        assert!(!msg.processed);
        assert_eq!(msg.kind, MessageKind::SymptomAnalysis);
        assert_eq!(msg.metadata_strings(keys::SYMPTOMS), vec!["chest pain", "nausea"]);
    }

    #[test]
    fn unknown_role_survives_deserialization() {
        let msg: Message = serde_json::from_value(json!({
            "roleType": "janitor",
            "fromId": "x",
            "content": "hi"
        }))
        .unwrap();
        assert!(msg.role().is_err());
        assert_eq!(msg.kind, MessageKind::PlainText);
    }

    #[test]
    fn risk_score_roundtrips_through_metadata() {
        let mut msg = Message::new(RoleType::Patient, "p-1", "x", MessageKind::SymptomAnalysis)
            .with_metadata(keys::ANALYSIS, json!({"possibleConditions": ["flu"]}));
        let risk = RiskScore {
            level: RiskLevel::Critical,
            score: 95,
            factors: vec!["chest pain".into()],
            recommendation: "Seek care".into(),
        };
        msg.set_risk_score(&risk);
        assert_eq!(msg.risk_score(), Some(risk));
        // Sibling analysis fields are preserved.
        assert_eq!(msg.metadata["analysis"]["possibleConditions"][0], "flu");
    }

    #[test]
    fn malformed_risk_score_is_ignored() {
        let msg = Message::new(RoleType::Patient, "p-1", "x", MessageKind::PlainText)
            .with_metadata(keys::ANALYSIS, json!({"riskScore": {"level": "catastrophic"}}));
        assert!(msg.risk_score().is_none());
    }

    #[test]
    fn risk_level_thresholds() {
        assert_eq!(RiskLevel::from_score(100), RiskLevel::Critical);
        assert_eq!(RiskLevel::from_score(80), RiskLevel::Critical);
        assert_eq!(RiskLevel::from_score(79), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(60), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(40), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(39), RiskLevel::Low);
        assert!(RiskLevel::Medium < RiskLevel::Critical);
    }

    #[test]
    fn alert_resolve_is_idempotent() {
        let mut alert = SystemAlert::new(AlertCategory::Fraud, Severity::High, "t", "d");
        assert!(!alert.resolved);
        alert.resolve();
        let first = alert.resolved_at;
        alert.resolve();
        assert!(alert.resolved);
        assert_eq!(alert.resolved_at, first);
    }
}
