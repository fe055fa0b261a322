//! Routine cross-role notifications, evaluated after every successful route.
//!
//! | origin    | kind                                   | target                          |
//! |-----------|----------------------------------------|---------------------------------|
//! | patient   | symptom_analysis, appointment_booking  | `clinician-<assigned clinician>`|
//! | clinician | prescription                           | `admin-broadcast`               |
//! | admin     | alert                                  | `admin-broadcast` + `admin-*`   |
//!
//! Emergency escalation does not go through here.

use serde_json::Value;

use crate::bus::{ChannelName, OutboundEvent};
use crate::model::{Message, MessageKind, RoleType, keys};

pub const REASON_PATIENT_UPDATE: &str = "patient-update";
pub const REASON_QUALITY_REFRESH: &str = "quality-metric-refresh";
pub const REASON_ADMIN_ALERT: &str = "admin-alert";

/// Compute the notifications owed for one routed message.
///
/// `admin_channels` are the live direct admin channels to broadcast admin
/// alerts to. Pure: publishing is the caller's job.
pub fn cross_role_notifications(
    original: &Message,
    reply: &Message,
    admin_channels: &[ChannelName],
) -> Vec<(ChannelName, OutboundEvent)> {
    let Ok(role) = original.role() else {
        return Vec::new();
    };

    match (role, original.kind) {
        (RoleType::Patient, MessageKind::SymptomAnalysis | MessageKind::AppointmentBooking) => {
            let Some(clinician_id) = assigned_clinician(original, reply) else {
                return Vec::new();
            };
            let mut message = reply.clone();
            message
                .metadata
                .insert(keys::PATIENT_ID.to_string(), Value::String(original.from_id.clone()));
            message.metadata.insert(
                keys::ORIGINAL_MESSAGE_ID.to_string(),
                Value::String(original.id.clone()),
            );
            vec![(
                ChannelName::direct(RoleType::Clinician, clinician_id),
                OutboundEvent::CrossRoleNotification {
                    reason: REASON_PATIENT_UPDATE.to_string(),
                    message,
                },
            )]
        }
        (RoleType::Clinician, MessageKind::Prescription) => vec![(
            ChannelName::AdminBroadcast,
            OutboundEvent::CrossRoleNotification {
                reason: REASON_QUALITY_REFRESH.to_string(),
                message: reply.clone(),
            },
        )],
        (RoleType::Admin, MessageKind::Alert) => std::iter::once(ChannelName::AdminBroadcast)
            .chain(admin_channels.iter().cloned())
            .map(|channel| {
                (
                    channel,
                    OutboundEvent::CrossRoleNotification {
                        reason: REASON_ADMIN_ALERT.to_string(),
                        message: reply.clone(),
                    },
                )
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// The clinician a patient message belongs to: the auto-booked one first,
/// then an explicit `clinicianId`, then the message addressee.
fn assigned_clinician(original: &Message, reply: &Message) -> Option<String> {
    reply
        .metadata
        .get(keys::APPOINTMENT)
        .and_then(|a| a.get(keys::CLINICIAN_ID))
        .and_then(Value::as_str)
        .or_else(|| original.metadata_str(keys::CLINICIAN_ID))
        .or(original.to_id.as_deref())
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn reply_for(original: &Message, kind: MessageKind) -> Message {
        let role = original.role().unwrap();
        Message::new(role, role.responder_id(), "done", kind).with_to(original.from_id.clone())
    }

    #[test]
    fn patient_update_goes_to_booked_clinician() {
        let original = Message::new(RoleType::Patient, "p-1", "chest pain", MessageKind::SymptomAnalysis)
            .with_to("doc-fallback");
        let reply = reply_for(&original, MessageKind::SymptomAnalysis)
            .with_metadata(keys::APPOINTMENT, json!({"clinicianId": "doc-9", "bookingId": "b-1"}));

        let out = cross_role_notifications(&original, &reply, &[]);

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].0.to_string(), "clinician-doc-9");
        let OutboundEvent::CrossRoleNotification { reason, message } = &out[0].1 else {
            panic!("expected cross-role notification");
        };
        assert_eq!(reason, REASON_PATIENT_UPDATE);
        assert_eq!(message.metadata_str(keys::PATIENT_ID), Some("p-1"));
        assert_eq!(message.metadata[keys::APPOINTMENT]["bookingId"], "b-1");
    }

    #[test]
    fn patient_update_falls_back_to_addressee() {
        let original = Message::new(RoleType::Patient, "p-1", "book me", MessageKind::AppointmentBooking)
            .with_to("doc-2");
        let reply = reply_for(&original, MessageKind::PlainText);

        let out = cross_role_notifications(&original, &reply, &[]);
        assert_eq!(out[0].0, ChannelName::direct(RoleType::Clinician, "doc-2"));
    }

    #[test]
    fn unassigned_patient_update_is_skipped() {
        let original = Message::new(RoleType::Patient, "p-1", "cough", MessageKind::SymptomAnalysis);
        let reply = reply_for(&original, MessageKind::SymptomAnalysis);
        assert!(cross_role_notifications(&original, &reply, &[]).is_empty());
    }

    #[test]
    fn prescription_triggers_quality_refresh() {
        let original = Message::new(RoleType::Clinician, "doc-1", "rx", MessageKind::Prescription);
        let reply = reply_for(&original, MessageKind::Prescription)
            .with_metadata(keys::INTERACTION_WARNINGS, json!([]));

        let out = cross_role_notifications(&original, &reply, &[]);

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].0, ChannelName::AdminBroadcast);
        assert!(matches!(
            &out[0].1,
            OutboundEvent::CrossRoleNotification { reason, .. } if reason == REASON_QUALITY_REFRESH
        ));
    }

    #[test]
    fn admin_alert_reaches_every_admin_channel() {
        let original = Message::new(RoleType::Admin, "admin-1", "fraud", MessageKind::Alert);
        let reply = reply_for(&original, MessageKind::Alert);
        let admins = [
            ChannelName::direct(RoleType::Admin, "1"),
            ChannelName::direct(RoleType::Admin, "2"),
        ];

        let channels: Vec<String> = cross_role_notifications(&original, &reply, &admins)
            .into_iter()
            .map(|(c, _)| c.to_string())
            .collect();

        assert_eq!(channels, vec!["admin-broadcast", "admin-1", "admin-2"]);
    }

    #[test]
    fn other_kinds_notify_nobody() {
        for (role, kind) in [
            (RoleType::Patient, MessageKind::PlainText),
            (RoleType::Clinician, MessageKind::PlainText),
            (RoleType::Admin, MessageKind::PlainText),
            (RoleType::Clinician, MessageKind::Alert),
        ] {
            let original = Message::new(role, "u", "x", kind).with_to("doc-1");
            let reply = reply_for(&original, kind);
            assert!(cross_role_notifications(&original, &reply, &[]).is_empty());
        }
    }
}
