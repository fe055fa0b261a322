//! Logical channel names.
//!
//! This is the only place channel-naming conventions live. Publishers and
//! subscribers both go through [`ChannelName`].

use std::fmt;

use crate::model::RoleType;

const ADMIN_BROADCAST: &str = "admin-broadcast";
const EMERGENCY_RESPONDERS: &str = "emergency-responders";

/// A logical notification channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChannelName {
    /// `admin-broadcast` — all admin-facing alerts and notifications.
    AdminBroadcast,
    /// `emergency-responders` — critical escalation fan-out group.
    EmergencyResponders,
    /// `<role>-<userId>` — direct per-user, per-role channel.
    Direct { role: RoleType, user_id: String },
}

impl ChannelName {
    pub fn direct(role: RoleType, user_id: impl Into<String>) -> Self {
        ChannelName::Direct {
            role,
            user_id: user_id.into(),
        }
    }

    /// Parse a wire channel name back into its logical form.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            ADMIN_BROADCAST => Some(ChannelName::AdminBroadcast),
            EMERGENCY_RESPONDERS => Some(ChannelName::EmergencyResponders),
            _ => {
                let (role, user_id) = raw.split_once('-')?;
                if user_id.is_empty() {
                    return None;
                }
                let role = role.parse::<RoleType>().ok()?;
                Some(ChannelName::direct(role, user_id))
            }
        }
    }

    /// Prefix shared by every direct channel of `role`.
    pub fn role_prefix(role: RoleType) -> String {
        format!("{}-", role.as_str())
    }
}

impl fmt::Display for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelName::AdminBroadcast => f.write_str(ADMIN_BROADCAST),
            ChannelName::EmergencyResponders => f.write_str(EMERGENCY_RESPONDERS),
            ChannelName::Direct { role, user_id } => write!(f, "{}-{}", role.as_str(), user_id),
        }
    }
}
