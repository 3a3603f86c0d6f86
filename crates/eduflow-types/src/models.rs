use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Sender id stamped on server-synthesized chat messages.
pub const SYSTEM_SENDER_ID: i64 = 0;

/// Display name rendered for server-synthesized chat messages.
pub const SYSTEM_SENDER_NAME: &str = "System";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RoomKind {
    Course,
    Dm,
}

impl RoomKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Course => "COURSE",
            Self::Dm => "DM",
        }
    }
}

impl fmt::Display for RoomKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoomKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "COURSE" => Ok(Self::Course),
            "DM" => Ok(Self::Dm),
            other => Err(format!("unknown room kind: {}", other)),
        }
    }
}

/// Lifecycle of a call session.
///
/// ```text
/// RINGING -> ACTIVE -> ENDED
/// RINGING -> MISSED
/// RINGING -> REJECTED
/// ```
///
/// `ENDED`, `MISSED` and `REJECTED` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CallStatus {
    Ringing,
    Active,
    Ended,
    Missed,
    Rejected,
}

impl CallStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ringing => "RINGING",
            Self::Active => "ACTIVE",
            Self::Ended => "ENDED",
            Self::Missed => "MISSED",
            Self::Rejected => "REJECTED",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Ended | Self::Missed | Self::Rejected)
    }

    /// Next state when the callee picks up.
    pub fn on_answer(self) -> Option<Self> {
        match self {
            Self::Ringing => Some(Self::Active),
            _ => None,
        }
    }

    /// Next state when either party hangs up. An unanswered call becomes missed.
    pub fn on_end(self) -> Option<Self> {
        match self {
            Self::Ringing => Some(Self::Missed),
            Self::Active => Some(Self::Ended),
            _ => None,
        }
    }

    /// Next state when the callee declines.
    pub fn on_reject(self) -> Option<Self> {
        match self {
            Self::Ringing => Some(Self::Rejected),
            _ => None,
        }
    }
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CallStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RINGING" => Ok(Self::Ringing),
            "ACTIVE" => Ok(Self::Active),
            "ENDED" => Ok(Self::Ended),
            "MISSED" => Ok(Self::Missed),
            "REJECTED" => Ok(Self::Rejected),
            other => Err(format!("unknown call status: {}", other)),
        }
    }
}
