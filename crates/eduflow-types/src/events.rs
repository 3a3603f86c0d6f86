use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

fn default_true() -> bool {
    true
}

/// Frames sent FROM client TO server on a chat socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatCommand {
    /// Post a message to the room
    ChatMessage {
        message: String,
        #[serde(default)]
        file_url: Option<String>,
        #[serde(default)]
        file_type: Option<String>,
    },

    /// Typing indicator on/off
    Typing {
        #[serde(default = "default_true")]
        is_typing: bool,
    },

    /// Mark a message as read
    ReadReceipt { message_id: i64 },
}

impl ChatCommand {
    /// Parse a text frame. Older clients send `{"message": "..."}` with no
    /// `type`; those are read as `chat_message`.
    pub fn parse(text: &str) -> serde_json::Result<Self> {
        let mut value: Value = serde_json::from_str(text)?;
        if let Some(obj) = value.as_object_mut() {
            if !obj.contains_key("type") && obj.contains_key("message") {
                obj.insert("type".into(), Value::from("chat_message"));
            }
        }
        serde_json::from_value(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Offline,
}

/// Events sent FROM server TO client on a chat socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    /// A message was persisted in the room
    ChatMessage {
        id: i64,
        message: String,
        user_id: i64,
        sender_name: String,
        timestamp: DateTime<Utc>,
        is_system_message: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_url: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_type: Option<String>,
    },

    /// Another connection started or stopped typing
    Typing {
        user_id: i64,
        sender_name: String,
        is_typing: bool,
    },

    /// Another connection read a message
    ReadReceipt { message_id: i64, user_id: i64 },

    /// A user's first connection opened or last connection closed
    Presence { user_id: i64, status: PresenceStatus },

    /// Room members online at the moment this socket joined
    OnlineMembers { user_ids: Vec<i64> },
}

/// Frames sent FROM client TO server on a call signaling socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CallCommand {
    CallOffer { callee_id: i64, sdp: Value },
    CallAnswer { call_id: i64, sdp: Value },
    IceCandidate { candidate: Value },
    CallEnd {
        #[serde(default)]
        call_id: Option<i64>,
    },
    CallReject { call_id: i64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndReason {
    Ended,
    Disconnected,
}

/// Events sent FROM server TO client on a call signaling socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CallEvent {
    /// Delivered only to the designated callee
    IncomingCall {
        call_id: i64,
        caller_id: i64,
        caller_name: String,
        sdp: Value,
    },

    CallAnswered {
        call_id: i64,
        answerer_id: i64,
        sdp: Value,
    },

    IceCandidate { user_id: i64, candidate: Value },

    CallEnded {
        user_id: i64,
        reason: EndReason,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        call_id: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration: Option<i64>,
    },

    CallRejected { user_id: i64, call_id: i64 },
}
