//! Turns call lifecycle changes into system messages in the paired chat room.
//!
//! The signaling group and the chat group never see each other's traffic;
//! this is the only bridge between them.

use tracing::{debug, warn};

use eduflow_db::models::{CallRow, NewMessage};
use eduflow_types::events::ChatEvent;
use eduflow_types::models::{CallStatus, SYSTEM_SENDER_ID, SYSTEM_SENDER_NAME};

use crate::bus::{BusEvent, Envelope, chat_group};
use crate::dispatcher::Dispatcher;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallLifecycle {
    Started,
    Ended { duration: Option<i64> },
    Missed,
    Declined,
}

impl CallLifecycle {
    /// The lifecycle event a freshly transitioned call represents.
    pub fn from_call(call: &CallRow) -> Option<Self> {
        match call.status {
            CallStatus::Ringing => None,
            CallStatus::Active => Some(Self::Started),
            CallStatus::Ended => Some(Self::Ended {
                duration: call.duration(),
            }),
            CallStatus::Missed => Some(Self::Missed),
            CallStatus::Rejected => Some(Self::Declined),
        }
    }

    pub fn system_text(&self) -> String {
        match self {
            Self::Started => "📞 Video call started".to_string(),
            Self::Ended {
                duration: Some(secs),
            } if *secs > 0 => format!("📞 Video call ended ({}s)", secs),
            Self::Ended { .. } => "📞 Video call ended".to_string(),
            Self::Missed => "📞 Missed video call".to_string(),
            Self::Declined => "📞 Video call declined".to_string(),
        }
    }
}

/// Persist the system message for `call`'s new state and publish it to the
/// room's chat group. Nothing is published if the write fails.
pub async fn announce(dispatcher: &Dispatcher, tenant_id: i64, call: &CallRow) -> Option<ChatEvent> {
    let lifecycle = CallLifecycle::from_call(call)?;
    let room_id = call.room_id;
    let text = lifecycle.system_text();

    let stored = dispatcher
        .storage(move |db| {
            db.insert_message(
                tenant_id,
                &NewMessage {
                    room_id,
                    sender_id: SYSTEM_SENDER_ID,
                    sender_name: SYSTEM_SENDER_NAME,
                    content: &text,
                    file_url: None,
                    file_type: None,
                    is_system_message: true,
                },
            )
        })
        .await;

    let row = match stored {
        Ok(Some(row)) => row,
        Ok(None) => {
            debug!("Room {} not writable for call {} system message", room_id, call.id);
            return None;
        }
        Err(e) => {
            warn!("Failed to store system message for call {}: {}", call.id, e);
            return None;
        }
    };

    let event = ChatEvent::ChatMessage {
        id: row.id,
        message: row.content,
        user_id: SYSTEM_SENDER_ID,
        sender_name: SYSTEM_SENDER_NAME.to_string(),
        timestamp: row.created_at,
        is_system_message: true,
        file_url: None,
        file_type: None,
    };

    dispatcher.publish(
        &chat_group(tenant_id, &room_id.to_string()),
        Envelope::from_server(BusEvent::Chat(event.clone())),
    );
    Some(event)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_texts() {
        assert_eq!(CallLifecycle::Started.system_text(), "📞 Video call started");
        assert_eq!(
            CallLifecycle::Ended { duration: Some(42) }.system_text(),
            "📞 Video call ended (42s)"
        );
        assert_eq!(
            CallLifecycle::Ended { duration: Some(0) }.system_text(),
            "📞 Video call ended"
        );
        assert_eq!(CallLifecycle::Ended { duration: None }.system_text(), "📞 Video call ended");
        assert_eq!(CallLifecycle::Declined.system_text(), "📞 Video call declined");
    }
}
