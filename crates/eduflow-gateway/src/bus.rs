//! Group publish/subscribe between connections.
//!
//! Each connection owns one inbox; joining a group registers that inbox
//! under the group id. Delivery is best effort to whoever is subscribed at
//! publish time; durability comes from the message store, not the bus.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use eduflow_types::events::{CallEvent, ChatEvent};

pub type ConnectionId = Uuid;

/// Sending half of a connection's inbox.
pub type Inbox = mpsc::UnboundedSender<Arc<Envelope>>;

/// Receiving half of a connection's inbox.
pub type InboxReceiver = mpsc::UnboundedReceiver<Arc<Envelope>>;

pub fn inbox() -> (Inbox, InboxReceiver) {
    mpsc::unbounded_channel()
}

/// Broadcast group for a chat room. The tenant id is part of the name, so
/// two tenants using the same room name never share a group.
pub fn chat_group(tenant_id: i64, room: &str) -> String {
    format!("tenant_{}_{}", tenant_id, room)
}

/// Signaling group for calls in a DM room, distinct from the chat group.
pub fn call_group(tenant_id: i64, room_id: i64) -> String {
    format!("call_{}_{}", tenant_id, room_id)
}

/// Tenant-wide group carrying online/offline transitions.
pub fn presence_group(tenant_id: i64) -> String {
    format!("presence_{}", tenant_id)
}

/// What travels through a group. Receivers decide per event whether and how
/// it reaches their socket.
#[derive(Debug, Clone)]
pub enum BusEvent {
    Chat(ChatEvent),
    Call(CallEvent),
    /// Published to the whole signaling group; only the callee surfaces it.
    CallOffer {
        call_id: i64,
        caller_id: i64,
        caller_name: String,
        callee_id: i64,
        sdp: Value,
    },
}

#[derive(Debug, Clone)]
pub struct Envelope {
    /// Publishing connection; `None` for server-originated events.
    pub origin: Option<ConnectionId>,
    pub event: BusEvent,
}

impl Envelope {
    pub fn from_connection(origin: ConnectionId, event: BusEvent) -> Self {
        Self {
            origin: Some(origin),
            event,
        }
    }

    pub fn from_server(event: BusEvent) -> Self {
        Self {
            origin: None,
            event,
        }
    }
}

/// Group messaging backend. `LocalBus` serves a single process; a broker-backed
/// implementation can replace it without touching the gateways.
pub trait MessageBus: Send + Sync {
    fn subscribe(&self, group: &str, conn_id: ConnectionId, inbox: Inbox);

    fn unsubscribe(&self, group: &str, conn_id: ConnectionId);

    /// Returns how many inboxes accepted the envelope.
    fn publish(&self, group: &str, envelope: Envelope) -> usize;
}

/// In-process bus: group id -> (connection id -> inbox).
#[derive(Default)]
pub struct LocalBus {
    groups: RwLock<HashMap<String, HashMap<ConnectionId, Inbox>>>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn subscriber_count(&self, group: &str) -> usize {
        let groups = self.groups.read().unwrap_or_else(|e| e.into_inner());
        groups.get(group).map_or(0, HashMap::len)
    }
}

impl MessageBus for LocalBus {
    fn subscribe(&self, group: &str, conn_id: ConnectionId, inbox: Inbox) {
        let mut groups = self.groups.write().unwrap_or_else(|e| e.into_inner());
        groups.entry(group.to_string()).or_default().insert(conn_id, inbox);
    }

    fn unsubscribe(&self, group: &str, conn_id: ConnectionId) {
        let mut groups = self.groups.write().unwrap_or_else(|e| e.into_inner());
        if let Some(members) = groups.get_mut(group) {
            members.remove(&conn_id);
            if members.is_empty() {
                groups.remove(group);
            }
        }
    }

    fn publish(&self, group: &str, envelope: Envelope) -> usize {
        let envelope = Arc::new(envelope);
        let mut delivered = 0;
        let mut dead = Vec::new();

        {
            let groups = self.groups.read().unwrap_or_else(|e| e.into_inner());
            let Some(members) = groups.get(group) else {
                return 0;
            };
            for (conn_id, inbox) in members {
                if inbox.send(envelope.clone()).is_ok() {
                    delivered += 1;
                } else {
                    dead.push(*conn_id);
                }
            }
        }

        // Inboxes whose connection is gone
        for conn_id in dead {
            self.unsubscribe(group, conn_id);
        }

        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn typing(user_id: i64) -> Envelope {
        Envelope::from_server(BusEvent::Chat(ChatEvent::Typing {
            user_id,
            sender_name: String::new(),
            is_typing: true,
        }))
    }

    #[test]
    fn group_names_are_tenant_scoped() {
        assert_ne!(chat_group(5, "general"), chat_group(7, "general"));
        assert_ne!(chat_group(5, "1general"), chat_group(51, "general"));
        assert_ne!(chat_group(5, "3"), call_group(5, 3));
    }

    #[test]
    fn publish_reaches_only_the_group() {
        let bus = LocalBus::new();
        let (a_tx, mut a_rx) = inbox();
        let (b_tx, mut b_rx) = inbox();
        bus.subscribe(&chat_group(5, "general"), Uuid::new_v4(), a_tx);
        bus.subscribe(&chat_group(7, "general"), Uuid::new_v4(), b_tx);

        assert_eq!(bus.publish(&chat_group(5, "general"), typing(1)), 1);
        assert!(a_rx.try_recv().is_ok());
        assert!(b_rx.try_recv().is_err());
    }

    #[test]
    fn unsubscribe_stops_delivery_and_drops_empty_groups() {
        let bus = LocalBus::new();
        let conn = Uuid::new_v4();
        let (tx, mut rx) = inbox();
        bus.subscribe("g", conn, tx);
        bus.unsubscribe("g", conn);
        bus.unsubscribe("g", conn);

        assert_eq!(bus.publish("g", typing(1)), 0);
        assert!(rx.try_recv().is_err());
        assert_eq!(bus.subscriber_count("g"), 0);
    }

    #[test]
    fn closed_inboxes_are_pruned() {
        let bus = LocalBus::new();
        let (tx, rx) = inbox();
        bus.subscribe("g", Uuid::new_v4(), tx);
        drop(rx);

        assert_eq!(bus.publish("g", typing(1)), 0);
        assert_eq!(bus.subscriber_count("g"), 0);
    }
}
