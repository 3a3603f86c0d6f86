//! Chat socket: one room per connection.
//!
//! `join` takes the socket from connecting to joined; `handle_text` runs the
//! event loop one frame at a time; `leave` closes it. A message is only
//! broadcast after it has been stored.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info, warn};

use eduflow_db::models::NewMessage;
use eduflow_types::events::{ChatCommand, ChatEvent, PresenceStatus};

use crate::ConnectError;
use crate::bus::{BusEvent, ConnectionId, Envelope, Inbox, chat_group, presence_group};
use crate::connection::Session;
use crate::dispatcher::Dispatcher;
use crate::identity::{Identity, UserIdentity};

pub struct ChatSession {
    dispatcher: Dispatcher,
    conn_id: ConnectionId,
    user: UserIdentity,
    room_name: String,
    /// Stored room id, when the room name is numeric.
    room_id: Option<i64>,
    room_group: String,
    presence_group: String,
    closed: AtomicBool,
}

impl ChatSession {
    /// Join a chat room. Returns the session and the online-members snapshot
    /// to send first.
    pub async fn join(
        dispatcher: Dispatcher,
        identity: Identity,
        room_name: &str,
        conn_id: ConnectionId,
        inbox: Inbox,
    ) -> Result<(Self, ChatEvent), ConnectError> {
        let user = identity.into_user()?;
        let tenant_id = user.tenant_id;
        let user_id = user.user_id;
        let room_id: Option<i64> = room_name.parse().ok();

        // A stored room of this tenant is open to its members only
        if let Some(room_id) = room_id {
            let allowed = dispatcher
                .storage(move |db| {
                    Ok(match db.get_room(tenant_id, room_id)? {
                        Some(_) => db.is_member(tenant_id, room_id, user_id)?,
                        None => true,
                    })
                })
                .await
                .map_err(|e| ConnectError::Storage(e.to_string()))?;
            if !allowed {
                return Err(ConnectError::NotMember);
            }
        }

        let session = Self {
            room_id,
            room_group: match room_id {
                Some(id) => chat_group(tenant_id, &id.to_string()),
                None => chat_group(tenant_id, room_name),
            },
            presence_group: presence_group(tenant_id),
            room_name: room_name.to_string(),
            dispatcher,
            conn_id,
            user,
            closed: AtomicBool::new(false),
        };

        session.dispatcher.join(&session.room_group, conn_id, inbox.clone());
        session.dispatcher.join(&session.presence_group, conn_id, inbox);

        if session.dispatcher.presence().add(tenant_id, user_id, conn_id).await {
            session.publish_presence(PresenceStatus::Online);
        }

        let member_ids = match session.room_id {
            Some(room_id) => {
                let touched = session
                    .dispatcher
                    .storage(move |db| {
                        db.touch_last_read(tenant_id, room_id, user_id)?;
                        db.member_ids(tenant_id, room_id)
                    })
                    .await;
                touched.unwrap_or_else(|e| {
                    warn!("{} could not load room {}: {}", session.label(), room_id, e);
                    Vec::new()
                })
            }
            None => Vec::new(),
        };

        let online = session
            .dispatcher
            .presence()
            .online_members_of(&member_ids, tenant_id)
            .await;
        let snapshot = ChatEvent::OnlineMembers {
            user_ids: online.into_iter().collect(),
        };

        Ok((session, snapshot))
    }

    pub fn user(&self) -> &UserIdentity {
        &self.user
    }

    pub async fn handle_command(&self, cmd: ChatCommand) {
        match cmd {
            ChatCommand::ChatMessage {
                message,
                file_url,
                file_type,
            } => self.post_message(message, file_url, file_type).await,

            ChatCommand::Typing { is_typing } => {
                self.publish_room(ChatEvent::Typing {
                    user_id: self.user.user_id,
                    sender_name: self.user.full_name.clone(),
                    is_typing,
                });
            }

            ChatCommand::ReadReceipt { message_id } => self.read_receipt(message_id).await,
        }
    }

    async fn post_message(&self, message: String, file_url: Option<String>, file_type: Option<String>) {
        if message.trim().is_empty() {
            debug!("{} sent an empty message, ignoring", self.label());
            return;
        }
        let Some(room_id) = self.room_id else {
            debug!("{} posted to unstored room '{}'", self.label(), self.room_name);
            return;
        };

        let tenant_id = self.user.tenant_id;
        let sender_id = self.user.user_id;
        let sender_name = self.user.full_name.clone();
        let stored = self
            .dispatcher
            .storage(move |db| {
                db.insert_message(
                    tenant_id,
                    &NewMessage {
                        room_id,
                        sender_id,
                        sender_name: &sender_name,
                        content: &message,
                        file_url: file_url.as_deref(),
                        file_type: file_type.as_deref(),
                        is_system_message: false,
                    },
                )
            })
            .await;

        match stored {
            Ok(Some(row)) => {
                self.publish_room(ChatEvent::ChatMessage {
                    id: row.id,
                    message: row.content,
                    user_id: row.sender_id,
                    sender_name: row.sender_name,
                    timestamp: row.created_at,
                    is_system_message: false,
                    file_url: row.file_url,
                    file_type: row.file_type,
                });
            }
            Ok(None) => debug!("{} cannot post to room {}", self.label(), room_id),
            Err(e) => warn!("{} message not stored: {}", self.label(), e),
        }
    }

    async fn read_receipt(&self, message_id: i64) {
        let Some(room_id) = self.room_id else {
            return;
        };

        let tenant_id = self.user.tenant_id;
        let user_id = self.user.user_id;
        let marked = self
            .dispatcher
            .storage(move |db| {
                let marked = db.mark_message_read(tenant_id, room_id, message_id)?;
                if marked {
                    db.touch_last_read(tenant_id, room_id, user_id)?;
                }
                Ok(marked)
            })
            .await;

        match marked {
            Ok(true) => self.publish_room(ChatEvent::ReadReceipt { message_id, user_id }),
            Ok(false) => debug!("{} read receipt for foreign message {}", self.label(), message_id),
            Err(e) => warn!("{} read receipt not stored: {}", self.label(), e),
        }
    }

    fn publish_room(&self, event: ChatEvent) {
        self.dispatcher.publish(
            &self.room_group,
            Envelope::from_connection(self.conn_id, BusEvent::Chat(event)),
        );
    }

    fn publish_presence(&self, status: PresenceStatus) {
        info!("{} is now {:?}", self.label(), status);
        self.dispatcher.publish(
            &self.presence_group,
            Envelope::from_connection(
                self.conn_id,
                BusEvent::Chat(ChatEvent::Presence {
                    user_id: self.user.user_id,
                    status,
                }),
            ),
        );
    }
}

impl Session for ChatSession {
    type Outbound = ChatEvent;

    async fn handle_text(&self, text: &str) {
        match ChatCommand::parse(text) {
            Ok(cmd) => self.handle_command(cmd).await,
            // Unknown or malformed frames are dropped so newer clients keep working
            Err(e) => debug!(
                "{} ignored frame: {} -- raw: {}",
                self.label(),
                e,
                text.chars().take(200).collect::<String>()
            ),
        }
    }

    fn render(&self, envelope: &Envelope) -> Option<ChatEvent> {
        let BusEvent::Chat(event) = &envelope.event else {
            return None;
        };
        let own = envelope.origin == Some(self.conn_id);
        match event {
            ChatEvent::Typing { .. } | ChatEvent::ReadReceipt { .. } if own => None,
            _ => Some(event.clone()),
        }
    }

    async fn leave(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.dispatcher.leave(&self.room_group, self.conn_id);
        self.dispatcher.leave(&self.presence_group, self.conn_id);

        if self
            .dispatcher
            .presence()
            .remove(self.user.tenant_id, self.user.user_id, self.conn_id)
            .await
        {
            self.publish_presence(PresenceStatus::Offline);
        }
    }

    fn label(&self) -> String {
        format!(
            "chat user {} (tenant {}) in '{}'",
            self.user.user_id, self.user.tenant_id, self.room_name
        )
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::bus::{InboxReceiver, inbox};
    use crate::identity::AuthError;
    use eduflow_db::Database;

    pub fn user(user_id: i64, tenant_id: i64) -> Identity {
        Identity::Authenticated(UserIdentity {
            user_id,
            tenant_id,
            role: "student".into(),
            full_name: format!("User {}", user_id),
        })
    }

    pub struct Client {
        pub session: ChatSession,
        pub rx: InboxReceiver,
    }

    impl Client {
        pub async fn join(dispatcher: &Dispatcher, identity: Identity, room: &str) -> (Self, ChatEvent) {
            let (tx, rx) = inbox();
            let (session, snapshot) =
                ChatSession::join(dispatcher.clone(), identity, room, Dispatcher::new_connection_id(), tx)
                    .await
                    .unwrap();
            (Self { session, rx }, snapshot)
        }

        pub async fn send(&self, frame: &str) {
            self.session.handle_text(frame).await;
        }

        /// Events this socket would have written so far.
        pub fn drain(&mut self) -> Vec<ChatEvent> {
            let mut out = Vec::new();
            while let Ok(envelope) = self.rx.try_recv() {
                if let Some(event) = self.session.render(&envelope) {
                    out.push(event);
                }
            }
            out
        }
    }

    fn presence_events(events: &[ChatEvent], status: PresenceStatus) -> usize {
        events
            .iter()
            .filter(|e| matches!(e, ChatEvent::Presence { status: s, .. } if *s == status))
            .count()
    }

    fn setup() -> (Dispatcher, i64) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let room = db.get_or_create_course_room(5, 1, "general").unwrap();
        for user_id in [1, 2] {
            db.add_member(room.id, user_id).unwrap();
        }
        (Dispatcher::new(db), room.id)
    }

    #[tokio::test]
    async fn anonymous_identity_is_refused() {
        let (dispatcher, room_id) = setup();
        let (tx, _rx) = inbox();
        let result = ChatSession::join(
            dispatcher,
            Identity::Anonymous(AuthError::Expired),
            &room_id.to_string(),
            Dispatcher::new_connection_id(),
            tx,
        )
        .await;

        let err = result.err().unwrap();
        assert_eq!(err.close_code(), 4001);
        assert_eq!(err.to_string(), "Token expired");
    }

    #[tokio::test]
    async fn message_reaches_room_but_not_other_tenant() {
        let (dispatcher, room_id) = setup();
        let room = room_id.to_string();
        let (mut u1, _) = Client::join(&dispatcher, user(1, 5), &room).await;
        let (mut u2, _) = Client::join(&dispatcher, user(2, 5), &room).await;
        let (mut outsider, _) = Client::join(&dispatcher, user(3, 7), &room).await;
        u1.drain();
        u2.drain();
        outsider.drain();

        u1.send(r#"{"type":"chat_message","message":"hi"}"#).await;

        for events in [u1.drain(), u2.drain()] {
            assert_eq!(events.len(), 1);
            match &events[0] {
                ChatEvent::ChatMessage {
                    message, user_id, sender_name, ..
                } => {
                    assert_eq!(message, "hi");
                    assert_eq!(*user_id, 1);
                    assert_eq!(sender_name, "User 1");
                }
                other => panic!("unexpected event {:?}", other),
            }
        }
        assert!(outsider.drain().is_empty());
    }

    #[tokio::test]
    async fn foreign_tenant_cannot_write_into_room() {
        let (dispatcher, room_id) = setup();
        let room = room_id.to_string();
        let (mut member, _) = Client::join(&dispatcher, user(1, 5), &room).await;
        let (mut outsider, _) = Client::join(&dispatcher, user(3, 7), &room).await;
        member.drain();
        outsider.drain();

        outsider.send(r#"{"type":"chat_message","message":"sneaky"}"#).await;

        assert!(outsider.drain().is_empty());
        assert!(member.drain().is_empty());
        let stored = dispatcher.storage(move |db| db.list_messages(5, room_id, 50, None)).await.unwrap();
        assert!(stored.is_empty());
    }

    #[tokio::test]
    async fn empty_and_unknown_frames_are_ignored() {
        let (dispatcher, room_id) = setup();
        let (mut u1, _) = Client::join(&dispatcher, user(1, 5), &room_id.to_string()).await;
        u1.drain();

        u1.send(r#"{"type":"chat_message","message":"   "}"#).await;
        u1.send(r#"{"type":"wave"}"#).await;
        u1.send("{not json").await;

        assert!(u1.drain().is_empty());
    }

    #[tokio::test]
    async fn typing_skips_the_sender() {
        let (dispatcher, room_id) = setup();
        let room = room_id.to_string();
        let (mut u1, _) = Client::join(&dispatcher, user(1, 5), &room).await;
        let (mut u2, _) = Client::join(&dispatcher, user(2, 5), &room).await;
        u1.drain();
        u2.drain();

        u1.send(r#"{"type":"typing","is_typing":true}"#).await;

        assert!(u1.drain().is_empty());
        assert_eq!(
            u2.drain(),
            vec![ChatEvent::Typing {
                user_id: 1,
                sender_name: "User 1".into(),
                is_typing: true,
            }]
        );
    }

    #[tokio::test]
    async fn read_receipt_marks_and_notifies_others() {
        let (dispatcher, room_id) = setup();
        let room = room_id.to_string();
        let (mut u1, _) = Client::join(&dispatcher, user(1, 5), &room).await;
        let (mut u2, _) = Client::join(&dispatcher, user(2, 5), &room).await;
        u1.send(r#"{"type":"chat_message","message":"read me"}"#).await;
        u1.drain();
        u2.drain();

        let msg_id = dispatcher
            .storage(move |db| db.list_messages(5, room_id, 1, None))
            .await
            .unwrap()[0]
            .id;
        u2.send(&format!(r#"{{"type":"read_receipt","message_id":{}}}"#, msg_id)).await;

        assert!(u2.drain().is_empty());
        assert_eq!(u1.drain(), vec![ChatEvent::ReadReceipt { message_id: msg_id, user_id: 2 }]);
        let stored = dispatcher.storage(move |db| db.list_messages(5, room_id, 1, None)).await.unwrap();
        assert!(stored[0].is_read);
    }

    #[tokio::test]
    async fn read_receipt_for_other_tenant_message_is_a_no_op() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let ours = db.get_or_create_course_room(5, 1, "general").unwrap();
        let theirs = db.get_or_create_course_room(7, 1, "general").unwrap();
        db.add_member(theirs.id, 30).unwrap();
        let foreign = db
            .insert_message(
                7,
                &NewMessage {
                    room_id: theirs.id,
                    sender_id: 30,
                    sender_name: "User 30",
                    content: "private",
                    file_url: None,
                    file_type: None,
                    is_system_message: false,
                },
            )
            .unwrap()
            .unwrap();
        let dispatcher = Dispatcher::new(db.clone());

        let room = ours.id.to_string();
        let (mut u1, _) = Client::join(&dispatcher, user(1, 5), &room).await;
        let (mut u2, _) = Client::join(&dispatcher, user(2, 5), &room).await;
        u1.drain();
        u2.drain();

        u1.send(&format!(r#"{{"type":"read_receipt","message_id":{}}}"#, foreign.id)).await;

        assert!(u1.drain().is_empty());
        assert!(u2.drain().is_empty());
        assert!(!db.list_messages(7, theirs.id, 1, None).unwrap()[0].is_read);

        // Connection still usable
        u1.send(r#"{"type":"chat_message","message":"still here"}"#).await;
        assert_eq!(u2.drain().len(), 1);
    }

    #[tokio::test]
    async fn presence_online_and_offline_fire_once_per_user() {
        let (dispatcher, room_id) = setup();
        let room = room_id.to_string();
        let (mut watcher, _) = Client::join(&dispatcher, user(2, 5), &room).await;
        watcher.drain();

        let (first, _) = Client::join(&dispatcher, user(1, 5), &room).await;
        let (second, snapshot) = Client::join(&dispatcher, user(1, 5), &room).await;
        assert_eq!(snapshot, ChatEvent::OnlineMembers { user_ids: vec![1, 2] });

        first.session.leave().await;
        let events = watcher.drain();
        assert_eq!(presence_events(&events, PresenceStatus::Online), 1);
        assert_eq!(presence_events(&events, PresenceStatus::Offline), 0);

        second.session.leave().await;
        second.session.leave().await;
        let events = watcher.drain();
        assert_eq!(presence_events(&events, PresenceStatus::Offline), 1);
        assert_eq!(events[0], ChatEvent::Presence { user_id: 1, status: PresenceStatus::Offline });
    }

    #[tokio::test]
    async fn joining_advances_read_marker() {
        let (dispatcher, room_id) = setup();
        let before = dispatcher.storage(|db| db.rooms_for_user(5, 1)).await.unwrap();
        assert!(before[0].last_read_at.is_none());

        Client::join(&dispatcher, user(1, 5), &room_id.to_string()).await;

        let after = dispatcher.storage(|db| db.rooms_for_user(5, 1)).await.unwrap();
        assert_eq!(after[0].room.id, room_id);
        assert!(after[0].last_read_at.is_some());
    }

    #[tokio::test]
    async fn tenant_member_outside_the_room_is_refused() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let dm = db.get_or_create_dm_room(5, 1, 2).unwrap();
        let dispatcher = Dispatcher::new(db.clone());
        let (mut u2, _) = Client::join(&dispatcher, user(2, 5), &dm.id.to_string()).await;
        u2.drain();

        let (tx, _rx) = inbox();
        let result = ChatSession::join(
            dispatcher.clone(),
            user(3, 5),
            &dm.id.to_string(),
            Dispatcher::new_connection_id(),
            tx,
        )
        .await;
        assert_eq!(result.err().unwrap().close_code(), 4003);

        // Refused before subscribing or going online
        assert!(u2.drain().is_empty());
        assert!(db.list_messages(5, dm.id, 50, None).unwrap().is_empty());
    }

    #[tokio::test]
    async fn padded_room_number_shares_the_room_group() {
        let (dispatcher, room_id) = setup();
        let (mut plain, _) = Client::join(&dispatcher, user(1, 5), &room_id.to_string()).await;
        let (padded, _) = Client::join(&dispatcher, user(2, 5), &format!("0{}", room_id)).await;
        plain.drain();

        padded.send(r#"{"type":"chat_message","message":"same room"}"#).await;

        match plain.drain().as_slice() {
            [ChatEvent::ChatMessage { message, user_id: 2, .. }] => assert_eq!(message, "same room"),
            other => panic!("unexpected events {:?}", other),
        }
    }

    #[tokio::test]
    async fn non_numeric_room_still_relays_ephemeral_events() {
        let (dispatcher, _) = setup();
        let (mut u1, snapshot) = Client::join(&dispatcher, user(1, 5), "lobby").await;
        let (mut u2, _) = Client::join(&dispatcher, user(2, 5), "lobby").await;
        assert_eq!(snapshot, ChatEvent::OnlineMembers { user_ids: vec![] });
        u1.drain();
        u2.drain();

        u1.send(r#"{"type":"chat_message","message":"hi"}"#).await;
        u1.send(r#"{"type":"typing"}"#).await;

        assert_eq!(u2.drain().len(), 1, "typing only; nothing stored");
    }
}
