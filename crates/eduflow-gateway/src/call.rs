//! Call signaling socket for a DM room.
//!
//! Session descriptions and ICE candidates are relayed untouched. Call state
//! lives in storage; each lifecycle change is also written into the room's
//! chat as a system message.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use serde_json::Value;
use tracing::{debug, info, warn};

use eduflow_db::models::CallRow;
use eduflow_types::events::{CallCommand, CallEvent, EndReason};

use crate::ConnectError;
use crate::bus::{BusEvent, ConnectionId, Envelope, Inbox, call_group};
use crate::connection::Session;
use crate::dispatcher::Dispatcher;
use crate::identity::{Identity, UserIdentity};
use crate::translator;

pub struct CallSession {
    dispatcher: Dispatcher,
    conn_id: ConnectionId,
    user: UserIdentity,
    room_id: i64,
    group: String,
    /// Call this connection is part of, until it reaches a terminal state.
    current_call: Mutex<Option<i64>>,
    closed: AtomicBool,
}

impl CallSession {
    /// Join the signaling group of `room_id`. Only room members get in.
    pub async fn join(
        dispatcher: Dispatcher,
        identity: Identity,
        room_id: &str,
        conn_id: ConnectionId,
        inbox: Inbox,
    ) -> Result<Self, ConnectError> {
        let user = identity.into_user()?;
        let room_id: i64 = room_id.parse().map_err(|_| ConnectError::InvalidRoom)?;

        let tenant_id = user.tenant_id;
        let user_id = user.user_id;
        let is_member = dispatcher
            .storage(move |db| db.is_member(tenant_id, room_id, user_id))
            .await
            .map_err(|e| ConnectError::Storage(e.to_string()))?;
        if !is_member {
            return Err(ConnectError::NotMember);
        }

        let group = call_group(tenant_id, room_id);
        dispatcher.join(&group, conn_id, inbox);

        Ok(Self {
            dispatcher,
            conn_id,
            user,
            room_id,
            group,
            current_call: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    pub fn current_call(&self) -> Option<i64> {
        *self.tracked()
    }

    fn tracked(&self) -> MutexGuard<'_, Option<i64>> {
        self.current_call.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Forget `call_id` if it is the tracked call.
    fn release(&self, call_id: i64) {
        let mut tracked = self.tracked();
        if *tracked == Some(call_id) {
            *tracked = None;
        }
    }

    pub async fn handle_command(&self, cmd: CallCommand) {
        match cmd {
            CallCommand::CallOffer { callee_id, sdp } => self.offer(callee_id, sdp).await,
            CallCommand::CallAnswer { call_id, sdp } => self.answer(call_id, sdp).await,
            CallCommand::IceCandidate { candidate } => {
                self.publish(BusEvent::Call(CallEvent::IceCandidate {
                    user_id: self.user.user_id,
                    candidate,
                }));
            }
            CallCommand::CallEnd { call_id } => {
                let call_id = call_id.or_else(|| self.current_call());
                self.end(call_id, EndReason::Ended).await;
            }
            CallCommand::CallReject { call_id } => self.reject(call_id).await,
        }
    }

    async fn offer(&self, callee_id: i64, sdp: Value) {
        let (tenant_id, room_id, caller_id) = (self.user.tenant_id, self.room_id, self.user.user_id);
        let created = self
            .dispatcher
            .storage(move |db| db.create_call(tenant_id, room_id, caller_id, callee_id))
            .await;

        let call = match created {
            Ok(Some(call)) => call,
            Ok(None) => {
                debug!("{} cannot call user {}", self.label(), callee_id);
                return;
            }
            Err(e) => {
                warn!("{} call not created: {}", self.label(), e);
                return;
            }
        };

        info!("{} calling user {} (call {})", self.label(), callee_id, call.id);
        *self.tracked() = Some(call.id);
        self.publish(BusEvent::CallOffer {
            call_id: call.id,
            caller_id,
            caller_name: self.user.full_name.clone(),
            callee_id,
            sdp,
        });
    }

    async fn answer(&self, call_id: i64, sdp: Value) {
        let Some(call) = self
            .transition(call_id, move |db, tenant_id, user_id| db.answer_call(tenant_id, call_id, user_id))
            .await
        else {
            return;
        };

        *self.tracked() = Some(call.id);
        self.publish(BusEvent::Call(CallEvent::CallAnswered {
            call_id,
            answerer_id: self.user.user_id,
            sdp,
        }));
        translator::announce(&self.dispatcher, self.user.tenant_id, &call).await;
    }

    /// End `call_id` if given and notify the group. A refused hang-up stays
    /// quiet; a disconnect is always announced.
    async fn end(&self, call_id: Option<i64>, reason: EndReason) {
        let mut duration = None;
        if let Some(call_id) = call_id {
            self.release(call_id);
            let ended = self
                .transition(call_id, move |db, tenant_id, user_id| db.end_call(tenant_id, call_id, user_id))
                .await;
            match ended {
                Some(call) => {
                    duration = call.duration();
                    translator::announce(&self.dispatcher, self.user.tenant_id, &call).await;
                }
                None if reason != EndReason::Disconnected => return,
                None => {}
            }
        }

        self.publish(BusEvent::Call(CallEvent::CallEnded {
            user_id: self.user.user_id,
            reason,
            call_id,
            duration,
        }));
    }

    async fn reject(&self, call_id: i64) {
        let Some(call) = self
            .transition(call_id, move |db, tenant_id, user_id| db.reject_call(tenant_id, call_id, user_id))
            .await
        else {
            return;
        };

        self.release(call_id);
        translator::announce(&self.dispatcher, self.user.tenant_id, &call).await;
        self.publish(BusEvent::Call(CallEvent::CallRejected {
            user_id: self.user.user_id,
            call_id,
        }));
    }

    /// Run a stored state change for this user. Refusals and failures both
    /// come back as `None`.
    async fn transition<F>(&self, call_id: i64, apply: F) -> Option<CallRow>
    where
        F: FnOnce(&eduflow_db::Database, i64, i64) -> anyhow::Result<Option<CallRow>> + Send + 'static,
    {
        let (tenant_id, user_id) = (self.user.tenant_id, self.user.user_id);
        match self.dispatcher.storage(move |db| apply(db, tenant_id, user_id)).await {
            Ok(Some(call)) => Some(call),
            Ok(None) => {
                debug!("{} transition refused for call {}", self.label(), call_id);
                None
            }
            Err(e) => {
                warn!("{} call {} not updated: {}", self.label(), call_id, e);
                None
            }
        }
    }

    fn publish(&self, event: BusEvent) {
        self.dispatcher
            .publish(&self.group, Envelope::from_connection(self.conn_id, event));
    }
}

impl Session for CallSession {
    type Outbound = CallEvent;

    async fn handle_text(&self, text: &str) {
        match serde_json::from_str::<CallCommand>(text) {
            Ok(cmd) => self.handle_command(cmd).await,
            Err(e) => debug!("{} ignored frame: {}", self.label(), e),
        }
    }

    fn render(&self, envelope: &Envelope) -> Option<CallEvent> {
        if envelope.origin == Some(self.conn_id) {
            return None;
        }

        match &envelope.event {
            BusEvent::CallOffer {
                call_id,
                caller_id,
                caller_name,
                callee_id,
                sdp,
            } => {
                if *callee_id != self.user.user_id {
                    return None;
                }
                *self.tracked() = Some(*call_id);
                Some(CallEvent::IncomingCall {
                    call_id: *call_id,
                    caller_id: *caller_id,
                    caller_name: caller_name.clone(),
                    sdp: sdp.clone(),
                })
            }
            BusEvent::Call(event) => {
                match event {
                    CallEvent::CallEnded {
                        call_id: Some(call_id), ..
                    }
                    | CallEvent::CallRejected { call_id, .. } => self.release(*call_id),
                    // Picked up on another device of this user
                    CallEvent::CallAnswered {
                        call_id, answerer_id, ..
                    } if *answerer_id == self.user.user_id => self.release(*call_id),
                    _ => {}
                }
                Some(event.clone())
            }
            BusEvent::Chat(_) => None,
        }
    }

    async fn leave(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.dispatcher.leave(&self.group, self.conn_id);
        let call_id = self.current_call();
        self.end(call_id, EndReason::Disconnected).await;
    }

    fn label(&self) -> String {
        format!(
            "call user {} (tenant {}) in room {}",
            self.user.user_id, self.user.tenant_id, self.room_id
        )
    }
}
