//! Real-time channel between clients.
//!
//! One [`Transport`] per client session. Connecting joins the room named by
//! the user's id; peers address each other by user id. Delivery is
//! best-effort while connected and nothing is replayed after a reconnect.

mod events;
pub use events::*;
mod hub;
pub use hub::*;

use crate::{ConversationId, Error, UserId};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::mpsc::error::TryRecvError;

/// A client's connection to the [`RoomHub`].
pub struct Transport {
    hub: RoomHub,
    user: UserId,
    inbox: Option<UnboundedReceiver<String>>,
    focus: Option<ConversationId>,
}

impl Transport {
    /// Connects `user` and joins their room.
    pub async fn connect(hub: RoomHub, user: UserId) -> Self {
        let inbox = hub.join(user).await;
        tracing::debug!(user = %user, "transport connected");
        Self {
            hub,
            user,
            inbox: Some(inbox),
            focus: None,
        }
    }

    /// The user this connection belongs to.
    pub fn user(&self) -> UserId {
        self.user
    }

    /// Whether the connection is up.
    pub fn is_connected(&self) -> bool {
        self.inbox.is_some()
    }

    /// The conversation currently receiving events.
    pub fn focused(&self) -> Option<ConversationId> {
        self.focus
    }

    /// Switches interest to `conversation_id`. The connection stays up.
    pub fn focus(&mut self, conversation_id: ConversationId) {
        if self.focus.replace(conversation_id) != Some(conversation_id) {
            tracing::debug!(user = %self.user, conversation = %conversation_id, "focus changed");
        }
    }

    /// Drops interest in every conversation.
    pub fn unfocus(&mut self) {
        self.focus = None;
    }

    /// Pushes an event to `to`'s room.
    ///
    /// Fails with [`Error::TransportDisconnected`] while disconnected. A peer
    /// that is offline is not an error; the event is simply lost.
    pub async fn emit(&self, to: &UserId, event: &TransportEvent) -> Result<(), Error> {
        if !self.is_connected() {
            return Err(Error::TransportDisconnected);
        }

        let frame = event.to_frame()?;
        let delivered = self.hub.send_to(to, frame).await;
        tracing::debug!(
            from = %self.user,
            to = %to,
            event = event.kind(),
            connections = delivered,
            "event emitted"
        );
        Ok(())
    }

    /// Returns the next queued event for the focused conversation, if any.
    ///
    /// Events for other conversations and malformed frames are dropped.
    pub fn try_next(&mut self) -> Result<Option<TransportEvent>, Error> {
        loop {
            let inbox = self.inbox.as_mut().ok_or(Error::TransportDisconnected)?;
            let frame = match inbox.try_recv() {
                Ok(frame) => frame,
                Err(TryRecvError::Empty) => return Ok(None),
                Err(TryRecvError::Disconnected) => {
                    self.inbox = None;
                    return Err(Error::TransportDisconnected);
                }
            };

            if let Some(event) = self.accept(&frame) {
                return Ok(Some(event));
            }
        }
    }

    /// Waits for the next event for the focused conversation.
    pub async fn next(&mut self) -> Result<TransportEvent, Error> {
        loop {
            let inbox = self.inbox.as_mut().ok_or(Error::TransportDisconnected)?;
            let Some(frame) = inbox.recv().await else {
                self.inbox = None;
                return Err(Error::TransportDisconnected);
            };

            if let Some(event) = self.accept(&frame) {
                return Ok(event);
            }
        }
    }

    /// Closes the connection. Queued events are discarded.
    pub fn disconnect(&mut self) {
        if self.inbox.take().is_some() {
            tracing::info!(user = %self.user, "transport disconnected");
        }
    }

    /// Re-joins the user's room. Events sent while disconnected are not replayed.
    pub async fn reconnect(&mut self) {
        self.disconnect();
        self.inbox = Some(self.hub.join(self.user).await);
        tracing::info!(user = %self.user, "transport reconnected");
    }

    fn accept(&self, frame: &str) -> Option<TransportEvent> {
        let event = match TransportEvent::from_frame(frame) {
            Ok(event) => event,
            Err(err) => {
                tracing::warn!(user = %self.user, error = %err, "skipping malformed frame");
                return None;
            }
        };

        let conversation_id = event.conversation_id();
        if self.focus != Some(conversation_id) {
            tracing::debug!(
                user = %self.user,
                conversation = %conversation_id,
                event = event.kind(),
                "dropping event for unfocused conversation"
            );
            return None;
        }

        Some(event)
    }
}
