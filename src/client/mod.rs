//! The per-user orchestrator.
//!
//! A [`ChatClient`] owns one transport connection, the local key and plaintext
//! stores, and a [`ConversationStore`] holding everything the UI renders. All
//! methods take `&mut self`; UI actions and transport events are driven from
//! the same task, one after the other.

mod store;
pub use store::*;

use crate::cipher::{CipherEngine, DecodeChain, DecodeInput, DecodeOutcome};
use crate::exchange::{KeyExchange, Readiness};
use crate::relay::{ObjectStore, Relay, SubmitMessage};
use crate::store::{LocalMessageStore, LocalPlaintextRecord, LocalStore};
use crate::transport::{RoomHub, Transport, TransportEvent};
use crate::{
    AttachmentRef, ClientConfig, ConversationId, DeliveryStatus, EncryptionMode, Error,
    KeyManager, KeyPersistence, Message, MessageId, MessageKind, ProvisionedKeys, Transition,
    UserId, Verification,
};
use std::sync::Arc;
use tokio::time::Instant;

/// Something the UI should react to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientUpdate {
    /// A message from the peer was added to the store.
    MessageReceived(MessageId),
    /// A message moved forward in its lifecycle.
    StatusChanged {
        /// The message.
        message_id: MessageId,
        /// Its new status.
        status: DeliveryStatus,
    },
    /// Both keys are published; new messages will be sealed.
    EncryptionReady,
}

struct Session {
    conversation_id: ConversationId,
    peer: UserId,
    keys: ProvisionedKeys,
    engine: CipherEngine,
}

/// One user's view of the messaging core.
pub struct ChatClient<S: LocalStore> {
    user: UserId,
    config: ClientConfig,
    relay: Arc<dyn Relay>,
    objects: Arc<dyn ObjectStore>,
    transport: Transport,
    exchange: KeyExchange,
    keys: KeyManager<S>,
    local: Arc<LocalMessageStore<S>>,
    decoder: DecodeChain,
    session: Option<Session>,
    store: ConversationStore,
    // Updates produced while waiting for the peer's key, handed out by the next poll
    pending: Vec<ClientUpdate>,
}

impl<S: LocalStore> ChatClient<S> {
    /// Connects `user` to the hub and prepares local storage.
    pub async fn connect(
        user: UserId,
        relay: Arc<dyn Relay>,
        objects: Arc<dyn ObjectStore>,
        hub: RoomHub,
        backend: S,
        config: ClientConfig,
    ) -> Self {
        let local = Arc::new(LocalMessageStore::new(backend));
        Self {
            user,
            transport: Transport::connect(hub, user).await,
            exchange: KeyExchange::new(relay.clone(), user),
            keys: KeyManager::new(local.clone()),
            decoder: DecodeChain::new(config.placeholder.clone()),
            relay,
            objects,
            local,
            session: None,
            store: ConversationStore::new(),
            pending: Vec::new(),
            config,
        }
    }

    /// Opens a conversation: provisions keys, publishes them, loads and
    /// decodes history, and acknowledges anything not yet delivered.
    ///
    /// Returns the mode new messages would be sent in right now.
    pub async fn open_conversation(
        &mut self,
        conversation_id: ConversationId,
    ) -> Result<EncryptionMode, Error> {
        let conversation = self.relay.conversation(self.user, conversation_id).await?;
        let peer = conversation
            .participants
            .peer_of(&self.user)
            .ok_or(Error::AuthorizationDenied {
                principal: self.user,
                conversation: conversation_id,
            })?;

        let keys = self.keys.get_or_create_keys(&conversation_id)?;
        // The previous conversation stays open until the key is published
        let announce_ready = self.exchange.publish(conversation_id, &keys.keys).await?;

        let engine = CipherEngine::new(keys.keys.clone(), self.config.protocol_info.clone());
        self.store.dispatch(StoreAction::Open(conversation_id));
        self.pending.clear();
        self.transport.focus(conversation_id);
        self.session = Some(Session {
            conversation_id,
            peer,
            keys,
            engine,
        });

        if announce_ready {
            self.announce(peer, TransportEvent::EncryptionReady { conversation_id })
                .await;
        }

        self.resync(false).await?;

        let mode = self.encryption_mode();
        tracing::info!(
            user = %self.user,
            conversation = %conversation_id,
            mode = ?mode,
            messages = self.store.messages().len(),
            "conversation opened"
        );
        Ok(mode)
    }

    /// Waits up to the configured exchange timeout for the peer's key.
    ///
    /// Returns [`EncryptionMode::Sealed`] once ready. If the deadline passes
    /// the client carries on in [`EncryptionMode::Fallback`].
    pub async fn initialize_encryption(&mut self) -> Result<EncryptionMode, Error> {
        let (conversation_id, _) = self.active_ids()?;

        match self.wait_for_peer_key().await {
            Ok(()) => Ok(EncryptionMode::Sealed),
            Err(Error::ExchangeTimeout(budget)) => {
                tracing::warn!(
                    conversation = %conversation_id,
                    budget = ?budget,
                    "peer key not published in time, messages will not be end-to-end encrypted"
                );
                Ok(EncryptionMode::Fallback)
            }
            Err(err) => Err(err),
        }
    }

    /// Sends a text message.
    pub async fn send_text(&mut self, text: &str) -> Result<MessageId, Error> {
        self.send(text, MessageKind::Text).await
    }

    /// Uploads a blob and sends a reference to it inside the payload.
    pub async fn send_attachment(
        &mut self,
        name: &str,
        media_type: &str,
        bytes: Vec<u8>,
    ) -> Result<MessageId, Error> {
        self.active_ids()?;

        let size = bytes.len() as u64;
        let url = self.objects.put(name, media_type, bytes).await?;
        let attachment = AttachmentRef {
            url,
            name: name.to_string(),
            size,
            media_type: media_type.to_string(),
        };

        let payload = serde_json::to_string(&attachment)?;
        self.send(&payload, MessageKind::File).await
    }

    /// Applies every queued transport event without waiting.
    ///
    /// On error, updates gathered so far stay queued for the next poll.
    pub async fn process_events(&mut self) -> Result<Vec<ClientUpdate>, Error> {
        let mut updates = std::mem::take(&mut self.pending);
        match self.drain_events(&mut updates).await {
            Ok(()) => Ok(updates),
            Err(err) => {
                updates.append(&mut self.pending);
                self.pending = updates;
                Err(err)
            }
        }
    }

    /// Waits for the next transport event and applies it.
    pub async fn next_updates(&mut self) -> Result<Vec<ClientUpdate>, Error> {
        if !self.pending.is_empty() {
            return Ok(std::mem::take(&mut self.pending));
        }

        let event = self.transport.next().await?;
        self.apply_event(event).await
    }

    /// Marks every unread incoming message as read in one batch.
    ///
    /// Returns the ids whose status advanced.
    pub async fn mark_read(&mut self) -> Result<Vec<MessageId>, Error> {
        let (conversation_id, peer) = self.active_ids()?;
        let unread = self.store.incoming_below(&self.user, DeliveryStatus::Read);
        if unread.is_empty() {
            return Ok(Vec::new());
        }

        let advanced = self.relay.mark_read(self.user, unread.clone()).await?;
        self.store
            .dispatch(StoreAction::StatusBatch(unread, DeliveryStatus::Read));

        if !advanced.is_empty() {
            self.announce(
                peer,
                TransportEvent::MessagesRead {
                    conversation_id,
                    message_ids: advanced.clone(),
                },
            )
            .await;
        }
        Ok(advanced)
    }

    /// Drops the real-time connection. Sends still reach the relay.
    pub fn disconnect(&mut self) {
        self.transport.disconnect();
    }

    /// Re-joins the hub and catches up on history and key exchange.
    pub async fn reconnect(&mut self) -> Result<(), Error> {
        self.transport.reconnect().await;
        if self.session.is_some() {
            self.resync(true).await?;
        }
        Ok(())
    }

    /// Discards this conversation's keys and re-opens it with fresh ones.
    ///
    /// Sealed messages addressed to the old key become undecodable.
    pub async fn reset_keys(&mut self) -> Result<EncryptionMode, Error> {
        let (conversation_id, _) = self.active_ids()?;
        self.keys.reset_keys(&conversation_id)?;
        self.open_conversation(conversation_id).await
    }

    /// Who this client acts for.
    pub fn user(&self) -> UserId {
        self.user
    }

    /// Messages of the open conversation in display order.
    pub fn messages(&self) -> &[DisplayMessage] {
        self.store.messages()
    }

    /// The full client state.
    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    /// Last known key-exchange state.
    pub fn readiness(&self) -> &Readiness {
        self.store.readiness()
    }

    /// How a message sent now would be protected.
    pub fn encryption_mode(&self) -> EncryptionMode {
        if self.store.readiness().encryption_ready {
            EncryptionMode::Sealed
        } else {
            EncryptionMode::Fallback
        }
    }

    /// Whether the keys of the open conversation survive a reload.
    pub fn key_persistence(&self) -> Option<KeyPersistence> {
        self.session.as_ref().map(|s| s.keys.persistence)
    }

    /// Fingerprint of the local keys for the open conversation.
    pub fn fingerprint(&self) -> Option<String> {
        self.session.as_ref().map(|s| s.keys.keys.fingerprint())
    }

    /// Whether the transport is up.
    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    async fn send(&mut self, plaintext: &str, kind: MessageKind) -> Result<MessageId, Error> {
        let (conversation_id, peer) = self.active_ids()?;
        let readiness = self.store.readiness();
        let peer_key = readiness
            .peer_public_key
            .filter(|_| readiness.encryption_ready);

        let payload = self
            .active()?
            .engine
            .seal_outgoing(plaintext, peer_key.as_ref())?;
        if payload.mode == EncryptionMode::Fallback {
            tracing::warn!(
                conversation = %conversation_id,
                "sending before key exchange completed, payload is not encrypted"
            );
        }

        let receipt = self
            .relay
            .submit_message(
                self.user,
                SubmitMessage {
                    conversation_id,
                    ciphertext: payload.ciphertext.clone(),
                    content_hash: payload.content_hash.clone(),
                    signature: payload.signature.clone(),
                    kind,
                },
            )
            .await?;

        let record = LocalPlaintextRecord {
            message_id: receipt.message_id,
            conversation_id,
            text: plaintext.to_string(),
            created_at: receipt.timestamp,
        };
        if let Err(err) = self.local.save_plaintext(&record) {
            tracing::warn!(
                message = %receipt.message_id,
                error = %err,
                "could not cache sent plaintext, it will show as a placeholder after reload"
            );
        }

        let message = Message {
            id: receipt.message_id,
            conversation_id,
            sender_id: self.user,
            recipient_id: peer,
            ciphertext: payload.ciphertext,
            signature: payload.signature,
            content_hash: payload.content_hash,
            kind,
            status: receipt.status,
            created_at: receipt.timestamp,
        };
        let outcome = DecodeOutcome {
            text: plaintext.to_string(),
            mode: payload.mode,
            strategy: None,
            verification: match payload.mode {
                EncryptionMode::Sealed => Verification::Verified,
                EncryptionMode::Fallback | EncryptionMode::Undecodable => {
                    Verification::NotApplicable
                }
            },
            hash_matches: true,
        };
        self.store
            .dispatch(StoreAction::Upsert(to_display(&message, outcome)));

        self.announce(peer, TransportEvent::EncryptedMessage { message })
            .await;
        Ok(receipt.message_id)
    }

    async fn drain_events(&mut self, updates: &mut Vec<ClientUpdate>) -> Result<(), Error> {
        while let Some(event) = self.transport.try_next()? {
            updates.extend(self.apply_event(event).await?);
        }
        Ok(())
    }

    /// Pushed events are hints. Content and statuses are taken from the relay,
    /// which authorizes every read.
    async fn apply_event(&mut self, event: TransportEvent) -> Result<Vec<ClientUpdate>, Error> {
        let (conversation_id, peer) = self.active_ids()?;
        if event.conversation_id() != conversation_id {
            tracing::debug!(event = event.kind(), "ignoring event for another conversation");
            return Ok(Vec::new());
        }

        match event {
            TransportEvent::EncryptedMessage { message } => {
                if !self.is_from_peer(&message, conversation_id, peer) {
                    tracing::warn!(
                        message = %message.id,
                        "dropping pushed message with unexpected parties"
                    );
                    return Ok(Vec::new());
                }
                let Some(message) = self.confirm(message.id).await else {
                    return Ok(Vec::new());
                };
                if !self.is_from_peer(&message, conversation_id, peer) {
                    tracing::warn!(
                        message = %message.id,
                        "relay copy does not match the pushed message"
                    );
                    return Ok(Vec::new());
                }

                let display = {
                    let session = self.active()?;
                    self.decode(session, &message)
                };
                let known = self.store.message(&message.id).is_some();
                self.store.dispatch(StoreAction::Upsert(display));

                let mut updates = Vec::new();
                if !known {
                    updates.push(ClientUpdate::MessageReceived(message.id));
                }
                updates.extend(self.acknowledge(message.id).await);
                Ok(updates)
            }
            TransportEvent::MessageDelivered { message_id, .. } => {
                Ok(self.confirm_outgoing(vec![message_id]).await)
            }
            TransportEvent::MessagesRead { message_ids, .. } => {
                Ok(self.confirm_outgoing(message_ids).await)
            }
            TransportEvent::EncryptionReady { .. } => {
                if self.refresh_readiness().await? {
                    Ok(vec![ClientUpdate::EncryptionReady])
                } else {
                    Ok(Vec::new())
                }
            }
        }
    }

    fn is_from_peer(
        &self,
        message: &Message,
        conversation_id: ConversationId,
        peer: UserId,
    ) -> bool {
        message.conversation_id == conversation_id
            && message.sender_id == peer
            && message.recipient_id == self.user
    }

    /// The relay's copy of a pushed message, or `None` if the relay does not
    /// vouch for it.
    async fn confirm(&self, message_id: MessageId) -> Option<Message> {
        match self.relay.message(self.user, message_id).await {
            Ok(message) => Some(message),
            Err(err) => {
                tracing::warn!(
                    message = %message_id,
                    error = %err,
                    "relay did not confirm pushed event"
                );
                None
            }
        }
    }

    /// Status events are only considered for messages this client sent, and
    /// the status applied is the one the relay holds.
    async fn confirm_outgoing(&mut self, message_ids: Vec<MessageId>) -> Vec<ClientUpdate> {
        let mut updates = Vec::new();
        for message_id in message_ids {
            let own = self
                .store
                .message(&message_id)
                .is_some_and(|m| m.sender_id == self.user);
            if !own {
                continue;
            }
            let Some(stored) = self.confirm(message_id).await else {
                continue;
            };

            let status = stored.status;
            updates.extend(
                self.store
                    .dispatch(StoreAction::Status(message_id, status))
                    .into_iter()
                    .map(|message_id| ClientUpdate::StatusChanged { message_id, status }),
            );
        }
        updates
    }

    /// Tells the relay and the peer that an incoming message arrived.
    async fn acknowledge(&mut self, message_id: MessageId) -> Vec<ClientUpdate> {
        let Ok((conversation_id, peer)) = self.active_ids() else {
            return Vec::new();
        };

        let transition = match self.relay.mark_delivered(self.user, message_id).await {
            Ok(transition) => transition,
            Err(err) => {
                tracing::warn!(
                    message = %message_id,
                    error = %err,
                    "delivery acknowledgement failed"
                );
                return Vec::new();
            }
        };

        let status = match transition {
            Transition::Advanced { to, .. } => {
                self.announce(
                    peer,
                    TransportEvent::MessageDelivered {
                        conversation_id,
                        message_id,
                    },
                )
                .await;
                to
            }
            Transition::Unchanged(status) => status,
            Transition::Unknown => return Vec::new(),
        };

        self.store
            .dispatch(StoreAction::Status(message_id, status))
            .into_iter()
            .map(|message_id| ClientUpdate::StatusChanged { message_id, status })
            .collect()
    }

    async fn wait_for_peer_key(&mut self) -> Result<(), Error> {
        let budget = self.config.exchange_timeout;
        let deadline = Instant::now() + budget;

        loop {
            if self.store.readiness().encryption_ready {
                return Ok(());
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::ExchangeTimeout(budget));
            }
            let wait = remaining.min(self.config.readiness_poll_interval);

            match tokio::time::timeout(wait, self.transport.next()).await {
                Ok(Ok(event)) => {
                    let updates = self.apply_event(event).await?;
                    self.pending.extend(updates);
                }
                Ok(Err(_)) => {
                    // Disconnected, so polling is all there is
                    tokio::time::sleep(wait).await;
                    self.poll_readiness().await?;
                }
                Err(_) => self.poll_readiness().await?,
            }
        }
    }

    async fn poll_readiness(&mut self) -> Result<(), Error> {
        if self.refresh_readiness().await? {
            self.pending.push(ClientUpdate::EncryptionReady);
        }
        Ok(())
    }

    /// Re-reads exchange state. Returns whether it just became ready.
    async fn refresh_readiness(&mut self) -> Result<bool, Error> {
        let (conversation_id, _) = self.active_ids()?;
        let readiness = self.exchange.fetch_readiness(conversation_id).await?;
        let became_ready = readiness.encryption_ready && !self.store.readiness().encryption_ready;
        if became_ready {
            tracing::info!(conversation = %conversation_id, "encryption ready");
        }
        self.store.dispatch(StoreAction::Readiness(readiness));
        Ok(became_ready)
    }

    /// Reloads readiness and history, then acknowledges undelivered messages.
    ///
    /// With `report` set, anything new is queued as updates.
    async fn resync(&mut self, report: bool) -> Result<(), Error> {
        let (conversation_id, _) = self.active_ids()?;

        let became_ready = self.refresh_readiness().await?;
        if report && became_ready {
            self.pending.push(ClientUpdate::EncryptionReady);
        }

        let history = self
            .relay
            .messages(self.user, conversation_id, self.config.history_limit)
            .await?;
        let displays: Vec<_> = {
            let session = self.active()?;
            history
                .iter()
                .map(|message| self.decode(session, message))
                .collect()
        };

        for display in displays {
            let id = display.id;
            let status = display.status;
            let incoming = display.sender_id != self.user;
            let known = self.store.message(&id).is_some();
            let advanced = self.store.dispatch(StoreAction::Upsert(display));

            if report && incoming && !known {
                self.pending.push(ClientUpdate::MessageReceived(id));
            }
            if report && !advanced.is_empty() {
                self.pending.push(ClientUpdate::StatusChanged {
                    message_id: id,
                    status,
                });
            }
        }

        for message_id in self
            .store
            .incoming_below(&self.user, DeliveryStatus::Delivered)
        {
            let updates = self.acknowledge(message_id).await;
            if report {
                self.pending.extend(updates);
            }
        }
        Ok(())
    }

    fn decode(&self, session: &Session, message: &Message) -> DisplayMessage {
        let outgoing = message.sender_id == self.user;
        let cached = if outgoing {
            match self.local.load_plaintext(&message.id) {
                Ok(record) => record.map(|record| record.text),
                Err(err) => {
                    tracing::warn!(
                        message = %message.id,
                        error = %err,
                        "plaintext cache unreadable"
                    );
                    None
                }
            }
        } else {
            None
        };

        let own_signing_key = session.keys.keys.signing_key_public();
        let sender_signing_key = if outgoing {
            Some(&own_signing_key)
        } else {
            self.store.readiness().peer_signing_key.as_ref()
        };

        let outcome = self.decoder.decode(
            &session.engine,
            &DecodeInput {
                message,
                cached_plaintext: cached.as_deref(),
                sender_signing_key,
            },
        );
        to_display(message, outcome)
    }

    fn active(&self) -> Result<&Session, Error> {
        self.session
            .as_ref()
            .ok_or_else(|| Error::Protocol("No conversation is open".to_string()))
    }

    fn active_ids(&self) -> Result<(ConversationId, UserId), Error> {
        self.active().map(|s| (s.conversation_id, s.peer))
    }

    async fn announce(&self, to: UserId, event: TransportEvent) {
        match self.transport.emit(&to, &event).await {
            Ok(()) => {}
            Err(Error::TransportDisconnected) => {
                tracing::debug!(event = event.kind(), "offline, push skipped");
            }
            Err(err) => {
                tracing::warn!(event = event.kind(), error = %err, "push failed");
            }
        }
    }
}

fn to_display(message: &Message, outcome: DecodeOutcome) -> DisplayMessage {
    let attachment = match (message.kind, outcome.mode) {
        (_, EncryptionMode::Undecodable) | (MessageKind::Text, _) => None,
        (MessageKind::File, _) => match serde_json::from_str::<AttachmentRef>(&outcome.text) {
            Ok(attachment) => Some(attachment),
            Err(err) => {
                tracing::warn!(
                    message = %message.id,
                    error = %err,
                    "malformed attachment reference"
                );
                None
            }
        },
    };

    DisplayMessage {
        id: message.id,
        sender_id: message.sender_id,
        text: attachment
            .as_ref()
            .map_or(outcome.text, |attachment| attachment.name.clone()),
        kind: message.kind,
        attachment,
        mode: outcome.mode,
        verification: outcome.verification,
        hash_matches: outcome.hash_matches,
        status: message.status,
        created_at: message.created_at,
    }
}
