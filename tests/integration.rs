#[cfg(test)]
mod integration_tests {
    use hushpost::store::{FileStore, MemoryStore};
    use async_trait::async_trait;
    use hushpost::{
        ChatClient, CipherEngine, ClientConfig, ClientUpdate, Conversation, ConversationId,
        DeliveryStatus, EncryptionMode, Error, ExchangeKeysRequest, ExchangeKeysResponse,
        KeyPersistence, MemoryObjectStore, MemoryRelay, Message, MessageId, MessageKind,
        MessageSignature, ParticipantDirectory, Participants, Relay, RelayConfig, RoomHub,
        SubmitMessage, SubmitReceipt, Transition, Transport, TransportEvent, UserId,
        Verification,
    };
    use std::sync::Arc;
    use std::time::Duration;

    struct World {
        relay: Arc<MemoryRelay>,
        objects: Arc<MemoryObjectStore>,
        hub: RoomHub,
        conversation: Conversation,
        alice: UserId,
        bob: UserId,
    }

    fn config() -> ClientConfig {
        ClientConfig {
            exchange_timeout: Duration::from_millis(200),
            readiness_poll_interval: Duration::from_millis(20),
            ..ClientConfig::default()
        }
    }

    async fn world() -> World {
        let directory = Arc::new(ParticipantDirectory::new());
        let hub = RoomHub::new();
        let relay = Arc::new(MemoryRelay::new(
            directory.clone(),
            hub.clone(),
            RelayConfig::default(),
        ));
        let alice = UserId::new();
        let bob = UserId::new();
        let participants = Participants {
            party_a: alice,
            party_b: bob,
        };
        let conversation = relay
            .open_conversation("job-1138", participants)
            .await
            .unwrap();
        directory.register(conversation.id, participants).await;

        World {
            relay,
            objects: Arc::new(MemoryObjectStore::new()),
            hub,
            conversation,
            alice,
            bob,
        }
    }

    async fn client<S: hushpost::store::LocalStore>(
        world: &World,
        user: UserId,
        backend: S,
    ) -> ChatClient<S> {
        ChatClient::connect(
            user,
            world.relay.clone(),
            world.objects.clone(),
            world.hub.clone(),
            backend,
            config(),
        )
        .await
    }

    #[tokio::test]
    async fn test_full_conversation_flow() {
        let w = world().await;
        let id = w.conversation.id;

        println!("Step 1: Alice opens the conversation alone...");
        let mut alice = client(&w, w.alice, MemoryStore::new()).await;
        assert_eq!(alice.open_conversation(id).await.unwrap(), EncryptionMode::Fallback);
        assert_eq!(alice.key_persistence(), Some(KeyPersistence::Persisted));

        println!("Step 2: Alice gives up waiting and sends in fallback mode...");
        assert_eq!(
            alice.initialize_encryption().await.unwrap(),
            EncryptionMode::Fallback
        );
        let hello = alice.send_text("hello").await.unwrap();
        assert_eq!(alice.messages()[0].mode, EncryptionMode::Fallback);
        assert_eq!(alice.store().status(&hello), Some(DeliveryStatus::Sent));

        println!("Step 3: Bob joins, publishes and reads history...");
        let mut bob = client(&w, w.bob, MemoryStore::new()).await;
        assert_eq!(bob.open_conversation(id).await.unwrap(), EncryptionMode::Sealed);
        let received = &bob.messages()[0];
        assert_eq!(received.text, "hello");
        assert_eq!(received.mode, EncryptionMode::Fallback);
        assert_eq!(received.verification, Verification::NotApplicable);
        assert_eq!(received.status, DeliveryStatus::Delivered);

        println!("Step 4: Alice learns about readiness and the delivery...");
        let updates = alice.process_events().await.unwrap();
        assert!(updates.contains(&ClientUpdate::EncryptionReady));
        assert!(updates.contains(&ClientUpdate::StatusChanged {
            message_id: hello,
            status: DeliveryStatus::Delivered,
        }));
        assert_eq!(alice.encryption_mode(), EncryptionMode::Sealed);

        println!("Step 5: Alice sends a sealed message...");
        let secret = alice.send_text("secret").await.unwrap();
        assert_eq!(alice.store().status(&secret), Some(DeliveryStatus::Delivered));

        let stored = w.relay.messages(w.alice, id, 10).await.unwrap();
        let sealed = stored.iter().find(|m| m.id == secret).unwrap();
        assert!(!sealed.is_fallback());
        assert!(!sealed.ciphertext.contains("secret"));

        println!("Step 6: Only Bob can open it...");
        let updates = bob.process_events().await.unwrap();
        assert_eq!(updates, vec![ClientUpdate::MessageReceived(secret)]);
        let opened = bob.store().message(&secret).unwrap();
        assert_eq!(opened.text, "secret");
        assert_eq!(opened.mode, EncryptionMode::Sealed);
        assert_eq!(opened.verification, Verification::Verified);
        assert!(opened.hash_matches);

        // An eavesdropper with its own keys gets the placeholder
        let mallory_keys = hushpost::ConversationKeys::generate().unwrap();
        let mallory =
            hushpost::CipherEngine::new(Arc::new(mallory_keys), b"Hushpost-E2E-v1".to_vec());
        assert!(matches!(
            mallory.decrypt(&sealed.ciphertext),
            Err(Error::DecryptionFailed(_))
        ));

        println!("Step 7: Bob reads both...");
        let read = bob.mark_read().await.unwrap();
        assert_eq!(read.len(), 2);
        assert!(bob.mark_read().await.unwrap().is_empty());

        println!("Step 8: Alice sees both as read...");
        let updates = alice.process_events().await.unwrap();
        assert_eq!(updates.len(), 2);
        assert!(alice
            .messages()
            .iter()
            .all(|m| m.status == DeliveryStatus::Read));
    }

    #[tokio::test]
    async fn test_initialize_waits_for_peer() {
        let w = world().await;
        let id = w.conversation.id;
        let mut alice = client(&w, w.alice, MemoryStore::new()).await;
        let mut bob = client(&w, w.bob, MemoryStore::new()).await;
        alice.open_conversation(id).await.unwrap();

        let (mode, opened) = tokio::join!(alice.initialize_encryption(), async {
            tokio::time::sleep(Duration::from_millis(30)).await;
            bob.open_conversation(id).await
        });

        assert_eq!(mode.unwrap(), EncryptionMode::Sealed);
        assert_eq!(opened.unwrap(), EncryptionMode::Sealed);
        assert_eq!(
            alice.process_events().await.unwrap(),
            vec![ClientUpdate::EncryptionReady]
        );
    }

    #[tokio::test]
    async fn test_reload_keeps_keys_and_own_plaintext() {
        let w = world().await;
        let id = w.conversation.id;
        let dir = tempfile::tempdir().unwrap();

        let mut bob = client(&w, w.bob, MemoryStore::new()).await;
        bob.open_conversation(id).await.unwrap();

        let (fingerprint, sent) = {
            let mut alice = client(&w, w.alice, FileStore::open(dir.path()).unwrap()).await;
            alice.open_conversation(id).await.unwrap();
            let sent = alice.send_text("quote attached").await.unwrap();
            (alice.fingerprint().unwrap(), sent)
        };

        // Page reload: new client, same directory
        let mut alice = client(&w, w.alice, FileStore::open(dir.path()).unwrap()).await;
        assert_eq!(alice.open_conversation(id).await.unwrap(), EncryptionMode::Sealed);
        assert_eq!(alice.fingerprint().unwrap(), fingerprint);

        let own = alice.store().message(&sent).unwrap();
        assert_eq!(own.text, "quote attached");
        assert_eq!(own.mode, EncryptionMode::Sealed);
        assert_eq!(own.verification, Verification::Verified);

        bob.process_events().await.unwrap();
        assert_eq!(bob.store().message(&sent).unwrap().text, "quote attached");
    }

    #[tokio::test]
    async fn test_cleared_storage_shows_placeholder() {
        let w = world().await;
        let id = w.conversation.id;
        let backend = MemoryStore::new();

        let mut bob = client(&w, w.bob, MemoryStore::new()).await;
        bob.open_conversation(id).await.unwrap();
        let mut alice = client(&w, w.alice, backend.clone()).await;
        alice.open_conversation(id).await.unwrap();
        let sent = alice.send_text("secret").await.unwrap();
        drop(alice);

        backend.clear().unwrap();
        let mut alice = client(&w, w.alice, backend).await;
        alice.open_conversation(id).await.unwrap();

        let own = alice.store().message(&sent).unwrap();
        assert_eq!(own.text, ClientConfig::default().placeholder);
        assert_eq!(own.mode, EncryptionMode::Undecodable);
    }

    #[tokio::test]
    async fn test_outsider_cannot_open() {
        let w = world().await;
        let mut mallory = client(&w, UserId::new(), MemoryStore::new()).await;

        assert!(matches!(
            mallory.open_conversation(w.conversation.id).await,
            Err(Error::AuthorizationDenied { .. })
        ));
        assert!(matches!(
            mallory.send_text("hi").await,
            Err(Error::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_offline_send_and_reconnect_resync() {
        let w = world().await;
        let id = w.conversation.id;
        let mut alice = client(&w, w.alice, MemoryStore::new()).await;
        let mut bob = client(&w, w.bob, MemoryStore::new()).await;
        alice.open_conversation(id).await.unwrap();
        bob.open_conversation(id).await.unwrap();
        alice.process_events().await.unwrap();

        bob.disconnect();
        assert!(matches!(
            bob.process_events().await,
            Err(Error::TransportDisconnected)
        ));

        // Sends are never blocked by a missing connection
        alice.disconnect();
        let missed = alice.send_text("while you were away").await.unwrap();
        assert_eq!(alice.store().status(&missed), Some(DeliveryStatus::Sent));
        alice.reconnect().await.unwrap();

        bob.reconnect().await.unwrap();
        let updates = bob.process_events().await.unwrap();
        assert!(updates.contains(&ClientUpdate::MessageReceived(missed)));
        assert_eq!(bob.store().message(&missed).unwrap().text, "while you were away");
        assert_eq!(
            bob.store().status(&missed),
            Some(DeliveryStatus::Delivered)
        );

        let updates = alice.process_events().await.unwrap();
        assert!(updates.contains(&ClientUpdate::StatusChanged {
            message_id: missed,
            status: DeliveryStatus::Delivered,
        }));
    }

    #[tokio::test]
    async fn test_attachment_travels_encrypted() {
        let w = world().await;
        let id = w.conversation.id;
        let mut alice = client(&w, w.alice, MemoryStore::new()).await;
        let mut bob = client(&w, w.bob, MemoryStore::new()).await;
        alice.open_conversation(id).await.unwrap();
        bob.open_conversation(id).await.unwrap();
        alice.process_events().await.unwrap();

        let sent = alice
            .send_attachment("invoice.pdf", "application/pdf", b"%PDF-1.7".to_vec())
            .await
            .unwrap();

        let stored = w.relay.messages(w.bob, id, 10).await.unwrap();
        assert!(!stored[0].ciphertext.contains("invoice"));
        assert_eq!(stored[0].kind, MessageKind::File);

        bob.process_events().await.unwrap();
        let received = bob.store().message(&sent).unwrap();
        assert_eq!(received.text, "invoice.pdf");
        let attachment = received.attachment.as_ref().unwrap();
        assert_eq!(attachment.size, 8);

        let object = w.objects.get(&attachment.url).await.unwrap();
        assert_eq!(object.bytes, b"%PDF-1.7");
    }

    #[tokio::test]
    async fn test_reset_keys_publishes_new_key() {
        let w = world().await;
        let id = w.conversation.id;
        let mut alice = client(&w, w.alice, MemoryStore::new()).await;
        let mut bob = client(&w, w.bob, MemoryStore::new()).await;
        alice.open_conversation(id).await.unwrap();
        bob.open_conversation(id).await.unwrap();

        let before = alice.fingerprint().unwrap();
        assert_eq!(alice.reset_keys().await.unwrap(), EncryptionMode::Sealed);
        assert_ne!(alice.fingerprint().unwrap(), before);

        bob.process_events().await.unwrap();
        bob.reconnect().await.unwrap();
        let sent = bob.send_text("new key works").await.unwrap();
        alice.process_events().await.unwrap();
        assert_eq!(alice.store().message(&sent).unwrap().text, "new key works");
    }

    #[tokio::test]
    async fn test_forged_pushes_are_ignored() {
        let w = world().await;
        let id = w.conversation.id;
        let mut alice = client(&w, w.alice, MemoryStore::new()).await;
        let mut bob = client(&w, w.bob, MemoryStore::new()).await;
        alice.open_conversation(id).await.unwrap();
        bob.open_conversation(id).await.unwrap();
        alice.process_events().await.unwrap();

        let invoice = alice.send_text("invoice attached").await.unwrap();
        assert_eq!(
            bob.process_events().await.unwrap(),
            vec![ClientUpdate::MessageReceived(invoice)]
        );

        // Someone outside the conversation writes straight into the rooms
        let mallory = Transport::connect(w.hub.clone(), UserId::new()).await;
        let invented = Message {
            id: MessageId::new(),
            conversation_id: id,
            sender_id: w.alice,
            recipient_id: w.bob,
            ciphertext: "cGF5IHRvIElCQU4gWFg5OQ==".to_string(),
            signature: MessageSignature::Fallback,
            content_hash: CipherEngine::hash(b"pay to IBAN XX99"),
            kind: MessageKind::Text,
            status: DeliveryStatus::Delivered,
            created_at: chrono::Utc::now(),
        };
        let mut tampered = w
            .relay
            .messages(w.alice, id, 10)
            .await
            .unwrap()
            .into_iter()
            .find(|m| m.id == invoice)
            .unwrap();
        tampered.ciphertext = invented.ciphertext.clone();
        tampered.signature = MessageSignature::Fallback;

        for message in [invented.clone(), tampered] {
            mallory
                .emit(&w.bob, &TransportEvent::EncryptedMessage { message })
                .await
                .unwrap();
        }
        mallory
            .emit(
                &w.alice,
                &TransportEvent::MessagesRead {
                    conversation_id: id,
                    message_ids: vec![invoice],
                },
            )
            .await
            .unwrap();

        assert!(bob.process_events().await.unwrap().is_empty());
        assert!(bob.store().message(&invented.id).is_none());
        assert_eq!(bob.store().message(&invoice).unwrap().text, "invoice attached");
        assert_eq!(bob.messages().len(), 1);

        assert!(alice.process_events().await.unwrap().is_empty());
        assert_eq!(alice.store().status(&invoice), Some(DeliveryStatus::Delivered));

        // The genuine read receipt still goes through
        bob.mark_read().await.unwrap();
        assert_eq!(
            alice.process_events().await.unwrap(),
            vec![ClientUpdate::StatusChanged {
                message_id: invoice,
                status: DeliveryStatus::Read,
            }]
        );
    }

    #[tokio::test]
    async fn test_queued_updates_survive_failed_poll() {
        let w = world().await;
        let id = w.conversation.id;
        let mut alice = client(&w, w.alice, MemoryStore::new()).await;
        let mut bob = client(&w, w.bob, MemoryStore::new()).await;
        alice.open_conversation(id).await.unwrap();
        bob.open_conversation(id).await.unwrap();
        alice.process_events().await.unwrap();

        alice.disconnect();
        let missed = bob.send_text("are you there?").await.unwrap();
        alice.reconnect().await.unwrap();

        // Dropped again before the resync results were polled
        alice.disconnect();
        assert!(matches!(
            alice.process_events().await,
            Err(Error::TransportDisconnected)
        ));

        alice.reconnect().await.unwrap();
        let updates = alice.process_events().await.unwrap();
        assert!(updates.contains(&ClientUpdate::MessageReceived(missed)));
        assert_eq!(alice.store().message(&missed).unwrap().text, "are you there?");
    }

    /// Delegates to a [`MemoryRelay`] but refuses key publication for one conversation.
    struct PublishOutage {
        inner: Arc<MemoryRelay>,
        down_for: ConversationId,
    }

    #[async_trait]
    impl Relay for PublishOutage {
        async fn exchange_keys(
            &self,
            principal: UserId,
            request: ExchangeKeysRequest,
        ) -> Result<ExchangeKeysResponse, Error> {
            if request.conversation_id == self.down_for {
                return Err(Error::Protocol("exchange endpoint unavailable".to_string()));
            }
            self.inner.exchange_keys(principal, request).await
        }

        async fn conversation(
            &self,
            principal: UserId,
            conversation_id: ConversationId,
        ) -> Result<Conversation, Error> {
            self.inner.conversation(principal, conversation_id).await
        }

        async fn submit_message(
            &self,
            principal: UserId,
            message: SubmitMessage,
        ) -> Result<SubmitReceipt, Error> {
            self.inner.submit_message(principal, message).await
        }

        async fn messages(
            &self,
            principal: UserId,
            conversation_id: ConversationId,
            limit: usize,
        ) -> Result<Vec<Message>, Error> {
            self.inner.messages(principal, conversation_id, limit).await
        }

        async fn message(
            &self,
            principal: UserId,
            message_id: MessageId,
        ) -> Result<Message, Error> {
            self.inner.message(principal, message_id).await
        }

        async fn mark_delivered(
            &self,
            principal: UserId,
            message_id: MessageId,
        ) -> Result<Transition, Error> {
            self.inner.mark_delivered(principal, message_id).await
        }

        async fn mark_read(
            &self,
            principal: UserId,
            message_ids: Vec<MessageId>,
        ) -> Result<Vec<MessageId>, Error> {
            self.inner.mark_read(principal, message_ids).await
        }
    }

    #[tokio::test]
    async fn test_failed_publish_keeps_current_conversation() {
        let w = world().await;
        let carol = UserId::new();
        let directory = Arc::new(ParticipantDirectory::new());
        let relay = Arc::new(MemoryRelay::new(
            directory.clone(),
            w.hub.clone(),
            RelayConfig::default(),
        ));
        let with_bob = Participants {
            party_a: w.alice,
            party_b: w.bob,
        };
        let with_carol = Participants {
            party_a: w.alice,
            party_b: carol,
        };
        let first = relay.open_conversation("job-1", with_bob).await.unwrap();
        let second = relay.open_conversation("job-2", with_carol).await.unwrap();
        directory.register(first.id, with_bob).await;
        directory.register(second.id, with_carol).await;

        let flaky = Arc::new(PublishOutage {
            inner: relay.clone(),
            down_for: second.id,
        });
        let mut alice = ChatClient::connect(
            w.alice,
            flaky,
            w.objects.clone(),
            w.hub.clone(),
            MemoryStore::new(),
            config(),
        )
        .await;
        alice.open_conversation(first.id).await.unwrap();
        let hello = alice.send_text("hello bob").await.unwrap();
        let fingerprint = alice.fingerprint();

        assert!(matches!(
            alice.open_conversation(second.id).await,
            Err(Error::Protocol(_))
        ));

        assert_eq!(alice.store().conversation_id(), Some(first.id));
        assert_eq!(alice.store().message(&hello).unwrap().text, "hello bob");
        assert_eq!(alice.fingerprint(), fingerprint);
        alice.send_text("still here").await.unwrap();
        assert_eq!(relay.messages(w.bob, first.id, 10).await.unwrap().len(), 2);
    }
}
